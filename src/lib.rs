//! Vigil — a passive 802.11 wireless reconnaissance engine.
//!
//! Watches Radiotap-tagged 802.11 frames handed to it by a capture front end
//! and turns them into a merged device registry, a WPA/WPA2 handshake/PMKID
//! capture pipeline, passive anomaly detection, and a graph projection for
//! downstream presentation. No platform I/O lives here — frame capture,
//! channel-hopping hardware control, and the HTTP/WS transport are thin
//! consumers of [`engine::Engine`].

pub mod alert;
pub mod anomaly;
pub mod channel_sched;
pub mod device;
pub mod dispatcher;
pub mod eapol;
pub mod engine;
pub mod error;
pub mod fingerprint;
pub mod graph;
pub mod handshake;
pub mod ie;
pub mod mac;
pub mod pcap;
pub mod radiotap;
pub mod registry;
