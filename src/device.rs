//! The canonical per-MAC device record and its behavioural profile.
//!
//! This is the data model spec.md §3 describes. The teacher's `protocol.rs`
//! shows the house style for a wire-facing record (`#[derive(Serialize)]`,
//! `#[serde(tag = "type")]` enums) — generalized here from fixed-capacity
//! `heapless` fields to an owned, growable record since the registry now
//! runs on a host with an allocator, not an MCU.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Closed set for `Device::device_type` — spec.md's REDESIGN FLAGS calls out
/// a drifting string/enum field in the original; this crate settles on the
/// closed enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Ap,
    Station,
    Unknown,
}

impl Default for DeviceType {
    fn default() -> Self {
        DeviceType::Unknown
    }
}

impl DeviceType {
    /// Type upgrade order used by the registry merge policy: station -> ap,
    /// never downgrade, ignore unknown/empty.
    pub fn upgrade(self, new: DeviceType) -> DeviceType {
        match (self, new) {
            (DeviceType::Ap, _) => DeviceType::Ap,
            (_, DeviceType::Ap) => DeviceType::Ap,
            (DeviceType::Unknown, DeviceType::Station) => DeviceType::Station,
            (current, DeviceType::Unknown) => current,
            (_, new) => new,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Authenticating,
    Associating,
    Handshake,
    Connected,
}

impl Default for ConnectionState {
    fn default() -> Self {
        ConnectionState::Disconnected
    }
}

/// RSN capability bits (IEEE 802.11 RSN Capabilities field), decoded per
/// spec.md §4.2.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RsnCapabilities {
    pub pre_auth: bool,
    pub no_pairwise: bool,
    pub ptksa_replay_counter: u8,
    pub gtksa_replay_counter: u8,
    pub mfp_required: bool,
    pub mfp_capable: bool,
    pub peerkey_enabled: bool,
}

/// Full RSN IE contents as parsed by `ie::handlers::parse_rsn`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RsnInfo {
    pub version: u16,
    pub group_cipher: String,
    pub pairwise_ciphers: Vec<String>,
    pub akms: Vec<String>,
    pub capabilities: RsnCapabilities,
}

/// Decoded Microsoft WPS vendor element (IE 221, OUI 00:50:F2, type 04).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WpsDetails {
    pub manufacturer: String,
    pub model_name: String,
    pub model_number: String,
    pub device_name: String,
}

/// Behavioural profile maintained per-MAC alongside its `Device` record.
/// Lives in the same registry shard as its device (spec.md §3 Ownership);
/// pruned after 24h of inactivity.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BehavioralProfile {
    pub active_hours: Vec<u8>,
    pub probe_frequency_secs: f64,
    pub last_probe_time: Option<DateTime<Utc>>,
    pub unique_ssids: usize,
    pub ssid_signature: String,
    pub ie_tags: Vec<u8>,
    pub linked_mac: Option<String>,
    pub anomaly_score: f64,
    pub anomaly_details: HashMap<String, f64>,
    pub last_updated: DateTime<Utc>,
}

impl BehavioralProfile {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            last_updated: now,
            ..Default::default()
        }
    }

    /// Record an hour-of-day observation (deduplicated).
    pub fn touch_active_hour(&mut self, now: DateTime<Utc>) {
        use chrono::Timelike;
        let hour = now.hour() as u8;
        if !self.active_hours.contains(&hour) {
            self.active_hours.push(hour);
        }
    }

    /// EWMA update (alpha = 0.3) of the inter-probe interval, seeded with
    /// the first observed interval.
    pub fn observe_probe(&mut self, now: DateTime<Utc>) {
        if let Some(last) = self.last_probe_time {
            let interval = (now - last).num_milliseconds() as f64 / 1000.0;
            if self.probe_frequency_secs == 0.0 {
                self.probe_frequency_secs = interval;
            } else {
                self.probe_frequency_secs = 0.7 * self.probe_frequency_secs + 0.3 * interval;
            }
        }
        self.last_probe_time = Some(now);
    }

    /// Recompute `unique_ssids`/`ssid_signature` from a device's probed-SSID
    /// map (lexicographically sorted, comma-joined).
    pub fn recompute_ssid_signature(&mut self, probed_ssids: &HashMap<String, DateTime<Utc>>) {
        let mut ssids: Vec<&str> = probed_ssids.keys().map(|s| s.as_str()).collect();
        ssids.sort_unstable();
        self.unique_ssids = ssids.len();
        self.ssid_signature = ssids.join(",");
    }
}

/// The canonical per-MAC record merged and owned by the device registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    // Identity
    pub mac: String,
    pub vendor: String,
    pub device_type: DeviceType,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub last_packet_time: DateTime<Utc>,

    // Radio
    pub rssi: i8,
    pub frequency_mhz: u32,
    pub channel: u8,
    pub channel_width: u32,
    pub standard: String,
    pub is_wifi6: bool,
    pub is_wifi7: bool,

    // Identity derived from IEs
    pub ssid: String,
    pub security: String,
    pub rsn_info: Option<RsnInfo>,
    pub capabilities: Vec<String>,
    pub has_11k: bool,
    pub has_11v: bool,
    pub has_11r: bool,
    pub wps_details: Option<WpsDetails>,
    pub wps_info: String,
    pub model: String,
    pub os: String,
    pub mobility_domain: Option<String>,

    // Behaviour
    pub probed_ssids: HashMap<String, DateTime<Utc>>,
    pub observed_ssids: Vec<String>,
    pub is_randomized: bool,

    // Connection state
    pub connection_state: ConnectionState,
    pub connection_target: String,
    pub connected_ssid: String,
    pub connection_error: String,

    // Traffic
    pub data_tx_bytes: u64,
    pub data_rx_bytes: u64,
    pub packets_count: u64,
    pub retry_count: u64,

    // Fingerprint
    pub ie_tags: Vec<u8>,
    pub signature: String,

    // Analysis
    pub behavioral: BehavioralProfile,
    pub has_handshake: bool,
    pub vulnerabilities: Vec<String>,
}

impl Device {
    /// A bare draft record for `mac`, timestamped `now`. Dispatcher handlers
    /// (§4.6/§4.2) fill in the rest before handing it to the registry.
    pub fn new(mac: impl Into<String>, now: DateTime<Utc>) -> Self {
        let mac = mac.into();
        Device {
            mac,
            vendor: String::new(),
            device_type: DeviceType::Unknown,
            first_seen: now,
            last_seen: now,
            last_packet_time: now,
            rssi: 0,
            frequency_mhz: 0,
            channel: 0,
            channel_width: 0,
            standard: String::new(),
            is_wifi6: false,
            is_wifi7: false,
            ssid: String::new(),
            security: String::new(),
            rsn_info: None,
            capabilities: Vec::new(),
            has_11k: false,
            has_11v: false,
            has_11r: false,
            wps_details: None,
            wps_info: String::new(),
            model: String::new(),
            os: String::new(),
            mobility_domain: None,
            probed_ssids: HashMap::new(),
            observed_ssids: Vec::new(),
            is_randomized: false,
            connection_state: ConnectionState::Disconnected,
            connection_target: String::new(),
            connected_ssid: String::new(),
            connection_error: String::new(),
            data_tx_bytes: 0,
            data_rx_bytes: 0,
            packets_count: 0,
            retry_count: 0,
            ie_tags: Vec::new(),
            signature: String::new(),
            behavioral: BehavioralProfile::new(now),
            has_handshake: false,
            vulnerabilities: Vec::new(),
        }
    }

    /// Push a capability string, deduplicated (spec.md §3 invariant).
    pub fn add_capability(&mut self, cap: &str) {
        if !self.capabilities.iter().any(|c| c == cap) {
            self.capabilities.push(cap.to_string());
        }
    }

    /// Append an SSID to `observed_ssids`, set-wise (insertion order
    /// preserved, no duplicates).
    pub fn add_observed_ssid(&mut self, ssid: &str) {
        if !self.observed_ssids.iter().any(|s| s == ssid) {
            self.observed_ssids.push(ssid.to_string());
        }
    }
}
