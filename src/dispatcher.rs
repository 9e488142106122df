//! Packet dispatcher (C6): the single entry point per captured frame.
//!
//! No teacher analogue for the classify-then-route shape itself (AirHound's
//! `scanner::parse_wifi_frame` only ever builds one kind of record per scan
//! callback); grounded on its panic-guard posture (`std::panic::catch_unwind`
//! wrapping the whole BLE/WiFi scan callback) generalised to the frame-type
//! dispatch table spec.md §4.6 lays out. This module takes an already
//! classified `RawFrame` rather than raw bytes — no 802.11 frame-parsing
//! crate sits in the dependency stack, so address/DS-flag/reason-code
//! extraction is assumed done by the caller (spec.md §6 "a third-party
//! 802.11 parser").

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use crate::alert::{subtype, Alert, AlertType, Severity};
use crate::channel_sched::ChannelScheduler;
use crate::device::{ConnectionState, Device, DeviceType};
use crate::eapol::EapolKey;
use crate::handshake::{resolve_addresses, HandshakeManager};
use crate::ie;
use crate::mac;
use crate::pcap::CapturedFrame;
use crate::radiotap::{self, RadioInfo};

const THROTTLE_SHARDS: usize = 32;
const THROTTLE_WINDOW: Duration = Duration::from_millis(500);
const REACTIVE_PAUSE: Duration = Duration::from_secs(5);

/// How a caller's 802.11 frame parser classified one captured frame
/// (spec.md §4.6 step 8's dispatch table).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Beacon,
    ProbeRequest,
    ProbeResponse,
    AssociationRequest,
    ReassociationRequest,
    Authentication,
    Action,
    Deauthentication,
    Disassociation,
    DataUplink,
    DataDownlink,
}

/// One already-decoded 802.11 frame. Address/DS-flag/reason-code
/// extraction happens upstream of this module (spec.md §6); everything
/// here works off these already-parsed fields plus the raw IE/EAPOL/
/// Radiotap byte regions.
pub struct RawFrame<'a> {
    pub kind: FrameKind,
    pub to_ds: bool,
    pub from_ds: bool,
    pub addr1: String,
    pub addr2: String,
    pub addr3: String,
    /// Radiotap header bytes (spec.md §4.6 step 6).
    pub radiotap: &'a [u8],
    /// Management-frame body with fixed parameters already stripped.
    pub ie_body: &'a [u8],
    /// `Some` when this (data) frame carries an EAPOL-Key payload.
    pub eapol_payload: Option<&'a [u8]>,
    pub reason_code: Option<u16>,
    pub status_code: Option<u16>,
    pub category: Option<u8>,
    pub payload_len: u64,
    /// Full captured bytes + timestamp, archived verbatim into handshake
    /// sessions/PMKID saves (spec.md §4.5).
    pub capture: CapturedFrame,
}

/// What the dispatcher learned about a device from one frame.
#[derive(Debug, Clone)]
pub enum DeviceOutcome {
    /// Fold into the registry's normal merge policy.
    Merge(Device),
    /// Bypass the merge policy entirely (spec.md §4.6 step 7) — the merge
    /// policy can never force a device back to `disconnected`.
    ForceDisconnect {
        mac: String,
        connection_error: Option<String>,
    },
}

#[derive(Debug, Clone, Default)]
pub struct DispatchResult {
    pub device: Option<DeviceOutcome>,
    pub alerts: Vec<Alert>,
}

/// 32-way sharded MAC → last-seen map (spec.md §4.6 step 5).
struct Throttle {
    shards: Vec<RwLock<HashMap<String, Instant>>>,
}

impl Throttle {
    fn new() -> Self {
        let mut shards = Vec::with_capacity(THROTTLE_SHARDS);
        for _ in 0..THROTTLE_SHARDS {
            shards.push(RwLock::new(HashMap::new()));
        }
        Self { shards }
    }

    fn shard_index(mac: &str) -> usize {
        let mut hash: u32 = 0x811c_9dc5;
        for byte in mac.bytes() {
            hash ^= byte as u32;
            hash = hash.wrapping_mul(0x0100_0193);
        }
        (hash as usize) % THROTTLE_SHARDS
    }

    /// True if `mac` may proceed: either never seen, or last seen outside
    /// the throttle window. Updates the last-seen time either way isn't
    /// correct — only a pass updates it, matching property 9 (only the
    /// first of a rapid pair yields an update).
    fn allow(&self, mac: &str, now: Instant) -> bool {
        let idx = Self::shard_index(mac);
        let mut shard = self.shards[idx].write().unwrap();
        match shard.get(mac) {
            Some(&last) if now.duration_since(last) < THROTTLE_WINDOW => false,
            _ => {
                shard.insert(mac.to_string(), now);
                true
            }
        }
    }
}

pub struct Dispatcher {
    handshake: Arc<HandshakeManager>,
    channels: Arc<ChannelScheduler>,
    throttle: Throttle,
}

impl Dispatcher {
    pub fn new(handshake: Arc<HandshakeManager>, channels: Arc<ChannelScheduler>) -> Self {
        Self {
            handshake,
            channels,
            throttle: Throttle::new(),
        }
    }

    /// Entry point per captured frame (spec.md §4.6). Never panics: any
    /// fault inside the pipeline is caught and logged, yielding an empty
    /// result (step 1).
    pub fn dispatch(&self, frame: &RawFrame, interface: &str, now: DateTime<Utc>) -> DispatchResult {
        let result = panic::catch_unwind(AssertUnwindSafe(|| self.dispatch_inner(frame, interface, now)));
        result.unwrap_or_else(|_| {
            log::error!("panic in packet dispatcher pipeline, dropping frame");
            DispatchResult::default()
        })
    }

    fn dispatch_inner(&self, frame: &RawFrame, interface: &str, now: DateTime<Utc>) -> DispatchResult {
        let mut alerts = Vec::new();

        // Step 2/3/4: handshake hook, PMKID detection, nonce quality.
        if let Some(payload) = frame.eapol_payload {
            if let Some((bssid, station)) =
                resolve_addresses(frame.to_ds, frame.from_ds, &frame.addr1, &frame.addr2, &frame.addr3)
            {
                if let Some(key) = EapolKey::parse(payload) {
                    if let Some(outcome) = self
                        .handshake
                        .process_eapol(&bssid, &station, &key, frame.capture.clone(), now)
                    {
                        if outcome.saved {
                            alerts.push(
                                Alert::new(
                                    AlertType::Handshake,
                                    subtype::HANDSHAKE_CAPTURED,
                                    station.clone(),
                                    Severity::Medium,
                                    format!("handshake message {} captured for {bssid}", outcome.message_number),
                                )
                                .with_target(bssid.clone()),
                            );
                        }
                    }

                    if find_pmkid_vendor_ie(&key.key_data) {
                        let essid = self.handshake.essid_for(&bssid);
                        self.handshake.save_pmkid(&bssid, &essid, frame.capture.clone());
                        alerts.push(
                            Alert::new(
                                AlertType::Vulnerability,
                                subtype::VULNERABILITY_DETECTED,
                                station.clone(),
                                Severity::High,
                                format!("PMKID exposed by {bssid}"),
                            )
                            .with_target(bssid.clone())
                            .with_detail("kind", "PMKID"),
                        );
                    }

                    if frame.from_ds && !frame.to_ds {
                        let nonce = key.key_nonce;
                        if nonce.iter().all(|&b| b == 0) {
                            alerts.push(Alert::new(
                                AlertType::Vulnerability,
                                subtype::WEAK_CRYPTO_ZERO_NONCE,
                                bssid.clone(),
                                Severity::Critical,
                                "AP-supplied key nonce is all-zero".to_string(),
                            ));
                        } else if nonce.iter().all(|&b| b == nonce[0]) {
                            alerts.push(Alert::new(
                                AlertType::Vulnerability,
                                subtype::WEAK_CRYPTO_BAD_RNG,
                                bssid.clone(),
                                Severity::High,
                                "AP-supplied key nonce bytes are all identical".to_string(),
                            ));
                        }
                    }
                }

                // Aggressive reactive dwell: any EAPOL frame requests the pause,
                // independent of whether it parsed into a usable session update.
                self.channels.pause(interface, REACTIVE_PAUSE);
            }
        }

        // Step 5: throttle. Critical kinds and any EAPOL/data frame are exempt.
        let exempt = frame.eapol_payload.is_some()
            || matches!(
                frame.kind,
                FrameKind::Deauthentication
                    | FrameKind::Disassociation
                    | FrameKind::AssociationRequest
                    | FrameKind::ReassociationRequest
                    | FrameKind::Authentication
                    | FrameKind::DataUplink
                    | FrameKind::DataDownlink
            );
        if !exempt && !self.throttle.allow(&frame.addr2, Instant::now()) {
            return DispatchResult { device: None, alerts };
        }

        // Step 6: radio base info.
        let radio = radiotap::parse_radio_info(frame.radiotap).unwrap_or_default();

        // Step 7: deauth/disassoc threat detection.
        if matches!(frame.kind, FrameKind::Deauthentication | FrameKind::Disassociation) {
            let station_mac = if frame.addr2 == frame.addr3 {
                frame.addr1.clone()
            } else {
                frame.addr2.clone()
            };
            let other = if station_mac == frame.addr1 {
                frame.addr2.clone()
            } else {
                frame.addr1.clone()
            };
            let broadcast = mac::parse(&frame.addr1).map(|b| mac::is_broadcast(&b)).unwrap_or(false);
            let subtype_tag = if broadcast { subtype::BROADCAST_DEAUTH } else { subtype::DEAUTH_DETECTED };
            let connection_error = match frame.reason_code {
                Some(2) | Some(15) | Some(23) => Some("auth_failed".to_string()),
                _ => None,
            };
            let verb = if frame.kind == FrameKind::Deauthentication { "deauthentication" } else { "disassociation" };
            alerts.push(
                Alert::new(
                    AlertType::Threat,
                    subtype_tag,
                    station_mac.clone(),
                    Severity::High,
                    format!("{verb} from {other}"),
                )
                .with_target(other),
            );
            return DispatchResult {
                device: Some(DeviceOutcome::ForceDisconnect { mac: station_mac, connection_error }),
                alerts,
            };
        }

        // Step 8: frame-type dispatch.
        let device = self.build_device(frame, radio, now);
        DispatchResult { device, alerts }
    }

    fn build_device(&self, frame: &RawFrame, radio: RadioInfo, now: DateTime<Utc>) -> Option<DeviceOutcome> {
        let device = match frame.kind {
            FrameKind::Beacon | FrameKind::ProbeResponse => {
                let mut d = seed_device(&frame.addr2, now, radio);
                d.device_type = DeviceType::Ap;
                ie::process_ies(frame.ie_body, &mut d);
                d.add_capability(if frame.kind == FrameKind::Beacon { "Beacon" } else { "ProbeResp" });
                d.observed_ssids = vec![d.ssid.clone()];
                d.has_handshake = self.handshake.has_handshake(&frame.addr2);
                if frame.kind == FrameKind::Beacon {
                    self.handshake.process_beacon(&frame.addr2, &d.ssid, frame.capture.clone());
                }
                d
            }
            FrameKind::ProbeRequest => {
                let mut d = seed_device(&frame.addr2, now, radio);
                d.device_type = DeviceType::Station;
                ie::process_ies(frame.ie_body, &mut d);
                d.add_capability("Probe");
                if !d.ssid.is_empty() {
                    d.probed_ssids.insert(d.ssid.clone(), now);
                }
                d
            }
            FrameKind::AssociationRequest | FrameKind::ReassociationRequest => {
                let mut d = seed_device(&frame.addr2, now, radio);
                d.device_type = DeviceType::Station;
                d.add_capability("AssocReq");
                d.connection_state = ConnectionState::Associating;
                d.connection_target = frame.addr1.clone();
                d
            }
            FrameKind::Authentication => {
                let mut d = seed_device(&frame.addr2, now, radio);
                d.device_type = DeviceType::Station;
                d.add_capability("Auth");
                d.connection_state = ConnectionState::Authenticating;
                d.connection_target = frame.addr1.clone();
                if let Some(status) = frame.status_code {
                    if status != 0 {
                        d.connection_error = format!("auth_failed_code_{status}");
                    }
                }
                d
            }
            FrameKind::Action => {
                let is_ap = frame.addr2 == frame.addr3;
                let mut d = seed_device(&frame.addr2, now, radio);
                d.device_type = if is_ap { DeviceType::Ap } else { DeviceType::Station };
                if let Some(category) = frame.category {
                    match category {
                        0 => d.add_capability("11h"),
                        5 => {
                            d.has_11k = true;
                            d.add_capability("11k");
                        }
                        6 => {
                            d.has_11r = true;
                            d.add_capability("11r");
                        }
                        10 => {
                            d.has_11v = true;
                            d.add_capability("11v");
                        }
                        _ => {}
                    }
                }
                d
            }
            FrameKind::DataUplink => {
                let mut d = seed_device(&frame.addr2, now, radio);
                d.device_type = DeviceType::Station;
                d.connected_ssid = frame.addr1.clone();
                d.connection_target = frame.addr1.clone();
                d.connection_state =
                    if frame.eapol_payload.is_some() { ConnectionState::Handshake } else { ConnectionState::Connected };
                d.data_tx_bytes = frame.payload_len;
                d
            }
            FrameKind::DataDownlink => {
                let multicast = mac::parse(&frame.addr1).map(|b| mac::is_multicast(&b)).unwrap_or(false);
                if multicast {
                    return None;
                }
                let mut d = seed_device(&frame.addr1, now, radio);
                d.device_type = DeviceType::Station;
                d.connected_ssid = frame.addr2.clone();
                d.connection_target = frame.addr2.clone();
                d.connection_state =
                    if frame.eapol_payload.is_some() { ConnectionState::Handshake } else { ConnectionState::Connected };
                d.data_rx_bytes = frame.payload_len;
                d
            }
            FrameKind::Deauthentication | FrameKind::Disassociation => {
                unreachable!("handled by the threat-detection branch above")
            }
        };
        Some(DeviceOutcome::Merge(device))
    }
}

fn seed_device(mac: &str, now: DateTime<Utc>, radio: RadioInfo) -> Device {
    let mut d = Device::new(mac, now);
    d.rssi = radio.rssi;
    d.frequency_mhz = radio.frequency_mhz;
    d.channel = radio.channel;
    if let Some(bytes) = mac::parse(mac) {
        d.is_randomized = mac::is_locally_administered(&bytes);
        if let Some(vendor) = mac::vendor_for(&bytes) {
            d.vendor = vendor.to_string();
        }
    }
    d
}

/// Vendor-specific IE (tag 221) with OUI `00:0F:AC:04` — a PMKID element
/// (spec.md §4.6 step 3).
fn find_pmkid_vendor_ie(key_data: &[u8]) -> bool {
    let mut found = false;
    ie::iterate_ies(key_data, |id, value| {
        if id == 221 && value.len() >= 4 && value[0..3] == [0x00, 0x0F, 0xAC] && value[3] == 0x04 {
            found = true;
        }
    });
    found
}
