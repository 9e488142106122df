//! Sharded device registry (C7): merges successive observations of the
//! same MAC into one evolving record, with behavioural profiling and
//! randomised-MAC correlation.
//!
//! Grounded on the teacher's `FILTER_CONFIG`/`defaults` posture for shared
//! state (an injected struct behind a lock, not a bare global) and on the
//! lock-drop-then-rescan pattern spec.md §9 calls out explicitly — this is
//! new surface the teacher doesn't have an analogue for (AirHound runs
//! single-threaded per scan callback), so the shard/lock shape follows
//! spec.md §4.7/§5 directly.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use chrono::{Duration as ChronoDuration, Utc};

use crate::device::{BehavioralProfile, ConnectionState, Device};
use crate::fingerprint::{self, SignatureStore};

const SHARD_COUNT: usize = 16;

/// 32-bit FNV-1a hash of `mac`, modulo `SHARD_COUNT` (spec.md §4.7).
fn shard_index(mac: &str) -> usize {
    let mut hash: u32 = 0x811c_9dc5;
    for byte in mac.bytes() {
        hash ^= byte as u32;
        hash = hash.wrapping_mul(0x0100_0193);
    }
    (hash as usize) % SHARD_COUNT
}

#[derive(Default)]
struct Shard {
    devices: HashMap<String, Device>,
    profiles: HashMap<String, BehavioralProfile>,
}

#[derive(Default)]
struct SsidState {
    known_ssids: HashSet<String>,
    ssid_security: HashMap<String, String>,
}

pub struct DeviceRegistry {
    shards: Vec<RwLock<Shard>>,
    ssid_state: RwLock<SsidState>,
    signature_store: SignatureStore,
}

impl DeviceRegistry {
    pub fn new(signature_store: SignatureStore) -> Self {
        let mut shards = Vec::with_capacity(SHARD_COUNT);
        for _ in 0..SHARD_COUNT {
            shards.push(RwLock::new(Shard::default()));
        }
        Self {
            shards,
            ssid_state: RwLock::new(SsidState::default()),
            signature_store,
        }
    }

    /// Merge `new_device` into the canonical record for its MAC. Returns
    /// `(merged, newly_discovered)` (spec.md §4.7).
    pub fn process(&self, mut new_device: Device) -> (Device, bool) {
        let now = Utc::now();
        if new_device.first_seen.timestamp() == 0 {
            new_device.first_seen = now;
            new_device.last_seen = now;
        }
        let mac = new_device.mac.clone();
        let idx = shard_index(&mac);

        {
            let mut shard = self.shards[idx].write().unwrap();
            if shard.devices.contains_key(&mac) {
                let snapshot = self.merge_in_shard(&mut shard, &mac, &new_device, now);
                return (snapshot, false);
            }
        }

        // Unknown MAC: run discovery and (for randomised MACs) correlate
        // against other shards before taking the write lock again.
        fingerprint::discover(&mut new_device, &self.signature_store);
        let mut profile = BehavioralProfile::new(now);
        update_behavioral_profile(&mut profile, &new_device, now);

        if new_device.is_randomized {
            if let Some(best) = self.best_correlation_candidate(&mac, &profile) {
                profile.linked_mac = Some(best);
            }
        }

        let mut shard = self.shards[idx].write().unwrap();
        if shard.devices.contains_key(&mac) {
            // Another writer raced in while we scanned; re-merge.
            let snapshot = self.merge_in_shard(&mut shard, &mac, &new_device, now);
            return (snapshot, false);
        }

        new_device.behavioral = profile.clone();
        shard.devices.insert(mac.clone(), new_device.clone());
        shard.profiles.insert(mac, profile);
        drop(shard);
        self.update_ssid_state(&new_device);
        (new_device, true)
    }

    /// Merge `new_device` into the record already present in `shard` for
    /// `mac`, update its behavioural profile, and return a snapshot. The
    /// caller holds `shard`'s write lock for the duration — this never
    /// re-acquires it, only the (distinct) discovery-cache and SSID locks.
    fn merge_in_shard(&self, shard: &mut Shard, mac: &str, new_device: &Device, now: chrono::DateTime<Utc>) -> Device {
        let existing = shard.devices.get_mut(mac).expect("caller checked contains_key");
        let ie_tags_changed = !new_device.ie_tags.is_empty() && new_device.ie_tags != existing.ie_tags;
        let should_rediscover = ie_tags_changed || existing.model.is_empty();

        merge_policy(existing, new_device);
        if should_rediscover {
            fingerprint::discover(existing, &self.signature_store);
        }
        let snapshot = existing.clone();

        let profile = shard
            .profiles
            .entry(mac.to_string())
            .or_insert_with(|| BehavioralProfile::new(now));
        update_behavioral_profile(profile, &snapshot, now);
        let profile_snapshot = profile.clone();

        let existing = shard.devices.get_mut(mac).expect("caller checked contains_key");
        existing.behavioral = profile_snapshot.clone();
        let snapshot = existing.clone();

        self.update_ssid_state(&snapshot);
        snapshot
    }

    /// Scan every shard's profiles for the best randomised-MAC correlation
    /// candidate (spec.md §4.7/§9 "lock-drop for cross-shard scans"). The
    /// caller has already released its own shard's write lock.
    fn best_correlation_candidate(&self, mac: &str, candidate: &BehavioralProfile) -> Option<String> {
        let mut best_score = 0.0;
        let mut best_mac = None;
        for shard_lock in &self.shards {
            let shard = shard_lock.read().unwrap();
            for (other_mac, other_profile) in shard.profiles.iter() {
                if other_mac == mac || other_profile.ssid_signature.is_empty() {
                    continue;
                }
                let score = correlation_score(candidate, other_profile);
                if score > best_score {
                    best_score = score;
                    best_mac = Some(other_mac.clone());
                }
            }
        }
        if best_score >= 0.8 {
            best_mac
        } else {
            None
        }
    }

    fn update_ssid_state(&self, device: &Device) {
        if device.ssid.is_empty() || device.ssid == "<HIDDEN>" {
            return;
        }
        let mut state = self.ssid_state.write().unwrap();
        state.known_ssids.insert(device.ssid.clone());
        if !device.security.is_empty() {
            state.ssid_security.insert(device.ssid.clone(), device.security.clone());
        }
    }

    /// Deep-copy snapshot of every device (spec.md §4.7 "Snapshots").
    pub fn get_all(&self) -> Vec<Device> {
        let mut out = Vec::new();
        for shard_lock in &self.shards {
            out.extend(shard_lock.read().unwrap().devices.values().cloned());
        }
        out
    }

    pub fn get_device(&self, mac: &str) -> Option<Device> {
        self.shards[shard_index(mac)].read().unwrap().devices.get(mac).cloned()
    }

    pub fn get_profile(&self, mac: &str) -> Option<BehavioralProfile> {
        self.shards[shard_index(mac)].read().unwrap().profiles.get(mac).cloned()
    }

    pub fn known_ssids(&self) -> Vec<String> {
        self.ssid_state.read().unwrap().known_ssids.iter().cloned().collect()
    }

    pub fn ssid_security(&self, ssid: &str) -> Option<String> {
        self.ssid_state.read().unwrap().ssid_security.get(ssid).cloned()
    }

    /// Merge-free insert used to replay persisted devices (spec.md §6
    /// `load_device`): runs no merge logic, trusts the persisted record as-is.
    pub fn load_device(&self, device: Device) {
        let idx = shard_index(&device.mac);
        self.update_ssid_state(&device);
        self.shards[idx].write().unwrap().devices.insert(device.mac.clone(), device);
    }

    /// Clears the in-memory registry (spec.md §6 `reset_workspace`).
    pub fn reset_workspace(&self) {
        for shard_lock in &self.shards {
            let mut shard = shard_lock.write().unwrap();
            shard.devices.clear();
            shard.profiles.clear();
        }
        let mut ssid_state = self.ssid_state.write().unwrap();
        ssid_state.known_ssids.clear();
        ssid_state.ssid_security.clear();
    }

    /// Evict devices unseen for `ttl`, and profiles idle for 24h
    /// (spec.md §4.7 `prune`).
    pub fn prune(&self, ttl: ChronoDuration) {
        let now = Utc::now();
        for shard_lock in &self.shards {
            let mut shard = shard_lock.write().unwrap();
            shard.devices.retain(|_, d| now - d.last_seen < ttl);
            shard.profiles.retain(|_, p| now - p.last_updated < ChronoDuration::hours(24));
        }
    }

    /// Downgrade stale connected/handshake/associating devices to
    /// disconnected (spec.md §4.7 `cleanup_stale_connections`).
    pub fn cleanup_stale_connections(&self, timeout: ChronoDuration) {
        let now = Utc::now();
        for shard_lock in &self.shards {
            let mut shard = shard_lock.write().unwrap();
            for device in shard.devices.values_mut() {
                let is_active = matches!(
                    device.connection_state,
                    ConnectionState::Connected | ConnectionState::Handshake | ConnectionState::Associating
                );
                if is_active && now - device.last_packet_time > timeout {
                    device.connection_state = ConnectionState::Disconnected;
                    device.connection_target.clear();
                    device.connected_ssid.clear();
                }
            }
        }
    }

    /// Force a device straight to `Disconnected` (deauth/disassoc, spec.md
    /// §4.6 threat detection). Bypasses `merge_policy` entirely: that policy
    /// only ever adopts a non-default `connection_state`, so there is no way
    /// to express "go back to disconnected" through `process()`.
    pub fn mark_disconnected(&self, mac: &str, now: chrono::DateTime<Utc>, connection_error: Option<String>) {
        let idx = shard_index(mac);
        let mut shard = self.shards[idx].write().unwrap();
        if let Some(device) = shard.devices.get_mut(mac) {
            device.connection_state = ConnectionState::Disconnected;
            device.connection_target.clear();
            device.connected_ssid.clear();
            device.last_seen = now;
            device.last_packet_time = now;
            if let Some(err) = connection_error {
                device.connection_error = err;
            }
        }
    }

    /// Persist an anomaly pass's result onto both the stored device and its
    /// behavioural profile (spec.md §4.8 runs outside `process()`, against a
    /// clone, so its output has to be written back explicitly).
    pub fn update_anomaly(&self, mac: &str, score: f64, details: HashMap<String, f64>) {
        let idx = shard_index(mac);
        let mut shard = self.shards[idx].write().unwrap();
        if let Some(profile) = shard.profiles.get_mut(mac) {
            profile.anomaly_score = score;
            profile.anomaly_details = details.clone();
        }
        if let Some(device) = shard.devices.get_mut(mac) {
            device.behavioral.anomaly_score = score;
            device.behavioral.anomaly_details = details;
        }
    }
}

/// `existing ← new` (spec.md §4.7 "Merge policy").
fn merge_policy(existing: &mut Device, new: &Device) {
    existing.last_seen = new.last_seen;
    existing.last_packet_time = new.last_packet_time;
    existing.rssi = new.rssi;
    if new.frequency_mhz != 0 {
        existing.frequency_mhz = new.frequency_mhz;
    }
    if new.channel != 0 {
        existing.channel = new.channel;
    }
    if new.channel_width != 0 {
        existing.channel_width = new.channel_width;
    }

    existing.device_type = existing.device_type.upgrade(new.device_type);

    if !new.ie_tags.is_empty() {
        existing.ie_tags = new.ie_tags.clone();
    }

    macro_rules! adopt_nonempty {
        ($field:ident) => {
            if !new.$field.is_empty() {
                existing.$field = new.$field.clone();
            }
        };
    }
    adopt_nonempty!(security);
    adopt_nonempty!(standard);
    adopt_nonempty!(model);
    adopt_nonempty!(os);
    adopt_nonempty!(wps_info);
    adopt_nonempty!(vendor);
    adopt_nonempty!(ssid);
    adopt_nonempty!(connected_ssid);
    adopt_nonempty!(connection_target);
    adopt_nonempty!(connection_error);

    if new.connection_state != ConnectionState::Disconnected {
        existing.connection_state = new.connection_state;
    }

    if new.rsn_info.is_some() {
        existing.rsn_info = new.rsn_info.clone();
    }
    if new.wps_details.is_some() {
        existing.wps_details = new.wps_details.clone();
    }
    if new.mobility_domain.is_some() {
        existing.mobility_domain = new.mobility_domain.clone();
    }

    existing.has_handshake |= new.has_handshake;
    existing.has_11k |= new.has_11k;
    existing.has_11v |= new.has_11v;
    existing.has_11r |= new.has_11r;
    existing.is_wifi6 |= new.is_wifi6;
    existing.is_wifi7 |= new.is_wifi7;
    existing.is_randomized |= new.is_randomized;

    existing.data_tx_bytes += new.data_tx_bytes;
    existing.data_rx_bytes += new.data_rx_bytes;
    existing.packets_count += new.packets_count;
    existing.retry_count += new.retry_count;

    for (ssid, ts) in &new.probed_ssids {
        existing.probed_ssids.insert(ssid.clone(), *ts);
    }
    for ssid in &new.observed_ssids {
        existing.add_observed_ssid(ssid);
    }
    for cap in &new.capabilities {
        existing.add_capability(cap);
    }
    for vuln in &new.vulnerabilities {
        if !existing.vulnerabilities.iter().any(|v| v == vuln) {
            existing.vulnerabilities.push(vuln.clone());
        }
    }
}

/// Behavioural profile update rules (spec.md §4.7, station-only EWMA actions
/// still run for every caller since the predicate is on the device's own
/// capability list).
fn update_behavioral_profile(profile: &mut BehavioralProfile, device: &Device, now: chrono::DateTime<Utc>) {
    profile.touch_active_hour(now);
    if device.capabilities.iter().any(|c| c == "Probe") {
        profile.observe_probe(now);
    }
    profile.recompute_ssid_signature(&device.probed_ssids);
    if !device.ie_tags.is_empty() {
        profile.ie_tags = device.ie_tags.clone();
    }
    profile.last_updated = now;
}

/// Randomised-MAC correlation score (spec.md §4.7).
fn correlation_score(a: &BehavioralProfile, b: &BehavioralProfile) -> f64 {
    let ssid_score = if a.ssid_signature == b.ssid_signature && !a.ssid_signature.is_empty() {
        0.8
    } else if !a.ssid_signature.is_empty()
        && !b.ssid_signature.is_empty()
        && (a.ssid_signature.contains(&b.ssid_signature) || b.ssid_signature.contains(&a.ssid_signature))
    {
        0.4
    } else {
        0.0
    };

    let min_len = a.ie_tags.len().min(b.ie_tags.len());
    let ie_score = if min_len == 0 {
        0.0
    } else {
        let matching = a
            .ie_tags
            .iter()
            .zip(b.ie_tags.iter())
            .take_while(|(x, y)| x == y)
            .count();
        matching as f64 / min_len as f64
    };

    0.6 * ssid_score + 0.4 * ie_score
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceType;

    fn store() -> SignatureStore {
        SignatureStore::new()
    }

    fn device(mac: &str, t: DeviceType) -> Device {
        let mut d = Device::new(mac, Utc::now());
        d.device_type = t;
        d
    }

    #[test]
    fn shard_index_is_stable_and_in_range() {
        for mac in ["aa:bb:cc:dd:ee:ff", "00:11:22:33:44:55", "ff:ff:ff:ff:ff:ff"] {
            let i1 = shard_index(mac);
            let i2 = shard_index(mac);
            assert_eq!(i1, i2);
            assert!(i1 < SHARD_COUNT);
        }
    }

    #[test]
    fn first_insert_is_newly_discovered() {
        let reg = DeviceRegistry::new(store());
        let (_, discovered) = reg.process(device("aa:bb:cc:dd:ee:ff", DeviceType::Station));
        assert!(discovered);
    }

    #[test]
    fn type_upgrades_station_to_ap_and_never_downgrades() {
        let reg = DeviceRegistry::new(store());
        reg.process(device("aa:bb:cc:dd:ee:ff", DeviceType::Station));
        reg.process(device("aa:bb:cc:dd:ee:ff", DeviceType::Ap));
        let (merged, _) = reg.process(device("aa:bb:cc:dd:ee:ff", DeviceType::Station));
        assert_eq!(merged.device_type, DeviceType::Ap);
    }

    #[test]
    fn boolean_latches_never_reset() {
        let reg = DeviceRegistry::new(store());
        let mut d1 = device("aa:bb:cc:dd:ee:ff", DeviceType::Station);
        d1.has_handshake = true;
        reg.process(d1);
        let d2 = device("aa:bb:cc:dd:ee:ff", DeviceType::Station); // has_handshake=false
        let (merged, _) = reg.process(d2);
        assert!(merged.has_handshake);
    }

    #[test]
    fn counters_accumulate_across_merges() {
        let reg = DeviceRegistry::new(store());
        let mut d1 = device("aa:bb:cc:dd:ee:ff", DeviceType::Station);
        d1.packets_count = 5;
        reg.process(d1);
        let mut d2 = device("aa:bb:cc:dd:ee:ff", DeviceType::Station);
        d2.packets_count = 7;
        let (merged, _) = reg.process(d2);
        assert_eq!(merged.packets_count, 12);
    }

    #[test]
    fn timestamps_stay_ordered() {
        let reg = DeviceRegistry::new(store());
        let (merged, _) = reg.process(device("aa:bb:cc:dd:ee:ff", DeviceType::Station));
        assert!(merged.first_seen <= merged.last_seen);
        assert!(merged.last_seen <= merged.last_packet_time);
    }

    #[test]
    fn correlation_score_exact_ssid_signature_match() {
        let mut a = BehavioralProfile::default();
        a.ssid_signature = "corp,home".to_string();
        a.ie_tags = vec![0, 3, 48];
        let mut b = BehavioralProfile::default();
        b.ssid_signature = "corp,home".to_string();
        b.ie_tags = vec![0, 3, 48];
        assert_eq!(correlation_score(&a, &b), 1.0);
    }

    #[test]
    fn correlation_score_zero_when_no_ssid_overlap() {
        let mut a = BehavioralProfile::default();
        a.ssid_signature = "corp".to_string();
        let mut b = BehavioralProfile::default();
        b.ssid_signature = "other".to_string();
        assert_eq!(correlation_score(&a, &b), 0.0);
    }

    #[test]
    fn reset_workspace_clears_everything() {
        let reg = DeviceRegistry::new(store());
        reg.process(device("aa:bb:cc:dd:ee:ff", DeviceType::Station));
        reg.reset_workspace();
        assert!(reg.get_all().is_empty());
    }

    #[test]
    fn mark_disconnected_bypasses_merge_policy() {
        let reg = DeviceRegistry::new(store());
        let mut d = device("aa:bb:cc:dd:ee:ff", DeviceType::Station);
        d.connection_state = ConnectionState::Connected;
        d.connected_ssid = "Corp".to_string();
        d.connection_target = "11:22:33:44:55:66".to_string();
        reg.process(d);

        reg.mark_disconnected("aa:bb:cc:dd:ee:ff", Utc::now(), Some("auth_failed".to_string()));
        let after = reg.get_device("aa:bb:cc:dd:ee:ff").unwrap();
        assert_eq!(after.connection_state, ConnectionState::Disconnected);
        assert!(after.connected_ssid.is_empty());
        assert!(after.connection_target.is_empty());
        assert_eq!(after.connection_error, "auth_failed");
    }

    #[test]
    fn behavioral_profile_syncs_onto_device_after_merge() {
        let reg = DeviceRegistry::new(store());
        let mut d1 = device("aa:bb:cc:dd:ee:ff", DeviceType::Station);
        d1.capabilities.push("Probe".to_string());
        d1.probed_ssids.insert("home".to_string(), Utc::now());
        let (first, _) = reg.process(d1);
        assert_eq!(first.behavioral.ssid_signature, "home");

        let mut d2 = device("aa:bb:cc:dd:ee:ff", DeviceType::Station);
        d2.capabilities.push("Probe".to_string());
        d2.probed_ssids.insert("office".to_string(), Utc::now());
        let (merged, _) = reg.process(d2);
        assert_eq!(merged.behavioral.ssid_signature, "home,office");
        assert_eq!(merged.behavioral.unique_ssids, 2);
    }

    #[test]
    fn update_anomaly_writes_through_to_device_and_profile() {
        let reg = DeviceRegistry::new(store());
        reg.process(device("aa:bb:cc:dd:ee:ff", DeviceType::Ap));
        let mut details = HashMap::new();
        details.insert("evil_twin".to_string(), 0.9);
        reg.update_anomaly("aa:bb:cc:dd:ee:ff", 0.9, details.clone());

        let after = reg.get_device("aa:bb:cc:dd:ee:ff").unwrap();
        assert_eq!(after.behavioral.anomaly_score, 0.9);
        assert_eq!(after.behavioral.anomaly_details, details);
        let profile = reg.get_profile("aa:bb:cc:dd:ee:ff").unwrap();
        assert_eq!(profile.anomaly_score, 0.9);
    }

    #[test]
    fn load_device_does_not_merge() {
        let reg = DeviceRegistry::new(store());
        let mut d = device("aa:bb:cc:dd:ee:ff", DeviceType::Ap);
        d.packets_count = 99;
        reg.load_device(d);
        let loaded = reg.get_device("aa:bb:cc:dd:ee:ff").unwrap();
        assert_eq!(loaded.packets_count, 99);
    }
}
