//! Fingerprint builder (C3): turns an ordered IE tag list into a stable
//! signature hash, and matches it against a signature store to infer
//! Model/OS/Type.
//!
//! Grounded on the teacher's `defaults`/`rules` signature machinery
//! (`SIG_IDX_*` constants keyed off compiled-in MAC/BLE signatures,
//! matched via `rules::evaluate_rule`) — generalized here from a
//! fixed 256-entry bitset of known MAC/BLE signatures to an MD5 digest of
//! the device's own IE tag sequence, since 802.11 fingerprints are built
//! from whichever tags a given device happens to advertise rather than a
//! fixed compiled-in catalogue.

use std::collections::HashMap;

use md5::{Digest, Md5};

use crate::device::{Device, DeviceType};
use crate::error::{Error, Result};

/// Signature = MD5 hex of `"t1,t2,...,tn,|v1,v2,...,"` — tags in arrival
/// order (never sorted), followed by any device-specific values. Empty
/// `tags` has no signature.
pub fn compute_signature(tags: &[u8], specific_values: &[String]) -> Option<String> {
    if tags.is_empty() {
        return None;
    }
    let mut buf = String::new();
    for tag in tags {
        buf.push_str(&tag.to_string());
        buf.push(',');
    }
    buf.push('|');
    for value in specific_values {
        buf.push_str(value);
        buf.push(',');
    }
    let mut hasher = Md5::new();
    hasher.update(buf.as_bytes());
    Some(format!("{:x}", hasher.finalize()))
}

/// A signature-store hit.
#[derive(Debug, Clone, PartialEq)]
pub struct Match {
    pub signature: String,
    pub confidence: f64,
    pub model: String,
    pub os: String,
    pub device_type: DeviceType,
}

/// A catalogued signature entry, keyed by its exact signature hash.
#[derive(Debug, Clone)]
pub struct SignatureRecord {
    pub model: String,
    pub os: String,
    pub device_type: DeviceType,
    pub confidence: f64,
}

/// Immutable-after-load, shared read-only signature catalogue (spec.md §3
/// "Signatures in the signature store are shared read-only").
#[derive(Debug, Clone, Default)]
pub struct SignatureStore {
    entries: HashMap<String, SignatureRecord>,
}

impl SignatureStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a signature store from `(signature, model, os, device_type,
    /// confidence)` rows. Rejects a signature that isn't valid MD5 hex —
    /// the one way loading this catalogue can fail (spec.md §2.2).
    pub fn load(
        rows: impl IntoIterator<Item = (String, String, String, DeviceType, f64)>,
    ) -> Result<Self> {
        let mut entries = HashMap::new();
        for (signature, model, os, device_type, confidence) in rows {
            if signature.len() != 32 || !signature.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(Error::SignatureStore(format!(
                    "not a valid MD5 hex signature: {signature:?}"
                )));
            }
            entries.insert(
                signature,
                SignatureRecord {
                    model,
                    os,
                    device_type,
                    confidence,
                },
            );
        }
        Ok(Self { entries })
    }

    pub fn insert(&mut self, signature: String, record: SignatureRecord) {
        self.entries.insert(signature, record);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Match `device.signature` against the catalogue. Only a device with a
    /// non-empty signature can match.
    pub fn match_signature(&self, device: &Device) -> Option<Match> {
        if device.signature.is_empty() {
            return None;
        }
        let record = self.entries.get(&device.signature)?;
        Some(Match {
            signature: device.signature.clone(),
            confidence: record.confidence,
            model: record.model.clone(),
            os: record.os.clone(),
            device_type: record.device_type,
        })
    }
}

/// Confidence threshold above which the registry overwrites
/// Model/OS/Type from a signature match (spec.md §4.3).
pub const MATCH_CONFIDENCE_THRESHOLD: f64 = 0.6;

/// Run fingerprint discovery for `device`: recompute its signature from
/// `ie_tags`, then apply a store match if confident enough.
pub fn discover(device: &mut Device, store: &SignatureStore) {
    device.signature = compute_signature(&device.ie_tags, &[]).unwrap_or_default();
    if let Some(m) = store.match_signature(device) {
        if m.confidence >= MATCH_CONFIDENCE_THRESHOLD {
            device.model = m.model;
            device.os = m.os;
            device.device_type = device.device_type.upgrade(m.device_type);
        }
    }
}
