//! Alert record (spec.md §3 `Alert`).
//!
//! Grounded on the teacher's `protocol.rs` wire-record style
//! (`#[derive(Serialize)]`, plain string/enum fields, builder-style setters)
//! generalised from a fixed BLE/WiFi match payload to the anomaly/handshake
//! alert shape this crate needs.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertType {
    Anomaly,
    Handshake,
    Vulnerability,
    Threat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Medium,
    High,
    Critical,
}

/// Subtype tags named by spec.md §3/§4.6/§4.8. Kept as plain strings (not a
/// closed enum) because custom rules (§4.8) carry their own rule ID as the
/// subtype.
pub mod subtype {
    pub const HANDSHAKE_CAPTURED: &str = "HANDSHAKE_CAPTURED";
    pub const DEAUTH_DETECTED: &str = "DEAUTH_DETECTED";
    pub const BROADCAST_DEAUTH: &str = "BROADCAST_DEAUTH";
    pub const WEAK_CRYPTO_ZERO_NONCE: &str = "WEAK_CRYPTO_ZERO_NONCE";
    pub const WEAK_CRYPTO_BAD_RNG: &str = "WEAK_CRYPTO_BAD_RNG";
    pub const VULNERABILITY_DETECTED: &str = "VULNERABILITY_DETECTED";
    pub const EVIL_TWIN_DETECTED: &str = "EVIL_TWIN_DETECTED";
    pub const KARMA_DETECTION: &str = "KARMA_DETECTION";
    pub const HIGH_RETRY_RATE: &str = "HIGH_RETRY_RATE";
    pub const OUI_SPOOFING: &str = "OUI_SPOOFING";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub alert_type: AlertType,
    pub subtype: String,
    pub device_mac: String,
    pub target_mac: String,
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    pub message: String,
    pub details: HashMap<String, String>,
}

impl Alert {
    pub fn new(
        alert_type: AlertType,
        subtype: impl Into<String>,
        device_mac: impl Into<String>,
        severity: Severity,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            alert_type,
            subtype: subtype.into(),
            device_mac: device_mac.into(),
            target_mac: String::new(),
            timestamp: Utc::now(),
            severity,
            message: message.into(),
            details: HashMap::new(),
        }
    }

    pub fn with_target(mut self, target_mac: impl Into<String>) -> Self {
        self.target_mac = target_mac.into();
        self
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_sets_target_and_details() {
        let alert = Alert::new(
            AlertType::Anomaly,
            subtype::EVIL_TWIN_DETECTED,
            "aa:bb:cc:dd:ee:ff",
            Severity::Critical,
            "collision",
        )
        .with_target("11:22:33:44:55:66")
        .with_detail("ssid", "Corp");

        assert_eq!(alert.target_mac, "11:22:33:44:55:66");
        assert_eq!(alert.details.get("ssid"), Some(&"Corp".to_string()));
    }
}
