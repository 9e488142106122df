//! Passive anomaly detectors (C8) and the user-rule engine, run after every
//! registry merge (spec.md §4.8).
//!
//! Grounded on the teacher's `rules::evaluate_rule` expression-tree engine
//! (`RuleNode::{Equals,Contains,And,Or,...}` evaluated against a scan
//! result) for the exact/substring custom-rule matching; the built-in
//! detectors below have no teacher analogue and are written directly off
//! the spec.md §4.8 table.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::alert::{subtype, Alert, AlertType, Severity};
use crate::device::{Device, DeviceType};

/// What a user-defined rule (spec.md §6 `add_rule`) matches against.
#[derive(Debug, Clone)]
pub enum RuleMatch {
    Ssid(String),
    Mac(String),
    ProbedSsid(String),
}

#[derive(Debug, Clone)]
pub struct AlertRule {
    pub id: String,
    pub match_kind: RuleMatch,
    /// Exact match when false, substring match when true.
    pub substring: bool,
}

/// Weighted contribution of each built-in detector (spec.md §4.8 table).
const CUSTOM_RULE_WEIGHT: f64 = 0.2;
const OUI_SPOOFING_WEIGHT: f64 = 0.5;
const HIGH_RETRY_WEIGHT: f64 = 0.3;
const KARMA_WEIGHT: f64 = 0.8;
const EVIL_TWIN_WEIGHT: f64 = 0.9;

/// Holds user-injected rules; the stateless built-in detectors need no
/// storage of their own.
#[derive(Default)]
pub struct AnomalyEngine {
    rules: RwLock<Vec<AlertRule>>,
}

impl AnomalyEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_rule(&self, rule: AlertRule) {
        self.rules.write().unwrap().push(rule);
    }

    /// Run every detector against `device`, given a snapshot of all other
    /// known devices (needed for the evil-twin comparison). Updates
    /// `device.behavioral.anomaly_details`/`anomaly_score` in place and
    /// returns the alerts raised.
    pub fn evaluate(&self, device: &mut Device, all_devices: &[Device]) -> Vec<Alert> {
        let mut alerts = Vec::new();
        // Recomputed fresh every call: unlike the latched booleans
        // (has_handshake, is_wifi6/7, ...), anomaly_score/anomaly_details
        // reflect only currently-live evidence and must drop a contribution
        // once its condition no longer holds.
        let mut contributions = HashMap::new();

        for rule in self.rules.read().unwrap().iter() {
            if rule_matches(rule, device) {
                contributions.insert(format!("custom:{}", rule.id), CUSTOM_RULE_WEIGHT);
                alerts.push(Alert::new(
                    AlertType::Anomaly,
                    rule.id.clone(),
                    device.mac.clone(),
                    Severity::Medium,
                    format!("custom rule '{}' matched", rule.id),
                ));
            }
        }

        if is_oui_spoofed(device) {
            contributions.insert("oui_spoofing".to_string(), OUI_SPOOFING_WEIGHT);
            alerts.push(Alert::new(
                AlertType::Anomaly,
                subtype::OUI_SPOOFING,
                device.mac.clone(),
                Severity::High,
                format!("vendor '{}' inconsistent with OS '{}'", device.vendor, device.os),
            ));
        }

        if has_high_retry_rate(device) {
            contributions.insert("high_retry_rate".to_string(), HIGH_RETRY_WEIGHT);
            alerts.push(Alert::new(
                AlertType::Anomaly,
                subtype::HIGH_RETRY_RATE,
                device.mac.clone(),
                Severity::Medium,
                format!(
                    "retry rate {:.0}% over {} packets",
                    100.0 * device.retry_count as f64 / device.packets_count as f64,
                    device.packets_count
                ),
            ));
        }

        if is_karma_ap(device) {
            contributions.insert("karma".to_string(), KARMA_WEIGHT);
            alerts.push(Alert::new(
                AlertType::Anomaly,
                subtype::KARMA_DETECTION,
                device.mac.clone(),
                Severity::High,
                format!("AP answering {} distinct probed SSIDs", device.probed_ssids.len()),
            ));
        }

        if let Some(twin) = find_evil_twin(device, all_devices) {
            contributions.insert("evil_twin".to_string(), EVIL_TWIN_WEIGHT);
            alerts.push(
                Alert::new(
                    AlertType::Anomaly,
                    subtype::EVIL_TWIN_DETECTED,
                    device.mac.clone(),
                    Severity::Critical,
                    format!("SSID '{}' also advertised with different security by {}", device.ssid, twin),
                )
                .with_target(twin),
            );
        }

        device.behavioral.anomaly_score = contributions.values().sum::<f64>().min(1.0);
        device.behavioral.anomaly_details = contributions;
        alerts
    }
}

fn rule_matches(rule: &AlertRule, device: &Device) -> bool {
    match &rule.match_kind {
        RuleMatch::Ssid(pattern) => text_matches(pattern, &device.ssid, rule.substring),
        RuleMatch::Mac(pattern) => text_matches(pattern, &device.mac, rule.substring),
        RuleMatch::ProbedSsid(pattern) => device
            .probed_ssids
            .keys()
            .any(|ssid| text_matches(pattern, ssid, rule.substring)),
    }
}

fn text_matches(pattern: &str, value: &str, substring: bool) -> bool {
    if substring {
        value.contains(pattern)
    } else {
        value == pattern
    }
}

fn is_oui_spoofed(device: &Device) -> bool {
    device.vendor == "Apple" && !matches!(device.os.as_str(), "iOS" | "iOS/macOS") && device.ie_tags.len() > 5
}

fn has_high_retry_rate(device: &Device) -> bool {
    device.packets_count > 20 && (device.retry_count as f64 / device.packets_count as f64) > 0.2
}

fn is_karma_ap(device: &Device) -> bool {
    device.device_type == DeviceType::Ap && device.probed_ssids.len() > 5
}

/// Another non-hidden AP broadcasting the same SSID under a different MAC
/// and different security. Returns that AP's MAC (the evil-twin target).
fn find_evil_twin(device: &Device, all_devices: &[Device]) -> Option<String> {
    if device.device_type != DeviceType::Ap || device.ssid.is_empty() || device.ssid == "<HIDDEN>" {
        return None;
    }
    all_devices
        .iter()
        .find(|other| {
            other.mac != device.mac
                && other.device_type == DeviceType::Ap
                && other.ssid == device.ssid
                && other.security != device.security
        })
        .map(|other| other.mac.clone())
}
