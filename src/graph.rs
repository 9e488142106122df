//! Graph projector (C9): read-only `{nodes, edges}` snapshot of the
//! registry for downstream presentation, cached for ~2 seconds (spec.md
//! §4.9).
//!
//! No teacher analogue (AirHound has no downstream graph consumer);
//! grounded on the teacher's `FILTER_CONFIG: Mutex<...>` posture for the
//! cache itself, generalised to the double-checked-locking TTL cache
//! spec.md §4.9/§5 calls for explicitly.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use chrono::DateTime;
use serde::{Deserialize, Serialize};

use crate::device::{ConnectionState, DeviceType};
use crate::registry::DeviceRegistry;

const CACHE_TTL: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub kind: String,
    pub label: String,
    pub security: Option<String>,
    pub channel: Option<u8>,
    pub frequency_mhz: Option<u32>,
    pub rssi: Option<i8>,
    pub data_tx_bytes: Option<u64>,
    pub data_rx_bytes: Option<u64>,
    pub packets_count: Option<u64>,
    pub anomaly_score: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub source: String,
    pub target: String,
    pub kind: String,
    pub dashed: bool,
    pub label: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphData {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

fn device_node_id(mac: &str) -> String {
    format!("device:{mac}")
}

fn network_node_id(ssid: &str) -> String {
    format!("network:{ssid}")
}

pub struct GraphProjector {
    cache: RwLock<Option<(Instant, GraphData)>>,
}

impl GraphProjector {
    pub fn new() -> Self {
        Self { cache: RwLock::new(None) }
    }

    /// Return the cached graph if it's ≤ 2s old, otherwise rebuild under a
    /// writer lock (double-checked: a racing reader that lost the read
    /// check re-checks after acquiring the write lock before rebuilding).
    pub fn snapshot(&self, registry: &DeviceRegistry) -> GraphData {
        if let Some((built_at, data)) = &*self.cache.read().unwrap() {
            if built_at.elapsed() < CACHE_TTL {
                return data.clone();
            }
        }

        let mut guard = self.cache.write().unwrap();
        if let Some((built_at, data)) = &*guard {
            if built_at.elapsed() < CACHE_TTL {
                return data.clone();
            }
        }

        let built = build_graph(registry);
        *guard = Some((Instant::now(), built.clone()));
        built
    }
}

impl Default for GraphProjector {
    fn default() -> Self {
        Self::new()
    }
}

fn build_graph(registry: &DeviceRegistry) -> GraphData {
    let devices = registry.get_all();
    let known_ssids = registry.known_ssids();

    #[allow(clippy::type_complexity)]
    let mut network_meta: HashMap<String, (DateTime<chrono::Utc>, String, u8, u32)> = HashMap::new();
    for d in &devices {
        if d.device_type == DeviceType::Ap && !d.ssid.is_empty() && d.ssid != "<HIDDEN>" {
            let newer = network_meta
                .get(&d.ssid)
                .map(|(seen, ..)| d.last_seen >= *seen)
                .unwrap_or(true);
            if newer {
                network_meta.insert(d.ssid.clone(), (d.last_seen, d.security.clone(), d.channel, d.frequency_mhz));
            }
        }
    }

    let mut nodes = Vec::with_capacity(known_ssids.len() + devices.len());
    for ssid in &known_ssids {
        let meta = network_meta.get(ssid);
        nodes.push(Node {
            id: network_node_id(ssid),
            kind: "network".to_string(),
            label: ssid.clone(),
            security: meta.map(|m| m.1.clone()).or_else(|| registry.ssid_security(ssid)),
            channel: meta.map(|m| m.2),
            frequency_mhz: meta.map(|m| m.3),
            rssi: None,
            data_tx_bytes: None,
            data_rx_bytes: None,
            packets_count: None,
            anomaly_score: None,
        });
    }

    for d in &devices {
        let vendor_label = if d.vendor.is_empty() { "Unknown" } else { d.vendor.as_str() };
        let mut label = format!("{}\n({vendor_label})", d.mac);
        if d.frequency_mhz > 3000 {
            label.push_str("\n[5GHz]");
        }
        nodes.push(Node {
            id: device_node_id(&d.mac),
            kind: "device".to_string(),
            label,
            security: None,
            channel: Some(d.channel),
            frequency_mhz: Some(d.frequency_mhz),
            rssi: Some(d.rssi),
            data_tx_bytes: Some(d.data_tx_bytes),
            data_rx_bytes: Some(d.data_rx_bytes),
            packets_count: Some(d.packets_count),
            anomaly_score: Some(d.behavioral.anomaly_score),
        });
    }

    let mut edges = Vec::new();
    for d in &devices {
        if !d.ssid.is_empty() && d.ssid != "<HIDDEN>" {
            let suppressed = d.connection_state == ConnectionState::Connected && d.connected_ssid == d.ssid;
            if !suppressed {
                edges.push(Edge {
                    source: device_node_id(&d.mac),
                    target: network_node_id(&d.ssid),
                    kind: "probe".to_string(),
                    dashed: false,
                    label: None,
                });
            }
        }

        for probed in d.probed_ssids.keys() {
            if probed != &d.ssid {
                edges.push(Edge {
                    source: device_node_id(&d.mac),
                    target: network_node_id(probed),
                    kind: "probe".to_string(),
                    dashed: true,
                    label: None,
                });
            }
        }

        if !d.connection_target.is_empty() {
            let (dashed, label) = match d.connection_state {
                ConnectionState::Connected => (false, None),
                ConnectionState::Handshake => (false, Some("handshake".to_string())),
                ConnectionState::Authenticating => (true, Some("authenticating".to_string())),
                ConnectionState::Associating => (true, Some("associating".to_string())),
                ConnectionState::Disconnected => continue,
            };
            edges.push(Edge {
                source: device_node_id(&d.mac),
                target: device_node_id(&d.connection_target),
                kind: "connection".to_string(),
                dashed,
                label,
            });
        }

        if d.is_randomized {
            if let Some(profile) = registry.get_profile(&d.mac) {
                if let Some(linked) = profile.linked_mac {
                    edges.push(Edge {
                        source: device_node_id(&d.mac),
                        target: device_node_id(&linked),
                        kind: "correlation".to_string(),
                        dashed: true,
                        label: None,
                    });
                }
            }
        }
    }

    GraphData { nodes, edges }
}
