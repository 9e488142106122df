//! Engine (spec.md §6): the crate's composition root, wiring the registry,
//! handshake manager, dispatcher, anomaly engine, and graph projector behind
//! the surface a consumer-facing HTTP/WS layer (or an embedding binary)
//! calls.
//!
//! Grounded on the teacher's top-level wiring posture in `firmware-std/src/
//! main.rs` — one struct owning every subsystem's shared state behind `Arc`,
//! background workers spawned once at construction — generalized from a
//! fixed BLE/WiFi scan loop to this crate's full passive-recon surface.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use chrono::Utc;
use serde::Serialize;

use crate::alert::Alert;
use crate::anomaly::{AlertRule, AnomalyEngine};
use crate::channel_sched::{ChannelScheduler, InterfaceDetails};
use crate::device::Device;
use crate::dispatcher::{Dispatcher, DeviceOutcome, RawFrame};
use crate::fingerprint::SignatureStore;
use crate::graph::{GraphData, GraphProjector};
use crate::handshake::HandshakeManager;
use crate::registry::DeviceRegistry;

/// Rolling alert log cap (spec.md §6 `get_alerts` "rolling log of recent
/// alerts").
const MAX_ALERT_LOG: usize = 1000;

#[derive(Debug, Clone, Default, Serialize)]
pub struct SystemStats {
    pub device_count: usize,
    pub alert_count: usize,
    pub vendor_stats: HashMap<String, usize>,
    pub security_stats: HashMap<String, usize>,
    pub global_retry: f64,
}

pub struct Engine {
    registry: DeviceRegistry,
    handshake: Arc<HandshakeManager>,
    channels: Arc<ChannelScheduler>,
    dispatcher: Dispatcher,
    anomaly: AnomalyEngine,
    graph: GraphProjector,
    alerts: Mutex<VecDeque<Alert>>,
}

impl Engine {
    pub fn new(signature_store: SignatureStore, capture_output_dir: impl Into<PathBuf>) -> Self {
        let handshake = Arc::new(HandshakeManager::new(capture_output_dir));
        let channels = Arc::new(ChannelScheduler::new());
        let dispatcher = Dispatcher::new(Arc::clone(&handshake), Arc::clone(&channels));
        Self {
            registry: DeviceRegistry::new(signature_store),
            handshake,
            channels,
            dispatcher,
            anomaly: AnomalyEngine::new(),
            graph: GraphProjector::new(),
            alerts: Mutex::new(VecDeque::new()),
        }
    }

    fn record_alerts(&self, new_alerts: &[Alert]) {
        if new_alerts.is_empty() {
            return;
        }
        let mut log = self.alerts.lock().unwrap();
        log.extend(new_alerts.iter().cloned());
        while log.len() > MAX_ALERT_LOG {
            log.pop_front();
        }
    }

    /// Merge one externally-observed device and run the anomaly pass on it
    /// (spec.md §6 `process_device`) — the entry point gRPC-fed remote
    /// agents stream partial `Device` records through.
    pub fn process_device(&self, device: Device) -> Device {
        let (mut merged, _discovered) = self.registry.process(device);
        let all = self.registry.get_all();
        let alerts = self.anomaly.evaluate(&mut merged, &all);
        self.registry.update_anomaly(
            &merged.mac,
            merged.behavioral.anomaly_score,
            merged.behavioral.anomaly_details.clone(),
        );
        self.record_alerts(&alerts);
        merged
    }

    /// Capture-loop entry point: classify one raw frame (spec.md §4.6),
    /// fold the result into the registry, and return whatever alerts it
    /// raised. Fed by the capture thread, not the consumer-facing API.
    pub fn ingest_frame(&self, frame: &RawFrame, interface: &str) -> Vec<Alert> {
        let now = Utc::now();
        let result = self.dispatcher.dispatch(frame, interface, now);
        let mut alerts = result.alerts;

        match result.device {
            Some(DeviceOutcome::Merge(device)) => {
                let (mut merged, _discovered) = self.registry.process(device);
                let all = self.registry.get_all();
                alerts.extend(self.anomaly.evaluate(&mut merged, &all));
                self.registry.update_anomaly(
                    &merged.mac,
                    merged.behavioral.anomaly_score,
                    merged.behavioral.anomaly_details.clone(),
                );
            }
            Some(DeviceOutcome::ForceDisconnect { mac, connection_error }) => {
                self.registry.mark_disconnected(&mac, now, connection_error);
            }
            None => {}
        }

        self.record_alerts(&alerts);
        alerts
    }

    pub fn get_graph(&self) -> GraphData {
        self.graph.snapshot(&self.registry)
    }

    pub fn get_alerts(&self) -> Vec<Alert> {
        self.alerts.lock().unwrap().iter().cloned().collect()
    }

    pub fn add_rule(&self, rule: AlertRule) {
        self.anomaly.add_rule(rule);
    }

    pub fn get_system_stats(&self) -> SystemStats {
        let devices = self.registry.get_all();
        let mut vendor_stats = HashMap::new();
        let mut security_stats = HashMap::new();
        let mut total_packets = 0u64;
        let mut total_retries = 0u64;
        for d in &devices {
            if !d.vendor.is_empty() {
                *vendor_stats.entry(d.vendor.clone()).or_insert(0) += 1;
            }
            if !d.security.is_empty() {
                *security_stats.entry(d.security.clone()).or_insert(0) += 1;
            }
            total_packets += d.packets_count;
            total_retries += d.retry_count;
        }
        let global_retry = if total_packets == 0 { 0.0 } else { total_retries as f64 / total_packets as f64 };
        SystemStats {
            device_count: devices.len(),
            alert_count: self.alerts.lock().unwrap().len(),
            vendor_stats,
            security_stats,
            global_retry,
        }
    }

    /// Opaque trigger forwarded to the radio driver layer (spec.md §6) —
    /// this crate owns no radio I/O of its own, so there's nothing to do
    /// but log the request for whichever driver embeds it.
    pub fn trigger_scan(&self) {
        log::info!("scan trigger requested");
    }

    pub fn set_channels(&self, channels: Vec<i32>) {
        self.channels.set_channels(channels);
    }

    pub fn set_interface_channels(&self, interface: &str, channels: Vec<i32>) {
        self.channels.set_interface_channels(interface, channels);
    }

    pub fn get_interfaces(&self) -> Vec<String> {
        self.channels.get_interfaces()
    }

    pub fn get_interface_details(&self) -> Vec<InterfaceDetails> {
        self.channels.get_interface_details()
    }

    /// Pause channel hopping on every interface seen so far (spec.md §6
    /// `pause_hopping`).
    pub fn pause_hopping(&self, duration: StdDuration) {
        for interface in self.channels.get_interfaces() {
            self.channels.pause(&interface, duration);
        }
    }

    pub fn reset_workspace(&self) {
        self.registry.reset_workspace();
    }

    pub fn load_device(&self, device: Device) {
        self.registry.load_device(device);
    }

    /// Stop the handshake manager's background workers. Only tears them
    /// down if no other `Arc<HandshakeManager>` clone is outstanding
    /// (spec.md §5 "Cancellation").
    pub fn shutdown(self) {
        match Arc::try_unwrap(self.handshake) {
            Ok(handshake) => handshake.shutdown(),
            Err(_) => log::warn!("handshake manager still has outstanding references, skipping clean shutdown"),
        }
    }
}
