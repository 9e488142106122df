//! Channel-hopping scheduler surface (spec.md §6 `set_channels`/
//! `set_interface_channels`/`pause_hopping`, §9 "Channel-hopper pause").
//!
//! No teacher analogue exists (AirHound's channel hopping lives in ESP32
//! driver code this crate doesn't carry); grounded instead on the teacher's
//! `FILTER_CONFIG: Mutex<FilterConfig>` posture — config as plain
//! `RwLock`-guarded instance state, mutated only through narrow setters,
//! per SPEC_FULL.md §2.3.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

/// Per-interface channel assignment and hop-pause state.
#[derive(Debug, Clone, Default)]
struct InterfaceState {
    channels: Vec<i32>,
    paused_until: Option<Instant>,
}

/// Details surfaced by `get_interface_details()`.
#[derive(Debug, Clone, PartialEq)]
pub struct InterfaceDetails {
    pub interface: String,
    pub channels: Vec<i32>,
    pub paused: bool,
}

#[derive(Debug, Default)]
struct Inner {
    default_channels: Vec<i32>,
    interfaces: HashMap<String, InterfaceState>,
}

/// Owns the requested channel set per interface and the one-shot
/// "pause until" deadline the dispatcher requests after EAPOL/handshake
/// activity. The contract is one-shot and coalesced: a pause request during
/// an active pause extends the deadline to
/// `max(current_deadline, now + duration)` rather than stacking (spec.md §9).
#[derive(Debug, Default)]
pub struct ChannelScheduler {
    inner: RwLock<Inner>,
}

impl ChannelScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the default channel set applied to any interface without its own
    /// override.
    pub fn set_channels(&self, channels: Vec<i32>) {
        self.inner.write().unwrap().default_channels = channels;
    }

    /// Override the channel set for one interface.
    pub fn set_interface_channels(&self, interface: &str, channels: Vec<i32>) {
        let mut inner = self.inner.write().unwrap();
        inner
            .interfaces
            .entry(interface.to_string())
            .or_default()
            .channels = channels;
    }

    /// Request a pause on `interface` for `duration` starting now.
    /// Coalesced: extends rather than stacks if already paused.
    pub fn pause(&self, interface: &str, duration: Duration) {
        let deadline = Instant::now() + duration;
        let mut inner = self.inner.write().unwrap();
        let state = inner.interfaces.entry(interface.to_string()).or_default();
        state.paused_until = Some(match state.paused_until {
            Some(existing) if existing > deadline => existing,
            _ => deadline,
        });
    }

    /// True if `interface` is currently within a pause window.
    pub fn is_paused(&self, interface: &str) -> bool {
        let inner = self.inner.read().unwrap();
        inner
            .interfaces
            .get(interface)
            .and_then(|s| s.paused_until)
            .map(|deadline| Instant::now() < deadline)
            .unwrap_or(false)
    }

    /// Every interface this scheduler has seen a channel/pause request for.
    pub fn get_interfaces(&self) -> Vec<String> {
        let inner = self.inner.read().unwrap();
        inner.interfaces.keys().cloned().collect()
    }

    pub fn get_interface_details(&self) -> Vec<InterfaceDetails> {
        let inner = self.inner.read().unwrap();
        inner
            .interfaces
            .iter()
            .map(|(interface, state)| InterfaceDetails {
                interface: interface.clone(),
                channels: if state.channels.is_empty() {
                    inner.default_channels.clone()
                } else {
                    state.channels.clone()
                },
                paused: state
                    .paused_until
                    .map(|d| Instant::now() < d)
                    .unwrap_or(false),
            })
            .collect()
    }
}
