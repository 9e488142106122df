//! Handshake manager (C5): per-(BSSID, station) WPA/WPA2 four-way-handshake
//! session state machine, pcap emission, and the bounded save worker actor.
//!
//! No teacher analogue exists for the session state machine itself; its
//! concurrency shape is grounded directly on `firmware-std/src/main.rs`'s
//! actor pattern: a `thread::Builder::new().name(...).spawn(...)` worker
//! reading a bounded `mpsc::sync_channel` with `try_send`/non-blocking
//! semantics on the producer side, plus a second ticker thread on
//! `recv_timeout`. That file runs a filter/output/status/chanhop thread each
//! built the same way; this module borrows the same shape for the save
//! worker and the cleanup ticker.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};

use crate::eapol::EapolKey;
use crate::pcap::{self, CapturedFrame};

/// Spec.md §3 `HandshakeSession`.
#[derive(Debug, Clone)]
pub struct HandshakeSession {
    pub bssid: String,
    pub station_mac: String,
    pub essid: String,
    pub beacon_frame: Option<CapturedFrame>,
    pub captured: HashSet<u8>,
    pub frames: Vec<CapturedFrame>,
    pub replay_counter: u64,
    pub has_replay_counter: bool,
    pub anonce: Option<[u8; 32]>,
    pub saved_count: usize,
    pub last_update: DateTime<Utc>,
}

const MAX_SESSION_FRAMES: usize = 20;
const SAVE_QUEUE_CAPACITY: usize = 100;
const CLEANUP_INTERVAL: StdDuration = StdDuration::from_secs(60);

impl HandshakeSession {
    fn new(bssid: &str, station_mac: &str, now: DateTime<Utc>) -> Self {
        Self {
            bssid: bssid.to_string(),
            station_mac: station_mac.to_string(),
            essid: String::new(),
            beacon_frame: None,
            captured: HashSet::new(),
            frames: Vec::new(),
            replay_counter: 0,
            has_replay_counter: false,
            anonce: None,
            saved_count: 0,
            last_update: now,
        }
    }

    /// "Usable": SNonce from M2 plus ANonce from M1 or M3 (spec.md §3).
    pub fn is_usable(&self) -> bool {
        self.captured.contains(&2) && (self.captured.contains(&1) || self.captured.contains(&3))
    }

    fn reset(&mut self, now: DateTime<Utc>) {
        self.captured.clear();
        self.frames.clear();
        self.saved_count = 0;
        self.last_update = now;
    }

    fn push_frame(&mut self, frame: CapturedFrame) {
        if self.frames.len() < MAX_SESSION_FRAMES {
            self.frames.push(frame);
        }
    }
}

fn session_key(bssid: &str, station: &str) -> String {
    format!("{bssid}_{station}")
}

/// Resolve (BSSID, station) from 802.11 DS flags and the three header
/// addresses (spec.md §4.5). Returns `None` for WDS frames (`ToDS ∧
/// FromDS`), which this layer ignores.
pub fn resolve_addresses(
    to_ds: bool,
    from_ds: bool,
    addr1: &str,
    addr2: &str,
    addr3: &str,
) -> Option<(String, String)> {
    match (to_ds, from_ds) {
        (false, false) => {
            let bssid = addr3.to_string();
            let station = if addr2 == addr3 { addr1 } else { addr2 }.to_string();
            Some((bssid, station))
        }
        (false, true) => Some((addr2.to_string(), addr1.to_string())),
        (true, false) => Some((addr1.to_string(), addr2.to_string())),
        (true, true) => None,
    }
}

#[derive(Default)]
struct HandshakeState {
    sessions: HashMap<String, HandshakeSession>,
    bssid_to_essid: HashMap<String, String>,
    bssid_to_beacon: HashMap<String, CapturedFrame>,
}

enum SaveJob {
    Handshake {
        bssid: String,
        essid: String,
        station: String,
        beacon: Option<CapturedFrame>,
        frames: Vec<CapturedFrame>,
    },
    Pmkid {
        bssid: String,
        essid: String,
        beacon: Option<CapturedFrame>,
        frame: CapturedFrame,
    },
}

/// Outcome of feeding one EAPOL-Key frame into a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EapolOutcome {
    pub session_key: String,
    pub message_number: u8,
    pub saved: bool,
}

pub struct HandshakeManager {
    state: Arc<Mutex<HandshakeState>>,
    save_tx: SyncSender<SaveJob>,
    shutdown_tx: Sender<()>,
    save_worker: Option<JoinHandle<()>>,
    cleanup_worker: Option<JoinHandle<()>>,
}

impl HandshakeManager {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        let output_dir = output_dir.into();
        let state = Arc::new(Mutex::new(HandshakeState::default()));

        let (save_tx, save_rx) = mpsc::sync_channel::<SaveJob>(SAVE_QUEUE_CAPACITY);
        let save_worker = thread::Builder::new()
            .name("vigil-handshake-save".into())
            .spawn(move || save_worker_loop(save_rx, output_dir))
            .expect("spawn handshake save worker");

        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let cleanup_state = Arc::clone(&state);
        let cleanup_worker = thread::Builder::new()
            .name("vigil-handshake-cleanup".into())
            .spawn(move || cleanup_loop(cleanup_state, shutdown_rx))
            .expect("spawn handshake cleanup worker");

        Self {
            state,
            save_tx,
            shutdown_tx,
            save_worker: Some(save_worker),
            cleanup_worker: Some(cleanup_worker),
        }
    }

    /// Signal both background workers to stop and join them, closing the
    /// save queue first so the save worker drains and exits (spec.md §5
    /// "Cancellation").
    pub fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(());
        if let Some(handle) = self.cleanup_worker.take() {
            let _ = handle.join();
        }
        let save_worker = self.save_worker.take();
        drop(self);
        if let Some(handle) = save_worker {
            let _ = handle.join();
        }
    }

    /// Cache a beacon's SSID/frame for `bssid`; seed it into any existing
    /// session with a matching BSSID and no beacon yet (spec.md §4.5).
    pub fn process_beacon(&self, bssid: &str, ssid: &str, frame: CapturedFrame) {
        if ssid.is_empty() || ssid == "<HIDDEN>" {
            return;
        }
        let mut state = self.state.lock().unwrap();
        state.bssid_to_essid.insert(bssid.to_string(), ssid.to_string());
        state.bssid_to_beacon.insert(bssid.to_string(), frame.clone());
        for session in state.sessions.values_mut() {
            if session.bssid == bssid && session.beacon_frame.is_none() {
                session.beacon_frame = Some(frame.clone());
            }
        }
    }

    /// Feed one pairwise EAPOL-Key frame into the (bssid, station) session
    /// (spec.md §4.5). Returns `None` for non-pairwise frames, message 0,
    /// or a frame dropped for a zero MIC where a MIC was expected.
    pub fn process_eapol(
        &self,
        bssid: &str,
        station: &str,
        key: &EapolKey,
        frame: CapturedFrame,
        now: DateTime<Utc>,
    ) -> Option<EapolOutcome> {
        if !key.is_pairwise() {
            return None;
        }
        let msg = key.message_number();
        if msg == 0 {
            return None;
        }
        if msg != 1 && key.is_mic_zero() {
            log::debug!("dropping EAPOL M{msg} from {station}: MIC expected but zero");
            return None;
        }

        let skey = session_key(bssid, station);
        let nonce = key.key_nonce;

        let save_job = {
            let mut guard = self.state.lock().unwrap();
            let HandshakeState {
                sessions,
                bssid_to_essid,
                bssid_to_beacon,
            } = &mut *guard;

            if msg == 1 {
                let should_reset = match sessions.get(&skey) {
                    None => true,
                    Some(s) => !s.has_replay_counter || s.replay_counter != key.replay_counter,
                };
                if should_reset {
                    let mut session = HandshakeSession::new(bssid, station, now);
                    session.essid = bssid_to_essid.get(bssid).cloned().unwrap_or_default();
                    session.beacon_frame = bssid_to_beacon.get(bssid).cloned();
                    session.replay_counter = key.replay_counter;
                    session.has_replay_counter = true;
                    session.anonce = Some(nonce);
                    sessions.insert(skey.clone(), session);
                }
            } else {
                if !sessions.contains_key(&skey) {
                    let mut session = HandshakeSession::new(bssid, station, now);
                    session.essid = bssid_to_essid.get(bssid).cloned().unwrap_or_default();
                    session.beacon_frame = bssid_to_beacon.get(bssid).cloned();
                    sessions.insert(skey.clone(), session);
                }
                if msg == 3 {
                    let session = sessions.get_mut(&skey).unwrap();
                    match session.anonce {
                        None => {
                            session.anonce = Some(nonce);
                            session.replay_counter = key.replay_counter.wrapping_sub(1);
                            session.has_replay_counter = true;
                        }
                        Some(stored) if stored != nonce => {
                            session.reset(now);
                            session.anonce = Some(nonce);
                            session.replay_counter = key.replay_counter.wrapping_sub(1);
                            session.has_replay_counter = true;
                        }
                        _ => {}
                    }
                }
            }

            let session = sessions.get_mut(&skey).unwrap();
            if session.has_replay_counter {
                let expected = match msg {
                    2 => session.replay_counter,
                    3 | 4 => session.replay_counter.wrapping_add(1),
                    _ => key.replay_counter,
                };
                if key.replay_counter != expected {
                    log::warn!(
                        "handshake {skey}: M{msg} replay counter {} != expected {expected} (admitted anyway)",
                        key.replay_counter
                    );
                }
            }

            session.captured.insert(msg);
            session.push_frame(frame);
            session.last_update = now;

            let captured_count = session.captured.len();
            let should_save =
                session.is_usable() && (captured_count > session.saved_count || session.saved_count == 0);
            if should_save {
                session.saved_count = captured_count;
                Some(SaveJob::Handshake {
                    bssid: bssid.to_string(),
                    essid: session.essid.clone(),
                    station: station.to_string(),
                    beacon: session.beacon_frame.clone(),
                    frames: session.frames.clone(),
                })
            } else {
                None
            }
        };

        let saved = save_job.is_some();
        if let Some(job) = save_job {
            if self.save_tx.try_send(job).is_err() {
                log::warn!("handshake save queue full, dropping save for {skey}");
            } else {
                log::info!("handshake {skey} enqueued for save (M{msg})");
            }
        }

        Some(EapolOutcome {
            session_key: skey,
            message_number: msg,
            saved,
        })
    }

    /// `save_pmkid(frame, bssid, essid)` (spec.md §4.5 PMKID path).
    pub fn save_pmkid(&self, bssid: &str, essid: &str, frame: CapturedFrame) {
        let beacon = {
            let state = self.state.lock().unwrap();
            state.bssid_to_beacon.get(bssid).cloned()
        };
        let job = SaveJob::Pmkid {
            bssid: bssid.to_string(),
            essid: essid.to_string(),
            beacon,
            frame,
        };
        if self.save_tx.try_send(job).is_err() {
            log::warn!("handshake save queue full, dropping PMKID save for {bssid}");
        }
    }

    /// The cached ESSID for `bssid`, if any beacon has been seen for it yet.
    pub fn essid_for(&self, bssid: &str) -> String {
        let state = self.state.lock().unwrap();
        state.bssid_to_essid.get(bssid).cloned().unwrap_or_default()
    }

    /// True iff any session for `bssid` is "sufficient to save".
    pub fn has_handshake(&self, bssid: &str) -> bool {
        let state = self.state.lock().unwrap();
        state.sessions.values().any(|s| s.bssid == bssid && s.is_usable())
    }

    /// A snapshot copy of one session, for tests and introspection.
    pub fn session_snapshot(&self, bssid: &str, station: &str) -> Option<HandshakeSession> {
        let state = self.state.lock().unwrap();
        state.sessions.get(&session_key(bssid, station)).cloned()
    }

    pub fn session_count(&self) -> usize {
        self.state.lock().unwrap().sessions.len()
    }
}

fn cleanup_loop(state: Arc<Mutex<HandshakeState>>, shutdown_rx: Receiver<()>) {
    loop {
        match shutdown_rx.recv_timeout(CLEANUP_INTERVAL) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                log::info!("handshake cleanup worker shutting down");
                return;
            }
            Err(RecvTimeoutError::Timeout) => {
                let now = Utc::now();
                let mut state = state.lock().unwrap();
                state.sessions.retain(|key, session| {
                    let age = now - session.last_update;
                    let timeout = if session.captured.len() >= 4 {
                        ChronoDuration::seconds(300)
                    } else {
                        ChronoDuration::seconds(60)
                    };
                    let keep = age <= timeout;
                    if !keep {
                        log::debug!("handshake session {key} timed out, evicting");
                    }
                    keep
                });
            }
        }
    }
}

fn save_worker_loop(rx: Receiver<SaveJob>, dir: PathBuf) {
    if let Err(e) = std::fs::create_dir_all(&dir) {
        log::warn!("could not create handshake output dir {}: {e}", dir.display());
    }
    while let Ok(job) = rx.recv() {
        match job {
            SaveJob::Handshake {
                bssid,
                essid,
                station,
                beacon,
                frames,
            } => match pcap::write_handshake(&dir, &bssid, &essid, &station, beacon.as_ref(), &frames) {
                Ok(path) => log::info!("wrote handshake capture {}", path.display()),
                Err(e) => log::warn!("handshake pcap write failed: {e}"),
            },
            SaveJob::Pmkid {
                bssid,
                essid,
                beacon,
                frame,
            } => match pcap::write_pmkid(&dir, &bssid, &essid, beacon.as_ref(), &frame) {
                Ok(path) => log::info!("wrote PMKID capture {}", path.display()),
                Err(e) => log::warn!("PMKID pcap write failed: {e}"),
            },
        }
    }
    log::info!("handshake save worker shutting down");
}
