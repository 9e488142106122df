//! End-to-end scenarios (spec.md §8 "End-to-end scenarios" S1/S2/S5/S6/S7),
//! driven entirely through `vigil::engine::Engine`'s public surface. S3/S4
//! exercise `HandshakeManager` session-reset edge cases directly and are
//! already covered by `src/handshake.rs`'s own unit tests, so they aren't
//! repeated here.

use std::path::Path;
use std::time::Duration;

use vigil::device::{Device, DeviceType};
use vigil::dispatcher::{FrameKind, RawFrame};
use vigil::engine::Engine;
use vigil::fingerprint::SignatureStore;
use vigil::pcap::CapturedFrame;

fn engine(tag: &str) -> (Engine, std::path::PathBuf) {
    let dir = std::env::temp_dir().join(format!("vigil-scenarios-{tag}-{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    (Engine::new(SignatureStore::new(), dir.clone()), dir)
}

fn tlv(id: u8, value: &[u8]) -> Vec<u8> {
    let mut v = vec![id, value.len() as u8];
    v.extend_from_slice(value);
    v
}

fn rsn_psk_ccmp() -> Vec<u8> {
    let mut v = vec![1, 0]; // version
    v.extend_from_slice(&[0x00, 0x0F, 0xAC, 4]); // group cipher CCMP
    v.extend_from_slice(&[1, 0]); // pairwise count
    v.extend_from_slice(&[0x00, 0x0F, 0xAC, 4]); // pairwise CCMP
    v.extend_from_slice(&[1, 0]); // akm count
    v.extend_from_slice(&[0x00, 0x0F, 0xAC, 2]); // AKM = PSK
    v.extend_from_slice(&[0x00, 0x00]); // capabilities
    v
}

fn beacon_ie_body(ssid: &str, channel: u8, rsn: &[u8]) -> Vec<u8> {
    let mut body = tlv(0, ssid.as_bytes());
    body.extend(tlv(3, &[channel]));
    body.extend(tlv(48, rsn));
    body
}

fn beacon_frame(addr2: &str, ie_body: Vec<u8>) -> RawFrame<'static> {
    RawFrame {
        kind: FrameKind::Beacon,
        to_ds: false,
        from_ds: true,
        addr1: "ff:ff:ff:ff:ff:ff".to_string(),
        addr2: addr2.to_string(),
        addr3: addr2.to_string(),
        radiotap: Box::leak(Vec::new().into_boxed_slice()),
        ie_body: Box::leak(ie_body.into_boxed_slice()),
        eapol_payload: None,
        reason_code: None,
        status_code: None,
        category: None,
        payload_len: 0,
        capture: CapturedFrame::new(Duration::from_secs(0), Vec::new()),
    }
}

// S1: beacon with SSID "TestSSID", channel 6, WPA2-PSK RSN → matching AP
// device, no alert.
#[test]
fn s1_beacon_yields_ap_device_no_alert() {
    let (eng, dir) = engine("s1");
    let frame = beacon_frame("aa:bb:cc:dd:ee:01", beacon_ie_body("TestSSID", 6, &rsn_psk_ccmp()));
    let alerts = eng.ingest_frame(&frame, "wlan0");
    assert!(alerts.is_empty());

    let graph = eng.get_graph();
    let node = graph.nodes.iter().find(|n| n.mac == "aa:bb:cc:dd:ee:01").unwrap();
    assert_eq!(node.device_type, DeviceType::Ap);
    assert_eq!(node.ssid, "TestSSID");

    let _ = std::fs::remove_dir_all(&dir);
}

fn key_info(pairwise: bool, ack: bool, mic: bool) -> u16 {
    let mut v: u16 = 0;
    if pairwise {
        v |= 1 << 3;
    }
    if ack {
        v |= 1 << 7;
    }
    if mic {
        v |= 1 << 8;
    }
    v
}

fn eapol_payload(info: u16, nonce: [u8; 32], mic_bytes: [u8; 16], key_data: &[u8]) -> Vec<u8> {
    let mut buf = vec![0u8; 95];
    buf[0] = 2;
    buf[1..3].copy_from_slice(&info.to_be_bytes());
    buf[13..45].copy_from_slice(&nonce);
    buf[77..93].copy_from_slice(&mic_bytes);
    buf[93..95].copy_from_slice(&(key_data.len() as u16).to_be_bytes());
    buf.extend_from_slice(key_data);
    buf
}

fn eapol_frame(
    kind: FrameKind,
    bssid: &str,
    station: &str,
    payload: Vec<u8>,
) -> RawFrame<'static> {
    RawFrame {
        kind,
        to_ds: kind == FrameKind::DataUplink,
        from_ds: kind == FrameKind::DataDownlink,
        addr1: if kind == FrameKind::DataDownlink { station.to_string() } else { bssid.to_string() },
        addr2: if kind == FrameKind::DataDownlink { bssid.to_string() } else { station.to_string() },
        addr3: bssid.to_string(),
        radiotap: Box::leak(Vec::new().into_boxed_slice()),
        ie_body: Box::leak(Vec::new().into_boxed_slice()),
        eapol_payload: Some(Box::leak(payload.into_boxed_slice())),
        reason_code: None,
        status_code: None,
        category: None,
        payload_len: 0,
        capture: CapturedFrame::new(Duration::from_secs(0), vec![0xAA; 10]),
    }
}

fn wait_for_file(path: &Path) -> bool {
    for _ in 0..50 {
        if path.exists() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    false
}

// S2: M1(RC=1) AP→STA, then M2(RC=1) STA→AP → HANDSHAKE_CAPTURED alert on
// M2, pcap file written, has_handshake(bssid) true.
#[test]
fn s2_m1_then_m2_captures_handshake() {
    let (eng, dir) = engine("s2");
    let bssid = "aa:bb:cc:dd:ee:02";
    let station = "11:22:33:44:55:02";

    eng.ingest_frame(&beacon_frame(bssid, beacon_ie_body("Corp", 6, &rsn_psk_ccmp())), "wlan0");

    let m1 = eapol_payload(key_info(true, true, false), [0xAA; 32], [0u8; 16], &[]);
    let alerts = eng.ingest_frame(&eapol_frame(FrameKind::DataUplink, bssid, station, m1), "wlan0");
    assert!(alerts.is_empty());

    let m2 = eapol_payload(key_info(true, false, true), [0xBB; 32], [1u8; 16], &[]);
    let alerts = eng.ingest_frame(&eapol_frame(FrameKind::DataUplink, bssid, station, m2), "wlan0");
    assert!(alerts.iter().any(|a| a.subtype == vigil::alert::subtype::HANDSHAKE_CAPTURED));

    let path = dir.join(format!("{bssid}_Corp_{station}.pcap"));
    assert!(wait_for_file(&path), "expected pcap file at {path:?}");

    let _ = std::fs::remove_dir_all(&dir);
}

// S5: two beacons, same SSID "Corp", different BSSID/security → EVIL_TWIN on
// the second.
#[test]
fn s5_same_ssid_different_security_raises_evil_twin() {
    let (eng, dir) = engine("s5");
    eng.ingest_frame(&beacon_frame("aa:aa:aa:aa:aa:05", beacon_ie_body("Corp", 1, &rsn_psk_ccmp())), "wlan0");
    let alerts = eng.ingest_frame(&beacon_frame("bb:bb:bb:bb:bb:05", beacon_ie_body("Corp", 1, &[])), "wlan0");

    assert!(alerts.iter().any(|a| a.subtype == vigil::alert::subtype::EVIL_TWIN_DETECTED));
    let _ = std::fs::remove_dir_all(&dir);
}

// S6: 50 concurrent (BSSID, STA) handshake flows, each M1+M2 — all sessions
// recorded, 50 pcap files created, no panic.
#[test]
fn s6_fifty_concurrent_handshakes() {
    let (eng, dir) = engine("s6");
    let eng = std::sync::Arc::new(eng);

    let handles: Vec<_> = (0..50)
        .map(|i| {
            let eng = std::sync::Arc::clone(&eng);
            std::thread::spawn(move || {
                let bssid = format!("aa:bb:cc:dd:{:02x}:{:02x}", i / 256, i % 256);
                let station = format!("11:22:33:44:{:02x}:{:02x}", i / 256, i % 256);
                eng.ingest_frame(
                    &beacon_frame(Box::leak(bssid.clone().into_boxed_str()), beacon_ie_body("Mesh", 6, &rsn_psk_ccmp())),
                    "wlan0",
                );
                let m1 = eapol_payload(key_info(true, true, false), [i as u8; 32], [0u8; 16], &[]);
                eng.ingest_frame(&eapol_frame(FrameKind::DataUplink, &bssid, &station, m1), "wlan0");
                let m2 = eapol_payload(key_info(true, false, true), [(i + 1) as u8; 32], [1u8; 16], &[]);
                eng.ingest_frame(&eapol_frame(FrameKind::DataUplink, &bssid, &station, m2), "wlan0");
                (bssid, station)
            })
        })
        .collect();

    let pairs: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(pairs.len(), 50);

    for (bssid, station) in &pairs {
        let path = dir.join(format!("{bssid}_Mesh_{station}.pcap"));
        assert!(wait_for_file(&path), "expected pcap file at {path:?}");
    }

    let _ = std::fs::remove_dir_all(&dir);
}

// S7: a beacon with 10 IEs in a specific order, then the same device with
// those IEs permuted → two distinct signatures, both recorded.
#[test]
fn s7_permuted_ies_change_signature() {
    let (eng, dir) = engine("s7");
    let mac = "aa:bb:cc:dd:ee:07";

    let tags: Vec<u8> = (0..10).collect();
    let mut first = Device::new(mac, chrono::Utc::now());
    first.device_type = DeviceType::Ap;
    first.ie_tags = tags.clone();
    let first = eng.process_device(first);
    let sig1 = first.signature.clone();
    assert!(!sig1.is_empty());

    let mut permuted = tags.clone();
    permuted.reverse();
    let mut second = Device::new(mac, chrono::Utc::now());
    second.device_type = DeviceType::Ap;
    second.ie_tags = permuted;
    let second = eng.process_device(second);
    let sig2 = second.signature.clone();

    assert_ne!(sig1, sig2);
    let _ = std::fs::remove_dir_all(&dir);
}
