//! Per-tag IE handlers (C2) and RSN IE parsing.
//!
//! One function per tag, matching spec.md §4.2's table bit-exactly. Every
//! handler is infallible from the iterator's point of view — a malformed
//! value is logged and the draft device is simply left unmodified for that
//! tag, never aborting the walk (§7 "unknown tag / tag too short").

use crate::device::{Device, RsnCapabilities, RsnInfo, WpsDetails};

const MS_WPS_OUI: [u8; 3] = [0x00, 0x50, 0xF2];
const MS_WPS_TYPE: u8 = 0x04;

/// Dispatch a single `(id, value)` pair onto `device`: append the tag to
/// `ie_tags` in arrival order, then run its handler if one is registered.
pub fn apply_ie(id: u8, value: &[u8], device: &mut Device) {
    device.ie_tags.push(id);
    match id {
        0 => handle_ssid(value, device),
        3 => handle_ds_parameter(value, device),
        45 => device.standard = "802.11n (WiFi 4)".to_string(),
        48 => handle_rsn(value, device),
        54 => handle_mobility_domain(value, device),
        70 => handle_radio_measurement(device),
        127 => handle_extended_capabilities(value, device),
        191 => device.standard = "802.11ac (WiFi 5)".to_string(),
        221 => handle_vendor_specific(value, device),
        255 => handle_extension(value, device),
        _ => {}
    }
}

fn handle_ssid(value: &[u8], device: &mut Device) {
    if value.is_empty() || value[0] == 0x00 {
        device.ssid = "<HIDDEN>".to_string();
    } else {
        device.ssid = String::from_utf8_lossy(value).into_owned();
    }
}

fn handle_ds_parameter(value: &[u8], device: &mut Device) {
    if let Some(&channel) = value.first() {
        device.channel = channel;
    }
}

fn handle_mobility_domain(value: &[u8], device: &mut Device) {
    device.has_11r = true;
    device.add_capability("11r");
    if !value.is_empty() {
        device.mobility_domain = Some(hex_string(value));
    }
}

fn handle_radio_measurement(device: &mut Device) {
    device.has_11k = true;
    device.add_capability("11k");
}

fn handle_extended_capabilities(value: &[u8], device: &mut Device) {
    // Bit 19 (BSS-Transition Management) lives in octet index 2, bit 0x08.
    if value.len() >= 3 && value[2] & 0x08 != 0 {
        device.has_11v = true;
        device.add_capability("11v");
    }
}

fn handle_extension(value: &[u8], device: &mut Device) {
    match value.first() {
        Some(35) => {
            device.is_wifi6 = true;
            device.standard = "802.11ax (WiFi 6)".to_string();
        }
        Some(108) => {
            device.is_wifi6 = true;
            device.is_wifi7 = true;
            device.standard = "802.11be (WiFi 7)".to_string();
        }
        _ => {}
    }
}

fn handle_vendor_specific(value: &[u8], device: &mut Device) {
    if value.len() < 4 {
        return;
    }
    if value[0..3] != MS_WPS_OUI || value[3] != MS_WPS_TYPE {
        return; // other OUIs emit nothing
    }
    let wps = parse_wps_attributes(&value[4..]);
    let combined = if !wps.manufacturer.is_empty() || !wps.model_name.is_empty() {
        format!("{} {}", wps.manufacturer, wps.model_name)
            .trim()
            .to_string()
    } else {
        wps.device_name.clone()
    };
    device.wps_info = combined.clone();
    device.model = combined;
    device.wps_details = Some(wps);
}

/// WPS attribute IDs we care about (IEEE/Wi-Fi Alliance WSC TLV registry).
const WPS_ATTR_MANUFACTURER: u16 = 0x1021;
const WPS_ATTR_MODEL_NAME: u16 = 0x1023;
const WPS_ATTR_MODEL_NUMBER: u16 = 0x1024;
const WPS_ATTR_DEVICE_NAME: u16 = 0x1011;

fn parse_wps_attributes(attrs: &[u8]) -> WpsDetails {
    let mut wps = WpsDetails::default();
    let mut pos = 0usize;
    while pos + 4 <= attrs.len() {
        let attr_id = u16::from_be_bytes([attrs[pos], attrs[pos + 1]]);
        let len = u16::from_be_bytes([attrs[pos + 2], attrs[pos + 3]]) as usize;
        let start = pos + 4;
        if start + len > attrs.len() {
            break;
        }
        let text = String::from_utf8_lossy(&attrs[start..start + len])
            .trim_end_matches('\0')
            .to_string();
        match attr_id {
            WPS_ATTR_MANUFACTURER => wps.manufacturer = text,
            WPS_ATTR_MODEL_NAME => wps.model_name = text,
            WPS_ATTR_MODEL_NUMBER => wps.model_number = text,
            WPS_ATTR_DEVICE_NAME => wps.device_name = text,
            _ => {}
        }
        pos = start + len;
    }
    wps
}

fn cipher_name(t: u8) -> String {
    match t {
        1 => "WEP-40".to_string(),
        2 => "TKIP".to_string(),
        4 => "CCMP".to_string(),
        5 => "WEP-104".to_string(),
        8 => "GCMP-128".to_string(),
        9 => "GCMP-256".to_string(),
        10 => "CCMP-256".to_string(),
        n => format!("UNKNOWN({n})"),
    }
}

fn akm_name(t: u8) -> String {
    match t {
        1 => "802.1X".to_string(),
        2 => "PSK".to_string(),
        3 => "FT-802.1X".to_string(),
        4 => "FT-PSK".to_string(),
        5 => "802.1X-SHA256".to_string(),
        6 => "PSK-SHA256".to_string(),
        8 => "SAE".to_string(),
        9 => "FT-SAE".to_string(),
        18 => "OWE".to_string(),
        n => format!("UNKNOWN({n})"),
    }
}

/// Parse an RSN IE body (spec.md §4.2). Returns `None` on any truncation;
/// the caller falls back to a bare `WPA2` security string in that case.
pub fn parse_rsn(value: &[u8]) -> Option<RsnInfo> {
    if value.len() < 8 {
        return None;
    }
    let mut pos = 0usize;
    let version = u16::from_le_bytes([value[0], value[1]]);
    pos += 2;

    if pos + 4 > value.len() {
        return None;
    }
    let group_cipher = cipher_name(value[pos + 3]);
    pos += 4;

    if pos + 2 > value.len() {
        return None;
    }
    let pairwise_count = u16::from_le_bytes([value[pos], value[pos + 1]]) as usize;
    pos += 2;
    let mut pairwise_ciphers = Vec::with_capacity(pairwise_count);
    for _ in 0..pairwise_count {
        if pos + 4 > value.len() {
            return None;
        }
        pairwise_ciphers.push(cipher_name(value[pos + 3]));
        pos += 4;
    }

    if pos + 2 > value.len() {
        return None;
    }
    let akm_count = u16::from_le_bytes([value[pos], value[pos + 1]]) as usize;
    pos += 2;
    let mut akms = Vec::with_capacity(akm_count);
    for _ in 0..akm_count {
        if pos + 4 > value.len() {
            return None;
        }
        akms.push(akm_name(value[pos + 3]));
        pos += 4;
    }

    let capabilities = if pos + 2 <= value.len() {
        let bits = u16::from_le_bytes([value[pos], value[pos + 1]]);
        RsnCapabilities {
            pre_auth: bits & 0x0001 != 0,
            no_pairwise: bits & 0x0002 != 0,
            ptksa_replay_counter: ((bits >> 2) & 0x03) as u8,
            gtksa_replay_counter: ((bits >> 4) & 0x03) as u8,
            mfp_required: bits & 0x0040 != 0,
            mfp_capable: bits & 0x0080 != 0,
            peerkey_enabled: bits & 0x0200 != 0,
        }
    } else {
        RsnCapabilities::default()
    };

    Some(RsnInfo {
        version,
        group_cipher,
        pairwise_ciphers,
        akms,
        capabilities,
    })
}

/// Security tag derivation, spec.md §4.2: first match wins, SAE > PSK >
/// 802.1X > bare WPA2.
pub fn derive_security(rsn: &RsnInfo) -> String {
    if rsn.akms.iter().any(|a| a.contains("SAE")) {
        "WPA3".to_string()
    } else if rsn.akms.iter().any(|a| a.contains("PSK")) {
        "WPA2-PSK".to_string()
    } else if rsn.akms.iter().any(|a| a.contains("802.1X")) {
        "WPA2-Enterprise".to_string()
    } else {
        "WPA2".to_string()
    }
}

fn handle_rsn(value: &[u8], device: &mut Device) {
    match parse_rsn(value) {
        Some(rsn) => {
            device.security = derive_security(&rsn);
            device.rsn_info = Some(rsn);
        }
        None => {
            log::debug!("malformed RSN IE ({} bytes), falling back to WPA2", value.len());
            device.security = "WPA2".to_string();
        }
    }
}

fn hex_string(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn device() -> Device {
        Device::new("aa:bb:cc:dd:ee:ff", Utc::now())
    }

    #[test]
    fn ssid_empty_is_hidden() {
        let mut d = device();
        apply_ie(0, &[], &mut d);
        assert_eq!(d.ssid, "<HIDDEN>");
    }

    #[test]
    fn ssid_leading_null_is_hidden() {
        let mut d = device();
        apply_ie(0, &[0x00, b'x'], &mut d);
        assert_eq!(d.ssid, "<HIDDEN>");
    }

    #[test]
    fn ssid_decodes_utf8() {
        let mut d = device();
        apply_ie(0, b"CorpNet", &mut d);
        assert_eq!(d.ssid, "CorpNet");
    }

    #[test]
    fn ds_parameter_sets_channel() {
        let mut d = device();
        apply_ie(3, &[6], &mut d);
        assert_eq!(d.channel, 6);
    }

    #[test]
    fn ht_and_vht_set_standard() {
        let mut d = device();
        apply_ie(45, &[], &mut d);
        assert_eq!(d.standard, "802.11n (WiFi 4)");
        apply_ie(191, &[], &mut d);
        assert_eq!(d.standard, "802.11ac (WiFi 5)");
    }

    #[test]
    fn extension_ax_and_be() {
        let mut d = device();
        apply_ie(255, &[35], &mut d);
        assert!(d.is_wifi6);
        assert!(!d.is_wifi7);
        let mut d2 = device();
        apply_ie(255, &[108], &mut d2);
        assert!(d2.is_wifi6);
        assert!(d2.is_wifi7);
    }

    #[test]
    fn extended_capabilities_bss_transition_bit() {
        let mut d = device();
        apply_ie(127, &[0, 0, 0x08], &mut d);
        assert!(d.has_11v);
        assert!(d.capabilities.contains(&"11v".to_string()));
    }

    #[test]
    fn extended_capabilities_too_short_is_ignored() {
        let mut d = device();
        apply_ie(127, &[0, 0], &mut d);
        assert!(!d.has_11v);
    }

    #[test]
    fn mobility_domain_sets_11r() {
        let mut d = device();
        apply_ie(54, &[0xAB, 0xCD, 0x01], &mut d);
        assert!(d.has_11r);
        assert_eq!(d.mobility_domain.as_deref(), Some("abcd01"));
    }

    #[test]
    fn radio_measurement_sets_11k() {
        let mut d = device();
        apply_ie(70, &[], &mut d);
        assert!(d.has_11k);
    }

    fn rsn_bytes(akm_type: u8) -> Vec<u8> {
        let mut v = vec![1, 0]; // version
        v.extend_from_slice(&[0x00, 0x0F, 0xAC, 4]); // group cipher CCMP
        v.extend_from_slice(&[1, 0]); // pairwise count
        v.extend_from_slice(&[0x00, 0x0F, 0xAC, 4]); // pairwise CCMP
        v.extend_from_slice(&[1, 0]); // akm count
        v.extend_from_slice(&[0x00, 0x0F, 0xAC, akm_type]);
        v.extend_from_slice(&[0x00, 0x00]); // capabilities
        v
    }

    #[test]
    fn rsn_psk_maps_to_wpa2_psk() {
        let mut d = device();
        apply_ie(48, &rsn_bytes(2), &mut d);
        assert_eq!(d.security, "WPA2-PSK");
        assert_eq!(d.rsn_info.unwrap().pairwise_ciphers, vec!["CCMP".to_string()]);
    }

    #[test]
    fn rsn_sae_maps_to_wpa3() {
        let mut d = device();
        apply_ie(48, &rsn_bytes(8), &mut d);
        assert_eq!(d.security, "WPA3");
    }

    #[test]
    fn rsn_dot1x_maps_to_enterprise() {
        let mut d = device();
        apply_ie(48, &rsn_bytes(1), &mut d);
        assert_eq!(d.security, "WPA2-Enterprise");
    }

    #[test]
    fn rsn_truncated_falls_back_to_wpa2() {
        let mut d = device();
        apply_ie(48, &[1, 0, 1, 2], &mut d);
        assert_eq!(d.security, "WPA2");
        assert!(d.rsn_info.is_none());
    }

    #[test]
    fn rsn_capabilities_bit_layout() {
        let mut v = rsn_bytes(2);
        let len = v.len();
        v[len - 2..].copy_from_slice(&0b0000_0010_1100_0001u16.to_le_bytes());
        let rsn = parse_rsn(&v).unwrap();
        assert!(rsn.capabilities.pre_auth);
        assert!(!rsn.capabilities.no_pairwise);
        assert_eq!(rsn.capabilities.ptksa_replay_counter, 0);
        assert_eq!(rsn.capabilities.gtksa_replay_counter, 3);
        assert!(rsn.capabilities.mfp_capable);
        assert!(!rsn.capabilities.mfp_required);
        assert!(rsn.capabilities.peerkey_enabled);
    }

    #[test]
    fn vendor_wps_parses_manufacturer_and_model() {
        let mut attrs = Vec::new();
        attrs.extend_from_slice(&0x1021u16.to_be_bytes());
        attrs.extend_from_slice(&4u16.to_be_bytes());
        attrs.extend_from_slice(b"Acme");
        attrs.extend_from_slice(&0x1023u16.to_be_bytes());
        attrs.extend_from_slice(&3u16.to_be_bytes());
        attrs.extend_from_slice(b"X10");

        let mut value = vec![0x00, 0x50, 0xF2, 0x04];
        value.extend_from_slice(&attrs);

        let mut d = device();
        apply_ie(221, &value, &mut d);
        assert_eq!(d.wps_info, "Acme X10");
        assert_eq!(d.model, "Acme X10");
        assert_eq!(d.wps_details.unwrap().manufacturer, "Acme");
    }

    #[test]
    fn vendor_non_wps_oui_emits_nothing() {
        let mut d = device();
        apply_ie(221, &[0x00, 0x11, 0x22, 0x09], &mut d);
        assert!(d.wps_details.is_none());
        assert_eq!(d.model, "");
    }
}
