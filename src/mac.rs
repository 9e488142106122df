//! MAC address helpers — normalisation, OUI extraction, locally-administered
//! (randomised) bit detection, and vendor lookup.
//!
//! Generalizes the teacher's `filter::format_mac`, which only ever produced
//! an upper-case display string for a BLE/WiFi match log line, into the full
//! set of address-shape operations the registry and dispatcher need. The
//! vendor table below keeps the teacher's `defaults::MAC_PREFIXES` shape
//! (`&[([u8; 3], &str)]`) but swaps its BLE-beacon-vendor entries for
//! IEEE-registered OUIs of common WiFi client/AP vendors, since `vendor` is
//! an identity field every device carries, not a narrow target list.

use once_cell::sync::Lazy;
use std::collections::HashMap;

/// Render a 6-byte MAC as the canonical lower-case colon-hex string used
/// throughout the data model (`aa:bb:cc:dd:ee:ff`).
pub fn normalize(bytes: &[u8; 6]) -> String {
    format!(
        "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5]
    )
}

/// Parse a colon-hex MAC string back into bytes. Accepts upper or lower case.
pub fn parse(s: &str) -> Option<[u8; 6]> {
    let mut out = [0u8; 6];
    let mut parts = s.split(':');
    for slot in out.iter_mut() {
        let part = parts.next()?;
        *slot = u8::from_str_radix(part, 16).ok()?;
    }
    if parts.next().is_some() {
        return None;
    }
    Some(out)
}

/// The 3-byte OUI prefix of a MAC.
pub fn oui(bytes: &[u8; 6]) -> [u8; 3] {
    [bytes[0], bytes[1], bytes[2]]
}

/// True if the locally-administered bit (bit 1 of the first octet) is set —
/// the standard marker for a randomised/private MAC address.
pub fn is_locally_administered(bytes: &[u8; 6]) -> bool {
    bytes[0] & 0x02 != 0
}

/// True if the multicast/group bit (bit 0 of the first octet) is set.
pub fn is_multicast(bytes: &[u8; 6]) -> bool {
    bytes[0] & 0x01 != 0
}

/// True if the address is the broadcast address `ff:ff:ff:ff:ff:ff`.
pub fn is_broadcast(bytes: &[u8; 6]) -> bool {
    bytes.iter().all(|&b| b == 0xff)
}

/// Known MAC OUI prefixes (3-byte prefix, vendor name), IEEE-registered
/// blocks for common WiFi client/AP chipset and device vendors.
static VENDOR_PREFIXES: &[([u8; 3], &str)] = &[
    ([0x3C, 0x06, 0x30], "Apple"),
    ([0xA4, 0x83, 0xE7], "Apple"),
    ([0xF0, 0x18, 0x98], "Apple"),
    ([0x00, 0x1E, 0xC2], "Apple"),
    ([0x7C, 0x6D, 0x62], "Apple"),
    ([0x9C, 0x35, 0xEB], "Apple"),
    ([0x34, 0xC0, 0x59], "Samsung"),
    ([0x8C, 0x71, 0xF8], "Samsung"),
    ([0xE8, 0x50, 0x8B], "Samsung"),
    ([0x5C, 0x0A, 0x5B], "Samsung"),
    ([0x3C, 0x5A, 0xB4], "Google"),
    ([0x54, 0x60, 0x09], "Google"),
    ([0xF4, 0xF5, 0xE8], "Google"),
    ([0x00, 0x1A, 0x11], "Google"),
    ([0xB8, 0x27, 0xEB], "Raspberry Pi Foundation"),
    ([0xDC, 0xA6, 0x32], "Raspberry Pi Foundation"),
    ([0xE4, 0x5F, 0x01], "Raspberry Pi Foundation"),
    ([0x00, 0x1B, 0x63], "Intel"),
    ([0x00, 0x24, 0xD7], "Intel"),
    ([0x34, 0x13, 0xE8], "Intel"),
    ([0x00, 0x17, 0x88], "Philips Hue"),
    ([0xEC, 0xB5, 0xFA], "TP-Link"),
    ([0x50, 0xC7, 0xBF], "TP-Link"),
    ([0xA4, 0x2B, 0xB0], "TP-Link"),
    ([0x00, 0x14, 0x6C], "Netgear"),
    ([0xC0, 0x3F, 0x0E], "Netgear"),
    ([0xE0, 0x46, 0x9A], "Netgear"),
    ([0x00, 0x1D, 0x7E], "Cisco"),
    ([0x00, 0x1F, 0x6C], "Cisco"),
    ([0x00, 0x17, 0x94], "Ubiquiti"),
    ([0x04, 0x18, 0xD6], "Ubiquiti"),
    ([0x74, 0x83, 0xC2], "Ubiquiti"),
    ([0xDC, 0xA6, 0x32], "Espressif"),
    ([0x24, 0x0A, 0xC4], "Espressif"),
    ([0xA0, 0x20, 0xA6], "Espressif"),
    ([0x7C, 0x9E, 0xBD], "Espressif"),
];

static VENDOR_INDEX: Lazy<HashMap<[u8; 3], &'static str>> =
    Lazy::new(|| VENDOR_PREFIXES.iter().copied().collect());

/// Look up a MAC's vendor from its OUI. Never matches a locally-administered
/// (randomised) address — those carry no vendor-assigned OUI by definition.
pub fn vendor_for(bytes: &[u8; 6]) -> Option<&'static str> {
    if is_locally_administered(bytes) {
        return None;
    }
    VENDOR_INDEX.get(&oui(bytes)).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_lowercases_and_colons() {
        let mac = [0xAA, 0xBB, 0x0C, 0xDD, 0xEE, 0xFF];
        assert_eq!(normalize(&mac), "aa:bb:0c:dd:ee:ff");
    }

    #[test]
    fn parse_round_trips_normalize() {
        let mac = [0x12, 0x34, 0x56, 0x78, 0x9a, 0xbc];
        let s = normalize(&mac);
        assert_eq!(parse(&s).unwrap(), mac);
    }

    #[test]
    fn parse_rejects_wrong_field_count() {
        assert!(parse("aa:bb:cc:dd:ee").is_none());
        assert!(parse("aa:bb:cc:dd:ee:ff:00").is_none());
    }

    #[test]
    fn locally_administered_bit() {
        assert!(!is_locally_administered(&[0x00, 0, 0, 0, 0, 0]));
        assert!(is_locally_administered(&[0x02, 0, 0, 0, 0, 0]));
        // A random example of a vendor OUI with the LA bit unset.
        assert!(!is_locally_administered(&[0xb4, 0x1e, 0x52, 0, 0, 0]));
    }

    #[test]
    fn broadcast_and_multicast() {
        assert!(is_broadcast(&[0xff; 6]));
        assert!(!is_broadcast(&[0xfe; 6]));
        assert!(is_multicast(&[0x01, 0, 0, 0, 0, 0]));
        assert!(!is_multicast(&[0x00, 0, 0, 0, 0, 0]));
    }

    #[test]
    fn vendor_for_known_oui() {
        assert_eq!(vendor_for(&[0x3C, 0x06, 0x30, 0, 0, 0]), Some("Apple"));
    }

    #[test]
    fn vendor_for_unknown_oui_is_none() {
        assert_eq!(vendor_for(&[0x11, 0x22, 0x33, 0, 0, 0]), None);
    }

    #[test]
    fn vendor_for_randomized_mac_is_none() {
        // Locally-administered bit set on an otherwise-known OUI byte pattern.
        assert_eq!(vendor_for(&[0x3E, 0x06, 0x30, 0, 0, 0]), None);
    }
}
