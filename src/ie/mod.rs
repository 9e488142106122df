//! The 802.11 Information-Element TLV walker (C1) and per-tag handlers (C2).
//!
//! Grounded on the teacher's `scanner::parse_wifi_frame`, which walks a
//! beacon/probe body with the `ieee80211` crate's frame matchers, and on the
//! hand-rolled TLV loop in the retrieved `hcxmaptool` packet parser — this
//! crate doesn't have a frame-parsing crate on the dependency list, so IE
//! walking stays a direct byte-offset loop like that reference.

pub mod handlers;

use crate::device::Device;

/// Walk TLV-encoded Information Elements in `data`, calling `f(id, value)`
/// for each well-formed element. Stops silently (never panics) the moment an
/// element's header or length would read past the end of the buffer.
pub fn iterate_ies<'a>(data: &'a [u8], mut f: impl FnMut(u8, &'a [u8])) {
    let end = data.len();
    let mut pos = 0usize;
    while pos + 2 <= end {
        let id = data[pos];
        let len = data[pos + 1] as usize;
        if pos + 2 + len > end {
            break;
        }
        let value = &data[pos + 2..pos + 2 + len];
        f(id, value);
        pos += 2 + len;
    }
}

/// First IE matching `target_id`, or `None`.
pub fn find_ie(data: &[u8], target_id: u8) -> Option<&[u8]> {
    let mut found = None;
    iterate_ies(data, |id, value| {
        if found.is_none() && id == target_id {
            found = Some(value);
        }
    });
    found
}

/// Walk `data` and apply every tag's handler to `device`, appending each
/// tag ID to `device.ie_tags` in arrival order regardless of whether a
/// handler recognises it (spec.md §4.2/§9 "zero-copy visitor" contract).
pub fn process_ies(data: &[u8], device: &mut Device) {
    iterate_ies(data, |id, value| handlers::apply_ie(id, value, device));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tlv(id: u8, value: &[u8]) -> Vec<u8> {
        let mut v = vec![id, value.len() as u8];
        v.extend_from_slice(value);
        v
    }

    #[test]
    fn walks_multiple_elements_in_order() {
        let mut data = tlv(0, b"net");
        data.extend(tlv(3, &[6]));
        let mut seen = Vec::new();
        iterate_ies(&data, |id, value| seen.push((id, value.to_vec())));
        assert_eq!(seen, vec![(0, b"net".to_vec()), (3, vec![6])]);
    }

    #[test]
    fn stops_silently_on_truncated_header() {
        let data = [0u8; 1];
        let mut count = 0;
        iterate_ies(&data, |_, _| count += 1);
        assert_eq!(count, 0);
    }

    #[test]
    fn stops_silently_when_length_overruns_buffer() {
        let data = [0u8, 10, 1, 2, 3];
        let mut count = 0;
        iterate_ies(&data, |_, _| count += 1);
        assert_eq!(count, 0);
    }

    #[test]
    fn find_ie_returns_first_match() {
        let mut data = tlv(0, b"a");
        data.extend(tlv(0, b"b"));
        assert_eq!(find_ie(&data, 0), Some(&b"a"[..]));
        assert_eq!(find_ie(&data, 99), None);
    }

    #[test]
    fn unknown_tags_still_append_to_ie_tags() {
        let data = tlv(200, &[1, 2, 3]);
        let mut device = Device::new("aa:bb:cc:dd:ee:ff", chrono::Utc::now());
        process_ies(&data, &mut device);
        assert_eq!(device.ie_tags, vec![200]);
    }

    proptest::proptest! {
        // spec.md §8 property 5: ie_tags preserves input buffer order for
        // any well-formed random TLV stream.
        #[test]
        fn ie_tags_matches_input_order(tags in proptest::collection::vec(0u8..=255, 0..32)) {
            let mut data = Vec::new();
            for &id in &tags {
                data.extend(tlv(id, &[0xAB]));
            }
            let mut device = Device::new("aa:bb:cc:dd:ee:ff", chrono::Utc::now());
            process_ies(&data, &mut device);
            proptest::prop_assert_eq!(device.ie_tags, tags);
        }
    }
}
