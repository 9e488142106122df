//! EAPOL-Key descriptor parser (C4): decodes the 95-byte fixed header and
//! infers the four-way-handshake message number.
//!
//! There's no direct teacher analogue (AirHound never touches 802.1X), so
//! this module is grounded on spec.md §4.4's bit-exact field table, written
//! in the teacher's general posture for fixed-layout binary decoding: a
//! plain big-endian byte-offset reader returning `Option`/bare bools rather
//! than a derive-macro binary codec, matching how `scanner.rs` picks fields
//! out of a raw 802.11 header by hand when the frame library's typed
//! accessors don't apply.

/// Parsed EAPOL-Key descriptor (spec.md §4.4 field table).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EapolKey {
    pub descriptor_type: u8,
    pub key_info: u16,
    pub key_length: u16,
    pub replay_counter: u64,
    pub key_nonce: [u8; 32],
    pub key_iv: [u8; 16],
    pub key_rsc: [u8; 8],
    pub mic: [u8; 16],
    pub key_data_length: u16,
    pub key_data: Vec<u8>,
}

/// The four-way-handshake message number, or `0` for non-pairwise frames
/// (group-key handshake, ignored by session logic).
pub type MessageNumber = u8;

const HEADER_LEN: usize = 95;

impl EapolKey {
    /// Parse an EAPOL frame payload already known to be type KEY. Returns
    /// `None` if the payload is shorter than the fixed 95-byte descriptor
    /// (spec.md §4.4 "payload too short" — logged by the caller, never
    /// propagated as an `Error`).
    pub fn parse(payload: &[u8]) -> Option<EapolKey> {
        if payload.len() < HEADER_LEN {
            return None;
        }
        let descriptor_type = payload[0];
        let key_info = u16::from_be_bytes([payload[1], payload[2]]);
        let key_length = u16::from_be_bytes([payload[3], payload[4]]);
        let replay_counter = u64::from_be_bytes(payload[5..13].try_into().ok()?);
        let mut key_nonce = [0u8; 32];
        key_nonce.copy_from_slice(&payload[13..45]);
        let mut key_iv = [0u8; 16];
        key_iv.copy_from_slice(&payload[45..61]);
        let mut key_rsc = [0u8; 8];
        key_rsc.copy_from_slice(&payload[61..69]);
        let mut mic = [0u8; 16];
        mic.copy_from_slice(&payload[77..93]);
        let key_data_length = u16::from_be_bytes([payload[93], payload[94]]);

        let key_data = if key_data_length == 0 {
            Vec::new()
        } else {
            let start = HEADER_LEN;
            let end = start + key_data_length as usize;
            if end > payload.len() {
                Vec::new()
            } else {
                payload[start..end].to_vec()
            }
        };

        Some(EapolKey {
            descriptor_type,
            key_info,
            key_length,
            replay_counter,
            key_nonce,
            key_iv,
            key_rsc,
            mic,
            key_data_length,
            key_data,
        })
    }

    fn bit(&self, n: u8) -> bool {
        self.key_info & (1 << n) != 0
    }

    /// KeyType bit (bit 3): true = Pairwise, false = Group.
    pub fn is_pairwise(&self) -> bool {
        self.bit(3)
    }

    pub fn install(&self) -> bool {
        self.bit(6)
    }

    pub fn ack(&self) -> bool {
        self.bit(7)
    }

    pub fn has_mic(&self) -> bool {
        self.bit(8)
    }

    pub fn secure(&self) -> bool {
        self.bit(9)
    }

    pub fn error(&self) -> bool {
        self.bit(10)
    }

    pub fn request(&self) -> bool {
        self.bit(11)
    }

    pub fn encrypted_key_data(&self) -> bool {
        self.bit(12)
    }

    /// True if the MIC is absent or all-zero (spec.md §4.4) — such a frame
    /// is treated as invalid and dropped by the handshake manager.
    pub fn is_mic_zero(&self) -> bool {
        !self.has_mic() || self.mic.iter().all(|&b| b == 0)
    }

    /// Infer the four-way-handshake message number (spec.md §4.4).
    pub fn message_number(&self) -> MessageNumber {
        if !self.is_pairwise() {
            return 0;
        }
        let mic = self.has_mic();
        let ack = self.ack();
        let secure = self.secure();

        if !mic && ack {
            return 1;
        }
        if mic && ack {
            return 3;
        }
        if mic && !ack && !secure {
            return if self.key_data_length == 0 { 4 } else { 2 };
        }
        if mic && !ack && secure {
            return if self.key_data_length > 0 { 2 } else { 4 };
        }
        0
    }
}
