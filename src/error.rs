//! Crate-wide error type.
//!
//! Most malformed-input paths in this crate (truncated IE, truncated EAPOL,
//! bad RSN, unknown tag) are not represented here — per spec they are logged
//! and the frame is dropped, never propagated. `Error` only covers the
//! boundary operations that a caller needs to observe: pcap I/O and
//! signature-store loading.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("pcap write failed for {path}: {source}")]
    PcapWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("pcap encode failed for {path}: {source}")]
    PcapEncode {
        path: PathBuf,
        #[source]
        source: pcap_file::PcapError,
    },

    #[error("signature store load failed: {0}")]
    SignatureStore(String),
}

pub type Result<T> = std::result::Result<T, Error>;
