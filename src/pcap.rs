//! Aircrack-ng-compatible pcap emission (spec.md §4.5/§6), built on
//! `pcap-file`. Grounded on the retrieved `hcxmaptool` packet parser, which
//! reads captures with `pcap_file::pcapng::PcapNgReader` — this crate writes
//! the older classic-pcap format instead (`pcap_file::pcap`), since §6
//! explicitly calls for `.pcap`, not `.pcapng`, output.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;

use pcap_file::pcap::{PcapHeader, PcapPacket, PcapWriter};
use pcap_file::DataLink;

use crate::error::{Error, Result};

/// Snaplen written to every pcap global header (spec.md §4.5).
pub const SNAPLEN: u32 = 65536;

/// One frame as captured, independent of the session that observed it.
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    pub timestamp: Duration,
    pub data: Vec<u8>,
}

impl CapturedFrame {
    pub fn new(timestamp: Duration, data: Vec<u8>) -> Self {
        Self { timestamp, data }
    }
}

/// Replace every character outside `[A-Za-z0-9_-]` with `_` (spec.md §4.5/§6).
pub fn sanitize(component: &str) -> String {
    component
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// `{sanitised_BSSID}_{sanitised_ESSID}_{sanitised_STATION}.pcap`
pub fn handshake_filename(dir: &Path, bssid: &str, essid: &str, station: &str) -> PathBuf {
    dir.join(format!(
        "{}_{}_{}.pcap",
        sanitize(bssid),
        sanitize(essid),
        sanitize(station)
    ))
}

/// `{sanitised_BSSID}_{sanitised_ESSID}_PMKID.pcap`
pub fn pmkid_filename(dir: &Path, bssid: &str, essid: &str) -> PathBuf {
    dir.join(format!("{}_{}_PMKID.pcap", sanitize(bssid), sanitize(essid)))
}

fn header() -> PcapHeader {
    PcapHeader {
        datalink: DataLink::IEEE802_11_RADIOTAP,
        snaplen: SNAPLEN,
        ..Default::default()
    }
}

fn write_frames(path: &Path, beacon: Option<&CapturedFrame>, frames: &[CapturedFrame]) -> Result<()> {
    let file = File::create(path).map_err(|source| Error::PcapWrite {
        path: path.to_path_buf(),
        source,
    })?;
    let mut writer = PcapWriter::with_header(header(), file).map_err(|source| Error::PcapEncode {
        path: path.to_path_buf(),
        source,
    })?;

    let to_write = beacon.into_iter().chain(frames.iter());
    for frame in to_write {
        let packet = PcapPacket::new(frame.timestamp, frame.data.len() as u32, &frame.data);
        writer.write_packet(&packet).map_err(|source| Error::PcapEncode {
            path: path.to_path_buf(),
            source,
        })?;
    }
    Ok(())
}

/// Write a handshake session's pcap: cached beacon first (if any), then
/// each captured frame in capture order (spec.md §4.5).
pub fn write_handshake(
    dir: &Path,
    bssid: &str,
    essid: &str,
    station: &str,
    beacon: Option<&CapturedFrame>,
    frames: &[CapturedFrame],
) -> Result<PathBuf> {
    let path = handshake_filename(dir, bssid, essid, station);
    write_frames(&path, beacon, frames)?;
    Ok(path)
}

/// Write a single-frame PMKID capture (spec.md §4.5 "PMKID path").
pub fn write_pmkid(
    dir: &Path,
    bssid: &str,
    essid: &str,
    beacon: Option<&CapturedFrame>,
    frame: &CapturedFrame,
) -> Result<PathBuf> {
    let path = pmkid_filename(dir, bssid, essid);
    write_frames(&path, beacon, std::slice::from_ref(frame))?;
    Ok(path)
}
