//! XDVDFS volume descriptor
//!
//! The descriptor occupies sector 32 of the volume and points at the root
//! directory table. Disc dumps that carry a video partition in front of the
//! game data place the volume at one of a few well-known byte offsets.

use std::io::{Read, Seek};

use byteorder::{ByteOrder, LittleEndian};
use chrono::{DateTime, Utc};

use super::entry::DirectoryEntry;
use super::stream::SectorStream;
use super::SECTOR_SIZE;
use crate::error::{Result, XisoError};

pub const VOLUME_DESCRIPTOR_SECTOR: u64 = 32;
pub const XDVDFS_SIGNATURE: &[u8; 20] = b"MICROSOFT*XBOX*MEDIA";

/// Offset of the trailing signature copy inside the descriptor sector.
const TRAILING_SIGNATURE_OFFSET: usize = 2028;

/// Volume start offsets tried when opening an image, in order.
pub const KNOWN_VOLUME_BASES: [(u64, &str); 4] = [
    (0, "XISO"),
    (0x1830_0000, "XGD1"),
    (0x0FD9_0000, "XGD2"),
    (0x0208_0000, "XGD3"),
];

/// Seconds between 1601-01-01 (FILETIME epoch) and 1970-01-01.
const FILETIME_UNIX_DELTA: i64 = 11_644_473_600;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeDescriptor {
    pub root_sector: u32,
    pub root_size: u32,
    /// Windows FILETIME (100 ns ticks since 1601).
    pub creation_time: u64,
}

impl VolumeDescriptor {
    /// Parse a descriptor from the raw contents of its sector.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < SECTOR_SIZE as usize {
            return Err(XisoError::NotXdvdfsImage(format!(
                "descriptor sector too short ({} bytes)",
                data.len()
            )));
        }
        if &data[..20] != XDVDFS_SIGNATURE {
            return Err(XisoError::NotXdvdfsImage("missing leading signature".into()));
        }
        if &data[TRAILING_SIGNATURE_OFFSET..TRAILING_SIGNATURE_OFFSET + 20] != XDVDFS_SIGNATURE {
            return Err(XisoError::NotXdvdfsImage("missing trailing signature".into()));
        }
        Ok(Self {
            root_sector: LittleEndian::read_u32(&data[20..24]),
            root_size: LittleEndian::read_u32(&data[24..28]),
            creation_time: LittleEndian::read_u64(&data[28..36]),
        })
    }

    /// Serialize into a full descriptor sector.
    pub fn to_sector(&self) -> Vec<u8> {
        let mut sector = vec![0u8; SECTOR_SIZE as usize];
        sector[..20].copy_from_slice(XDVDFS_SIGNATURE);
        LittleEndian::write_u32(&mut sector[20..24], self.root_sector);
        LittleEndian::write_u32(&mut sector[24..28], self.root_size);
        LittleEndian::write_u64(&mut sector[28..36], self.creation_time);
        sector[TRAILING_SIGNATURE_OFFSET..TRAILING_SIGNATURE_OFFSET + 20]
            .copy_from_slice(XDVDFS_SIGNATURE);
        sector
    }

    /// Read the descriptor at the stream's current volume base.
    pub fn read<R: Read + Seek>(stream: &mut SectorStream<R>) -> Result<Self> {
        let mut sector = vec![0u8; SECTOR_SIZE as usize];
        let n = stream.read_at(VOLUME_DESCRIPTOR_SECTOR * SECTOR_SIZE, &mut sector)?;
        if n < sector.len() {
            return Err(XisoError::NotXdvdfsImage(
                "image ends before the volume descriptor".into(),
            ));
        }
        Self::parse(&sector)
    }

    /// Synthesized root directory entry.
    pub fn root_entry(&self) -> DirectoryEntry {
        DirectoryEntry::root(self.root_sector, self.root_size)
    }

    /// Creation time as a calendar date, if set.
    pub fn created(&self) -> Option<DateTime<Utc>> {
        if self.creation_time == 0 {
            return None;
        }
        let secs = (self.creation_time / 10_000_000) as i64 - FILETIME_UNIX_DELTA;
        let nanos = (self.creation_time % 10_000_000) as u32 * 100;
        DateTime::from_timestamp(secs, nanos)
    }
}

/// Try the known volume bases and position `stream` on the first one that
/// carries a valid descriptor.
pub fn detect_volume<R: Read + Seek>(stream: &mut SectorStream<R>) -> Result<VolumeDescriptor> {
    for (base, label) in KNOWN_VOLUME_BASES {
        stream.set_volume_base(base);
        if let Ok(volume) = VolumeDescriptor::read(stream) {
            log::debug!("found XDVDFS volume ({label}) at byte offset {base:#x}");
            return Ok(volume);
        }
    }
    stream.set_volume_base(0);
    Err(XisoError::NotXdvdfsImage(
        "no volume descriptor at any known offset".into(),
    ))
}
