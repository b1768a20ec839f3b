use std::fs::File;
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::path::Path;

use super::entry::DirectoryEntry;
use super::SECTOR_SIZE;
use crate::error::{Result, XisoError};

/// Read-only, sector-addressed view over a source image.
///
/// All offsets handed to this type are relative to the XDVDFS volume, which
/// may start at `volume_base` bytes into the underlying stream when the
/// filesystem is embedded in a larger disc dump. Nothing is cached; every
/// read seeks.
pub struct SectorStream<R: Read + Seek> {
    reader: R,
    volume_base: u64,
    len: u64,
}

impl SectorStream<File> {
    /// Open an image file for reading.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        Self::new(file, 0)
    }
}

impl<R: Read + Seek> SectorStream<R> {
    pub fn new(mut reader: R, volume_base: u64) -> Result<Self> {
        let len = reader.seek(SeekFrom::End(0))?;
        Ok(Self {
            reader,
            volume_base,
            len,
        })
    }

    pub fn volume_base(&self) -> u64 {
        self.volume_base
    }

    pub fn set_volume_base(&mut self, volume_base: u64) {
        self.volume_base = volume_base;
    }

    /// Length of the whole underlying stream in bytes.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bytes available from the volume start to the end of the stream.
    pub fn volume_len(&self) -> u64 {
        self.len.saturating_sub(self.volume_base)
    }

    /// Read at a volume-relative byte position, filling as much of `buf` as
    /// the stream allows. Returns 0 at or past end-of-stream.
    pub fn read_at(&mut self, position: u64, buf: &mut [u8]) -> Result<usize> {
        let absolute = self.volume_base + position;
        if absolute >= self.len || buf.is_empty() {
            return Ok(0);
        }
        self.reader.seek(SeekFrom::Start(absolute))?;
        let mut filled = 0;
        while filled < buf.len() {
            match self.reader.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(filled)
    }

    /// Read exactly `buf.len()` bytes at a volume-relative position.
    pub fn read_exact_at(&mut self, position: u64, buf: &mut [u8], what: &str) -> Result<()> {
        let n = self.read_at(position, buf)?;
        if n < buf.len() {
            return Err(XisoError::TruncatedRead {
                name: what.to_string(),
                expected: buf.len() as u64,
                actual: n as u64,
            });
        }
        Ok(())
    }

    /// Read part of an entry's data, starting `relative_offset` bytes into its
    /// first sector. Returns the number of bytes read; 0 signals end-of-stream.
    pub fn read_bytes(
        &mut self,
        entry: &DirectoryEntry,
        buf: &mut [u8],
        relative_offset: u64,
    ) -> Result<usize> {
        let position = entry.start_sector as u64 * SECTOR_SIZE + relative_offset;
        self.read_at(position, buf)
    }

    /// Decode the directory record at `offset` bytes into the table starting
    /// at `sector`. Any decode failure is reported as `None`.
    pub fn read_entry_at(&mut self, sector: u32, offset: u32) -> Option<DirectoryEntry> {
        match DirectoryEntry::decode(self, sector, offset) {
            Ok(entry) => Some(entry),
            Err(e) => {
                log::debug!("unreadable directory record at sector {sector} offset {offset}: {e}");
                None
            }
        }
    }
}
