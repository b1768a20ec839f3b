use std::fmt;
use std::io::{Read, Seek};

use byteorder::{ByteOrder, LittleEndian};

use super::stream::SectorStream;
use super::SECTOR_SIZE;
use crate::error::{Result, XisoError};

/// Fixed part of a directory record: two child refs, start sector, size,
/// attribute byte and name length.
pub const ENTRY_HEADER_LEN: usize = 14;

/// Child reference value that marks padding / "no child".
pub const NO_CHILD: u16 = 0xFFFF;

/// XDVDFS attribute byte (same bit layout as FAT attributes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Attributes(pub u8);

impl Attributes {
    pub const READ_ONLY: Attributes = Attributes(0x01);
    pub const HIDDEN: Attributes = Attributes(0x02);
    pub const SYSTEM: Attributes = Attributes(0x04);
    pub const DIRECTORY: Attributes = Attributes(0x10);
    pub const ARCHIVE: Attributes = Attributes(0x20);
    pub const NORMAL: Attributes = Attributes(0x80);

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn contains(self, other: Attributes) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_directory(self) -> bool {
        self.contains(Self::DIRECTORY)
    }
}

impl std::ops::BitOr for Attributes {
    type Output = Attributes;

    fn bitor(self, rhs: Attributes) -> Attributes {
        Attributes(self.0 | rhs.0)
    }
}

impl fmt::Display for Attributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flags = [
            (Self::DIRECTORY, 'd'),
            (Self::READ_ONLY, 'r'),
            (Self::HIDDEN, 'h'),
            (Self::SYSTEM, 's'),
            (Self::ARCHIVE, 'a'),
        ];
        for (flag, c) in flags {
            write!(f, "{}", if self.contains(flag) { c } else { '-' })?;
        }
        Ok(())
    }
}

/// One node of a directory's binary search tree.
///
/// Entries are identified by `(sector, offset)`: the first sector of the
/// table they live in and their byte offset inside that table. Child
/// references are offsets into the same table in 4-byte units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub sector: u32,
    pub offset: u32,
    pub left: Option<u16>,
    pub right: Option<u16>,
    /// First sector of the file data, or of the child directory's table.
    pub start_sector: u32,
    pub size: u32,
    pub attributes: Attributes,
    pub name: String,
}

impl DirectoryEntry {
    /// The filesystem root: nameless, parentless, and pointing at the root table.
    pub fn root(root_sector: u32, root_size: u32) -> Self {
        Self {
            sector: 0,
            offset: 0,
            left: None,
            right: None,
            start_sector: root_sector,
            size: root_size,
            attributes: Attributes::DIRECTORY,
            name: String::new(),
        }
    }

    pub fn is_directory(&self) -> bool {
        self.attributes.is_directory()
    }

    pub fn is_file(&self) -> bool {
        !self.is_directory()
    }

    /// On-disk length of a record with a name of `name_len` bytes, padded to
    /// a 4-byte boundary.
    pub fn record_len(name_len: usize) -> usize {
        (ENTRY_HEADER_LEN + name_len + 3) & !3
    }

    /// Decode the record at `offset` bytes into the table at `sector`.
    pub fn decode<R: Read + Seek>(
        stream: &mut SectorStream<R>,
        sector: u32,
        offset: u32,
    ) -> Result<Self> {
        let position = sector as u64 * SECTOR_SIZE + offset as u64;
        let mut header = [0u8; ENTRY_HEADER_LEN];
        stream.read_exact_at(position, &mut header, "directory record")?;

        let name_len = header[13] as usize;
        let mut record = vec![0u8; ENTRY_HEADER_LEN + name_len];
        record[..ENTRY_HEADER_LEN].copy_from_slice(&header);
        stream.read_exact_at(
            position + ENTRY_HEADER_LEN as u64,
            &mut record[ENTRY_HEADER_LEN..],
            "directory record name",
        )?;
        Self::parse(&record, sector, offset)
    }

    /// Decode a record from an in-memory buffer.
    pub fn parse(data: &[u8], sector: u32, offset: u32) -> Result<Self> {
        if data.len() < ENTRY_HEADER_LEN {
            return Err(XisoError::TruncatedRead {
                name: "directory record".into(),
                expected: ENTRY_HEADER_LEN as u64,
                actual: data.len() as u64,
            });
        }
        let name_len = data[13] as usize;
        if data.len() < ENTRY_HEADER_LEN + name_len {
            return Err(XisoError::TruncatedRead {
                name: "directory record name".into(),
                expected: (ENTRY_HEADER_LEN + name_len) as u64,
                actual: data.len() as u64,
            });
        }
        let raw_name = &data[ENTRY_HEADER_LEN..ENTRY_HEADER_LEN + name_len];
        let name_end = raw_name.iter().position(|&b| b == 0).unwrap_or(raw_name.len());
        let name_bytes = &raw_name[..name_end];
        if !name_bytes.is_ascii() {
            return Err(XisoError::CorruptDirectoryTree(format!(
                "non-ASCII name in record at sector {sector} offset {offset}"
            )));
        }
        let name = String::from_utf8_lossy(name_bytes).into_owned();

        Ok(Self {
            sector,
            offset,
            left: child_ref(LittleEndian::read_u16(&data[0..2])),
            right: child_ref(LittleEndian::read_u16(&data[2..4])),
            start_sector: LittleEndian::read_u32(&data[4..8]),
            size: LittleEndian::read_u32(&data[8..12]),
            attributes: Attributes(data[12]),
            name,
        })
    }

    /// Encode this entry as a padded on-disk record.
    pub fn encode(&self) -> Result<Vec<u8>> {
        encode_record(
            self.left,
            self.right,
            self.start_sector,
            self.size,
            self.attributes,
            &self.name,
        )
    }

    /// Byte offset (within this entry's table) a child reference points at.
    ///
    /// Returns `None` for an absent reference or one that resolves back to
    /// this entry itself.
    pub fn child_offset(&self, reference: Option<u16>) -> Option<u32> {
        let offset = reference? as u32 * 4;
        if offset == self.offset {
            return None;
        }
        Some(offset)
    }

    pub fn left_child<R: Read + Seek>(&self, stream: &mut SectorStream<R>) -> Option<Self> {
        let offset = self.child_offset(self.left)?;
        stream.read_entry_at(self.sector, offset)
    }

    pub fn right_child<R: Read + Seek>(&self, stream: &mut SectorStream<R>) -> Option<Self> {
        let offset = self.child_offset(self.right)?;
        stream.read_entry_at(self.sector, offset)
    }

    /// Root node of this directory's own table.
    pub fn first_child<R: Read + Seek>(&self, stream: &mut SectorStream<R>) -> Option<Self> {
        if !self.is_directory() || self.size == 0 {
            return None;
        }
        stream.read_entry_at(self.start_sector, 0)
    }
}

/// Absent children are stored as 0 (the table root always sits at offset 0,
/// so no node can point there) or as 0xFFFF in padding.
fn child_ref(raw: u16) -> Option<u16> {
    match raw {
        0 | NO_CHILD => None,
        r => Some(r),
    }
}

/// Build one padded directory record.
pub fn encode_record(
    left: Option<u16>,
    right: Option<u16>,
    start_sector: u32,
    size: u32,
    attributes: Attributes,
    name: &str,
) -> Result<Vec<u8>> {
    let name_bytes = name.as_bytes();
    if name_bytes.is_empty() || name_bytes.len() > u8::MAX as usize {
        return Err(XisoError::InvalidSource(format!(
            "name length {} out of range for \"{name}\"",
            name_bytes.len()
        )));
    }
    let mut record = vec![0u8; DirectoryEntry::record_len(name_bytes.len())];
    LittleEndian::write_u16(&mut record[0..2], left.unwrap_or(0));
    LittleEndian::write_u16(&mut record[2..4], right.unwrap_or(0));
    LittleEndian::write_u32(&mut record[4..8], start_sector);
    LittleEndian::write_u32(&mut record[8..12], size);
    record[12] = attributes.bits();
    record[13] = name_bytes.len() as u8;
    record[ENTRY_HEADER_LEN..ENTRY_HEADER_LEN + name_bytes.len()].copy_from_slice(name_bytes);
    Ok(record)
}
