use std::fs::File;
use std::io::{Read, Seek, Write};
use std::path::Path;

use super::entry::DirectoryEntry;
use super::stream::SectorStream;
use super::traversal::list_children;
use super::volume::{detect_volume, VolumeDescriptor};
use crate::error::{Result, XisoError};

const READ_CHUNK: usize = 256 * 1024;

/// Trait for browsing an image's filesystem from an exploration front end.
pub trait Filesystem {
    /// Get the root directory entry.
    fn root(&mut self) -> Result<DirectoryEntry>;

    /// List the contents of a directory.
    fn list_directory(&mut self, entry: &DirectoryEntry) -> Result<Vec<DirectoryEntry>>;

    /// Read file contents (up to `max_bytes`).
    fn read_file(&mut self, entry: &DirectoryEntry, max_bytes: usize) -> Result<Vec<u8>>;

    /// Filesystem type name.
    fn fs_type(&self) -> &str;

    /// Size of the volume in bytes.
    fn total_size(&self) -> u64;

    /// Stream file data to a writer. Returns the number of bytes written.
    /// Default delegates to `read_file(entry, usize::MAX)`.
    fn write_file_to(&mut self, entry: &DirectoryEntry, writer: &mut dyn Write) -> Result<u64> {
        let data = self.read_file(entry, usize::MAX)?;
        writer.write_all(&data)?;
        Ok(data.len() as u64)
    }

    /// Resolve a `/`-separated path, matching names case-insensitively.
    fn find(&mut self, path: &str) -> Result<Option<DirectoryEntry>> {
        let mut current = self.root()?;
        for part in path.split('/').filter(|p| !p.is_empty()) {
            if !current.is_directory() {
                return Ok(None);
            }
            let children = self.list_directory(&current)?;
            match children
                .into_iter()
                .find(|c| c.name.eq_ignore_ascii_case(part))
            {
                Some(child) => current = child,
                None => return Ok(None),
            }
        }
        Ok(Some(current))
    }
}

/// XDVDFS filesystem reader.
pub struct XdvdfsFilesystem<R: Read + Seek> {
    stream: SectorStream<R>,
    volume: VolumeDescriptor,
}

impl XdvdfsFilesystem<File> {
    /// Open an image file, probing the known volume offsets.
    pub fn open_path(path: &Path) -> Result<Self> {
        let stream = SectorStream::open(path)?;
        Self::from_stream(stream)
    }
}

impl<R: Read + Seek> XdvdfsFilesystem<R> {
    pub fn open(reader: R) -> Result<Self> {
        Self::from_stream(SectorStream::new(reader, 0)?)
    }

    pub fn from_stream(mut stream: SectorStream<R>) -> Result<Self> {
        let volume = detect_volume(&mut stream)?;
        Ok(Self { stream, volume })
    }

    pub fn volume(&self) -> &VolumeDescriptor {
        &self.volume
    }

    pub fn into_parts(self) -> (SectorStream<R>, VolumeDescriptor) {
        (self.stream, self.volume)
    }

    fn check_file(entry: &DirectoryEntry) -> Result<()> {
        if entry.is_directory() {
            return Err(XisoError::InvalidSource(format!(
                "{} is a directory",
                entry.name
            )));
        }
        Ok(())
    }
}

impl<R: Read + Seek> Filesystem for XdvdfsFilesystem<R> {
    fn root(&mut self) -> Result<DirectoryEntry> {
        Ok(self.volume.root_entry())
    }

    fn list_directory(&mut self, entry: &DirectoryEntry) -> Result<Vec<DirectoryEntry>> {
        if !entry.is_directory() {
            return Err(XisoError::InvalidSource(format!(
                "{} is not a directory",
                entry.name
            )));
        }
        Ok(list_children(&mut self.stream, entry))
    }

    fn read_file(&mut self, entry: &DirectoryEntry, max_bytes: usize) -> Result<Vec<u8>> {
        Self::check_file(entry)?;
        let len = (entry.size as usize).min(max_bytes);
        let mut data = vec![0u8; len];
        let n = self.stream.read_bytes(entry, &mut data, 0)?;
        if n < len {
            return Err(XisoError::TruncatedRead {
                name: entry.name.clone(),
                expected: len as u64,
                actual: n as u64,
            });
        }
        Ok(data)
    }

    fn fs_type(&self) -> &str {
        "XDVDFS"
    }

    fn total_size(&self) -> u64 {
        self.stream.volume_len()
    }

    fn write_file_to(&mut self, entry: &DirectoryEntry, writer: &mut dyn Write) -> Result<u64> {
        Self::check_file(entry)?;
        let total = entry.size as u64;
        let mut buf = vec![0u8; READ_CHUNK];
        let mut done = 0u64;
        while done < total {
            let want = ((total - done) as usize).min(buf.len());
            let n = self.stream.read_bytes(entry, &mut buf[..want], done)?;
            if n == 0 {
                return Err(XisoError::TruncatedRead {
                    name: entry.name.clone(),
                    expected: total,
                    actual: done,
                });
            }
            writer.write_all(&buf[..n])?;
            done += n as u64;
        }
        Ok(done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::entry::{encode_record, Attributes};
    use crate::fs::SECTOR_SIZE;
    use std::io::Cursor;

    /// Root table at sector 33 holding "DATA" (sector 35, 5 bytes), a
    /// subdirectory "SUB" (table at 34) and an empty file "NIL".
    fn tiny_image() -> Vec<u8> {
        let sector = SECTOR_SIZE as usize;
        let mut img = vec![0u8; 36 * sector];
        let volume = VolumeDescriptor {
            root_sector: 33,
            root_size: 2048,
            creation_time: 0,
        };
        img[32 * sector..33 * sector].copy_from_slice(&volume.to_sector());

        // "NIL" is the tree root, "DATA" its left child, "SUB" its right.
        let root = encode_record(Some(4), Some(8), 0, 0, Attributes::NORMAL, "NIL").unwrap();
        let data = encode_record(None, None, 35, 5, Attributes::NORMAL, "DATA").unwrap();
        let sub = encode_record(None, None, 34, 2048, Attributes::DIRECTORY, "SUB").unwrap();
        let table = 33 * sector;
        img[table..table + root.len()].copy_from_slice(&root);
        img[table + 16..table + 16 + data.len()].copy_from_slice(&data);
        img[table + 32..table + 32 + sub.len()].copy_from_slice(&sub);

        let inner = encode_record(None, None, 35, 5, Attributes::NORMAL, "COPY").unwrap();
        img[34 * sector..34 * sector + inner.len()].copy_from_slice(&inner);
        img[35 * sector..35 * sector + 5].copy_from_slice(b"hello");
        img
    }

    #[test]
    fn test_browse_and_read() {
        let mut fs = XdvdfsFilesystem::open(Cursor::new(tiny_image())).unwrap();
        assert_eq!(fs.fs_type(), "XDVDFS");
        assert_eq!(fs.total_size(), 36 * 2048);

        let root = fs.root().unwrap();
        let names: Vec<String> = fs
            .list_directory(&root)
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, ["DATA", "NIL", "SUB"]);

        let data = fs.find("/data").unwrap().unwrap();
        assert_eq!(fs.read_file(&data, usize::MAX).unwrap(), b"hello");
        assert_eq!(fs.read_file(&data, 2).unwrap(), b"he");

        let nil = fs.find("/NIL").unwrap().unwrap();
        assert!(fs.read_file(&nil, usize::MAX).unwrap().is_empty());

        let copy = fs.find("/sub/copy").unwrap().unwrap();
        let mut out = Vec::new();
        assert_eq!(fs.write_file_to(&copy, &mut out).unwrap(), 5);
        assert_eq!(out, b"hello");
    }

    #[test]
    fn test_type_mismatches_are_errors() {
        let mut fs = XdvdfsFilesystem::open(Cursor::new(tiny_image())).unwrap();
        let root = fs.root().unwrap();
        assert!(fs.read_file(&root, 10).is_err());
        let data = fs.find("/DATA").unwrap().unwrap();
        assert!(fs.list_directory(&data).is_err());
        assert!(fs.find("/DATA/child").unwrap().is_none());
    }

    #[test]
    fn test_truncated_file_data() {
        let mut img = tiny_image();
        img.truncate(35 * 2048 + 3);
        let mut fs = XdvdfsFilesystem::open(Cursor::new(img)).unwrap();
        let data = fs.find("/DATA").unwrap().unwrap();
        let err = fs.read_file(&data, usize::MAX).unwrap_err();
        assert!(matches!(err, XisoError::TruncatedRead { actual: 3, .. }));
    }
}
