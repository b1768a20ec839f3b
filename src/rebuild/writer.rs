//! Write pass: streams a laid-out tree into a new image, strictly in
//! ascending sector order so the destination only ever needs `Write`.

use std::fs::File;
use std::io::{ErrorKind, Read, Seek, Write};

use super::avl::{AvlArena, DataSource};
use super::layout::Layout;
use crate::error::{BuildPhase, Result, XisoError};
use crate::fs::entry::encode_record;
use crate::fs::volume::VOLUME_DESCRIPTOR_SECTOR;
use crate::fs::{SectorStream, VolumeDescriptor, SECTOR_SIZE};
use crate::progress::{check_cancel, set_operation, set_progress, Progress};

/// Sequential writer that knows its byte position and zero-fills forward.
pub struct SectorWriter<W: Write> {
    inner: W,
    position: u64,
    zeros: Vec<u8>,
}

impl<W: Write> SectorWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            position: 0,
            zeros: vec![0u8; SECTOR_SIZE as usize],
        }
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn write_all(&mut self, data: &[u8]) -> std::io::Result<()> {
        self.inner.write_all(data)?;
        self.position += data.len() as u64;
        Ok(())
    }

    /// Zero-fill up to the start of `sector`. Moving backwards is a layout bug.
    pub fn advance_to_sector(&mut self, sector: u64) -> std::io::Result<()> {
        let target = sector * SECTOR_SIZE;
        if target < self.position {
            return Err(std::io::Error::new(
                ErrorKind::InvalidInput,
                format!(
                    "sector {sector} lies behind write position {}",
                    self.position
                ),
            ));
        }
        while self.position < target {
            let n = ((target - self.position) as usize).min(self.zeros.len());
            self.inner.write_all(&self.zeros[..n])?;
            self.position += n as u64;
        }
        Ok(())
    }

    /// Zero-fill to the next sector boundary.
    pub fn pad_to_sector(&mut self) -> std::io::Result<()> {
        let sector = self.position.div_ceil(SECTOR_SIZE);
        self.advance_to_sector(sector)
    }

    pub fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

/// Serialize one directory's table, child references recomputed from the
/// layout offsets.
pub fn encode_table(arena: &AvlArena, dir: usize) -> Result<Vec<u8>> {
    let directory = arena.node(dir);
    let mut table = vec![0u8; directory.size as usize];
    let child_ref = |index: Option<usize>| index.map(|i| (arena.node(i).table_offset / 4) as u16);

    for child in arena.children_of(dir) {
        let node = arena.node(child);
        let record = encode_record(
            child_ref(node.left),
            child_ref(node.right),
            node.new_sector,
            node.size,
            node.attributes,
            &node.name,
        )?;
        let at = node.table_offset as usize;
        if at + record.len() > table.len() {
            return Err(XisoError::InvalidSource(format!(
                "record for \"{}\" overruns its table",
                node.name
            )));
        }
        table[at..at + record.len()].copy_from_slice(&record);
    }
    Ok(table)
}

/// Destination, source stream and knobs for one write pass.
pub struct WriteJob<'a, R: Read + Seek, W: Write> {
    pub arena: &'a AvlArena,
    pub layout: &'a Layout,
    pub creation_time: u64,
    /// Old image for `DataSource::ImageSectors` nodes.
    pub source: Option<&'a mut SectorStream<R>>,
    pub writer: SectorWriter<W>,
    pub chunk_size: usize,
}

impl<R: Read + Seek, W: Write> WriteJob<'_, R, W> {
    /// Write the complete image. Returns the number of bytes written.
    pub fn run(mut self, progress: &Progress) -> Result<u64> {
        let root = self.layout.tables.first().copied().ok_or_else(|| {
            XisoError::InvalidSource("layout has no root directory".into())
        })?;
        let root_node = self.arena.node(root);
        let volume = VolumeDescriptor {
            root_sector: root_node.new_sector,
            root_size: root_node.size,
            creation_time: self.creation_time,
        };

        let dest = |e: std::io::Error, name: &str| {
            XisoError::build(BuildPhase::WritingDestination, name, e.into())
        };

        set_operation(progress, "Writing directory tables...");
        self.writer
            .advance_to_sector(VOLUME_DESCRIPTOR_SECTOR)
            .map_err(|e| dest(e, "/"))?;
        self.writer
            .write_all(&volume.to_sector())
            .map_err(|e| dest(e, "/"))?;

        for &dir in &self.layout.tables {
            check_cancel(progress)?;
            let path: &str = &self.layout.paths[dir];
            let table = encode_table(self.arena, dir)
                .map_err(|e| XisoError::build(BuildPhase::WritingDestination, path, e))?;
            self.writer
                .advance_to_sector(self.arena.node(dir).new_sector as u64)
                .map_err(|e| dest(e, path))?;
            self.writer.write_all(&table).map_err(|e| dest(e, path))?;
        }

        let mut counter = ByteCounter {
            done: 0,
            total: self.layout.data_bytes,
        };
        let mut buf = vec![0u8; self.chunk_size.max(SECTOR_SIZE as usize)];
        set_progress(progress, 0, counter.total);

        for &file in &self.layout.files {
            check_cancel(progress)?;
            let node = self.arena.node(file);
            let path: &str = &self.layout.paths[file];
            set_operation(progress, format!("Writing {path}"));
            self.writer
                .advance_to_sector(node.new_sector as u64)
                .map_err(|e| dest(e, path))?;

            let size = node.size as u64;
            match &node.source {
                DataSource::Empty => {}
                DataSource::ImageSectors { start_sector } => {
                    let stream = self.source.as_deref_mut().ok_or_else(|| {
                        XisoError::build(
                            BuildPhase::ReadingSource,
                            path,
                            XisoError::InvalidSource("no source image open".into()),
                        )
                    })?;
                    let base = *start_sector as u64 * SECTOR_SIZE;
                    let read = |pos: u64, chunk: &mut [u8]| stream.read_at(base + pos, chunk);
                    let sink = &mut self.writer;
                    copy_chunks(size, path, &mut buf, sink, progress, &mut counter, read)?;
                }
                DataSource::HostFile(host) => {
                    let mut file = File::open(host).map_err(|e| {
                        XisoError::build(BuildPhase::ReadingSource, path, e.into())
                    })?;
                    let read = |_: u64, chunk: &mut [u8]| read_full(&mut file, chunk);
                    let sink = &mut self.writer;
                    copy_chunks(size, path, &mut buf, sink, progress, &mut counter, read)?;
                }
            }
            self.writer.pad_to_sector().map_err(|e| dest(e, path))?;
        }

        self.writer
            .advance_to_sector(self.layout.total_sectors as u64)
            .map_err(|e| dest(e, "/"))?;
        self.writer.flush().map_err(|e| dest(e, "/"))?;
        set_progress(progress, counter.total, counter.total);
        Ok(self.writer.position())
    }
}

struct ByteCounter {
    done: u64,
    total: u64,
}

/// Copy `size` bytes from `read` into `writer` in `buf`-sized chunks,
/// checking for cancellation between chunks.
fn copy_chunks<W: Write>(
    size: u64,
    path: &str,
    buf: &mut [u8],
    writer: &mut SectorWriter<W>,
    progress: &Progress,
    counter: &mut ByteCounter,
    mut read: impl FnMut(u64, &mut [u8]) -> Result<usize>,
) -> Result<()> {
    let mut copied = 0u64;
    while copied < size {
        check_cancel(progress)?;
        let want = ((size - copied) as usize).min(buf.len());
        let n = read(copied, &mut buf[..want])
            .map_err(|e| XisoError::build(BuildPhase::ReadingSource, path, e))?;
        if n < want {
            return Err(XisoError::build(
                BuildPhase::ReadingSource,
                path,
                XisoError::TruncatedRead {
                    name: path.to_string(),
                    expected: size,
                    actual: copied + n as u64,
                },
            ));
        }
        writer
            .write_all(&buf[..n])
            .map_err(|e| XisoError::build(BuildPhase::WritingDestination, path, e.into()))?;
        copied += n as u64;
        counter.done += n as u64;
        set_progress(progress, counter.done, counter.total);
    }
    Ok(())
}

fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}
