//! Corruption-tolerant directory listing.
//!
//! Directory tables are binary search trees linked by table-relative
//! offsets, so a damaged image can contain references that loop back to an
//! ancestor. Every walk here carries a visited set and truncates a branch
//! the moment it revisits a node.

use std::collections::{HashSet, VecDeque};
use std::io::{Read, Seek};

use super::entry::DirectoryEntry;
use super::stream::SectorStream;
use super::SECTOR_SIZE;
use crate::error::{Result, XisoError};

/// Result of walking one directory table.
#[derive(Debug, Default)]
pub struct TableWalk {
    /// Entries in tree (name) order, padding records dropped.
    pub entries: Vec<DirectoryEntry>,
    /// Branches cut because they revisited a node.
    pub cycles: usize,
    /// Child references that pointed outside the table.
    pub out_of_bounds: usize,
}

impl TableWalk {
    pub fn is_clean(&self) -> bool {
        self.cycles == 0 && self.out_of_bounds == 0
    }
}

/// In-order walk of `directory`'s table with an explicit stack.
pub fn walk_table<R: Read + Seek>(
    stream: &mut SectorStream<R>,
    directory: &DirectoryEntry,
) -> TableWalk {
    let mut walk = TableWalk::default();
    let table_size = directory.size;
    let mut visited: HashSet<(u32, u32)> = HashSet::new();
    let mut stack: Vec<DirectoryEntry> = Vec::new();
    let mut current = directory.first_child(stream);

    loop {
        while let Some(node) = current.take() {
            if !visited.insert((node.sector, node.offset)) {
                walk.cycles += 1;
                log::warn!(
                    "directory table at sector {} loops back to offset {}; truncating branch",
                    node.sector,
                    node.offset
                );
                break;
            }
            current = child(stream, &node, node.left, table_size, &mut walk);
            stack.push(node);
        }

        let Some(node) = stack.pop() else {
            break;
        };
        current = child(stream, &node, node.right, table_size, &mut walk);
        if !node.name.is_empty() {
            walk.entries.push(node);
        }
    }

    walk
}

fn child<R: Read + Seek>(
    stream: &mut SectorStream<R>,
    node: &DirectoryEntry,
    reference: Option<u16>,
    table_size: u32,
    walk: &mut TableWalk,
) -> Option<DirectoryEntry> {
    let offset = node.child_offset(reference)?;
    if offset >= table_size {
        walk.out_of_bounds += 1;
        log::warn!(
            "entry \"{}\" references offset {offset} beyond its {table_size}-byte table",
            node.name
        );
        return None;
    }
    stream.read_entry_at(node.sector, offset)
}

/// Children of `directory` in ascending name order.
pub fn list_children<R: Read + Seek>(
    stream: &mut SectorStream<R>,
    directory: &DirectoryEntry,
) -> Vec<DirectoryEntry> {
    walk_table(stream, directory).entries
}

/// Fail if a directory's table extends past the end of a volume of
/// `volume_len` bytes. Walking such a table would silently list nothing.
pub fn check_table_range(directory: &DirectoryEntry, volume_len: u64) -> Result<()> {
    let start = directory.start_sector as u64 * SECTOR_SIZE;
    let end = start + directory.size as u64;
    if directory.size > 0 && end > volume_len {
        return Err(XisoError::TruncatedRead {
            name: "directory table".into(),
            expected: directory.size as u64,
            actual: volume_len.saturating_sub(start),
        });
    }
    Ok(())
}

/// Breadth-first work queue over directories, keyed by table sector so a
/// directory entry that points at an already-queued table is not expanded
/// twice.
pub struct BreadthFirst<T = ()> {
    queue: VecDeque<(String, DirectoryEntry, T)>,
    seen_tables: HashSet<u32>,
    repeats: usize,
}

impl<T> BreadthFirst<T> {
    pub fn new(root: DirectoryEntry, tag: T) -> Self {
        let mut seen_tables = HashSet::new();
        seen_tables.insert(root.start_sector);
        let mut queue = VecDeque::new();
        queue.push_back(("/".to_string(), root, tag));
        Self {
            queue,
            seen_tables,
            repeats: 0,
        }
    }

    /// Queue a directory for expansion. Empty directories have nothing to
    /// expand and are accepted without queuing. Returns `false` when the
    /// directory's table was already queued.
    pub fn enqueue(&mut self, path: String, directory: DirectoryEntry, tag: T) -> bool {
        if directory.size == 0 {
            return true;
        }
        if !self.seen_tables.insert(directory.start_sector) {
            self.repeats += 1;
            log::warn!(
                "{path}: table at sector {} already visited; skipping",
                directory.start_sector
            );
            return false;
        }
        self.queue.push_back((path, directory, tag));
        true
    }

    pub fn next_directory(&mut self) -> Option<(String, DirectoryEntry, T)> {
        self.queue.pop_front()
    }

    /// Directories skipped because their table had already been visited.
    pub fn repeats(&self) -> usize {
        self.repeats
    }
}
