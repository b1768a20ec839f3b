//! Sector layout of a rebuilt image.
//!
//! Tables come first, directory by directory in depth-first pre-order
//! starting right after the volume descriptor. Inside a table, records are
//! stored in tree pre-order so the tree root sits at offset 0. File data
//! follows in the same directory order, each directory's files in name
//! order. The layout is a pure function of the tree, so identical input
//! always yields an identical image.

use super::avl::AvlArena;
use crate::error::{Result, XisoError};
use crate::fs::entry::DirectoryEntry;
use crate::fs::volume::VOLUME_DESCRIPTOR_SECTOR;
use crate::fs::{align_to_sector, join_path, sectors_for_bytes, SECTOR_SIZE};

/// First sector available for directory tables.
pub const FIRST_TABLE_SECTOR: u32 = VOLUME_DESCRIPTOR_SECTOR as u32 + 1;

/// Largest table offset a 16-bit child reference can address.
const MAX_TABLE_OFFSET: u64 = (u16::MAX as u64 - 1) * 4;

#[derive(Debug, Default)]
pub struct Layout {
    /// Directory node indices in table order (root first).
    pub tables: Vec<usize>,
    /// File node indices with data, in data order.
    pub files: Vec<usize>,
    /// Image path of every node, indexed by node.
    pub paths: Vec<String>,
    pub total_sectors: u32,
    pub data_bytes: u64,
}

impl Layout {
    pub fn image_bytes(&self) -> u64 {
        self.total_sectors as u64 * SECTOR_SIZE
    }
}

/// Assign table offsets, table sectors and data sectors to every node
/// reachable from `root`.
pub fn compute_layout(arena: &mut AvlArena, root: usize) -> Result<Layout> {
    let mut layout = Layout {
        paths: vec![String::new(); arena.len()],
        ..Layout::default()
    };
    layout.paths[root] = "/".to_string();

    let mut next_sector = FIRST_TABLE_SECTOR as u64;
    let mut stack = vec![root];
    while let Some(dir) = stack.pop() {
        next_sector = place_table(arena, dir, next_sector, &layout.paths[dir])?;
        layout.tables.push(dir);

        let children = arena.children_of(dir);
        for &child in &children {
            layout.paths[child] = join_path(&layout.paths[dir], &arena.node(child).name);
        }
        let subdirs: Vec<usize> = children
            .into_iter()
            .filter(|&c| arena.node(c).is_directory())
            .collect();
        stack.extend(subdirs.into_iter().rev());
    }

    for i in 0..layout.tables.len() {
        let dir = layout.tables[i];
        for child in arena.children_of(dir) {
            let node = arena.node_mut(child);
            if node.is_directory() {
                continue;
            }
            if node.size == 0 {
                node.new_sector = 0;
                continue;
            }
            node.new_sector = sector_number(next_sector, &layout.paths[child])?;
            next_sector += sectors_for_bytes(node.size as u64);
            layout.data_bytes += node.size as u64;
            layout.files.push(child);
        }
    }

    layout.total_sectors = sector_number(next_sector, "/")?;
    Ok(layout)
}

/// Lay out one directory's table at `start` and return the next free sector.
fn place_table(arena: &mut AvlArena, dir: usize, start: u64, path: &str) -> Result<u64> {
    let children = arena.pre_order(arena.node(dir).children);
    let mut offset = 0u64;
    let mut offsets = Vec::with_capacity(children.len());
    for &child in &children {
        let len = DirectoryEntry::record_len(arena.node(child).name.len()) as u64;
        if offset % SECTOR_SIZE + len > SECTOR_SIZE {
            offset = align_to_sector(offset);
        }
        if offset > MAX_TABLE_OFFSET {
            return Err(XisoError::InvalidSource(format!(
                "{path}: too many entries for one directory table"
            )));
        }
        offsets.push(offset);
        offset += len;
    }

    // An empty directory still owns one zeroed sector.
    let table_bytes = align_to_sector(offset).max(SECTOR_SIZE);
    let sector = sector_number(start, path)?;
    {
        let node = arena.node_mut(dir);
        node.new_sector = sector;
        node.size = table_bytes as u32;
    }
    for (&child, &child_offset) in children.iter().zip(&offsets) {
        let node = arena.node_mut(child);
        node.table_offset = child_offset as u32;
        node.record_position = sector as u64 * SECTOR_SIZE + child_offset;
    }
    Ok(start + table_bytes / SECTOR_SIZE)
}

fn sector_number(sector: u64, path: &str) -> Result<u32> {
    u32::try_from(sector)
        .map_err(|_| XisoError::InvalidSource(format!("{path}: image exceeds the sector range")))
}
