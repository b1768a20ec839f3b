//! Build sources: an existing image's directory tree, or a host folder.

use std::collections::HashMap;
use std::fs;
use std::io::{Read, Seek};
use std::path::{Component, Path, PathBuf};

use super::avl::{AvlArena, AvlNode, DataSource};
use crate::error::{BuildPhase, Result, XisoError};
use crate::fs::traversal::{check_table_range, walk_table, BreadthFirst};
use crate::fs::{join_path, Attributes, SectorStream, VolumeDescriptor};
use crate::progress::{check_cancel, log, set_operation, LogLevel, Progress};

/// Root-level directory holding console firmware updates.
pub const SYSTEM_UPDATE_DIR: &str = "$SystemUpdate";

/// What a rebuild reads from.
#[derive(Debug, Clone)]
pub enum BuildSource {
    Image(PathBuf),
    Folder(PathBuf),
}

impl BuildSource {
    pub fn path(&self) -> &Path {
        match self {
            BuildSource::Image(p) | BuildSource::Folder(p) => p,
        }
    }
}

/// One item of a folder enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceItem {
    pub relative_path: PathBuf,
    pub size: u64,
    pub is_directory: bool,
}

/// A fully scanned source: every node lives in `arena`, node 0 is the root.
#[derive(Debug)]
pub struct SourceTree {
    pub arena: AvlArena,
    pub root: usize,
    /// FILETIME copied into the new descriptor.
    pub creation_time: u64,
    /// Paths left out by the skip rule.
    pub skipped: Vec<String>,
}

impl SourceTree {
    fn new(creation_time: u64) -> Self {
        let mut arena = AvlArena::new();
        let root = arena.push(AvlNode::directory("", Attributes::default()));
        Self {
            arena,
            root,
            creation_time,
            skipped: Vec::new(),
        }
    }
}

pub fn is_system_update(name: &str) -> bool {
    name.eq_ignore_ascii_case(SYSTEM_UPDATE_DIR)
}

/// Reject names the directory record cannot carry.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > u8::MAX as usize {
        return Err(XisoError::InvalidSource(format!(
            "name \"{name}\" must be 1 to 255 bytes"
        )));
    }
    if !name.is_ascii() || name.bytes().any(|b| b == 0 || b == b'/' || b == b'\\') {
        return Err(XisoError::InvalidSource(format!(
            "name \"{name}\" contains characters XDVDFS cannot store"
        )));
    }
    Ok(())
}

/// Scan an existing image's tree breadth-first. A directory whose table
/// lies outside the image fails the scan with a `ReadingSource` error
/// naming that directory.
pub fn scan_image<R: Read + Seek>(
    stream: &mut SectorStream<R>,
    volume: &VolumeDescriptor,
    skip_system_update: bool,
    progress: &Progress,
) -> Result<SourceTree> {
    set_operation(progress, "Reading source directory tree...");
    let mut tree = SourceTree::new(volume.creation_time);
    let mut queue = BreadthFirst::new(volume.root_entry(), tree.root);
    let volume_len = stream.volume_len();

    while let Some((path, directory, node)) = queue.next_directory() {
        check_cancel(progress)?;
        // An unreadable table must not turn into an empty directory.
        check_table_range(&directory, volume_len)
            .map_err(|e| XisoError::build(BuildPhase::ReadingSource, &path, e))?;
        let walk = walk_table(stream, &directory);
        if !walk.is_clean() {
            log(
                progress,
                LogLevel::Warning,
                format!("{path}: damaged directory tree, unreachable entries are dropped"),
            );
        }

        for entry in walk.entries {
            let entry_path = join_path(&path, &entry.name);
            if node == tree.root && skip_system_update && is_system_update(&entry.name) {
                log::info!("skipping {entry_path}");
                tree.skipped.push(entry_path);
                continue;
            }
            validate_name(&entry.name)?;

            if entry.is_directory() {
                let child = tree
                    .arena
                    .add_child(node, AvlNode::directory(entry.name.clone(), entry.attributes))?;
                if !queue.enqueue(entry_path.clone(), entry, child) {
                    log(
                        progress,
                        LogLevel::Warning,
                        format!("{entry_path}: loops back to a visited directory, kept empty"),
                    );
                }
            } else {
                let source = DataSource::ImageSectors {
                    start_sector: entry.start_sector,
                };
                tree.arena.add_child(
                    node,
                    AvlNode::file(entry.name.clone(), entry.size, entry.attributes, source),
                )?;
            }
        }
    }

    Ok(tree)
}

/// Enumerate a host folder depth-first, children sorted by name, every
/// directory listed before its contents.
pub fn enumerate_folder(root: &Path) -> Result<Vec<SourceItem>> {
    let mut items = Vec::new();
    let mut stack = vec![PathBuf::new()];

    while let Some(relative) = stack.pop() {
        let mut children: Vec<(PathBuf, fs::Metadata)> = Vec::new();
        for entry in fs::read_dir(root.join(&relative))? {
            let entry = entry?;
            children.push((relative.join(entry.file_name()), entry.metadata()?));
        }
        children.sort_by(|a, b| a.0.cmp(&b.0));

        // Reverse so the stack pops subdirectories in name order.
        let mut subdirs = Vec::new();
        for (path, meta) in children {
            let is_directory = meta.is_dir();
            if is_directory {
                subdirs.push(path.clone());
            }
            items.push(SourceItem {
                relative_path: path,
                size: if is_directory { 0 } else { meta.len() },
                is_directory,
            });
        }
        stack.extend(subdirs.into_iter().rev());
    }

    Ok(items)
}

/// Build a source tree from folder items. Items must list every directory
/// before anything inside it.
pub fn scan_folder(
    root: &Path,
    items: &[SourceItem],
    skip_system_update: bool,
    creation_time: u64,
    progress: &Progress,
) -> Result<SourceTree> {
    set_operation(progress, "Reading source folder...");
    let mut tree = SourceTree::new(creation_time);
    let mut directories: HashMap<PathBuf, usize> = HashMap::new();
    directories.insert(PathBuf::new(), tree.root);

    for item in items {
        check_cancel(progress)?;
        let display = format!("/{}", item.relative_path.display());
        let first = item.relative_path.components().next();
        let under_update = matches!(
            first,
            Some(Component::Normal(c)) if c.to_str().is_some_and(is_system_update)
        );
        if skip_system_update && under_update {
            if item.relative_path.components().count() == 1 {
                tree.skipped.push(display);
            }
            continue;
        }

        let name = item
            .relative_path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| XisoError::InvalidSource(format!("{display}: unusable file name")))?;
        validate_name(name)?;

        let parent_path = item
            .relative_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        let parent = *directories.get(&parent_path).ok_or_else(|| {
            XisoError::InvalidSource(format!("{display}: listed before its parent directory"))
        })?;

        if item.is_directory {
            let node = tree
                .arena
                .add_child(parent, AvlNode::directory(name, Attributes::default()))?;
            directories.insert(item.relative_path.clone(), node);
        } else {
            let size = u32::try_from(item.size).map_err(|_| {
                XisoError::InvalidSource(format!(
                    "{display}: {} bytes exceeds the 4 GiB file limit",
                    item.size
                ))
            })?;
            let source = DataSource::HostFile(root.join(&item.relative_path));
            tree.arena
                .add_child(parent, AvlNode::file(name, size, Attributes::NORMAL, source))?;
        }
    }

    Ok(tree)
}
