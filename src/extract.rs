//! Extraction of a whole image into a host folder.

use std::fs::{self, File};
use std::io::{BufWriter, Read, Seek, Write};
use std::path::{Path, PathBuf};

use crate::error::{Result, XisoError};
use crate::fs::traversal::{check_table_range, walk_table, BreadthFirst};
use crate::fs::volume::detect_volume;
use crate::fs::{join_path, DirectoryEntry, SectorStream};
use crate::progress::{check_cancel, log, set_operation, set_progress, LogLevel, Progress};

const EXTRACT_CHUNK: usize = 1024 * 1024;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ExtractSummary {
    pub directories: u64,
    pub files: u64,
    pub bytes: u64,
    /// Entries whose names could not be used on the host.
    pub skipped: Vec<String>,
}

/// Map an image name onto a host file name. Characters most host
/// filesystems reject become `_`; `.` and `..` are refused.
pub fn host_file_name(name: &str) -> Option<String> {
    if name.is_empty() || name == "." || name == ".." {
        return None;
    }
    Some(
        name.chars()
            .map(|c| match c {
                ':' | '/' | '\\' | '\0' => '_',
                '<' | '>' | '"' | '|' | '?' | '*' => '_',
                _ => c,
            })
            .collect(),
    )
}

/// Recreate the image's directory tree under `dest` and copy out every file.
pub fn extract_image(image: &Path, dest: &Path, progress: &Progress) -> Result<ExtractSummary> {
    log(
        progress,
        LogLevel::Info,
        format!("Extracting {} to {}", image.display(), dest.display()),
    );
    let mut stream = SectorStream::open(image)?;
    let volume = detect_volume(&mut stream)?;
    extract_from_stream(&mut stream, volume.root_entry(), dest, progress)
}

/// Extract everything under `root` (normally the volume root) into `dest`.
pub fn extract_from_stream<R: Read + Seek>(
    stream: &mut SectorStream<R>,
    root: DirectoryEntry,
    dest: &Path,
    progress: &Progress,
) -> Result<ExtractSummary> {
    let mut summary = ExtractSummary::default();
    let mut buf = vec![0u8; EXTRACT_CHUNK];
    let total = stream.volume_len();
    let mut queue = BreadthFirst::new(root, dest.to_path_buf());
    fs::create_dir_all(dest)?;

    while let Some((path, directory, host_dir)) = queue.next_directory() {
        check_cancel(progress)?;
        if let Err(e) = check_table_range(&directory, total) {
            log(progress, LogLevel::Warning, format!("{path}: {e}, skipped"));
            summary.skipped.push(path);
            continue;
        }
        summary.directories += 1;
        let walk = walk_table(stream, &directory);
        if !walk.is_clean() {
            log(
                progress,
                LogLevel::Warning,
                format!("{path}: damaged directory tree, some entries were skipped"),
            );
        }

        for entry in walk.entries {
            check_cancel(progress)?;
            let entry_path = join_path(&path, &entry.name);
            let Some(host_name) = host_file_name(&entry.name) else {
                log(
                    progress,
                    LogLevel::Warning,
                    format!("{entry_path}: name cannot be used on this system, skipped"),
                );
                summary.skipped.push(entry_path);
                continue;
            };
            let target: PathBuf = host_dir.join(host_name);

            if entry.is_directory() {
                fs::create_dir_all(&target)?;
                queue.enqueue(entry_path, entry, target);
                continue;
            }

            set_operation(progress, format!("Extracting {entry_path}"));
            let written = copy_entry(stream, &entry, &entry_path, &target, &mut buf, progress)?;
            summary.files += 1;
            summary.bytes += written;
            set_progress(progress, summary.bytes.min(total), total);
        }
    }

    log(
        progress,
        LogLevel::Info,
        format!(
            "Extracted {} files ({} bytes) in {} directories",
            summary.files, summary.bytes, summary.directories
        ),
    );
    Ok(summary)
}

fn copy_entry<R: Read + Seek>(
    stream: &mut SectorStream<R>,
    entry: &DirectoryEntry,
    path: &str,
    target: &Path,
    buf: &mut [u8],
    progress: &Progress,
) -> Result<u64> {
    let mut out = BufWriter::new(File::create(target)?);
    let total = entry.size as u64;
    let mut done = 0u64;
    while done < total {
        check_cancel(progress)?;
        let want = ((total - done) as usize).min(buf.len());
        let n = stream.read_bytes(entry, &mut buf[..want], done)?;
        if n < want {
            return Err(XisoError::TruncatedRead {
                name: path.to_string(),
                expected: total,
                actual: done + n as u64,
            });
        }
        out.write_all(&buf[..n])?;
        done += n as u64;
    }
    out.flush()?;
    Ok(done)
}
