//! Image integrity checking.
//!
//! Two independent passes: an optional sequential surface scan that reads
//! every byte of the image file, and a structural walk that follows the
//! directory tree breadth-first and reads each file's full declared range.
//! Neither pass hashes content; they check that what the filesystem claims
//! to hold can actually be read.

use std::fs::File;
use std::io::{ErrorKind, Read, Seek};
use std::path::Path;

use crate::config::XisoConfig;
use crate::error::{Result, XisoError};
use crate::fs::traversal::{check_table_range, walk_table, BreadthFirst};
use crate::fs::volume::{detect_volume, VolumeDescriptor};
use crate::fs::{join_path, DirectoryEntry, SectorStream, SECTOR_SIZE};
use crate::progress::{
    check_cancel, log, log_failure, set_operation, set_progress, LogLevel, Progress,
};

const SURFACE_SCAN_NAME: &str = "<image surface>";

#[derive(Debug, Clone)]
pub struct VerifyOptions {
    pub deep_scan: bool,
    pub scan_chunk_size: usize,
    pub verify_chunk_size: usize,
}

impl VerifyOptions {
    pub fn from_config(config: &XisoConfig) -> Self {
        Self {
            deep_scan: config.deep_scan,
            scan_chunk_size: config.scan_chunk_size,
            verify_chunk_size: config.verify_chunk_size,
        }
    }
}

impl Default for VerifyOptions {
    fn default() -> Self {
        Self::from_config(&XisoConfig::default())
    }
}

/// Counters from a passing verification.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct VerifySummary {
    pub directories: u64,
    pub files: u64,
    pub bytes_verified: u64,
    pub surface_bytes: u64,
    /// Directory branches that were cut because they looped.
    pub corrupt_branches: usize,
}

/// Verify an image with default chunk sizes.
pub fn verify(path: &Path, deep_scan: bool, progress: &Progress) -> Result<VerifySummary> {
    let options = VerifyOptions {
        deep_scan,
        ..VerifyOptions::default()
    };
    test_integrity(path, &options, progress)
}

/// Run the surface scan (if requested) and the structural walk over the image
/// at `path`. `Ok` means pass; an `Integrity` error names the first failing
/// entry; `Cancelled` is returned as-is.
pub fn test_integrity(
    path: &Path,
    options: &VerifyOptions,
    progress: &Progress,
) -> Result<VerifySummary> {
    let result = check_image(path, options, progress);
    log_failure(progress, "Verification", result)
}

fn check_image(
    path: &Path,
    options: &VerifyOptions,
    progress: &Progress,
) -> Result<VerifySummary> {
    log(
        progress,
        LogLevel::Info,
        format!("Verifying {}", path.display()),
    );

    let mut surface_bytes = 0;
    if options.deep_scan {
        set_operation(progress, "Scanning image surface...");
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        surface_bytes = surface_scan(file, len, options.scan_chunk_size, progress)?;
    }

    let mut stream = SectorStream::open(path)?;
    let volume = detect_volume(&mut stream)?;
    let mut summary =
        verify_structure(&mut stream, &volume, options.verify_chunk_size, progress)?;
    summary.surface_bytes = surface_bytes;

    log(
        progress,
        LogLevel::Info,
        format!(
            "Verification passed: {} directories, {} files, {} bytes",
            summary.directories, summary.files, summary.bytes_verified
        ),
    );
    Ok(summary)
}

/// Read `expected_len` bytes sequentially. A short read before the end is a
/// failure regardless of what the filesystem says.
pub fn surface_scan<R: Read>(
    mut reader: R,
    expected_len: u64,
    chunk_size: usize,
    progress: &Progress,
) -> Result<u64> {
    let mut buf = vec![0u8; chunk_size.max(SECTOR_SIZE as usize)];
    let mut done = 0u64;
    set_progress(progress, 0, expected_len);

    while done < expected_len {
        check_cancel(progress)?;
        let want = ((expected_len - done) as usize).min(buf.len());
        let n = match reader.read(&mut buf[..want]) {
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(XisoError::integrity(SURFACE_SCAN_NAME, e.into())),
        };
        if n == 0 {
            return Err(XisoError::integrity(
                SURFACE_SCAN_NAME,
                XisoError::TruncatedRead {
                    name: SURFACE_SCAN_NAME.into(),
                    expected: expected_len,
                    actual: done,
                },
            ));
        }
        done += n as u64;
        set_progress(progress, done, expected_len);
    }
    Ok(done)
}

/// Breadth-first walk of the directory tree, reading every file's declared
/// byte range in `chunk_size` pieces.
pub fn verify_structure<R: Read + Seek>(
    stream: &mut SectorStream<R>,
    volume: &VolumeDescriptor,
    chunk_size: usize,
    progress: &Progress,
) -> Result<VerifySummary> {
    set_operation(progress, "Verifying directory structure...");
    let volume_len = stream.volume_len();
    let mut summary = VerifySummary::default();
    let mut buf = vec![0u8; chunk_size.max(1)];
    let mut queue = BreadthFirst::new(volume.root_entry(), ());
    set_progress(progress, 0, volume_len);

    while let Some((path, directory, ())) = queue.next_directory() {
        check_cancel(progress)?;
        check_table_range(&directory, volume_len).map_err(|e| XisoError::integrity(&path, e))?;
        summary.directories += 1;

        let walk = walk_table(stream, &directory);
        if !walk.is_clean() {
            summary.corrupt_branches += walk.cycles + walk.out_of_bounds;
            log(
                progress,
                LogLevel::Warning,
                format!("{path}: directory tree is damaged; some entries were skipped"),
            );
        }

        for entry in walk.entries {
            check_cancel(progress)?;
            let entry_path = join_path(&path, &entry.name);
            if entry.is_directory() {
                if !queue.enqueue(entry_path.clone(), entry, ()) {
                    log(
                        progress,
                        LogLevel::Warning,
                        format!("{entry_path}: directory table already visited"),
                    );
                }
                continue;
            }
            set_operation(progress, format!("Verifying {entry_path}"));
            let read = read_entry_fully(stream, &entry, &entry_path, &mut buf, progress)
                .map_err(|e| XisoError::integrity(&entry_path, e))?;
            summary.files += 1;
            summary.bytes_verified += read;
            set_progress(progress, summary.bytes_verified.min(volume_len), volume_len);
        }
    }

    summary.corrupt_branches += queue.repeats();
    Ok(summary)
}

fn read_entry_fully<R: Read + Seek>(
    stream: &mut SectorStream<R>,
    entry: &DirectoryEntry,
    path: &str,
    buf: &mut [u8],
    progress: &Progress,
) -> Result<u64> {
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
        done += n as u64;
    }
    Ok(done)
}
