pub mod avl;
pub mod layout;
pub mod source;
pub mod writer;

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use crate::config::XisoConfig;
use crate::error::{BuildPhase, Result, XisoError};
use crate::fs::volume::detect_volume;
use crate::fs::SectorStream;
use crate::progress::{log, log_failure, set_operation, LogLevel, Progress};
use crate::verify::verify_structure;

pub use source::{BuildSource, SourceItem, SYSTEM_UPDATE_DIR};
use source::{enumerate_folder, scan_folder, scan_image};

/// Knobs for one rebuild.
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Leave the root-level `$SystemUpdate` directory out of the new image.
    pub skip_system_update: bool,
    /// Re-open the written image and walk it before reporting success.
    pub verify_after: bool,
    pub copy_chunk_size: usize,
    pub verify_chunk_size: usize,
    /// Descriptor timestamp for folder builds. Image builds keep the source's.
    pub creation_time: Option<u64>,
}

impl BuildOptions {
    pub fn from_config(config: &XisoConfig) -> Self {
        Self {
            skip_system_update: config.skip_system_update,
            verify_after: config.verify_after_build,
            copy_chunk_size: config.copy_chunk_size,
            verify_chunk_size: config.verify_chunk_size,
            creation_time: None,
        }
    }
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self::from_config(&XisoConfig::default())
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BuildSummary {
    pub directories: usize,
    pub files: usize,
    pub data_bytes: u64,
    pub image_bytes: u64,
    /// Paths left out by the skip rule.
    pub skipped: Vec<String>,
}

/// Write a canonical image of `source` to `destination`.
///
/// Failures come back as `XisoError::Build` tagged with the phase and the
/// offending path; cancellation comes back as `XisoError::Cancelled`. A
/// partially written destination is left in place for the caller to remove.
pub fn build(
    source: &BuildSource,
    destination: &Path,
    options: &BuildOptions,
    progress: &Progress,
) -> Result<BuildSummary> {
    let result = build_image(source, destination, options, progress);
    log_failure(progress, "Build", result)
}

fn build_image(
    source: &BuildSource,
    destination: &Path,
    options: &BuildOptions,
    progress: &Progress,
) -> Result<BuildSummary> {
    log(
        progress,
        LogLevel::Info,
        format!(
            "Building {} from {}",
            destination.display(),
            source.path().display()
        ),
    );
    let source_name = source.path().display().to_string();
    let reading = |e: XisoError| match e {
        XisoError::Build { .. } => e,
        e => XisoError::build(BuildPhase::ReadingSource, &source_name, e),
    };

    // Step 1: scan the source into per-directory AVL trees
    let mut image_stream = None;
    let mut tree = match source {
        BuildSource::Image(path) => {
            let mut stream = SectorStream::open(path).map_err(reading)?;
            let volume = detect_volume(&mut stream).map_err(reading)?;
            let tree = scan_image(&mut stream, &volume, options.skip_system_update, progress)
                .map_err(reading)?;
            image_stream = Some(stream);
            tree
        }
        BuildSource::Folder(path) => {
            let items = enumerate_folder(path).map_err(reading)?;
            scan_folder(
                path,
                &items,
                options.skip_system_update,
                options.creation_time.unwrap_or(0),
                progress,
            )
            .map_err(reading)?
        }
    };
    for path in &tree.skipped {
        log(progress, LogLevel::Info, format!("Skipped {path}"));
    }

    // Step 2: assign sectors
    set_operation(progress, "Computing layout...");
    let layout = layout::compute_layout(&mut tree.arena, tree.root).map_err(reading)?;
    log::debug!(
        "layout: {} tables, {} files, {} sectors",
        layout.tables.len(),
        layout.files.len(),
        layout.total_sectors
    );

    // Step 3: write
    let file = File::create(destination).map_err(|e| {
        XisoError::build(
            BuildPhase::WritingDestination,
            destination.display().to_string(),
            e.into(),
        )
    })?;
    let job = writer::WriteJob {
        arena: &tree.arena,
        layout: &layout,
        creation_time: tree.creation_time,
        source: image_stream.as_mut(),
        writer: writer::SectorWriter::new(BufWriter::new(file)),
        chunk_size: options.copy_chunk_size,
    };
    let image_bytes = job.run(progress)?;
    drop(image_stream);

    // Step 4: optional post-write walk of the new image
    if options.verify_after {
        set_operation(progress, "Verifying written image...");
        let verified = verify_written(destination, options.verify_chunk_size, progress);
        if let Err(e) = verified {
            let name = e
                .offending_name()
                .map(str::to_string)
                .unwrap_or_else(|| destination.display().to_string());
            return Err(XisoError::build(BuildPhase::PostWriteVerification, name, e));
        }
    }

    let summary = BuildSummary {
        directories: layout.tables.len(),
        files: layout.files.len(),
        data_bytes: layout.data_bytes,
        image_bytes,
        skipped: tree.skipped,
    };
    log(
        progress,
        LogLevel::Info,
        format!(
            "Build complete: {} directories, {} files, {} bytes",
            summary.directories, summary.files, summary.image_bytes
        ),
    );
    Ok(summary)
}

fn verify_written(path: &Path, chunk_size: usize, progress: &Progress) -> Result<()> {
    let mut stream = SectorStream::open(path)?;
    let volume = detect_volume(&mut stream)?;
    let summary = verify_structure(&mut stream, &volume, chunk_size, progress)?;
    if summary.corrupt_branches > 0 {
        return Err(XisoError::CorruptDirectoryTree(format!(
            "{} damaged branches in freshly written image",
            summary.corrupt_branches
        )));
    }
    Ok(())
}
