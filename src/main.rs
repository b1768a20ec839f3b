use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use rusty_xiso::config::XisoConfig;
use rusty_xiso::fs::{Filesystem, XdvdfsFilesystem};
use rusty_xiso::progress::{finish, LogLevel, OperationProgress, Progress};
use rusty_xiso::{
    build, extract_image, test_integrity, BuildOptions, BuildSource, DirectoryEntry,
    VerifyOptions, XisoError,
};

const POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Parser)]
#[command(
    name = "rusty-xiso",
    version = env!("APP_VERSION"),
    about = "Browse, verify and rebuild Xbox XDVDFS images"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show the volume descriptor of an image
    Info { image: PathBuf },
    /// List a directory inside an image
    List {
        image: PathBuf,
        #[arg(default_value = "/")]
        path: String,
        #[arg(short, long)]
        recursive: bool,
    },
    /// Check that every directory and file in an image can be read
    Verify {
        image: PathBuf,
        /// Also read every byte of the image file
        #[arg(long)]
        deep: bool,
    },
    /// Write a canonical XISO from an image or a folder
    Build {
        source: PathBuf,
        dest: PathBuf,
        /// Leave out the $SystemUpdate directory
        #[arg(long)]
        skip_update: bool,
        #[arg(long)]
        no_verify: bool,
    },
    /// Copy an image's contents into a folder
    Extract { image: PathBuf, dest: PathBuf },
    /// Write the active settings to the user config file
    InitConfig,
}

fn main() {
    let cli = Cli::parse();
    let config = XisoConfig::load();
    if let Err(e) = run(cli.command, &config) {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn run(command: Command, config: &XisoConfig) -> Result<()> {
    match command {
        Command::Info { image } => info(&image),
        Command::List {
            image,
            path,
            recursive,
        } => list(&image, &path, recursive),
        Command::Verify { image, deep } => {
            let options = VerifyOptions {
                deep_scan: deep || config.deep_scan,
                ..VerifyOptions::from_config(config)
            };
            let summary = run_with_progress(move |p| test_integrity(&image, &options, p))?;
            println!(
                "PASS: {} directories, {} files, {} bytes read",
                summary.directories, summary.files, summary.bytes_verified
            );
            if summary.corrupt_branches > 0 {
                println!(
                    "warning: {} damaged directory branches were skipped",
                    summary.corrupt_branches
                );
            }
            Ok(())
        }
        Command::Build {
            source,
            dest,
            skip_update,
            no_verify,
        } => {
            let source = if source.is_dir() {
                BuildSource::Folder(source)
            } else {
                BuildSource::Image(source)
            };
            let options = BuildOptions {
                skip_system_update: skip_update || config.skip_system_update,
                verify_after: config.verify_after_build && !no_verify,
                ..BuildOptions::from_config(config)
            };
            let out = dest.clone();
            let result = run_with_progress(move |p| build(&source, &out, &options, p));
            match result {
                Ok(summary) => {
                    println!(
                        "Wrote {}: {} directories, {} files, {} bytes",
                        dest.display(),
                        summary.directories,
                        summary.files,
                        summary.image_bytes
                    );
                    Ok(())
                }
                Err(e) => {
                    // Partial output is never a usable image.
                    if let Err(err) = remove_partial_output(&dest) {
                        eprintln!(
                            "warning: could not remove partial image {}: {err}",
                            dest.display()
                        );
                    }
                    Err(e)
                }
            }
        }
        Command::Extract { image, dest } => {
            let summary = run_with_progress(move |p| extract_image(&image, &dest, p))?;
            println!(
                "Extracted {} files ({} bytes)",
                summary.files, summary.bytes
            );
            for path in summary.skipped {
                println!("skipped: {path}");
            }
            Ok(())
        }
        Command::InitConfig => {
            let path = config.save()?;
            println!("Wrote {}", path.display());
            Ok(())
        }
    }
}

fn remove_partial_output(dest: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(dest) {
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        result => result,
    }
}

fn info(image: &Path) -> Result<()> {
    let fs = XdvdfsFilesystem::open_path(image)
        .with_context(|| format!("cannot open {}", image.display()))?;
    let (stream, volume) = fs.into_parts();
    println!("Filesystem:   XDVDFS");
    println!("Volume base:  {:#x}", stream.volume_base());
    println!("Volume size:  {} bytes", stream.volume_len());
    println!("Root table:   sector {} ({} bytes)", volume.root_sector, volume.root_size);
    match volume.created() {
        Some(created) => println!("Created:      {}", created.format("%Y-%m-%d %H:%M:%S UTC")),
        None => println!("Created:      unknown"),
    }
    Ok(())
}

fn list(image: &Path, path: &str, recursive: bool) -> Result<()> {
    let mut fs = XdvdfsFilesystem::open_path(image)
        .with_context(|| format!("cannot open {}", image.display()))?;
    let Some(start) = fs.find(path)? else {
        bail!("{path}: no such file or directory");
    };
    if !start.is_directory() {
        print_entry(&start, path);
        return Ok(());
    }

    let mut stack = vec![(path.trim_end_matches('/').to_string(), start)];
    while let Some((dir_path, dir)) = stack.pop() {
        let children = fs.list_directory(&dir)?;
        let mut subdirs = Vec::new();
        for child in children {
            let child_path = format!("{dir_path}/{}", child.name);
            print_entry(&child, &child_path);
            if recursive && child.is_directory() {
                subdirs.push((child_path, child));
            }
        }
        stack.extend(subdirs.into_iter().rev());
    }
    Ok(())
}

fn print_entry(entry: &DirectoryEntry, path: &str) {
    if entry.is_directory() {
        println!("{} {:>12}  {path}/", entry.attributes, "<DIR>");
    } else {
        println!("{} {:>12}  {path}", entry.attributes, entry.size);
    }
}

/// Run an engine operation on a worker thread, printing its progress and
/// log messages until it finishes.
fn run_with_progress<T, F>(op: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&Progress) -> rusty_xiso::Result<T> + Send + 'static,
{
    let progress = OperationProgress::shared();
    let worker_progress = progress.clone();
    let handle = thread::spawn(move || {
        let result = op(&worker_progress);
        finish(
            &worker_progress,
            result.as_ref().err().map(|e| e.to_string()),
        );
        result
    });

    while !handle.is_finished() {
        report(&progress);
        thread::sleep(POLL_INTERVAL);
    }
    report(&progress);
    eprintln!();

    let result = match handle.join() {
        Ok(result) => result,
        Err(_) => bail!("worker thread panicked"),
    };
    match result {
        Ok(value) => Ok(value),
        Err(XisoError::Cancelled) => bail!("operation cancelled"),
        Err(e) => Err(e.into()),
    }
}

fn report(progress: &Progress) {
    let Ok(mut p) = progress.lock() else {
        return;
    };
    while let Some(msg) = p.log_messages.pop_front() {
        let prefix = match msg.level {
            LogLevel::Info => "",
            LogLevel::Warning => "warning: ",
            LogLevel::Error => "error: ",
        };
        eprintln!("\r{prefix}{}", msg.message);
    }
    eprint!("\r{:>5.1}%  {:<60.60}", p.percent(), p.operation);
    let _ = std::io::stderr().flush();
}
