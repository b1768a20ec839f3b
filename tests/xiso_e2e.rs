//! End-to-end tests over real image files on disk.
//!
//! Images are built from small folders created in a temp dir:
//!   A/              directory
//!   B.TXT           "0123456789"
//! plus whatever extra content a test needs.
//!
//! Run with: cargo test --test xiso_e2e

use std::collections::BTreeMap;
use std::fs;
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::thread;

use rusty_xiso::fs::traversal::list_children;
use rusty_xiso::fs::{Filesystem, SectorStream, XdvdfsFilesystem, SECTOR_SIZE};
use rusty_xiso::progress::{request_cancel, OperationProgress};
use rusty_xiso::{build, extract_image, verify, BuildOptions, BuildPhase, BuildSource, XisoError};
use tempfile::TempDir;

fn sample_folder(tmp: &TempDir) -> PathBuf {
    let src = tmp.path().join("src");
    fs::create_dir_all(src.join("A")).unwrap();
    fs::write(src.join("B.TXT"), b"0123456789").unwrap();
    src
}

fn build_image(source: BuildSource, dest: &Path, skip_system_update: bool) {
    let options = BuildOptions {
        skip_system_update,
        ..BuildOptions::default()
    };
    let progress = OperationProgress::shared();
    build(&source, dest, &options, &progress)
        .unwrap_or_else(|e| panic!("build of {} failed: {e}", dest.display()));
}

/// Every path in the image mapped to its bytes (`None` for directories).
fn contents(image: &Path) -> BTreeMap<String, Option<Vec<u8>>> {
    let mut fs = XdvdfsFilesystem::open_path(image).unwrap();
    let mut out = BTreeMap::new();
    let mut stack = vec![(String::new(), fs.root().unwrap())];
    while let Some((path, dir)) = stack.pop() {
        for child in fs.list_directory(&dir).unwrap() {
            let child_path = format!("{path}/{}", child.name);
            if child.is_directory() {
                out.insert(child_path.clone(), None);
                stack.push((child_path, child));
            } else {
                let data = fs.read_file(&child, usize::MAX).unwrap();
                out.insert(child_path, Some(data));
            }
        }
    }
    out
}

// ============================================================================
// Listing
// ============================================================================

#[test]
fn test_root_listing_example() {
    let tmp = TempDir::new().unwrap();
    let image = tmp.path().join("sample.iso");
    build_image(BuildSource::Folder(sample_folder(&tmp)), &image, false);

    let mut fs = XdvdfsFilesystem::open_path(&image).unwrap();
    assert_eq!(fs.fs_type(), "XDVDFS");
    let root = fs.root().unwrap();
    let children = fs.list_directory(&root).unwrap();
    let listed: Vec<(&str, bool, u32)> = children
        .iter()
        .map(|e| (e.name.as_str(), e.is_directory(), e.size))
        .collect();
    assert_eq!(listed[0].0, "A");
    assert!(listed[0].1);
    assert_eq!(listed[1], ("B.TXT", false, 10));
    assert_eq!(listed.len(), 2);
}

#[test]
fn test_listing_is_sorted_and_unique() {
    let tmp = TempDir::new().unwrap();
    let src = tmp.path().join("src");
    fs::create_dir_all(&src).unwrap();
    for name in ["zeta", "Alpha", "mid.bin", "beta", "Omega", "c", "DEFAULT.XBE"] {
        fs::write(src.join(name), name.as_bytes()).unwrap();
    }
    let image = tmp.path().join("sorted.iso");
    build_image(BuildSource::Folder(src), &image, false);

    let mut fs = XdvdfsFilesystem::open_path(&image).unwrap();
    let root = fs.root().unwrap();
    let names: Vec<String> = fs
        .list_directory(&root)
        .unwrap()
        .into_iter()
        .map(|e| e.name)
        .collect();
    let mut expected = names.clone();
    expected.sort_by_key(|n| n.to_ascii_uppercase());
    expected.dedup();
    assert_eq!(names, expected);
    assert_eq!(names.len(), 7);
}

#[test]
fn test_find_and_stream_file() {
    let tmp = TempDir::new().unwrap();
    let src = sample_folder(&tmp);
    fs::write(src.join("A/NESTED.DAT"), vec![0xAB; 70_000]).unwrap();
    let image = tmp.path().join("nested.iso");
    build_image(BuildSource::Folder(src), &image, false);

    let mut fs = XdvdfsFilesystem::open_path(&image).unwrap();
    let entry = fs.find("/a/nested.dat").unwrap().unwrap();
    assert_eq!(entry.size, 70_000);
    let mut out = Vec::new();
    assert_eq!(fs.write_file_to(&entry, &mut out).unwrap(), 70_000);
    assert!(out.iter().all(|&b| b == 0xAB));
    assert_eq!(fs.read_file(&entry, 16).unwrap().len(), 16);
    assert!(fs.find("/A/MISSING").unwrap().is_none());
    assert!(fs.find("/B.TXT/below").unwrap().is_none());
}

#[test]
fn test_zero_byte_file() {
    let tmp = TempDir::new().unwrap();
    let without = tmp.path().join("without.iso");
    build_image(BuildSource::Folder(sample_folder(&tmp)), &without, false);

    let src = sample_folder(&tmp);
    fs::write(src.join("EMPTY.BIN"), b"").unwrap();
    let with = tmp.path().join("with.iso");
    build_image(BuildSource::Folder(src), &with, false);

    let mut fs = XdvdfsFilesystem::open_path(&with).unwrap();
    let entry = fs.find("/EMPTY.BIN").unwrap().unwrap();
    assert!(entry.is_file());
    assert_eq!(entry.size, 0);
    assert_eq!(entry.start_sector, 0);
    assert!(fs.read_file(&entry, usize::MAX).unwrap().is_empty());
    // No data sectors were spent on it.
    assert_eq!(
        fs::metadata(&with).unwrap().len(),
        fs::metadata(&without).unwrap().len()
    );
}

// ============================================================================
// Verify
// ============================================================================

#[test]
fn test_verify_built_image_shallow_and_deep() {
    let tmp = TempDir::new().unwrap();
    let image = tmp.path().join("sample.iso");
    build_image(BuildSource::Folder(sample_folder(&tmp)), &image, false);

    for deep in [false, true] {
        let progress = OperationProgress::shared();
        let summary = verify(&image, deep, &progress).unwrap();
        assert_eq!(summary.directories, 2);
        assert_eq!(summary.files, 1);
        assert_eq!(summary.bytes_verified, 10);
        assert_eq!(summary.corrupt_branches, 0);
        if deep {
            assert_eq!(summary.surface_bytes, fs::metadata(&image).unwrap().len());
        }
    }
}

#[test]
fn test_truncated_image_names_offending_file() {
    let tmp = TempDir::new().unwrap();
    let src = sample_folder(&tmp);
    fs::write(src.join("A/BIG.BIN"), vec![1u8; 5000]).unwrap();
    let image = tmp.path().join("trunc.iso");
    build_image(BuildSource::Folder(src), &image, false);

    // BIG.BIN is the last file written; cut into its data.
    let len = fs::metadata(&image).unwrap().len();
    let file = fs::OpenOptions::new().write(true).open(&image).unwrap();
    file.set_len(len - 2 * SECTOR_SIZE).unwrap();
    drop(file);

    let progress = OperationProgress::shared();
    let err = verify(&image, false, &progress).unwrap_err();
    assert!(matches!(err, XisoError::Integrity { .. }));
    assert_eq!(err.offending_name(), Some("/A/BIG.BIN"));

    let err = verify(&image, true, &progress).unwrap_err();
    assert_eq!(err.offending_name(), Some("/A/BIG.BIN"));
}

#[test]
fn test_not_an_image() {
    let tmp = TempDir::new().unwrap();
    let junk = tmp.path().join("junk.bin");
    fs::write(&junk, vec![0x5A; 40 * 2048]).unwrap();
    let progress = OperationProgress::shared();
    let err = verify(&junk, false, &progress).unwrap_err();
    assert!(matches!(err, XisoError::NotXdvdfsImage(_)));
    assert!(XdvdfsFilesystem::open_path(&junk).is_err());
}

#[test]
fn test_verify_cancelled() {
    let tmp = TempDir::new().unwrap();
    let image = tmp.path().join("sample.iso");
    build_image(BuildSource::Folder(sample_folder(&tmp)), &image, false);

    let progress = OperationProgress::shared();
    request_cancel(&progress);
    let err = verify(&image, true, &progress).unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(err.offending_name(), None);
}

// ============================================================================
// Corruption tolerance
// ============================================================================

#[test]
fn test_cycle_in_table_terminates() {
    let tmp = TempDir::new().unwrap();
    let src = tmp.path().join("src");
    fs::create_dir_all(&src).unwrap();
    for name in ["A", "B", "C", "D", "E", "F", "G"] {
        fs::write(src.join(name), name.as_bytes()).unwrap();
    }
    let image = tmp.path().join("cycle.iso");
    build_image(BuildSource::Folder(src), &image, false);

    // Seven sorted inserts give a perfect tree: D over B and F, A under B.
    // Point A's left reference back at its parent B.
    let (a, b, root_sector) = {
        let mut fs = XdvdfsFilesystem::open_path(&image).unwrap();
        let root = fs.root().unwrap();
        let children = fs.list_directory(&root).unwrap();
        let a = children.iter().find(|e| e.name == "A").unwrap().clone();
        let b = children.iter().find(|e| e.name == "B").unwrap().clone();
        assert_eq!((a.left, a.right), (None, None));
        (a, b, root.start_sector)
    };
    let mut file = fs::OpenOptions::new().write(true).open(&image).unwrap();
    file.seek(SeekFrom::Start(root_sector as u64 * SECTOR_SIZE + a.offset as u64))
        .unwrap();
    file.write_all(&((b.offset / 4) as u16).to_le_bytes()).unwrap();
    drop(file);

    let mut stream = SectorStream::open(&image).unwrap();
    let volume = rusty_xiso::fs::volume::detect_volume(&mut stream).unwrap();
    let names: Vec<String> = list_children(&mut stream, &volume.root_entry())
        .into_iter()
        .map(|e| e.name)
        .collect();
    assert_eq!(names, ["A", "B", "C", "D", "E", "F", "G"]);

    let progress = OperationProgress::shared();
    let summary = verify(&image, false, &progress).unwrap();
    assert!(summary.corrupt_branches >= 1);
    assert_eq!(summary.files, 7);
}

#[test]
fn test_embedded_volume_is_found() {
    let tmp = TempDir::new().unwrap();
    let plain = tmp.path().join("plain.iso");
    build_image(BuildSource::Folder(sample_folder(&tmp)), &plain, false);
    let data = fs::read(&plain).unwrap();

    // XGD3 layout: the filesystem starts 0x2080000 bytes into the file.
    let embedded = tmp.path().join("xgd3.iso");
    let mut file = fs::File::create(&embedded).unwrap();
    file.set_len(0x2080000).unwrap();
    file.seek(SeekFrom::Start(0x2080000)).unwrap();
    file.write_all(&data).unwrap();
    drop(file);

    let fs = XdvdfsFilesystem::open_path(&embedded).unwrap();
    let (stream, _) = fs.into_parts();
    assert_eq!(stream.volume_base(), 0x2080000);
    assert_eq!(contents(&embedded), contents(&plain));

    let progress = OperationProgress::shared();
    assert!(verify(&embedded, false, &progress).is_ok());
}

// ============================================================================
// Build
// ============================================================================

#[test]
fn test_rebuild_keeps_entries_with_either_skip_setting() {
    let tmp = TempDir::new().unwrap();
    let original = tmp.path().join("original.iso");
    build_image(BuildSource::Folder(sample_folder(&tmp)), &original, false);

    for skip in [true, false] {
        let rebuilt = tmp.path().join(format!("rebuilt-{skip}.iso"));
        build_image(BuildSource::Image(original.clone()), &rebuilt, skip);

        let mut fs = XdvdfsFilesystem::open_path(&rebuilt).unwrap();
        let root = fs.root().unwrap();
        let names: Vec<String> = fs
            .list_directory(&root)
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, ["A", "B.TXT"]);
        drop(fs);

        for deep in [false, true] {
            let progress = OperationProgress::shared();
            verify(&rebuilt, deep, &progress).unwrap();
        }
    }
}

#[test]
fn test_round_trip_and_idempotence() {
    let tmp = TempDir::new().unwrap();
    let src = sample_folder(&tmp);
    fs::create_dir_all(src.join("A/DEEP/ER")).unwrap();
    fs::create_dir_all(src.join("EMPTYDIR")).unwrap();
    fs::write(src.join("A/DEEP/ER/data.bin"), (0..9000u32).map(|i| i as u8).collect::<Vec<_>>())
        .unwrap();
    fs::write(src.join("default.xbe"), vec![7u8; 4096]).unwrap();

    let first = tmp.path().join("first.iso");
    let second = tmp.path().join("second.iso");
    let third = tmp.path().join("third.iso");
    build_image(BuildSource::Folder(src), &first, false);
    build_image(BuildSource::Image(first.clone()), &second, false);
    build_image(BuildSource::Image(second.clone()), &third, false);

    let progress = OperationProgress::shared();
    verify(&second, true, &progress).unwrap();

    let expected = contents(&first);
    assert_eq!(expected.get("/EMPTYDIR"), Some(&None));
    assert_eq!(expected["/B.TXT"].as_deref(), Some(&b"0123456789"[..]));
    assert_eq!(contents(&second), expected);
    // A canonical image rebuilds to itself.
    assert_eq!(fs::read(&second).unwrap(), fs::read(&third).unwrap());
}

#[test]
fn test_skip_rule_on_image_source() {
    let tmp = TempDir::new().unwrap();
    let src = sample_folder(&tmp);
    fs::create_dir_all(src.join("$SystemUpdate")).unwrap();
    fs::write(src.join("$SystemUpdate/xboxupd.bin"), vec![9u8; 10_000]).unwrap();
    let with_update = tmp.path().join("with.iso");
    build_image(BuildSource::Folder(src), &with_update, false);
    assert!(contents(&with_update).contains_key("/$SystemUpdate/xboxupd.bin"));

    let stripped = tmp.path().join("stripped.iso");
    build_image(BuildSource::Image(with_update.clone()), &stripped, true);
    let stripped_contents = contents(&stripped);
    assert!(!stripped_contents.keys().any(|k| k.starts_with("/$SystemUpdate")));
    assert_eq!(stripped_contents.len(), 2);
    assert!(fs::metadata(&stripped).unwrap().len() < fs::metadata(&with_update).unwrap().len());
}

#[test]
fn test_rebuild_fails_on_unreadable_source_table() {
    let tmp = TempDir::new().unwrap();
    let src = sample_folder(&tmp);
    fs::write(src.join("A/INNER.BIN"), b"inner").unwrap();
    let image = tmp.path().join("sample.iso");
    build_image(BuildSource::Folder(src), &image, false);

    // Point A's table far past the end of the image.
    let (a, root_sector) = {
        let mut fs = XdvdfsFilesystem::open_path(&image).unwrap();
        let root = fs.root().unwrap();
        let a = fs.find("/A").unwrap().unwrap();
        (a, root.start_sector)
    };
    let mut file = fs::OpenOptions::new().write(true).open(&image).unwrap();
    file.seek(SeekFrom::Start(
        root_sector as u64 * SECTOR_SIZE + a.offset as u64 + 4,
    ))
    .unwrap();
    file.write_all(&0x00FF_FFFFu32.to_le_bytes()).unwrap();
    drop(file);

    let progress = OperationProgress::shared();
    let err = verify(&image, false, &progress).unwrap_err();
    assert_eq!(err.offending_name(), Some("/A"));

    let summary = extract_image(&image, &tmp.path().join("out"), &progress).unwrap();
    assert_eq!(summary.skipped, ["/A"]);
    assert_eq!(summary.files, 1);

    let dest = tmp.path().join("rebuilt.iso");
    let err = build(
        &BuildSource::Image(image),
        &dest,
        &BuildOptions::default(),
        &progress,
    )
    .unwrap_err();
    assert_eq!(err.build_phase(), Some(BuildPhase::ReadingSource));
    assert_eq!(err.offending_name(), Some("/A"));
    assert!(!dest.exists());
}

#[test]
fn test_build_cancelled_is_not_a_failure() {
    let tmp = TempDir::new().unwrap();
    let image = tmp.path().join("sample.iso");
    build_image(BuildSource::Folder(sample_folder(&tmp)), &image, false);

    let progress = OperationProgress::shared();
    request_cancel(&progress);
    let err = build(
        &BuildSource::Image(image),
        &tmp.path().join("cancelled.iso"),
        &BuildOptions::default(),
        &progress,
    )
    .unwrap_err();
    assert!(matches!(err, XisoError::Cancelled));
    assert_eq!(err.build_phase(), None);
}

#[test]
fn test_build_cancelled_during_copy() {
    let tmp = TempDir::new().unwrap();
    let src = sample_folder(&tmp);
    let size = 32 * 1024 * 1024;
    fs::write(src.join("A/BIG.BIN"), vec![0x5A; size]).unwrap();
    let dest = tmp.path().join("cancelled.iso");
    let options = BuildOptions {
        copy_chunk_size: 4096,
        verify_after: false,
        ..BuildOptions::default()
    };

    let progress = OperationProgress::shared();
    let worker_progress = progress.clone();
    let worker_dest = dest.clone();
    let worker = thread::spawn(move || {
        build(&BuildSource::Folder(src), &worker_dest, &options, &worker_progress)
    });

    // Cancel as soon as file data starts flowing.
    while !worker.is_finished() {
        if progress.lock().unwrap().current_bytes > 0 {
            request_cancel(&progress);
            break;
        }
        thread::yield_now();
    }
    let err = worker.join().unwrap().unwrap_err();
    assert!(matches!(err, XisoError::Cancelled));
    assert_eq!(err.build_phase(), None);

    let copied = progress.lock().unwrap().current_bytes;
    assert!(copied > 0 && copied < size as u64);
    assert!(fs::metadata(&dest).unwrap().len() < size as u64);
}

#[test]
fn test_unwritable_destination_is_write_phase() {
    let tmp = TempDir::new().unwrap();
    let progress = OperationProgress::shared();
    let err = build(
        &BuildSource::Folder(sample_folder(&tmp)),
        &tmp.path().join("no/such/dir/out.iso"),
        &BuildOptions::default(),
        &progress,
    )
    .unwrap_err();
    assert_eq!(err.build_phase(), Some(BuildPhase::WritingDestination));
}

// ============================================================================
// Extract
// ============================================================================

#[test]
fn test_extract_recreates_tree() {
    let tmp = TempDir::new().unwrap();
    let src = sample_folder(&tmp);
    fs::write(src.join("A/INNER.BIN"), vec![3u8; 3000]).unwrap();
    let image = tmp.path().join("extract.iso");
    build_image(BuildSource::Folder(src), &image, false);

    let out = tmp.path().join("out");
    let progress = OperationProgress::shared();
    let summary = extract_image(&image, &out, &progress).unwrap();
    assert_eq!(summary.files, 2);
    assert_eq!(summary.bytes, 3010);
    assert!(summary.skipped.is_empty());
    assert_eq!(fs::read(out.join("B.TXT")).unwrap(), b"0123456789");
    assert_eq!(fs::read(out.join("A/INNER.BIN")).unwrap(), vec![3u8; 3000]);

    // The extracted folder rebuilds into an identical image.
    let again = tmp.path().join("again.iso");
    build_image(BuildSource::Folder(out), &again, false);
    assert_eq!(fs::read(&again).unwrap(), fs::read(&image).unwrap());
}
