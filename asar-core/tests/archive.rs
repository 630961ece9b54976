use std::path::{Path, PathBuf};

use asar_core::asar::{Node, Stat};
use asar_core::error::HeaderError;
use asar_core::integrity::IntegrityPayload;
use asar_core::read::source::Backend;
use asar_core::write::{AsarWriter, FileOptions};
use asar_core::{Archive, AsarError, SecurityFailure, ValidationMode};

/// Assemble a container by hand: size pickle, header pickle, payload.
fn raw_container(json: &str, payload: &[u8]) -> Vec<u8> {
    let padded = json.len().div_ceil(4) * 4;
    let header_pickle_len = 4 + 4 + padded;

    let mut out = Vec::new();
    out.extend_from_slice(&4u32.to_le_bytes());
    out.extend_from_slice(&(header_pickle_len as u32).to_le_bytes());
    out.extend_from_slice(&((4 + padded) as u32).to_le_bytes());
    out.extend_from_slice(&(json.len() as u32).to_le_bytes());
    out.extend_from_slice(json.as_bytes());
    out.resize(8 + header_pickle_len, 0);
    out.extend_from_slice(payload);
    out
}

fn write_archive(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, bytes).unwrap();
    path
}

/// A small app tree built with the writer.
fn sample(dir: &Path, block_size: u32) -> (PathBuf, IntegrityPayload) {
    let mut w = AsarWriter::new().with_block_size(block_size).unwrap();
    w.add_file("package.json", br#"{"main":"lib/index.js"}"#.to_vec(), FileOptions::default())
        .unwrap();
    w.add_file("lib/index.js", b"console.log('hi')".to_vec(), FileOptions::default())
        .unwrap();
    w.add_file("lib/util/strings.js", vec![b'x'; 3000], FileOptions::default())
        .unwrap();
    w.add_file("bin/tool", b"#!/bin/sh\necho tool\n".to_vec(), FileOptions::default().executable(true))
        .unwrap();
    w.add_file("native/addon.node", b"ELF".to_vec(), FileOptions::default().unpacked(true))
        .unwrap();
    w.add_link("current", "lib").unwrap();
    w.add_link("tool-link", "bin/tool").unwrap();
    w.add_dir("empty").unwrap();

    let path = dir.join("app.asar");
    let file = std::fs::File::create(&path).unwrap();
    let integrity = w.finish(file).unwrap();

    let unpacked = dir.join("app.asar.unpacked/native");
    std::fs::create_dir_all(&unpacked).unwrap();
    std::fs::write(unpacked.join("addon.node"), b"ELF").unwrap();

    (path, integrity)
}

#[test]
fn test_round_trip_hand_made() {
    let dir = tempfile::tempdir().unwrap();
    let bytes = raw_container(r#"{"files":{"a.txt":{"size":5,"offset":"0"}}}"#, b"hello");
    let path = write_archive(dir.path(), "a.asar", &bytes);

    for backend in [Backend::Mmap, Backend::File] {
        let archive = Archive::builder().backend(backend).open(&path).unwrap();
        assert_eq!(archive.backend(), backend);
        let out = archive.copy_file_out("a.txt").unwrap().unwrap();
        assert_eq!(std::fs::read(&out).unwrap(), b"hello");
        assert_eq!(out.extension().unwrap(), "txt");
        assert_eq!(archive.read_file("a.txt").unwrap().unwrap(), b"hello");
    }
}

#[test]
fn test_empty_path_is_root() {
    let dir = tempfile::tempdir().unwrap();
    let (path, _) = sample(dir.path(), 1024);
    let archive = Archive::open(&path).unwrap();
    assert!(std::ptr::eq(archive.resolve("").unwrap(), archive.header().root()));
    assert_eq!(archive.stat("").unwrap(), Some(Stat::Directory));
}

#[test]
fn test_offsets_within_archive() {
    let dir = tempfile::tempdir().unwrap();
    let (path, _) = sample(dir.path(), 1024);
    let archive = Archive::open(&path).unwrap();
    let span = archive.header_span();

    for (entry, node) in archive.entries() {
        let Node::File(file) = node else { continue };
        let info = file.file_info(&entry, span, false).unwrap();
        if info.unpacked() {
            continue;
        }
        assert!(info.offset() >= span);
        assert!(info.offset() + info.size() <= archive.len(), "{entry} out of bounds");
    }
}

#[test]
fn test_links() {
    let dir = tempfile::tempdir().unwrap();
    let (path, _) = sample(dir.path(), 1024);
    let archive = Archive::open(&path).unwrap();

    assert_eq!(archive.stat("current").unwrap(), Some(Stat::Link));
    assert_eq!(archive.realpath("current").as_deref(), Some("lib"));
    assert_eq!(archive.read_file("current/index.js").unwrap().unwrap(), b"console.log('hi')");

    // a terminal link is followed by file_info
    let info = archive.file_info("tool-link").unwrap().unwrap();
    assert!(info.executable());
    assert_eq!(archive.read_file("tool-link").unwrap().unwrap(), b"#!/bin/sh\necho tool\n");
}

#[test]
fn test_readdir_top_level() {
    let dir = tempfile::tempdir().unwrap();
    let (path, _) = sample(dir.path(), 1024);
    let archive = Archive::open(&path).unwrap();

    let mut names = archive.readdir("").unwrap();
    names.sort();
    assert_eq!(
        names,
        ["bin", "current", "empty", "lib", "native", "package.json", "tool-link"]
    );
    let mut names = archive.readdir("current").unwrap();
    names.sort();
    assert_eq!(names, ["index.js", "util"]);
    assert_eq!(archive.readdir("empty").unwrap().len(), 0);
}

#[test]
fn test_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let (path, _) = sample(dir.path(), 1024);
    let archive = Archive::open(&path).unwrap();

    assert!(archive.resolve("missing/path").is_none());
    assert!(archive.file_info("missing/path").unwrap().is_none());
    assert!(archive.stat("missing/path").unwrap().is_none());
    assert!(archive.copy_file_out("missing/path").unwrap().is_none());
    assert!(archive.read_file("missing/path").unwrap().is_none());
    assert!(archive.readdir("missing").is_none());
    assert!(matches!(archive.file_info("lib"), Err(AsarError::NotAFile(_))));
}

#[test]
fn test_copy_out_is_cached() {
    let dir = tempfile::tempdir().unwrap();
    let (path, _) = sample(dir.path(), 1024);
    let archive = Archive::open(&path).unwrap();

    let first = archive.copy_file_out("lib/index.js").unwrap().unwrap();
    let second = archive.copy_file_out("lib//index.js").unwrap().unwrap();
    assert_eq!(first, second);
    drop(archive);
    assert!(!first.exists());
}

#[cfg(unix)]
#[test]
fn test_copy_out_executable() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().unwrap();
    let (path, _) = sample(dir.path(), 1024);
    let archive = Archive::open(&path).unwrap();

    let out = archive.copy_file_out("bin/tool").unwrap().unwrap();
    let mode = std::fs::metadata(&out).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o755);
}

#[test]
fn test_unpacked_entry() {
    let dir = tempfile::tempdir().unwrap();
    let (path, _) = sample(dir.path(), 1024);
    let archive = Archive::open(&path).unwrap();

    let info = archive.file_info("native/addon.node").unwrap().unwrap();
    assert!(info.unpacked());
    let expected = archive.path().parent().unwrap().join("app.asar.unpacked/native/addon.node");
    assert_eq!(archive.copy_file_out("native/addon.node").unwrap().unwrap(), expected);
    assert_eq!(archive.read_file("native/addon.node").unwrap().unwrap(), b"ELF");
    assert!(archive.open_entry(&info).is_err());
}

#[test]
fn test_concurrent_copy_out() {
    let dir = tempfile::tempdir().unwrap();
    let (path, _) = sample(dir.path(), 1024);
    let archive = Archive::builder().backend(Backend::File).open(&path).unwrap();

    let (a, b) = std::thread::scope(|s| {
        let a = s.spawn(|| archive.copy_file_out("lib/util/strings.js").unwrap().unwrap());
        let b = s.spawn(|| archive.copy_file_out("package.json").unwrap().unwrap());
        (a.join().unwrap(), b.join().unwrap())
    });
    assert_eq!(std::fs::read(a).unwrap(), vec![b'x'; 3000]);
    assert_eq!(std::fs::read(b).unwrap(), br#"{"main":"lib/index.js"}"#);

    // same path from many threads ends up with one cached file
    let paths: Vec<PathBuf> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..8)
            .map(|_| s.spawn(|| archive.copy_file_out("lib/index.js").unwrap().unwrap()))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    let cached = archive.copy_file_out("lib/index.js").unwrap().unwrap();
    assert!(paths.iter().all(|p| *p == cached));
    assert_eq!(std::fs::read(cached).unwrap(), b"console.log('hi')");
}

#[test]
fn test_integrity_enforced() {
    let dir = tempfile::tempdir().unwrap();
    let (path, header_integrity) = sample(dir.path(), 1024);
    let archive = Archive::builder().header_integrity(header_integrity).open(&path).unwrap();
    assert!(archive.header_validated());
    assert!(archive.integrity_enforced());

    let info = archive.file_info("lib/util/strings.js").unwrap().unwrap();
    assert_eq!(info.integrity().unwrap().blocks.len(), 3);
    let out = archive.copy_file_out("lib/util/strings.js").unwrap().unwrap();
    assert_eq!(std::fs::read(out).unwrap(), vec![b'x'; 3000]);
}

#[test]
fn test_tampered_content_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let (path, header_integrity) = sample(dir.path(), 1024);

    // flip one byte in the second block of lib/util/strings.js
    let info = Archive::open(&path).unwrap().file_info("lib/util/strings.js").unwrap().unwrap();
    let mut bytes = std::fs::read(&path).unwrap();
    bytes[(info.offset() + 1500) as usize] = b'y';
    std::fs::write(&path, &bytes).unwrap();

    let archive = Archive::builder().header_integrity(header_integrity).open(&path).unwrap();
    let err = archive.copy_file_out("lib/util/strings.js").unwrap_err();
    assert!(err.is_fatal());
    assert!(matches!(
        err,
        AsarError::Security(SecurityFailure::BlockMismatch { index: 1, .. })
    ));
    assert!(archive.read_file("lib/util/strings.js").unwrap_err().is_fatal());

    // untouched files still pass
    assert!(archive.read_file("package.json").unwrap().is_some());

    // without a trusted header nothing is checked
    let archive = Archive::open(&path).unwrap();
    assert!(archive.read_file("lib/util/strings.js").is_ok());
}

#[test]
fn test_tampered_header_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let (path, mut header_integrity) = sample(dir.path(), 1024);
    header_integrity.hash = "00".repeat(32);

    let err = Archive::builder().header_integrity(header_integrity).open(&path).unwrap_err();
    assert!(err.is_fatal());
}

#[test]
fn test_enforce_without_descriptors_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let bytes = raw_container(r#"{"files":{"a.txt":{"size":5,"offset":"0"}}}"#, b"hello");
    let path = write_archive(dir.path(), "a.asar", &bytes);

    let archive = Archive::builder().validation(ValidationMode::Enforce).open(&path).unwrap();
    assert!(!archive.header_validated());
    let err = archive.copy_file_out("a.txt").unwrap_err();
    assert!(matches!(err, AsarError::Security(SecurityFailure::MissingIntegrity { .. })));
}

#[test]
fn test_entry_past_end_of_archive() {
    let dir = tempfile::tempdir().unwrap();
    let bytes = raw_container(r#"{"files":{"a.txt":{"size":50,"offset":"0"}}}"#, b"hello");
    let path = write_archive(dir.path(), "short.asar", &bytes);

    let archive = Archive::open(&path).unwrap();
    assert!(matches!(
        archive.copy_file_out("a.txt"),
        Err(AsarError::InvalidEntryRange { size: 50, .. })
    ));
}

#[test]
fn test_malformed_entry_is_recoverable() {
    let dir = tempfile::tempdir().unwrap();
    let bytes = raw_container(
        r#"{"files":{"bad":{"offset":"0"},"good":{"size":2,"offset":"0"}}}"#,
        b"ok",
    );
    let path = write_archive(dir.path(), "m.asar", &bytes);

    let archive = Archive::open(&path).unwrap();
    let err = archive.file_info("bad").unwrap_err();
    assert!(matches!(err, AsarError::MalformedEntry { .. }));
    assert!(!err.is_fatal());
    assert_eq!(archive.read_file("good").unwrap().unwrap(), b"ok");
}

#[test]
fn test_open_failures() {
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
        Archive::open(dir.path().join("missing.asar")),
        Err(AsarError::HeaderRead(HeaderError::IO(e))) if e.kind() == std::io::ErrorKind::NotFound
    ));

    let path = write_archive(dir.path(), "garbage.asar", b"garbage!");
    assert!(matches!(Archive::open(&path), Err(AsarError::HeaderRead(_))));

    let bytes = raw_container("[]", b"");
    let path = write_archive(dir.path(), "array.asar", &bytes);
    assert!(matches!(Archive::open(&path), Err(AsarError::HeaderRead(_))));
}

#[test]
fn test_extract_all() {
    let dir = tempfile::tempdir().unwrap();
    let (path, header_integrity) = sample(dir.path(), 1024);
    let archive = Archive::builder().header_integrity(header_integrity).open(&path).unwrap();

    let out = dir.path().join("out");
    let report = archive.extractor(&out).threads(2).run().unwrap();
    assert_eq!(report.failed, 0, "{:?}", report.errors);

    assert_eq!(std::fs::read(out.join("lib/index.js")).unwrap(), b"console.log('hi')");
    assert_eq!(std::fs::read(out.join("native/addon.node")).unwrap(), b"ELF");
    assert!(out.join("empty").is_dir());

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        assert_eq!(report.extracted, 7);
        assert_eq!(std::fs::read_link(out.join("current")).unwrap(), Path::new("lib"));
        assert_eq!(std::fs::read(out.join("current/index.js")).unwrap(), b"console.log('hi')");
        assert_eq!(std::fs::read_link(out.join("tool-link")).unwrap(), Path::new("bin/tool"));
        let mode = std::fs::metadata(out.join("bin/tool")).unwrap().permissions().mode();
        assert_eq!(mode & 0o111, 0o111);
    }

    // existing files are kept unless overwriting
    let report = archive
        .extractor(&out)
        .parallel(false)
        .continue_on_error(true)
        .filter(|_, node| node.is_file())
        .run()
        .unwrap();
    assert_eq!(report.failed, 5);
    let report = archive.extractor(&out).overwrite(true).run().unwrap();
    assert_eq!(report.failed, 0);
}

#[test]
fn test_extract_stops_on_tampering() {
    let dir = tempfile::tempdir().unwrap();
    let (path, header_integrity) = sample(dir.path(), 1024);
    let info = Archive::open(&path).unwrap().file_info("package.json").unwrap().unwrap();
    let mut bytes = std::fs::read(&path).unwrap();
    bytes[info.offset() as usize] = b'[';
    std::fs::write(&path, &bytes).unwrap();

    let archive = Archive::builder().header_integrity(header_integrity).open(&path).unwrap();
    let err = archive
        .extractor(dir.path().join("out"))
        .continue_on_error(true)
        .run()
        .unwrap_err();
    assert!(err.is_fatal());
}

#[test]
fn test_extract_rejects_parent_segments() {
    let dir = tempfile::tempdir().unwrap();
    let bytes = raw_container(
        r#"{"files":{"..":{"files":{"evil.txt":{"size":4,"offset":"0"}}},"ok.txt":{"size":4,"offset":"0"}}}"#,
        b"pwnd",
    );
    let path = write_archive(dir.path(), "evil.asar", &bytes);
    let archive = Archive::open(&path).unwrap();
    let out = dir.path().join("sub/out");

    let err = archive.extractor(&out).run().unwrap_err();
    assert!(matches!(err, AsarError::MalformedEntry { .. }));
    assert!(!dir.path().join("sub/evil.txt").exists());

    let report = archive.extractor(&out).continue_on_error(true).run().unwrap();
    assert_eq!(report.extracted, 1);
    assert_eq!(report.failed, 2, "{:?}", report.errors);
    assert!(!dir.path().join("sub/evil.txt").exists());
    assert_eq!(std::fs::read(out.join("ok.txt")).unwrap(), b"pwnd");
}

#[test]
fn test_extract_rejects_separator_in_name() {
    let dir = tempfile::tempdir().unwrap();
    let bytes = raw_container(r#"{"files":{"../x.txt":{"size":4,"offset":"0"}}}"#, b"pwnd");
    let path = write_archive(dir.path(), "evil.asar", &bytes);
    let archive = Archive::open(&path).unwrap();
    let out = dir.path().join("sub/out");

    let report = archive.extractor(&out).continue_on_error(true).run().unwrap();
    assert_eq!(report.failed, 1);
    assert!(!dir.path().join("sub/x.txt").exists());
}

#[cfg(unix)]
#[test]
fn test_extract_rejects_escaping_link() {
    let dir = tempfile::tempdir().unwrap();
    let bytes = raw_container(r#"{"files":{"up":{"link":"../../etc"}}}"#, b"");
    let path = write_archive(dir.path(), "link.asar", &bytes);
    let archive = Archive::open(&path).unwrap();
    let out = dir.path().join("out");

    let report = archive.extractor(&out).continue_on_error(true).run().unwrap();
    assert_eq!(report.failed, 1);
    assert!(out.join("up").symlink_metadata().is_err());
}

#[test]
fn test_unpacked_path_stays_inside() {
    let dir = tempfile::tempdir().unwrap();
    let bytes = raw_container(r#"{"files":{"..":{"files":{"x":{"size":1,"unpacked":true}}}}}"#, b"");
    let path = write_archive(dir.path(), "u.asar", &bytes);
    let archive = Archive::open(&path).unwrap();

    assert!(matches!(archive.copy_file_out("../x"), Err(AsarError::MalformedEntry { .. })));
    assert!(matches!(archive.read_file("../x"), Err(AsarError::MalformedEntry { .. })));
    assert!(matches!(archive.unpacked_path("a/../b"), Err(AsarError::MalformedEntry { .. })));
}

#[cfg(unix)]
#[test]
fn test_unpacked_next_to_symlinked_archive() {
    let dir = tempfile::tempdir().unwrap();
    let bytes = raw_container(r#"{"files":{"n.node":{"size":3,"unpacked":true}}}"#, b"");
    std::fs::create_dir_all(dir.path().join("store")).unwrap();
    std::fs::create_dir_all(dir.path().join("app/app.asar.unpacked")).unwrap();
    let real = write_archive(&dir.path().join("store"), "real.asar", &bytes);
    std::fs::write(dir.path().join("app/app.asar.unpacked/n.node"), b"ELF").unwrap();
    let link = dir.path().join("app/app.asar");
    std::os::unix::fs::symlink(&real, &link).unwrap();

    let archive = Archive::open(&link).unwrap();
    assert_eq!(archive.path(), link);
    assert_eq!(
        archive.copy_file_out("n.node").unwrap().unwrap(),
        dir.path().join("app/app.asar.unpacked/n.node")
    );
    assert_eq!(archive.read_file("n.node").unwrap().unwrap(), b"ELF");
}
