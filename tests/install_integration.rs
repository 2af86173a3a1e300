use picotts_ng::installer::{
    extract_archive, ArchiveReader, ArchiveSource, BundledArchive, CompletionNotifier,
    InstallOutcome, InstallState, InstallStatus, Installer, InstallerHost, InstallerPhase,
};
use proptest::prelude::*;
use serial_test::serial;
use std::collections::BTreeMap;
use std::io::{self, Cursor, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use zip::CompressionMethod::{Deflated, Stored};

mockall::mock! {
    pub Host {}
    impl InstallerHost for Host {
        fn show_installing(&self);
        fn offer_retry(&self);
        fn close(&self);
    }
}

mockall::mock! {
    pub Notifier {}
    impl CompletionNotifier for Notifier {
        fn data_installed(&self, status: InstallStatus);
    }
}

fn build_langpack(
    dirs: &[String],
    files: &[(String, Vec<u8>)],
    method: zip::CompressionMethod,
) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default().compression_method(method);
    for dir in dirs {
        writer.add_directory(dir.as_str(), options).unwrap();
    }
    for (name, payload) in files {
        writer.start_file(name.as_str(), options).unwrap();
        writer.write_all(payload).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

/// Relative path -> contents (`None` for directories) of everything under `root`.
fn tree(root: &Path) -> BTreeMap<String, Option<Vec<u8>>> {
    fn walk(base: &Path, dir: &Path, out: &mut BTreeMap<String, Option<Vec<u8>>>) {
        for entry in std::fs::read_dir(dir).unwrap() {
            let path = entry.unwrap().path();
            let rel = path.strip_prefix(base).unwrap().to_string_lossy().into_owned();
            if path.is_dir() {
                out.insert(rel, None);
                walk(base, &path, out);
            } else {
                out.insert(rel, Some(std::fs::read(&path).unwrap()));
            }
        }
    }
    let mut out = BTreeMap::new();
    walk(root, root, &mut out);
    out
}

/// First open yields a copy with one entry's payload damaged, later opens the intact archive.
struct CorruptOnce {
    bytes: Vec<u8>,
    damaged: Vec<u8>,
    used: AtomicBool,
}

impl CorruptOnce {
    /// Flips a byte inside the payload of entry `index`, so its checksum fails on read.
    fn new(bytes: Vec<u8>, index: usize) -> Self {
        let data_start = zip::ZipArchive::new(Cursor::new(bytes.clone()))
            .unwrap()
            .by_index_raw(index)
            .unwrap()
            .data_start() as usize;
        let mut damaged = bytes.clone();
        damaged[data_start + 10] ^= 0xFF;
        Self {
            bytes,
            damaged,
            used: AtomicBool::new(false),
        }
    }
}

impl ArchiveSource for CorruptOnce {
    fn open(&self) -> io::Result<Box<dyn ArchiveReader>> {
        if self.used.swap(true, Ordering::SeqCst) {
            Ok(Box::new(Cursor::new(self.bytes.clone())))
        } else {
            Ok(Box::new(Cursor::new(self.damaged.clone())))
        }
    }

    fn describe(&self) -> String {
        "corrupt once".into()
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_extracts_exact_tree(
        dir_count in 0usize..4,
        payloads in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..2048), 1..6),
    ) {
        let dirs: Vec<String> = (0..dir_count).map(|i| format!("dir{}/", i)).collect();
        let files: Vec<(String, Vec<u8>)> = payloads
            .into_iter()
            .enumerate()
            .map(|(i, p)| (format!("lang/file{}.bin", i), p))
            .collect();
        let root = tempfile::tempdir().unwrap();

        let summary = extract_archive(Cursor::new(build_langpack(&dirs, &files, Deflated)), root.path()).unwrap();

        prop_assert_eq!(summary.files, files.len());
        prop_assert_eq!(summary.directories, dirs.len());
        let found = tree(root.path());
        for (name, payload) in &files {
            prop_assert_eq!(found.get(name), Some(&Some(payload.clone())));
        }
        for dir in &dirs {
            prop_assert_eq!(found.get(dir.trim_end_matches('/')), Some(&None));
        }
        // files plus their one parent plus the directory entries, nothing else
        prop_assert_eq!(found.len(), files.len() + 1 + dirs.len());
    }
}

#[test]
fn test_retry_after_failure_matches_clean_install() {
    let files: Vec<(String, Vec<u8>)> = (0..5u8)
        .map(|i| (format!("svox/voice{}.bin", i), vec![i; 30_000]))
        .collect();
    let archive = build_langpack(&["svox/".to_string()], &files, Stored);
    // entry 0 is the directory, so entry 3 is the third file
    let broken_entry = 3;

    let mut host = MockHost::new();
    host.expect_show_installing().times(2).return_const(());
    host.expect_offer_retry().times(1).return_const(());
    host.expect_close().times(1).return_const(());
    let mut notifier = MockNotifier::new();
    notifier
        .expect_data_installed()
        .with(mockall::predicate::eq(InstallStatus::Success))
        .times(1)
        .return_const(());

    let root = tempfile::tempdir().unwrap();
    let installer = Installer::new(
        Arc::new(InstallState::new()),
        Arc::new(CorruptOnce::new(archive.clone(), broken_entry)),
        Arc::new(host),
        Arc::new(notifier),
    );

    let first = installer.on_root_resolved(root.path().to_path_buf()).unwrap();
    assert_eq!(first.join().unwrap(), InstallOutcome::Failure);
    assert_eq!(installer.phase(), InstallerPhase::AwaitingRetry);

    // exactly the entries ahead of the damaged one, nothing half written
    let mut expected = BTreeMap::new();
    expected.insert("svox".to_string(), None);
    for (name, payload) in &files[..broken_entry - 1] {
        expected.insert(name.clone(), Some(payload.clone()));
    }
    assert_eq!(tree(root.path()), expected);

    let second = installer.retry().unwrap();
    assert_eq!(second.join().unwrap(), InstallOutcome::Success);

    let clean = tempfile::tempdir().unwrap();
    extract_archive(Cursor::new(archive), clean.path()).unwrap();
    assert_eq!(tree(root.path()), tree(clean.path()));
}

#[test]
#[serial]
fn test_shared_state_blocks_second_installer_until_reset() {
    let state = InstallState::shared();
    state.reset();

    let archive = Arc::new(BundledArchive::new(build_langpack(
        &[],
        &[("en-US_ta.bin".to_string(), b"ta".to_vec())],
        Deflated,
    )));

    let mut host = MockHost::new();
    host.expect_show_installing().times(1).return_const(());
    host.expect_close().times(1).return_const(());
    let mut notifier = MockNotifier::new();
    notifier.expect_data_installed().times(1).return_const(());

    let root = tempfile::tempdir().unwrap();
    let first = Installer::new(state.clone(), archive.clone(), Arc::new(host), Arc::new(notifier));
    first
        .on_root_resolved(root.path().to_path_buf())
        .unwrap()
        .join()
        .unwrap();

    // a second front end in the same process finds the data already installed
    let mut idle_host = MockHost::new();
    idle_host.expect_show_installing().times(0);
    let second = Installer::new(
        state.clone(),
        archive,
        Arc::new(idle_host),
        Arc::new(MockNotifier::new()),
    );
    assert!(second.on_root_resolved(root.path().to_path_buf()).is_none());
    assert_eq!(second.phase(), InstallerPhase::AwaitingRoot);

    state.reset();
    assert_eq!(state.last_result(), InstallOutcome::Unknown);
}
