use std::fs;

use basewarden::bundler::{Bundler, ParentBackup};
use basewarden::config::Config;
use basewarden::lsn::Lsn;
use basewarden::restore::RestoreDriver;
use basewarden::sentinel::Sentinel;
use basewarden::store::local_fs::LocalFsStore;
use basewarden::store::Store;
use tempfile::tempdir;

const BLOCK_SIZE: usize = 8192;

fn make_valid_page(lsn: u64) -> Vec<u8> {
    let mut page = vec![0u8; BLOCK_SIZE];
    page[0..4].copy_from_slice(&((lsn >> 32) as u32).to_le_bytes());
    page[4..8].copy_from_slice(&((lsn & 0xFFFF_FFFF) as u32).to_le_bytes());
    page[12..14].copy_from_slice(&24u16.to_le_bytes());
    page[14..16].copy_from_slice(&24u16.to_le_bytes());
    page[16..18].copy_from_slice(&(BLOCK_SIZE as u16).to_le_bytes());
    page[18..20].copy_from_slice(&((BLOCK_SIZE as u16).wrapping_add(4)).to_le_bytes());
    page
}

fn assert_dirs_equal(dir1: &std::path::Path, dir2: &std::path::Path) {
    let entries1: Vec<_> = fs::read_dir(dir1)
        .unwrap()
        .map(|r| r.unwrap().path())
        .filter(|p| p.is_file())
        .collect();
    for path1 in &entries1 {
        let file_name = path1.file_name().unwrap();
        let path2 = dir2.join(file_name);
        assert!(path2.exists(), "{:?} missing from restored tree", file_name);
        assert_eq!(
            fs::read(path1).unwrap(),
            fs::read(&path2).unwrap(),
            "content differs for {:?}",
            file_name
        );
    }
}

#[test]
fn full_backup_round_trip() {
    let source = tempdir().unwrap();
    fs::write(source.path().join("a.page"), make_valid_page(100).repeat(1)).unwrap();
    fs::write(source.path().join("b.txt"), b"hello world").unwrap();

    let store_dir = tempdir().unwrap();
    let store = LocalFsStore::new(store_dir.path());
    let config = Config::default();
    let bundler = Bundler::new(&config, None, &store);

    bundler
        .bundle(source.path(), "base_000000010000000000000001", Lsn(100), Lsn(100), None, &[])
        .unwrap();

    let restore_dir = tempdir().unwrap();
    let driver = RestoreDriver::new(&config, None, &store);
    driver
        .restore("base_000000010000000000000001", restore_dir.path())
        .unwrap();

    assert_dirs_equal(source.path(), restore_dir.path());
}

#[test]
fn incremental_backup_marks_skipped_and_incremented_files() {
    let source = tempdir().unwrap();
    let mut page_file = Vec::new();
    for i in 0..4u64 {
        page_file.extend_from_slice(&make_valid_page(100 + i));
    }
    fs::write(source.path().join("a.page"), &page_file).unwrap();
    fs::write(source.path().join("b.txt"), b"unchanged").unwrap();

    let store_dir = tempdir().unwrap();
    let store = LocalFsStore::new(store_dir.path());
    let config = Config::default();
    let bundler = Bundler::new(&config, None, &store);

    let full_sentinel = bundler
        .bundle(source.path(), "base_full", Lsn(100), Lsn(100), None, &[])
        .unwrap();

    // Modify block 2's LSN to mark it changed relative to the full backup.
    let mut modified = page_file.clone();
    let bumped = make_valid_page(500);
    modified[2 * BLOCK_SIZE..3 * BLOCK_SIZE].copy_from_slice(&bumped);
    fs::write(source.path().join("a.page"), &modified).unwrap();
    // Touch b.txt's mtime so the skip check (same size+mtime) still holds
    // only if we leave it untouched — so we deliberately do NOT rewrite it.

    let incr_sentinel = bundler
        .bundle(
            source.path(),
            "incr_1",
            Lsn(100),
            Lsn(200),
            Some(ParentBackup {
                name: "base_full",
                sentinel: &full_sentinel,
            }),
            &[],
        )
        .unwrap();

    assert!(incr_sentinel.files.get("a.page").unwrap().is_incremented);
    assert!(incr_sentinel.files.get("b.txt").unwrap().is_skipped);

    let restore_dir = tempdir().unwrap();
    let driver = RestoreDriver::new(&config, None, &store);
    driver.restore("incr_1", restore_dir.path()).unwrap();

    assert_dirs_equal(source.path(), restore_dir.path());
}

#[test]
fn latest_resolution_ignores_backups_without_a_sentinel() {
    let store_dir = tempdir().unwrap();
    let store = LocalFsStore::new(store_dir.path());
    let config = Config::default();

    let source = tempdir().unwrap();
    fs::write(source.path().join("f"), b"data").unwrap();
    let bundler = Bundler::new(&config, None, &store);
    bundler
        .bundle(source.path(), "base_a", Lsn(1), Lsn(1), None, &[])
        .unwrap();
    bundler
        .bundle(source.path(), "base_b", Lsn(1), Lsn(5), None, &[])
        .unwrap();

    let driver = RestoreDriver::new(&config, None, &store);
    assert_eq!(driver.resolve_latest().unwrap(), "base_b");
}

#[test]
fn sentinel_linearization_hides_crashed_backup_from_latest() {
    let store_dir = tempdir().unwrap();
    let store = LocalFsStore::new(store_dir.path());

    // Simulate a crash after members upload but before the sentinel is put:
    // only member objects exist, no sentinel.
    store
        .put_object("crashed/tar_partitions/part_000.lz4", &mut &b""[..])
        .unwrap();

    let config = Config::default();
    let driver = RestoreDriver::new(&config, None, &store);
    assert!(driver.resolve_latest().is_err());
    let _ = Sentinel::new_full(Lsn(0)); // sanity: type is constructible
}
