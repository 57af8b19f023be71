// Mount/dismount tests against real host directories
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tfs::{
    data_next, data_payload, NodeKind, RamDisk, SyncState, TfsError, TinyFileSystem, Tree,
    DATA_PAYLOAD_SZ, DIR_SIZE, FREE_MARKER, ROOT_SECTOR,
};

/// Scratch directory removed on drop
struct Scratch(PathBuf);

impl Scratch {
    fn new() -> Self {
        let path = env::temp_dir().join(format!("tfs-test-{:016x}", rand::random::<u64>()));
        fs::create_dir_all(&path).unwrap();
        Self(path)
    }

    fn dir(&self, rel: &str) -> PathBuf {
        let path = self.0.join(rel);
        fs::create_dir_all(&path).unwrap();
        path
    }

    fn file(&self, rel: &str, data: &[u8]) -> PathBuf {
        let path = self.0.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, data).unwrap();
        path
    }
}

impl Drop for Scratch {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.0);
    }
}

fn image(sectors: usize) -> (Arc<RamDisk>, TinyFileSystem) {
    let disk = Arc::new(RamDisk::new(sectors));
    let fs = TinyFileSystem::create(disk.clone(), &[], sectors as u64, 1).unwrap();
    (disk, fs)
}

/// Relative path -> file contents (None for directories)
fn snapshot(root: &Path) -> BTreeMap<PathBuf, Option<Vec<u8>>> {
    fn walk(root: &Path, dir: &Path, out: &mut BTreeMap<PathBuf, Option<Vec<u8>>>) {
        for entry in fs::read_dir(dir).unwrap() {
            let path = entry.unwrap().path();
            let rel = path.strip_prefix(root).unwrap().to_path_buf();
            if path.is_dir() {
                out.insert(rel, None);
                walk(root, &path, out);
            } else {
                out.insert(rel, Some(fs::read(&path).unwrap()));
            }
        }
    }
    let mut out = BTreeMap::new();
    walk(root, root, &mut out);
    out
}

fn random_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|_| rand::random::<u8>()).collect()
}

#[test]
fn readme_and_docs_scenario() {
    let scratch = Scratch::new();
    let host = scratch.dir("host");
    scratch.file("host/README", b"HELLO");
    scratch.file("host/DOCS/A.TXT", b"");

    let (disk, mut fs) = image(16);
    let report = fs.dismount(&host).unwrap();
    assert_eq!(report.created, 3);
    assert!(report.is_complete());

    let fs = TinyFileSystem::open(disk).unwrap();
    let tree = fs.tree();
    let entries = tree.entries(Tree::ROOT);
    assert_eq!(entries.len(), 2);
    let readme = entries.iter().find(|e| e.name.as_str() == "README").unwrap();
    assert_eq!(readme.size, 5);
    let docs = entries.iter().find(|e| e.name.as_str() == "DOCS").unwrap();
    assert_eq!(docs.size, DIR_SIZE);

    let block = fs.store().read_sector(readme.start_sector).unwrap();
    assert_eq!(&data_payload(&block)[..5], b"HELLO");
    assert_eq!(data_next(&block), 0);

    let a = tree.lookup("DOCS/A.TXT").unwrap();
    assert_eq!(tree.node(a).kind, NodeKind::File { size: 0 });

    let out = scratch.0.join("out");
    fs.mount(&out).unwrap();
    assert_eq!(snapshot(&out), snapshot(&host));
}

#[test]
fn dismount_twice_is_idempotent() {
    let scratch = Scratch::new();
    let host = scratch.dir("host");
    scratch.file("host/BIG.BIN", &random_bytes(3 * DATA_PAYLOAD_SZ + 17));
    scratch.file("host/SUB/ONE", b"1");
    scratch.file("host/SUB/DEEP/TWO", &random_bytes(DATA_PAYLOAD_SZ));
    scratch.dir("host/EMPTY");

    let (disk, mut fs) = image(64);
    fs.dismount(&host).unwrap();
    let first = disk.to_vec();
    let report = fs.dismount(&host).unwrap();
    assert_eq!((report.created, report.deleted), (0, 0));
    assert_eq!(report.rewritten, 3);
    assert_eq!(disk.to_vec(), first);

    // a fresh open sees the same tree and keeps it stable too
    let mut fs = TinyFileSystem::open(disk.clone()).unwrap();
    fs.dismount(&host).unwrap();
    assert_eq!(disk.to_vec(), first);
}

#[test]
fn mount_reproduces_dismounted_tree() {
    let scratch = Scratch::new();
    let host = scratch.dir("host");
    for (i, len) in [0, 1, 506, 507, 508, 2000].iter().enumerate() {
        scratch.file(&format!("host/F{i}.DAT"), &random_bytes(*len));
        scratch.file(&format!("host/D{i}/INNER-{i}"), &random_bytes(*len / 2));
    }
    scratch.dir("host/D0/EMPTY");

    let (disk, mut fs) = image(128);
    fs.dismount(&host).unwrap();

    let fs = TinyFileSystem::open(disk).unwrap();
    let out = scratch.0.join("mnt");
    fs.mount(&out).unwrap();
    assert_eq!(snapshot(&out), snapshot(&host));
}

#[test]
fn removed_host_entries_are_deleted_from_disk() {
    let scratch = Scratch::new();
    let host = scratch.dir("host");
    // a directory, so nothing is reallocated into the freed sectors
    scratch.dir("host/KEEP");
    scratch.file("host/GONE", &random_bytes(DATA_PAYLOAD_SZ + 1));
    scratch.file("host/OLD/X", b"x");

    let (disk, mut fs) = image(32);
    fs.dismount(&host).unwrap();
    let gone = fs.tree().lookup("GONE").unwrap();
    let gone_sectors = {
        let start = fs.tree().node(gone).sector;
        let next = data_next(&fs.store().read_sector(start).unwrap());
        [start, next]
    };
    let old = fs.tree().lookup("OLD").unwrap();
    let old_sector = fs.tree().node(old).sector;
    let x_sector = fs.tree().node(fs.tree().lookup("OLD/X").unwrap()).sector;

    fs::remove_file(host.join("GONE")).unwrap();
    fs::remove_dir_all(host.join("OLD")).unwrap();
    let report = fs.dismount(&host).unwrap();
    assert_eq!(report.deleted, 3);
    assert_eq!(fs.tree().node(gone).state, SyncState::Deleted);

    for sector in gone_sectors.iter().chain([old_sector, x_sector].iter()) {
        assert_eq!(fs.store().read_sector(*sector).unwrap()[0], FREE_MARKER, "sector {sector}");
    }
    let reopened = TinyFileSystem::open(disk).unwrap();
    let names: Vec<String> = reopened
        .tree()
        .entries(Tree::ROOT)
        .iter()
        .map(|e| e.name.to_string())
        .collect();
    assert_eq!(names, vec!["KEEP".to_string()]);
}

#[test]
fn changed_file_is_rewritten() {
    let scratch = Scratch::new();
    let host = scratch.dir("host");
    let file = scratch.file("host/NOTE", b"short");

    let (disk, mut fs) = image(16);
    fs.dismount(&host).unwrap();
    let long = random_bytes(2 * DATA_PAYLOAD_SZ + 3);
    fs::write(&file, &long).unwrap();
    fs.dismount(&host).unwrap();

    let fs = TinyFileSystem::open(disk).unwrap();
    let note = fs.tree().lookup("NOTE").unwrap();
    assert_eq!(fs.read_file(note).unwrap(), long);
    // 1 header + 1 root + 3 data sectors
    assert_eq!(fs.store().free_sectors(), 16 - 5);
}

#[test]
fn invalid_names_are_skipped_and_siblings_kept() {
    let scratch = Scratch::new();
    let host = scratch.dir("host");
    scratch.file("host/TOOLONGNAME", b"1");
    scratch.file("host/lower", b"2");
    scratch.file("host/GOOD", b"3");
    scratch.file("host/SUB/bad.txt", b"4");
    scratch.file("host/SUB/FINE", b"5");

    let (_, mut fs) = image(16);
    let report = fs.dismount(&host).unwrap();
    assert_eq!(report.skipped.len(), 3);
    assert!(report
        .skipped
        .iter()
        .all(|s| matches!(s.reason, TfsError::InvalidName { .. })));
    assert!(report.skipped.iter().any(|s| s.path == host.join("TOOLONGNAME")));
    assert!(report.skipped.iter().any(|s| s.path == host.join("SUB").join("bad.txt")));

    let tree = fs.tree();
    assert!(tree.lookup("GOOD").is_some());
    assert!(tree.lookup("SUB/FINE").is_some());
    assert_eq!(tree.len(), 3);
}

#[test]
fn thirty_second_entry_fails_with_directory_full() {
    let scratch = Scratch::new();
    let host = scratch.dir("host");
    for i in 0..32 {
        scratch.file(&format!("host/F{i:02}"), b"");
    }
    let (_, mut fs) = image(64);
    assert!(matches!(fs.dismount(&host), Err(TfsError::DirectoryFull { sector: ROOT_SECTOR, .. })));
}

#[test]
fn running_out_of_sectors_aborts() {
    let scratch = Scratch::new();
    let host = scratch.dir("host");
    scratch.file("host/HUGE", &random_bytes(10 * DATA_PAYLOAD_SZ));
    let (_, mut fs) = image(8);
    assert!(matches!(fs.dismount(&host), Err(TfsError::DiskFull)));
}

#[test]
fn file_turned_directory_is_replaced() {
    let scratch = Scratch::new();
    let host = scratch.dir("host");
    scratch.file("host/THING", b"was a file");
    scratch.file("host/OTHER", b"stays");

    let (disk, mut fs) = image(16);
    fs.dismount(&host).unwrap();
    fs::remove_file(host.join("THING")).unwrap();
    scratch.file("host/THING/INSIDE", b"now a dir");
    let report = fs.dismount(&host).unwrap();
    assert_eq!(report.rewritten, 2);

    let fs = TinyFileSystem::open(disk).unwrap();
    let thing = fs.tree().lookup("THING").unwrap();
    assert!(fs.tree().node(thing).is_dir());
    let out = scratch.0.join("out");
    fs.mount(&out).unwrap();
    assert_eq!(snapshot(&out), snapshot(&host));
}

#[test]
fn dismount_needs_an_existing_mount_point() {
    let scratch = Scratch::new();
    let (_, mut fs) = image(8);
    assert!(matches!(
        fs.dismount(&scratch.0.join("missing")),
        Err(TfsError::Host { .. })
    ));
}

#[test]
fn mount_leaves_the_image_untouched() {
    let scratch = Scratch::new();
    let host = scratch.dir("host");
    scratch.file("host/A/B/C", b"abc");
    let (disk, mut fs) = image(16);
    fs.dismount(&host).unwrap();
    let before = disk.to_vec();
    fs.mount(&scratch.0.join("out")).unwrap();
    assert_eq!(disk.to_vec(), before);
    assert_eq!(fs.tree().node(Tree::ROOT).sector, ROOT_SECTOR);
}

#[test]
fn oversized_files_are_skipped_and_old_contents_kept() {
    let scratch = Scratch::new();
    let host = scratch.dir("host");
    let big = scratch.file("host/BIG", b"small");
    scratch.file("host/GOOD", b"ok");

    let (disk, mut fs) = image(16);
    fs.dismount(&host).unwrap();

    // sparse files, nothing is actually written to the host disk
    fs::File::create(&big).unwrap().set_len(0x1_0000_0000).unwrap();
    let huge = scratch.file("host/HUGE", b"");
    fs::File::create(&huge).unwrap().set_len(0x1_0000_0000).unwrap();
    scratch.file("host/NEW", b"new");

    let report = fs.dismount(&host).unwrap();
    assert_eq!(report.created, 1);
    assert_eq!(report.skipped.len(), 2);
    assert!(report
        .skipped
        .iter()
        .all(|s| matches!(s.reason, TfsError::InvalidSize { size: 0x1_0000_0000 })));
    assert!(report.skipped.iter().any(|s| s.path == big));
    assert!(report.skipped.iter().any(|s| s.path == huge));

    let fs = TinyFileSystem::open(disk).unwrap();
    let tree = fs.tree();
    assert!(tree.lookup("HUGE").is_none());
    assert_eq!(fs.read_file(tree.lookup("BIG").unwrap()).unwrap(), b"small");
    assert_eq!(fs.read_file(tree.lookup("GOOD").unwrap()).unwrap(), b"ok");
    assert_eq!(fs.read_file(tree.lookup("NEW").unwrap()).unwrap(), b"new");
}

#[test]
fn directory_turned_file_is_replaced() {
    let scratch = Scratch::new();
    let host = scratch.dir("host");
    scratch.file("host/D/IN", &random_bytes(DATA_PAYLOAD_SZ + 93));
    scratch.file("host/OTHER", b"stays");

    let (disk, mut fs) = image(16);
    fs.dismount(&host).unwrap();
    let inner = fs.tree().lookup("D/IN").unwrap();
    // header, root, two IN sectors, D, OTHER
    assert_eq!(fs.store().free_sectors(), 16 - 6);

    fs::remove_dir_all(host.join("D")).unwrap();
    scratch.file("host/D", b"now file");
    let report = fs.dismount(&host).unwrap();
    // D is replaced and OTHER rewritten
    assert_eq!((report.rewritten, report.deleted, report.created), (2, 1, 0));
    assert_eq!(fs.tree().node(inner).state, SyncState::Deleted);
    // header, root, D, OTHER
    assert_eq!(fs.store().free_sectors(), 16 - 4);

    let fs = TinyFileSystem::open(disk).unwrap();
    let d = fs.tree().lookup("D").unwrap();
    assert!(!fs.tree().node(d).is_dir());
    assert_eq!(fs.read_file(d).unwrap(), b"now file");
    assert_eq!(fs.tree().len(), 2);
    let out = scratch.0.join("out");
    fs.mount(&out).unwrap();
    assert_eq!(snapshot(&out), snapshot(&host));
}
