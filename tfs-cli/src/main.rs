//! tfs image formatter and mount/dismount tool
mod logging;

use tfs::{BlockDevice, SyncReport, TinyFileSystem, SECTOR_SIZE};

use anyhow::{Context, Result};
use clap::{App, AppSettings, Arg, ArgMatches, SubCommand};
use log::{error, info};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::process;
use std::sync::{Arc, Mutex};

/// Disk image file, one sector per call
struct BlockFile {
    file: Mutex<File>,
    /// whole sectors in the file when it was opened
    blocks: usize,
}

impl BlockFile {
    fn new(file: File) -> io::Result<Self> {
        let blocks = file.metadata()?.len() as usize / SECTOR_SIZE;
        Ok(Self {
            file: Mutex::new(file),
            blocks,
        })
    }

    fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .with_context(|| format!("cannot open disk image {}", path.display()))?;
        Self::new(file).with_context(|| format!("cannot read size of {}", path.display()))
    }

    fn lock(&self) -> io::Result<std::sync::MutexGuard<'_, File>> {
        self.file
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "disk image lock poisoned"))
    }
}

impl BlockDevice for BlockFile {
    fn read_block(&self, block_id: usize, buf: &mut [u8]) -> io::Result<()> {
        let mut file = self.lock()?;
        file.seek(SeekFrom::Start((block_id * SECTOR_SIZE) as u64))?;
        file.read_exact(buf)
    }

    fn write_block(&self, block_id: usize, buf: &[u8]) -> io::Result<()> {
        let mut file = self.lock()?;
        file.seek(SeekFrom::Start((block_id * SECTOR_SIZE) as u64))?;
        file.write_all(buf)?;
        file.flush()
    }

    fn num_blocks(&self) -> usize {
        self.blocks
    }
}

fn main() {
    let matches = App::new("tfs-tool")
        .about("Create, mount and dismount TFS disk images")
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .multiple(true)
                .global(true)
                .help("Log more (repeat for debug and trace output)"),
        )
        .subcommand(
            SubCommand::with_name("mkfs")
                .about("Create an empty TFS disk image")
                .arg(Arg::with_name("disk_bin").required(true).help("Path to disk binary file"))
                .arg(Arg::with_name("boot_bin").required(true).help("Path to boot binary image"))
                .arg(Arg::with_name("sectors").required(true).help("Number of sectors on disk"))
                .arg(Arg::with_name("version").required(true).help("Version of TFS")),
        )
        .subcommand(
            SubCommand::with_name("mount")
                .about("Mount a TFS disk onto a directory, or dismount it back with -d")
                .arg(Arg::with_name("disk_bin").required(true).help("Path to disk binary file"))
                .arg(Arg::with_name("mount_point").required(true).help("Path to mount point"))
                .arg(
                    Arg::with_name("dismount")
                        .short("d")
                        .long("dismount")
                        .help("Move the mount point contents back into the disk"),
                ),
        )
        .get_matches();

    let verbosity = match matches.subcommand() {
        (_, Some(sub)) => sub.occurrences_of("verbose").max(matches.occurrences_of("verbose")),
        _ => matches.occurrences_of("verbose"),
    };
    if let Err(e) = logging::init(verbosity) {
        eprintln!("cannot install logger: {}", e);
    }

    let result = match matches.subcommand() {
        ("mkfs", Some(sub)) => mkfs(sub),
        ("mount", Some(sub)) => mount(sub),
        _ => unreachable!("clap requires a subcommand"),
    };
    if let Err(e) = result {
        error!("{:#}", e);
        process::exit(1);
    }
}

fn mkfs(args: &ArgMatches) -> Result<()> {
    let disk_path = Path::new(args.value_of("disk_bin").unwrap_or_default());
    let boot_path = Path::new(args.value_of("boot_bin").unwrap_or_default());
    let sectors: u64 = args
        .value_of("sectors")
        .unwrap_or_default()
        .parse()
        .context("sectors must be a number")?;
    let version: u32 = args
        .value_of("version")
        .unwrap_or_default()
        .parse()
        .context("version must be a number")?;

    let boot_code = fs::read(boot_path)
        .with_context(|| format!("cannot read boot image {}", boot_path.display()))?;
    create_image(disk_path, &boot_code, sectors, version)?;
    println!("{} bytes wrote.", sectors * SECTOR_SIZE as u64);
    Ok(())
}

/// Create (or truncate) the image file, size it and format it
fn create_image(disk_path: &Path, boot_code: &[u8], sectors: u64, version: u32) -> Result<()> {
    // refuse bad parameters before touching the file
    tfs::Header::new(version, sectors, boot_code).context("invalid image parameters")?;
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(disk_path)
        .with_context(|| format!("cannot create disk image {}", disk_path.display()))?;
    file.set_len(sectors.saturating_mul(SECTOR_SIZE as u64))
        .with_context(|| format!("cannot size disk image {}", disk_path.display()))?;
    let block_file = Arc::new(
        BlockFile::new(file)
            .with_context(|| format!("cannot read size of {}", disk_path.display()))?,
    );
    tfs::format(block_file, boot_code, sectors, version)
        .with_context(|| format!("cannot format {}", disk_path.display()))
}

fn mount(args: &ArgMatches) -> Result<()> {
    let disk_path = Path::new(args.value_of("disk_bin").unwrap_or_default());
    let mount_point = Path::new(args.value_of("mount_point").unwrap_or_default());
    let block_file = Arc::new(BlockFile::open(disk_path)?);
    let mut disk = TinyFileSystem::open(block_file)
        .with_context(|| format!("cannot open TFS disk {}", disk_path.display()))?;
    info!(
        "{}: version {}, {} sectors, {} free",
        disk_path.display(),
        disk.store().version(),
        disk.store().sector_count(),
        disk.store().free_sectors()
    );

    if args.is_present("dismount") {
        fs::create_dir_all(mount_point)
            .with_context(|| format!("cannot create mount point {}", mount_point.display()))?;
        let report = disk
            .dismount(mount_point)
            .with_context(|| format!("dismounting {} failed", mount_point.display()))?;
        print_report(&report);
    } else {
        if mount_point.exists() {
            fs::remove_dir_all(mount_point).with_context(|| {
                format!("cannot clear old mount point {}", mount_point.display())
            })?;
        }
        disk.mount(mount_point)
            .with_context(|| format!("mounting onto {} failed", mount_point.display()))?;
    }
    Ok(())
}

fn print_report(report: &SyncReport) {
    println!(
        "{} created, {} rewritten, {} deleted",
        report.created, report.rewritten, report.deleted
    );
    for skipped in &report.skipped {
        println!("Skipping file '{}'.", skipped.path.display());
    }
}

#[test]
fn tfs_image_file_test() -> Result<()> {
    let scratch = std::env::temp_dir().join(format!("tfs-cli-{:016x}", rand::random::<u64>()));
    let host = scratch.join("host");
    fs::create_dir_all(host.join("DOCS"))?;
    fs::write(host.join("README"), b"HELLO")?;
    fs::write(host.join("DOCS").join("A.TXT"), b"")?;
    let payload: Vec<u8> = (0..3000).map(|_| rand::random::<u8>()).collect();
    fs::write(host.join("DOCS").join("RAND.BIN"), &payload)?;

    let image = scratch.join("tfs.img");
    create_image(&image, &[0xF4], 64, 1)?;
    assert_eq!(fs::metadata(&image)?.len(), 64 * SECTOR_SIZE as u64);

    let mut tfs = TinyFileSystem::open(Arc::new(BlockFile::open(&image)?))?;
    let report = tfs.dismount(&host)?;
    assert_eq!(report.created, 4);

    let tfs = TinyFileSystem::open(Arc::new(BlockFile::open(&image)?))?;
    let out = scratch.join("mnt");
    tfs.mount(&out)?;
    assert_eq!(fs::read(out.join("README"))?, b"HELLO");
    assert_eq!(fs::read(out.join("DOCS").join("RAND.BIN"))?, payload);
    assert!(fs::read(out.join("DOCS").join("A.TXT"))?.is_empty());

    fs::remove_dir_all(&scratch)?;
    Ok(())
}

#[test]
fn block_file_counts_whole_sectors_at_open() -> Result<()> {
    let path = std::env::temp_dir().join(format!("tfs-cli-{:016x}.img", rand::random::<u64>()));
    let file = File::create(&path)?;
    file.set_len(3 * SECTOR_SIZE as u64 + 100)?;
    let block_file = BlockFile::open(&path)?;
    assert_eq!(block_file.num_blocks(), 3);
    let mut buf = [0u8; SECTOR_SIZE];
    block_file.read_block(2, &mut buf)?;
    assert!(block_file.read_block(3, &mut buf).is_err());
    fs::remove_file(&path)?;
    assert!(BlockFile::open(&path).is_err());
    Ok(())
}
