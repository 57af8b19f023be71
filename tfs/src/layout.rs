use core::fmt::{self, Debug, Display, Formatter};

use crate::{Result, TfsError, SECTOR_SIZE};

/* Some constants */
/// One whole sector
pub type Block = [u8; SECTOR_SIZE];
/// Jump instruction opening the boot sector
pub const BOOT_JUMP: [u8; 2] = [0xEB, 0x06];
/// Boot sector trailer, stored little-endian at offset 510
pub const BOOT_TRAILER: u16 = 0xAA55;
/// Room for boot code between the header fields and the trailer
pub const BOOT_CODE_SZ: usize = 502;
// Status bytes, the first byte of every sector
/// Unused sector
pub const FREE_MARKER: u8 = 0x00;
/// Directory sector
pub const DIR_MARKER: u8 = b'>';
/// File data sector
pub const DATA_MARKER: u8 = b'&';
/// Deleted directory record
pub const TOMBSTONE_MARKER: u8 = b' ';
/// Sector of the image header
pub const HEADER_SECTOR: u32 = 0;
/// Sector of the root directory
pub const ROOT_SECTOR: u32 = 1;
/// Longest entry name
pub const NAME_LENGTH_LIMIT: usize = 8;
/// Size of a directory record: name(8) + start(4) + size(4)
pub const DIR_ENTRY_SZ: usize = 16;
/// Records that fit in one directory sector
pub const DIR_ENTRIES_PER_SECTOR: usize = 31;
/// Size field value that marks a directory record
pub const DIR_SIZE: u32 = 0xFFFF_FFFF;
/// Largest file size a record can hold
pub const MAX_FILE_SIZE: u32 = 0xFFFF_FFFE;
/// Payload bytes in a data sector, between the status byte and next pointer
pub const DATA_PAYLOAD_SZ: usize = SECTOR_SIZE - 5;
const NEXT_PTR_OFFSET: usize = SECTOR_SIZE - 4;
/// Highest format version
pub const MAX_VERSION: u16 = 0xFFFE;
/// Smallest image: header and root directory
pub const MIN_SECTORS: u32 = 2;
/// Largest sector count a header can hold
pub const MAX_SECTORS: u32 = 0xFFFF_FFFE;

/**
    [Header_Description]:
    Sector 0 carries a jump marker, the format version, the total number of
    sectors and the boot code, closed by the 0xAA55 trailer.
*/
#[derive(Clone, PartialEq, Eq)]
pub struct Header {
    /// Format version, 1..=65534
    pub version: u16,
    /// Sectors in the image, header included
    pub sector_count: u32,
    boot_code: [u8; BOOT_CODE_SZ],
}

impl Debug for Header {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("Header")
            .field("version", &self.version)
            .field("sector_count", &self.sector_count)
            .finish()
    }
}

impl Header {
    /// Check the formatter parameters and build a header from them
    pub fn new(version: u32, sector_count: u64, boot_code: &[u8]) -> Result<Self> {
        if version == 0 || version > MAX_VERSION as u32 {
            return Err(TfsError::InvalidVersion(version));
        }
        if sector_count < MIN_SECTORS as u64 || sector_count > MAX_SECTORS as u64 {
            return Err(TfsError::InvalidSectorCount(sector_count));
        }
        if boot_code.len() > BOOT_CODE_SZ {
            return Err(TfsError::BootCodeTooLarge(boot_code.len()));
        }
        let mut code = [0u8; BOOT_CODE_SZ];
        code[..boot_code.len()].copy_from_slice(boot_code);
        Ok(Self {
            version: version as u16,
            sector_count: sector_count as u32,
            boot_code: code,
        })
    }

    /// Decode and validate sector 0
    pub fn parse(block: &Block) -> Result<Self> {
        if block[0..2] != BOOT_JUMP {
            return Err(TfsError::InvalidHeader("missing boot jump marker"));
        }
        if u16::from_le_bytes([block[510], block[511]]) != BOOT_TRAILER {
            return Err(TfsError::InvalidHeader("missing 0xAA55 trailer"));
        }
        let version = u16::from_le_bytes([block[2], block[3]]);
        if version == 0 || version > MAX_VERSION {
            return Err(TfsError::InvalidHeader("version out of range"));
        }
        let sector_count = read_u32(block, 4);
        if !(MIN_SECTORS..=MAX_SECTORS).contains(&sector_count) {
            return Err(TfsError::InvalidHeader("sector count out of range"));
        }
        let mut boot_code = [0u8; BOOT_CODE_SZ];
        boot_code.copy_from_slice(&block[8..8 + BOOT_CODE_SZ]);
        Ok(Self { version, sector_count, boot_code })
    }

    /// Encode as sector 0
    pub fn to_block(&self) -> Block {
        let mut block = [0u8; SECTOR_SIZE];
        block[0..2].copy_from_slice(&BOOT_JUMP);
        block[2..4].copy_from_slice(&self.version.to_le_bytes());
        block[4..8].copy_from_slice(&self.sector_count.to_le_bytes());
        block[8..8 + BOOT_CODE_SZ].copy_from_slice(&self.boot_code);
        block[510..512].copy_from_slice(&BOOT_TRAILER.to_le_bytes());
        block
    }

    /// Boot code, zero-padded to 502 bytes
    pub fn boot_code(&self) -> &[u8] {
        &self.boot_code
    }
}

/**
    [EntryName_Description]:
    At most 8 characters out of [A-Z0-9.-]. Stored NUL-padded.
    The root directory is the only entry with an empty name.
*/
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntryName(String);

impl EntryName {
    /// Validate a host-side name
    pub fn new(name: &str) -> Result<Self> {
        let invalid = |reason| TfsError::InvalidName { name: name.to_string(), reason };
        if name.is_empty() {
            return Err(invalid("name is empty"));
        }
        if name.len() > NAME_LENGTH_LIMIT {
            return Err(invalid("longer than 8 characters"));
        }
        if !name.bytes().all(is_name_byte) {
            return Err(invalid("character outside [A-Z0-9.-]"));
        }
        Ok(Self(name.to_string()))
    }

    /// The empty name of the root directory
    pub fn root() -> Self {
        Self(String::new())
    }

    fn from_raw(raw: &[u8; NAME_LENGTH_LIMIT]) -> Result<Self> {
        let len = raw.iter().rposition(|b| *b != 0).map_or(0, |i| i + 1);
        let name = &raw[..len];
        if !name.iter().copied().all(is_name_byte) {
            return Err(TfsError::InvalidName {
                name: String::from_utf8_lossy(name).into_owned(),
                reason: "character outside [A-Z0-9.-]",
            });
        }
        // every byte is ASCII at this point
        Self::new(&String::from_utf8_lossy(name))
    }

    fn to_raw(&self) -> [u8; NAME_LENGTH_LIMIT] {
        let mut raw = [0u8; NAME_LENGTH_LIMIT];
        raw[..self.0.len()].copy_from_slice(self.0.as_bytes());
        raw
    }

    /// The name as text
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for EntryName {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Debug for EntryName {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        Debug::fmt(&self.0, f)
    }
}

fn is_name_byte(b: u8) -> bool {
    b.is_ascii_uppercase() || b.is_ascii_digit() || b == b'.' || b == b'-'
}

/// Reject sizes that cannot be stored for a file
pub fn check_file_size(size: u64) -> Result<u32> {
    if size > MAX_FILE_SIZE as u64 {
        return Err(TfsError::InvalidSize { size });
    }
    Ok(size as u32)
}

/**
    [DirEntry_Description]:
    A directory sector is the directory marker followed by up to 31 of
    these 16-byte records: name[8], start_sector(u32 LE), size(u32 LE).
    A size of 0xFFFFFFFF marks a directory.
*/
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct DirEntry {
    /// Entry name
    pub name: EntryName,
    /// Directory sector, or first sector of the file chain
    pub start_sector: u32,
    /// File size in bytes, or [`DIR_SIZE`]
    pub size: u32,
}

impl DirEntry {
    /// Record of a directory stored at `start_sector`
    pub fn directory(name: EntryName, start_sector: u32) -> Self {
        Self { name, start_sector, size: DIR_SIZE }
    }

    /// Record of a file, failing with `InvalidSize` past the limit
    pub fn file(name: EntryName, start_sector: u32, size: u64) -> Result<Self> {
        Ok(Self { name, start_sector, size: check_file_size(size)? })
    }

    /// Whether the size field holds the directory marker
    pub fn is_dir(&self) -> bool {
        self.size == DIR_SIZE
    }

    /// `None` for a free or deleted slot
    pub fn decode(raw: &[u8; DIR_ENTRY_SZ]) -> Result<Option<Self>> {
        if raw[0] == FREE_MARKER || raw[0] == TOMBSTONE_MARKER {
            return Ok(None);
        }
        let mut name = [0u8; NAME_LENGTH_LIMIT];
        name.copy_from_slice(&raw[..NAME_LENGTH_LIMIT]);
        Ok(Some(Self {
            name: EntryName::from_raw(&name)?,
            start_sector: read_u32(raw, 8),
            size: read_u32(raw, 12),
        }))
    }

    /// The 16-byte record, name NUL-padded
    pub fn encode(&self) -> [u8; DIR_ENTRY_SZ] {
        let mut raw = [0u8; DIR_ENTRY_SZ];
        raw[..NAME_LENGTH_LIMIT].copy_from_slice(&self.name.to_raw());
        raw[8..12].copy_from_slice(&self.start_sector.to_le_bytes());
        raw[12..16].copy_from_slice(&self.size.to_le_bytes());
        raw
    }
}

/// Live records of a directory sector, `None` if the status byte is wrong
pub fn decode_dir_block(block: &Block) -> Result<Option<Vec<DirEntry>>> {
    if block[0] != DIR_MARKER {
        return Ok(None);
    }
    let mut entries = Vec::new();
    for slot in block[1..1 + DIR_ENTRIES_PER_SECTOR * DIR_ENTRY_SZ].chunks_exact(DIR_ENTRY_SZ) {
        let mut raw = [0u8; DIR_ENTRY_SZ];
        raw.copy_from_slice(slot);
        if let Some(entry) = DirEntry::decode(&raw)? {
            entries.push(entry);
        }
    }
    Ok(Some(entries))
}

/// Directory sector holding `entries` in order; callers keep at most 31
pub(crate) fn encode_dir_block<'a>(entries: impl IntoIterator<Item = &'a DirEntry>) -> Block {
    let mut block = [0u8; SECTOR_SIZE];
    block[0] = DIR_MARKER;
    for (i, entry) in entries.into_iter().enumerate() {
        assert!(i < DIR_ENTRIES_PER_SECTOR, "directory sector overflow");
        let offset = 1 + i * DIR_ENTRY_SZ;
        block[offset..offset + DIR_ENTRY_SZ].copy_from_slice(&entry.encode());
    }
    block
}

/**
    [DataBlock_Description]:
    status byte, 507 payload bytes, next sector pointer (0 ends the chain).
*/
pub fn encode_data_block(payload: &[u8], next: u32) -> Block {
    debug_assert!(payload.len() <= DATA_PAYLOAD_SZ);
    let mut block = [0u8; SECTOR_SIZE];
    block[0] = DATA_MARKER;
    block[1..1 + payload.len()].copy_from_slice(payload);
    block[NEXT_PTR_OFFSET..].copy_from_slice(&next.to_le_bytes());
    block
}

/// The 507 payload bytes of a data sector
pub fn data_payload(block: &Block) -> &[u8] {
    &block[1..1 + DATA_PAYLOAD_SZ]
}

/// Next sector of the chain, 0 at the end
pub fn data_next(block: &Block) -> u32 {
    read_u32(block, NEXT_PTR_OFFSET)
}

/// Number of sectors a file of `size` bytes occupies, never less than one
pub fn data_blocks(size: u32) -> u32 {
    let payload = DATA_PAYLOAD_SZ as u64;
    ((size as u64 + payload - 1) / payload).max(1) as u32
}

/// Valid payload bytes in the final sector of a chain
pub fn last_block_len(size: u32) -> usize {
    match (size as usize % DATA_PAYLOAD_SZ, size) {
        (_, 0) => 0,
        (0, _) => DATA_PAYLOAD_SZ,
        (rest, _) => rest,
    }
}

fn read_u32(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]])
}
