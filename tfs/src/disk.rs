/*!
    The SectorStore wraps a block device holding a TFS image:
    bounds-checked whole-sector access and free sector lookup.
*/
use std::sync::Arc;

use log::{debug, trace};
use spin::Mutex;

use super::{
    Bitmap, BlockDevice, Block, Header,
    FREE_MARKER, HEADER_SECTOR, Result, TfsError, SECTOR_SIZE,
};

/// An opened TFS image
pub struct SectorStore {
    ///Real device that implemented BlockDevice
    block_device: Arc<dyn BlockDevice>,
    header: Header,
    ///Sectors whose status byte is non-zero, mirrors the disk
    used: Mutex<Bitmap>,
}

impl SectorStore {
    ///Open a formatted block device, reading the header and
    ///rebuilding the used-sector map from every status byte
    pub fn open(block_device: Arc<dyn BlockDevice>) -> Result<Self> {
        let mut block = [0u8; SECTOR_SIZE];
        block_device.read_block(HEADER_SECTOR as usize, &mut block)?;
        let header = Header::parse(&block)?;
        if (block_device.num_blocks() as u64) < header.sector_count as u64 {
            return Err(TfsError::InvalidHeader("image is shorter than its sector count"));
        }
        let mut used = Bitmap::new(header.sector_count as usize);
        used.set(HEADER_SECTOR as usize, true);
        for sector in 1..header.sector_count as usize {
            block_device.read_block(sector, &mut block)?;
            used.set(sector, block[0] != FREE_MARKER);
        }
        debug!(
            "opened image version {} with {} sectors, {} free",
            header.version,
            header.sector_count,
            used.count_clear()
        );
        Ok(Self {
            block_device,
            header,
            used: Mutex::new(used),
        })
    }

    /// Format version from the header
    pub fn version(&self) -> u16 {
        self.header.version
    }

    /// Sectors in the image
    pub fn sector_count(&self) -> u32 {
        self.header.sector_count
    }

    /// Sectors whose status byte is zero
    pub fn free_sectors(&self) -> usize {
        self.used.lock().count_clear()
    }

    fn check_sector(&self, sector: u32) -> Result<usize> {
        if sector >= self.header.sector_count {
            return Err(TfsError::OutOfRange {
                sector: sector as u64,
                sector_count: self.header.sector_count,
            });
        }
        Ok(sector as usize)
    }

    /// Read one sector, `OutOfRange` past the end
    pub fn read_sector(&self, sector: u32) -> Result<Block> {
        let id = self.check_sector(sector)?;
        let mut block = [0u8; SECTOR_SIZE];
        self.block_device.read_block(id, &mut block)?;
        Ok(block)
    }

    /// Write one sector, `OutOfRange` past the end
    pub fn write_sector(&self, sector: u32, block: &Block) -> Result<()> {
        let id = self.check_sector(sector)?;
        self.block_device.write_block(id, block)?;
        if id != HEADER_SECTOR as usize {
            self.used.lock().set(id, block[0] != FREE_MARKER);
        }
        trace!("stored sector {} (status {:#04x})", sector, block[0]);
        Ok(())
    }

    /// Reset only the status byte of a sector, leaving its payload behind
    pub fn free_sector(&self, sector: u32) -> Result<()> {
        let mut block = self.read_sector(sector)?;
        block[0] = FREE_MARKER;
        self.write_sector(sector, &block)
    }

    ///Lowest free sector, searching from sector 1 upward
    pub fn find_free_sector(&self) -> Result<u32> {
        self.used
            .lock()
            .first_clear(1)
            .map(|sector| sector as u32)
            .ok_or(TfsError::DiskFull)
    }

    ///The `count` lowest free sectors in ascending order; nothing is claimed
    pub fn find_free_sectors(&self, count: usize) -> Result<Vec<u32>> {
        let used = self.used.lock();
        let mut found = Vec::with_capacity(count);
        let mut from = 1;
        while found.len() < count {
            let sector = used.first_clear(from).ok_or(TfsError::DiskFull)?;
            found.push(sector as u32);
            from = sector + 1;
        }
        Ok(found)
    }
}
