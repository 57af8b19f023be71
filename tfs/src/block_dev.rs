use core::any::Any;
use std::io;

use spin::Mutex;

use crate::SECTOR_SIZE;

/// BlockDevice is implemented by outer tfs users
pub trait BlockDevice: Send + Sync + Any {
    /// read one whole sector into `buf`
    fn read_block(&self, block_id: usize, buf: &mut [u8]) -> io::Result<()>;
    /// write one whole sector from `buf`
    fn write_block(&self, block_id: usize, buf: &[u8]) -> io::Result<()>;
    /// number of sectors the device can hold
    fn num_blocks(&self) -> usize;
}

/// Zero-filled in-memory disk
pub struct RamDisk(Mutex<Vec<u8>>);

impl RamDisk {
    /// A disk of `blocks` zeroed sectors
    pub fn new(blocks: usize) -> Self {
        Self(Mutex::new(vec![0u8; blocks * SECTOR_SIZE]))
    }

    /// Copy of the whole image
    pub fn to_vec(&self) -> Vec<u8> {
        self.0.lock().clone()
    }

    fn range(&self, block_id: usize, len: usize) -> io::Result<core::ops::Range<usize>> {
        if len != SECTOR_SIZE {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "not a complete block"));
        }
        let start = block_id * SECTOR_SIZE;
        if block_id >= self.num_blocks() {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "block past end of ram disk"));
        }
        Ok(start..start + SECTOR_SIZE)
    }
}

impl BlockDevice for RamDisk {
    fn read_block(&self, block_id: usize, buf: &mut [u8]) -> io::Result<()> {
        let range = self.range(block_id, buf.len())?;
        buf.copy_from_slice(&self.0.lock()[range]);
        Ok(())
    }

    fn write_block(&self, block_id: usize, buf: &[u8]) -> io::Result<()> {
        let range = self.range(block_id, buf.len())?;
        self.0.lock()[range].copy_from_slice(buf);
        Ok(())
    }

    fn num_blocks(&self) -> usize {
        self.0.lock().len() / SECTOR_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ram_disk_round_trips_blocks() {
        let disk = RamDisk::new(4);
        let block = [0x5Au8; SECTOR_SIZE];
        disk.write_block(2, &block).unwrap();
        let mut buf = [0u8; SECTOR_SIZE];
        disk.read_block(2, &mut buf).unwrap();
        assert_eq!(buf, block);
        disk.read_block(1, &mut buf).unwrap();
        assert_eq!(buf, [0u8; SECTOR_SIZE]);
    }

    #[test]
    fn ram_disk_rejects_partial_and_out_of_bounds_blocks() {
        let disk = RamDisk::new(2);
        assert!(disk.write_block(0, &[1u8; 16]).is_err());
        assert!(disk.read_block(2, &mut [0u8; SECTOR_SIZE]).is_err());
        assert_eq!(disk.num_blocks(), 2);
    }
}
