//! File bodies: singly-linked chains of data sectors
use log::debug;

use super::{
    check_file_size, data_blocks, data_next, data_payload, encode_data_block, last_block_len,
    Block, Result, SectorStore, TfsError, DATA_MARKER, DATA_PAYLOAD_SZ,
};

/// Visit every sector of the chain starting at `start`, stopping after the
/// sector whose next pointer is 0
fn walk(
    store: &SectorStore,
    start: u32,
    mut visit: impl FnMut(u32, &Block) -> Result<()>,
) -> Result<()> {
    let mut sector = start;
    // a well formed chain never visits more sectors than the disk has
    for _ in 0..store.sector_count() {
        let block = store.read_sector(sector)?;
        if block[0] != DATA_MARKER {
            return Err(TfsError::CorruptChain {
                sector,
                reason: format!("status byte {:#04x}, expected {:#04x}", block[0], DATA_MARKER),
            });
        }
        visit(sector, &block)?;
        match data_next(&block) {
            0 => return Ok(()),
            next => sector = next,
        }
    }
    Err(TfsError::CorruptChain {
        sector: start,
        reason: "chain loops back on itself".to_string(),
    })
}

/// Read a whole file of `size` bytes
pub fn read_all(store: &SectorStore, start: u32, size: u32) -> Result<Vec<u8>> {
    let mut data = Vec::with_capacity(size as usize);
    walk(store, start, |_, block| {
        let payload = data_payload(block);
        if data_next(block) == 0 {
            data.extend_from_slice(&payload[..last_block_len(size)]);
        } else {
            data.extend_from_slice(payload);
        }
        Ok(())
    })?;
    Ok(data)
}

/// Store `data` in freshly allocated sectors, returning (start sector, size).
/// All sectors are found before the first write, so a full disk leaves
/// the image untouched.
pub fn write_all(store: &SectorStore, data: &[u8]) -> Result<(u32, u32)> {
    let size = check_file_size(data.len() as u64)?;
    let sectors = store.find_free_sectors(data_blocks(size) as usize)?;
    let mut chunks: Vec<&[u8]> = data.chunks(DATA_PAYLOAD_SZ).collect();
    if chunks.is_empty() {
        chunks.push(&[]);
    }
    for (i, chunk) in chunks.iter().enumerate() {
        let next = sectors.get(i + 1).copied().unwrap_or(0);
        store.write_sector(sectors[i], &encode_data_block(chunk, next))?;
    }
    debug!("wrote {} bytes to chain at sector {} ({} sectors)", size, sectors[0], sectors.len());
    Ok((sectors[0], size))
}

/// Reset the status byte of every sector in the chain; payloads stay behind
pub fn free_chain(store: &SectorStore, start: u32) -> Result<usize> {
    let mut chain = Vec::new();
    walk(store, start, |sector, _| {
        chain.push(sector);
        Ok(())
    })?;
    for sector in &chain {
        store.free_sector(*sector)?;
    }
    debug!("freed chain at sector {} ({} sectors)", start, chain.len());
    Ok(chain.len())
}
