use std::path::Path;
use std::sync::Arc;

use log::info;

use super::{
    chain, sync, BlockDevice, Header, NodeId, NodeKind, Result, SectorStore, SyncReport,
    TfsError, Tree, DIR_MARKER, HEADER_SECTOR, ROOT_SECTOR, SECTOR_SIZE,
};

///Write an empty TFS image: header in sector 0, an empty root directory in
///sector 1 and zeroes everywhere else
pub fn format(
    block_device: Arc<dyn BlockDevice>,
    boot_code: &[u8],
    sector_count: u64,
    version: u32,
) -> Result<()> {
    let header = Header::new(version, sector_count, boot_code)?;
    if (block_device.num_blocks() as u64) < sector_count {
        return Err(TfsError::InvalidSectorCount(sector_count));
    }
    block_device.write_block(HEADER_SECTOR as usize, &header.to_block())?;
    let mut root = [0u8; SECTOR_SIZE];
    root[0] = DIR_MARKER;
    block_device.write_block(ROOT_SECTOR as usize, &root)?;
    let zero = [0u8; SECTOR_SIZE];
    for sector in 2..sector_count as usize {
        block_device.write_block(sector, &zero)?;
    }
    info!(
        "formatted {} sectors ({} bytes), version {}",
        sector_count,
        sector_count * SECTOR_SIZE as u64,
        version
    );
    Ok(())
}

///A tiny filesystem on a block device
pub struct TinyFileSystem {
    store: SectorStore,
    tree: Tree,
}

/* core methods */
impl TinyFileSystem {
    ///Format a block device and open it
    pub fn create(
        block_device: Arc<dyn BlockDevice>,
        boot_code: &[u8],
        sector_count: u64,
        version: u32,
    ) -> Result<Self> {
        format(Arc::clone(&block_device), boot_code, sector_count, version)?;
        Self::open(block_device)
    }
    ///Open a block device as a filesystem
    ///This function is often more commonly used than `create`
    pub fn open(block_device: Arc<dyn BlockDevice>) -> Result<Self> {
        let store = SectorStore::open(block_device)?;
        let tree = Tree::load(&store)?;
        Ok(Self { store, tree })
    }
    ///Copy the whole image out to `host_root`
    pub fn mount(&self, host_root: &Path) -> Result<()> {
        sync::mount(&self.store, &self.tree, host_root)
    }
    ///Copy `host_root` back into the image
    pub fn dismount(&mut self, host_root: &Path) -> Result<SyncReport> {
        sync::dismount(&self.store, &mut self.tree, host_root)
    }
}

/* helper methods */
impl TinyFileSystem {
    ///Sector level access
    pub fn store(&self) -> &SectorStore {
        &self.store
    }

    ///The loaded directory tree
    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    ///Contents of a file node
    pub fn read_file(&self, id: NodeId) -> Result<Vec<u8>> {
        let node = self.tree.node(id);
        match node.kind {
            NodeKind::File { size } => chain::read_all(&self.store, node.sector, size),
            NodeKind::Directory { .. } => Err(TfsError::IsADirectory {
                name: node.name.to_string(),
            }),
        }
    }
}
