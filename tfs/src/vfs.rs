/*!
    In-memory view of the on-disk tree. Nodes live in an arena and are
    addressed by index; a directory lists its children by index in the
    order they are stored in its sector.
*/
use std::collections::BTreeSet;
use std::path::PathBuf;

use log::debug;

use super::{
    decode_dir_block, encode_dir_block, DirEntry, EntryName, Result, SectorStore, TfsError,
    DIR_ENTRIES_PER_SECTOR, ROOT_SECTOR,
};

/// Index of a node in its [`Tree`]
pub type NodeId = usize;

/// Where a node stands during a dismount pass
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SyncState {
    /// Not reached yet in this pass
    Unvisited,
    /// Found on the host and brought up to date
    Matched,
    /// Imported from the host in this pass
    Created,
    /// Gone from the host, storage freed
    Deleted,
}

/// What a node is, replacing the size sentinel of the on-disk record
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum NodeKind {
    /// A directory sector
    Directory {
        /// Children in stored order
        children: Vec<NodeId>,
    },
    /// A chain of data sectors
    File {
        /// Size in bytes
        size: u32,
    },
}

/// One entry of the tree
#[derive(Clone, Debug)]
pub struct Node {
    /// Entry name, empty for the root
    pub name: EntryName,
    ///Directory sector, or first sector of the file chain
    pub sector: u32,
    /// Directory or file
    pub kind: NodeKind,
    /// `None` for the root and for detached nodes
    pub parent: Option<NodeId>,
    /// Progress in the current dismount
    pub state: SyncState,
}

impl Node {
    /// An empty directory node
    pub fn directory(name: EntryName, sector: u32) -> Self {
        Self {
            name,
            sector,
            kind: NodeKind::Directory { children: Vec::new() },
            parent: None,
            state: SyncState::Unvisited,
        }
    }

    /// A file node
    pub fn file(name: EntryName, sector: u32, size: u32) -> Self {
        Self {
            name,
            sector,
            kind: NodeKind::File { size },
            parent: None,
            state: SyncState::Unvisited,
        }
    }

    /// Whether this is a directory
    pub fn is_dir(&self) -> bool {
        matches!(self.kind, NodeKind::Directory { .. })
    }

    /// Children of a directory, empty for a file
    pub fn children(&self) -> &[NodeId] {
        match &self.kind {
            NodeKind::Directory { children } => children,
            NodeKind::File { .. } => &[],
        }
    }
    /// The 16-byte record this node is stored as in its parent
    pub fn entry(&self) -> DirEntry {
        match self.kind {
            NodeKind::Directory { .. } => DirEntry::directory(self.name.clone(), self.sector),
            NodeKind::File { size } => DirEntry {
                name: self.name.clone(),
                start_sector: self.sector,
                size,
            },
        }
    }
}

/// Arena of nodes, the root at [`Tree::ROOT`]
pub struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    /// Id of the root directory
    pub const ROOT: NodeId = 0;

    /// A tree holding only an empty root directory
    pub fn new() -> Self {
        Self {
            nodes: vec![Node::directory(EntryName::root(), ROOT_SECTOR)],
        }
    }

    ///Decode every directory sector reachable from the root.
    ///A directory sector may be reached only once, so loops and shared
    ///directories fail with `CorruptTree`.
    pub fn load(store: &SectorStore) -> Result<Self> {
        let mut tree = Self::new();
        let mut seen = BTreeSet::new();
        tree.load_dir(store, Self::ROOT, &mut seen)?;
        Ok(tree)
    }

    fn load_dir(&mut self, store: &SectorStore, dir: NodeId, seen: &mut BTreeSet<u32>) -> Result<()> {
        let sector = self.nodes[dir].sector;
        if !seen.insert(sector) {
            return Err(TfsError::CorruptTree {
                sector,
                reason: "directory sector is reached twice",
            });
        }
        let block = store.read_sector(sector)?;
        let entries = decode_dir_block(&block)?.ok_or_else(|| TfsError::NotADirectory {
            name: self.nodes[dir].name.to_string(),
            sector,
        })?;
        for entry in entries {
            if entry.start_sector >= store.sector_count() {
                return Err(TfsError::OutOfRange {
                    sector: entry.start_sector as u64,
                    sector_count: store.sector_count(),
                });
            }
            let node = if entry.is_dir() {
                Node::directory(entry.name, entry.start_sector)
            } else {
                Node::file(entry.name, entry.start_sector, entry.size)
            };
            let is_dir = node.is_dir();
            let child = self.insert(node);
            self.attach(dir, child)?;
            if is_dir {
                self.load_dir(store, child, seen)?;
            }
        }
        Ok(())
    }

    /// Node by id
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    /// Mutable node by id
    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id]
    }

    /// Snapshot of the child list of `dir`
    pub fn children(&self, dir: NodeId) -> Vec<NodeId> {
        self.nodes[dir].children().to_vec()
    }

    /// Child of `dir` with exactly this name
    pub fn find_child(&self, dir: NodeId, name: &str) -> Option<NodeId> {
        self.nodes[dir]
            .children()
            .iter()
            .copied()
            .find(|child| self.nodes[*child].name.as_str() == name)
    }

    /// Resolve a `/`-separated path from the root
    pub fn lookup(&self, path: &str) -> Option<NodeId> {
        path.split('/')
            .filter(|part| !part.is_empty())
            .try_fold(Self::ROOT, |dir, part| self.find_child(dir, part))
    }

    /// Path of a node relative to the root, for diagnostics
    pub fn path(&self, id: NodeId) -> PathBuf {
        let mut parts = Vec::new();
        let mut cur = Some(id);
        while let Some(node) = cur {
            parts.push(self.nodes[node].name.as_str());
            cur = self.nodes[node].parent;
        }
        parts.iter().rev().filter(|part| !part.is_empty()).collect()
    }

    /// Add a detached node to the arena
    pub fn insert(&mut self, node: Node) -> NodeId {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    /// Fail with `DirectoryFull` if `dir` cannot take another child
    pub fn check_room(&self, dir: NodeId) -> Result<()> {
        if self.nodes[dir].children().len() >= DIR_ENTRIES_PER_SECTOR {
            return Err(TfsError::DirectoryFull {
                name: self.nodes[dir].name.to_string(),
                sector: self.nodes[dir].sector,
            });
        }
        Ok(())
    }

    /// Append `child` to the end of the child list of `dir`
    pub fn attach(&mut self, dir: NodeId, child: NodeId) -> Result<()> {
        if !self.nodes[dir].is_dir() {
            return Err(TfsError::NotADirectory {
                name: self.nodes[dir].name.to_string(),
                sector: self.nodes[dir].sector,
            });
        }
        self.check_room(dir)?;
        if let NodeKind::Directory { children } = &mut self.nodes[dir].kind {
            children.push(child);
        }
        self.nodes[child].parent = Some(dir);
        Ok(())
    }

    /// Unlink `child` from its parent, returning the parent
    pub fn detach(&mut self, child: NodeId) -> Option<NodeId> {
        let parent = self.nodes[child].parent.take()?;
        if let NodeKind::Directory { children } = &mut self.nodes[parent].kind {
            children.retain(|id| *id != child);
        }
        Some(parent)
    }

    /// Records of the live children of `dir`, in list order
    pub fn entries(&self, dir: NodeId) -> Vec<DirEntry> {
        self.nodes[dir]
            .children()
            .iter()
            .map(|child| self.nodes[*child].entry())
            .collect()
    }

    /// Encode the child list of `dir` and write it to its sector
    pub fn store_dir(&self, store: &SectorStore, dir: NodeId) -> Result<()> {
        let entries = self.entries(dir);
        store.write_sector(self.nodes[dir].sector, &encode_dir_block(&entries))?;
        debug!(
            "stored directory /{} at sector {} ({} entries)",
            self.path(dir).display(),
            self.nodes[dir].sector,
            entries.len()
        );
        Ok(())
    }

    /// Mark every live node unvisited before a dismount
    pub fn reset_states(&mut self) {
        for node in self.nodes.iter_mut() {
            if node.state != SyncState::Deleted {
                node.state = SyncState::Unvisited;
            }
        }
    }

    /// Number of live nodes below the root
    pub fn len(&self) -> usize {
        let mut stack = vec![Self::ROOT];
        let mut count = 0;
        while let Some(dir) = stack.pop() {
            for child in self.nodes[dir].children() {
                count += 1;
                stack.push(*child);
            }
        }
        count
    }

    /// Whether the root has no children
    pub fn is_empty(&self) -> bool {
        self.nodes[Self::ROOT].children().is_empty()
    }
}

impl Default for Tree {
    fn default() -> Self {
        Self::new()
    }
}
