/*!
    Projection of the on-disk tree onto a host directory (mount) and
    reconciliation of a host directory back into the image (dismount).

    Possible chains of function calls during a dismount:
    [dismount]
        +-> [Dismount::sync_dir] -+-> [Dismount::sync] (known children, recursive)
                                  |       +-> [Dismount::delete] | [Dismount::rewrite]
                                  +-> [Dismount::import] -> [Dismount::create]
                                  +-> [Tree::store_dir]
*/
use std::ffi::OsStr;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::{info, warn};

use super::{
    chain, check_file_size, host, EntryName, Node, NodeId, NodeKind, Result, SectorStore,
    SyncState, TfsError, Tree,
};

/// A host entry that was left out of the image
#[derive(Debug)]
pub struct Skipped {
    ///Host path of the entry
    pub path: PathBuf,
    ///Why it was left out
    pub reason: TfsError,
}

/// What a dismount changed on disk
#[derive(Debug, Default)]
pub struct SyncReport {
    /// New entries written
    pub created: usize,
    /// Files rewritten from the host, kind changes included
    pub rewritten: usize,
    /// Entries removed, descendants included
    pub deleted: usize,
    /// Host entries left out
    pub skipped: Vec<Skipped>,
}

impl SyncReport {
    /// Nothing was skipped
    pub fn is_complete(&self) -> bool {
        self.skipped.is_empty()
    }
}

///Write every entry of the image below `host_root`. The image is only read.
pub fn mount(store: &SectorStore, tree: &Tree, host_root: &Path) -> Result<()> {
    fs::create_dir_all(host_root).map_err(host(host_root))?;
    for child in tree.node(Tree::ROOT).children() {
        mount_node(store, tree, *child, host_root)?;
    }
    info!("mounted {} entries at {}", tree.len(), host_root.display());
    Ok(())
}

fn mount_node(store: &SectorStore, tree: &Tree, id: NodeId, host_dir: &Path) -> Result<()> {
    let node = tree.node(id);
    let path = host_dir.join(node.name.as_str());
    match &node.kind {
        NodeKind::Directory { children } => {
            fs::create_dir(&path).map_err(host(&path))?;
            for child in children {
                mount_node(store, tree, *child, &path)?;
            }
        }
        NodeKind::File { size } => {
            let data = chain::read_all(store, node.sector, *size)?;
            fs::write(&path, data).map_err(host(&path))?;
        }
    }
    Ok(())
}

///Bring the image in line with `host_root`: entries missing on the host are
///deleted, host entries missing in the image are created and every file that
///exists on both sides is rewritten from the host.
pub fn dismount(store: &SectorStore, tree: &mut Tree, host_root: &Path) -> Result<SyncReport> {
    let meta = fs::metadata(host_root).map_err(host(host_root))?;
    if !meta.is_dir() {
        return Err(TfsError::Host {
            path: host_root.to_path_buf(),
            source: io::Error::new(io::ErrorKind::Other, "mount point is not a directory"),
        });
    }
    tree.reset_states();
    let mut pass = Dismount {
        store,
        tree,
        report: SyncReport::default(),
    };
    pass.sync_dir(Tree::ROOT, host_root)?;
    let report = pass.report;
    info!(
        "dismounted {}: {} created, {} rewritten, {} deleted, {} skipped",
        host_root.display(),
        report.created,
        report.rewritten,
        report.deleted,
        report.skipped.len()
    );
    Ok(report)
}

struct Dismount<'a> {
    store: &'a SectorStore,
    tree: &'a mut Tree,
    report: SyncReport,
}

impl Dismount<'_> {
    /// Reconcile one known node with its host path
    fn sync(&mut self, id: NodeId, path: &Path) -> Result<()> {
        let meta = match fs::metadata(path) {
            Ok(meta) => meta,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return self.delete(id),
            Err(err) => return Err(host(path)(err)),
        };
        match (self.tree.node(id).is_dir(), meta.is_dir()) {
            (true, true) => self.sync_dir(id, path),
            (false, false) => self.rewrite(id, path),
            _ => self.replace(id, path),
        }
    }

    fn sync_dir(&mut self, dir: NodeId, path: &Path) -> Result<()> {
        for child in self.tree.children(dir) {
            if self.tree.node(child).state != SyncState::Unvisited {
                continue;
            }
            let child_path = path.join(self.tree.node(child).name.as_str());
            self.sync(child, &child_path)?;
        }
        self.import(dir, path)?;
        self.tree.store_dir(self.store, dir)?;
        self.tree.node_mut(dir).state = SyncState::Matched;
        Ok(())
    }

    /// Create every host entry of `path` that `dir` does not know yet
    fn import(&mut self, dir: NodeId, path: &Path) -> Result<()> {
        let mut names = fs::read_dir(path)
            .map_err(host(path))?
            .map(|entry| entry.map(|entry| entry.file_name()))
            .collect::<io::Result<Vec<_>>>()
            .map_err(host(path))?;
        names.sort();
        for host_name in names {
            let known = host_name
                .to_str()
                .and_then(|name| self.tree.find_child(dir, name))
                .is_some();
            if known {
                continue;
            }
            let child_path = path.join(&host_name);
            match self.create(dir, &host_name, &child_path) {
                Ok(_) => {}
                Err(err) if err.is_recoverable() => self.skip(child_path, err),
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    fn skip(&mut self, path: PathBuf, reason: TfsError) {
        warn!("skipping {}: {}", path.display(), reason);
        self.report.skipped.push(Skipped { path, reason });
    }

    /// Build a new node from a host entry and append it to `parent`
    fn create(&mut self, parent: NodeId, host_name: &OsStr, path: &Path) -> Result<NodeId> {
        let name = match host_name.to_str() {
            Some(name) => EntryName::new(name)?,
            None => {
                return Err(TfsError::InvalidName {
                    name: host_name.to_string_lossy().into_owned(),
                    reason: "not valid UTF-8",
                })
            }
        };
        self.tree.check_room(parent)?;
        let meta = fs::metadata(path).map_err(host(path))?;
        let id = if meta.is_dir() {
            let id = self.tree.insert(Node::directory(name, 0));
            self.fill_dir(id, path)?;
            id
        } else {
            check_file_size(meta.len())?;
            let data = fs::read(path).map_err(host(path))?;
            let (sector, size) = chain::write_all(self.store, &data)?;
            self.tree.insert(Node::file(name, sector, size))
        };
        self.tree.attach(parent, id)?;
        self.tree.node_mut(id).state = SyncState::Created;
        self.report.created += 1;
        info!("created /{}", self.tree.path(id).display());
        Ok(id)
    }

    /// Import the children of an empty directory node, then give it a sector
    fn fill_dir(&mut self, dir: NodeId, path: &Path) -> Result<()> {
        self.import(dir, path)?;
        let sector = self.store.find_free_sector()?;
        self.tree.node_mut(dir).sector = sector;
        self.tree.store_dir(self.store, dir)
    }

    /// Files are never diffed: the old chain goes, the host bytes come in
    fn rewrite(&mut self, id: NodeId, path: &Path) -> Result<()> {
        let data = match self.read_host_file(path)? {
            Some(data) => data,
            None => return Ok(()),
        };
        chain::free_chain(self.store, self.tree.node(id).sector)?;
        let (sector, size) = chain::write_all(self.store, &data)?;
        let node = self.tree.node_mut(id);
        node.sector = sector;
        node.kind = NodeKind::File { size };
        node.state = SyncState::Matched;
        self.report.rewritten += 1;
        Ok(())
    }

    /// The host entry changed between file and directory
    fn replace(&mut self, id: NodeId, path: &Path) -> Result<()> {
        let host_is_dir = fs::metadata(path).map_err(host(path))?.is_dir();
        let data = if host_is_dir {
            None
        } else {
            match self.read_host_file(path)? {
                Some(data) => Some(data),
                None => return Ok(()),
            }
        };
        self.free_storage(id)?;
        match data {
            None => {
                self.tree.node_mut(id).kind = NodeKind::Directory { children: Vec::new() };
                self.fill_dir(id, path)?;
            }
            Some(data) => {
                let (sector, size) = chain::write_all(self.store, &data)?;
                let node = self.tree.node_mut(id);
                node.sector = sector;
                node.kind = NodeKind::File { size };
            }
        }
        self.tree.node_mut(id).state = SyncState::Matched;
        self.report.rewritten += 1;
        info!("replaced /{}", self.tree.path(id).display());
        Ok(())
    }

    /// Host file contents, or `None` after reporting a file too large to store
    fn read_host_file(&mut self, path: &Path) -> Result<Option<Vec<u8>>> {
        let meta = fs::metadata(path).map_err(host(path))?;
        if let Err(err) = check_file_size(meta.len()) {
            self.skip(path.to_path_buf(), err);
            return Ok(None);
        }
        fs::read(path).map(Some).map_err(host(path))
    }

    /// Free the storage of `id`, unlink it and store its parent
    fn delete(&mut self, id: NodeId) -> Result<()> {
        let path = self.tree.path(id);
        self.free_storage(id)?;
        self.tree.node_mut(id).state = SyncState::Deleted;
        self.report.deleted += 1;
        if let Some(parent) = self.tree.detach(id) {
            self.tree.store_dir(self.store, parent)?;
        }
        info!("deleted /{}", path.display());
        Ok(())
    }

    /// Release every sector owned by `id` and drop its descendants
    fn free_storage(&mut self, id: NodeId) -> Result<()> {
        let sector = self.tree.node(id).sector;
        match self.tree.node(id).kind.clone() {
            NodeKind::Directory { children } => {
                for child in children {
                    self.free_storage(child)?;
                    self.tree.detach(child);
                    self.tree.node_mut(child).state = SyncState::Deleted;
                    self.report.deleted += 1;
                }
                self.store.free_sector(sector)?;
            }
            NodeKind::File { .. } => {
                chain::free_chain(self.store, sector)?;
            }
        }
        Ok(())
    }
}
