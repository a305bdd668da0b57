use std::{
    collections::BTreeSet,
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};

use parking_lot::RwLock;
use tracing::info;

use crate::index_db::{Result, Store, StoreKind};

/// The live indexing pipeline, as far as queries are concerned.
pub trait Indexer: Send + Sync {
    /// Ids of every file the indexer has visited so far.
    fn visited_files(&self) -> BTreeSet<u32>;
}

/// One indexed codebase and the stores holding its data.
pub struct Project {
    root: PathBuf,
    db_path: PathBuf,
    /// Indexed in `StoreKind::PROJECT` order.
    stores: Vec<Store>,
    indexer: RwLock<Option<Arc<dyn Indexer>>>,
}

impl fmt::Debug for Project {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Project")
            .field("root", &self.root)
            .field("db_path", &self.db_path)
            .field("has_indexer", &self.indexer.read().is_some())
            .finish()
    }
}

impl Project {
    pub fn new(root: PathBuf, db_path: PathBuf) -> Project {
        let stores = StoreKind::PROJECT
            .iter()
            .map(|kind| Store::new(*kind, db_path.join(kind.name())))
            .collect();
        Project {
            root,
            db_path,
            stores,
            indexer: RwLock::new(None),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// The project's store of the given kind; `None` for global kinds, which
    /// belong to the `Registry`.
    pub fn store(&self, kind: StoreKind) -> Option<&Store> {
        self.stores.iter().find(|store| store.kind() == kind)
    }

    pub fn database_dir(&self, kind: StoreKind) -> Option<&Path> {
        self.store(kind).map(|store| store.dir())
    }

    pub fn set_indexer(&self, indexer: Option<Arc<dyn Indexer>>) {
        *self.indexer.write() = indexer;
    }

    pub fn indexer(&self) -> Option<Arc<dyn Indexer>> {
        self.indexer.read().clone()
    }

    pub fn has_indexer(&self) -> bool {
        self.indexer.read().is_some()
    }

    pub fn load(&self) -> Result<usize> {
        let mut total = 0;
        for store in &self.stores {
            total += store.load_snapshot()?;
        }
        info!(root = %self.root.display(), records = total, "loaded project");
        Ok(total)
    }

    pub fn save(&self) -> Result<usize> {
        let mut total = 0;
        for store in &self.stores {
            total += store.save_snapshot()?;
        }
        Ok(total)
    }
}
