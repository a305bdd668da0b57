use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use parking_lot::RwLock;
use tracing::{info, trace, warn};
use ustr::{ustr, Ustr};

use super::project::Project;
use crate::{
    config::Config,
    index_db::{
        records::{DATABASE_VERSION, GENERAL_VERSION_KEY},
        AbortHandle, ErrorDetails, ErrorLayer, IndexError, PathCache, Result, Store, StoreKind,
        StoreRead,
    },
};

/// Everything a query can see: the projects by root and the global stores.
///
/// There is no process-wide instance; whoever owns the server creates one
/// and hands an `Arc<Registry>` to every job.
#[derive(Debug)]
pub struct Registry {
    config: Config,
    general: Store,
    file_ids: Store,
    path_cache: PathCache,
    /// Only advanced while holding the FileIds write lock.  Wider than a file
    /// id so that running out of ids is an error rather than a wraparound.
    next_file_id: AtomicU64,
    projects: RwLock<BTreeMap<PathBuf, Arc<Project>>>,
}

impl Registry {
    /// An empty, purely in-memory registry.  Nothing is read from disk; see
    /// `load` for that.
    pub fn new(config: Config) -> Registry {
        let global_path = config.global_db_path();
        let registry = Registry {
            general: Store::new(StoreKind::General, global_path.join(StoreKind::General.name())),
            file_ids: Store::new(StoreKind::FileIds, global_path.join(StoreKind::FileIds.name())),
            path_cache: PathCache::new(),
            next_file_id: AtomicU64::new(1),
            projects: RwLock::new(BTreeMap::new()),
            config,
        };
        registry.ensure_version();
        registry
    }

    /// Create a registry with every configured project and load all store
    /// snapshots found on disk.
    pub fn load(config: Config) -> Result<Registry> {
        let registry = Registry::new(config);
        registry.general.load_snapshot()?;
        registry.file_ids.load_snapshot()?;
        registry.ensure_version();

        let max_id = {
            let guard = registry.file_ids.acquire_read();
            let mut it = guard.create_iterator();
            it.seek_to_first();
            let mut max_id = 0;
            while it.is_valid() {
                match it.value::<u32>() {
                    Ok(id) => max_id = max_id.max(id),
                    Err(err) => warn!(%err, "corrupt file id record"),
                }
                it.next();
            }
            max_id
        };
        registry.next_file_id.store(u64::from(max_id) + 1, Ordering::SeqCst);

        let roots: Vec<PathBuf> = registry.config.projects.keys().cloned().collect();
        for root in roots {
            registry.add_project(&root).load()?;
        }
        info!(
            data_path = %registry.config.data_path.display(),
            projects = registry.projects.read().len(),
            "registry loaded"
        );
        Ok(registry)
    }

    fn ensure_version(&self) {
        let mut guard = self.general.acquire_write();
        if !guard.contains_key(GENERAL_VERSION_KEY) {
            // A u32 always encodes.
            if let Err(err) = guard.put(GENERAL_VERSION_KEY, &DATABASE_VERSION) {
                warn!(%err, "failed to record database version");
            }
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn lock_wait(&self) -> Duration {
        self.config.lock_wait
    }

    /// The global store of the given kind; `None` for project kinds.
    pub fn global_store(&self, kind: StoreKind) -> Option<&Store> {
        match kind {
            StoreKind::General => Some(&self.general),
            StoreKind::FileIds => Some(&self.file_ids),
            _ => None,
        }
    }

    pub fn database_dir(&self, kind: StoreKind) -> Option<&Path> {
        self.global_store(kind).map(|store| store.dir())
    }

    pub fn path_cache(&self) -> &PathCache {
        &self.path_cache
    }

    /// Register (or fetch) the project rooted at `root`.
    pub fn add_project(&self, root: &Path) -> Arc<Project> {
        let mut projects = self.projects.write();
        projects
            .entry(root.to_path_buf())
            .or_insert_with(|| {
                trace!(root = %root.display(), "adding project");
                Arc::new(Project::new(root.to_path_buf(), self.config.project_db_path(root)))
            })
            .clone()
    }

    pub fn project(&self, root: &Path) -> Option<Arc<Project>> {
        self.projects.read().get(root).cloned()
    }

    /// The project whose root is the longest prefix of `path`.
    pub fn project_for_path(&self, path: &Path) -> Option<Arc<Project>> {
        self.projects
            .read()
            .iter()
            .filter(|(root, _)| path.starts_with(root))
            .max_by_key(|(root, _)| root.components().count())
            .map(|(_, project)| project.clone())
    }

    pub fn projects(&self) -> Vec<Arc<Project>> {
        self.projects.read().values().cloned().collect()
    }

    /// Return the id for `path`, assigning the next one if the path is new.
    /// Ids are never reused, so the mapping stays a bijection.
    pub fn register_file(&self, path: &str) -> Result<u32> {
        let mut guard = self.file_ids.acquire_write();
        if let Some(id) = guard.get::<u32>(path.as_bytes())? {
            return Ok(id);
        }
        let next = self.next_file_id.load(Ordering::SeqCst);
        let id = u32::try_from(next).map_err(|_| {
            IndexError::BadInput(ErrorDetails {
                layer: ErrorLayer::KeyLayer,
                message: format!("no file ids left to assign to {}", path),
            })
        })?;
        guard.put(path.as_bytes(), &id)?;
        self.next_file_id.store(next + 1, Ordering::SeqCst);
        // Cache after the store lock, never before.
        self.path_cache.insert(id, ustr(path));
        trace!(path, id, "registered file");
        Ok(id)
    }

    pub fn file_id(&self, path: &str) -> Result<Option<u32>> {
        self.file_ids.acquire_read().get::<u32>(path.as_bytes())
    }

    /// Resolve a file id to its path through the cache.
    pub fn path_for(&self, file_id: u32, abort: &AbortHandle) -> Result<Option<Ustr>> {
        self.path_cache
            .resolve(file_id, &self.file_ids, abort, self.config.lock_wait)
    }

    /// Snapshot every store, global and per-project, to disk.
    pub fn save(&self) -> Result<usize> {
        let mut total = self.general.save_snapshot()? + self.file_ids.save_snapshot()?;
        for project in self.projects() {
            total += project.save()?;
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::temp_dir::TempDir;

    fn registry() -> Registry {
        Registry::new(Config::new("/tmp/indexdb-unused"))
    }

    #[test]
    fn file_ids_are_assigned_once() {
        let registry = registry();
        let a = registry.register_file("/src/a.cpp").unwrap();
        let b = registry.register_file("/src/b.cpp").unwrap();
        assert_ne!(a, b);
        assert_eq!(registry.register_file("/src/a.cpp").unwrap(), a);
        assert_eq!(registry.file_id("/src/b.cpp").unwrap(), Some(b));
        assert_eq!(registry.file_id("/src/c.cpp").unwrap(), None);
    }

    #[test]
    fn path_resolution_survives_a_cold_cache() {
        let registry = registry();
        {
            // Simulate ids written by someone else, bypassing the cache.
            let mut guard = registry.file_ids.acquire_write();
            guard.put(b"/src/x.h", &40u32).unwrap();
            guard.put(b"/src/y.h", &41u32).unwrap();
        }
        let abort = AbortHandle::new();
        assert_eq!(registry.path_for(41, &abort).unwrap(), Some(ustr("/src/y.h")));
        // The scan cached everything it saw.
        assert_eq!(registry.path_cache().get(40), Some(ustr("/src/x.h")));
        assert_eq!(registry.path_for(99, &abort).unwrap(), None);
    }

    #[test]
    fn longest_root_wins() {
        let registry = registry();
        registry.add_project(Path::new("/src"));
        registry.add_project(Path::new("/src/app"));
        let project = registry.project_for_path(Path::new("/src/app/main.cpp")).unwrap();
        assert_eq!(project.root(), Path::new("/src/app"));
        let project = registry.project_for_path(Path::new("/src/lib/x.cpp")).unwrap();
        assert_eq!(project.root(), Path::new("/src"));
        assert!(registry.project_for_path(Path::new("/usr/include/x.h")).is_none());
        // Prefix matching is by path component, not by string.
        assert!(registry.project_for_path(Path::new("/srcfoo/x.h")).is_none());
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = TempDir::new("indexdb-registry-test");
        let mut config = Config::new(dir.as_path());
        config.projects.insert(
            PathBuf::from("/src/app"),
            crate::config::ProjectConfig {
                root: PathBuf::from("/src/app"),
                db_path: dir.join("app-db"),
            },
        );

        {
            let registry = Registry::load(config.clone()).unwrap();
            registry.register_file("/src/app/a.cpp").unwrap();
            registry.register_file("/src/app/b.cpp").unwrap();
            let project = registry.project(Path::new("/src/app")).unwrap();
            project
                .store(StoreKind::SymbolNames)
                .unwrap()
                .acquire_write()
                .put(b"main", &Vec::<u32>::new())
                .unwrap();
            registry.save().unwrap();
        }

        let registry = Registry::load(config).unwrap();
        // New ids continue after the loaded ones.
        assert_eq!(registry.register_file("/src/app/c.cpp").unwrap(), 3);
        let project = registry.project(Path::new("/src/app")).unwrap();
        assert!(project
            .store(StoreKind::SymbolNames)
            .unwrap()
            .acquire_read()
            .contains_key(b"main"));
    }

    #[test]
    fn running_out_of_file_ids_is_an_error() {
        let dir = TempDir::new("indexdb-registry-ids-test");
        let config = Config::new(dir.as_path());
        {
            let registry = Registry::new(config.clone());
            registry
                .file_ids
                .acquire_write()
                .put(b"/x", &u32::MAX)
                .unwrap();
            registry.save().unwrap();
        }

        let registry = Registry::load(config).unwrap();
        // Known paths still resolve; new ones can't get an id.
        assert_eq!(registry.register_file("/x").unwrap(), u32::MAX);
        let err = registry.register_file("/y").unwrap_err();
        assert!(matches!(err, IndexError::BadInput(_)), "{:?}", err);
        assert_eq!(registry.file_id("/y").unwrap(), None);
        // The failure doesn't burn anything; it keeps failing the same way.
        assert!(registry.register_file("/z").is_err());
    }
}
