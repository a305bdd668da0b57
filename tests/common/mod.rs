#![allow(dead_code)]

use std::{collections::BTreeSet, path::Path, sync::Arc, time::Duration};

use indexdb::{
    config::Config,
    index_db::{
        location::encode_file_id,
        records::{CursorInfo, FileInformation},
        Location, Store, StoreKind, StoreRead,
    },
    jobs::{build_job, Job, JobStatus, QueryKind, QueryMessage},
    server::{Indexer, Project, Registry},
};

pub const ROOT: &str = "/src/app";
pub const DATA_PATH: &str = "/tmp/indexdb-tests-unused";

/// An in-memory registry, optionally with one project rooted at `ROOT`.
pub struct Fixture {
    pub registry: Arc<Registry>,
    pub project: Option<Arc<Project>>,
}

impl Fixture {
    pub fn new() -> Fixture {
        let fixture = Fixture::without_project();
        let project = fixture.registry.add_project(Path::new(ROOT));
        Fixture {
            project: Some(project),
            ..fixture
        }
    }

    pub fn without_project() -> Fixture {
        let mut config = Config::new(DATA_PATH);
        config.lock_wait = Duration::from_millis(10);
        Fixture {
            registry: Arc::new(Registry::new(config)),
            project: None,
        }
    }

    pub fn project(&self) -> &Arc<Project> {
        self.project.as_ref().expect("fixture has a project")
    }

    pub fn store(&self, kind: StoreKind) -> &Store {
        match self.registry.global_store(kind) {
            Some(store) => store,
            None => self.project().store(kind).expect("project store"),
        }
    }

    /// Register `/src/app/<name>` and return its id.
    pub fn file(&self, name: &str) -> u32 {
        self.registry.register_file(&path(name)).unwrap()
    }

    /// Index `name` at each location, recording whether it is a definition.
    pub fn add_symbol(&self, name: &str, locations: &[(Location, bool)]) {
        {
            let mut names = self.store(StoreKind::SymbolNames).acquire_write();
            let mut existing: BTreeSet<Location> =
                names.get(name.as_bytes()).unwrap().unwrap_or_default();
            existing.extend(locations.iter().map(|(loc, _)| *loc));
            names.put(name.as_bytes(), &existing).unwrap();
        }
        let mut symbols = self.store(StoreKind::Symbols).acquire_write();
        for (location, is_definition) in locations {
            let info = CursorInfo {
                symbol_name: name.to_string(),
                kind: "FunctionDecl".to_string(),
                is_definition: *is_definition,
                ..CursorInfo::default()
            };
            symbols.put(&location.to_key(), &info).unwrap();
        }
    }

    pub fn add_cursor(&self, location: Location, info: &CursorInfo) {
        self.store(StoreKind::Symbols)
            .acquire_write()
            .put(&location.to_key(), info)
            .unwrap();
    }

    pub fn add_dependencies(&self, file_id: u32, deps: &[u32]) {
        let deps: BTreeSet<u32> = deps.iter().copied().collect();
        self.store(StoreKind::Dependencies)
            .acquire_write()
            .put(&encode_file_id(file_id), &deps)
            .unwrap();
    }

    pub fn add_file_info(&self, file_id: u32, info: &FileInformation) {
        self.store(StoreKind::FileInformation)
            .acquire_write()
            .put(&encode_file_id(file_id), info)
            .unwrap();
    }

    pub fn job(&self, query: QueryMessage) -> Job {
        build_job(&self.registry, query).unwrap()
    }

    pub fn run(&self, query: QueryMessage) -> (JobStatus, Vec<String>) {
        let mut job = self.job(query);
        let status = job.execute();
        (status, job.into_lines())
    }

    pub fn status(&self, section: &str) -> Vec<String> {
        let (status, lines) = self.run(QueryMessage::new(QueryKind::Status, section));
        assert_eq!(status, JobStatus::Completed);
        lines
    }

    /// The directory a status section prints for `kind`.
    pub fn dir(&self, kind: StoreKind) -> String {
        self.store(kind).dir().display().to_string()
    }
}

pub fn path(name: &str) -> String {
    format!("{}/{}", ROOT, name)
}

pub struct FixedIndexer(pub BTreeSet<u32>);

impl Indexer for FixedIndexer {
    fn visited_files(&self) -> BTreeSet<u32> {
        self.0.clone()
    }
}
