use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::index_db::{ErrorDetails, ErrorLayer, IndexError, Result};

pub const DEFAULT_LOCK_WAIT_MS: u64 = 100;

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ProjectConfigPaths {
    /// Where this project's stores live.  Defaults to a directory derived
    /// from the project root under `<data_path>/projects`.
    pub db_path: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    data_path: String,
    lock_wait_ms: Option<u64>,
    #[serde(default)]
    projects: BTreeMap<String, ProjectConfigPaths>,
}

#[derive(Clone, Debug)]
pub struct ProjectConfig {
    pub root: PathBuf,
    pub db_path: PathBuf,
}

#[derive(Clone, Debug)]
pub struct Config {
    /// Home of the global stores and the default home of project stores.
    pub data_path: PathBuf,
    /// How long a job waits for a store lock before rechecking whether it has
    /// been aborted.
    pub lock_wait: Duration,
    pub projects: BTreeMap<PathBuf, ProjectConfig>,
}

impl Config {
    /// A config with no projects, for embedding and tests.
    pub fn new(data_path: impl Into<PathBuf>) -> Config {
        Config {
            data_path: data_path.into(),
            lock_wait: Duration::from_millis(DEFAULT_LOCK_WAIT_MS),
            projects: BTreeMap::new(),
        }
    }

    /// The directory holding the global stores.
    pub fn global_db_path(&self) -> PathBuf {
        self.data_path.join("global")
    }

    /// The configured store directory for `root`, or the derived default.
    pub fn project_db_path(&self, root: &Path) -> PathBuf {
        match self.projects.get(root) {
            Some(project) => project.db_path.clone(),
            None => default_project_db_path(&self.data_path, root),
        }
    }
}

/// Flatten an absolute root into a single directory name, so `/src/app`
/// lands in `<data_path>/projects/_src_app`.
pub fn default_project_db_path(data_path: &Path, root: &Path) -> PathBuf {
    let flattened: String = root
        .to_string_lossy()
        .chars()
        .map(|c| if c == '/' || c == '\\' { '_' } else { c })
        .collect();
    data_path.join("projects").join(flattened)
}

pub fn parse(input: &str) -> Result<Config> {
    let raw: RawConfig = serde_json::from_str(input).map_err(|e| {
        IndexError::BadInput(ErrorDetails {
            layer: ErrorLayer::ConfigLayer,
            message: format!("bad config: {}", e),
        })
    })?;

    let data_path = PathBuf::from(&raw.data_path);
    let mut projects = BTreeMap::new();
    for (root, paths) in raw.projects {
        let root = PathBuf::from(root);
        let db_path = match paths.db_path {
            Some(db_path) => PathBuf::from(db_path),
            None => default_project_db_path(&data_path, &root),
        };
        projects.insert(root.clone(), ProjectConfig { root, db_path });
    }

    Ok(Config {
        data_path,
        lock_wait: Duration::from_millis(raw.lock_wait_ms.unwrap_or(DEFAULT_LOCK_WAIT_MS)),
        projects,
    })
}

pub fn load(config_path: &str) -> Result<Config> {
    let config_file = File::open(config_path)?;
    let mut reader = BufReader::new(&config_file);
    let mut input = String::new();
    reader.read_to_string(&mut input)?;
    parse(&input)
}
