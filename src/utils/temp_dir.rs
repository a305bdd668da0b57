use std::{
    env, fs,
    ops::Deref,
    path::{Path, PathBuf},
    process,
    sync::atomic::{AtomicUsize, Ordering},
};

use tracing::warn;

static NEXT_SUFFIX: AtomicUsize = AtomicUsize::new(0);

/// A scratch directory under the system temp dir, removed on drop.  Mainly
/// for tests, which is why creation failure panics.
pub struct TempDir(PathBuf);

impl TempDir {
    /// `prefix` plus the process id and a per-process counter, so tests
    /// running in parallel never share a directory.
    pub fn new<P: AsRef<Path>>(prefix: P) -> Self {
        let mut name = prefix.as_ref().as_os_str().to_owned();
        name.push(format!("-{}-{}", process::id(), NEXT_SUFFIX.fetch_add(1, Ordering::SeqCst)));
        let path = env::temp_dir().join(name);
        fs::create_dir_all(&path).expect("temp dir should be creatable");
        Self(path)
    }
}

impl Deref for TempDir {
    type Target = PathBuf;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Drop for TempDir {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_dir_all(&self.0) {
            warn!(path = %self.0.display(), %err, "failed to remove temp dir");
        }
    }
}
