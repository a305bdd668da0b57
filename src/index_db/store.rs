//! Named, independently locked, ordered key-value stores.
//!
//! A `Store` is an ordered byte-key/byte-value map behind a reader-writer
//! lock.  The records are only reachable through a `ReadGuard` or
//! `WriteGuard`, so every access happens under the lock and every lock is
//! released when its guard drops, whatever path the caller leaves by.  An
//! iterator borrows its guard, which means the borrow checker refuses any code
//! that would keep iterating after the lock is gone.

use std::{
    collections::{btree_map::Range, BTreeMap},
    fs::{self, File},
    io::{BufWriter, Read, Write},
    ops::Bound,
    path::{Path, PathBuf},
    time::Duration,
};

use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{trace, warn};

use super::{
    abort::AbortHandle,
    db_interface::{ErrorDetails, ErrorLayer, IndexError, Result},
    records::{decode_value, encode_value},
};

pub const SNAPSHOT_FILE_NAME: &str = "records.ndjson.gz";

/// Every logical store the server knows about.  `General` and `FileIds` are
/// global; the rest exist once per project.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StoreKind {
    General,
    FileIds,
    Symbols,
    SymbolNames,
    Dependencies,
    FileInformation,
}

impl StoreKind {
    pub const GLOBAL: [StoreKind; 2] = [StoreKind::General, StoreKind::FileIds];
    pub const PROJECT: [StoreKind; 4] = [
        StoreKind::Symbols,
        StoreKind::SymbolNames,
        StoreKind::Dependencies,
        StoreKind::FileInformation,
    ];

    /// Directory name of the store under its owner's database directory.
    pub fn name(&self) -> &'static str {
        match self {
            StoreKind::General => "general",
            StoreKind::FileIds => "fileids",
            StoreKind::Symbols => "symbols",
            StoreKind::SymbolNames => "symbolnames",
            StoreKind::Dependencies => "dependencies",
            StoreKind::FileInformation => "fileinfos",
        }
    }

    pub fn is_global(&self) -> bool {
        matches!(self, StoreKind::General | StoreKind::FileIds)
    }
}

type RecordMap = BTreeMap<Vec<u8>, Vec<u8>>;

#[derive(Debug)]
pub struct Store {
    kind: StoreKind,
    dir: PathBuf,
    records: RwLock<RecordMap>,
}

impl Store {
    pub fn new(kind: StoreKind, dir: PathBuf) -> Self {
        Store {
            kind,
            dir,
            records: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn kind(&self) -> StoreKind {
        self.kind
    }

    /// The on-disk directory backing this store.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Block until a shared lock is available.  Meant for the indexer side and
    /// for tests; jobs should use `read_abortable`.
    pub fn acquire_read(&self) -> ReadGuard<'_> {
        ReadGuard {
            kind: self.kind,
            records: self.records.read(),
        }
    }

    pub fn acquire_write(&self) -> WriteGuard<'_> {
        WriteGuard {
            kind: self.kind,
            records: self.records.write(),
        }
    }

    pub fn try_acquire_read_for(&self, timeout: Duration) -> Option<ReadGuard<'_>> {
        self.records.try_read_for(timeout).map(|records| ReadGuard {
            kind: self.kind,
            records,
        })
    }

    pub fn try_acquire_write_for(&self, timeout: Duration) -> Option<WriteGuard<'_>> {
        self.records.try_write_for(timeout).map(|records| WriteGuard {
            kind: self.kind,
            records,
        })
    }

    /// Acquire a shared lock, waiting in `slice`-sized increments and
    /// rechecking `abort` between them.  Fails with `LockUnavailable` only if
    /// an abort has been requested and the lock still could not be had; a job
    /// that was never aborted waits for as long as the writer needs.
    pub fn read_abortable(&self, abort: &AbortHandle, slice: Duration) -> Result<ReadGuard<'_>> {
        loop {
            if let Some(guard) = self.try_acquire_read_for(slice) {
                return Ok(guard);
            }
            if abort.is_aborted() {
                warn!(store = self.kind.name(), "gave up waiting for read lock after abort");
                return Err(IndexError::LockUnavailable(ErrorDetails {
                    layer: ErrorLayer::LockLayer,
                    message: format!("read lock on {} not acquired before abort", self.kind.name()),
                }));
            }
            trace!(store = self.kind.name(), "still waiting for read lock");
        }
    }

    pub fn write_abortable(&self, abort: &AbortHandle, slice: Duration) -> Result<WriteGuard<'_>> {
        loop {
            if let Some(guard) = self.try_acquire_write_for(slice) {
                return Ok(guard);
            }
            if abort.is_aborted() {
                warn!(store = self.kind.name(), "gave up waiting for write lock after abort");
                return Err(IndexError::LockUnavailable(ErrorDetails {
                    layer: ErrorLayer::LockLayer,
                    message: format!("write lock on {} not acquired before abort", self.kind.name()),
                }));
            }
            trace!(store = self.kind.name(), "still waiting for write lock");
        }
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.dir.join(SNAPSHOT_FILE_NAME)
    }

    /// Replace the in-memory records with the snapshot in `dir()`, if there is
    /// one.  A missing snapshot leaves the store empty.  Returns the number of
    /// records loaded.
    pub fn load_snapshot(&self) -> Result<usize> {
        let path = self.snapshot_path();
        if !path.exists() {
            return Ok(0);
        }

        // Read the whole thing up front, same as our other gzipped ndjson
        // readers; buffered serde readers are much slower.
        let mut buffer = Vec::new();
        File::open(&path)?.read_to_end(&mut buffer)?;
        let mut gz = GzDecoder::new(&buffer[..]);
        let mut raw_str = String::new();
        gz.read_to_string(&mut raw_str)?;

        let mut loaded = BTreeMap::new();
        for line in raw_str.lines().filter(|l| !l.is_empty()) {
            let record: SnapshotRecord = serde_json::from_str(line)?;
            loaded.insert(record.key, record.value);
        }

        let count = loaded.len();
        let mut guard = self.acquire_write();
        *guard.records = loaded;
        drop(guard);
        trace!(store = self.kind.name(), count, "loaded snapshot");
        Ok(count)
    }

    /// Write all records to the snapshot in `dir()` under a read lock.  The new
    /// snapshot is written beside the old one and renamed into place.
    pub fn save_snapshot(&self) -> Result<usize> {
        fs::create_dir_all(&self.dir)?;
        let path = self.snapshot_path();
        let tmp_path = self.dir.join(format!("{}.tmp", SNAPSHOT_FILE_NAME));

        let guard = self.acquire_read();
        let mut gz = GzEncoder::new(BufWriter::new(File::create(&tmp_path)?), Compression::default());
        for (key, value) in guard.records().iter() {
            serde_json::to_writer(
                &mut gz,
                &SnapshotRecordRef {
                    key: key.as_slice(),
                    value: value.as_slice(),
                },
            )?;
            gz.write_all(b"\n")?;
        }
        gz.finish()?.flush()?;
        let count = guard.len();
        drop(guard);

        fs::rename(&tmp_path, &path)?;
        Ok(count)
    }
}

#[derive(Deserialize)]
struct SnapshotRecord {
    key: Vec<u8>,
    value: Vec<u8>,
}

#[derive(Serialize)]
struct SnapshotRecordRef<'a> {
    key: &'a [u8],
    value: &'a [u8],
}

/// Read access shared by both guard flavors.
pub trait StoreRead {
    fn kind(&self) -> StoreKind;

    fn records(&self) -> &RecordMap;

    fn get_raw(&self, key: &[u8]) -> Option<&[u8]> {
        self.records().get(key).map(|v| v.as_slice())
    }

    /// Typed lookup.  A missing key is `Ok(None)`; a value that won't decode
    /// as `T` is a `CorruptRecord`.
    fn get<T: DeserializeOwned>(&self, key: &[u8]) -> Result<Option<T>> {
        match self.get_raw(key) {
            Some(bytes) => decode_value(bytes).map(Some),
            None => Ok(None),
        }
    }

    fn contains_key(&self, key: &[u8]) -> bool {
        self.records().contains_key(key)
    }

    fn len(&self) -> usize {
        self.records().len()
    }

    fn is_empty(&self) -> bool {
        self.records().is_empty()
    }

    /// The iterator starts out unpositioned; call `seek_to_first` or `seek`.
    fn create_iterator(&self) -> StoreIterator<'_> {
        StoreIterator {
            records: self.records(),
            range: None,
            current: None,
        }
    }
}

pub struct ReadGuard<'a> {
    kind: StoreKind,
    records: RwLockReadGuard<'a, RecordMap>,
}

impl<'a> StoreRead for ReadGuard<'a> {
    fn kind(&self) -> StoreKind {
        self.kind
    }

    fn records(&self) -> &RecordMap {
        &self.records
    }
}

pub struct WriteGuard<'a> {
    kind: StoreKind,
    records: RwLockWriteGuard<'a, RecordMap>,
}

impl<'a> StoreRead for WriteGuard<'a> {
    fn kind(&self) -> StoreKind {
        self.kind
    }

    fn records(&self) -> &RecordMap {
        &self.records
    }
}

impl<'a> WriteGuard<'a> {
    pub fn put_raw(&mut self, key: &[u8], value: Vec<u8>) {
        self.records.insert(key.to_vec(), value);
    }

    pub fn put<T: Serialize + ?Sized>(&mut self, key: &[u8], value: &T) -> Result<()> {
        let bytes = encode_value(value)?;
        self.put_raw(key, bytes);
        Ok(())
    }

    pub fn remove(&mut self, key: &[u8]) -> bool {
        self.records.remove(key).is_some()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}

/// Lazy, forward-only cursor over a store in key order.
pub struct StoreIterator<'a> {
    records: &'a RecordMap,
    range: Option<Range<'a, Vec<u8>, Vec<u8>>>,
    current: Option<(&'a Vec<u8>, &'a Vec<u8>)>,
}

impl<'a> StoreIterator<'a> {
    pub fn seek_to_first(&mut self) {
        let records = self.records;
        self.position(records.range::<[u8], _>(..));
    }

    /// Position at the first key that is >= `target`.
    pub fn seek(&mut self, target: &[u8]) {
        let records = self.records;
        self.position(records.range::<[u8], _>((Bound::Included(target), Bound::Unbounded)));
    }

    fn position(&mut self, mut range: Range<'a, Vec<u8>, Vec<u8>>) {
        self.current = range.next();
        self.range = Some(range);
    }

    pub fn is_valid(&self) -> bool {
        self.current.is_some()
    }

    /// Current key; empty when the iterator isn't valid.
    pub fn key(&self) -> &'a [u8] {
        self.current.map(|(k, _)| k.as_slice()).unwrap_or(&[])
    }

    /// Current raw value; empty when the iterator isn't valid.
    pub fn raw_value(&self) -> &'a [u8] {
        self.current.map(|(_, v)| v.as_slice()).unwrap_or(&[])
    }

    /// Decode the current value as `T`.
    pub fn value<T: DeserializeOwned>(&self) -> Result<T> {
        match self.current {
            Some((_, v)) => decode_value(v),
            None => Err(IndexError::corrupt_value(
                "iterator is not positioned on a record".to_string(),
            )),
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) {
        self.current = self.range.as_mut().and_then(|range| range.next());
    }
}
