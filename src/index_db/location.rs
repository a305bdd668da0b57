//! Source locations and their binary key encoding.
//!
//! Every store keyed by location relies on the encoded bytes sorting exactly
//! like the `Location` values themselves, so that seeking and scanning in key
//! order is a scan in (file, offset) order.  We achieve that by writing both
//! components big-endian: for fixed-width unsigned integers, byte-wise
//! comparison of the big-endian form is numeric comparison.

use std::{collections::HashMap, fmt, fs, sync::Arc, time::Duration};

use bitflags::bitflags;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::warn;
use ustr::{ustr, Ustr};

use super::{
    abort::AbortHandle,
    db_interface::{IndexError, Result},
    store::{Store, StoreRead},
};

pub const LOCATION_KEY_LEN: usize = 8;
pub const FILE_ID_KEY_LEN: usize = 4;

/// The field order matters: the derived `Ord` compares `file_id` first and
/// then `offset`, which is the total order all location-keyed stores use.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Location {
    pub file_id: u32,
    pub offset: u32,
}

impl Location {
    pub fn new(file_id: u32, offset: u32) -> Self {
        Location { file_id, offset }
    }

    pub fn to_key(&self) -> [u8; LOCATION_KEY_LEN] {
        let mut key = [0u8; LOCATION_KEY_LEN];
        key[..4].copy_from_slice(&self.file_id.to_be_bytes());
        key[4..].copy_from_slice(&self.offset.to_be_bytes());
        key
    }

    pub fn from_key(key: &[u8]) -> Result<Location> {
        let bytes: [u8; LOCATION_KEY_LEN] = key.try_into().map_err(|_| {
            IndexError::corrupt_key(format!(
                "location key must be {} bytes, got {}",
                LOCATION_KEY_LEN,
                key.len()
            ))
        })?;
        let (file_id, offset) = bytes.split_at(4);
        Ok(Location {
            file_id: u32::from_be_bytes([file_id[0], file_id[1], file_id[2], file_id[3]]),
            offset: u32::from_be_bytes([offset[0], offset[1], offset[2], offset[3]]),
        })
    }
}

impl fmt::Display for Location {
    /// Path-less rendering for logs.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file_id, self.offset)
    }
}

pub fn encode_file_id(file_id: u32) -> [u8; FILE_ID_KEY_LEN] {
    file_id.to_be_bytes()
}

pub fn decode_file_id(key: &[u8]) -> Result<u32> {
    let bytes: [u8; FILE_ID_KEY_LEN] = key.try_into().map_err(|_| {
        IndexError::corrupt_key(format!(
            "file id key must be {} bytes, got {}",
            FILE_ID_KEY_LEN,
            key.len()
        ))
    })?;
    Ok(u32::from_be_bytes(bytes))
}

bitflags! {
    /// Flags controlling how a `Location` renders as text.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct KeyFlags: u32 {
        /// Render as `path:line:column:` instead of `path,offset`.
        const SHOW_LINE_NUMBERS = 0x1;
        /// Append a tab and the text of the line the location is on.
        const SHOW_CONTEXT = 0x2;
    }
}

/// Memoized fileId -> path resolution.
///
/// The FileIds store is keyed by path, so a reverse lookup is a full scan.  On
/// a miss we perform that scan once and remember every mapping we saw; since
/// ids are never reused or remapped, entries never go stale.  Ids the scan
/// didn't find are remembered as unknown until `insert` registers them, so a
/// dangling id costs one scan rather than one per lookup.
///
/// Lock ordering: the cache lock is only ever taken after (never before) the
/// FileIds store lock, matching `Registry::register_file`.
#[derive(Debug, Default)]
pub struct PathCache {
    paths: RwLock<HashMap<u32, Option<Ustr>>>,
}

impl PathCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, file_id: u32, path: Ustr) {
        self.paths.write().insert(file_id, Some(path));
    }

    pub fn get(&self, file_id: u32) -> Option<Ustr> {
        self.paths.read().get(&file_id).copied().flatten()
    }

    /// Number of resolved paths held.
    pub fn len(&self) -> usize {
        self.paths.read().values().filter(|path| path.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resolve `file_id`, scanning `file_ids` on a miss.  Returns `Ok(None)`
    /// for ids the store doesn't know about.
    pub fn resolve(
        &self,
        file_id: u32,
        file_ids: &Store,
        abort: &AbortHandle,
        lock_wait: Duration,
    ) -> Result<Option<Ustr>> {
        if let Some(cached) = self.paths.read().get(&file_id) {
            return Ok(*cached);
        }

        let guard = file_ids.read_abortable(abort, lock_wait)?;
        let mut paths = self.paths.write();
        // Another resolver may have scanned while we waited for the locks.
        if let Some(cached) = paths.get(&file_id) {
            return Ok(*cached);
        }
        let mut found = None;
        let mut it = guard.create_iterator();
        it.seek_to_first();
        while it.is_valid() {
            match it.value::<u32>() {
                Ok(id) => {
                    let path = ustr(&String::from_utf8_lossy(it.key()));
                    if id == file_id {
                        found = Some(path);
                    }
                    paths.insert(id, Some(path));
                }
                Err(err) => {
                    warn!(key = ?it.key(), %err, "skipping corrupt file id record");
                }
            }
            it.next();
        }
        if found.is_none() {
            paths.insert(file_id, None);
        }
        Ok(found)
    }
}

/// Turns locations into text, caching source file contents for the
/// line-number and context flags.
pub struct LocationRenderer {
    flags: KeyFlags,
    sources: HashMap<Ustr, Option<Arc<String>>>,
}

impl LocationRenderer {
    pub fn new(flags: KeyFlags) -> Self {
        LocationRenderer {
            flags,
            sources: HashMap::new(),
        }
    }

    pub fn flags(&self) -> KeyFlags {
        self.flags
    }

    fn source(&mut self, path: Ustr) -> Option<Arc<String>> {
        self.sources
            .entry(path)
            .or_insert_with(|| fs::read_to_string(path.as_str()).ok().map(Arc::new))
            .clone()
    }

    pub fn render(&mut self, location: &Location, path: Ustr) -> String {
        if !self.flags.contains(KeyFlags::SHOW_LINE_NUMBERS) {
            return format!("{},{}", path, location.offset);
        }

        let position = self
            .source(path)
            .and_then(|text| line_and_column(&text, location.offset as usize));
        match position {
            Some((line, column, line_text)) => {
                if self.flags.contains(KeyFlags::SHOW_CONTEXT) {
                    format!("{}:{}:{}:\t{}", path, line, column, line_text)
                } else {
                    format!("{}:{}:{}:", path, line, column)
                }
            }
            None => format!("{},{}", path, location.offset),
        }
    }
}

/// 1-based line and column for a byte offset, plus the text of that line.
/// `None` if the offset is past the end of the text.
fn line_and_column(text: &str, offset: usize) -> Option<(usize, usize, String)> {
    if offset > text.len() {
        return None;
    }
    let bytes = text.as_bytes();
    let before = &bytes[..offset];
    let line = before.iter().filter(|b| **b == b'\n').count() + 1;
    let line_start = before
        .iter()
        .rposition(|b| *b == b'\n')
        .map(|pos| pos + 1)
        .unwrap_or(0);
    let line_end = bytes[offset..]
        .iter()
        .position(|b| *b == b'\n')
        .map(|pos| offset + pos)
        .unwrap_or(bytes.len());
    let line_text = String::from_utf8_lossy(&bytes[line_start..line_end])
        .trim_end_matches('\r')
        .to_string();
    Some((line, offset - line_start + 1, line_text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::temp_dir::TempDir;
    use proptest::prelude::*;

    #[test]
    fn key_round_trip_and_shape() {
        let loc = Location::new(7, 1234);
        let key = loc.to_key();
        assert_eq!(key, [0, 0, 0, 7, 0, 0, 0x04, 0xd2]);
        assert_eq!(Location::from_key(&key).unwrap(), loc);
    }

    #[test]
    fn bad_key_lengths_are_corrupt_keys() {
        for bad in [&[][..], &[1, 2, 3][..], &[0; 9][..]] {
            let err = Location::from_key(bad).unwrap_err();
            assert!(err.is_corrupt_key(), "{:?}", err);
        }
        assert!(decode_file_id(&[0, 0, 1]).unwrap_err().is_corrupt_key());
        assert_eq!(decode_file_id(&encode_file_id(513)).unwrap(), 513);
    }

    #[test]
    fn file_id_dominates_offset() {
        // A naive little-endian encoding would get this wrong.
        let a = Location::new(1, u32::MAX);
        let b = Location::new(2, 0);
        assert!(a < b);
        assert!(a.to_key() < b.to_key());
    }

    proptest! {
        #[test]
        fn location_order_is_lexicographic(fa: u32, oa: u32, fb: u32, ob: u32) {
            let a = Location::new(fa, oa);
            let b = Location::new(fb, ob);
            let expected_less = fa < fb || (fa == fb && oa < ob);
            prop_assert_eq!(a < b, expected_less);
            prop_assert_eq!(a.cmp(&b), (fa, oa).cmp(&(fb, ob)));
        }

        #[test]
        fn key_bytes_preserve_location_order(fa: u32, oa: u32, fb: u32, ob: u32) {
            let a = Location::new(fa, oa);
            let b = Location::new(fb, ob);
            prop_assert_eq!(a.to_key().cmp(&b.to_key()), a.cmp(&b));
        }
    }

    #[test]
    fn line_and_column_math() {
        let text = "int a;\nint foo() {\r\n  return a;\n}\n";
        assert_eq!(line_and_column(text, 0), Some((1, 1, "int a;".to_string())));
        assert_eq!(line_and_column(text, 11), Some((2, 5, "int foo() {".to_string())));
        assert_eq!(line_and_column(text, 10_000), None);
    }

    #[test]
    fn render_falls_back_without_source() {
        let loc = Location::new(3, 42);
        let mut plain = LocationRenderer::new(KeyFlags::empty());
        assert_eq!(plain.render(&loc, ustr("/src/a.cpp")), "/src/a.cpp,42");

        let mut numbered = LocationRenderer::new(KeyFlags::SHOW_LINE_NUMBERS);
        assert_eq!(
            numbered.render(&loc, ustr("/definitely/not/here.cpp")),
            "/definitely/not/here.cpp,42"
        );
    }

    #[test]
    fn render_line_numbers_and_context_from_source() {
        let dir = TempDir::new("indexdb-render-test");
        let file = dir.join("main.cpp");
        fs::write(&file, "int a;\nint foo() {\n  return a;\n}\n").unwrap();
        let path = ustr(&file.to_string_lossy());
        let loc = Location::new(1, 11);

        let mut numbered = LocationRenderer::new(KeyFlags::SHOW_LINE_NUMBERS);
        assert_eq!(numbered.render(&loc, path), format!("{}:2:5:", path));

        let mut context = LocationRenderer::new(KeyFlags::SHOW_LINE_NUMBERS | KeyFlags::SHOW_CONTEXT);
        assert_eq!(context.render(&loc, path), format!("{}:2:5:\tint foo() {{", path));
        assert_eq!(
            context.render(&Location::new(1, 21), path),
            format!("{}:3:3:\t  return a;", path)
        );

        // Offsets past the end fall back to the plain form.
        assert_eq!(context.render(&Location::new(1, 500), path), format!("{},500", path));
    }

    #[test]
    fn unknown_file_ids_are_scanned_for_once() {
        use crate::index_db::StoreKind;

        let store = Store::new(StoreKind::FileIds, "/tmp/indexdb-unused".into());
        store.acquire_write().put(b"/src/a.cpp", &1u32).unwrap();
        let cache = PathCache::new();
        let abort = AbortHandle::new();
        let wait = Duration::from_millis(10);

        assert_eq!(cache.resolve(1, &store, &abort, wait).unwrap(), Some(ustr("/src/a.cpp")));
        assert_eq!(cache.resolve(7, &store, &abort, wait).unwrap(), None);

        // The miss is remembered, so a record written behind the cache's back
        // isn't seen.
        store.acquire_write().put(b"/src/b.cpp", &7u32).unwrap();
        assert_eq!(cache.resolve(7, &store, &abort, wait).unwrap(), None);
        assert_eq!(cache.len(), 1);

        // Registering the id replaces the remembered miss.
        cache.insert(7, ustr("/src/b.cpp"));
        assert_eq!(cache.resolve(7, &store, &abort, wait).unwrap(), Some(ustr("/src/b.cpp")));
        assert_eq!(cache.get(7), Some(ustr("/src/b.cpp")));
    }
}
