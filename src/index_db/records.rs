//! Value types stored by the indexer and read back by jobs, plus the checked
//! value codec.  Values are JSON bytes; nothing is ever reinterpreted in
//! place.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{TimeZone, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use super::{db_interface::Result, location::Location};

/// Keys used in the General store.
pub const GENERAL_VERSION_KEY: &[u8] = b"version";
pub const GENERAL_MAKEFILES_KEY: &[u8] = b"makefiles";
pub const GENERAL_PCH_KEY: &[u8] = b"pch";

pub const DATABASE_VERSION: u32 = 1;

pub fn encode_value<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

/// Decoding failures come back as `CorruptRecord` on the value layer.
pub fn decode_value<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(serde_json::from_slice(bytes)?)
}

/// What the indexer knows about the cursor at a `Location`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorInfo {
    pub symbol_name: String,
    pub kind: String,
    #[serde(default)]
    pub is_definition: bool,
    /// Declarations/definitions this cursor refers to.
    #[serde(default)]
    pub targets: BTreeSet<Location>,
    #[serde(default)]
    pub references: BTreeSet<Location>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInformation {
    /// Seconds since the epoch.
    pub last_touched: i64,
    #[serde(default)]
    pub compile_args: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MakefileInformation {
    pub last_touched: i64,
    #[serde(default)]
    pub makefile_args: Vec<String>,
    #[serde(default)]
    pub extra_flags: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PchInformation {
    pub last_touched: i64,
    #[serde(default)]
    pub args: Vec<String>,
}

/// Build-root path -> makefile metadata, stored under `GENERAL_MAKEFILES_KEY`.
pub type MakefileMap = BTreeMap<String, MakefileInformation>;
/// Header path -> precompiled header metadata, stored under `GENERAL_PCH_KEY`.
pub type PchMap = BTreeMap<String, PchInformation>;

/// Render a unix timestamp the way status dumps print it, in UTC so the
/// output doesn't depend on the machine it runs on.
pub fn time_to_string(secs: i64) -> String {
    match Utc.timestamp_opt(secs, 0).single() {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => format!("@{}", secs),
    }
}
