use std::fmt;

pub type Result<T> = std::result::Result<T, IndexError>;

// JSON parse errors are sticky data problems.
impl From<serde_json::Error> for IndexError {
    fn from(err: serde_json::Error) -> IndexError {
        IndexError::CorruptRecord(ErrorDetails {
            layer: ErrorLayer::ValueLayer,
            message: err.to_string(),
        })
    }
}

/// IO errors only happen when loading configs and snapshots, so they are
/// attributed to the configuration rather than to the indexed data.
impl From<std::io::Error> for IndexError {
    fn from(err: std::io::Error) -> IndexError {
        IndexError::BadInput(ErrorDetails {
            layer: ErrorLayer::ConfigLayer,
            message: err.to_string(),
        })
    }
}

impl From<regex::Error> for IndexError {
    fn from(err: regex::Error) -> IndexError {
        IndexError::BadInput(ErrorDetails {
            layer: ErrorLayer::QueryLayer,
            message: err.to_string(),
        })
    }
}

/// Express where a problem was detected.
#[derive(Clone, Debug, PartialEq)]
pub enum ErrorLayer {
    /// A raw store key did not have the shape its store expects, like a
    /// location key that isn't exactly 8 bytes.
    KeyLayer,
    /// A stored value failed to decode into the record type the reader asked
    /// for.
    ValueLayer,
    /// Lock acquisition gave up.  This only happens when the caller asked to be
    /// aborted while it was still waiting.
    LockLayer,
    /// The query itself is unusable, like a bad path filter regex.
    QueryLayer,
    /// Config files and on-disk snapshots.
    ConfigLayer,
}

/// Details about what went wrong for investigation purposes.
#[derive(Clone, Debug)]
pub struct ErrorDetails {
    pub layer: ErrorLayer,
    /// Stringified version of the lower level error.
    pub message: String,
}

/// Errors produced by the store layer and surfaced (but never propagated past
/// `Job::execute`) by jobs.
///
/// Note that a query that matches nothing is not an error; it's a successful
/// empty result.
#[derive(Clone, Debug)]
pub enum IndexError {
    /// A key or value failed to decode.  Scans log these and move on to the
    /// next record since dumps exist precisely to reveal this kind of thing.
    CorruptRecord(ErrorDetails),
    /// A bounded lock wait ran out while an abort was pending.  Jobs treat
    /// this exactly like `Aborted`.
    LockUnavailable(ErrorDetails),
    /// A project-scoped operation was requested without a bound project.
    Unbound(ErrorDetails),
    /// Something about the request or configuration makes it impossible to
    /// even start.
    BadInput(ErrorDetails),
    /// Cooperative cancellation was observed at a checkpoint.
    Aborted,
}

impl IndexError {
    pub fn corrupt_key(message: String) -> IndexError {
        IndexError::CorruptRecord(ErrorDetails {
            layer: ErrorLayer::KeyLayer,
            message,
        })
    }

    pub fn corrupt_value(message: String) -> IndexError {
        IndexError::CorruptRecord(ErrorDetails {
            layer: ErrorLayer::ValueLayer,
            message,
        })
    }

    pub fn bad_input(message: String) -> IndexError {
        IndexError::BadInput(ErrorDetails {
            layer: ErrorLayer::QueryLayer,
            message,
        })
    }

    pub fn is_corrupt_key(&self) -> bool {
        matches!(
            self,
            IndexError::CorruptRecord(ErrorDetails {
                layer: ErrorLayer::KeyLayer,
                ..
            })
        )
    }

    pub fn is_corrupt_value(&self) -> bool {
        matches!(
            self,
            IndexError::CorruptRecord(ErrorDetails {
                layer: ErrorLayer::ValueLayer,
                ..
            })
        )
    }

    /// Both flavors of cancellation end a job the same way.
    pub fn is_abort(&self) -> bool {
        matches!(self, IndexError::Aborted | IndexError::LockUnavailable(_))
    }
}

impl fmt::Display for IndexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexError::CorruptRecord(d) => write!(f, "corrupt record ({:?}): {}", d.layer, d.message),
            IndexError::LockUnavailable(d) => write!(f, "lock unavailable: {}", d.message),
            IndexError::Unbound(d) => write!(f, "no project bound: {}", d.message),
            IndexError::BadInput(d) => write!(f, "bad input ({:?}): {}", d.layer, d.message),
            IndexError::Aborted => write!(f, "aborted"),
        }
    }
}

impl std::error::Error for IndexError {}
