use std::path::PathBuf;

use bitflags::bitflags;
use clap::ValueEnum;

use crate::index_db::KeyFlags;

/// Which query strategy a `QueryMessage` asks for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum QueryKind {
    /// Exact symbol-name lookup; an empty query means every symbol.
    FindSymbols,
    /// Symbol names starting with the query.
    ListSymbols,
    /// Store dump, optionally restricted to one section.
    Status,
    /// Forward and reverse dependencies of one file.
    Dependencies,
}

impl QueryKind {
    pub fn name(&self) -> &'static str {
        match self {
            QueryKind::FindSymbols => "find-symbols",
            QueryKind::ListSymbols => "list-symbols",
            QueryKind::Status => "status",
            QueryKind::Dependencies => "dependencies",
        }
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct QueryFlags: u32 {
        /// Invert the whole result ordering.
        const REVERSE_SORT = 0x1;
        /// The client wants an elisp list, which implies quoted lines.
        const ELISP_LIST = 0x2;
        const SHOW_LINE_NUMBERS = 0x4;
        const SHOW_CONTEXT = 0x8;
        /// Path filters are regular expressions rather than prefixes.
        const MATCH_REGEX = 0x10;
    }
}

impl QueryFlags {
    /// The subset of flags that shape how locations render.
    pub fn key_flags(&self) -> KeyFlags {
        let mut key_flags = KeyFlags::empty();
        if self.contains(QueryFlags::SHOW_LINE_NUMBERS) {
            key_flags |= KeyFlags::SHOW_LINE_NUMBERS;
        }
        if self.contains(QueryFlags::SHOW_CONTEXT) {
            key_flags |= KeyFlags::SHOW_CONTEXT;
        }
        key_flags
    }
}

/// A decoded client request.
#[derive(Clone, Debug)]
pub struct QueryMessage {
    pub kind: QueryKind,
    pub query: String,
    pub flags: QueryFlags,
    pub path_filters: Vec<String>,
    /// Explicit project to run against.  When absent, the project is inferred
    /// from the query text if it looks like a path inside a known project.
    pub project_root: Option<PathBuf>,
}

impl QueryMessage {
    pub fn new(kind: QueryKind, query: impl Into<String>) -> Self {
        QueryMessage {
            kind,
            query: query.into(),
            flags: QueryFlags::empty(),
            path_filters: vec![],
            project_root: None,
        }
    }

    pub fn with_flags(mut self, flags: QueryFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_path_filters(mut self, filters: Vec<String>) -> Self {
        self.path_filters = filters;
        self
    }

    pub fn with_project_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.project_root = Some(root.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_flags_only_carry_rendering_bits() {
        let flags = QueryFlags::REVERSE_SORT | QueryFlags::SHOW_LINE_NUMBERS | QueryFlags::ELISP_LIST;
        assert_eq!(flags.key_flags(), KeyFlags::SHOW_LINE_NUMBERS);
        assert_eq!(QueryFlags::empty().key_flags(), KeyFlags::empty());
    }
}
