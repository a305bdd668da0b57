use std::{cmp::Ordering, collections::BTreeSet};

use tracing::{trace, warn};

use super::{
    interface::{project_store, JobCommand, JobContext, Result},
    query::QueryFlags,
};
use crate::index_db::{records::CursorInfo, Location, StoreKind, StoreRead};

/// Exact symbol-name lookup.  Emits every location indexed under the name,
/// definitions first.  An empty name matches every symbol.
#[derive(Debug)]
pub struct FindSymbolsCommand {
    pub symbol_name: String,
}

/// A location paired with whether the cursor there is a definition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LocationAndDefinition {
    pub location: Location,
    pub is_definition: bool,
}

impl Ord for LocationAndDefinition {
    /// Definitions before everything else, then location order.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .is_definition
            .cmp(&self.is_definition)
            .then_with(|| self.location.cmp(&other.location))
    }
}

impl PartialOrd for LocationAndDefinition {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Sort for output.  Reverse sorting flips the whole comparator, so
/// definitions end up last and locations descend within each group.
pub fn sort_for_output(entries: &mut [LocationAndDefinition], reverse: bool) {
    if reverse {
        entries.sort_by(|a, b| b.cmp(a));
    } else {
        entries.sort();
    }
}

impl JobCommand for FindSymbolsCommand {
    fn name(&self) -> &'static str {
        "find-symbols"
    }

    fn execute(&self, ctx: &mut JobContext) -> Result<()> {
        let project = ctx.require_project()?;
        let needle = self.symbol_name.as_bytes();

        // ## Collect locations from the name index
        let mut found: BTreeSet<Location> = BTreeSet::new();
        {
            let names = ctx.read_store(project_store(&project, StoreKind::SymbolNames)?)?;
            let mut it = names.create_iterator();
            if needle.is_empty() {
                it.seek_to_first();
            } else {
                it.seek(needle);
            }
            while it.is_valid() {
                ctx.check_abort()?;
                // Keys are sorted and seek put us at the first key >= needle,
                // so the exact matches are contiguous and the first mismatch
                // is past all of them.
                if !needle.is_empty() && it.key() != needle {
                    break;
                }
                match it.value::<BTreeSet<Location>>() {
                    Ok(locations) => found.extend(locations),
                    Err(err) => {
                        warn!(key = %String::from_utf8_lossy(it.key()), %err, "skipping corrupt symbol name record");
                    }
                }
                it.next();
            }
        }
        trace!(count = found.len(), "collected locations");

        // ## Look up definition status, one store at a time
        ctx.check_abort()?;
        let mut sorted = Vec::with_capacity(found.len());
        {
            let symbols = ctx.read_store(project_store(&project, StoreKind::Symbols)?)?;
            for location in found {
                ctx.check_abort()?;
                let is_definition = match symbols.get::<CursorInfo>(&location.to_key()) {
                    Ok(Some(info)) => info.is_definition,
                    Ok(None) => false,
                    Err(err) => {
                        warn!(%location, %err, "skipping corrupt cursor info");
                        false
                    }
                };
                sorted.push(LocationAndDefinition {
                    location,
                    is_definition,
                });
            }
        }

        sort_for_output(&mut sorted, ctx.query_flags().contains(QueryFlags::REVERSE_SORT));

        for entry in sorted {
            ctx.check_abort()?;
            let line = ctx.location_key(&entry.location)?;
            ctx.write(line);
        }
        Ok(())
    }
}
