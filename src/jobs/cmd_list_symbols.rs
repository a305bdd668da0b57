use std::collections::BTreeSet;

use tracing::warn;

use super::{
    interface::{project_store, JobCommand, JobContext, Result},
    query::QueryFlags,
};
use crate::index_db::{Location, StoreKind, StoreRead};

/// Every symbol name starting with `prefix`, in name order.  With path
/// filters, a name is listed only if one of its locations is in a file that
/// passes them.
#[derive(Debug)]
pub struct ListSymbolsCommand {
    pub prefix: String,
}

impl JobCommand for ListSymbolsCommand {
    fn name(&self) -> &'static str {
        "list-symbols"
    }

    fn execute(&self, ctx: &mut JobContext) -> Result<()> {
        let project = ctx.require_project()?;
        let prefix = self.prefix.as_bytes();
        let filtered = ctx.has_path_filters();

        let mut names: Vec<(String, BTreeSet<Location>)> = vec![];
        {
            let guard = ctx.read_store(project_store(&project, StoreKind::SymbolNames)?)?;
            let mut it = guard.create_iterator();
            it.seek(prefix);
            while it.is_valid() && it.key().starts_with(prefix) {
                ctx.check_abort()?;
                let name = String::from_utf8_lossy(it.key()).into_owned();
                if !filtered {
                    names.push((name, BTreeSet::new()));
                } else {
                    match it.value::<BTreeSet<Location>>() {
                        Ok(locations) => names.push((name, locations)),
                        Err(err) => warn!(%name, %err, "skipping corrupt symbol name record"),
                    }
                }
                it.next();
            }
        }

        if ctx.query_flags().contains(QueryFlags::REVERSE_SORT) {
            names.reverse();
        }
        for (name, locations) in names {
            ctx.check_abort()?;
            if filtered && !self.any_location_matches(ctx, &locations)? {
                continue;
            }
            ctx.write(name);
        }
        Ok(())
    }
}

impl ListSymbolsCommand {
    fn any_location_matches(&self, ctx: &JobContext, locations: &BTreeSet<Location>) -> Result<bool> {
        let mut seen_files = BTreeSet::new();
        for location in locations {
            if !seen_files.insert(location.file_id) {
                continue;
            }
            if ctx.path_matches_filters(ctx.path(location.file_id)?.as_str()) {
                return Ok(true);
            }
        }
        Ok(false)
    }
}
