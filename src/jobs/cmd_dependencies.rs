use std::collections::BTreeSet;

use tracing::{trace, warn};

use super::interface::{global_store, project_store, JobCommand, JobContext, Result};
use crate::index_db::{
    location::{decode_file_id, encode_file_id},
    StoreKind, StoreRead,
};

/// What one file includes, and what includes it.
#[derive(Debug)]
pub struct DependenciesCommand {
    pub path: String,
}

impl JobCommand for DependenciesCommand {
    fn name(&self) -> &'static str {
        "dependencies"
    }

    fn execute(&self, ctx: &mut JobContext) -> Result<()> {
        let project = ctx.require_project()?;
        let registry = ctx.registry().clone();

        let file_id = {
            let file_ids = ctx.read_store(global_store(&registry, StoreKind::FileIds)?)?;
            file_ids.get::<u32>(self.path.as_bytes())?
        };
        let Some(file_id) = file_id else {
            trace!(path = %self.path, "unknown file");
            return Ok(());
        };

        let mut depends_on = BTreeSet::new();
        let mut depended_on_by = BTreeSet::new();
        {
            let deps = ctx.read_store(project_store(&project, StoreKind::Dependencies)?)?;
            match deps.get::<BTreeSet<u32>>(&encode_file_id(file_id)) {
                Ok(found) => depends_on = found.unwrap_or_default(),
                Err(err) => warn!(%err, file_id, "corrupt dependency record"),
            }

            let mut it = deps.create_iterator();
            it.seek_to_first();
            while it.is_valid() {
                ctx.check_abort()?;
                let record = decode_file_id(it.key()).and_then(|id| Ok((id, it.value::<BTreeSet<u32>>()?)));
                match record {
                    Ok((other, others_deps)) if others_deps.contains(&file_id) => {
                        depended_on_by.insert(other);
                    }
                    Ok(_) => {}
                    Err(err) => warn!(%err, "skipping corrupt dependency record"),
                }
                it.next();
            }
        }

        ctx.write(format!("{} depends on:", self.path));
        for dep in depends_on {
            ctx.check_abort()?;
            let line = format!("  {}", ctx.path(dep)?);
            ctx.write(line);
        }
        ctx.write(format!("{} is depended on by:", self.path));
        for dependent in depended_on_by {
            ctx.check_abort()?;
            let line = format!("  {}", ctx.path(dependent)?);
            ctx.write(line);
        }
        Ok(())
    }
}
