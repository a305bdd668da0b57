use std::{path::Path, sync::Arc};

use tracing::{trace, trace_span};

use super::{
    cmd_dependencies::DependenciesCommand,
    cmd_find_symbols::FindSymbolsCommand,
    cmd_list_symbols::ListSymbolsCommand,
    cmd_status::StatusCommand,
    interface::{Job, JobCommand, JobFlags, Result},
    query::{QueryFlags, QueryKind, QueryMessage},
};
use crate::server::{Project, Registry};

pub fn fab_command_from_query(query: &QueryMessage) -> Box<dyn JobCommand> {
    match query.kind {
        QueryKind::FindSymbols => Box::new(FindSymbolsCommand {
            symbol_name: query.query.clone(),
        }),

        QueryKind::ListSymbols => Box::new(ListSymbolsCommand {
            prefix: query.query.clone(),
        }),

        QueryKind::Status => Box::new(StatusCommand::new(&query.query)),

        QueryKind::Dependencies => Box::new(DependenciesCommand {
            path: query.query.clone(),
        }),
    }
}

/// Output handling each kind of query asks for.
pub fn job_flags_for(query: &QueryMessage) -> JobFlags {
    let quote = if query.flags.contains(QueryFlags::ELISP_LIST) {
        JobFlags::QUOTE_OUTPUT
    } else {
        JobFlags::empty()
    };
    match query.kind {
        // Symbol listing filters names by their locations' paths itself.
        QueryKind::FindSymbols | QueryKind::ListSymbols => JobFlags::WRITE_UNFILTERED | quote,
        QueryKind::Status => JobFlags::WRITE_UNFILTERED,
        QueryKind::Dependencies => quote,
    }
}

/// The project a query runs against: the explicit root if one was given,
/// otherwise whichever project contains the query text when read as a path,
/// otherwise the only project if there is exactly one.
pub fn resolve_project(registry: &Registry, query: &QueryMessage) -> Option<Arc<Project>> {
    if let Some(root) = &query.project_root {
        return registry.project(root);
    }
    if let Some(project) = registry.project_for_path(Path::new(&query.query)) {
        return Some(project);
    }
    let projects = registry.projects();
    if projects.len() == 1 {
        projects.into_iter().next()
    } else {
        None
    }
}

/// Turn a decoded request into a ready-to-run `Job`.
pub fn build_job(registry: &Arc<Registry>, query: QueryMessage) -> Result<Job> {
    let span = trace_span!("build_job", kind = query.kind.name());
    let _entered = span.enter();

    let command = fab_command_from_query(&query);
    let flags = job_flags_for(&query);
    let project = resolve_project(registry, &query);
    trace!(
        project = ?project.as_ref().map(|p| p.root().to_path_buf()),
        ?flags,
        "built job"
    );
    Job::new(registry.clone(), query, flags, project, command)
}
