use std::{fmt::Debug, sync::Arc, time::Duration};

use bitflags::bitflags;
use itertools::Itertools;
use regex::Regex;
use tracing::{info, info_span, warn};
use ustr::{ustr, Ustr};
use uuid::Uuid;

pub use crate::index_db::Result;
use crate::{
    index_db::{
        AbortHandle, ErrorDetails, ErrorLayer, IndexError, Location, LocationRenderer, ReadGuard,
        Store, StoreKind,
    },
    server::{Project, Registry},
};

use super::query::{QueryFlags, QueryMessage};

bitflags! {
    /// How a job treats the lines it writes.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct JobFlags: u32 {
        /// Skip path filtering.
        const WRITE_UNFILTERED = 0x1;
        /// Quote every line as an elisp string literal.
        const QUOTE_OUTPUT = 0x2;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobStatus {
    Created,
    Executing,
    Completed,
    Aborted,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Aborted)
    }
}

/// Receives each line as it is written, for streaming to a client while the
/// job is still running.  The job keeps its own copy regardless.
pub type LineSink = Box<dyn FnMut(&str) + Send>;

/// One query strategy.  Implementations scan stores through the
/// `JobContext` and never see the `Job` lifecycle.
pub trait JobCommand: Debug + Send + Sync {
    fn name(&self) -> &'static str;

    /// Run the query to completion.  Returning `Err(IndexError::Aborted)` (or
    /// `LockUnavailable`) ends the job as aborted; any other error is logged
    /// and the job still completes with whatever it wrote.
    fn execute(&self, ctx: &mut JobContext) -> Result<()>;
}

#[derive(Debug)]
enum PathFilters {
    Everything,
    Prefixes(Vec<String>),
    Patterns(Vec<Regex>),
}

impl PathFilters {
    fn new(filters: &[String], flags: QueryFlags) -> Result<PathFilters> {
        if filters.is_empty() {
            return Ok(PathFilters::Everything);
        }
        if flags.contains(QueryFlags::MATCH_REGEX) {
            let patterns = filters.iter().map(|f| Regex::new(f)).collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(PathFilters::Patterns(patterns))
        } else {
            Ok(PathFilters::Prefixes(filters.to_vec()))
        }
    }

    fn matches(&self, line: &str) -> bool {
        // Output lines are often indented; filters apply to the path text.
        let text = line.trim_start();
        match self {
            PathFilters::Everything => true,
            PathFilters::Prefixes(prefixes) => prefixes.iter().any(|p| text.starts_with(p.as_str())),
            PathFilters::Patterns(patterns) => patterns.iter().any(|re| re.is_match(text)),
        }
    }
}

/// Quote `line` as an elisp string literal.
pub fn quote_line(line: &str) -> String {
    let mut quoted = String::with_capacity(line.len() + 2);
    quoted.push('"');
    for c in line.chars() {
        if c == '"' || c == '\\' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

/// Everything a `JobCommand` may touch while it runs: the query, the store
/// handles, the abort flag and the output.
pub struct JobContext {
    registry: Arc<Registry>,
    project: Option<Arc<Project>>,
    query: QueryMessage,
    flags: JobFlags,
    abort: AbortHandle,
    filters: PathFilters,
    renderer: LocationRenderer,
    output: Vec<String>,
    sink: Option<LineSink>,
}

impl JobContext {
    pub fn query(&self) -> &QueryMessage {
        &self.query
    }

    pub fn query_flags(&self) -> QueryFlags {
        self.query.flags
    }

    pub fn flags(&self) -> JobFlags {
        self.flags
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn project(&self) -> Option<&Arc<Project>> {
        self.project.as_ref()
    }

    /// The bound project, or `Unbound` for queries that can't run without one.
    pub fn require_project(&self) -> Result<Arc<Project>> {
        self.project.clone().ok_or_else(|| {
            IndexError::Unbound(ErrorDetails {
                layer: ErrorLayer::QueryLayer,
                message: format!("{:?} query needs a project", self.query.kind),
            })
        })
    }

    pub fn lock_wait(&self) -> Duration {
        self.registry.lock_wait()
    }

    pub fn abort_handle(&self) -> &AbortHandle {
        &self.abort
    }

    pub fn is_aborted(&self) -> bool {
        self.abort.is_aborted()
    }

    /// Loop checkpoint: bail out with `Aborted` if someone asked us to stop.
    pub fn check_abort(&self) -> Result<()> {
        self.abort.check()
    }

    /// Take a read lock on `store`, giving up if we get aborted while waiting.
    /// The guard borrows the store, not the context, so the caller can keep
    /// writing output while holding it.
    pub fn read_store<'s>(&self, store: &'s Store) -> Result<ReadGuard<'s>> {
        store.read_abortable(&self.abort, self.lock_wait())
    }

    /// Path for a file id; unknown ids render as an empty path.
    pub fn path(&self, file_id: u32) -> Result<Ustr> {
        Ok(self
            .registry
            .path_for(file_id, &self.abort)?
            .unwrap_or_else(|| ustr("")))
    }

    pub fn has_path_filters(&self) -> bool {
        !matches!(self.filters, PathFilters::Everything)
    }

    /// Whether `path` passes the query's path filters, for commands that
    /// write unfiltered and filter by their own notion of a record's path.
    pub fn path_matches_filters(&self, path: &str) -> bool {
        self.filters.matches(path)
    }

    /// Render a location according to the query's key flags.
    pub fn location_key(&mut self, location: &Location) -> Result<String> {
        let path = self.path(location.file_id)?;
        Ok(self.renderer.render(location, path))
    }

    /// Append one line.  Dropped if the job has been aborted or the line
    /// doesn't pass the path filters.
    pub fn write(&mut self, line: impl Into<String>) {
        if self.is_aborted() {
            return;
        }
        self.emit(line.into());
    }

    /// Append the lines of one record.  The abort check happens once, up
    /// front, so a record is written either whole or not at all.
    pub fn write_record(&mut self, lines: Vec<String>) {
        if self.is_aborted() {
            return;
        }
        for line in lines {
            self.emit(line);
        }
    }

    fn emit(&mut self, line: String) {
        if !self.flags.contains(JobFlags::WRITE_UNFILTERED) && !self.filters.matches(&line) {
            return;
        }
        let line = if self.flags.contains(JobFlags::QUOTE_OUTPUT) {
            quote_line(&line)
        } else {
            line
        };
        if let Some(sink) = self.sink.as_mut() {
            sink(&line);
        }
        self.output.push(line);
    }
}

/// A single query execution.  Created, executed once on one thread, then
/// read for its status and output.
pub struct Job {
    id: Uuid,
    status: JobStatus,
    command: Box<dyn JobCommand>,
    ctx: JobContext,
}

impl Job {
    pub fn new(
        registry: Arc<Registry>,
        query: QueryMessage,
        flags: JobFlags,
        project: Option<Arc<Project>>,
        command: Box<dyn JobCommand>,
    ) -> Result<Job> {
        let filters = PathFilters::new(&query.path_filters, query.flags)?;
        let renderer = LocationRenderer::new(query.flags.key_flags());
        Ok(Job {
            id: Uuid::new_v4(),
            status: JobStatus::Created,
            command,
            ctx: JobContext {
                registry,
                project,
                query,
                flags,
                abort: AbortHandle::new(),
                filters,
                renderer,
                output: vec![],
                sink: None,
            },
        })
    }

    /// Stream lines to `sink` as they are written.
    pub fn with_sink(mut self, sink: LineSink) -> Self {
        self.ctx.sink = Some(sink);
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.command.name()
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn flags(&self) -> JobFlags {
        self.ctx.flags
    }

    pub fn project(&self) -> Option<&Arc<Project>> {
        self.ctx.project.as_ref()
    }

    /// A handle other threads can use to abort this job.
    pub fn abort_handle(&self) -> AbortHandle {
        self.ctx.abort.clone()
    }

    pub fn abort(&self) {
        if self.ctx.abort.abort() {
            info!(job = %self.id, "abort requested");
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.ctx.is_aborted()
    }

    pub fn write(&mut self, line: impl Into<String>) {
        self.ctx.write(line);
    }

    pub fn lines(&self) -> &[String] {
        &self.ctx.output
    }

    pub fn into_lines(self) -> Vec<String> {
        self.ctx.output
    }

    /// The output as a single elisp `(list ...)` form.  Only meaningful when
    /// lines were quoted, i.e. the query asked for `ELISP_LIST`.
    pub fn output_as_elisp_list(&self) -> String {
        if self.ctx.output.is_empty() {
            "(list)".to_string()
        } else {
            format!("(list {})", self.ctx.output.iter().join(" "))
        }
    }

    /// Run the job on the calling thread until it completes or notices an
    /// abort.  Never fails; a job that already ran just reports its status.
    pub fn execute(&mut self) -> JobStatus {
        let span = info_span!("job", kind = self.command.name(), uuid = %self.id);
        let _entered = span.enter();

        if self.status != JobStatus::Created {
            warn!(status = ?self.status, "job executed twice");
            return self.status;
        }
        self.status = JobStatus::Executing;

        let result = match self.ctx.check_abort() {
            Ok(()) => self.command.execute(&mut self.ctx),
            Err(err) => Err(err),
        };

        self.status = match result {
            Ok(()) if self.ctx.is_aborted() => JobStatus::Aborted,
            Ok(()) => JobStatus::Completed,
            Err(err) if err.is_abort() => JobStatus::Aborted,
            Err(IndexError::Unbound(details)) => {
                info!(message = %details.message, "no project bound, nothing to do");
                JobStatus::Completed
            }
            Err(err) => {
                warn!(%err, "job failed; keeping partial output");
                JobStatus::Completed
            }
        };

        info!(status = ?self.status, lines = self.ctx.output.len(), "job finished");
        self.status
    }
}

/// Helper for commands: the project's store of `kind`.
pub fn project_store(project: &Project, kind: StoreKind) -> Result<&Store> {
    project.store(kind).ok_or_else(|| {
        IndexError::bad_input(format!("{} is not a project store", kind.name()))
    })
}

/// Helper for commands: the registry's global store of `kind`.
pub fn global_store(registry: &Registry, kind: StoreKind) -> Result<&Store> {
    registry.global_store(kind).ok_or_else(|| {
        IndexError::bad_input(format!("{} is not a global store", kind.name()))
    })
}
