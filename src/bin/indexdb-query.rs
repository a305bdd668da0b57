use std::{path::PathBuf, process::ExitCode, sync::Arc, time::Duration};

use clap::Parser;
use indexdb::{
    config,
    index_db::Result,
    jobs::{build_job, JobStatus, QueryFlags, QueryKind, QueryMessage},
    logging::init_logging,
    server::Registry,
};
use tokio::sync::mpsc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(version, about = "Run a single query against an index database")]
struct Cli {
    /// Path to the JSON config file
    #[arg(short, long, env = "INDEXDB_CONFIG")]
    config: String,

    /// Which query to run
    #[arg(value_enum)]
    kind: QueryKind,

    /// Symbol name, prefix, status section or file path, depending on the kind
    #[arg(default_value = "")]
    query: String,

    /// Project root to query; inferred from the query text when omitted
    #[arg(long)]
    project: Option<PathBuf>,

    #[arg(long)]
    reverse_sort: bool,

    /// Print the result as a single elisp list
    #[arg(long)]
    elisp_list: bool,

    #[arg(long)]
    line_numbers: bool,

    /// Append the source line to each location (implies --line-numbers)
    #[arg(long)]
    context: bool,

    /// Only print lines whose path starts with this (repeatable)
    #[arg(long = "filter")]
    filters: Vec<String>,

    /// Treat filters as regular expressions
    #[arg(long)]
    match_regex: bool,

    /// Abort the query if it runs longer than this
    #[arg(long)]
    timeout_ms: Option<u64>,
}

impl Cli {
    fn query_flags(&self) -> QueryFlags {
        let mut flags = QueryFlags::empty();
        flags.set(QueryFlags::REVERSE_SORT, self.reverse_sort);
        flags.set(QueryFlags::ELISP_LIST, self.elisp_list);
        flags.set(QueryFlags::SHOW_LINE_NUMBERS, self.line_numbers || self.context);
        flags.set(QueryFlags::SHOW_CONTEXT, self.context);
        flags.set(QueryFlags::MATCH_REGEX, self.match_regex);
        flags
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("indexdb-query: {}", err);
            ExitCode::from(2)
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let registry = Arc::new(Registry::load(config::load(&cli.config)?)?);

    let mut query = QueryMessage::new(cli.kind, cli.query.clone())
        .with_flags(cli.query_flags())
        .with_path_filters(cli.filters.clone());
    if let Some(root) = &cli.project {
        query = query.with_project_root(root);
    }

    let mut job = build_job(&registry, query)?;
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    if cli.elisp_list {
        // The list is printed in one piece once the job is done.
        drop(tx);
    } else {
        job = job.with_sink(Box::new(move |line: &str| {
            let _ = tx.send(line.to_string());
        }));
    }

    let abort = job.abort_handle();
    let elisp_list = cli.elisp_list;
    // The job (and with it the sender) is dropped when the worker returns,
    // which ends the receive loop below.
    let worker = tokio::task::spawn_blocking(move || {
        let status = job.execute();
        let list = elisp_list.then(|| job.output_as_elisp_list());
        (status, list)
    });

    let timeout_ms = cli.timeout_ms;
    let watchdog = tokio::spawn(async move {
        let timeout = async {
            match timeout_ms {
                Some(ms) => tokio::time::sleep(Duration::from_millis(ms)).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("interrupted, aborting job"),
            _ = timeout => info!(timeout_ms, "timed out, aborting job"),
        }
        abort.abort();
    });

    while let Some(line) = rx.recv().await {
        println!("{}", line);
    }

    let joined = worker.await;
    watchdog.abort();
    let (status, list) = match joined {
        Ok(result) => result,
        Err(err) => {
            warn!(%err, "query worker died");
            return Ok(ExitCode::from(2));
        }
    };
    if let Some(list) = list {
        println!("{}", list);
    }

    match status {
        JobStatus::Completed => Ok(ExitCode::SUCCESS),
        _ => {
            eprintln!("indexdb-query: query {}", if status == JobStatus::Aborted { "aborted" } else { "did not finish" });
            Ok(ExitCode::from(1))
        }
    }
}
