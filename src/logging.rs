use lazy_static::lazy_static;
use parking_lot::Mutex;
use tracing_subscriber::{
    fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer,
};

lazy_static! {
    static ref LOGGING_INITIALIZED: Mutex<bool> = Mutex::new(false);
}

/// Initialize logging.  Safe to call more than once; only the first call does
/// anything.
///
/// Nothing is logged unless the environment variable `RUST_LOG` is set to a
/// *non-empty* value, which is then interpreted as an `EnvFilter`.  Scripts
/// frequently set RUST_LOG unconditionally but empty, and that shouldn't be
/// read as a desire to enable logging.
pub fn init_logging() {
    let mut initialized = LOGGING_INITIALIZED.lock();
    if *initialized {
        return;
    }
    *initialized = true;

    let rustlog = std::env::var("RUST_LOG").unwrap_or_default();
    if rustlog.is_empty() {
        return;
    }
    let Ok(env_filter) = EnvFilter::try_from_default_env() else {
        return;
    };

    let layer = tracing_subscriber::fmt::layer()
        // Job spans close when the job finishes, which gives us its timing.
        .with_span_events(FmtSpan::CLOSE)
        .compact()
        .with_ansi(false)
        // Wall time mostly adds columns; span timings are what matter.
        .without_time()
        // stdout carries query output.
        .with_writer(std::io::stderr)
        .with_filter(env_filter);

    // Someone else (a test harness, an embedding server) may have installed a
    // subscriber already, in which case theirs wins.
    let _ = tracing_subscriber::registry().with(layer).try_init();
}
