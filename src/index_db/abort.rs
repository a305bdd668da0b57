//! Cooperative cancellation for jobs.
//!
//! An `AbortHandle` is a shared flag.  The owner of a job (a client connection,
//! a shutdown hook, a watchdog) keeps a clone and calls `abort()`; the job polls
//! `is_aborted()` at its checkpoints.  Nothing is ever interrupted
//! preemptively.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use super::db_interface::{IndexError, Result};

#[derive(Clone, Debug, Default)]
pub struct AbortHandle {
    flag: Arc<AtomicBool>,
}

impl AbortHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.  Safe to call from any thread and any number of
    /// times; returns true only for the call that actually flipped the flag.
    pub fn abort(&self) -> bool {
        !self.flag.swap(true, Ordering::SeqCst)
    }

    #[inline]
    pub fn is_aborted(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Checkpoint helper so loops can bail out with `?`.
    #[inline]
    pub fn check(&self) -> Result<()> {
        if self.is_aborted() {
            Err(IndexError::Aborted)
        } else {
            Ok(())
        }
    }
}
