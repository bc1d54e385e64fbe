//! Cancellation and warning collection for the streaming parsers.
//!
//! A [`ParseContext`] is handed to every driver call. It carries a
//! [`CancellationToken`] that the driver polls once per record and a
//! [`WarningLog`] that receives every recoverable per-record rejection.

use crate::error::Rejection;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// The number of warning messages a [`WarningLog`] keeps by default.
pub const DEFAULT_WARNING_SAMPLE: usize = 50;

/// A cloneable stop flag. Any clone can cancel; every clone observes it.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> CancellationToken {
        CancellationToken::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Counts recoverable rejections and keeps the first few messages for
/// display.
#[derive(Debug, Clone)]
pub struct WarningLog {
    count: usize,
    sample: Vec<String>,
    capacity: usize,
}

impl Default for WarningLog {
    fn default() -> WarningLog {
        WarningLog::with_capacity(DEFAULT_WARNING_SAMPLE)
    }
}

impl WarningLog {
    pub fn new() -> WarningLog {
        WarningLog::default()
    }

    /// A log that keeps at most `capacity` messages. The count is unbounded.
    pub fn with_capacity(capacity: usize) -> WarningLog {
        WarningLog {
            count: 0,
            sample: Vec::new(),
            capacity,
        }
    }

    pub fn push(&mut self, rejection: &Rejection) {
        let msg = rejection.to_string();
        debug!("{}", msg);
        self.count += 1;
        if self.sample.len() < self.capacity {
            self.sample.push(msg);
        }
    }

    /// The total number of warnings, including the ones not kept.
    pub fn count(&self) -> usize {
        self.count
    }

    /// The oldest warnings, at most `capacity` of them.
    pub fn sample(&self) -> &[String] {
        &self.sample
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Emits a single `warn!` with the total, if anything was recorded.
    pub fn log_summary(&self, what: &str) {
        if self.count > 0 {
            warn!(
                "{} warning(s) while parsing {}; the first {} were kept",
                self.count,
                what,
                self.sample.len()
            );
        }
    }
}

/// How a parse ended. Errors are reported separately through `Result`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseOutcome {
    Completed,
    Cancelled,
}

/// The state shared between a driver and whoever started it.
#[derive(Debug, Clone, Default)]
pub struct ParseContext {
    pub token: CancellationToken,
    pub warnings: WarningLog,
}

impl ParseContext {
    pub fn new() -> ParseContext {
        ParseContext::default()
    }

    /// A context that stops when `token` is cancelled.
    pub fn with_token(token: CancellationToken) -> ParseContext {
        ParseContext {
            token,
            warnings: WarningLog::default(),
        }
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    #[inline]
    pub fn warn(&mut self, rejection: &Rejection) {
        self.warnings.push(rejection);
    }
}
