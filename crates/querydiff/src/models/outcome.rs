use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionError {
    pub message: String,
    pub timed_out: bool,
}

impl ExecutionError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            timed_out: false,
        }
    }

    #[must_use]
    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            timed_out: true,
        }
    }
}

impl Display for ExecutionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.timed_out {
            write!(f, "statement timed out: {}", self.message)
        } else {
            f.write_str(&self.message)
        }
    }
}

impl std::error::Error for ExecutionError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Equivalent,
    NotEquivalent,
    Error(ExecutionError),
    Skipped,
}

#[derive(Debug, Default)]
pub struct RunCounters {
    processed: AtomicUsize,
    mismatches: AtomicUsize,
    errors: AtomicUsize,
    skipped: AtomicUsize,
    ignored: AtomicUsize,
}

impl RunCounters {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the processed total including this pair.
    pub fn record_processed(&self) -> usize {
        self.processed.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn record_mismatch(&self) -> usize {
        self.mismatches.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn record_error(&self) -> usize {
        self.errors.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn record_skipped(&self) -> usize {
        self.skipped.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn record_ignored(&self) -> usize {
        self.ignored.fetch_add(1, Ordering::SeqCst) + 1
    }

    #[must_use]
    pub fn processed(&self) -> usize {
        self.processed.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn mismatches(&self) -> usize {
        self.mismatches.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn errors(&self) -> usize {
        self.errors.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn skipped(&self) -> usize {
        self.skipped.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn ignored(&self) -> usize {
        self.ignored.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RunSummary {
    pub discovered: usize,
    pub ignored: usize,
    pub processed: usize,
    pub skipped: usize,
    pub mismatches: usize,
    pub errors: usize,
}
