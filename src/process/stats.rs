use chrono::NaiveDateTime;
use serde::Serialize;
use std::sync::{Arc, Mutex};

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunExit {
    Completed,
    /// The wall-clock budget ran out; no further files were dispatched.
    TimedOut,
    ShutDown,
}

impl RunExit {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunExit::Completed => "completed",
            RunExit::TimedOut => "timed_out",
            RunExit::ShutDown => "shut_down",
        }
    }
}

/// Statistics of one orchestrator run.
///
/// `files` counts every non-directory file that was attempted, `failed` the
/// subset whose extraction failed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunStats {
    pub started_at: NaiveDateTime,
    pub exit: RunExit,
    pub production: bool,
    pub threads: usize,
    pub timeout_secs: u64,
    pub albums: usize,
    pub directories: usize,
    pub files: usize,
    pub failed: usize,
    pub reconcile_ms: u64,
    pub total_ms: u64,
}

impl RunStats {
    pub fn new(started_at: NaiveDateTime, threads: usize, timeout_secs: u64, production: bool) -> Self {
        Self {
            started_at,
            exit: RunExit::Completed,
            production,
            threads,
            timeout_secs,
            albums: 0,
            directories: 0,
            files: 0,
            failed: 0,
            reconcile_ms: 0,
            total_ms: 0,
        }
    }
}

/// Holds the statistics of the most recent run. Clones share the slot.
#[derive(Debug, Clone, Default)]
pub struct StatsStore {
    last: Arc<Mutex<Option<RunStats>>>,
}

impl StatsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, stats: RunStats) {
        let mut slot = self.last.lock().unwrap_or_else(|e| e.into_inner());
        *slot = Some(stats);
    }

    pub fn last(&self) -> Option<RunStats> {
        self.last.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}
