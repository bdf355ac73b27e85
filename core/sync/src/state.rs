//! Refresh cycle state tracking.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rox_common::{Error, Result};

use crate::digest::DigestReport;

/// Phase of a refresh cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CycleState {
    /// No cycle is running.
    Idle,
    /// Waiting on the snapshot source. The only cancellable phase.
    Fetching,
    /// Comparing the baseline with the fetched snapshot.
    Diffing,
    /// Applying changes to the live collection.
    Reconciling,
    /// Reordering the view to match the filters and sorts.
    Projecting,
}

impl CycleState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => CycleState::Fetching,
            2 => CycleState::Diffing,
            3 => CycleState::Reconciling,
            4 => CycleState::Projecting,
            _ => CycleState::Idle,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            CycleState::Idle => 0,
            CycleState::Fetching => 1,
            CycleState::Diffing => 2,
            CycleState::Reconciling => 3,
            CycleState::Projecting => 4,
        }
    }
}

impl fmt::Display for CycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CycleState::Idle => "idle",
            CycleState::Fetching => "fetching",
            CycleState::Diffing => "diffing",
            CycleState::Reconciling => "reconciling",
            CycleState::Projecting => "projecting",
        };
        f.write_str(name)
    }
}

/// Shared single-flight flag for one live collection.
///
/// Clones observe the same state. A cycle starts by taking a
/// [`CycleGuard`], which fails unless the flag is `Idle`, and the flag goes
/// back to `Idle` when the guard is dropped, whether the cycle finished or
/// bailed out with an error.
#[derive(Debug, Clone, Default)]
pub struct CycleFlag(Arc<AtomicU8>);

impl CycleFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> CycleState {
        CycleState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn is_idle(&self) -> bool {
        self.current() == CycleState::Idle
    }

    /// Claim the flag for a new cycle, entering `start`.
    pub fn try_begin(&self, start: CycleState) -> Result<CycleGuard> {
        self.0
            .compare_exchange(
                CycleState::Idle.as_u8(),
                start.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map_err(|current| Error::CycleInProgress(CycleState::from_u8(current).to_string()))?;
        Ok(CycleGuard {
            flag: self.0.clone(),
        })
    }
}

/// Proof that the holder owns the running cycle.
#[derive(Debug)]
pub struct CycleGuard {
    flag: Arc<AtomicU8>,
}

impl CycleGuard {
    pub fn advance(&self, state: CycleState) {
        self.flag.store(state.as_u8(), Ordering::Release);
    }

    pub fn state(&self) -> CycleState {
        CycleState::from_u8(self.flag.load(Ordering::Acquire))
    }
}

impl Drop for CycleGuard {
    fn drop(&mut self) {
        self.flag.store(CycleState::Idle.as_u8(), Ordering::Release);
    }
}

/// Observable status of a synced collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatus {
    pub state: CycleState,
    /// Completion time of the last successful refresh.
    pub last_refresh: Option<DateTime<Utc>>,
    pub cycles_completed: u64,
    /// Message of the last failed refresh, cleared by the next success.
    pub last_error: Option<String>,
}

impl Default for SyncStatus {
    fn default() -> Self {
        Self {
            state: CycleState::Idle,
            last_refresh: None,
            cycles_completed: 0,
            last_error: None,
        }
    }
}

/// Outcome of one completed refresh cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshResult {
    pub added: usize,
    pub updated: usize,
    pub deleted: usize,
    pub diverged_fields: usize,
    pub rejected_writes: usize,
    /// Structural edits made to the view (a hard reset counts as one).
    pub view_edits: usize,
    pub duration: Duration,
}

impl RefreshResult {
    pub fn new(report: &DigestReport, view_edits: usize, duration: Duration) -> Self {
        Self {
            added: report.added,
            updated: report.updated,
            deleted: report.deleted,
            diverged_fields: report.diverged_fields,
            rejected_writes: report.rejected_writes,
            view_edits,
            duration,
        }
    }

    /// Whether the live collection changed at all.
    pub fn has_changes(&self) -> bool {
        self.added + self.updated + self.deleted > 0
    }
}
