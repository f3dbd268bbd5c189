//! Step abstraction and shared state machine.
//!
//! A [`Step`] is one executable unit in the execution tree: a shell command
//! or a group of child steps. The three variants — [`Command`],
//! [`SequentialGroup`], [`ParallelGroup`] — implement one trait and own only
//! the state they need; the lifecycle bookkeeping common to all of them
//! lives in the provided [`Step::run`].
//!
//! The lifecycle is `Pending → Running → {Ok, Failed, Killed}`. Terminal
//! states are final: a step never re-enters `Pending` or `Running`, and a
//! committed terminal status is never overwritten.

pub mod command;
pub mod parallel;
pub mod sequential;

pub use command::Command;
pub use parallel::ParallelGroup;
pub use sequential::SequentialGroup;

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::env::EnvMap;
use crate::error::Result;

/// Lifecycle status of a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    /// Waiting to run.
    Pending,

    /// Currently executing.
    Running,

    /// Finished successfully.
    Ok,

    /// Finished with a failure (nonzero exit, spawn error, or panic).
    Failed,

    /// Cancelled, by a failing sibling or an external caller.
    Killed,
}

impl StepStatus {
    /// Check if this is a terminal state (no more transitions allowed).
    pub fn is_terminal(&self) -> bool {
        matches!(self, StepStatus::Ok | StepStatus::Failed | StepStatus::Killed)
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, StepStatus::Ok)
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StepStatus::Pending => "pending",
            StepStatus::Running => "running",
            StepStatus::Ok => "ok",
            StepStatus::Failed => "failed",
            StepStatus::Killed => "killed",
        };
        write!(f, "{}", s)
    }
}

/// Immutable identity of a step, fixed at conversion time.
#[derive(Debug, Clone)]
pub struct StepMeta {
    /// Display name; defaults to the command text or a synthesized group name.
    pub title: String,

    /// Nesting depth, used only for log indentation.
    pub level: usize,

    /// Environment entries declared on this node in the script.
    pub declared_env: EnvMap,

    /// Raw option map. `title` and `multiplicity` are interpreted; anything
    /// else is stored untouched for external collaborators.
    pub options: HashMap<String, String>,
}

/// Mutable run state shared by every step variant, guarded by a step-local
/// mutex.
#[derive(Debug)]
pub struct StepState {
    pub status: StepStatus,
    pub exit_code: Option<i32>,
    pub killed: bool,
    pub started_at: Option<Instant>,
    pub finished_at: Option<Instant>,
}

impl StepState {
    pub fn new() -> Self {
        Self {
            status: StepStatus::Pending,
            exit_code: None,
            killed: false,
            started_at: None,
            finished_at: None,
        }
    }

    /// Commit a terminal status unless one was already committed.
    pub fn finish(&mut self, status: StepStatus) {
        if !self.status.is_terminal() {
            self.status = status;
        }
    }

    /// Record a cancellation. Returns false when the step was already killed
    /// or already terminal, making `kill()` idempotent everywhere.
    pub fn mark_killed(&mut self) -> bool {
        if self.killed || self.status.is_terminal() {
            return false;
        }
        self.killed = true;
        self.status = StepStatus::Killed;
        self.exit_code = None;
        true
    }

    pub fn elapsed(&self) -> Option<Duration> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => Some(end.duration_since(start)),
            (Some(start), None) => Some(start.elapsed()),
            _ => None,
        }
    }
}

impl Default for StepState {
    fn default() -> Self {
        Self::new()
    }
}

/// Read-only status projection of a step and its descendants, the interface
/// consumed by external status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct StepSnapshot {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub status: StepStatus,
    pub title: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<StepSnapshot>,
}

static GROUP_COUNTER: AtomicUsize = AtomicUsize::new(1);

/// Next id for synthesized group titles.
pub(crate) fn next_group_id() -> usize {
    GROUP_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Lock a step mutex, recovering the data if a panicking child poisoned it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One executable unit in the execution tree.
pub trait Step: Send + Sync {
    fn meta(&self) -> &StepMeta;

    fn state(&self) -> &Mutex<StepState>;

    /// Variant-specific execution, called by [`Step::run`] after the step
    /// enters `Running`. Returns the terminal status the variant reached.
    fn execute(&self, quiet: bool) -> StepStatus;

    /// Cancel this step. Idempotent; the first call cancels, later calls are
    /// no-ops.
    fn kill(&self);

    /// Compute this step's resolved environment from the parent's resolved
    /// map and push it down to children. Must complete for the entire tree
    /// before any step runs.
    fn resolve_env(&self, parent: &EnvMap) -> Result<()>;

    fn snapshot(&self) -> StepSnapshot;

    /// Drive the step to a terminal status, recording timing on the way.
    /// Returns immediately if the step was killed before it ever started.
    fn run(&self, quiet: bool) -> StepStatus {
        {
            let mut state = lock(self.state());
            if state.status.is_terminal() {
                return state.status;
            }
            state.status = StepStatus::Running;
            state.started_at = Some(Instant::now());
        }
        let outcome = self.execute(quiet);
        let mut state = lock(self.state());
        state.finished_at = Some(Instant::now());
        state.finish(outcome);
        state.status
    }

    fn status(&self) -> StepStatus {
        lock(self.state()).status
    }

    fn exit_code(&self) -> Option<i32> {
        lock(self.state()).exit_code
    }

    fn elapsed(&self) -> Option<Duration> {
        lock(self.state()).elapsed()
    }

    fn title(&self) -> &str {
        &self.meta().title
    }

    fn level(&self) -> usize {
        self.meta().level
    }
}

impl fmt::Debug for dyn Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("title", &self.title())
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_terminal_classification() {
        assert!(!StepStatus::Pending.is_terminal());
        assert!(!StepStatus::Running.is_terminal());
        assert!(StepStatus::Ok.is_terminal());
        assert!(StepStatus::Failed.is_terminal());
        assert!(StepStatus::Killed.is_terminal());
    }

    #[test]
    fn status_displays_lowercase() {
        assert_eq!(StepStatus::Pending.to_string(), "pending");
        assert_eq!(StepStatus::Ok.to_string(), "ok");
        assert_eq!(StepStatus::Killed.to_string(), "killed");
    }

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&StepStatus::Failed).unwrap(),
            "\"failed\""
        );
    }

    #[test]
    fn finish_does_not_overwrite_terminal_status() {
        let mut state = StepState::new();
        state.finish(StepStatus::Killed);
        state.finish(StepStatus::Ok);
        assert_eq!(state.status, StepStatus::Killed);
    }

    #[test]
    fn mark_killed_is_idempotent() {
        let mut state = StepState::new();
        state.exit_code = Some(3);
        assert!(state.mark_killed());
        assert_eq!(state.status, StepStatus::Killed);
        assert_eq!(state.exit_code, None);
        assert!(!state.mark_killed());
    }

    #[test]
    fn mark_killed_does_not_resurrect_finished_steps() {
        let mut state = StepState::new();
        state.status = StepStatus::Ok;
        state.exit_code = Some(0);
        assert!(!state.mark_killed());
        assert_eq!(state.status, StepStatus::Ok);
        assert_eq!(state.exit_code, Some(0));
    }

    #[test]
    fn snapshot_serializes_with_type_field() {
        let snap = StepSnapshot {
            kind: "command",
            status: StepStatus::Pending,
            title: "echo hi".into(),
            steps: Vec::new(),
        };
        let json = serde_json::to_string(&snap).unwrap();
        assert_eq!(
            json,
            "{\"type\":\"command\",\"status\":\"pending\",\"title\":\"echo hi\"}"
        );
    }
}
