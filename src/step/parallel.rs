//! Unordered group: children run on a bounded worker pool.

use std::collections::{HashMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Instant;

use tracing::debug;

use crate::env::{self, EnvMap};
use crate::error::{DirectorError, Result};
use crate::output;

use super::{lock, next_group_id, Step, StepMeta, StepSnapshot, StepState, StepStatus};

pub const DEFAULT_MULTIPLICITY: usize = 5;

/// Scheduler bookkeeping: which children are queued, which are running on a
/// worker, and whether shutdown was initiated. Queue pops and the shutdown
/// flag share one lock so a child can never slip past a shutdown.
#[derive(Debug, Default)]
struct Scheduler {
    queue: VecDeque<usize>,
    active: Vec<usize>,
    shut_down: bool,
}

/// Result of one child, sent from a worker back to the owning group.
struct ChildOutcome {
    index: usize,
    status: StepStatus,
    exit_code: Option<i32>,
    panicked: bool,
}

/// Runs its children concurrently, at most `multiplicity` at a time. The
/// first child to finish non-`Ok` fails the group and triggers shutdown:
/// queued children are never started (they stay `Pending`) and running
/// children are killed. The pool is per-group, so nested parallel groups
/// compose multiplicatively.
#[derive(Debug)]
pub struct ParallelGroup {
    meta: StepMeta,
    state: Mutex<StepState>,
    steps: Vec<Arc<dyn Step>>,
    multiplicity: usize,
    resolved_env: Mutex<Option<EnvMap>>,
    sched: Mutex<Scheduler>,
}

impl ParallelGroup {
    pub fn new(
        options: HashMap<String, String>,
        declared_env: EnvMap,
        level: usize,
        steps: Vec<Arc<dyn Step>>,
    ) -> Result<Self> {
        let multiplicity = match options.get("multiplicity") {
            Some(raw) => raw
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| DirectorError::InvalidOption {
                    option: "multiplicity".into(),
                    value: raw.clone(),
                    message: "expected a positive integer".into(),
                })?,
            None => DEFAULT_MULTIPLICITY,
        };
        let title = options
            .get("title")
            .cloned()
            .unwrap_or_else(|| format!("parallel group #{:04}", next_group_id()));
        Ok(Self {
            meta: StepMeta {
                title,
                level,
                declared_env,
                options,
            },
            state: Mutex::new(StepState::new()),
            steps,
            multiplicity,
            resolved_env: Mutex::new(None),
            sched: Mutex::new(Scheduler::default()),
        })
    }

    pub fn children(&self) -> &[Arc<dyn Step>] {
        &self.steps
    }

    pub fn multiplicity(&self) -> usize {
        self.multiplicity
    }

    pub fn resolved_env(&self) -> Option<EnvMap> {
        lock(&self.resolved_env).clone()
    }

    /// Worker loop: pull the next queued child, run it, report the outcome.
    /// Exits when the queue drains or shutdown is initiated.
    fn worker(&self, results: Sender<ChildOutcome>, quiet: bool) {
        loop {
            let index = {
                let mut sched = lock(&self.sched);
                if sched.shut_down {
                    break;
                }
                match sched.queue.pop_front() {
                    Some(index) => {
                        sched.active.push(index);
                        index
                    }
                    None => break,
                }
            };
            let step = &self.steps[index];
            debug!(child = %step.title(), "worker picked child");
            let run = panic::catch_unwind(AssertUnwindSafe(|| step.run(quiet)));
            {
                let mut sched = lock(&self.sched);
                sched.active.retain(|&i| i != index);
            }
            let outcome = match run {
                Ok(status) => ChildOutcome {
                    index,
                    status,
                    exit_code: step.exit_code(),
                    panicked: false,
                },
                Err(_) => {
                    // The panic unwound out of run() before it could commit
                    // a terminal status; settle the child here so the tree
                    // never reports it running after the group ends.
                    {
                        let mut state = lock(step.state());
                        state.finished_at = Some(Instant::now());
                        state.finish(StepStatus::Failed);
                    }
                    ChildOutcome {
                        index,
                        status: StepStatus::Failed,
                        exit_code: step.exit_code(),
                        panicked: true,
                    }
                }
            };
            if results.send(outcome).is_err() {
                break;
            }
        }
    }

    /// Initiate shutdown once: queued children are dropped (they stay
    /// Pending) and children currently on a worker are killed. Returns false
    /// when shutdown already ran.
    fn shutdown(&self) -> bool {
        let to_kill = {
            let mut sched = lock(&self.sched);
            if sched.shut_down {
                return false;
            }
            sched.shut_down = true;
            sched.queue.clear();
            sched.active.clone()
        };
        debug!(title = %self.meta.title, killing = to_kill.len(), "parallel group shutting down");
        for index in to_kill {
            self.steps[index].kill();
        }
        true
    }

    /// Fold one child's outcome into the group state, collected on the
    /// thread that owns the run rather than on the worker that produced it.
    fn absorb(&self, outcome: ChildOutcome, quiet: bool) {
        if outcome.status == StepStatus::Ok && !outcome.panicked {
            return;
        }
        if outcome.panicked && !quiet {
            output::stamped(
                self.meta.level,
                &format!("PANIC in {}", self.steps[outcome.index].title()),
            );
        }
        if self.shutdown() {
            lock(&self.state).finish(StepStatus::Failed);
        }
        // An ordinary failure's exit code wins over a cancellation-induced
        // one: killed children carry no exit code and never contribute.
        if outcome.status != StepStatus::Killed {
            if let Some(code) = outcome.exit_code {
                lock(&self.state).exit_code = Some(code);
            }
        }
    }
}

impl Step for ParallelGroup {
    fn meta(&self) -> &StepMeta {
        &self.meta
    }

    fn state(&self) -> &Mutex<StepState> {
        &self.state
    }

    fn execute(&self, quiet: bool) -> StepStatus {
        if !quiet {
            output::stamped(self.meta.level, &format!("started: {}", self.meta.title));
        }
        {
            let mut sched = lock(&self.sched);
            if !sched.shut_down {
                sched.queue = (0..self.steps.len()).collect();
            }
        }
        let workers = self.multiplicity.min(self.steps.len());
        let (tx, rx) = mpsc::channel::<ChildOutcome>();
        thread::scope(|scope| {
            for _ in 0..workers {
                let tx = tx.clone();
                scope.spawn(move || self.worker(tx, quiet));
            }
            drop(tx);
            // Workers hold the remaining senders; the loop ends when the
            // last worker exits and every child is terminal or unscheduled.
            for outcome in rx {
                self.absorb(outcome, quiet);
            }
        });

        let (status, exit_code) = {
            let state = lock(&self.state);
            let status = if state.status.is_terminal() {
                state.status
            } else {
                StepStatus::Ok
            };
            (status, state.exit_code)
        };

        if !quiet {
            let verdict = if status == StepStatus::Ok { "done" } else { "failed" };
            output::stamped(self.meta.level, &format!("{verdict} group: {}", self.meta.title));
            let code = exit_code.map_or_else(|| "none".to_string(), |c| c.to_string());
            output::detail(self.meta.level, &format!("status: {status} exit code: {code}"));
            let elapsed = lock(&self.state).elapsed().unwrap_or_default();
            output::detail(
                self.meta.level,
                &format!("elapsed time: {}", output::pretty_time(elapsed)),
            );
            output::blank();
        }
        status
    }

    fn kill(&self) {
        self.shutdown();
        lock(&self.state).mark_killed();
    }

    fn resolve_env(&self, parent: &EnvMap) -> Result<()> {
        let resolved = env::combine(parent, &self.meta.declared_env)?;
        for step in &self.steps {
            step.resolve_env(&resolved)?;
        }
        *lock(&self.resolved_env) = Some(resolved);
        Ok(())
    }

    fn snapshot(&self) -> StepSnapshot {
        let active = lock(&self.sched).active.clone();
        let steps = self
            .steps
            .iter()
            .enumerate()
            .map(|(index, step)| {
                let mut snap = step.snapshot();
                if active.contains(&index) && !snap.status.is_terminal() {
                    snap.status = StepStatus::Running;
                }
                snap
            })
            .collect();
        StepSnapshot {
            kind: "parallel",
            status: self.status(),
            title: self.meta.title.clone(),
            steps,
        }
    }
}
