//! Ordered group: children run one after another on the caller's thread.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::env::{self, EnvMap};
use crate::error::Result;
use crate::output;

use super::{lock, next_group_id, Step, StepMeta, StepSnapshot, StepState, StepStatus};

/// Runs its children strictly in declared order and stops at the first child
/// that does not finish `Ok`; the remaining children stay `Pending`.
///
/// A failing child sets this group's status to `Killed` — the same value an
/// external cancellation uses. That mirrors the tool this one replaces and
/// is kept for compatibility with anything consuming the status output; it
/// is a naming quirk, not a distinct failure taxonomy.
pub struct SequentialGroup {
    meta: StepMeta,
    state: Mutex<StepState>,
    steps: Vec<Arc<dyn Step>>,
    resolved_env: Mutex<Option<EnvMap>>,
    running: Mutex<Option<usize>>,
}

impl SequentialGroup {
    pub fn new(
        options: HashMap<String, String>,
        declared_env: EnvMap,
        level: usize,
        steps: Vec<Arc<dyn Step>>,
    ) -> Self {
        let title = options
            .get("title")
            .cloned()
            .unwrap_or_else(|| format!("sequential group #{:04}", next_group_id()));
        Self {
            meta: StepMeta {
                title,
                level,
                declared_env,
                options,
            },
            state: Mutex::new(StepState::new()),
            steps,
            resolved_env: Mutex::new(None),
            running: Mutex::new(None),
        }
    }

    pub fn children(&self) -> &[Arc<dyn Step>] {
        &self.steps
    }

    pub fn resolved_env(&self) -> Option<EnvMap> {
        lock(&self.resolved_env).clone()
    }
}

impl Step for SequentialGroup {
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
        for (index, step) in self.steps.iter().enumerate() {
            {
                // Terminal check and slot update share one critical section,
                // in kill()'s running-then-state lock order. A kill observes
                // either a terminal group (the next child never starts) or
                // the published child (the kill is forwarded to it).
                let mut running = lock(&self.running);
                if lock(&self.state).status.is_terminal() {
                    // A failure or kill already ended the group; later
                    // children are never started and stay Pending.
                    break;
                }
                *running = Some(index);
            }
            let status = step.run(quiet);
            *lock(&self.running) = None;

            let mut state = lock(&self.state);
            if let Some(code) = step.exit_code() {
                state.exit_code = Some(code);
            }
            if status != StepStatus::Ok && !state.status.is_terminal() {
                debug!(child = %step.title(), %status, "sequential group stopping");
                state.status = StepStatus::Killed;
            }
        }

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
        let running = lock(&self.running);
        let mut state = lock(&self.state);
        if !state.mark_killed() {
            return;
        }
        drop(state);
        if let Some(index) = *running {
            self.steps[index].kill();
        }
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
        let running = *lock(&self.running);
        let steps = self
            .steps
            .iter()
            .enumerate()
            .map(|(index, step)| {
                let mut snap = step.snapshot();
                if running == Some(index) && !snap.status.is_terminal() {
                    snap.status = StepStatus::Running;
                }
                snap
            })
            .collect();
        StepSnapshot {
            kind: "sequential",
            status: self.status(),
            title: self.meta.title.clone(),
            steps,
        }
    }
}
