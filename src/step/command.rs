//! Leaf step owning one external shell process.

use std::collections::HashMap;
use std::os::unix::process::CommandExt;
use std::process::{Command as ProcessCommand, Stdio};
use std::sync::Mutex;
use std::time::Instant;

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tracing::debug;

use crate::env::{self, EnvMap};
use crate::error::Result;
use crate::output;

use super::{lock, Step, StepMeta, StepSnapshot, StepState, StepStatus};

/// A single shell command, spawned via `/bin/sh -c` in its own process
/// group, with stdin closed and stdout/stderr fully captured.
pub struct Command {
    meta: StepMeta,
    state: Mutex<StepState>,
    command: String,
    resolved_env: Mutex<Option<EnvMap>>,
    /// Pid of the spawned process. Shares a critical section with the
    /// killed-check in `execute`, so a kill issued before the spawn is
    /// guaranteed to prevent it.
    process: Mutex<Option<u32>>,
    captured: Mutex<Option<(String, String)>>,
}

impl Command {
    pub fn new(
        options: HashMap<String, String>,
        declared_env: EnvMap,
        level: usize,
        command: String,
    ) -> Self {
        let title = options
            .get("title")
            .cloned()
            .unwrap_or_else(|| command.clone());
        Self {
            meta: StepMeta {
                title,
                level,
                declared_env,
                options,
            },
            state: Mutex::new(StepState::new()),
            command,
            resolved_env: Mutex::new(None),
            process: Mutex::new(None),
            captured: Mutex::new(None),
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    /// Pid of the spawned process, if one was ever started.
    pub fn pid(&self) -> Option<u32> {
        *lock(&self.process)
    }

    /// Resolved environment computed for this step, once the tree walk ran.
    pub fn resolved_env(&self) -> Option<EnvMap> {
        lock(&self.resolved_env).clone()
    }

    /// Captured standard output, available once the process finished.
    pub fn stdout(&self) -> Option<String> {
        lock(&self.captured).as_ref().map(|(out, _)| out.clone())
    }

    /// Captured standard error, available once the process finished.
    pub fn stderr(&self) -> Option<String> {
        lock(&self.captured).as_ref().map(|(_, err)| err.clone())
    }

    fn log_completion(&self, status: StepStatus, exit_code: Option<i32>, stdout: &str, stderr: &str) {
        let level = self.meta.level;
        let verdict = if status == StepStatus::Ok { "done" } else { "failed" };
        output::stamped(level, &format!("{verdict} command: {}", self.meta.title));
        let code = exit_code.map_or_else(|| "none".to_string(), |c| c.to_string());
        output::detail(level, &format!("status: {status} exit code: {code}"));
        let elapsed = lock(&self.state).elapsed().unwrap_or_default();
        output::detail(level, &format!("elapsed time: {}", output::pretty_time(elapsed)));
        if !stdout.trim().is_empty() {
            output::blank();
            output::detail(level, "-- stdout: ------");
            output::detail(level, stdout.trim_end());
            output::detail(level, "-----------------");
        }
        if !stderr.trim().is_empty() {
            output::blank();
            output::detail(level, "-- stderr: ------");
            output::detail(level, stderr.trim_end());
            output::detail(level, "-----------------");
        }
    }
}

impl Step for Command {
    fn meta(&self) -> &StepMeta {
        &self.meta
    }

    fn state(&self) -> &Mutex<StepState> {
        &self.state
    }

    fn execute(&self, quiet: bool) -> StepStatus {
        let start = Instant::now();
        let child = {
            let mut slot = lock(&self.process);
            if lock(&self.state).killed {
                return StepStatus::Killed;
            }
            let run_env = lock(&self.resolved_env).clone().unwrap_or_default();
            let spawned = ProcessCommand::new("/bin/sh")
                .arg("-c")
                .arg(&self.command)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .env_clear()
                .envs(&run_env)
                .process_group(0)
                .spawn();
            let child = match spawned {
                Ok(child) => child,
                Err(err) => {
                    if !quiet {
                        output::stamped(
                            self.meta.level,
                            &format!("failed to start: {} ({err})", self.meta.title),
                        );
                    }
                    debug!(command = %self.command, error = %err, "spawn failed");
                    return StepStatus::Failed;
                }
            };
            *slot = Some(child.id());
            if !quiet {
                output::stamped(
                    self.meta.level,
                    &format!("started: {} pid: {}", self.meta.title, child.id()),
                );
            }
            child
        };

        // The lock is released while we block; a concurrent kill() signals
        // the process group and this wait reaps the process.
        let (exit_code, stdout, stderr) = match child.wait_with_output() {
            Ok(out) => (
                out.status.code(),
                String::from_utf8_lossy(&out.stdout).into_owned(),
                String::from_utf8_lossy(&out.stderr).into_owned(),
            ),
            Err(err) => {
                debug!(command = %self.command, error = %err, "wait failed");
                (None, String::new(), String::new())
            }
        };
        debug!(command = %self.command, ?exit_code, elapsed = ?start.elapsed(), "process finished");
        *lock(&self.captured) = Some((stdout.clone(), stderr.clone()));

        let status = {
            let mut state = lock(&self.state);
            if state.killed {
                StepStatus::Killed
            } else if exit_code == Some(0) {
                state.exit_code = exit_code;
                StepStatus::Ok
            } else {
                state.exit_code = exit_code;
                StepStatus::Failed
            }
        };

        if !quiet {
            let shown_code = if status == StepStatus::Killed { None } else { exit_code };
            self.log_completion(status, shown_code, &stdout, &stderr);
        }
        status
    }

    fn kill(&self) {
        let slot = lock(&self.process);
        let mut state = lock(&self.state);
        if !state.mark_killed() {
            return;
        }
        drop(state);
        if let Some(raw) = *slot {
            let pid = Pid::from_raw(raw as i32);
            debug!(%pid, title = %self.meta.title, "killing command");
            // Interrupt the whole process group, then force-terminate the
            // direct child; the thread blocked in wait_with_output reaps it.
            let _ = signal::killpg(pid, Signal::SIGINT);
            let _ = signal::kill(pid, Signal::SIGKILL);
        }
    }

    fn resolve_env(&self, parent: &EnvMap) -> Result<()> {
        let resolved = env::combine(parent, &self.meta.declared_env)?;
        *lock(&self.resolved_env) = Some(resolved);
        Ok(())
    }

    fn snapshot(&self) -> StepSnapshot {
        StepSnapshot {
            kind: "command",
            status: self.status(),
            title: self.meta.title.clone(),
            steps: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn plain(command: &str) -> Command {
        Command::new(HashMap::new(), EnvMap::new(), 0, command.to_string())
    }

    fn resolved(command: &str) -> Command {
        let cmd = plain(command);
        cmd.resolve_env(&crate::env::ambient()).unwrap();
        cmd
    }

    #[test]
    fn title_defaults_to_command_text() {
        let cmd = plain("echo hello");
        assert_eq!(cmd.title(), "echo hello");
    }

    #[test]
    fn title_option_overrides_command_text() {
        let mut options = HashMap::new();
        options.insert("title".to_string(), "greeting".to_string());
        let cmd = Command::new(options, EnvMap::new(), 0, "echo hello".to_string());
        assert_eq!(cmd.title(), "greeting");
    }

    #[test]
    fn successful_command_is_ok_with_exit_zero() {
        let cmd = resolved("true");
        assert_eq!(cmd.run(true), StepStatus::Ok);
        assert_eq!(cmd.exit_code(), Some(0));
        assert!(cmd.pid().is_some());
    }

    #[test]
    fn failing_command_carries_its_exit_code() {
        let cmd = resolved("exit 3");
        assert_eq!(cmd.run(true), StepStatus::Failed);
        assert_eq!(cmd.exit_code(), Some(3));
    }

    #[test]
    fn output_is_captured_in_full() {
        let cmd = resolved("echo out; echo err >&2");
        cmd.run(true);
        assert!(cmd.stdout().unwrap().contains("out"));
        assert!(cmd.stderr().unwrap().contains("err"));
    }

    #[test]
    fn declared_env_reaches_the_process() {
        let mut declared = EnvMap::new();
        declared.insert("DIRECTOR_TEST_VAR".to_string(), "marker".to_string());
        let cmd = Command::new(HashMap::new(), declared, 0, "echo $DIRECTOR_TEST_VAR".to_string());
        cmd.resolve_env(&EnvMap::new()).unwrap();
        assert_eq!(cmd.run(true), StepStatus::Ok);
        assert!(cmd.stdout().unwrap().contains("marker"));
    }

    #[test]
    fn environment_is_exactly_the_resolved_map() {
        // env_clear means inherited-but-undeclared process vars are absent.
        let cmd = plain("echo [$DIRECTOR_ABSENT_VAR]");
        std::env::set_var("DIRECTOR_ABSENT_VAR", "leaked");
        cmd.resolve_env(&EnvMap::new()).unwrap();
        std::env::remove_var("DIRECTOR_ABSENT_VAR");
        cmd.run(true);
        assert!(cmd.stdout().unwrap().contains("[]"));
    }

    #[test]
    fn kill_before_run_prevents_the_spawn() {
        let cmd = resolved("echo should-not-run");
        cmd.kill();
        assert_eq!(cmd.run(true), StepStatus::Killed);
        assert_eq!(cmd.pid(), None);
        assert_eq!(cmd.exit_code(), None);
    }

    #[test]
    fn kill_during_run_yields_killed_with_no_exit_code() {
        let cmd = Arc::new(resolved("sleep 5"));
        let runner = Arc::clone(&cmd);
        let handle = thread::spawn(move || runner.run(true));
        while cmd.pid().is_none() {
            thread::sleep(Duration::from_millis(5));
        }
        cmd.kill();
        assert_eq!(handle.join().unwrap(), StepStatus::Killed);
        assert_eq!(cmd.exit_code(), None);
    }

    #[test]
    fn kill_twice_is_a_no_op() {
        let cmd = Arc::new(resolved("sleep 5"));
        let runner = Arc::clone(&cmd);
        let handle = thread::spawn(move || runner.run(true));
        while cmd.pid().is_none() {
            thread::sleep(Duration::from_millis(5));
        }
        cmd.kill();
        cmd.kill();
        assert_eq!(handle.join().unwrap(), StepStatus::Killed);
        assert_eq!(cmd.status(), StepStatus::Killed);
    }

    #[test]
    fn kill_after_completion_keeps_the_result() {
        let cmd = resolved("exit 7");
        assert_eq!(cmd.run(true), StepStatus::Failed);
        cmd.kill();
        assert_eq!(cmd.status(), StepStatus::Failed);
        assert_eq!(cmd.exit_code(), Some(7));
    }

    #[test]
    fn snapshot_reports_command_kind() {
        let cmd = resolved("true");
        let snap = cmd.snapshot();
        assert_eq!(snap.kind, "command");
        assert_eq!(snap.status, StepStatus::Pending);
        cmd.run(true);
        assert_eq!(cmd.snapshot().status, StepStatus::Ok);
    }
}
