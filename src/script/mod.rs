//! Script parsing and top-level execution driver.
//!
//! [`Script::parse`] turns script text into an executable step tree;
//! [`Script::run`] resolves the environment top-down and drives the root
//! step to a terminal status on the calling thread. The script can be
//! observed ([`Script::snapshot`]) or cancelled ([`Script::kill`]) from
//! other threads while it runs.

pub mod ast;
pub mod convert;
pub mod parser;

use std::sync::Arc;

use tracing::debug;

use crate::env::{self, EnvMap};
use crate::error::Result;
use crate::step::{Step, StepSnapshot, StepStatus};

pub struct Script {
    root: Arc<dyn Step>,
}

impl Script {
    /// Parse script text and build the step tree. Fails on syntax errors and
    /// invalid option values; nothing is executed.
    pub fn parse(text: &str) -> Result<Self> {
        let node = parser::parse(text)?;
        debug!(commands = node.leaf_count(), "script parsed");
        let root = convert::convert(&node, 0)?;
        Ok(Self { root })
    }

    /// Run to completion with the process's own environment as the root
    /// parent. Environment resolution for the whole tree happens before the
    /// first step starts, so declaration errors never leave processes
    /// half-run.
    pub fn run(&self, quiet: bool) -> Result<StepStatus> {
        self.run_with_env(&env::ambient(), quiet)
    }

    /// Like [`Script::run`] but with an explicit ambient environment.
    pub fn run_with_env(&self, ambient: &EnvMap, quiet: bool) -> Result<StepStatus> {
        self.root.resolve_env(ambient)?;
        Ok(self.root.run(quiet))
    }

    /// Cancel the whole tree. Safe to call from any thread, any number of
    /// times, before, during, or after the run.
    pub fn kill(&self) {
        self.root.kill();
    }

    pub fn status(&self) -> StepStatus {
        self.root.status()
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.root.exit_code()
    }

    pub fn snapshot(&self) -> StepSnapshot {
        self.root.snapshot()
    }

    pub fn snapshot_json(&self) -> Result<String> {
        let json = serde_json::to_string_pretty(&self.snapshot())
            .map_err(anyhow::Error::from)?;
        Ok(json)
    }

    /// Shared handle to the root step, for observers running on other
    /// threads.
    pub fn root(&self) -> Arc<dyn Step> {
        Arc::clone(&self.root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DirectorError;

    #[test]
    fn ok_script_reports_ok_and_exit_zero() {
        let script = Script::parse("[\n  true\n  echo hi\n]\n").unwrap();
        assert_eq!(script.status(), StepStatus::Pending);
        assert_eq!(script.run(true).unwrap(), StepStatus::Ok);
        assert_eq!(script.exit_code(), Some(0));
    }

    #[test]
    fn declared_env_flows_down_with_self_substitution() {
        let mut ambient = EnvMap::new();
        ambient.insert("PATH".into(), "/usr/bin:/bin".into());
        let script = Script::parse(
            "( env PATH=/opt/tools:$PATH\n  [ env MARK=$PATH\n    true\n  ]\n)\n",
        )
        .unwrap();
        assert_eq!(script.run_with_env(&ambient, true).unwrap(), StepStatus::Ok);
        let snap = script.snapshot();
        assert_eq!(snap.kind, "sequential");
        assert_eq!(snap.steps[0].status, StepStatus::Ok);
    }

    #[test]
    fn self_referential_env_fails_before_any_execution() {
        let mut ambient = EnvMap::new();
        ambient.insert("LOOP".into(), "$LOOP".into());
        let script = Script::parse("( env LOOP=x$LOOP\n  echo never\n)\n").unwrap();
        let err = script.run_with_env(&ambient, true).unwrap_err();
        assert!(matches!(err, DirectorError::EnvSelfReference { ref name } if name == "LOOP"));
        assert_eq!(script.status(), StepStatus::Pending);
    }

    #[test]
    fn snapshot_json_is_a_nested_object() {
        let script = Script::parse("{\n  true\n  [ echo hi ]\n}\n").unwrap();
        let json = script.snapshot_json().unwrap();
        assert!(json.contains("\"type\": \"parallel\""));
        assert!(json.contains("\"type\": \"sequential\""));
        assert!(json.contains("\"status\": \"pending\""));
    }
}
