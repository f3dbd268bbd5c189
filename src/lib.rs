//! Director - declarative runner for nested sequential and parallel command
//! groups.
//!
//! A workflow script describes a tree of shell commands: `[ ... ]` runs its
//! children in order and stops at the first failure, `{ ... }` runs them
//! concurrently on a bounded worker pool and cancels the rest when one
//! fails. Groups can nest freely, declare environment overrides that inherit
//! downward, and carry options such as a display title or a parallel
//! multiplicity.
//!
//! The library surface is [`Script`]: parse a script, run it, observe or
//! cancel it from another thread.

pub mod cli;
pub mod env;
pub mod error;
pub mod output;
pub mod script;
pub mod step;

pub use error::{DirectorError, Result};
pub use script::Script;
pub use step::{Step, StepSnapshot, StepStatus};
