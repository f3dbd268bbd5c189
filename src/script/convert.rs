//! AST to executable step tree conversion.

use std::sync::Arc;

use crate::error::Result;
use crate::step::{Command, ParallelGroup, SequentialGroup, Step};

use super::ast::ScriptNode;

/// Build the executable step for `node` at the given nesting depth. Children
/// sit one level deeper, which only affects log indentation. Option
/// validation (such as a non-numeric `multiplicity`) fails here, before
/// anything runs.
pub fn convert(node: &ScriptNode, level: usize) -> Result<Arc<dyn Step>> {
    Ok(match node {
        ScriptNode::Command { command, options } => Arc::new(Command::new(
            options.opts.clone(),
            options.env.clone(),
            level,
            command.clone(),
        )),
        ScriptNode::Sequential { steps, options } => {
            let children = steps
                .iter()
                .map(|child| convert(child, level + 1))
                .collect::<Result<Vec<_>>>()?;
            Arc::new(SequentialGroup::new(
                options.opts.clone(),
                options.env.clone(),
                level,
                children,
            ))
        }
        ScriptNode::Parallel { steps, options } => {
            let children = steps
                .iter()
                .map(|child| convert(child, level + 1))
                .collect::<Result<Vec<_>>>()?;
            Arc::new(ParallelGroup::new(
                options.opts.clone(),
                options.env.clone(),
                level,
                children,
            )?)
        }
    })
}
