//! Pest-based parser producing [`ScriptNode`] trees.

use pest::iterators::Pair;
use pest::Parser as PestParser;
use pest_derive::Parser;

use crate::error::{DirectorError, Result};

use super::ast::{NodeOptions, ScriptNode};

#[derive(Parser)]
#[grammar = "script/grammar.pest"]
struct ScriptParser;

/// Parse a complete script into its AST. The text must contain exactly one
/// top-level step.
pub fn parse(text: &str) -> Result<ScriptNode> {
    let mut pairs = ScriptParser::parse(Rule::script, text).map_err(|err| {
        DirectorError::Parse {
            message: err.to_string(),
        }
    })?;
    let script = pairs.next().ok_or_else(|| malformed("empty parse result"))?;
    let step = script
        .into_inner()
        .find(|pair| pair.as_rule() == Rule::step)
        .ok_or_else(|| malformed("script without a step"))?;
    build_step(step)
}

// The grammar guarantees the shapes below; hitting one of these means the
// grammar and this builder disagree.
fn malformed(what: &str) -> DirectorError {
    DirectorError::Other(anyhow::anyhow!("malformed parse tree: {what}"))
}

fn build_step(pair: Pair<'_, Rule>) -> Result<ScriptNode> {
    let inner = pair
        .into_inner()
        .next()
        .ok_or_else(|| malformed("empty step"))?;
    match inner.as_rule() {
        Rule::command => Ok(ScriptNode::Command {
            command: inner.as_str().to_string(),
            options: NodeOptions::default(),
        }),
        Rule::sequential | Rule::parallel => build_group(inner),
        Rule::wrapped => build_wrapped(inner),
        other => Err(malformed(&format!("unexpected rule {other:?} in step"))),
    }
}

fn build_group(pair: Pair<'_, Rule>) -> Result<ScriptNode> {
    let rule = pair.as_rule();
    let mut options = NodeOptions::default();
    let mut steps = Vec::new();
    for child in pair.into_inner() {
        match child.as_rule() {
            Rule::options => options = build_options(child)?,
            Rule::step => steps.push(build_step(child)?),
            other => return Err(malformed(&format!("unexpected rule {other:?} in group"))),
        }
    }
    Ok(match rule {
        Rule::sequential => ScriptNode::Sequential { steps, options },
        _ => ScriptNode::Parallel { steps, options },
    })
}

/// `( options step )` has no node of its own: the options fold into the
/// wrapped step, which keeps its own entries on conflict.
fn build_wrapped(pair: Pair<'_, Rule>) -> Result<ScriptNode> {
    let mut options = NodeOptions::default();
    let mut node = None;
    for child in pair.into_inner() {
        match child.as_rule() {
            Rule::options => options = build_options(child)?,
            Rule::step => node = Some(build_step(child)?),
            other => return Err(malformed(&format!("unexpected rule {other:?} in wrapper"))),
        }
    }
    let mut node = node.ok_or_else(|| malformed("wrapper without a step"))?;
    node.options_mut().merge_outer(&options);
    Ok(node)
}

fn build_options(pair: Pair<'_, Rule>) -> Result<NodeOptions> {
    let mut options = NodeOptions::default();
    for decl in pair.into_inner() {
        let rule = decl.as_rule();
        let mut name = None;
        let mut value = None;
        for part in decl.into_inner() {
            match part.as_rule() {
                Rule::name => name = Some(part.as_str().to_string()),
                Rule::value => value = Some(unquote(part.as_str()).to_string()),
                // the `env` keyword token
                _ => {}
            }
        }
        let name = name.ok_or_else(|| malformed("declaration without a name"))?;
        let value = value.ok_or_else(|| malformed("declaration without a value"))?;
        match rule {
            Rule::env_decl => options.env.insert(name, value),
            Rule::opt_decl => options.opts.insert(name, value),
            other => {
                return Err(malformed(&format!("unexpected rule {other:?} in options")))
            }
        };
    }
    Ok(options)
}

/// Strip one layer of matching quotes; quoted values keep inner whitespace.
fn unquote(raw: &str) -> &str {
    let bytes = raw.as_bytes();
    if bytes.len() >= 2 && (bytes[0] == b'"' || bytes[0] == b'\'') && bytes[bytes.len() - 1] == bytes[0]
    {
        &raw[1..raw.len() - 1]
    } else {
        raw
    }
}
