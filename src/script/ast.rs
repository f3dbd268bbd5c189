//! Parsed script tree, before conversion into executable steps.

use std::collections::HashMap;

use crate::env::EnvMap;

/// Options and environment declarations attached to one node.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeOptions {
    /// `-name=value` options, uninterpreted at parse time.
    pub opts: HashMap<String, String>,

    /// `env NAME=value` declarations, resolved against the parent at run
    /// setup time.
    pub env: EnvMap,
}

impl NodeOptions {
    /// Fold a wrapper's options into this node. Entries the node already
    /// declares win over the wrapper's.
    pub fn merge_outer(&mut self, outer: &NodeOptions) {
        for (name, value) in &outer.opts {
            self.opts.entry(name.clone()).or_insert_with(|| value.clone());
        }
        for (name, value) in &outer.env {
            self.env.entry(name.clone()).or_insert_with(|| value.clone());
        }
    }
}

/// One node of the parsed script.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptNode {
    Command {
        command: String,
        options: NodeOptions,
    },
    Sequential {
        steps: Vec<ScriptNode>,
        options: NodeOptions,
    },
    Parallel {
        steps: Vec<ScriptNode>,
        options: NodeOptions,
    },
}

impl ScriptNode {
    pub fn options(&self) -> &NodeOptions {
        match self {
            ScriptNode::Command { options, .. }
            | ScriptNode::Sequential { options, .. }
            | ScriptNode::Parallel { options, .. } => options,
        }
    }

    pub fn options_mut(&mut self) -> &mut NodeOptions {
        match self {
            ScriptNode::Command { options, .. }
            | ScriptNode::Sequential { options, .. }
            | ScriptNode::Parallel { options, .. } => options,
        }
    }

    /// Number of commands in this subtree.
    pub fn leaf_count(&self) -> usize {
        match self {
            ScriptNode::Command { .. } => 1,
            ScriptNode::Sequential { steps, .. } | ScriptNode::Parallel { steps, .. } => {
                steps.iter().map(ScriptNode::leaf_count).sum()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_outer_keeps_inner_entries() {
        let mut inner = NodeOptions::default();
        inner.opts.insert("title".into(), "inner".into());
        inner.env.insert("A".into(), "1".into());

        let mut outer = NodeOptions::default();
        outer.opts.insert("title".into(), "outer".into());
        outer.opts.insert("multiplicity".into(), "3".into());
        outer.env.insert("A".into(), "2".into());
        outer.env.insert("B".into(), "4".into());

        inner.merge_outer(&outer);
        assert_eq!(inner.opts["title"], "inner");
        assert_eq!(inner.opts["multiplicity"], "3");
        assert_eq!(inner.env["A"], "1");
        assert_eq!(inner.env["B"], "4");
    }

    #[test]
    fn leaf_count_walks_the_tree() {
        let node = ScriptNode::Sequential {
            steps: vec![
                ScriptNode::Command {
                    command: "true".into(),
                    options: NodeOptions::default(),
                },
                ScriptNode::Parallel {
                    steps: vec![
                        ScriptNode::Command {
                            command: "true".into(),
                            options: NodeOptions::default(),
                        },
                        ScriptNode::Command {
                            command: "true".into(),
                            options: NodeOptions::default(),
                        },
                    ],
                    options: NodeOptions::default(),
                },
            ],
            options: NodeOptions::default(),
        };
        assert_eq!(node.leaf_count(), 3);
    }
}
