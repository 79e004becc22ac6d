//! Rule: Missing Edge
//!
//! Every node except the terminal types (`end_chat`, `transfer`) needs an
//! outgoing edge. `jump` nodes leave through their target instead.
//!
//! In callable flows a single-output node without outgoing edges is a
//! return point to the caller, so only multi-output and integration nodes
//! are checked there.

use std::collections::HashSet;

use crate::flow::{FlowGraph, NodeCategory, NodeKind, ON_ERROR_BRANCH};

use super::super::{ValidationError, ValidationRule};

pub struct MissingEdgeRule;

impl ValidationRule for MissingEdgeRule {
    fn id(&self) -> &'static str {
        "missing-edge"
    }

    fn description(&self) -> &'static str {
        "Non-terminal nodes must have at least one outgoing edge"
    }

    fn validate(&self, graph: &FlowGraph) -> Vec<ValidationError> {
        let with_exit: HashSet<&str> = graph
            .edges
            .iter()
            .filter(|e| e.branch_label.as_deref() != Some(ON_ERROR_BRANCH))
            .map(|e| e.from_node_id.as_str())
            .collect();

        graph
            .nodes
            .iter()
            .filter(|node| !node.kind.is_terminal())
            .filter(|node| !matches!(node.kind, NodeKind::Jump(_)))
            .filter(|node| {
                !graph.callable
                    || node.kind.branches().is_some()
                    || node.kind.category() == NodeCategory::Integration
            })
            .filter(|node| !with_exit.contains(node.id.as_str()))
            .map(|node| {
                ValidationError::error(
                    Some(&node.id),
                    format!(
                        "'{}' node has no outgoing edge",
                        node.kind.type_name()
                    ),
                    self.id(),
                )
            })
            .collect()
    }
}
