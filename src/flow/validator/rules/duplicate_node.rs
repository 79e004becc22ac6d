//! Rule: Duplicate Node
//!
//! Node ids address the arena and must be unique within a flow.

use std::collections::HashSet;

use crate::flow::FlowGraph;

use super::super::{ValidationError, ValidationRule};

pub struct DuplicateNodeRule;

impl ValidationRule for DuplicateNodeRule {
    fn id(&self) -> &'static str {
        "duplicate-node"
    }

    fn description(&self) -> &'static str {
        "Node ids must be unique within a flow"
    }

    fn validate(&self, graph: &FlowGraph) -> Vec<ValidationError> {
        let mut seen = HashSet::new();
        let mut errors = Vec::new();

        for node in &graph.nodes {
            if node.id.trim().is_empty() {
                errors.push(ValidationError::error(
                    None,
                    format!("A '{}' node has an empty id", node.kind.type_name()),
                    self.id(),
                ));
            } else if !seen.insert(node.id.as_str()) {
                errors.push(ValidationError::error(
                    Some(&node.id),
                    format!("Node id '{}' is used more than once", node.id),
                    self.id(),
                ));
            }
        }

        errors
    }
}
