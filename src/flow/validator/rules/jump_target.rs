//! Rule: Jump Target
//!
//! A `jump` is a goto within the same flow; its target must exist and may
//! not be the jump itself.

use std::collections::HashSet;

use crate::flow::{FlowGraph, NodeKind};

use super::super::{ValidationError, ValidationRule};

pub struct JumpTargetRule;

impl ValidationRule for JumpTargetRule {
    fn id(&self) -> &'static str {
        "jump-target"
    }

    fn description(&self) -> &'static str {
        "Jump targets must exist in the same flow"
    }

    fn validate(&self, graph: &FlowGraph) -> Vec<ValidationError> {
        let ids: HashSet<&str> = graph.nodes.iter().map(|n| n.id.as_str()).collect();

        graph
            .nodes
            .iter()
            .filter_map(|node| match &node.kind {
                NodeKind::Jump(cfg) if cfg.target_node_id == node.id => {
                    Some(ValidationError::error(
                        Some(&node.id),
                        "Jump targets itself",
                        self.id(),
                    ))
                }
                NodeKind::Jump(cfg) if !ids.contains(cfg.target_node_id.as_str()) => {
                    Some(ValidationError::error(
                        Some(&node.id),
                        format!("Jump target '{}' does not exist", cfg.target_node_id),
                        self.id(),
                    ))
                }
                _ => None,
            })
            .collect()
    }
}
