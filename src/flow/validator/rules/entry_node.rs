//! Rule: Entry Node
//!
//! A flow must contain exactly one `start` node; sessions begin there.

use crate::flow::{FlowGraph, NodeKind};

use super::super::{ValidationError, ValidationRule};

pub struct EntryNodeRule;

impl ValidationRule for EntryNodeRule {
    fn id(&self) -> &'static str {
        "entry-node"
    }

    fn description(&self) -> &'static str {
        "Flows must have exactly one start node"
    }

    fn validate(&self, graph: &FlowGraph) -> Vec<ValidationError> {
        let starts: Vec<&str> = graph
            .nodes
            .iter()
            .filter(|n| matches!(n.kind, NodeKind::Start))
            .map(|n| n.id.as_str())
            .collect();

        match starts.len() {
            1 => vec![],
            0 => vec![ValidationError::error(
                None,
                "Flow has no start node",
                self.id(),
            )],
            _ => starts[1..]
                .iter()
                .map(|id| {
                    ValidationError::error(
                        Some(id),
                        format!("Additional start node (first is '{}')", starts[0]),
                        self.id(),
                    )
                })
                .collect(),
        }
    }
}
