//! Rule: Dangling Edge
//!
//! Both ends of every edge must name a node of the same flow.

use std::collections::HashSet;

use crate::flow::FlowGraph;

use super::super::{ValidationError, ValidationRule};

pub struct DanglingEdgeRule;

impl ValidationRule for DanglingEdgeRule {
    fn id(&self) -> &'static str {
        "dangling-edge"
    }

    fn description(&self) -> &'static str {
        "Edges must connect existing nodes"
    }

    fn validate(&self, graph: &FlowGraph) -> Vec<ValidationError> {
        let ids: HashSet<&str> = graph.nodes.iter().map(|n| n.id.as_str()).collect();
        let mut errors = Vec::new();

        for edge in &graph.edges {
            if !ids.contains(edge.from_node_id.as_str()) {
                errors.push(ValidationError::error(
                    Some(&edge.from_node_id),
                    format!("Edge starts at unknown node '{}'", edge.from_node_id),
                    self.id(),
                ));
            }
            if !ids.contains(edge.to_node_id.as_str()) {
                errors.push(ValidationError::error(
                    Some(&edge.from_node_id),
                    format!("Edge points to unknown node '{}'", edge.to_node_id),
                    self.id(),
                ));
            }
        }

        errors
    }
}
