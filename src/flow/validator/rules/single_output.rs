//! Rule: Single Output
//!
//! Nodes without branches follow exactly one edge. Extra edges would be
//! ignored at runtime, so fan-out is an error. Labels other than `default`
//! mean nothing here and are flagged, as is an `on_error` edge on a node that
//! never fails into one.

use std::collections::HashMap;

use crate::flow::{Edge, FlowGraph, NodeCategory, NodeKind, DEFAULT_BRANCH, ON_ERROR_BRANCH};

use super::super::{ValidationError, ValidationRule};

pub struct SingleOutputRule;

impl ValidationRule for SingleOutputRule {
    fn id(&self) -> &'static str {
        "single-output"
    }

    fn description(&self) -> &'static str {
        "Single-output nodes must have at most one outgoing edge"
    }

    fn validate(&self, graph: &FlowGraph) -> Vec<ValidationError> {
        let mut outgoing: HashMap<&str, Vec<&Edge>> = HashMap::new();
        for edge in &graph.edges {
            outgoing
                .entry(edge.from_node_id.as_str())
                .or_default()
                .push(edge);
        }

        let mut errors = Vec::new();

        for node in &graph.nodes {
            if node.kind.branches().is_some()
                || node.kind.is_terminal()
                || matches!(node.kind, NodeKind::Jump(_))
            {
                continue;
            }
            let Some(edges) = outgoing.get(node.id.as_str()) else {
                continue;
            };

            let (on_error, exits): (Vec<&Edge>, Vec<&Edge>) = edges
                .iter()
                .partition(|e| e.branch_label.as_deref() == Some(ON_ERROR_BRANCH));

            if exits.len() > 1 {
                let targets: Vec<&str> = exits.iter().map(|e| e.to_node_id.as_str()).collect();
                errors.push(ValidationError::error(
                    Some(&node.id),
                    format!(
                        "'{}' node has {} outgoing edges ({}); only one can be followed",
                        node.kind.type_name(),
                        exits.len(),
                        targets.join(", ")
                    ),
                    self.id(),
                ));
            }

            if on_error.len() > 1 {
                errors.push(ValidationError::error(
                    Some(&node.id),
                    "Multiple 'on_error' edges",
                    self.id(),
                ));
            }
            if !on_error.is_empty() && node.kind.category() != NodeCategory::Integration {
                errors.push(ValidationError::warning(
                    Some(&node.id),
                    format!(
                        "'on_error' edge is never taken from a '{}' node",
                        node.kind.type_name()
                    ),
                    self.id(),
                ));
            }

            for edge in &exits {
                if let Some(label) = edge.branch_label.as_deref() {
                    if label != DEFAULT_BRANCH {
                        errors.push(ValidationError::warning(
                            Some(&node.id),
                            format!(
                                "Label '{}' is ignored on a single-output node",
                                label
                            ),
                            self.id(),
                        ));
                    }
                }
            }
        }

        errors
    }
}
