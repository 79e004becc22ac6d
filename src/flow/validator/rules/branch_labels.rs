//! Rule: Branch Labels
//!
//! Multi-output nodes (condition, buttons, lists, A/B tests) must declare
//! unique labels, have one edge per label, and, except for A/B tests, a
//! `default` edge taken when nothing matches. Edges with labels the node
//! never emits are reported too.

use std::collections::{HashMap, HashSet};

use crate::flow::{FlowGraph, DEFAULT_BRANCH, ON_ERROR_BRANCH};

use super::super::{ValidationError, ValidationRule};

pub struct BranchLabelsRule;

impl ValidationRule for BranchLabelsRule {
    fn id(&self) -> &'static str {
        "branch-labels"
    }

    fn description(&self) -> &'static str {
        "Multi-output nodes need unique, exhaustive branch edges"
    }

    fn validate(&self, graph: &FlowGraph) -> Vec<ValidationError> {
        let mut edge_labels: HashMap<&str, Vec<Option<&str>>> = HashMap::new();
        for edge in &graph.edges {
            edge_labels
                .entry(edge.from_node_id.as_str())
                .or_default()
                .push(edge.branch_label.as_deref());
        }

        let mut errors = Vec::new();

        for node in &graph.nodes {
            let Some(spec) = node.kind.branches() else {
                continue;
            };
            let edges = edge_labels.get(node.id.as_str()).cloned().unwrap_or_default();

            let mut declared = HashSet::new();
            for label in &spec.labels {
                if label.trim().is_empty() {
                    errors.push(ValidationError::error(
                        Some(&node.id),
                        "Branch label is empty",
                        self.id(),
                    ));
                } else if label == DEFAULT_BRANCH || label == ON_ERROR_BRANCH {
                    errors.push(ValidationError::error(
                        Some(&node.id),
                        format!("Branch label '{}' is reserved", label),
                        self.id(),
                    ));
                } else if !declared.insert(label.as_str()) {
                    errors.push(ValidationError::error(
                        Some(&node.id),
                        format!("Branch label '{}' is declared more than once", label),
                        self.id(),
                    ));
                }
            }

            if spec.labels.is_empty() {
                errors.push(ValidationError::error(
                    Some(&node.id),
                    format!("'{}' node declares no branches", node.kind.type_name()),
                    self.id(),
                ));
            }

            let mut seen_edges = HashSet::new();
            for label in &edges {
                match label {
                    None => errors.push(ValidationError::error(
                        Some(&node.id),
                        "Edge from a multi-output node must carry a branch label",
                        self.id(),
                    )),
                    Some(label) => {
                        if !seen_edges.insert(*label) {
                            errors.push(ValidationError::error(
                                Some(&node.id),
                                format!("More than one edge for branch '{}'", label),
                                self.id(),
                            ));
                        }
                        let known = declared.contains(label)
                            || (spec.requires_default && *label == DEFAULT_BRANCH);
                        if !known {
                            errors.push(ValidationError::error(
                                Some(&node.id),
                                format!("Edge label '{}' matches no branch", label),
                                self.id(),
                            ));
                        }
                    }
                }
            }

            for label in &declared {
                if !seen_edges.contains(label) {
                    errors.push(ValidationError::error(
                        Some(&node.id),
                        format!("Branch '{}' has no outgoing edge", label),
                        self.id(),
                    ));
                }
            }

            if spec.requires_default && !seen_edges.contains(DEFAULT_BRANCH) {
                errors.push(ValidationError::error(
                    Some(&node.id),
                    format!(
                        "'{}' node needs a '{}' edge",
                        node.kind.type_name(),
                        DEFAULT_BRANCH
                    ),
                    self.id(),
                ));
            }
        }

        errors
    }
}
