//! Rule: Unreachable Node
//!
//! Warns about nodes that no path from the start node reaches. Jumps count
//! as paths.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::flow::{FlowGraph, NodeKind};

use super::super::{ValidationError, ValidationRule};

pub struct UnreachableNodeRule;

impl ValidationRule for UnreachableNodeRule {
    fn id(&self) -> &'static str {
        "unreachable-node"
    }

    fn description(&self) -> &'static str {
        "Every node should be reachable from the start node"
    }

    fn validate(&self, graph: &FlowGraph) -> Vec<ValidationError> {
        let Some(start) = graph.nodes.iter().find(|n| matches!(n.kind, NodeKind::Start)) else {
            // entry-node already reports this
            return vec![];
        };

        let mut next: HashMap<&str, Vec<&str>> = HashMap::new();
        for edge in &graph.edges {
            next.entry(edge.from_node_id.as_str())
                .or_default()
                .push(edge.to_node_id.as_str());
        }
        for node in &graph.nodes {
            if let NodeKind::Jump(cfg) = &node.kind {
                next.entry(node.id.as_str())
                    .or_default()
                    .push(cfg.target_node_id.as_str());
            }
        }

        let mut reached: HashSet<&str> = HashSet::new();
        let mut queue = VecDeque::from([start.id.as_str()]);
        while let Some(id) = queue.pop_front() {
            if !reached.insert(id) {
                continue;
            }
            for target in next.get(id).into_iter().flatten() {
                queue.push_back(target);
            }
        }

        graph
            .nodes
            .iter()
            .filter(|n| !reached.contains(n.id.as_str()))
            .map(|n| {
                ValidationError::warning(
                    Some(&n.id),
                    format!("'{}' node is never reached", n.kind.type_name()),
                    self.id(),
                )
            })
            .collect()
    }
}
