//! Flow graph model
//!
//! A published flow is an immutable arena of nodes and edges addressed by
//! string id. Cycles (loops, jumps) and re-entry need no pointer links: the
//! engine only ever holds a node id and looks it up in the snapshot.

pub mod node;
pub mod validator;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

pub use node::*;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    #[serde(alias = "from")]
    pub from_node_id: String,
    #[serde(alias = "to")]
    pub to_node_id: String,
    #[serde(default)]
    pub branch_label: Option<String>,
}

impl Edge {
    pub fn new(from: &str, to: &str) -> Self {
        Self {
            from_node_id: from.to_string(),
            to_node_id: to.to_string(),
            branch_label: None,
        }
    }

    pub fn labeled(from: &str, to: &str, label: &str) -> Self {
        Self {
            from_node_id: from.to_string(),
            to_node_id: to.to_string(),
            branch_label: Some(label.to_string()),
        }
    }
}

/// Editable graph as authored in the builder (the draft and publish payload)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowGraph {
    #[serde(default)]
    pub name: String,
    /// Callable flows may end on a node without outgoing edges; reaching it
    /// returns to the calling flow.
    #[serde(default)]
    pub callable: bool,
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

impl FlowGraph {
    pub fn from_json(source: &str) -> Result<Self> {
        serde_json::from_str(source).context("Failed to parse flow graph JSON")
    }

    pub fn from_toml(source: &str) -> Result<Self> {
        toml::from_str(source).context("Failed to parse flow graph TOML")
    }
}

/// Load a flow graph from a `.json` or `.toml` file
pub fn load_graph_file(path: &Path) -> Result<FlowGraph> {
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read flow file {}", path.display()))?;

    match path.extension().and_then(|e| e.to_str()) {
        Some("toml") => FlowGraph::from_toml(&source),
        _ => FlowGraph::from_json(&source),
    }
}

/// Immutable published snapshot bound to sessions by `(flow_id, version)`
#[derive(Debug, Clone)]
pub struct Flow {
    pub flow_id: String,
    pub version: i32,
    pub published_at: DateTime<Utc>,
    graph: FlowGraph,
    node_index: HashMap<String, usize>,
    outgoing: HashMap<String, Vec<usize>>,
}

impl Flow {
    pub fn new(flow_id: &str, version: i32, graph: FlowGraph) -> Self {
        let node_index = graph
            .nodes
            .iter()
            .enumerate()
            .map(|(idx, node)| (node.id.clone(), idx))
            .collect();

        let mut outgoing: HashMap<String, Vec<usize>> = HashMap::new();
        for (idx, edge) in graph.edges.iter().enumerate() {
            outgoing
                .entry(edge.from_node_id.clone())
                .or_default()
                .push(idx);
        }

        Self {
            flow_id: flow_id.to_string(),
            version,
            published_at: Utc::now(),
            graph,
            node_index,
            outgoing,
        }
    }

    pub fn with_published_at(mut self, published_at: DateTime<Utc>) -> Self {
        self.published_at = published_at;
        self
    }

    pub fn graph(&self) -> &FlowGraph {
        &self.graph
    }

    pub fn name(&self) -> &str {
        &self.graph.name
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.node_index.get(id).map(|&idx| &self.graph.nodes[idx])
    }

    pub fn entry_node(&self) -> Option<&Node> {
        self.graph
            .nodes
            .iter()
            .find(|n| matches!(n.kind, NodeKind::Start))
    }

    pub fn outgoing(&self, from: &str) -> impl Iterator<Item = &Edge> {
        self.outgoing
            .get(from)
            .into_iter()
            .flatten()
            .map(|&idx| &self.graph.edges[idx])
    }

    /// Target of the edge leaving `from` with the given label.
    ///
    /// Without a label, the first edge that is not an `on_error` edge wins;
    /// single-output nodes have exactly one.
    pub fn successor(&self, from: &str, label: Option<&str>) -> Option<&str> {
        let edge = match label {
            Some(label) => self
                .outgoing(from)
                .find(|e| e.branch_label.as_deref() == Some(label)),
            None => self
                .outgoing(from)
                .find(|e| e.branch_label.as_deref() != Some(ON_ERROR_BRANCH)),
        };
        edge.map(|e| e.to_node_id.as_str())
    }

    pub fn has_branch(&self, from: &str, label: &str) -> bool {
        self.outgoing(from)
            .any(|e| e.branch_label.as_deref() == Some(label))
    }
}
