//! Publish-time validation for flow graphs
//!
//! Graph defects are reported to the author when publishing and never reach
//! the runtime. Every check lives in its own rule under `rules/`.
//!
//! # Adding a New Rule
//!
//! 1. Create a new file in `validator/rules/`
//! 2. Implement `ValidationRule` for your struct
//! 3. Add it to the `Validator::new()` constructor

pub mod rules;

use serde::{Deserialize, Serialize};

use super::FlowGraph;

// ============================================================================
// Validation Error Types
// ============================================================================

/// A graph defect found by a validation rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationError {
    /// Offending node, if the defect is local to one
    pub node_id: Option<String>,
    pub message: String,
    pub severity: Severity,
    pub rule_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Blocks publishing
    Error,
    /// Reported, publishing proceeds
    Warning,
}

impl ValidationError {
    pub fn error(node_id: Option<&str>, message: impl Into<String>, rule_id: &str) -> Self {
        Self {
            node_id: node_id.map(str::to_string),
            message: message.into(),
            severity: Severity::Error,
            rule_id: rule_id.to_string(),
        }
    }

    pub fn warning(node_id: Option<&str>, message: impl Into<String>, rule_id: &str) -> Self {
        Self {
            node_id: node_id.map(str::to_string),
            message: message.into(),
            severity: Severity::Warning,
            rule_id: rule_id.to_string(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.severity, Severity::Error)
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let severity = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        match &self.node_id {
            Some(node_id) => write!(
                f,
                "{} at node '{}': {} [{}]",
                severity, node_id, self.message, self.rule_id
            ),
            None => write!(f, "{}: {} [{}]", severity, self.message, self.rule_id),
        }
    }
}

impl std::error::Error for ValidationError {}

// ============================================================================
// ValidationRule Trait
// ============================================================================

pub trait ValidationRule: Send + Sync {
    /// Unique identifier for this rule (e.g., "missing-edge")
    fn id(&self) -> &'static str;

    fn description(&self) -> &'static str;

    fn validate(&self, graph: &FlowGraph) -> Vec<ValidationError>;
}

// ============================================================================
// Validator - Runs All Rules
// ============================================================================

pub struct Validator {
    rules: Vec<Box<dyn ValidationRule>>,
}

impl Validator {
    pub fn new() -> Self {
        Self {
            rules: vec![
                Box::new(rules::EntryNodeRule),
                Box::new(rules::DuplicateNodeRule),
                Box::new(rules::DanglingEdgeRule),
                Box::new(rules::MissingEdgeRule),
                Box::new(rules::BranchLabelsRule),
                Box::new(rules::SingleOutputRule),
                Box::new(rules::JumpTargetRule),
                Box::new(rules::NodeConfigRule),
                Box::new(rules::UnreachableNodeRule),
            ],
        }
    }

    pub fn validate(&self, graph: &FlowGraph) -> Vec<ValidationError> {
        self.rules
            .iter()
            .flat_map(|rule| rule.validate(graph))
            .collect()
    }

    #[allow(dead_code)]
    pub fn rules(&self) -> impl Iterator<Item = (&'static str, &'static str)> + '_ {
        self.rules.iter().map(|r| (r.id(), r.description()))
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Public API
// ============================================================================

pub fn validate_graph(graph: &FlowGraph) -> Vec<ValidationError> {
    Validator::new().validate(graph)
}

/// Check if a graph has any blocking errors (not just warnings)
pub fn has_errors(graph: &FlowGraph) -> bool {
    validate_graph(graph).iter().any(|e| e.is_error())
}

#[cfg(test)]
mod tests;
