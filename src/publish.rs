//! Publish workflow
//!
//! Authors edit a mutable draft; publishing validates a graph and stores it
//! as the next immutable version. Status changes (pause, resume, delete)
//! only affect which sessions may start or keep running.

use std::collections::BTreeSet;
use thiserror::Error;
use tracing::info;

use crate::flow::validator::{validate_graph, ValidationError};
use crate::flow::{FlowGraph, NodeKind};
use crate::store::FlowCatalog;
use crate::types::{FlowStatus, FlowStatusInfo};

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("flow has {} validation error(s)", .0.iter().filter(|e| e.is_error()).count())]
    Invalid(Vec<ValidationError>),

    #[error("flow not found: {0}")]
    NotFound(String),

    #[error("flow {0} has no draft to publish")]
    NoDraft(String),

    #[error("flow {0} has never been published")]
    NeverPublished(String),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// A successful publish
#[derive(Debug, Clone)]
pub struct Published {
    pub flow_id: String,
    pub version: i32,
    /// Non-blocking findings
    pub warnings: Vec<ValidationError>,
}

/// Authoring operations on flows
pub struct FlowManager<'a> {
    catalog: &'a FlowCatalog,
}

impl<'a> FlowManager<'a> {
    pub fn new(catalog: &'a FlowCatalog) -> Self {
        Self { catalog }
    }

    /// Validate without storing anything.
    ///
    /// Adds a check that every sub-flow target is currently published;
    /// a flow may call itself.
    pub async fn validate(
        &self,
        flow_id: &str,
        graph: &FlowGraph,
    ) -> Result<Vec<ValidationError>, PublishError> {
        let mut findings = validate_graph(graph);

        let targets: BTreeSet<(&str, &str)> = graph
            .nodes
            .iter()
            .filter_map(|n| match &n.kind {
                NodeKind::Subflow(cfg) if cfg.flow_id != flow_id => {
                    Some((n.id.as_str(), cfg.flow_id.as_str()))
                }
                _ => None,
            })
            .collect();

        for (node_id, target) in targets {
            let published = self
                .catalog
                .store()
                .get_record(target)
                .await?
                .map_or(false, |r| {
                    r.latest_version.is_some()
                        && matches!(r.status, FlowStatus::Published | FlowStatus::Paused)
                });
            if !published {
                findings.push(ValidationError::error(
                    Some(node_id),
                    format!("sub-flow '{}' is not published", target),
                    "subflow-target",
                ));
            }
        }
        Ok(findings)
    }

    /// Validate `graph` and store it as the next version
    pub async fn publish(&self, flow_id: &str, graph: &FlowGraph) -> Result<Published, PublishError> {
        let findings = self.validate(flow_id, graph).await?;
        if findings.iter().any(ValidationError::is_error) {
            return Err(PublishError::Invalid(findings));
        }

        let version = self.catalog.store().insert_version(flow_id, graph).await?;
        info!(flow_id, version, warnings = findings.len(), "Flow published");

        Ok(Published {
            flow_id: flow_id.to_string(),
            version,
            warnings: findings,
        })
    }

    pub async fn save_draft(&self, flow_id: &str, graph: &FlowGraph) -> Result<(), PublishError> {
        self.catalog.store().save_draft(flow_id, graph).await?;
        Ok(())
    }

    pub async fn publish_draft(&self, flow_id: &str) -> Result<Published, PublishError> {
        let draft = self
            .catalog
            .store()
            .get_draft(flow_id)
            .await?
            .ok_or_else(|| PublishError::NoDraft(flow_id.to_string()))?;
        self.publish(flow_id, &draft).await
    }

    /// Badge shown to authors
    pub async fn get_status(&self, flow_id: &str) -> Result<FlowStatusInfo, PublishError> {
        let record = self
            .catalog
            .store()
            .get_record(flow_id)
            .await?
            .ok_or_else(|| PublishError::NotFound(flow_id.to_string()))?;

        Ok(FlowStatusInfo {
            flow_id: record.flow_id,
            name: record.name,
            status: record.status,
            version: record.latest_version,
            has_draft: record.draft.is_some(),
            updated_at: record.updated_at,
        })
    }

    /// Stop new sessions; running ones drain unless configured otherwise
    pub async fn pause(&self, flow_id: &str) -> Result<FlowStatusInfo, PublishError> {
        let status = self.get_status(flow_id).await?;
        if status.version.is_none() {
            return Err(PublishError::NeverPublished(flow_id.to_string()));
        }
        self.set_status(flow_id, FlowStatus::Paused).await
    }

    pub async fn resume(&self, flow_id: &str) -> Result<FlowStatusInfo, PublishError> {
        let status = self.get_status(flow_id).await?;
        if status.version.is_none() {
            return Err(PublishError::NeverPublished(flow_id.to_string()));
        }
        self.set_status(flow_id, FlowStatus::Published).await
    }

    /// Mark the flow deleted. Sessions still bound to it fail with `FlowGone`
    /// on their next step.
    pub async fn delete(&self, flow_id: &str) -> Result<FlowStatusInfo, PublishError> {
        let info = self.set_status(flow_id, FlowStatus::Deleted).await?;
        self.catalog.evict(flow_id);
        Ok(info)
    }

    async fn set_status(
        &self,
        flow_id: &str,
        status: FlowStatus,
    ) -> Result<FlowStatusInfo, PublishError> {
        if !self.catalog.store().set_status(flow_id, status).await? {
            return Err(PublishError::NotFound(flow_id.to_string()));
        }
        info!(flow_id, %status, "Flow status changed");
        self.get_status(flow_id).await
    }
}
