use anyhow::{Context, Result};
use dashmap::DashMap;
use std::sync::Arc;

use super::FlowStore;
use crate::error::{codes, EngineError, EngineResult};
use crate::flow::Flow;
use crate::types::{ErrorInfo, FlowStatus};

/// What a session bound to `(flow_id, version)` may do next
#[derive(Debug, Clone)]
pub enum BoundFlow {
    Ready(Arc<Flow>),
    /// The session must stop; carries the failure to record
    Unavailable(ErrorInfo),
}

/// Read-only access to published snapshots.
///
/// Versions never change once published, so snapshots are cached for the
/// life of the process and shared between sessions.
pub struct FlowCatalog {
    store: Arc<dyn FlowStore>,
    snapshots: DashMap<(String, i32), Arc<Flow>>,
}

impl FlowCatalog {
    pub fn new(store: Arc<dyn FlowStore>) -> Self {
        Self {
            store,
            snapshots: DashMap::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn FlowStore> {
        &self.store
    }

    /// Snapshot of one exact version
    pub async fn snapshot(&self, flow_id: &str, version: i32) -> Result<Option<Arc<Flow>>> {
        let key = (flow_id.to_string(), version);
        if let Some(flow) = self.snapshots.get(&key) {
            return Ok(Some(flow.clone()));
        }

        let Some(stored) = self
            .store
            .get_version(flow_id, version)
            .await
            .with_context(|| format!("Failed to load flow {} v{}", flow_id, version))?
        else {
            return Ok(None);
        };

        let flow = Arc::new(
            Flow::new(&stored.flow_id, stored.version, stored.graph)
                .with_published_at(stored.published_at),
        );
        Ok(Some(self.snapshots.entry(key).or_insert(flow).clone()))
    }

    /// Latest published snapshot for starting new sessions.
    ///
    /// Fails when the flow was never published, is paused, or was deleted.
    pub async fn get_published(&self, flow_id: &str) -> EngineResult<Arc<Flow>> {
        let not_found = |reason: &str| EngineError::FlowNotFound {
            flow_id: flow_id.to_string(),
            reason: reason.to_string(),
        };

        let record = self
            .store
            .get_record(flow_id)
            .await
            .with_context(|| format!("Failed to load flow {}", flow_id))?
            .ok_or_else(|| not_found("never published"))?;

        match record.status {
            FlowStatus::Paused => return Err(not_found("paused")),
            FlowStatus::Deleted => return Err(not_found("deleted")),
            FlowStatus::Draft | FlowStatus::Published => {}
        }

        let version = record
            .latest_version
            .ok_or_else(|| not_found("never published"))?;

        self.snapshot(flow_id, version)
            .await?
            .ok_or_else(|| not_found("published version missing"))
    }

    /// Snapshot a running session is bound to.
    ///
    /// Superseded versions keep running. Deleted flows are gone; paused flows
    /// drain unless `drain_paused` is off.
    pub async fn get_bound(
        &self,
        flow_id: &str,
        version: i32,
        drain_paused: bool,
    ) -> Result<BoundFlow> {
        let record = self
            .store
            .get_record(flow_id)
            .await
            .with_context(|| format!("Failed to load flow {}", flow_id))?;

        match record.map(|r| r.status) {
            None | Some(FlowStatus::Deleted) => {
                return Ok(BoundFlow::Unavailable(ErrorInfo::new(
                    codes::FLOW_GONE,
                    format!("flow {} was deleted", flow_id),
                )))
            }
            Some(FlowStatus::Paused) if !drain_paused => {
                return Ok(BoundFlow::Unavailable(ErrorInfo::new(
                    codes::CANCELLED,
                    format!("flow {} is paused", flow_id),
                )))
            }
            _ => {}
        }

        Ok(match self.snapshot(flow_id, version).await? {
            Some(flow) => BoundFlow::Ready(flow),
            None => BoundFlow::Unavailable(ErrorInfo::new(
                codes::FLOW_GONE,
                format!("flow {} v{} no longer exists", flow_id, version),
            )),
        })
    }

    /// Drop every cached version of a flow
    pub fn evict(&self, flow_id: &str) {
        self.snapshots.retain(|(id, _), _| id != flow_id);
    }
}
