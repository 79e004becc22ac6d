//! Durable storage for flows, sessions, step results, and timer wakes
//!
//! The engine only talks to these traits. `memory` keeps everything in
//! process (tests, demos, single-node setups); `postgres` is the production
//! backend.

pub mod catalog;
pub mod memory;
pub mod postgres;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::time::Duration;

use crate::flow::FlowGraph;
use crate::types::{ErrorInfo, FlowStatus, Session, SessionFilter};

pub use catalog::{BoundFlow, FlowCatalog};
pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Authoring-side view of one flow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowRecord {
    pub flow_id: String,
    pub name: String,
    pub status: FlowStatus,
    /// Latest published version, if any
    pub latest_version: Option<i32>,
    /// Unpublished working copy
    pub draft: Option<FlowGraph>,
    pub updated_at: DateTime<Utc>,
}

/// One immutable published version
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowVersion {
    pub flow_id: String,
    pub version: i32,
    pub graph: FlowGraph,
    pub published_at: DateTime<Utc>,
}

/// Recorded outcome of one side-effecting node execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepResult {
    Success(JsonValue),
    Failure(ErrorInfo),
}

/// A persisted delayed wake for a `wait` node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimerWake {
    pub id: String,
    pub session_id: String,
    pub wake_at: DateTime<Utc>,
}

#[async_trait]
pub trait FlowStore: Send + Sync {
    /// Create the flow if needed and replace its working copy
    async fn save_draft(&self, flow_id: &str, graph: &FlowGraph) -> Result<()>;

    async fn get_draft(&self, flow_id: &str) -> Result<Option<FlowGraph>>;

    /// Store `graph` as the next version, mark the flow published, and
    /// clear the working copy. Returns the new version number.
    async fn insert_version(&self, flow_id: &str, graph: &FlowGraph) -> Result<i32>;

    async fn get_record(&self, flow_id: &str) -> Result<Option<FlowRecord>>;

    async fn get_version(&self, flow_id: &str, version: i32) -> Result<Option<FlowVersion>>;

    /// Returns false when the flow does not exist
    async fn set_status(&self, flow_id: &str, status: FlowStatus) -> Result<bool>;

    async fn list_flows(&self) -> Result<Vec<FlowRecord>>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Insert a new session. Returns false if the contact already has an
    /// active session on that channel.
    async fn insert_session(&self, session: &Session) -> Result<bool>;

    async fn get_session(&self, session_id: &str) -> Result<Option<Session>>;

    /// The non-terminal session for a contact on a channel
    async fn find_active(&self, contact_id: &str, channel: &str) -> Result<Option<Session>>;

    /// Take the per-session lease if it is free or expired. A held lease is
    /// never re-entered, not even by the same owner.
    async fn try_acquire_lease(&self, session_id: &str, owner: &str, ttl: Duration)
        -> Result<bool>;

    async fn release_lease(&self, session_id: &str, owner: &str) -> Result<()>;

    /// Persist the session if its stored revision still equals
    /// `session.revision`; bumps the revision and releases the lease.
    /// Returns false on a revision conflict.
    async fn save_session(&self, session: &Session) -> Result<bool>;

    async fn list_sessions(&self, filter: &SessionFilter) -> Result<Vec<Session>>;

    async fn get_step_result(&self, session_id: &str, step_token: &str)
        -> Result<Option<StepResult>>;

    /// First write wins; recording the same token twice keeps the original
    async fn record_step_result(
        &self,
        session_id: &str,
        step_token: &str,
        node_id: &str,
        result: &StepResult,
    ) -> Result<()>;
}

#[async_trait]
pub trait TimerStore: Send + Sync {
    async fn schedule_wake(&self, session_id: &str, wake_at: DateTime<Utc>) -> Result<String>;

    /// Drop every pending wake of a session; returns how many were removed
    async fn cancel_wakes(&self, session_id: &str) -> Result<u64>;

    /// Claim due wakes, hiding them from other pollers for `ttl`
    async fn claim_due(&self, now: DateTime<Utc>, limit: i64, ttl: Duration)
        -> Result<Vec<TimerWake>>;

    async fn complete_wake(&self, timer_id: &str) -> Result<()>;
}
