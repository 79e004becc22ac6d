//! Execution Engine
//!
//! `step` takes one trigger for one session, walks the bound flow snapshot
//! node by node, and stops when the flow must wait (input, timer) or ends.
//! Everything between loading and saving the session happens under a
//! per-session lease; nothing is held while a session waits.
//!
//! - `run.rs` - resume handling, the hop loop, sub-flow return, finalization
//! - `dispatch.rs` - per-node behaviour
//! - `input.rs` - reply validation
//! - `ab.rs` - deterministic A/B sampling

mod ab;
mod dispatch;
pub mod input;
mod run;


use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{codes, EngineError, EngineResult};
use crate::flow::Flow;
use crate::integrations::ExternalCallAdapter;
use crate::publish::FlowManager;
use crate::store::{FlowCatalog, FlowStore, MemoryStore, SessionStore, TimerStore};
use crate::types::{
    ErrorInfo, InboundEvent, Session, SessionFilter, SessionStatus, StepOutcome, Trigger,
    Variables,
};

pub use ab::choose_branch;

pub struct Engine {
    config: Config,
    catalog: FlowCatalog,
    sessions: Arc<dyn SessionStore>,
    timers: Arc<dyn TimerStore>,
    adapter: Arc<dyn ExternalCallAdapter>,
    /// Prefix of the lease tokens this engine hands out
    owner: String,
}

impl Engine {
    pub fn new(
        config: Config,
        flows: Arc<dyn FlowStore>,
        sessions: Arc<dyn SessionStore>,
        timers: Arc<dyn TimerStore>,
        adapter: Arc<dyn ExternalCallAdapter>,
    ) -> Self {
        Self {
            config,
            catalog: FlowCatalog::new(flows),
            sessions,
            timers,
            adapter,
            owner: format!("engine-{}", Uuid::new_v4()),
        }
    }

    /// Engine whose flows, sessions, and timers all live in one memory store
    pub fn in_memory(
        config: Config,
        store: Arc<MemoryStore>,
        adapter: Arc<dyn ExternalCallAdapter>,
    ) -> Self {
        Self::new(config, store.clone(), store.clone(), store, adapter)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn catalog(&self) -> &FlowCatalog {
        &self.catalog
    }

    /// Authoring operations sharing this engine's snapshot cache
    pub fn flows(&self) -> FlowManager<'_> {
        FlowManager::new(&self.catalog)
    }

    pub fn sessions(&self) -> &Arc<dyn SessionStore> {
        &self.sessions
    }

    pub fn timers(&self) -> &Arc<dyn TimerStore> {
        &self.timers
    }

    /// Route an inbound event to the contact's active session, starting one
    /// on the channel's entry flow when there is none.
    pub async fn handle_inbound(&self, event: InboundEvent) -> EngineResult<StepOutcome> {
        if let Some(session) = self
            .sessions
            .find_active(&event.contact_id, &event.channel)
            .await?
        {
            return self.step(&session.id, event.trigger()).await;
        }

        let flow_id = self
            .config
            .entry_flow(&event.channel)
            .ok_or_else(|| EngineError::NoEntryFlow(event.channel.clone()))?
            .to_string();
        let flow = self.catalog.get_published(&flow_id).await?;

        let session = new_session(&event.contact_id, &event.channel, &flow, event.variables.clone())?;
        if !self.sessions.insert_session(&session).await? {
            // A concurrent first message created it; join that session
            let existing = self
                .sessions
                .find_active(&event.contact_id, &event.channel)
                .await?
                .ok_or_else(|| EngineError::SessionNotFound(session.id.clone()))?;
            return self.step(&existing.id, event.trigger()).await;
        }

        info!(
            session_id = %session.id,
            flow_id = %flow.flow_id,
            version = flow.version,
            "Session created"
        );
        self.step(&session.id, event.trigger()).await
    }

    /// Start a session on a specific flow and run it to its first suspension
    pub async fn start_session(
        &self,
        contact_id: &str,
        channel: &str,
        flow_id: &str,
        variables: Variables,
    ) -> EngineResult<StepOutcome> {
        if let Some(active) = self.sessions.find_active(contact_id, channel).await? {
            return Err(EngineError::ActiveSessionExists(active.id));
        }

        let flow = self.catalog.get_published(flow_id).await?;
        let session = new_session(contact_id, channel, &flow, variables)?;
        if !self.sessions.insert_session(&session).await? {
            let active = self.sessions.find_active(contact_id, channel).await?;
            return Err(EngineError::ActiveSessionExists(
                active.map(|s| s.id).unwrap_or_default(),
            ));
        }

        info!(
            session_id = %session.id,
            flow_id = %flow.flow_id,
            version = flow.version,
            "Session started"
        );
        self.run_with_lease(&session.id, None).await
    }

    /// Apply one trigger to one session.
    ///
    /// Triggers that do not fit the session's state come back as
    /// `StaleTrigger` and leave the session untouched.
    #[instrument(skip(self, trigger), fields(trigger = trigger.label()))]
    pub async fn step(&self, session_id: &str, trigger: Trigger) -> EngineResult<StepOutcome> {
        self.run_with_lease(session_id, Some(trigger)).await
    }

    async fn run_with_lease(
        &self,
        session_id: &str,
        trigger: Option<Trigger>,
    ) -> EngineResult<StepOutcome> {
        let lease = self.acquire_lease(session_id).await?;

        let result = match self.sessions.get_session(session_id).await {
            Ok(Some(session)) => self.run(session, trigger).await,
            Ok(None) => Err(EngineError::SessionNotFound(session_id.to_string())),
            Err(err) => Err(EngineError::Storage(err)),
        };

        // A successful run saved the session, which releases the lease
        if result.is_err() {
            if let Err(err) = self.sessions.release_lease(session_id, &lease).await {
                warn!(session_id, error = %err, "Failed to release session lease");
            }
        }

        if let Err(err) = &result {
            if err.is_discardable() {
                debug!(session_id, reason = %err, "Trigger discarded");
            }
        }
        result
    }

    /// Take the session lease under a token unique to this call, so two
    /// tasks of the same engine exclude each other too.
    async fn acquire_lease(&self, session_id: &str) -> EngineResult<String> {
        let engine = &self.config.engine;
        let lease = format!("{}:{}", self.owner, Uuid::new_v4());
        for attempt in 0..=engine.lease_retries {
            if self
                .sessions
                .try_acquire_lease(session_id, &lease, engine.lease_ttl())
                .await?
            {
                return Ok(lease);
            }

            if attempt == 0 && self.sessions.get_session(session_id).await?.is_none() {
                return Err(EngineError::SessionNotFound(session_id.to_string()));
            }
            if attempt < engine.lease_retries {
                tokio::time::sleep(engine.lease_retry_delay()).await;
            }
        }
        Err(EngineError::SessionBusy(session_id.to_string()))
    }

    /// Stop a session without undoing anything already sent.
    ///
    /// The session fails with `Cancelled` and its pending wake is removed.
    /// Terminal sessions are returned unchanged.
    pub async fn cancel_session(&self, session_id: &str, reason: &str) -> EngineResult<Session> {
        let lease = self.acquire_lease(session_id).await?;

        let mut session = match self.sessions.get_session(session_id).await {
            Ok(Some(session)) => session,
            Ok(None) => return Err(EngineError::SessionNotFound(session_id.to_string())),
            Err(err) => {
                self.sessions.release_lease(session_id, &lease).await.ok();
                return Err(err.into());
            }
        };

        if session.status.is_terminal() {
            self.sessions.release_lease(session_id, &lease).await?;
            return Ok(session);
        }

        self.timers.cancel_wakes(session_id).await?;
        session.status = SessionStatus::Failed;
        session.error = Some(ErrorInfo::new(codes::CANCELLED, reason));
        session.pending_timer_id = None;
        session.expected_input = None;
        session.completed_at = Some(chrono::Utc::now());

        if !self.sessions.save_session(&session).await? {
            self.sessions.release_lease(session_id, &lease).await.ok();
            return Err(EngineError::Conflict(session_id.to_string()));
        }
        session.revision += 1;

        info!(session_id, reason, "Session cancelled");
        Ok(session)
    }

    pub async fn get_session(&self, session_id: &str) -> EngineResult<Option<Session>> {
        Ok(self.sessions.get_session(session_id).await?)
    }

    pub async fn list_sessions(&self, filter: &SessionFilter) -> EngineResult<Vec<Session>> {
        Ok(self.sessions.list_sessions(filter).await?)
    }
}

fn new_session(
    contact_id: &str,
    channel: &str,
    flow: &Flow,
    variables: Variables,
) -> EngineResult<Session> {
    let entry = flow.entry_node().ok_or_else(|| EngineError::FlowNotFound {
        flow_id: flow.flow_id.clone(),
        reason: "flow has no start node".to_string(),
    })?;

    Ok(Session::new(
        Uuid::new_v4().to_string(),
        contact_id,
        channel,
        &flow.flow_id,
        flow.version,
        &entry.id,
        variables,
    ))
}
