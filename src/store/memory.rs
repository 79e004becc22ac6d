//! In-process store backed by `DashMap`
//!
//! Same contracts as the Postgres store, including lease expiry, revision
//! checks, and the one-active-session-per-contact rule. Guards on one map
//! are always dropped before another map is touched.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::time::Duration;
use uuid::Uuid;

use super::{FlowRecord, FlowStore, FlowVersion, SessionStore, StepResult, TimerStore, TimerWake};
use crate::flow::FlowGraph;
use crate::types::{FlowStatus, Session, SessionFilter};

#[derive(Debug, Clone)]
struct StoredSession {
    session: Session,
    lease_owner: Option<String>,
    lease_expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
struct StoredWake {
    wake: TimerWake,
    claimed_until: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    flows: DashMap<String, FlowRecord>,
    versions: DashMap<(String, i32), FlowVersion>,
    sessions: DashMap<String, StoredSession>,
    active: DashMap<(String, String), String>,
    steps: DashMap<(String, String), StepResult>,
    wakes: DashMap<String, StoredWake>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pending wakes, claimed or not (for inspection in tests)
    pub fn pending_wakes(&self) -> Vec<TimerWake> {
        let mut wakes: Vec<TimerWake> = self.wakes.iter().map(|w| w.wake.clone()).collect();
        wakes.sort_by_key(|w| w.wake_at);
        wakes
    }

    pub fn step_count(&self) -> usize {
        self.steps.len()
    }
}

fn lease_deadline(ttl: Duration) -> DateTime<Utc> {
    Utc::now() + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::seconds(60))
}

#[async_trait]
impl FlowStore for MemoryStore {
    async fn save_draft(&self, flow_id: &str, graph: &FlowGraph) -> Result<()> {
        let now = Utc::now();
        self.flows
            .entry(flow_id.to_string())
            .and_modify(|record| {
                record.name = graph.name.clone();
                record.draft = Some(graph.clone());
                record.updated_at = now;
            })
            .or_insert_with(|| FlowRecord {
                flow_id: flow_id.to_string(),
                name: graph.name.clone(),
                status: FlowStatus::Draft,
                latest_version: None,
                draft: Some(graph.clone()),
                updated_at: now,
            });
        Ok(())
    }

    async fn get_draft(&self, flow_id: &str) -> Result<Option<FlowGraph>> {
        Ok(self.flows.get(flow_id).and_then(|r| r.draft.clone()))
    }

    async fn insert_version(&self, flow_id: &str, graph: &FlowGraph) -> Result<i32> {
        let now = Utc::now();
        let mut record = self
            .flows
            .entry(flow_id.to_string())
            .or_insert_with(|| FlowRecord {
                flow_id: flow_id.to_string(),
                name: graph.name.clone(),
                status: FlowStatus::Draft,
                latest_version: None,
                draft: None,
                updated_at: now,
            });

        let version = record.latest_version.unwrap_or(0) + 1;
        record.latest_version = Some(version);
        record.status = FlowStatus::Published;
        record.name = graph.name.clone();
        record.draft = None;
        record.updated_at = now;
        drop(record);

        self.versions.insert(
            (flow_id.to_string(), version),
            FlowVersion {
                flow_id: flow_id.to_string(),
                version,
                graph: graph.clone(),
                published_at: now,
            },
        );
        Ok(version)
    }

    async fn get_record(&self, flow_id: &str) -> Result<Option<FlowRecord>> {
        Ok(self.flows.get(flow_id).map(|r| r.clone()))
    }

    async fn get_version(&self, flow_id: &str, version: i32) -> Result<Option<FlowVersion>> {
        Ok(self
            .versions
            .get(&(flow_id.to_string(), version))
            .map(|v| v.clone()))
    }

    async fn set_status(&self, flow_id: &str, status: FlowStatus) -> Result<bool> {
        match self.flows.get_mut(flow_id) {
            Some(mut record) => {
                record.status = status;
                record.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list_flows(&self) -> Result<Vec<FlowRecord>> {
        let mut flows: Vec<FlowRecord> = self.flows.iter().map(|r| r.clone()).collect();
        flows.sort_by(|a, b| a.flow_id.cmp(&b.flow_id));
        Ok(flows)
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn insert_session(&self, session: &Session) -> Result<bool> {
        let key = (session.contact_id.clone(), session.channel.clone());
        match self.active.entry(key) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(session.id.clone());
                self.sessions.insert(
                    session.id.clone(),
                    StoredSession {
                        session: session.clone(),
                        lease_owner: None,
                        lease_expires_at: None,
                    },
                );
                Ok(true)
            }
        }
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<Session>> {
        Ok(self.sessions.get(session_id).map(|s| s.session.clone()))
    }

    async fn find_active(&self, contact_id: &str, channel: &str) -> Result<Option<Session>> {
        let id = self
            .active
            .get(&(contact_id.to_string(), channel.to_string()))
            .map(|id| id.clone());
        match id {
            Some(id) => self.get_session(&id).await,
            None => Ok(None),
        }
    }

    async fn try_acquire_lease(
        &self,
        session_id: &str,
        owner: &str,
        ttl: Duration,
    ) -> Result<bool> {
        let Some(mut stored) = self.sessions.get_mut(session_id) else {
            return Ok(false);
        };
        let now = Utc::now();
        let free = match (&stored.lease_owner, stored.lease_expires_at) {
            (None, _) => true,
            (Some(_), Some(expires)) => expires < now,
            (Some(_), None) => false,
        };
        if free {
            stored.lease_owner = Some(owner.to_string());
            stored.lease_expires_at = Some(lease_deadline(ttl));
        }
        Ok(free)
    }

    async fn release_lease(&self, session_id: &str, owner: &str) -> Result<()> {
        if let Some(mut stored) = self.sessions.get_mut(session_id) {
            if stored.lease_owner.as_deref() == Some(owner) {
                stored.lease_owner = None;
                stored.lease_expires_at = None;
            }
        }
        Ok(())
    }

    async fn save_session(&self, session: &Session) -> Result<bool> {
        {
            let Some(mut stored) = self.sessions.get_mut(&session.id) else {
                return Ok(false);
            };
            if stored.session.revision != session.revision {
                return Ok(false);
            }
            let mut next = session.clone();
            next.revision += 1;
            next.updated_at = Utc::now();
            stored.session = next;
            stored.lease_owner = None;
            stored.lease_expires_at = None;
        }

        if session.status.is_terminal() {
            let key = (session.contact_id.clone(), session.channel.clone());
            self.active.remove_if(&key, |_, id| id == &session.id);
        }
        Ok(true)
    }

    async fn list_sessions(&self, filter: &SessionFilter) -> Result<Vec<Session>> {
        let mut sessions: Vec<Session> = self
            .sessions
            .iter()
            .map(|s| s.session.clone())
            .filter(|s| {
                filter.contact_id.as_ref().map_or(true, |c| &s.contact_id == c)
                    && filter.channel.as_ref().map_or(true, |c| &s.channel == c)
                    && filter.flow_id.as_ref().map_or(true, |f| &s.flow_id == f)
                    && filter.status.map_or(true, |st| s.status == st)
            })
            .collect();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = filter.limit {
            sessions.truncate(limit.max(0) as usize);
        }
        Ok(sessions)
    }

    async fn get_step_result(
        &self,
        session_id: &str,
        step_token: &str,
    ) -> Result<Option<StepResult>> {
        Ok(self
            .steps
            .get(&(session_id.to_string(), step_token.to_string()))
            .map(|r| r.clone()))
    }

    async fn record_step_result(
        &self,
        session_id: &str,
        step_token: &str,
        _node_id: &str,
        result: &StepResult,
    ) -> Result<()> {
        self.steps
            .entry((session_id.to_string(), step_token.to_string()))
            .or_insert_with(|| result.clone());
        Ok(())
    }
}

#[async_trait]
impl TimerStore for MemoryStore {
    async fn schedule_wake(&self, session_id: &str, wake_at: DateTime<Utc>) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        self.wakes.insert(
            id.clone(),
            StoredWake {
                wake: TimerWake {
                    id: id.clone(),
                    session_id: session_id.to_string(),
                    wake_at,
                },
                claimed_until: None,
            },
        );
        Ok(id)
    }

    async fn cancel_wakes(&self, session_id: &str) -> Result<u64> {
        let before = self.wakes.len();
        self.wakes.retain(|_, w| w.wake.session_id != session_id);
        Ok((before - self.wakes.len()) as u64)
    }

    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: i64,
        ttl: Duration,
    ) -> Result<Vec<TimerWake>> {
        let mut due: Vec<TimerWake> = self
            .wakes
            .iter()
            .filter(|w| w.wake.wake_at <= now && w.claimed_until.map_or(true, |c| c < now))
            .map(|w| w.wake.clone())
            .collect();
        due.sort_by_key(|w| w.wake_at);
        due.truncate(limit.max(0) as usize);

        let until = now + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::seconds(60));
        let mut claimed = Vec::with_capacity(due.len());
        for wake in due {
            if let Some(mut stored) = self.wakes.get_mut(&wake.id) {
                if stored.claimed_until.map_or(true, |c| c < now) {
                    stored.claimed_until = Some(until);
                    claimed.push(wake);
                }
            }
        }
        Ok(claimed)
    }

    async fn complete_wake(&self, timer_id: &str) -> Result<()> {
        self.wakes.remove(timer_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{SessionStatus, Variables};

    fn session(id: &str, contact: &str) -> Session {
        Session::new(
            id.to_string(),
            contact,
            "whatsapp",
            "welcome",
            1,
            "start",
            Variables::new(),
        )
    }

    #[tokio::test]
    async fn test_one_active_session_per_contact_channel() {
        let store = MemoryStore::new();
        assert!(store.insert_session(&session("s1", "c1")).await.unwrap());
        assert!(!store.insert_session(&session("s2", "c1")).await.unwrap());
        assert!(store.insert_session(&session("s3", "c2")).await.unwrap());

        let mut done = store.get_session("s1").await.unwrap().unwrap();
        done.status = SessionStatus::Completed;
        assert!(store.save_session(&done).await.unwrap());

        assert!(store.find_active("c1", "whatsapp").await.unwrap().is_none());
        assert!(store.insert_session(&session("s4", "c1")).await.unwrap());
    }

    #[tokio::test]
    async fn test_revision_conflict() {
        let store = MemoryStore::new();
        store.insert_session(&session("s1", "c1")).await.unwrap();

        let a = store.get_session("s1").await.unwrap().unwrap();
        let b = a.clone();

        assert!(store.save_session(&a).await.unwrap());
        assert!(!store.save_session(&b).await.unwrap());
        assert_eq!(store.get_session("s1").await.unwrap().unwrap().revision, 1);
    }

    #[tokio::test]
    async fn test_lease_is_exclusive_until_released() {
        let store = MemoryStore::new();
        store.insert_session(&session("s1", "c1")).await.unwrap();
        let ttl = Duration::from_secs(60);

        assert!(store.try_acquire_lease("s1", "w1", ttl).await.unwrap());
        assert!(!store.try_acquire_lease("s1", "w2", ttl).await.unwrap());
        // Held leases are not re-entrant, even for the same token
        assert!(!store.try_acquire_lease("s1", "w1", ttl).await.unwrap());

        store.release_lease("s1", "w1").await.unwrap();
        assert!(store.try_acquire_lease("s1", "w2", ttl).await.unwrap());
        assert!(!store.try_acquire_lease("missing", "w1", ttl).await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_lease_can_be_taken() {
        let store = MemoryStore::new();
        store.insert_session(&session("s1", "c1")).await.unwrap();

        assert!(store
            .try_acquire_lease("s1", "w1", Duration::from_millis(0))
            .await
            .unwrap());
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(store
            .try_acquire_lease("s1", "w2", Duration::from_secs(60))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_step_results_first_write_wins() {
        let store = MemoryStore::new();
        let first = StepResult::Success(serde_json::json!({"n": 1}));
        let second = StepResult::Success(serde_json::json!({"n": 2}));

        store.record_step_result("s1", "tok", "hook", &first).await.unwrap();
        store.record_step_result("s1", "tok", "hook", &second).await.unwrap();

        assert_eq!(store.get_step_result("s1", "tok").await.unwrap(), Some(first));
        assert_eq!(store.get_step_result("s2", "tok").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_claim_due_hides_claimed_wakes() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let due = store.schedule_wake("s1", now - chrono::Duration::seconds(1)).await.unwrap();
        store.schedule_wake("s2", now + chrono::Duration::hours(1)).await.unwrap();

        let ttl = Duration::from_secs(60);
        let claimed = store.claim_due(now, 10, ttl).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].id, due);

        assert!(store.claim_due(now, 10, ttl).await.unwrap().is_empty());

        store.complete_wake(&due).await.unwrap();
        assert_eq!(store.pending_wakes().len(), 1);
        assert_eq!(store.cancel_wakes("s2").await.unwrap(), 1);
        assert!(store.pending_wakes().is_empty());
    }

    #[tokio::test]
    async fn test_versions_increment_and_clear_draft() {
        let store = MemoryStore::new();
        let graph = FlowGraph {
            name: "welcome".to_string(),
            ..Default::default()
        };

        store.save_draft("welcome", &graph).await.unwrap();
        let record = store.get_record("welcome").await.unwrap().unwrap();
        assert_eq!(record.status, FlowStatus::Draft);
        assert!(record.draft.is_some());

        assert_eq!(store.insert_version("welcome", &graph).await.unwrap(), 1);
        assert_eq!(store.insert_version("welcome", &graph).await.unwrap(), 2);

        let record = store.get_record("welcome").await.unwrap().unwrap();
        assert_eq!(record.status, FlowStatus::Published);
        assert_eq!(record.latest_version, Some(2));
        assert!(record.draft.is_none());
        assert!(store.get_version("welcome", 1).await.unwrap().is_some());
    }
}
