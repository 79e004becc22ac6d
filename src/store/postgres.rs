//! Postgres-backed store
//!
//! Raw `sqlx` queries against the schema in `migrations/`. Structured session
//! fields live in JSONB columns; leases and revisions are plain columns so
//! the guards run inside a single `UPDATE`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;
use std::time::Duration;
use uuid::Uuid;

use super::{FlowRecord, FlowStore, FlowVersion, SessionStore, StepResult, TimerStore, TimerWake};
use crate::flow::FlowGraph;
use crate::types::{FlowStatus, Session, SessionFilter, SessionStatus};

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn from_json<T: DeserializeOwned>(row: &PgRow, column: &str) -> Result<T> {
    let value: JsonValue = row.get(column);
    serde_json::from_value(value).with_context(|| format!("Invalid JSON in column {}", column))
}

fn from_optional_json<T: DeserializeOwned>(row: &PgRow, column: &str) -> Result<Option<T>> {
    let value: Option<JsonValue> = row.get(column);
    value
        .map(serde_json::from_value)
        .transpose()
        .with_context(|| format!("Invalid JSON in column {}", column))
}

fn session_from_row(row: &PgRow) -> Result<Session> {
    Ok(Session {
        id: row.get("id"),
        contact_id: row.get("contact_id"),
        channel: row.get("channel"),
        flow_id: row.get("flow_id"),
        flow_version: row.get("flow_version"),
        current_node_id: row.get("current_node_id"),
        status: row.get("status"),
        variables: from_json(row, "variables")?,
        call_stack: from_json(row, "call_stack")?,
        expected_input: from_optional_json(row, "expected_input")?,
        pending_timer_id: row.get("pending_timer_id"),
        ab_assignments: from_json(row, "ab_assignments")?,
        node_visits: from_json(row, "node_visits")?,
        last_step_token: row.get("last_step_token"),
        recent_trigger_tokens: from_json(row, "recent_trigger_tokens")?,
        error: from_optional_json(row, "error")?,
        revision: row.get("revision"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        completed_at: row.get("completed_at"),
    })
}

fn flow_from_row(row: &PgRow) -> Result<FlowRecord> {
    Ok(FlowRecord {
        flow_id: row.get("flow_id"),
        name: row.get("name"),
        status: row.get("status"),
        latest_version: row.get("latest_version"),
        draft: from_optional_json(row, "draft")?,
        updated_at: row.get("updated_at"),
    })
}

fn json<T: serde::Serialize>(value: &T) -> Result<JsonValue> {
    serde_json::to_value(value).context("Failed to serialize column value")
}

#[async_trait]
impl FlowStore for PgStore {
    async fn save_draft(&self, flow_id: &str, graph: &FlowGraph) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO flows (flow_id, name, status, draft)
            VALUES ($1, $2, 'draft', $3)
            ON CONFLICT (flow_id) DO UPDATE
            SET name = EXCLUDED.name,
                draft = EXCLUDED.draft,
                updated_at = NOW()
            "#,
        )
        .bind(flow_id)
        .bind(&graph.name)
        .bind(json(graph)?)
        .execute(&self.pool)
        .await
        .context("Failed to save draft")?;

        Ok(())
    }

    async fn get_draft(&self, flow_id: &str) -> Result<Option<FlowGraph>> {
        let row = sqlx::query("SELECT draft FROM flows WHERE flow_id = $1")
            .bind(flow_id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to get draft")?;

        match row {
            Some(row) => from_optional_json(&row, "draft"),
            None => Ok(None),
        }
    }

    async fn insert_version(&self, flow_id: &str, graph: &FlowGraph) -> Result<i32> {
        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        // The upsert row-locks the flow, serializing concurrent publishes
        let version: i32 = sqlx::query_scalar(
            r#"
            INSERT INTO flows (flow_id, name, status, latest_version, draft)
            VALUES ($1, $2, 'published', 1, NULL)
            ON CONFLICT (flow_id) DO UPDATE
            SET latest_version = COALESCE(flows.latest_version, 0) + 1,
                status = 'published',
                name = EXCLUDED.name,
                draft = NULL,
                updated_at = NOW()
            RETURNING latest_version
            "#,
        )
        .bind(flow_id)
        .bind(&graph.name)
        .fetch_one(&mut *tx)
        .await
        .context("Failed to bump flow version")?;

        sqlx::query("INSERT INTO flow_versions (flow_id, version, graph) VALUES ($1, $2, $3)")
            .bind(flow_id)
            .bind(version)
            .bind(json(graph)?)
            .execute(&mut *tx)
            .await
            .context("Failed to insert flow version")?;

        tx.commit().await.context("Failed to commit publish")?;
        Ok(version)
    }

    async fn get_record(&self, flow_id: &str) -> Result<Option<FlowRecord>> {
        let row = sqlx::query("SELECT * FROM flows WHERE flow_id = $1")
            .bind(flow_id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to get flow")?;

        row.as_ref().map(flow_from_row).transpose()
    }

    async fn get_version(&self, flow_id: &str, version: i32) -> Result<Option<FlowVersion>> {
        let row = sqlx::query("SELECT * FROM flow_versions WHERE flow_id = $1 AND version = $2")
            .bind(flow_id)
            .bind(version)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to get flow version")?;

        row.map(|row| {
            Ok(FlowVersion {
                flow_id: row.get("flow_id"),
                version: row.get("version"),
                graph: from_json(&row, "graph")?,
                published_at: row.get("published_at"),
            })
        })
        .transpose()
    }

    async fn set_status(&self, flow_id: &str, status: FlowStatus) -> Result<bool> {
        let result =
            sqlx::query("UPDATE flows SET status = $2, updated_at = NOW() WHERE flow_id = $1")
                .bind(flow_id)
                .bind(status)
                .execute(&self.pool)
                .await
                .context("Failed to set flow status")?;

        Ok(result.rows_affected() == 1)
    }

    async fn list_flows(&self) -> Result<Vec<FlowRecord>> {
        let rows = sqlx::query("SELECT * FROM flows ORDER BY flow_id")
            .fetch_all(&self.pool)
            .await
            .context("Failed to list flows")?;

        rows.iter().map(flow_from_row).collect()
    }
}

#[async_trait]
impl SessionStore for PgStore {
    async fn insert_session(&self, session: &Session) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO sessions (
                id, contact_id, channel, flow_id, flow_version, current_node_id, status,
                variables, call_stack, expected_input, pending_timer_id, ab_assignments,
                node_visits, last_step_token, recent_trigger_tokens, error, revision,
                created_at, updated_at, completed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(&session.id)
        .bind(&session.contact_id)
        .bind(&session.channel)
        .bind(&session.flow_id)
        .bind(session.flow_version)
        .bind(&session.current_node_id)
        .bind(session.status)
        .bind(json(&session.variables)?)
        .bind(json(&session.call_stack)?)
        .bind(session.expected_input.as_ref().map(json).transpose()?)
        .bind(&session.pending_timer_id)
        .bind(json(&session.ab_assignments)?)
        .bind(json(&session.node_visits)?)
        .bind(&session.last_step_token)
        .bind(json(&session.recent_trigger_tokens)?)
        .bind(session.error.as_ref().map(json).transpose()?)
        .bind(session.revision)
        .bind(session.created_at)
        .bind(session.updated_at)
        .bind(session.completed_at)
        .execute(&self.pool)
        .await
        .context("Failed to insert session")?;

        Ok(result.rows_affected() == 1)
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<Session>> {
        let row = sqlx::query("SELECT * FROM sessions WHERE id = $1")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to get session")?;

        row.as_ref().map(session_from_row).transpose()
    }

    async fn find_active(&self, contact_id: &str, channel: &str) -> Result<Option<Session>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM sessions
            WHERE contact_id = $1
              AND channel = $2
              AND status NOT IN ('completed', 'failed')
            "#,
        )
        .bind(contact_id)
        .bind(channel)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to find active session")?;

        row.as_ref().map(session_from_row).transpose()
    }

    async fn try_acquire_lease(
        &self,
        session_id: &str,
        owner: &str,
        ttl: Duration,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE sessions
            SET lease_owner = $2,
                lease_expires_at = NOW() + make_interval(secs => $3)
            WHERE id = $1
              AND (lease_owner IS NULL OR lease_expires_at < NOW())
            "#,
        )
        .bind(session_id)
        .bind(owner)
        .bind(ttl.as_secs_f64())
        .execute(&self.pool)
        .await
        .context("Failed to acquire session lease")?;

        Ok(result.rows_affected() == 1)
    }

    async fn release_lease(&self, session_id: &str, owner: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE sessions
            SET lease_owner = NULL, lease_expires_at = NULL
            WHERE id = $1 AND lease_owner = $2
            "#,
        )
        .bind(session_id)
        .bind(owner)
        .execute(&self.pool)
        .await
        .context("Failed to release session lease")?;

        Ok(())
    }

    async fn save_session(&self, session: &Session) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE sessions
            SET flow_id = $3,
                flow_version = $4,
                current_node_id = $5,
                status = $6,
                variables = $7,
                call_stack = $8,
                expected_input = $9,
                pending_timer_id = $10,
                ab_assignments = $11,
                node_visits = $12,
                last_step_token = $13,
                recent_trigger_tokens = $14,
                error = $15,
                completed_at = $16,
                revision = revision + 1,
                updated_at = NOW(),
                lease_owner = NULL,
                lease_expires_at = NULL
            WHERE id = $1 AND revision = $2
            "#,
        )
        .bind(&session.id)
        .bind(session.revision)
        .bind(&session.flow_id)
        .bind(session.flow_version)
        .bind(&session.current_node_id)
        .bind(session.status)
        .bind(json(&session.variables)?)
        .bind(json(&session.call_stack)?)
        .bind(session.expected_input.as_ref().map(json).transpose()?)
        .bind(&session.pending_timer_id)
        .bind(json(&session.ab_assignments)?)
        .bind(json(&session.node_visits)?)
        .bind(&session.last_step_token)
        .bind(json(&session.recent_trigger_tokens)?)
        .bind(session.error.as_ref().map(json).transpose()?)
        .bind(session.completed_at)
        .execute(&self.pool)
        .await
        .context("Failed to save session")?;

        Ok(result.rows_affected() == 1)
    }

    async fn list_sessions(&self, filter: &SessionFilter) -> Result<Vec<Session>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM sessions
            WHERE ($1::text IS NULL OR contact_id = $1)
              AND ($2::text IS NULL OR channel = $2)
              AND ($3::text IS NULL OR flow_id = $3)
              AND ($4::text IS NULL OR status = $4)
            ORDER BY created_at DESC
            LIMIT $5
            "#,
        )
        .bind(&filter.contact_id)
        .bind(&filter.channel)
        .bind(&filter.flow_id)
        .bind(filter.status.map(|s: SessionStatus| s.as_str()))
        .bind(filter.limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list sessions")?;

        rows.iter().map(session_from_row).collect()
    }

    async fn get_step_result(
        &self,
        session_id: &str,
        step_token: &str,
    ) -> Result<Option<StepResult>> {
        let row = sqlx::query(
            "SELECT result FROM step_results WHERE session_id = $1 AND step_token = $2",
        )
        .bind(session_id)
        .bind(step_token)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to get step result")?;

        row.as_ref().map(|r| from_json(r, "result")).transpose()
    }

    async fn record_step_result(
        &self,
        session_id: &str,
        step_token: &str,
        node_id: &str,
        result: &StepResult,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO step_results (session_id, step_token, node_id, result)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (session_id, step_token) DO NOTHING
            "#,
        )
        .bind(session_id)
        .bind(step_token)
        .bind(node_id)
        .bind(json(result)?)
        .execute(&self.pool)
        .await
        .context("Failed to record step result")?;

        Ok(())
    }
}

#[async_trait]
impl TimerStore for PgStore {
    async fn schedule_wake(&self, session_id: &str, wake_at: DateTime<Utc>) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        sqlx::query("INSERT INTO timer_wakes (id, session_id, wake_at) VALUES ($1, $2, $3)")
            .bind(&id)
            .bind(session_id)
            .bind(wake_at)
            .execute(&self.pool)
            .await
            .context("Failed to schedule wake")?;

        Ok(id)
    }

    async fn cancel_wakes(&self, session_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM timer_wakes WHERE session_id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .context("Failed to cancel wakes")?;

        Ok(result.rows_affected())
    }

    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: i64,
        ttl: Duration,
    ) -> Result<Vec<TimerWake>> {
        let rows = sqlx::query(
            r#"
            UPDATE timer_wakes
            SET claimed_until = $1 + make_interval(secs => $3)
            WHERE id IN (
                SELECT id FROM timer_wakes
                WHERE wake_at <= $1
                  AND (claimed_until IS NULL OR claimed_until < $1)
                ORDER BY wake_at ASC
                FOR UPDATE SKIP LOCKED
                LIMIT $2
            )
            RETURNING id, session_id, wake_at
            "#,
        )
        .bind(now)
        .bind(limit)
        .bind(ttl.as_secs_f64())
        .fetch_all(&self.pool)
        .await
        .context("Failed to claim due wakes")?;

        Ok(rows
            .into_iter()
            .map(|row| TimerWake {
                id: row.get("id"),
                session_id: row.get("session_id"),
                wake_at: row.get("wake_at"),
            })
            .collect())
    }

    async fn complete_wake(&self, timer_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM timer_wakes WHERE id = $1")
            .bind(timer_id)
            .execute(&self.pool)
            .await
            .context("Failed to complete wake")?;

        Ok(())
    }
}
