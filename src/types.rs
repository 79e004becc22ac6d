use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Session variable scope. Keys are variable names, values are whatever the
/// flow stored (inputs are strings or numbers, integrations may store objects).
pub type Variables = HashMap<String, JsonValue>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, Hash)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Running,
    WaitingInput,
    WaitingTimer,
    Completed,
    Failed,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Running => "running",
            SessionStatus::WaitingInput => "waiting_input",
            SessionStatus::WaitingTimer => "waiting_timer",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "running" => Ok(SessionStatus::Running),
            "waiting_input" => Ok(SessionStatus::WaitingInput),
            "waiting_timer" => Ok(SessionStatus::WaitingTimer),
            "completed" => Ok(SessionStatus::Completed),
            "failed" => Ok(SessionStatus::Failed),
            other => Err(anyhow::anyhow!(
                "Invalid session status: {}. Must be one of: running, waiting_input, waiting_timer, completed, failed",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum FlowStatus {
    Draft,
    Published,
    Paused,
    Deleted,
}

impl fmt::Display for FlowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FlowStatus::Draft => "draft",
            FlowStatus::Published => "published",
            FlowStatus::Paused => "paused",
            FlowStatus::Deleted => "deleted",
        };
        f.write_str(s)
    }
}

/// Error value recorded on a failed session or a failed external call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// What kind of reply an input-like node is waiting for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputKind {
    Text,
    Number,
    Email,
    Phone,
    Date,
    Choice,
    Rating,
    FileUpload,
}

/// One sub-flow call frame. The caller resumes at `node_id`'s outgoing edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallFrame {
    pub flow_id: String,
    pub version: i32,
    pub node_id: String,
    pub return_variable: String,
    pub result_from: String,
}

/// Durable execution state of one contact's traversal of one flow version
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub contact_id: String,
    pub channel: String,

    pub flow_id: String,
    pub flow_version: i32,
    pub current_node_id: String,
    pub status: SessionStatus,

    pub variables: Variables,
    pub call_stack: Vec<CallFrame>,
    pub expected_input: Option<InputKind>,
    pub pending_timer_id: Option<String>,

    /// Sticky A/B branch per `flow_id:node_id`
    pub ab_assignments: HashMap<String, String>,
    /// Completed side-effecting executions per `flow_id:node_id`
    pub node_visits: HashMap<String, u32>,

    pub last_step_token: Option<String>,
    pub recent_trigger_tokens: Vec<String>,

    pub error: Option<ErrorInfo>,

    /// Optimistic concurrency revision of the persisted row
    pub revision: i64,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(
        id: String,
        contact_id: &str,
        channel: &str,
        flow_id: &str,
        flow_version: i32,
        entry_node_id: &str,
        variables: Variables,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            contact_id: contact_id.to_string(),
            channel: channel.to_string(),
            flow_id: flow_id.to_string(),
            flow_version,
            current_node_id: entry_node_id.to_string(),
            status: SessionStatus::Running,
            variables,
            call_stack: Vec::new(),
            expected_input: None,
            pending_timer_id: None,
            ab_assignments: HashMap::new(),
            node_visits: HashMap::new(),
            last_step_token: None,
            recent_trigger_tokens: Vec::new(),
            error: None,
            revision: 0,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Key used for per-node bookkeeping; node ids are only unique within a flow
    pub fn node_key(&self, node_id: &str) -> String {
        format!("{}:{}", self.flow_id, node_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Message,
    Selection,
    Callback,
}

/// Inbound event forwarded by the channel gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundEvent {
    pub contact_id: String,
    pub channel: String,
    pub event_type: EventType,
    #[serde(default)]
    pub payload: JsonValue,
    /// Gateway message id, used to drop redelivered events.
    ///
    /// Without one the engine cannot tell a redelivery from a contact
    /// sending the same text twice, so the event is always applied. Side
    /// effects stay at most once per node visit through step tokens, but the
    /// reply itself may be consumed by the next input node.
    #[serde(default)]
    pub event_id: Option<String>,
    /// Contact attributes seeded into a newly created session
    #[serde(default)]
    pub variables: Variables,
}

impl InboundEvent {
    pub fn message(contact_id: &str, channel: &str, text: &str) -> Self {
        Self {
            contact_id: contact_id.to_string(),
            channel: channel.to_string(),
            event_type: EventType::Message,
            payload: JsonValue::String(text.to_string()),
            event_id: None,
            variables: Variables::new(),
        }
    }

    pub fn with_event_id(mut self, event_id: impl Into<String>) -> Self {
        self.event_id = Some(event_id.into());
        self
    }

    pub fn with_variables(mut self, variables: Variables) -> Self {
        self.variables = variables;
        self
    }

    pub fn trigger(&self) -> Trigger {
        Trigger::Inbound {
            event_type: self.event_type,
            payload: self.payload.clone(),
            event_id: self.event_id.clone(),
        }
    }
}

/// Something that makes a session take a step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Trigger {
    Inbound {
        event_type: EventType,
        #[serde(default)]
        payload: JsonValue,
        #[serde(default)]
        event_id: Option<String>,
    },
    Timer {
        timer_id: String,
    },
}

impl Trigger {
    pub fn timer(timer_id: impl Into<String>) -> Self {
        Trigger::Timer {
            timer_id: timer_id.into(),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Trigger::Inbound {
                event_type: EventType::Message,
                ..
            } => "message",
            Trigger::Inbound {
                event_type: EventType::Selection,
                ..
            } => "selection",
            Trigger::Inbound {
                event_type: EventType::Callback,
                ..
            } => "callback",
            Trigger::Timer { .. } => "timer",
        }
    }

    pub fn event_id(&self) -> Option<&str> {
        match self {
            Trigger::Inbound { event_id, .. } => event_id.as_deref(),
            Trigger::Timer { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Text,
    Image,
    Video,
    Audio,
    File,
    Buttons,
    List,
    Transfer,
    EndChat,
}

/// Outbound action handed to the channel gateway, in emission order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundAction {
    #[serde(rename = "type")]
    pub kind: ActionType,
    pub content: String,
    #[serde(default)]
    pub channel_specific_config: JsonValue,
}

impl OutboundAction {
    pub fn new(kind: ActionType, content: impl Into<String>) -> Self {
        Self {
            kind,
            content: content.into(),
            channel_specific_config: JsonValue::Null,
        }
    }

    pub fn text(content: impl Into<String>) -> Self {
        Self::new(ActionType::Text, content)
    }

    pub fn with_config(mut self, config: JsonValue) -> Self {
        self.channel_specific_config = config;
        self
    }
}

/// Result of one `step` call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepOutcome {
    pub session_id: String,
    pub status: SessionStatus,
    pub actions: Vec<OutboundAction>,
    pub error: Option<ErrorInfo>,
}

/// Badge information shown to flow authors
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowStatusInfo {
    pub flow_id: String,
    pub name: String,
    pub status: FlowStatus,
    pub version: Option<i32>,
    pub has_draft: bool,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionFilter {
    pub contact_id: Option<String>,
    pub channel: Option<String>,
    pub flow_id: Option<String>,
    pub status: Option<SessionStatus>,
    pub limit: Option<i64>,
}
