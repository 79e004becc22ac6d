//! Node types
//!
//! Each node `type` carries its own payload struct. The JSON shape is the
//! node object itself: `{"id": "n1", "type": "bubble_text", "text": "Olá"}`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::evaluate::Operator;
use crate::types::InputKind;

/// Edge label followed when no rule/choice matched
pub const DEFAULT_BRANCH: &str = "default";
/// Edge label followed when an integration call failed permanently
pub const ON_ERROR_BRANCH: &str = "on_error";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    #[serde(flatten)]
    pub kind: NodeKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeCategory {
    Start,
    Bubble,
    Input,
    Logic,
    Integration,
    Channel,
    Terminal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeKind {
    Start,

    BubbleText(TextBubble),
    BubbleImage(MediaBubble),
    BubbleVideo(MediaBubble),
    BubbleAudio(MediaBubble),
    BubbleEmbed(EmbedBubble),
    BubbleFile(MediaBubble),

    InputText(InputConfig),
    InputNumber(NumberInput),
    InputEmail(InputConfig),
    InputPhone(InputConfig),
    InputDate(InputConfig),
    InputButtons(ChoiceInput),
    InputRating(RatingInput),
    InputFileUpload(InputConfig),

    SetVariable(SetVariable),
    Condition(ConditionConfig),
    Redirect(RedirectConfig),
    Code(CodeConfig),
    Wait(WaitConfig),
    Jump(JumpConfig),
    AbTest(AbTestConfig),
    Subflow(SubflowConfig),

    Webhook(WebhookConfig),
    Sheets(SheetsConfig),
    Email(EmailConfig),
    #[serde(rename = "openai")]
    OpenAi(OpenAiConfig),

    WhatsappButtons(WhatsappButtons),
    WhatsappList(WhatsappList),
    Transfer(TransferConfig),
    EndChat(EndChatConfig),
}

/// Branch labels a multi-output node emits
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchSpec {
    pub labels: Vec<String>,
    pub requires_default: bool,
}

impl NodeKind {
    pub fn category(&self) -> NodeCategory {
        use NodeKind::*;
        match self {
            Start => NodeCategory::Start,
            BubbleText(_) | BubbleImage(_) | BubbleVideo(_) | BubbleAudio(_) | BubbleEmbed(_)
            | BubbleFile(_) => NodeCategory::Bubble,
            InputText(_) | InputNumber(_) | InputEmail(_) | InputPhone(_) | InputDate(_)
            | InputButtons(_) | InputRating(_) | InputFileUpload(_) => NodeCategory::Input,
            SetVariable(_) | Condition(_) | Redirect(_) | Code(_) | Wait(_) | Jump(_)
            | AbTest(_) | Subflow(_) => NodeCategory::Logic,
            Webhook(_) | Sheets(_) | Email(_) | OpenAi(_) => NodeCategory::Integration,
            WhatsappButtons(_) | WhatsappList(_) => NodeCategory::Channel,
            Transfer(_) | EndChat(_) => NodeCategory::Terminal,
        }
    }

    pub fn type_name(&self) -> &'static str {
        use NodeKind::*;
        match self {
            Start => "start",
            BubbleText(_) => "bubble_text",
            BubbleImage(_) => "bubble_image",
            BubbleVideo(_) => "bubble_video",
            BubbleAudio(_) => "bubble_audio",
            BubbleEmbed(_) => "bubble_embed",
            BubbleFile(_) => "bubble_file",
            InputText(_) => "input_text",
            InputNumber(_) => "input_number",
            InputEmail(_) => "input_email",
            InputPhone(_) => "input_phone",
            InputDate(_) => "input_date",
            InputButtons(_) => "input_buttons",
            InputRating(_) => "input_rating",
            InputFileUpload(_) => "input_file_upload",
            SetVariable(_) => "set_variable",
            Condition(_) => "condition",
            Redirect(_) => "redirect",
            Code(_) => "code",
            Wait(_) => "wait",
            Jump(_) => "jump",
            AbTest(_) => "ab_test",
            Subflow(_) => "subflow",
            Webhook(_) => "webhook",
            Sheets(_) => "sheets",
            Email(_) => "email",
            OpenAi(_) => "openai",
            WhatsappButtons(_) => "whatsapp_buttons",
            WhatsappList(_) => "whatsapp_list",
            Transfer(_) => "transfer",
            EndChat(_) => "end_chat",
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.category() == NodeCategory::Terminal
    }

    /// Labeled outputs for multi-output nodes, `None` for single-output nodes
    pub fn branches(&self) -> Option<BranchSpec> {
        match self {
            NodeKind::Condition(c) => Some(BranchSpec {
                labels: c.rules.iter().map(|r| r.label.clone()).collect(),
                requires_default: true,
            }),
            NodeKind::InputButtons(c) => Some(BranchSpec {
                labels: c.choices.iter().map(|c| c.id.clone()).collect(),
                requires_default: true,
            }),
            NodeKind::WhatsappButtons(c) => Some(BranchSpec {
                labels: c.buttons.iter().map(|c| c.id.clone()).collect(),
                requires_default: true,
            }),
            NodeKind::WhatsappList(c) => Some(BranchSpec {
                labels: c.rows().map(|r| r.id.clone()).collect(),
                requires_default: true,
            }),
            NodeKind::AbTest(c) => Some(BranchSpec {
                labels: c.branches.iter().map(|b| b.label.clone()).collect(),
                requires_default: false,
            }),
            _ => None,
        }
    }

    /// The reply type an input-like node waits for
    pub fn expected_input(&self) -> Option<InputKind> {
        use NodeKind::*;
        match self {
            InputText(_) => Some(InputKind::Text),
            InputNumber(_) => Some(InputKind::Number),
            InputEmail(_) => Some(InputKind::Email),
            InputPhone(_) => Some(InputKind::Phone),
            InputDate(_) => Some(InputKind::Date),
            InputButtons(_) | WhatsappButtons(_) | WhatsappList(_) => Some(InputKind::Choice),
            InputRating(_) => Some(InputKind::Rating),
            InputFileUpload(_) => Some(InputKind::FileUpload),
            _ => None,
        }
    }
}

/* ===================== Bubbles ===================== */

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextBubble {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaBubble {
    pub url: String,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub file_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbedBubble {
    pub url: String,
    #[serde(default)]
    pub height: Option<u32>,
}

/* ===================== Inputs ===================== */

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputConfig {
    /// Empty prompts send nothing; the node just waits for the reply
    #[serde(default)]
    pub prompt: String,
    /// Variable the accepted reply is saved into
    pub variable: String,
    #[serde(default)]
    pub retry_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumberInput {
    #[serde(flatten)]
    pub input: InputConfig,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatingInput {
    #[serde(flatten)]
    pub input: InputConfig,
    #[serde(default = "default_rating_max")]
    pub max: u8,
}

fn default_rating_max() -> u8 {
    5
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Choice {
    /// Also the branch label of the edge taken when this choice is picked
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl Choice {
    /// Value stored in the input variable when this choice is picked
    pub fn stored_value(&self) -> &str {
        self.value.as_deref().unwrap_or(&self.label)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChoiceInput {
    #[serde(flatten)]
    pub input: InputConfig,
    pub choices: Vec<Choice>,
}

/* ===================== Logic ===================== */

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetVariable {
    pub variable: String,
    /// Template rendered against the scope
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionRule {
    pub variable: String,
    pub operator: Operator,
    #[serde(default)]
    pub value: String,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionConfig {
    pub rules: Vec<ConditionRule>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedirectConfig {
    pub url: String,
    #[serde(default)]
    pub new_tab: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeConfig {
    pub assignments: Vec<SetVariable>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitUnit {
    #[default]
    Seconds,
    Minutes,
    Hours,
    Days,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaitConfig {
    pub duration: u64,
    #[serde(default)]
    pub unit: WaitUnit,
}

impl WaitConfig {
    pub fn as_seconds(&self) -> u64 {
        let factor = match self.unit {
            WaitUnit::Seconds => 1,
            WaitUnit::Minutes => 60,
            WaitUnit::Hours => 60 * 60,
            WaitUnit::Days => 24 * 60 * 60,
        };
        self.duration.saturating_mul(factor)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JumpConfig {
    pub target_node_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbBranch {
    pub label: String,
    pub weight: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbTestConfig {
    pub branches: Vec<AbBranch>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubflowConfig {
    pub flow_id: String,
    /// Caller variable that receives the callee's result
    pub return_variable: String,
    /// Callee variable read as the result when the callee returns
    #[serde(default = "default_result_from")]
    pub result_from: String,
}

fn default_result_from() -> String {
    "result".to_string()
}

/* ===================== Integrations ===================== */

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseMapping {
    /// Dotted path into the call result, e.g. `data.customer.id`
    pub path: String,
    pub variable: String,
}

/// Optional per-node overrides of the call timeout and retry budget
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallLimits {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
}

/// Where an integration's result lands in the scope
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultBinding {
    #[serde(default)]
    pub result_variable: Option<String>,
    #[serde(default)]
    pub mappings: Vec<ResponseMapping>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(flatten)]
    pub binding: ResultBinding,
    #[serde(flatten)]
    pub limits: CallLimits,
}

fn default_method() -> String {
    "POST".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SheetsAction {
    Append,
    Read,
    Update,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SheetsConfig {
    pub spreadsheet_id: String,
    pub range: String,
    pub action: SheetsAction,
    #[serde(default)]
    pub values: Vec<String>,
    #[serde(flatten)]
    pub binding: ResultBinding,
    #[serde(flatten)]
    pub limits: CallLimits,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailConfig {
    pub to: String,
    #[serde(default)]
    pub cc: Vec<String>,
    pub subject: String,
    pub body: String,
    #[serde(flatten)]
    pub binding: ResultBinding,
    #[serde(flatten)]
    pub limits: CallLimits,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenAiConfig {
    pub model: String,
    pub prompt: String,
    #[serde(default)]
    pub system: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(flatten)]
    pub binding: ResultBinding,
    #[serde(flatten)]
    pub limits: CallLimits,
}

/* ===================== Channel actions ===================== */

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WhatsappButtons {
    pub body: String,
    #[serde(default)]
    pub header: Option<String>,
    #[serde(default)]
    pub footer: Option<String>,
    pub buttons: Vec<Choice>,
    pub variable: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListSection {
    pub title: String,
    pub rows: Vec<Choice>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WhatsappList {
    pub body: String,
    pub button_text: String,
    pub sections: Vec<ListSection>,
    pub variable: String,
}

impl WhatsappList {
    pub fn rows(&self) -> impl Iterator<Item = &Choice> {
        self.sections.iter().flat_map(|s| s.rows.iter())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    pub message: Option<String>,
    pub queue: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndChatConfig {
    pub message: Option<String>,
}
