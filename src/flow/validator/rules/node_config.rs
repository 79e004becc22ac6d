//! Rule: Node Config
//!
//! Per-type configuration sanity: required fields present, numeric bounds
//! ordered, and channel limits respected (WhatsApp allows at most 3 reply
//! buttons and 10 list rows).

use crate::flow::{FlowGraph, Node, NodeKind};

use super::super::{ValidationError, ValidationRule};

const MAX_WHATSAPP_BUTTONS: usize = 3;
const MAX_WHATSAPP_LIST_ROWS: usize = 10;
const HTTP_METHODS: &[&str] = &["GET", "POST", "PUT", "PATCH", "DELETE"];

pub struct NodeConfigRule;

fn require(problems: &mut Vec<String>, value: &str, field: &str) {
    if value.trim().is_empty() {
        problems.push(format!("'{}' must not be empty", field));
    }
}

impl NodeConfigRule {
    fn check(&self, node: &Node) -> Vec<String> {
        let mut problems = Vec::new();

        match &node.kind {
            NodeKind::Start => {}
            NodeKind::BubbleText(c) => require(&mut problems, &c.text, "text"),
            NodeKind::BubbleImage(c)
            | NodeKind::BubbleVideo(c)
            | NodeKind::BubbleAudio(c)
            | NodeKind::BubbleFile(c) => require(&mut problems, &c.url, "url"),
            NodeKind::BubbleEmbed(c) => require(&mut problems, &c.url, "url"),

            NodeKind::InputText(c)
            | NodeKind::InputEmail(c)
            | NodeKind::InputPhone(c)
            | NodeKind::InputDate(c)
            | NodeKind::InputFileUpload(c) => require(&mut problems, &c.variable, "variable"),
            NodeKind::InputNumber(c) => {
                require(&mut problems, &c.input.variable, "variable");
                if let (Some(min), Some(max)) = (c.min, c.max) {
                    if min > max {
                        problems.push(format!("min ({}) is greater than max ({})", min, max));
                    }
                }
            }
            NodeKind::InputRating(c) => {
                require(&mut problems, &c.input.variable, "variable");
                if !(1..=10).contains(&c.max) {
                    problems.push(format!("rating max must be between 1 and 10, got {}", c.max));
                }
            }
            NodeKind::InputButtons(c) => {
                require(&mut problems, &c.input.variable, "variable");
                if c.choices.is_empty() {
                    problems.push("at least one choice is required".to_string());
                }
            }

            NodeKind::SetVariable(c) => require(&mut problems, &c.variable, "variable"),
            NodeKind::Condition(c) => {
                if c.rules.is_empty() {
                    problems.push("at least one rule is required".to_string());
                }
                for rule in &c.rules {
                    require(&mut problems, &rule.variable, "rules.variable");
                }
            }
            NodeKind::Redirect(c) => require(&mut problems, &c.url, "url"),
            NodeKind::Code(c) => {
                if c.assignments.is_empty() {
                    problems.push("at least one assignment is required".to_string());
                }
                for a in &c.assignments {
                    require(&mut problems, &a.variable, "assignments.variable");
                }
            }
            NodeKind::Wait(_) => {}
            NodeKind::Jump(c) => require(&mut problems, &c.target_node_id, "target_node_id"),
            NodeKind::AbTest(c) => {
                if c.branches.len() < 2 {
                    problems.push("an A/B test needs at least two branches".to_string());
                }
            }
            NodeKind::Subflow(c) => {
                require(&mut problems, &c.flow_id, "flow_id");
                require(&mut problems, &c.return_variable, "return_variable");
            }

            NodeKind::Webhook(c) => {
                require(&mut problems, &c.url, "url");
                if !HTTP_METHODS.contains(&c.method.to_uppercase().as_str()) {
                    problems.push(format!("unsupported HTTP method '{}'", c.method));
                }
            }
            NodeKind::Sheets(c) => {
                require(&mut problems, &c.spreadsheet_id, "spreadsheet_id");
                require(&mut problems, &c.range, "range");
            }
            NodeKind::Email(c) => {
                require(&mut problems, &c.to, "to");
                require(&mut problems, &c.subject, "subject");
            }
            NodeKind::OpenAi(c) => {
                require(&mut problems, &c.model, "model");
                require(&mut problems, &c.prompt, "prompt");
            }

            NodeKind::WhatsappButtons(c) => {
                require(&mut problems, &c.body, "body");
                require(&mut problems, &c.variable, "variable");
                if c.buttons.is_empty() || c.buttons.len() > MAX_WHATSAPP_BUTTONS {
                    problems.push(format!(
                        "WhatsApp buttons need 1 to {} buttons, got {}",
                        MAX_WHATSAPP_BUTTONS,
                        c.buttons.len()
                    ));
                }
            }
            NodeKind::WhatsappList(c) => {
                require(&mut problems, &c.body, "body");
                require(&mut problems, &c.button_text, "button_text");
                require(&mut problems, &c.variable, "variable");
                let rows = c.rows().count();
                if rows == 0 || rows > MAX_WHATSAPP_LIST_ROWS {
                    problems.push(format!(
                        "WhatsApp lists need 1 to {} rows, got {}",
                        MAX_WHATSAPP_LIST_ROWS, rows
                    ));
                }
            }
            NodeKind::Transfer(_) | NodeKind::EndChat(_) => {}
        }

        problems
    }
}

impl ValidationRule for NodeConfigRule {
    fn id(&self) -> &'static str {
        "node-config"
    }

    fn description(&self) -> &'static str {
        "Node configuration must be complete and within channel limits"
    }

    fn validate(&self, graph: &FlowGraph) -> Vec<ValidationError> {
        graph
            .nodes
            .iter()
            .flat_map(|node| {
                self.check(node).into_iter().map(move |problem| {
                    ValidationError::error(
                        Some(&node.id),
                        format!("{}: {}", node.kind.type_name(), problem),
                        self.id(),
                    )
                })
            })
            .collect()
    }
}
