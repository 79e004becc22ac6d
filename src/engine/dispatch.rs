use chrono::{Duration as ChronoDuration, Utc};
use serde_json::{json, Value as JsonValue};
use tracing::{debug, info, warn};

use super::ab::choose_branch;
use super::run::{Control, Run, LAST_ERROR_VAR};
use super::Engine;
use crate::error::{codes, EngineError, EngineResult};
use crate::evaluate::select_branch;
use crate::flow::{
    Choice, MediaBubble, Node, NodeKind, SetVariable, DEFAULT_BRANCH, ON_ERROR_BRANCH,
};
use crate::integrations::{self, invoke_with_retry, step_token, RetryPolicy};
use crate::interpolate::{lookup, render};
use crate::store::StepResult;
use crate::types::{
    ActionType, CallFrame, ErrorInfo, OutboundAction, SessionStatus, Variables,
};

/// Longest wait a node may schedule (ten years)
const MAX_WAIT_SECS: i64 = 10 * 365 * 24 * 60 * 60;

impl Engine {
    /// Execute one node and say where the run goes next
    pub(super) async fn dispatch(&self, run: &mut Run, node: &Node) -> EngineResult<Control> {
        let control = match &node.kind {
            NodeKind::Start => Control::Follow(None),

            NodeKind::BubbleText(cfg) => {
                let text = render(&cfg.text, &run.session.variables);
                run.emit(OutboundAction::text(text));
                Control::Follow(None)
            }
            NodeKind::BubbleImage(cfg) => media(run, ActionType::Image, cfg),
            NodeKind::BubbleVideo(cfg) => media(run, ActionType::Video, cfg),
            NodeKind::BubbleAudio(cfg) => media(run, ActionType::Audio, cfg),
            NodeKind::BubbleFile(cfg) => media(run, ActionType::File, cfg),
            NodeKind::BubbleEmbed(cfg) => {
                let url = render(&cfg.url, &run.session.variables);
                run.emit(
                    OutboundAction::text(url)
                        .with_config(json!({ "embed": true, "height": cfg.height })),
                );
                Control::Follow(None)
            }

            NodeKind::InputText(cfg)
            | NodeKind::InputEmail(cfg)
            | NodeKind::InputPhone(cfg)
            | NodeKind::InputDate(cfg)
            | NodeKind::InputFileUpload(cfg) => {
                prompt(run, &cfg.prompt);
                wait_for_input(run, node)
            }
            NodeKind::InputNumber(cfg) => {
                prompt(run, &cfg.input.prompt);
                wait_for_input(run, node)
            }
            NodeKind::InputRating(cfg) => {
                let prompt = render(&cfg.input.prompt, &run.session.variables);
                run.emit(OutboundAction::text(prompt).with_config(json!({ "rating_max": cfg.max })));
                wait_for_input(run, node)
            }
            NodeKind::InputButtons(cfg) => {
                let prompt = render(&cfg.input.prompt, &run.session.variables);
                let choices = choice_config(&cfg.choices, &run.session.variables);
                run.emit(
                    OutboundAction::new(ActionType::Buttons, prompt)
                        .with_config(json!({ "buttons": choices })),
                );
                wait_for_input(run, node)
            }

            NodeKind::WhatsappButtons(cfg) => {
                let scope = &run.session.variables;
                let action = OutboundAction::new(ActionType::Buttons, render(&cfg.body, scope))
                    .with_config(json!({
                        "header": cfg.header.as_ref().map(|h| render(h, scope)),
                        "footer": cfg.footer.as_ref().map(|f| render(f, scope)),
                        "buttons": choice_config(&cfg.buttons, scope),
                    }));
                run.emit(action);
                wait_for_input(run, node)
            }
            NodeKind::WhatsappList(cfg) => {
                let scope = &run.session.variables;
                let sections: Vec<JsonValue> = cfg
                    .sections
                    .iter()
                    .map(|s| {
                        json!({
                            "title": render(&s.title, scope),
                            "rows": choice_config(&s.rows, scope),
                        })
                    })
                    .collect();
                let action = OutboundAction::new(ActionType::List, render(&cfg.body, scope))
                    .with_config(json!({
                        "button_text": render(&cfg.button_text, scope),
                        "sections": sections,
                    }));
                run.emit(action);
                wait_for_input(run, node)
            }

            NodeKind::SetVariable(assignment) => {
                assign(assignment, &mut run.session.variables);
                Control::Follow(None)
            }
            NodeKind::Code(cfg) => {
                for assignment in &cfg.assignments {
                    assign(assignment, &mut run.session.variables);
                }
                Control::Follow(None)
            }

            NodeKind::Condition(cfg) => {
                let label = select_branch(&cfg.rules, &run.session.variables)
                    .unwrap_or(DEFAULT_BRANCH);
                debug!(node_id = %node.id, branch = label, "Condition evaluated");
                Control::Follow(Some(label.to_string()))
            }

            NodeKind::Redirect(cfg) => {
                let url = render(&cfg.url, &run.session.variables);
                run.emit(
                    OutboundAction::text(url.clone())
                        .with_config(json!({ "redirect": url, "new_tab": cfg.new_tab })),
                );
                Control::Follow(None)
            }

            NodeKind::Wait(cfg) => {
                let seconds = cfg.as_seconds();
                if seconds == 0 {
                    Control::Follow(None)
                } else {
                    let seconds = i64::try_from(seconds).unwrap_or(MAX_WAIT_SECS).min(MAX_WAIT_SECS);
                    let wake_at = Utc::now() + ChronoDuration::seconds(seconds);
                    let timer_id = self
                        .timers
                        .schedule_wake(&run.session.id, wake_at)
                        .await?;
                    debug!(node_id = %node.id, %timer_id, %wake_at, "Wake scheduled");
                    run.session.pending_timer_id = Some(timer_id);
                    run.session.status = SessionStatus::WaitingTimer;
                    Control::Suspend
                }
            }

            NodeKind::Jump(cfg) => {
                if run.flow.node(&cfg.target_node_id).is_some() {
                    Control::Goto(cfg.target_node_id.clone())
                } else {
                    Control::Fail(ErrorInfo::new(
                        codes::NODE_NOT_FOUND,
                        format!("jump target '{}' not found", cfg.target_node_id),
                    ))
                }
            }

            NodeKind::AbTest(cfg) => {
                let key = run.session.node_key(&node.id);
                let assigned = run.session.ab_assignments.get(&key).cloned();
                let label = match assigned {
                    Some(label) => Some(label),
                    None => {
                        let chosen = choose_branch(&cfg.branches, &run.session.id, &key)
                            .map(str::to_string);
                        if let Some(label) = &chosen {
                            debug!(node_id = %node.id, branch = %label, "A/B branch assigned");
                            run.session.ab_assignments.insert(key, label.clone());
                        }
                        chosen
                    }
                };
                match label {
                    Some(label) => Control::Follow(Some(label)),
                    None => Control::Fail(ErrorInfo::new(
                        codes::INVALID_CONFIG,
                        "ab_test node has no branches",
                    )),
                }
            }

            NodeKind::Subflow(cfg) => {
                let callee = match self.catalog.get_published(&cfg.flow_id).await {
                    Ok(flow) => flow,
                    Err(EngineError::FlowNotFound { flow_id, reason }) => {
                        return Ok(Control::Fail(ErrorInfo::new(
                            codes::FLOW_GONE,
                            format!("sub-flow '{}' unavailable: {}", flow_id, reason),
                        )));
                    }
                    Err(err) => return Err(err),
                };
                let Some(entry) = callee.entry_node().map(|n| n.id.clone()) else {
                    return Ok(Control::Fail(ErrorInfo::new(
                        codes::FLOW_GONE,
                        format!("sub-flow '{}' has no start node", cfg.flow_id),
                    )));
                };

                run.session.call_stack.push(CallFrame {
                    flow_id: run.session.flow_id.clone(),
                    version: run.session.flow_version,
                    node_id: node.id.clone(),
                    return_variable: cfg.return_variable.clone(),
                    result_from: cfg.result_from.clone(),
                });
                debug!(
                    node_id = %node.id,
                    callee = %callee.flow_id,
                    version = callee.version,
                    depth = run.session.call_stack.len(),
                    "Entering sub-flow"
                );
                run.session.flow_id = callee.flow_id.clone();
                run.session.flow_version = callee.version;
                run.flow = callee;
                Control::Goto(entry)
            }

            NodeKind::Webhook(_) | NodeKind::Sheets(_) | NodeKind::Email(_) | NodeKind::OpenAi(_) => {
                self.call_integration(run, node).await?
            }

            NodeKind::Transfer(cfg) => {
                let message = cfg
                    .message
                    .as_ref()
                    .map(|m| render(m, &run.session.variables))
                    .unwrap_or_default();
                run.emit(
                    OutboundAction::new(ActionType::Transfer, message)
                        .with_config(json!({ "queue": cfg.queue })),
                );
                info!(session_id = %run.session.id, queue = ?cfg.queue, "Transferred to agent");
                Control::Finish
            }

            NodeKind::EndChat(cfg) => {
                let message = cfg
                    .message
                    .as_ref()
                    .map(|m| render(m, &run.session.variables))
                    .unwrap_or_default();
                run.emit(OutboundAction::new(ActionType::EndChat, message));
                Control::Finish
            }
        };
        Ok(control)
    }

    /// Run an integration node at most once per visit.
    ///
    /// The outcome is recorded under the step token before it is applied, so
    /// a replay of the same visit reuses it instead of calling again.
    async fn call_integration(&self, run: &mut Run, node: &Node) -> EngineResult<Control> {
        let key = run.session.node_key(&node.id);
        let visit = run.session.node_visits.get(&key).copied().unwrap_or(0);
        let token = step_token(&run.session.id, &key, run.session.flow_version, visit);
        run.session.last_step_token = Some(token.clone());

        let result = match self.sessions.get_step_result(&run.session.id, &token).await? {
            Some(recorded) => {
                debug!(node_id = %node.id, "Reusing recorded call result");
                recorded
            }
            None => {
                let result = match integrations::prepare(
                    &node.kind,
                    &run.session.variables,
                    &self.config.integrations,
                ) {
                    Some(Ok(request)) => {
                        let policy = RetryPolicy::resolve(
                            &self.config.integrations,
                            request.kind,
                            &integrations::limits(&node.kind).copied().unwrap_or_default(),
                        );
                        let outcome =
                            invoke_with_retry(self.adapter.as_ref(), &request, &policy).await;
                        debug!(
                            node_id = %node.id,
                            kind = %request.kind,
                            attempts = outcome.attempts,
                            ok = outcome.result.is_ok(),
                            "External call finished"
                        );
                        match outcome.result {
                            Ok(value) => StepResult::Success(value),
                            Err(err) => StepResult::Failure(ErrorInfo::new(
                                codes::EXTERNAL_CALL_ERROR,
                                err.to_string(),
                            )),
                        }
                    }
                    Some(Err(err)) => {
                        StepResult::Failure(ErrorInfo::new(codes::INVALID_CONFIG, err.to_string()))
                    }
                    None => StepResult::Failure(ErrorInfo::new(
                        codes::INVALID_CONFIG,
                        format!("'{}' is not an integration", node.kind.type_name()),
                    )),
                };
                self.sessions
                    .record_step_result(&run.session.id, &token, &node.id, &result)
                    .await?;
                result
            }
        };
        run.session.node_visits.insert(key, visit + 1);

        Ok(match result {
            StepResult::Success(value) => {
                if let Some(binding) = integrations::binding(&node.kind) {
                    integrations::bind_result(binding, &value, &mut run.session.variables);
                }
                Control::Follow(None)
            }
            StepResult::Failure(err) if run.flow.has_branch(&node.id, ON_ERROR_BRANCH) => {
                warn!(node_id = %node.id, code = %err.code, message = %err.message, "Integration failed, taking error branch");
                run.session
                    .variables
                    .insert(LAST_ERROR_VAR.to_string(), JsonValue::String(err.message));
                Control::Follow(Some(ON_ERROR_BRANCH.to_string()))
            }
            StepResult::Failure(err) => Control::Fail(err),
        })
    }
}

fn prompt(run: &mut Run, template: &str) {
    let text = render(template, &run.session.variables);
    if !text.is_empty() {
        run.emit(OutboundAction::text(text));
    }
}

fn media(run: &mut Run, kind: ActionType, cfg: &MediaBubble) -> Control {
    let scope = &run.session.variables;
    let action = OutboundAction::new(kind, render(&cfg.url, scope)).with_config(json!({
        "caption": cfg.caption.as_ref().map(|c| render(c, scope)),
        "file_name": cfg.file_name,
    }));
    run.emit(action);
    Control::Follow(None)
}

fn wait_for_input(run: &mut Run, node: &Node) -> Control {
    run.session.status = SessionStatus::WaitingInput;
    run.session.expected_input = node.kind.expected_input();
    Control::Suspend
}

fn choice_config(choices: &[Choice], scope: &Variables) -> Vec<JsonValue> {
    choices
        .iter()
        .map(|c| {
            json!({
                "id": c.id,
                "title": render(&c.label, scope),
                "description": c.description.as_ref().map(|d| render(d, scope)),
            })
        })
        .collect()
}

fn assign(assignment: &SetVariable, scope: &mut Variables) {
    let value = assigned_value(&assignment.value, scope);
    scope.insert(assignment.variable.clone(), value);
}

/// A template that is exactly one `{{name}}` copies the value with its JSON
/// type; anything else renders to a string.
fn assigned_value(template: &str, scope: &Variables) -> JsonValue {
    let single = template
        .trim()
        .strip_prefix("{{")
        .and_then(|t| t.strip_suffix("}}"))
        .map(str::trim)
        .filter(|name| {
            !name.is_empty() && !name.contains(['{', '}']) && !name.contains(char::is_whitespace)
        });

    if let Some(value) = single.and_then(|name| lookup(scope, name)) {
        return value.clone();
    }
    JsonValue::String(render(template, scope))
}
