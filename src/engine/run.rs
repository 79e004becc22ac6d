use chrono::Utc;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::input::{self, reply_text, Reply};
use super::Engine;
use crate::error::{codes, EngineError, EngineResult};
use crate::flow::{Flow, DEFAULT_BRANCH, ON_ERROR_BRANCH};
use crate::integrations::trigger_token;
use crate::interpolate::{lookup, render};
use crate::store::BoundFlow;
use crate::types::{
    ActionType, ErrorInfo, EventType, OutboundAction, Session, SessionStatus, StepOutcome,
    Trigger,
};

/// Variable holding the text of the latest inbound message
pub const LAST_MESSAGE_VAR: &str = "last_message";
/// Variable holding the message of the latest failed integration call
pub const LAST_ERROR_VAR: &str = "last_error";
/// Variable receiving a non-object callback payload
pub const CALLBACK_PAYLOAD_VAR: &str = "callback_payload";

/// What the loop does after a node ran
#[derive(Debug, Clone, PartialEq)]
pub(super) enum Control {
    /// Execute this node next (counts as a hop)
    Goto(String),
    /// Leave the current node by the edge with this label
    Follow(Option<String>),
    /// Wait for the next trigger; the node already set the status
    Suspend,
    /// Terminal node reached
    Finish,
    Fail(ErrorInfo),
}

/// Mutable state of one step
pub(super) struct Run {
    pub session: Session,
    pub flow: Arc<Flow>,
    pub actions: Vec<OutboundAction>,
    pub hops: u32,
}

impl Run {
    pub fn emit(&mut self, action: OutboundAction) {
        self.actions.push(action);
    }
}

/// How the trigger re-enters the flow
enum Resume {
    /// Run the current node (fresh session)
    Execute,
    Reply(JsonValue),
    Callback(JsonValue),
    Timer,
}

fn resume_for(session: &Session, trigger: Option<&Trigger>) -> EngineResult<Resume> {
    let stale = || EngineError::StaleTrigger {
        session_id: session.id.clone(),
        trigger: trigger.map_or("start", Trigger::label),
        status: session.status,
    };

    let resume = match (trigger, session.status) {
        (None, SessionStatus::Running) => Resume::Execute,
        (
            Some(Trigger::Inbound {
                event_type: EventType::Message | EventType::Selection,
                payload,
                ..
            }),
            SessionStatus::WaitingInput,
        ) => Resume::Reply(payload.clone()),
        (
            Some(Trigger::Inbound {
                event_type: EventType::Callback,
                payload,
                ..
            }),
            SessionStatus::WaitingInput,
        ) => Resume::Callback(payload.clone()),
        (
            Some(Trigger::Inbound {
                event_type: EventType::Message | EventType::Selection,
                ..
            }),
            SessionStatus::Running,
        ) => Resume::Execute,
        (Some(Trigger::Timer { timer_id }), SessionStatus::WaitingTimer)
            if session.pending_timer_id.as_deref() == Some(timer_id.as_str()) =>
        {
            Resume::Timer
        }
        _ => return Err(stale()),
    };
    Ok(resume)
}

impl Engine {
    pub(super) async fn run(
        &self,
        mut session: Session,
        trigger: Option<Trigger>,
    ) -> EngineResult<StepOutcome> {
        let token = trigger
            .as_ref()
            .and_then(Trigger::event_id)
            .map(|event_id| trigger_token(&session.id, event_id));
        if let Some(token) = &token {
            if session.recent_trigger_tokens.contains(token) {
                return Err(EngineError::DuplicateTrigger {
                    session_id: session.id.clone(),
                });
            }
        }

        let resume = resume_for(&session, trigger.as_ref())?;

        if let Some(token) = token {
            session.recent_trigger_tokens.push(token);
            let window = self.config.engine.recent_trigger_window.max(1);
            if session.recent_trigger_tokens.len() > window {
                let excess = session.recent_trigger_tokens.len() - window;
                session.recent_trigger_tokens.drain(..excess);
            }
        }
        if let Some(Trigger::Inbound {
            event_type: EventType::Message | EventType::Selection,
            payload,
            ..
        }) = &trigger
        {
            session.variables.insert(
                LAST_MESSAGE_VAR.to_string(),
                JsonValue::String(reply_text(payload)),
            );
        }

        let bound = self
            .catalog
            .get_bound(
                &session.flow_id,
                session.flow_version,
                self.config.engine.drain_paused_flows,
            )
            .await?;

        let (mut run, control) = match bound {
            BoundFlow::Ready(flow) => {
                let mut run = Run {
                    session,
                    flow,
                    actions: Vec::new(),
                    hops: 0,
                };
                let control = self.resume(&mut run, resume);
                (run, control)
            }
            BoundFlow::Unavailable(err) => {
                let mut actions = Vec::new();
                self.fail(&mut session, &mut actions, err);
                return self.save(session, actions).await;
            }
        };

        self.drive(&mut run, control).await?;
        self.save(run.session, run.actions).await
    }

    fn resume(&self, run: &mut Run, resume: Resume) -> Control {
        let current = run.session.current_node_id.clone();
        match resume {
            Resume::Execute => Control::Goto(current),

            Resume::Timer => {
                run.session.pending_timer_id = None;
                run.session.status = SessionStatus::Running;
                Control::Follow(None)
            }

            Resume::Callback(payload) => {
                match payload {
                    JsonValue::Object(map) => run.session.variables.extend(map),
                    other => {
                        run.session
                            .variables
                            .insert(CALLBACK_PAYLOAD_VAR.to_string(), other);
                    }
                }
                run.session.status = SessionStatus::Running;
                run.session.expected_input = None;

                let multi_output = run
                    .flow
                    .node(&current)
                    .map_or(false, |n| n.kind.branches().is_some());
                Control::Follow(multi_output.then(|| DEFAULT_BRANCH.to_string()))
            }

            Resume::Reply(payload) => {
                let flow = run.flow.clone();
                let Some(node) = flow.node(&current) else {
                    return Control::Fail(ErrorInfo::new(
                        codes::NODE_NOT_FOUND,
                        format!("node '{}' not found", current),
                    ));
                };

                match input::accept(&node.kind, &payload) {
                    Some(Reply::Accepted {
                        variable,
                        value,
                        branch,
                    }) => {
                        debug!(node_id = %node.id, variable = %variable, "Reply accepted");
                        run.session.variables.insert(variable, value);
                        run.session.status = SessionStatus::Running;
                        run.session.expected_input = None;
                        Control::Follow(branch)
                    }
                    Some(Reply::Rejected { retry_message }) => {
                        debug!(node_id = %node.id, "Reply rejected");
                        let message = retry_message
                            .map(|m| render(&m, &run.session.variables))
                            .unwrap_or_else(|| self.config.engine.invalid_input_message.clone());
                        run.emit(OutboundAction::text(message));
                        Control::Suspend
                    }
                    None => Control::Fail(ErrorInfo::new(
                        codes::INVALID_CONFIG,
                        format!("'{}' node does not take input", node.kind.type_name()),
                    )),
                }
            }
        }
    }

    /// Walk the graph until the flow suspends, ends, or fails
    async fn drive(&self, run: &mut Run, mut control: Control) -> EngineResult<()> {
        loop {
            control = match control {
                Control::Goto(node_id) => {
                    run.hops += 1;
                    if run.hops > self.config.engine.max_hops {
                        Control::Fail(ErrorInfo::new(
                            codes::FLOW_LOOP_LIMIT,
                            format!(
                                "exceeded {} node hops in one step",
                                self.config.engine.max_hops
                            ),
                        ))
                    } else {
                        run.session.current_node_id = node_id;
                        let flow = run.flow.clone();
                        match flow.node(&run.session.current_node_id) {
                            Some(node) => {
                                debug!(node_id = %node.id, node_type = node.kind.type_name(), "Executing node");
                                self.dispatch(run, node).await?
                            }
                            None => Control::Fail(ErrorInfo::new(
                                codes::NODE_NOT_FOUND,
                                format!("node '{}' not found", run.session.current_node_id),
                            )),
                        }
                    }
                }

                Control::Follow(label) => {
                    let from = run.session.current_node_id.clone();
                    let next = match label.as_deref() {
                        Some(label) => run.flow.successor(&from, Some(label)).or_else(|| {
                            if label == ON_ERROR_BRANCH {
                                None
                            } else {
                                run.flow.successor(&from, Some(DEFAULT_BRANCH))
                            }
                        }),
                        None => run.flow.successor(&from, None),
                    }
                    .map(str::to_string);

                    match next {
                        Some(next) => Control::Goto(next),
                        None => self.return_from_subflow(run, &from).await?,
                    }
                }

                Control::Suspend => return Ok(()),

                Control::Finish => {
                    run.session.status = SessionStatus::Completed;
                    run.session.expected_input = None;
                    run.session.completed_at = Some(Utc::now());
                    return Ok(());
                }

                Control::Fail(err) => {
                    self.fail(&mut run.session, &mut run.actions, err);
                    return Ok(());
                }
            };
        }
    }

    /// A node without a way out returns to the caller flow, or fails the
    /// session when there is no caller.
    async fn return_from_subflow(&self, run: &mut Run, from: &str) -> EngineResult<Control> {
        let Some(frame) = run.session.call_stack.pop() else {
            return Ok(Control::Fail(ErrorInfo::new(
                codes::MISSING_EDGE,
                format!("node '{}' has no outgoing edge to follow", from),
            )));
        };

        let value = lookup(&run.session.variables, &frame.result_from)
            .cloned()
            .unwrap_or(JsonValue::Null);
        run.session
            .variables
            .insert(frame.return_variable.clone(), value);

        let bound = self
            .catalog
            .get_bound(
                &frame.flow_id,
                frame.version,
                self.config.engine.drain_paused_flows,
            )
            .await?;

        Ok(match bound {
            BoundFlow::Ready(flow) => {
                debug!(
                    from_flow = %run.session.flow_id,
                    to_flow = %frame.flow_id,
                    "Returning from sub-flow"
                );
                run.flow = flow;
                run.session.flow_id = frame.flow_id;
                run.session.flow_version = frame.version;
                run.session.current_node_id = frame.node_id;
                Control::Follow(None)
            }
            BoundFlow::Unavailable(err) => Control::Fail(err),
        })
    }

    fn fail(&self, session: &mut Session, actions: &mut Vec<OutboundAction>, err: ErrorInfo) {
        warn!(
            session_id = %session.id,
            node_id = %session.current_node_id,
            code = %err.code,
            message = %err.message,
            "Session failed"
        );
        actions.push(
            OutboundAction::new(ActionType::Transfer, self.config.engine.fallback_message.clone())
                .with_config(serde_json::json!({ "reason": err.code })),
        );
        session.status = SessionStatus::Failed;
        session.error = Some(err);
        session.expected_input = None;
        session.pending_timer_id = None;
        session.completed_at = Some(Utc::now());
    }

    async fn save(
        &self,
        session: Session,
        actions: Vec<OutboundAction>,
    ) -> EngineResult<StepOutcome> {
        if !self.sessions.save_session(&session).await? {
            return Err(EngineError::Conflict(session.id));
        }

        info!(
            session_id = %session.id,
            status = %session.status,
            node_id = %session.current_node_id,
            actions = actions.len(),
            "Step finished"
        );

        Ok(StepOutcome {
            session_id: session.id,
            status: session.status,
            actions,
            error: session.error,
        })
    }
}
