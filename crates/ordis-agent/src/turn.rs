use std::sync::Arc;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use ordis_core::config::AgentConfig;
use ordis_core::error::{OrdisError, Result};
use ordis_core::event::EventBus;
use ordis_core::hooks::{HookContext, HookManager};
use ordis_core::types::*;
use ordis_eventlog::{EventLog, EventLogEntry};
use ordis_llm::chain::FallbackChain;
use ordis_llm::decode::repair_partial_json;
use ordis_tools::ToolExecutor;

use crate::context::assemble;
use crate::session::{Session, SessionManager};

const DEFAULT_MAX_TOOL_ROUNDS: usize = 16;
const FAILURE_NOTICE: &str = "Sorry, something went wrong and I could not finish this request.";

/// Pipeline states, traced per transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TurnState {
    Assemble,
    Call,
    Streaming,
    Tool,
    Done,
    Error,
}

/// Drives one user → assistant turn: assemble context, stream from the
/// provider chain, execute tool calls, repeat until a terminal stop.
pub struct TurnEngine {
    executor: Arc<ToolExecutor>,
    hooks: Arc<HookManager>,
    sessions: Arc<SessionManager>,
    event_log: Arc<EventLog>,
    bus: Arc<EventBus>,
    reserve_floor: usize,
    max_tool_rounds: usize,
}

impl TurnEngine {
    pub fn new(
        executor: Arc<ToolExecutor>,
        hooks: Arc<HookManager>,
        sessions: Arc<SessionManager>,
        event_log: Arc<EventLog>,
        bus: Arc<EventBus>,
        reserve_floor: usize,
    ) -> Self {
        Self {
            executor,
            hooks,
            sessions,
            event_log,
            bus,
            reserve_floor,
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
        }
    }

    pub fn with_max_tool_rounds(mut self, bound: usize) -> Self {
        self.max_tool_rounds = bound;
        self
    }

    pub fn sessions(&self) -> Arc<SessionManager> {
        Arc::clone(&self.sessions)
    }

    /// Run a complete turn for `(channel, sender)`. Returns the final
    /// assistant text. On terminal error the session gets a short failure
    /// message appended and stays usable.
    pub async fn run_turn(
        &self,
        agent: &AgentConfig,
        chain: &FallbackChain,
        channel: &str,
        sender: &str,
        user_text: &str,
        cancel: CancellationToken,
    ) -> Result<String> {
        let session = self.sessions.session_for(channel, sender, &agent.id);
        // The session is exclusive to this turn until the guard drops.
        let mut guard = session.lock().await;
        let session_id = guard.id.clone();

        self.bus.publish(RuntimeEvent::TurnStarted {
            session_id: session_id.clone(),
        });
        guard.append(Message::user(user_text));

        let hook_ctx = HookContext {
            session_id: session_id.clone(),
            agent_id: agent.id.clone(),
            channel: channel.to_string(),
        };
        let tool_defs = self.executor.definitions().await;

        let mut rounds = 0usize;
        loop {
            debug!(state = ?TurnState::Assemble, session = %session_id, "Turn transition");
            let facts = self.sessions.facts().all();
            let assembled = assemble(
                agent,
                &facts,
                guard.messages(),
                &tool_defs,
                self.reserve_floor,
            );
            if !assembled.new_facts.is_empty() {
                self.sessions.facts().add(&assembled.new_facts);
            }

            let request = ChatRequest {
                messages: assembled.messages,
                options: ChatOptions {
                    max_tokens: agent.max_tokens,
                    temperature: agent.temperature,
                    tools: assembled.tools,
                    session_id: Some(session_id.clone()),
                    channel: Some(channel.to_string()),
                },
            };
            let request = self.hooks.pre_send(request, &hook_ctx).await;

            debug!(state = ?TurnState::Call, session = %session_id, "Turn transition");
            let outcome = tokio::select! {
                res = chain.execute(request) => res,
                _ = cancel.cancelled() => {
                    return self.fail(&mut guard, OrdisError::Cancelled);
                }
            };
            let mut outcome = match outcome {
                Ok(o) => o,
                Err(e) => {
                    self.log_error(&session_id, agent, channel, &e);
                    return self.fail(&mut guard, e);
                }
            };

            debug!(state = ?TurnState::Streaming, session = %session_id, provider = %outcome.provider, "Turn transition");
            let mut text = String::new();
            // Open tool calls: (id, name, accumulated input json).
            let mut open: Vec<(String, String, String)> = Vec::new();
            let mut calls: Vec<ToolCall> = Vec::new();
            let mut stream_error: Option<OrdisError> = None;

            loop {
                let item = tokio::select! {
                    item = outcome.stream.next() => item,
                    _ = cancel.cancelled() => {
                        // Close any open call with the recovery rule; the
                        // partial text already forwarded is not retracted.
                        for (id, name, partial) in open.drain(..) {
                            calls.push(ToolCall {
                                id,
                                name,
                                input: repair_partial_json(&partial),
                            });
                        }
                        if !text.is_empty() || !calls.is_empty() {
                            guard.append(Message::assistant_with_tools(text, calls));
                        }
                        return self.fail(&mut guard, OrdisError::Cancelled);
                    }
                };

                let chunk = match item {
                    None => break,
                    Some(Ok(chunk)) => chunk,
                    Some(Err(e)) => {
                        stream_error = Some(e);
                        break;
                    }
                };

                self.hooks.post_receive(&chunk, &hook_ctx).await;

                match chunk {
                    StreamChunk::TextDelta { text: delta } => {
                        self.bus.publish(RuntimeEvent::TextDelta {
                            session_id: session_id.clone(),
                            text: delta.clone(),
                        });
                        text.push_str(&delta);
                    }
                    StreamChunk::ToolUseStart { id, name } => {
                        open.push((id, name, String::new()));
                    }
                    StreamChunk::ToolUseDelta { id, partial } => {
                        if let Some(entry) = open.iter_mut().find(|(oid, _, _)| *oid == id) {
                            entry.2.push_str(&partial);
                        }
                    }
                    StreamChunk::ToolUseEnd { id, input } => {
                        if let Some(pos) = open.iter().position(|(oid, _, _)| *oid == id) {
                            let (id, name, _) = open.remove(pos);
                            calls.push(ToolCall { id, name, input });
                        }
                    }
                    StreamChunk::MessageStop => break,
                }
            }

            if let Some(e) = stream_error {
                self.log_error(&session_id, agent, channel, &e);
                if !text.is_empty() || !calls.is_empty() {
                    guard.append(Message::assistant_with_tools(text, calls));
                }
                return self.fail(&mut guard, e);
            }

            guard.append(Message::assistant_with_tools(text.clone(), calls.clone()));

            if calls.is_empty() {
                debug!(state = ?TurnState::Done, session = %session_id, rounds, "Turn transition");
                self.bus.publish(RuntimeEvent::TurnComplete {
                    session_id: session_id.clone(),
                    rounds,
                });
                return Ok(text);
            }

            rounds += 1;
            if rounds > self.max_tool_rounds {
                warn!(session = %session_id, bound = self.max_tool_rounds, "Tool loop bound exceeded");
                return self.fail(&mut guard, OrdisError::ToolLoop(self.max_tool_rounds));
            }

            debug!(state = ?TurnState::Tool, session = %session_id, count = calls.len(), "Turn transition");
            for call in calls {
                let input = self.hooks.pre_tool(&call.name, call.input, &hook_ctx).await;
                self.bus.publish(RuntimeEvent::ToolStart {
                    session_id: session_id.clone(),
                    name: call.name.clone(),
                    input: input.clone(),
                });

                let tool_ctx = ToolContext {
                    session_id: session_id.clone(),
                    agent_id: agent.id.clone(),
                    channel: channel.to_string(),
                    working_dir: std::env::temp_dir(),
                    cancel: cancel.clone(),
                };
                let exec = self.executor.execute(&call.name, input, tool_ctx).await;

                self.hooks.post_tool(&call.name, &exec.result, &hook_ctx).await;
                self.bus.publish(RuntimeEvent::ToolEnd {
                    session_id: session_id.clone(),
                    name: call.name.clone(),
                    result: exec.result.clone(),
                });

                let content = if exec.result.is_error {
                    format!("ERROR: {}", exec.result.content)
                } else {
                    exec.result.content
                };
                guard.append(Message::tool_result(call.id, content));
            }
            // Back to CALL with the updated history.
        }
    }

    /// Terminal error path: append a short failure message (no stack traces
    /// reach the user), publish the error, and leave the session consistent.
    fn fail(&self, session: &mut Session, e: OrdisError) -> Result<String> {
        debug!(state = ?TurnState::Error, session = %session.id, error = %e, "Turn transition");
        let notice = match &e {
            OrdisError::Cancelled => "(cancelled)".to_string(),
            OrdisError::ToolLoop(bound) => format!(
                "Sorry, I stopped after {} tool calls without reaching an answer.",
                bound
            ),
            _ => FAILURE_NOTICE.to_string(),
        };
        session.append(Message::assistant_text(notice));
        self.bus.publish(RuntimeEvent::TurnError {
            session_id: session.id.clone(),
            error: e.to_string(),
        });
        Err(e)
    }

    fn log_error(&self, session_id: &SessionId, agent: &AgentConfig, channel: &str, e: &OrdisError) {
        let mut entry = EventLogEntry::error("turn", e.to_string())
            .with_agent(agent.id.clone())
            .with_session(session_id.0.clone())
            .with_channel(channel.to_string());
        // A chain failure carries every attempt; keep them queryable.
        if let OrdisError::FallbackChain { attempts } = e {
            entry.args = serde_json::to_value(attempts).unwrap_or(serde_json::Value::Null);
        }
        if let Err(log_err) = self.event_log.insert(entry) {
            error!(error = %log_err, "Failed to record turn error");
        }
    }
}
