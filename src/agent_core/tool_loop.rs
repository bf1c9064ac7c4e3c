//! Tool-loop state machine.
//!
//! A turn alternates generation steps and tool execution:
//!
//! ```text
//! GENERATING ──(no tool calls)──────────────────────────────▶ DONE
//!     │
//!     └─(tool calls)─▶ EXECUTING ─▶ results appended ─▶ GENERATING
//!                  └─▶ AWAITING_CONFIRMATION ─(respond)─▶ EXECUTING
//! ```
//!
//! The loop holds no turn state between calls. Every entry (`run`, `resume`,
//! `respond`) re-reads the session from the [`SessionStore`] and settles the
//! latest assistant message's tool calls from their stored status, so a turn
//! paused for confirmation survives a restart of the process.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use super::active::{ActiveTurn, ActiveTurns};
use super::errors::{AgentError, GenerationError};
use super::generation::{GenerationEvent, GenerationOptions, GenerationRequest, Generator, ModelInfo};
use super::store::SessionStore;
use super::types::{
    Approval, ConversationMessage, FinishReason, LoopState, Role, Session, StreamEvent,
    StreamSink, ToolCall, ToolCallPatch, ToolCallStatus, TurnOutcome, TurnRequest,
};
use crate::config::AgentConfig;
use crate::sandbox::{
    resolve_boundary, NewPermissionRequest, PermissionError, PermissionGate, PermissionKind,
    PermissionResponse,
};
use crate::settings::ToolSettings;
use crate::tools::{ToolContext, ToolError, ToolRegistry, ToolResult};

/// What `respond` did with a permission response.
#[derive(Debug, Clone, PartialEq)]
pub enum RespondOutcome {
    /// No pending request with that id in that session.
    Unknown,
    /// A tool blocked on a sandbox check was released.
    Resolved,
    /// A tool-execution decision was recorded and the turn continued.
    Resumed(TurnOutcome),
}

/// Everything one drive of a turn needs.
struct StreamContext {
    session_id: String,
    sink: Arc<dyn StreamSink>,
    tool_settings: ToolSettings,
    options: GenerationOptions,
    model: ModelInfo,
    boundary: PathBuf,
    abort: CancellationToken,
    turn_id: u64,
    iterations: AtomicU32,
}

impl StreamContext {
    fn iterations(&self) -> u32 {
        self.iterations.load(Ordering::Relaxed)
    }
}

pub struct ToolLoop {
    generator: Arc<dyn Generator>,
    registry: Arc<ToolRegistry>,
    gate: Arc<PermissionGate>,
    store: Arc<dyn SessionStore>,
    active: ActiveTurns,
    max_iterations: u32,
    command_timeout: Duration,
    default_working_directory: Option<PathBuf>,
}

impl ToolLoop {
    pub fn new(
        generator: Arc<dyn Generator>,
        registry: Arc<ToolRegistry>,
        gate: Arc<PermissionGate>,
        store: Arc<dyn SessionStore>,
    ) -> Self {
        let defaults = AgentConfig::default();
        Self {
            generator,
            registry,
            gate,
            store,
            active: ActiveTurns::new(),
            max_iterations: defaults.max_iterations,
            command_timeout: defaults.command_timeout(),
            default_working_directory: None,
        }
    }

    pub fn with_config(mut self, config: &AgentConfig) -> Self {
        self.max_iterations = config.max_iterations;
        self.command_timeout = config.command_timeout();
        self.default_working_directory = config.working_directory();
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    pub fn gate(&self) -> &Arc<PermissionGate> {
        &self.gate
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    /// Whether the session has a turn that has not reached a terminal state.
    pub fn is_active(&self, session_id: &str) -> bool {
        self.active.is_active(session_id)
    }

    // ─── Entry points ───────────────────────────────────────────────────

    /// Append the user's input and drive a new turn until it finishes or
    /// pauses for confirmation. An active turn in the same session is
    /// cancelled first, as is a paused turn left in the store by an earlier
    /// process.
    pub async fn run(&self, request: TurnRequest, user_input: &str) -> Result<TurnOutcome, AgentError> {
        let session = self.ensure_session(&request).await?;

        let active = self.active.is_active(&request.session_id);
        let unfinished = self.has_unfinished_calls(&request.session_id).await?;
        if active || unfinished {
            tracing::info!(
                session_id = %request.session_id,
                active,
                unfinished,
                "new input while a turn is open, cancelling previous turn"
            );
            self.cancel(&request.session_id).await?;
        }

        self.store
            .append_message(ConversationMessage::user(&request.session_id, user_input))
            .await?;

        let turn = self.active.get_or_begin(&request.session_id);
        let ctx = self.stream_context(&request, &session, &turn);
        tracing::info!(
            session_id = %ctx.session_id,
            model = %ctx.model.id,
            boundary = %ctx.boundary.display(),
            "turn started"
        );

        if ctx.model.supports_image_generation() {
            return self.generate_image(ctx, &turn).await;
        }
        self.drive(ctx, &turn).await
    }

    /// Continue a turn from the store, e.g. after a restart or after a
    /// tool-execution decision was recorded.
    pub async fn resume(&self, request: TurnRequest) -> Result<TurnOutcome, AgentError> {
        let session = self
            .store
            .get_session(&request.session_id)
            .await?
            .ok_or_else(|| AgentError::SessionNotFound {
                session_id: request.session_id.clone(),
            })?;

        let turn = self.active.get_or_begin(&request.session_id);
        let ctx = self.stream_context(&request, &session, &turn);
        tracing::info!(session_id = %ctx.session_id, "turn resumed");
        self.drive(ctx, &turn).await
    }

    /// Answer a pending permission request.
    ///
    /// Sandbox requests release the tool waiting on them. Tool-execution
    /// requests record the decision on the call and resume the turn.
    pub async fn respond(
        &self,
        request: TurnRequest,
        permission_id: &str,
        response: PermissionResponse,
    ) -> Result<RespondOutcome, AgentError> {
        let Some(pending) = self.gate.pending_request(&request.session_id, permission_id) else {
            return Ok(RespondOutcome::Unknown);
        };

        let approval = match &response {
            PermissionResponse::Allow => Approval::Granted,
            PermissionResponse::Deny => Approval::Denied {
                reason: PermissionError::Denied.to_string(),
            },
            PermissionResponse::Reject { message } => Approval::Denied {
                reason: PermissionError::Rejected {
                    message: message.clone(),
                }
                .to_string(),
            },
        };

        // The decision is stored before the gate record goes away, so a
        // resume in between never re-asks.
        let tool_execution = pending.kind == PermissionKind::ToolExecution;
        if tool_execution {
            self.store
                .update_tool_call(
                    &request.session_id,
                    &pending.message_id,
                    &pending.call_id,
                    &ToolCallPatch::approval(approval),
                )
                .await?;
        }

        if !self.gate.respond(&request.session_id, permission_id, response) {
            if tool_execution {
                self.store
                    .update_tool_call(
                        &request.session_id,
                        &pending.message_id,
                        &pending.call_id,
                        &ToolCallPatch::clear_approval(),
                    )
                    .await?;
            }
            return Ok(RespondOutcome::Unknown);
        }

        if !tool_execution {
            return Ok(RespondOutcome::Resolved);
        }
        let outcome = self.resume(request).await?;
        Ok(RespondOutcome::Resumed(outcome))
    }

    /// Abort the session's turn: fire its abort token, reject its pending
    /// permission requests and mark unfinished tool calls cancelled.
    ///
    /// Returns whether there was anything to cancel.
    pub async fn cancel(&self, session_id: &str) -> Result<bool, AgentError> {
        let aborted = self.active.cancel(session_id);
        let cleared = self.gate.clear_session(session_id);

        if self.store.get_session(session_id).await?.is_none() {
            return Ok(aborted || cleared > 0);
        }

        let messages = self.store.messages(session_id).await?;
        let mut cancelled_calls = 0usize;
        for message in messages.iter().filter(|m| m.role == Role::Assistant) {
            for call in message.tool_calls.iter().filter(|c| !c.status.is_terminal()) {
                match self
                    .store
                    .update_tool_call(session_id, &message.id, &call.id, &ToolCallPatch::cancelled())
                    .await
                {
                    Ok(updated) => {
                        let text = updated
                            .result
                            .as_ref()
                            .map(ToolResult::model_text)
                            .unwrap_or_default();
                        self.store
                            .append_message(ConversationMessage::tool_result(session_id, &call.id, text))
                            .await?;
                        cancelled_calls += 1;
                    }
                    // Finished between the read and the update.
                    Err(AgentError::InvalidTransition { .. }) => {}
                    Err(e) => return Err(e),
                }
            }
        }

        tracing::info!(session_id, aborted, cleared, cancelled_calls, "turn cancelled");
        Ok(aborted || cleared > 0 || cancelled_calls > 0)
    }

    // ─── Drive ──────────────────────────────────────────────────────────

    /// Whether the latest assistant message still has calls in flight.
    async fn has_unfinished_calls(&self, session_id: &str) -> Result<bool, AgentError> {
        let messages = self.store.messages(session_id).await?;
        Ok(messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant)
            .is_some_and(|m| m.tool_calls.iter().any(|c| !c.status.is_terminal())))
    }

    async fn ensure_session(&self, request: &TurnRequest) -> Result<Session, AgentError> {
        if let Some(session) = self.store.get_session(&request.session_id).await? {
            return Ok(session);
        }
        let session = Session::new(
            request.session_id.clone(),
            request
                .working_directory
                .as_ref()
                .map(|dir| dir.to_string_lossy().into_owned()),
        );
        self.store.create_session(session.clone()).await?;
        tracing::info!(session_id = %session.id, "session created");
        Ok(session)
    }

    fn stream_context(&self, request: &TurnRequest, session: &Session, turn: &ActiveTurn) -> StreamContext {
        let session_dir = session
            .working_directory
            .as_deref()
            .map(Path::new)
            .or(self.default_working_directory.as_deref());
        StreamContext {
            session_id: request.session_id.clone(),
            sink: request.sink.clone(),
            tool_settings: request.tool_settings.clone(),
            options: request.options.clone(),
            model: self.generator.model_info(),
            boundary: resolve_boundary(request.working_directory.as_deref(), session_dir),
            abort: turn.abort.clone(),
            turn_id: turn.turn_id,
            iterations: AtomicU32::new(0),
        }
    }

    async fn drive(&self, ctx: StreamContext, turn: &ActiveTurn) -> Result<TurnOutcome, AgentError> {
        let Some(_running) = turn.claim() else {
            return Err(AgentError::TurnInProgress {
                session_id: ctx.session_id.clone(),
            });
        };

        match self.drive_steps(&ctx).await {
            Ok(outcome) => Ok(outcome),
            Err(_) if ctx.abort.is_cancelled() => {
                Ok(self.finish(&ctx, LoopState::Cancelled, FinishReason::Cancelled))
            }
            Err(AgentError::Generation(e)) => Ok(self.fail_turn(&ctx, &e)),
            Err(e) => {
                tracing::error!(session_id = %ctx.session_id, error = %e, "tool loop failed");
                ctx.sink.push(StreamEvent::Error {
                    category: "internal".to_string(),
                    message: e.to_string(),
                    retryable: false,
                });
                self.active.finish(&ctx.session_id, ctx.turn_id);
                Err(e)
            }
        }
    }

    async fn drive_steps(&self, ctx: &StreamContext) -> Result<TurnOutcome, AgentError> {
        loop {
            if ctx.abort.is_cancelled() {
                return Ok(self.finish(ctx, LoopState::Cancelled, FinishReason::Cancelled));
            }

            let messages = self.store.messages(&ctx.session_id).await?;
            let turn_start = messages
                .iter()
                .rposition(|m| m.role == Role::User)
                .map(|i| i + 1)
                .unwrap_or(0);
            let turn_messages = &messages[turn_start..];
            let iterations = turn_messages
                .iter()
                .filter(|m| m.role == Role::Assistant)
                .count() as u32;
            ctx.iterations.store(iterations, Ordering::Relaxed);

            if let Some(assistant) = turn_messages.iter().rev().find(|m| m.role == Role::Assistant) {
                if assistant.tool_calls.iter().any(|c| !c.status.is_terminal()) {
                    if let Some(permission_id) = self.settle_calls(ctx, assistant).await? {
                        return Ok(self.pause(ctx, permission_id));
                    }
                    continue;
                }
            }

            if let Some(last) = turn_messages.last() {
                if last.role == Role::Assistant && last.tool_calls.is_empty() {
                    return Ok(self.finish(ctx, LoopState::Done, FinishReason::Stop));
                }
            }

            if iterations >= self.max_iterations {
                tracing::warn!(
                    session_id = %ctx.session_id,
                    iterations,
                    max_iterations = self.max_iterations,
                    "tool loop reached its iteration limit"
                );
                return Ok(self.finish(ctx, LoopState::Done, FinishReason::MaxIterations));
            }

            tracing::info!(
                session_id = %ctx.session_id,
                iteration = iterations + 1,
                message_count = messages.len(),
                "generation step"
            );
            if !self.generate_step(ctx, messages).await? {
                return Ok(self.finish(ctx, LoopState::Cancelled, FinishReason::Cancelled));
            }
        }
    }

    /// Stream one model response into a new assistant message.
    ///
    /// Returns `false` if the turn was aborted; nothing is persisted then.
    async fn generate_step(
        &self,
        ctx: &StreamContext,
        messages: Vec<ConversationMessage>,
    ) -> Result<bool, AgentError> {
        let message_id = uuid::Uuid::new_v4().to_string();
        let request = GenerationRequest {
            messages,
            tools: self.registry.model_schemas(&ctx.tool_settings),
            options: ctx.options.clone(),
        };

        let mut stream = tokio::select! {
            stream = self.generator.generate(request, ctx.abort.clone()) => stream?,
            _ = ctx.abort.cancelled() => return Ok(false),
        };

        let mut content = String::new();
        let mut reasoning = String::new();
        let mut calls: Vec<ToolCall> = Vec::new();

        loop {
            let event = tokio::select! {
                event = stream.next() => event,
                _ = ctx.abort.cancelled() => return Ok(false),
            };
            match event {
                None | Some(Ok(GenerationEvent::Done)) => break,
                Some(Err(e)) => return Err(e.into()),
                Some(Ok(GenerationEvent::TextDelta(delta))) => {
                    content.push_str(&delta);
                    ctx.sink.push(StreamEvent::Text {
                        message_id: message_id.clone(),
                        delta,
                    });
                }
                Some(Ok(GenerationEvent::ReasoningDelta(delta))) => {
                    reasoning.push_str(&delta);
                    ctx.sink.push(StreamEvent::Reasoning {
                        message_id: message_id.clone(),
                        delta,
                    });
                }
                Some(Ok(GenerationEvent::ToolCallRequest { id, name, arguments })) => {
                    let id = if id.is_empty() {
                        uuid::Uuid::new_v4().to_string()
                    } else {
                        id
                    };
                    let call = ToolCall::new(id, name, normalize_arguments(arguments));
                    tracing::info!(
                        session_id = %ctx.session_id,
                        call_id = %call.id,
                        tool = %call.tool_id,
                        "model requested tool call"
                    );
                    ctx.sink.push(StreamEvent::ToolCallUpdate {
                        message_id: message_id.clone(),
                        call: call.clone(),
                    });
                    calls.push(call);
                }
                Some(Ok(GenerationEvent::Usage {
                    prompt_tokens,
                    completion_tokens,
                })) => {
                    tracing::debug!(prompt_tokens, completion_tokens, "generation usage");
                }
            }
        }

        let reasoning = (!reasoning.is_empty()).then_some(reasoning);
        self.store
            .append_message(ConversationMessage::assistant(
                &ctx.session_id,
                &message_id,
                content,
                reasoning,
                calls,
            ))
            .await?;
        Ok(true)
    }

    /// Single-shot path for image models: no tools, no loop.
    async fn generate_image(&self, ctx: StreamContext, turn: &ActiveTurn) -> Result<TurnOutcome, AgentError> {
        let Some(_running) = turn.claim() else {
            return Err(AgentError::TurnInProgress {
                session_id: ctx.session_id.clone(),
            });
        };

        let messages = self.store.messages(&ctx.session_id).await?;
        let request = GenerationRequest {
            messages,
            tools: Vec::new(),
            options: ctx.options.clone(),
        };

        let generated = tokio::select! {
            generated = self.generator.generate_image(request, ctx.abort.clone()) => generated,
            _ = ctx.abort.cancelled() => {
                return Ok(self.finish(&ctx, LoopState::Cancelled, FinishReason::Cancelled));
            }
        };

        match generated {
            Ok(image) => {
                let message_id = uuid::Uuid::new_v4().to_string();
                if !image.text.is_empty() {
                    ctx.sink.push(StreamEvent::Text {
                        message_id: message_id.clone(),
                        delta: image.text.clone(),
                    });
                }
                let mut message =
                    ConversationMessage::assistant(&ctx.session_id, &message_id, image.text, None, Vec::new());
                message.images = image.images;
                self.store.append_message(message).await?;
                ctx.iterations.store(1, Ordering::Relaxed);
                Ok(self.finish(&ctx, LoopState::Done, FinishReason::Stop))
            }
            Err(e) => Ok(self.fail_turn(&ctx, &e)),
        }
    }

    // ─── Tool calls ─────────────────────────────────────────────────────

    /// Settle every unfinished call of an assistant message, in model order.
    ///
    /// Returns the permission id when a call has to wait for confirmation.
    async fn settle_calls(
        &self,
        ctx: &StreamContext,
        assistant: &ConversationMessage,
    ) -> Result<Option<String>, AgentError> {
        for call in &assistant.tool_calls {
            if ctx.abort.is_cancelled() {
                return Ok(None);
            }
            if let Some(permission_id) = self.settle_call(ctx, &assistant.id, call).await? {
                return Ok(Some(permission_id));
            }
        }
        Ok(None)
    }

    async fn settle_call(
        &self,
        ctx: &StreamContext,
        message_id: &str,
        call: &ToolCall,
    ) -> Result<Option<String>, AgentError> {
        match call.status {
            ToolCallStatus::Pending => {
                if !self.registry.is_enabled(&call.tool_id, &ctx.tool_settings) {
                    let error = match self.registry.get(&call.tool_id) {
                        Some(_) => ToolError::Disabled {
                            tool_id: call.tool_id.clone(),
                        },
                        None => ToolError::NotFound {
                            tool_id: call.tool_id.clone(),
                        },
                    };
                    self.fail_call(ctx, message_id, &call.id, error.to_string()).await?;
                    return Ok(None);
                }
                if self.registry.can_auto_execute(&call.tool_id, &ctx.tool_settings) {
                    self.execute_call(ctx, message_id, call).await?;
                    return Ok(None);
                }
                let permission_id = self.ask_confirmation(ctx, message_id, call).await?;
                Ok(Some(permission_id))
            }
            ToolCallStatus::AwaitingConfirmation => match &call.approval {
                Some(Approval::Granted) => {
                    self.execute_call(ctx, message_id, call).await?;
                    Ok(None)
                }
                Some(Approval::Denied { reason }) => {
                    self.fail_call(ctx, message_id, &call.id, reason.clone()).await?;
                    Ok(None)
                }
                None => {
                    if let Some(permission_id) = &call.permission_id {
                        if self
                            .gate
                            .pending_request(&ctx.session_id, permission_id)
                            .is_some()
                        {
                            return Ok(Some(permission_id.clone()));
                        }
                    }
                    // The request was lost (restart, expiry); ask again.
                    let permission_id = self.ask_confirmation(ctx, message_id, call).await?;
                    Ok(Some(permission_id))
                }
            },
            // Never re-run a call that may already have had side effects.
            ToolCallStatus::Executing => {
                tracing::warn!(
                    session_id = %ctx.session_id,
                    call_id = %call.id,
                    tool = %call.tool_id,
                    "tool call was interrupted while executing, marking failed"
                );
                self.fail_call(
                    ctx,
                    message_id,
                    &call.id,
                    "interrupted before completion; not re-run".to_string(),
                )
                .await?;
                Ok(None)
            }
            ToolCallStatus::Completed | ToolCallStatus::Failed | ToolCallStatus::Cancelled => Ok(None),
        }
    }

    async fn ask_confirmation(
        &self,
        ctx: &StreamContext,
        message_id: &str,
        call: &ToolCall,
    ) -> Result<String, AgentError> {
        let name = self
            .registry
            .get(&call.tool_id)
            .map(|spec| spec.name)
            .unwrap_or_else(|| call.tool_id.clone());

        let ticket = self.gate.ask(NewPermissionRequest {
            session_id: ctx.session_id.clone(),
            message_id: message_id.to_string(),
            call_id: call.id.clone(),
            kind: PermissionKind::ToolExecution,
            pattern: vec![call.tool_id.clone()],
            title: format!("Allow {name} to run?"),
            metadata: json!({
                "tool": call.tool_id,
                "arguments": call.arguments,
            }),
        });
        let permission_id = ticket.id().to_string();
        // The turn continues through `respond`, which re-enters from the store.
        drop(ticket);

        let updated = self
            .store
            .update_tool_call(
                &ctx.session_id,
                message_id,
                &call.id,
                &ToolCallPatch::status(ToolCallStatus::AwaitingConfirmation).with_permission(&permission_id),
            )
            .await?;
        self.push_call(ctx, message_id, updated);
        Ok(permission_id)
    }

    async fn execute_call(&self, ctx: &StreamContext, message_id: &str, call: &ToolCall) -> Result<(), AgentError> {
        let executing = self
            .store
            .update_tool_call(
                &ctx.session_id,
                message_id,
                &call.id,
                &ToolCallPatch::status(ToolCallStatus::Executing),
            )
            .await?;
        self.push_call(ctx, message_id, executing);

        let tool_ctx = ToolContext {
            session_id: ctx.session_id.clone(),
            message_id: message_id.to_string(),
            call_id: call.id.clone(),
            boundary: ctx.boundary.clone(),
            abort: ctx.abort.clone(),
            gate: self.gate.clone(),
            command_timeout: self.command_timeout,
        };
        let result = self
            .registry
            .execute(&call.tool_id, call.arguments.clone(), tool_ctx)
            .await;

        // `cancel` marks the call; nothing more to record here.
        if ctx.abort.is_cancelled() {
            return Ok(());
        }

        let text = result.model_text();
        let finished = self
            .store
            .update_tool_call(&ctx.session_id, message_id, &call.id, &ToolCallPatch::finished(result))
            .await?;
        self.store
            .append_message(ConversationMessage::tool_result(&ctx.session_id, &call.id, text))
            .await?;
        self.push_call(ctx, message_id, finished);
        Ok(())
    }

    /// Fail a call without running it; the error is fed back to the model.
    async fn fail_call(
        &self,
        ctx: &StreamContext,
        message_id: &str,
        call_id: &str,
        error: String,
    ) -> Result<(), AgentError> {
        let result = ToolResult::failure(error);
        let text = result.model_text();
        let failed = self
            .store
            .update_tool_call(&ctx.session_id, message_id, call_id, &ToolCallPatch::finished(result))
            .await?;
        self.store
            .append_message(ConversationMessage::tool_result(&ctx.session_id, call_id, text))
            .await?;
        self.push_call(ctx, message_id, failed);
        Ok(())
    }

    fn push_call(&self, ctx: &StreamContext, message_id: &str, call: ToolCall) {
        ctx.sink.push(StreamEvent::ToolCallUpdate {
            message_id: message_id.to_string(),
            call,
        });
    }

    // ─── Outcomes ───────────────────────────────────────────────────────

    fn finish(&self, ctx: &StreamContext, state: LoopState, reason: FinishReason) -> TurnOutcome {
        self.active.finish(&ctx.session_id, ctx.turn_id);
        ctx.sink.push(StreamEvent::Done { reason });
        tracing::info!(
            session_id = %ctx.session_id,
            state = ?state,
            iterations = ctx.iterations(),
            "turn finished"
        );
        TurnOutcome {
            session_id: ctx.session_id.clone(),
            state,
            iterations: ctx.iterations(),
            permission_id: None,
            error: None,
        }
    }

    /// Paused turns keep their controller so `cancel` can still reach them.
    fn pause(&self, ctx: &StreamContext, permission_id: String) -> TurnOutcome {
        tracing::info!(
            session_id = %ctx.session_id,
            permission_id = %permission_id,
            "turn paused for confirmation"
        );
        TurnOutcome {
            session_id: ctx.session_id.clone(),
            state: LoopState::AwaitingConfirmation,
            iterations: ctx.iterations(),
            permission_id: Some(permission_id),
            error: None,
        }
    }

    fn fail_turn(&self, ctx: &StreamContext, error: &GenerationError) -> TurnOutcome {
        tracing::warn!(
            session_id = %ctx.session_id,
            category = error.category(),
            retryable = error.is_retryable(),
            error = %error,
            "generation failed"
        );
        ctx.sink.push(StreamEvent::Error {
            category: error.category().to_string(),
            message: error.to_string(),
            retryable: error.is_retryable(),
        });
        self.active.finish(&ctx.session_id, ctx.turn_id);
        TurnOutcome {
            session_id: ctx.session_id.clone(),
            state: LoopState::Failed,
            iterations: ctx.iterations(),
            permission_id: None,
            error: Some(error.to_string()),
        }
    }
}

/// Providers sometimes deliver arguments as a JSON-encoded string.
fn normalize_arguments(arguments: Value) -> Value {
    match arguments {
        Value::String(raw) => serde_json::from_str(&raw).unwrap_or(Value::String(raw)),
        Value::Null => json!({}),
        other => other,
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
