//! One live call: the actor that bridges a telephony media stream to a voice
//! model.
//!
//! A session owns everything mutable about its call (playback clock, audio
//! converters, conversation state) and is driven by a single `select!` loop
//! over four inputs: caller frames, model events, tool outcomes and control
//! messages. Nothing else touches that state, so no locks are needed.
//!
//! The session holds the model's command sender. Dropping it (on shutdown)
//! closes the model connection; dropping the session drops the outbound
//! telephony sender, which lets the stream writer drain and close.

use crate::interruption::{InterruptionController, PlaybackState};
use crate::outbound::TelephonySender;
use crate::registry::{RegistryError, SessionHandle};
use crate::AppState;
use callbridge_calls::{complete_call, CallStoreError};
use callbridge_dialog::{
    instructions, CollectedFields, Conversation, Decision, Phase, Step, Transition,
};
use callbridge_tools::{
    definitions, ToolCall, ToolInvoker, ToolOutcome, ToolRequest, ToolResult, ToolWorker,
};
use callbridge_types::{BusinessProfile, Urgency};
use callbridge_voice::telephony::{StreamStart, TelephonyEvent};
use callbridge_voice::{
    FrameChunker, ModelCommand, ModelEvent, SessionConfig, ToolSpec, Transcoder,
    FRAME_DURATION_MS,
};
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const CONTROL_QUEUE_CAPACITY: usize = 8;
const TOOL_QUEUE_CAPACITY: usize = 8;
const MODEL_SEND_TIMEOUT: Duration = Duration::from_secs(1);

/// Spoken after the model connection drops and a new one is opened.
pub const RESUME_GREETING: &str =
    "Sorry about that, I lost you for a second. Could you say that last part again?";

/// Timing and capacity settings shared by every session.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub connect_timeout: Duration,
    pub start_timeout: Duration,
    pub shutdown_grace: Duration,
    pub tool_timeout: Duration,
    pub outbound_queue_frames: usize,
    pub fallback_message: String,
    pub goodbye_message: String,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            start_timeout: Duration::from_secs(10),
            shutdown_grace: Duration::from_secs(2),
            tool_timeout: Duration::from_secs(8),
            outbound_queue_frames: 600,
            fallback_message:
                "We're sorry, we're having technical difficulties. Please call back in a few minutes."
                    .to_string(),
            goodbye_message: "Sorry, this number is not set up to take calls. Goodbye.".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Initializing,
    Bridging,
    Active,
    Closing,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// The telephony side sent `stop`.
    CallerHungUp,
    /// The media websocket closed or sent a malformed frame.
    TelephonyClosed,
    /// A status callback reported the call as finished.
    CallEnded,
    /// The model could not be reached when the call started.
    ModelUnavailable,
    /// The model connection was lost and could not be re-established.
    ModelFailed,
    ServerShutdown,
}

impl ShutdownReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CallerHungUp => "caller_hung_up",
            Self::TelephonyClosed => "telephony_closed",
            Self::CallEnded => "call_ended",
            Self::ModelUnavailable => "model_unavailable",
            Self::ModelFailed => "model_failed",
            Self::ServerShutdown => "server_shutdown",
        }
    }
}

/// Messages delivered to a session from outside its media streams.
#[derive(Debug)]
pub enum SessionControl {
    Shutdown(ShutdownReason),
    Snapshot(oneshot::Sender<SessionSnapshot>),
}

/// Point-in-time view of a session, served by the sessions API.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub call_id: String,
    pub session_id: Uuid,
    pub stream_sid: String,
    pub business_id: String,
    pub phase: SessionPhase,
    pub conversation_phase: Phase,
    pub phase_history: Vec<Transition>,
    pub urgency: Urgency,
    pub playback: PlaybackState,
    pub pending_marks: usize,
    pub pending_tools: usize,
    pub fields: CollectedFields,
    pub turns: usize,
    pub reconnected: bool,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("telephony transport error: {0}")]
    Transport(String),

    #[error("voice model unavailable: {0}")]
    ModelUnavailable(String),

    #[error(transparent)]
    Configuration(#[from] CallStoreError),

    #[error("storage error: {0}")]
    Storage(String),

    #[error(transparent)]
    Duplicate(#[from] RegistryError),
}

/// The telephony half of a session: decoded caller frames in, queued
/// commands out.
#[derive(Debug)]
pub struct TelephonyLink {
    pub events: mpsc::Receiver<TelephonyEvent>,
    pub outbound: TelephonySender,
}

enum ModelFlow {
    Continue,
    Lost(String),
}

pub struct CallSession {
    state: Arc<AppState>,
    call_id: String,
    call_sid: String,
    stream_sid: String,
    session_id: Uuid,
    profile: BusinessProfile,
    phase: SessionPhase,
    conversation: Conversation,
    interruption: InterruptionController,
    transcoder: Transcoder,
    chunker: FrameChunker,
    /// Utterance whose audio is currently buffered in `chunker`.
    current_utterance: Option<String>,
    model_config: SessionConfig,
    model: Option<mpsc::Sender<ModelCommand>>,
    model_events: Option<mpsc::Receiver<ModelEvent>>,
    reconnected: bool,
    telephony: TelephonySender,
    telephony_events: Option<mpsc::Receiver<TelephonyEvent>>,
    tools: ToolWorker,
    tool_outcomes: Option<mpsc::Receiver<ToolOutcome>>,
    control: Option<mpsc::Receiver<SessionControl>>,
}

impl CallSession {
    /// Registers the session, opens the model connection and configures it.
    ///
    /// When the model cannot be reached in time the caller hears the
    /// fallback message, the call is recorded as failed and the session is
    /// torn down before this returns.
    pub async fn start(
        state: Arc<AppState>,
        profile: BusinessProfile,
        start: StreamStart,
        link: TelephonyLink,
    ) -> Result<Self, SessionError> {
        let call_id = start.call_id().to_string();
        let session_id = Uuid::new_v4();
        let (control_tx, control_rx) = mpsc::channel(CONTROL_QUEUE_CAPACITY);
        state.registry.register(
            &call_id,
            SessionHandle::new(session_id, &profile.business_id, control_tx),
        )?;
        info!(
            call_id,
            stream_sid = start.stream_sid,
            session_id = %session_id,
            business_id = profile.business_id,
            "call session registered"
        );

        let today = Utc::now().date_naive();
        let invoker = ToolInvoker::new(
            state.tools.clone(),
            profile.business_id.clone(),
            state.settings.tool_timeout,
        );
        let (tools, tool_outcomes) = ToolWorker::spawn(invoker, call_id.clone(), TOOL_QUEUE_CAPACITY);
        let model_config = SessionConfig {
            instructions: instructions(&profile, today),
            greeting: profile.greeting.clone(),
            voice: profile.voice.voice.clone(),
            temperature: profile.voice.temperature,
            audio_format: state.model_audio,
            turn_detection: profile.turn_detection,
            tools: definitions()
                .into_iter()
                .map(|d| ToolSpec {
                    name: d.name.to_string(),
                    description: d.description.to_string(),
                    parameters: d.parameters,
                })
                .collect(),
        };

        let mut session = Self {
            conversation: Conversation::new(&profile, today),
            transcoder: Transcoder::new(state.model_audio),
            state,
            call_id,
            call_sid: start.call_sid,
            stream_sid: start.stream_sid,
            session_id,
            profile,
            phase: SessionPhase::Initializing,
            interruption: InterruptionController::new(),
            chunker: FrameChunker::default(),
            current_utterance: None,
            model_config,
            model: None,
            model_events: None,
            reconnected: false,
            telephony: link.outbound,
            telephony_events: Some(link.events),
            tools,
            tool_outcomes: Some(tool_outcomes),
            control: Some(control_rx),
        };

        session.phase = SessionPhase::Bridging;
        match session.connect_model().await {
            Ok(()) => {
                session.phase = SessionPhase::Active;
                Ok(session)
            }
            Err(e) => {
                warn!(call_id = session.call_id, "voice model unavailable: {}", e);
                session.conversation.mark_failed();
                let message = session.state.settings.fallback_message.clone();
                session.hand_off(&message).await;
                session.shutdown(ShutdownReason::ModelUnavailable).await;
                Err(e)
            }
        }
    }

    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            call_id: self.call_id.clone(),
            session_id: self.session_id,
            stream_sid: self.stream_sid.clone(),
            business_id: self.profile.business_id.clone(),
            phase: self.phase,
            conversation_phase: self.conversation.phase(),
            phase_history: self.conversation.history().to_vec(),
            urgency: self.conversation.urgency(),
            playback: self.interruption.state().clone(),
            pending_marks: self.interruption.pending_marks(),
            pending_tools: self.tools.pending(),
            fields: self.conversation.fields().clone(),
            turns: self.conversation.turns().len(),
            reconnected: self.reconnected,
        }
    }

    /// Drives the session until it closes.
    pub async fn run(mut self) {
        let (Some(mut telephony), Some(mut control), Some(mut outcomes)) = (
            self.telephony_events.take(),
            self.control.take(),
            self.tool_outcomes.take(),
        ) else {
            self.shutdown(ShutdownReason::ServerShutdown).await;
            return;
        };
        let mut model_events = self.model_events.take();

        while self.phase != SessionPhase::Closed {
            tokio::select! {
                event = telephony.recv() => match event {
                    Some(event) => self.on_telephony_event(event).await,
                    None => self.shutdown(ShutdownReason::TelephonyClosed).await,
                },
                event = next_model_event(&mut model_events) => {
                    let flow = match event {
                        Some(event) => self.on_model_event(event).await,
                        None => ModelFlow::Lost("model connection closed".to_string()),
                    };
                    if let ModelFlow::Lost(reason) = flow {
                        model_events = self.on_model_lost(&reason).await;
                    }
                },
                Some(outcome) = outcomes.recv() => {
                    self.finish_tool(outcome.model_call_id, &outcome.call, outcome.result).await;
                },
                Some(message) = control.recv() => match message {
                    SessionControl::Shutdown(reason) => self.shutdown(reason).await,
                    SessionControl::Snapshot(reply) => {
                        let _ = reply.send(self.snapshot());
                    }
                },
            }
        }
        debug!(call_id = self.call_id, "call session loop finished");
    }

    async fn connect_model(&mut self) -> Result<(), SessionError> {
        let timeout = self.state.settings.connect_timeout;
        let override_model = self.profile.voice.model.clone();
        let connect = self.state.model.connect(override_model.as_deref());
        let connection = match tokio::time::timeout(timeout, connect).await {
            Ok(Ok(connection)) => connection,
            Ok(Err(e)) => return Err(SessionError::ModelUnavailable(e.to_string())),
            Err(_) => {
                return Err(SessionError::ModelUnavailable(format!(
                    "no connection within {} ms",
                    timeout.as_millis()
                )))
            }
        };
        connection
            .commands
            .send(ModelCommand::Configure(Box::new(self.model_config.clone())))
            .await
            .map_err(|_| SessionError::ModelUnavailable("connection closed during configuration".to_string()))?;
        info!(
            call_id = self.call_id,
            provider = self.state.model.provider(),
            "voice model connected"
        );
        self.model = Some(connection.commands);
        self.model_events = Some(connection.events);
        Ok(())
    }

    async fn on_telephony_event(&mut self, event: TelephonyEvent) {
        match event {
            TelephonyEvent::Media { audio, .. } => {
                let Some(model) = &self.model else {
                    return;
                };
                let audio = self.transcoder.to_model(&audio);
                if let Err(mpsc::error::TrySendError::Full(_)) =
                    model.try_send(ModelCommand::AppendAudio(audio))
                {
                    debug!(call_id = self.call_id, "model input queue full, dropping caller audio");
                }
            }
            TelephonyEvent::Mark { name } => self.interruption.on_mark_ack(&name),
            TelephonyEvent::Stop => self.shutdown(ShutdownReason::CallerHungUp).await,
            TelephonyEvent::Start(start) => {
                warn!(
                    call_id = self.call_id,
                    stream_sid = start.stream_sid,
                    "ignoring repeated start frame"
                );
            }
            TelephonyEvent::Dtmf { digit } => debug!(call_id = self.call_id, digit, "dtmf"),
            TelephonyEvent::Connected | TelephonyEvent::Other => {}
        }
    }

    async fn on_model_event(&mut self, event: ModelEvent) -> ModelFlow {
        match event {
            ModelEvent::SessionReady => debug!(call_id = self.call_id, "model session ready"),
            ModelEvent::AudioDelta { utterance_id, audio } => {
                if self.interruption.is_discarded(&utterance_id) {
                    return ModelFlow::Continue;
                }
                if self.current_utterance.as_deref() != Some(utterance_id.as_str()) {
                    // A new utterance never inherits a partial frame.
                    self.flush_utterance();
                    self.current_utterance = Some(utterance_id.clone());
                }
                let wire = self.transcoder.from_model(&audio);
                let frames = self.chunker.push(&wire);
                self.send_frames(&utterance_id, frames);
            }
            ModelEvent::ResponseDone => {
                self.flush_utterance();
                self.interruption.on_response_done();
                self.conversation.on_greeted();
            }
            ModelEvent::SpeechStarted => self.on_barge_in().await,
            ModelEvent::FunctionCall {
                call_id,
                name,
                arguments,
            } => self.on_function_call(call_id, &name, &arguments).await,
            ModelEvent::CallerTranscript { text } => {
                let step = self.conversation.on_caller_turn(&text, None, Utc::now());
                self.apply_step(step).await;
            }
            ModelEvent::AgentTranscript { text } => {
                self.conversation.on_greeted();
                self.conversation.on_agent_turn(&text, Utc::now());
            }
            ModelEvent::Ping { event_id } => self.send_model(ModelCommand::Pong { event_id }).await,
            ModelEvent::Error { message, fatal } => {
                if fatal {
                    return ModelFlow::Lost(message);
                }
                warn!(call_id = self.call_id, "voice model error: {}", message);
            }
        }
        ModelFlow::Continue
    }

    fn send_frames(&mut self, utterance_id: &str, frames: Vec<Vec<u8>>) {
        if frames.is_empty() {
            return;
        }
        let duration_ms = frames.len() as u64 * u64::from(FRAME_DURATION_MS);
        for frame in frames {
            self.telephony.send_audio(frame);
        }
        let mark = self.interruption.on_audio_sent(utterance_id, duration_ms);
        self.telephony.send_mark(mark);
    }

    fn flush_utterance(&mut self) {
        let Some(utterance_id) = self.current_utterance.take() else {
            return;
        };
        if let Some(frame) = self.chunker.flush() {
            if !self.interruption.is_discarded(&utterance_id) {
                self.send_frames(&utterance_id, vec![frame]);
            }
        }
    }

    async fn on_barge_in(&mut self) {
        self.chunker.reset();
        self.transcoder.reset();
        self.current_utterance = None;
        let Some(truncation) = self.interruption.on_speech_started() else {
            return;
        };
        info!(
            call_id = self.call_id,
            utterance_id = truncation.utterance_id,
            audio_end_ms = truncation.audio_end_ms,
            "caller interrupted agent"
        );
        self.telephony.clear().await;
        self.send_model(ModelCommand::Truncate {
            utterance_id: truncation.utterance_id,
            audio_end_ms: truncation.audio_end_ms,
        })
        .await;
    }

    async fn on_function_call(&mut self, model_call_id: String, name: &str, arguments: &serde_json::Value) {
        let call = match ToolCall::parse(name, arguments) {
            Ok(call) => call,
            Err(e) => {
                warn!(call_id = self.call_id, tool = name, "rejected tool call: {}", e);
                let step = self.conversation.on_invalid_arguments(name, &e.to_string());
                let mut output = json!({ "success": false, "error": e.to_string() });
                if let Some(say) = step.say {
                    output["message"] = json!(say);
                }
                self.send_model(ModelCommand::ToolResult {
                    call_id: model_call_id,
                    output,
                })
                .await;
                return;
            }
        };
        match self.conversation.on_function_call(&call) {
            Decision::Allow(call) => self.submit(Some(model_call_id), call).await,
            Decision::Reject(reason) => {
                info!(call_id = self.call_id, tool = %call.name(), reason, "tool call refused");
                self.send_model(ModelCommand::ToolResult {
                    call_id: model_call_id,
                    output: json!({ "success": false, "message": reason }),
                })
                .await;
            }
        }
    }

    async fn apply_step(&mut self, step: Step) {
        if let Some(text) = step.note {
            self.send_model(ModelCommand::Context { text }).await;
        }
        if let Some(say) = step.say {
            self.send_model(ModelCommand::Respond {
                instructions: Some(say),
            })
            .await;
        }
        if let Some(call) = step.action {
            self.submit(None, call).await;
        }
    }

    async fn submit(&mut self, model_call_id: Option<String>, call: ToolCall) {
        let request = ToolRequest {
            model_call_id: model_call_id.clone(),
            call: call.clone(),
        };
        if let Err(e) = self.tools.submit(request) {
            warn!(call_id = self.call_id, tool = %call.name(), "{}", e);
            let result = ToolResult::fallback(call.name());
            self.finish_tool(model_call_id, &call, result).await;
        }
    }

    async fn finish_tool(&mut self, model_call_id: Option<String>, call: &ToolCall, result: ToolResult) {
        let step = self.conversation.on_action_result(&result);
        match model_call_id {
            // The model speaks from the function output itself.
            Some(call_id) => {
                self.send_model(ModelCommand::ToolResult {
                    call_id,
                    output: result.to_model_output(),
                })
                .await
            }
            None => {
                if let Some(say) = step.say {
                    self.send_model(ModelCommand::Respond {
                        instructions: Some(say),
                    })
                    .await;
                }
            }
        }

        if let ToolCall::TransferCall(args) = call {
            if result.success {
                self.start_transfer(&result, args.is_emergency);
            }
        }
    }

    fn start_transfer(&self, result: &ToolResult, is_emergency: bool) {
        let number = result
            .data
            .get("transferNumber")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .or_else(|| self.profile.emergency_transfer_number.clone());
        let Some(number) = number else {
            warn!(call_id = self.call_id, "transfer approved without a number to dial");
            return;
        };
        info!(call_id = self.call_id, is_emergency, "transferring caller");
        let control = self.state.call_control.clone();
        let call_sid = self.call_sid.clone();
        let message = result.spoken_message.clone();
        tokio::spawn(async move {
            if let Err(e) = control.transfer(&call_sid, &message, &number).await {
                error!(call_sid, "transfer failed: {}", e);
            }
        });
    }

    /// Handles a lost model connection: one reconnect, then the call is
    /// handed off and the session ends.
    async fn on_model_lost(&mut self, reason: &str) -> Option<mpsc::Receiver<ModelEvent>> {
        warn!(call_id = self.call_id, reason, "voice model connection lost");
        self.model = None;
        if matches!(self.phase, SessionPhase::Closing | SessionPhase::Closed) {
            return None;
        }

        if !self.reconnected {
            self.reconnected = true;
            self.chunker.reset();
            self.transcoder.reset();
            self.current_utterance = None;
            if self.interruption.is_speaking() {
                self.telephony.clear().await;
            }
            self.interruption.reset();
            self.model_config.greeting = RESUME_GREETING.to_string();
            match self.connect_model().await {
                Ok(()) => return self.model_events.take(),
                Err(e) => warn!(call_id = self.call_id, "voice model reconnect failed: {}", e),
            }
        }

        self.conversation.mark_failed();
        let message = self.state.settings.fallback_message.clone();
        self.hand_off(&message).await;
        self.shutdown(ShutdownReason::ModelFailed).await;
        None
    }

    /// Takes the call away from the stream: to the emergency contact if
    /// one is configured, otherwise a spoken message and hangup.
    async fn hand_off(&self, message: &str) {
        let control = &self.state.call_control;
        let result = match &self.profile.emergency_transfer_number {
            Some(number) => control.transfer(&self.call_sid, message, number).await,
            None => control.hangup_with_message(&self.call_sid, message).await,
        };
        if let Err(e) = result {
            error!(call_id = self.call_id, "failed to hand off call: {}", e);
        }
    }

    async fn send_model(&self, command: ModelCommand) {
        let Some(model) = &self.model else {
            return;
        };
        if tokio::time::timeout(MODEL_SEND_TIMEOUT, model.send(command))
            .await
            .is_err()
        {
            warn!(call_id = self.call_id, "model command queue stalled, dropping command");
        }
    }

    /// Closes the session. Safe to call more than once.
    pub async fn shutdown(&mut self, reason: ShutdownReason) {
        if matches!(self.phase, SessionPhase::Closing | SessionPhase::Closed) {
            return;
        }
        self.phase = SessionPhase::Closing;
        info!(
            call_id = self.call_id,
            session_id = %self.session_id,
            reason = reason.as_str(),
            "closing call session"
        );
        self.model = None;
        self.model_events = None;
        self.chunker.reset();
        self.interruption.reset();
        self.conversation.close();
        self.persist().await;
        self.state.registry.remove(&self.call_id, self.session_id);
        self.phase = SessionPhase::Closed;
    }

    async fn persist(&self) {
        let pool = self.state.pool.clone();
        let call_id = self.call_id.clone();
        let outcome = self.conversation.outcome();
        let transcript = self.conversation.transcript_json();
        let result = tokio::task::spawn_blocking(move || -> Result<bool, String> {
            let conn = pool.get().map_err(|e| format!("failed to get db connection: {e}"))?;
            match complete_call(&conn, &call_id, outcome, &transcript) {
                Ok(()) => Ok(true),
                Err(CallStoreError::CallNotFound(_)) => Ok(false),
                Err(e) => Err(e.to_string()),
            }
        })
        .await;
        match result {
            Ok(Ok(true)) => info!(call_id = self.call_id, outcome = outcome.as_str(), "call record completed"),
            Ok(Ok(false)) => debug!(call_id = self.call_id, "no call record to complete"),
            Ok(Err(e)) => error!(call_id = self.call_id, "failed to complete call record: {}", e),
            Err(e) => error!(call_id = self.call_id, "call record task panicked: {}", e),
        }
    }
}

async fn next_model_event(events: &mut Option<mpsc::Receiver<ModelEvent>>) -> Option<ModelEvent> {
    match events {
        Some(events) => events.recv().await,
        None => std::future::pending().await,
    }
}
