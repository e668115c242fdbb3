#![allow(dead_code)]

use async_trait::async_trait;
use callbridge_calls::{upsert_business, upsert_call, NewCall};
use callbridge_server::call_control::{CallControl, CallControlError};
use callbridge_server::outbound::{OutboundQueue, TelephonySender};
use callbridge_server::registry::SessionRegistry;
use callbridge_server::session::{CallSession, SessionError, SessionSettings, TelephonyLink};
use callbridge_server::AppState;
use callbridge_tools::{
    BackendReply, BookAppointmentArgs, CheckAvailabilityArgs, CreateMessageArgs, RequestContext,
    ToolBackend, ToolError, TransferCallArgs,
};
use callbridge_types::{BusinessProfile, TurnDetection, VoiceSettings};
use callbridge_voice::telephony::{StreamStart, TelephonyEvent, CALL_ID_PARAMETER};
use callbridge_voice::{AudioFormat, ModelCommand, ModelConnection, ModelEvent, VoiceError, VoiceModelAdapter};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;

pub const BUSINESS_ID: &str = "acme-hvac";
pub const BUSINESS_NUMBER: &str = "+15550100";
pub const EMERGENCY_NUMBER: &str = "+15550199";

pub fn profile() -> BusinessProfile {
    BusinessProfile {
        business_id: BUSINESS_ID.to_string(),
        name: "Acme Heating & Air".to_string(),
        phone_number: BUSINESS_NUMBER.to_string(),
        agent_name: "Sam".to_string(),
        greeting: "Thanks for calling Acme Heating and Air, this is Sam.".to_string(),
        business_hours: "Mon-Sat 8am-6pm".to_string(),
        emergency_keywords: vec![],
        transfer_keywords: vec![],
        emergency_transfer_number: Some(EMERGENCY_NUMBER.to_string()),
        voice: VoiceSettings::default(),
        turn_detection: TurnDetection::default(),
    }
}

/// The far end of one fake model connection.
pub struct ModelPeer {
    pub commands: mpsc::Receiver<ModelCommand>,
    pub events: mpsc::Sender<ModelEvent>,
}

impl ModelPeer {
    /// Next command, skipping caller audio.
    pub async fn next_command(&mut self) -> ModelCommand {
        loop {
            let command = tokio::time::timeout(Duration::from_secs(2), self.commands.recv())
                .await
                .expect("timed out waiting for a model command")
                .expect("model connection closed");
            if !matches!(command, ModelCommand::AppendAudio(_)) {
                return command;
            }
        }
    }

    pub async fn emit(&self, event: ModelEvent) {
        self.events.send(event).await.expect("session stopped reading model events");
    }
}

/// Hands every connection's far end to the test.
pub struct FakeModel {
    peers: mpsc::UnboundedSender<ModelPeer>,
    unreachable: bool,
}

impl FakeModel {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ModelPeer>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                peers: tx,
                unreachable: false,
            },
            rx,
        )
    }

    /// A model whose connect never completes.
    pub fn unreachable() -> (Self, mpsc::UnboundedReceiver<ModelPeer>) {
        let (mut model, rx) = Self::new();
        model.unreachable = true;
        (model, rx)
    }
}

#[async_trait]
impl VoiceModelAdapter for FakeModel {
    fn provider(&self) -> &'static str {
        "fake"
    }

    async fn connect(&self, _model: Option<&str>) -> Result<ModelConnection, VoiceError> {
        if self.unreachable {
            std::future::pending::<()>().await;
        }
        let (command_tx, command_rx) = mpsc::channel(256);
        let (event_tx, event_rx) = mpsc::channel(256);
        let _ = self.peers.send(ModelPeer {
            commands: command_rx,
            events: event_tx,
        });
        Ok(ModelConnection {
            commands: command_tx,
            events: event_rx,
        })
    }
}

/// Records backend requests; replies after `delay`.
pub struct FakeToolBackend {
    pub delay: Duration,
    pub transfer_number: Option<String>,
    calls: Mutex<Vec<(String, Value)>>,
}

impl FakeToolBackend {
    pub fn new() -> Self {
        Self::with_delay(Duration::ZERO)
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            transfer_number: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, tool: &str) -> usize {
        self.calls().iter().filter(|(t, _)| t == tool).count()
    }

    async fn record(&self, tool: &str, args: Value, reply: BackendReply) -> Result<BackendReply, ToolError> {
        self.calls.lock().unwrap().push((tool.to_string(), args));
        tokio::time::sleep(self.delay).await;
        Ok(reply)
    }
}

#[async_trait]
impl ToolBackend for FakeToolBackend {
    async fn check_availability(
        &self,
        _ctx: &RequestContext,
        args: &CheckAvailabilityArgs,
    ) -> Result<BackendReply, ToolError> {
        let reply = BackendReply {
            success: true,
            slots: vec!["09:00".to_string(), "14:00".to_string()],
            ..BackendReply::default()
        };
        self.record("check_availability", json!(args), reply).await
    }

    async fn book_appointment(
        &self,
        _ctx: &RequestContext,
        args: &BookAppointmentArgs,
    ) -> Result<BackendReply, ToolError> {
        let reply = BackendReply {
            success: true,
            message: format!("You're booked for {} at {}.", args.date, args.time),
            appointment_id: Some("apt_1".to_string()),
            ..BackendReply::default()
        };
        self.record("book_appointment", json!(args), reply).await
    }

    async fn create_message(
        &self,
        _ctx: &RequestContext,
        args: &CreateMessageArgs,
    ) -> Result<BackendReply, ToolError> {
        let reply = BackendReply {
            success: true,
            message_id: Some("msg_1".to_string()),
            ..BackendReply::default()
        };
        self.record("create_message", json!(args), reply).await
    }

    async fn transfer_call(
        &self,
        _ctx: &RequestContext,
        args: &TransferCallArgs,
    ) -> Result<BackendReply, ToolError> {
        let reply = BackendReply {
            success: true,
            message: "Connecting you now.".to_string(),
            transfer_number: self.transfer_number.clone(),
            ..BackendReply::default()
        };
        self.record("transfer_call", json!(args), reply).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlAction {
    Hangup { call_sid: String, message: String },
    Transfer { call_sid: String, message: String, number: String },
}

#[derive(Default)]
pub struct FakeCallControl {
    actions: Mutex<Vec<ControlAction>>,
}

impl FakeCallControl {
    pub fn actions(&self) -> Vec<ControlAction> {
        self.actions.lock().unwrap().clone()
    }
}

#[async_trait]
impl CallControl for FakeCallControl {
    async fn hangup_with_message(&self, call_sid: &str, message: &str) -> Result<(), CallControlError> {
        self.actions.lock().unwrap().push(ControlAction::Hangup {
            call_sid: call_sid.to_string(),
            message: message.to_string(),
        });
        Ok(())
    }

    async fn transfer(&self, call_sid: &str, message: &str, number: &str) -> Result<(), CallControlError> {
        self.actions.lock().unwrap().push(ControlAction::Transfer {
            call_sid: call_sid.to_string(),
            message: message.to_string(),
            number: number.to_string(),
        });
        Ok(())
    }
}

/// A server state backed by a temporary database holding one business.
pub struct TestEnv {
    _dir: TempDir,
    pub state: AppState,
    pub peers: mpsc::UnboundedReceiver<ModelPeer>,
    pub backend: Arc<FakeToolBackend>,
    pub control: Arc<FakeCallControl>,
}

pub struct EnvOptions {
    pub model: (FakeModel, mpsc::UnboundedReceiver<ModelPeer>),
    pub backend: FakeToolBackend,
    pub settings: SessionSettings,
    pub profile: BusinessProfile,
}

impl Default for EnvOptions {
    fn default() -> Self {
        Self {
            model: FakeModel::new(),
            backend: FakeToolBackend::new(),
            settings: SessionSettings {
                connect_timeout: Duration::from_millis(500),
                start_timeout: Duration::from_secs(2),
                shutdown_grace: Duration::from_millis(200),
                tool_timeout: Duration::from_secs(2),
                ..SessionSettings::default()
            },
            profile: profile(),
        }
    }
}

impl TestEnv {
    pub fn new() -> Self {
        Self::with(EnvOptions::default())
    }

    pub fn with(options: EnvOptions) -> Self {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("callbridge.db");
        let (pool, _) =
            callbridge_db::open(path.to_str().unwrap(), callbridge_db::DbRuntimeSettings::default())
                .unwrap();
        {
            let conn = pool.get().unwrap();
            upsert_business(&conn, &options.profile).unwrap();
        }
        let (model, peers) = options.model;
        let backend = Arc::new(options.backend);
        let control = Arc::new(FakeCallControl::default());
        let state = AppState {
            pool,
            registry: SessionRegistry::new(),
            model: Arc::new(model),
            model_audio: AudioFormat::G711Ulaw,
            tools: backend.clone(),
            call_control: control.clone(),
            settings: options.settings,
            public_url: "https://bridge.example.com".to_string(),
        };
        Self {
            _dir: dir,
            state,
            peers,
            backend,
            control,
        }
    }

    /// Stores the call record the call-start webhook would have written.
    pub fn record_call(&self, call_sid: &str) {
        let conn = self.state.pool.get().unwrap();
        upsert_call(
            &conn,
            &NewCall {
                call_sid: call_sid.to_string(),
                business_id: BUSINESS_ID.to_string(),
                from_number: "+15557654321".to_string(),
                to_number: BUSINESS_NUMBER.to_string(),
            },
        )
        .unwrap();
    }

    pub async fn next_peer(&mut self) -> ModelPeer {
        tokio::time::timeout(Duration::from_secs(2), self.peers.recv())
            .await
            .expect("timed out waiting for a model connection")
            .expect("model adapter dropped")
    }
}

pub fn stream_start(call_id: &str) -> StreamStart {
    StreamStart {
        stream_sid: format!("MZ-{call_id}"),
        call_sid: call_id.to_string(),
        account_sid: Some("AC1".to_string()),
        custom_parameters: HashMap::from([(CALL_ID_PARAMETER.to_string(), call_id.to_string())]),
        media_format: None,
    }
}

/// A session wired to in-memory telephony channels instead of a websocket.
pub struct SessionRig {
    pub telephony: mpsc::Sender<TelephonyEvent>,
    pub outbound: OutboundQueue,
}

pub async fn start_session(
    env: &TestEnv,
    call_id: &str,
) -> Result<(CallSession, SessionRig), SessionError> {
    let (outbound_tx, outbound) = TelephonySender::channel(256);
    let (telephony, events) = mpsc::channel(64);
    let session = CallSession::start(
        Arc::new(env.state.clone()),
        profile_for(env),
        stream_start(call_id),
        TelephonyLink {
            events,
            outbound: outbound_tx,
        },
    )
    .await?;
    Ok((session, SessionRig { telephony, outbound }))
}

fn profile_for(env: &TestEnv) -> BusinessProfile {
    let conn = env.state.pool.get().unwrap();
    callbridge_calls::get_business(&conn, BUSINESS_ID).unwrap()
}

/// Polls `check` until it returns true or two seconds pass.
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met within two seconds");
}
