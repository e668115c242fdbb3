mod common;

use base64::Engine;
use callbridge_server::app;
use callbridge_voice::{ModelCommand, ModelEvent};
use common::*;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Serves the full router on an ephemeral port and returns its address.
async fn serve(env: &TestEnv) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = app(env.state.clone());
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr.to_string()
}

async fn open_stream(addr: &str, call_id: &str) -> Client {
    let url = format!("ws://{addr}/media/{BUSINESS_ID}");
    let (mut ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    let frames = [
        json!({ "event": "connected", "protocol": "Call", "version": "1.0.0" }),
        json!({
            "event": "start",
            "sequenceNumber": "1",
            "start": {
                "streamSid": format!("MZ-{call_id}"),
                "callSid": call_id,
                "accountSid": "AC1",
                "tracks": ["inbound"],
                "customParameters": { "callId": call_id },
                "mediaFormat": { "encoding": "audio/x-mulaw", "sampleRate": 8000, "channels": 1 }
            },
            "streamSid": format!("MZ-{call_id}")
        }),
    ];
    for frame in frames {
        ws.send(Message::Text(frame.to_string().into())).await.unwrap();
    }
    ws
}

/// Next text frame from the bridge, parsed.
async fn next_frame(ws: &mut Client) -> Value {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("stream ended")
            .unwrap();
        if let Message::Text(text) = message {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

#[tokio::test]
async fn media_stream_bridges_audio_both_ways() {
    let mut env = TestEnv::new();
    env.record_call("CA300");
    let addr = serve(&env).await;
    let mut ws = open_stream(&addr, "CA300").await;

    let mut peer = env.next_peer().await;
    assert!(matches!(peer.next_command().await, ModelCommand::Configure(_)));
    let registry = env.state.registry.clone();
    eventually(|| {
        let registry = registry.clone();
        async move { registry.get("CA300").is_some() }
    })
    .await;

    let payload = base64::engine::general_purpose::STANDARD.encode([0xFFu8; 160]);
    ws.send(Message::Text(
        json!({
            "event": "media",
            "streamSid": "MZ-CA300",
            "media": { "track": "inbound", "chunk": "1", "timestamp": "20", "payload": payload }
        })
        .to_string()
        .into(),
    ))
    .await
    .unwrap();
    let forwarded = tokio::time::timeout(Duration::from_secs(2), peer.commands.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(forwarded, ModelCommand::AppendAudio(vec![0xFF; 160]));

    peer.emit(ModelEvent::AudioDelta {
        utterance_id: "item_1".to_string(),
        audio: vec![0x7F; 320],
    })
    .await;
    for _ in 0..2 {
        let frame = next_frame(&mut ws).await;
        assert_eq!(frame["event"], "media");
        assert_eq!(frame["streamSid"], "MZ-CA300");
        let audio = base64::engine::general_purpose::STANDARD
            .decode(frame["media"]["payload"].as_str().unwrap())
            .unwrap();
        assert_eq!(audio, vec![0x7F; 160]);
    }
    let mark = next_frame(&mut ws).await;
    assert_eq!(mark["event"], "mark");
    assert_eq!(mark["mark"]["name"], "m1");

    ws.send(Message::Text(
        json!({ "event": "stop", "streamSid": "MZ-CA300", "stop": { "callSid": "CA300" } })
            .to_string()
            .into(),
    ))
    .await
    .unwrap();

    eventually(|| {
        let registry = registry.clone();
        async move { registry.is_empty() }
    })
    .await;
    let conn = env.state.pool.get().unwrap();
    let record = callbridge_calls::get_call(&conn, "CA300").unwrap();
    assert_eq!(record.outcome.as_deref(), Some("completed"));
}

#[tokio::test]
async fn second_stream_for_same_call_is_refused() {
    let mut env = TestEnv::new();
    let addr = serve(&env).await;
    let _first = open_stream(&addr, "CA301").await;
    let _peer = env.next_peer().await;

    let mut second = open_stream(&addr, "CA301").await;
    let closed = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match second.next().await {
                None | Some(Err(_)) | Some(Ok(Message::Close(_))) => break,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await;
    assert!(closed.is_ok(), "duplicate stream should be closed");
    assert_eq!(env.state.registry.len(), 1);
    assert!(env.control.actions().is_empty());
}

#[tokio::test]
async fn stream_for_unknown_business_is_hung_up() {
    let env = TestEnv::new();
    let addr = serve(&env).await;
    let url = format!("ws://{addr}/media/no-such-business");
    let (mut ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    ws.send(Message::Text(
        json!({
            "event": "start",
            "start": {
                "streamSid": "MZ-CA302",
                "callSid": "CA302",
                "customParameters": { "callId": "CA302" }
            }
        })
        .to_string()
        .into(),
    ))
    .await
    .unwrap();

    let control = env.control.clone();
    eventually(|| {
        let control = control.clone();
        async move { !control.actions().is_empty() }
    })
    .await;
    assert_eq!(
        env.control.actions(),
        vec![ControlAction::Hangup {
            call_sid: "CA302".to_string(),
            message: env.state.settings.goodbye_message.clone(),
        }]
    );
    assert!(env.state.registry.is_empty());
}
