//! Telephony media stream endpoint.
//!
//! The provider opens `GET /media/{businessId}` after the call-start
//! webhook. The socket is split: a reader task decodes inbound frames onto
//! a bounded channel and a writer task drains the session's outbound queue,
//! so the session itself never waits on the network.

use crate::outbound::TelephonySender;
use crate::session::{CallSession, SessionError, TelephonyLink};
use crate::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Extension, Path,
    },
    response::Response,
};
use callbridge_calls::{get_business, CallStoreError};
use callbridge_types::BusinessProfile;
use callbridge_voice::telephony::{decode_frame, StreamStart, TelephonyEvent};
use futures_util::{future, stream::SplitStream, SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Inbound frames buffered between the socket reader and the session.
const INBOUND_QUEUE_CAPACITY: usize = 256;

/// Handler for `GET /media/{businessId}`.
pub async fn media_stream_handler(
    ws: WebSocketUpgrade,
    Extension(state): Extension<Arc<AppState>>,
    Path(business_id): Path<String>,
) -> Response {
    ws.on_upgrade(move |socket| handle_media_socket(socket, state, business_id))
}

async fn handle_media_socket(socket: WebSocket, state: Arc<AppState>, business_id: String) {
    let (mut sender, mut receiver) = socket.split();

    let start = match wait_for_start(&mut receiver, state.settings.start_timeout).await {
        Ok(start) => start,
        Err(e) => {
            tracing::warn!(business_id, "media stream ended before start: {}", e);
            let _ = sender.close().await;
            return;
        }
    };
    let call_id = start.call_id().to_string();
    tracing::info!(call_id, stream_id = start.stream_sid, business_id, "media stream started");

    let profile = match load_profile(&state, &business_id).await {
        Ok(profile) => profile,
        Err(SessionError::Configuration(CallStoreError::ConfigurationMissing(_))) => {
            tracing::warn!(call_id, business_id, "no business profile for media stream");
            end_call(&state, &start.call_sid, &state.settings.goodbye_message).await;
            let _ = sender.close().await;
            return;
        }
        Err(e) => {
            tracing::error!(call_id, business_id, "failed to load business profile: {}", e);
            end_call(&state, &start.call_sid, &state.settings.fallback_message).await;
            let _ = sender.close().await;
            return;
        }
    };

    let (outbound, queue) = TelephonySender::channel(state.settings.outbound_queue_frames);
    let stream_sid = start.stream_sid.clone();
    let mut write_task = tokio::spawn(async move {
        let sink = sender.with(|text: String| future::ready(Ok::<_, axum::Error>(Message::Text(text.into()))));
        queue.write_to(&stream_sid, sink).await;
    });

    let (events_tx, events_rx) = mpsc::channel(INBOUND_QUEUE_CAPACITY);
    let reader_call_id = call_id.clone();
    let read_task = tokio::spawn(async move {
        while let Some(message) = receiver.next().await {
            let text = match message {
                Ok(Message::Text(text)) => text,
                Ok(Message::Close(_)) => break,
                Ok(_) => continue,
                Err(e) => {
                    tracing::debug!(call_id = reader_call_id, "media socket error: {}", e);
                    break;
                }
            };
            match decode_frame(text.as_str()) {
                Ok(event) => {
                    let stop = matches!(event, TelephonyEvent::Stop);
                    if events_tx.send(event).await.is_err() || stop {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(call_id = reader_call_id, "malformed telephony frame: {}", e);
                    break;
                }
            }
        }
    });

    let link = TelephonyLink {
        events: events_rx,
        outbound,
    };
    match CallSession::start(state.clone(), profile, start, link).await {
        Ok(session) => session.run().await,
        Err(SessionError::Duplicate(e)) => tracing::warn!(call_id, "refusing media stream: {}", e),
        Err(e) => tracing::warn!(call_id, "call session did not start: {}", e),
    }

    read_task.abort();
    if tokio::time::timeout(state.settings.shutdown_grace, &mut write_task)
        .await
        .is_err()
    {
        tracing::debug!(call_id, "outbound writer did not drain in time");
        write_task.abort();
    }
    tracing::info!(call_id, "media stream closed");
}

/// Reads frames until the `start` frame arrives.
async fn wait_for_start(
    receiver: &mut SplitStream<WebSocket>,
    timeout: Duration,
) -> Result<StreamStart, SessionError> {
    let wait = async {
        while let Some(message) = receiver.next().await {
            let text = match message {
                Ok(Message::Text(text)) => text,
                Ok(Message::Close(_)) => return Err("socket closed".to_string()),
                Ok(_) => continue,
                Err(e) => return Err(e.to_string()),
            };
            match decode_frame(text.as_str()) {
                Ok(TelephonyEvent::Start(start)) => return Ok(start),
                Ok(TelephonyEvent::Stop) => return Err("stream stopped".to_string()),
                Ok(_) => continue,
                Err(e) => return Err(e.to_string()),
            }
        }
        Err("socket closed".to_string())
    };
    tokio::time::timeout(timeout, wait)
        .await
        .map_err(|_| format!("no start frame within {} ms", timeout.as_millis()))
        .and_then(|r| r)
        .map_err(SessionError::Transport)
}

async fn load_profile(
    state: &Arc<AppState>,
    business_id: &str,
) -> Result<BusinessProfile, SessionError> {
    let pool = state.pool.clone();
    let business_id = business_id.to_string();
    tokio::task::spawn_blocking(move || -> Result<BusinessProfile, SessionError> {
        let conn = pool
            .get()
            .map_err(|e| SessionError::Storage(format!("db connection failed: {}", e)))?;
        Ok(get_business(&conn, &business_id)?)
    })
    .await
    .map_err(|e| SessionError::Storage(format!("task join error: {}", e)))?
}

async fn end_call(state: &AppState, call_sid: &str, message: &str) {
    if let Err(e) = state.call_control.hangup_with_message(call_sid, message).await {
        tracing::error!(call_sid, "failed to end call: {}", e);
    }
}
