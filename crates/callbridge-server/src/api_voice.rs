//! Telephony provider webhooks.
//!
//! `POST /voice/incoming` answers a new call with TwiML that either opens a
//! media stream to this server or apologises and hangs up. `POST
//! /voice/status` tracks the provider's view of the call and ends the live
//! session once the call is over.

use crate::api::ApiError;
use crate::call_control::{say_and_hangup_twiml, xml_escape};
use crate::session::{SessionControl, ShutdownReason};
use crate::AppState;
use axum::{
    extract::{Extension, Form},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use callbridge_calls::{find_business_by_number, update_call_status, upsert_call, CallStoreError, NewCall};
use callbridge_types::{BusinessProfile, CallStatus};
use callbridge_voice::telephony::CALL_ID_PARAMETER;
use serde::Deserialize;
use std::sync::Arc;

/// Form fields of the call-start webhook.
#[derive(Debug, Deserialize)]
pub struct IncomingCallForm {
    #[serde(rename = "CallSid")]
    pub call_sid: String,
    #[serde(rename = "From", default)]
    pub from: String,
    #[serde(rename = "To")]
    pub to: String,
}

/// Form fields of the status callback.
#[derive(Debug, Deserialize)]
pub struct CallStatusForm {
    #[serde(rename = "CallSid")]
    pub call_sid: String,
    #[serde(rename = "CallStatus")]
    pub call_status: String,
}

struct Twiml(String);

impl IntoResponse for Twiml {
    fn into_response(self) -> Response {
        ([(header::CONTENT_TYPE, "text/xml")], self.0).into_response()
    }
}

/// Websocket URL of the media endpoint for `business_id`.
pub fn media_stream_url(public_url: &str, business_id: &str) -> String {
    let base = public_url.trim_end_matches('/');
    let base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base.to_string()
    };
    format!("{base}/media/{business_id}")
}

pub fn connect_stream_twiml(stream_url: &str, call_id: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?><Response><Connect><Stream url=\"{}\"><Parameter name=\"{}\" value=\"{}\"/></Stream></Connect></Response>",
        xml_escape(stream_url),
        CALL_ID_PARAMETER,
        xml_escape(call_id)
    )
}

/// Handler for `POST /voice/incoming`.
pub async fn incoming_call_handler(
    Extension(state): Extension<Arc<AppState>>,
    Form(form): Form<IncomingCallForm>,
) -> Result<Response, ApiError> {
    if form.call_sid.trim().is_empty() {
        return Err(ApiError::BadRequest("CallSid is required".to_string()));
    }

    let db_state = state.clone();
    let call_sid = form.call_sid.clone();
    let profile = tokio::task::spawn_blocking(move || -> Result<Option<BusinessProfile>, ApiError> {
        let conn = db_state
            .pool
            .get()
            .map_err(|e| ApiError::InternalServerError(format!("db connection failed: {}", e)))?;

        let profile = match find_business_by_number(&conn, &form.to) {
            Ok(profile) => profile,
            Err(CallStoreError::ConfigurationMissing(_)) => return Ok(None),
            Err(e) => return Err(ApiError::InternalServerError(e.to_string())),
        };

        let upserted = upsert_call(
            &conn,
            &NewCall {
                call_sid: form.call_sid,
                business_id: profile.business_id.clone(),
                from_number: form.from,
                to_number: form.to,
            },
        )
        .map_err(|e| ApiError::InternalServerError(e.to_string()))?;
        if !upserted.created {
            tracing::info!(
                call_id = upserted.record.call_sid,
                deliveries = upserted.record.delivery_count,
                "call-start webhook redelivered"
            );
        }
        Ok(Some(profile))
    })
    .await
    .map_err(|e| ApiError::InternalServerError(format!("task join error: {}", e)))??;

    let Some(profile) = profile else {
        tracing::warn!(call_id = call_sid, "no business configured for dialed number");
        return Ok(Twiml(say_and_hangup_twiml(&state.settings.goodbye_message)).into_response());
    };

    tracing::info!(call_id = call_sid, business_id = profile.business_id, "answering call");
    let url = media_stream_url(&state.public_url, &profile.business_id);
    Ok(Twiml(connect_stream_twiml(&url, &call_sid)).into_response())
}

/// Handler for `POST /voice/status`.
pub async fn call_status_handler(
    Extension(state): Extension<Arc<AppState>>,
    Form(form): Form<CallStatusForm>,
) -> Result<StatusCode, ApiError> {
    let status: CallStatus = form
        .call_status
        .parse()
        .map_err(ApiError::BadRequest)?;

    let db_state = state.clone();
    let call_sid = form.call_sid.clone();
    let known = tokio::task::spawn_blocking(move || {
        let conn = db_state
            .pool
            .get()
            .map_err(|e| ApiError::InternalServerError(format!("db connection failed: {}", e)))?;
        update_call_status(&conn, &call_sid, status)
            .map_err(|e| ApiError::InternalServerError(e.to_string()))
    })
    .await
    .map_err(|e| ApiError::InternalServerError(format!("task join error: {}", e)))??;

    tracing::debug!(
        call_id = form.call_sid,
        status = status.as_str(),
        known,
        "call status update"
    );

    if status.is_terminal() {
        if let Some(handle) = state.registry.get(&form.call_sid) {
            if !handle.send(SessionControl::Shutdown(ShutdownReason::CallEnded)) {
                tracing::debug!(call_id = form.call_sid, "session already closing");
            }
        }
    }
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_url_switches_to_websocket_scheme() {
        assert_eq!(
            media_stream_url("https://bridge.example.com/", "acme"),
            "wss://bridge.example.com/media/acme"
        );
        assert_eq!(
            media_stream_url("http://127.0.0.1:8080", "acme"),
            "ws://127.0.0.1:8080/media/acme"
        );
    }

    #[test]
    fn connect_twiml_carries_call_id_parameter() {
        let twiml = connect_stream_twiml("wss://b.example/media/acme", "CA1&2");
        assert!(twiml.contains("<Stream url=\"wss://b.example/media/acme\">"));
        assert!(twiml.contains("<Parameter name=\"callId\" value=\"CA1&amp;2\"/>"));
    }
}
