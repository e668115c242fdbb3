//! Turns model function calls into backend requests and spoken results.

use crate::backend::{dispatch, RequestContext, ToolBackend};
use crate::error::ToolError;
use crate::schema::{ToolCall, ToolName};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Spoken when a backend call fails for any reason.
pub const FALLBACK_MESSAGE: &str =
    "I'm sorry, I wasn't able to do that right now. Let me take your information and have someone call you back.";

/// Outcome of a tool invocation, ready to be spoken.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    pub tool: ToolName,
    pub success: bool,
    pub spoken_message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference_id: Option<String>,
    /// Structured backend reply, or `null` after a failure.
    pub data: Value,
}

impl ToolResult {
    /// The result returned when the backend could not be reached.
    pub fn fallback(tool: ToolName) -> Self {
        Self {
            tool,
            success: false,
            spoken_message: FALLBACK_MESSAGE.to_string(),
            reference_id: None,
            data: Value::Null,
        }
    }

    /// The function output handed back to the voice model.
    pub fn to_model_output(&self) -> Value {
        serde_json::json!({
            "success": self.success,
            "message": self.spoken_message,
            "referenceId": self.reference_id,
            "data": self.data,
        })
    }
}

fn default_message(tool: ToolName, success: bool) -> &'static str {
    match (tool, success) {
        (ToolName::CheckAvailability, true) => "Here is what we have open.",
        (ToolName::BookAppointment, true) => "You're all booked.",
        (ToolName::CreateMessage, true) => "I've passed your message along and someone will call you back.",
        (ToolName::TransferCall, true) => "Please hold while I transfer you.",
        (_, false) => FALLBACK_MESSAGE,
    }
}

/// Validates, calls the backend under a deadline, and shapes the result.
#[derive(Clone)]
pub struct ToolInvoker {
    backend: Arc<dyn ToolBackend>,
    business_id: String,
    timeout: Duration,
}

impl ToolInvoker {
    pub fn new(backend: Arc<dyn ToolBackend>, business_id: impl Into<String>, timeout: Duration) -> Self {
        Self {
            backend,
            business_id: business_id.into(),
            timeout,
        }
    }

    pub fn business_id(&self) -> &str {
        &self.business_id
    }

    /// Invokes `name` with model-supplied `arguments`.
    ///
    /// Schema violations fail fast with [`ToolError::InvalidArguments`] and
    /// never reach the backend. Backend failures and timeouts are logged and
    /// folded into a fallback [`ToolResult`] with `success = false`.
    pub async fn invoke(
        &self,
        name: &str,
        arguments: &Value,
        call_id: &str,
        correlation_id: &str,
    ) -> Result<ToolResult, ToolError> {
        let call = ToolCall::parse(name, arguments)?;
        Ok(self.invoke_call(&call, call_id, correlation_id).await)
    }

    /// Invokes an already validated call.
    pub async fn invoke_call(&self, call: &ToolCall, call_id: &str, correlation_id: &str) -> ToolResult {
        let tool = call.name();
        match self.try_invoke(call, call_id, correlation_id).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(
                    call_id = %call_id,
                    tool = %tool,
                    correlation_id = %correlation_id,
                    "tool call failed, using fallback message: {}",
                    e
                );
                ToolResult::fallback(tool)
            }
        }
    }

    /// Like [`invoke_call`](Self::invoke_call) but surfaces backend errors.
    pub async fn try_invoke(
        &self,
        call: &ToolCall,
        call_id: &str,
        correlation_id: &str,
    ) -> Result<ToolResult, ToolError> {
        let tool = call.name();
        let ctx = RequestContext {
            business_id: self.business_id.clone(),
            call_id: call_id.to_string(),
            correlation_id: correlation_id.to_string(),
        };

        tracing::info!(call_id = %call_id, tool = %tool, correlation_id = %correlation_id, "invoking tool");
        let reply = tokio::time::timeout(self.timeout, dispatch(self.backend.as_ref(), &ctx, call))
            .await
            .map_err(|_| ToolError::Timeout(self.timeout.as_millis() as u64))??;

        let spoken_message = if reply.message.trim().is_empty() {
            default_message(tool, reply.success).to_string()
        } else {
            reply.message.clone()
        };
        Ok(ToolResult {
            tool,
            success: reply.success,
            spoken_message,
            reference_id: reply.reference_id().map(str::to_string),
            data: serde_json::to_value(&reply).unwrap_or(Value::Null),
        })
    }
}
