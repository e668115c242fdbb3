//! Tool backend contract and its HTTP implementation.

use crate::error::ToolError;
use crate::schema::{
    BookAppointmentArgs, CheckAvailabilityArgs, CreateMessageArgs, ToolCall, ToolName,
    TransferCallArgs,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Identifies who is asking and which logical request this is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub business_id: String,
    pub call_id: String,
    /// Stable per logical request; the backend deduplicates on it.
    pub correlation_id: String,
}

/// Reply from any tool endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendReply {
    #[serde(default = "default_success")]
    pub success: bool,
    /// Caller-facing sentence describing the outcome.
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub appointment_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transfer_number: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub slots: Vec<String>,
}

fn default_success() -> bool {
    true
}

impl BackendReply {
    /// The domain id produced by the call, if any.
    pub fn reference_id(&self) -> Option<&str> {
        self.appointment_id
            .as_deref()
            .or(self.message_id.as_deref())
            .or(self.transfer_number.as_deref())
    }
}

/// The business's booking, messaging and transfer service.
#[async_trait]
pub trait ToolBackend: Send + Sync {
    async fn check_availability(
        &self,
        ctx: &RequestContext,
        args: &CheckAvailabilityArgs,
    ) -> Result<BackendReply, ToolError>;

    async fn book_appointment(
        &self,
        ctx: &RequestContext,
        args: &BookAppointmentArgs,
    ) -> Result<BackendReply, ToolError>;

    async fn create_message(
        &self,
        ctx: &RequestContext,
        args: &CreateMessageArgs,
    ) -> Result<BackendReply, ToolError>;

    async fn transfer_call(
        &self,
        ctx: &RequestContext,
        args: &TransferCallArgs,
    ) -> Result<BackendReply, ToolError>;
}

/// Routes a validated call to the matching backend method.
pub async fn dispatch(
    backend: &dyn ToolBackend,
    ctx: &RequestContext,
    call: &ToolCall,
) -> Result<BackendReply, ToolError> {
    match call {
        ToolCall::CheckAvailability(a) => backend.check_availability(ctx, a).await,
        ToolCall::BookAppointment(a) => backend.book_appointment(ctx, a).await,
        ToolCall::CreateMessage(a) => backend.create_message(ctx, a).await,
        ToolCall::TransferCall(a) => backend.transfer_call(ctx, a).await,
    }
}

/// Posts each tool call as camelCase JSON to `{base_url}/{endpoint}`.
#[derive(Clone)]
pub struct HttpToolBackend {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl fmt::Debug for HttpToolBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpToolBackend")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Envelope<'a, T: Serialize> {
    business_id: &'a str,
    call_id: &'a str,
    correlation_id: &'a str,
    #[serde(flatten)]
    args: CamelCase<'a, T>,
}

/// Re-serializes snake_case argument structs with camelCase keys.
struct CamelCase<'a, T>(&'a T);

impl<T: Serialize> Serialize for CamelCase<'_, T> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::{Error, SerializeMap};
        let value = serde_json::to_value(self.0).map_err(S::Error::custom)?;
        let serde_json::Value::Object(fields) = value else {
            return Err(S::Error::custom("tool arguments must serialize to an object"));
        };
        let mut map = serializer.serialize_map(Some(fields.len()))?;
        for (key, value) in &fields {
            map.serialize_entry(&camel_case(key), value)?;
        }
        map.end()
    }
}

fn camel_case(snake: &str) -> String {
    let mut out = String::with_capacity(snake.len());
    let mut upper = false;
    for c in snake.chars() {
        if c == '_' {
            upper = true;
        } else if upper {
            out.extend(c.to_uppercase());
            upper = false;
        } else {
            out.push(c);
        }
    }
    out
}

impl HttpToolBackend {
    /// Creates a backend client; `timeout` bounds each HTTP request.
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("callbridge/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.is_empty()),
            client,
        }
    }

    async fn post<T: Serialize + Sync>(
        &self,
        tool: ToolName,
        ctx: &RequestContext,
        args: &T,
    ) -> Result<BackendReply, ToolError> {
        let url = format!("{}/{}", self.base_url, tool.endpoint());
        let body = Envelope {
            business_id: &ctx.business_id,
            call_id: &ctx.call_id,
            correlation_id: &ctx.correlation_id,
            args: CamelCase(args),
        };

        let mut request = self
            .client
            .post(&url)
            .header("Idempotency-Key", &ctx.correlation_id)
            .json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let resp = request.send().await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp.json().await?);
        }
        if status.is_client_error() {
            // Rejections such as a taken slot come back as a caller-facing reply.
            if let Ok(mut reply) = resp.json::<BackendReply>().await {
                if !reply.message.is_empty() {
                    reply.success = false;
                    return Ok(reply);
                }
            }
        }
        Err(ToolError::Backend(format!("{tool} returned {status}")))
    }
}

#[async_trait]
impl ToolBackend for HttpToolBackend {
    async fn check_availability(
        &self,
        ctx: &RequestContext,
        args: &CheckAvailabilityArgs,
    ) -> Result<BackendReply, ToolError> {
        self.post(ToolName::CheckAvailability, ctx, args).await
    }

    async fn book_appointment(
        &self,
        ctx: &RequestContext,
        args: &BookAppointmentArgs,
    ) -> Result<BackendReply, ToolError> {
        self.post(ToolName::BookAppointment, ctx, args).await
    }

    async fn create_message(
        &self,
        ctx: &RequestContext,
        args: &CreateMessageArgs,
    ) -> Result<BackendReply, ToolError> {
        self.post(ToolName::CreateMessage, ctx, args).await
    }

    async fn transfer_call(
        &self,
        ctx: &RequestContext,
        args: &TransferCallArgs,
    ) -> Result<BackendReply, ToolError> {
        self.post(ToolName::TransferCall, ctx, args).await
    }
}
