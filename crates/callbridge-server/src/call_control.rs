//! Out-of-band control of live calls through the telephony REST API.
//!
//! The media stream can only carry audio; ending a call with a spoken
//! message or handing it to a person means replacing the call's
//! instructions with new TwiML.

use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CallControlError {
    #[error("call control request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("call control rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

#[async_trait]
pub trait CallControl: Send + Sync {
    /// Speaks `message` and ends the call.
    async fn hangup_with_message(&self, call_sid: &str, message: &str) -> Result<(), CallControlError>;

    /// Speaks `message` and dials `number`.
    async fn transfer(&self, call_sid: &str, message: &str, number: &str) -> Result<(), CallControlError>;
}

/// Escapes text for use in TwiML element content and attribute values.
pub fn xml_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

pub fn say_and_hangup_twiml(message: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?><Response><Say>{}</Say><Hangup/></Response>",
        xml_escape(message)
    )
}

pub fn say_and_dial_twiml(message: &str, number: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?><Response><Say>{}</Say><Dial>{}</Dial></Response>",
        xml_escape(message),
        xml_escape(number)
    )
}

/// Twilio REST implementation.
#[derive(Clone)]
pub struct TwilioCallControl {
    client: reqwest::Client,
    api_base: String,
    account_sid: String,
    auth_token: String,
}

impl fmt::Debug for TwilioCallControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TwilioCallControl")
            .field("api_base", &self.api_base)
            .field("account_sid", &self.account_sid)
            .field("auth_token", &"[REDACTED]")
            .finish()
    }
}

impl TwilioCallControl {
    pub fn new(
        api_base: impl Into<String>,
        account_sid: impl Into<String>,
        auth_token: impl Into<String>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            account_sid: account_sid.into(),
            auth_token: auth_token.into(),
        }
    }

    fn call_url(&self, call_sid: &str) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/Calls/{}.json",
            self.api_base, self.account_sid, call_sid
        )
    }

    async fn update(&self, call_sid: &str, twiml: String) -> Result<(), CallControlError> {
        let response = self
            .client
            .post(self.call_url(call_sid))
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&[("Twiml", twiml)])
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CallControlError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl CallControl for TwilioCallControl {
    async fn hangup_with_message(&self, call_sid: &str, message: &str) -> Result<(), CallControlError> {
        tracing::info!(call_sid, "ending call with message");
        self.update(call_sid, say_and_hangup_twiml(message)).await
    }

    async fn transfer(&self, call_sid: &str, message: &str, number: &str) -> Result<(), CallControlError> {
        tracing::info!(call_sid, number, "transferring call");
        self.update(call_sid, say_and_dial_twiml(message, number)).await
    }
}

/// Used when no telephony credentials are configured.
#[derive(Debug, Clone, Default)]
pub struct LoggingCallControl;

#[async_trait]
impl CallControl for LoggingCallControl {
    async fn hangup_with_message(&self, call_sid: &str, message: &str) -> Result<(), CallControlError> {
        tracing::warn!(call_sid, message, "no call control configured; hangup not sent");
        Ok(())
    }

    async fn transfer(&self, call_sid: &str, message: &str, number: &str) -> Result<(), CallControlError> {
        tracing::warn!(call_sid, message, number, "no call control configured; transfer not sent");
        Ok(())
    }
}
