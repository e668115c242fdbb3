//! Websocket transport shared by every voice-model provider.
//!
//! One reader task and one writer task run around each connection. The
//! session sees only two bounded channels; closing the command channel
//! closes the socket, and the event channel ends when the socket does.

use crate::error::VoiceError;
use crate::model::{ModelCodec, ModelCommand, ModelConnection, ModelEvent, VoiceModelAdapter};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::Message;

/// Default capacity of each direction's channel.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Query parameter carrying the model name, for providers that select a
/// model per connection.
#[derive(Debug, Clone)]
pub struct ModelParam {
    pub key: &'static str,
    pub default: String,
}

/// A [`VoiceModelAdapter`] speaking a provider's protocol over a websocket.
#[derive(Clone)]
pub struct WebSocketModelAdapter<C: ModelCodec> {
    url: String,
    headers: Vec<(String, String)>,
    model_param: Option<ModelParam>,
    codec: C,
    queue_capacity: usize,
}

impl<C: ModelCodec> std::fmt::Debug for WebSocketModelAdapter<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Header values carry credentials.
        let header_names: Vec<&str> = self.headers.iter().map(|(n, _)| n.as_str()).collect();
        f.debug_struct("WebSocketModelAdapter")
            .field("provider", &self.codec.provider())
            .field("url", &self.url)
            .field("headers", &header_names)
            .field("model_param", &self.model_param)
            .field("queue_capacity", &self.queue_capacity)
            .finish()
    }
}

impl<C: ModelCodec> WebSocketModelAdapter<C> {
    pub fn new(url: impl Into<String>, codec: C) -> Self {
        Self {
            url: url.into(),
            headers: Vec::new(),
            model_param: None,
            codec,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_model_param(mut self, key: &'static str, default: impl Into<String>) -> Self {
        self.model_param = Some(ModelParam {
            key,
            default: default.into(),
        });
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    /// The URL dialed for a connection with the given model override.
    pub fn endpoint(&self, model: Option<&str>) -> String {
        match &self.model_param {
            Some(param) => {
                let sep = if self.url.contains('?') { '&' } else { '?' };
                let model = model.unwrap_or(&param.default);
                format!("{}{sep}{}={model}", self.url, param.key)
            }
            None => self.url.clone(),
        }
    }
}

#[async_trait]
impl<C: ModelCodec + Sync> VoiceModelAdapter for WebSocketModelAdapter<C> {
    fn provider(&self) -> &'static str {
        self.codec.provider()
    }

    async fn connect(&self, model: Option<&str>) -> Result<ModelConnection, VoiceError> {
        let endpoint = self.endpoint(model);
        let mut request = endpoint
            .as_str()
            .into_client_request()
            .map_err(|e| VoiceError::Config(format!("invalid model url {endpoint}: {e}")))?;
        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| VoiceError::Config(format!("invalid header name {name}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| VoiceError::Config(format!("invalid header value for {name}: {e}")))?;
            request.headers_mut().insert(name, value);
        }

        let (socket, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| VoiceError::ModelUnavailable(e.to_string()))?;
        tracing::info!(provider = self.provider(), url = %self.url, "voice model connected");

        let (mut sink, mut stream) = socket.split();
        let (cmd_tx, mut cmd_rx) = mpsc::channel::<ModelCommand>(self.queue_capacity);
        let (evt_tx, evt_rx) = mpsc::channel::<ModelEvent>(self.queue_capacity);

        let mut encoder = self.codec.clone();
        tokio::spawn(async move {
            while let Some(command) = cmd_rx.recv().await {
                let frames = match encoder.encode(&command) {
                    Ok(frames) => frames,
                    Err(e) => {
                        tracing::warn!(provider = encoder.provider(), "failed to encode model command: {}", e);
                        continue;
                    }
                };
                for frame in frames {
                    if let Err(e) = sink.send(Message::Text(frame.into())).await {
                        tracing::warn!(provider = encoder.provider(), "model socket write failed: {}", e);
                        return;
                    }
                }
            }
            let _ = sink.close().await;
            tracing::debug!(provider = encoder.provider(), "model writer closed");
        });

        let mut decoder = self.codec.clone();
        tokio::spawn(async move {
            loop {
                let msg = tokio::select! {
                    _ = evt_tx.closed() => break,
                    msg = stream.next() => msg,
                };
                let text = match msg {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(frame))) => {
                        tracing::info!(provider = decoder.provider(), ?frame, "model closed connection");
                        break;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        tracing::warn!(provider = decoder.provider(), "model socket read failed: {}", e);
                        break;
                    }
                    None => break,
                };
                let events = decoder.decode(text.as_str()).unwrap_or_else(|e| {
                    vec![ModelEvent::Error {
                        message: e.to_string(),
                        fatal: false,
                    }]
                });
                for event in events {
                    if evt_tx.send(event).await.is_err() {
                        return;
                    }
                }
            }
        });

        Ok(ModelConnection {
            commands: cmd_tx,
            events: evt_rx,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::openai::OpenAiCodec;

    #[test]
    fn endpoint_appends_model_parameter() {
        let adapter = WebSocketModelAdapter::new("wss://example.test/v1/realtime", OpenAiCodec)
            .with_model_param("model", "base-model");
        assert_eq!(
            adapter.endpoint(None),
            "wss://example.test/v1/realtime?model=base-model"
        );
        assert_eq!(
            adapter.endpoint(Some("other")),
            "wss://example.test/v1/realtime?model=other"
        );
    }

    #[test]
    fn endpoint_keeps_existing_query() {
        let adapter = WebSocketModelAdapter::new("wss://example.test/ws?agent_id=a1", OpenAiCodec)
            .with_model_param("model", "m");
        assert_eq!(adapter.endpoint(None), "wss://example.test/ws?agent_id=a1&model=m");
    }

    #[test]
    fn debug_output_hides_header_values() {
        let adapter = WebSocketModelAdapter::new("wss://example.test", OpenAiCodec)
            .with_header("Authorization", "Bearer sk-secret");
        let debug = format!("{adapter:?}");
        assert!(debug.contains("Authorization"));
        assert!(!debug.contains("sk-secret"));
    }
}
