//! Telephony media-stream frame codec.
//!
//! Frames are JSON text messages keyed by an `event` field. Inbound frames
//! (`connected`, `start`, `media`, `mark`, `stop`, `dtmf`) are decoded into
//! [`TelephonyEvent`]s with audio already base64-decoded; outbound
//! [`TelephonyCommand`]s (`media`, `mark`, `clear`) are encoded with the
//! stream id assigned by the `start` frame.

use crate::error::VoiceError;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Custom stream parameter carrying the bridge's call id.
pub const CALL_ID_PARAMETER: &str = "callId";

/// Contents of the `start` frame.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamStart {
    pub stream_sid: String,
    pub call_sid: String,
    #[serde(default)]
    pub account_sid: Option<String>,
    /// `<Parameter>` values from the stream instruction.
    #[serde(default)]
    pub custom_parameters: HashMap<String, String>,
    #[serde(default)]
    pub media_format: Option<MediaFormat>,
}

impl StreamStart {
    /// The bridge call id: the `callId` parameter if present, else the provider call sid.
    pub fn call_id(&self) -> &str {
        self.custom_parameters
            .get(CALL_ID_PARAMETER)
            .map(String::as_str)
            .filter(|id| !id.is_empty())
            .unwrap_or(&self.call_sid)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaFormat {
    pub encoding: String,
    pub sample_rate: u32,
    pub channels: u16,
}

/// A decoded inbound telephony frame.
#[derive(Debug, Clone, PartialEq)]
pub enum TelephonyEvent {
    Connected,
    Start(StreamStart),
    /// Caller audio, μ-law bytes.
    Media { timestamp_ms: u64, audio: Vec<u8> },
    /// Playback of a previously sent mark has completed.
    Mark { name: String },
    Stop,
    Dtmf { digit: String },
    /// Unrecognised event kind; ignored.
    Other,
}

/// An instruction to the telephony side.
#[derive(Debug, Clone, PartialEq)]
pub enum TelephonyCommand {
    /// One outbound audio frame, μ-law bytes.
    Media { audio: Vec<u8> },
    Mark { name: String },
    /// Flush playback that is queued but not yet heard.
    Clear,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
enum InboundFrame {
    Connected,
    Start {
        start: StreamStart,
    },
    Media {
        media: InboundMedia,
    },
    Mark {
        mark: MarkBody,
    },
    Stop,
    Dtmf {
        dtmf: DtmfBody,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct InboundMedia {
    payload: String,
    #[serde(default)]
    timestamp: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct MarkBody {
    name: String,
}

#[derive(Debug, Deserialize)]
struct DtmfBody {
    digit: String,
}

#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
enum OutboundFrame<'a> {
    Media {
        #[serde(rename = "streamSid")]
        stream_sid: &'a str,
        media: OutboundMedia,
    },
    Mark {
        #[serde(rename = "streamSid")]
        stream_sid: &'a str,
        mark: MarkBody,
    },
    Clear {
        #[serde(rename = "streamSid")]
        stream_sid: &'a str,
    },
}

#[derive(Debug, Serialize)]
struct OutboundMedia {
    payload: String,
}

/// Decodes one inbound text frame.
pub fn decode_frame(text: &str) -> Result<TelephonyEvent, VoiceError> {
    let frame: InboundFrame = serde_json::from_str(text)?;
    Ok(match frame {
        InboundFrame::Connected => TelephonyEvent::Connected,
        InboundFrame::Start { start } => TelephonyEvent::Start(start),
        InboundFrame::Media { media } => TelephonyEvent::Media {
            timestamp_ms: media
                .timestamp
                .as_deref()
                .and_then(|t| t.parse().ok())
                .unwrap_or(0),
            audio: base64::engine::general_purpose::STANDARD.decode(media.payload)?,
        },
        InboundFrame::Mark { mark } => TelephonyEvent::Mark { name: mark.name },
        InboundFrame::Stop => TelephonyEvent::Stop,
        InboundFrame::Dtmf { dtmf } => TelephonyEvent::Dtmf { digit: dtmf.digit },
        InboundFrame::Other => TelephonyEvent::Other,
    })
}

/// Encodes one outbound command for the given stream.
pub fn encode_command(stream_sid: &str, command: &TelephonyCommand) -> Result<String, VoiceError> {
    let frame = match command {
        TelephonyCommand::Media { audio } => OutboundFrame::Media {
            stream_sid,
            media: OutboundMedia {
                payload: base64::engine::general_purpose::STANDARD.encode(audio),
            },
        },
        TelephonyCommand::Mark { name } => OutboundFrame::Mark {
            stream_sid,
            mark: MarkBody { name: name.clone() },
        },
        TelephonyCommand::Clear => OutboundFrame::Clear { stream_sid },
    };
    Ok(serde_json::to_string(&frame)?)
}
