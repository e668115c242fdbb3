//! Barge-in handling.
//!
//! Every batch of agent audio sent to the caller is followed by a named
//! mark. The telephony side echoes a mark back once the audio before it has
//! played, so the acknowledged marks form the playback clock: when the
//! caller starts talking, the controller knows exactly how much of the
//! current utterance was heard and can tell the model to trim the rest.

use serde::Serialize;
use std::collections::VecDeque;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PlaybackState {
    Idle,
    Speaking { utterance_id: String },
}

/// What to send when the caller interrupts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Truncation {
    pub utterance_id: String,
    /// Milliseconds of the utterance the caller actually heard.
    pub audio_end_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct PendingMark {
    name: String,
    /// Sent clock position at the end of the audio this mark follows.
    end_ms: u64,
}

#[derive(Debug, Clone)]
pub struct InterruptionController {
    state: PlaybackState,
    /// Sent clock position where the current utterance starts.
    anchor_ms: u64,
    /// Total audio queued to the caller, in milliseconds.
    sent_ms: u64,
    /// Audio confirmed played by mark acknowledgements.
    confirmed_ms: u64,
    pending_marks: VecDeque<PendingMark>,
    next_mark: u64,
    response_done: bool,
    /// Last interrupted utterance; its late audio is discarded.
    truncated: Option<String>,
}

impl Default for InterruptionController {
    fn default() -> Self {
        Self::new()
    }
}

impl InterruptionController {
    pub fn new() -> Self {
        Self {
            state: PlaybackState::Idle,
            anchor_ms: 0,
            sent_ms: 0,
            confirmed_ms: 0,
            pending_marks: VecDeque::new(),
            next_mark: 0,
            response_done: false,
            truncated: None,
        }
    }

    pub fn state(&self) -> &PlaybackState {
        &self.state
    }

    pub fn is_speaking(&self) -> bool {
        matches!(self.state, PlaybackState::Speaking { .. })
    }

    pub fn pending_marks(&self) -> usize {
        self.pending_marks.len()
    }

    /// True for audio belonging to an utterance the caller already cut off.
    pub fn is_discarded(&self, utterance_id: &str) -> bool {
        self.truncated.as_deref() == Some(utterance_id)
    }

    /// Records `duration_ms` of `utterance_id` as queued and returns the
    /// name of the mark to send after it.
    pub fn on_audio_sent(&mut self, utterance_id: &str, duration_ms: u64) -> String {
        let same_utterance = matches!(
            &self.state,
            PlaybackState::Speaking { utterance_id: current } if current == utterance_id
        );
        if !same_utterance {
            // Anything still queued plays first, so the new utterance starts
            // where the sent clock is now.
            self.anchor_ms = self.sent_ms;
            self.state = PlaybackState::Speaking {
                utterance_id: utterance_id.to_string(),
            };
        }
        self.response_done = false;
        self.sent_ms += duration_ms;
        self.next_mark += 1;
        let name = format!("m{}", self.next_mark);
        self.pending_marks.push_back(PendingMark {
            name: name.clone(),
            end_ms: self.sent_ms,
        });
        name
    }

    /// Applies a mark acknowledgement. Marks are acknowledged in the order
    /// they were sent; unknown names (e.g. marks flushed by a clear) are ignored.
    pub fn on_mark_ack(&mut self, name: &str) {
        if !self.pending_marks.iter().any(|m| m.name == name) {
            tracing::trace!(mark = name, "ignoring unknown mark");
            return;
        }
        while let Some(mark) = self.pending_marks.pop_front() {
            self.confirmed_ms = mark.end_ms;
            if mark.name == name {
                break;
            }
        }
        self.settle();
    }

    /// The model has finished generating the current response.
    pub fn on_response_done(&mut self) {
        self.response_done = true;
        self.settle();
    }

    /// The caller started talking. Returns the truncation to apply when
    /// agent audio was playing; `None` when there was nothing to cut off.
    pub fn on_speech_started(&mut self) -> Option<Truncation> {
        let PlaybackState::Speaking { utterance_id } =
            std::mem::replace(&mut self.state, PlaybackState::Idle)
        else {
            return None;
        };
        let audio_end_ms = self.confirmed_ms.saturating_sub(self.anchor_ms);
        self.pending_marks.clear();
        // Cleared audio never plays.
        self.sent_ms = self.confirmed_ms;
        self.response_done = false;
        self.truncated = Some(utterance_id.clone());
        Some(Truncation {
            utterance_id,
            audio_end_ms,
        })
    }

    /// Forgets all playback state for a fresh model connection. Mark
    /// numbering continues, so echoes of marks sent before the reset can
    /// never match a new one.
    pub fn reset(&mut self) {
        *self = Self {
            next_mark: self.next_mark,
            ..Self::new()
        };
    }

    fn settle(&mut self) {
        if self.response_done && self.pending_marks.is_empty() {
            self.state = PlaybackState::Idle;
        }
    }
}
