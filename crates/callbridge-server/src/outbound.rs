//! Outbound telephony queue.
//!
//! Agent audio is queued frame by frame and written by a dedicated task, so
//! a slow caller connection never stalls the session. A clear bumps the
//! queue's generation; frames queued before it are dropped by the writer
//! instead of being played.

use callbridge_voice::telephony::encode_command;
use callbridge_voice::TelephonyCommand;
use futures_util::{Sink, SinkExt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq)]
pub struct OutboundFrame {
    pub generation: u64,
    pub command: TelephonyCommand,
}

/// Session-side handle to the outbound queue.
#[derive(Debug, Clone)]
pub struct TelephonySender {
    tx: mpsc::Sender<OutboundFrame>,
    generation: Arc<AtomicU64>,
}

impl TelephonySender {
    pub fn channel(capacity: usize) -> (Self, OutboundQueue) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let generation = Arc::new(AtomicU64::new(0));
        (
            Self {
                tx,
                generation: generation.clone(),
            },
            OutboundQueue { rx, generation },
        )
    }

    /// Queues one audio frame; `false` when the queue is full and the frame was dropped.
    pub fn send_audio(&self, audio: Vec<u8>) -> bool {
        self.push(TelephonyCommand::Media { audio })
    }

    pub fn send_mark(&self, name: String) -> bool {
        self.push(TelephonyCommand::Mark { name })
    }

    /// Drops everything queued so far and tells the caller's side to flush playback.
    pub async fn clear(&self) -> bool {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.tx
            .send(OutboundFrame {
                generation,
                command: TelephonyCommand::Clear,
            })
            .await
            .is_ok()
    }

    fn push(&self, command: TelephonyCommand) -> bool {
        let frame = OutboundFrame {
            generation: self.generation.load(Ordering::SeqCst),
            command,
        };
        match self.tx.try_send(frame) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!("outbound telephony queue full, dropping frame");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

/// Writer-side end of the outbound queue.
#[derive(Debug)]
pub struct OutboundQueue {
    rx: mpsc::Receiver<OutboundFrame>,
    generation: Arc<AtomicU64>,
}

impl OutboundQueue {
    /// Next frame that is still current. Returns `None` once the session
    /// has dropped its sender.
    pub async fn next(&mut self) -> Option<OutboundFrame> {
        while let Some(frame) = self.rx.recv().await {
            if frame.generation < self.generation.load(Ordering::SeqCst) {
                continue;
            }
            return Some(frame);
        }
        None
    }

    /// Encodes current frames for `stream_sid` and writes them to `sink`
    /// until the session ends or the sink fails.
    pub async fn write_to<S>(mut self, stream_sid: &str, mut sink: S)
    where
        S: Sink<String> + Unpin,
    {
        while let Some(frame) = self.next().await {
            let text = match encode_command(stream_sid, &frame.command) {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!(stream_sid, "failed to encode telephony frame: {}", e);
                    continue;
                }
            };
            if sink.send(text).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    }
}
