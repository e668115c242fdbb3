//! Per-session sequential tool execution.
//!
//! Each call session owns one worker task. Requests are queued FIFO and run
//! one at a time, so a second request arriving while one is in flight waits
//! instead of interleaving with it. Results come back on a channel the
//! session selects on alongside its media streams.

use crate::error::ToolError;
use crate::invoker::{ToolInvoker, ToolResult};
use crate::schema::{ToolCall, ToolName};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Maximum requests waiting behind the one in flight.
pub const DEFAULT_QUEUE_CAPACITY: usize = 8;

#[derive(Debug, Clone, PartialEq)]
pub struct ToolRequest {
    /// The model's function-call id, when the model asked for the tool.
    pub model_call_id: Option<String>,
    pub call: ToolCall,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutcome {
    pub model_call_id: Option<String>,
    pub call: ToolCall,
    pub correlation_id: String,
    pub result: ToolResult,
}

/// Handle to a session's tool worker task.
#[derive(Debug, Clone)]
pub struct ToolWorker {
    tx: mpsc::Sender<ToolRequest>,
    pending: Arc<AtomicUsize>,
}

impl ToolWorker {
    /// Starts the worker. The task ends when every handle is dropped or the
    /// outcome receiver goes away.
    pub fn spawn(
        invoker: ToolInvoker,
        call_id: impl Into<String>,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<ToolOutcome>) {
        let call_id = call_id.into();
        let (tx, mut rx) = mpsc::channel::<ToolRequest>(capacity.max(1));
        let (out_tx, out_rx) = mpsc::channel::<ToolOutcome>(capacity.max(1));
        let pending = Arc::new(AtomicUsize::new(0));

        let counter = pending.clone();
        tokio::spawn(async move {
            let mut attempts: HashMap<ToolName, u32> = HashMap::new();
            while let Some(request) = rx.recv().await {
                let tool = request.call.name();
                let attempt = attempts.entry(tool).or_insert(0);
                *attempt += 1;
                let correlation_id = format!("{call_id}:{tool}:{attempt}");

                let result = invoker
                    .invoke_call(&request.call, &call_id, &correlation_id)
                    .await;
                counter.fetch_sub(1, Ordering::SeqCst);

                let outcome = ToolOutcome {
                    model_call_id: request.model_call_id,
                    call: request.call,
                    correlation_id,
                    result,
                };
                if out_tx.send(outcome).await.is_err() {
                    break;
                }
            }
            tracing::debug!(call_id = %call_id, "tool worker stopped");
        });

        (Self { tx, pending }, out_rx)
    }

    /// Queues a request behind any in-flight one.
    pub fn submit(&self, request: ToolRequest) -> Result<(), ToolError> {
        self.pending.fetch_add(1, Ordering::SeqCst);
        self.tx.try_send(request).map_err(|e| {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            ToolError::Unavailable(e.to_string())
        })
    }

    /// Requests queued or in flight.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }
}
