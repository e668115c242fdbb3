//! Tool invocation for the call bridge.
//!
//! The voice model may call four tools: `check_availability`,
//! `book_appointment`, `create_message` and `transfer_call`. This crate
//! validates their arguments against fixed schemas, forwards them to the
//! business's [`ToolBackend`] under a deadline, and turns the reply into a
//! sentence the agent can speak. A failing backend never leaves the caller
//! without an answer: the result degrades to a call-back promise.

pub mod backend;
pub mod error;
pub mod invoker;
pub mod schema;
pub mod worker;

pub use backend::{BackendReply, HttpToolBackend, RequestContext, ToolBackend};
pub use error::ToolError;
pub use invoker::{ToolInvoker, ToolResult, FALLBACK_MESSAGE};
pub use schema::{
    definitions, BookAppointmentArgs, CheckAvailabilityArgs, CreateMessageArgs, ToolCall,
    ToolDefinition, ToolName, TransferCallArgs,
};
pub use worker::{ToolOutcome, ToolRequest, ToolWorker};
