//! Conversation layer for the call bridge.
//!
//! [`Conversation`] tracks what the caller has said, which booking details
//! are still missing and how urgent the call is, and decides when a tool
//! call should be made. Caller turns are scanned for emergency and transfer
//! phrases before anything else, so an emergency always wins over the
//! booking flow.

pub mod extract;
pub mod fields;
pub mod persona;
pub mod state;
pub mod urgency;

pub use fields::{CollectedFields, Field};
pub use persona::instructions;
pub use state::{Conversation, Decision, Phase, Speaker, Step, Transition, Turn};
pub use urgency::{KeywordSet, UrgencyMatch};
