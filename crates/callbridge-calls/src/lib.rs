//! Business profiles and call records.
//!
//! The bridge treats the surrounding product's business configuration as a
//! read-only source: a profile is looked up once, by the dialed number on
//! the call-start webhook or by business id when the media stream opens,
//! and then frozen for the life of the call.
//!
//! Call records are written in three places: the call-start webhook upserts
//! the row (provider retries must not create a second record), the status
//! callback updates its status, and session teardown stores the outcome and
//! transcript.

mod profiles;
mod records;

pub use profiles::{find_business_by_number, get_business, upsert_business};
pub use records::{
    complete_call, get_call, update_call_status, upsert_call, CallRecord, NewCall, UpsertedCall,
};

use thiserror::Error;

/// Errors that can occur while reading profiles or writing call records.
#[derive(Debug, Error)]
pub enum CallStoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("json serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// No business profile is configured for the dialed number or id.
    #[error("no business profile configured for {0}")]
    ConfigurationMissing(String),

    #[error("call not found: {0}")]
    CallNotFound(String),
}
