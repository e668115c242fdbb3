use crate::CallStoreError;
use callbridge_types::{CallOutcome, CallStatus};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

/// A persisted inbound call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CallRecord {
    pub id: i64,
    /// Provider call identifier; unique.
    pub call_sid: String,
    pub business_id: String,
    pub from_number: String,
    pub to_number: String,
    /// Last status label reported by the provider.
    pub status: String,
    pub outcome: Option<String>,
    pub transcript_json: Option<String>,
    /// How many times the call-start webhook was delivered for this call.
    pub delivery_count: i64,
    pub created_at: String,
    pub updated_at: String,
}

/// Parameters for recording a call from the call-start webhook.
#[derive(Debug, Clone)]
pub struct NewCall {
    pub call_sid: String,
    pub business_id: String,
    pub from_number: String,
    pub to_number: String,
}

/// Result of [`upsert_call`].
#[derive(Debug, Clone)]
pub struct UpsertedCall {
    pub record: CallRecord,
    /// `false` when this delivery was a provider retry of a known call.
    pub created: bool,
}

/// Records a call keyed by `call_sid`.
///
/// Re-delivery of the same call id never creates a second row; it bumps
/// `delivery_count` and returns the existing record with `created = false`.
pub fn upsert_call(conn: &Connection, call: &NewCall) -> Result<UpsertedCall, CallStoreError> {
    conn.execute(
        "INSERT INTO calls (call_sid, business_id, from_number, to_number)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(call_sid) DO UPDATE SET
            delivery_count = delivery_count + 1,
            updated_at = datetime('now')",
        params![
            call.call_sid,
            call.business_id,
            call.from_number,
            call.to_number
        ],
    )?;

    let record = get_call(conn, &call.call_sid)?;
    let created = record.delivery_count == 1;
    if !created {
        tracing::info!(
            call_sid = %call.call_sid,
            deliveries = record.delivery_count,
            "duplicate call-start delivery; reusing existing call record"
        );
    }
    Ok(UpsertedCall { record, created })
}

/// Fetches a call record by provider call id.
pub fn get_call(conn: &Connection, call_sid: &str) -> Result<CallRecord, CallStoreError> {
    conn.query_row(
        "SELECT id, call_sid, business_id, from_number, to_number, status, outcome,
                transcript_json, delivery_count, created_at, updated_at
         FROM calls WHERE call_sid = ?1",
        [call_sid],
        map_row_to_call,
    )
    .optional()?
    .ok_or_else(|| CallStoreError::CallNotFound(call_sid.to_string()))
}

/// Stores the latest provider status.
///
/// Returns `false` when the call is unknown; status callbacks may arrive for
/// calls this process never saw, which is not an error.
pub fn update_call_status(
    conn: &Connection,
    call_sid: &str,
    status: CallStatus,
) -> Result<bool, CallStoreError> {
    let count = conn.execute(
        "UPDATE calls SET status = ?1, updated_at = datetime('now') WHERE call_sid = ?2",
        params![status.as_str(), call_sid],
    )?;
    Ok(count > 0)
}

/// Stores how the call ended along with its conversation transcript.
pub fn complete_call(
    conn: &Connection,
    call_sid: &str,
    outcome: CallOutcome,
    transcript: &serde_json::Value,
) -> Result<(), CallStoreError> {
    let count = conn.execute(
        "UPDATE calls SET outcome = ?1, transcript_json = ?2, updated_at = datetime('now')
         WHERE call_sid = ?3",
        params![outcome.as_str(), serde_json::to_string(transcript)?, call_sid],
    )?;
    if count == 0 {
        return Err(CallStoreError::CallNotFound(call_sid.to_string()));
    }
    Ok(())
}

fn map_row_to_call(row: &Row) -> rusqlite::Result<CallRecord> {
    Ok(CallRecord {
        id: row.get(0)?,
        call_sid: row.get(1)?,
        business_id: row.get(2)?,
        from_number: row.get(3)?,
        to_number: row.get(4)?,
        status: row.get(5)?,
        outcome: row.get(6)?,
        transcript_json: row.get(7)?,
        delivery_count: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}
