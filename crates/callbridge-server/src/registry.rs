//! Process-wide table of live call sessions.

use crate::session::{SessionControl, SessionSnapshot, ShutdownReason};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

/// How the rest of the process reaches a live session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    /// Distinguishes this session from an earlier one with the same call id.
    pub session_id: Uuid,
    pub business_id: String,
    pub started_at: DateTime<Utc>,
    control: mpsc::Sender<SessionControl>,
}

impl SessionHandle {
    pub fn new(
        session_id: Uuid,
        business_id: impl Into<String>,
        control: mpsc::Sender<SessionControl>,
    ) -> Self {
        Self {
            session_id,
            business_id: business_id.into(),
            started_at: Utc::now(),
            control,
        }
    }

    /// Delivers a control message without waiting; `false` if the session
    /// has already gone or its queue is full.
    pub fn send(&self, message: SessionControl) -> bool {
        self.control.try_send(message).is_ok()
    }

    /// Asks the session for a snapshot of its state.
    pub async fn snapshot(&self) -> Option<SessionSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.control
            .send(SessionControl::Snapshot(tx))
            .await
            .ok()?;
        rx.await.ok()
    }
}

/// One row of the live session listing.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub call_id: String,
    pub session_id: Uuid,
    pub business_id: String,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("a session is already live for call {0}")]
    Duplicate(String),
}

/// Live sessions keyed by call id.
///
/// Uses `std::sync::RwLock`: every acquisition is a single map operation and
/// is never held across an `.await`.
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<String, SessionHandle>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a session; refuses a second live session for the same call.
    pub fn register(&self, call_id: &str, handle: SessionHandle) -> Result<(), RegistryError> {
        let mut sessions = self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if sessions.contains_key(call_id) {
            return Err(RegistryError::Duplicate(call_id.to_string()));
        }
        sessions.insert(call_id.to_string(), handle);
        Ok(())
    }

    /// Removes the entry for `call_id` only if it still belongs to `session_id`.
    ///
    /// Returns `false` for unknown ids and stale removals.
    pub fn remove(&self, call_id: &str, session_id: Uuid) -> bool {
        let mut sessions = self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        match sessions.get(call_id) {
            Some(current) if current.session_id == session_id => {
                sessions.remove(call_id);
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, call_id: &str) -> Option<SessionHandle> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(call_id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Asks every live session to close. Returns how many were notified.
    pub fn shutdown_all(&self, reason: ShutdownReason) -> usize {
        let handles: Vec<SessionHandle> = self
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        handles
            .iter()
            .filter(|h| h.send(SessionControl::Shutdown(reason)))
            .count()
    }

    /// Live sessions, oldest first.
    pub fn list(&self) -> Vec<SessionSummary> {
        let mut out: Vec<SessionSummary> = self
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(call_id, h)| SessionSummary {
                call_id: call_id.clone(),
                session_id: h.session_id,
                business_id: h.business_id.clone(),
                started_at: h.started_at,
            })
            .collect();
        out.sort_by(|a, b| a.started_at.cmp(&b.started_at).then(a.call_id.cmp(&b.call_id)));
        out
    }
}
