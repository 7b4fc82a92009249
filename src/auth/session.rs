//! In-memory session store
//!
//! Sessions are produced by an external linking flow (or seeded from
//! configuration) and are read-only to the gateway.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::SessionSeed;

/// Session id used when a call carries none. Never resolvable.
pub const UNKNOWN_SESSION: &str = "unknown";

/// A short-lived record of who is calling
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Opaque session id
    pub session_id: String,
    /// User id sent to the token authority
    pub user_id: String,
    /// Workspace id
    pub workspace_id: String,
    /// Tenant subdomain
    pub subdomain: String,
    /// User email
    #[serde(default)]
    pub email: String,
    /// Account id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    /// Scopes requested from the token authority
    #[serde(default)]
    pub scopes: Vec<String>,
    /// Instant after which the session is unusable
    pub expires_at: DateTime<Utc>,
}

impl Session {
    /// Whether the session is expired at `now`
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Whether the session is expired now
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

impl From<SessionSeed> for Session {
    fn from(seed: SessionSeed) -> Self {
        Self {
            session_id: seed.session_id,
            user_id: seed.user_id,
            workspace_id: seed.workspace_id,
            subdomain: seed.subdomain,
            email: seed.email,
            account_id: seed.account_id,
            scopes: seed.scopes,
            expires_at: seed.expires_at,
        }
    }
}

/// Concurrent session store keyed by session id
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: DashMap<String, Session>,
}

impl SessionStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated from configuration
    #[must_use]
    pub fn from_seeds(seeds: &[SessionSeed]) -> Self {
        let store = Self::new();
        for seed in seeds {
            store.save(seed.session_id.clone(), Session::from(seed.clone()));
        }
        store
    }

    /// Insert or overwrite a session
    pub fn save(&self, session_id: impl Into<String>, session: Session) {
        let session_id = session_id.into();
        debug!(session = %session_id, workspace = %session.workspace_id, "Saved session");
        self.sessions.insert(session_id, session);
    }

    /// Look up a session. Expiry is not checked here.
    #[must_use]
    pub fn get(&self, session_id: &str) -> Option<Session> {
        self.sessions.get(session_id).map(|s| s.value().clone())
    }

    /// Remove a session, returning it if present
    pub fn remove(&self, session_id: &str) -> Option<Session> {
        self.sessions.remove(session_id).map(|(_, s)| s)
    }

    /// Drop every session expired at `now`; returns how many were removed
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, s| !s.is_expired_at(now));
        let removed = before.saturating_sub(self.sessions.len());
        if removed > 0 {
            debug!(removed, "Purged expired sessions");
        }
        removed
    }

    /// Number of stored sessions
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether the store is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
