// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Session resolution with inactivity renewal.
//!
//! The record `{sid, ts}` lives in ephemeral (tab-scoped) storage. Every
//! resolution writes back `ts = now`, so any envelope build keeps the
//! session alive, not only genuine user interaction.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::identity::generate_id;
use crate::storage::{Storage, SESSION_KEY};

/// Persisted session record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub sid: String,
    /// Last activity, epoch milliseconds.
    pub ts: u64,
}

impl SessionRecord {
    /// Check if the session has timed out.
    pub fn is_timed_out(&self, now_ms: u64, timeout_ms: u64) -> bool {
        now_ms.saturating_sub(self.ts) > timeout_ms
    }
}

pub struct SessionTracker {
    ephemeral: Arc<dyn Storage>,
    timeout_ms: u64,
    privacy_mode: bool,
}

impl SessionTracker {
    pub fn new(ephemeral: Arc<dyn Storage>, timeout_ms: u64, privacy_mode: bool) -> Self {
        Self {
            ephemeral,
            timeout_ms,
            privacy_mode,
        }
    }

    /// Resolve the current session id, renewing it after the timeout.
    ///
    /// A malformed stored record is treated as absent and overwritten. An
    /// unreadable store yields `None` for this call.
    pub fn resolve_session_id(&self, now_ms: u64) -> Option<String> {
        if self.privacy_mode {
            return None;
        }

        let stored = match self.ephemeral.get(SESSION_KEY) {
            Ok(raw) => raw.and_then(|raw| match serde_json::from_str::<SessionRecord>(&raw) {
                Ok(record) => Some(record),
                Err(e) => {
                    debug!(error = %e, "discarding malformed session record");
                    None
                }
            }),
            Err(e) => {
                debug!(error = %e, "session storage unavailable");
                return None;
            }
        };

        let sid = match stored {
            Some(record) if !record.is_timed_out(now_ms, self.timeout_ms) => record.sid,
            _ => generate_id(),
        };

        let record = SessionRecord {
            sid: sid.clone(),
            ts: now_ms,
        };
        match serde_json::to_string(&record) {
            Ok(raw) => {
                if let Err(e) = self.ephemeral.set(SESSION_KEY, &raw) {
                    debug!(error = %e, "could not persist session record");
                }
            }
            Err(e) => debug!(error = %e, "could not encode session record"),
        }

        Some(sid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    const TIMEOUT: u64 = 30 * 60 * 1000;

    fn tracker(privacy: bool) -> (SessionTracker, MemoryStorage) {
        let storage = MemoryStorage::new();
        (
            SessionTracker::new(Arc::new(storage.clone()), TIMEOUT, privacy),
            storage,
        )
    }

    #[test]
    fn test_session_stable_within_timeout() {
        let (tracker, _) = tracker(false);
        let first = tracker.resolve_session_id(1_000).unwrap();
        let second = tracker.resolve_session_id(1_000 + TIMEOUT).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_session_renews_after_timeout() {
        let (tracker, _) = tracker(false);
        let first = tracker.resolve_session_id(0).unwrap();
        let renewed = tracker.resolve_session_id(TIMEOUT + 1).unwrap();
        assert_ne!(first, renewed);
    }

    #[test]
    fn test_every_call_refreshes_activity() {
        let (tracker, storage) = tracker(false);
        let first = tracker.resolve_session_id(0).unwrap();
        // Each call lands just under the timeout relative to the previous one.
        let mid = tracker.resolve_session_id(TIMEOUT - 1).unwrap();
        let late = tracker.resolve_session_id(2 * TIMEOUT - 2).unwrap();
        assert_eq!(first, mid);
        assert_eq!(first, late);

        let raw = storage.get(SESSION_KEY).unwrap().unwrap();
        let record: SessionRecord = serde_json::from_str(&raw).unwrap();
        assert_eq!(record.ts, 2 * TIMEOUT - 2);
    }

    #[test]
    fn test_malformed_record_is_replaced() {
        let (tracker, storage) = tracker(false);
        storage.set(SESSION_KEY, "{oops").unwrap();
        let sid = tracker.resolve_session_id(5).unwrap();
        let raw = storage.get(SESSION_KEY).unwrap().unwrap();
        let record: SessionRecord = serde_json::from_str(&raw).unwrap();
        assert_eq!(record, SessionRecord { sid, ts: 5 });
    }

    #[test]
    fn test_privacy_mode_returns_none() {
        let (tracker, storage) = tracker(true);
        assert_eq!(tracker.resolve_session_id(0), None);
        assert_eq!(storage.write_count(), 0);
    }
}
