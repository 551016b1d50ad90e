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

//! Interaction replay buffer.
//!
//! Fine-grained interaction events are appended to an ordered buffer and
//! drained as one batch when the buffer fills, when the periodic flush
//! timer fires, on hide and on unload. Draining an empty buffer yields
//! nothing, so overlapping flush triggers are harmless.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::identity::generate_id;
use crate::signal::truncate;

/// Character limit of recorded input values.
pub const INPUT_VALUE_LIMIT: usize = 100;
pub const PASSWORD_MASK: &str = "***";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplayKind {
    Snapshot,
    Mouse,
    Click,
    Scroll,
    Input,
    Resize,
    DomAdd,
    DomRemove,
    DomAttr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayEvent {
    /// Epoch milliseconds.
    pub t: u64,
    #[serde(rename = "type")]
    pub kind: ReplayKind,
    pub data: Value,
}

/// A drained buffer, ready to become a `replay` envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayBatch {
    pub session_id: Option<String>,
    pub events: Vec<ReplayEvent>,
}

impl ReplayBatch {
    pub fn payload(&self) -> Value {
        json!({
            "session_id": self.session_id,
            "events": self.events,
        })
    }
}

/// Value to record for a form control: masked for passwords, otherwise
/// truncated.
pub fn mask_input(input_type: Option<&str>, value: &str) -> String {
    if matches!(input_type, Some(t) if t.eq_ignore_ascii_case("password")) {
        PASSWORD_MASK.to_string()
    } else {
        truncate(value, INPUT_VALUE_LIMIT)
    }
}

#[derive(Debug)]
pub struct ReplayBuffer {
    capacity: usize,
    enabled: bool,
    session_id: Option<String>,
    events: Vec<ReplayEvent>,
}

impl ReplayBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            enabled: false,
            session_id: None,
            events: Vec::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.enabled
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Enable capture under a fresh replay session id. Returns `false` if
    /// capture was already on. The caller records the initial snapshot.
    pub fn start(&mut self) -> bool {
        if self.enabled {
            return false;
        }
        self.enabled = true;
        self.session_id = Some(generate_id());
        debug!(session_id = ?self.session_id, "replay capture started");
        true
    }

    /// Append an event. Returns the drained batch when this append fills
    /// the buffer. Ignored while capture is off.
    pub fn record(&mut self, now_ms: u64, kind: ReplayKind, data: Value) -> Option<ReplayBatch> {
        if !self.enabled {
            return None;
        }
        self.events.push(ReplayEvent {
            t: now_ms,
            kind,
            data,
        });
        if self.events.len() >= self.capacity {
            self.flush()
        } else {
            None
        }
    }

    /// Drain everything buffered. `None` when empty.
    pub fn flush(&mut self) -> Option<ReplayBatch> {
        if self.events.is_empty() {
            return None;
        }
        let events = std::mem::take(&mut self.events);
        debug!(events = events.len(), "flushing replay buffer");
        Some(ReplayBatch {
            session_id: self.session_id.clone(),
            events,
        })
    }

    /// Flush, then disable capture. `None` if capture was off or the
    /// buffer was empty.
    pub fn stop(&mut self) -> Option<ReplayBatch> {
        if !self.enabled {
            return None;
        }
        let batch = self.flush();
        self.enabled = false;
        batch
    }
}
