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

//! Scroll depth milestones.

use serde_json::json;
use std::collections::BTreeSet;

use super::Emission;

pub const MILESTONES: [u8; 4] = [25, 50, 75, 100];

/// Percentage of the document seen, `0..=100`.
pub fn scroll_depth(top: f64, viewport_height: f64, document_height: f64) -> u8 {
    let seen = top + viewport_height;
    if !seen.is_finite() || seen <= 0.0 {
        return 0;
    }
    if !document_height.is_finite() || document_height <= 0.0 {
        return 100;
    }
    (seen / document_height * 100.0).round().clamp(0.0, 100.0) as u8
}

/// Tracks the deepest scroll and which milestones have been announced.
#[derive(Debug, Clone, Default)]
pub struct ScrollTracker {
    max_depth: u8,
    reached: BTreeSet<u8>,
}

impl ScrollTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_depth(&self) -> u8 {
        self.max_depth
    }

    /// Apply a settled depth; one emission per milestone newly crossed.
    pub fn observe(&mut self, depth: u8) -> Vec<Emission> {
        self.max_depth = self.max_depth.max(depth);

        let mut emissions = Vec::new();
        for milestone in MILESTONES {
            if depth >= milestone && self.reached.insert(milestone) {
                emissions.push(Emission::new(
                    "scroll_milestone",
                    "scroll_milestone",
                    json!({ "milestone": milestone, "current_depth": depth }),
                ));
            }
        }
        emissions
    }

    /// Page-level summary, sent on hide and unload.
    pub fn summary(&self) -> Option<Emission> {
        if self.max_depth == 0 {
            return None;
        }
        let reached: Vec<u8> = self.reached.iter().copied().collect();
        Some(Emission::new(
            "scroll",
            "scroll",
            json!({ "max_depth": self.max_depth, "milestones_reached": reached }),
        ))
    }

    pub fn reset(&mut self) {
        self.max_depth = 0;
        self.reached.clear();
    }
}
