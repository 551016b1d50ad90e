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

//! Settled viewport resizes.

use serde_json::json;

use super::Emission;

/// Remembers the last reported viewport. The pipeline debounces raw
/// resize signals and calls [`ResizeTracker::settle`] once per burst.
#[derive(Debug, Clone)]
pub struct ResizeTracker {
    width: u32,
    height: u32,
}

impl ResizeTracker {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn settle(&mut self, width: u32, height: u32) -> Option<Emission> {
        if width == self.width && height == self.height {
            return None;
        }
        let emission = Emission::new(
            "resize",
            "resize",
            json!({
                "previous_width": self.width,
                "previous_height": self.height,
                "current_width": width,
                "current_height": height,
            }),
        );
        self.width = width;
        self.height = height;
        Some(emission)
    }
}
