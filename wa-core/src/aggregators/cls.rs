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

//! Cumulative layout shift with session windows.

/// Groups layout shifts into windows and tracks the worst window.
///
/// A shift joins the open window when it starts less than 1000 ms after the
/// window's latest shift and less than 5000 ms after its first; otherwise
/// it opens a new window and the old one is forgotten. Shifts caused by
/// recent input never count.
#[derive(Debug, Clone, Default)]
pub struct ClsWindow {
    first_start: Option<f64>,
    last_start: f64,
    window_value: f64,
    best: Option<f64>,
}

pub const WINDOW_GAP_MS: f64 = 1000.0;
pub const WINDOW_SPAN_MS: f64 = 5000.0;

impl ClsWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one shift entry; returns the running score.
    pub fn record(&mut self, start_time: f64, value: f64, had_recent_input: bool) -> Option<f64> {
        if had_recent_input {
            return self.best;
        }

        let joins = matches!(
            self.first_start,
            Some(first) if start_time - self.last_start < WINDOW_GAP_MS
                && start_time - first < WINDOW_SPAN_MS
        );
        if joins {
            self.window_value += value;
        } else {
            self.first_start = Some(start_time);
            self.window_value = value;
        }
        self.last_start = start_time;

        if self.best.map_or(true, |best| self.window_value > best) {
            self.best = Some(super::round_to(self.window_value, 3));
        }
        self.best
    }

    /// Largest window sum so far, rounded to three decimals.
    pub fn value(&self) -> Option<f64> {
        self.best
    }
}
