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

//! Time on page, split into active and inactive.

use serde_json::json;

use super::Emission;

/// Accumulates active time while the page is visible. Hiding pauses it;
/// any user activity while paused resumes it.
#[derive(Debug, Clone)]
pub struct ActiveTimeTracker {
    page_load_ms: u64,
    active_ms: u64,
    last_active_ms: u64,
    active: bool,
    sent: bool,
}

impl ActiveTimeTracker {
    pub fn new(now_ms: u64) -> Self {
        Self {
            page_load_ms: now_ms,
            active_ms: 0,
            last_active_ms: now_ms,
            active: true,
            sent: false,
        }
    }

    fn accumulate(&mut self, now_ms: u64) {
        if self.active {
            self.active_ms += now_ms.saturating_sub(self.last_active_ms);
            self.last_active_ms = now_ms;
        }
    }

    pub fn visibility_changed(&mut self, hidden: bool, now_ms: u64) {
        self.accumulate(now_ms);
        self.active = !hidden;
        self.last_active_ms = now_ms;
    }

    pub fn activity(&mut self, now_ms: u64) {
        if !self.active {
            self.active = true;
            self.last_active_ms = now_ms;
        }
    }

    pub fn active_ms(&self) -> u64 {
        self.active_ms
    }

    /// The one-time `time_on_page` report.
    pub fn take_report(&mut self, now_ms: u64) -> Option<Emission> {
        if self.sent {
            return None;
        }
        self.accumulate(now_ms);
        self.sent = true;

        let total_ms = now_ms.saturating_sub(self.page_load_ms);
        Some(Emission::new(
            "time_on_page",
            "time_on_page",
            json!({
                "total_ms": total_ms,
                "active_ms": self.active_ms,
                "inactive_ms": total_ms.saturating_sub(self.active_ms),
            }),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hidden_time_is_inactive() {
        let mut time = ActiveTimeTracker::new(0);
        time.visibility_changed(true, 10_000);
        // Hidden for 5 s, then the user comes back.
        time.visibility_changed(false, 15_000);
        let report = time.take_report(20_000).unwrap();
        let body = report.get("time_on_page").unwrap();
        assert_eq!(body["total_ms"], 20_000);
        assert_eq!(body["active_ms"], 15_000);
        assert_eq!(body["inactive_ms"], 5_000);
        assert!(time.take_report(30_000).is_none());
    }

    #[test]
    fn test_activity_resumes_accumulation() {
        let mut time = ActiveTimeTracker::new(0);
        time.visibility_changed(true, 1_000);
        time.activity(3_000);
        time.activity(3_500);
        assert_eq!(time.take_report(4_000).unwrap().get("time_on_page").unwrap()["active_ms"], 2_000);
    }
}
