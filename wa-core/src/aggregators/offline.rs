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

//! Offline duration accumulator.

use serde_json::json;

use super::Emission;

#[derive(Debug, Clone, Default)]
pub struct OfflineTracker {
    online: bool,
    offline_since: Option<u64>,
    total_offline_ms: u64,
}

impl OfflineTracker {
    /// Starting offline opens an offline span at `now_ms`.
    pub fn new(online: bool, now_ms: u64) -> Self {
        Self {
            online,
            offline_since: if online { None } else { Some(now_ms) },
            total_offline_ms: 0,
        }
    }

    pub fn is_online(&self) -> bool {
        self.online
    }

    pub fn total_offline_ms(&self) -> u64 {
        self.total_offline_ms
    }

    /// Apply a connectivity transition. Returns `network_restored` when an
    /// offline span just ended.
    pub fn transition(&mut self, online: bool, now_ms: u64) -> Option<Emission> {
        self.online = online;
        if !online {
            self.offline_since = Some(now_ms);
            return None;
        }

        let since = self.offline_since.take()?;
        let duration = now_ms.saturating_sub(since);
        self.total_offline_ms += duration;
        Some(Emission::new(
            "network_restored",
            "network",
            json!({
                "offline_duration_ms": duration,
                "total_offline_time_ms": self.total_offline_ms,
            }),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_restored_carries_span_and_total() {
        let mut net = OfflineTracker::new(true, 0);
        assert!(net.transition(false, 1_000).is_none());
        let first = net.transition(true, 4_000).unwrap();
        assert_eq!(first.get("network").unwrap()["offline_duration_ms"], 3_000);

        net.transition(false, 10_000);
        let second = net.transition(true, 12_000).unwrap();
        let body = second.get("network").unwrap();
        assert_eq!(body["offline_duration_ms"], 2_000);
        assert_eq!(body["total_offline_time_ms"], 5_000);
    }

    #[test]
    fn test_online_without_recorded_start_is_silent() {
        let mut net = OfflineTracker::new(true, 0);
        assert!(net.transition(true, 500).is_none());
    }

    #[test]
    fn test_starting_offline_counts_from_init() {
        let mut net = OfflineTracker::new(false, 2_000);
        let restored = net.transition(true, 2_500).unwrap();
        assert_eq!(restored.get("network").unwrap()["offline_duration_ms"], 500);
        assert!(net.is_online());
    }
}
