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

use serde_json::{json, Value};

use super::Emission;
use crate::signal::{non_empty, LongTaskAttribution};

/// Reports main-thread tasks longer than the threshold.
#[derive(Debug, Clone, Copy)]
pub struct LongTaskFilter {
    threshold_ms: f64,
}

impl LongTaskFilter {
    pub fn new(threshold_ms: f64) -> Self {
        Self { threshold_ms }
    }

    pub fn observe(
        &self,
        duration: f64,
        start_time: f64,
        name: &str,
        attribution: Option<&LongTaskAttribution>,
    ) -> Option<Emission> {
        if duration <= self.threshold_ms {
            return None;
        }
        let mut body = json!({
            "duration": duration.round() as i64,
            "start_time": start_time.round() as i64,
            "name": name,
        });
        if let (Some(a), Value::Object(map)) = (attribution, &mut body) {
            map.insert(
                "attribution".into(),
                json!({
                    "name": non_empty(&a.name),
                    "container_type": non_empty(&a.container_type),
                    "container_src": non_empty(&a.container_src),
                    "container_id": non_empty(&a.container_id),
                    "container_name": non_empty(&a.container_name),
                }),
            );
        }
        Some(Emission::new("long_task", "long_task", body))
    }
}
