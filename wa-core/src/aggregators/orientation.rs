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

use serde_json::json;

use super::Emission;

#[derive(Debug, Clone, Default)]
pub struct OrientationTracker {
    current: Option<String>,
}

impl OrientationTracker {
    pub fn new(current: Option<String>) -> Self {
        Self { current }
    }

    /// `orientation_change` when the orientation type differs from the last one.
    pub fn change(&mut self, orientation: Option<String>, angle: Option<f64>) -> Option<Emission> {
        if orientation == self.current {
            return None;
        }
        let previous = std::mem::replace(&mut self.current, orientation);
        Some(Emission::new(
            "orientation_change",
            "orientation",
            json!({
                "previous": previous,
                "current": self.current,
                "angle": angle,
            }),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_change_detection() {
        let mut orientation = OrientationTracker::new(Some("portrait-primary".into()));
        assert!(orientation
            .change(Some("portrait-primary".into()), Some(0.0))
            .is_none());
        let changed = orientation
            .change(Some("landscape-primary".into()), Some(90.0))
            .unwrap();
        let body = changed.get("orientation").unwrap();
        assert_eq!(body["previous"], "portrait-primary");
        assert_eq!(body["current"], "landscape-primary");
        assert_eq!(body["angle"], 90.0);
    }
}
