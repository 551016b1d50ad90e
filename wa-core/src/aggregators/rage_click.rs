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

//! Rage-click detection.

use serde_json::{json, Value};

use super::Emission;

/// Counts clicks landing close to the previous one.
///
/// The previous position starts at the origin. The pipeline restarts a
/// reset timer on every click and calls [`RageClickDetector::reset`] when
/// it fires.
#[derive(Debug, Clone)]
pub struct RageClickDetector {
    threshold: u32,
    radius_px: f64,
    last_x: f64,
    last_y: f64,
    count: u32,
}

impl RageClickDetector {
    pub fn new(threshold: u32, radius_px: f64) -> Self {
        Self {
            threshold: threshold.max(1),
            radius_px,
            last_x: 0.0,
            last_y: 0.0,
            count: 0,
        }
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    /// Register a click. Returns the emission when this click completes a
    /// burst; the count then restarts from zero.
    pub fn click(&mut self, x: f64, y: f64, element: Option<Value>) -> Option<Emission> {
        let distance = ((x - self.last_x).powi(2) + (y - self.last_y).powi(2)).sqrt();
        let mut emission = None;

        if distance < self.radius_px {
            self.count += 1;
            if self.count >= self.threshold {
                emission = Some(Emission::new(
                    "rage_click",
                    "rage_click",
                    json!({
                        "x": x,
                        "y": y,
                        "count": self.count,
                        "element": element,
                    }),
                ));
                self.count = 0;
            }
        } else {
            self.count = 1;
        }

        self.last_x = x;
        self.last_y = y;
        emission
    }

    pub fn reset(&mut self) {
        self.count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_three_close_clicks_fire_once() {
        let mut rage = RageClickDetector::new(3, 100.0);
        assert!(rage.click(0.0, 0.0, None).is_none());
        assert!(rage.click(10.0, 10.0, None).is_none());
        let fired = rage.click(20.0, 20.0, None).unwrap();
        assert_eq!(fired.event, "rage_click");
        assert_eq!(fired.get("rage_click").unwrap()["count"], 3);
        assert_eq!(rage.count(), 0);

        assert!(rage.click(25.0, 25.0, None).is_none());
        assert_eq!(rage.count(), 1);
    }

    #[test]
    fn test_far_click_restarts_at_one() {
        let mut rage = RageClickDetector::new(3, 100.0);
        rage.click(0.0, 0.0, None);
        rage.click(5.0, 5.0, None);
        assert!(rage.click(500.0, 500.0, None).is_none());
        assert_eq!(rage.count(), 1);
        rage.click(505.0, 505.0, None);
        assert!(rage.click(510.0, 510.0, None).is_some());
    }

    #[test]
    fn test_first_click_measured_from_origin() {
        let mut rage = RageClickDetector::new(3, 100.0);
        rage.click(400.0, 400.0, None);
        assert_eq!(rage.count(), 1);
        rage.reset();
        assert_eq!(rage.count(), 0);
    }
}
