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

//! Windowed signal aggregators.
//!
//! Each aggregator is a plain state machine: it consumes raw measurements
//! and returns zero or more [`Emission`]s for the pipeline to wrap into
//! envelopes. Timers (debounce, reset) are owned by the pipeline's
//! scheduler, never by the aggregators.

pub mod active_time;
pub mod cls;
pub mod form_funnel;
pub mod long_task;
pub mod offline;
pub mod orientation;
pub mod rage_click;
pub mod resize;
pub mod scroll;
pub mod visibility;
pub mod web_vitals;

pub use active_time::ActiveTimeTracker;
pub use cls::ClsWindow;
pub use form_funnel::{FormFunnel, FormSession};
pub use long_task::LongTaskFilter;
pub use offline::OfflineTracker;
pub use orientation::OrientationTracker;
pub use rage_click::RageClickDetector;
pub use resize::ResizeTracker;
pub use scroll::ScrollTracker;
pub use visibility::{ElementVisibility, VisibilityRegistry};
pub use web_vitals::{WebVitals, WebVitalsSnapshot};

use serde_json::Value;

use crate::envelope::{payload, Payload};

/// A derived event: envelope type plus payload fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Emission {
    pub event: &'static str,
    pub payload: Payload,
}

impl Emission {
    /// Event whose payload nests `value` under `key`.
    pub fn new(event: &'static str, key: &str, value: Value) -> Self {
        Self {
            event,
            payload: payload(key, value),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }
}

/// Round half away from zero to `decimals` places.
pub(crate) fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}
