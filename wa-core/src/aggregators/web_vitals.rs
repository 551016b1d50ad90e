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

//! Core web vitals accumulator.

use serde::Serialize;
use serde_json::to_value;

use super::{ClsWindow, Emission};

/// Best value per metric, whole milliseconds except CLS.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WebVitalsSnapshot {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lcp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fid: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cls: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttfb: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fcp: Option<i64>,
}

impl WebVitalsSnapshot {
    /// Only LCP, FID, CLS and INP make a report worth sending.
    pub fn has_data(&self) -> bool {
        self.lcp.is_some() || self.fid.is_some() || self.cls.is_some() || self.inp.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct WebVitals {
    snapshot: WebVitalsSnapshot,
    cls: ClsWindow,
    inp_max: f64,
    inp_threshold_ms: f64,
    sent: bool,
}

impl WebVitals {
    pub fn new(inp_threshold_ms: f64) -> Self {
        Self {
            snapshot: WebVitalsSnapshot::default(),
            cls: ClsWindow::new(),
            inp_max: 0.0,
            inp_threshold_ms,
            sent: false,
        }
    }

    pub fn snapshot(&self) -> &WebVitalsSnapshot {
        &self.snapshot
    }

    /// Latest largest-contentful-paint entry wins.
    pub fn largest_contentful_paint(&mut self, start_time: f64) {
        self.snapshot.lcp = Some(start_time.round() as i64);
    }

    /// Latches the first entry with a processing start.
    pub fn first_input(&mut self, start_time: f64, processing_start: f64) {
        if processing_start > 0.0 && self.snapshot.fid.is_none() {
            self.snapshot.fid = Some((processing_start - start_time).round() as i64);
        }
    }

    pub fn layout_shift(&mut self, start_time: f64, value: f64, had_recent_input: bool) {
        self.snapshot.cls = self.cls.record(start_time, value, had_recent_input);
    }

    /// Longest interaction at or above the reporting threshold.
    pub fn event_timing(&mut self, interaction_id: Option<u64>, duration: f64) {
        if !matches!(interaction_id, Some(id) if id > 0) || duration < self.inp_threshold_ms {
            return;
        }
        if duration > self.inp_max {
            self.inp_max = duration;
            self.snapshot.inp = Some(duration.round() as i64);
        }
    }

    pub fn paint(&mut self, name: &str, start_time: f64) {
        if name == "first-contentful-paint" {
            self.snapshot.fcp = Some(start_time.round() as i64);
        }
    }

    pub fn navigation(&mut self, response_start: f64) {
        self.snapshot.ttfb = Some(response_start.round() as i64);
    }

    /// The one-time `webvitals` report. `None` if already sent or there is
    /// nothing worth reporting yet.
    pub fn take_report(&mut self) -> Option<Emission> {
        if self.sent || !self.snapshot.has_data() {
            return None;
        }
        let body = to_value(&self.snapshot).ok()?;
        self.sent = true;
        Some(Emission::new("webvitals", "web_vitals", body))
    }

    pub fn is_sent(&self) -> bool {
        self.sent
    }
}
