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

//! Element visibility duration and first-view image tracking.

use serde_json::json;
use std::collections::{HashMap, HashSet};

use super::Emission;
use crate::clock::iso_timestamp;
use crate::signal::{ElementId, ElementInfo, ImageInfo};

#[derive(Debug, Clone, PartialEq)]
pub struct ElementVisibility {
    pub visible_ms: u64,
    pub last_visible: Option<u64>,
    pub first_seen: Option<u64>,
    pub selector: String,
}

impl ElementVisibility {
    fn total_at(&self, now_ms: u64) -> u64 {
        self.visible_ms + self.last_visible.map_or(0, |since| now_ms.saturating_sub(since))
    }
}

/// Registry of elements whose on-screen time is measured, plus the set of
/// images already reported as seen.
#[derive(Debug, Clone, Default)]
pub struct VisibilityRegistry {
    elements: HashMap<ElementId, ElementVisibility>,
    order: Vec<ElementId>,
    seen_images: HashSet<ElementId>,
}

impl VisibilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking `id`. The tracking attribute value, when present,
    /// replaces the derived selector. Re-registering is a no-op.
    pub fn register(&mut self, id: ElementId, element: &ElementInfo, track_duration: Option<&str>) {
        if self.elements.contains_key(&id) {
            return;
        }
        let selector = match track_duration.filter(|t| !t.is_empty()) {
            Some(track) => track.to_string(),
            None => element.selector(),
        };
        self.order.push(id.clone());
        self.elements.insert(
            id,
            ElementVisibility {
                visible_ms: 0,
                last_visible: None,
                first_seen: None,
                selector,
            },
        );
    }

    pub fn remove(&mut self, id: &ElementId) {
        if self.elements.remove(id).is_some() {
            self.order.retain(|tracked| tracked != id);
        }
    }

    pub fn get(&self, id: &ElementId) -> Option<&ElementVisibility> {
        self.elements.get(id)
    }

    /// Apply an intersection change. Unregistered ids are ignored.
    pub fn intersect(&mut self, id: &ElementId, intersecting: bool, now_ms: u64) {
        let Some(data) = self.elements.get_mut(id) else {
            return;
        };
        if intersecting {
            data.last_visible = Some(now_ms);
            data.first_seen.get_or_insert(now_ms);
        } else if let Some(since) = data.last_visible.take() {
            data.visible_ms += now_ms.saturating_sub(since);
        }
    }

    /// One `element_visibility` per element seen for longer than
    /// `min_visible_ms`, counting any span still open at `now_ms`.
    pub fn report(&self, now_ms: u64, min_visible_ms: u64) -> Vec<Emission> {
        self.order
            .iter()
            .filter_map(|id| self.elements.get(id))
            .filter(|data| data.total_at(now_ms) > min_visible_ms)
            .map(|data| {
                Emission::new(
                    "element_visibility",
                    "element_visibility",
                    json!({
                        "selector": data.selector,
                        "visible_time_ms": data.total_at(now_ms),
                        "first_seen": data.first_seen.map(iso_timestamp),
                    }),
                )
            })
            .collect()
    }

    /// `image_visible` the first time an image intersects.
    pub fn image_intersection(&mut self, id: &ElementId, image: &ImageInfo, intersecting: bool) -> Option<Emission> {
        if !intersecting || !self.seen_images.insert(id.clone()) {
            return None;
        }
        let pick = |natural: u32, layout: u32| if natural > 0 { natural } else { layout };
        Some(Emission::new(
            "image_visible",
            "image",
            json!({
                "src": image.src,
                "alt": image.alt.as_deref().filter(|a| !a.is_empty()),
                "width": pick(image.natural_width, image.width),
                "height": pick(image.natural_height, image.height),
            }),
        ))
    }
}
