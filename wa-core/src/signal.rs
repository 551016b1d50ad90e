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

//! Raw signal vocabulary.
//!
//! The host translates its native notifications (DOM events, observer
//! callbacks, connectivity changes) into [`Signal`] values and feeds them to
//! [`crate::Pipeline::handle`]. Every type here is serde-enabled so a
//! session can be recorded as JSON lines and replayed later.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::environment::ConnectionInfo;

/// Stable host-assigned identifier of a form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FormId(pub String);

/// Stable host-assigned identifier of an observed element.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ElementId(pub String);

impl From<&str> for FormId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<&str> for ElementId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// The parts of a DOM element the pipeline reads.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ElementInfo {
    pub tag: String,
    #[serde(default)]
    pub id: Option<String>,
    /// Raw `class` attribute.
    #[serde(default)]
    pub classes: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub href: Option<String>,
    #[serde(default)]
    pub src: Option<String>,
    #[serde(default)]
    pub rel: Option<String>,
    /// Value of the `data-wa-track` attribute.
    #[serde(default)]
    pub track: Option<String>,
    /// `type` attribute of form controls.
    #[serde(default)]
    pub input_type: Option<String>,
}

impl ElementInfo {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            ..Self::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_classes(mut self, classes: impl Into<String>) -> Self {
        self.classes = Some(classes.into());
        self
    }

    pub fn with_href(mut self, href: impl Into<String>) -> Self {
        self.href = Some(href.into());
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn tag_name(&self) -> String {
        self.tag.to_ascii_lowercase()
    }

    pub fn is(&self, tag: &str) -> bool {
        self.tag.eq_ignore_ascii_case(tag)
    }

    /// `tag#id`, else `tag.c1.c2` (first two classes), else `tag`.
    pub fn selector(&self) -> String {
        let mut selector = self.tag_name();
        if let Some(id) = non_empty(&self.id) {
            selector.push('#');
            selector.push_str(id);
        } else if let Some(classes) = non_empty(&self.classes) {
            let parts: Vec<&str> = classes.split_whitespace().take(2).collect();
            if !parts.is_empty() {
                selector.push('.');
                selector.push_str(&parts.join("."));
            }
        }
        selector
    }

    /// `{tag, id, classes}` as reported in click-like payloads.
    pub fn summary(&self) -> Value {
        json!({
            "tag": self.tag_name(),
            "id": non_empty(&self.id),
            "classes": non_empty(&self.classes),
        })
    }
}

/// Selector used by replay events; `body` stands in for a missing target.
pub fn selector_or_body(element: Option<&ElementInfo>) -> String {
    match element {
        Some(el) if !el.is("body") => el.selector(),
        _ => "body".to_string(),
    }
}

pub(crate) fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

/// First `max` characters of `text`.
pub(crate) fn truncate(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

/// Navigation timing entry, milliseconds relative to navigation start.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NavigationTiming {
    pub start_time: f64,
    pub domain_lookup_start: f64,
    pub domain_lookup_end: f64,
    pub connect_start: f64,
    pub connect_end: f64,
    pub request_start: f64,
    pub response_start: f64,
    pub response_end: f64,
    pub dom_interactive: f64,
    pub dom_complete: f64,
    pub load_event_end: f64,
}

impl NavigationTiming {
    /// The `performance` object attached to the initial page view.
    pub fn performance(&self) -> Value {
        let ms = |v: f64| v.round() as i64;
        json!({
            "dns": ms(self.domain_lookup_end - self.domain_lookup_start),
            "tcp": ms(self.connect_end - self.connect_start),
            "ttfb": ms(self.response_start - self.request_start),
            "download": ms(self.response_end - self.response_start),
            "dom_interactive": ms(self.dom_interactive - self.start_time),
            "dom_complete": ms(self.dom_complete - self.start_time),
            "load": ms(self.load_event_end - self.start_time),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormInfo {
    pub form_id: FormId,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub method: Option<String>,
}

impl FormInfo {
    pub fn new(form_id: impl Into<String>) -> Self {
        Self {
            form_id: FormId(form_id.into()),
            id: None,
            name: None,
            action: None,
            method: None,
        }
    }

    pub fn payload(&self) -> serde_json::Map<String, Value> {
        let mut map = serde_json::Map::new();
        map.insert("id".into(), json!(non_empty(&self.id)));
        map.insert("name".into(), json!(non_empty(&self.name)));
        map.insert("action".into(), json!(non_empty(&self.action)));
        map.insert(
            "method".into(),
            json!(non_empty(&self.method).unwrap_or("get")),
        );
        map
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldInfo {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default, rename = "type")]
    pub field_type: Option<String>,
}

impl FieldInfo {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    /// Name, else id, else type.
    pub fn key(&self) -> String {
        non_empty(&self.name)
            .or_else(|| non_empty(&self.id))
            .or_else(|| non_empty(&self.field_type))
            .unwrap_or_default()
            .to_string()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageInfo {
    pub src: String,
    #[serde(default)]
    pub alt: Option<String>,
    #[serde(default)]
    pub natural_width: u32,
    #[serde(default)]
    pub natural_height: u32,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LongTaskAttribution {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub container_type: Option<String>,
    #[serde(default)]
    pub container_src: Option<String>,
    #[serde(default)]
    pub container_id: Option<String>,
    #[serde(default)]
    pub container_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub name: String,
    #[serde(default)]
    pub stack: Option<String>,
}

/// Reason an unhandled promise rejection carried.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RejectionReason {
    Error {
        name: String,
        message: String,
        #[serde(default)]
        stack: Option<String>,
    },
    Text {
        message: String,
    },
    Object {
        value: Value,
    },
    Other,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CspViolation {
    pub blocked_uri: Option<String>,
    pub violated_directive: Option<String>,
    pub effective_directive: Option<String>,
    pub original_policy: Option<String>,
    pub source_file: Option<String>,
    pub line_number: Option<u32>,
    pub column_number: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    Add,
    Remove,
    Attr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    MouseDown,
    KeyDown,
    TouchStart,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsoleLevel {
    Log,
    Info,
    Warn,
    Error,
    Debug,
}

impl ConsoleLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Log => "log",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
            Self::Debug => "debug",
        }
    }
}

/// A completed request observed by the network tap.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservedRequest {
    pub method: Option<String>,
    pub url: String,
    pub status: u16,
    pub duration_ms: u64,
    pub request_size: u64,
    pub response_size: u64,
    pub error: Option<String>,
}

/// One raw notification from the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Signal {
    /// History change (push, replace or pop).
    Navigate {
        url: String,
        #[serde(default)]
        title: Option<String>,
    },
    Click {
        x: f64,
        y: f64,
        /// Element under the pointer.
        #[serde(default)]
        element: Option<ElementInfo>,
        /// Closest link, button or `data-wa-track` ancestor.
        #[serde(default)]
        target: Option<ElementInfo>,
    },
    RightClick {
        x: f64,
        y: f64,
        element: ElementInfo,
    },
    MouseMove {
        x: f64,
        y: f64,
    },
    Scroll {
        #[serde(default)]
        x: f64,
        top: f64,
        viewport_height: f64,
        document_height: f64,
    },
    Activity {
        kind: ActivityKind,
    },
    Input {
        target: ElementInfo,
        #[serde(default)]
        value: String,
    },
    FieldFocus {
        form: FormInfo,
        field: FieldInfo,
    },
    FormSubmit {
        form: FormInfo,
    },
    /// The form left the document.
    FormRemoved {
        form_id: FormId,
    },
    Resize {
        width: u32,
        height: u32,
    },
    Orientation {
        #[serde(default)]
        orientation: Option<String>,
        #[serde(default)]
        angle: Option<f64>,
    },
    Visibility {
        hidden: bool,
    },
    Unload,
    Connectivity {
        online: bool,
        #[serde(default)]
        connection: Option<ConnectionInfo>,
    },
    LayoutShift {
        start_time: f64,
        value: f64,
        #[serde(default)]
        had_recent_input: bool,
    },
    LargestContentfulPaint {
        start_time: f64,
    },
    FirstInput {
        start_time: f64,
        processing_start: f64,
    },
    EventTiming {
        #[serde(default)]
        interaction_id: Option<u64>,
        duration: f64,
    },
    Paint {
        name: String,
        start_time: f64,
    },
    LongTask {
        duration: f64,
        start_time: f64,
        #[serde(default)]
        name: String,
        #[serde(default)]
        attribution: Option<LongTaskAttribution>,
    },
    /// An element carrying `data-wa-track-duration` appeared.
    ElementObserved {
        id: ElementId,
        element: ElementInfo,
        #[serde(default)]
        track_duration: Option<String>,
    },
    ElementRemoved {
        id: ElementId,
    },
    Intersection {
        id: ElementId,
        intersecting: bool,
    },
    ImageIntersection {
        id: ElementId,
        image: ImageInfo,
        intersecting: bool,
    },
    Error {
        message: String,
        #[serde(default)]
        source: Option<String>,
        #[serde(default)]
        line: Option<u32>,
        #[serde(default)]
        column: Option<u32>,
        #[serde(default)]
        error: Option<ErrorDetail>,
    },
    UnhandledRejection {
        reason: RejectionReason,
    },
    ResourceError {
        element: ElementInfo,
    },
    CspViolation(CspViolation),
    Print,
    Copy {
        #[serde(default)]
        selection: String,
    },
    DomMutation {
        kind: MutationKind,
        #[serde(default)]
        target: Option<ElementInfo>,
        #[serde(default)]
        node: Option<String>,
        #[serde(default)]
        attr: Option<String>,
    },
    Console {
        level: ConsoleLevel,
        #[serde(default)]
        args: Vec<Value>,
    },
    NetworkRequest(ObservedRequest),
}

/// A public operation, as it appears in a recorded session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Command {
    Track {
        name: String,
        #[serde(default)]
        data: Value,
    },
    Identify {
        #[serde(default)]
        user_id: Option<String>,
    },
    AbGetVariant {
        name: String,
        variants: Vec<String>,
        #[serde(default)]
        weights: Option<Vec<f64>>,
    },
    AbSetVariant {
        name: String,
        variant: String,
    },
    AbClear {
        #[serde(default)]
        name: Option<String>,
    },
    ReplayStart,
    ReplayStop,
    ReplayFlush,
    ConsoleStart,
    ConsoleStop,
    NetworkStart,
    NetworkStop,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Input {
    Signal(Signal),
    Call(Command),
}

/// One line of a recorded session: `{"at": 1200, "signal": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedInput {
    /// Epoch milliseconds.
    pub at: u64,
    #[serde(flatten)]
    pub input: Input,
}
