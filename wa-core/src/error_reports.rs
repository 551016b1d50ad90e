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

//! JavaScript error, rejection, resource and CSP reports.

use regex::Regex;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::OnceLock;

use crate::signal::{non_empty, truncate, CspViolation, ElementInfo, ErrorDetail, RejectionReason};

pub const MESSAGE_LIMIT: usize = 1000;
/// Only the first lines of a stack are parsed.
pub const STACK_LINE_LIMIT: usize = 10;
const REJECTION_JSON_LIMIT: usize = 500;
const CSP_POLICY_LIMIT: usize = 500;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StackFrame {
    pub func: String,
    pub file: String,
    pub line: u32,
    pub col: u32,
}

static V8_NAMED: OnceLock<Regex> = OnceLock::new();
static V8_ANONYMOUS: OnceLock<Regex> = OnceLock::new();
static GECKO: OnceLock<Regex> = OnceLock::new();

fn v8_named() -> &'static Regex {
    V8_NAMED.get_or_init(|| {
        Regex::new(r"at\s+(.+?)\s+\((.+?):(\d+):(\d+)\)").expect("valid stack frame regex")
    })
}

fn v8_anonymous() -> &'static Regex {
    V8_ANONYMOUS
        .get_or_init(|| Regex::new(r"at\s+(.+?):(\d+):(\d+)").expect("valid stack frame regex"))
}

fn gecko() -> &'static Regex {
    GECKO.get_or_init(|| Regex::new(r"(.+?)@(.+?):(\d+):(\d+)").expect("valid stack frame regex"))
}

fn parse_frame(line: &str) -> Option<StackFrame> {
    let number = |s: &str| s.parse::<u32>().ok();

    if let Some(caps) = v8_named().captures(line) {
        return Some(StackFrame {
            func: caps[1].to_string(),
            file: caps[2].to_string(),
            line: number(&caps[3])?,
            col: number(&caps[4])?,
        });
    }
    if let Some(caps) = v8_anonymous().captures(line) {
        return Some(StackFrame {
            func: "(anonymous)".to_string(),
            file: caps[1].to_string(),
            line: number(&caps[2])?,
            col: number(&caps[3])?,
        });
    }
    let caps = gecko().captures(line)?;
    Some(StackFrame {
        func: caps[1].to_string(),
        file: caps[2].to_string(),
        line: number(&caps[3])?,
        col: number(&caps[4])?,
    })
}

/// Frames from V8 (`at f (file:1:2)`, `at file:1:2`) and Gecko
/// (`f@file:1:2`) stacks. Unrecognised lines are skipped.
pub fn parse_stack_trace(stack: &str) -> Vec<StackFrame> {
    stack
        .lines()
        .take(STACK_LINE_LIMIT)
        .filter_map(parse_frame)
        .collect()
}

fn zero_as_null(value: Option<u32>) -> Option<u32> {
    value.filter(|v| *v != 0)
}

/// Payload of an uncaught error.
pub fn error_payload(
    message: &str,
    source: Option<&str>,
    line: Option<u32>,
    column: Option<u32>,
    error: Option<&ErrorDetail>,
) -> Value {
    let mut body = json!({
        "message": truncate(message, MESSAGE_LIMIT),
        "type": error.map_or("Error", |e| e.name.as_str()),
        "source": source.filter(|s| !s.is_empty()),
        "line": zero_as_null(line),
        "column": zero_as_null(column),
    });
    if let Some(stack) = error.and_then(|e| e.stack.as_deref()).filter(|s| !s.is_empty()) {
        body["stack"] = json!(parse_stack_trace(stack));
    }
    body
}

/// Payload of an unhandled promise rejection.
pub fn rejection_payload(reason: &RejectionReason) -> Value {
    let (message, kind, stack) = match reason {
        RejectionReason::Error { name, message, stack } => {
            (message.clone(), name.as_str(), stack.as_deref())
        }
        RejectionReason::Text { message } => (message.clone(), "UnhandledRejection", None),
        RejectionReason::Object { value } => {
            let message = match value.get("message") {
                Some(Value::String(m)) if !m.is_empty() => m.clone(),
                _ => truncate(&value.to_string(), REJECTION_JSON_LIMIT),
            };
            (message, "UnhandledRejection", None)
        }
        RejectionReason::Other => (
            "Unhandled Promise Rejection".to_string(),
            "UnhandledRejection",
            None,
        ),
    };

    let mut body = json!({
        "message": truncate(&message, MESSAGE_LIMIT),
        "type": kind,
        "source": Value::Null,
        "line": Value::Null,
        "column": Value::Null,
    });
    if let Some(stack) = stack.filter(|s| !s.is_empty()) {
        body["stack"] = json!(parse_stack_trace(stack));
    }
    body
}

/// Payload of a failed image, script or stylesheet load.
pub fn resource_error_payload(element: &ElementInfo) -> Value {
    let tag = element.tag_name();
    let (kind, url) = match tag.as_str() {
        "img" => ("image", non_empty(&element.src)),
        "script" => ("script", non_empty(&element.src)),
        "link" => {
            let kind = match non_empty(&element.rel) {
                Some(rel) if rel.eq_ignore_ascii_case("stylesheet") => "stylesheet",
                _ => "link",
            };
            (kind, non_empty(&element.href))
        }
        _ => ("unknown", None),
    };
    json!({ "type": kind, "url": url, "tag": tag })
}

pub fn csp_payload(violation: &CspViolation) -> Value {
    json!({
        "blocked_uri": violation.blocked_uri,
        "violated_directive": violation.violated_directive,
        "effective_directive": violation.effective_directive,
        "original_policy": violation
            .original_policy
            .as_deref()
            .filter(|p| !p.is_empty())
            .map(|p| truncate(p, CSP_POLICY_LIMIT)),
        "source_file": violation.source_file,
        "line_number": violation.line_number,
        "column_number": violation.column_number,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_v8_stack() {
        let stack = "TypeError: x is undefined\n    at render (https://example.com/app.js:10:5)\n    at https://example.com/vendor.js:200:17";
        let frames = parse_stack_trace(stack);
        assert_eq!(frames.len(), 2);
        assert_eq!(
            frames[0],
            StackFrame {
                func: "render".into(),
                file: "https://example.com/app.js".into(),
                line: 10,
                col: 5,
            }
        );
        assert_eq!(frames[1].func, "(anonymous)");
        assert_eq!(frames[1].file, "https://example.com/vendor.js");
        assert_eq!(frames[1].line, 200);
    }

    #[test]
    fn test_parse_gecko_stack() {
        let frames = parse_stack_trace("handler@https://example.com/app.js:3:9\ngarbage line");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].func, "handler");
        assert_eq!(frames[0].col, 9);
    }

    #[test]
    fn test_only_first_lines_parsed() {
        let stack = (0..20)
            .map(|i| format!("    at f{} (a.js:{}:1)", i, i + 1))
            .collect::<Vec<_>>()
            .join("\n");
        assert_eq!(parse_stack_trace(&stack).len(), STACK_LINE_LIMIT);
    }

    #[test]
    fn test_error_payload_shape() {
        let detail = ErrorDetail {
            name: "TypeError".into(),
            stack: Some("at f (a.js:1:2)".into()),
        };
        let body = error_payload(&"m".repeat(1500), Some("a.js"), Some(0), Some(4), Some(&detail));
        assert_eq!(body["message"].as_str().unwrap().len(), 1000);
        assert_eq!(body["type"], "TypeError");
        assert!(body["line"].is_null());
        assert_eq!(body["column"], 4);
        assert_eq!(body["stack"][0]["func"], "f");

        let plain = error_payload("boom", None, None, None, None);
        assert_eq!(plain["type"], "Error");
        assert!(plain.get("stack").is_none());
    }

    #[test]
    fn test_rejection_reasons() {
        let other = rejection_payload(&RejectionReason::Other);
        assert_eq!(other["message"], "Unhandled Promise Rejection");
        assert_eq!(other["type"], "UnhandledRejection");

        let object = rejection_payload(&RejectionReason::Object {
            value: json!({"code": 42}),
        });
        assert_eq!(object["message"], "{\"code\":42}");

        let with_message = rejection_payload(&RejectionReason::Object {
            value: json!({"message": "denied"}),
        });
        assert_eq!(with_message["message"], "denied");

        let error = rejection_payload(&RejectionReason::Error {
            name: "RangeError".into(),
            message: "too big".into(),
            stack: None,
        });
        assert_eq!(error["type"], "RangeError");
        assert_eq!(error["message"], "too big");
    }

    #[test]
    fn test_resource_kinds() {
        let mut link = ElementInfo::new("LINK").with_href("https://cdn.example.com/site.css");
        link.rel = Some("stylesheet".into());
        let body = resource_error_payload(&link);
        assert_eq!(body["type"], "stylesheet");
        assert_eq!(body["tag"], "link");
        assert_eq!(body["url"], "https://cdn.example.com/site.css");

        let mut img = ElementInfo::new("img");
        img.src = Some("/logo.png".into());
        assert_eq!(resource_error_payload(&img)["type"], "image");
        assert_eq!(resource_error_payload(&ElementInfo::new("video"))["type"], "unknown");
    }
}
