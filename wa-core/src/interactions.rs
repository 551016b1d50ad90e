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

//! Click, download, context-menu and clipboard payloads.

use serde_json::{json, Value};
use url::Url;

use crate::signal::{non_empty, truncate, ElementInfo};

/// Extensions that mark a link as a file download.
pub const DOWNLOAD_EXTENSIONS: &[&str] = &[
    "pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx", "zip", "rar", "7z", "tar", "gz", "dmg",
    "exe", "msi", "apk", "ipa", "csv", "txt", "rtf", "mp3", "mp4", "avi", "mov", "wmv", "svg",
    "eps", "ai", "psd",
];

const CLICK_TEXT_LIMIT: usize = 100;
const COPY_PREVIEW_LIMIT: usize = 100;

/// Resolve `href` against the page. Unparseable input yields `None`.
pub fn resolve_href(href: &str, page_url: &str) -> Option<Url> {
    match Url::parse(page_url) {
        Ok(base) => base.join(href).ok(),
        Err(_) => Url::parse(href).ok(),
    }
}

fn page_hostname(page_url: &str) -> Option<String> {
    Url::parse(page_url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
}

/// A link is outbound when it resolves to a different host name.
pub fn outbound_target(link: &ElementInfo, page_url: &str) -> Option<Url> {
    if !link.is("a") {
        return None;
    }
    let href = non_empty(&link.href)?;
    let url = resolve_href(href, page_url)?;
    let host = url.host_str()?;
    (Some(host.to_string()) != page_hostname(page_url)).then_some(url)
}

/// Event type and `click` payload for a click on `target`.
pub fn click_payload(target: &ElementInfo, x: f64, y: f64, page_url: &str) -> (&'static str, Value) {
    let href = non_empty(&target.href)
        .map(|h| resolve_href(h, page_url).map_or_else(|| h.to_string(), |u| u.to_string()));
    let text = target.text.as_deref().unwrap_or_default().trim();

    let mut body = json!({
        "tag": target.tag_name(),
        "id": non_empty(&target.id),
        "classes": non_empty(&target.classes),
        "text": truncate(text, CLICK_TEXT_LIMIT),
        "href": href,
        "x": x,
        "y": y,
    });

    let outbound = outbound_target(target, page_url);
    if let Some(url) = &outbound {
        body["external_hostname"] = json!(url.host_str());
        body["external_pathname"] = json!(url.path());
    }
    if let Some(track) = non_empty(&target.track) {
        body["track"] = json!(track);
    }

    let event = if outbound.is_some() { "outbound" } else { "click" };
    (event, body)
}

/// `{url, filename, extension}` when `link` points at a downloadable file.
pub fn download_payload(link: &ElementInfo, page_url: &str) -> Option<Value> {
    if !link.is("a") {
        return None;
    }
    let href = non_empty(&link.href)?;
    let url = resolve_href(href, page_url)?;
    let filename = url.path().rsplit('/').next().unwrap_or_default().to_string();
    let extension = filename.rsplit('.').next().unwrap_or_default().to_ascii_lowercase();
    if !DOWNLOAD_EXTENSIONS.contains(&extension.as_str()) {
        return None;
    }
    Some(json!({
        "url": url.as_str(),
        "filename": filename,
        "extension": extension,
    }))
}

pub fn right_click_payload(element: &ElementInfo, x: f64, y: f64, page_url: &str) -> Value {
    let mut body = json!({
        "x": x,
        "y": y,
        "element": element.summary(),
    });
    let resolve = |raw: &str| resolve_href(raw, page_url).map_or_else(|| raw.to_string(), |u| u.to_string());
    if element.is("img") {
        body["image_src"] = json!(non_empty(&element.src).map(resolve));
    } else if element.is("a") {
        body["href"] = json!(non_empty(&element.href).map(resolve));
    }
    body
}

/// `None` for an empty selection.
pub fn copy_payload(selection: &str) -> Option<Value> {
    if selection.is_empty() {
        return None;
    }
    Some(json!({
        "text_length": selection.chars().count(),
        "text_preview": truncate(selection, COPY_PREVIEW_LIMIT),
    }))
}
