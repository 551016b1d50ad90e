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

//! Console and network taps.
//!
//! A tap is installed once through the host's [`TapHost`], which wraps its
//! native console or request primitive so each call is reported to the
//! pipeline and then forwarded unchanged. `restore` puts the original
//! primitive back. While a tap is not installed its signals are ignored.

use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;
use url::Url;

use crate::signal::{truncate, ConsoleLevel, ObservedRequest};

/// Per-argument limit of rendered console messages.
pub const CONSOLE_ARG_LIMIT: usize = 500;
/// Limit of reported request URLs.
pub const REQUEST_URL_LIMIT: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TapKind {
    Console,
    Network,
}

/// Installs and removes the host-side wrappers.
pub trait TapHost: Send + Sync {
    fn install(&self, tap: TapKind);
    fn restore(&self, tap: TapKind);
}

/// Host without interceptable primitives; the taps only gate signals.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTapHost;

impl TapHost for NoopTapHost {
    fn install(&self, _tap: TapKind) {}
    fn restore(&self, _tap: TapKind) {}
}

pub struct Interceptors {
    host: Arc<dyn TapHost>,
    console: bool,
    network: bool,
}

impl Interceptors {
    pub fn new(host: Arc<dyn TapHost>) -> Self {
        Self {
            host,
            console: false,
            network: false,
        }
    }

    fn flag(&mut self, tap: TapKind) -> &mut bool {
        match tap {
            TapKind::Console => &mut self.console,
            TapKind::Network => &mut self.network,
        }
    }

    pub fn is_installed(&self, tap: TapKind) -> bool {
        match tap {
            TapKind::Console => self.console,
            TapKind::Network => self.network,
        }
    }

    /// Install `tap` unless already installed.
    pub fn start(&mut self, tap: TapKind) {
        let installed = self.flag(tap);
        if *installed {
            return;
        }
        *installed = true;
        self.host.install(tap);
        debug!(?tap, "tap installed");
    }

    /// Restore the original primitive. Always forwarded to the host.
    pub fn stop(&mut self, tap: TapKind) {
        *self.flag(tap) = false;
        self.host.restore(tap);
        debug!(?tap, "tap restored");
    }

    pub fn stop_all(&mut self) {
        for tap in [TapKind::Console, TapKind::Network] {
            if self.is_installed(tap) {
                self.stop(tap);
            }
        }
    }
}

fn render_arg(arg: &Value) -> String {
    match arg {
        Value::Null => "null".to_string(),
        Value::String(s) => truncate(s, CONSOLE_ARG_LIMIT),
        Value::Array(_) | Value::Object(_) => truncate(&arg.to_string(), CONSOLE_ARG_LIMIT),
        other => truncate(&other.to_string(), CONSOLE_ARG_LIMIT),
    }
}

/// Space-joined rendering of console arguments.
pub fn format_console_args(args: &[Value]) -> String {
    args.iter().map(render_arg).collect::<Vec<_>>().join(" ")
}

pub fn console_payload(level: ConsoleLevel, args: &[Value], now_ms: u64) -> Value {
    json!({
        "level": level.as_str(),
        "message": format_console_args(args),
        "timestamp": now_ms,
    })
}

/// Whether a request should be reported: it must resolve against the page
/// and must not target the collector itself.
pub fn should_track_request(url: &str, page_url: &str, endpoint: Option<&str>) -> bool {
    if url.is_empty() {
        return false;
    }
    let resolved = match Url::parse(page_url).and_then(|base| base.join(url)) {
        Ok(resolved) => resolved,
        Err(_) => match Url::parse(url) {
            Ok(absolute) => absolute,
            Err(_) => return false,
        },
    };
    !matches!(endpoint, Some(e) if !e.is_empty() && resolved.as_str().starts_with(e))
}

pub fn request_payload(request: &ObservedRequest, now_ms: u64) -> Value {
    json!({
        "method": request
            .method
            .as_deref()
            .map(str::to_ascii_uppercase)
            .unwrap_or_else(|| "GET".to_string()),
        "url": truncate(&request.url, REQUEST_URL_LIMIT),
        "status": request.status,
        "duration_ms": request.duration_ms,
        "request_size": request.request_size,
        "response_size": request.response_size,
        "error": request.error,
        "timestamp": now_ms,
    })
}
