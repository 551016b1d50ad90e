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

//! Page, browser, screen and device context.
//!
//! The host exposes its current state through the [`Environment`] trait;
//! the envelope builder asks for a fresh [`EnvironmentSnapshot`] on every
//! event. [`SharedEnvironment`] is a ready-made implementation that keeps
//! itself current from the signals the pipeline sees.

use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};
use url::Url;

use crate::signal::{NavigationTiming, Signal};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageInfo {
    pub url: String,
    pub path: String,
    pub search: String,
    pub hash: String,
    pub title: String,
    pub referrer: String,
}

impl PageInfo {
    /// Split `url` into its location parts. Unparseable URLs keep only `url`.
    pub fn from_url(url: &str, title: &str, referrer: &str) -> Self {
        let mut page = Self {
            url: url.to_string(),
            title: title.to_string(),
            referrer: referrer.to_string(),
            ..Self::default()
        };
        page.set_location(url);
        page
    }

    fn set_location(&mut self, url: &str) {
        self.url = url.to_string();
        if let Ok(parsed) = Url::parse(url) {
            self.path = parsed.path().to_string();
            self.search = parsed.query().map(|q| format!("?{}", q)).unwrap_or_default();
            self.hash = parsed.fragment().map(|f| format!("#{}", f)).unwrap_or_default();
        }
    }

    pub fn hostname(&self) -> Option<String> {
        Url::parse(&self.url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BrowserInfo {
    pub user_agent: String,
    pub language: String,
    pub languages: Vec<String>,
    pub cookies_enabled: bool,
    pub do_not_track: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreenInfo {
    pub width: u32,
    pub height: u32,
    pub pixel_ratio: f64,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub color_depth: u32,
}

impl Default for ScreenInfo {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            pixel_ratio: 1.0,
            viewport_width: 1920,
            viewport_height: 1080,
            color_depth: 24,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    #[serde(rename = "type")]
    pub device_type: String,
    pub touch: bool,
    pub memory: Option<f64>,
    pub cores: Option<u32>,
}

impl DeviceInfo {
    pub fn from_user_agent(user_agent: &str, touch: bool, memory: Option<f64>, cores: Option<u32>) -> Self {
        Self {
            device_type: device_type(user_agent).to_string(),
            touch,
            memory,
            cores,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimezoneInfo {
    pub name: String,
    /// Minutes behind UTC, as browsers report it.
    pub offset: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    #[serde(rename = "type", default)]
    pub connection_type: Option<String>,
    #[serde(default)]
    pub downlink: Option<f64>,
    #[serde(default)]
    pub rtt: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentSnapshot {
    pub page: PageInfo,
    pub browser: BrowserInfo,
    pub screen: ScreenInfo,
    pub device: DeviceInfo,
    pub timezone: TimezoneInfo,
    #[serde(default)]
    pub connection: Option<ConnectionInfo>,
}

/// Host context provider.
pub trait Environment: Send + Sync {
    fn snapshot(&self) -> EnvironmentSnapshot;

    /// Navigation timing of the current document, once available.
    fn navigation_timing(&self) -> Option<NavigationTiming> {
        None
    }

    fn is_online(&self) -> bool {
        true
    }

    /// Screen orientation type, e.g. `portrait-primary`.
    fn orientation(&self) -> Option<String> {
        None
    }

    /// Called with every signal before the pipeline handles it.
    fn observe(&self, _signal: &Signal) {}
}

#[derive(Debug, Clone, Default)]
struct EnvironmentState {
    snapshot: EnvironmentSnapshot,
    navigation: Option<NavigationTiming>,
    online: bool,
    orientation: Option<String>,
}

/// In-process environment updated from navigation, resize, orientation
/// and connectivity signals. Clones share state.
#[derive(Debug, Clone)]
pub struct SharedEnvironment {
    state: Arc<RwLock<EnvironmentState>>,
}

impl SharedEnvironment {
    pub fn new(snapshot: EnvironmentSnapshot) -> Self {
        Self {
            state: Arc::new(RwLock::new(EnvironmentState {
                snapshot,
                online: true,
                ..EnvironmentState::default()
            })),
        }
    }

    /// Desktop defaults for a page at `url`.
    pub fn for_url(url: &str) -> Self {
        let user_agent = "Mozilla/5.0 (X11; Linux x86_64)";
        Self::new(EnvironmentSnapshot {
            page: PageInfo::from_url(url, "", ""),
            browser: BrowserInfo {
                user_agent: user_agent.to_string(),
                language: "en-US".to_string(),
                languages: vec!["en-US".to_string()],
                cookies_enabled: true,
                do_not_track: false,
            },
            screen: ScreenInfo::default(),
            device: DeviceInfo::from_user_agent(user_agent, false, None, None),
            timezone: TimezoneInfo {
                name: "UTC".to_string(),
                offset: 0,
            },
            connection: None,
        })
    }

    pub fn with_navigation_timing(self, timing: NavigationTiming) -> Self {
        self.state.write().navigation = Some(timing);
        self
    }

    pub fn with_orientation(self, orientation: impl Into<String>) -> Self {
        self.state.write().orientation = Some(orientation.into());
        self
    }

    pub fn set_online(&self, online: bool) {
        self.state.write().online = online;
    }

    pub fn update(&self, f: impl FnOnce(&mut EnvironmentSnapshot)) {
        f(&mut self.state.write().snapshot);
    }
}

impl Environment for SharedEnvironment {
    fn snapshot(&self) -> EnvironmentSnapshot {
        self.state.read().snapshot.clone()
    }

    fn navigation_timing(&self) -> Option<NavigationTiming> {
        self.state.read().navigation.clone()
    }

    fn is_online(&self) -> bool {
        self.state.read().online
    }

    fn orientation(&self) -> Option<String> {
        self.state.read().orientation.clone()
    }

    fn observe(&self, signal: &Signal) {
        let mut state = self.state.write();
        match signal {
            Signal::Navigate { url, title } => {
                state.snapshot.page.set_location(url);
                if let Some(title) = title {
                    state.snapshot.page.title = title.clone();
                }
            }
            Signal::Resize { width, height } => {
                state.snapshot.screen.viewport_width = *width;
                state.snapshot.screen.viewport_height = *height;
            }
            Signal::Orientation { orientation, .. } => {
                state.orientation = orientation.clone();
            }
            Signal::Connectivity { online, connection } => {
                state.online = *online;
                if connection.is_some() {
                    state.snapshot.connection = connection.clone();
                }
            }
            _ => {}
        }
    }
}

fn tablet_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i)tablet|ipad|playbook|silk").expect("valid regex"))
}

fn mobile_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)mobile|iphone|ipod|android|blackberry|opera mini|iemobile")
            .expect("valid regex")
    })
}

/// `tablet`, `mobile` or `desktop`, judged from the user agent.
pub fn device_type(user_agent: &str) -> &'static str {
    if tablet_pattern().is_match(user_agent) {
        "tablet"
    } else if mobile_pattern().is_match(user_agent) {
        "mobile"
    } else {
        "desktop"
    }
}

const UTM_KEYS: [&str; 6] = [
    "utm_source",
    "utm_medium",
    "utm_campaign",
    "utm_term",
    "utm_content",
    "utm_id",
];

/// Campaign parameters of `url` with the `utm_` prefix stripped. `None`
/// when there are none.
pub fn utm_params(url: &str) -> Option<BTreeMap<String, String>> {
    let parsed = Url::parse(url).ok()?;
    let mut utm = BTreeMap::new();
    for key in UTM_KEYS {
        let value = parsed
            .query_pairs()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
            .filter(|v| !v.is_empty());
        if let Some(value) = value {
            utm.insert(key.trim_start_matches("utm_").to_string(), value);
        }
    }
    if utm.is_empty() {
        None
    } else {
        Some(utm)
    }
}
