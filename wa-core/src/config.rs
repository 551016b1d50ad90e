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

//! Agent configuration.
//!
//! The hosting collaborator supplies endpoint, site identifier and the
//! privacy / cross-site flags. Everything else has defaults matching the
//! behaviour the collector expects, and can be overridden from a TOML/JSON
//! file, from `WA_*` environment variables or with the builder methods.

use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use url::Url;

use crate::error::ConfigError;

/// Path appended to the page origin when no explicit endpoint is given.
pub const DEFAULT_COLLECT_PATH: &str = "/api/v1/collect";

/// How a fresh A/B assignment draws its random value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BucketingStrategy {
    /// Uniform draw from the pipeline RNG.
    #[default]
    Random,
    /// Draw derived from a hash of visitor id and experiment name, so the
    /// same visitor lands in the same bucket even after storage is cleared.
    VisitorHash,
}

/// Top-level agent configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Collection endpoint. Delivery is a no-op while unset.
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Site identifier stamped on every envelope. Delivery is a no-op while unset.
    #[serde(default)]
    pub site_id: Option<String>,

    /// When set, no identity, session or assignment is read or persisted.
    #[serde(default)]
    pub privacy_mode: bool,

    /// Share the visitor id through a parent-domain cookie.
    #[serde(default = "default_cross_site")]
    pub cross_site: bool,

    /// Cookie domain used when `cross_site` is on (e.g. `.example.com`).
    #[serde(default)]
    pub cross_site_domain: Option<String>,

    #[serde(default)]
    pub bucketing: BucketingStrategy,

    /// Seed for the pipeline RNG. Entropy-seeded when absent.
    #[serde(default)]
    pub rng_seed: Option<u64>,

    #[serde(default)]
    pub timing: TimingConfig,
}

fn default_cross_site() -> bool {
    true
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            site_id: None,
            privacy_mode: false,
            cross_site: default_cross_site(),
            cross_site_domain: None,
            bucketing: BucketingStrategy::default(),
            rng_seed: None,
            timing: TimingConfig::default(),
        }
    }
}

impl AgentConfig {
    /// Derive the defaults a page would get with no explicit attributes:
    /// endpoint on the page origin, site id = host name, cookie domain =
    /// the last two host labels.
    pub fn for_page(page_url: &str) -> Result<Self, ConfigError> {
        let url = Url::parse(page_url).map_err(|source| ConfigError::InvalidOrigin {
            origin: page_url.to_string(),
            source,
        })?;
        let host = url
            .host_str()
            .ok_or_else(|| ConfigError::MissingHost(page_url.to_string()))?
            .to_string();

        let origin = url.origin().ascii_serialization();
        let labels: Vec<&str> = host.split('.').collect();
        let tail = labels[labels.len().saturating_sub(2)..].join(".");

        Ok(Self {
            endpoint: Some(format!("{}{}", origin, DEFAULT_COLLECT_PATH)),
            site_id: Some(host),
            cross_site_domain: Some(format!(".{}", tail)),
            ..Self::default()
        })
    }

    /// Overlay `WA_*` environment variables on the defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Overlay `WA_*` environment variables on `self`.
    pub fn apply_env(&mut self) {
        if let Ok(endpoint) = env::var("WA_ENDPOINT") {
            self.endpoint = Some(endpoint);
        }
        if let Ok(site) = env::var("WA_SITE_ID") {
            self.site_id = Some(site);
        }
        if let Ok(v) = env::var("WA_PRIVACY") {
            self.privacy_mode = v == "true" || v == "1";
        }
        if let Ok(v) = env::var("WA_CROSS_SITE") {
            self.cross_site = !(v == "false" || v == "0");
        }
        if let Ok(domain) = env::var("WA_CROSS_SITE_DOMAIN") {
            self.cross_site_domain = Some(domain);
        }
    }

    /// Parse a TOML document.
    pub fn from_toml(source: &str) -> Result<Self, ConfigError> {
        toml::from_str(source).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Parse a JSON document.
    pub fn from_json(source: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(source).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_site_id(mut self, site_id: impl Into<String>) -> Self {
        self.site_id = Some(site_id.into());
        self
    }

    pub fn with_privacy_mode(mut self, privacy_mode: bool) -> Self {
        self.privacy_mode = privacy_mode;
        self
    }

    pub fn with_cross_site(mut self, cross_site: bool, domain: Option<String>) -> Self {
        self.cross_site = cross_site;
        self.cross_site_domain = domain;
        self
    }

    pub fn with_bucketing(mut self, bucketing: BucketingStrategy) -> Self {
        self.bucketing = bucketing;
        self
    }

    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }

    /// True when both endpoint and site id are set and non-empty.
    pub fn is_deliverable(&self) -> bool {
        matches!(&self.endpoint, Some(e) if !e.is_empty())
            && matches!(&self.site_id, Some(s) if !s.is_empty())
    }
}

/// Window sizes and thresholds of the aggregators, buffer and session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    #[serde(default = "default_session_timeout_ms")]
    pub session_timeout_ms: u64,

    #[serde(default = "default_rage_click_threshold")]
    pub rage_click_threshold: u32,
    #[serde(default = "default_rage_click_timeout_ms")]
    pub rage_click_timeout_ms: u64,
    #[serde(default = "default_rage_click_radius_px")]
    pub rage_click_radius_px: f64,

    #[serde(default = "default_scroll_debounce_ms")]
    pub scroll_debounce_ms: u64,
    #[serde(default = "default_resize_debounce_ms")]
    pub resize_debounce_ms: u64,

    #[serde(default = "default_replay_buffer_size")]
    pub replay_buffer_size: usize,
    #[serde(default = "default_replay_flush_interval_ms")]
    pub replay_flush_interval_ms: u64,
    #[serde(default = "default_replay_mouse_throttle_ms")]
    pub replay_mouse_throttle_ms: u64,
    #[serde(default = "default_replay_scroll_throttle_ms")]
    pub replay_scroll_throttle_ms: u64,

    #[serde(default = "default_long_task_threshold_ms")]
    pub long_task_threshold_ms: f64,
    #[serde(default = "default_inp_threshold_ms")]
    pub inp_threshold_ms: f64,
    #[serde(default = "default_visibility_min_ms")]
    pub visibility_min_ms: u64,
}

fn default_session_timeout_ms() -> u64 {
    30 * 60 * 1000
}

fn default_rage_click_threshold() -> u32 {
    3
}

fn default_rage_click_timeout_ms() -> u64 {
    1000
}

fn default_rage_click_radius_px() -> f64 {
    100.0
}

fn default_scroll_debounce_ms() -> u64 {
    100
}

fn default_resize_debounce_ms() -> u64 {
    500
}

fn default_replay_buffer_size() -> usize {
    50
}

fn default_replay_flush_interval_ms() -> u64 {
    5000
}

fn default_replay_mouse_throttle_ms() -> u64 {
    50
}

fn default_replay_scroll_throttle_ms() -> u64 {
    100
}

fn default_long_task_threshold_ms() -> f64 {
    50.0
}

fn default_inp_threshold_ms() -> f64 {
    16.0
}

fn default_visibility_min_ms() -> u64 {
    100
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            session_timeout_ms: default_session_timeout_ms(),
            rage_click_threshold: default_rage_click_threshold(),
            rage_click_timeout_ms: default_rage_click_timeout_ms(),
            rage_click_radius_px: default_rage_click_radius_px(),
            scroll_debounce_ms: default_scroll_debounce_ms(),
            resize_debounce_ms: default_resize_debounce_ms(),
            replay_buffer_size: default_replay_buffer_size(),
            replay_flush_interval_ms: default_replay_flush_interval_ms(),
            replay_mouse_throttle_ms: default_replay_mouse_throttle_ms(),
            replay_scroll_throttle_ms: default_replay_scroll_throttle_ms(),
            long_task_threshold_ms: default_long_task_threshold_ms(),
            inp_threshold_ms: default_inp_threshold_ms(),
            visibility_min_ms: default_visibility_min_ms(),
        }
    }
}

impl TimingConfig {
    /// Session timeout as Duration.
    pub fn session_timeout(&self) -> Duration {
        Duration::from_millis(self.session_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AgentConfig::default();
        assert!(config.cross_site);
        assert!(!config.privacy_mode);
        assert!(!config.is_deliverable());
        assert_eq!(config.timing.session_timeout_ms, 1_800_000);
        assert_eq!(config.timing.replay_buffer_size, 50);
    }

    #[test]
    fn test_for_page_derives_defaults() {
        let config = AgentConfig::for_page("https://shop.blog.example.com/posts/1?x=1").unwrap();
        assert_eq!(
            config.endpoint.as_deref(),
            Some("https://shop.blog.example.com/api/v1/collect")
        );
        assert_eq!(config.site_id.as_deref(), Some("shop.blog.example.com"));
        assert_eq!(config.cross_site_domain.as_deref(), Some(".example.com"));
        assert!(config.is_deliverable());
    }

    #[test]
    fn test_for_page_rejects_garbage() {
        assert!(AgentConfig::for_page("not a url").is_err());
    }

    #[test]
    fn test_partial_json_uses_field_defaults() {
        let config = AgentConfig::from_json(
            r#"{"endpoint": "https://c.example/collect", "timing": {"replay_buffer_size": 10}}"#,
        )
        .unwrap();
        assert_eq!(config.timing.replay_buffer_size, 10);
        assert_eq!(config.timing.replay_flush_interval_ms, 5000);
        assert!(config.cross_site);
        assert_eq!(config.bucketing, BucketingStrategy::Random);
    }

    #[test]
    fn test_toml_config() {
        let config = AgentConfig::from_toml(
            r#"
            endpoint = "https://c.example/collect"
            site_id = "blog"
            privacy_mode = true
            bucketing = "visitor_hash"

            [timing]
            session_timeout_ms = 60000
            "#,
        )
        .unwrap();
        assert!(config.privacy_mode);
        assert_eq!(config.bucketing, BucketingStrategy::VisitorHash);
        assert_eq!(config.timing.session_timeout_ms, 60_000);
        assert_eq!(config.timing.rage_click_threshold, 3);
    }

    #[test]
    fn test_empty_site_id_is_not_deliverable() {
        let config = AgentConfig::default()
            .with_endpoint("https://c.example/collect")
            .with_site_id("");
        assert!(!config.is_deliverable());
    }
}
