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

//! Canonical event envelope.
//!
//! Each discrete event is wrapped with identity, session and a fresh
//! context snapshot. Nothing is cached between builds, so two envelopes
//! built back to back can differ (for example after an A/B assignment).

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::trace;

use crate::clock::iso_timestamp;
use crate::environment::{
    utm_params, BrowserInfo, ConnectionInfo, DeviceInfo, Environment, PageInfo, ScreenInfo,
    TimezoneInfo,
};
use crate::experiments::Assignments;
use crate::identity::IdentityStore;
use crate::session::SessionTracker;

/// Event-specific fields, flattened next to the context fields.
pub type Payload = Map<String, Value>;

/// Payload with a single nested object under `key`.
pub fn payload(key: &str, value: Value) -> Payload {
    let mut map = Payload::new();
    map.insert(key.to_string(), value);
    map
}

/// One enriched event, serialized flat.
#[derive(Debug, Clone, Serialize)]
pub struct EventEnvelope {
    site_id: Option<String>,
    event: String,
    timestamp: String,
    visitor_id: Option<String>,
    session_id: Option<String>,
    user_id: Option<String>,
    page: PageInfo,
    browser: BrowserInfo,
    screen: ScreenInfo,
    device: DeviceInfo,
    timezone: TimezoneInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    connection: Option<ConnectionInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    utm: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ab_tests: Option<Assignments>,
    #[serde(flatten)]
    payload: Payload,
}

impl EventEnvelope {
    pub fn event(&self) -> &str {
        &self.event
    }

    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    pub fn visitor_id(&self) -> Option<&str> {
        self.visitor_id.as_deref()
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn page(&self) -> &PageInfo {
        &self.page
    }

    pub fn ab_tests(&self) -> Option<&Assignments> {
        self.ab_tests.as_ref()
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Assembles envelopes from identity, session and host context.
pub struct EnvelopeBuilder {
    site_id: Option<String>,
    identity: IdentityStore,
    session: SessionTracker,
    environment: Arc<dyn Environment>,
}

impl EnvelopeBuilder {
    pub fn new(
        site_id: Option<String>,
        identity: IdentityStore,
        session: SessionTracker,
        environment: Arc<dyn Environment>,
    ) -> Self {
        Self {
            site_id,
            identity,
            session,
            environment,
        }
    }

    pub fn identity(&self) -> &IdentityStore {
        &self.identity
    }

    pub fn identity_mut(&mut self) -> &mut IdentityStore {
        &mut self.identity
    }

    /// Build an envelope at `now_ms`. Resolving the session refreshes its
    /// activity timestamp.
    pub fn build(
        &self,
        event: &str,
        now_ms: u64,
        ab_tests: Option<Assignments>,
        payload: Payload,
    ) -> EventEnvelope {
        let snapshot = self.environment.snapshot();
        let utm = utm_params(&snapshot.page.url);

        let envelope = EventEnvelope {
            site_id: self.site_id.clone(),
            event: event.to_string(),
            timestamp: iso_timestamp(now_ms),
            visitor_id: self.identity.resolve_visitor_id(),
            session_id: self.session.resolve_session_id(now_ms),
            user_id: self.identity.resolve_user_id(),
            page: snapshot.page,
            browser: snapshot.browser,
            screen: snapshot.screen,
            device: snapshot.device,
            timezone: snapshot.timezone,
            connection: snapshot.connection,
            utm,
            ab_tests,
            payload,
        };
        trace!(event, "built envelope");
        envelope
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::SharedEnvironment;
    use crate::storage::StorageScopes;
    use serde_json::json;

    fn builder(privacy: bool, url: &str) -> EnvelopeBuilder {
        let scopes = StorageScopes::in_memory();
        EnvelopeBuilder::new(
            Some("example.com".into()),
            IdentityStore::new(
                scopes.persistent.clone(),
                scopes.cookies.clone(),
                privacy,
                false,
                None,
            ),
            SessionTracker::new(scopes.ephemeral.clone(), 1_800_000, privacy),
            Arc::new(SharedEnvironment::for_url(url)),
        )
    }

    #[test]
    fn test_flat_serialization() {
        let b = builder(false, "https://example.com/landing?utm_campaign=spring");
        let mut ab = Assignments::new();
        ab.insert("hero".into(), "b".into());

        let env = b.build("click", 0, Some(ab), payload("click", json!({"x": 1})));
        let value = serde_json::to_value(&env).unwrap();

        assert_eq!(value["site_id"], "example.com");
        assert_eq!(value["event"], "click");
        assert_eq!(value["timestamp"], "1970-01-01T00:00:00.000Z");
        assert_eq!(value["page"]["path"], "/landing");
        assert_eq!(value["device"]["type"], "desktop");
        assert_eq!(value["utm"]["campaign"], "spring");
        assert_eq!(value["ab_tests"]["hero"], "b");
        assert_eq!(value["click"]["x"], 1);
        assert!(value.get("connection").is_none());
        assert!(value["visitor_id"].is_string());
        assert!(value["user_id"].is_null());
    }

    #[test]
    fn test_privacy_mode_envelope_has_no_identity() {
        let b = builder(true, "https://example.com/");
        let env = b.build("pageview", 0, None, Payload::new());
        assert_eq!(env.visitor_id(), None);
        assert_eq!(env.session_id(), None);
        assert_eq!(env.user_id(), None);
        let value = serde_json::to_value(&env).unwrap();
        assert!(value.get("ab_tests").is_none());
        assert!(value.get("utm").is_none());
    }

    #[test]
    fn test_each_build_resolves_same_session() {
        let b = builder(false, "https://example.com/");
        let first = b.build("a", 1_000, None, Payload::new());
        let second = b.build("b", 2_000, None, Payload::new());
        assert_eq!(first.session_id(), second.session_id());
        assert_eq!(first.visitor_id(), second.visitor_id());
    }
}
