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

//! Form start / submit / abandon funnel.
//!
//! Sessions live in a registry keyed by [`FormId`]. A session opens on the
//! first field focus and closes on submit; forms the host reports as
//! removed are detached and no longer count as abandoned.

use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

use super::Emission;
use crate::signal::{FieldInfo, FormId, FormInfo};

#[derive(Debug, Clone)]
pub struct FormSession {
    pub info: FormInfo,
    pub started_at: u64,
    pub fields: BTreeSet<String>,
    pub attached: bool,
}

#[derive(Debug, Clone, Default)]
pub struct FormFunnel {
    sessions: BTreeMap<FormId, FormSession>,
}

impl FormFunnel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session(&self, form: &FormId) -> Option<&FormSession> {
        self.sessions.get(form)
    }

    pub fn open_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Record a field focus. Returns `form_start` for the first focus.
    pub fn focus(&mut self, form: &FormInfo, field: &FieldInfo, now_ms: u64) -> Option<Emission> {
        let mut emission = None;
        let session = self.sessions.entry(form.form_id.clone()).or_insert_with(|| {
            emission = Some(Emission::new("form_start", "form", Value::Object(form.payload())));
            FormSession {
                info: form.clone(),
                started_at: now_ms,
                fields: BTreeSet::new(),
                attached: true,
            }
        });
        session.fields.insert(field.key());
        emission
    }

    /// Close the session (if any) and report it.
    pub fn submit(&mut self, form: &FormInfo, now_ms: u64) -> Emission {
        let (started_at, fields) = match self.sessions.remove(&form.form_id) {
            Some(session) => (session.started_at, session.fields.len()),
            None => (now_ms, 0),
        };
        completion("form_submit", form, now_ms.saturating_sub(started_at), fields)
    }

    pub fn detach(&mut self, form: &FormId) {
        if let Some(session) = self.sessions.get_mut(form) {
            session.attached = false;
        }
    }

    /// `form_abandon` for every open session whose form is still attached.
    pub fn abandon_all(&self, now_ms: u64) -> Vec<Emission> {
        self.sessions
            .values()
            .filter(|session| session.attached)
            .map(|session| {
                completion(
                    "form_abandon",
                    &session.info,
                    now_ms.saturating_sub(session.started_at),
                    session.fields.len(),
                )
            })
            .collect()
    }
}

fn completion(event: &'static str, form: &FormInfo, elapsed_ms: u64, fields: usize) -> Emission {
    let mut body = form.payload();
    body.insert("time_spent_ms".into(), elapsed_ms.into());
    body.insert("fields_interacted".into(), fields.into());
    Emission::new(event, "form", Value::Object(body))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form(id: &str) -> FormInfo {
        FormInfo {
            id: Some(id.to_string()),
            ..FormInfo::new(id)
        }
    }

    #[test]
    fn test_start_then_submit() {
        let mut funnel = FormFunnel::new();
        let signup = form("signup");

        let start = funnel.focus(&signup, &FieldInfo::named("email"), 1_000).unwrap();
        assert_eq!(start.event, "form_start");
        assert_eq!(start.get("form").unwrap()["id"], "signup");

        assert!(funnel.focus(&signup, &FieldInfo::named("password"), 2_000).is_none());
        assert!(funnel.focus(&signup, &FieldInfo::named("email"), 3_000).is_none());

        let submit = funnel.submit(&signup, 9_000);
        let body = submit.get("form").unwrap();
        assert_eq!(submit.event, "form_submit");
        assert_eq!(body["time_spent_ms"], 8_000);
        assert_eq!(body["fields_interacted"], 2);
        assert_eq!(funnel.open_sessions(), 0);
    }

    #[test]
    fn test_submit_without_session() {
        let mut funnel = FormFunnel::new();
        let body = funnel.submit(&form("search"), 5_000).payload["form"].clone();
        assert_eq!(body["time_spent_ms"], 0);
        assert_eq!(body["fields_interacted"], 0);
    }

    #[test]
    fn test_abandon_skips_detached_forms() {
        let mut funnel = FormFunnel::new();
        funnel.focus(&form("a"), &FieldInfo::named("x"), 0);
        funnel.focus(&form("b"), &FieldInfo::named("y"), 0);
        funnel.detach(&FormId::from("b"));

        let abandoned = funnel.abandon_all(4_000);
        assert_eq!(abandoned.len(), 1);
        assert_eq!(abandoned[0].event, "form_abandon");
        assert_eq!(abandoned[0].get("form").unwrap()["id"], "a");
        assert_eq!(abandoned[0].get("form").unwrap()["time_spent_ms"], 4_000);
    }
}
