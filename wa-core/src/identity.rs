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

//! Visitor and user identity.
//!
//! The visitor id is a random UUID created on first resolution and kept in
//! either the persistent store (local-only scope) or the `wa_vid` cookie
//! (cross-site scope). The value is always mirrored into the cookie so
//! both representations agree. Under privacy mode nothing is read, written
//! or returned.

use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::storage::{Cookie, CookieJar, Storage, USER_ID_KEY, VISITOR_KEY};

pub fn generate_id() -> String {
    Uuid::new_v4().to_string()
}

pub struct IdentityStore {
    persistent: Arc<dyn Storage>,
    cookies: Arc<dyn CookieJar>,
    privacy_mode: bool,
    cross_site: bool,
    cross_site_domain: Option<String>,
    user_override: Option<String>,
}

impl IdentityStore {
    pub fn new(
        persistent: Arc<dyn Storage>,
        cookies: Arc<dyn CookieJar>,
        privacy_mode: bool,
        cross_site: bool,
        cross_site_domain: Option<String>,
    ) -> Self {
        Self {
            persistent,
            cookies,
            privacy_mode,
            cross_site,
            cross_site_domain,
            user_override: None,
        }
    }

    pub fn privacy_mode(&self) -> bool {
        self.privacy_mode
    }

    /// Resolve (creating if needed) the long-lived visitor id.
    ///
    /// A failing read yields `None` for this call; a failing write still
    /// returns the freshly generated id.
    pub fn resolve_visitor_id(&self) -> Option<String> {
        if self.privacy_mode {
            return None;
        }

        let stored = if self.cross_site {
            self.cookies.get(VISITOR_KEY)
        } else {
            self.persistent.get(VISITOR_KEY)
        };

        let visitor_id = match stored {
            Ok(Some(id)) if !id.is_empty() => id,
            Ok(_) => {
                let id = generate_id();
                if !self.cross_site {
                    if let Err(e) = self.persistent.set(VISITOR_KEY, &id) {
                        debug!(error = %e, "could not persist visitor id");
                    }
                }
                id
            }
            Err(e) => {
                debug!(error = %e, "visitor id unavailable");
                return None;
            }
        };

        self.mirror_cookie(&visitor_id);
        Some(visitor_id)
    }

    fn mirror_cookie(&self, visitor_id: &str) {
        let shared_domain = if self.cross_site {
            self.cross_site_domain.as_deref()
        } else {
            None
        };
        if let Err(e) = self.cookies.set(Cookie::visitor(visitor_id, shared_domain)) {
            debug!(error = %e, "could not write visitor cookie");
        }
    }

    /// Explicit override first, then the persisted value.
    pub fn resolve_user_id(&self) -> Option<String> {
        if self.privacy_mode {
            return None;
        }
        if let Some(user_id) = &self.user_override {
            return Some(user_id.clone());
        }
        match self.persistent.get(USER_ID_KEY) {
            Ok(user_id) => user_id.filter(|u| !u.is_empty()),
            Err(e) => {
                debug!(error = %e, "user id unavailable");
                None
            }
        }
    }

    /// Set (`Some`) or forget (`None`) the user id. Returns `false` when
    /// ignored because privacy mode is on.
    pub fn identify(&mut self, user_id: Option<&str>) -> bool {
        if self.privacy_mode {
            return false;
        }

        let user_id = user_id.filter(|u| !u.is_empty());
        self.user_override = user_id.map(str::to_string);

        let result = match user_id {
            Some(id) => self.persistent.set(USER_ID_KEY, id),
            None => self.persistent.remove(USER_ID_KEY),
        };
        if let Err(e) = result {
            debug!(error = %e, "could not persist user id");
        }
        true
    }
}
