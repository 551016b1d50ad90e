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

//! Storage backends.
//!
//! Three scopes are involved:
//! - a persistent store (visitor id, user id, A/B map)
//! - an ephemeral, tab-scoped store (session record)
//! - a cookie jar, for the cross-site visitor id
//!
//! The host supplies the real implementations. [`MemoryStorage`] and
//! [`MemoryCookieJar`] back tests and headless hosts; [`FileStorage`]
//! gives the CLI a persistent store on disk.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::{StorageError, StorageResult};

/// Persistent visitor id key (also the cookie name).
pub const VISITOR_KEY: &str = "wa_vid";
/// Ephemeral session record key.
pub const SESSION_KEY: &str = "wa_sid";
/// Persistent user id key.
pub const USER_ID_KEY: &str = "wa_uid";
/// Persistent A/B assignment map key.
pub const AB_TEST_KEY: &str = "wa_ab";

/// One year, in seconds.
pub const COOKIE_MAX_AGE_SECS: u64 = 31_536_000;

pub trait Storage: Send + Sync {
    fn get(&self, key: &str) -> StorageResult<Option<String>>;
    fn set(&self, key: &str, value: &str) -> StorageResult<()>;
    fn remove(&self, key: &str) -> StorageResult<()>;
}

impl<S: Storage + ?Sized> Storage for Arc<S> {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        (**self).set(key, value)
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        (**self).remove(key)
    }
}

/// In-memory store. Clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    inner: Arc<MemoryInner>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    values: RwLock<HashMap<String, String>>,
    unavailable: AtomicBool,
    writes: AtomicUsize,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose every operation fails, like a browser with storage
    /// disabled.
    pub fn unavailable() -> Self {
        let storage = Self::default();
        storage.set_available(false);
        storage
    }

    pub fn set_available(&self, available: bool) {
        self.inner.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Number of successful `set`/`remove` calls.
    pub fn write_count(&self) -> usize {
        self.inner.writes.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.inner.values.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.inner.values.write().clear();
    }

    fn check(&self) -> StorageResult<()> {
        if self.inner.unavailable.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("storage disabled".into()));
        }
        Ok(())
    }
}

impl Storage for MemoryStorage {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        self.check()?;
        Ok(self.inner.values.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        self.check()?;
        self.inner
            .values
            .write()
            .insert(key.to_string(), value.to_string());
        self.inner.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        self.check()?;
        self.inner.values.write().remove(key);
        self.inner.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// JSON-file backed persistent store.
///
/// The whole map is rewritten on every mutation; it only ever holds a
/// handful of short keys.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    values: RwLock<HashMap<String, String>>,
}

impl FileStorage {
    /// Open (or lazily create) the store at `path`. A corrupt file is
    /// treated as empty and overwritten on the next write.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();
        let values = match fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                tracing::warn!(path = %path.display(), error = %e, "corrupt storage file, starting empty");
                HashMap::new()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path,
            values: RwLock::new(values),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, values: &HashMap<String, String>) -> StorageResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let raw = serde_json::to_string_pretty(values)?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, raw)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl Storage for FileStorage {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.values.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        let mut values = self.values.write();
        values.insert(key.to_string(), value.to_string());
        self.persist(&values)
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        let mut values = self.values.write();
        if values.remove(key).is_some() {
            self.persist(&values)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SameSite {
    Lax,
    None,
}

/// A cookie as written by the agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub path: String,
    pub max_age_secs: u64,
    /// Parent domain; host-only when `None`.
    pub domain: Option<String>,
    pub same_site: SameSite,
    pub secure: bool,
}

impl Cookie {
    /// The visitor-id cookie: domain-scoped and cross-site capable when a
    /// sharing domain is given, host-only `SameSite=Lax` otherwise.
    pub fn visitor(value: &str, shared_domain: Option<&str>) -> Self {
        match shared_domain {
            Some(domain) => Self {
                name: VISITOR_KEY.to_string(),
                value: value.to_string(),
                path: "/".to_string(),
                max_age_secs: COOKIE_MAX_AGE_SECS,
                domain: Some(domain.to_string()),
                same_site: SameSite::None,
                secure: true,
            },
            None => Self {
                name: VISITOR_KEY.to_string(),
                value: value.to_string(),
                path: "/".to_string(),
                max_age_secs: COOKIE_MAX_AGE_SECS,
                domain: None,
                same_site: SameSite::Lax,
                secure: false,
            },
        }
    }

    /// `document.cookie` assignment string.
    pub fn to_header(&self) -> String {
        let mut out = format!(
            "{}={};path={};max-age={}",
            self.name, self.value, self.path, self.max_age_secs
        );
        if let Some(domain) = &self.domain {
            out.push_str(";domain=");
            out.push_str(domain);
        }
        match self.same_site {
            SameSite::None => out.push_str(";SameSite=None"),
            SameSite::Lax => out.push_str(";SameSite=Lax"),
        }
        if self.secure {
            out.push_str(";Secure");
        }
        out
    }
}

/// Find `name` in a `document.cookie`-style string (`a=1; b=2`).
pub fn parse_cookie_header(header: &str, name: &str) -> Option<String> {
    header.split(';').map(str::trim).find_map(|pair| {
        pair.strip_prefix(name)
            .and_then(|rest| rest.strip_prefix('='))
            .map(str::to_string)
    })
}

pub trait CookieJar: Send + Sync {
    fn get(&self, name: &str) -> StorageResult<Option<String>>;
    fn set(&self, cookie: Cookie) -> StorageResult<()>;
}

impl<J: CookieJar + ?Sized> CookieJar for Arc<J> {
    fn get(&self, name: &str) -> StorageResult<Option<String>> {
        (**self).get(name)
    }

    fn set(&self, cookie: Cookie) -> StorageResult<()> {
        (**self).set(cookie)
    }
}

/// In-memory cookie jar keeping the last cookie written per name.
#[derive(Debug, Clone, Default)]
pub struct MemoryCookieJar {
    cookies: Arc<RwLock<HashMap<String, Cookie>>>,
    writes: Arc<AtomicUsize>,
}

impl MemoryCookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Full cookie (with attributes) last written under `name`.
    pub fn cookie(&self, name: &str) -> Option<Cookie> {
        self.cookies.read().get(name).cloned()
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// The jar rendered as a `document.cookie` read string.
    pub fn header(&self) -> String {
        let cookies = self.cookies.read();
        let mut pairs: Vec<String> = cookies
            .values()
            .map(|c| format!("{}={}", c.name, c.value))
            .collect();
        pairs.sort();
        pairs.join("; ")
    }
}

impl CookieJar for MemoryCookieJar {
    fn get(&self, name: &str) -> StorageResult<Option<String>> {
        Ok(self.cookies.read().get(name).map(|c| c.value.clone()))
    }

    fn set(&self, cookie: Cookie) -> StorageResult<()> {
        self.cookies.write().insert(cookie.name.clone(), cookie);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Cookie jar whose values live in a [`Storage`] under `cookie:<name>`.
/// Attributes are not kept; only the value survives a reload.
#[derive(Clone)]
pub struct StorageCookieJar {
    storage: Arc<dyn Storage>,
}

impl StorageCookieJar {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    fn key(name: &str) -> String {
        format!("cookie:{}", name)
    }
}

impl CookieJar for StorageCookieJar {
    fn get(&self, name: &str) -> StorageResult<Option<String>> {
        self.storage.get(&Self::key(name))
    }

    fn set(&self, cookie: Cookie) -> StorageResult<()> {
        self.storage.set(&Self::key(&cookie.name), &cookie.value)
    }
}

/// The three storage scopes the pipeline reads and writes.
#[derive(Clone)]
pub struct StorageScopes {
    pub persistent: Arc<dyn Storage>,
    pub ephemeral: Arc<dyn Storage>,
    pub cookies: Arc<dyn CookieJar>,
}

impl StorageScopes {
    pub fn new(
        persistent: Arc<dyn Storage>,
        ephemeral: Arc<dyn Storage>,
        cookies: Arc<dyn CookieJar>,
    ) -> Self {
        Self {
            persistent,
            ephemeral,
            cookies,
        }
    }

    /// Fresh in-memory scopes.
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(MemoryStorage::new()),
            Arc::new(MemoryStorage::new()),
            Arc::new(MemoryCookieJar::new()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_storage_roundtrip() {
        let storage = MemoryStorage::new();
        assert_eq!(storage.get("k").unwrap(), None);
        storage.set("k", "v").unwrap();
        assert_eq!(storage.get("k").unwrap().as_deref(), Some("v"));
        storage.remove("k").unwrap();
        assert_eq!(storage.get("k").unwrap(), None);
        assert_eq!(storage.write_count(), 2);
    }

    #[test]
    fn test_unavailable_storage_errors() {
        let storage = MemoryStorage::unavailable();
        assert!(matches!(storage.get("k"), Err(StorageError::Unavailable(_))));
        assert!(storage.set("k", "v").is_err());
        storage.set_available(true);
        assert!(storage.set("k", "v").is_ok());
    }

    #[test]
    fn test_storage_cookie_jar_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");

        let jar = StorageCookieJar::new(Arc::new(FileStorage::open(&path).unwrap()));
        jar.set(Cookie::visitor("v-1", Some(".example.com"))).unwrap();
        drop(jar);

        let reopened = FileStorage::open(&path).unwrap();
        assert_eq!(reopened.get("cookie:wa_vid").unwrap().as_deref(), Some("v-1"));
        let jar = StorageCookieJar::new(Arc::new(reopened));
        assert_eq!(jar.get(VISITOR_KEY).unwrap().as_deref(), Some("v-1"));
        assert_eq!(jar.get("other").unwrap(), None);
    }

    #[test]
    fn test_file_storage_persists_across_opens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("store.json");

        let storage = FileStorage::open(&path).unwrap();
        storage.set(VISITOR_KEY, "abc").unwrap();
        drop(storage);

        let reopened = FileStorage::open(&path).unwrap();
        assert_eq!(reopened.get(VISITOR_KEY).unwrap().as_deref(), Some("abc"));
        reopened.remove(VISITOR_KEY).unwrap();

        let again = FileStorage::open(&path).unwrap();
        assert_eq!(again.get(VISITOR_KEY).unwrap(), None);
    }

    #[test]
    fn test_file_storage_corrupt_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        std::fs::write(&path, "{not json").unwrap();

        let storage = FileStorage::open(&path).unwrap();
        assert_eq!(storage.get(AB_TEST_KEY).unwrap(), None);
        storage.set(AB_TEST_KEY, "{}").unwrap();
        assert_eq!(storage.get(AB_TEST_KEY).unwrap().as_deref(), Some("{}"));
    }

    #[test]
    fn test_visitor_cookie_headers() {
        let shared = Cookie::visitor("v1", Some(".example.com"));
        assert_eq!(
            shared.to_header(),
            "wa_vid=v1;path=/;max-age=31536000;domain=.example.com;SameSite=None;Secure"
        );

        let host_only = Cookie::visitor("v1", None);
        assert_eq!(
            host_only.to_header(),
            "wa_vid=v1;path=/;max-age=31536000;SameSite=Lax"
        );
    }

    #[test]
    fn test_parse_cookie_header() {
        let header = "theme=dark; wa_vid=abc-123; wa_vidx=nope";
        assert_eq!(parse_cookie_header(header, "wa_vid").as_deref(), Some("abc-123"));
        assert_eq!(parse_cookie_header(header, "missing"), None);
    }
}
