//! Credential store for OAuth-protected routes.
//!
//! Loaded from an INI-like companion file: `[app_key]` section headers with
//! `app_secret`, `allowed_urls` (comma-separated, `*` wildcard or trailing
//! `*` prefix patterns) and `rate_limit` keys. Reload builds a complete new
//! map and swaps it under the lock, so in-flight validations keep working
//! against the copy they already cloned out.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub app_key: String,
    pub app_secret: String,
    pub allowed_urls: Vec<String>,
    pub rate_limit: u32,
}

impl Credential {
    /// Exact match, trailing-`*` prefix match, or a lone `*` meaning "any".
    pub fn allows_url(&self, url: &str) -> bool {
        for pattern in &self.allowed_urls {
            if pattern == "*" {
                return true;
            }
            if let Some(prefix) = pattern.strip_suffix('*') {
                if url.starts_with(prefix) {
                    return true;
                }
            } else if url == pattern {
                return true;
            }
        }
        false
    }
}

pub struct CredentialStore {
    path: Option<PathBuf>,
    inner: RwLock<HashMap<String, Credential>>,
}

impl CredentialStore {
    /// Load from the companion config file. A missing file yields an empty
    /// store; every lookup then fails as an unknown app.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let map = match std::fs::read_to_string(&path) {
            Ok(text) => {
                let map = parse_credentials(&text);
                info!(
                    target: "xserver::auth",
                    file = %path.display(),
                    applications = map.len(),
                    "Loaded credential store"
                );
                map
            }
            Err(err) => {
                warn!(
                    target: "xserver::auth",
                    file = %path.display(),
                    error = %err,
                    "Credential file unavailable; starting with empty store"
                );
                HashMap::new()
            }
        };
        Self {
            path: Some(path),
            inner: RwLock::new(map),
        }
    }

    /// Build a store directly from config text (no backing file).
    pub fn from_str(text: &str) -> Self {
        Self {
            path: None,
            inner: RwLock::new(parse_credentials(text)),
        }
    }

    /// Re-read the backing file and atomically swap the map in.
    pub fn reload(&self) -> std::io::Result<usize> {
        let Some(path) = &self.path else {
            return Ok(self.len());
        };
        let text = std::fs::read_to_string(path)?;
        let map = parse_credentials(&text);
        let count = map.len();
        if let Ok(mut guard) = self.inner.write() {
            *guard = map;
        }
        info!(
            target: "xserver::auth",
            file = %path.display(),
            applications = count,
            "Reloaded credential store"
        );
        Ok(count)
    }

    /// Clone the credential out so callers never hold the lock across
    /// digest work.
    pub fn lookup(&self, app_key: &str) -> Option<Credential> {
        self.inner.read().ok()?.get(app_key).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn parse_credentials(text: &str) -> HashMap<String, Credential> {
    let mut map = HashMap::new();
    let mut current: Option<Credential> = None;

    for raw in text.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            if let Some(done) = current.take() {
                map.insert(done.app_key.clone(), done);
            }
            current = Some(Credential {
                app_key: name.trim().to_string(),
                app_secret: String::new(),
                allowed_urls: Vec::new(),
                rate_limit: 0,
            });
            continue;
        }

        let Some(cred) = current.as_mut() else {
            continue;
        };
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let (key, value) = (key.trim(), value.trim());
        match key {
            "app_secret" => cred.app_secret = value.to_string(),
            "allowed_urls" => {
                cred.allowed_urls = value
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect();
            }
            "rate_limit" => cred.rate_limit = value.parse().unwrap_or(0),
            _ => {}
        }
    }

    if let Some(done) = current.take() {
        map.insert(done.app_key.clone(), done);
    }
    map
}
