use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};
use tracing::{debug, warn};

use crate::types::Session;

#[derive(Debug, Serialize, Deserialize)]
struct CachedSession {
    site: String,
    saved_at: DateTime<Utc>,
    #[serde(default)]
    cookies: BTreeMap<String, String>,
}

/// Cookie jars persisted between runs, one JSON file per site.
#[derive(Debug, Clone)]
pub struct SessionCache {
    dir: PathBuf,
}

impl SessionCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, site: &str) -> PathBuf {
        self.dir
            .join(format!("{}.json", sanitize_cache_segment(site)))
    }

    /// Cached session for `site`; unreadable entries count as a miss.
    pub fn load(&self, site: &str) -> Option<Session> {
        let path = self.path_for(site);
        if !path.exists() {
            return None;
        }
        match read_entry(&path) {
            Ok(entry) if entry.cookies.is_empty() => None,
            Ok(entry) => {
                debug!(%site, saved_at = %entry.saved_at, "loaded cached session");
                Some(Session::new(site, entry.cookies))
            }
            Err(err) => {
                warn!(%site, error = %format!("{err:#}"), "ignoring unreadable session cache");
                None
            }
        }
    }

    pub fn save(&self, session: &Session) -> Result<()> {
        fs::create_dir_all(&self.dir).with_context(|| {
            format!("failed to create session cache directory {}", self.dir.display())
        })?;
        let path = self.path_for(&session.site);
        let entry = CachedSession {
            site: session.site.clone(),
            saved_at: Utc::now(),
            cookies: session.cookies.clone(),
        };
        let data = serde_json::to_string_pretty(&entry)?;
        fs::write(&path, data)
            .with_context(|| format!("failed to write session cache {}", path.display()))?;
        Ok(())
    }

    pub fn discard(&self, site: &str) -> Result<()> {
        let path = self.path_for(site);
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("failed to remove session cache {}", path.display()))?;
        }
        Ok(())
    }
}

fn read_entry(path: &Path) -> Result<CachedSession> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("failed to read session cache {}", path.display()))?;
    serde_json::from_str(&data)
        .with_context(|| format!("failed to parse session cache {}", path.display()))
}

pub fn sanitize_cache_segment(value: &str) -> String {
    let cleaned: String = value
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' || ch == '.' {
                ch
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        String::from("unknown")
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        let mut cookies = BTreeMap::new();
        cookies.insert("__ddg1_".to_string(), "token".to_string());
        Session::new("animepahe", cookies)
    }

    #[test]
    fn saved_session_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let cache = SessionCache::new(dir.path());
        assert!(cache.load("animepahe").is_none());

        cache.save(&session()).unwrap();
        assert_eq!(cache.load("animepahe"), Some(session()));

        cache.discard("animepahe").unwrap();
        assert!(cache.load("animepahe").is_none());
    }

    #[test]
    fn corrupt_entry_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = SessionCache::new(dir.path());
        fs::write(cache.path_for("animepahe"), "{not json").unwrap();
        assert!(cache.load("animepahe").is_none());
    }

    #[test]
    fn site_names_are_sanitized() {
        let cache = SessionCache::new("/tmp/x");
        assert_eq!(
            cache.path_for("anime pahe/../x"),
            PathBuf::from("/tmp/x/anime_pahe_.._x.json")
        );
        assert_eq!(sanitize_cache_segment(""), "unknown");
    }
}
