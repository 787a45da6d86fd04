//! On-disk copy of the last successfully fetched lists.
//!
//! Only consulted when a fetch fails while a directory is still empty, so
//! consumers have something to show while retries continue.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::record::ApiServer;
use super::Scope;

/// Cached server list with timestamp
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedServerList {
    pub servers: Vec<ApiServer>,
    pub cached_at: DateTime<Utc>,
}

impl CachedServerList {
    pub fn age_seconds(&self) -> i64 {
        Utc::now().signed_duration_since(self.cached_at).num_seconds()
    }
}

fn cache_path(dir: &Path, scope: Scope) -> PathBuf {
    dir.join(format!("{}.json", scope.noun()))
}

/// Load cached list for `scope` from `dir`.
pub fn load_cached(dir: &Path, scope: Scope) -> Option<CachedServerList> {
    let path = cache_path(dir, scope);

    if !path.exists() {
        log::debug!("Server cache file does not exist: {:?}", path);
        return None;
    }

    match std::fs::read_to_string(&path) {
        Ok(content) => match serde_json::from_str::<CachedServerList>(&content) {
            Ok(cached) => {
                log::info!(
                    "Loaded {} cache from {:?}, age: {} seconds",
                    scope,
                    path,
                    cached.age_seconds()
                );
                Some(cached)
            }
            Err(e) => {
                log::warn!("Failed to parse {} cache: {}", scope, e);
                None
            }
        },
        Err(e) => {
            log::warn!("Failed to read {} cache file: {}", scope, e);
            None
        }
    }
}

/// Save list for `scope` into `dir`.
pub fn save_cached(dir: &Path, scope: Scope, servers: &[ApiServer]) -> Result<(), std::io::Error> {
    std::fs::create_dir_all(dir)?;

    let cached = CachedServerList {
        servers: servers.to_vec(),
        cached_at: Utc::now(),
    };

    let content = serde_json::to_string_pretty(&cached)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

    let path = cache_path(dir, scope);
    std::fs::write(&path, content)?;
    log::info!("Saved {} list to cache: {:?}", scope, path);

    Ok(())
}
