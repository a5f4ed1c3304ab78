use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Content-addressed store for raw model responses.
///
/// Entries are keyed by a fingerprint of `(model identifier, prompt)` and
/// stored one file per entry, named by the fingerprint, containing the raw
/// response text with no framing. A lookup hit is trusted verbatim; there is
/// no verification step against the original prompt.
///
/// Storage failures never propagate: the cache is an optimization, not a
/// correctness requirement.
#[derive(Debug, Clone)]
pub struct ResponseCache {
    dir: PathBuf,
    enabled: bool,
}

impl ResponseCache {
    /// Creates the cache and runs a single eviction pass over entries older
    /// than `max_age`. When disabled, no directory is created and all
    /// operations are inert.
    pub fn new(dir: &Path, enabled: bool, max_age: Duration) -> Self {
        let cache = Self {
            dir: dir.to_path_buf(),
            enabled,
        };

        if enabled {
            if let Err(e) = fs::create_dir_all(dir) {
                warn!(dir = %dir.display(), error = %e, "failed to create cache directory");
            }
            cache.evict_older_than(max_age);
        }

        cache
    }

    /// Fingerprint of a `(model, prompt)` pair: hex-encoded SHA-256 of the
    /// `model:prompt` composite.
    pub fn fingerprint(model: &str, prompt: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(model.as_bytes());
        hasher.update(b":");
        hasher.update(prompt.as_bytes());
        hex::encode(hasher.finalize())
    }

    fn entry_path(&self, model: &str, prompt: &str) -> PathBuf {
        self.dir.join(Self::fingerprint(model, prompt))
    }

    /// Returns the cached response for this `(model, prompt)` pair, or
    /// `None` on a miss. Always `None` when the cache is disabled.
    pub fn lookup(&self, model: &str, prompt: &str) -> Option<String> {
        if !self.enabled {
            return None;
        }

        let path = self.entry_path(model, prompt);
        match fs::read_to_string(&path) {
            Ok(text) => {
                debug!(entry = %truncated_name(&path), "cache hit");
                Some(text)
            }
            Err(_) => None,
        }
    }

    /// Stores a response. Concurrent writers racing on the same fingerprint
    /// interleave with last-writer-wins; this is accepted, not coordinated.
    pub fn store(&self, model: &str, prompt: &str, response: &str) {
        if !self.enabled {
            return;
        }

        let path = self.entry_path(model, prompt);
        if let Err(e) = fs::write(&path, response) {
            warn!(entry = %truncated_name(&path), error = %e, "failed to write cache entry");
        } else {
            debug!(entry = %truncated_name(&path), "response cached");
        }
    }

    /// Removes entries whose modification time is older than `max_age`.
    /// All failures are logged and swallowed.
    pub fn evict_older_than(&self, max_age: Duration) {
        if !self.enabled {
            return;
        }

        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(dir = %self.dir.display(), error = %e, "cache eviction skipped");
                return;
            }
        };

        let mut removed = 0usize;
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }

            let expired = entry
                .metadata()
                .and_then(|m| m.modified())
                .ok()
                .and_then(|mtime| mtime.elapsed().ok())
                .map(|age| age > max_age)
                .unwrap_or(false);

            if expired {
                match fs::remove_file(&path) {
                    Ok(()) => removed += 1,
                    Err(e) => {
                        warn!(entry = %truncated_name(&path), error = %e, "failed to evict cache entry");
                    }
                }
            }
        }

        if removed > 0 {
            debug!(removed, "evicted stale cache entries");
        }
    }
}

fn truncated_name(path: &Path) -> String {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    name.chars().take(10).collect()
}
