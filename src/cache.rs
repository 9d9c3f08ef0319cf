//! Content-addressed result cache and the external-call log.
//!
//! The cache is a time-bounded memoization layer, not an LRU: entries are
//! reused exactly when content, applicable rule set, and provider are all
//! identical, and expire only by TTL. Corruption and I/O failures degrade to
//! cache misses; they never abort a run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

use crate::types::Issue;

/// Deterministic composite key for one analysis result.
///
/// Two files with identical content and identical applicable rule set under
/// the same provider always produce the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub content_hash: String,
    pub rules_hash: String,
    pub provider: String,
}

impl CacheKey {
    pub fn new(content_hash: String, rules_hash: String, provider: String) -> Self {
        Self {
            content_hash,
            rules_hash,
            provider,
        }
    }

    /// Stable fingerprint used as the entry file name and the in-flight
    /// table key.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.content_hash.as_bytes());
        hasher.update(b"\n");
        hasher.update(self.rules_hash.as_bytes());
        hasher.update(b"\n");
        hasher.update(self.provider.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
    key: CacheKey,
    issues: Vec<Issue>,
    /// Unix seconds at write time.
    created: u64,
    ttl_secs: u64,
}

impl CacheEntry {
    fn is_fresh(&self, now: u64) -> bool {
        now.saturating_sub(self.created) < self.ttl_secs
    }
}

/// Cache statistics for inspection.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub size_bytes: u64,
}

/// Whether a key resolution was served from cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheOutcome {
    Hit,
    Miss,
}

/// One append-only record per external-call resolution. Never mutated after
/// insert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallRecord {
    pub timestamp: DateTime<Utc>,
    pub file: String,
    pub provider: String,
    pub cache: CacheOutcome,
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub duration_ms: u64,
    pub issues_found: usize,
    pub cost_usd: f64,
}

/// Aggregated cost accounting over the call log.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CostSummary {
    pub total_calls: usize,
    pub cache_hits: usize,
    pub total_tokens: usize,
    pub total_cost_usd: f64,
    pub total_issues: usize,
}

/// Two-tier (memory + disk) result cache with TTL expiry.
pub struct ReviewCache {
    memory: RwLock<HashMap<String, CacheEntry>>,
    /// None = degraded to memory-only after a setup failure.
    dir: Option<PathBuf>,
    ttl: Duration,
}

impl ReviewCache {
    /// Open the cache rooted at `dir`.
    ///
    /// An unusable directory degrades the run to always-miss with a warning;
    /// it never fails the caller.
    pub fn open(dir: &Path, ttl: Duration) -> Self {
        let dir = match fs::create_dir_all(dir.join("entries")) {
            Ok(()) => Some(dir.to_path_buf()),
            Err(e) => {
                warn!(
                    "cache directory {:?} unusable, running without persistent cache: {}",
                    dir, e
                );
                None
            }
        };
        Self {
            memory: RwLock::new(HashMap::new()),
            dir,
            ttl,
        }
    }

    /// A hit requires an existing entry within its TTL. Expired or corrupt
    /// entries are misses and get overwritten by the next successful write.
    pub fn get(&self, key: &CacheKey) -> Option<Vec<Issue>> {
        let fingerprint = key.fingerprint();
        let now = unix_now();

        {
            let memory = self.memory.read().ok()?;
            if let Some(entry) = memory.get(&fingerprint) {
                if entry.is_fresh(now) {
                    return Some(entry.issues.clone());
                }
            }
        }

        let entry = self.read_entry(&fingerprint)?;
        if !entry.is_fresh(now) {
            debug!("cache entry {} expired", &fingerprint[..8]);
            return None;
        }
        let issues = entry.issues.clone();
        // Promote to memory for the rest of the run.
        if let Ok(mut memory) = self.memory.write() {
            memory.insert(fingerprint, entry);
        }
        Some(issues)
    }

    /// Idempotent write: the same key with the same issues always yields the
    /// same observable state.
    pub fn put(&self, key: &CacheKey, issues: &[Issue]) {
        let entry = CacheEntry {
            key: key.clone(),
            issues: issues.to_vec(),
            created: unix_now(),
            ttl_secs: self.ttl.as_secs(),
        };
        let fingerprint = key.fingerprint();

        if let Ok(mut memory) = self.memory.write() {
            memory.insert(fingerprint.clone(), entry.clone());
        }

        if let Some(path) = self.entry_path(&fingerprint) {
            match serde_json::to_vec(&entry) {
                Ok(bytes) => {
                    if let Err(e) = fs::write(&path, bytes) {
                        warn!("cache write failed for {:?}: {}", path, e);
                    }
                }
                Err(e) => warn!("cache serialization failed: {}", e),
            }
        }
    }

    pub fn stats(&self) -> CacheStats {
        let mut stats = CacheStats::default();
        if let Some(dir) = self.entries_dir() {
            if let Ok(entries) = fs::read_dir(dir) {
                for entry in entries.flatten() {
                    if let Ok(meta) = entry.metadata() {
                        if meta.is_file() {
                            stats.entries += 1;
                            stats.size_bytes += meta.len();
                        }
                    }
                }
            }
        }
        stats
    }

    /// Remove all entries; returns how many were deleted.
    pub fn clear(&self) -> usize {
        let mut deleted = 0;
        if let Some(dir) = self.entries_dir() {
            if let Ok(entries) = fs::read_dir(dir) {
                for entry in entries.flatten() {
                    if entry.metadata().map(|m| m.is_file()).unwrap_or(false)
                        && fs::remove_file(entry.path()).is_ok()
                    {
                        deleted += 1;
                    }
                }
            }
        }
        if let Ok(mut memory) = self.memory.write() {
            memory.clear();
        }
        deleted
    }

    /// Append one record to the call log. Log failures are non-fatal.
    pub fn log_call(&self, record: &CallRecord) {
        let Some(path) = self.log_path() else {
            return;
        };
        let line = match serde_json::to_string(record) {
            Ok(line) => line,
            Err(e) => {
                warn!("call log serialization failed: {}", e);
                return;
            }
        };
        let result = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .and_then(|mut f| writeln!(f, "{}", line));
        if let Err(e) = result {
            warn!("call log append failed for {:?}: {}", path, e);
        }
    }

    /// All call records, oldest first. Corrupt lines are skipped.
    pub fn call_log(&self) -> Vec<CallRecord> {
        let Some(path) = self.log_path() else {
            return Vec::new();
        };
        let Ok(content) = fs::read_to_string(&path) else {
            return Vec::new();
        };
        content
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect()
    }

    /// Cost accounting over the last `days` of the call log.
    pub fn cost_summary(&self, days: i64) -> CostSummary {
        let cutoff = Utc::now() - chrono::Duration::days(days);
        let mut summary = CostSummary::default();
        for record in self.call_log() {
            if record.timestamp < cutoff {
                continue;
            }
            match record.cache {
                CacheOutcome::Hit => summary.cache_hits += 1,
                CacheOutcome::Miss => summary.total_calls += 1,
            }
            summary.total_tokens += record.prompt_tokens + record.completion_tokens;
            summary.total_cost_usd += record.cost_usd;
            summary.total_issues += record.issues_found;
        }
        summary
    }

    fn entries_dir(&self) -> Option<PathBuf> {
        self.dir.as_ref().map(|d| d.join("entries"))
    }

    fn entry_path(&self, fingerprint: &str) -> Option<PathBuf> {
        self.entries_dir().map(|d| d.join(format!("{}.json", fingerprint)))
    }

    fn log_path(&self) -> Option<PathBuf> {
        self.dir.as_ref().map(|d| d.join("calls.jsonl"))
    }

    fn read_entry(&self, fingerprint: &str) -> Option<CacheEntry> {
        let path = self.entry_path(fingerprint)?;
        let bytes = fs::read(path).ok()?;
        match serde_json::from_slice(&bytes) {
            Ok(entry) => Some(entry),
            Err(e) => {
                debug!("discarding corrupt cache entry {}: {}", &fingerprint[..8], e);
                None
            }
        }
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::IssueLevel;
    use tempfile::TempDir;

    fn key(content: &str, rules: &str) -> CacheKey {
        CacheKey::new(content.to_string(), rules.to_string(), "mock/test".to_string())
    }

    fn issue(rule_id: &str) -> Issue {
        Issue {
            rule_id: rule_id.to_string(),
            level: IssueLevel::Major,
            file: "test.py".to_string(),
            line: 10,
            end_line: 12,
            message: "test issue".to_string(),
            suggestion: None,
        }
    }

    #[test]
    fn test_put_and_get() {
        let temp = TempDir::new().unwrap();
        let cache = ReviewCache::open(temp.path(), Duration::from_secs(3600));

        cache.put(&key("h1", "r1"), &[issue("test/rule")]);
        let result = cache.get(&key("h1", "r1")).unwrap();

        assert_eq!(result.len(), 1);
        assert_eq!(result[0].rule_id, "test/rule");
    }

    #[test]
    fn test_miss_on_different_content() {
        let temp = TempDir::new().unwrap();
        let cache = ReviewCache::open(temp.path(), Duration::from_secs(3600));

        cache.put(&key("h1", "r1"), &[issue("test/rule")]);
        assert!(cache.get(&key("h2", "r1")).is_none());
    }

    #[test]
    fn test_miss_on_different_rules_or_provider() {
        let temp = TempDir::new().unwrap();
        let cache = ReviewCache::open(temp.path(), Duration::from_secs(3600));

        cache.put(&key("h1", "r1"), &[issue("test/rule")]);
        assert!(cache.get(&key("h1", "r2")).is_none());

        let other_provider =
            CacheKey::new("h1".to_string(), "r1".to_string(), "other/model".to_string());
        assert!(cache.get(&other_provider).is_none());
    }

    #[test]
    fn test_expired_entry_is_miss() {
        let temp = TempDir::new().unwrap();
        let cache = ReviewCache::open(temp.path(), Duration::ZERO);

        cache.put(&key("h1", "r1"), &[issue("test/rule")]);
        assert!(cache.get(&key("h1", "r1")).is_none());
    }

    #[test]
    fn test_corrupt_entry_is_miss_then_overwritten() {
        let temp = TempDir::new().unwrap();
        let cache = ReviewCache::open(temp.path(), Duration::from_secs(3600));
        let k = key("h1", "r1");

        let path = temp
            .path()
            .join("entries")
            .join(format!("{}.json", k.fingerprint()));
        fs::write(&path, b"{not json").unwrap();
        assert!(cache.get(&k).is_none());

        cache.put(&k, &[issue("test/rule")]);
        assert_eq!(cache.get(&k).unwrap().len(), 1);
    }

    #[test]
    fn test_put_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let cache = ReviewCache::open(temp.path(), Duration::from_secs(3600));
        let k = key("h1", "r1");

        cache.put(&k, &[issue("test/rule")]);
        cache.put(&k, &[issue("test/rule")]);

        let result = cache.get(&k).unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(cache.stats().entries, 1);
    }

    #[test]
    fn test_persists_across_instances() {
        let temp = TempDir::new().unwrap();
        {
            let cache = ReviewCache::open(temp.path(), Duration::from_secs(3600));
            cache.put(&key("h1", "r1"), &[issue("test/rule")]);
        }
        let cache = ReviewCache::open(temp.path(), Duration::from_secs(3600));
        assert_eq!(cache.get(&key("h1", "r1")).unwrap().len(), 1);
    }

    #[test]
    fn test_degraded_cache_never_fails() {
        // A file where the directory should be makes creation fail.
        let temp = TempDir::new().unwrap();
        let blocked = temp.path().join("blocked");
        fs::write(&blocked, b"file in the way").unwrap();

        let cache = ReviewCache::open(&blocked, Duration::from_secs(3600));
        let k = key("h1", "r1");
        cache.put(&k, &[issue("test/rule")]);
        // Memory tier still works within the process.
        assert_eq!(cache.get(&k).unwrap().len(), 1);
        assert_eq!(cache.stats().entries, 0);
    }

    #[test]
    fn test_clear_removes_entries() {
        let temp = TempDir::new().unwrap();
        let cache = ReviewCache::open(temp.path(), Duration::from_secs(3600));

        cache.put(&key("h1", "r1"), &[issue("test/rule")]);
        cache.put(&key("h2", "r1"), &[issue("test/rule")]);

        assert_eq!(cache.clear(), 2);
        assert!(cache.get(&key("h1", "r1")).is_none());
        assert_eq!(cache.stats().entries, 0);
    }

    #[test]
    fn test_call_log_append_and_summary() {
        let temp = TempDir::new().unwrap();
        let cache = ReviewCache::open(temp.path(), Duration::from_secs(3600));

        cache.log_call(&CallRecord {
            timestamp: Utc::now(),
            file: "views.py".to_string(),
            provider: "mock/test".to_string(),
            cache: CacheOutcome::Miss,
            prompt_tokens: 1000,
            completion_tokens: 500,
            duration_ms: 1500,
            issues_found: 3,
            cost_usd: 0.01,
        });
        cache.log_call(&CallRecord {
            timestamp: Utc::now(),
            file: "models.py".to_string(),
            provider: "mock/test".to_string(),
            cache: CacheOutcome::Hit,
            prompt_tokens: 0,
            completion_tokens: 0,
            duration_ms: 0,
            issues_found: 2,
            cost_usd: 0.0,
        });

        let summary = cache.cost_summary(30);
        assert_eq!(summary.total_calls, 1);
        assert_eq!(summary.cache_hits, 1);
        assert_eq!(summary.total_tokens, 1500);
        assert_eq!(summary.total_issues, 5);
        assert!((summary.total_cost_usd - 0.01).abs() < 1e-9);
    }

    #[test]
    fn test_fingerprint_deterministic() {
        let a = key("h1", "r1");
        let b = key("h1", "r1");
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), key("h1", "r2").fingerprint());
    }
}
