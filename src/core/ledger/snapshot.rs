use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::core::error::LedgerError;
use crate::core::models::ledger::LedgerRecord;

const SNAPSHOT_VERSION: u64 = 1;

fn snapshot_version() -> u64 {
    SNAPSHOT_VERSION
}

fn default_window_days() -> u32 {
    7
}

/// On-disk copy of the ledger window.
///
/// `last_fetch` never moves backwards and is never earlier than any record
/// merged into the snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheSnapshot {
    #[serde(default = "snapshot_version")]
    pub version: u64,
    #[serde(alias = "lastFetchTimestamp")]
    pub last_fetch: DateTime<Utc>,
    #[serde(default = "default_window_days")]
    pub window_days: u32,
    #[serde(default)]
    pub records: Vec<LedgerRecord>,
}

/// Timing knobs for deciding how much of the ledger to re-fetch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RefreshPolicy {
    pub ttl: Duration,
    pub incremental_threshold: Duration,
    pub overlap: Duration,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self {
            ttl: Duration::seconds(300),
            incremental_threshold: Duration::seconds(3600),
            overlap: Duration::seconds(300),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshPlan {
    /// Snapshot is young enough to serve as is.
    Fresh,
    /// Fetch from `since` to now and merge.
    Incremental { since: DateTime<Utc> },
    /// Discard the snapshot and fetch the whole window.
    Full,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneStats {
    pub expired: usize,
    pub unparsable: usize,
}

impl PruneStats {
    pub fn total(&self) -> usize {
        self.expired + self.unparsable
    }
}

impl CacheSnapshot {
    pub fn new(last_fetch: DateTime<Utc>, window_days: u32) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            last_fetch,
            window_days,
            records: Vec::new(),
        }
    }

    /// Read the snapshot at `path`. A missing file is `Ok(None)`; anything
    /// unreadable is `CacheCorruption`.
    pub fn load(path: &Path) -> Result<Option<Self>, LedgerError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(LedgerError::CacheCorruption(format!(
                    "{}: {}",
                    path.display(),
                    e
                )))
            }
        };
        let snapshot: Self = serde_json::from_str(&content).map_err(|e| {
            LedgerError::CacheCorruption(format!("{}: {}", path.display(), e))
        })?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(LedgerError::CacheCorruption(format!(
                "unsupported snapshot version {}",
                snapshot.version
            )));
        }
        Ok(Some(snapshot))
    }

    /// Write to a uniquely named temp file beside `path`, then rename over
    /// it, so a crash leaves either the old or the new snapshot and two
    /// writers never share a temp file.
    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let dir = parent_dir(path);
        std::fs::create_dir_all(dir)?;
        let json = serde_json::to_vec(self)?;
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(&json)?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.last_fetch
    }

    /// Decide how to refresh. A snapshot covering a shorter window than
    /// requested always gets a full refresh.
    pub fn plan(
        snapshot: Option<&Self>,
        now: DateTime<Utc>,
        window_days: u32,
        policy: &RefreshPolicy,
    ) -> RefreshPlan {
        let Some(snapshot) = snapshot else {
            return RefreshPlan::Full;
        };
        if snapshot.window_days < window_days {
            return RefreshPlan::Full;
        }
        let age = snapshot.age(now);
        if age < policy.ttl {
            RefreshPlan::Fresh
        } else if age < policy.incremental_threshold {
            RefreshPlan::Incremental {
                since: snapshot.last_fetch - policy.overlap,
            }
        } else {
            RefreshPlan::Full
        }
    }

    /// Add rows whose timestamp is not already present. Returns the number
    /// added.
    pub fn merge(&mut self, incoming: Vec<LedgerRecord>) -> usize {
        let existing: HashSet<String> = self.records.iter().map(|r| r.timestamp.clone()).collect();
        let before = self.records.len();
        self.records
            .extend(incoming.into_iter().filter(|r| !existing.contains(&r.timestamp)));
        self.records.len() - before
    }

    /// Drop rows older than `cutoff`, and rows whose timestamp cannot be read.
    pub fn prune(&mut self, cutoff: DateTime<Utc>) -> PruneStats {
        let mut stats = PruneStats::default();
        self.records.retain(|record| match record.parsed_timestamp() {
            Some(ts) if ts >= cutoff => true,
            Some(_) => {
                stats.expired += 1;
                false
            }
            None => {
                stats.unparsable += 1;
                false
            }
        });
        stats
    }

    /// Move `last_fetch` forward to cover `now` and every held record.
    pub fn advance(&mut self, now: DateTime<Utc>) {
        let newest = self
            .records
            .iter()
            .filter_map(LedgerRecord::parsed_timestamp)
            .max();
        let mut last = self.last_fetch.max(now);
        if let Some(newest) = newest {
            last = last.max(newest);
        }
        self.last_fetch = last;
    }

    /// Records at or after `cutoff`, without modifying the snapshot.
    pub fn records_since(&self, cutoff: DateTime<Utc>) -> Vec<LedgerRecord> {
        self.records
            .iter()
            .filter(|r| r.parsed_timestamp().is_some_and(|ts| ts >= cutoff))
            .cloned()
            .collect()
    }
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

/// `<snapshot>.lock`, the file other processes lock against.
fn lock_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".lock");
    path.with_file_name(name)
}

/// Exclusive advisory lock on a snapshot, held across processes until
/// dropped.
#[derive(Debug)]
pub struct SnapshotLock {
    file: File,
}

impl SnapshotLock {
    /// Block until the lock beside `path` is ours.
    pub fn acquire(path: &Path) -> std::io::Result<Self> {
        std::fs::create_dir_all(parent_dir(path))?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(lock_path(path))?;
        FileExt::lock_exclusive(&file)?;
        Ok(Self { file })
    }
}

impl Drop for SnapshotLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 11, 29, 12, 0, 0).unwrap()
    }

    fn record(ts: &str) -> LedgerRecord {
        LedgerRecord {
            sku: "qwen3-4b-llm-input-mtoken".to_string(),
            amount: -0.01,
            currency: "DIEM".to_string(),
            units: 0.001,
            unit_price: 0.05,
            timestamp: ts.to_string(),
            notes: None,
            inference_details: None,
        }
    }

    #[test]
    fn plan_without_snapshot_is_full() {
        let plan = CacheSnapshot::plan(None, now(), 7, &RefreshPolicy::default());
        assert_eq!(plan, RefreshPlan::Full);
    }

    #[test]
    fn plan_follows_snapshot_age() {
        let policy = RefreshPolicy::default();
        let mut snap = CacheSnapshot::new(now() - Duration::seconds(60), 7);
        assert_eq!(CacheSnapshot::plan(Some(&snap), now(), 7, &policy), RefreshPlan::Fresh);

        snap.last_fetch = now() - Duration::minutes(30);
        assert_eq!(
            CacheSnapshot::plan(Some(&snap), now(), 7, &policy),
            RefreshPlan::Incremental {
                since: now() - Duration::minutes(35)
            }
        );

        snap.last_fetch = now() - Duration::hours(1);
        assert_eq!(CacheSnapshot::plan(Some(&snap), now(), 7, &policy), RefreshPlan::Full);
    }

    #[test]
    fn plan_wider_window_forces_full() {
        let snap = CacheSnapshot::new(now(), 7);
        let plan = CacheSnapshot::plan(Some(&snap), now(), 30, &RefreshPolicy::default());
        assert_eq!(plan, RefreshPlan::Full);
    }

    #[test]
    fn merge_is_idempotent() {
        let page = vec![record("2025-11-29T10:00:00Z"), record("2025-11-29T11:00:00Z")];
        let mut snap = CacheSnapshot::new(now(), 7);
        assert_eq!(snap.merge(page.clone()), 2);
        let once = snap.records.clone();
        assert_eq!(snap.merge(page), 0);
        assert_eq!(snap.records, once);
    }

    #[test]
    fn merge_keeps_same_timestamp_rows_within_one_batch() {
        let mut snap = CacheSnapshot::new(now(), 7);
        let added = snap.merge(vec![
            record("2025-11-29T10:00:00Z"),
            record("2025-11-29T10:00:00Z"),
        ]);
        assert_eq!(added, 2);
    }

    #[test]
    fn prune_drops_old_and_unreadable_rows() {
        let mut snap = CacheSnapshot::new(now(), 7);
        snap.merge(vec![
            record("2025-11-28T10:00:00Z"),
            record("2025-11-01T10:00:00Z"),
            record("not-a-time"),
        ]);
        let stats = snap.prune(now() - Duration::days(7));
        assert_eq!(stats, PruneStats { expired: 1, unparsable: 1 });
        assert_eq!(snap.records.len(), 1);
        assert!(snap
            .records
            .iter()
            .all(|r| r.parsed_timestamp().unwrap() >= now() - Duration::days(7)));
    }

    #[test]
    fn advance_is_monotonic_and_covers_records() {
        let mut snap = CacheSnapshot::new(now(), 7);
        snap.advance(now() - Duration::hours(1));
        assert_eq!(snap.last_fetch, now());

        snap.merge(vec![record("2025-11-29T12:30:00Z")]);
        snap.advance(now());
        assert_eq!(
            snap.last_fetch,
            Utc.with_ymd_and_hms(2025, 11, 29, 12, 30, 0).unwrap()
        );
    }

    #[test]
    fn save_then_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache").join("ledger-snapshot.json");
        let mut snap = CacheSnapshot::new(now(), 7);
        snap.merge(vec![record("2025-11-29T10:00:00Z")]);
        snap.save(&path).unwrap();

        let loaded = CacheSnapshot::load(&path).unwrap().unwrap();
        assert_eq!(loaded, snap);
        let leftovers: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(leftovers, vec![std::ffi::OsString::from("ledger-snapshot.json")]);
    }

    #[test]
    fn concurrent_saves_never_share_a_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snap.json");
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let path = path.clone();
                std::thread::spawn(move || {
                    let mut snap = CacheSnapshot::new(now(), 7);
                    let ts = format!("2025-11-29T0{}:00:00Z", i);
                    snap.merge(vec![record(&ts)]);
                    for _ in 0..20 {
                        snap.save(&path).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let loaded = CacheSnapshot::load(&path).unwrap().unwrap();
        assert_eq!(loaded.records.len(), 1);
    }

    #[test]
    fn snapshot_lock_excludes_other_handles() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("snap.json");
        let held = SnapshotLock::acquire(&path).unwrap();

        let other = std::fs::OpenOptions::new()
            .write(true)
            .open(lock_path(&path))
            .unwrap();
        assert!(FileExt::try_lock_exclusive(&other).is_err());

        drop(held);
        assert!(FileExt::try_lock_exclusive(&other).is_ok());
        FileExt::unlock(&other).unwrap();
    }

    #[test]
    fn load_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(CacheSnapshot::load(&dir.path().join("absent.json")).unwrap().is_none());
    }

    #[test]
    fn load_truncated_file_is_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snap.json");
        std::fs::write(&path, r#"{"lastFetch":"2025-11-29T12:00:00Z","records":[{"sku""#).unwrap();
        let err = CacheSnapshot::load(&path).unwrap_err();
        assert!(matches!(err, LedgerError::CacheCorruption(_)));
    }

    #[test]
    fn load_accepts_legacy_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snap.json");
        std::fs::write(
            &path,
            r#"{"lastFetchTimestamp":"2025-11-29T12:00:00Z","records":[]}"#,
        )
        .unwrap();
        let loaded = CacheSnapshot::load(&path).unwrap().unwrap();
        assert_eq!(loaded.last_fetch, now());
        assert_eq!(loaded.window_days, 7);
    }

    #[test]
    fn records_since_filters_without_mutation() {
        let mut snap = CacheSnapshot::new(now(), 7);
        snap.merge(vec![record("2025-11-29T10:00:00Z"), record("2025-11-20T10:00:00Z")]);
        let recent = snap.records_since(now() - Duration::days(7));
        assert_eq!(recent.len(), 1);
        assert_eq!(snap.records.len(), 2);
    }
}
