use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::client::{FetchedRange, LedgerClient};
use super::snapshot::{CacheSnapshot, RefreshPlan, RefreshPolicy, SnapshotLock};
use crate::core::config::LedgerConfig;
use crate::core::error::LedgerError;
use crate::core::models::ledger::LedgerRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    Fresh,
    Incremental,
    Full,
}

impl std::fmt::Display for SyncMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fresh => write!(f, "fresh"),
            Self::Incremental => write!(f, "incremental"),
            Self::Full => write!(f, "full"),
        }
    }
}

/// Result of one sync call. Always carries the best records available;
/// `error` is set when the network step failed and the records are stale.
#[derive(Debug, Clone)]
pub struct SyncOutcome {
    pub records: Vec<LedgerRecord>,
    pub mode: SyncMode,
    pub last_fetch: Option<DateTime<Utc>>,
    pub pages: u32,
    pub fetched: usize,
    pub added: usize,
    pub pruned: usize,
    pub truncated: bool,
    pub skipped: usize,
    pub persisted: bool,
    pub error: Option<LedgerError>,
}

impl SyncOutcome {
    fn served(mode: SyncMode, snapshot: Option<&CacheSnapshot>, cutoff: DateTime<Utc>) -> Self {
        Self {
            records: snapshot.map(|s| s.records_since(cutoff)).unwrap_or_default(),
            mode,
            last_fetch: snapshot.map(|s| s.last_fetch),
            pages: 0,
            fetched: 0,
            added: 0,
            pruned: 0,
            truncated: false,
            skipped: 0,
            persisted: false,
            error: None,
        }
    }

    pub fn is_stale(&self) -> bool {
        self.error.is_some()
    }
}

/// Keeps the on-disk ledger snapshot current.
///
/// Each sync holds an advisory lock on the snapshot file from load to save,
/// so overlapping calls run one at a time even across processes. Clones also
/// share an in-process mutex. A caller that queued behind a successful sync
/// finds the snapshot fresh and makes no request.
#[derive(Debug, Clone)]
pub struct LedgerSync {
    client: Option<LedgerClient>,
    path: PathBuf,
    policy: RefreshPolicy,
    max_pages: u32,
    lock: Arc<Mutex<()>>,
}

impl LedgerSync {
    pub fn new(
        client: Option<LedgerClient>,
        path: PathBuf,
        policy: RefreshPolicy,
        max_pages: u32,
    ) -> Self {
        Self {
            client,
            path,
            policy,
            max_pages: max_pages.max(1),
            lock: Arc::new(Mutex::new(())),
        }
    }

    /// Build from config. A missing admin key is not an error here; syncs
    /// that need the network will report it.
    pub fn from_config(config: &LedgerConfig) -> Result<Self, LedgerError> {
        let client = match LedgerClient::from_config(config) {
            Ok(client) => Some(client),
            Err(LedgerError::MissingCredential) => None,
            Err(e) => return Err(e),
        };
        let policy = RefreshPolicy {
            ttl: Duration::seconds(config.cache_ttl_secs as i64),
            incremental_threshold: Duration::seconds(config.incremental_threshold_secs as i64),
            overlap: Duration::seconds(config.overlap_secs as i64),
        };
        Ok(Self::new(client, config.snapshot_path(), policy, config.max_pages))
    }

    pub fn client(&self) -> Option<&LedgerClient> {
        self.client.as_ref()
    }

    pub fn snapshot_path(&self) -> &Path {
        &self.path
    }

    pub async fn sync(&self, window_days: u32, cancel: &CancellationToken) -> SyncOutcome {
        self.sync_at(Utc::now(), window_days, cancel).await
    }

    /// Refresh the snapshot as of `now` and return the window's records.
    pub async fn sync_at(
        &self,
        now: DateTime<Utc>,
        window_days: u32,
        cancel: &CancellationToken,
    ) -> SyncOutcome {
        let _guard = self.lock.lock().await;
        let _file_lock = self.lock_snapshot().await;

        let window_days = window_days.max(1);
        let cutoff = now - Duration::days(window_days as i64);
        let snapshot = match CacheSnapshot::load(&self.path) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!(error = %e, "ledger snapshot unreadable, starting cold");
                None
            }
        };

        let plan = CacheSnapshot::plan(snapshot.as_ref(), now, window_days, &self.policy);
        let (mode, start) = match plan {
            RefreshPlan::Fresh => {
                tracing::debug!(path = %self.path.display(), "ledger snapshot fresh");
                return SyncOutcome::served(SyncMode::Fresh, snapshot.as_ref(), cutoff);
            }
            RefreshPlan::Incremental { since } => (SyncMode::Incremental, since),
            RefreshPlan::Full => (SyncMode::Full, cutoff),
        };
        tracing::info!(%mode, start = %start, end = %now, "syncing ledger");

        let fetched = match self.fetch(start, now, cancel).await {
            Ok(fetched) => fetched,
            Err(error) => {
                tracing::warn!(%mode, error = %error, "ledger sync failed, serving cached snapshot");
                let mut outcome = SyncOutcome::served(mode, snapshot.as_ref(), cutoff);
                outcome.error = Some(error);
                return outcome;
            }
        };

        let mut next = match (mode, snapshot) {
            (SyncMode::Incremental, Some(snapshot)) => snapshot,
            _ => CacheSnapshot::new(now, window_days),
        };
        let fetched_count = fetched.records.len();
        let added = next.merge(fetched.records);
        let pruned = next.prune(cutoff);
        next.advance(now);
        next.window_days = window_days;

        if pruned.unparsable > 0 {
            tracing::warn!(count = pruned.unparsable, "dropped ledger rows with unreadable timestamps");
        }

        let persisted = match next.save(&self.path) {
            Ok(()) => {
                tracing::debug!(
                    path = %self.path.display(),
                    records = next.records.len(),
                    "ledger snapshot written"
                );
                true
            }
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to write ledger snapshot");
                false
            }
        };

        tracing::info!(
            %mode,
            pages = fetched.pages,
            fetched = fetched_count,
            added,
            pruned = pruned.total(),
            "ledger sync complete"
        );

        SyncOutcome {
            last_fetch: Some(next.last_fetch),
            records: next.records,
            mode,
            pages: fetched.pages,
            fetched: fetched_count,
            added,
            pruned: pruned.total(),
            truncated: fetched.truncated,
            skipped: fetched.skipped + pruned.unparsable,
            persisted,
            error: None,
        }
    }

    /// Wait for the cross-process snapshot lock. Without one the sync still
    /// runs, unserialised.
    async fn lock_snapshot(&self) -> Option<SnapshotLock> {
        let path = self.path.clone();
        match tokio::task::spawn_blocking(move || SnapshotLock::acquire(&path)).await {
            Ok(Ok(lock)) => Some(lock),
            Ok(Err(e)) => {
                tracing::warn!(path = %self.path.display(), error = %e, "could not lock ledger snapshot");
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, "snapshot lock task failed");
                None
            }
        }
    }

    async fn fetch(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<FetchedRange, LedgerError> {
        let client = self.client.as_ref().ok_or(LedgerError::MissingCredential)?;
        client.fetch_range(start, end, self.max_pages, cancel).await
    }
}
