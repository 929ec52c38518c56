//! Incremental usage synchronization.
//!
//! A client with no persisted table gets a one-year backfill fetched in
//! quarterly windows (cold path). A client with a persisted table gets only
//! the window since its last bucket, which is re-fetched because it may have
//! been incomplete when stored (warm path).

use serde::Deserialize;
use time::OffsetDateTime;

use crate::{
    fetch::{FetchError, UsageFetcher},
    store::{table_name, StoreError, UsageStore},
    table::{TableError, UsageTable},
    window::{backfill_windows, delta_window},
};

/// What to do with the persisted table when a warm sync fails on fetch,
/// corrupt contents, or a schema change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryPolicy {
    /// Delete the persisted table; the next sync backfills from scratch.
    #[default]
    Rebuild,
    /// Leave the persisted table as it is.
    KeepStale,
}

#[derive(thiserror::Error, Debug)]
pub enum SyncError {
    #[error("client identifier must not be empty")]
    InvalidClient,
    #[error("usage fetch failed: {0}")]
    Fetch(#[from] FetchError),
    #[error("persisted table '{name}' is corrupt: {reason}")]
    CorruptCache { name: String, reason: String },
    #[error("fetched usage does not fit persisted table: {0}")]
    Merge(#[from] TableError),
    #[error("usage store error: {0}")]
    Store(StoreError),
}

impl SyncError {
    /// Whether retrying the same sync later might succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::Fetch(_) | SyncError::Store(StoreError::Io(_)))
    }
}

impl From<StoreError> for SyncError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Corrupt { name, reason } => SyncError::CorruptCache { name, reason },
            other => SyncError::Store(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    /// Cold path fetched data and persisted a new table.
    Backfilled { device_name: String, table: UsageTable },
    /// Warm path replaced the last bucket and appended newer ones.
    Updated {
        device_name: String,
        table: UsageTable,
        fetched_rows: usize,
    },
    /// Warm path fetched nothing; the persisted table is unchanged.
    Unchanged { device_name: String, table: UsageTable },
    /// Cold path fetched nothing; nothing was persisted.
    NoData,
}

impl SyncOutcome {
    pub fn device_name(&self) -> Option<&str> {
        match self {
            Self::Backfilled { device_name, .. }
            | Self::Updated { device_name, .. }
            | Self::Unchanged { device_name, .. } => Some(device_name),
            Self::NoData => None,
        }
    }

    pub fn table(&self) -> Option<&UsageTable> {
        match self {
            Self::Backfilled { table, .. }
            | Self::Updated { table, .. }
            | Self::Unchanged { table, .. } => Some(table),
            Self::NoData => None,
        }
    }

    /// `(device_name, table)`; both empty for [`SyncOutcome::NoData`].
    pub fn into_parts(self) -> (String, UsageTable) {
        match self {
            Self::Backfilled { device_name, table }
            | Self::Updated {
                device_name, table, ..
            }
            | Self::Unchanged { device_name, table } => (device_name, table),
            Self::NoData => (String::new(), UsageTable::default()),
        }
    }
}

pub struct Synchronizer<F, S> {
    fetcher: F,
    store: S,
    policy: RecoveryPolicy,
}

impl<F, S> Synchronizer<F, S>
where
    F: UsageFetcher,
    S: UsageStore,
{
    pub fn new(fetcher: F, store: S, policy: RecoveryPolicy) -> Self {
        Self {
            fetcher,
            store,
            policy,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub async fn sync(&self, client: &str) -> Result<SyncOutcome, SyncError> {
        self.sync_at(client, OffsetDateTime::now_utc()).await
    }

    pub async fn sync_at(
        &self,
        client: &str,
        now: OffsetDateTime,
    ) -> Result<SyncOutcome, SyncError> {
        let client = client.trim();
        if client.is_empty() {
            return Err(SyncError::InvalidClient);
        }

        metrics::counter!("usage_sync_runs_total").increment(1);

        let res = match self.store.find(client).await? {
            None => self.cold(client, now).await,
            Some(name) => {
                let res = self.warm(client, &name, now).await;
                if let Err(e) = &res {
                    self.recover(&name, e).await;
                }
                res
            }
        };

        if res.is_err() {
            metrics::counter!("usage_sync_failures_total").increment(1);
        }
        res
    }

    async fn cold(&self, client: &str, now: OffsetDateTime) -> Result<SyncOutcome, SyncError> {
        let mut table = UsageTable::default();
        let mut device_name = None;

        for window in backfill_windows(now) {
            let fetched = self.fetcher.fetch_usage(client, window).await?;
            if fetched.device_name.is_some() {
                device_name = fetched.device_name;
            }
            let rows = table.merge_tail(fetched.table)?;
            metrics::counter!("usage_sync_rows_fetched_total").increment(rows as u64);
            tracing::debug!(client, %window, rows, "backfill window fetched");
        }

        let Some(device_name) = device_name.filter(|_| !table.is_empty()) else {
            tracing::info!(client, "no usage found for client, nothing persisted");
            metrics::counter!("usage_sync_no_data_total").increment(1);
            return Ok(SyncOutcome::NoData);
        };

        let name = table_name(&device_name);
        self.store.save(&name, &table).await?;

        tracing::info!(
            client,
            device = %device_name,
            table = %name,
            rows = table.len(),
            "usage history backfilled"
        );

        Ok(SyncOutcome::Backfilled { device_name, table })
    }

    async fn warm(
        &self,
        client: &str,
        name: &str,
        now: OffsetDateTime,
    ) -> Result<SyncOutcome, SyncError> {
        let mut table = self.store.load(name).await?;

        let Some(last) = table.last_bucket() else {
            return Err(SyncError::CorruptCache {
                name: name.to_string(),
                reason: "persisted table has no rows".to_string(),
            });
        };

        let window = delta_window(last, now);
        if window.start > now {
            return Err(SyncError::CorruptCache {
                name: name.to_string(),
                reason: format!("last bucket {last} is in the future"),
            });
        }

        let fetched = self.fetcher.fetch_usage(client, window).await?;
        let device_name = fetched.device_name.unwrap_or_else(|| name.to_string());

        if fetched.table.is_empty() {
            tracing::info!(client, table = %name, %window, "no new usage since last sync");
            return Ok(SyncOutcome::Unchanged { device_name, table });
        }

        table.drop_last();
        let fetched_rows = table.merge_tail(fetched.table)?;
        self.store.save(name, &table).await?;

        metrics::counter!("usage_sync_rows_fetched_total").increment(fetched_rows as u64);
        tracing::info!(
            client,
            device = %device_name,
            table = %name,
            fetched_rows,
            rows = table.len(),
            "usage history updated"
        );

        Ok(SyncOutcome::Updated {
            device_name,
            table,
            fetched_rows,
        })
    }

    async fn recover(&self, name: &str, error: &SyncError) {
        if !matches!(
            error,
            SyncError::Fetch(_) | SyncError::CorruptCache { .. } | SyncError::Merge(_)
        ) {
            return;
        }

        match self.policy {
            RecoveryPolicy::KeepStale => {
                tracing::warn!(table = name, error = %error, "warm sync failed, keeping persisted table");
            }
            RecoveryPolicy::Rebuild => match self.store.remove(name).await {
                Ok(()) => {
                    metrics::counter!("usage_sync_cache_removed_total").increment(1);
                    tracing::warn!(
                        table = name,
                        error = %error,
                        "warm sync failed, persisted table removed for rebuild"
                    );
                }
                Err(e) => {
                    tracing::error!(table = name, error = %e, "failed to remove persisted table");
                }
            },
        }
    }
}
