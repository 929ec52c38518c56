use std::{env, time::Duration};

use anyhow::{bail, Result};
use partner_client::SnapshotApi;
use tokio::time::MissedTickBehavior;
use usage_sync::{
    config::{AppConfig, StoreKind},
    fetch::{PartnerUsageFetcher, UsageFetcher},
    metrics_server, observability,
    store::{CsvDirStore, SqliteDirStore, StoreError, UsageStore},
    table::UsageTable,
    SyncOutcome, Synchronizer,
};

enum ConfiguredStore {
    Csv(CsvDirStore),
    Sqlite(SqliteDirStore),
}

#[async_trait::async_trait]
impl UsageStore for ConfiguredStore {
    async fn find(&self, client: &str) -> Result<Option<String>, StoreError> {
        match self {
            Self::Csv(s) => s.find(client).await,
            Self::Sqlite(s) => s.find(client).await,
        }
    }

    async fn load(&self, name: &str) -> Result<UsageTable, StoreError> {
        match self {
            Self::Csv(s) => s.load(name).await,
            Self::Sqlite(s) => s.load(name).await,
        }
    }

    async fn save(&self, name: &str, table: &UsageTable) -> Result<(), StoreError> {
        match self {
            Self::Csv(s) => s.save(name, table).await,
            Self::Sqlite(s) => s.save(name, table).await,
        }
    }

    async fn remove(&self, name: &str) -> Result<(), StoreError> {
        match self {
            Self::Csv(s) => s.remove(name).await,
            Self::Sqlite(s) => s.remove(name).await,
        }
    }
}

/// Sync every client once, in order. Returns the number of failures.
async fn run_cycle<F, S>(sync: &Synchronizer<F, S>, clients: &[String]) -> usize
where
    F: UsageFetcher,
    S: UsageStore,
{
    let mut failed = 0;
    for client in clients {
        match sync.sync(client).await {
            Ok(SyncOutcome::NoData) => {
                tracing::warn!(client = %client, "no matching device or no usage for client");
            }
            Ok(outcome) => {
                let rows = outcome.table().map(UsageTable::len).unwrap_or_default();
                tracing::info!(
                    client = %client,
                    device = outcome.device_name().unwrap_or_default(),
                    rows,
                    "client synced"
                );
            }
            Err(e) => {
                failed += 1;
                tracing::error!(
                    client = %client,
                    error = %e,
                    transient = e.is_transient(),
                    "client sync failed"
                );
            }
        }
    }
    failed
}

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let cfg = AppConfig::load()?;
    cfg.validate()?;

    // Clients on the command line take precedence over the config file.
    let args: Vec<String> = env::args().skip(1).collect();
    let clients = if args.is_empty() { cfg.clients.clone() } else { args };
    if clients.is_empty() {
        bail!("usage: usage-sync <client> [client ...] (or set `clients` in the config file)");
    }

    if let Some(metrics_cfg) = &cfg.metrics {
        metrics_server::init(&metrics_cfg.bind_addr)?;
    }

    let api = SnapshotApi::open(&cfg.partner.snapshot_path).await?;
    let fetcher = PartnerUsageFetcher::new(api, cfg.partner.credentials())
        .with_value_scale(cfg.partner.value_scale);

    let store = match cfg.store.kind {
        StoreKind::Csv => ConfiguredStore::Csv(CsvDirStore::new(&cfg.store.data_dir)),
        StoreKind::Sqlite => ConfiguredStore::Sqlite(SqliteDirStore::new(&cfg.store.data_dir)),
    };

    let sync = Synchronizer::new(fetcher, store, cfg.recovery_policy);

    match &cfg.schedule {
        None => {
            let failed = run_cycle(&sync, &clients).await;
            if failed > 0 {
                bail!("{failed} of {} clients failed to sync", clients.len());
            }
        }
        Some(schedule) => {
            tracing::info!(
                interval_secs = schedule.interval_secs,
                clients = clients.len(),
                "running on schedule"
            );
            let mut ticker = tokio::time::interval(Duration::from_secs(schedule.interval_secs));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let failed = run_cycle(&sync, &clients).await;
                if failed > 0 {
                    tracing::warn!(failed, "sync cycle finished with failures");
                }
            }
        }
    }

    Ok(())
}
