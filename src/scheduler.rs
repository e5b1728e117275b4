use std::{sync::Arc, time::Duration};
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::{
    config::Config,
    error::AppError,
    fetcher::{Fetcher, StagedDatabase},
    models::{DatabaseHandle, RefreshOutcome},
    store::DatabaseStore,
};

/// Periodically downloads a fresh database and promotes it into the store
pub struct RefreshScheduler {
    store: Arc<DatabaseStore>,
    fetcher: Fetcher,
    license_key: Option<String>,
    interval: Duration,
    refresh_on_startup: bool,
}

impl RefreshScheduler {
    pub fn new(
        store: Arc<DatabaseStore>,
        fetcher: Fetcher,
        license_key: Option<String>,
        interval: Duration,
        refresh_on_startup: bool,
    ) -> Self {
        Self {
            store,
            fetcher,
            license_key,
            interval,
            refresh_on_startup,
        }
    }

    pub fn from_config(store: Arc<DatabaseStore>, config: &Config) -> Result<Self, AppError> {
        Ok(Self::new(
            store,
            Fetcher::from_config(config)?,
            config.license_key.clone(),
            config.update_interval,
            config.refresh_on_startup,
        ))
    }

    /// Refresh on every tick until `shutdown` is cancelled.
    ///
    /// Failed refreshes are logged and retried on the next tick.
    pub async fn run(self, shutdown: CancellationToken) {
        tracing::info!(
            "Starting database refresh with interval of {} seconds",
            self.interval.as_secs()
        );

        let start = if self.refresh_on_startup {
            Instant::now()
        } else {
            Instant::now() + self.interval
        };
        let mut interval = time::interval_at(start, self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Received shutdown signal, stopping database refresh");
                    break;
                }
                _ = interval.tick() => {}
            }

            // Only the download is abandoned; a started promotion runs to completion
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Shutdown during database refresh, abandoning attempt");
                    break;
                }
                _ = self.run_once() => {}
            }
        }
    }

    /// Perform a single refresh cycle
    pub async fn run_once(&self) -> RefreshOutcome {
        tracing::info!("Refreshing MaxMind database");

        let outcome = match self.refresh().await {
            Ok((handle, size)) => {
                tracing::info!(
                    "Successfully updated MaxMind database to version {} ({} bytes)",
                    handle.version,
                    size
                );
                RefreshOutcome::succeeded(size)
            }
            Err(e) => {
                tracing::error!("Error updating database: {}", e);
                RefreshOutcome::failed(&e)
            }
        };

        self.store.record_outcome(outcome.clone());
        outcome
    }

    async fn refresh(&self) -> Result<(DatabaseHandle, u64), AppError> {
        let license_key = self.license_key.as_deref().ok_or_else(|| {
            AppError::ConfigError("MaxMind license key not configured".to_string())
        })?;

        let staged = self
            .fetcher
            .fetch_and_stage(license_key, &self.store.staging_dir())
            .await?;

        let size = staged.size;

        let handle = promote(self.store.clone(), staged).await?;
        Ok((handle, size))
    }
}

/// Move a staged download into the store.
///
/// Runs on its own task so that the file on disk and the in-memory reader
/// cannot diverge when the caller is dropped midway.
async fn promote(
    store: Arc<DatabaseStore>,
    staged: StagedDatabase,
) -> Result<DatabaseHandle, AppError> {
    tokio::spawn(async move {
        let handle = store.replace(&staged.database).await?;

        // The new database is already live; a stale archive is not worth failing over
        if let Err(e) = store.promote_archive(&staged.archive).await {
            tracing::warn!("Database updated but archive was not kept: {}", e);
        }

        Ok::<_, AppError>(handle)
    })
    .await?
}
