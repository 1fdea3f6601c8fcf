//! Scheduled Jobs
//!
//! Background jobs for periodic maintenance tasks.
//! Spent and expired step-up records are purged once they leave the
//! retention window so the authorization tables do not grow without bound.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;

use crate::store::{LedgerStore, StoreError};

// =========================================================================
// Authorization purge
// =========================================================================

/// Delete consumed, invalidated or expired challenges and grants issued
/// more than `retention` ago
pub async fn purge_stale_authorizations(
    store: &dyn LedgerStore,
    retention: chrono::Duration,
) -> Result<u64, JobError> {
    let before = Utc::now() - retention;
    let rows_deleted = store.purge_authorizations(before).await?;

    if rows_deleted > 0 {
        tracing::info!(
            rows_deleted = rows_deleted,
            "Purged stale step-up authorization records"
        );
    }

    Ok(rows_deleted)
}

// =========================================================================
// Job Scheduler
// =========================================================================

/// Configuration for job scheduler
#[derive(Debug, Clone)]
pub struct JobSchedulerConfig {
    /// Interval for the authorization purge (default: 10 minutes)
    pub purge_interval: Duration,
    /// How long spent records are kept (default: 24 hours)
    pub retention: chrono::Duration,
}

impl Default for JobSchedulerConfig {
    fn default() -> Self {
        Self {
            purge_interval: Duration::from_secs(600),
            retention: chrono::Duration::hours(24),
        }
    }
}

/// Job Scheduler - runs periodic maintenance tasks
pub struct JobScheduler {
    store: Arc<dyn LedgerStore>,
    config: JobSchedulerConfig,
}

impl JobScheduler {
    /// Create a new job scheduler
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self {
            store,
            config: JobSchedulerConfig::default(),
        }
    }

    /// Create with custom configuration
    pub fn with_config(store: Arc<dyn LedgerStore>, config: JobSchedulerConfig) -> Self {
        Self { store, config }
    }

    /// Start the job scheduler in the background
    /// Returns a handle that can be used to abort the scheduler
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    /// Run the scheduler loop
    async fn run(&self) {
        tracing::info!("Job scheduler started");

        let mut purge_interval = interval(self.config.purge_interval);

        loop {
            tokio::select! {
                _ = purge_interval.tick() => {
                    if let Err(e) = purge_stale_authorizations(self.store.as_ref(), self.config.retention).await {
                        tracing::error!(error = %e, "Authorization purge failed");
                    }
                }
            }
        }
    }

    /// Run all maintenance jobs once (for manual trigger or testing)
    pub async fn run_all_once(&self) -> MaintenanceReport {
        let mut report = MaintenanceReport::default();

        match purge_stale_authorizations(self.store.as_ref(), self.config.retention).await {
            Ok(count) => report.authorizations_purged = count,
            Err(e) => report.errors.push(format!("Authorization purge: {}", e)),
        }

        report.completed_at = Utc::now();
        report
    }
}

/// Report from running maintenance jobs
#[derive(Debug, Clone, Default)]
pub struct MaintenanceReport {
    pub authorizations_purged: u64,
    pub errors: Vec<String>,
    pub completed_at: DateTime<Utc>,
}

/// Job execution errors
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Challenge;
    use crate::store::InMemoryLedgerStore;
    use uuid::Uuid;

    #[test]
    fn test_job_scheduler_config_default() {
        let config = JobSchedulerConfig::default();
        assert_eq!(config.purge_interval, Duration::from_secs(600));
        assert_eq!(config.retention, chrono::Duration::hours(24));
    }

    #[test]
    fn test_maintenance_report_default() {
        let report = MaintenanceReport::default();
        assert_eq!(report.authorizations_purged, 0);
        assert_eq!(report.errors.len(), 0);
    }

    #[tokio::test]
    async fn test_run_all_once_purges_old_challenges() {
        let store = Arc::new(InMemoryLedgerStore::new());
        let issued = Utc::now() - chrono::Duration::days(3);
        let (old, _) = Challenge::issue(Uuid::new_v4(), issued, chrono::Duration::minutes(5));
        store.replace_challenge(&old).await.unwrap();

        let scheduler = JobScheduler::new(store.clone());
        let report = scheduler.run_all_once().await;

        assert_eq!(report.authorizations_purged, 1);
        assert!(report.errors.is_empty());
        assert!(store.active_challenge(old.account_id).await.unwrap().is_none());
    }
}
