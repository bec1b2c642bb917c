//! # Campaign Monitor Service
//!
//! Background task that keeps the engine moving between requests.
//!
//! ## Monitoring Flow
//!
//! ```text
//! CampaignMonitor (background task)
//!              │
//!              ├── Every TICK_INTERVAL: daily resets, schedule expiry,
//!              │                        budget exhaustion, billing
//!              │
//!              └── Every PERSIST_INTERVAL: flush engine state to PostgreSQL
//!                                          (only when DATABASE_URL is set)
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::interval;
use tracing::{debug, error, info};

use crate::config::AppConfig;
use crate::db::{queries, Database, DatabaseError};

use super::campaign_manager::{CampaignManager, TickSummary};

/// The Campaign Monitor service.
///
/// ## Usage
///
/// ```rust,ignore
/// let monitor = CampaignMonitor::new(manager.clone(), db.clone(), config.clone());
///
/// tokio::spawn(async move {
///     monitor.start().await;
/// });
/// ```
#[derive(Clone)]
pub struct CampaignMonitor {
    manager: Arc<CampaignManager>,

    /// `None` when running in memory only.
    db: Option<Database>,

    config: AppConfig,
}

impl CampaignMonitor {
    pub fn new(manager: Arc<CampaignManager>, db: Option<Database>, config: AppConfig) -> Self {
        Self {
            manager,
            db,
            config,
        }
    }

    /// Start the monitoring loop. Runs forever.
    ///
    /// | Check | Interval | Description |
    /// |-------|----------|-------------|
    /// | Tick | `TICK_INTERVAL` (default: 60s) | Resets, expiry, exhaustion, billing |
    /// | Persist | `PERSIST_INTERVAL` (default: 300s) | Write-behind flush |
    pub async fn start(&self) {
        info!("Starting Campaign Monitor service");

        let mut tick_ticker = interval(Duration::from_secs(self.config.tick_interval));
        let mut persist_ticker = interval(Duration::from_secs(self.config.persist_interval));

        loop {
            tokio::select! {
                _ = tick_ticker.tick() => {
                    self.run_tick();
                }

                _ = persist_ticker.tick() => {
                    if let Err(e) = self.persist().await {
                        error!("Persistence flush failed: {}", e);
                    }
                }
            }
        }
    }

    /// One engine tick at the current wall-clock time.
    pub fn run_tick(&self) -> TickSummary {
        self.tick_at(Utc::now())
    }

    fn tick_at(&self, now: DateTime<Utc>) -> TickSummary {
        let summary = self.manager.run_tick(now);
        if summary.payments_failed > 0 {
            info!("{} charge(s) gave up this tick", summary.payments_failed);
        }
        summary
    }

    /// Write the engine state to the database, if one is configured.
    async fn persist(&self) -> Result<(), DatabaseError> {
        let Some(db) = &self.db else {
            return Ok(());
        };

        debug!("Flushing engine state to the database");
        let snapshot = self.manager.export();
        queries::persist_snapshot(db.pool(), &snapshot).await?;
        debug!("Flushed {} campaigns", snapshot.campaigns.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::campaign::fixtures::{at, draft};
    use crate::models::BudgetType;
    use crate::services::{EventSink, LoggingBillingProcessor};

    fn monitor() -> CampaignMonitor {
        let config = AppConfig::default();
        let manager = Arc::new(CampaignManager::new(
            config.clone(),
            EventSink::detached(),
            Arc::new(LoggingBillingProcessor),
        ));
        CampaignMonitor::new(manager, None, config)
    }

    #[tokio::test]
    async fn test_persist_without_database_is_noop() {
        let monitor = monitor();
        assert!(monitor.persist().await.is_ok());
    }

    #[test]
    fn test_tick_is_idempotent() {
        let monitor = monitor();
        let evening = at(2026, 10, 17, 18, 0);
        let campaign = monitor
            .manager
            .create_campaign(draft(BudgetType::Daily, 2_000), evening)
            .unwrap();
        monitor.manager.activate(campaign.id, evening).unwrap();
        monitor.manager.record_click(campaign.id, Some(300), evening).unwrap();

        let next_morning = at(2026, 10, 18, 9, 0);
        let first = monitor.tick_at(next_morning);
        assert_eq!(first.daily_resets, 1);
        assert_eq!(first.charges_opened, 1);

        assert_eq!(monitor.tick_at(next_morning), TickSummary::default());
    }
}
