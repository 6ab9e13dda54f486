//! Janitor: the retention sweep. Dead physical collectors go first, then
//! instances that stayed MISSING past their grace period, then certificate
//! definitions nothing references anymore. Instance deletion must precede
//! orphan collection so the orphan check is accurate.

use std::time::Duration;

use sea_orm::DatabaseConnection;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::db::services::{collector_service, ingest_service};

pub fn spawn(
    db: DatabaseConnection,
    interval: Duration,
    collector_ttl: chrono::Duration,
    missing_instance_ttl: chrono::Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        info!(interval_secs = interval.as_secs(), "Janitor started");
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            run_cleanup_cycle(&db, collector_ttl, missing_instance_ttl).await;
        }
    })
}

pub async fn run_cleanup_cycle(
    db: &DatabaseConnection,
    collector_ttl: chrono::Duration,
    missing_instance_ttl: chrono::Duration,
) {
    match collector_service::cleanup_dead_collectors(db, collector_ttl).await {
        Ok(0) => {}
        Ok(n) => info!(removed = n, "Removed dead collectors"),
        Err(e) => warn!(error = %e, "Collector cleanup failed"),
    }

    match ingest_service::cleanup_missing_instances(db, missing_instance_ttl).await {
        Ok(0) => {}
        Ok(n) => info!(removed = n, "Removed long-missing certificate instances"),
        Err(e) => warn!(error = %e, "Missing-instance cleanup failed"),
    }

    match ingest_service::cleanup_orphaned_certificates(db).await {
        Ok(0) => {}
        Ok(n) => info!(removed = n, "Removed orphaned certificate definitions"),
        Err(e) => warn!(error = %e, "Orphan cleanup failed"),
    }
}
