//! Expiry alerter: periodically collects soon-to-expire certificates,
//! resolves their owners in one query, and hands the batch to every
//! configured notification channel.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use sea_orm::DatabaseConnection;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::models::ExpiringCertificate;
use crate::db::services::{cert_service, user_service};
use crate::notifications::Notifier;

pub fn spawn(
    db: DatabaseConnection,
    notifiers: Arc<Vec<Box<dyn Notifier>>>,
    interval: Duration,
    expiry_window: chrono::Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        info!(interval_secs = interval.as_secs(), "Alerter started");
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            run_alert_cycle(&db, &notifiers, expiry_window).await;
        }
    })
}

pub async fn run_alert_cycle(
    db: &DatabaseConnection,
    notifiers: &[Box<dyn Notifier>],
    expiry_window: chrono::Duration,
) {
    let certs = match cert_service::get_expiring_certificates(db, expiry_window).await {
        Ok(certs) => certs,
        Err(e) => {
            warn!(error = %e, "Failed to fetch expiring certificates");
            return;
        }
    };

    if certs.is_empty() {
        return;
    }

    let owner_ids = unique_owner_ids(&certs);
    let users = match user_service::get_users_by_ids(db, &owner_ids).await {
        Ok(users) => users,
        Err(e) => {
            // Without owner context we would notify "Unknown"; abort and
            // let the next cycle retry.
            warn!(error = %e, "Failed to resolve certificate owners");
            return;
        }
    };

    info!(
        certs = certs.len(),
        owners = owner_ids.len(),
        channels = notifiers.len(),
        "Processing expiry alerts"
    );

    for notifier in notifiers {
        if let Err(e) = notifier.notify(&certs, &users).await {
            warn!(channel = notifier.name(), error = %e, "Notifier failed");
        }
    }
}

fn unique_owner_ids(certs: &[ExpiringCertificate]) -> Vec<Uuid> {
    let mut seen = HashSet::new();
    certs
        .iter()
        .map(|c| c.owner_id)
        .filter(|id| seen.insert(*id))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn owner_ids_are_deduplicated_in_order() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let mk = |owner: Uuid| ExpiringCertificate {
            certificate_id: Uuid::new_v4(),
            serial_number: "1".to_string(),
            subject_cn: "cn".to_string(),
            issuer_cn: "ca".to_string(),
            valid_until: Utc::now(),
            source_uid: "x:443".to_string(),
            is_trusted: true,
            collector_id: "c".to_string(),
            collector_hostname: "h".to_string(),
            owner_id: owner,
        };

        let ids = unique_owner_ids(&[mk(a), mk(b), mk(a)]);
        assert_eq!(ids, vec![a, b]);
    }
}
