//! Alert history: a purely additive cooldown ledger. Entries are appended
//! when an alert goes out and read back only to suppress repeats inside the
//! cooldown window; nothing here ever updates or deletes.

use std::collections::HashSet;

use chrono::{Duration, Utc};
use sea_orm::{ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, QuerySelect, Set};
use uuid::Uuid;

use crate::db::entities::{alert_history, prelude::*};
use crate::db::enums::AlertType;
use crate::db::models::ExpiringCertificate;

/// Returns only the candidates that have NOT been alerted on `alert_type`
/// within the cooldown window. Empty input short-circuits without a query.
pub async fn filter_unalerted(
    db: &DatabaseConnection,
    candidates: Vec<ExpiringCertificate>,
    alert_type: AlertType,
    cooldown: Duration,
) -> Result<Vec<ExpiringCertificate>, DbErr> {
    if candidates.is_empty() {
        return Ok(candidates);
    }

    let cert_ids: Vec<Uuid> = candidates.iter().map(|c| c.certificate_id).collect();
    let cutoff = Utc::now() - cooldown;

    let blocked: HashSet<Uuid> = AlertHistory::find()
        .select_only()
        .column(alert_history::Column::CertificateId)
        .filter(alert_history::Column::AlertType.eq(alert_type))
        .filter(alert_history::Column::SentAt.gt(cutoff))
        .filter(alert_history::Column::CertificateId.is_in(cert_ids))
        .into_tuple::<Uuid>()
        .all(db)
        .await?
        .into_iter()
        .collect();

    Ok(apply_blocklist(candidates, &blocked))
}

/// Appends one ledger entry per certificate. Callers must only pass
/// certificates that were actually delivered, never merely attempted.
pub async fn record_sent(
    db: &DatabaseConnection,
    certs: &[ExpiringCertificate],
    alert_type: AlertType,
) -> Result<(), DbErr> {
    if certs.is_empty() {
        return Ok(());
    }

    let now = Utc::now();
    let entries = certs.iter().map(|c| alert_history::ActiveModel {
        id: Set(Uuid::new_v4()),
        certificate_id: Set(c.certificate_id),
        collector_id: Set(c.collector_id.clone()),
        alert_type: Set(alert_type),
        sent_at: Set(now),
    });

    AlertHistory::insert_many(entries).exec(db).await?;
    Ok(())
}

fn apply_blocklist(
    candidates: Vec<ExpiringCertificate>,
    blocked: &HashSet<Uuid>,
) -> Vec<ExpiringCertificate> {
    candidates
        .into_iter()
        .filter(|c| !blocked.contains(&c.certificate_id))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn cert(id: Uuid) -> ExpiringCertificate {
        ExpiringCertificate {
            certificate_id: id,
            serial_number: "1".to_string(),
            subject_cn: "example.com".to_string(),
            issuer_cn: "Example CA".to_string(),
            valid_until: Utc::now(),
            source_uid: "example.com:443".to_string(),
            is_trusted: true,
            collector_id: "col-1".to_string(),
            collector_hostname: "Cloud Monitor".to_string(),
            owner_id: Uuid::new_v4(),
        }
    }

    #[test]
    fn blocklist_removes_recently_alerted() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let blocked: HashSet<Uuid> = [a].into_iter().collect();

        let surviving = apply_blocklist(vec![cert(a), cert(b)], &blocked);
        assert_eq!(surviving.len(), 1);
        assert_eq!(surviving[0].certificate_id, b);
    }

    #[test]
    fn empty_blocklist_passes_everything() {
        let blocked = HashSet::new();
        let surviving = apply_blocklist(vec![cert(Uuid::new_v4())], &blocked);
        assert_eq!(surviving.len(), 1);
    }
}
