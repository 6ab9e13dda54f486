//! Reconciliation engine: turns batches of certificate observations into
//! deduplicated definitions and per-collector instance state.
//!
//! Every ingest path runs as a single transaction: definition inserts,
//! instance upserts and (for full syncs) the ghosting pass either all commit
//! or none do.

use chrono::{DateTime, Duration, Utc};
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DatabaseTransaction, DbErr,
    EntityTrait, QueryFilter, Set, TransactionTrait,
};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::db::entities::{
    certificate, certificate_instance, collector, prelude::*, user,
};
use crate::db::enums::InstanceStatus;
use crate::db::models::{AgentReport, CertificateObservation, SOURCE_TYPE_FILE};

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("missing api_key")]
    MissingApiKey,
    #[error("invalid api_key: authentication failed")]
    InvalidApiKey,
    #[error("database error: {0}")]
    Database(#[from] DbErr),
}

/// Handles a full-sync report pushed by a physical agent. The presented API
/// key resolves the owning user; an unknown key is an authentication error,
/// reported distinctly from processing failures.
pub async fn process_report(db: &DatabaseConnection, report: AgentReport) -> Result<(), IngestError> {
    if report.api_key.is_empty() {
        return Err(IngestError::MissingApiKey);
    }

    let api_key_hash = hash_api_key(&report.api_key);
    let owner = User::find()
        .filter(user::Column::ApiKeyHash.eq(&api_key_hash))
        .one(db)
        .await?
        .ok_or(IngestError::InvalidApiKey)?;

    let batch_time = Utc::now();
    let txn = db.begin().await?;

    // Upsert the collector row so liveness tracking survives re-registration.
    Collector::insert(collector::ActiveModel {
        id: Set(report.agent_id.clone()),
        user_id: Set(owner.id),
        hostname: Set(report.hostname.clone()),
        is_virtual: Set(false),
        last_seen_at: Set(batch_time),
    })
    .on_conflict(
        OnConflict::column(collector::Column::Id)
            .update_columns([
                collector::Column::UserId,
                collector::Column::Hostname,
                collector::Column::LastSeenAt,
            ])
            .to_owned(),
    )
    .exec(&txn)
    .await?;

    let mut observations = report.certificates;
    for obs in &mut observations {
        if obs.source_type.is_empty() {
            obs.source_type = SOURCE_TYPE_FILE.to_string();
        }
    }

    apply_batch(&txn, &report.agent_id, &observations, batch_time, true).await?;

    txn.commit().await?;
    info!(agent_id = %report.agent_id, hostname = %report.hostname, user_id = %owner.id, "Processed agent report");
    Ok(())
}

/// Ingests agentless scan results for a user. The user's virtual collector is
/// resolved (or lazily created) inside the same transaction; the batch only
/// concerns the scanned locator, so ghosting never runs here.
pub async fn ingest_scan_results(
    db: &DatabaseConnection,
    user_id: Uuid,
    observations: &[CertificateObservation],
) -> Result<(), IngestError> {
    let txn = db.begin().await?;

    let collector_id = ensure_virtual_collector(&txn, user_id).await?;
    apply_batch(&txn, &collector_id, observations, Utc::now(), false).await?;

    txn.commit().await?;
    Ok(())
}

/// Returns the id of the user's virtual collector, creating it on first use.
async fn ensure_virtual_collector(
    txn: &DatabaseTransaction,
    user_id: Uuid,
) -> Result<String, DbErr> {
    if let Some(existing) = Collector::find()
        .filter(collector::Column::UserId.eq(user_id))
        .filter(collector::Column::IsVirtual.eq(true))
        .one(txn)
        .await?
    {
        return Ok(existing.id);
    }

    let created = collector::ActiveModel {
        id: Set(Uuid::new_v4().to_string()),
        user_id: Set(user_id),
        hostname: Set("Cloud Monitor".to_string()),
        is_virtual: Set(true),
        last_seen_at: Set(Utc::now()),
    }
    .insert(txn)
    .await?;
    Ok(created.id)
}

/// Applies one observation batch under an open transaction.
///
/// Per observation: find-or-insert the certificate definition by its dedup
/// key, then upsert the instance at (collector, source_uid) back to ACTIVE
/// with `scanned_at = batch_time`. When `full_sync` is set, every instance of
/// the collector not touched by this batch is marked MISSING afterwards.
pub async fn apply_batch(
    txn: &DatabaseTransaction,
    collector_id: &str,
    observations: &[CertificateObservation],
    batch_time: DateTime<Utc>,
    full_sync: bool,
) -> Result<(), DbErr> {
    for obs in observations {
        // An observation without a locator cannot be reconciled.
        if obs.source_uid.is_empty() {
            debug!(serial = %obs.serial, "Skipping observation without source_uid");
            continue;
        }

        let certificate_id = find_or_insert_definition(txn, obs).await?;

        CertificateInstance::insert(certificate_instance::ActiveModel {
            id: Set(Uuid::new_v4()),
            collector_id: Set(collector_id.to_string()),
            certificate_id: Set(certificate_id),
            source_uid: Set(obs.source_uid.clone()),
            source_type: Set(obs.source_type.clone()),
            is_trusted: Set(obs.is_trusted),
            trust_error: Set(obs.trust_error.clone()),
            current_status: Set(InstanceStatus::Active),
            scanned_at: Set(batch_time),
        })
        .on_conflict(
            OnConflict::columns([
                certificate_instance::Column::CollectorId,
                certificate_instance::Column::SourceUid,
            ])
            .update_columns([
                certificate_instance::Column::CertificateId,
                certificate_instance::Column::SourceType,
                certificate_instance::Column::IsTrusted,
                certificate_instance::Column::TrustError,
                certificate_instance::Column::CurrentStatus,
                certificate_instance::Column::ScannedAt,
            ])
            .to_owned(),
        )
        .exec(txn)
        .await?;
    }

    if full_sync {
        // Ghosting: anything of this collector not refreshed by this batch
        // was not re-observed in an authoritative sweep.
        CertificateInstance::update_many()
            .col_expr(
                certificate_instance::Column::CurrentStatus,
                Expr::value(InstanceStatus::Missing),
            )
            .filter(certificate_instance::Column::CollectorId.eq(collector_id))
            .filter(certificate_instance::Column::ScannedAt.ne(batch_time))
            .exec(txn)
            .await?;
    }

    Ok(())
}

/// Certificate definitions are identified by (serial, issuer CN/Org/OU);
/// the same certificate seen by different collectors maps to one row.
async fn find_or_insert_definition(
    txn: &DatabaseTransaction,
    obs: &CertificateObservation,
) -> Result<Uuid, DbErr> {
    let mut query = Certificate::find()
        .filter(certificate::Column::SerialNumber.eq(&obs.serial))
        .filter(certificate::Column::IssuerCn.eq(&obs.issuer.cn));
    query = match &obs.issuer.org {
        Some(org) => query.filter(certificate::Column::IssuerOrg.eq(org)),
        None => query.filter(certificate::Column::IssuerOrg.is_null()),
    };
    query = match &obs.issuer.ou {
        Some(ou) => query.filter(certificate::Column::IssuerOu.eq(ou)),
        None => query.filter(certificate::Column::IssuerOu.is_null()),
    };

    if let Some(existing) = query.one(txn).await? {
        return Ok(existing.id);
    }

    let created = certificate::ActiveModel {
        id: Set(Uuid::new_v4()),
        serial_number: Set(obs.serial.clone()),
        issuer_cn: Set(obs.issuer.cn.clone()),
        issuer_org: Set(obs.issuer.org.clone()),
        issuer_ou: Set(obs.issuer.ou.clone()),
        subject_cn: Set(obs.subject.cn.clone()),
        subject_org: Set(obs.subject.org.clone()),
        subject_ou: Set(obs.subject.ou.clone()),
        valid_from: Set(obs.valid_from),
        valid_until: Set(obs.valid_until),
        signature_algo: Set(obs.signature_algo.clone()),
        created_at: Set(Utc::now()),
    }
    .insert(txn)
    .await?;
    Ok(created.id)
}

/// Retention sweep, first half: hard-delete instances that have stayed
/// MISSING longer than the grace period.
pub async fn cleanup_missing_instances(
    db: &DatabaseConnection,
    grace_period: Duration,
) -> Result<u64, DbErr> {
    let cutoff = Utc::now() - grace_period;
    let result = CertificateInstance::delete_many()
        .filter(certificate_instance::Column::CurrentStatus.eq(InstanceStatus::Missing))
        .filter(certificate_instance::Column::ScannedAt.lt(cutoff))
        .exec(db)
        .await?;
    Ok(result.rows_affected)
}

/// Retention sweep, second half: delete definitions no instance references
/// anymore. Must run after instance cleanup so the orphan check is accurate.
pub async fn cleanup_orphaned_certificates(db: &DatabaseConnection) -> Result<u64, DbErr> {
    let backend = db.get_database_backend();
    let result = db
        .execute(sea_orm::Statement::from_string(
            backend,
            r#"
            DELETE FROM certificates
            WHERE id NOT IN (
                SELECT DISTINCT certificate_id FROM certificate_instances
            )
            "#,
        ))
        .await?;
    Ok(result.rows_affected())
}

pub fn hash_api_key(api_key: &str) -> String {
    hex::encode(Sha256::digest(api_key.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::{DatabaseBackend, MockDatabase};

    #[test]
    fn api_key_hash_is_stable_sha256_hex() {
        // Agents hash nothing client-side; the server must produce the same
        // digest for the same key on every call.
        let h1 = hash_api_key("test-key");
        let h2 = hash_api_key("test-key");
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
        assert_ne!(h1, hash_api_key("other-key"));
    }

    fn report(api_key: &str) -> AgentReport {
        AgentReport {
            agent_id: "agent-1".to_string(),
            api_key: api_key.to_string(),
            hostname: "web-1".to_string(),
            certificates: Vec::new(),
        }
    }

    #[tokio::test]
    async fn report_without_api_key_is_rejected_before_any_query() {
        let db = MockDatabase::new(DatabaseBackend::Postgres).into_connection();

        let err = process_report(&db, report("")).await.unwrap_err();
        assert!(matches!(err, IngestError::MissingApiKey));
    }

    /// An unknown key must surface as an authentication error, not as a
    /// generic processing failure.
    #[tokio::test]
    async fn unknown_api_key_is_an_authentication_error() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([Vec::<user::Model>::new()])
            .into_connection();

        let err = process_report(&db, report("not-a-real-key")).await.unwrap_err();
        assert!(matches!(err, IngestError::InvalidApiKey));
    }
}
