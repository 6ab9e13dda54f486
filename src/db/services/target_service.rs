//! Target store: user-declared agentless scan destinations and the queries
//! the scan orchestrator runs against them.

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait,
    FromQueryResult, ModelTrait, QueryFilter, QueryOrder, Set, Statement, TransactionTrait,
};
use thiserror::Error;
use tracing::{error, warn};
use uuid::Uuid;

use super::ingest_service::{self, IngestError};
use crate::db::entities::{certificate_instance, collector, monitored_target, prelude::*};
use crate::db::enums::ScanOutcome;
use crate::db::models::SOURCE_TYPE_CLOUD;
use crate::scanner::NetworkScanner;

/// Upper bound on targets handed to one scan cycle.
pub const DUE_TARGET_BATCH_LIMIT: u64 = 50;

#[derive(Error, Debug)]
pub enum TargetError {
    #[error("invalid target format: {0}")]
    InvalidTarget(String),
    #[error("scan failed (target unreachable?): {0}")]
    ScanFailed(String),
    #[error("you are already monitoring this target")]
    AlreadyMonitored,
    #[error("frequency must be at least 1 hour")]
    InvalidFrequency,
    #[error("target not found or access denied")]
    NotFound,
    #[error("failed to ingest certificate data: {0}")]
    Ingest(#[from] IngestError),
    #[error("database error: {0}")]
    Database(#[from] DbErr),
}

/// Slim row handed to the scan orchestrator.
#[derive(Debug, Clone, FromQueryResult)]
pub struct DueTarget {
    pub id: Uuid,
    pub user_id: Uuid,
    pub target_url: String,
    pub frequency_hours: i32,
}

/// Creates a target after an immediate synchronous probe, so an unreachable
/// address fails fast with no row written. The probe result is ingested
/// through the reconciliation engine; if that ingest fails the freshly
/// inserted row is deleted again.
///
/// The compensating delete is best-effort, not a transaction: a crash between
/// insert and ingest can leave a target with no instances behind. Known gap,
/// inherited deliberately.
pub async fn add_target(
    db: &DatabaseConnection,
    scanner: &dyn NetworkScanner,
    user_id: Uuid,
    raw_url: &str,
    frequency_hours: i32,
    default_frequency_hours: i32,
) -> Result<monitored_target::Model, TargetError> {
    let frequency = if frequency_hours <= 0 {
        default_frequency_hours
    } else {
        frequency_hours
    };

    let target_addr = normalize_target(raw_url)?;

    let mut observations = scanner
        .scan(&target_addr)
        .await
        .map_err(|e| TargetError::ScanFailed(e.to_string()))?;
    for obs in &mut observations {
        obs.source_type = SOURCE_TYPE_CLOUD.to_string();
    }

    let now = Utc::now();
    let inserted = monitored_target::ActiveModel {
        id: Set(Uuid::new_v4()),
        user_id: Set(user_id),
        target_url: Set(target_addr.clone()),
        frequency_hours: Set(frequency),
        last_scanned_at: Set(Some(now)),
        last_status: Set(ScanOutcome::Success),
        last_error: Set(None),
        created_at: Set(now),
    }
    .insert(db)
    .await
    .map_err(|e| {
        if e.to_string().contains("unique constraint")
            || e.to_string().contains("duplicate key")
        {
            TargetError::AlreadyMonitored
        } else {
            TargetError::Database(e)
        }
    })?;

    if let Err(ingest_err) = ingest_service::ingest_scan_results(db, user_id, &observations).await {
        // The target is useless without its certificate data; roll the
        // insert back best-effort and surface the ingest failure.
        if let Err(delete_err) = inserted.delete(db).await {
            error!(
                target = %target_addr,
                error = %delete_err,
                "Failed to remove target after ingest failure; orphaned row left behind"
            );
        }
        return Err(TargetError::Ingest(ingest_err));
    }

    Ok(inserted)
}

pub async fn update_target(
    db: &DatabaseConnection,
    user_id: Uuid,
    target_id: Uuid,
    frequency_hours: i32,
) -> Result<(), TargetError> {
    if frequency_hours < 1 {
        return Err(TargetError::InvalidFrequency);
    }

    let result = MonitoredTarget::update_many()
        .col_expr(
            monitored_target::Column::FrequencyHours,
            sea_orm::sea_query::Expr::value(frequency_hours),
        )
        .filter(monitored_target::Column::Id.eq(target_id))
        .filter(monitored_target::Column::UserId.eq(user_id))
        .exec(db)
        .await?;

    if result.rows_affected == 0 {
        return Err(TargetError::NotFound);
    }
    Ok(())
}

pub async fn list_targets(
    db: &DatabaseConnection,
    user_id: Uuid,
) -> Result<Vec<monitored_target::Model>, DbErr> {
    MonitoredTarget::find()
        .filter(monitored_target::Column::UserId.eq(user_id))
        .order_by_desc(monitored_target::Column::CreatedAt)
        .all(db)
        .await
}

/// Removes a target and, in the same transaction, the certificate instances
/// its scans produced under the user's virtual collector, so no dangling
/// inventory survives the target.
pub async fn delete_target(
    db: &DatabaseConnection,
    user_id: Uuid,
    target_id: Uuid,
) -> Result<(), TargetError> {
    let txn = db.begin().await?;

    let target = MonitoredTarget::find()
        .filter(monitored_target::Column::Id.eq(target_id))
        .filter(monitored_target::Column::UserId.eq(user_id))
        .one(&txn)
        .await?
        .ok_or(TargetError::NotFound)?;

    let virtual_collector = Collector::find()
        .filter(collector::Column::UserId.eq(user_id))
        .filter(collector::Column::IsVirtual.eq(true))
        .one(&txn)
        .await?;

    if let Some(vc) = virtual_collector {
        CertificateInstance::delete_many()
            .filter(certificate_instance::Column::CollectorId.eq(vc.id))
            .filter(certificate_instance::Column::SourceUid.eq(&target.target_url))
            .exec(&txn)
            .await?;
    }

    MonitoredTarget::delete_many()
        .filter(monitored_target::Column::Id.eq(target_id))
        .filter(monitored_target::Column::UserId.eq(user_id))
        .exec(&txn)
        .await?;

    txn.commit().await?;
    Ok(())
}

/// Targets never scanned, or past their cadence, oldest first (never-scanned
/// first of all). Capped to bound per-cycle work.
pub async fn get_due_targets(db: &DatabaseConnection) -> Result<Vec<DueTarget>, DbErr> {
    DueTarget::find_by_statement(Statement::from_sql_and_values(
        db.get_database_backend(),
        r#"
        SELECT id, user_id, target_url, frequency_hours
        FROM monitored_targets
        WHERE last_scanned_at IS NULL
           OR last_scanned_at + (frequency_hours * INTERVAL '1 hour') <= NOW()
        ORDER BY last_scanned_at ASC NULLS FIRST
        LIMIT $1
        "#,
        [(DUE_TARGET_BATCH_LIMIT as i64).into()],
    ))
    .all(db)
    .await
}

/// Stamps the scan outcome. `last_scanned_at` is always set to now, success
/// or failure, so the cadence clock restarts either way.
pub async fn record_outcome(
    db: &DatabaseConnection,
    target_id: Uuid,
    outcome: ScanOutcome,
    error_text: Option<&str>,
) -> Result<(), DbErr> {
    use sea_orm::sea_query::Expr;

    if error_text.is_none() && outcome == ScanOutcome::Failed {
        warn!(target_id = %target_id, "Recording FAILED outcome without error text");
    }

    MonitoredTarget::update_many()
        .col_expr(monitored_target::Column::LastScannedAt, Expr::value(Utc::now()))
        .col_expr(monitored_target::Column::LastStatus, Expr::value(outcome))
        .col_expr(
            monitored_target::Column::LastError,
            Expr::value(error_text.map(str::to_string)),
        )
        .filter(monitored_target::Column::Id.eq(target_id))
        .exec(db)
        .await?;
    Ok(())
}

/// Normalizes user input into strict `host:port`. Whitespace is trimmed, any
/// scheme and path are stripped, and the port defaults to 443 when absent --
/// even for `http://` input, since only TLS endpoints can be monitored.
pub fn normalize_target(input: &str) -> Result<String, TargetError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(TargetError::InvalidTarget("target cannot be empty".to_string()));
    }

    // Drop a scheme prefix if present; the remainder is authority + path.
    let without_scheme = match trimmed.split_once("://") {
        Some((_, rest)) => rest,
        None => trimmed,
    };

    // Cut path, query and fragment; then any userinfo.
    let authority = without_scheme
        .split(['/', '?', '#'])
        .next()
        .unwrap_or_default();
    let authority = authority.rsplit_once('@').map_or(authority, |(_, host)| host);

    if authority.is_empty() {
        return Err(TargetError::InvalidTarget(
            "could not identify a valid hostname".to_string(),
        ));
    }

    // Bracketed IPv6 literal, optionally with a port.
    if let Some(rest) = authority.strip_prefix('[') {
        let Some((host, tail)) = rest.split_once(']') else {
            return Err(TargetError::InvalidTarget("unterminated IPv6 literal".to_string()));
        };
        if host.is_empty() {
            return Err(TargetError::InvalidTarget("empty IPv6 literal".to_string()));
        }
        let port = match tail.strip_prefix(':') {
            Some(p) => parse_port(p)?,
            None if tail.is_empty() => 443,
            None => return Err(TargetError::InvalidTarget("invalid IPv6 authority".to_string())),
        };
        return Ok(format!("[{host}]:{port}"));
    }

    match authority.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() => {
            Ok(format!("{host}:{}", parse_port(port)?))
        }
        Some(_) => Err(TargetError::InvalidTarget(
            "could not identify a valid hostname".to_string(),
        )),
        None => Ok(format!("{authority}:443")),
    }
}

fn parse_port(raw: &str) -> Result<u16, TargetError> {
    raw.parse::<u16>()
        .ok()
        .filter(|p| *p > 0)
        .ok_or_else(|| TargetError::InvalidTarget(format!("invalid port: {raw}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use sea_orm::{DatabaseBackend, MockDatabase};

    use crate::db::models::CertificateObservation;
    use crate::scanner::ScanError;

    struct UnreachableScanner;

    #[async_trait]
    impl NetworkScanner for UnreachableScanner {
        async fn scan(&self, _target: &str) -> Result<Vec<CertificateObservation>, ScanError> {
            Err(ScanError::Dial("connection refused".to_string()))
        }
    }

    /// An unreachable target fails fast at creation time and
    /// no row is written. The mock connection has no prepared results, so
    /// any insert attempt would surface as a database error instead.
    #[tokio::test]
    async fn add_target_probe_failure_writes_nothing() {
        let db = MockDatabase::new(DatabaseBackend::Postgres).into_connection();

        let err = add_target(&db, &UnreachableScanner, Uuid::new_v4(), "example.com", 0, 12)
            .await
            .unwrap_err();

        assert!(matches!(err, TargetError::ScanFailed(_)));
    }

    #[tokio::test]
    async fn update_target_rejects_sub_hour_cadence() {
        let db = MockDatabase::new(DatabaseBackend::Postgres).into_connection();

        let err = update_target(&db, Uuid::new_v4(), Uuid::new_v4(), 0)
            .await
            .unwrap_err();

        assert!(matches!(err, TargetError::InvalidFrequency));
    }

    #[test]
    fn normalize_defaults_port_443() {
        assert_eq!(normalize_target("example.com").unwrap(), "example.com:443");
        assert_eq!(normalize_target("  example.com  ").unwrap(), "example.com:443");
    }

    #[test]
    fn normalize_strips_scheme_and_path() {
        assert_eq!(
            normalize_target("https://example.com/login").unwrap(),
            "example.com:443"
        );
        // http:// input still normalizes to 443: we only ever probe TLS.
        assert_eq!(normalize_target("http://example.com").unwrap(), "example.com:443");
        assert_eq!(
            normalize_target("https://user:pw@example.com/x?q=1#frag").unwrap(),
            "example.com:443"
        );
    }

    #[test]
    fn normalize_keeps_explicit_port() {
        assert_eq!(
            normalize_target("example.com:8443").unwrap(),
            "example.com:8443"
        );
        assert_eq!(
            normalize_target("https://example.com:8443/admin").unwrap(),
            "example.com:8443"
        );
    }

    #[test]
    fn normalize_handles_ipv6() {
        assert_eq!(normalize_target("[::1]").unwrap(), "[::1]:443");
        assert_eq!(normalize_target("[2001:db8::1]:8443").unwrap(), "[2001:db8::1]:8443");
    }

    #[test]
    fn normalize_rejects_garbage() {
        assert!(normalize_target("").is_err());
        assert!(normalize_target("   ").is_err());
        assert!(normalize_target("https://").is_err());
        assert!(normalize_target("example.com:notaport").is_err());
        assert!(normalize_target("example.com:0").is_err());
        assert!(normalize_target("[::1").is_err());
    }
}
