//! Collector lifecycle: listing with liveness and certificate counts,
//! user-driven deletion, and the janitor's dead-collector sweep.

use chrono::{DateTime, Duration, Utc};
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait, FromQueryResult,
    QueryFilter, Statement,
};
use uuid::Uuid;

use crate::db::entities::{collector, prelude::*};
use crate::db::models::CollectorOverview;

#[derive(Debug, FromQueryResult)]
struct CollectorRow {
    id: String,
    hostname: String,
    is_virtual: bool,
    last_seen_at: DateTime<Utc>,
    cert_count: i64,
}

/// All collectors of a user with their instance counts, virtual ones first.
pub async fn list_collectors(
    db: &DatabaseConnection,
    user_id: Uuid,
    offline_threshold: Duration,
) -> Result<Vec<CollectorOverview>, DbErr> {
    let rows = CollectorRow::find_by_statement(Statement::from_sql_and_values(
        db.get_database_backend(),
        r#"
        SELECT
            col.id,
            col.hostname,
            col.is_virtual,
            col.last_seen_at,
            COUNT(ci.id) AS cert_count
        FROM collectors col
        LEFT JOIN certificate_instances ci ON col.id = ci.collector_id
        WHERE col.user_id = $1
        GROUP BY col.id, col.hostname, col.is_virtual, col.last_seen_at
        ORDER BY col.is_virtual DESC, col.last_seen_at DESC
        "#,
        [user_id.into()],
    ))
    .all(db)
    .await?;

    let online_cutoff = Utc::now() - offline_threshold;
    Ok(rows
        .into_iter()
        .map(|row| CollectorOverview {
            online: row.is_virtual || row.last_seen_at > online_cutoff,
            id: row.id,
            hostname: row.hostname,
            is_virtual: row.is_virtual,
            last_seen_at: row.last_seen_at,
            cert_count: row.cert_count,
        })
        .collect())
}

/// Deletes a collector the user owns; its instances go with it via cascade.
pub async fn delete_collector(
    db: &DatabaseConnection,
    user_id: Uuid,
    collector_id: &str,
) -> Result<bool, DbErr> {
    let result = Collector::delete_many()
        .filter(collector::Column::Id.eq(collector_id))
        .filter(collector::Column::UserId.eq(user_id))
        .exec(db)
        .await?;
    Ok(result.rows_affected > 0)
}

/// Removes physical collectors that have not reported within the TTL. The
/// virtual collector is driven by the scanner, not by agent heartbeats, so
/// it is never swept.
pub async fn cleanup_dead_collectors(
    db: &DatabaseConnection,
    ttl: Duration,
) -> Result<u64, DbErr> {
    let cutoff = Utc::now() - ttl;
    let result = Collector::delete_many()
        .filter(collector::Column::IsVirtual.eq(false))
        .filter(collector::Column::LastSeenAt.lt(cutoff))
        .exec(db)
        .await?;
    Ok(result.rows_affected)
}
