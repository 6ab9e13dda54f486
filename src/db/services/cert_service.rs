//! Read and maintenance surface over the certificate inventory: filtered
//! listing, expiry queries for the alerter, dashboard aggregates and the
//! user-driven instance deletes.

use chrono::{DateTime, Duration, NaiveTime, Utc};
use sea_orm::sea_query::extension::postgres::PgExpr;
use sea_orm::sea_query::{Expr, JoinType};
use sea_orm::{
    ColumnTrait, Condition, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait,
    FromQueryResult, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, RelationTrait,
    Statement,
};
use uuid::Uuid;

use crate::db::entities::{certificate, certificate_instance, collector, prelude::*};
use crate::db::enums::InstanceStatus;
use crate::db::models::{
    CertHealth, CertificateListItem, DashboardStats, DistinguishedName, ExpiringCertificate,
    PaginatedCertificates,
};

/// Filter criteria for the inventory list. Built up through the named
/// setters, translated into one joined query by `list_certificates`.
#[derive(Debug, Clone)]
pub struct CertFilter {
    collector_id: Option<String>,
    search: Option<String>,
    valid_after: Option<DateTime<Utc>>,
    valid_before: Option<DateTime<Utc>>,
    is_trusted: Option<bool>,
    status: Option<InstanceStatus>,
    limit: u64,
    offset: u64,
}

impl Default for CertFilter {
    fn default() -> Self {
        Self {
            collector_id: None,
            search: None,
            valid_after: None,
            valid_before: None,
            is_trusted: None,
            status: None,
            limit: 10,
            offset: 0,
        }
    }
}

impl CertFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn collector(mut self, collector_id: impl Into<String>) -> Self {
        self.collector_id = Some(collector_id.into());
        self
    }

    pub fn search(mut self, query: impl Into<String>) -> Self {
        self.search = Some(query.into());
        self
    }

    pub fn expiry_range(
        mut self,
        after: Option<DateTime<Utc>>,
        before: Option<DateTime<Utc>>,
    ) -> Self {
        self.valid_after = after;
        self.valid_before = before;
        self
    }

    pub fn trusted(mut self, is_trusted: bool) -> Self {
        self.is_trusted = Some(is_trusted);
        self
    }

    pub fn status(mut self, status: InstanceStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn paginate(mut self, limit: u64, offset: u64) -> Self {
        if limit > 0 {
            self.limit = limit;
        }
        self.offset = offset;
        self
    }
}

#[derive(Debug, FromQueryResult)]
struct CertificateRow {
    id: Uuid,
    collector_id: String,
    collector_hostname: String,
    source_uid: String,
    source_type: String,
    current_status: InstanceStatus,
    subject_cn: String,
    subject_org: Option<String>,
    subject_ou: Option<String>,
    issuer_cn: String,
    issuer_org: Option<String>,
    issuer_ou: Option<String>,
    valid_from: DateTime<Utc>,
    valid_until: DateTime<Utc>,
    is_trusted: bool,
    trust_error: Option<String>,
}

pub async fn list_certificates(
    db: &DatabaseConnection,
    user_id: Uuid,
    filter: CertFilter,
) -> Result<PaginatedCertificates, DbErr> {
    let mut query = CertificateInstance::find()
        .join(JoinType::InnerJoin, certificate_instance::Relation::Collector.def())
        .join(JoinType::InnerJoin, certificate_instance::Relation::Certificate.def())
        .filter(collector::Column::UserId.eq(user_id));

    if let Some(collector_id) = &filter.collector_id {
        query = query.filter(certificate_instance::Column::CollectorId.eq(collector_id));
    }
    if let Some(search) = filter.search.as_deref().filter(|s| !s.is_empty()) {
        let pattern = format!("%{search}%");
        query = query.filter(
            Condition::any()
                .add(Expr::col((Certificate, certificate::Column::SubjectCn)).ilike(pattern.as_str()))
                .add(Expr::col((Certificate, certificate::Column::IssuerCn)).ilike(pattern.as_str()))
                .add(Expr::col((Collector, collector::Column::Hostname)).ilike(pattern.as_str()))
                .add(
                    Expr::col((CertificateInstance, certificate_instance::Column::SourceUid))
                        .ilike(pattern.as_str()),
                ),
        );
    }
    if let Some(after) = filter.valid_after {
        query = query.filter(certificate::Column::ValidUntil.gte(after));
    }
    if let Some(before) = filter.valid_before {
        query = query.filter(certificate::Column::ValidUntil.lte(before));
    }
    if let Some(trusted) = filter.is_trusted {
        query = query.filter(certificate_instance::Column::IsTrusted.eq(trusted));
    }
    if let Some(status) = &filter.status {
        query = query.filter(certificate_instance::Column::CurrentStatus.eq(status.clone()));
    }

    let total = query.clone().count(db).await?;

    let rows = query
        .select_only()
        .column(certificate_instance::Column::Id)
        .column(certificate_instance::Column::CollectorId)
        .column_as(collector::Column::Hostname, "collector_hostname")
        .column(certificate_instance::Column::SourceUid)
        .column(certificate_instance::Column::SourceType)
        .column(certificate_instance::Column::CurrentStatus)
        .column(certificate::Column::SubjectCn)
        .column(certificate::Column::SubjectOrg)
        .column(certificate::Column::SubjectOu)
        .column(certificate::Column::IssuerCn)
        .column(certificate::Column::IssuerOrg)
        .column(certificate::Column::IssuerOu)
        .column(certificate::Column::ValidFrom)
        .column(certificate::Column::ValidUntil)
        .column(certificate_instance::Column::IsTrusted)
        .column(certificate_instance::Column::TrustError)
        .order_by_asc(certificate::Column::ValidUntil)
        .limit(filter.limit)
        .offset(filter.offset)
        .into_model::<CertificateRow>()
        .all(db)
        .await?;

    let now = Utc::now();
    let data = rows
        .into_iter()
        .map(|row| {
            let status = classify_health(now, row.valid_from, row.valid_until, row.is_trusted);
            CertificateListItem {
                id: row.id,
                collector_id: row.collector_id,
                collector_hostname: row.collector_hostname,
                source_uid: row.source_uid,
                source_type: row.source_type,
                current_status: row.current_status,
                subject: DistinguishedName {
                    cn: row.subject_cn,
                    org: row.subject_org,
                    ou: row.subject_ou,
                },
                issuer: DistinguishedName {
                    cn: row.issuer_cn,
                    org: row.issuer_org,
                    ou: row.issuer_ou,
                },
                valid_from: row.valid_from,
                valid_until: row.valid_until,
                is_trusted: row.is_trusted,
                trust_error: row.trust_error,
                status,
            }
        })
        .collect();

    Ok(PaginatedCertificates {
        data,
        total,
        page: filter.offset / filter.limit + 1,
        limit: filter.limit,
    })
}

/// Certificates on ACTIVE instances expiring inside the window (but not yet
/// expired), joined with owner context for the alerter.
pub async fn get_expiring_certificates(
    db: &DatabaseConnection,
    window: Duration,
) -> Result<Vec<ExpiringCertificate>, DbErr> {
    let cutoff = Utc::now() + window;
    ExpiringCertificate::find_by_statement(Statement::from_sql_and_values(
        db.get_database_backend(),
        r#"
        SELECT
            c.id AS certificate_id,
            c.serial_number,
            c.subject_cn,
            c.issuer_cn,
            c.valid_until,
            ci.source_uid,
            ci.is_trusted,
            col.id AS collector_id,
            col.hostname AS collector_hostname,
            col.user_id AS owner_id
        FROM certificate_instances ci
        JOIN certificates c ON ci.certificate_id = c.id
        JOIN collectors col ON ci.collector_id = col.id
        WHERE c.valid_until < $1
          AND c.valid_until > NOW()
          AND ci.current_status = 'ACTIVE'
        "#,
        [cutoff.into()],
    ))
    .all(db)
    .await
}

#[derive(Debug, FromQueryResult)]
struct CertCounts {
    total: i64,
    expiring_soon: i64,
    expired: i64,
}

#[derive(Debug, FromQueryResult)]
struct CollectorCounts {
    total: i64,
    online: i64,
}

/// Summary counts for the dashboard cards. MISSING instances are excluded
/// everywhere; collector liveness derives from `last_seen_at`.
pub async fn get_dashboard_stats(
    db: &DatabaseConnection,
    user_id: Uuid,
    offline_threshold: Duration,
) -> Result<DashboardStats, DbErr> {
    let backend = db.get_database_backend();

    let certs = CertCounts::find_by_statement(Statement::from_sql_and_values(
        backend,
        r#"
        SELECT
            COUNT(*) FILTER (WHERE ci.current_status = 'ACTIVE') AS total,
            COUNT(*) FILTER (
                WHERE c.valid_until < NOW() + INTERVAL '30 days'
                  AND c.valid_until > NOW()
                  AND ci.current_status = 'ACTIVE'
            ) AS expiring_soon,
            COUNT(*) FILTER (
                WHERE c.valid_until < NOW() AND ci.current_status = 'ACTIVE'
            ) AS expired
        FROM certificate_instances ci
        JOIN collectors col ON ci.collector_id = col.id
        JOIN certificates c ON ci.certificate_id = c.id
        WHERE col.user_id = $1
        "#,
        [user_id.into()],
    ))
    .one(db)
    .await?
    .unwrap_or(CertCounts { total: 0, expiring_soon: 0, expired: 0 });

    let online_cutoff = Utc::now() - offline_threshold;
    let collectors = CollectorCounts::find_by_statement(Statement::from_sql_and_values(
        backend,
        r#"
        SELECT
            COUNT(*) AS total,
            COUNT(*) FILTER (WHERE last_seen_at > $2) AS online
        FROM collectors
        WHERE user_id = $1
        "#,
        [user_id.into(), online_cutoff.into()],
    ))
    .one(db)
    .await?
    .unwrap_or(CollectorCounts { total: 0, online: 0 });

    Ok(DashboardStats {
        total_certs: certs.total,
        expiring_soon: certs.expiring_soon,
        expired: certs.expired,
        total_collectors: collectors.total,
        online_collectors: collectors.online,
        offline_collectors: collectors.total - collectors.online,
    })
}

/// Deletes a single instance, with ownership enforced through the collector
/// join so users cannot remove each other's data by guessing ids.
pub async fn delete_instance(
    db: &DatabaseConnection,
    user_id: Uuid,
    instance_id: Uuid,
) -> Result<bool, DbErr> {
    let result = db
        .execute(Statement::from_sql_and_values(
            db.get_database_backend(),
            r#"
            DELETE FROM certificate_instances ci
            USING collectors col
            WHERE ci.collector_id = col.id
              AND col.user_id = $1
              AND ci.id = $2
            "#,
            [user_id.into(), instance_id.into()],
        ))
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Bulk prune of every MISSING instance a user owns.
pub async fn delete_all_missing_instances(
    db: &DatabaseConnection,
    user_id: Uuid,
) -> Result<u64, DbErr> {
    let result = db
        .execute(Statement::from_sql_and_values(
            db.get_database_backend(),
            r#"
            DELETE FROM certificate_instances ci
            USING collectors col
            WHERE ci.collector_id = col.id
              AND col.user_id = $1
              AND ci.current_status = 'MISSING'
            "#,
            [user_id.into()],
        ))
        .await?;
    Ok(result.rows_affected())
}

/// Priority classification shown to users: expiry trumps trust, trust trumps
/// not-yet-valid, then the countdown buckets. "Today"/"tomorrow" are bounded
/// by local midnights, "this week" by 168 hours, "soon" by 30 days.
pub fn classify_health(
    now: DateTime<Utc>,
    valid_from: DateTime<Utc>,
    valid_until: DateTime<Utc>,
    is_trusted: bool,
) -> CertHealth {
    if now > valid_until {
        return CertHealth::Expired;
    }
    if !is_trusted {
        return CertHealth::Untrusted;
    }
    if now < valid_from {
        return CertHealth::NotYetValid;
    }
    if now + Duration::days(30) > valid_until {
        // Midnight boundaries: "today" ends at the next UTC midnight.
        let end_of_today = (now + Duration::days(1))
            .date_naive()
            .and_time(NaiveTime::MIN)
            .and_utc();
        let end_of_tomorrow = end_of_today + Duration::days(1);

        if valid_until < end_of_today {
            CertHealth::ExpiringToday
        } else if valid_until < end_of_tomorrow {
            CertHealth::ExpiringTomorrow
        } else if (valid_until - now).num_hours() < 168 {
            CertHealth::ExpiringThisWeek
        } else {
            CertHealth::ExpiringSoon
        }
    } else {
        CertHealth::Valid
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    #[test]
    fn expired_beats_untrusted() {
        let status = classify_health(
            at("2026-08-06T12:00:00Z"),
            at("2025-01-01T00:00:00Z"),
            at("2026-01-01T00:00:00Z"),
            false,
        );
        assert_eq!(status, CertHealth::Expired);
    }

    #[test]
    fn untrusted_beats_countdown() {
        let status = classify_health(
            at("2026-08-06T12:00:00Z"),
            at("2026-01-01T00:00:00Z"),
            at("2026-08-10T00:00:00Z"),
            false,
        );
        assert_eq!(status, CertHealth::Untrusted);
    }

    #[test]
    fn not_yet_valid() {
        let status = classify_health(
            at("2026-08-06T12:00:00Z"),
            at("2026-09-01T00:00:00Z"),
            at("2027-09-01T00:00:00Z"),
            true,
        );
        assert_eq!(status, CertHealth::NotYetValid);
    }

    #[test]
    fn countdown_buckets() {
        let now = at("2026-08-06T12:00:00Z");
        let from = at("2026-01-01T00:00:00Z");

        assert_eq!(
            classify_health(now, from, at("2026-08-06T18:00:00Z"), true),
            CertHealth::ExpiringToday
        );
        assert_eq!(
            classify_health(now, from, at("2026-08-07T18:00:00Z"), true),
            CertHealth::ExpiringTomorrow
        );
        assert_eq!(
            classify_health(now, from, at("2026-08-11T00:00:00Z"), true),
            CertHealth::ExpiringThisWeek
        );
        assert_eq!(
            classify_health(now, from, at("2026-08-30T00:00:00Z"), true),
            CertHealth::ExpiringSoon
        );
        assert_eq!(
            classify_health(now, from, at("2027-08-06T00:00:00Z"), true),
            CertHealth::Valid
        );
    }
}
