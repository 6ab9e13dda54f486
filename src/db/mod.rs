pub mod entities;
pub mod enums;
pub mod models;
pub mod services;

use sea_orm::{ConnectionTrait, Database, DatabaseConnection, DbErr, Statement};
use tracing::info;

/// Tables created at startup, in dependency order. Mirrors the constraints
/// the services rely on: instance uniqueness per (collector, source_uid),
/// target uniqueness per (user, url), append-only alert history.
const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS users (
        id UUID PRIMARY KEY,
        email TEXT NOT NULL UNIQUE,
        org_name TEXT NOT NULL DEFAULT '',
        password_hash TEXT,
        api_key_hash TEXT UNIQUE,
        email_enabled BOOLEAN NOT NULL DEFAULT TRUE,
        is_verified BOOLEAN NOT NULL DEFAULT FALSE,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS collectors (
        id TEXT PRIMARY KEY,
        user_id UUID NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        hostname TEXT NOT NULL DEFAULT '',
        is_virtual BOOLEAN NOT NULL DEFAULT FALSE,
        last_seen_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS certificates (
        id UUID PRIMARY KEY,
        serial_number TEXT NOT NULL,
        issuer_cn TEXT NOT NULL DEFAULT '',
        issuer_org TEXT,
        issuer_ou TEXT,
        subject_cn TEXT NOT NULL DEFAULT '',
        subject_org TEXT,
        subject_ou TEXT,
        valid_from TIMESTAMPTZ NOT NULL,
        valid_until TIMESTAMPTZ NOT NULL,
        signature_algo TEXT NOT NULL DEFAULT '',
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS certificate_instances (
        id UUID PRIMARY KEY,
        collector_id TEXT NOT NULL REFERENCES collectors(id) ON DELETE CASCADE,
        certificate_id UUID NOT NULL REFERENCES certificates(id),
        source_uid TEXT NOT NULL,
        source_type TEXT NOT NULL DEFAULT 'FILE',
        is_trusted BOOLEAN NOT NULL DEFAULT FALSE,
        trust_error TEXT,
        current_status TEXT NOT NULL DEFAULT 'ACTIVE',
        scanned_at TIMESTAMPTZ NOT NULL,
        UNIQUE (collector_id, source_uid)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS monitored_targets (
        id UUID PRIMARY KEY,
        user_id UUID NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        target_url TEXT NOT NULL,
        frequency_hours INT NOT NULL,
        last_scanned_at TIMESTAMPTZ,
        last_status TEXT NOT NULL DEFAULT 'SUCCESS',
        last_error TEXT,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        UNIQUE (user_id, target_url)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS alert_history (
        id UUID PRIMARY KEY,
        certificate_id UUID NOT NULL,
        collector_id TEXT NOT NULL,
        alert_type TEXT NOT NULL,
        sent_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_instances_collector ON certificate_instances (collector_id)",
    "CREATE INDEX IF NOT EXISTS idx_instances_certificate ON certificate_instances (certificate_id)",
    "CREATE INDEX IF NOT EXISTS idx_alert_history_lookup ON alert_history (alert_type, sent_at)",
];

pub async fn connect(database_url: &str) -> Result<DatabaseConnection, DbErr> {
    let db = Database::connect(database_url).await?;
    info!("Connected to PostgreSQL");
    Ok(db)
}

pub async fn init_schema(db: &DatabaseConnection) -> Result<(), DbErr> {
    for ddl in SCHEMA {
        db.execute(Statement::from_string(db.get_database_backend(), *ddl))
            .await?;
    }
    info!("Database schema initialized");
    Ok(())
}
