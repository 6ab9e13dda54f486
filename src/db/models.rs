//! Shared wire and view structs used across services, workers and the web
//! layer.

use chrono::{DateTime, Utc};
use sea_orm::FromQueryResult;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::enums::InstanceStatus;

/// Source type tag for certificates discovered by the agentless scanner.
pub const SOURCE_TYPE_CLOUD: &str = "CLOUD";
/// Source type tag for certificates reported by physical agents.
pub const SOURCE_TYPE_FILE: &str = "FILE";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistinguishedName {
    pub cn: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub org: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ou: Option<String>,
}

/// One certificate as observed at a source locator, either by an agent or by
/// a network probe. This is the unit the reconciliation engine ingests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificateObservation {
    pub source_uid: String,
    #[serde(default)]
    pub source_type: String,
    pub serial: String,
    pub subject: DistinguishedName,
    pub issuer: DistinguishedName,
    pub signature_algo: String,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    #[serde(default)]
    pub dns_names: Vec<String>,
    pub is_trusted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trust_error: Option<String>,
}

/// A full-sync report posted by a physical agent.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentReport {
    pub agent_id: String,
    #[serde(default)]
    pub api_key: String,
    pub hostname: String,
    #[serde(default)]
    pub certificates: Vec<CertificateObservation>,
}

/// Derived health of a certificate as shown to users. Priority order:
/// expired beats untrusted beats not-yet-valid beats the expiry countdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CertHealth {
    Valid,
    #[serde(rename = "Not Yet Valid")]
    NotYetValid,
    Expired,
    Untrusted,
    #[serde(rename = "Expiring Today")]
    ExpiringToday,
    #[serde(rename = "Expiring Tomorrow")]
    ExpiringTomorrow,
    #[serde(rename = "Expiring This Week")]
    ExpiringThisWeek,
    #[serde(rename = "Expiring Soon")]
    ExpiringSoon,
}

/// One row of the user-facing certificate inventory list.
#[derive(Debug, Clone, Serialize)]
pub struct CertificateListItem {
    pub id: Uuid,
    pub collector_id: String,
    pub collector_hostname: String,
    pub source_uid: String,
    pub source_type: String,
    pub current_status: InstanceStatus,
    pub subject: DistinguishedName,
    pub issuer: DistinguishedName,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    pub is_trusted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trust_error: Option<String>,
    pub status: CertHealth,
}

#[derive(Debug, Clone, Serialize)]
pub struct PaginatedCertificates {
    pub data: Vec<CertificateListItem>,
    pub total: u64,
    pub page: u64,
    pub limit: u64,
}

/// An expiring certificate joined with its owner context, as consumed by the
/// alerter and the cooldown ledger. `certificate_id` is the definition id,
/// which is what the history table is keyed on.
#[derive(Debug, Clone, Serialize, FromQueryResult)]
pub struct ExpiringCertificate {
    pub certificate_id: Uuid,
    pub serial_number: String,
    pub subject_cn: String,
    pub issuer_cn: String,
    pub valid_until: DateTime<Utc>,
    pub source_uid: String,
    pub is_trusted: bool,
    pub collector_id: String,
    pub collector_hostname: String,
    pub owner_id: Uuid,
}

/// Summary counts for the dashboard cards.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DashboardStats {
    pub total_certs: i64,
    pub expiring_soon: i64,
    pub expired: i64,
    pub total_collectors: i64,
    pub online_collectors: i64,
    pub offline_collectors: i64,
}

/// A collector row decorated with liveness and certificate count.
#[derive(Debug, Clone, Serialize)]
pub struct CollectorOverview {
    pub id: String,
    pub hostname: String,
    pub is_virtual: bool,
    pub last_seen_at: DateTime<Utc>,
    pub online: bool,
    pub cert_count: i64,
}
