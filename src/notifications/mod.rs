//! Notification channels for expiry alerts. Each channel owns its own
//! cooldown bookkeeping against the alert history ledger, so a failed
//! delivery on one channel never suppresses a retry on the next cycle.

pub mod email;
pub mod log;
pub mod webhook;

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::db::entities::user;
use crate::db::models::ExpiringCertificate;

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("database error: {0}")]
    Database(#[from] sea_orm::DbErr),
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("templating error: {0}")]
    Templating(#[from] tera::Error),
    #[error("delivery rejected: {0}")]
    Rejected(String),
}

/// A notification channel. Receives the raw certificate batch and the
/// pre-resolved owner map; grouping, cooldown filtering and history
/// recording are the implementation's responsibility.
#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &'static str;

    async fn notify(
        &self,
        certs: &[ExpiringCertificate],
        users: &HashMap<Uuid, user::Model>,
    ) -> Result<(), NotifyError>;
}
