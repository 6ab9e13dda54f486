//! Log alert channel: renders the digest into the process log. Mainly for
//! development and for deployments without an outbound channel. Logs on
//! every cycle; deliberately exempt from the cooldown ledger.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tracing::warn;
use uuid::Uuid;

use super::{Notifier, NotifyError};
use crate::db::entities::user;
use crate::db::models::ExpiringCertificate;

pub struct LogNotifier;

impl LogNotifier {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LogNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn notify(
        &self,
        certs: &[ExpiringCertificate],
        users: &HashMap<Uuid, user::Model>,
    ) -> Result<(), NotifyError> {
        if certs.is_empty() {
            return Ok(());
        }

        let now = Utc::now();
        for cert in certs {
            let owner = users
                .get(&cert.owner_id)
                .map(|u| u.email.as_str())
                .unwrap_or("unknown owner");
            warn!(
                subject_cn = %cert.subject_cn,
                issuer_cn = %cert.issuer_cn,
                source = %cert.source_uid,
                collector = %cert.collector_hostname,
                owner = %owner,
                days_left = (cert.valid_until - now).num_days(),
                "Certificate expiring soon"
            );
        }
        Ok(())
    }
}
