//! Webhook alert channel: one JSON POST per cycle carrying the whole
//! filtered digest. Recorded in the cooldown ledger only when the endpoint
//! accepted the delivery.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Duration;
use sea_orm::DatabaseConnection;
use tracing::{info, warn};
use uuid::Uuid;

use super::{Notifier, NotifyError};
use crate::db::entities::user;
use crate::db::enums::AlertType;
use crate::db::models::ExpiringCertificate;
use crate::db::services::history_service;

pub struct WebhookNotifier {
    db: DatabaseConnection,
    client: reqwest::Client,
    url: String,
    cooldown: Duration,
}

impl WebhookNotifier {
    pub fn new(db: DatabaseConnection, url: String, cooldown: Duration) -> Self {
        Self {
            db,
            client: reqwest::Client::new(),
            url,
            cooldown,
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn notify(
        &self,
        certs: &[ExpiringCertificate],
        _users: &HashMap<Uuid, user::Model>,
    ) -> Result<(), NotifyError> {
        if certs.is_empty() {
            return Ok(());
        }

        let to_send = match history_service::filter_unalerted(
            &self.db,
            certs.to_vec(),
            AlertType::Webhook,
            self.cooldown,
        )
        .await
        {
            Ok(filtered) => filtered,
            Err(e) => {
                warn!(error = %e, "Cooldown check failed, defaulting to sending all");
                certs.to_vec()
            }
        };

        if to_send.is_empty() {
            return Ok(());
        }

        let payload = serde_json::json!({
            "subject": format!("{} certificates expiring soon", to_send.len()),
            "certificates": &to_send,
        });

        let response = self.client.post(&self.url).json(&payload).send().await?;
        if !response.status().is_success() {
            return Err(NotifyError::Rejected(response.status().to_string()));
        }

        info!(certs = to_send.len(), "Posted expiry digest to webhook");
        history_service::record_sent(&self.db, &to_send, AlertType::Webhook).await?;
        Ok(())
    }
}
