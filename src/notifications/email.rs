//! Email alert channel. Groups expiring certificates per owner, renders an
//! HTML digest and delivers it through the configured HTTP mail API.
//!
//! History is recorded only for certificates whose owner's email actually
//! went out; a failed delivery leaves them eligible for the next cycle.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use sea_orm::DatabaseConnection;
use serde::Serialize;
use tera::{Context, Tera};
use tracing::{info, warn};
use uuid::Uuid;

use super::{Notifier, NotifyError};
use crate::db::entities::user;
use crate::db::enums::AlertType;
use crate::db::models::ExpiringCertificate;
use crate::db::services::history_service;
use crate::server::config::MailConfig;

const ALERT_BODY_TEMPLATE: &str = r#"
<html>
<body style="font-family: Arial, sans-serif; color: #333;">
  <h3>Hello {{ org_name }},</h3>
  <p>The following <strong>{{ certs | length }} certificates</strong> are expiring soon:</p>
  <table border="1" cellpadding="10" cellspacing="0" style="border-collapse: collapse; width: 100%; border-color: #ddd;">
    <tr style="background-color: #f8f9fa; text-align: left;"><th>Host</th><th>Certificate</th><th>Expires</th></tr>
    {% for cert in certs %}
    <tr>
      <td>{{ cert.collector_hostname }}<br/><small>{{ cert.source_uid }}</small></td>
      <td>CN={{ cert.subject_cn }}<br/><small>Issuer: {{ cert.issuer_cn }}</small></td>
      <td><b style="color:{{ cert.color }}">{{ cert.expires_on }}</b><br/><small>{{ cert.days_left }} days left</small></td>
    </tr>
    {% endfor %}
  </table>
  <p style="font-size: 12px; color: #666;">Manage your inventory at {{ frontend_url }}</p>
</body>
</html>
"#;

#[derive(Serialize)]
struct EmailRow {
    collector_hostname: String,
    source_uid: String,
    subject_cn: String,
    issuer_cn: String,
    expires_on: String,
    days_left: i64,
    color: &'static str,
}

pub struct EmailNotifier {
    db: DatabaseConnection,
    client: reqwest::Client,
    tera: Tera,
    config: MailConfig,
    frontend_url: String,
    cooldown: Duration,
}

impl EmailNotifier {
    pub fn new(
        db: DatabaseConnection,
        config: MailConfig,
        frontend_url: String,
        cooldown: Duration,
    ) -> Result<Self, tera::Error> {
        let mut tera = Tera::default();
        tera.add_raw_template("alert_email.html", ALERT_BODY_TEMPLATE)?;
        Ok(Self {
            db,
            client: reqwest::Client::new(),
            tera,
            config,
            frontend_url,
            cooldown,
        })
    }

    fn render_body(&self, org_name: &str, certs: &[ExpiringCertificate]) -> Result<String, tera::Error> {
        let now = Utc::now();
        let rows: Vec<EmailRow> = certs
            .iter()
            .map(|cert| {
                let days_left = (cert.valid_until - now).num_days();
                let color = if days_left < 7 {
                    "#dc3545"
                } else if days_left < 30 {
                    "#ffc107"
                } else {
                    "#28a745"
                };
                EmailRow {
                    collector_hostname: cert.collector_hostname.clone(),
                    source_uid: cert.source_uid.clone(),
                    subject_cn: cert.subject_cn.clone(),
                    issuer_cn: cert.issuer_cn.clone(),
                    expires_on: cert.valid_until.format("%Y-%m-%d").to_string(),
                    days_left,
                    color,
                }
            })
            .collect();

        let mut context = Context::new();
        context.insert("org_name", org_name);
        context.insert("certs", &rows);
        context.insert("frontend_url", &self.frontend_url);
        self.tera.render("alert_email.html", &context)
    }

    async fn deliver(&self, to: &str, subject: &str, html_body: &str) -> Result<(), NotifyError> {
        let payload = serde_json::json!({
            "sender": { "name": self.config.sender_name, "email": self.config.sender_addr },
            "to": [ { "email": to } ],
            "subject": subject,
            "htmlContent": html_body,
        });

        let response = self
            .client
            .post(&self.config.api_url)
            .header("api-key", &self.config.api_key)
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Rejected(format!("{status}: {body}")));
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    fn name(&self) -> &'static str {
        "email"
    }

    async fn notify(
        &self,
        certs: &[ExpiringCertificate],
        users: &HashMap<Uuid, user::Model>,
    ) -> Result<(), NotifyError> {
        if certs.is_empty() {
            return Ok(());
        }

        // Cooldown filter; if the ledger is unreadable, send everything
        // rather than silently dropping alerts.
        let to_send = match history_service::filter_unalerted(
            &self.db,
            certs.to_vec(),
            AlertType::Email,
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

        let mut buckets: HashMap<Uuid, Vec<ExpiringCertificate>> = HashMap::new();
        for cert in to_send {
            buckets.entry(cert.owner_id).or_default().push(cert);
        }

        let mut sent: Vec<ExpiringCertificate> = Vec::new();
        for (owner_id, owner_certs) in buckets {
            let Some(user) = users.get(&owner_id) else {
                continue;
            };
            if user.email.is_empty() || !user.email_enabled {
                continue;
            }

            let subject = format!(
                "Action Required: {} Certificates Expiring Soon",
                owner_certs.len()
            );
            let body = self.render_body(&user.org_name, &owner_certs)?;

            match self.deliver(&user.email, &subject, &body).await {
                Ok(()) => {
                    info!(email = %user.email, certs = owner_certs.len(), "Sent expiry alert");
                    sent.extend(owner_certs);
                }
                Err(e) => {
                    warn!(email = %user.email, error = %e, "Failed to send expiry alert");
                }
            }
        }

        if !sent.is_empty() {
            history_service::record_sent(&self.db, &sent, AlertType::Email).await?;
        }

        Ok(())
    }
}
