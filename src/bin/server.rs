use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{error, info};
use tracing_appender::rolling;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use certwatch::db;
use certwatch::notifications::{
    Notifier, email::EmailNotifier, log::LogNotifier, webhook::WebhookNotifier,
};
use certwatch::scanner::tls::TlsProber;
use certwatch::server::config::AppConfig;
use certwatch::web::{self, AppState};
use certwatch::worker::{agentless_scanner, alerter, janitor};

fn init_logging() {
    // Log to a file: JSON format, daily rotation
    let file_appender = rolling::daily("logs", "server.log");
    let file_layer = fmt::layer()
        .with_writer(file_appender)
        .with_ansi(false)
        .json();

    // Log to stdout: human-readable format
    let stdout_layer = fmt::layer().with_writer(std::io::stdout);

    // Default to `info` level if RUST_LOG is not set.
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    if dotenv::dotenv().is_err() {
        eprintln!("No .env file found, relying on system env vars");
    }

    init_logging();

    let config = AppConfig::from_env();
    info!(
        port = config.listen_port,
        scan_interval_secs = config.scanner_interval.as_secs(),
        scan_concurrency = config.scanner_concurrency,
        "Configuration loaded"
    );

    let db = db::connect(&config.database_url).await?;
    db::init_schema(&db).await?;

    let prober = Arc::new(TlsProber::new(config.scanner_timeout));

    // Background workers ------------------------------------------------

    let scan_store = Arc::new(agentless_scanner::DbScanStore::new(db.clone()));
    let _scanner_task = agentless_scanner::spawn(
        scan_store,
        prober.clone(),
        config.scanner_interval,
        config.scanner_timeout,
        config.scanner_concurrency,
    );

    let alert_cooldown = chrono::Duration::from_std(config.alert_cooldown)
        .expect("ALERT_COOLDOWN_HOURS out of range");
    let expiry_window = chrono::Duration::from_std(config.alerter_expiry_window)
        .expect("ALERTER_EXPIRY_DAYS out of range");

    let mut notifiers: Vec<Box<dyn Notifier>> = Vec::new();
    if config.enable_log_alerts {
        notifiers.push(Box::new(LogNotifier::new()));
        info!("Log alerts enabled");
    }
    if let Some(mail_config) = config.mail.clone() {
        match EmailNotifier::new(
            db.clone(),
            mail_config,
            config.frontend_url.clone(),
            alert_cooldown,
        ) {
            Ok(notifier) => notifiers.push(Box::new(notifier)),
            Err(e) => error!(error = %e, "Failed to initialize email notifier"),
        }
    }
    if let Some(webhook_url) = config.alert_webhook_url.clone() {
        notifiers.push(Box::new(WebhookNotifier::new(
            db.clone(),
            webhook_url,
            alert_cooldown,
        )));
    }

    if notifiers.is_empty() {
        info!("No notification channels configured; expiry alerts are disabled");
    } else {
        let _alerter_task = alerter::spawn(
            db.clone(),
            Arc::new(notifiers),
            config.alerter_interval,
            expiry_window,
        );
    }

    let _janitor_task = janitor::spawn(
        db.clone(),
        config.janitor_interval,
        chrono::Duration::from_std(config.collector_ttl).expect("COLLECTOR_TTL_HOURS out of range"),
        chrono::Duration::from_std(config.missing_instance_ttl)
            .expect("MISSING_CERT_TTL_DAYS out of range"),
    );

    // HTTP server --------------------------------------------------------

    let addr = SocketAddr::from(([0, 0, 0, 0], config.listen_port));
    let app_state = Arc::new(AppState {
        db,
        config,
        scanner: prober,
    });

    web::run_http_server(app_state, addr).await
}
