pub mod cert_service;
pub mod collector_service;
pub mod history_service;
pub mod ingest_service;
pub mod target_service;
pub mod user_service;
