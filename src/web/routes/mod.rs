pub mod cert_routes;
pub mod collector_routes;
pub mod report_routes;
pub mod target_routes;
