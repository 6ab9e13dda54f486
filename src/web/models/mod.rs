use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// JWT claims minted by the external auth layer. Only consumed here.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub user_id: Uuid,
    pub exp: usize,
}

/// Injected into request extensions by the auth middleware.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub id: Uuid,
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct AddTargetRequest {
    pub url: String,
    #[serde(default)]
    pub frequency_hours: i32,
}

#[derive(Debug, Deserialize)]
pub struct UpdateTargetRequest {
    pub frequency_hours: i32,
}

/// Query parameters of the certificate list endpoint; translated into a
/// `CertFilter`.
#[derive(Debug, Default, Deserialize)]
pub struct CertListParams {
    pub collector_id: Option<String>,
    pub search: Option<String>,
    pub valid_after: Option<chrono::DateTime<chrono::Utc>>,
    pub valid_before: Option<chrono::DateTime<chrono::Utc>>,
    pub trusted: Option<bool>,
    pub status: Option<String>,
    pub page: Option<u64>,
    pub limit: Option<u64>,
}
