// src/authority/endpoints.rs
//! Endpoint table for the authority's REST API.

pub const DEFAULT_BASE_URL: &str = "https://iot.sectigo.com";

pub const AUTHENTICATE: &str = "/auth";
pub const REFRESH: &str = "/auth/refresh";
pub const LICENSES_USED: &str = "/api/v1/statistics/licensesUsed";
pub const USER_AUTHORITIES: &str = "/api/v1/authorities";
pub const PROFILES: &str = "/api/v1/profiles";
pub const FIND_CERTIFICATE: &str = "/api/v1/certificates/find";

/// Revocation is scoped to the profile that signed the certificate.
pub fn revoke_certificate(profile_id: i64) -> String {
    format!("/api/v1/certificates/{}/revoke", profile_id)
}

/// Joins a base URL and an endpoint path without doubling slashes.
pub fn url_for(base_url: &str, path: &str) -> String {
    format!("{}{}", base_url.trim_end_matches('/'), path)
}
