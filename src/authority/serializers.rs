// src/authority/serializers.rs
//! Request and response bodies exchanged with the certificate-issuing authority.

use serde::{Deserialize, Serialize};
use std::fmt;

/// POSTed to the authenticate endpoint.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AuthenticationRequest {
    pub username: String,
    pub password: String,
}

/// Received from both the authenticate and refresh endpoints.
///
/// Some authorities omit the refresh token on refresh, meaning "keep using
/// the previous one".
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticationReply {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: String,
}

/// Ordered and issued certificate counts.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LicensesUsedResponse {
    pub ordered: i64,
    pub issued: i64,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct AuthorityResponse {
    pub id: i64,
    pub ecosystem_id: i64,
    pub signer_certificate_id: i64,
    pub ecosystem_name: String,
    pub balance: i64,
    pub enabled: bool,
    pub profile_id: i64,
    pub profile_name: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ProfileResponse {
    pub profile_id: i64,
    #[serde(default)]
    pub algorithms: Vec<String>,
    #[serde(default)]
    pub ca: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct FindCertificateRequest {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub common_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub serial_number: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct FindCertificateResponse {
    pub total_count: i64,
    #[serde(default)]
    pub items: Vec<CertificateItem>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CertificateItem {
    pub device_id: i64,
    pub common_name: String,
    pub serial_number: String,
    pub creation_date: String,
    pub status: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RevokeCertificateRequest {
    /// RFC 5280 reason code, 0 through 10.
    pub reason_code: u8,
    pub serial_number: String,
}

/// Structured error returned by the authority on non-2xx responses.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ApiError {
    pub status: u16,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.status, self.message)
    }
}

impl std::error::Error for ApiError {}
