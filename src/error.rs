// src/error.rs
//! Error taxonomy for the directory service.
//!
//! Every failure that can reach the RPC boundary is a variant of [`Error`] and
//! carries a stable numeric code (see [`Error::code`]) so that callers can tell
//! partial failures ("record not found") apart from systemic ones ("store
//! unavailable").

use crate::authority::serializers::ApiError;
use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Missing credentials, signing material or settings.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("could not decode token: {0}")]
    TokenDecode(String),

    /// The authority rejected the username/password or refresh token (401).
    #[error("invalid credentials")]
    InvalidCredentials,

    /// Valid credentials but the user lacks the required role (403).
    #[error("user is not authorized for this endpoint")]
    NotAuthorized,

    /// Password authentication is disabled; TLS client certificates are required (307).
    #[error("authority requires TLS client certificate authentication")]
    MustUseTlsAuth,

    #[error("client is not authenticated")]
    NotAuthenticated,

    #[error("unexpected status code: {0}")]
    UnexpectedStatus(u16),

    /// Structured error body returned by the authority.
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("certificate authority has not been loaded")]
    CertificateAuthorityNotLoaded,

    #[error("could not create random serial number: {0}")]
    SerialNumberGeneration(String),

    #[error("certificate generation failed: {0}")]
    Certificate(#[from] rcgen::Error),

    #[error("not found")]
    NotFound,

    #[error("storage failure: {0}")]
    StorageIo(String),

    #[error("unhandled database scheme {0:?}")]
    UnsupportedBackend(String),

    #[error("store has been closed")]
    StoreClosed,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("request timed out")]
    Timeout,

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Config(#[from] config::ConfigError),
}

impl Error {
    /// Stable code reported to RPC callers alongside the error message.
    pub fn code(&self) -> i32 {
        match self {
            Error::InvalidRequest(_) | Error::TokenDecode(_) => 400,
            Error::InvalidCredentials | Error::NotAuthenticated | Error::MustUseTlsAuth => 401,
            Error::NotAuthorized => 403,
            Error::NotFound => 404,
            Error::Timeout => 408,
            Error::Api(err) => err.status as i32,
            Error::CertificateAuthorityNotLoaded | Error::UnsupportedBackend(_) => 501,
            Error::UnexpectedStatus(_) | Error::Http(_) => 502,
            Error::StoreClosed => 503,
            Error::Configuration(_)
            | Error::SerialNumberGeneration(_)
            | Error::Certificate(_)
            | Error::StorageIo(_)
            | Error::Json(_)
            | Error::Io(_)
            | Error::Config(_) => 500,
        }
    }
}
