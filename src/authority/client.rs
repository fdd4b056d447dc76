// src/authority/client.rs
//! Authenticated client for the external certificate-issuing authority.
//!
//! Most endpoints require a bearer access token. Access tokens are short
//! lived (minutes); when one expires the refresh token is used to obtain a new
//! pair without resupplying the password, and if that fails the client falls
//! back to a full username/password exchange. This gating sequence is the
//! *preflight* and runs before every resource call.
//!
//! # Cancellation
//! Token pairs are only installed after a complete response has been decoded,
//! so dropping an in-flight future (e.g. via `tokio::time::timeout`) leaves
//! the credentials in their last-known-good state.

use crate::authority::credentials::{CredentialStatus, Credentials};
use crate::authority::endpoints::{self, url_for};
use crate::authority::serializers::{
    ApiError, AuthenticationReply, AuthenticationRequest, AuthorityResponse,
    FindCertificateRequest, FindCertificateResponse, LicensesUsedResponse, ProfileResponse,
    RevokeCertificateRequest,
};
use crate::error::{Error, Result};
use log::{debug, info, warn};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::redirect::Policy;
use reqwest::{Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;

const CONTENT_TYPE_JSON: &str = "application/json;charset=utf-8";
const MAX_REDIRECTS: usize = 10;

/// Outcome of a token exchange, classified from the HTTP status.
///
/// A 307 means the authority has certificate authentication enabled and the
/// password exchange must be retried with TLS client certificates; it is
/// reported instead of followed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    Success,
    NeedsReauth,
    NeedsTlsAuth,
    Forbidden,
    Unexpected(u16),
}

impl AuthOutcome {
    pub fn classify(status: StatusCode) -> Self {
        match status {
            StatusCode::OK => AuthOutcome::Success,
            StatusCode::UNAUTHORIZED => AuthOutcome::NeedsReauth,
            StatusCode::FORBIDDEN => AuthOutcome::Forbidden,
            StatusCode::TEMPORARY_REDIRECT => AuthOutcome::NeedsTlsAuth,
            other => AuthOutcome::Unexpected(other.as_u16()),
        }
    }
}

/// HTTP client owning one authority session.
///
/// The client exclusively owns its [`Credentials`]; share it across tasks
/// behind a single lock so the preflight and the request it gates run as one
/// sequence.
pub struct AuthorityClient {
    http: reqwest::Client,
    base_url: String,
    creds: Credentials,
}

impl AuthorityClient {
    /// Creates an unauthenticated client; no request is made until a call needs one.
    ///
    /// # Arguments
    /// * `base_url` - Root URL of the authority API
    /// * `timeout` - Upper bound for every HTTP exchange
    /// * `creds` - Loaded credentials (see [`Credentials::load`])
    pub fn new(base_url: &str, timeout: Duration, creds: Credentials) -> Result<Self> {
        let http = reqwest::Client::builder()
            .redirect(Policy::custom(|attempt| {
                if attempt.status() == StatusCode::TEMPORARY_REDIRECT {
                    attempt.stop()
                } else if attempt.previous().len() > MAX_REDIRECTS {
                    attempt.error("too many redirects")
                } else {
                    attempt.follow()
                }
            }))
            .timeout(timeout)
            .build()?;

        Ok(AuthorityClient {
            http,
            base_url: base_url.to_string(),
            creds,
        })
    }

    /// Loads credentials (arguments, environment, then cache) and creates a client.
    pub fn connect(base_url: &str, timeout: Duration, username: &str, password: &str) -> Result<Self> {
        let mut creds = Credentials::new();
        creds.load(username, password)?;
        Self::new(base_url, timeout, creds)
    }

    pub fn creds(&self) -> &Credentials {
        &self.creds
    }

    pub fn status(&self) -> CredentialStatus {
        self.creds.status()
    }

    /// Exchanges username/password for a new token pair, replacing any existing tokens.
    ///
    /// # Errors
    /// - `InvalidCredentials` on 401 and `NotAuthorized` on 403 (tokens are cleared)
    /// - `MustUseTlsAuth` on 307
    /// - `UnexpectedStatus` on any other non-200 status
    pub async fn authenticate(&mut self) -> Result<()> {
        let request = AuthenticationRequest {
            username: self.creds.username.clone(),
            password: self.creds.password.clone(),
        };

        let rep = self
            .http
            .post(url_for(&self.base_url, endpoints::AUTHENTICATE))
            .header(ACCEPT, CONTENT_TYPE_JSON)
            .json(&request)
            .send()
            .await?;

        match AuthOutcome::classify(rep.status()) {
            AuthOutcome::Success => {}
            AuthOutcome::NeedsReauth => return Err(self.reject(Error::InvalidCredentials)),
            AuthOutcome::Forbidden => return Err(self.reject(Error::NotAuthorized)),
            AuthOutcome::NeedsTlsAuth => return Err(Error::MustUseTlsAuth),
            AuthOutcome::Unexpected(code) => return Err(Error::UnexpectedStatus(code)),
        }

        let tokens: AuthenticationReply = rep.json().await?;
        self.creds.update(&tokens.access_token, &tokens.refresh_token)?;
        info!("authenticated with certificate authority as {}", self.creds.subject);
        Ok(())
    }

    /// Uses the refresh token to obtain a new access token.
    ///
    /// Does not check whether the credentials are refreshable; it only
    /// requires that a refresh token exists. An empty refresh token in the
    /// reply means the previous one stays in use.
    pub async fn refresh(&mut self) -> Result<()> {
        if self.creds.refresh_token.is_empty() {
            return Err(Error::NotAuthenticated);
        }

        let rep = self
            .http
            .post(url_for(&self.base_url, endpoints::REFRESH))
            .header(CONTENT_TYPE, CONTENT_TYPE_JSON)
            .header(ACCEPT, CONTENT_TYPE_JSON)
            .body(format!("{}\n", self.creds.refresh_token))
            .send()
            .await?;

        match AuthOutcome::classify(rep.status()) {
            AuthOutcome::Success => {}
            AuthOutcome::NeedsReauth => return Err(Error::InvalidCredentials),
            AuthOutcome::Forbidden => return Err(Error::NotAuthorized),
            AuthOutcome::NeedsTlsAuth => return Err(Error::UnexpectedStatus(307)),
            AuthOutcome::Unexpected(code) => return Err(Error::UnexpectedStatus(code)),
        }

        let mut tokens: AuthenticationReply = rep.json().await?;
        if tokens.refresh_token.is_empty() {
            tokens.refresh_token = self.creds.refresh_token.clone();
        }

        self.creds.update(&tokens.access_token, &tokens.refresh_token)?;
        debug!("refreshed certificate authority access token");
        Ok(())
    }

    /// Ordered/issued certificate statistics. Requires role USER.
    pub async fn licenses_used(&mut self) -> Result<LicensesUsedResponse> {
        let rep = self.execute(Method::GET, endpoints::LICENSES_USED, None).await?;
        decode(rep).await
    }

    /// Authorities by ecosystem available to the current user.
    pub async fn user_authorities(&mut self) -> Result<Vec<AuthorityResponse>> {
        let rep = self.execute(Method::GET, endpoints::USER_AUTHORITIES, None).await?;
        decode(rep).await
    }

    /// Profiles available to the current user.
    pub async fn profiles(&mut self) -> Result<Vec<ProfileResponse>> {
        let rep = self.execute(Method::GET, endpoints::PROFILES, None).await?;
        decode(rep).await
    }

    /// Searches issued certificates by common name and/or serial number.
    pub async fn find_certificate(
        &mut self,
        common_name: &str,
        serial_number: &str,
    ) -> Result<FindCertificateResponse> {
        let query = FindCertificateRequest {
            common_name: common_name.to_string(),
            serial_number: serial_number.to_string(),
        };
        let body = serde_json::to_value(query)?;
        let rep = self.execute(Method::POST, endpoints::FIND_CERTIFICATE, Some(body)).await?;
        decode(rep).await
    }

    /// Revokes a single certificate signed under `profile_id`.
    ///
    /// # Arguments
    /// * `reason_code` - RFC 5280 CRLReason, 0 through 10
    pub async fn revoke_certificate(
        &mut self,
        profile_id: i64,
        reason_code: u8,
        serial_number: &str,
    ) -> Result<()> {
        if reason_code > 10 {
            return Err(Error::InvalidRequest(format!(
                "reason code {} is not an RFC 5280 revocation reason",
                reason_code
            )));
        }

        let query = RevokeCertificateRequest {
            reason_code,
            serial_number: serial_number.to_string(),
        };
        let body = serde_json::to_value(query)?;
        self.execute(Method::POST, &endpoints::revoke_certificate(profile_id), Some(body))
            .await?;
        info!("revoked certificate {} under profile {}", serial_number, profile_id);
        Ok(())
    }

    /// Ensures usable credentials exist, refreshing or reauthenticating as needed.
    ///
    /// A failed refresh falls back to a single authentication attempt. If the
    /// resulting credentials do not pass [`Credentials::check`] they are
    /// cleared and the cleared state is cached, so a bad token pair is never
    /// reused. The cache is only rewritten after a token exchange; write
    /// failures are logged and otherwise ignored.
    async fn preflight(&mut self) -> Result<()> {
        let exchanged = !self.creds.valid();
        if exchanged {
            let mut refreshed = false;
            if self.creds.refreshable() {
                match self.refresh().await {
                    Ok(()) => refreshed = true,
                    Err(e) => warn!("could not refresh credentials, reauthenticating: {}", e),
                }
            }

            if !refreshed {
                self.authenticate().await?;
            }
        }

        if let Err(e) = self.creds.check() {
            self.creds.clear();
            if let Err(cache_err) = self.creds.dump() {
                warn!("could not cache cleared credentials: {}", cache_err);
            }
            return Err(e);
        }

        if exchanged {
            if let Err(e) = self.creds.dump() {
                warn!("could not cache credentials: {}", e);
            }
        }
        Ok(())
    }

    /// Runs the preflight, then issues one authenticated request.
    async fn execute(
        &mut self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<Response> {
        self.preflight().await?;

        if !self.creds.valid() {
            return Err(Error::NotAuthenticated);
        }

        let mut request = self
            .http
            .request(method, url_for(&self.base_url, path))
            .bearer_auth(&self.creds.access_token)
            .header(ACCEPT, CONTENT_TYPE_JSON);
        if let Some(body) = body {
            request = request.json(&body);
        }

        check_status(request.send().await?).await
    }

    fn reject(&mut self, err: Error) -> Error {
        self.creds.clear();
        if let Err(e) = self.creds.dump() {
            warn!("could not cache cleared credentials: {}", e);
        }
        err
    }
}

/// Converts a non-2xx response into an error, preferring the authority's JSON
/// error body and otherwise synthesizing one from the status line.
async fn check_status(rep: Response) -> Result<Response> {
    let status = rep.status();
    if status.is_success() {
        return Ok(rep);
    }

    let body = rep.bytes().await.unwrap_or_default();
    if let Ok(err) = serde_json::from_slice::<ApiError>(&body) {
        return Err(Error::Api(err));
    }

    Err(match status {
        StatusCode::UNAUTHORIZED => Error::NotAuthenticated,
        StatusCode::FORBIDDEN => Error::NotAuthorized,
        _ => Error::Api(ApiError {
            status: status.as_u16(),
            message: status.canonical_reason().unwrap_or("unknown status").to_string(),
            timestamp: None,
        }),
    })
}

async fn decode<T: DeserializeOwned>(rep: Response) -> Result<T> {
    Ok(rep.json().await?)
}
