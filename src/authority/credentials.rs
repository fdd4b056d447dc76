// src/authority/credentials.rs
//! Credential store for the authority API session.
//!
//! Holds the operator's username/password and the access/refresh token pair
//! issued by the authority. All time fields are derived from the tokens'
//! claims by [`Credentials::update`], the only operation that installs new
//! tokens, so readers never observe a half-applied token pair. No network I/O
//! happens here; the only side effects are reads and writes of the per-user
//! cache file.

use crate::error::{Error, Result};
use crate::utils::serialization::{read_json, write_json_atomic};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, decode_header, DecodingKey, Validation};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;

/// Environment variable consulted when no username is supplied.
pub const USERNAME_ENV: &str = "AUTHORITY_USERNAME";
/// Environment variable consulted when no password is supplied.
pub const PASSWORD_ENV: &str = "AUTHORITY_PASSWORD";

/// How long before access token expiry a refresh becomes due.
pub const REFRESH_MARGIN_SECS: i64 = 60;

const CACHE_VENDOR: &str = "vaspdirectory";
const CACHE_APP: &str = "authority";
const CACHE_FILE: &str = "credentials.json";

/// Username/password plus the current token pair and its validity window.
///
/// # Invariant
/// `access_token` is non-empty if and only if `subject`, `issued_at`,
/// `not_before`, `expires_at` and `refresh_by` are all set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    pub access_token: String,
    pub refresh_token: String,
    pub subject: String,
    pub issued_at: Option<DateTime<Utc>>,
    pub not_before: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub refresh_by: Option<DateTime<Utc>>,
    /// Expiry of the refresh token itself.
    pub refresh_expires_at: Option<DateTime<Utc>>,

    /// Overrides the per-user cache directory (tests, containers).
    cache_dir: Option<PathBuf>,
}

/// Summary used by operators to inspect the session state.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", content = "until", rename_all = "snake_case")]
pub enum CredentialStatus {
    Valid(DateTime<Utc>),
    Current(DateTime<Utc>),
    Expired,
}

/// On-disk representation; time fields are re-derived from the tokens on load.
#[derive(Serialize, Deserialize, Debug, Default)]
struct CachedCredentials {
    username: String,
    password: String,
    access_token: String,
    refresh_token: String,
}

#[derive(Deserialize, Debug)]
struct Claims {
    #[serde(default)]
    sub: Option<String>,
    #[serde(default)]
    iat: Option<i64>,
    #[serde(default)]
    nbf: Option<i64>,
    #[serde(default)]
    exp: Option<i64>,
}

impl Credentials {
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses `dir` instead of the per-user cache directory.
    pub fn with_cache_dir(dir: impl Into<PathBuf>) -> Self {
        Credentials {
            cache_dir: Some(dir.into()),
            ..Self::default()
        }
    }

    /// Resolves the username and password, then loads any cached tokens.
    ///
    /// Blank arguments fall back to `AUTHORITY_USERNAME` / `AUTHORITY_PASSWORD`
    /// and finally to the cache file. Cached tokens are only adopted when the
    /// cache belongs to the resolved user.
    ///
    /// # Errors
    /// `Error::Configuration` if no username and password could be resolved.
    pub fn load(&mut self, username: &str, password: &str) -> Result<()> {
        let username = resolve(username, USERNAME_ENV);
        let password = resolve(password, PASSWORD_ENV);
        self.load_from(username, password)
    }

    /// Same as [`Credentials::load`] without consulting the environment.
    pub(crate) fn load_from(&mut self, username: String, password: String) -> Result<()> {
        self.username = username;
        self.password = password;

        match self.read_cache() {
            Ok(Some(cached)) => self.restore(cached),
            Ok(None) => debug!("no cached credentials found"),
            Err(e) => warn!("ignoring unreadable credentials cache: {}", e),
        }

        if self.username.is_empty() || self.password.is_empty() {
            return Err(Error::Configuration(format!(
                "authority username and password required (set ${} and ${})",
                USERNAME_ENV, PASSWORD_ENV
            )));
        }
        Ok(())
    }

    fn restore(&mut self, cached: CachedCredentials) {
        if self.username.is_empty() {
            self.username = cached.username.clone();
        }

        if self.username != cached.username {
            debug!("cached credentials belong to another user, ignoring tokens");
            return;
        }

        if self.password.is_empty() {
            self.password = cached.password.clone();
        }

        if cached.access_token.is_empty() {
            return;
        }

        if let Err(e) = self.update(&cached.access_token, &cached.refresh_token) {
            warn!("discarding cached tokens: {}", e);
        }
    }

    /// Installs a new token pair, re-deriving every time field from the claims.
    ///
    /// Either all fields are replaced or, on error, none are.
    pub fn update(&mut self, access_token: &str, refresh_token: &str) -> Result<()> {
        let access = decode_claims(access_token)?;
        let refresh = decode_claims(refresh_token)?;

        let subject = access
            .sub
            .filter(|sub| !sub.is_empty())
            .ok_or_else(|| Error::TokenDecode("access token has no subject".into()))?;
        let expires_at = timestamp(access.exp, "exp")?;
        let issued_at = timestamp(access.iat.or(access.nbf), "iat")?;
        let not_before = timestamp(access.nbf.or(access.iat), "nbf")?;
        let refresh_expires_at = timestamp(refresh.exp, "exp")?;

        self.access_token = access_token.to_string();
        self.refresh_token = refresh_token.to_string();
        self.subject = subject;
        self.issued_at = Some(issued_at);
        self.not_before = Some(not_before);
        self.expires_at = Some(expires_at);
        self.refresh_by = Some(expires_at - Duration::seconds(REFRESH_MARGIN_SECS));
        self.refresh_expires_at = Some(refresh_expires_at);
        Ok(())
    }

    /// True while the access token may be presented: now in [not_before, expires_at).
    pub fn valid(&self) -> bool {
        self.valid_at(Utc::now())
    }

    pub fn valid_at(&self, now: DateTime<Utc>) -> bool {
        if self.access_token.is_empty() {
            return false;
        }
        match (self.not_before, self.expires_at) {
            (Some(nbf), Some(exp)) => nbf <= now && now < exp,
            _ => false,
        }
    }

    /// True before the refresh-by point, i.e. no refresh is due yet.
    pub fn current(&self) -> bool {
        self.current_at(Utc::now())
    }

    pub fn current_at(&self, now: DateTime<Utc>) -> bool {
        self.refresh_by.map_or(false, |by| now < by)
    }

    /// True when a refresh token exists and has not itself expired.
    pub fn refreshable(&self) -> bool {
        self.refreshable_at(Utc::now())
    }

    pub fn refreshable_at(&self, now: DateTime<Utc>) -> bool {
        !self.refresh_token.is_empty() && self.refresh_expires_at.map_or(false, |exp| now < exp)
    }

    /// Final gate before trusting stored credentials.
    pub fn check(&self) -> Result<()> {
        if self.access_token.is_empty() {
            return Err(Error::NotAuthenticated);
        }
        if self.subject.is_empty()
            || self.issued_at.is_none()
            || self.refresh_by.is_none()
        {
            return Err(Error::TokenDecode("credentials are missing claims".into()));
        }
        if !self.valid() {
            return Err(Error::NotAuthenticated);
        }
        Ok(())
    }

    /// Wipes the token pair and everything derived from it; keeps username/password.
    pub fn clear(&mut self) {
        self.access_token.clear();
        self.refresh_token.clear();
        self.subject.clear();
        self.issued_at = None;
        self.not_before = None;
        self.expires_at = None;
        self.refresh_by = None;
        self.refresh_expires_at = None;
    }

    pub fn status(&self) -> CredentialStatus {
        let now = Utc::now();
        match (self.expires_at, self.refresh_by) {
            (Some(exp), _) if self.valid_at(now) => CredentialStatus::Valid(exp),
            (_, Some(by)) if self.current_at(now) => CredentialStatus::Current(by),
            _ => CredentialStatus::Expired,
        }
    }

    /// Deterministic location of the cache file, if a cache directory exists.
    pub fn cache_path(&self) -> Option<PathBuf> {
        let dir = match &self.cache_dir {
            Some(dir) => dir.clone(),
            None => dirs::cache_dir()?.join(CACHE_VENDOR).join(CACHE_APP),
        };
        Some(dir.join(CACHE_FILE))
    }

    /// The cache file path, only if the file currently exists.
    pub fn cache_file(&self) -> Option<PathBuf> {
        self.cache_path().filter(|path| path.exists())
    }

    /// Persists the credentials to the cache file.
    ///
    /// The write is atomic: the previous cache stays intact if it fails.
    /// Callers treat failures as non-fatal since the in-memory copy remains
    /// authoritative for this process.
    pub fn dump(&self) -> Result<()> {
        let path = match self.cache_path() {
            Some(path) => path,
            None => return Ok(()),
        };
        let cached = CachedCredentials {
            username: self.username.clone(),
            password: self.password.clone(),
            access_token: self.access_token.clone(),
            refresh_token: self.refresh_token.clone(),
        };
        write_json_atomic(&path, &cached, true)?;
        debug!("credentials cached at {}", path.display());
        Ok(())
    }

    fn read_cache(&self) -> std::io::Result<Option<CachedCredentials>> {
        match self.cache_path() {
            Some(path) => read_json(&path),
            None => Ok(None),
        }
    }
}

fn resolve(value: &str, env: &str) -> String {
    if value.is_empty() {
        std::env::var(env).unwrap_or_default()
    } else {
        value.to_string()
    }
}

/// Decodes the claims of a JWT without verifying its signature; the token was
/// received directly from the authority over TLS and is opaque to us otherwise.
fn decode_claims(token: &str) -> Result<Claims> {
    let header = decode_header(token).map_err(|e| Error::TokenDecode(e.to_string()))?;

    let mut validation = Validation::new(header.alg);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.required_spec_claims = HashSet::new();

    decode::<Claims>(token, &DecodingKey::from_secret(&[]), &validation)
        .map(|data| data.claims)
        .map_err(|e| Error::TokenDecode(e.to_string()))
}

fn timestamp(secs: Option<i64>, claim: &str) -> Result<DateTime<Utc>> {
    secs.and_then(|secs| DateTime::from_timestamp(secs, 0))
        .ok_or_else(|| Error::TokenDecode(format!("missing or invalid {} claim", claim)))
}
