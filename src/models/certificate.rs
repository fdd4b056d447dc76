// src/models/certificate.rs
//! Issued certificate record.
//!
//! The directory keeps the signed certificate on the identity record it was
//! issued for; a certificate is never shared across records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A leaf certificate signed by the directory's certificate authority.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Certificate {
    /// Hex-encoded (big-endian) random serial number, at most 20 octets.
    pub serial_number: String,

    /// Subject distinguished name, e.g. `CN=acme.example, O=Acme, C=US`.
    pub subject: String,

    /// Distinguished name of the issuing authority.
    pub issuer: String,

    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,

    pub key_usages: Vec<String>,
    pub extended_key_usages: Vec<String>,

    /// PEM-encoded DER certificate.
    pub pem: String,
}
