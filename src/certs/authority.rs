// src/certs/authority.rs
//! Local certificate authority.
//!
//! The directory signs identity certificates with a CA keypair loaded from
//! disk at startup. Each issued certificate gets a fresh P-256 keypair; the
//! private key is handed back to the caller once and never persisted.

use crate::certs::serial::SerialNumber;
use crate::error::{Error, Result};
use crate::models::certificate::Certificate;
use crate::models::vasp::{Entity, Vasp};
use crate::utils::serialization::write_atomic;
use chrono::{DateTime, Months, Utc};
use log::info;
use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose,
    IsCa, KeyPair, KeyUsagePurpose, SanType,
};
use std::fs;
use std::path::Path;
use x509_parser::pem::parse_x509_pem;
use x509_parser::prelude::{FromDer, X509Certificate};

/// Lifetime of every certificate this authority signs.
pub const VALIDITY_YEARS: u32 = 10;

pub const ROOT_COMMON_NAME: &str = "VASP Directory Root CA";

// X.520 postalCode
const POSTAL_CODE_OID: [u64; 4] = [2, 5, 4, 17];

/// A signed certificate plus the private key generated for it.
pub struct IssuedCertificate {
    pub certificate: Certificate,
    pub private_key_pem: String,
}

pub struct CertificateAuthority {
    issuer: rcgen::Certificate,
    key: KeyPair,
    name: String,
}

impl CertificateAuthority {
    /// Loads the CA certificate and its PKCS#8 signing key from PEM files.
    ///
    /// # Arguments
    /// * `cert_path` - PEM encoded CA certificate
    /// * `key_path` - PEM encoded private key matching the certificate
    ///
    /// # Returns
    /// * `Result<Self>` - `Configuration` if either file is missing, unparsable
    ///   or the key does not belong to the certificate
    pub fn load(cert_path: &Path, key_path: &Path) -> Result<Self> {
        let cert_pem = fs::read_to_string(cert_path).map_err(|e| {
            Error::Configuration(format!("could not read {}: {}", cert_path.display(), e))
        })?;
        let key_pem = fs::read_to_string(key_path).map_err(|e| {
            Error::Configuration(format!("could not read {}: {}", key_path.display(), e))
        })?;

        let key = KeyPair::from_pem(&key_pem)
            .map_err(|e| Error::Configuration(format!("invalid CA private key: {}", e)))?;

        let (_, pem) = parse_x509_pem(cert_pem.as_bytes())
            .map_err(|e| Error::Configuration(format!("invalid CA certificate PEM: {}", e)))?;
        let parsed = pem
            .parse_x509()
            .map_err(|e| Error::Configuration(format!("invalid CA certificate: {}", e)))?;

        if parsed.public_key().raw != key.public_key_der().as_slice() {
            return Err(Error::Configuration(
                "CA private key does not match the CA certificate".to_string(),
            ));
        }
        let name = parsed.subject().to_string();

        let params = CertificateParams::from_ca_cert_pem(&cert_pem)
            .map_err(|e| Error::Configuration(format!("invalid CA certificate: {}", e)))?;
        let issuer = params.self_signed(&key)?;

        info!("loaded certificate authority {}", name);
        Ok(CertificateAuthority { issuer, key, name })
    }

    /// Creates a self-signed root and writes it to `cert_path` / `key_path`.
    ///
    /// Existing files are left alone unless `force` is set.
    pub fn generate_root(cert_path: &Path, key_path: &Path, force: bool) -> Result<()> {
        if !force {
            for path in [cert_path, key_path] {
                if path.exists() {
                    return Err(Error::Configuration(format!(
                        "{} already exists",
                        path.display()
                    )));
                }
            }
        }

        let key = KeyPair::generate()?;
        let serial = SerialNumber::random()?;
        let (not_before, not_after) = validity_window(Utc::now())?;

        let mut name = DistinguishedName::new();
        name.push(DnType::CommonName, ROOT_COMMON_NAME);
        name.push(DnType::OrganizationName, "VASP Directory");

        let mut params = CertificateParams::default();
        params.distinguished_name = name;
        params.serial_number = Some(rcgen::SerialNumber::from_slice(&serial.to_bytes()));
        params.not_before = to_offset(not_before)?;
        params.not_after = to_offset(not_after)?;
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
        ];
        params.extended_key_usages = vec![
            ExtendedKeyUsagePurpose::ClientAuth,
            ExtendedKeyUsagePurpose::ServerAuth,
        ];

        let cert = params.self_signed(&key)?;

        write_atomic(cert_path, cert.pem().as_bytes(), false)?;
        write_atomic(key_path, key.serialize_pem().as_bytes(), true)?;

        info!(
            "generated root certificate authority at {}",
            cert_path.display()
        );
        Ok(())
    }

    /// Distinguished name of the issuing certificate.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Signs a certificate for the identity record with a fresh keypair.
    ///
    /// The subject is built from the record's subject fields; blank values
    /// are omitted. The certificate is valid for ten years from the moment of
    /// signing and may be used for both client and server TLS authentication.
    pub fn issue(&self, vasp: &Vasp) -> Result<IssuedCertificate> {
        let serial = SerialNumber::random()?;
        let (not_before, not_after) = validity_window(Utc::now())?;

        let mut params = CertificateParams::default();
        params.distinguished_name = subject_name(&vasp.entity);
        params.serial_number = Some(rcgen::SerialNumber::from_slice(&serial.to_bytes()));
        params.not_before = to_offset(not_before)?;
        params.not_after = to_offset(not_after)?;
        params.is_ca = IsCa::ExplicitNoCa;
        params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
        params.extended_key_usages = vec![
            ExtendedKeyUsagePurpose::ClientAuth,
            ExtendedKeyUsagePurpose::ServerAuth,
        ];
        params.use_authority_key_identifier_extension = true;
        if let Some(host) = url_host(&vasp.entity.url) {
            params.subject_alt_names = vec![SanType::DnsName(host.try_into()?)];
        }

        let leaf_key = KeyPair::generate()?;
        let cert = params.signed_by(&leaf_key, &self.issuer, &self.key)?;

        let (_, parsed) = X509Certificate::from_der(cert.der())
            .map_err(|_| Error::Certificate(rcgen::Error::CouldNotParseCertificate))?;

        let certificate = Certificate {
            serial_number: serial.to_hex(),
            subject: parsed.subject().to_string(),
            issuer: parsed.issuer().to_string(),
            not_before,
            not_after,
            key_usages: vec!["DigitalSignature".to_string()],
            extended_key_usages: vec!["ClientAuth".to_string(), "ServerAuth".to_string()],
            pem: cert.pem(),
        };

        Ok(IssuedCertificate {
            certificate,
            private_key_pem: leaf_key.serialize_pem(),
        })
    }
}

impl std::fmt::Debug for CertificateAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateAuthority")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

fn subject_name(entity: &Entity) -> DistinguishedName {
    let subject = &entity.name;
    let mut name = DistinguishedName::new();

    let fields = [
        (
            DnType::CommonName,
            first_filled(&[&subject.common_name, &entity.legal_name]),
        ),
        (DnType::OrganizationName, subject.organization.trim()),
        (
            DnType::OrganizationalUnitName,
            subject.organizational_unit.trim(),
        ),
        (DnType::LocalityName, subject.locality.trim()),
        (
            DnType::StateOrProvinceName,
            first_filled(&[&subject.state_province, &subject.inc_state_province]),
        ),
        (
            DnType::CountryName,
            first_filled(&[&subject.country_region, &subject.inc_country_region]),
        ),
        (
            DnType::CustomDnType(POSTAL_CODE_OID.to_vec()),
            subject.postal_code.trim(),
        ),
    ];

    for (kind, value) in fields {
        if !value.is_empty() {
            name.push(kind, value);
        }
    }
    name
}

fn first_filled<'a>(candidates: &[&'a String]) -> &'a str {
    candidates
        .iter()
        .map(|value| value.trim())
        .find(|value| !value.is_empty())
        .unwrap_or("")
}

fn url_host(url: &str) -> Option<String> {
    let parsed = reqwest::Url::parse(url.trim()).ok()?;
    let host = parsed.host_str()?;
    if host.parse::<std::net::IpAddr>().is_ok() || host.starts_with('[') {
        return None;
    }
    Some(host.to_string())
}

/// Signing time truncated to whole seconds, plus ten calendar years.
fn validity_window(now: DateTime<Utc>) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    let not_before = DateTime::from_timestamp(now.timestamp(), 0)
        .ok_or_else(|| Error::Configuration("system clock out of range".to_string()))?;
    let not_after = not_before
        .checked_add_months(Months::new(12 * VALIDITY_YEARS))
        .ok_or_else(|| Error::Configuration("certificate expiry out of range".to_string()))?;
    Ok((not_before, not_after))
}

fn to_offset(at: DateTime<Utc>) -> Result<::time::OffsetDateTime> {
    ::time::OffsetDateTime::from_unix_timestamp(at.timestamp())
        .map_err(|e| Error::Configuration(format!("invalid certificate time: {}", e)))
}
