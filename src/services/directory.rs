// src/services/directory.rs
//! Directory service.
//!
//! Orchestrates the RPC surface of the directory: registration, lookup and
//! search go straight to the store, while verification signs a certificate
//! with the local certificate authority and writes it back onto the record.
//! Every operation reports failures as an [`RpcError`] in the reply body.

use crate::certs::CertificateAuthority;
use crate::error::{Error, Result};
use crate::models::vasp::{Entity, Vasp};
use crate::storage::{Query, Store, COUNTRY_FIELD, NAME_FIELD};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Structured failure returned to callers instead of a transport error.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
}

impl From<&Error> for RpcError {
    fn from(err: &Error) -> Self {
        RpcError {
            code: err.code(),
            message: err.to_string(),
        }
    }
}

/// Reply envelope carrying exactly one of a result or an error.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Reply<T> {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<T>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl<T> From<Result<T>> for Reply<T> {
    fn from(outcome: Result<T>) -> Self {
        match outcome {
            Ok(result) => Reply {
                result: Some(result),
                error: None,
            },
            Err(err) => Reply {
                result: None,
                error: Some(RpcError::from(&err)),
            },
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RegisterRequest {
    pub entity: Entity,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RegisterReply {
    pub id: u64,
}

/// Lookup by identifier, or by exact name when no identifier is given.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct LookupRequest {
    pub id: Option<u64>,
    pub name: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct SearchRequest {
    pub name: Vec<String>,
    pub country: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SearchReply {
    pub vasps: Vec<Vasp>,
}

/// A verified record, plus the subject's private key when it was just issued.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct VerifyReply {
    pub vasp: Vasp,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,
}

pub struct DirectoryService {
    store: Arc<dyn Store>,
    ca: Option<Arc<CertificateAuthority>>,

    // Serializes issuance so concurrent Verify calls for one record sign once.
    verify_lock: Mutex<()>,
}

impl DirectoryService {
    /// # Arguments
    /// * `store` - backing directory store
    /// * `ca` - signing authority; `None` makes Verify fail with
    ///   `CertificateAuthorityNotLoaded`
    pub fn new(store: Arc<dyn Store>, ca: Option<Arc<CertificateAuthority>>) -> Self {
        DirectoryService {
            store,
            ca,
            verify_lock: Mutex::new(()),
        }
    }

    /// Stores the entity as a new, unverified record and returns its id.
    pub async fn register(&self, request: RegisterRequest) -> Result<RegisterReply> {
        let id = self
            .store
            .create(Vasp::new(request.entity))
            .await
            .map_err(|e| {
                warn!("could not register entity: {}", e);
                e
            })?;

        info!("registered record {}", id);
        Ok(RegisterReply { id })
    }

    /// Looks a record up by id, or by name when no id is supplied.
    ///
    /// Names must match a record's legal name exactly, including case, and
    /// must be unambiguous: zero or several matches are both `NotFound`.
    /// Certificates are only returned for lookups by id.
    pub async fn lookup(&self, request: LookupRequest) -> Result<Vasp> {
        if let Some(id) = request.id.filter(|id| *id != 0) {
            return self.store.retrieve(id).await;
        }

        let name = request.name.unwrap_or_default();
        if name.trim().is_empty() {
            return Err(Error::InvalidRequest(
                "lookup requires an id or a name".to_string(),
            ));
        }

        let mut hits: Vec<Vasp> = self
            .store
            .search(&Query::new().with(NAME_FIELD, name.as_str()))
            .await?
            .into_iter()
            .filter(|vasp| vasp.entity.legal_name == name)
            .collect();
        match hits.len() {
            1 => Ok(hits.remove(0).without_certificate()),
            _ => Err(Error::NotFound),
        }
    }

    /// Returns records matching every supplied field, without certificates.
    pub async fn search(&self, request: SearchRequest) -> Result<SearchReply> {
        let query = Query::new()
            .with_all(NAME_FIELD, request.name)
            .with_all(COUNTRY_FIELD, request.country);
        if query.is_empty() {
            return Err(Error::InvalidRequest(
                "search requires a name or a country".to_string(),
            ));
        }

        let vasps = self
            .store
            .search(&query)
            .await?
            .into_iter()
            .map(Vasp::without_certificate)
            .collect();
        Ok(SearchReply { vasps })
    }

    /// Issues and attaches a certificate to record `id`.
    ///
    /// Already verified records are returned unchanged, without a key.
    pub async fn verify(&self, id: u64) -> Result<VerifyReply> {
        let _guard = self.verify_lock.lock().await;

        let mut vasp = self.store.retrieve(id).await?;
        if vasp.is_verified() {
            return Ok(VerifyReply {
                vasp,
                private_key: None,
            });
        }

        let ca = self.ca.as_ref().ok_or(Error::CertificateAuthorityNotLoaded)?;
        let issued = ca.issue(&vasp)?;
        let serial = issued.certificate.serial_number.clone();

        vasp.certificate = Some(issued.certificate);
        self.store.update(&vasp).await?;

        info!("verified record {} with certificate {}", id, serial);
        Ok(VerifyReply {
            vasp,
            private_key: Some(issued.private_key_pem),
        })
    }

    /// Unverified records awaiting a certificate.
    pub async fn pending(&self) -> Result<SearchReply> {
        let vasps = self
            .store
            .search(&Query::new())
            .await?
            .into_iter()
            .filter(|vasp| !vasp.is_verified())
            .collect();
        Ok(SearchReply { vasps })
    }

    pub async fn close(&self) -> Result<()> {
        self.store.close().await
    }
}
