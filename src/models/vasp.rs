// src/models/vasp.rs
//! Identity record (VASP) data model.
//!
//! A [`Vasp`] is a registered participant in the directory. It is created
//! unverified by the Register RPC and becomes verified once a certificate
//! issued by the directory's certificate authority is attached to it.

use crate::models::certificate::Certificate;
use serde::{Deserialize, Serialize};

/// A registered participant's identity and metadata entry in the directory.
///
/// # Fields
/// - `id`: assigned by the store on creation, immutable thereafter (0 = unassigned)
/// - `entity`: participant-supplied attributes
/// - `certificate`: present once verification succeeds
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Vasp {
    #[serde(default)]
    pub id: u64,

    pub entity: Entity,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate: Option<Certificate>,
}

impl Vasp {
    /// Wraps an entity in a new, unverified identity record.
    pub fn new(entity: Entity) -> Self {
        Vasp {
            id: 0,
            entity,
            certificate: None,
        }
    }

    pub fn is_verified(&self) -> bool {
        self.certificate.is_some()
    }

    /// Returns a copy of the record without its certificate, for broad queries.
    pub fn without_certificate(mut self) -> Self {
        self.certificate = None;
        self
    }
}

/// Entity attributes supplied at registration.
///
/// These are free text at this layer; no semantic validation is applied.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Entity {
    pub legal_name: String,
    pub address: String,
    pub url: String,
    pub category: String,
    pub country: String,

    /// Subject fields used when a certificate is issued for this entity.
    pub name: SubjectName,
}

/// Certificate subject fields for an entity.
///
/// The `inc_*` variants hold the jurisdiction of incorporation and are used
/// as fallbacks when the primary state or country is blank.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct SubjectName {
    pub common_name: String,
    pub organization: String,
    pub organizational_unit: String,
    pub locality: String,
    pub state_province: String,
    pub inc_state_province: String,
    pub country_region: String,
    pub inc_country_region: String,
    pub postal_code: String,
}
