// src/storage/mod.rs
//! Directory store abstraction.
//!
//! Identity records are persisted through the [`Store`] trait. The backend is
//! chosen from a connection string by [`open`]:
//!
//! | DSN                         | Backend          |
//! |-----------------------------|------------------|
//! | `/var/lib/vaspdir`          | [`FileStore`]    |
//! | `file:///var/lib/vaspdir`   | [`FileStore`]    |
//! | `memory:`                   | [`MemoryStore`]  |
//!
//! Any other scheme fails with `UnsupportedBackend`.

use crate::error::{Error, Result};
use crate::models::vasp::Vasp;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

pub mod file_store;
pub mod memory_store;

pub use file_store::FileStore;
pub use memory_store::MemoryStore;

pub const NAME_FIELD: &str = "name";
pub const COUNTRY_FIELD: &str = "country";

/// Persistence contract for identity records.
///
/// Implementations serialize their own writes; callers may share one store
/// across any number of tasks.
#[async_trait]
pub trait Store: Send + Sync {
    /// Assigns the next identifier to `vasp`, persists it and returns the id.
    async fn create(&self, vasp: Vasp) -> Result<u64>;

    async fn retrieve(&self, id: u64) -> Result<Vasp>;

    /// Replaces an existing record; `NotFound` if its id was never created.
    async fn update(&self, vasp: &Vasp) -> Result<()>;

    async fn destroy(&self, id: u64) -> Result<()>;

    /// Returns every record matching the query, ordered by id.
    async fn search(&self, query: &Query) -> Result<Vec<Vasp>>;

    /// Releases backend resources. Every later call fails with `StoreClosed`.
    async fn close(&self) -> Result<()>;
}

/// Search criteria keyed by field name.
///
/// Within a field a record matches if it equals any of the listed values;
/// across fields every criterion must match. Values are compared exactly
/// after trimming whitespace, ignoring ASCII case. Blank values are ignored,
/// so a query with no usable values matches every record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query(BTreeMap<String, Vec<String>>);

impl Query {
    pub fn new() -> Self {
        Query::default()
    }

    /// Adds an accepted value for `field`.
    pub fn with(mut self, field: &str, value: impl Into<String>) -> Self {
        self.0.entry(field.to_string()).or_default().push(value.into());
        self
    }

    pub fn with_all<I, S>(mut self, field: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for value in values {
            self = self.with(field, value);
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0
            .values()
            .all(|values| values.iter().all(|v| v.trim().is_empty()))
    }

    /// Rejects fields the store does not index.
    pub fn validate(&self) -> Result<()> {
        match self
            .0
            .keys()
            .find(|field| field.as_str() != NAME_FIELD && field.as_str() != COUNTRY_FIELD)
        {
            Some(field) => Err(Error::InvalidRequest(format!(
                "unknown search field {:?}",
                field
            ))),
            None => Ok(()),
        }
    }

    pub fn matches(&self, vasp: &Vasp) -> bool {
        self.0.iter().all(|(field, values)| {
            let mut wanted = values
                .iter()
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .peekable();
            if wanted.peek().is_none() {
                return true;
            }

            let actual = match field.as_str() {
                NAME_FIELD => vasp.entity.legal_name.trim(),
                COUNTRY_FIELD => vasp.entity.country.trim(),
                _ => return false,
            };
            wanted.any(|v| v.eq_ignore_ascii_case(actual))
        })
    }
}

/// Opens the store selected by a connection string.
///
/// # Arguments
/// * `dsn` - `scheme:path` or a bare filesystem path
///
/// # Returns
/// * `Result<Arc<dyn Store>>` - shared handle to the opened backend
pub async fn open(dsn: &str) -> Result<Arc<dyn Store>> {
    let dsn = dsn.trim();
    if dsn.is_empty() {
        return Err(Error::Configuration(
            "database connection string is empty".to_string(),
        ));
    }

    let (scheme, path) = split_dsn(dsn);
    match scheme.as_deref() {
        None | Some("file") => {
            if path.is_empty() {
                return Err(Error::Configuration(format!(
                    "no path in database connection string {:?}",
                    dsn
                )));
            }
            Ok(Arc::new(FileStore::open(path).await?))
        }
        Some("memory") => Ok(Arc::new(MemoryStore::new())),
        Some(other) => Err(Error::UnsupportedBackend(other.to_string())),
    }
}

/// Splits `scheme:rest`, stripping a leading `//` authority marker.
///
/// Single-letter prefixes are treated as Windows drive letters, not schemes.
fn split_dsn(dsn: &str) -> (Option<String>, &str) {
    let Some((scheme, rest)) = dsn.split_once(':') else {
        return (None, dsn);
    };

    let is_scheme = scheme.len() > 1
        && scheme.starts_with(|c: char| c.is_ascii_alphabetic())
        && scheme
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
    if !is_scheme {
        return (None, dsn);
    }

    let rest = rest.strip_prefix("//").unwrap_or(rest);
    (Some(scheme.to_ascii_lowercase()), rest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::vasp::Entity;

    pub(crate) fn record(name: &str, country: &str) -> Vasp {
        Vasp::new(Entity {
            legal_name: name.to_string(),
            country: country.to_string(),
            ..Default::default()
        })
    }

    #[test]
    fn splits_connection_strings() {
        assert_eq!(split_dsn("/var/lib/vaspdir"), (None, "/var/lib/vaspdir"));
        assert_eq!(
            split_dsn("file:///var/lib/vaspdir"),
            (Some("file".to_string()), "/var/lib/vaspdir")
        );
        assert_eq!(split_dsn("memory:"), (Some("memory".to_string()), ""));
        assert_eq!(
            split_dsn("LevelDB:///tmp/db"),
            (Some("leveldb".to_string()), "/tmp/db")
        );
        assert_eq!(split_dsn(r"C:\data\vasps"), (None, r"C:\data\vasps"));
    }

    #[tokio::test]
    async fn open_dispatches_on_scheme() {
        let dir = tempfile::tempdir().unwrap();

        let bare = open(dir.path().join("bare").to_str().unwrap()).await.unwrap();
        bare.create(record("Acme", "US")).await.unwrap();
        assert!(dir.path().join("bare").exists());

        let dsn = format!("file://{}", dir.path().join("explicit").display());
        open(&dsn).await.unwrap();
        assert!(dir.path().join("explicit").exists());

        open("memory:").await.unwrap();

        assert!(matches!(
            open("postgres://localhost/vasps").await,
            Err(Error::UnsupportedBackend(scheme)) if scheme == "postgres"
        ));
        assert!(matches!(open("  ").await, Err(Error::Configuration(_))));
        assert!(matches!(open("file:").await, Err(Error::Configuration(_))));
    }

    #[test]
    fn query_is_conjunctive_across_fields() {
        let acme_us = record("Acme", "US");
        let acme_sg = record("Acme", "SG");
        let other = record("Other", "US");

        let query = Query::new().with(NAME_FIELD, "acme ").with(COUNTRY_FIELD, "us");
        assert!(query.matches(&acme_us));
        assert!(!query.matches(&acme_sg));
        assert!(!query.matches(&other));

        let either = Query::new().with_all(COUNTRY_FIELD, ["SG", "US"]);
        assert!(either.matches(&acme_sg));
        assert!(either.matches(&other));
    }

    #[test]
    fn query_matches_whole_values_only() {
        let query = Query::new().with(NAME_FIELD, "Acme");
        assert!(!query.matches(&record("Acme Exchange", "US")));
    }

    #[test]
    fn blank_and_unknown_criteria() {
        let blank = Query::new().with(NAME_FIELD, "  ");
        assert!(blank.is_empty());
        assert!(blank.matches(&record("Acme", "US")));

        let unknown = Query::new().with("website", "acme.example");
        assert!(!unknown.is_empty());
        assert!(matches!(unknown.validate(), Err(Error::InvalidRequest(_))));
    }
}
