// src/storage/file_store.rs
//! Embedded file-backed directory store.
//!
//! Layout under the store root:
//!
//! ```text
//! sequence.json        next identifier to assign
//! records/<id>.json    one document per identity record
//! ```
//!
//! The full index is loaded into memory on open; every mutation is written
//! through to disk with an atomic replace before it becomes visible. The
//! sequence is persisted ahead of the record, so identifiers are never
//! reused even after the highest record is destroyed.

use crate::error::{Error, Result};
use crate::models::vasp::Vasp;
use crate::storage::memory_store::Records;
use crate::storage::{Query, Store};
use crate::utils::serialization::{read_json, write_json_atomic};
use async_trait::async_trait;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tokio::task;

const RECORDS_DIR: &str = "records";
const SEQUENCE_FILE: &str = "sequence.json";

#[derive(Serialize, Deserialize)]
struct Sequence {
    next_id: u64,
}

pub struct FileStore {
    root: PathBuf,
    records: RwLock<Option<Records>>,
}

impl FileStore {
    /// Opens (or initializes) a store rooted at `path`.
    ///
    /// # Returns
    /// * `Result<Self>` - `StorageIo` if the directory cannot be created or a
    ///   record on disk does not decode
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let root = path.as_ref().to_path_buf();
        let records = blocking({
            let root = root.clone();
            move || load(&root)
        })
        .await?;

        info!(
            "opened file store at {} (next id {})",
            root.display(),
            records.next_id()
        );
        Ok(FileStore {
            root,
            records: RwLock::new(Some(records)),
        })
    }

    fn record_path(&self, id: u64) -> PathBuf {
        self.root.join(RECORDS_DIR).join(format!("{}.json", id))
    }

    async fn write_record(&self, vasp: Vasp) -> Result<()> {
        let path = self.record_path(vasp.id);
        blocking(move || write_json_atomic(&path, &vasp, false)).await
    }
}

fn load(root: &Path) -> io::Result<Records> {
    let dir = root.join(RECORDS_DIR);
    fs::create_dir_all(&dir)?;

    let sequence: Option<Sequence> = read_json(&root.join(SEQUENCE_FILE))?;
    let mut records = Records::new(sequence.map(|s| s.next_id).unwrap_or(1));

    for entry in fs::read_dir(&dir)? {
        let path = entry?.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
            continue;
        }
        if let Some(vasp) = read_json::<Vasp>(&path)? {
            records.put(vasp);
        }
    }
    Ok(records)
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> io::Result<T> + Send + 'static,
    T: Send + 'static,
{
    task::spawn_blocking(f)
        .await
        .map_err(|e| Error::StorageIo(e.to_string()))?
        .map_err(|e| Error::StorageIo(e.to_string()))
}

#[async_trait]
impl Store for FileStore {
    async fn create(&self, mut vasp: Vasp) -> Result<u64> {
        let mut guard = self.records.write().await;
        let records = guard.as_mut().ok_or(Error::StoreClosed)?;

        let id = records.next_id();
        let sequence_path = self.root.join(SEQUENCE_FILE);
        blocking(move || {
            write_json_atomic(&sequence_path, &Sequence { next_id: id + 1 }, false)
        })
        .await?;
        records.advance();

        vasp.id = id;
        self.write_record(vasp.clone()).await?;
        records.put(vasp);

        debug!("created record {}", id);
        Ok(id)
    }

    async fn retrieve(&self, id: u64) -> Result<Vasp> {
        let guard = self.records.read().await;
        guard.as_ref().ok_or(Error::StoreClosed)?.get(id)
    }

    async fn update(&self, vasp: &Vasp) -> Result<()> {
        let mut guard = self.records.write().await;
        let records = guard.as_mut().ok_or(Error::StoreClosed)?;
        if !records.contains(vasp.id) {
            return Err(Error::NotFound);
        }

        self.write_record(vasp.clone()).await?;
        records.put(vasp.clone());
        Ok(())
    }

    async fn destroy(&self, id: u64) -> Result<()> {
        let mut guard = self.records.write().await;
        let records = guard.as_mut().ok_or(Error::StoreClosed)?;
        if !records.contains(id) {
            return Err(Error::NotFound);
        }

        let path = self.record_path(id);
        blocking(move || match fs::remove_file(&path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        })
        .await?;
        records.remove(id)?;

        debug!("destroyed record {}", id);
        Ok(())
    }

    async fn search(&self, query: &Query) -> Result<Vec<Vasp>> {
        query.validate()?;
        let guard = self.records.read().await;
        Ok(guard.as_ref().ok_or(Error::StoreClosed)?.search(query))
    }

    async fn close(&self) -> Result<()> {
        if self.records.write().await.take().is_some() {
            info!("closed file store at {}", self.root.display());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::tests::record;
    use crate::storage::{COUNTRY_FIELD, NAME_FIELD};

    #[tokio::test]
    async fn records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();

        let store = FileStore::open(dir.path()).await.unwrap();
        let acme = store.create(record("Acme", "US")).await.unwrap();
        let other = store.create(record("Other", "SG")).await.unwrap();

        let mut updated = store.retrieve(other).await.unwrap();
        updated.entity.url = "https://other.example".into();
        store.update(&updated).await.unwrap();
        store.close().await.unwrap();

        let reopened = FileStore::open(dir.path()).await.unwrap();
        assert_eq!(reopened.retrieve(acme).await.unwrap().entity.legal_name, "Acme");
        assert_eq!(reopened.retrieve(other).await.unwrap(), updated);

        let hits = reopened
            .search(&Query::new().with(NAME_FIELD, "acme").with(COUNTRY_FIELD, "US"))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, acme);
    }

    #[tokio::test]
    async fn ids_are_not_reused_across_reopen() {
        let dir = tempfile::tempdir().unwrap();

        let store = FileStore::open(dir.path()).await.unwrap();
        store.create(record("Acme", "US")).await.unwrap();
        let last = store.create(record("Other", "US")).await.unwrap();
        store.destroy(last).await.unwrap();
        store.close().await.unwrap();

        let reopened = FileStore::open(dir.path()).await.unwrap();
        assert!(matches!(reopened.retrieve(last).await, Err(Error::NotFound)));
        let next = reopened.create(record("Third", "US")).await.unwrap();
        assert!(next > last);
    }

    #[tokio::test]
    async fn update_and_destroy_require_existing_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();

        let mut ghost = record("Ghost", "US");
        ghost.id = 42;
        assert!(matches!(store.update(&ghost).await, Err(Error::NotFound)));
        assert!(matches!(store.destroy(42).await, Err(Error::NotFound)));
        assert!(!dir.path().join(RECORDS_DIR).join("42.json").exists());
    }

    #[tokio::test]
    async fn corrupt_record_fails_open() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join(RECORDS_DIR)).unwrap();
        fs::write(dir.path().join(RECORDS_DIR).join("1.json"), "{not json").unwrap();

        assert!(matches!(
            FileStore::open(dir.path()).await,
            Err(Error::StorageIo(_))
        ));
    }

    #[tokio::test]
    async fn failed_record_write_is_storage_io() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();
        let records_dir = dir.path().join(RECORDS_DIR);

        fs::remove_dir_all(&records_dir).unwrap();
        fs::write(&records_dir, "").unwrap();
        assert!(matches!(
            store.create(record("Acme", "US")).await,
            Err(Error::StorageIo(_))
        ));
        assert!(matches!(store.retrieve(1).await, Err(Error::NotFound)));

        fs::remove_file(&records_dir).unwrap();
        let id = store.create(record("Acme", "US")).await.unwrap();
        assert_eq!(id, 2);
    }

    #[tokio::test]
    async fn closed_store_rejects_calls() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();
        store.close().await.unwrap();

        assert!(matches!(
            store.create(record("Acme", "US")).await,
            Err(Error::StoreClosed)
        ));
        assert!(matches!(store.destroy(1).await, Err(Error::StoreClosed)));
    }
}
