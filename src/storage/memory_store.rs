// src/storage/memory_store.rs
//! In-memory directory store.
//!
//! Records live in a map guarded by an async lock and vanish when the process
//! exits. Used for tests and throwaway deployments (`memory:`); the file
//! store layers persistence over the same [`Records`] index.

use crate::error::{Error, Result};
use crate::models::vasp::Vasp;
use crate::storage::{Query, Store};
use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

/// Id-ordered record index with a monotonic id sequence.
#[derive(Debug, Default)]
pub(crate) struct Records {
    next_id: u64,
    vasps: BTreeMap<u64, Vasp>,
}

impl Records {
    /// Starts the sequence at `next_id`; id 0 is never handed out.
    pub(crate) fn new(next_id: u64) -> Self {
        Records {
            next_id: next_id.max(1),
            vasps: BTreeMap::new(),
        }
    }

    pub(crate) fn next_id(&self) -> u64 {
        self.next_id
    }

    pub(crate) fn advance(&mut self) {
        self.next_id += 1;
    }

    /// Inserts a record under its own id, keeping the sequence ahead of it.
    pub(crate) fn put(&mut self, vasp: Vasp) {
        if vasp.id >= self.next_id {
            self.next_id = vasp.id + 1;
        }
        self.vasps.insert(vasp.id, vasp);
    }

    pub(crate) fn get(&self, id: u64) -> Result<Vasp> {
        self.vasps.get(&id).cloned().ok_or(Error::NotFound)
    }

    pub(crate) fn contains(&self, id: u64) -> bool {
        self.vasps.contains_key(&id)
    }

    pub(crate) fn remove(&mut self, id: u64) -> Result<Vasp> {
        self.vasps.remove(&id).ok_or(Error::NotFound)
    }

    pub(crate) fn search(&self, query: &Query) -> Vec<Vasp> {
        self.vasps
            .values()
            .filter(|vasp| query.matches(vasp))
            .cloned()
            .collect()
    }
}

pub struct MemoryStore {
    records: RwLock<Option<Records>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore {
            records: RwLock::new(Some(Records::new(1))),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create(&self, mut vasp: Vasp) -> Result<u64> {
        let mut guard = self.records.write().await;
        let records = guard.as_mut().ok_or(Error::StoreClosed)?;

        vasp.id = records.next_id();
        let id = vasp.id;
        records.put(vasp);
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
        records.put(vasp.clone());
        Ok(())
    }

    async fn destroy(&self, id: u64) -> Result<()> {
        let mut guard = self.records.write().await;
        guard.as_mut().ok_or(Error::StoreClosed)?.remove(id)?;
        Ok(())
    }

    async fn search(&self, query: &Query) -> Result<Vec<Vasp>> {
        query.validate()?;
        let guard = self.records.read().await;
        Ok(guard.as_ref().ok_or(Error::StoreClosed)?.search(query))
    }

    async fn close(&self) -> Result<()> {
        self.records.write().await.take();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::tests::record;
    use crate::storage::NAME_FIELD;

    #[tokio::test]
    async fn create_then_retrieve_round_trips() {
        let store = MemoryStore::new();
        let input = record("Acme", "US");

        let id = store.create(input.clone()).await.unwrap();
        assert_eq!(id, 1);

        let stored = store.retrieve(id).await.unwrap();
        assert_eq!(stored, Vasp { id, ..input });
    }

    #[tokio::test]
    async fn ids_are_monotonic_after_destroy() {
        let store = MemoryStore::new();
        let first = store.create(record("Acme", "US")).await.unwrap();
        store.destroy(first).await.unwrap();
        let second = store.create(record("Other", "US")).await.unwrap();
        assert!(second > first);
    }

    #[tokio::test]
    async fn missing_records_are_not_found() {
        let store = MemoryStore::new();
        assert!(matches!(store.retrieve(7).await, Err(Error::NotFound)));
        assert!(matches!(store.destroy(7).await, Err(Error::NotFound)));

        let mut ghost = record("Ghost", "US");
        ghost.id = 7;
        assert!(matches!(store.update(&ghost).await, Err(Error::NotFound)));
        assert!(matches!(store.retrieve(7).await, Err(Error::NotFound)));
    }

    #[tokio::test]
    async fn search_returns_only_matches() {
        let store = MemoryStore::new();
        let acme = store.create(record("Acme", "US")).await.unwrap();
        store.create(record("Other", "US")).await.unwrap();

        let hits = store
            .search(&Query::new().with(NAME_FIELD, "Acme"))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, acme);

        let none = store
            .search(&Query::new().with(NAME_FIELD, "Nonexistent"))
            .await
            .unwrap();
        assert!(none.is_empty());

        assert_eq!(store.search(&Query::new()).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn closed_store_rejects_calls() {
        let store = MemoryStore::new();
        let id = store.create(record("Acme", "US")).await.unwrap();
        store.close().await.unwrap();

        assert!(matches!(store.retrieve(id).await, Err(Error::StoreClosed)));
        assert!(matches!(
            store.create(record("Other", "US")).await,
            Err(Error::StoreClosed)
        ));
        assert!(matches!(
            store.search(&Query::new()).await,
            Err(Error::StoreClosed)
        ));
    }
}
