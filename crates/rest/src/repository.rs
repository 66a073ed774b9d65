//! Typed access to the document store.
//!
//! A [`Versioned`] pairs a decoded entity with the stored document it came
//! from. [`Repository::save`] writes the entity back as a compare-and-swap
//! against that document's version, so a read-modify-write sequence fails
//! with a concurrent-modification conflict instead of losing an update.

use std::sync::Arc;

use carenet_persistence::{DocumentQuery, DocumentStore, StoredDocument, UniqueKey};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::domain::{
    Department, Hospital, HospitalSharing, MedicalRecord, Prescription, TestOrder, TestResult,
    User, collections,
};
use crate::error::{RestError, RestResult};

/// A domain entity stored as a JSON document.
pub trait Entity: Serialize + DeserializeOwned + Send + Sync {
    /// Collection holding this entity.
    const COLLECTION: &'static str;
    /// Name used in errors and audit events.
    const KIND: &'static str;

    /// The entity ID.
    fn id(&self) -> &str;
}

macro_rules! entity {
    ($ty:ty, $collection:expr, $kind:literal) => {
        impl Entity for $ty {
            const COLLECTION: &'static str = $collection;
            const KIND: &'static str = $kind;

            fn id(&self) -> &str {
                &self.id
            }
        }
    };
}

entity!(User, collections::USERS, "user");
entity!(Hospital, collections::HOSPITALS, "hospital");
entity!(Department, collections::DEPARTMENTS, "department");
entity!(HospitalSharing, collections::HOSPITAL_SHARING, "hospital_sharing");
entity!(MedicalRecord, collections::MEDICAL_RECORDS, "medical_record");
entity!(Prescription, collections::PRESCRIPTIONS, "prescription");
entity!(TestResult, collections::TEST_RESULTS, "test_result");
entity!(TestOrder, collections::TEST_ORDERS, "test_order");

/// An entity together with the stored document it was read from.
#[derive(Debug, Clone)]
pub struct Versioned<T> {
    doc: StoredDocument,
    /// The decoded entity. Mutate it, then pass the whole value to
    /// [`Repository::save`].
    pub value: T,
}

impl<T> Versioned<T> {
    /// Stored version the entity was read at.
    pub fn version(&self) -> u64 {
        self.doc.version()
    }

    /// Discards the storage metadata.
    pub fn into_inner(self) -> T {
        self.value
    }
}

impl<T: Entity> Versioned<T> {
    fn decode(doc: StoredDocument) -> RestResult<Self> {
        let value = doc.decode::<T>()?;
        Ok(Self { doc, value })
    }
}

/// Typed wrapper around a [`DocumentStore`].
pub struct Repository<S> {
    store: Arc<S>,
}

impl<S> Clone for Repository<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: DocumentStore> Repository<S> {
    /// Wraps a store.
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// The underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Reads an entity, or `None` when it does not exist.
    pub async fn find<T: Entity>(&self, id: &str) -> RestResult<Option<Versioned<T>>> {
        match self.store.read(T::COLLECTION, id).await? {
            Some(doc) => Ok(Some(Versioned::decode(doc)?)),
            None => Ok(None),
        }
    }

    /// Reads an entity, failing with not-found.
    pub async fn get<T: Entity>(&self, id: &str) -> RestResult<Versioned<T>> {
        self.find(id)
            .await?
            .ok_or_else(|| RestError::not_found(T::KIND, id))
    }

    /// Inserts a new entity, reserving its unique keys atomically.
    pub async fn insert<T: Entity>(
        &self,
        entity: T,
        unique_keys: Vec<UniqueKey>,
    ) -> RestResult<Versioned<T>> {
        let content = serde_json::to_value(&entity)
            .map_err(|e| RestError::internal(format!("Failed to encode {}: {}", T::KIND, e)))?;
        let doc = self
            .store
            .create(T::COLLECTION, entity.id(), content, unique_keys)
            .await?;
        Ok(Versioned { doc, value: entity })
    }

    /// Writes a modified entity back if nobody else wrote it since it was read.
    pub async fn save<T: Entity>(&self, entity: Versioned<T>) -> RestResult<Versioned<T>> {
        let content = serde_json::to_value(&entity.value)
            .map_err(|e| RestError::internal(format!("Failed to encode {}: {}", T::KIND, e)))?;
        let doc = self.store.update(&entity.doc, content).await?;
        Ok(Versioned {
            doc,
            value: entity.value,
        })
    }

    /// Removes an entity and releases its unique keys.
    pub async fn remove<T: Entity>(&self, id: &str) -> RestResult<()> {
        self.store.delete(T::COLLECTION, id).await?;
        Ok(())
    }

    /// Lists entities matching a query.
    pub async fn list<T: Entity>(&self, query: &DocumentQuery) -> RestResult<Vec<T>> {
        self.store
            .find(query)
            .await?
            .iter()
            .map(|doc| doc.decode::<T>().map_err(RestError::from))
            .collect()
    }

    /// Lists entities matching a query with their versions.
    pub async fn list_versioned<T: Entity>(
        &self,
        query: &DocumentQuery,
    ) -> RestResult<Vec<Versioned<T>>> {
        self.store
            .find(query)
            .await?
            .into_iter()
            .map(Versioned::decode)
            .collect()
    }

    /// Returns the first entity matching a query.
    pub async fn first<T: Entity>(&self, query: &DocumentQuery) -> RestResult<Option<Versioned<T>>> {
        match self.store.find_one(query).await? {
            Some(doc) => Ok(Some(Versioned::decode(doc)?)),
            None => Ok(None),
        }
    }

    /// Counts entities matching a query.
    pub async fn count(&self, query: &DocumentQuery) -> RestResult<u64> {
        Ok(self.store.count(query).await?)
    }
}

/// Starts a query over an entity's collection.
pub fn query<T: Entity>() -> DocumentQuery {
    DocumentQuery::new(T::COLLECTION)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Role;
    use carenet_persistence::backends::sqlite::SqliteBackend;
    use chrono::Utc;

    fn repo() -> Repository<SqliteBackend> {
        let backend = SqliteBackend::in_memory().unwrap();
        backend.init_schema().unwrap();
        Repository::new(Arc::new(backend))
    }

    fn user(id: &str) -> User {
        User::new(
            id.to_string(),
            &format!("{}@example.org", id),
            String::new(),
            id.to_string(),
            Role::Patient,
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_insert_get_save() {
        let repo = repo();
        repo.insert(user("u-1"), vec![]).await.unwrap();

        let mut loaded = repo.get::<User>("u-1").await.unwrap();
        assert_eq!(loaded.version(), 1);
        loaded.value.name = "Renamed".to_string();
        let saved = repo.save(loaded).await.unwrap();
        assert_eq!(saved.version(), 2);

        let reloaded = repo.get::<User>("u-1").await.unwrap();
        assert_eq!(reloaded.value.name, "Renamed");
    }

    #[tokio::test]
    async fn test_stale_save_conflicts() {
        let repo = repo();
        repo.insert(user("u-1"), vec![]).await.unwrap();

        let first = repo.get::<User>("u-1").await.unwrap();
        let second = repo.get::<User>("u-1").await.unwrap();
        repo.save(first).await.unwrap();

        let err = repo.save(second).await.unwrap_err();
        assert_eq!(err.code(), "concurrent_modification");
    }

    #[tokio::test]
    async fn test_missing_entity_is_not_found() {
        let repo = repo();
        let err = repo.get::<User>("nope").await.unwrap_err();
        assert_eq!(err.to_string(), "user not found: nope");
    }
}
