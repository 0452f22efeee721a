//! In-memory relationship store.
//!
//! Tuples live in a `HashSet` per store for O(1) write/delete; reads scan
//! and filter. Models are append-only with sortable ulid ids; every write
//! and delete lands in an append-only changelog with a ulid continuation
//! token.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::instrument;
use ulid::{Generator, Ulid};

use rebac_domain::error::{DomainError, DomainResult};
use rebac_domain::graph::TypeSystemResolver;
use rebac_domain::model::{AuthorizationModel, TupleKey, TypeSystem};
use rebac_domain::storage::{
    ReadFilter, ReadStartingWithUserFilter, StorageError, StorageResult, StoredTuple,
    TupleIterator, TupleIteratorBox, TupleReader,
};

/// Store metadata; the multi-tenancy boundary.
#[derive(Debug, Clone)]
pub struct Store {
    pub id: String,
    pub name: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// A model as written to a store.
#[derive(Debug, Clone)]
pub struct StoredAuthorizationModel {
    /// Sortable model id (ulid); the lexicographically greatest is latest.
    pub id: String,
    pub model: Arc<AuthorizationModel>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Changelog operation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TupleOperation {
    Write,
    Delete,
}

/// One changelog entry.
#[derive(Debug, Clone)]
pub struct TupleChange {
    /// Monotonic insertion ordinal (ulid) within the store.
    pub ulid: String,
    pub operation: TupleOperation,
    pub tuple: TupleKey,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// A page of changelog entries.
#[derive(Debug, Clone)]
pub struct ChangePage {
    pub changes: Vec<TupleChange>,
    /// Token to resume from; `None` when the log is exhausted.
    pub continuation_token: Option<String>,
}

/// In-memory store implementing the reader contract and type-system
/// resolution.
///
/// Thread-safe via `DashMap`; suitable as the backing store for tests and
/// single-node deployments.
pub struct MemoryDataStore {
    stores: DashMap<String, Store>,
    tuples: DashMap<String, HashSet<StoredTuple>>,
    /// Models in insertion order; ulid ids make the last entry the latest.
    models: DashMap<String, Vec<StoredAuthorizationModel>>,
    /// Validated type systems keyed by `store_id/model_id`.
    typesystems: DashMap<String, Arc<TypeSystem>>,
    changelog: DashMap<String, Vec<TupleChange>>,
    /// Monotonic within a millisecond, so ids and ordinals stay sortable.
    ulids: Mutex<Generator>,
    open_iterators: Arc<AtomicUsize>,
}

impl Default for MemoryDataStore {
    fn default() -> Self {
        Self {
            stores: DashMap::new(),
            tuples: DashMap::new(),
            models: DashMap::new(),
            typesystems: DashMap::new(),
            changelog: DashMap::new(),
            ulids: Mutex::new(Generator::new()),
            open_iterators: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl MemoryDataStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_ulid(&self) -> String {
        let mut generator = self.ulids.lock().expect("ulid generator lock poisoned");
        generator
            .generate()
            .map(|ulid| ulid.to_string())
            .unwrap_or_else(|_| Ulid::new().to_string())
    }

    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Iterators handed out and not yet released; zero between requests.
    pub fn open_iterators(&self) -> usize {
        self.open_iterators.load(Ordering::SeqCst)
    }

    #[instrument(skip(self))]
    pub fn create_store(&self, id: &str, name: &str) -> StorageResult<Store> {
        if id.is_empty() || name.is_empty() {
            return Err(StorageError::InvalidInput {
                message: "store id and name cannot be empty".to_string(),
            });
        }

        let now = chrono::Utc::now();
        let store = Store {
            id: id.to_string(),
            name: name.to_string(),
            created_at: now,
            updated_at: now,
        };

        use dashmap::mapref::entry::Entry;
        match self.stores.entry(id.to_string()) {
            Entry::Occupied(_) => Err(StorageError::StoreAlreadyExists {
                store_id: id.to_string(),
            }),
            Entry::Vacant(entry) => {
                entry.insert(store.clone());
                self.tuples.entry(id.to_string()).or_default();
                Ok(store)
            }
        }
    }

    pub fn get_store(&self, id: &str) -> StorageResult<Store> {
        self.stores
            .get(id)
            .map(|s| s.value().clone())
            .ok_or_else(|| StorageError::StoreNotFound {
                store_id: id.to_string(),
            })
    }

    pub fn delete_store(&self, id: &str) -> StorageResult<()> {
        if self.stores.remove(id).is_none() {
            return Err(StorageError::StoreNotFound {
                store_id: id.to_string(),
            });
        }
        self.tuples.remove(id);
        self.models.remove(id);
        self.changelog.remove(id);
        self.typesystems.retain(|key, _| !key.starts_with(&format!("{id}/")));
        Ok(())
    }

    /// Writes a validated model and returns its sortable id. Models are
    /// append-only; the returned id becomes the store's latest.
    #[instrument(skip(self, model))]
    pub fn write_authorization_model(
        &self,
        store_id: &str,
        model: AuthorizationModel,
    ) -> DomainResult<String> {
        self.get_store(store_id).map_err(DomainError::Storage)?;

        let typesystem = Arc::new(TypeSystem::new_and_validate(model)?);
        let model_id = self.next_ulid();

        self.typesystems
            .insert(format!("{store_id}/{model_id}"), Arc::clone(&typesystem));
        self.models
            .entry(store_id.to_string())
            .or_default()
            .push(StoredAuthorizationModel {
                id: model_id.clone(),
                model: Arc::new(typesystem.model().clone()),
                created_at: chrono::Utc::now(),
            });

        Ok(model_id)
    }

    /// Applies a write/delete batch. The whole batch is validated before
    /// any change lands, so a failing batch leaves the store untouched.
    #[instrument(skip(self, writes, deletes), fields(writes = writes.len(), deletes = deletes.len()))]
    pub fn write_tuples(
        &self,
        store_id: &str,
        writes: Vec<StoredTuple>,
        deletes: Vec<StoredTuple>,
    ) -> StorageResult<()> {
        self.get_store(store_id)?;

        let mut set = self
            .tuples
            .entry(store_id.to_string())
            .or_default();

        for tuple in &writes {
            if set.contains(tuple) {
                return Err(StorageError::DuplicateTuple {
                    tuple: tuple.to_tuple_key().to_string(),
                });
            }
        }
        for tuple in &deletes {
            if !set.contains(tuple) {
                return Err(StorageError::TupleNotFound {
                    tuple: tuple.to_tuple_key().to_string(),
                });
            }
        }

        let now = chrono::Utc::now();
        let mut log = self.changelog.entry(store_id.to_string()).or_default();

        for tuple in deletes {
            set.remove(&tuple);
            log.push(TupleChange {
                ulid: self.next_ulid(),
                operation: TupleOperation::Delete,
                tuple: tuple.to_tuple_key(),
                timestamp: now,
            });
        }
        for tuple in writes {
            let key = tuple.to_tuple_key();
            set.insert(tuple);
            log.push(TupleChange {
                ulid: self.next_ulid(),
                operation: TupleOperation::Write,
                tuple: key,
                timestamp: now,
            });
        }

        Ok(())
    }

    /// Reads changelog entries after the continuation token.
    pub fn read_changes(
        &self,
        store_id: &str,
        continuation_token: Option<&str>,
        page_size: usize,
    ) -> StorageResult<ChangePage> {
        self.get_store(store_id)?;

        if let Some(token) = continuation_token {
            if Ulid::from_string(token).is_err() {
                return Err(StorageError::InvalidContinuationToken {
                    token: token.to_string(),
                });
            }
        }

        let log = self
            .changelog
            .get(store_id)
            .map(|l| l.clone())
            .unwrap_or_default();

        let changes: Vec<TupleChange> = log
            .into_iter()
            .filter(|c| continuation_token.map_or(true, |t| c.ulid.as_str() > t))
            .take(page_size.max(1))
            .collect();

        let continuation_token = changes.last().map(|c| c.ulid.clone());
        Ok(ChangePage {
            changes,
            continuation_token,
        })
    }

    fn snapshot(&self, store_id: &str) -> StorageResult<Vec<StoredTuple>> {
        self.get_store(store_id)?;
        Ok(self
            .tuples
            .get(store_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }

    fn tracked(&self, mut tuples: Vec<StoredTuple>) -> TupleIteratorBox {
        // Deterministic yield order keeps reads reproducible across runs.
        tuples.sort_by_key(|t| t.to_tuple_key().to_string());
        self.open_iterators.fetch_add(1, Ordering::SeqCst);
        Box::new(MemoryTupleIterator {
            tuples: tuples.into(),
            open: Arc::clone(&self.open_iterators),
        })
    }
}

/// Iterator over a snapshot; releases its accounting slot on drop, which
/// covers error and cancellation exits.
struct MemoryTupleIterator {
    tuples: std::collections::VecDeque<StoredTuple>,
    open: Arc<AtomicUsize>,
}

impl Drop for MemoryTupleIterator {
    fn drop(&mut self) {
        self.open.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl TupleIterator for MemoryTupleIterator {
    async fn next(&mut self) -> StorageResult<Option<StoredTuple>> {
        Ok(self.tuples.pop_front())
    }
}

#[async_trait]
impl TupleReader for MemoryDataStore {
    async fn read(&self, store_id: &str, filter: &ReadFilter) -> StorageResult<TupleIteratorBox> {
        let tuples = self
            .snapshot(store_id)?
            .into_iter()
            .filter(|t| filter.matches(t))
            .collect();
        Ok(self.tracked(tuples))
    }

    async fn read_user_tuple(
        &self,
        store_id: &str,
        key: &TupleKey,
    ) -> StorageResult<Option<StoredTuple>> {
        Ok(self.snapshot(store_id)?.into_iter().find(|t| {
            t.object_string() == key.object
                && t.relation == key.relation
                && t.user_string() == key.user
        }))
    }

    async fn read_userset_tuples(
        &self,
        store_id: &str,
        object_type: &str,
        object_id: &str,
        relation: &str,
    ) -> StorageResult<TupleIteratorBox> {
        let tuples = self
            .snapshot(store_id)?
            .into_iter()
            .filter(|t| {
                t.object_type == object_type
                    && t.object_id == object_id
                    && t.relation == relation
                    && t.user_relation.is_some()
            })
            .collect();
        Ok(self.tracked(tuples))
    }

    async fn read_starting_with_user(
        &self,
        store_id: &str,
        filter: &ReadStartingWithUserFilter,
    ) -> StorageResult<TupleIteratorBox> {
        let tuples = self
            .snapshot(store_id)?
            .into_iter()
            .filter(|t| {
                t.object_type == filter.object_type
                    && t.relation == filter.relation
                    && filter.users.iter().any(|u| *u == t.user_string())
            })
            .collect();
        Ok(self.tracked(tuples))
    }
}

#[async_trait]
impl TypeSystemResolver for MemoryDataStore {
    async fn resolve(
        &self,
        store_id: &str,
        model_id: Option<&str>,
    ) -> DomainResult<Arc<TypeSystem>> {
        let model_id = match model_id {
            Some(id) => id.to_string(),
            None => self
                .models
                .get(store_id)
                .and_then(|models| models.last().map(|m| m.id.clone()))
                .ok_or_else(|| DomainError::LatestAuthorizationModelNotFound {
                    store_id: store_id.to_string(),
                })?,
        };

        self.typesystems
            .get(&format!("{store_id}/{model_id}"))
            .map(|ts| Arc::clone(ts.value()))
            .ok_or_else(|| DomainError::AuthorizationModelNotFound {
                store_id: store_id.to_string(),
                model_id,
            })
    }
}
