//! Request-scoped contextual tuples overlaid atop a backing reader.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{DomainError, DomainResult};
use crate::model::tuple::{split_object, split_object_relation};
use crate::model::TupleKey;

use super::error::StorageResult;
use super::traits::{
    ConditionContext, ReadFilter, ReadStartingWithUserFilter, StaticTupleIterator, StoredTuple,
    TupleIterator, TupleIteratorBox, TupleReader,
};

/// A request-scoped fact considered alongside stored tuples.
#[derive(Debug, Clone)]
pub struct ContextualTuple {
    pub key: TupleKey,
    pub condition_name: Option<String>,
    pub condition_context: Option<ConditionContext>,
}

impl ContextualTuple {
    pub fn new(key: TupleKey) -> Self {
        Self {
            key,
            condition_name: None,
            condition_context: None,
        }
    }

    pub fn with_condition(
        mut self,
        condition_name: impl Into<String>,
        condition_context: Option<ConditionContext>,
    ) -> Self {
        self.condition_name = Some(condition_name.into());
        self.condition_context = condition_context;
        self
    }

    fn to_stored(&self) -> DomainResult<StoredTuple> {
        let (object_type, object_id) = split_object(&self.key.object)?;
        let (user_object, user_relation) = split_object_relation(&self.key.user);
        let (user_type, user_id) =
            split_object(user_object).map_err(|_| DomainError::InvalidUserFormat {
                value: self.key.user.clone(),
            })?;

        let mut stored = StoredTuple::new(
            object_type,
            object_id,
            self.key.relation.clone(),
            user_type,
            user_id,
            user_relation.map(str::to_string),
        );
        stored.condition_name = self.condition_name.clone();
        stored.condition_context = self.condition_context.clone();
        Ok(stored)
    }
}

/// A `TupleReader` that pre-seeds contextual tuples above a backing store.
///
/// Contextual matches are yielded ahead of stored tuples; the decorator is
/// otherwise transparent.
pub struct CombinedTupleReader {
    base: Arc<dyn TupleReader>,
    contextual: Vec<StoredTuple>,
}

impl CombinedTupleReader {
    /// Builds the overlay, rejecting malformed contextual tuples up front.
    pub fn new(
        base: Arc<dyn TupleReader>,
        contextual_tuples: &[ContextualTuple],
    ) -> DomainResult<Self> {
        let contextual = contextual_tuples
            .iter()
            .map(ContextualTuple::to_stored)
            .collect::<DomainResult<Vec<_>>>()?;
        Ok(Self { base, contextual })
    }

    fn matching<F>(&self, predicate: F) -> Vec<StoredTuple>
    where
        F: Fn(&StoredTuple) -> bool,
    {
        self.contextual
            .iter()
            .filter(|t| predicate(t))
            .cloned()
            .collect()
    }
}

/// Chains a batch of contextual matches ahead of a backing iterator.
struct ChainedTupleIterator {
    head: StaticTupleIterator,
    tail: TupleIteratorBox,
}

#[async_trait]
impl TupleIterator for ChainedTupleIterator {
    async fn next(&mut self) -> StorageResult<Option<StoredTuple>> {
        if let Some(tuple) = self.head.next().await? {
            return Ok(Some(tuple));
        }
        self.tail.next().await
    }
}

#[async_trait]
impl TupleReader for CombinedTupleReader {
    async fn read(&self, store_id: &str, filter: &ReadFilter) -> StorageResult<TupleIteratorBox> {
        let head = self.matching(|t| filter.matches(t));
        let tail = self.base.read(store_id, filter).await?;
        Ok(Box::new(ChainedTupleIterator {
            head: StaticTupleIterator::new(head),
            tail,
        }))
    }

    async fn read_user_tuple(
        &self,
        store_id: &str,
        key: &TupleKey,
    ) -> StorageResult<Option<StoredTuple>> {
        let found = self.contextual.iter().find(|t| {
            t.object_string() == key.object
                && t.relation == key.relation
                && t.user_string() == key.user
        });
        if let Some(tuple) = found {
            return Ok(Some(tuple.clone()));
        }
        self.base.read_user_tuple(store_id, key).await
    }

    async fn read_userset_tuples(
        &self,
        store_id: &str,
        object_type: &str,
        object_id: &str,
        relation: &str,
    ) -> StorageResult<TupleIteratorBox> {
        let head = self.matching(|t| {
            t.object_type == object_type
                && t.object_id == object_id
                && t.relation == relation
                && t.user_relation.is_some()
        });
        let tail = self
            .base
            .read_userset_tuples(store_id, object_type, object_id, relation)
            .await?;
        Ok(Box::new(ChainedTupleIterator {
            head: StaticTupleIterator::new(head),
            tail,
        }))
    }

    async fn read_starting_with_user(
        &self,
        store_id: &str,
        filter: &ReadStartingWithUserFilter,
    ) -> StorageResult<TupleIteratorBox> {
        let head = self.matching(|t| {
            t.object_type == filter.object_type
                && t.relation == filter.relation
                && filter.users.iter().any(|u| *u == t.user_string())
        });
        let tail = self.base.read_starting_with_user(store_id, filter).await?;
        Ok(Box::new(ChainedTupleIterator {
            head: StaticTupleIterator::new(head),
            tail,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A reader with no stored tuples.
    struct EmptyReader;

    #[async_trait]
    impl TupleReader for EmptyReader {
        async fn read(&self, _: &str, _: &ReadFilter) -> StorageResult<TupleIteratorBox> {
            Ok(Box::new(StaticTupleIterator::new(vec![])))
        }

        async fn read_user_tuple(
            &self,
            _: &str,
            _: &TupleKey,
        ) -> StorageResult<Option<StoredTuple>> {
            Ok(None)
        }

        async fn read_userset_tuples(
            &self,
            _: &str,
            _: &str,
            _: &str,
            _: &str,
        ) -> StorageResult<TupleIteratorBox> {
            Ok(Box::new(StaticTupleIterator::new(vec![])))
        }

        async fn read_starting_with_user(
            &self,
            _: &str,
            _: &ReadStartingWithUserFilter,
        ) -> StorageResult<TupleIteratorBox> {
            Ok(Box::new(StaticTupleIterator::new(vec![])))
        }
    }

    #[tokio::test]
    async fn contextual_tuples_visible_through_reads() {
        let reader = CombinedTupleReader::new(
            Arc::new(EmptyReader),
            &[
                ContextualTuple::new(TupleKey::new("document:1", "viewer", "user:jon")),
                ContextualTuple::new(TupleKey::new("document:1", "viewer", "group:eng#member")),
            ],
        )
        .unwrap();

        let found = reader
            .read_user_tuple("s", &TupleKey::new("document:1", "viewer", "user:jon"))
            .await
            .unwrap();
        assert!(found.is_some());

        let mut iter = reader
            .read_userset_tuples("s", "document", "1", "viewer")
            .await
            .unwrap();
        let t = iter.next().await.unwrap().unwrap();
        assert_eq!(t.user_string(), "group:eng#member");
        assert!(iter.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn malformed_contextual_tuples_rejected() {
        let result = CombinedTupleReader::new(
            Arc::new(EmptyReader),
            &[ContextualTuple::new(TupleKey::new(
                "document:1",
                "viewer",
                "not-a-user",
            ))],
        );
        assert!(matches!(
            result,
            Err(DomainError::InvalidUserFormat { .. })
        ));
    }
}
