//! Tuple-filtering iterators.
//!
//! Readers silently drop tuples whose user shape contradicts the model's
//! directly-related user types; such tuples never contribute to results.

use std::sync::Arc;

use async_trait::async_trait;

use crate::model::TypeSystem;

use super::error::StorageResult;
use super::traits::{StoredTuple, TupleIterator, TupleIteratorBox};

/// Predicate over stored tuples.
pub type TuplePredicate = Box<dyn Fn(&StoredTuple) -> bool + Send + Sync>;

/// An iterator adapter that skips tuples failing a predicate.
pub struct FilteredTupleIterator {
    inner: TupleIteratorBox,
    predicate: TuplePredicate,
}

impl FilteredTupleIterator {
    pub fn new(inner: TupleIteratorBox, predicate: TuplePredicate) -> Self {
        Self { inner, predicate }
    }
}

#[async_trait]
impl TupleIterator for FilteredTupleIterator {
    async fn next(&mut self) -> StorageResult<Option<StoredTuple>> {
        loop {
            match self.inner.next().await? {
                Some(tuple) if (self.predicate)(&tuple) => return Ok(Some(tuple)),
                Some(_) => continue,
                None => return Ok(None),
            }
        }
    }
}

/// Wraps an iterator so that tuples invalid under the model are dropped.
pub fn filter_invalid_tuples(
    inner: TupleIteratorBox,
    typesystem: Arc<TypeSystem>,
) -> TupleIteratorBox {
    Box::new(FilteredTupleIterator::new(
        inner,
        Box::new(move |tuple| {
            typesystem.is_tuple_user_allowed(
                &tuple.object_type,
                &tuple.relation,
                &tuple.user_type,
                &tuple.user_id,
                tuple.user_relation.as_deref(),
            )
        }),
    ))
}
