//! Tuple reader contracts consumed by the evaluators.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::model::TupleKey;

use super::error::StorageResult;

/// Condition parameters attached to a tuple, as JSON key-value pairs.
pub type ConditionContext = HashMap<String, serde_json::Value>;

/// A stored relationship tuple in its persisted shape.
///
/// `user_relation` is set for userset users (`group:eng#member`); a wildcard
/// user is stored as `user_id == "*"`.
///
/// Note: Hash and PartialEq are implemented manually because
/// `HashMap<String, serde_json::Value>` implements neither. The condition
/// context participates in both, via canonical (sorted-key) JSON for hashing.
#[derive(Debug, Clone)]
pub struct StoredTuple {
    pub object_type: String,
    pub object_id: String,
    pub relation: String,
    pub user_type: String,
    pub user_id: String,
    pub user_relation: Option<String>,
    /// Optional condition that must be satisfied for this tuple.
    pub condition_name: Option<String>,
    /// Only meaningful when `condition_name` is set.
    pub condition_context: Option<ConditionContext>,
}

impl StoredTuple {
    /// Creates a tuple without a condition.
    pub fn new(
        object_type: impl Into<String>,
        object_id: impl Into<String>,
        relation: impl Into<String>,
        user_type: impl Into<String>,
        user_id: impl Into<String>,
        user_relation: Option<String>,
    ) -> Self {
        Self {
            object_type: object_type.into(),
            object_id: object_id.into(),
            relation: relation.into(),
            user_type: user_type.into(),
            user_id: user_id.into(),
            user_relation,
            condition_name: None,
            condition_context: None,
        }
    }

    /// Attaches a condition to the tuple.
    pub fn with_condition(
        mut self,
        condition_name: impl Into<String>,
        condition_context: Option<ConditionContext>,
    ) -> Self {
        self.condition_name = Some(condition_name.into());
        self.condition_context = condition_context;
        self
    }

    /// The user reference in its serialized form
    /// (`type:id` or `type:id#relation`).
    pub fn user_string(&self) -> String {
        match &self.user_relation {
            Some(rel) => format!("{}:{}#{}", self.user_type, self.user_id, rel),
            None => format!("{}:{}", self.user_type, self.user_id),
        }
    }

    /// The object reference in its serialized form (`type:id`).
    pub fn object_string(&self) -> String {
        format!("{}:{}", self.object_type, self.object_id)
    }

    /// The tuple as an `object#relation@user` key.
    pub fn to_tuple_key(&self) -> TupleKey {
        TupleKey::new(self.object_string(), self.relation.clone(), self.user_string())
    }

    fn key(&self) -> (&str, &str, &str, &str, &str, Option<&str>, Option<&str>) {
        (
            &self.object_type,
            &self.object_id,
            &self.relation,
            &self.user_type,
            &self.user_id,
            self.user_relation.as_deref(),
            self.condition_name.as_deref(),
        )
    }
}

impl PartialEq for StoredTuple {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key() && self.condition_context == other.condition_context
    }
}

impl Eq for StoredTuple {}

impl std::hash::Hash for StoredTuple {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.object_type.hash(state);
        self.object_id.hash(state);
        self.relation.hash(state);
        self.user_type.hash(state);
        self.user_id.hash(state);
        self.user_relation.hash(state);
        self.condition_name.hash(state);
        match &self.condition_context {
            None => 0u8.hash(state),
            Some(ctx) => {
                1u8.hash(state);
                // Canonical JSON with sorted keys for a stable hash.
                let sorted: std::collections::BTreeMap<_, _> = ctx.iter().collect();
                serde_json::to_string(&sorted)
                    .expect("JSON values are always serializable")
                    .hash(state);
            }
        }
    }
}

/// Filter for [`TupleReader::read`]. Any subset of `{object, relation}` may
/// be keyed on; user filtering happens client-side.
#[derive(Debug, Clone, Default)]
pub struct ReadFilter {
    pub object_type: Option<String>,
    pub object_id: Option<String>,
    pub relation: Option<String>,
}

impl ReadFilter {
    /// Filter by full object and relation, the common evaluator shape.
    pub fn for_object_relation(object_type: &str, object_id: &str, relation: &str) -> Self {
        Self {
            object_type: Some(object_type.to_string()),
            object_id: Some(object_id.to_string()),
            relation: Some(relation.to_string()),
        }
    }

    pub fn matches(&self, tuple: &StoredTuple) -> bool {
        self.object_type
            .as_deref()
            .map_or(true, |t| t == tuple.object_type)
            && self
                .object_id
                .as_deref()
                .map_or(true, |i| i == tuple.object_id)
            && self.relation.as_deref().map_or(true, |r| r == tuple.relation)
    }
}

/// Filter for [`TupleReader::read_starting_with_user`]: reverse lookup of
/// tuples on a `(object_type, relation)` whose user is one of `users`
/// (each `type:id` or `type:id#relation`).
#[derive(Debug, Clone)]
pub struct ReadStartingWithUserFilter {
    pub object_type: String,
    pub relation: String,
    pub users: Vec<String>,
}

/// A pull iterator over tuples.
///
/// `next` may block (the backing stream may be remote) and must honor the
/// ambient cancellation scope. Iterators are single-consumer, move-only
/// handles; dropping the iterator releases its resources on every exit path.
#[async_trait]
pub trait TupleIterator: Send {
    /// Yields the next tuple, `Ok(None)` once exhausted.
    async fn next(&mut self) -> StorageResult<Option<StoredTuple>>;
}

/// Boxed iterator handle, as returned by every `read*` operation.
pub type TupleIteratorBox = Box<dyn TupleIterator>;

/// An iterator over a fixed batch of tuples, used by in-memory stores and
/// request-scoped overlays.
pub struct StaticTupleIterator {
    tuples: std::collections::VecDeque<StoredTuple>,
}

impl StaticTupleIterator {
    pub fn new(tuples: Vec<StoredTuple>) -> Self {
        Self {
            tuples: tuples.into(),
        }
    }
}

#[async_trait]
impl TupleIterator for StaticTupleIterator {
    async fn next(&mut self) -> StorageResult<Option<StoredTuple>> {
        Ok(self.tuples.pop_front())
    }
}

/// The narrow read interface the evaluation core consumes.
///
/// Implementations must be safe for concurrent use by multiple outstanding
/// reads; the iterators they return are not shared.
#[async_trait]
pub trait TupleReader: Send + Sync {
    /// Reads tuples matching the filter.
    async fn read(&self, store_id: &str, filter: &ReadFilter) -> StorageResult<TupleIteratorBox>;

    /// Exact-key lookup; `Ok(None)` when no such tuple exists.
    async fn read_user_tuple(
        &self,
        store_id: &str,
        key: &TupleKey,
    ) -> StorageResult<Option<StoredTuple>>;

    /// Reads tuples on `object#relation` whose user is a userset.
    async fn read_userset_tuples(
        &self,
        store_id: &str,
        object_type: &str,
        object_id: &str,
        relation: &str,
    ) -> StorageResult<TupleIteratorBox>;

    /// Reverse lookup by user.
    async fn read_starting_with_user(
        &self,
        store_id: &str,
        filter: &ReadStartingWithUserFilter,
    ) -> StorageResult<TupleIteratorBox>;
}
