//! Dispatch indirection for recursive Check evaluation.
//!
//! Every recursive sub-check goes through [`CheckDispatcher::dispatch_check`]
//! rather than a direct method call, so deployments can swap in a sharded or
//! remote dispatcher without touching evaluation logic.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::DomainResult;
use crate::model::{TupleKey, TypeSystem};
use crate::storage::{ConditionContext, ContextualTuple};

/// Default maximum resolution depth, the sole guard against unbounded
/// recursion through mutually-recursive model edges.
pub const DEFAULT_RESOLUTION_DEPTH: u32 = 25;

/// Per-dispatch resolution bookkeeping.
#[derive(Debug, Clone)]
pub struct ResolutionMetadata {
    /// Remaining recursion budget; decremented on every dispatch.
    pub depth: u32,
}

impl Default for ResolutionMetadata {
    fn default() -> Self {
        Self {
            depth: DEFAULT_RESOLUTION_DEPTH,
        }
    }
}

/// A Check request as dispatched between evaluators.
#[derive(Debug, Clone)]
pub struct CheckRequest {
    /// The store to evaluate against.
    pub store_id: String,
    /// Model to evaluate under; `None` resolves the latest model.
    pub authorization_model_id: Option<String>,
    /// The `object#relation@user` question.
    pub tuple_key: TupleKey,
    /// Request-scoped facts overlaid atop the tuple store.
    pub contextual_tuples: Arc<Vec<ContextualTuple>>,
    /// Caller-supplied context for condition evaluation.
    pub context: Arc<ConditionContext>,
    /// Resolution bookkeeping.
    pub resolution_metadata: ResolutionMetadata,
}

impl CheckRequest {
    pub fn new(store_id: impl Into<String>, tuple_key: TupleKey) -> Self {
        Self {
            store_id: store_id.into(),
            authorization_model_id: None,
            tuple_key,
            contextual_tuples: Arc::new(Vec::new()),
            context: Arc::new(ConditionContext::new()),
            resolution_metadata: ResolutionMetadata::default(),
        }
    }

    pub fn with_model_id(mut self, model_id: impl Into<String>) -> Self {
        self.authorization_model_id = Some(model_id.into());
        self
    }

    pub fn with_contextual_tuples(mut self, tuples: Vec<ContextualTuple>) -> Self {
        self.contextual_tuples = Arc::new(tuples);
        self
    }

    pub fn with_context(mut self, context: ConditionContext) -> Self {
        self.context = Arc::new(context);
        self
    }

    pub fn with_depth(mut self, depth: u32) -> Self {
        self.resolution_metadata = ResolutionMetadata { depth };
        self
    }

    /// Derives a sub-request for `object#relation` with the depth budget
    /// decremented.
    pub(crate) fn descend(&self, object: String, relation: String) -> Self {
        Self {
            store_id: self.store_id.clone(),
            authorization_model_id: self.authorization_model_id.clone(),
            tuple_key: TupleKey::new(object, relation, self.tuple_key.user.clone()),
            contextual_tuples: Arc::clone(&self.contextual_tuples),
            context: Arc::clone(&self.context),
            resolution_metadata: ResolutionMetadata {
                depth: self.resolution_metadata.depth.saturating_sub(1),
            },
        }
    }
}

/// The answer to a Check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResponse {
    pub allowed: bool,
}

impl CheckResponse {
    pub fn allowed() -> Self {
        Self { allowed: true }
    }

    pub fn denied() -> Self {
        Self { allowed: false }
    }
}

/// Resolves dispatched Check requests, locally or remotely.
#[async_trait]
pub trait CheckDispatcher: Send + Sync {
    async fn dispatch_check(&self, req: CheckRequest) -> DomainResult<CheckResponse>;
}

/// Resolves `(store, model)` to a validated type system.
///
/// The checker never parses models itself; implementations are expected to
/// cache, so recursion does not re-validate per level.
#[async_trait]
pub trait TypeSystemResolver: Send + Sync {
    /// Resolves a model by id, or the latest model when `model_id` is `None`.
    async fn resolve(
        &self,
        store_id: &str,
        model_id: Option<&str>,
    ) -> DomainResult<Arc<TypeSystem>>;
}
