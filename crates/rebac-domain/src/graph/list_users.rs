//! ListUsers: enumerate the users of a relation.
//!
//! The dual of Check. Instead of folding branch outcomes into a boolean,
//! the expansion emits every discovered object of the target user type onto
//! a single channel. Duplicates are permitted on the stream; the collected
//! form de-duplicates. Expansion fans out with a bounded breadth limit and
//! cancels on the first error. The same depth budget that bounds Check
//! bounds recursion through tuple-traversing edges here.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::{DomainError, DomainResult};
use crate::model::tuple::validate_relation;
use crate::model::{Object, TypeSystem, Userset};
use crate::storage::{
    filter_invalid_tuples, CombinedTupleReader, ConditionContext, ConditionEvaluator,
    ConditionedTupleIterator, ContextualTuple, ReadFilter, TupleIteratorBox, TupleReader,
};

use super::dispatch::{TypeSystemResolver, DEFAULT_RESOLUTION_DEPTH};

/// Default bound on concurrently-expanded branches.
pub const DEFAULT_BREADTH_LIMIT: usize = 20;

/// Request to enumerate users holding `relation` on `object`.
#[derive(Debug, Clone)]
pub struct ListUsersRequest {
    pub store_id: String,
    /// Model to evaluate under; `None` resolves the latest model.
    pub authorization_model_id: Option<String>,
    pub object: Object,
    pub relation: String,
    /// The user type to enumerate (e.g., "user").
    pub target_user_type: String,
    /// Set when enumerating usersets of the target type (e.g., "member").
    pub target_user_relation: Option<String>,
    pub contextual_tuples: Arc<Vec<ContextualTuple>>,
    pub context: Arc<ConditionContext>,
}

impl ListUsersRequest {
    pub fn new(
        store_id: impl Into<String>,
        object: Object,
        relation: impl Into<String>,
        target_user_type: impl Into<String>,
    ) -> Self {
        Self {
            store_id: store_id.into(),
            authorization_model_id: None,
            object,
            relation: relation.into(),
            target_user_type: target_user_type.into(),
            target_user_relation: None,
            contextual_tuples: Arc::new(Vec::new()),
            context: Arc::new(ConditionContext::new()),
        }
    }

    pub fn with_model_id(mut self, model_id: impl Into<String>) -> Self {
        self.authorization_model_id = Some(model_id.into());
        self
    }

    pub fn with_target_user_relation(mut self, relation: impl Into<String>) -> Self {
        self.target_user_relation = Some(relation.into());
        self
    }

    pub fn with_contextual_tuples(mut self, tuples: Vec<ContextualTuple>) -> Self {
        self.contextual_tuples = Arc::new(tuples);
        self
    }

    fn descend(&self, object: Object, relation: String) -> Self {
        Self {
            object,
            relation,
            ..self.clone()
        }
    }
}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Enumerates the users of a relation by structural recursion on the
/// rewrite, emitting found objects as they are discovered.
pub struct ListUsersQuery {
    reader: Arc<dyn TupleReader>,
    typesystems: Arc<dyn TypeSystemResolver>,
    condition_evaluator: Option<Arc<dyn ConditionEvaluator>>,
    breadth_limit: usize,
}

impl ListUsersQuery {
    pub fn new(reader: Arc<dyn TupleReader>, typesystems: Arc<dyn TypeSystemResolver>) -> Self {
        Self {
            reader,
            typesystems,
            condition_evaluator: None,
            breadth_limit: DEFAULT_BREADTH_LIMIT,
        }
    }

    pub fn with_breadth_limit(mut self, breadth_limit: usize) -> Self {
        self.breadth_limit = breadth_limit.max(1);
        self
    }

    pub fn with_condition_evaluator(mut self, evaluator: Arc<dyn ConditionEvaluator>) -> Self {
        self.condition_evaluator = Some(evaluator);
        self
    }

    /// Enumerates users, de-duplicated on `(type, id)`.
    ///
    /// The first expansion error is reported and any objects already found
    /// are discarded.
    pub async fn list_users(self: Arc<Self>, req: ListUsersRequest) -> DomainResult<Vec<Object>> {
        let (mut rx, producer) = self.streamed_list_users(req);

        let mut seen = HashSet::new();
        let mut found = Vec::new();
        while let Some(object) = rx.recv().await {
            if seen.insert(object.clone()) {
                found.push(object);
            }
        }

        producer
            .await
            .map_err(|err| DomainError::internal("graph::list_users", err.to_string()))??;
        Ok(found)
    }

    /// Enumerates users onto a channel. The stream may contain duplicates;
    /// de-duplication is the consumer's concern. Errors are delivered
    /// out-of-band through the returned handle once the channel closes.
    pub fn streamed_list_users(
        self: Arc<Self>,
        req: ListUsersRequest,
    ) -> (mpsc::Receiver<Object>, JoinHandle<DomainResult<()>>) {
        let (tx, rx) = mpsc::channel(1);

        let handle = tokio::spawn(async move {
            validate_relation(&req.relation)?;

            let reader: Arc<dyn TupleReader> = if req.contextual_tuples.is_empty() {
                Arc::clone(&self.reader)
            } else {
                Arc::new(CombinedTupleReader::new(
                    Arc::clone(&self.reader),
                    &req.contextual_tuples,
                )?)
            };

            self.expand(reader, req, DEFAULT_RESOLUTION_DEPTH, tx).await
        });

        (rx, handle)
    }

    fn expand(
        self: Arc<Self>,
        reader: Arc<dyn TupleReader>,
        req: ListUsersRequest,
        depth: u32,
        tx: mpsc::Sender<Object>,
    ) -> BoxFuture<'static, DomainResult<()>> {
        Box::pin(async move {
            if depth == 0 {
                return Err(DomainError::ResolutionDepthExceeded);
            }

            debug!(object = %req.object, relation = %req.relation, depth, "expanding");

            // The object under expansion is itself a result when it matches
            // the target userset.
            if req.object.object_type == req.target_user_type
                && req.target_user_relation.as_deref() == Some(req.relation.as_str())
            {
                send_found(&tx, req.object.clone()).await?;
            }

            let typesystem = self
                .typesystems
                .resolve(&req.store_id, req.authorization_model_id.as_deref())
                .await?;

            let relation = typesystem.get_relation(&req.object.object_type, &req.relation)?;
            let rewrite = relation.rewrite.clone();
            self.expand_rewrite(reader, req, typesystem, rewrite, depth, tx)
                .await
        })
    }

    fn expand_rewrite(
        self: Arc<Self>,
        reader: Arc<dyn TupleReader>,
        req: ListUsersRequest,
        typesystem: Arc<TypeSystem>,
        rewrite: Userset,
        depth: u32,
        tx: mpsc::Sender<Object>,
    ) -> BoxFuture<'static, DomainResult<()>> {
        Box::pin(async move {
            match rewrite {
                Userset::This => self.expand_direct(reader, req, typesystem, depth, tx).await,
                Userset::ComputedUserset { relation } => {
                    let child = req.descend(req.object.clone(), relation);
                    self.expand(reader, child, depth - 1, tx).await
                }
                Userset::TupleToUserset {
                    tupleset,
                    computed_userset,
                } => {
                    self.expand_ttu(reader, req, typesystem, tupleset, computed_userset, depth, tx)
                        .await
                }
                Userset::Union { children } => {
                    let branches: Vec<_> = children
                        .into_iter()
                        .map(|child| {
                            self.clone().expand_rewrite(
                                Arc::clone(&reader),
                                req.clone(),
                                Arc::clone(&typesystem),
                                child,
                                depth,
                                tx.clone(),
                            )
                        })
                        .collect();
                    self.drive(branches).await
                }
                Userset::Intersection { .. } | Userset::Difference { .. } => {
                    Err(DomainError::NotEnumerable {
                        relation: req.relation.clone(),
                        reason: "intersection and difference rewrites cannot be expanded \
                                 set-at-a-time"
                            .to_string(),
                    })
                }
            }
        })
    }

    async fn expand_direct(
        self: Arc<Self>,
        reader: Arc<dyn TupleReader>,
        req: ListUsersRequest,
        typesystem: Arc<TypeSystem>,
        depth: u32,
        tx: mpsc::Sender<Object>,
    ) -> DomainResult<()> {
        let filter = ReadFilter::for_object_relation(
            &req.object.object_type,
            &req.object.object_id,
            &req.relation,
        );
        let iter = reader.read(&req.store_id, &filter).await?;
        let mut iter = self.filtered(iter, typesystem, &req);

        let mut branches = Vec::new();
        while let Some(tuple) = iter.next().await? {
            match &tuple.user_relation {
                None => {
                    // Wildcards are not concrete objects and are never
                    // emitted.
                    if tuple.user_id != "*" && tuple.user_type == req.target_user_type {
                        send_found(&tx, Object::new(&tuple.user_type, &tuple.user_id)).await?;
                    }
                }
                Some(user_relation) => {
                    let child = req.descend(
                        Object::new(&tuple.user_type, &tuple.user_id),
                        user_relation.clone(),
                    );
                    branches.push(self.clone().expand(
                        Arc::clone(&reader),
                        child,
                        depth - 1,
                        tx.clone(),
                    ));
                }
            }
        }
        drop(iter);

        self.drive(branches).await
    }

    async fn expand_ttu(
        self: Arc<Self>,
        reader: Arc<dyn TupleReader>,
        req: ListUsersRequest,
        typesystem: Arc<TypeSystem>,
        tupleset: String,
        computed_userset: String,
        depth: u32,
        tx: mpsc::Sender<Object>,
    ) -> DomainResult<()> {
        let filter = ReadFilter::for_object_relation(
            &req.object.object_type,
            &req.object.object_id,
            &tupleset,
        );
        let iter = reader.read(&req.store_id, &filter).await?;
        let mut iter = self.filtered(iter, Arc::clone(&typesystem), &req);

        let mut branches = Vec::new();
        while let Some(tuple) = iter.next().await? {
            if tuple.user_id == "*" {
                continue;
            }
            // The computed relation may be undefined on some of the
            // tupleset's permitted parent types; those links are inert.
            if !typesystem.has_relation(&tuple.user_type, &computed_userset) {
                continue;
            }
            let child = req.descend(
                Object::new(&tuple.user_type, &tuple.user_id),
                computed_userset.clone(),
            );
            branches.push(self.clone().expand(
                Arc::clone(&reader),
                child,
                depth - 1,
                tx.clone(),
            ));
        }
        drop(iter);

        self.drive(branches).await
    }

    /// Runs expansion branches with the breadth limit; the first error
    /// cancels the branches still in flight.
    async fn drive(&self, branches: Vec<BoxFuture<'static, DomainResult<()>>>) -> DomainResult<()> {
        let mut outcomes = stream::iter(branches).buffer_unordered(self.breadth_limit);
        while let Some(outcome) = outcomes.next().await {
            outcome?;
        }
        Ok(())
    }

    fn filtered(
        &self,
        iter: TupleIteratorBox,
        typesystem: Arc<TypeSystem>,
        req: &ListUsersRequest,
    ) -> TupleIteratorBox {
        let iter = filter_invalid_tuples(iter, typesystem);
        Box::new(ConditionedTupleIterator::new(
            iter,
            self.condition_evaluator.clone(),
            Arc::clone(&req.context),
        ))
    }
}

/// Emits a found object; a dropped receiver cancels the expansion.
async fn send_found(tx: &mpsc::Sender<Object>, object: Object) -> DomainResult<()> {
    tx.send(object).await.map_err(|_| DomainError::Cancelled)
}
