//! The concurrent Check evaluator.
//!
//! Check is resolved by structural recursion on the relation's rewrite.
//! Set operators evaluate their children concurrently through reducers with
//! a per-branch concurrency limit; the first decisive outcome short-circuits
//! the reducer and cancels the remaining branches. Because branches are
//! futures owned by the reducer (never detached tasks), dropping the reducer
//! stream is the drain: no branch outlives the reducer call.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::{self, Either};
use futures::stream::{self, StreamExt};
use tracing::debug;

use crate::error::{DomainError, DomainResult};
use crate::model::tuple::{split_object, split_object_relation, validate_relation, validate_user};
use crate::model::{TupleKey, TypeSystem, Userset};
use crate::storage::{
    filter_invalid_tuples, CombinedTupleReader, ConditionEvaluator, ConditionedTupleIterator,
    ReadFilter, StaticTupleIterator, StoredTuple, TupleIteratorBox, TupleReader,
};

use super::dispatch::{CheckDispatcher, CheckRequest, CheckResponse, TypeSystemResolver};

/// Type alias for boxed futures, needed for async recursion.
type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A deferred branch evaluation fed to a reducer.
pub type CheckHandler<'a> = BoxFuture<'a, DomainResult<CheckResponse>>;

/// Configuration for the concurrent checker.
#[derive(Debug, Clone)]
pub struct CheckerConfig {
    /// Per-branch concurrency limit applied at every reducer.
    pub concurrency_limit: usize,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: 100,
        }
    }
}

/// Requires any branch to allow; the first allowed outcome terminates the
/// reducer early. Errors short-circuit like a denying outcome, except the
/// error is what propagates.
pub(crate) async fn union(
    concurrency_limit: usize,
    handlers: Vec<CheckHandler<'_>>,
) -> DomainResult<CheckResponse> {
    let mut outcomes = stream::iter(handlers).buffer_unordered(concurrency_limit.max(1));
    while let Some(outcome) = outcomes.next().await {
        match outcome {
            Err(err) => return Err(err),
            Ok(resp) if resp.allowed => return Ok(resp),
            Ok(_) => {}
        }
    }
    // Dropping `outcomes` on every exit path above cancels and drains the
    // branches still in flight.
    Ok(CheckResponse::denied())
}

/// Requires every branch to allow; the first denied or erroneous outcome
/// terminates the reducer early.
pub(crate) async fn intersection(
    concurrency_limit: usize,
    handlers: Vec<CheckHandler<'_>>,
) -> DomainResult<CheckResponse> {
    let mut outcomes = stream::iter(handlers).buffer_unordered(concurrency_limit.max(1));
    while let Some(outcome) = outcomes.next().await {
        match outcome {
            Err(err) => return Err(err),
            Ok(resp) if !resp.allowed => return Ok(resp),
            Ok(_) => {}
        }
    }
    Ok(CheckResponse::allowed())
}

/// Requires `base` to allow and `subtract` to deny. Whichever branch
/// resolves first may decide the outcome and cancel the other: a denied base
/// or an allowed subtract is final.
pub(crate) async fn exclusion(
    base: CheckHandler<'_>,
    subtract: CheckHandler<'_>,
) -> DomainResult<CheckResponse> {
    match future::select(base, subtract).await {
        Either::Left((base_outcome, subtract_pending)) => {
            if !base_outcome?.allowed {
                return Ok(CheckResponse::denied());
            }
            if subtract_pending.await?.allowed {
                Ok(CheckResponse::denied())
            } else {
                Ok(CheckResponse::allowed())
            }
        }
        Either::Right((subtract_outcome, base_pending)) => {
            if subtract_outcome?.allowed {
                return Ok(CheckResponse::denied());
            }
            if base_pending.await?.allowed {
                Ok(CheckResponse::allowed())
            } else {
                Ok(CheckResponse::denied())
            }
        }
    }
}

/// Per-dispatch evaluation state: the (possibly overlaid) reader, the
/// resolved type system, and the parsed object under evaluation.
struct EvalContext<'a> {
    reader: Arc<dyn TupleReader>,
    typesystem: Arc<TypeSystem>,
    object_type: String,
    object_id: String,
    req: &'a CheckRequest,
}

/// Evaluates Check requests with bounded per-branch concurrency.
///
/// The checker is stateless; all state lives in the request, the resolved
/// type system, and the tuple store. It is its own default dispatcher.
pub struct ConcurrentChecker {
    reader: Arc<dyn TupleReader>,
    typesystems: Arc<dyn TypeSystemResolver>,
    condition_evaluator: Option<Arc<dyn ConditionEvaluator>>,
    delegate: Option<Arc<dyn CheckDispatcher>>,
    config: CheckerConfig,
}

impl ConcurrentChecker {
    pub fn new(reader: Arc<dyn TupleReader>, typesystems: Arc<dyn TypeSystemResolver>) -> Self {
        Self {
            reader,
            typesystems,
            condition_evaluator: None,
            delegate: None,
            config: CheckerConfig::default(),
        }
    }

    pub fn with_config(mut self, config: CheckerConfig) -> Self {
        self.config = config;
        self
    }

    /// Routes recursive sub-checks through the given dispatcher instead of
    /// resolving them locally.
    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn CheckDispatcher>) -> Self {
        self.delegate = Some(dispatcher);
        self
    }

    pub fn with_condition_evaluator(mut self, evaluator: Arc<dyn ConditionEvaluator>) -> Self {
        self.condition_evaluator = Some(evaluator);
        self
    }

    /// Evaluates a Check request.
    ///
    /// The caller supplies any deadline on the surrounding scope; the
    /// evaluator adds no timeout of its own.
    pub async fn check(&self, req: &CheckRequest) -> DomainResult<CheckResponse> {
        validate_user(&req.tuple_key.user)?;
        split_object(&req.tuple_key.object)?;
        validate_relation(&req.tuple_key.relation)?;

        self.dispatch_check(req.clone()).await
    }

    /// Wraps a sub-request as a handler routed through the dispatcher.
    fn dispatch(&self, req: CheckRequest) -> CheckHandler<'_> {
        Box::pin(async move {
            match &self.delegate {
                Some(dispatcher) => dispatcher.dispatch_check(req).await,
                None => self.dispatch_check(req).await,
            }
        })
    }

    /// Applies the invalid-tuple and condition filter passes every read goes
    /// through.
    fn filtered(&self, ctx: &EvalContext<'_>, iter: TupleIteratorBox) -> TupleIteratorBox {
        let iter = filter_invalid_tuples(iter, Arc::clone(&ctx.typesystem));
        Box::new(ConditionedTupleIterator::new(
            iter,
            self.condition_evaluator.clone(),
            Arc::clone(&ctx.req.context),
        ))
    }

    /// Whether a tuple found by exact lookup survives the filter passes.
    async fn tuple_applies(&self, ctx: &EvalContext<'_>, tuple: StoredTuple) -> DomainResult<bool> {
        let mut iter = self.filtered(ctx, Box::new(StaticTupleIterator::new(vec![tuple])));
        Ok(iter.next().await?.is_some())
    }

    fn check_rewrite<'a>(
        &'a self,
        ctx: &'a EvalContext<'a>,
        rewrite: &'a Userset,
    ) -> CheckHandler<'a> {
        match rewrite {
            Userset::This => self.check_direct(ctx),
            Userset::ComputedUserset { relation } => self.dispatch(
                ctx.req
                    .descend(ctx.req.tuple_key.object.clone(), relation.clone()),
            ),
            Userset::TupleToUserset {
                tupleset,
                computed_userset,
            } => self.check_ttu(ctx, tupleset, computed_userset),
            Userset::Union { children } => {
                let handlers: Vec<CheckHandler<'a>> = children
                    .iter()
                    .map(|child| self.check_rewrite(ctx, child))
                    .collect();
                let limit = self.config.concurrency_limit;
                Box::pin(union(limit, handlers))
            }
            Userset::Intersection { children } => {
                let handlers: Vec<CheckHandler<'a>> = children
                    .iter()
                    .map(|child| self.check_rewrite(ctx, child))
                    .collect();
                let limit = self.config.concurrency_limit;
                Box::pin(intersection(limit, handlers))
            }
            Userset::Difference { base, subtract } => {
                let base = self.check_rewrite(ctx, base);
                let subtract = self.check_rewrite(ctx, subtract);
                Box::pin(exclusion(base, subtract))
            }
        }
    }

    /// Direct relationships: the disjunction of an exact tuple lookup and
    /// the expansion of userset tuples on `object#relation`, evaluated
    /// concurrently.
    fn check_direct<'a>(&'a self, ctx: &'a EvalContext<'a>) -> CheckHandler<'a> {
        Box::pin(async move {
            let exact = self.check_direct_user(ctx);
            let usersets = self.check_direct_usersets(ctx);
            union(self.config.concurrency_limit, vec![exact, usersets]).await
        })
    }

    fn check_direct_user<'a>(&'a self, ctx: &'a EvalContext<'a>) -> CheckHandler<'a> {
        Box::pin(async move {
            let req = ctx.req;

            if let Some(tuple) = ctx
                .reader
                .read_user_tuple(&req.store_id, &req.tuple_key)
                .await?
            {
                if self.tuple_applies(ctx, tuple).await? {
                    return Ok(CheckResponse::allowed());
                }
            }

            // A `type:*` tuple grants to every concrete user of the type,
            // when the relation admits the wildcard.
            let (user_object, user_relation) = split_object_relation(&req.tuple_key.user);
            if user_relation.is_none() {
                if let Ok((user_type, _)) = split_object(user_object) {
                    if ctx.typesystem.allows_wildcard(
                        &ctx.object_type,
                        &req.tuple_key.relation,
                        user_type,
                    ) {
                        let wildcard_key = TupleKey::new(
                            req.tuple_key.object.clone(),
                            req.tuple_key.relation.clone(),
                            format!("{user_type}:*"),
                        );
                        if let Some(tuple) = ctx
                            .reader
                            .read_user_tuple(&req.store_id, &wildcard_key)
                            .await?
                        {
                            if self.tuple_applies(ctx, tuple).await? {
                                return Ok(CheckResponse::allowed());
                            }
                        }
                    }
                }
            }

            Ok(CheckResponse::denied())
        })
    }

    fn check_direct_usersets<'a>(&'a self, ctx: &'a EvalContext<'a>) -> CheckHandler<'a> {
        Box::pin(async move {
            let req = ctx.req;

            let iter = ctx
                .reader
                .read_userset_tuples(
                    &req.store_id,
                    &ctx.object_type,
                    &ctx.object_id,
                    &req.tuple_key.relation,
                )
                .await?;
            let mut iter = self.filtered(ctx, iter);

            let mut handlers = Vec::new();
            while let Some(tuple) = iter.next().await? {
                let Some(userset_relation) = tuple.user_relation.clone() else {
                    continue;
                };
                handlers.push(self.dispatch(req.descend(
                    format!("{}:{}", tuple.user_type, tuple.user_id),
                    userset_relation,
                )));
            }
            drop(iter);

            if handlers.is_empty() {
                return Ok(CheckResponse::denied());
            }
            union(self.config.concurrency_limit, handlers).await
        })
    }

    /// Tuple-to-userset: follow each `object#tupleset` tuple and evaluate
    /// the computed relation on the linked object.
    fn check_ttu<'a>(
        &'a self,
        ctx: &'a EvalContext<'a>,
        tupleset: &'a str,
        computed_userset: &'a str,
    ) -> CheckHandler<'a> {
        Box::pin(async move {
            let req = ctx.req;

            let filter =
                ReadFilter::for_object_relation(&ctx.object_type, &ctx.object_id, tupleset);
            let iter = ctx.reader.read(&req.store_id, &filter).await?;
            let mut iter = self.filtered(ctx, iter);

            let mut handlers = Vec::new();
            while let Some(tuple) = iter.next().await? {
                if tuple.user_id == "*" {
                    continue;
                }
                // The computed relation may be undefined on some of the
                // tupleset's permitted parent types; those links are inert.
                if !ctx.typesystem.has_relation(&tuple.user_type, computed_userset) {
                    continue;
                }
                handlers.push(self.dispatch(req.descend(
                    format!("{}:{}", tuple.user_type, tuple.user_id),
                    computed_userset.to_string(),
                )));
            }
            drop(iter);

            if handlers.is_empty() {
                return Ok(CheckResponse::denied());
            }
            union(self.config.concurrency_limit, handlers).await
        })
    }
}

#[async_trait]
impl CheckDispatcher for ConcurrentChecker {
    async fn dispatch_check(&self, req: CheckRequest) -> DomainResult<CheckResponse> {
        if req.resolution_metadata.depth == 0 {
            return Err(DomainError::ResolutionDepthExceeded);
        }

        debug!(
            tuple = %req.tuple_key,
            depth = req.resolution_metadata.depth,
            "dispatching check"
        );

        let typesystem = self
            .typesystems
            .resolve(&req.store_id, req.authorization_model_id.as_deref())
            .await?;

        let (object_type, object_id) = split_object(&req.tuple_key.object)?;
        let relation = typesystem.get_relation(object_type, &req.tuple_key.relation)?;

        let reader: Arc<dyn TupleReader> = if req.contextual_tuples.is_empty() {
            Arc::clone(&self.reader)
        } else {
            Arc::new(CombinedTupleReader::new(
                Arc::clone(&self.reader),
                &req.contextual_tuples,
            )?)
        };

        let ctx = EvalContext {
            reader,
            typesystem: Arc::clone(&typesystem),
            object_type: object_type.to_string(),
            object_id: object_id.to_string(),
            req: &req,
        };

        let handler = self.check_rewrite(&ctx, &relation.rewrite);
        union(self.config.concurrency_limit, vec![handler]).await
    }
}
