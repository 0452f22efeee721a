//! Conditional-tuple filtering.
//!
//! Expression-language evaluation itself lives outside the core; this module
//! is the single injection point. A filter pass above `read` drops tuples
//! whose condition evaluates to false against the caller-supplied context.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::warn;

use super::error::StorageResult;
use super::traits::{ConditionContext, StoredTuple, TupleIterator, TupleIteratorBox};

/// Error from evaluating a tuple condition.
#[derive(Debug, Error)]
pub enum ConditionError {
    /// The condition is not defined in the model.
    #[error("condition '{condition_name}' not defined")]
    Undefined { condition_name: String },

    /// The condition expression failed to compile.
    #[error("condition '{condition_name}' failed to compile: {reason}")]
    Compile {
        condition_name: String,
        reason: String,
    },

    /// The condition expression failed to evaluate.
    #[error("condition '{condition_name}' failed to evaluate: {reason}")]
    Eval {
        condition_name: String,
        reason: String,
    },
}

/// Evaluates a named condition against merged tuple and request context.
///
/// Tuple context takes precedence over request context; constraints written
/// at tuple-write time cannot be weakened by the caller.
pub trait ConditionEvaluator: Send + Sync {
    fn evaluate(
        &self,
        condition_name: &str,
        tuple_context: Option<&ConditionContext>,
        request_context: &ConditionContext,
    ) -> Result<bool, ConditionError>;
}

/// An iterator adapter dropping tuples whose condition does not hold.
///
/// Unconditioned tuples pass through untouched. A condition that fails to
/// compile or evaluate is treated as false, and the error is surfaced as a
/// structured log record.
pub struct ConditionedTupleIterator {
    inner: TupleIteratorBox,
    evaluator: Option<Arc<dyn ConditionEvaluator>>,
    request_context: Arc<ConditionContext>,
}

impl ConditionedTupleIterator {
    pub fn new(
        inner: TupleIteratorBox,
        evaluator: Option<Arc<dyn ConditionEvaluator>>,
        request_context: Arc<ConditionContext>,
    ) -> Self {
        Self {
            inner,
            evaluator,
            request_context,
        }
    }

    fn condition_holds(&self, tuple: &StoredTuple) -> bool {
        let Some(condition_name) = tuple.condition_name.as_deref() else {
            return true;
        };

        let Some(evaluator) = &self.evaluator else {
            warn!(
                condition = condition_name,
                tuple = %tuple.to_tuple_key(),
                "conditioned tuple skipped: no condition evaluator configured"
            );
            return false;
        };

        match evaluator.evaluate(
            condition_name,
            tuple.condition_context.as_ref(),
            &self.request_context,
        ) {
            Ok(holds) => holds,
            Err(err) => {
                warn!(
                    condition = condition_name,
                    tuple = %tuple.to_tuple_key(),
                    error = %err,
                    "condition evaluation failed; tuple treated as false"
                );
                false
            }
        }
    }
}

#[async_trait]
impl TupleIterator for ConditionedTupleIterator {
    async fn next(&mut self) -> StorageResult<Option<StoredTuple>> {
        loop {
            match self.inner.next().await? {
                Some(tuple) if self.condition_holds(&tuple) => return Ok(Some(tuple)),
                Some(_) => continue,
                None => return Ok(None),
            }
        }
    }
}
