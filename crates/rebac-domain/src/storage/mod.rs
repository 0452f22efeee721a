//! Tuple reader contracts, filters, and overlays consumed by the evaluators.

pub mod conditions;
pub mod contextual;
mod error;
mod filtered;
mod traits;

pub use conditions::{ConditionError, ConditionEvaluator, ConditionedTupleIterator};
pub use contextual::{CombinedTupleReader, ContextualTuple};
pub use error::{StorageError, StorageResult};
pub use filtered::{filter_invalid_tuples, FilteredTupleIterator, TuplePredicate};
pub use traits::{
    ConditionContext, ReadFilter, ReadStartingWithUserFilter, StaticTupleIterator, StoredTuple,
    TupleIterator, TupleIteratorBox, TupleReader,
};
