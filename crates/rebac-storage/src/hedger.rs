//! Request hedging for tail-latency reduction.
//!
//! A decorated read starts a timer at the estimator's `Q(p)` over observed
//! read durations; when the timer fires before the read resolves, a
//! duplicate read is raced against it. Whichever completes first wins and
//! its duration feeds the estimator; the loser is dropped, which releases
//! its iterator. Semantics match the underlying reader exactly.

use std::future::Future;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use metrics::counter;
use tdigest::TDigest;

use rebac_domain::model::TupleKey;
use rebac_domain::storage::{
    ReadFilter, ReadStartingWithUserFilter, StorageResult, StoredTuple, TupleIteratorBox,
    TupleReader,
};

/// Approximates quantiles of an observed distribution.
pub trait QuantileEstimator: Send + Sync {
    /// Records an observation in seconds.
    fn add(&self, sample: f64);

    /// An approximation of the q'th quantile of the accumulated samples.
    fn quantile(&self, q: f64) -> f64;
}

/// Digest compression factor; standard t-digest accuracy/size trade-off.
const DIGEST_COMPRESSION: usize = 1000;

/// The hedge threshold before any sample has been observed (20ms).
const INITIAL_HEDGE_THRESHOLD_SECS: f64 = 0.02;

struct Digests {
    main: TDigest,
    main_count: u32,
    swap: TDigest,
    swap_count: u32,
}

/// A t-digest quantile estimator with a bounded sample budget.
///
/// Two digests accumulate in parallel; when the main digest exhausts the
/// sample budget it is discarded and the swap digest (holding the younger
/// half of the window) takes its place. Memory stays constant regardless of
/// how many samples are observed. Updates serialize under a lock; reads of
/// the quantile take the same lock briefly.
pub struct BoundedQuantileEstimator {
    max_samples: u32,
    inner: Mutex<Digests>,
}

impl BoundedQuantileEstimator {
    pub fn new(max_samples: u32) -> Self {
        let seeded = TDigest::new_with_size(DIGEST_COMPRESSION)
            .merge_unsorted(vec![INITIAL_HEDGE_THRESHOLD_SECS]);
        Self {
            max_samples: max_samples.max(2),
            inner: Mutex::new(Digests {
                main: seeded,
                main_count: 1,
                swap: TDigest::new_with_size(DIGEST_COMPRESSION),
                swap_count: 0,
            }),
        }
    }
}

impl QuantileEstimator for BoundedQuantileEstimator {
    fn add(&self, sample: f64) {
        let mut digests = self.inner.lock().expect("estimator lock poisoned");

        if digests.main_count >= self.max_samples {
            let swap = std::mem::replace(
                &mut digests.swap,
                TDigest::new_with_size(DIGEST_COMPRESSION),
            );
            digests.main = swap;
            digests.main_count = digests.swap_count;
            digests.swap_count = 0;
        }

        let main = std::mem::replace(
            &mut digests.main,
            TDigest::new_with_size(DIGEST_COMPRESSION),
        );
        digests.main = main.merge_unsorted(vec![sample]);
        digests.main_count += 1;

        let swap = std::mem::replace(
            &mut digests.swap,
            TDigest::new_with_size(DIGEST_COMPRESSION),
        );
        digests.swap = swap.merge_unsorted(vec![sample]);
        digests.swap_count += 1;
    }

    fn quantile(&self, q: f64) -> f64 {
        let digests = self.inner.lock().expect("estimator lock poisoned");
        digests.main.estimate_quantile(q)
    }
}

/// A `TupleReader` decorator racing duplicate reads past a quantile-derived
/// deadline.
pub struct HedgedTupleReader {
    inner: Arc<dyn TupleReader>,
    estimator: Arc<dyn QuantileEstimator>,
    quantile: f64,
}

impl HedgedTupleReader {
    /// Wraps `inner`, hedging reads that outlive the `quantile`'th
    /// percentile of observed durations.
    pub fn new(inner: Arc<dyn TupleReader>, quantile: f64) -> Self {
        Self::with_estimator(inner, quantile, Arc::new(BoundedQuantileEstimator::new(1000)))
    }

    pub fn with_estimator(
        inner: Arc<dyn TupleReader>,
        quantile: f64,
        estimator: Arc<dyn QuantileEstimator>,
    ) -> Self {
        Self {
            inner,
            estimator,
            quantile: quantile.clamp(0.0, 1.0),
        }
    }

    /// Races `op` against a hedged duplicate launched once the quantile
    /// deadline passes. The losing future is dropped, never awaited.
    async fn race<T, F, Fut>(&self, op: F) -> StorageResult<T>
    where
        T: Send,
        F: Fn() -> Fut + Send + Sync,
        Fut: Future<Output = StorageResult<T>> + Send,
    {
        counter!("rebac_storage_hedgable_requests_total").increment(1);

        let threshold = Duration::from_secs_f64(self.estimator.quantile(self.quantile).max(0.0));

        let start = Instant::now();
        let primary = op();
        tokio::pin!(primary);

        tokio::select! {
            result = &mut primary => {
                self.estimator.add(start.elapsed().as_secs_f64());
                result
            }
            _ = tokio::time::sleep(threshold) => {
                counter!("rebac_storage_hedged_requests_total").increment(1);

                let hedged_start = Instant::now();
                let hedged = op();
                tokio::pin!(hedged);

                tokio::select! {
                    result = &mut primary => {
                        self.estimator.add(start.elapsed().as_secs_f64());
                        result
                    }
                    result = &mut hedged => {
                        self.estimator.add(hedged_start.elapsed().as_secs_f64());
                        result
                    }
                }
            }
        }
    }
}

#[async_trait]
impl TupleReader for HedgedTupleReader {
    async fn read(&self, store_id: &str, filter: &ReadFilter) -> StorageResult<TupleIteratorBox> {
        self.race(|| self.inner.read(store_id, filter)).await
    }

    async fn read_user_tuple(
        &self,
        store_id: &str,
        key: &TupleKey,
    ) -> StorageResult<Option<StoredTuple>> {
        self.race(|| self.inner.read_user_tuple(store_id, key)).await
    }

    async fn read_userset_tuples(
        &self,
        store_id: &str,
        object_type: &str,
        object_id: &str,
        relation: &str,
    ) -> StorageResult<TupleIteratorBox> {
        self.race(|| {
            self.inner
                .read_userset_tuples(store_id, object_type, object_id, relation)
        })
        .await
    }

    async fn read_starting_with_user(
        &self,
        store_id: &str,
        filter: &ReadStartingWithUserFilter,
    ) -> StorageResult<TupleIteratorBox> {
        self.race(|| self.inner.read_starting_with_user(store_id, filter))
            .await
    }
}
