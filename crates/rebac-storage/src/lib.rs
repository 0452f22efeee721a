//! rebac-storage: relationship tuple stores and reader decorators.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │               rebac-storage                  │
//! ├─────────────────────────────────────────────┤
//! │  memory.rs  - In-memory store & changelog    │
//! │  hedger.rs  - Quantile-hedged reader         │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! Both implement the reader contract from `rebac_domain::storage`; the
//! memory store additionally resolves type systems for the evaluators.

pub mod hedger;
pub mod memory;

pub use hedger::{BoundedQuantileEstimator, HedgedTupleReader, QuantileEstimator};
pub use memory::{
    ChangePage, MemoryDataStore, Store, StoredAuthorizationModel, TupleChange, TupleOperation,
};

// Re-export chrono types for timestamp handling.
pub use chrono::{DateTime, Utc};
