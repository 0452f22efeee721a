//! rebac-domain: relationship-based access-control evaluation core.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │                rebac-domain                  │
//! ├─────────────────────────────────────────────┤
//! │  model/    - Model types & validated lookups│
//! │  storage/  - Reader contracts & tuple filters│
//! │  graph/    - Check, ListUsers, Expand        │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! The crate holds no persistent state; durable state lives behind the
//! [`storage::TupleReader`] contract.

pub mod error;
pub mod graph;
pub mod model;
pub mod storage;

pub use error::{DomainError, DomainResult};
pub use model::{AuthorizationModel, Object, TupleKey, TypeSystem};
