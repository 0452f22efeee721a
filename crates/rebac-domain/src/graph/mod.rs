//! Graph evaluation: Check, ListUsers, and Expand over the rewrite algebra.

mod check;
mod dispatch;
mod expand;
mod list_users;

#[cfg(test)]
mod tests;

pub use check::{CheckHandler, CheckerConfig, ConcurrentChecker};
pub use dispatch::{
    CheckDispatcher, CheckRequest, CheckResponse, ResolutionMetadata, TypeSystemResolver,
    DEFAULT_RESOLUTION_DEPTH,
};
pub use expand::{
    ExpandLeaf, ExpandLeafValue, ExpandNode, ExpandQuery, ExpandRequest, ExpandResponse,
    UsersetTree,
};
pub use list_users::{ListUsersQuery, ListUsersRequest, DEFAULT_BREADTH_LIMIT};
