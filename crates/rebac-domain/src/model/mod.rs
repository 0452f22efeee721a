//! Authorization model types and the validated type system.

pub mod tuple;
mod type_system;
mod types;
#[cfg(test)]
mod types_proptest;

pub use type_system::TypeSystem;
pub use types::{
    AuthorizationModel, Object, RelationDefinition, RelationReference, TupleKey, TypeDefinition,
    Userset,
};
