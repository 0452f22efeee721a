//! Core type definitions for the authorization model.

use std::fmt;

use serde::{Deserialize, Serialize};

/// An object identifier (e.g., "document:readme").
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Object {
    /// The type portion (e.g., "document").
    pub object_type: String,
    /// The ID portion (e.g., "readme").
    pub object_id: String,
}

impl Object {
    /// Creates a new Object from type and ID.
    pub fn new(object_type: impl Into<String>, object_id: impl Into<String>) -> Self {
        Self {
            object_type: object_type.into(),
            object_id: object_id.into(),
        }
    }

    /// Parses an object from "type:id" format.
    pub fn parse(value: &str) -> Result<Self, &'static str> {
        let (object_type, object_id) = value
            .split_once(':')
            .ok_or("object must be in 'type:id' format")?;
        if object_type.is_empty() || object_id.is_empty() {
            return Err("object type and id cannot be empty");
        }
        Ok(Self::new(object_type, object_id))
    }
}

impl fmt::Display for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.object_type, self.object_id)
    }
}

/// A relationship fact: `object#relation@user`.
///
/// The user is either a bare object ("user:jon"), a userset
/// ("group:eng#member"), or a type wildcard ("user:*").
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TupleKey {
    /// The object of the relationship ("type:id").
    pub object: String,
    /// The relation between user and object.
    pub relation: String,
    /// The user (subject) of the relationship.
    pub user: String,
}

impl TupleKey {
    /// Creates a new TupleKey.
    pub fn new(
        object: impl Into<String>,
        relation: impl Into<String>,
        user: impl Into<String>,
    ) -> Self {
        Self {
            object: object.into(),
            relation: relation.into(),
            user: user.into(),
        }
    }
}

impl fmt::Display for TupleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}@{}", self.object, self.relation, self.user)
    }
}

/// A reference to a user type that a relation directly admits.
///
/// `relation: None, wildcard: false` admits concrete objects of the type,
/// `relation: Some(r)` admits usersets `type:id#r`, and `wildcard: true`
/// admits the `type:*` wildcard.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RelationReference {
    /// The referenced type (e.g., "user", "group").
    pub type_name: String,
    /// Optional relation for userset references (e.g., "member").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relation: Option<String>,
    /// Whether this reference admits the type wildcard (`type:*`).
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub wildcard: bool,
}

impl RelationReference {
    /// A reference admitting concrete objects of `type_name`.
    pub fn direct(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            relation: None,
            wildcard: false,
        }
    }

    /// A reference admitting usersets `type_name:id#relation`.
    pub fn userset(type_name: impl Into<String>, relation: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            relation: Some(relation.into()),
            wildcard: false,
        }
    }

    /// A reference admitting the `type_name:*` wildcard.
    pub fn wildcard(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            relation: None,
            wildcard: true,
        }
    }
}

impl fmt::Display for RelationReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.wildcard {
            write!(f, "{}:*", self.type_name)
        } else if let Some(rel) = &self.relation {
            write!(f, "{}#{}", self.type_name, rel)
        } else {
            write!(f, "{}", self.type_name)
        }
    }
}

/// An authorization model defining types and their relations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationModel {
    /// Schema version (e.g., "1.1").
    pub schema_version: String,
    /// Type definitions in the model.
    pub type_definitions: Vec<TypeDefinition>,
}

impl AuthorizationModel {
    /// Creates an empty model with the given schema version.
    pub fn new(schema_version: impl Into<String>) -> Self {
        Self {
            schema_version: schema_version.into(),
            type_definitions: Vec::new(),
        }
    }

    /// Creates a model with the given type definitions.
    pub fn with_types(
        schema_version: impl Into<String>,
        type_definitions: Vec<TypeDefinition>,
    ) -> Self {
        Self {
            schema_version: schema_version.into(),
            type_definitions,
        }
    }
}

/// A type definition within the authorization model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeDefinition {
    /// The type name (e.g., "document", "folder").
    pub type_name: String,
    /// Relations defined on this type.
    #[serde(default)]
    pub relations: Vec<RelationDefinition>,
}

/// A relation definition on a type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationDefinition {
    /// The relation name.
    pub name: String,
    /// The userset rewrite for this relation.
    pub rewrite: Userset,
    /// User types this relation directly admits in stored tuples.
    #[serde(default)]
    pub directly_related_user_types: Vec<RelationReference>,
}

/// A userset rewrite defines how a relation is computed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Userset {
    /// Direct relationships (consult stored tuples).
    This,
    /// Users with another relation on the same object.
    ComputedUserset { relation: String },
    /// Follow the tupleset relation, then evaluate the computed relation
    /// on each discovered object.
    TupleToUserset {
        tupleset: String,
        computed_userset: String,
    },
    /// Set union of the children.
    Union { children: Vec<Userset> },
    /// Set intersection of the children.
    Intersection { children: Vec<Userset> },
    /// Base minus subtract.
    Difference {
        base: Box<Userset>,
        subtract: Box<Userset>,
    },
}
