//! String helpers for the `type:id` and `type:id#relation` forms.

use crate::error::{DomainError, DomainResult};

/// Splits an object string into `(type, id)`.
pub fn split_object(object: &str) -> DomainResult<(&str, &str)> {
    match object.split_once(':') {
        Some((object_type, object_id))
            if !object_type.is_empty() && !object_id.is_empty() =>
        {
            Ok((object_type, object_id))
        }
        _ => Err(DomainError::InvalidObjectFormat {
            value: object.to_string(),
        }),
    }
}

/// Splits a user reference into `(object, relation)`.
///
/// `"group:eng#member"` yields `("group:eng", Some("member"))`;
/// `"user:jon"` yields `("user:jon", None)`.
pub fn split_object_relation(user: &str) -> (&str, Option<&str>) {
    match user.split_once('#') {
        Some((object, relation)) if !relation.is_empty() => (object, Some(relation)),
        _ => (user, None),
    }
}

/// Whether a user reference denotes a userset (`type:id#relation`).
pub fn is_userset(user: &str) -> bool {
    split_object_relation(user).1.is_some()
}

/// Whether a user reference is a type wildcard (`type:*`).
pub fn is_wildcard(user: &str) -> bool {
    match user.split_once(':') {
        Some((_, id)) => id == "*",
        None => false,
    }
}

/// Builds the `type:id#relation` form.
pub fn to_object_relation(object: &str, relation: &str) -> String {
    format!("{object}#{relation}")
}

/// Validates a requesting user: `type:id` or `type:id#relation`, never a
/// wildcard (wildcards are only valid in stored tuples).
pub fn validate_user(user: &str) -> DomainResult<()> {
    let (object, _) = split_object_relation(user);
    let (_, object_id) = split_object(object).map_err(|_| DomainError::InvalidUserFormat {
        value: user.to_string(),
    })?;
    if object_id == "*" {
        return Err(DomainError::InvalidUserFormat {
            value: user.to_string(),
        });
    }
    Ok(())
}

/// Validates a relation name is non-empty and not itself an object form.
pub fn validate_relation(relation: &str) -> DomainResult<()> {
    if relation.is_empty() || relation.contains(':') || relation.contains('#') {
        return Err(DomainError::InvalidRelationFormat {
            value: relation.to_string(),
        });
    }
    Ok(())
}
