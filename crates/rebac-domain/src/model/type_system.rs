//! Type system: validated model with cached relation lookups.

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;

use crate::error::{DomainError, DomainResult};

use super::types::{AuthorizationModel, RelationDefinition, RelationReference, Userset};

/// A validated authorization model with efficient relation lookups.
///
/// Construction via [`TypeSystem::new_and_validate`] rejects any model that
/// violates the rewrite invariants; once built, the type system is read-only
/// and safe to share across tasks. Lookups are cached with `DashMap`.
#[derive(Debug)]
pub struct TypeSystem {
    model: Arc<AuthorizationModel>,
    /// Cache for relation definitions, keyed by "type#relation".
    relation_cache: DashMap<String, Arc<RelationDefinition>>,
}

impl TypeSystem {
    /// Builds a type system, validating the whole model up front.
    ///
    /// Validation is total and deterministic: every violation found in a
    /// single pass is reported, sorted by location.
    pub fn new_and_validate(model: AuthorizationModel) -> DomainResult<Self> {
        let ts = Self {
            model: Arc::new(model),
            relation_cache: DashMap::new(),
        };
        ts.validate()?;
        Ok(ts)
    }

    /// Returns the underlying authorization model.
    pub fn model(&self) -> &AuthorizationModel {
        &self.model
    }

    /// Whether a type is defined in the model.
    pub fn has_type(&self, type_name: &str) -> bool {
        self.model
            .type_definitions
            .iter()
            .any(|td| td.type_name == type_name)
    }

    /// Whether a relation is defined on a type.
    pub fn has_relation(&self, type_name: &str, relation: &str) -> bool {
        self.get_relation(type_name, relation).is_ok()
    }

    /// Gets a relation definition for a type.
    pub fn get_relation(
        &self,
        type_name: &str,
        relation: &str,
    ) -> DomainResult<Arc<RelationDefinition>> {
        let cache_key = format!("{type_name}#{relation}");
        if let Some(cached) = self.relation_cache.get(&cache_key) {
            return Ok(Arc::clone(cached.value()));
        }

        let type_def = self
            .model
            .type_definitions
            .iter()
            .find(|td| td.type_name == type_name)
            .ok_or_else(|| DomainError::TypeUndefined {
                type_name: type_name.to_string(),
            })?;

        let relation_def = type_def
            .relations
            .iter()
            .find(|r| r.name == relation)
            .ok_or_else(|| DomainError::RelationUndefined {
                type_name: type_name.to_string(),
                relation: relation.to_string(),
            })?;

        let relation_def = Arc::new(relation_def.clone());
        self.relation_cache
            .insert(cache_key, Arc::clone(&relation_def));
        Ok(relation_def)
    }

    /// All relations in the model as `type -> relation names`, sorted.
    ///
    /// The materializer iterates this to emit one CTE per relation.
    pub fn get_all_relations(&self) -> BTreeMap<&str, Vec<&str>> {
        let mut all = BTreeMap::new();
        for type_def in &self.model.type_definitions {
            let mut names: Vec<&str> = type_def.relations.iter().map(|r| r.name.as_str()).collect();
            names.sort_unstable();
            all.insert(type_def.type_name.as_str(), names);
        }
        all
    }

    /// The user-type references a relation directly admits.
    pub fn get_directly_related_user_types(
        &self,
        type_name: &str,
        relation: &str,
    ) -> DomainResult<Vec<RelationReference>> {
        Ok(self
            .get_relation(type_name, relation)?
            .directly_related_user_types
            .clone())
    }

    /// Whether a relation admits at least one concrete object type
    /// (a direct or wildcard reference, as opposed to only usersets).
    pub fn is_directly_assignable(&self, type_name: &str, relation: &str) -> DomainResult<bool> {
        Ok(self
            .get_relation(type_name, relation)?
            .directly_related_user_types
            .iter()
            .any(|r| r.relation.is_none()))
    }

    /// Whether a relation admits the `user_type:*` wildcard.
    pub fn allows_wildcard(&self, type_name: &str, relation: &str, user_type: &str) -> bool {
        self.get_relation(type_name, relation)
            .map(|rel| {
                rel.directly_related_user_types
                    .iter()
                    .any(|r| r.wildcard && r.type_name == user_type)
            })
            .unwrap_or(false)
    }

    /// Whether a stored tuple's user shape matches the relation's
    /// directly-related user types. Tuples that fail this predicate are
    /// invalid under the model and must never contribute to results.
    pub fn is_tuple_user_allowed(
        &self,
        object_type: &str,
        relation: &str,
        user_type: &str,
        user_id: &str,
        user_relation: Option<&str>,
    ) -> bool {
        let Ok(rel) = self.get_relation(object_type, relation) else {
            return false;
        };

        rel.directly_related_user_types.iter().any(|r| {
            if r.type_name != user_type {
                return false;
            }
            match (user_relation, &r.relation) {
                (Some(ur), Some(rr)) => ur == rr,
                (None, None) => {
                    if user_id == "*" {
                        r.wildcard
                    } else {
                        !r.wildcard
                    }
                }
                _ => false,
            }
        })
    }

    fn validate(&self) -> DomainResult<()> {
        let mut errors = Vec::new();

        for type_def in &self.model.type_definitions {
            for relation_def in &type_def.relations {
                self.validate_type_references(
                    &type_def.type_name,
                    relation_def,
                    &mut errors,
                );
                self.validate_rewrite(
                    &type_def.type_name,
                    &relation_def.name,
                    &relation_def.rewrite,
                    &mut errors,
                );
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            errors.sort();
            Err(DomainError::ModelValidation {
                message: errors.join("; "),
            })
        }
    }

    fn validate_type_references(
        &self,
        type_name: &str,
        relation_def: &RelationDefinition,
        errors: &mut Vec<String>,
    ) {
        for reference in &relation_def.directly_related_user_types {
            if !self.has_type(&reference.type_name) {
                errors.push(format!(
                    "type '{}' relation '{}': reference to undefined type '{}'",
                    type_name, relation_def.name, reference.type_name
                ));
                continue;
            }
            if let Some(ref_relation) = &reference.relation {
                if !self.has_relation(&reference.type_name, ref_relation) {
                    errors.push(format!(
                        "type '{}' relation '{}': reference to undefined relation '{}#{}'",
                        type_name, relation_def.name, reference.type_name, ref_relation
                    ));
                }
            }
        }
    }

    fn validate_rewrite(
        &self,
        type_name: &str,
        relation_name: &str,
        rewrite: &Userset,
        errors: &mut Vec<String>,
    ) {
        match rewrite {
            Userset::This => {
                let assignable = self
                    .get_relation(type_name, relation_name)
                    .map(|rel| !rel.directly_related_user_types.is_empty())
                    .unwrap_or(false);
                if !assignable {
                    errors.push(format!(
                        "type '{}' relation '{}': assignable relation has no directly related user types",
                        type_name, relation_name
                    ));
                }
            }
            Userset::ComputedUserset { relation } => {
                if !self.has_relation(type_name, relation) {
                    errors.push(format!(
                        "type '{}' relation '{}': computed userset references undefined relation '{}'",
                        type_name, relation_name, relation
                    ));
                }
            }
            Userset::TupleToUserset {
                tupleset,
                computed_userset,
            } => {
                if !self.has_relation(type_name, tupleset) {
                    errors.push(format!(
                        "type '{}' relation '{}': tupleset references undefined relation '{}'",
                        type_name, relation_name, tupleset
                    ));
                    return;
                }

                // The tupleset relation must admit at least one concrete
                // object type; usersets cannot be followed through a TTU.
                let related = self
                    .get_relation(type_name, tupleset)
                    .map(|rel| rel.directly_related_user_types.clone())
                    .unwrap_or_default();
                if !related.iter().any(|r| r.relation.is_none() && !r.wildcard) {
                    errors.push(format!(
                        "type '{}' relation '{}': tupleset relation '{}' is not directly assignable to a concrete object type",
                        type_name, relation_name, tupleset
                    ));
                    return;
                }

                // The computed relation must exist on at least one of the
                // tupleset's permitted parent types.
                let resolvable = related
                    .iter()
                    .filter(|r| r.relation.is_none() && !r.wildcard)
                    .any(|r| self.has_relation(&r.type_name, computed_userset));
                if !resolvable {
                    errors.push(format!(
                        "type '{}' relation '{}': computed relation '{}' undefined on every type admitted by tupleset '{}'",
                        type_name, relation_name, computed_userset, tupleset
                    ));
                }
            }
            Userset::Union { children } | Userset::Intersection { children } => {
                for child in children {
                    self.validate_rewrite(type_name, relation_name, child, errors);
                }
            }
            Userset::Difference { base, subtract } => {
                self.validate_rewrite(type_name, relation_name, base, errors);
                self.validate_rewrite(type_name, relation_name, subtract, errors);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::types::TypeDefinition;

    fn test_model() -> AuthorizationModel {
        AuthorizationModel::with_types(
            "1.1",
            vec![
                TypeDefinition {
                    type_name: "user".to_string(),
                    relations: vec![],
                },
                TypeDefinition {
                    type_name: "folder".to_string(),
                    relations: vec![RelationDefinition {
                        name: "viewer".to_string(),
                        rewrite: Userset::This,
                        directly_related_user_types: vec![RelationReference::direct("user")],
                    }],
                },
                TypeDefinition {
                    type_name: "document".to_string(),
                    relations: vec![
                        RelationDefinition {
                            name: "parent".to_string(),
                            rewrite: Userset::This,
                            directly_related_user_types: vec![RelationReference::direct("folder")],
                        },
                        RelationDefinition {
                            name: "owner".to_string(),
                            rewrite: Userset::This,
                            directly_related_user_types: vec![RelationReference::direct("user")],
                        },
                        RelationDefinition {
                            name: "viewer".to_string(),
                            rewrite: Userset::Union {
                                children: vec![
                                    Userset::This,
                                    Userset::ComputedUserset {
                                        relation: "owner".to_string(),
                                    },
                                    Userset::TupleToUserset {
                                        tupleset: "parent".to_string(),
                                        computed_userset: "viewer".to_string(),
                                    },
                                ],
                            },
                            directly_related_user_types: vec![
                                RelationReference::direct("user"),
                                RelationReference::userset("group", "member"),
                                RelationReference::wildcard("user"),
                            ],
                        },
                    ],
                },
                TypeDefinition {
                    type_name: "group".to_string(),
                    relations: vec![RelationDefinition {
                        name: "member".to_string(),
                        rewrite: Userset::This,
                        directly_related_user_types: vec![
                            RelationReference::direct("user"),
                            RelationReference::userset("group", "member"),
                        ],
                    }],
                },
            ],
        )
    }

    #[test]
    fn validates_well_formed_model() {
        assert!(TypeSystem::new_and_validate(test_model()).is_ok());
    }

    #[test]
    fn get_relation_and_cache() {
        let ts = TypeSystem::new_and_validate(test_model()).unwrap();
        let rel = ts.get_relation("document", "viewer").unwrap();
        assert_eq!(rel.name, "viewer");
        // Second lookup served from cache, still equal.
        let rel2 = ts.get_relation("document", "viewer").unwrap();
        assert_eq!(rel.name, rel2.name);
    }

    #[test]
    fn get_relation_undefined() {
        let ts = TypeSystem::new_and_validate(test_model()).unwrap();
        assert!(matches!(
            ts.get_relation("document", "nope"),
            Err(DomainError::RelationUndefined { .. })
        ));
        assert!(matches!(
            ts.get_relation("nope", "viewer"),
            Err(DomainError::TypeUndefined { .. })
        ));
    }

    #[test]
    fn all_relations_sorted() {
        let ts = TypeSystem::new_and_validate(test_model()).unwrap();
        let all = ts.get_all_relations();
        assert_eq!(
            all.get("document").unwrap(),
            &vec!["owner", "parent", "viewer"]
        );
        assert!(all.get("user").unwrap().is_empty());
    }

    #[test]
    fn rejects_undefined_computed_userset() {
        let model = AuthorizationModel::with_types(
            "1.1",
            vec![TypeDefinition {
                type_name: "document".to_string(),
                relations: vec![RelationDefinition {
                    name: "viewer".to_string(),
                    rewrite: Userset::ComputedUserset {
                        relation: "missing".to_string(),
                    },
                    directly_related_user_types: vec![],
                }],
            }],
        );
        let err = TypeSystem::new_and_validate(model).unwrap_err();
        assert!(matches!(err, DomainError::ModelValidation { ref message } if message.contains("missing")));
    }

    #[test]
    fn rejects_this_without_assignable_types() {
        let model = AuthorizationModel::with_types(
            "1.1",
            vec![TypeDefinition {
                type_name: "document".to_string(),
                relations: vec![RelationDefinition {
                    name: "viewer".to_string(),
                    rewrite: Userset::This,
                    directly_related_user_types: vec![],
                }],
            }],
        );
        assert!(TypeSystem::new_and_validate(model).is_err());
    }

    #[test]
    fn rejects_ttu_over_userset_only_tupleset() {
        let model = AuthorizationModel::with_types(
            "1.1",
            vec![
                TypeDefinition {
                    type_name: "group".to_string(),
                    relations: vec![RelationDefinition {
                        name: "member".to_string(),
                        rewrite: Userset::This,
                        directly_related_user_types: vec![RelationReference::userset(
                            "group", "member",
                        )],
                    }],
                },
                TypeDefinition {
                    type_name: "document".to_string(),
                    relations: vec![
                        RelationDefinition {
                            name: "parent".to_string(),
                            rewrite: Userset::This,
                            directly_related_user_types: vec![RelationReference::userset(
                                "group", "member",
                            )],
                        },
                        RelationDefinition {
                            name: "viewer".to_string(),
                            rewrite: Userset::TupleToUserset {
                                tupleset: "parent".to_string(),
                                computed_userset: "member".to_string(),
                            },
                            directly_related_user_types: vec![],
                        },
                    ],
                },
            ],
        );
        let err = TypeSystem::new_and_validate(model).unwrap_err();
        assert!(
            matches!(err, DomainError::ModelValidation { ref message } if message.contains("not directly assignable"))
        );
    }

    #[test]
    fn rejects_reference_to_undefined_type() {
        let model = AuthorizationModel::with_types(
            "1.1",
            vec![TypeDefinition {
                type_name: "document".to_string(),
                relations: vec![RelationDefinition {
                    name: "viewer".to_string(),
                    rewrite: Userset::This,
                    directly_related_user_types: vec![RelationReference::direct("ghost")],
                }],
            }],
        );
        let err = TypeSystem::new_and_validate(model).unwrap_err();
        assert!(matches!(err, DomainError::ModelValidation { ref message } if message.contains("ghost")));
    }

    #[test]
    fn tuple_user_allowed() {
        let ts = TypeSystem::new_and_validate(test_model()).unwrap();

        // Direct user allowed on document#viewer.
        assert!(ts.is_tuple_user_allowed("document", "viewer", "user", "jon", None));
        // Userset reference allowed.
        assert!(ts.is_tuple_user_allowed("document", "viewer", "group", "eng", Some("member")));
        // Wildcard allowed because of the wildcard reference.
        assert!(ts.is_tuple_user_allowed("document", "viewer", "user", "*", None));
        // Wrong type rejected.
        assert!(!ts.is_tuple_user_allowed("document", "viewer", "folder", "x", None));
        // Userset of the wrong relation rejected.
        assert!(!ts.is_tuple_user_allowed("document", "viewer", "group", "eng", Some("owner")));
        // Wildcard rejected where no wildcard reference exists.
        assert!(!ts.is_tuple_user_allowed("folder", "viewer", "user", "*", None));
    }

    #[test]
    fn validation_is_deterministic() {
        let model = AuthorizationModel::with_types(
            "1.1",
            vec![TypeDefinition {
                type_name: "document".to_string(),
                relations: vec![
                    RelationDefinition {
                        name: "a".to_string(),
                        rewrite: Userset::ComputedUserset {
                            relation: "missing_one".to_string(),
                        },
                        directly_related_user_types: vec![],
                    },
                    RelationDefinition {
                        name: "b".to_string(),
                        rewrite: Userset::ComputedUserset {
                            relation: "missing_two".to_string(),
                        },
                        directly_related_user_types: vec![],
                    },
                ],
            }],
        );

        let first = TypeSystem::new_and_validate(model.clone())
            .unwrap_err()
            .to_string();
        let second = TypeSystem::new_and_validate(model).unwrap_err().to_string();
        assert_eq!(first, second);
        assert!(first.contains("missing_one") && first.contains("missing_two"));
    }
}
