//! rebac-index: compile an authorization model into a recursive SQL view.
//!
//! Each `(object type, relation)` pair becomes a CTE named `type_relation`
//! with schema `(subject_type, subject_id, subject_relation, relation,
//! object_type, object_id)`, reading from a `tuples` table of the same
//! shape. The CTEs are bundled into a single `CREATE VIEW ... WITH
//! [MUTUALLY] RECURSIVE` statement whose body unions every pair, so the
//! view answers the Check predicate set-at-a-time.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;
use tracing::warn;

use rebac_domain::error::DomainError;
use rebac_domain::model::{TypeSystem, Userset};

/// Target SQL dialect.
///
/// Only `materialize` supports the mutual recursion required by models with
/// cross-relation difference or cyclic direct edges. The other dialects
/// still emit; rejection by the engine at `CREATE VIEW` time is the
/// documented failure mode for non-stratifiable models.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Postgresql,
    Mysql,
    Materialize,
}

impl FromStr for Dialect {
    type Err = MaterializeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "postgresql" => Ok(Dialect::Postgresql),
            "mysql" => Ok(Dialect::Mysql),
            "materialize" => Ok(Dialect::Materialize),
            other => Err(MaterializeError::UnsupportedDialect {
                dialect: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dialect::Postgresql => write!(f, "postgresql"),
            Dialect::Mysql => write!(f, "mysql"),
            Dialect::Materialize => write!(f, "materialize"),
        }
    }
}

/// Materialization failure.
#[derive(Debug, Error)]
pub enum MaterializeError {
    #[error("unsupported SQL dialect '{dialect}'")]
    UnsupportedDialect { dialect: String },

    #[error("model has no relations to materialize")]
    EmptyModel,

    #[error(transparent)]
    Model(#[from] DomainError),
}

/// Input to [`materialize`].
pub struct MaterializerInput<'a> {
    pub dialect: Dialect,
    pub index_name: &'a str,
    pub typesystem: &'a TypeSystem,
}

const COLUMNS: &str = "subject_type, subject_id, subject_relation, relation, object_type, object_id";

/// The join key identifying a subject/object pair across operands.
const OPERAND_KEY: [&str; 4] = ["subject_type", "subject_id", "object_type", "object_id"];

struct NamedSql {
    name: String,
    sql: String,
}

fn statement_name(object_type: &str, relation: &str) -> String {
    format!("{object_type}_{relation}")
}

fn quote_list(items: &[String]) -> String {
    items
        .iter()
        .map(|item| format!("'{item}'"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Produces the `CREATE VIEW` statement materializing the whole model.
pub fn materialize(input: MaterializerInput<'_>) -> Result<String, MaterializeError> {
    let typesystem = input.typesystem;

    let mut statements: BTreeMap<String, NamedSql> = BTreeMap::new();
    let mut has_difference = false;

    for (object_type, relations) in typesystem.get_all_relations() {
        for relation_name in relations {
            let relation = typesystem.get_relation(object_type, relation_name)?;
            if matches!(relation.rewrite, Userset::Difference { .. }) {
                has_difference = true;
            }
            let statement =
                materialize_rewrite(typesystem, object_type, relation_name, &relation.rewrite)?;
            statements.insert(statement.name.clone(), statement);
        }
    }

    if statements.is_empty() {
        return Err(MaterializeError::EmptyModel);
    }

    if has_difference && input.dialect != Dialect::Materialize {
        warn!(
            dialect = %input.dialect,
            "model uses difference rewrites; the '{}' dialect may reject the emitted view as \
             non-stratifiable",
            input.dialect
        );
    }

    let mut cte_definitions = Vec::with_capacity(statements.len());
    let mut selects = Vec::with_capacity(statements.len());
    for statement in statements.values() {
        let definition = match input.dialect {
            Dialect::Postgresql | Dialect::Mysql => format!(
                "{}({}) AS ({})",
                statement.name, COLUMNS, statement.sql
            ),
            Dialect::Materialize => format!(
                "{}(subject_type TEXT, subject_id TEXT, subject_relation TEXT, relation TEXT, \
                 object_type TEXT, object_id TEXT) AS ({})",
                statement.name, statement.sql
            ),
        };
        cte_definitions.push(definition);
        selects.push(format!("SELECT * FROM {}", statement.name));
    }

    let recursion_clause = match input.dialect {
        Dialect::Postgresql | Dialect::Mysql => "WITH RECURSIVE",
        Dialect::Materialize => "WITH MUTUALLY RECURSIVE",
    };

    Ok(format!(
        "CREATE VIEW {} AS {}\n  {}\n{};",
        input.index_name,
        recursion_clause,
        cte_definitions.join(",\n  "),
        selects.join(" UNION ALL ")
    ))
}

fn materialize_rewrite(
    typesystem: &TypeSystem,
    object_type: &str,
    relation: &str,
    rewrite: &Userset,
) -> Result<NamedSql, MaterializeError> {
    let name = statement_name(object_type, relation);
    match rewrite {
        Userset::This => materialize_direct(typesystem, object_type, relation),
        Userset::ComputedUserset {
            relation: rewritten,
        } => Ok(NamedSql {
            sql: format!(
                "SELECT subject_type, subject_id, subject_relation, '{relation}' AS relation, \
                 object_type, object_id FROM {}",
                statement_name(object_type, rewritten)
            ),
            name,
        }),
        Userset::TupleToUserset {
            tupleset,
            computed_userset,
        } => materialize_ttu(typesystem, object_type, relation, tupleset, computed_userset),
        Userset::Union { children } => {
            let mut parts = Vec::with_capacity(children.len());
            for child in children {
                parts.push(materialize_rewrite(typesystem, object_type, relation, child)?.sql);
            }
            Ok(NamedSql {
                name,
                sql: parts.join(" UNION "),
            })
        }
        Userset::Intersection { children } => {
            materialize_intersection(typesystem, object_type, relation, children)
        }
        Userset::Difference { base, subtract } => {
            let base = materialize_rewrite(typesystem, object_type, relation, base)?;
            let subtract = materialize_rewrite(typesystem, object_type, relation, subtract)?;

            let key_equality = OPERAND_KEY
                .iter()
                .map(|column| format!("b.{column}=s.{column}"))
                .collect::<Vec<_>>()
                .join(" AND ");

            Ok(NamedSql {
                name,
                sql: format!(
                    "WITH base AS ({}), subtract AS ({}) SELECT subject_type, subject_id, \
                     subject_relation, '{relation}' AS relation, object_type, object_id FROM base b \
                     WHERE NOT EXISTS (SELECT 1 FROM subtract s WHERE {key_equality})",
                    base.sql, subtract.sql
                ),
            })
        }
    }
}

/// Direct tuples: stored rows whose subject is a concrete object of a
/// permitted type, unioned with a join per permitted userset reference.
fn materialize_direct(
    typesystem: &TypeSystem,
    object_type: &str,
    relation: &str,
) -> Result<NamedSql, MaterializeError> {
    let references = typesystem.get_directly_related_user_types(object_type, relation)?;

    let mut subject_types: Vec<String> = Vec::new();
    let mut userset_joins: Vec<String> = Vec::new();

    for reference in &references {
        match &reference.relation {
            None => {
                // Direct and wildcard references both store rows under the
                // referenced subject type.
                if !subject_types.contains(&reference.type_name) {
                    subject_types.push(reference.type_name.clone());
                }
            }
            Some(subject_relation) => {
                let referenced = statement_name(&reference.type_name, subject_relation);
                userset_joins.push(format!(
                    "SELECT r.subject_type, r.subject_id, r.subject_relation, '{relation}' AS \
                     relation, s.object_type, s.object_id FROM {referenced} r, tuples s WHERE \
                     s.subject_type = '{subject_type}' AND s.subject_relation = \
                     '{subject_relation}' AND s.relation = '{relation}' AND s.object_type = \
                     '{object_type}' AND s.subject_type = r.object_type AND s.subject_id = \
                     r.object_id AND s.subject_relation = r.relation",
                    subject_type = reference.type_name,
                ));
            }
        }
    }

    let mut parts = Vec::new();
    if !subject_types.is_empty() {
        parts.push(format!(
            "SELECT {COLUMNS} FROM tuples WHERE object_type='{object_type}' AND \
             relation='{relation}' AND subject_type IN ({}) AND subject_relation=''",
            quote_list(&subject_types)
        ));
    }
    parts.extend(userset_joins);

    Ok(NamedSql {
        name: statement_name(object_type, relation),
        sql: parts.join(" UNION "),
    })
}

/// Tuple-to-userset: the tupleset link rows feed the CTE directly, and a
/// self-join per permitted parent type follows those links into the
/// parent's computed relation.
fn materialize_ttu(
    typesystem: &TypeSystem,
    object_type: &str,
    relation: &str,
    tupleset: &str,
    computed_userset: &str,
) -> Result<NamedSql, MaterializeError> {
    let references = typesystem.get_directly_related_user_types(object_type, tupleset)?;

    let mut parent_types: Vec<String> = Vec::new();
    for reference in &references {
        if reference.relation.is_some() {
            continue;
        }
        // Skip parent types the computed relation is undefined on.
        if !typesystem.has_relation(&reference.type_name, computed_userset) {
            continue;
        }
        if !parent_types.contains(&reference.type_name) {
            parent_types.push(reference.type_name.clone());
        }
    }

    let own_name = statement_name(object_type, relation);

    let mut parts = vec![format!(
        "SELECT {COLUMNS} FROM tuples WHERE subject_type IN ({}) AND relation = '{tupleset}' AND \
         object_type = '{object_type}'",
        quote_list(&parent_types)
    )];

    for parent_type in &parent_types {
        let parent_statement = statement_name(parent_type, computed_userset);
        parts.push(format!(
            "SELECT i.subject_type, i.subject_id, i.subject_relation, '{computed_userset}' AS \
             relation, p.object_type, p.object_id FROM {own_name} p, {parent_statement} i WHERE \
             p.relation = '{tupleset}' AND p.object_type = '{object_type}' AND p.subject_type = \
             i.object_type AND p.subject_id = i.object_id AND i.relation = '{computed_userset}'"
        ));
    }

    Ok(NamedSql {
        name: own_name,
        sql: parts.join(" UNION "),
    })
}

/// Intersection: the first operand filtered by a correlated `EXISTS` per
/// additional operand, with key equality across subject and object columns.
fn materialize_intersection(
    typesystem: &TypeSystem,
    object_type: &str,
    relation: &str,
    children: &[Userset],
) -> Result<NamedSql, MaterializeError> {
    let mut operand_definitions = Vec::with_capacity(children.len());
    for (index, child) in children.iter().enumerate() {
        let child_sql = materialize_rewrite(typesystem, object_type, relation, child)?.sql;
        operand_definitions.push(format!("operand_{index} AS ({child_sql})"));
    }

    let mut sql = format!("WITH {} SELECT {COLUMNS} FROM operand_0", operand_definitions.join(", "));

    for index in 1..children.len() {
        let key_equality = OPERAND_KEY
            .iter()
            .map(|column| format!("operand_{index}.{column} = operand_0.{column}"))
            .collect::<Vec<_>>()
            .join(" AND ");
        let clause = if index == 1 { "WHERE" } else { "AND" };
        sql.push_str(&format!(
            " {clause} EXISTS (SELECT 1 FROM operand_{index} WHERE {key_equality})"
        ));
    }

    Ok(NamedSql {
        name: statement_name(object_type, relation),
        sql,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rebac_domain::model::{
        AuthorizationModel, RelationDefinition, RelationReference, TypeDefinition,
    };

    fn relation(name: &str, rewrite: Userset, refs: Vec<RelationReference>) -> RelationDefinition {
        RelationDefinition {
            name: name.to_string(),
            rewrite,
            directly_related_user_types: refs,
        }
    }

    fn type_def(name: &str, relations: Vec<RelationDefinition>) -> TypeDefinition {
        TypeDefinition {
            type_name: name.to_string(),
            relations,
        }
    }

    fn document_model() -> TypeSystem {
        let model = AuthorizationModel::with_types(
            "1.1",
            vec![
                type_def("user", vec![]),
                type_def(
                    "group",
                    vec![relation(
                        "member",
                        Userset::This,
                        vec![
                            RelationReference::direct("user"),
                            RelationReference::userset("group", "member"),
                        ],
                    )],
                ),
                type_def(
                    "folder",
                    vec![relation(
                        "viewer",
                        Userset::This,
                        vec![RelationReference::direct("user")],
                    )],
                ),
                type_def(
                    "document",
                    vec![
                        relation(
                            "parent",
                            Userset::This,
                            vec![RelationReference::direct("folder")],
                        ),
                        relation("owner", Userset::This, vec![RelationReference::direct("user")]),
                        relation(
                            "viewer",
                            Userset::Union {
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
                            vec![
                                RelationReference::direct("user"),
                                RelationReference::userset("group", "member"),
                            ],
                        ),
                    ],
                ),
            ],
        );
        TypeSystem::new_and_validate(model).unwrap()
    }

    fn render(dialect: Dialect, typesystem: &TypeSystem) -> String {
        materialize(MaterializerInput {
            dialect,
            index_name: "fga_index",
            typesystem,
        })
        .unwrap()
    }

    #[test]
    fn emits_one_cte_per_relation() {
        let ts = document_model();
        let sql = render(Dialect::Materialize, &ts);

        for cte in [
            "group_member(",
            "folder_viewer(",
            "document_parent(",
            "document_owner(",
            "document_viewer(",
        ] {
            assert!(sql.contains(cte), "missing {cte} in:\n{sql}");
        }
        assert!(sql.contains("CREATE VIEW fga_index AS WITH MUTUALLY RECURSIVE"));
        assert!(sql.contains("SELECT * FROM document_viewer"));
        assert!(sql.contains(" UNION ALL "));
        assert!(sql.ends_with(";"));
    }

    #[test]
    fn dialect_headers_differ() {
        let ts = document_model();

        let pg = render(Dialect::Postgresql, &ts);
        assert!(pg.contains("WITH RECURSIVE"));
        assert!(!pg.contains("MUTUALLY"));
        assert!(pg.contains("document_viewer(subject_type, subject_id, subject_relation, relation, object_type, object_id)"));

        let mz = render(Dialect::Materialize, &ts);
        assert!(mz.contains("WITH MUTUALLY RECURSIVE"));
        assert!(mz.contains("subject_type TEXT"));
    }

    #[test]
    fn direct_reads_stored_tuples_and_joins_usersets() {
        let ts = document_model();
        let sql = render(Dialect::Materialize, &ts);

        // Concrete subject types read straight from the tuples table.
        assert!(sql.contains(
            "FROM tuples WHERE object_type='document' AND relation='viewer' AND subject_type IN \
             ('user') AND subject_relation=''"
        ));
        // The group#member reference joins the group_member CTE.
        assert!(sql.contains("FROM group_member r, tuples s"));
    }

    #[test]
    fn ttu_self_joins_through_the_link_rows() {
        let ts = document_model();
        let sql = render(Dialect::Materialize, &ts);

        assert!(sql.contains(
            "FROM tuples WHERE subject_type IN ('folder') AND relation = 'parent' AND object_type \
             = 'document'"
        ));
        assert!(sql.contains("FROM document_viewer p, folder_viewer i"));
    }

    #[test]
    fn intersection_correlates_operands_on_keys() {
        let model = AuthorizationModel::with_types(
            "1.1",
            vec![
                type_def("user", vec![]),
                type_def(
                    "team",
                    vec![
                        relation("owner", Userset::This, vec![RelationReference::direct("user")]),
                        relation(
                            "approved",
                            Userset::This,
                            vec![RelationReference::direct("user")],
                        ),
                        relation(
                            "seller",
                            Userset::Intersection {
                                children: vec![
                                    Userset::ComputedUserset {
                                        relation: "owner".to_string(),
                                    },
                                    Userset::ComputedUserset {
                                        relation: "approved".to_string(),
                                    },
                                ],
                            },
                            vec![],
                        ),
                    ],
                ),
            ],
        );
        let ts = TypeSystem::new_and_validate(model).unwrap();
        let sql = render(Dialect::Materialize, &ts);

        assert!(sql.contains("WITH operand_0 AS ("));
        assert!(sql.contains(
            "EXISTS (SELECT 1 FROM operand_1 WHERE operand_1.subject_type = operand_0.subject_type"
        ));
        assert!(sql.contains("operand_1.object_id = operand_0.object_id"));
    }

    #[test]
    fn difference_uses_anti_join_on_keys() {
        let model = AuthorizationModel::with_types(
            "1.1",
            vec![
                type_def("user", vec![]),
                type_def(
                    "team",
                    vec![
                        relation("member", Userset::This, vec![RelationReference::direct("user")]),
                        relation(
                            "limited",
                            Userset::This,
                            vec![RelationReference::direct("user")],
                        ),
                        relation(
                            "ambassador",
                            Userset::Difference {
                                base: Box::new(Userset::ComputedUserset {
                                    relation: "member".to_string(),
                                }),
                                subtract: Box::new(Userset::ComputedUserset {
                                    relation: "limited".to_string(),
                                }),
                            },
                            vec![],
                        ),
                    ],
                ),
            ],
        );
        let ts = TypeSystem::new_and_validate(model).unwrap();
        let sql = render(Dialect::Materialize, &ts);

        assert!(sql.contains("WITH base AS ("));
        assert!(sql.contains(
            "WHERE NOT EXISTS (SELECT 1 FROM subtract s WHERE b.subject_type=s.subject_type"
        ));
        // Non-materialize dialects still emit for difference models.
        assert!(render(Dialect::Postgresql, &ts).contains("WITH RECURSIVE"));
    }

    #[test]
    fn output_is_deterministic() {
        let ts = document_model();
        assert_eq!(render(Dialect::Materialize, &ts), render(Dialect::Materialize, &ts));

        let ts2 = document_model();
        assert_eq!(render(Dialect::Materialize, &ts), render(Dialect::Materialize, &ts2));
    }

    #[test]
    fn empty_model_is_an_error() {
        let ts = TypeSystem::new_and_validate(AuthorizationModel::new("1.1")).unwrap();
        assert!(matches!(
            materialize(MaterializerInput {
                dialect: Dialect::Postgresql,
                index_name: "idx",
                typesystem: &ts,
            }),
            Err(MaterializeError::EmptyModel)
        ));
    }

    #[test]
    fn dialect_parsing() {
        assert_eq!("postgresql".parse::<Dialect>().unwrap(), Dialect::Postgresql);
        assert_eq!("mysql".parse::<Dialect>().unwrap(), Dialect::Mysql);
        assert_eq!("materialize".parse::<Dialect>().unwrap(), Dialect::Materialize);
        assert!(matches!(
            "sqlite".parse::<Dialect>(),
            Err(MaterializeError::UnsupportedDialect { .. })
        ));
    }
}
