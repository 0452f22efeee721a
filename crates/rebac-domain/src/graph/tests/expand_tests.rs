//! Expand tree tests.

use std::sync::Arc;

use crate::graph::{ExpandLeafValue, ExpandNode, ExpandQuery, ExpandRequest};
use crate::model::{
    AuthorizationModel, RelationDefinition, RelationReference, TypeDefinition, TypeSystem, Userset,
};

use super::mocks::{MockTupleReader, StaticTypeSystemResolver};

fn model() -> AuthorizationModel {
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
                        ],
                    },
                ],
            },
            TypeDefinition {
                type_name: "group".to_string(),
                relations: vec![RelationDefinition {
                    name: "member".to_string(),
                    rewrite: Userset::This,
                    directly_related_user_types: vec![RelationReference::direct("user")],
                }],
            },
        ],
    )
}

fn query(reader: Arc<MockTupleReader>) -> ExpandQuery {
    let typesystem = TypeSystem::new_and_validate(model()).unwrap();
    ExpandQuery::new(reader, Arc::new(StaticTypeSystemResolver::new(typesystem)))
}

#[tokio::test]
async fn expands_union_with_leaves() {
    let reader = Arc::new(MockTupleReader::new());
    reader.add("store-1", "document:1", "viewer", "user:jon");
    reader.add("store-1", "document:1", "viewer", "group:eng#member");
    let query = query(reader);

    let resp = query
        .expand(&ExpandRequest::new("store-1", "document:1", "viewer"))
        .await
        .unwrap();

    let ExpandNode::Union { name, nodes } = resp.tree.root else {
        panic!("expected union root");
    };
    assert_eq!(name, "document:1#viewer");
    assert_eq!(nodes.len(), 3);

    let ExpandNode::Leaf(direct) = &nodes[0] else {
        panic!("expected direct leaf");
    };
    let ExpandLeafValue::Users(users) = &direct.value else {
        panic!("expected users leaf");
    };
    assert_eq!(users, &vec!["group:eng#member".to_string(), "user:jon".to_string()]);

    let ExpandNode::Leaf(computed) = &nodes[1] else {
        panic!("expected computed leaf");
    };
    assert!(matches!(
        &computed.value,
        ExpandLeafValue::Computed { userset } if userset == "document:1#owner"
    ));

    let ExpandNode::Leaf(ttu) = &nodes[2] else {
        panic!("expected ttu leaf");
    };
    assert!(matches!(
        &ttu.value,
        ExpandLeafValue::TupleToUserset { tupleset, computed_userset }
            if tupleset == "document:1#parent" && computed_userset == "viewer"
    ));
}

#[tokio::test]
async fn expand_filters_invalid_tuples() {
    let reader = Arc::new(MockTupleReader::new());
    reader.add("store-1", "folder:x", "viewer", "user:maria");
    // folder#viewer admits only [user]; this tuple is invalid.
    reader.add("store-1", "folder:x", "viewer", "group:eng#member");
    let query = query(reader);

    let resp = query
        .expand(&ExpandRequest::new("store-1", "folder:x", "viewer"))
        .await
        .unwrap();

    let ExpandNode::Leaf(leaf) = resp.tree.root else {
        panic!("expected leaf root");
    };
    let ExpandLeafValue::Users(users) = leaf.value else {
        panic!("expected users leaf");
    };
    assert_eq!(users, vec!["user:maria".to_string()]);
}
