//! Expand: materialize one level of a relation as a userset tree.
//!
//! Unlike Check, Expand does not recurse through tuples; computed and
//! tuple-to-userset rewrites appear as leaves referencing the usersets a
//! caller would expand next.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::DomainResult;
use crate::model::tuple::{split_object, to_object_relation};
use crate::model::{TypeSystem, Userset};
use crate::storage::{filter_invalid_tuples, ReadFilter, TupleReader};

use super::dispatch::TypeSystemResolver;

/// Request to expand `object#relation`.
#[derive(Debug, Clone)]
pub struct ExpandRequest {
    pub store_id: String,
    /// Model to evaluate under; `None` resolves the latest model.
    pub authorization_model_id: Option<String>,
    /// The object to expand ("type:id").
    pub object: String,
    pub relation: String,
}

impl ExpandRequest {
    pub fn new(
        store_id: impl Into<String>,
        object: impl Into<String>,
        relation: impl Into<String>,
    ) -> Self {
        Self {
            store_id: store_id.into(),
            authorization_model_id: None,
            object: object.into(),
            relation: relation.into(),
        }
    }

    pub fn with_model_id(mut self, model_id: impl Into<String>) -> Self {
        self.authorization_model_id = Some(model_id.into());
        self
    }
}

/// Result of expanding a relation.
#[derive(Debug, Clone)]
pub struct ExpandResponse {
    pub tree: UsersetTree,
}

/// A tree describing how users relate to the expanded object.
#[derive(Debug, Clone)]
pub struct UsersetTree {
    pub root: ExpandNode,
}

/// A node in the expansion tree.
#[derive(Debug, Clone)]
pub enum ExpandNode {
    /// A leaf with direct content.
    Leaf(ExpandLeaf),
    /// Any child grants access.
    Union { name: String, nodes: Vec<ExpandNode> },
    /// All children must grant access.
    Intersection { name: String, nodes: Vec<ExpandNode> },
    /// Base minus subtract.
    Difference {
        name: String,
        base: Box<ExpandNode>,
        subtract: Box<ExpandNode>,
    },
}

impl ExpandNode {
    pub fn name(&self) -> &str {
        match self {
            ExpandNode::Leaf(leaf) => &leaf.name,
            ExpandNode::Union { name, .. } => name,
            ExpandNode::Intersection { name, .. } => name,
            ExpandNode::Difference { name, .. } => name,
        }
    }
}

/// A leaf node.
#[derive(Debug, Clone)]
pub struct ExpandLeaf {
    pub name: String,
    pub value: ExpandLeafValue,
}

/// Content of a leaf node.
#[derive(Debug, Clone)]
pub enum ExpandLeafValue {
    /// Direct users ("user:jon", "group:eng#member", "user:*").
    Users(Vec<String>),
    /// Users of another relation on the same object.
    Computed { userset: String },
    /// Users reached through a tupleset link.
    TupleToUserset {
        tupleset: String,
        computed_userset: String,
    },
}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Expands relations into userset trees.
pub struct ExpandQuery {
    reader: Arc<dyn TupleReader>,
    typesystems: Arc<dyn TypeSystemResolver>,
}

impl ExpandQuery {
    pub fn new(reader: Arc<dyn TupleReader>, typesystems: Arc<dyn TypeSystemResolver>) -> Self {
        Self {
            reader,
            typesystems,
        }
    }

    pub async fn expand(&self, req: &ExpandRequest) -> DomainResult<ExpandResponse> {
        let typesystem = self
            .typesystems
            .resolve(&req.store_id, req.authorization_model_id.as_deref())
            .await?;

        let (object_type, _) = split_object(&req.object)?;
        let relation = typesystem.get_relation(object_type, &req.relation)?;

        let root = self
            .expand_rewrite(req, &typesystem, &relation.rewrite)
            .await?;
        Ok(ExpandResponse {
            tree: UsersetTree { root },
        })
    }

    fn expand_rewrite<'a>(
        &'a self,
        req: &'a ExpandRequest,
        typesystem: &'a Arc<TypeSystem>,
        rewrite: &'a Userset,
    ) -> BoxFuture<'a, DomainResult<ExpandNode>> {
        let name = to_object_relation(&req.object, &req.relation);
        Box::pin(async move {
            match rewrite {
                Userset::This => {
                    let (object_type, object_id) = split_object(&req.object)?;
                    let filter =
                        ReadFilter::for_object_relation(object_type, object_id, &req.relation);
                    let iter = self.reader.read(&req.store_id, &filter).await?;
                    let mut iter = filter_invalid_tuples(iter, Arc::clone(typesystem));

                    let mut users = Vec::new();
                    while let Some(tuple) = iter.next().await? {
                        users.push(tuple.user_string());
                    }
                    users.sort_unstable();

                    Ok(ExpandNode::Leaf(ExpandLeaf {
                        name,
                        value: ExpandLeafValue::Users(users),
                    }))
                }
                Userset::ComputedUserset { relation } => Ok(ExpandNode::Leaf(ExpandLeaf {
                    name,
                    value: ExpandLeafValue::Computed {
                        userset: to_object_relation(&req.object, relation),
                    },
                })),
                Userset::TupleToUserset {
                    tupleset,
                    computed_userset,
                } => Ok(ExpandNode::Leaf(ExpandLeaf {
                    name,
                    value: ExpandLeafValue::TupleToUserset {
                        tupleset: to_object_relation(&req.object, tupleset),
                        computed_userset: computed_userset.clone(),
                    },
                })),
                Userset::Union { children } => {
                    let mut nodes = Vec::with_capacity(children.len());
                    for child in children {
                        nodes.push(self.expand_rewrite(req, typesystem, child).await?);
                    }
                    Ok(ExpandNode::Union { name, nodes })
                }
                Userset::Intersection { children } => {
                    let mut nodes = Vec::with_capacity(children.len());
                    for child in children {
                        nodes.push(self.expand_rewrite(req, typesystem, child).await?);
                    }
                    Ok(ExpandNode::Intersection { name, nodes })
                }
                Userset::Difference { base, subtract } => {
                    let base = self.expand_rewrite(req, typesystem, base).await?;
                    let subtract = self.expand_rewrite(req, typesystem, subtract).await?;
                    Ok(ExpandNode::Difference {
                        name,
                        base: Box::new(base),
                        subtract: Box::new(subtract),
                    })
                }
            }
        })
    }
}
