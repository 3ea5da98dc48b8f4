//! Root-entity resolution and discriminator predicates.
//!
//! Every root set a query touches (including sets inside lambdas) must
//! belong to one inheritance hierarchy: documents of independent root types
//! cannot be combined in one store query.

use docql_core::error::QueryError;
use docql_core::expr::{walk_query, walk_terminal, Node, Query, QueryTree};
use docql_core::model::{EntityType, Model};
use docql_core::sql::{SqlBinaryOp, SqlExpr};
use docql_core::types::Scalar;

use crate::report;

/// The entity type a query is rooted at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootInfo {
    /// Entity named by the outermost source.
    pub entity: String,
    /// Top of its hierarchy.
    pub root: String,
    pub container: String,
}

/// Find the queried entity type and reject trees spanning independent roots.
pub fn resolve_root(tree: &QueryTree, model: &Model) -> Result<RootInfo, QueryError> {
    let mut entities: Vec<String> = Vec::new();
    let mut collect = |n: Node<'_>| {
        if let Node::Query(Query::Source { entity }) = n {
            if !entities.contains(entity) {
                entities.push(entity.clone());
            }
        }
    };
    walk_query(&tree.query, &mut collect);
    if let Some(t) = &tree.terminal {
        walk_terminal(t, &mut collect);
    }

    let mut first_root: Option<&EntityType> = None;
    for name in &entities {
        let root = model.root_of(name).ok_or_else(|| {
            report::unsupported(&tree.query, format!("'{name}' is not a mapped entity type"))
        })?;
        match first_root {
            None => first_root = Some(root),
            Some(existing) if existing.name != root.name => {
                return Err(report::multiple_roots(&existing.name, &root.name));
            }
            Some(_) => {}
        }
    }

    // For a join or set operation this is the left-hand side.
    let Query::Source { entity } = tree.query.innermost() else {
        return Err(report::unsupported(
            &tree.query,
            "a query must start from an entity set",
        ));
    };
    let e = model.entity(entity).ok_or_else(|| {
        report::unsupported(&tree.query, format!("'{entity}' is not a mapped entity type"))
    })?;
    let root = model.root_of(entity).unwrap_or(e);
    Ok(RootInfo {
        entity: e.name.clone(),
        root: root.name.clone(),
        container: e.container.clone(),
    })
}

/// Predicate restricting rows bound to `target` to the concrete types of
/// `entity`: `= "X"` for a single type, `IN (...)` for several, nothing for
/// types without a discriminator.
pub fn discriminator_predicate(model: &Model, entity: &str, target: &SqlExpr) -> Option<SqlExpr> {
    if !model.is_discriminated(entity) {
        return None;
    }
    let values: Vec<SqlExpr> = model
        .concrete_types(entity)
        .into_iter()
        .filter_map(|e| e.discriminator_value.clone())
        .map(|v| SqlExpr::Literal(Scalar::Str(v)))
        .collect();
    let column = target.clone().prop(model.discriminator_property());
    match values.len() {
        0 => None,
        1 => values
            .into_iter()
            .next()
            .map(|v| SqlExpr::binary(SqlBinaryOp::Equal, column, v)),
        _ => Some(SqlExpr::In {
            item: Box::new(column),
            values,
        }),
    }
}

/// Discriminator values a document of `entity` may carry.
pub fn discriminator_values(model: &Model, entity: &str) -> Vec<String> {
    model
        .concrete_types(entity)
        .into_iter()
        .filter_map(|e| e.discriminator_value.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use docql_core::expr::{Expr, Lambda, Terminal};
    use docql_core::model::DEFAULT_DISCRIMINATOR_PROPERTY;
    use docql_core::schema::{DataType, Property};

    fn entity(name: &str, disc: Option<&str>, base: Option<&str>) -> EntityType {
        let mut e = EntityType::new(name, "Store");
        e.discriminator_value = disc.map(str::to_string);
        e.base = base.map(str::to_string);
        if base.is_none() {
            e.key = vec!["Id".into()];
            e.properties = vec![Property::new("Id", DataType::Utf8).json("id")];
        }
        e
    }

    fn model() -> Model {
        let mut animal = entity("Animal", None, None);
        animal.is_abstract = true;
        Model::new(
            DEFAULT_DISCRIMINATOR_PROPERTY,
            vec![
                animal,
                entity("Eagle", Some("Eagle"), Some("Animal")),
                entity("Kiwi", Some("Kiwi"), Some("Animal")),
                entity("Customer", Some("Customer"), None),
                entity("Order", Some("Order"), None),
                entity("Setting", None, None),
            ],
        )
        .unwrap()
    }

    #[test]
    fn polymorphic_base_gets_in_list() {
        let m = model();
        let p = discriminator_predicate(&m, "Animal", &SqlExpr::alias("c")).unwrap();
        assert_eq!(p.to_string(), r#"c["Discriminator"] IN ("Eagle", "Kiwi")"#);
        let p = discriminator_predicate(&m, "Kiwi", &SqlExpr::alias("c")).unwrap();
        assert_eq!(p.to_string(), r#"(c["Discriminator"] = "Kiwi")"#);
        assert!(discriminator_predicate(&m, "Setting", &SqlExpr::alias("c")).is_none());
    }

    #[test]
    fn two_independent_roots_are_rejected() {
        let m = model();
        let nested = Expr::Subquery {
            query: Box::new(Query::source("Order")),
            terminal: Box::new(Terminal::Any { predicate: None }),
        };
        let tree = QueryTree::sequence(Query::source("Customer").filter(Lambda::new("c", nested)));
        let err = resolve_root(&tree, &m).unwrap_err();
        assert_eq!(
            err,
            QueryError::MultipleRootTypes {
                existing: "Customer".into(),
                referenced: "Order".into()
            }
        );
    }

    #[test]
    fn derived_types_share_a_root() {
        let m = model();
        let q = Query::SetOp {
            op: docql_core::expr::SetOp::Concat,
            left: Box::new(Query::source("Eagle")),
            right: Box::new(Query::source("Kiwi")),
        };
        let info = resolve_root(&QueryTree::sequence(q), &m).unwrap();
        assert_eq!(info.entity, "Eagle");
        assert_eq!(info.root, "Animal");
        assert_eq!(discriminator_values(&m, "Animal"), vec!["Eagle", "Kiwi"]);
    }
}
