//! Point-read detection.
//!
//! A query whose only filtering is equality on the document id (and the
//! partition key, when the type has one) is answered by a direct fetch.
//! Anything else falls through to normal compilation unchanged, including
//! key comparisons whose bound value is not of the key's type: the store
//! answers those with an empty result, and so must we.

use std::collections::HashMap;

use docql_core::expr::{BinaryOp, Expr, Query, Terminal};
use docql_core::model::Model;
use docql_core::plan::{Finish, ResultShape};
use docql_core::schema::DataType;
use docql_core::types::Scalar;

use crate::classify::Classified;
use crate::plan::{PointReadPlan, ValueSlot};
use crate::resolve::{discriminator_values, RootInfo};

const ID_FIELD: &str = "id";

/// A point-read plan when the classified tree qualifies.
///
/// `types` holds the data type of every bound parameter; a parameter slot
/// qualifies only when its type matches the key property it is compared to.
pub fn try_point_read(
    classified: &Classified,
    model: &Model,
    root: &RootInfo,
    types: &HashMap<String, DataType>,
) -> Option<PointReadPlan> {
    if !classified.residual.is_empty() {
        return None;
    }
    let tree = &classified.store;
    let finish = match &tree.terminal {
        None => Finish::Sequence,
        Some(Terminal::First {
            predicate: None,
            or_default,
        }) => Finish::First {
            or_default: *or_default,
        },
        Some(Terminal::Single {
            predicate: None,
            or_default,
        }) => Finish::Single {
            or_default: *or_default,
        },
        Some(_) => return None,
    };

    // Source, then filters and identity projections only.
    let mut conjuncts: Vec<(&str, &Expr)> = Vec::new();
    let mut q = &tree.query;
    loop {
        match q {
            Query::Source { .. } => break,
            Query::Where { input, predicate } if predicate.params.len() == 1 => {
                split_and(predicate.param(), &predicate.body, &mut conjuncts);
                q = input.as_ref();
            }
            Query::Select { input, selector } if selector.is_identity() => q = input.as_ref(),
            _ => return None,
        }
    }
    if conjuncts.is_empty() {
        return None;
    }

    let entity = model.entity(&root.entity)?;
    let id_prop = entity
        .key_properties()
        .into_iter()
        .find(|p| p.json_name == ID_FIELD)?;
    let pk_prop = entity.partition_key.as_deref();
    if entity
        .key
        .iter()
        .any(|k| *k != id_prop.name && Some(k.as_str()) != pk_prop)
    {
        return None;
    }

    let mut id: Option<ValueSlot> = None;
    let mut partition_key: Option<ValueSlot> = None;
    for (param, e) in conjuncts {
        let (member, value) = key_equality(param, e)?;
        let slot = if member == id_prop.name {
            &mut id
        } else if Some(member) == pk_prop {
            &mut partition_key
        } else {
            return None;
        };
        if slot.is_some() {
            return None;
        }
        *slot = Some(value);
    }
    let id = id?;
    if slot_type(&id, types)? != DataType::Utf8 {
        return None;
    }
    match (pk_prop.and_then(|pk| entity.property(pk)), &partition_key) {
        (None, None) => {}
        (Some(prop), Some(slot)) if slot_type(slot, types).as_ref() == Some(&prop.data_type) => {}
        _ => return None,
    }

    let discriminators = if model.is_discriminated(&entity.name) {
        discriminator_values(model, &entity.name)
    } else {
        Vec::new()
    };

    #[cfg(feature = "tracing")]
    tracing::debug!(entity = %entity.name, "key equality answered by point read");

    Some(PointReadPlan {
        entity: entity.name.clone(),
        container: entity.container.clone(),
        id,
        partition_key,
        discriminators,
        result_shape: ResultShape::Entity {
            entity: entity.name.clone(),
        },
        finish,
    })
}

fn split_and<'a>(param: &'a str, e: &'a Expr, out: &mut Vec<(&'a str, &'a Expr)>) {
    match e {
        Expr::Binary {
            op: BinaryOp::AndAlso,
            left,
            right,
        } => {
            split_and(param, left, out);
            split_and(param, right, out);
        }
        other => out.push((param, other)),
    }
}

/// `x.Member == value` (either side) over the lambda parameter.
fn key_equality<'a>(param: &str, e: &'a Expr) -> Option<(&'a str, ValueSlot)> {
    let Expr::Binary {
        op: BinaryOp::Equal,
        left,
        right,
    } = e
    else {
        return None;
    };
    member_of(param, left)
        .zip(value_of(right))
        .or_else(|| member_of(param, right).zip(value_of(left)))
}

fn member_of<'a>(param: &str, e: &'a Expr) -> Option<&'a str> {
    match e {
        Expr::Member { target, member } if matches!(target.as_ref(), Expr::Var(v) if v == param) => {
            Some(member.as_str())
        }
        _ => None,
    }
}

/// Type of the value a slot will hold; `None` for an unbound parameter.
fn slot_type(slot: &ValueSlot, types: &HashMap<String, DataType>) -> Option<DataType> {
    match slot {
        ValueSlot::Literal(s) => Some(s.data_type()),
        ValueSlot::Parameter(name) => types.get(name).cloned(),
    }
}

fn value_of(e: &Expr) -> Option<ValueSlot> {
    match e {
        Expr::Constant(s) if !matches!(s, Scalar::Null) => Some(ValueSlot::Literal(s.clone())),
        Expr::Parameter { name } => Some(ValueSlot::Parameter(name.clone())),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docql_core::expr::{Lambda, QueryTree};
    use docql_core::model::{EntityType, DEFAULT_DISCRIMINATOR_PROPERTY};
    use docql_core::schema::{DataType, Property};

    fn model() -> Model {
        let mut customer = EntityType::new("Customer", "Store");
        customer.discriminator_value = Some("Customer".into());
        customer.key = vec!["CustomerID".into()];
        customer.properties = vec![
            Property::new("CustomerID", DataType::Utf8).json("id"),
            Property::new("City", DataType::Utf8),
        ];
        let mut tenant = EntityType::new("Tenant", "Tenants");
        tenant.key = vec!["Id".into(), "Region".into()];
        tenant.partition_key = Some("Region".into());
        tenant.properties = vec![
            Property::new("Id", DataType::Utf8).json("id"),
            Property::new("Region", DataType::Utf8),
        ];
        Model::new(DEFAULT_DISCRIMINATOR_PROPERTY, vec![customer, tenant]).unwrap()
    }

    fn plan(tree: QueryTree) -> Option<PointReadPlan> {
        plan_typed(tree, &[("__id_0", DataType::Utf8)])
    }

    fn plan_typed(tree: QueryTree, types: &[(&str, DataType)]) -> Option<PointReadPlan> {
        let m = model();
        let root = crate::resolve::resolve_root(&tree, &m).unwrap();
        let types = types.iter().map(|(n, t)| (n.to_string(), t.clone())).collect();
        try_point_read(
            &Classified {
                store: tree,
                residual: vec![],
            },
            &m,
            &root,
            &types,
        )
    }

    fn member(v: &str, m: &str) -> Expr {
        Expr::var(v).member(m)
    }

    #[test]
    fn id_equality_is_a_point_read() {
        let q = Query::source("Customer").filter(Lambda::new(
            "c",
            member("c", "CustomerID").eq(Expr::constant("ALFKI")),
        ));
        let p = plan(QueryTree::sequence(q)).unwrap();
        assert_eq!(p.id, ValueSlot::Literal("ALFKI".into()));
        assert_eq!(p.partition_key, None);
        assert_eq!(p.discriminators, vec!["Customer"]);
        assert_eq!(p.finish, Finish::Sequence);
    }

    #[test]
    fn partition_key_is_required_when_declared() {
        let id_only = Lambda::new("t", member("t", "Id").eq(Expr::Parameter { name: "__id_0".into() }));
        assert!(plan(QueryTree::sequence(Query::source("Tenant").filter(id_only))).is_none());

        let both = Lambda::new(
            "t",
            Expr::binary(
                BinaryOp::AndAlso,
                Expr::constant("eu").eq(member("t", "Region")),
                member("t", "Id").eq(Expr::Parameter { name: "__id_0".into() }),
            ),
        );
        let tree = QueryTree::scalar(
            Query::source("Tenant").filter(both),
            Terminal::Single {
                predicate: None,
                or_default: true,
            },
        );
        let p = plan(tree).unwrap();
        assert_eq!(p.id, ValueSlot::Parameter("__id_0".into()));
        assert_eq!(p.partition_key, Some(ValueSlot::Literal("eu".into())));
        assert!(p.discriminators.is_empty());
    }

    #[test]
    fn near_misses_fall_through() {
        let key = || Lambda::new("c", member("c", "CustomerID").eq(Expr::constant("ALFKI")));
        let extra = Lambda::new(
            "c",
            Expr::binary(
                BinaryOp::AndAlso,
                member("c", "CustomerID").eq(Expr::constant("ALFKI")),
                member("c", "City").eq(Expr::constant("Berlin")),
            ),
        );
        assert!(plan(QueryTree::sequence(Query::source("Customer").filter(extra))).is_none());

        let ordered = Query::source("Customer")
            .filter(key())
            .order_by(Lambda::new("c", member("c", "City")), false);
        assert!(plan(QueryTree::sequence(ordered)).is_none());

        let projected = Query::source("Customer")
            .filter(key())
            .select(Lambda::new("c", member("c", "City")));
        assert!(plan(QueryTree::sequence(projected)).is_none());

        let counted = QueryTree::scalar(
            Query::source("Customer").filter(key()),
            Terminal::Count { predicate: None, long: false },
        );
        assert!(plan(counted).is_none());

        let paged = Query::Paginate {
            input: Box::new(Query::source("Customer").filter(key())),
        };
        assert!(plan(QueryTree::sequence(paged)).is_none());
    }

    #[test]
    fn key_slots_must_match_the_key_type() {
        let by_param = || {
            QueryTree::sequence(Query::source("Customer").filter(Lambda::new(
                "c",
                member("c", "CustomerID").eq(Expr::Parameter { name: "__id_0".into() }),
            )))
        };
        assert!(plan_typed(by_param(), &[("__id_0", DataType::Utf8)]).is_some());
        assert!(plan_typed(by_param(), &[("__id_0", DataType::Json)]).is_none());
        assert!(plan_typed(by_param(), &[("__id_0", DataType::Int64)]).is_none());
        assert!(plan_typed(by_param(), &[]).is_none());

        let int_literal = Query::source("Customer").filter(Lambda::new(
            "c",
            member("c", "CustomerID").eq(Expr::constant(5i64)),
        ));
        assert!(plan(QueryTree::sequence(int_literal)).is_none());

        let tenant = |region: Expr| {
            QueryTree::sequence(Query::source("Tenant").filter(Lambda::new(
                "t",
                Expr::binary(
                    BinaryOp::AndAlso,
                    member("t", "Region").eq(region),
                    member("t", "Id").eq(Expr::constant("t1")),
                ),
            )))
        };
        assert!(plan(tenant(Expr::constant("eu"))).is_some());
        assert!(plan(tenant(Expr::constant(3i64))).is_none());
        let by_region = || tenant(Expr::Parameter { name: "__region_0".into() });
        assert!(plan_typed(by_region(), &[("__region_0", DataType::Utf8)]).is_some());
        assert!(plan_typed(by_region(), &[("__region_0", DataType::Json)]).is_none());
    }
}
