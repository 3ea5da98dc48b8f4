//! Sequences embedded in lambdas: owned collections, primitive arrays,
//! captured lists and groups.
//!
//! Simple reductions map to array functions; anything with operators
//! becomes a nested select over the collection (`EXISTS`, `ARRAY(...)` or
//! a scalar subquery).

use std::slice;

use docql_core::error::QueryError;
use docql_core::expr::{Expr, Query, SetOp, Terminal};
use docql_core::schema::DataType;
use docql_core::sql::{FromClause, Ordering, SelectExpr, SqlBinaryOp, SqlExpr, SqlUnaryOp};
use docql_core::types::Scalar;

use super::shape::{Binding, Shape};
use super::translate::Translator;
use crate::normalize::split_terminal;
use crate::report;

type Result<T> = std::result::Result<T, QueryError>;

/// Membership test of `item` in a collection value.
pub(crate) fn contains_sql(src: Binding, item: Binding) -> SqlExpr {
    let values = match src.sql {
        SqlExpr::Literal(Scalar::Array(values)) => values.into_iter().map(SqlExpr::Literal).collect(),
        SqlExpr::Array(values) => values,
        other => return SqlExpr::func("ARRAY_CONTAINS", vec![other, item.sql]),
    };
    if values.is_empty() {
        return SqlExpr::literal(false);
    }
    SqlExpr::In {
        item: Box::new(item.sql),
        values,
    }
}

fn zero_index() -> SqlExpr {
    SqlExpr::literal(0i64)
}

fn count_one() -> SqlExpr {
    SqlExpr::func("COUNT", vec![SqlExpr::literal(1i64)])
}

fn aggregate_name(t: &Terminal) -> Option<&'static str> {
    Some(match t {
        Terminal::Sum { .. } => "SUM",
        Terminal::Min { .. } => "MIN",
        Terminal::Max { .. } => "MAX",
        Terminal::Average { .. } => "AVG",
        _ => return None,
    })
}

fn aggregate_type(t: &Terminal, arg: &Shape) -> DataType {
    match t {
        Terminal::Average { .. } => DataType::Float64,
        _ => arg.data_type().cloned().unwrap_or(DataType::Json),
    }
}

/// Alias hint: the first lambda parameter in the chain, else the member
/// the collection hangs off.
fn alias_hint(ops: &[&Query], terminal: Option<&Terminal>, source: &SqlExpr) -> String {
    let from_ops = ops.iter().find_map(|op| match op {
        Query::Where { predicate: l, .. }
        | Query::Select { selector: l, .. }
        | Query::OrderBy { key: l, .. }
        | Query::ThenBy { key: l, .. } => Some(l.param().to_string()),
        _ => None,
    });
    from_ops
        .or_else(|| terminal.and_then(Terminal::lambda).map(|l| l.param().to_string()))
        .or_else(|| match source {
            SqlExpr::Property { name, .. } => Some(name.clone()),
            _ => None,
        })
        .unwrap_or_else(|| "i".to_string())
}

impl Translator<'_> {
    pub(crate) fn subquery(&mut self, query: &Query, terminal: Option<&Terminal>, e: &Expr) -> Result<Binding> {
        let (query, terminal) = match terminal {
            Some(t) => {
                let (q, t) = split_terminal(query.clone(), t.clone());
                (q, Some(t))
            }
            None => (query.clone(), None),
        };

        let mut ops: Vec<&Query> = Vec::new();
        let mut q = &query;
        let source = loop {
            match q {
                Query::Embedded { .. } | Query::SetOp { .. } => break q,
                Query::Source { .. } => {
                    return Err(report::unsupported(
                        e,
                        "root entity sets cannot be queried inside a lambda",
                    ));
                }
                op => {
                    ops.push(op);
                    q = op
                        .input()
                        .ok_or_else(|| report::unsupported(e, "sequence has no source"))?;
                }
            }
        };
        ops.reverse();

        let src = self.embedded_source(source)?;
        if let Shape::Group { element, .. } = &src.shape {
            return self.group_aggregate(element, &ops, terminal.as_ref(), e);
        }
        if src.shape.element().is_none() {
            return Err(report::unsupported(e, "expression is not a collection"));
        }
        if ops.is_empty() {
            if let Some(b) = self.direct(&src, terminal.as_ref())? {
                return Ok(b);
            }
        }
        let mark = self.alias_mark();
        let alias = self.fresh_alias(&alias_hint(&ops, terminal.as_ref(), &src.sql));
        let out = self.nested_select(src, alias, &ops, terminal.as_ref(), e);
        self.release_aliases(mark);
        out
    }

    fn embedded_source(&mut self, q: &Query) -> Result<Binding> {
        match q {
            Query::Embedded { source } => self.translate(source),
            Query::SetOp { op, left, right } => {
                let function = match op {
                    SetOp::Concat => "ARRAY_CONCAT",
                    SetOp::Union => "SetUnion",
                    SetOp::Intersect => "SetIntersect",
                    SetOp::Except => {
                        return Err(report::unsupported(q, "'Except' has no translation"));
                    }
                };
                let l = self.embedded_source(left)?;
                let r = self.embedded_source(right)?;
                Ok(Binding::new(SqlExpr::func(function, vec![l.sql, r.sql]), l.shape))
            }
            other => Err(report::unsupported(
                other,
                format!("'{}' cannot feed a set operation", other.op_name()),
            )),
        }
    }

    /// Reductions of an unfiltered collection that need no nested select.
    fn direct(&mut self, src: &Binding, terminal: Option<&Terminal>) -> Result<Option<Binding>> {
        let element = src.shape.element().unwrap_or(Shape::scalar(DataType::Json));
        let length = || SqlExpr::func("ARRAY_LENGTH", vec![src.sql.clone()]);
        Ok(match terminal {
            None => Some(src.clone()),
            Some(Terminal::Count { .. }) => Some(Binding::scalar(length(), DataType::Int64)),
            Some(Terminal::Any { predicate: None }) => Some(Binding::boolean(SqlExpr::binary(
                SqlBinaryOp::GreaterThan,
                length(),
                SqlExpr::literal(0i64),
            ))),
            Some(Terminal::Contains { item }) => {
                let item = self.translate(item)?;
                Some(Binding::boolean(contains_sql(src.clone(), item)))
            }
            Some(Terminal::First { predicate: None, .. }) if src.sql.is_path() => {
                Some(Binding::new(src.sql.clone().index(zero_index()), element))
            }
            Some(Terminal::ElementAt { index, .. }) if src.sql.is_path() => {
                let i = self.translate(index)?;
                Some(Binding::new(src.sql.clone().index(i.sql), element))
            }
            _ => None,
        })
    }

    fn nested_select(
        &mut self,
        src: Binding,
        alias: String,
        ops: &[&Query],
        terminal: Option<&Terminal>,
        e: &Expr,
    ) -> Result<Binding> {
        let element = src.shape.element().unwrap_or(Shape::scalar(DataType::Json));
        let mut current = Binding::new(SqlExpr::alias(alias.clone()), element);
        let mut select = SelectExpr::new(
            SqlExpr::alias(alias.clone()),
            FromClause::In {
                alias,
                source: src.sql,
            },
        );
        for op in ops {
            match op {
                Query::Where { predicate, .. } => {
                    let p = self.predicate(predicate, &current)?;
                    select.predicate = Some(SqlExpr::and_opt(select.predicate.take(), p));
                }
                Query::Select { selector, .. } => {
                    current = self.lambda(selector, slice::from_ref(&current))?;
                }
                Query::OrderBy { key, descending, .. } => {
                    let k = self.lambda(key, slice::from_ref(&current))?;
                    select.orderings = vec![Ordering {
                        expr: k.sql,
                        descending: *descending,
                    }];
                }
                Query::ThenBy { key, descending, .. } => {
                    let k = self.lambda(key, slice::from_ref(&current))?;
                    select.orderings.push(Ordering {
                        expr: k.sql,
                        descending: *descending,
                    });
                }
                Query::Distinct { .. } => select.distinct = true,
                Query::Skip { .. } | Query::Take { .. } => return Err(report::nested_paging(*op)),
                other => {
                    return Err(report::unsupported(
                        *other,
                        format!("'{}' is not supported over an embedded collection", other.op_name()),
                    ));
                }
            }
        }

        let Some(t) = terminal else {
            select.projection = current.sql;
            return Ok(Binding::new(
                SqlExpr::ArraySubquery(Box::new(select)),
                Shape::collection_of(current.shape),
            ));
        };
        match t {
            Terminal::Count { .. } => {
                if select.distinct {
                    return Err(report::no_pushdown(e));
                }
                select.orderings.clear();
                select.projection = count_one();
                Ok(Binding::scalar(SqlExpr::Subquery(Box::new(select)), DataType::Int64))
            }
            Terminal::Sum { .. } | Terminal::Min { .. } | Terminal::Max { .. } | Terminal::Average { .. } => {
                if select.distinct {
                    return Err(report::no_pushdown(e));
                }
                let name = aggregate_name(t).unwrap_or("SUM");
                let ty = aggregate_type(t, &current.shape);
                select.orderings.clear();
                select.projection = SqlExpr::func(name, vec![current.sql]);
                Ok(Binding::scalar(SqlExpr::Subquery(Box::new(select)), ty))
            }
            Terminal::Any { .. } => Ok(Binding::boolean(exists(select))),
            Terminal::All { predicate } => {
                let p = self.predicate(predicate, &current)?;
                let negated = SqlExpr::unary(SqlUnaryOp::Not, p);
                select.predicate = Some(SqlExpr::and_opt(select.predicate.take(), negated));
                Ok(Binding::boolean(SqlExpr::unary(SqlUnaryOp::Not, exists(select))))
            }
            Terminal::Contains { item } => {
                let item = self.translate(item)?;
                let test = SqlExpr::binary(SqlBinaryOp::Equal, current.sql, item.sql);
                select.predicate = Some(SqlExpr::and_opt(select.predicate.take(), test));
                Ok(Binding::boolean(exists(select)))
            }
            Terminal::First { .. } => {
                select.projection = current.sql;
                Ok(Binding::new(
                    SqlExpr::ArraySubquery(Box::new(select)).index(zero_index()),
                    current.shape,
                ))
            }
            Terminal::ElementAt { index, .. } => {
                let i = self.translate(index)?;
                select.projection = current.sql;
                Ok(Binding::new(
                    SqlExpr::ArraySubquery(Box::new(select)).index(i.sql),
                    current.shape,
                ))
            }
            Terminal::Single { .. } | Terminal::Last { .. } => Err(report::unsupported(
                e,
                format!("'{}' is not supported inside a lambda", t.name()),
            )),
        }
    }

    /// `g.Count()`, `g.Sum(x => ...)` and friends over a grouping.
    fn group_aggregate(
        &mut self,
        element: &Binding,
        ops: &[&Query],
        terminal: Option<&Terminal>,
        e: &Expr,
    ) -> Result<Binding> {
        let mut arg = element.clone();
        for op in ops {
            match op {
                Query::Select { selector, .. } => arg = self.lambda(selector, slice::from_ref(&arg))?,
                other => {
                    return Err(report::unsupported(
                        *other,
                        "only projections and aggregates can be applied to a group",
                    ));
                }
            }
        }
        match terminal {
            Some(Terminal::Count { .. }) => Ok(Binding::scalar(count_one(), DataType::Int64)),
            Some(t) if aggregate_name(t).is_some() => {
                let name = aggregate_name(t).unwrap_or("SUM");
                Ok(Binding::scalar(
                    SqlExpr::func(name, vec![arg.sql]),
                    aggregate_type(t, &arg.shape),
                ))
            }
            _ => Err(report::unsupported(
                e,
                "a group can only be reduced by Count, Sum, Min, Max or Average",
            )),
        }
    }
}

fn exists(mut select: SelectExpr) -> SqlExpr {
    select.orderings.clear();
    select.value = false;
    select.projection = SqlExpr::literal(1i64);
    SqlExpr::Exists(Box::new(select))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use docql_core::config::EngineConfig;
    use docql_core::expr::{BinaryOp, Lambda};
    use docql_core::model::{owned_collection, EntityType, Model, DEFAULT_DISCRIMINATOR_PROPERTY};
    use docql_core::schema::{OwnedType, Property};

    fn model() -> Model {
        let mut customer = EntityType::new("Customer", "Store");
        customer.key = vec!["Id".into()];
        customer.properties = vec![
            Property::new("Id", DataType::Utf8).json("id"),
            Property::new("Tags", DataType::Array(Box::new(DataType::Utf8))),
            Property::new("City", DataType::Utf8),
        ];
        customer.owned = vec![owned_collection(
            "Orders",
            OwnedType {
                name: "Order".into(),
                properties: vec![
                    Property::new("Total", DataType::Float64),
                    Property::new("Shipped", DataType::Boolean),
                ],
                owned: vec![],
            },
        )];
        Model::new(DEFAULT_DISCRIMINATOR_PROPERTY, vec![customer]).unwrap()
    }

    fn translate(e: Expr) -> Result<String> {
        let model = model();
        let config = EngineConfig::default();
        let types = HashMap::from([(
            "__cities_0".to_string(),
            DataType::Array(Box::new(DataType::Utf8)),
        )]);
        let mut t = Translator::new(&model, &config, &types);
        let c = Binding::new(SqlExpr::alias("c"), Shape::Entity { entity: "Customer".into() });
        t.lambda(&Lambda::new("c", e), &[c]).map(|b| b.sql.to_string())
    }

    fn orders() -> Query {
        Query::Embedded {
            source: Box::new(Expr::var("c").member("Orders")),
        }
    }

    fn reduce(q: Query, t: Terminal) -> Expr {
        Expr::Subquery {
            query: Box::new(q),
            terminal: Box::new(t),
        }
    }

    fn shipped() -> Lambda {
        Lambda::new("o", Expr::var("o").member("Shipped"))
    }

    #[test]
    fn captured_lists_become_in_or_array_contains() {
        let city = Expr::var("c").member("City");
        let list = Query::Embedded {
            source: Box::new(Expr::constant(Scalar::Array(vec!["A".into(), "B".into()]))),
        };
        let e = reduce(list, Terminal::Contains { item: Box::new(city.clone()) });
        assert_eq!(translate(e).unwrap(), r#"c["City"] IN ("A", "B")"#);

        let empty = Query::Embedded {
            source: Box::new(Expr::constant(Scalar::Array(vec![]))),
        };
        let e = reduce(empty, Terminal::Contains { item: Box::new(city.clone()) });
        assert_eq!(translate(e).unwrap(), "false");

        let param = Query::Embedded {
            source: Box::new(Expr::Parameter { name: "__cities_0".into() }),
        };
        let e = reduce(param, Terminal::Contains { item: Box::new(city) });
        assert_eq!(translate(e).unwrap(), r#"ARRAY_CONTAINS(@__cities_0, c["City"])"#);
    }

    #[test]
    fn plain_reductions_use_array_functions() {
        let e = reduce(orders(), Terminal::Count { predicate: None, long: false });
        assert_eq!(translate(e).unwrap(), r#"ARRAY_LENGTH(c["Orders"])"#);
        let e = reduce(orders(), Terminal::Any { predicate: None });
        assert_eq!(translate(e).unwrap(), r#"(ARRAY_LENGTH(c["Orders"]) > 0)"#);
        let e = reduce(
            orders(),
            Terminal::First {
                predicate: None,
                or_default: true,
            },
        );
        assert_eq!(translate(e).unwrap(), r#"c["Orders"][0]"#);
    }

    #[test]
    fn filtered_reductions_nest_a_select() {
        let e = reduce(orders(), Terminal::Any { predicate: Some(shipped()) });
        assert_eq!(
            translate(e).unwrap(),
            r#"EXISTS (SELECT 1 FROM o IN c["Orders"] WHERE o["Shipped"])"#
        );
        let e = reduce(orders(), Terminal::All { predicate: shipped() });
        assert_eq!(
            translate(e).unwrap(),
            r#"NOT(EXISTS (SELECT 1 FROM o IN c["Orders"] WHERE NOT(o["Shipped"])))"#
        );
        let e = reduce(
            orders().filter(shipped()),
            Terminal::Count { predicate: None, long: false },
        );
        assert_eq!(
            translate(e).unwrap(),
            r#"(SELECT VALUE COUNT(1) FROM o IN c["Orders"] WHERE o["Shipped"])"#
        );
        let total = Lambda::new("o", Expr::var("o").member("Total"));
        let e = reduce(orders(), Terminal::Sum { selector: Some(total.clone()) });
        assert_eq!(
            translate(e).unwrap(),
            r#"(SELECT VALUE SUM(o["Total"]) FROM o IN c["Orders"])"#
        );
        let big = Lambda::new(
            "o",
            Expr::binary(BinaryOp::GreaterThan, Expr::var("o").member("Total"), Expr::constant(10.5)),
        );
        let e = Expr::Collection(Box::new(orders().filter(big).select(total)));
        assert_eq!(
            translate(e).unwrap(),
            r#"ARRAY(SELECT VALUE o["Total"] FROM o IN c["Orders"] WHERE (o["Total"] > 10.5))"#
        );
    }

    #[test]
    fn nested_paging_and_unsupported_terminals() {
        let e = reduce(
            orders().take(Expr::constant(2i64)),
            Terminal::Count { predicate: None, long: false },
        );
        assert_eq!(translate(e).unwrap_err().code(), "NestedPagingUnsupported");
        let e = reduce(
            orders().filter(shipped()),
            Terminal::Last {
                predicate: None,
                or_default: false,
            },
        );
        assert_eq!(translate(e).unwrap_err().code(), "CompilationUnsupported");
        let except = Query::SetOp {
            op: SetOp::Except,
            left: Box::new(orders()),
            right: Box::new(orders()),
        };
        assert!(translate(Expr::Collection(Box::new(except))).is_err());
    }

    #[test]
    fn set_operations_over_arrays() {
        let tags = || Query::Embedded {
            source: Box::new(Expr::var("c").member("Tags")),
        };
        let union = Query::SetOp {
            op: SetOp::Concat,
            left: Box::new(tags()),
            right: Box::new(tags()),
        };
        let e = reduce(union, Terminal::Count { predicate: None, long: false });
        assert_eq!(
            translate(e).unwrap(),
            r#"ARRAY_LENGTH(ARRAY_CONCAT(c["Tags"], c["Tags"]))"#
        );
    }
}
