//! Root-chain compilation into one select statement.
//!
//! Operators are folded into a `SelectBuilder` from the innermost source
//! outwards. The dialect has no derived tables, so an operator that would
//! need the previous result as a subquery (a filter after paging, a count
//! over distinct rows, ...) is rejected instead of silently reordered.

use std::slice;

use docql_core::error::QueryError;
use docql_core::expr::{Expr, Lambda, Query, Terminal};
use docql_core::plan::{Finish, ResultShape};
use docql_core::sql::{FromClause, JoinClause, Ordering, SelectExpr, SqlBinaryOp, SqlExpr, SqlUnaryOp};
use docql_core::types::Scalar;

use super::shape::{Binding, Shape};
use super::translate::Translator;
use crate::report;
use crate::resolve::discriminator_predicate;

type Result<T> = std::result::Result<T, QueryError>;

pub(crate) struct SelectBuilder {
    root_alias: String,
    from: FromClause,
    joins: Vec<JoinClause>,
    predicate: Option<SqlExpr>,
    pub current: Binding,
    orderings: Vec<Ordering>,
    offset: Option<SqlExpr>,
    limit: Option<SqlExpr>,
    distinct: bool,
    group_by: Vec<SqlExpr>,
    /// GroupBy seen, its projection not yet.
    group_pending: bool,
    /// Replaces the projection for aggregate terminals.
    aggregate: Option<SqlExpr>,
}

impl SelectBuilder {
    /// `SELECT VALUE c FROM root c`, restricted to `current`'s entity type.
    pub fn root(alias: &str, current: Binding, discriminator: Option<SqlExpr>) -> Self {
        Self {
            root_alias: alias.to_string(),
            from: FromClause::Root {
                alias: alias.to_string(),
            },
            joins: Vec::new(),
            predicate: discriminator,
            current,
            orderings: Vec::new(),
            offset: None,
            limit: None,
            distinct: false,
            group_by: Vec::new(),
            group_pending: false,
            aggregate: None,
        }
    }

    pub fn is_paged(&self) -> bool {
        self.offset.is_some() || self.limit.is_some()
    }

    pub fn is_grouped(&self) -> bool {
        !self.group_by.is_empty()
    }

    pub fn is_ordered(&self) -> bool {
        !self.orderings.is_empty()
    }

    pub fn group_pending(&self) -> bool {
        self.group_pending
    }

    pub fn has_dangling_offset(&self) -> bool {
        self.offset.is_some() && self.limit.is_none()
    }

    fn filter(&mut self, p: SqlExpr) {
        if matches!(p, SqlExpr::Literal(Scalar::Bool(true))) {
            return;
        }
        self.predicate = Some(SqlExpr::and_opt(self.predicate.take(), p));
    }

    pub fn result_shape(&self) -> ResultShape {
        match self.aggregate {
            Some(_) => ResultShape::Value,
            None => self.current.shape.result_shape(),
        }
    }

    pub fn build(self) -> SelectExpr {
        let projection = self.aggregate.unwrap_or(self.current.sql);
        let mut select = SelectExpr::new(projection, self.from);
        select.distinct = self.distinct;
        select.joins = self.joins;
        select.predicate = self.predicate;
        select.group_by = self.group_by;
        select.orderings = self.orderings;
        select.offset = self.offset;
        select.limit = self.limit;
        select
    }

    fn count_rows(&mut self) {
        self.orderings.clear();
        self.aggregate = Some(SqlExpr::func("COUNT", vec![SqlExpr::literal(1i64)]));
    }
}

fn has_group(shape: &Shape) -> bool {
    match shape {
        Shape::Group { .. } => true,
        Shape::Object(members) => members.iter().any(|(_, b)| has_group(&b.shape)),
        _ => false,
    }
}

impl Translator<'_> {
    fn paging_count(&mut self, count: &Expr, op: &Query) -> Result<SqlExpr> {
        let b = self.translate(count)?;
        match b.sql {
            SqlExpr::Literal(Scalar::Int(_)) | SqlExpr::Parameter(_) => Ok(b.sql),
            _ => Err(report::unsupported(op, "paging counts must be constants or captured values")),
        }
    }

    /// Fold one chain operator into `b`.
    pub(crate) fn apply(&mut self, b: &mut SelectBuilder, op: &Query) -> Result<()> {
        match op {
            Query::Source { .. } | Query::Embedded { .. } => {}
            Query::Where { predicate, .. } => {
                if b.is_paged() {
                    return Err(report::nested_paging(op));
                }
                if b.distinct || b.is_grouped() {
                    return Err(report::no_pushdown(op));
                }
                let p = self.predicate(predicate, &b.current)?;
                b.filter(p);
            }
            Query::Select { selector, .. } => {
                if b.distinct {
                    return Err(report::no_pushdown(op));
                }
                let projected = self.lambda(selector, slice::from_ref(&b.current))?;
                if has_group(&projected.shape) {
                    return Err(report::unsupported(
                        op,
                        "a grouping can only be projected through its key and aggregates",
                    ));
                }
                b.current = projected;
                b.group_pending = false;
            }
            Query::SelectMany { collection, .. } => {
                if b.is_paged() {
                    return Err(report::nested_paging(op));
                }
                if b.distinct || b.is_grouped() {
                    return Err(report::no_pushdown(op));
                }
                self.join_collection(b, collection, op)?;
            }
            Query::OrderBy { key, descending, .. } | Query::ThenBy { key, descending, .. } => {
                if b.is_paged() {
                    return Err(report::nested_paging(op));
                }
                if b.is_grouped() {
                    return Err(report::no_pushdown(op));
                }
                let k = self.lambda(key, slice::from_ref(&b.current))?;
                let ordering = Ordering {
                    expr: k.sql,
                    descending: *descending,
                };
                if matches!(op, Query::OrderBy { .. }) {
                    b.orderings = vec![ordering];
                } else {
                    b.orderings.push(ordering);
                }
            }
            Query::Skip { count, .. } => {
                if b.is_paged() {
                    return Err(report::nested_paging(op));
                }
                b.offset = Some(self.paging_count(count, op)?);
            }
            Query::Take { count, .. } => {
                if b.limit.is_some() {
                    return Err(report::nested_paging(op));
                }
                b.limit = Some(self.paging_count(count, op)?);
            }
            Query::Distinct { .. } => {
                if b.is_paged() {
                    return Err(report::nested_paging(op));
                }
                if b.is_grouped() {
                    return Err(report::no_pushdown(op));
                }
                b.distinct = true;
            }
            Query::OfType { entity, .. } => {
                if b.is_paged() {
                    return Err(report::nested_paging(op));
                }
                if b.distinct || b.is_grouped() {
                    return Err(report::no_pushdown(op));
                }
                self.narrow(b, entity, op)?;
            }
            Query::GroupBy { key, .. } => {
                if b.is_paged() {
                    return Err(report::nested_paging(op));
                }
                if b.distinct || b.is_grouped() {
                    return Err(report::no_pushdown(op));
                }
                let k = self.lambda(key, slice::from_ref(&b.current))?;
                if k.shape.is_structural() || has_group(&k.shape) {
                    return Err(report::unsupported(op, "grouping key must be a scalar value"));
                }
                b.group_by.push(k.sql.clone());
                let element = b.current.clone();
                b.current = Binding::new(
                    k.sql.clone(),
                    Shape::Group {
                        key: Box::new(k),
                        element: Box::new(element),
                    },
                );
                b.group_pending = true;
            }
            Query::Join { .. } | Query::SetOp { .. } => {
                return Err(report::unsupported(
                    op,
                    format!("'{}' cannot be translated", op.op_name()),
                ));
            }
            Query::Paginate { .. } => {
                return Err(report::paging_misuse(op, "AsPaged must be the outermost operation"));
            }
        }
        Ok(())
    }

    /// `OfType` on a root entity: narrow the discriminator set.
    fn narrow(&mut self, b: &mut SelectBuilder, target: &str, op: &Query) -> Result<()> {
        let Shape::Entity { entity: current } = &b.current.shape else {
            return Err(report::unsupported(op, "OfType applies to root entities only"));
        };
        if b.current.sql != SqlExpr::alias(b.root_alias.clone()) {
            return Err(report::unsupported(op, "OfType applies to root entities only"));
        }
        let current = current.clone();
        if self.model.is_derived_from(target, &current) {
            if target != current {
                let alias = SqlExpr::alias(b.root_alias.clone());
                if let Some(p) = discriminator_predicate(self.model, target, &alias) {
                    b.filter(p);
                }
                b.current.shape = Shape::Entity {
                    entity: target.to_string(),
                };
            }
            Ok(())
        } else if self.model.is_derived_from(&current, target) {
            Ok(())
        } else {
            Err(report::unsupported(
                op,
                format!("'{target}' is not part of the '{current}' hierarchy"),
            ))
        }
    }

    /// `SelectMany` over an owned collection, optionally filtered.
    fn join_collection(&mut self, b: &mut SelectBuilder, collection: &Lambda, op: &Query) -> Result<()> {
        let mut filters: Vec<&Lambda> = Vec::new();
        let source_expr = match collection.body.as_ref() {
            Expr::Collection(q) => {
                let mut q = q.as_ref();
                loop {
                    match q {
                        Query::Embedded { source } => break source.as_ref().clone(),
                        Query::Where { input, predicate } => {
                            filters.push(predicate);
                            q = input.as_ref();
                        }
                        other => {
                            return Err(report::unsupported(
                                other,
                                "only filters can be applied to a flattened collection",
                            ));
                        }
                    }
                }
            }
            other => other.clone(),
        };
        filters.reverse();

        let src = self.lambda(
            &Lambda::with_params(collection.params.clone(), source_expr),
            slice::from_ref(&b.current),
        )?;
        let element = match src.shape.element() {
            Some(e) if src.sql.is_path() => e,
            _ => return Err(report::unsupported(op, "SelectMany requires an embedded collection")),
        };
        let hint = filters.first().map(|l| l.param().to_string()).unwrap_or_else(|| match &src.sql {
            SqlExpr::Property { name, .. } => name.clone(),
            _ => "i".to_string(),
        });
        let alias = self.fresh_alias(&hint);
        b.joins.push(JoinClause {
            alias: alias.clone(),
            source: src.sql,
        });
        b.current = Binding::new(SqlExpr::alias(alias), element);
        for f in filters {
            let p = self.predicate(f, &b.current)?;
            b.filter(p);
        }
        Ok(())
    }

    /// Fold the terminal reduction into `b`; returns how the executor
    /// finishes the rows.
    pub(crate) fn apply_terminal(&mut self, b: &mut SelectBuilder, t: &Terminal, body: &Query) -> Result<Finish> {
        let guard_aggregate = |b: &SelectBuilder| -> Result<()> {
            if b.is_paged() {
                return Err(report::nested_paging(body));
            }
            if b.distinct || b.is_grouped() {
                return Err(report::no_pushdown(body));
            }
            Ok(())
        };
        match t {
            Terminal::Count { .. } => {
                guard_aggregate(b)?;
                b.count_rows();
                Ok(Finish::Count)
            }
            Terminal::Sum { .. } | Terminal::Min { .. } | Terminal::Max { .. } | Terminal::Average { .. } => {
                guard_aggregate(b)?;
                if b.current.shape.data_type().is_none() {
                    return Err(report::unsupported(body, "only scalar values can be aggregated"));
                }
                let (name, finish) = match t {
                    Terminal::Sum { .. } => ("SUM", Finish::Sum),
                    Terminal::Min { .. } => ("MIN", Finish::Min),
                    Terminal::Max { .. } => ("MAX", Finish::Max),
                    _ => ("AVG", Finish::Average),
                };
                b.orderings.clear();
                b.aggregate = Some(SqlExpr::func(name, vec![b.current.sql.clone()]));
                Ok(finish)
            }
            Terminal::Any { .. } => {
                guard_aggregate(b)?;
                b.count_rows();
                Ok(Finish::Any)
            }
            Terminal::All { predicate } => {
                guard_aggregate(b)?;
                let p = self.predicate(predicate, &b.current)?;
                b.filter(SqlExpr::unary(SqlUnaryOp::Not, p));
                b.count_rows();
                Ok(Finish::All)
            }
            Terminal::Contains { item } => {
                guard_aggregate(b)?;
                if b.current.shape.data_type().is_none() {
                    return Err(report::unsupported(body, "Contains is supported over scalar values only"));
                }
                let item = self.translate(item)?;
                b.filter(SqlExpr::binary(SqlBinaryOp::Equal, b.current.sql.clone(), item.sql));
                b.count_rows();
                Ok(Finish::Any)
            }
            Terminal::First { or_default, .. } => {
                if b.limit.is_some() {
                    return Err(report::nested_paging(body));
                }
                b.limit = Some(SqlExpr::literal(1i64));
                Ok(Finish::First {
                    or_default: *or_default,
                })
            }
            Terminal::Single { or_default, .. } => {
                if b.limit.is_some() {
                    return Err(report::nested_paging(body));
                }
                b.limit = Some(SqlExpr::literal(2i64));
                Ok(Finish::Single {
                    or_default: *or_default,
                })
            }
            Terminal::Last { or_default, .. } => {
                if b.is_paged() {
                    return Err(report::nested_paging(body));
                }
                if b.orderings.is_empty() {
                    return Err(report::unsupported(body, "Last requires an explicit ordering"));
                }
                for o in &mut b.orderings {
                    o.descending = !o.descending;
                }
                b.limit = Some(SqlExpr::literal(1i64));
                Ok(Finish::First {
                    or_default: *or_default,
                })
            }
            Terminal::ElementAt { index, or_default } => {
                if b.is_paged() {
                    return Err(report::nested_paging(body));
                }
                b.offset = Some(self.paging_count(index, body)?);
                b.limit = Some(SqlExpr::literal(1i64));
                Ok(Finish::First {
                    or_default: *or_default,
                })
            }
        }
    }
}
