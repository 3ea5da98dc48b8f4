//! Capability classification.
//!
//! Every expression is tagged bottom-up as translatable, client-evaluable
//! or unsupported. The query chain is then split: a trailing run of
//! projections that need the client becomes the residual, everything else
//! must translate. Client work inside a filter, ordering or aggregate would
//! change which rows the store returns, so it is rejected there.

use docql_core::error::QueryError;
use docql_core::expr::{walk_query, BinaryOp, Expr, Lambda, Node, Query, QueryTree, Terminal, UnaryOp};
use docql_operators::functions::{is_client_method, is_store_only};
use docql_operators::ClientFunctions;

use crate::compile::functions::is_translatable_call;
use crate::report;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Capability {
    Translatable,
    ClientEval,
    Unsupported { expression: String, detail: String },
}

impl Capability {
    fn combine(self, other: Capability) -> Capability {
        match (self, other) {
            (u @ Capability::Unsupported { .. }, _) | (_, u @ Capability::Unsupported { .. }) => u,
            (Capability::ClientEval, _) | (_, Capability::ClientEval) => Capability::ClientEval,
            _ => Capability::Translatable,
        }
    }

    fn into_error(self) -> Option<QueryError> {
        match self {
            Capability::Unsupported { expression, detail } => {
                Some(QueryError::CompilationUnsupported { expression, detail })
            }
            _ => None,
        }
    }
}

/// The translatable part of a query and the client steps that follow it.
#[derive(Debug, Clone, PartialEq)]
pub struct Classified {
    pub store: QueryTree,
    pub residual: Vec<Lambda>,
}

pub fn classify_expr(e: &Expr, functions: &ClientFunctions) -> Capability {
    match e {
        Expr::Constant(_)
        | Expr::Captured { .. }
        | Expr::Parameter { .. }
        | Expr::Var(_) => Capability::Translatable,
        Expr::Member { target, .. } => classify_expr(target, functions),
        Expr::Index { target, index } => {
            classify_expr(target, functions).combine(classify_expr(index, functions))
        }
        Expr::Unary { operand, .. } => classify_expr(operand, functions),
        Expr::Binary { op, left, right } => {
            if *op == BinaryOp::ExclusiveOr && (looks_boolean(left) || looks_boolean(right)) {
                return Capability::Unsupported {
                    expression: e.to_string(),
                    detail: "boolean XOR has no translation".into(),
                };
            }
            classify_expr(left, functions).combine(classify_expr(right, functions))
        }
        Expr::Conditional {
            test,
            if_true,
            if_false,
        } => classify_expr(test, functions)
            .combine(classify_expr(if_true, functions))
            .combine(classify_expr(if_false, functions)),
        Expr::Coalesce { left, right } => {
            classify_expr(left, functions).combine(classify_expr(right, functions))
        }
        Expr::Call {
            receiver,
            method,
            args,
        } => {
            let own = if is_translatable_call(method, receiver.is_some()) {
                Capability::Translatable
            } else if functions.contains(method)
                || (!is_store_only(method) && is_client_method(method, receiver.is_some()))
            {
                Capability::ClientEval
            } else {
                Capability::Unsupported {
                    expression: e.to_string(),
                    detail: format!("method '{method}' has no translation"),
                }
            };
            let mut cap = match receiver {
                Some(r) => own.combine(classify_expr(r, functions)),
                None => own,
            };
            for a in args {
                cap = cap.combine(classify_expr(a, functions));
            }
            cap
        }
        Expr::New { members } => members
            .iter()
            .fold(Capability::Translatable, |cap, (_, m)| cap.combine(classify_expr(m, functions))),
        Expr::Array(items) => items
            .iter()
            .fold(Capability::Translatable, |cap, i| cap.combine(classify_expr(i, functions))),
        Expr::Subquery { query, terminal } => {
            let mut cap = classify_query(query, functions);
            if let Some(l) = terminal.lambda() {
                cap = cap.combine(classify_expr(&l.body, functions));
            }
            if let Some(a) = terminal.argument() {
                cap = cap.combine(classify_expr(a, functions));
            }
            cap
        }
        Expr::Collection(query) => classify_query(query, functions),
    }
}

fn classify_query(q: &Query, functions: &ClientFunctions) -> Capability {
    let mut cap = Capability::Translatable;
    let mut visit = |n: Node<'_>| {
        // Only the direct expressions of each operator; nested queries are
        // reached through their own nodes.
        let exprs: Vec<&Expr> = match n {
            Node::Query(Query::Embedded { source }) => vec![&**source],
            Node::Query(
                Query::Where { predicate: l, .. }
                | Query::Select { selector: l, .. }
                | Query::SelectMany { collection: l, .. }
                | Query::OrderBy { key: l, .. }
                | Query::ThenBy { key: l, .. }
                | Query::GroupBy { key: l, .. },
            ) => vec![&*l.body],
            Node::Query(Query::Skip { count, .. } | Query::Take { count, .. }) => vec![&**count],
            Node::Query(Query::Join {
                outer_key,
                inner_key,
                result,
                ..
            }) => vec![&*outer_key.body, &*inner_key.body, &*result.body],
            _ => Vec::new(),
        };
        for e in exprs {
            cap = std::mem::replace(&mut cap, Capability::Translatable)
                .combine(classify_shallow(e, functions));
        }
    };
    walk_query(q, &mut visit);
    cap
}

/// `classify_expr` without descending into nested queries.
fn classify_shallow(e: &Expr, functions: &ClientFunctions) -> Capability {
    match e {
        Expr::Subquery { terminal, .. } => {
            let mut cap = Capability::Translatable;
            if let Some(l) = terminal.lambda() {
                cap = cap.combine(classify_expr(&l.body, functions));
            }
            if let Some(a) = terminal.argument() {
                cap = cap.combine(classify_expr(a, functions));
            }
            cap
        }
        Expr::Collection(_) => Capability::Translatable,
        other => classify_expr(other, functions),
    }
}

fn looks_boolean(e: &Expr) -> bool {
    match e {
        Expr::Constant(s) => s.as_bool().is_some(),
        Expr::Unary {
            op: UnaryOp::Not, ..
        } => true,
        Expr::Binary { op, .. } => op.is_comparison() || op.is_logical(),
        Expr::Call { method, .. } => matches!(
            method.as_str(),
            "StartsWith" | "EndsWith" | "Contains" | "Equals" | "string.IsNullOrEmpty"
        ),
        Expr::Subquery { terminal, .. } => matches!(
            **terminal,
            Terminal::Any { .. } | Terminal::All { .. } | Terminal::Contains { .. }
        ),
        _ => false,
    }
}

/// Check positional rules and split off the client residual.
pub fn classify(tree: &QueryTree, functions: &ClientFunctions) -> Result<Classified, QueryError> {
    let (paged, body) = match &tree.query {
        Query::Paginate { input } => (true, input.as_ref()),
        q => (false, q),
    };

    check_paging_position(tree, body, paged)?;
    check_nested_queries(tree)?;

    let mut chain = Vec::new();
    let mut q = body;
    chain.push(q);
    while let Some(input) = q.input() {
        chain.push(input);
        q = input;
    }
    chain.reverse();

    let mut kept: Vec<&Query> = Vec::new();
    let mut residual: Vec<Lambda> = Vec::new();
    for op in chain {
        let after_client = !residual.is_empty();
        match op {
            Query::Source { .. } | Query::Embedded { .. } => {}
            Query::Select { selector, .. } => {
                let cap = classify_expr(&selector.body, functions);
                if let Some(err) = cap.clone().into_error() {
                    return Err(err);
                }
                if after_client || cap == Capability::ClientEval {
                    residual.push(selector.clone());
                    continue;
                }
            }
            Query::Where { predicate: l, .. }
            | Query::SelectMany { collection: l, .. }
            | Query::OrderBy { key: l, .. }
            | Query::ThenBy { key: l, .. }
            | Query::GroupBy { key: l, .. } => {
                if after_client {
                    return Err(report::unsupported(
                        op,
                        format!("'{}' cannot be applied after a client-evaluated projection", op.op_name()),
                    ));
                }
                require_translatable(op, l, functions)?;
            }
            Query::Skip { count, .. } | Query::Take { count, .. } => {
                if let Some(err) = classify_expr(count, functions).into_error() {
                    return Err(err);
                }
            }
            Query::Distinct { .. } | Query::OfType { .. } => {
                if after_client {
                    return Err(report::unsupported(
                        op,
                        format!("'{}' cannot be applied after a client-evaluated projection", op.op_name()),
                    ));
                }
            }
            Query::Join { .. } => {
                return Err(report::unsupported(
                    op,
                    "joins between documents are not supported; embed the related data as an owned collection",
                ));
            }
            Query::SetOp { op: set_op, .. } => {
                return Err(report::unsupported(
                    op,
                    format!("'{}' over root entity sets is not supported", set_op.name()),
                ));
            }
            Query::Paginate { .. } => {
                return Err(report::paging_misuse(tree, "AsPaged must be the outermost operation"));
            }
        }
        kept.push(op);
    }

    if let Some(t) = &tree.terminal {
        check_terminal(t, body, !residual.is_empty(), functions)?;
    }

    let mut store = rebuild(&kept);
    if paged {
        store = Query::Paginate {
            input: Box::new(store),
        };
    }
    // Aggregates ignore the projection entirely.
    if matches!(
        tree.terminal,
        Some(Terminal::Count { .. }) | Some(Terminal::Any { .. })
    ) {
        residual.clear();
    }
    Ok(Classified {
        store: QueryTree {
            query: store,
            terminal: tree.terminal.clone(),
        },
        residual,
    })
}

fn require_translatable(op: &Query, l: &Lambda, functions: &ClientFunctions) -> Result<(), QueryError> {
    match classify_expr(&l.body, functions) {
        Capability::Translatable => Ok(()),
        Capability::ClientEval => Err(report::unsupported(
            op,
            format!(
                "'{}' needs client evaluation, but the store must apply it before rows are returned",
                op.op_name()
            ),
        )),
        unsupported => Err(unsupported
            .into_error()
            .unwrap_or_else(|| report::unsupported(op, "unsupported expression"))),
    }
}

fn check_terminal(
    t: &Terminal,
    body: &Query,
    after_client: bool,
    functions: &ClientFunctions,
) -> Result<(), QueryError> {
    let aggregates_values = matches!(
        t,
        Terminal::Sum { .. }
            | Terminal::Min { .. }
            | Terminal::Max { .. }
            | Terminal::Average { .. }
            | Terminal::All { .. }
            | Terminal::Contains { .. }
    );
    let shown = || format!("{body}.{t}");
    if after_client && aggregates_values {
        return Err(report::unsupported(
            &shown(),
            format!("'{}' cannot aggregate client-evaluated values", t.name()),
        ));
    }
    let mut cap = Capability::Translatable;
    if let Some(l) = t.lambda() {
        cap = cap.combine(classify_expr(&l.body, functions));
    }
    if let Some(a) = t.argument() {
        cap = cap.combine(classify_expr(a, functions));
    }
    match cap {
        Capability::Translatable => Ok(()),
        Capability::ClientEval => Err(report::unsupported(
            &shown(),
            format!("'{}' needs client evaluation inside the store query", t.name()),
        )),
        unsupported => Err(unsupported
            .into_error()
            .unwrap_or_else(|| report::unsupported(&shown(), "unsupported expression"))),
    }
}

/// AsPaged is legal only as the outermost operator of a sequence query.
fn check_paging_position(tree: &QueryTree, body: &Query, paged: bool) -> Result<(), QueryError> {
    let terminal = tree.terminal.as_ref();
    let mut nested = false;
    walk_query(body, &mut |n| {
        if let Node::Query(Query::Paginate { .. }) = n {
            nested = true;
        }
    });
    if let Some(t) = terminal {
        walk_terminal_queries(t, &mut |q| {
            if matches!(q, Query::Paginate { .. }) {
                nested = true;
            }
        });
    }
    if nested {
        return Err(report::paging_misuse(
            tree,
            "AsPaged must be the outermost operation of the query",
        ));
    }
    if paged {
        if let Some(t) = terminal {
            return Err(report::paging_misuse(
                tree,
                format!("a paged query cannot be reduced with '{}'", t.name()),
            ));
        }
    }
    Ok(())
}

fn walk_terminal_queries<'a>(t: &'a Terminal, f: &mut dyn FnMut(&'a Query)) {
    docql_core::expr::walk_terminal(t, &mut |n| {
        if let Node::Query(q) = n {
            f(q)
        }
    });
}

/// Rules for queries nested inside lambdas.
fn check_nested_queries(tree: &QueryTree) -> Result<(), QueryError> {
    for q in nested_queries(tree) {
        if let Query::Source { .. } = q.innermost() {
            return Err(if q.free_vars().is_empty() {
                report::non_correlated(q)
            } else {
                report::unsupported(q, "correlated subqueries over root entity sets are not supported")
            });
        }
        let mut paging = false;
        let mut current = Some(q);
        while let Some(op) = current {
            if matches!(op, Query::Skip { .. } | Query::Take { .. }) {
                paging = true;
            }
            current = op.input();
        }
        if paging {
            return Err(report::nested_paging(q));
        }
    }
    Ok(())
}

fn nested_queries<'a>(tree: &'a QueryTree) -> Vec<&'a Query> {
    let mut nested: Vec<&'a Query> = Vec::new();
    let mut collect = |n: Node<'a>| {
        if let Node::Expr(Expr::Subquery { query, .. } | Expr::Collection(query)) = n {
            nested.push(query);
        }
    };
    walk_query(&tree.query, &mut collect);
    if let Some(t) = &tree.terminal {
        docql_core::expr::walk_terminal(t, &mut collect);
    }
    nested
}

/// Rebuild a chain (innermost first) from the kept operators.
fn rebuild(ops: &[&Query]) -> Query {
    let mut iter = ops.iter();
    let mut out = match iter.next() {
        Some(q) => (*q).clone(),
        None => return Query::Embedded {
            source: Box::new(Expr::Array(Vec::new())),
        },
    };
    for op in iter {
        out = with_input(op, out);
    }
    out
}

/// `op` with its primary input replaced.
fn with_input(op: &Query, input: Query) -> Query {
    let input = Box::new(input);
    match op.clone() {
        Query::Source { .. } | Query::Embedded { .. } => *input,
        Query::Where { predicate, .. } => Query::Where { input, predicate },
        Query::Select { selector, .. } => Query::Select { input, selector },
        Query::SelectMany { collection, .. } => Query::SelectMany { input, collection },
        Query::OrderBy { key, descending, .. } => Query::OrderBy {
            input,
            key,
            descending,
        },
        Query::ThenBy { key, descending, .. } => Query::ThenBy {
            input,
            key,
            descending,
        },
        Query::Skip { count, .. } => Query::Skip { input, count },
        Query::Take { count, .. } => Query::Take { input, count },
        Query::Distinct { .. } => Query::Distinct { input },
        Query::OfType { entity, .. } => Query::OfType { input, entity },
        Query::GroupBy { key, .. } => Query::GroupBy { input, key },
        Query::Join {
            inner,
            outer_key,
            inner_key,
            result,
            ..
        } => Query::Join {
            outer: input,
            inner,
            outer_key,
            inner_key,
            result,
        },
        Query::SetOp { op, right, .. } => Query::SetOp {
            op,
            left: input,
            right,
        },
        Query::Paginate { .. } => Query::Paginate { input },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn fns() -> ClientFunctions {
        let mut f = ClientFunctions::new();
        f.register("Client.Shout", |args: &[Value]| {
            Ok(Value::String(args[0].as_str().unwrap_or_default().to_uppercase()))
        });
        f
    }

    fn shout(e: Expr) -> Expr {
        Expr::Call {
            receiver: None,
            method: "Client.Shout".into(),
            args: vec![e],
        }
    }

    #[test]
    fn tags_bottom_up() {
        let f = fns();
        let name = Expr::var("c").member("Name");
        assert_eq!(classify_expr(&name, &f), Capability::Translatable);
        assert_eq!(classify_expr(&shout(name.clone()), &f), Capability::ClientEval);
        let unknown = Expr::Call {
            receiver: Some(Box::new(name)),
            method: "Soundex".into(),
            args: vec![],
        };
        assert!(matches!(
            classify_expr(&unknown, &f),
            Capability::Unsupported { expression, .. } if expression == "c.Name.Soundex()"
        ));
    }

    #[test]
    fn trailing_client_projection_becomes_residual() {
        let q = Query::source("Customer")
            .select(Lambda::new("c", shout(Expr::var("c").member("Name"))))
            .take(Expr::constant(5i64));
        let out = classify(&QueryTree::sequence(q), &fns()).unwrap();
        assert_eq!(out.store.to_string(), "Customer.Take(5)");
        assert_eq!(out.residual.len(), 1);
    }

    #[test]
    fn client_filter_is_rejected() {
        let q = Query::source("Customer").filter(Lambda::new(
            "c",
            shout(Expr::var("c").member("Name")).eq(Expr::constant("ALFKI")),
        ));
        let err = classify(&QueryTree::sequence(q), &fns()).unwrap_err();
        assert_eq!(err.code(), "CompilationUnsupported");
        assert_eq!(
            err.expression(),
            Some(r#"Customer.Where(c => Client.Shout(c.Name) == "ALFKI")"#)
        );
    }

    #[test]
    fn filter_after_client_projection_is_rejected() {
        let q = Query::source("Customer")
            .select(Lambda::new("c", shout(Expr::var("c").member("Name"))))
            .filter(Lambda::new("n", Expr::var("n").eq(Expr::constant("A"))));
        let err = classify(&QueryTree::sequence(q), &fns()).unwrap_err();
        assert_eq!(err.code(), "CompilationUnsupported");
    }

    #[test]
    fn boolean_xor_is_unsupported() {
        let body = Expr::binary(
            BinaryOp::ExclusiveOr,
            Expr::var("c").member("A").eq(Expr::constant(1i64)),
            Expr::var("c").member("B").eq(Expr::constant(2i64)),
        );
        let q = Query::source("Customer").filter(Lambda::new("c", body));
        let err = classify(&QueryTree::sequence(q), &fns()).unwrap_err();
        assert_eq!(err.code(), "CompilationUnsupported");
        assert_eq!(err.expression(), Some("c.A == 1 ^ c.B == 2"));
    }

    #[test]
    fn paging_must_be_outermost() {
        let inner = Query::Paginate {
            input: Box::new(Query::source("Customer")),
        };
        let q = inner.take(Expr::constant(3i64));
        let err = classify(&QueryTree::sequence(q), &fns()).unwrap_err();
        assert_eq!(err.code(), "PagingMisuse");
        assert_eq!(err.expression(), Some("Customer.AsPaged().Take(3)"));

        let paged = Query::Paginate {
            input: Box::new(Query::source("Customer")),
        };
        let err = classify(
            &QueryTree::scalar(paged, Terminal::Count { predicate: None, long: false }),
            &fns(),
        )
        .unwrap_err();
        assert_eq!(err.code(), "PagingMisuse");
        assert_eq!(err.expression(), Some("Customer.AsPaged().Count()"));
    }

    #[test]
    fn nested_take_is_nested_paging() {
        let orders = Query::Embedded {
            source: Box::new(Expr::var("c").member("Orders")),
        }
        .take(Expr::constant(2i64));
        let q = Query::source("Customer").select(Lambda::new("c", Expr::Collection(Box::new(orders))));
        let err = classify(&QueryTree::sequence(q), &fns()).unwrap_err();
        assert_eq!(err.code(), "NestedPagingUnsupported");
        assert_eq!(err.expression(), Some("c.Orders.Take(2)"));
    }

    #[test]
    fn uncorrelated_root_subquery() {
        let nested = Expr::Subquery {
            query: Box::new(Query::source("Customer")),
            terminal: Box::new(Terminal::Count { predicate: None, long: false }),
        };
        let q = Query::source("Customer").filter(Lambda::new(
            "c",
            Expr::binary(BinaryOp::GreaterThan, nested, Expr::constant(0i64)),
        ));
        let err = classify(&QueryTree::sequence(q), &fns()).unwrap_err();
        assert_eq!(err.code(), "NonCorrelatedSubqueryUnsupported");
    }

    #[test]
    fn client_values_cannot_be_summed() {
        let q = Query::source("Order").select(Lambda::new("o", shout(Expr::var("o").member("Name"))));
        let err = classify(&QueryTree::scalar(q, Terminal::Sum { selector: None }), &fns()).unwrap_err();
        assert_eq!(err.code(), "CompilationUnsupported");
    }
}
