//! Query expression trees: the immutable input to compilation.
//!
//! A query is a chain of sequence operators (`Query`) rooted at an entity
//! set or an embedded collection, optionally closed by a `Terminal` that
//! reduces the sequence to one value. Lambda bodies are `Expr`s and may nest
//! further queries as correlated subqueries.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::types::Scalar;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    Not,
    Negate,
    BitwiseNot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    /// Short-circuit `&&`.
    AndAlso,
    /// Short-circuit `||`.
    OrElse,
    /// Bitwise (or non-short-circuit boolean) `&`.
    And,
    /// Bitwise (or non-short-circuit boolean) `|`.
    Or,
    ExclusiveOr,
    LeftShift,
    RightShift,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Subtract => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
            BinaryOp::Modulo => "%",
            BinaryOp::Equal => "==",
            BinaryOp::NotEqual => "!=",
            BinaryOp::LessThan => "<",
            BinaryOp::LessThanOrEqual => "<=",
            BinaryOp::GreaterThan => ">",
            BinaryOp::GreaterThanOrEqual => ">=",
            BinaryOp::AndAlso => "&&",
            BinaryOp::OrElse => "||",
            BinaryOp::And => "&",
            BinaryOp::Or => "|",
            BinaryOp::ExclusiveOr => "^",
            BinaryOp::LeftShift => "<<",
            BinaryOp::RightShift => ">>",
        }
    }

    /// Binding strength in query text; higher binds tighter.
    pub fn precedence(self) -> u8 {
        match self {
            BinaryOp::OrElse => 1,
            BinaryOp::AndAlso => 2,
            BinaryOp::Or => 3,
            BinaryOp::ExclusiveOr => 4,
            BinaryOp::And => 5,
            BinaryOp::Equal | BinaryOp::NotEqual => 6,
            BinaryOp::LessThan
            | BinaryOp::LessThanOrEqual
            | BinaryOp::GreaterThan
            | BinaryOp::GreaterThanOrEqual => 7,
            BinaryOp::LeftShift | BinaryOp::RightShift => 8,
            BinaryOp::Add | BinaryOp::Subtract => 9,
            BinaryOp::Multiply | BinaryOp::Divide | BinaryOp::Modulo => 10,
        }
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Equal
                | BinaryOp::NotEqual
                | BinaryOp::LessThan
                | BinaryOp::LessThanOrEqual
                | BinaryOp::GreaterThan
                | BinaryOp::GreaterThanOrEqual
        )
    }

    pub fn is_logical(self) -> bool {
        matches!(self, BinaryOp::AndAlso | BinaryOp::OrElse)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lambda {
    pub params: Vec<String>,
    pub body: Box<Expr>,
}

impl Lambda {
    pub fn new(param: impl Into<String>, body: Expr) -> Self {
        Self {
            params: vec![param.into()],
            body: Box::new(body),
        }
    }

    pub fn with_params(params: Vec<String>, body: Expr) -> Self {
        Self {
            params,
            body: Box::new(body),
        }
    }

    /// First parameter; every lambda has at least one.
    pub fn param(&self) -> &str {
        self.params.first().map(String::as_str).unwrap_or("_")
    }

    /// `x => x`
    pub fn is_identity(&self) -> bool {
        matches!(self.body.as_ref(), Expr::Var(v) if self.params.len() == 1 && v == self.param())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Constant(Scalar),
    /// A value captured from the calling scope; replaced by a parameter
    /// during normalization.
    Captured { name: String, value: Scalar },
    Parameter { name: String },
    Var(String),
    Member { target: Box<Expr>, member: String },
    Index { target: Box<Expr>, index: Box<Expr> },
    Unary { op: UnaryOp, operand: Box<Expr> },
    Binary { op: BinaryOp, left: Box<Expr>, right: Box<Expr> },
    Conditional { test: Box<Expr>, if_true: Box<Expr>, if_false: Box<Expr> },
    Coalesce { left: Box<Expr>, right: Box<Expr> },
    /// Instance call when `receiver` is set, else a static call whose method
    /// name is qualified (`Math.Abs`).
    Call { receiver: Option<Box<Expr>>, method: String, args: Vec<Expr> },
    /// Anonymous object; member order is significant.
    New { members: Vec<(String, Expr)> },
    Array(Vec<Expr>),
    /// A sequence reduced to a single value.
    Subquery { query: Box<Query>, terminal: Box<Terminal> },
    /// A sequence used as a collection value.
    Collection(Box<Query>),
}

impl Expr {
    pub fn constant(v: impl Into<Scalar>) -> Self {
        Expr::Constant(v.into())
    }

    pub fn var(name: impl Into<String>) -> Self {
        Expr::Var(name.into())
    }

    pub fn captured(name: impl Into<String>, value: impl Into<Scalar>) -> Self {
        Expr::Captured {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn member(self, member: impl Into<String>) -> Self {
        Expr::Member {
            target: Box::new(self),
            member: member.into(),
        }
    }

    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Self {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn eq(self, other: Expr) -> Self {
        Expr::binary(BinaryOp::Equal, self, other)
    }

    pub fn not(self) -> Self {
        Expr::Unary {
            op: UnaryOp::Not,
            operand: Box::new(self),
        }
    }

    pub fn as_constant(&self) -> Option<&Scalar> {
        match self {
            Expr::Constant(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool_constant(&self) -> Option<bool> {
        self.as_constant().and_then(Scalar::as_bool)
    }

    /// Variables referenced but not bound by a lambda inside this expression.
    pub fn free_vars(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        free_vars_expr(self, &mut Vec::new(), &mut out);
        out
    }

    /// True when a root entity set occurs anywhere below.
    pub fn contains_source(&self) -> bool {
        let mut found = false;
        walk_expr(self, &mut |n| {
            if let Node::Query(Query::Source { .. }) = n {
                found = true;
            }
        });
        found
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SetOp {
    Union,
    Concat,
    Intersect,
    Except,
}

impl SetOp {
    pub fn name(self) -> &'static str {
        match self {
            SetOp::Union => "Union",
            SetOp::Concat => "Concat",
            SetOp::Intersect => "Intersect",
            SetOp::Except => "Except",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Query {
    /// A root entity set, named by entity type.
    Source { entity: String },
    /// A collection value used as a sequence (owned collection, array, captured list).
    Embedded { source: Box<Expr> },
    Where { input: Box<Query>, predicate: Lambda },
    Select { input: Box<Query>, selector: Lambda },
    SelectMany { input: Box<Query>, collection: Lambda },
    OrderBy { input: Box<Query>, key: Lambda, descending: bool },
    ThenBy { input: Box<Query>, key: Lambda, descending: bool },
    Skip { input: Box<Query>, count: Box<Expr> },
    Take { input: Box<Query>, count: Box<Expr> },
    Distinct { input: Box<Query> },
    OfType { input: Box<Query>, entity: String },
    GroupBy { input: Box<Query>, key: Lambda },
    Join {
        outer: Box<Query>,
        inner: Box<Query>,
        outer_key: Lambda,
        inner_key: Lambda,
        result: Lambda,
    },
    SetOp { op: SetOp, left: Box<Query>, right: Box<Query> },
    /// Continuation-token paging marker.
    Paginate { input: Box<Query> },
}

impl Query {
    pub fn source(entity: impl Into<String>) -> Self {
        Query::Source {
            entity: entity.into(),
        }
    }

    pub fn filter(self, predicate: Lambda) -> Self {
        Query::Where {
            input: Box::new(self),
            predicate,
        }
    }

    pub fn select(self, selector: Lambda) -> Self {
        Query::Select {
            input: Box::new(self),
            selector,
        }
    }

    pub fn order_by(self, key: Lambda, descending: bool) -> Self {
        Query::OrderBy {
            input: Box::new(self),
            key,
            descending,
        }
    }

    pub fn skip(self, count: Expr) -> Self {
        Query::Skip {
            input: Box::new(self),
            count: Box::new(count),
        }
    }

    pub fn take(self, count: Expr) -> Self {
        Query::Take {
            input: Box::new(self),
            count: Box::new(count),
        }
    }

    /// The operator's primary input; `None` for sources.
    pub fn input(&self) -> Option<&Query> {
        match self {
            Query::Source { .. } | Query::Embedded { .. } => None,
            Query::Where { input, .. }
            | Query::Select { input, .. }
            | Query::SelectMany { input, .. }
            | Query::OrderBy { input, .. }
            | Query::ThenBy { input, .. }
            | Query::Skip { input, .. }
            | Query::Take { input, .. }
            | Query::Distinct { input }
            | Query::OfType { input, .. }
            | Query::GroupBy { input, .. }
            | Query::Paginate { input } => Some(input),
            Query::Join { outer, .. } => Some(outer),
            Query::SetOp { left, .. } => Some(left),
        }
    }

    pub fn op_name(&self) -> &'static str {
        match self {
            Query::Source { .. } => "Source",
            Query::Embedded { .. } => "Embedded",
            Query::Where { .. } => "Where",
            Query::Select { .. } => "Select",
            Query::SelectMany { .. } => "SelectMany",
            Query::OrderBy { descending: false, .. } => "OrderBy",
            Query::OrderBy { descending: true, .. } => "OrderByDescending",
            Query::ThenBy { descending: false, .. } => "ThenBy",
            Query::ThenBy { descending: true, .. } => "ThenByDescending",
            Query::Skip { .. } => "Skip",
            Query::Take { .. } => "Take",
            Query::Distinct { .. } => "Distinct",
            Query::OfType { .. } => "OfType",
            Query::GroupBy { .. } => "GroupBy",
            Query::Join { .. } => "Join",
            Query::SetOp { op, .. } => op.name(),
            Query::Paginate { .. } => "AsPaged",
        }
    }

    /// Innermost query of the primary-input chain.
    pub fn innermost(&self) -> &Query {
        let mut q = self;
        while let Some(next) = q.input() {
            q = next;
        }
        q
    }

    /// Root entity set names in order of first appearance, including those
    /// inside lambdas.
    pub fn referenced_entities(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        walk_query(self, &mut |n| {
            if let Node::Query(Query::Source { entity }) = n {
                if !out.contains(entity) {
                    out.push(entity.clone());
                }
            }
        });
        out
    }

    pub fn free_vars(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        free_vars_query(self, &mut Vec::new(), &mut out);
        out
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Terminal {
    Count { predicate: Option<Lambda>, long: bool },
    Sum { selector: Option<Lambda> },
    Min { selector: Option<Lambda> },
    Max { selector: Option<Lambda> },
    Average { selector: Option<Lambda> },
    Any { predicate: Option<Lambda> },
    All { predicate: Lambda },
    Contains { item: Box<Expr> },
    First { predicate: Option<Lambda>, or_default: bool },
    Single { predicate: Option<Lambda>, or_default: bool },
    Last { predicate: Option<Lambda>, or_default: bool },
    ElementAt { index: Box<Expr>, or_default: bool },
}

impl Terminal {
    pub fn name(&self) -> &'static str {
        match self {
            Terminal::Count { long: false, .. } => "Count",
            Terminal::Count { long: true, .. } => "LongCount",
            Terminal::Sum { .. } => "Sum",
            Terminal::Min { .. } => "Min",
            Terminal::Max { .. } => "Max",
            Terminal::Average { .. } => "Average",
            Terminal::Any { .. } => "Any",
            Terminal::All { .. } => "All",
            Terminal::Contains { .. } => "Contains",
            Terminal::First { or_default: false, .. } => "First",
            Terminal::First { or_default: true, .. } => "FirstOrDefault",
            Terminal::Single { or_default: false, .. } => "Single",
            Terminal::Single { or_default: true, .. } => "SingleOrDefault",
            Terminal::Last { or_default: false, .. } => "Last",
            Terminal::Last { or_default: true, .. } => "LastOrDefault",
            Terminal::ElementAt { or_default: false, .. } => "ElementAt",
            Terminal::ElementAt { or_default: true, .. } => "ElementAtOrDefault",
        }
    }

    /// Lambda argument, if the terminal carries one.
    pub fn lambda(&self) -> Option<&Lambda> {
        match self {
            Terminal::Count { predicate, .. }
            | Terminal::Any { predicate }
            | Terminal::First { predicate, .. }
            | Terminal::Single { predicate, .. }
            | Terminal::Last { predicate, .. } => predicate.as_ref(),
            Terminal::Sum { selector }
            | Terminal::Min { selector }
            | Terminal::Max { selector }
            | Terminal::Average { selector } => selector.as_ref(),
            Terminal::All { predicate } => Some(predicate),
            Terminal::Contains { .. } | Terminal::ElementAt { .. } => None,
        }
    }

    /// Non-lambda argument, if any.
    pub fn argument(&self) -> Option<&Expr> {
        match self {
            Terminal::Contains { item } => Some(item),
            Terminal::ElementAt { index, .. } => Some(index),
            _ => None,
        }
    }

    /// True for terminals that pick rows rather than aggregate them.
    pub fn is_element(&self) -> bool {
        matches!(
            self,
            Terminal::First { .. }
                | Terminal::Single { .. }
                | Terminal::Last { .. }
                | Terminal::ElementAt { .. }
        )
    }
}

/// A whole query invocation: the sequence and its optional reduction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryTree {
    pub query: Query,
    pub terminal: Option<Terminal>,
}

impl QueryTree {
    pub fn sequence(query: Query) -> Self {
        Self {
            query,
            terminal: None,
        }
    }

    pub fn scalar(query: Query, terminal: Terminal) -> Self {
        Self {
            query,
            terminal: Some(terminal),
        }
    }

    pub fn is_paged(&self) -> bool {
        matches!(self.query, Query::Paginate { .. })
    }
}

/// A borrowed tree node handed to walkers.
#[derive(Debug, Clone, Copy)]
pub enum Node<'a> {
    Query(&'a Query),
    Expr(&'a Expr),
    Terminal(&'a Terminal),
}

/// Pre-order walk over a query, its lambdas, and any nested subqueries.
pub fn walk_query<'a>(q: &'a Query, f: &mut dyn FnMut(Node<'a>)) {
    f(Node::Query(q));
    match q {
        Query::Source { .. } => {}
        Query::Embedded { source } => walk_expr(source, f),
        Query::Where { input, predicate: l }
        | Query::Select { input, selector: l }
        | Query::SelectMany { input, collection: l }
        | Query::OrderBy { input, key: l, .. }
        | Query::ThenBy { input, key: l, .. }
        | Query::GroupBy { input, key: l } => {
            walk_query(input, f);
            walk_expr(&l.body, f);
        }
        Query::Skip { input, count } | Query::Take { input, count } => {
            walk_query(input, f);
            walk_expr(count, f);
        }
        Query::Distinct { input } | Query::OfType { input, .. } | Query::Paginate { input } => {
            walk_query(input, f)
        }
        Query::Join {
            outer,
            inner,
            outer_key,
            inner_key,
            result,
        } => {
            walk_query(outer, f);
            walk_query(inner, f);
            walk_expr(&outer_key.body, f);
            walk_expr(&inner_key.body, f);
            walk_expr(&result.body, f);
        }
        Query::SetOp { left, right, .. } => {
            walk_query(left, f);
            walk_query(right, f);
        }
    }
}

pub fn walk_terminal<'a>(t: &'a Terminal, f: &mut dyn FnMut(Node<'a>)) {
    f(Node::Terminal(t));
    if let Some(l) = t.lambda() {
        walk_expr(&l.body, f);
    }
    if let Some(a) = t.argument() {
        walk_expr(a, f);
    }
}

pub fn walk_expr<'a>(e: &'a Expr, f: &mut dyn FnMut(Node<'a>)) {
    f(Node::Expr(e));
    match e {
        Expr::Constant(_) | Expr::Captured { .. } | Expr::Parameter { .. } | Expr::Var(_) => {}
        Expr::Member { target, .. } => walk_expr(target, f),
        Expr::Index { target, index } => {
            walk_expr(target, f);
            walk_expr(index, f);
        }
        Expr::Unary { operand, .. } => walk_expr(operand, f),
        Expr::Binary { left, right, .. } | Expr::Coalesce { left, right } => {
            walk_expr(left, f);
            walk_expr(right, f);
        }
        Expr::Conditional {
            test,
            if_true,
            if_false,
        } => {
            walk_expr(test, f);
            walk_expr(if_true, f);
            walk_expr(if_false, f);
        }
        Expr::Call { receiver, args, .. } => {
            if let Some(r) = receiver {
                walk_expr(r, f);
            }
            for a in args {
                walk_expr(a, f);
            }
        }
        Expr::New { members } => {
            for (_, m) in members {
                walk_expr(m, f);
            }
        }
        Expr::Array(items) => {
            for i in items {
                walk_expr(i, f);
            }
        }
        Expr::Subquery { query, terminal } => {
            walk_query(query, f);
            walk_terminal(terminal, f);
        }
        Expr::Collection(query) => walk_query(query, f),
    }
}

fn free_vars_lambda(l: &Lambda, bound: &mut Vec<String>, out: &mut BTreeSet<String>) {
    let n = bound.len();
    bound.extend(l.params.iter().cloned());
    free_vars_expr(&l.body, bound, out);
    bound.truncate(n);
}

fn free_vars_query(q: &Query, bound: &mut Vec<String>, out: &mut BTreeSet<String>) {
    match q {
        Query::Source { .. } => {}
        Query::Embedded { source } => free_vars_expr(source, bound, out),
        Query::Where { input, predicate: l }
        | Query::Select { input, selector: l }
        | Query::SelectMany { input, collection: l }
        | Query::OrderBy { input, key: l, .. }
        | Query::ThenBy { input, key: l, .. }
        | Query::GroupBy { input, key: l } => {
            free_vars_query(input, bound, out);
            free_vars_lambda(l, bound, out);
        }
        Query::Skip { input, count } | Query::Take { input, count } => {
            free_vars_query(input, bound, out);
            free_vars_expr(count, bound, out);
        }
        Query::Distinct { input } | Query::OfType { input, .. } | Query::Paginate { input } => {
            free_vars_query(input, bound, out)
        }
        Query::Join {
            outer,
            inner,
            outer_key,
            inner_key,
            result,
        } => {
            free_vars_query(outer, bound, out);
            free_vars_query(inner, bound, out);
            free_vars_lambda(outer_key, bound, out);
            free_vars_lambda(inner_key, bound, out);
            free_vars_lambda(result, bound, out);
        }
        Query::SetOp { left, right, .. } => {
            free_vars_query(left, bound, out);
            free_vars_query(right, bound, out);
        }
    }
}

fn free_vars_expr(e: &Expr, bound: &mut Vec<String>, out: &mut BTreeSet<String>) {
    match e {
        Expr::Var(v) => {
            if !bound.contains(v) {
                out.insert(v.clone());
            }
        }
        Expr::Constant(_) | Expr::Captured { .. } | Expr::Parameter { .. } => {}
        Expr::Member { target, .. } => free_vars_expr(target, bound, out),
        Expr::Index { target, index } => {
            free_vars_expr(target, bound, out);
            free_vars_expr(index, bound, out);
        }
        Expr::Unary { operand, .. } => free_vars_expr(operand, bound, out),
        Expr::Binary { left, right, .. } | Expr::Coalesce { left, right } => {
            free_vars_expr(left, bound, out);
            free_vars_expr(right, bound, out);
        }
        Expr::Conditional {
            test,
            if_true,
            if_false,
        } => {
            free_vars_expr(test, bound, out);
            free_vars_expr(if_true, bound, out);
            free_vars_expr(if_false, bound, out);
        }
        Expr::Call { receiver, args, .. } => {
            if let Some(r) = receiver {
                free_vars_expr(r, bound, out);
            }
            for a in args {
                free_vars_expr(a, bound, out);
            }
        }
        Expr::New { members } => {
            for (_, m) in members {
                free_vars_expr(m, bound, out);
            }
        }
        Expr::Array(items) => {
            for i in items {
                free_vars_expr(i, bound, out);
            }
        }
        Expr::Subquery { query, terminal } => {
            free_vars_query(query, bound, out);
            if let Some(l) = terminal.lambda() {
                free_vars_lambda(l, bound, out);
            }
            if let Some(a) = terminal.argument() {
                free_vars_expr(a, bound, out);
            }
        }
        Expr::Collection(query) => free_vars_query(query, bound, out),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn free_vars_respect_lambda_binding() {
        // c.Orders.Where(o => o.Total > c.Limit)
        let inner = Query::Embedded {
            source: Box::new(Expr::var("c").member("Orders")),
        }
        .filter(Lambda::new(
            "o",
            Expr::binary(
                BinaryOp::GreaterThan,
                Expr::var("o").member("Total"),
                Expr::var("c").member("Limit"),
            ),
        ));
        let vars = inner.free_vars();
        assert_eq!(vars.into_iter().collect::<Vec<_>>(), vec!["c".to_string()]);
    }

    #[test]
    fn referenced_entities_include_lambdas() {
        let nested = Expr::Subquery {
            query: Box::new(Query::source("Order")),
            terminal: Box::new(Terminal::Any { predicate: None }),
        };
        let q = Query::source("Customer").filter(Lambda::new("c", nested));
        assert_eq!(q.referenced_entities(), vec!["Customer", "Order"]);
        assert!(matches!(q.innermost(), Query::Source { entity } if entity == "Customer"));
    }

    #[test]
    fn identity_lambda() {
        assert!(Lambda::new("x", Expr::var("x")).is_identity());
        assert!(!Lambda::new("x", Expr::var("y")).is_identity());
    }
}
