//! Dialect AST and its text rendering.
//!
//! Every binary operation renders fully parenthesised, so the text never
//! depends on the store's own precedence rules. Top-level statements render
//! one clause per line; nested selects render on a single line.

use std::fmt::{self, Display, Formatter, Write as _};

use serde::{Deserialize, Serialize};

use crate::types::Scalar;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SqlUnaryOp {
    Not,
    Negate,
    BitwiseNot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SqlBinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Concat,
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    And,
    Or,
    BitwiseAnd,
    BitwiseOr,
    BitwiseXor,
    LeftShift,
    RightShift,
}

impl SqlBinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            SqlBinaryOp::Add => "+",
            SqlBinaryOp::Subtract => "-",
            SqlBinaryOp::Multiply => "*",
            SqlBinaryOp::Divide => "/",
            SqlBinaryOp::Modulo => "%",
            SqlBinaryOp::Concat => "||",
            SqlBinaryOp::Equal => "=",
            SqlBinaryOp::NotEqual => "!=",
            SqlBinaryOp::LessThan => "<",
            SqlBinaryOp::LessThanOrEqual => "<=",
            SqlBinaryOp::GreaterThan => ">",
            SqlBinaryOp::GreaterThanOrEqual => ">=",
            SqlBinaryOp::And => "AND",
            SqlBinaryOp::Or => "OR",
            SqlBinaryOp::BitwiseAnd => "&",
            SqlBinaryOp::BitwiseOr => "|",
            SqlBinaryOp::BitwiseXor => "^",
            SqlBinaryOp::LeftShift => "<<",
            SqlBinaryOp::RightShift => ">>",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SqlExpr {
    Alias(String),
    Property { target: Box<SqlExpr>, name: String },
    Index { target: Box<SqlExpr>, index: Box<SqlExpr> },
    Literal(Scalar),
    /// Named placeholder, stored without the leading `@`.
    Parameter(String),
    Unary { op: SqlUnaryOp, operand: Box<SqlExpr> },
    Binary { op: SqlBinaryOp, left: Box<SqlExpr>, right: Box<SqlExpr> },
    Conditional { test: Box<SqlExpr>, if_true: Box<SqlExpr>, if_false: Box<SqlExpr> },
    In { item: Box<SqlExpr>, values: Vec<SqlExpr> },
    Function { name: String, args: Vec<SqlExpr> },
    Object(Vec<(String, SqlExpr)>),
    Array(Vec<SqlExpr>),
    Exists(Box<SelectExpr>),
    ArraySubquery(Box<SelectExpr>),
    Subquery(Box<SelectExpr>),
}

impl SqlExpr {
    pub fn alias(name: impl Into<String>) -> Self {
        SqlExpr::Alias(name.into())
    }

    pub fn literal(v: impl Into<Scalar>) -> Self {
        SqlExpr::Literal(v.into())
    }

    pub fn param(name: impl Into<String>) -> Self {
        SqlExpr::Parameter(name.into())
    }

    pub fn prop(self, name: impl Into<String>) -> Self {
        SqlExpr::Property {
            target: Box::new(self),
            name: name.into(),
        }
    }

    pub fn index(self, index: SqlExpr) -> Self {
        SqlExpr::Index {
            target: Box::new(self),
            index: Box::new(index),
        }
    }

    pub fn binary(op: SqlBinaryOp, left: SqlExpr, right: SqlExpr) -> Self {
        SqlExpr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn unary(op: SqlUnaryOp, operand: SqlExpr) -> Self {
        SqlExpr::Unary {
            op,
            operand: Box::new(operand),
        }
    }

    pub fn func(name: impl Into<String>, args: Vec<SqlExpr>) -> Self {
        SqlExpr::Function {
            name: name.into(),
            args,
        }
    }

    /// `left AND right`, with `None` as the neutral element.
    pub fn and_opt(left: Option<SqlExpr>, right: SqlExpr) -> SqlExpr {
        match left {
            Some(l) => SqlExpr::binary(SqlBinaryOp::And, l, right),
            None => right,
        }
    }

    /// True for `alias`, `alias["a"]`, `alias["a"][0]`, ...
    pub fn is_path(&self) -> bool {
        match self {
            SqlExpr::Alias(_) => true,
            SqlExpr::Property { target, .. } => target.is_path(),
            SqlExpr::Index { target, index } => {
                target.is_path() && matches!(**index, SqlExpr::Literal(_) | SqlExpr::Parameter(_))
            }
            _ => false,
        }
    }

    /// Placeholder names in rendering order, first appearance only.
    pub fn collect_parameters(&self, out: &mut Vec<String>) {
        match self {
            SqlExpr::Parameter(p) => {
                if !out.contains(p) {
                    out.push(p.clone());
                }
            }
            SqlExpr::Alias(_) | SqlExpr::Literal(_) => {}
            SqlExpr::Property { target, .. } => target.collect_parameters(out),
            SqlExpr::Index { target, index } => {
                target.collect_parameters(out);
                index.collect_parameters(out);
            }
            SqlExpr::Unary { operand, .. } => operand.collect_parameters(out),
            SqlExpr::Binary { left, right, .. } => {
                left.collect_parameters(out);
                right.collect_parameters(out);
            }
            SqlExpr::Conditional {
                test,
                if_true,
                if_false,
            } => {
                test.collect_parameters(out);
                if_true.collect_parameters(out);
                if_false.collect_parameters(out);
            }
            SqlExpr::In { item, values } => {
                item.collect_parameters(out);
                for v in values {
                    v.collect_parameters(out);
                }
            }
            SqlExpr::Function { args, .. } | SqlExpr::Array(args) => {
                for a in args {
                    a.collect_parameters(out);
                }
            }
            SqlExpr::Object(fields) => {
                for (_, v) in fields {
                    v.collect_parameters(out);
                }
            }
            SqlExpr::Exists(s) | SqlExpr::ArraySubquery(s) | SqlExpr::Subquery(s) => {
                s.collect_parameters(out)
            }
        }
    }
}

fn write_json_string(f: &mut Formatter<'_>, s: &str) -> fmt::Result {
    write!(f, "{}", serde_json::Value::String(s.to_string()))
}

fn write_literal(f: &mut Formatter<'_>, s: &Scalar) -> fmt::Result {
    match s {
        Scalar::Null => f.write_str("null"),
        Scalar::Bool(b) => write!(f, "{b}"),
        Scalar::Int(i) => write!(f, "{i}"),
        Scalar::Float(x) => write!(f, "{x:?}"),
        Scalar::Str(s) => write_json_string(f, s),
        Scalar::Array(items) => {
            f.write_char('[')?;
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write_literal(f, item)?;
            }
            f.write_char(']')
        }
        Scalar::Object(fields) => {
            f.write_char('{')?;
            for (i, (k, v)) in fields.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write_json_string(f, k)?;
                f.write_str(" : ")?;
                write_literal(f, v)?;
            }
            f.write_char('}')
        }
    }
}

fn write_args(f: &mut Formatter<'_>, args: &[SqlExpr]) -> fmt::Result {
    for (i, a) in args.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{a}")?;
    }
    Ok(())
}

impl Display for SqlExpr {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            SqlExpr::Alias(a) => f.write_str(a),
            SqlExpr::Property { target, name } => {
                write!(f, "{target}[")?;
                write_json_string(f, name)?;
                f.write_char(']')
            }
            SqlExpr::Index { target, index } => write!(f, "{target}[{index}]"),
            SqlExpr::Literal(s) => write_literal(f, s),
            SqlExpr::Parameter(p) => write!(f, "@{p}"),
            SqlExpr::Unary { op, operand } => match op {
                SqlUnaryOp::Not => write!(f, "NOT({operand})"),
                SqlUnaryOp::Negate => write!(f, "-({operand})"),
                SqlUnaryOp::BitwiseNot => write!(f, "~({operand})"),
            },
            SqlExpr::Binary { op, left, right } => {
                write!(f, "({left} {} {right})", op.symbol())
            }
            SqlExpr::Conditional {
                test,
                if_true,
                if_false,
            } => write!(f, "({test} ? {if_true} : {if_false})"),
            SqlExpr::In { item, values } => {
                write!(f, "{item} IN (")?;
                write_args(f, values)?;
                f.write_char(')')
            }
            SqlExpr::Function { name, args } => {
                write!(f, "{name}(")?;
                write_args(f, args)?;
                f.write_char(')')
            }
            SqlExpr::Object(fields) => {
                f.write_char('{')?;
                for (i, (k, v)) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write_json_string(f, k)?;
                    write!(f, " : {v}")?;
                }
                f.write_char('}')
            }
            SqlExpr::Array(items) => {
                f.write_char('[')?;
                write_args(f, items)?;
                f.write_char(']')
            }
            SqlExpr::Exists(s) => write!(f, "EXISTS ({})", s.render(false)),
            SqlExpr::ArraySubquery(s) => write!(f, "ARRAY({})", s.render(false)),
            SqlExpr::Subquery(s) => write!(f, "({})", s.render(false)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FromClause {
    /// `FROM root c`
    Root { alias: String },
    /// `FROM o IN c["Orders"]`
    In { alias: String, source: SqlExpr },
}

impl FromClause {
    pub fn alias(&self) -> &str {
        match self {
            FromClause::Root { alias } | FromClause::In { alias, .. } => alias,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinClause {
    pub alias: String,
    pub source: SqlExpr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ordering {
    pub expr: SqlExpr,
    pub descending: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectExpr {
    pub distinct: bool,
    /// `SELECT VALUE x` rather than `SELECT x`.
    pub value: bool,
    pub projection: SqlExpr,
    pub from: FromClause,
    pub joins: Vec<JoinClause>,
    pub predicate: Option<SqlExpr>,
    pub group_by: Vec<SqlExpr>,
    pub orderings: Vec<Ordering>,
    pub offset: Option<SqlExpr>,
    pub limit: Option<SqlExpr>,
}

impl SelectExpr {
    pub fn new(projection: SqlExpr, from: FromClause) -> Self {
        Self {
            distinct: false,
            value: true,
            projection,
            from,
            joins: Vec::new(),
            predicate: None,
            group_by: Vec::new(),
            orderings: Vec::new(),
            offset: None,
            limit: None,
        }
    }

    /// Render as dialect text; `multiline` puts each clause on its own line.
    pub fn render(&self, multiline: bool) -> String {
        let sep = if multiline { "\n" } else { " " };
        let mut out = String::new();
        out.push_str("SELECT ");
        if self.distinct {
            out.push_str("DISTINCT ");
        }
        if self.value {
            out.push_str("VALUE ");
        }
        let _ = write!(out, "{}", self.projection);
        out.push_str(sep);
        match &self.from {
            FromClause::Root { alias } => {
                let _ = write!(out, "FROM root {alias}");
            }
            FromClause::In { alias, source } => {
                let _ = write!(out, "FROM {alias} IN {source}");
            }
        }
        for j in &self.joins {
            out.push_str(sep);
            let _ = write!(out, "JOIN {} IN {}", j.alias, j.source);
        }
        if let Some(p) = &self.predicate {
            out.push_str(sep);
            let _ = write!(out, "WHERE {p}");
        }
        if !self.group_by.is_empty() {
            out.push_str(sep);
            out.push_str("GROUP BY ");
            let keys: Vec<String> = self.group_by.iter().map(|k| k.to_string()).collect();
            out.push_str(&keys.join(", "));
        }
        if !self.orderings.is_empty() {
            out.push_str(sep);
            out.push_str("ORDER BY ");
            let keys: Vec<String> = self
                .orderings
                .iter()
                .map(|o| {
                    if o.descending {
                        format!("{} DESC", o.expr)
                    } else {
                        o.expr.to_string()
                    }
                })
                .collect();
            out.push_str(&keys.join(", "));
        }
        match (&self.offset, &self.limit) {
            (Some(o), Some(l)) => {
                out.push_str(sep);
                let _ = write!(out, "OFFSET {o} LIMIT {l}");
            }
            (Some(o), None) => {
                out.push_str(sep);
                let _ = write!(out, "OFFSET {o}");
            }
            (None, Some(l)) => {
                out.push_str(sep);
                let _ = write!(out, "OFFSET 0 LIMIT {l}");
            }
            (None, None) => {}
        }
        out
    }

    pub fn to_text(&self) -> String {
        self.render(true)
    }

    /// Placeholder names in rendering order, first appearance only.
    pub fn parameters(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_parameters(&mut out);
        out
    }

    fn collect_parameters(&self, out: &mut Vec<String>) {
        self.projection.collect_parameters(out);
        if let FromClause::In { source, .. } = &self.from {
            source.collect_parameters(out);
        }
        for j in &self.joins {
            j.source.collect_parameters(out);
        }
        if let Some(p) = &self.predicate {
            p.collect_parameters(out);
        }
        for g in &self.group_by {
            g.collect_parameters(out);
        }
        for o in &self.orderings {
            o.expr.collect_parameters(out);
        }
        if let Some(o) = &self.offset {
            o.collect_parameters(out);
        }
        if let Some(l) = &self.limit {
            l.collect_parameters(out);
        }
    }
}

impl Display for SelectExpr {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render(true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c() -> SqlExpr {
        SqlExpr::alias("c")
    }

    #[test]
    fn renders_fully_parenthesised_predicate() {
        let mut s = SelectExpr::new(c(), FromClause::Root { alias: "c".into() });
        let disc = SqlExpr::binary(
            SqlBinaryOp::Equal,
            c().prop("Discriminator"),
            SqlExpr::literal("Order"),
        );
        let user = SqlExpr::binary(
            SqlBinaryOp::Equal,
            SqlExpr::binary(SqlBinaryOp::Add, c().prop("OrderID"), SqlExpr::literal(10i64)),
            SqlExpr::literal(10258i64),
        );
        s.predicate = Some(SqlExpr::and_opt(Some(disc), user));
        assert_eq!(
            s.to_text(),
            "SELECT VALUE c\nFROM root c\nWHERE ((c[\"Discriminator\"] = \"Order\") AND ((c[\"OrderID\"] + 10) = 10258))"
        );
    }

    #[test]
    fn nested_select_is_single_line() {
        let mut inner = SelectExpr::new(
            SqlExpr::literal(1i64),
            FromClause::In {
                alias: "o".into(),
                source: c().prop("Orders"),
            },
        );
        inner.value = false;
        inner.predicate = Some(SqlExpr::binary(
            SqlBinaryOp::GreaterThan,
            SqlExpr::alias("o").prop("Total"),
            SqlExpr::param("__min_0"),
        ));
        let e = SqlExpr::Exists(Box::new(inner));
        assert_eq!(
            e.to_string(),
            "EXISTS (SELECT 1 FROM o IN c[\"Orders\"] WHERE (o[\"Total\"] > @__min_0))"
        );
    }

    #[test]
    fn parameters_follow_rendering_order() {
        let mut s = SelectExpr::new(c(), FromClause::Root { alias: "c".into() });
        s.predicate = Some(SqlExpr::binary(
            SqlBinaryOp::Equal,
            c().prop("City"),
            SqlExpr::param("__city_0"),
        ));
        s.orderings.push(Ordering {
            expr: c().prop("CustomerID"),
            descending: false,
        });
        s.offset = Some(SqlExpr::param("__p_1"));
        s.limit = Some(SqlExpr::param("__p_2"));
        assert_eq!(s.parameters(), vec!["__city_0", "__p_1", "__p_2"]);
        assert!(s.to_text().ends_with("ORDER BY c[\"CustomerID\"]\nOFFSET @__p_1 LIMIT @__p_2"));
    }

    #[test]
    fn paths() {
        assert!(c().prop("A").index(SqlExpr::literal(0i64)).is_path());
        assert!(!SqlExpr::func("LOWER", vec![c().prop("A")]).is_path());
    }
}
