//! Query-text rendering of trees. Errors quote sub-expressions in this form.

use std::fmt::{self, Display, Formatter, Write as _};

use crate::expr::{Expr, Lambda, Query, QueryTree, Terminal, UnaryOp};
use crate::types::Scalar;

const PREC_CONDITIONAL: u8 = 1;
const PREC_COALESCE: u8 = 2;
const PREC_UNARY: u8 = 13;
const PREC_POSTFIX: u8 = 14;

fn precedence(e: &Expr) -> u8 {
    match e {
        Expr::Conditional { .. } => PREC_CONDITIONAL,
        Expr::Coalesce { .. } => PREC_COALESCE,
        Expr::Binary { op, .. } => op.precedence() + 2,
        Expr::Unary { .. } => PREC_UNARY,
        Expr::Constant(Scalar::Int(i)) if *i < 0 => PREC_UNARY,
        Expr::Constant(Scalar::Float(x)) if *x < 0.0 => PREC_UNARY,
        _ => PREC_POSTFIX,
    }
}

fn write_operand(f: &mut Formatter<'_>, e: &Expr, min: u8) -> fmt::Result {
    if precedence(e) < min {
        write!(f, "({e})")
    } else {
        write!(f, "{e}")
    }
}

pub fn write_scalar(f: &mut impl fmt::Write, s: &Scalar) -> fmt::Result {
    match s {
        Scalar::Null => f.write_str("null"),
        Scalar::Bool(b) => write!(f, "{b}"),
        Scalar::Int(i) => write!(f, "{i}"),
        Scalar::Float(x) => write!(f, "{x:?}"),
        Scalar::Str(s) => write!(f, "{}", serde_json::Value::String(s.clone())),
        Scalar::Array(items) => {
            f.write_char('[')?;
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write_scalar(f, item)?;
            }
            f.write_char(']')
        }
        Scalar::Object(fields) => {
            f.write_str("new { ")?;
            for (i, (k, v)) in fields.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{k} = ")?;
                write_scalar(f, v)?;
            }
            f.write_str(" }")
        }
    }
}

impl Display for Lambda {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.params.len() == 1 {
            write!(f, "{} => {}", self.params[0], self.body)
        } else {
            write!(f, "({}) => {}", self.params.join(", "), self.body)
        }
    }
}

impl Display for Expr {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Constant(s) => write_scalar(f, s),
            Expr::Captured { name, .. } => write!(f, "${name}"),
            Expr::Parameter { name } => write!(f, "@{name}"),
            Expr::Var(v) => f.write_str(v),
            Expr::Member { target, member } => {
                write_operand(f, target, PREC_POSTFIX)?;
                write!(f, ".{member}")
            }
            Expr::Index { target, index } => {
                write_operand(f, target, PREC_POSTFIX)?;
                write!(f, "[{index}]")
            }
            Expr::Unary { op, operand } => {
                let sym = match op {
                    UnaryOp::Not => "!",
                    UnaryOp::Negate => "-",
                    UnaryOp::BitwiseNot => "~",
                };
                f.write_str(sym)?;
                write_operand(f, operand, PREC_UNARY)
            }
            Expr::Binary { op, left, right } => {
                let p = op.precedence() + 2;
                write_operand(f, left, p)?;
                write!(f, " {} ", op.symbol())?;
                write_operand(f, right, p + 1)
            }
            Expr::Conditional {
                test,
                if_true,
                if_false,
            } => {
                write_operand(f, test, PREC_CONDITIONAL + 1)?;
                write!(f, " ? {if_true} : {if_false}")
            }
            Expr::Coalesce { left, right } => {
                write_operand(f, left, PREC_COALESCE + 1)?;
                f.write_str(" ?? ")?;
                write_operand(f, right, PREC_COALESCE)
            }
            Expr::Call {
                receiver,
                method,
                args,
            } => {
                if let Some(r) = receiver {
                    write_operand(f, r, PREC_POSTFIX)?;
                    f.write_char('.')?;
                }
                write!(f, "{method}(")?;
                write_list(f, args)?;
                f.write_char(')')
            }
            Expr::New { members } => {
                f.write_str("new { ")?;
                for (i, (name, value)) in members.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{name} = {value}")?;
                }
                f.write_str(" }")
            }
            Expr::Array(items) => {
                f.write_char('[')?;
                write_list(f, items)?;
                f.write_char(']')
            }
            Expr::Subquery { query, terminal } => write!(f, "{query}.{terminal}"),
            Expr::Collection(query) => write!(f, "{query}"),
        }
    }
}

fn write_list(f: &mut Formatter<'_>, items: &[Expr]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

impl Display for Query {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Query::Source { entity } => f.write_str(entity),
            Query::Embedded { source } => write_operand(f, source, PREC_POSTFIX),
            Query::Where { input, predicate: l }
            | Query::Select { input, selector: l }
            | Query::SelectMany { input, collection: l }
            | Query::OrderBy { input, key: l, .. }
            | Query::ThenBy { input, key: l, .. }
            | Query::GroupBy { input, key: l } => {
                write!(f, "{input}.{}({l})", self.op_name())
            }
            Query::Skip { input, count } | Query::Take { input, count } => {
                write!(f, "{input}.{}({count})", self.op_name())
            }
            Query::Distinct { input } | Query::Paginate { input } => {
                write!(f, "{input}.{}()", self.op_name())
            }
            Query::OfType { input, entity } => write!(f, "{input}.OfType({entity})"),
            Query::Join {
                outer,
                inner,
                outer_key,
                inner_key,
                result,
            } => write!(f, "{outer}.Join({inner}, {outer_key}, {inner_key}, {result})"),
            Query::SetOp { op, left, right } => write!(f, "{left}.{}({right})", op.name()),
        }
    }
}

impl Display for Terminal {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.name())?;
        if let Some(l) = self.lambda() {
            write!(f, "{l}")?;
        } else if let Some(a) = self.argument() {
            write!(f, "{a}")?;
        }
        f.write_char(')')
    }
}

impl Display for QueryTree {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match &self.terminal {
            Some(t) => write!(f, "{}.{t}", self.query),
            None => write!(f, "{}", self.query),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::BinaryOp;

    #[test]
    fn minimal_parentheses() {
        // (a + 10) * 2 keeps its parens, a + 10 == 5 needs none
        let sum = Expr::binary(BinaryOp::Add, Expr::var("o").member("OrderID"), Expr::constant(10i64));
        let product = Expr::binary(BinaryOp::Multiply, sum.clone(), Expr::constant(2i64));
        assert_eq!(product.to_string(), "(o.OrderID + 10) * 2");
        let cmp = sum.eq(Expr::constant(10258i64));
        assert_eq!(cmp.to_string(), "o.OrderID + 10 == 10258");
    }

    #[test]
    fn right_operand_of_same_precedence_is_wrapped() {
        let e = Expr::binary(
            BinaryOp::Subtract,
            Expr::var("a"),
            Expr::binary(BinaryOp::Subtract, Expr::var("b"), Expr::var("c")),
        );
        assert_eq!(e.to_string(), "a - (b - c)");
    }

    #[test]
    fn query_chain() {
        let q = Query::source("Customer")
            .filter(Lambda::new(
                "c",
                Expr::var("c").member("City").eq(Expr::captured("city", "London")),
            ))
            .take(Expr::constant(10i64));
        let tree = QueryTree::scalar(q, Terminal::Count { predicate: None, long: false });
        assert_eq!(
            tree.to_string(),
            r#"Customer.Where(c => c.City == $city).Take(10).Count()"#
        );
    }
}
