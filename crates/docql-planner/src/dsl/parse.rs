//! Method-chain query text to query trees.
//!
//! ```text
//! customers.Where(c => c.City == $city).OrderBy(c => c.CustomerID).Take(10)
//! orders.Where(o => o.OrderID + 10 == 10258).Count()
//! ```
//!
//! Identifiers naming an entity set (or entity type) of the model are root
//! sources; `$name` reads a captured value. The printed form of a tree
//! parses back to the same tree.

use std::collections::BTreeMap;

use docql_core::expr::{BinaryOp, Expr, Lambda, Query, QueryTree, SetOp, Terminal, UnaryOp};
use docql_core::model::Model;
use docql_core::types::Scalar;

use super::DslError;

type Result<T> = std::result::Result<T, DslError>;

/// Parse query text against `model`, reading `$name` captures from `captures`.
pub fn parse_query(text: &str, model: &Model, captures: &BTreeMap<String, Scalar>) -> Result<QueryTree> {
    let tokens = lex(text)?;
    let mut p = Parser {
        tokens,
        pos: 0,
        model,
        captures,
        scope: Vec::new(),
    };
    let term = p.expr(0)?;
    p.expect_end()?;
    match term {
        Term::Seq(q) => Ok(QueryTree::sequence(q)),
        Term::Expr(Expr::Subquery { query, terminal }) => Ok(QueryTree::scalar(*query, *terminal)),
        Term::Expr(e) => Err(DslError::Syntax {
            offset: 0,
            message: format!("'{e}' is not a query over an entity set"),
        }),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Ident(String),
    Int(i64),
    Float(f64),
    Str(String),
    Capture(String),
    Sym(&'static str),
    End,
}

const SYMBOLS: &[&str] = &[
    "=>", "==", "!=", "<=", ">=", "&&", "||", "??", "<<", ">>", ".", ",", "(", ")", "[", "]", "{", "}", "?",
    ":", "+", "-", "*", "/", "%", "<", ">", "!", "~", "&", "|", "^", "=",
];

fn lex(text: &str) -> Result<Vec<(Tok, usize)>> {
    let bytes = text.as_bytes();
    let mut out = Vec::new();
    let mut i = 0;
    'outer: while i < bytes.len() {
        let c = bytes[i] as char;
        if c.is_ascii_whitespace() {
            i += 1;
            continue;
        }
        let start = i;
        if c.is_ascii_alphabetic() || c == '_' || c == '$' {
            i += 1;
            while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                i += 1;
            }
            let word = &text[start..i];
            let tok = match word.strip_prefix('$') {
                Some("") => {
                    return Err(DslError::Syntax {
                        offset: start,
                        message: "expected a name after '$'".into(),
                    });
                }
                Some(name) => Tok::Capture(name.to_string()),
                None => Tok::Ident(word.to_string()),
            };
            out.push((tok, start));
            continue;
        }
        if c.is_ascii_digit() {
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            let is_float = i + 1 < bytes.len() && bytes[i] == b'.' && bytes[i + 1].is_ascii_digit();
            if is_float {
                i += 1;
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    i += 1;
                }
            }
            let lexeme = &text[start..i];
            let bad = || DslError::Syntax {
                offset: start,
                message: format!("invalid number '{lexeme}'"),
            };
            let tok = if is_float {
                Tok::Float(lexeme.parse().map_err(|_| bad())?)
            } else {
                Tok::Int(lexeme.parse().map_err(|_| bad())?)
            };
            out.push((tok, start));
            continue;
        }
        if c == '"' {
            i += 1;
            let mut s = String::new();
            while i < bytes.len() {
                match bytes[i] {
                    b'"' => {
                        i += 1;
                        out.push((Tok::Str(s), start));
                        continue 'outer;
                    }
                    b'\\' if i + 1 < bytes.len() => {
                        let escaped = match bytes[i + 1] {
                            b'n' => '\n',
                            b't' => '\t',
                            other => other as char,
                        };
                        s.push(escaped);
                        i += 2;
                    }
                    _ => {
                        let ch = text[i..].chars().next().unwrap_or('\u{fffd}');
                        s.push(ch);
                        i += ch.len_utf8();
                    }
                }
            }
            return Err(DslError::Syntax {
                offset: start,
                message: "unterminated string literal".into(),
            });
        }
        match SYMBOLS.iter().find(|s| text[i..].starts_with(**s)) {
            Some(sym) => {
                out.push((Tok::Sym(sym), start));
                i += sym.len();
            }
            None => {
                return Err(DslError::Syntax {
                    offset: start,
                    message: format!("unexpected character '{c}'"),
                });
            }
        }
    }
    out.push((Tok::End, text.len()));
    Ok(out)
}

/// A parsed operand: a value, or a sequence that has not been reduced.
enum Term {
    Expr(Expr),
    Seq(Query),
}

impl Term {
    fn into_expr(self) -> Expr {
        match self {
            Term::Expr(e) => e,
            Term::Seq(q) => Expr::Collection(Box::new(q)),
        }
    }

    fn into_query(self) -> Query {
        match self {
            Term::Seq(q) => q,
            Term::Expr(Expr::Collection(q)) => *q,
            Term::Expr(e) => Query::Embedded { source: Box::new(e) },
        }
    }
}

const SEQUENCE_OPS: &[&str] = &[
    "Where",
    "Select",
    "SelectMany",
    "OrderBy",
    "OrderByDescending",
    "ThenBy",
    "ThenByDescending",
    "Skip",
    "Take",
    "Distinct",
    "OfType",
    "GroupBy",
    "Join",
    "Union",
    "Concat",
    "Intersect",
    "Except",
    "AsPaged",
];

const TERMINALS: &[&str] = &[
    "Count",
    "LongCount",
    "Sum",
    "Min",
    "Max",
    "Average",
    "Any",
    "All",
    "First",
    "FirstOrDefault",
    "Single",
    "SingleOrDefault",
    "Last",
    "LastOrDefault",
    "Contains",
    "ElementAt",
    "ElementAtOrDefault",
];

struct Parser<'a> {
    tokens: Vec<(Tok, usize)>,
    pos: usize,
    model: &'a Model,
    captures: &'a BTreeMap<String, Scalar>,
    scope: Vec<String>,
}

impl Parser<'_> {
    fn peek(&self) -> &Tok {
        self.peek_at(0)
    }

    fn peek_at(&self, n: usize) -> &Tok {
        self.tokens
            .get(self.pos + n)
            .map(|(t, _)| t)
            .unwrap_or(&Tok::End)
    }

    fn offset(&self) -> usize {
        self.tokens.get(self.pos).map(|(_, o)| *o).unwrap_or(0)
    }

    fn next(&mut self) -> Tok {
        let t = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        t
    }

    fn error<T>(&self, message: impl Into<String>) -> Result<T> {
        Err(DslError::Syntax {
            offset: self.offset(),
            message: message.into(),
        })
    }

    fn at(&self, sym: &str) -> bool {
        matches!(self.peek(), Tok::Sym(s) if *s == sym)
    }

    fn eat(&mut self, sym: &str) -> bool {
        if self.at(sym) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, sym: &str) -> Result<()> {
        if self.eat(sym) {
            Ok(())
        } else {
            self.error(format!("expected '{sym}'"))
        }
    }

    fn expect_end(&mut self) -> Result<()> {
        match self.peek() {
            Tok::End => Ok(()),
            _ => self.error("unexpected trailing input"),
        }
    }

    fn ident(&mut self) -> Result<String> {
        match self.next() {
            Tok::Ident(name) => Ok(name),
            _ => {
                self.pos = self.pos.saturating_sub(1);
                self.error("expected a name")
            }
        }
    }

    fn binary_op(&self) -> Option<BinaryOp> {
        let Tok::Sym(s) = self.peek() else {
            return None;
        };
        Some(match *s {
            "||" => BinaryOp::OrElse,
            "&&" => BinaryOp::AndAlso,
            "|" => BinaryOp::Or,
            "^" => BinaryOp::ExclusiveOr,
            "&" => BinaryOp::And,
            "==" => BinaryOp::Equal,
            "!=" => BinaryOp::NotEqual,
            "<" => BinaryOp::LessThan,
            "<=" => BinaryOp::LessThanOrEqual,
            ">" => BinaryOp::GreaterThan,
            ">=" => BinaryOp::GreaterThanOrEqual,
            "<<" => BinaryOp::LeftShift,
            ">>" => BinaryOp::RightShift,
            "+" => BinaryOp::Add,
            "-" => BinaryOp::Subtract,
            "*" => BinaryOp::Multiply,
            "/" => BinaryOp::Divide,
            "%" => BinaryOp::Modulo,
            _ => return None,
        })
    }

    /// Precedence climbing; binding powers match the printer's.
    fn expr(&mut self, min: u8) -> Result<Term> {
        let mut lhs = self.unary()?;
        loop {
            if self.at("?") && min <= 1 {
                self.pos += 1;
                let if_true = self.expr(0)?.into_expr();
                self.expect(":")?;
                let if_false = self.expr(1)?.into_expr();
                lhs = Term::Expr(Expr::Conditional {
                    test: Box::new(lhs.into_expr()),
                    if_true: Box::new(if_true),
                    if_false: Box::new(if_false),
                });
                continue;
            }
            if self.at("??") && min <= 2 {
                self.pos += 1;
                let right = self.expr(2)?.into_expr();
                lhs = Term::Expr(Expr::Coalesce {
                    left: Box::new(lhs.into_expr()),
                    right: Box::new(right),
                });
                continue;
            }
            let Some(op) = self.binary_op() else { break };
            let bp = op.precedence() + 2;
            if bp < min {
                break;
            }
            self.pos += 1;
            let rhs = self.expr(bp + 1)?.into_expr();
            lhs = Term::Expr(Expr::binary(op, lhs.into_expr(), rhs));
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Term> {
        let op = if self.eat("!") {
            UnaryOp::Not
        } else if self.eat("-") {
            match self.peek().clone() {
                Tok::Int(i) => {
                    self.pos += 1;
                    return self.postfix(Term::Expr(Expr::constant(-i)));
                }
                Tok::Float(x) => {
                    self.pos += 1;
                    return self.postfix(Term::Expr(Expr::constant(-x)));
                }
                _ => UnaryOp::Negate,
            }
        } else if self.eat("~") {
            UnaryOp::BitwiseNot
        } else {
            let primary = self.primary()?;
            return self.postfix(primary);
        };
        let operand = self.unary()?.into_expr();
        Ok(Term::Expr(Expr::Unary {
            op,
            operand: Box::new(operand),
        }))
    }

    fn primary(&mut self) -> Result<Term> {
        let offset = self.offset();
        match self.next() {
            Tok::Int(i) => Ok(Term::Expr(Expr::constant(i))),
            Tok::Float(x) => Ok(Term::Expr(Expr::constant(x))),
            Tok::Str(s) => Ok(Term::Expr(Expr::constant(s))),
            Tok::Capture(name) => match self.captures.get(&name) {
                Some(v) => Ok(Term::Expr(Expr::captured(name, v.clone()))),
                None => Err(DslError::MissingCapture { name }),
            },
            Tok::Sym("(") => {
                let inner = self.expr(0)?;
                self.expect(")")?;
                Ok(inner)
            }
            Tok::Sym("[") => {
                let mut items = Vec::new();
                if !self.at("]") {
                    loop {
                        items.push(self.expr(0)?.into_expr());
                        if !self.eat(",") {
                            break;
                        }
                    }
                }
                self.expect("]")?;
                Ok(Term::Expr(Expr::Array(items)))
            }
            Tok::Ident(word) => self.word(word),
            Tok::End => Err(DslError::Syntax {
                offset,
                message: "unexpected end of query".into(),
            }),
            Tok::Sym(s) => Err(DslError::Syntax {
                offset,
                message: format!("unexpected '{s}'"),
            }),
        }
    }

    fn word(&mut self, word: String) -> Result<Term> {
        match word.as_str() {
            "true" => return Ok(Term::Expr(Expr::constant(true))),
            "false" => return Ok(Term::Expr(Expr::constant(false))),
            "null" => return Ok(Term::Expr(Expr::Constant(Scalar::Null))),
            "new" => return self.new_object(),
            _ => {}
        }
        if self.scope.iter().any(|v| *v == word) {
            return Ok(Term::Expr(Expr::Var(word)));
        }
        if let Some(e) = self.model.entity_by_set(&word).or_else(|| self.model.entity(&word)) {
            return Ok(Term::Seq(Query::source(e.name.clone())));
        }
        // `Type.Member` or `Type.Method(args)`
        if self.at(".") {
            if let Tok::Ident(member) = self.peek_at(1).clone() {
                self.pos += 2;
                let args = if self.at("(") { self.call_args()? } else { Vec::new() };
                return Ok(Term::Expr(Expr::Call {
                    receiver: None,
                    method: format!("{word}.{member}"),
                    args,
                }));
            }
        }
        self.error(format!("unknown name '{word}'"))
    }

    fn new_object(&mut self) -> Result<Term> {
        self.expect("{")?;
        let mut members = Vec::new();
        if !self.at("}") {
            loop {
                let named = matches!(self.peek(), Tok::Ident(_)) && matches!(self.peek_at(1), Tok::Sym("="));
                if named {
                    let name = self.ident()?;
                    self.expect("=")?;
                    members.push((name, self.expr(0)?.into_expr()));
                } else {
                    let value = self.expr(0)?.into_expr();
                    let Expr::Member { member, .. } = &value else {
                        return self.error("anonymous members need a name");
                    };
                    members.push((member.clone(), value));
                }
                if !self.eat(",") {
                    break;
                }
            }
        }
        self.expect("}")?;
        Ok(Term::Expr(Expr::New { members }))
    }

    fn call_args(&mut self) -> Result<Vec<Expr>> {
        self.expect("(")?;
        let mut args = Vec::new();
        if !self.at(")") {
            loop {
                args.push(self.expr(0)?.into_expr());
                if !self.eat(",") {
                    break;
                }
            }
        }
        self.expect(")")?;
        Ok(args)
    }

    fn postfix(&mut self, mut term: Term) -> Result<Term> {
        loop {
            if self.eat(".") {
                let name = self.ident()?;
                term = if self.at("(") {
                    self.method(term, name)?
                } else {
                    match term {
                        Term::Expr(e) => Term::Expr(e.member(name)),
                        Term::Seq(q) => return self.error(format!("'{q}' has no member '{name}'")),
                    }
                };
            } else if self.eat("[") {
                let index = self.expr(0)?.into_expr();
                self.expect("]")?;
                term = Term::Expr(Expr::Index {
                    target: Box::new(term.into_expr()),
                    index: Box::new(index),
                });
            } else {
                return Ok(term);
            }
        }
    }

    fn is_lambda_ahead(&self) -> bool {
        match self.peek() {
            Tok::Ident(_) => matches!(self.peek_at(1), Tok::Sym("=>")),
            Tok::Sym("(") => {
                let mut n = 1;
                loop {
                    if !matches!(self.peek_at(n), Tok::Ident(_)) {
                        return false;
                    }
                    match self.peek_at(n + 1) {
                        Tok::Sym(",") => n += 2,
                        Tok::Sym(")") => return matches!(self.peek_at(n + 2), Tok::Sym("=>")),
                        _ => return false,
                    }
                }
            }
            _ => false,
        }
    }

    fn lambda(&mut self) -> Result<Lambda> {
        if !self.is_lambda_ahead() {
            return self.error("expected a lambda");
        }
        let mut params = Vec::new();
        if self.eat("(") {
            loop {
                params.push(self.ident()?);
                if !self.eat(",") {
                    break;
                }
            }
            self.expect(")")?;
        } else {
            params.push(self.ident()?);
        }
        self.expect("=>")?;
        let mark = self.scope.len();
        self.scope.extend(params.iter().cloned());
        let body = self.expr(0);
        self.scope.truncate(mark);
        Ok(Lambda::with_params(params, body?.into_expr()))
    }

    fn optional_lambda(&mut self) -> Result<Option<Lambda>> {
        if self.at(")") {
            Ok(None)
        } else {
            self.lambda().map(Some)
        }
    }

    fn method(&mut self, receiver: Term, name: String) -> Result<Term> {
        let sequence_call = matches!(receiver, Term::Seq(_))
            || SEQUENCE_OPS.contains(&name.as_str())
            || (TERMINALS.contains(&name.as_str()) && name != "Contains");
        if !sequence_call {
            let args = self.call_args()?;
            return Ok(Term::Expr(Expr::Call {
                receiver: Some(Box::new(receiver.into_expr())),
                method: name,
                args,
            }));
        }
        let input = receiver.into_query();
        self.expect("(")?;
        let term = self.sequence_call(input, &name)?;
        self.expect(")")?;
        Ok(term)
    }

    fn sequence_call(&mut self, input: Query, name: &str) -> Result<Term> {
        let boxed = Box::new(input);
        let seq = |q: Query| -> Result<Term> { Ok(Term::Seq(q)) };
        let reduce = |query: Box<Query>, terminal: Terminal| -> Result<Term> {
            Ok(Term::Expr(Expr::Subquery {
                query,
                terminal: Box::new(terminal),
            }))
        };
        match name {
            "Where" => seq(Query::Where {
                input: boxed,
                predicate: self.lambda()?,
            }),
            "Select" => seq(Query::Select {
                input: boxed,
                selector: self.lambda()?,
            }),
            "SelectMany" => seq(Query::SelectMany {
                input: boxed,
                collection: self.lambda()?,
            }),
            "OrderBy" | "OrderByDescending" => seq(Query::OrderBy {
                input: boxed,
                key: self.lambda()?,
                descending: name.ends_with("Descending"),
            }),
            "ThenBy" | "ThenByDescending" => seq(Query::ThenBy {
                input: boxed,
                key: self.lambda()?,
                descending: name.ends_with("Descending"),
            }),
            "Skip" => seq(Query::Skip {
                input: boxed,
                count: Box::new(self.expr(0)?.into_expr()),
            }),
            "Take" => seq(Query::Take {
                input: boxed,
                count: Box::new(self.expr(0)?.into_expr()),
            }),
            "Distinct" => seq(Query::Distinct { input: boxed }),
            "AsPaged" => seq(Query::Paginate { input: boxed }),
            "OfType" => {
                let ty = self.ident()?;
                let entity = self
                    .model
                    .entity(&ty)
                    .or_else(|| self.model.entity_by_set(&ty))
                    .map(|e| e.name.clone())
                    .unwrap_or(ty);
                seq(Query::OfType { input: boxed, entity })
            }
            "GroupBy" => seq(Query::GroupBy {
                input: boxed,
                key: self.lambda()?,
            }),
            "Join" => {
                let inner = self.expr(0)?.into_query();
                self.expect(",")?;
                let outer_key = self.lambda()?;
                self.expect(",")?;
                let inner_key = self.lambda()?;
                self.expect(",")?;
                let result = self.lambda()?;
                seq(Query::Join {
                    outer: boxed,
                    inner: Box::new(inner),
                    outer_key,
                    inner_key,
                    result,
                })
            }
            "Union" | "Concat" | "Intersect" | "Except" => {
                let op = match name {
                    "Union" => SetOp::Union,
                    "Concat" => SetOp::Concat,
                    "Intersect" => SetOp::Intersect,
                    _ => SetOp::Except,
                };
                let right = self.expr(0)?.into_query();
                seq(Query::SetOp {
                    op,
                    left: boxed,
                    right: Box::new(right),
                })
            }
            "Count" | "LongCount" => reduce(
                boxed,
                Terminal::Count {
                    predicate: self.optional_lambda()?,
                    long: name == "LongCount",
                },
            ),
            "Sum" => reduce(boxed, Terminal::Sum { selector: self.optional_lambda()? }),
            "Min" => reduce(boxed, Terminal::Min { selector: self.optional_lambda()? }),
            "Max" => reduce(boxed, Terminal::Max { selector: self.optional_lambda()? }),
            "Average" => reduce(boxed, Terminal::Average { selector: self.optional_lambda()? }),
            "Any" => reduce(boxed, Terminal::Any { predicate: self.optional_lambda()? }),
            "All" => reduce(boxed, Terminal::All { predicate: self.lambda()? }),
            "Contains" => reduce(
                boxed,
                Terminal::Contains {
                    item: Box::new(self.expr(0)?.into_expr()),
                },
            ),
            "First" | "FirstOrDefault" => reduce(
                boxed,
                Terminal::First {
                    predicate: self.optional_lambda()?,
                    or_default: name.ends_with("OrDefault"),
                },
            ),
            "Single" | "SingleOrDefault" => reduce(
                boxed,
                Terminal::Single {
                    predicate: self.optional_lambda()?,
                    or_default: name.ends_with("OrDefault"),
                },
            ),
            "Last" | "LastOrDefault" => reduce(
                boxed,
                Terminal::Last {
                    predicate: self.optional_lambda()?,
                    or_default: name.ends_with("OrDefault"),
                },
            ),
            "ElementAt" | "ElementAtOrDefault" => reduce(
                boxed,
                Terminal::ElementAt {
                    index: Box::new(self.expr(0)?.into_expr()),
                    or_default: name.ends_with("OrDefault"),
                },
            ),
            other => self.error(format!("'{other}' is not a sequence operator")),
        }
    }
}
