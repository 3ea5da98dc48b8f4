//! Expression normalization.
//!
//! Runs once per invocation, before the compiled-query cache is consulted:
//! - terminal lambdas move into the chain (`Count(p)` becomes
//!   `Where(p).Count()`, `Sum(s)` becomes `Select(s).Sum()`)
//! - evaluatable subtrees (no lambda variable, no root set, only
//!   client-known calls) are computed; those built from captured values
//!   become named parameters, purely constant ones fold to literals
//! - constant Skip/Take counts become parameters when configured
//! - double negation, constant short circuits, constant conditionals and
//!   tautological null checks collapse; `??` becomes a conditional
//!
//! The structural signature hashes the rewritten tree plus parameter
//! types, never parameter values.

use std::collections::HashMap;

use docql_core::config::EngineConfig;
use docql_core::expr::{walk_expr, BinaryOp, Expr, Lambda, Node, Query, QueryTree, Terminal, UnaryOp};
use docql_core::hash::{Hash256, SignatureHasher};
use docql_core::schema::DataType;
use docql_core::types::Scalar;
use docql_operators::functions::{is_client_method, is_store_only};
use docql_operators::{eval_closed, ClientFunctions, EvalContext, EvalError};

use crate::error::Result;

/// A query tree ready for compilation, with its parameter bindings.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedQuery {
    pub tree: QueryTree,
    /// Bound values, in order of creation.
    pub parameters: Vec<(String, Scalar)>,
    pub signature: Hash256,
}

impl NormalizedQuery {
    pub fn parameter_map(&self) -> HashMap<String, Scalar> {
        self.parameters.iter().cloned().collect()
    }

    pub fn parameter_types(&self) -> HashMap<String, DataType> {
        self.parameters
            .iter()
            .map(|(n, v)| (n.clone(), v.data_type()))
            .collect()
    }
}

pub fn normalize(
    tree: &QueryTree,
    functions: &ClientFunctions,
    config: &EngineConfig,
) -> Result<NormalizedQuery> {
    let mut n = Normalizer {
        functions,
        parameterize_paging: config.parameterize_paging,
        parameters: Vec::new(),
        seen: Vec::new(),
    };
    let (query, terminal) = match &tree.terminal {
        Some(t) => {
            let (q, t) = split_terminal(tree.query.clone(), t.clone());
            (q, Some(t))
        }
        None => (tree.query.clone(), None),
    };
    let query = n.query(query)?;
    let terminal = match terminal {
        Some(t) => Some(n.terminal(t)?),
        None => None,
    };
    let tree = QueryTree { query, terminal };

    let types: Vec<(&str, String)> = n
        .parameters
        .iter()
        .map(|(name, v)| (name.as_str(), v.data_type().to_string()))
        .collect();
    let mut hasher = SignatureHasher::new("docql.query.v1");
    hasher.part("tree", &tree)?.part("parameters", &types)?;
    let signature = hasher.finish();

    #[cfg(feature = "tracing")]
    tracing::trace!(
        signature = %signature.short_hex(),
        parameters = n.parameters.len(),
        "normalized query"
    );

    Ok(NormalizedQuery {
        tree,
        parameters: n.parameters,
        signature,
    })
}

/// Move a terminal's lambda into the sequence it reduces.
pub fn split_terminal(query: Query, terminal: Terminal) -> (Query, Terminal) {
    match terminal {
        Terminal::Count {
            predicate: Some(p),
            long,
        } => (query.filter(p), Terminal::Count { predicate: None, long }),
        Terminal::Any { predicate: Some(p) } => (query.filter(p), Terminal::Any { predicate: None }),
        Terminal::First {
            predicate: Some(p),
            or_default,
        } => (
            query.filter(p),
            Terminal::First {
                predicate: None,
                or_default,
            },
        ),
        Terminal::Single {
            predicate: Some(p),
            or_default,
        } => (
            query.filter(p),
            Terminal::Single {
                predicate: None,
                or_default,
            },
        ),
        Terminal::Last {
            predicate: Some(p),
            or_default,
        } => (
            query.filter(p),
            Terminal::Last {
                predicate: None,
                or_default,
            },
        ),
        Terminal::Sum { selector: Some(s) } => (query.select(s), Terminal::Sum { selector: None }),
        Terminal::Min { selector: Some(s) } => (query.select(s), Terminal::Min { selector: None }),
        Terminal::Max { selector: Some(s) } => (query.select(s), Terminal::Max { selector: None }),
        Terminal::Average { selector: Some(s) } => {
            (query.select(s), Terminal::Average { selector: None })
        }
        other => (query, other),
    }
}

struct Normalizer<'a> {
    functions: &'a ClientFunctions,
    parameterize_paging: bool,
    parameters: Vec<(String, Scalar)>,
    /// Already-parameterized subtrees, reused when they occur again.
    seen: Vec<(Expr, String)>,
}

impl Normalizer<'_> {
    fn query(&mut self, q: Query) -> std::result::Result<Query, EvalError> {
        Ok(match q {
            Query::Source { .. } => q,
            Query::Embedded { source } => Query::Embedded {
                source: Box::new(self.expr(*source)?),
            },
            Query::Where { input, predicate } => {
                let input = self.query(*input)?;
                let predicate = self.lambda(predicate)?;
                if predicate.body.as_bool_constant() == Some(true) {
                    input
                } else {
                    Query::Where {
                        input: Box::new(input),
                        predicate,
                    }
                }
            }
            Query::Select { input, selector } => Query::Select {
                input: Box::new(self.query(*input)?),
                selector: self.lambda(selector)?,
            },
            Query::SelectMany { input, collection } => Query::SelectMany {
                input: Box::new(self.query(*input)?),
                collection: self.lambda(collection)?,
            },
            Query::OrderBy {
                input,
                key,
                descending,
            } => Query::OrderBy {
                input: Box::new(self.query(*input)?),
                key: self.lambda(key)?,
                descending,
            },
            Query::ThenBy {
                input,
                key,
                descending,
            } => Query::ThenBy {
                input: Box::new(self.query(*input)?),
                key: self.lambda(key)?,
                descending,
            },
            Query::Skip { input, count } => Query::Skip {
                input: Box::new(self.query(*input)?),
                count: Box::new(self.paging_count(*count)?),
            },
            Query::Take { input, count } => Query::Take {
                input: Box::new(self.query(*input)?),
                count: Box::new(self.paging_count(*count)?),
            },
            Query::Distinct { input } => Query::Distinct {
                input: Box::new(self.query(*input)?),
            },
            Query::OfType { input, entity } => Query::OfType {
                input: Box::new(self.query(*input)?),
                entity,
            },
            Query::GroupBy { input, key } => Query::GroupBy {
                input: Box::new(self.query(*input)?),
                key: self.lambda(key)?,
            },
            Query::Join {
                outer,
                inner,
                outer_key,
                inner_key,
                result,
            } => Query::Join {
                outer: Box::new(self.query(*outer)?),
                inner: Box::new(self.query(*inner)?),
                outer_key: self.lambda(outer_key)?,
                inner_key: self.lambda(inner_key)?,
                result: self.lambda(result)?,
            },
            Query::SetOp { op, left, right } => Query::SetOp {
                op,
                left: Box::new(self.query(*left)?),
                right: Box::new(self.query(*right)?),
            },
            Query::Paginate { input } => Query::Paginate {
                input: Box::new(self.query(*input)?),
            },
        })
    }

    fn terminal(&mut self, t: Terminal) -> std::result::Result<Terminal, EvalError> {
        Ok(match t {
            Terminal::All { predicate } => Terminal::All {
                predicate: self.lambda(predicate)?,
            },
            Terminal::Contains { item } => Terminal::Contains {
                item: Box::new(self.expr(*item)?),
            },
            Terminal::ElementAt { index, or_default } => Terminal::ElementAt {
                index: Box::new(self.expr(*index)?),
                or_default,
            },
            // Remaining lambdas were moved into the chain by `split_terminal`.
            other => other,
        })
    }

    fn lambda(&mut self, l: Lambda) -> std::result::Result<Lambda, EvalError> {
        Ok(Lambda {
            params: l.params,
            body: Box::new(self.expr(*l.body)?),
        })
    }

    fn paging_count(&mut self, e: Expr) -> std::result::Result<Expr, EvalError> {
        match e {
            Expr::Constant(v) if self.parameterize_paging => Ok(self.bind("p".into(), v, None)),
            other => self.expr(other),
        }
    }

    fn expr(&mut self, e: Expr) -> std::result::Result<Expr, EvalError> {
        if self.is_evaluatable(&e) {
            return self.evaluate(e);
        }
        let e = match e {
            Expr::Constant(_) | Expr::Captured { .. } | Expr::Parameter { .. } | Expr::Var(_) => e,
            Expr::Member { target, member } => Expr::Member {
                target: Box::new(self.expr(*target)?),
                member,
            },
            Expr::Index { target, index } => Expr::Index {
                target: Box::new(self.expr(*target)?),
                index: Box::new(self.expr(*index)?),
            },
            Expr::Unary { op, operand } => Expr::Unary {
                op,
                operand: Box::new(self.expr(*operand)?),
            },
            Expr::Binary { op, left, right } => Expr::Binary {
                op,
                left: Box::new(self.expr(*left)?),
                right: Box::new(self.expr(*right)?),
            },
            Expr::Conditional {
                test,
                if_true,
                if_false,
            } => Expr::Conditional {
                test: Box::new(self.expr(*test)?),
                if_true: Box::new(self.expr(*if_true)?),
                if_false: Box::new(self.expr(*if_false)?),
            },
            Expr::Coalesce { left, right } => Expr::Coalesce {
                left: Box::new(self.expr(*left)?),
                right: Box::new(self.expr(*right)?),
            },
            Expr::Call {
                receiver,
                method,
                args,
            } => {
                let receiver = match receiver {
                    Some(r) => Some(Box::new(self.expr(*r)?)),
                    None => None,
                };
                let mut out = Vec::with_capacity(args.len());
                for a in args {
                    out.push(self.expr(a)?);
                }
                Expr::Call {
                    receiver,
                    method,
                    args: out,
                }
            }
            Expr::New { members } => {
                let mut out = Vec::with_capacity(members.len());
                for (name, m) in members {
                    out.push((name, self.expr(m)?));
                }
                Expr::New { members: out }
            }
            Expr::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for i in items {
                    out.push(self.expr(i)?);
                }
                Expr::Array(out)
            }
            Expr::Subquery { query, terminal } => {
                let (query, terminal) = split_terminal(*query, *terminal);
                Expr::Subquery {
                    query: Box::new(self.query(query)?),
                    terminal: Box::new(self.terminal(terminal)?),
                }
            }
            Expr::Collection(query) => Expr::Collection(Box::new(self.query(*query)?)),
        };
        Ok(simplify(e))
    }

    /// Closed, client-computable, and not already a leaf.
    fn is_evaluatable(&self, e: &Expr) -> bool {
        if matches!(e, Expr::Constant(_) | Expr::Parameter { .. } | Expr::Var(_)) {
            return false;
        }
        if !e.free_vars().is_empty() || e.contains_source() {
            return false;
        }
        let mut ok = true;
        walk_expr(e, &mut |n| match n {
            Node::Expr(Expr::Parameter { .. }) => ok = false,
            Node::Expr(Expr::Call {
                receiver, method, ..
            }) => {
                let known = self.functions.contains(method)
                    || (!is_store_only(method) && is_client_method(method, receiver.is_some()));
                if !known {
                    ok = false;
                }
            }
            _ => {}
        });
        ok
    }

    fn evaluate(&mut self, e: Expr) -> std::result::Result<Expr, EvalError> {
        if let Some((_, name)) = self.seen.iter().find(|(seen, _)| *seen == e) {
            return Ok(Expr::Parameter { name: name.clone() });
        }
        let params = HashMap::new();
        let ctx = EvalContext {
            params: &params,
            functions: self.functions,
        };
        let value = Scalar::from_json(&eval_closed(&e, ctx)?);
        if !has_captured(&e) {
            return Ok(Expr::Constant(value));
        }
        let hint = parameter_hint(&e).unwrap_or_else(|| "p".to_string());
        Ok(self.bind(hint, value, Some(e)))
    }

    fn bind(&mut self, hint: String, value: Scalar, source: Option<Expr>) -> Expr {
        let name = format!("__{hint}_{}", self.parameters.len());
        self.parameters.push((name.clone(), value));
        if let Some(e) = source {
            self.seen.push((e, name.clone()));
        }
        Expr::Parameter { name }
    }
}

fn has_captured(e: &Expr) -> bool {
    let mut found = false;
    walk_expr(e, &mut |n| {
        if let Node::Expr(Expr::Captured { .. }) = n {
            found = true;
        }
    });
    found
}

/// `$city` names its parameter `city`; `$order.Customer` names it `order_Customer`.
fn parameter_hint(e: &Expr) -> Option<String> {
    match e {
        Expr::Captured { name, .. } => Some(name.clone()),
        Expr::Member { target, member } => Some(match parameter_hint(target) {
            Some(t) => format!("{t}_{member}"),
            None => member.clone(),
        }),
        _ => None,
    }
}

fn is_never_null(e: &Expr) -> bool {
    matches!(e, Expr::New { .. } | Expr::Array(_))
        || matches!(e, Expr::Constant(s) if !s.is_null())
}

/// Local rewrites over an expression whose children are already simplified.
pub fn simplify(e: Expr) -> Expr {
    match e {
        Expr::Unary {
            op: UnaryOp::Not,
            operand,
        } => match *operand {
            Expr::Unary {
                op: UnaryOp::Not,
                operand: inner,
            } => *inner,
            Expr::Constant(Scalar::Bool(b)) => Expr::Constant(Scalar::Bool(!b)),
            other => other.not(),
        },
        Expr::Binary { op, left, right } => match (op, left.as_bool_constant(), right.as_bool_constant()) {
            (BinaryOp::AndAlso, Some(true), _) => *right,
            (BinaryOp::AndAlso, _, Some(true)) => *left,
            (BinaryOp::AndAlso, Some(false), _) | (BinaryOp::AndAlso, _, Some(false)) => {
                Expr::constant(false)
            }
            (BinaryOp::OrElse, Some(false), _) => *right,
            (BinaryOp::OrElse, _, Some(false)) => *left,
            (BinaryOp::OrElse, Some(true), _) | (BinaryOp::OrElse, _, Some(true)) => {
                Expr::constant(true)
            }
            (BinaryOp::Equal | BinaryOp::NotEqual, _, _)
                if (is_never_null(&left) && right.as_constant().is_some_and(Scalar::is_null))
                    || (is_never_null(&right) && left.as_constant().is_some_and(Scalar::is_null)) =>
            {
                Expr::constant(op == BinaryOp::NotEqual)
            }
            _ => Expr::Binary { op, left, right },
        },
        Expr::Conditional {
            test,
            if_true,
            if_false,
        } => match (test.as_bool_constant(), if_true.as_bool_constant(), if_false.as_bool_constant()) {
            (Some(true), _, _) => *if_true,
            (Some(false), _, _) => *if_false,
            (None, Some(true), Some(false)) => *test,
            (None, Some(false), Some(true)) => simplify((*test).not()),
            _ if if_true == if_false => *if_true,
            _ => Expr::Conditional {
                test,
                if_true,
                if_false,
            },
        },
        Expr::Coalesce { left, right } => match left.as_constant() {
            Some(s) if s.is_null() => *right,
            Some(_) => *left,
            None => {
                let test = Expr::binary(BinaryOp::NotEqual, (*left).clone(), Expr::Constant(Scalar::Null));
                Expr::Conditional {
                    test: Box::new(test),
                    if_true: left,
                    if_false: right,
                }
            }
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn city_filter(var: &str, city: &str) -> Lambda {
        Lambda::new(
            "c",
            Expr::var("c").member("City").eq(Expr::captured(var, city)),
        )
    }

    fn run(tree: &QueryTree) -> NormalizedQuery {
        normalize(tree, &ClientFunctions::new(), &EngineConfig::default()).unwrap()
    }

    #[test]
    fn captured_values_become_named_parameters() {
        let tree = QueryTree::sequence(Query::source("Customer").filter(city_filter("city", "London")));
        let n = run(&tree);
        assert_eq!(n.parameters, vec![("__city_0".to_string(), Scalar::from("London"))]);
        assert_eq!(
            n.tree.to_string(),
            "Customer.Where(c => c.City == @__city_0)"
        );
    }

    #[test]
    fn repeated_capture_reuses_its_parameter() {
        let l = Lambda::new(
            "c",
            Expr::binary(
                BinaryOp::OrElse,
                Expr::var("c").member("City").eq(Expr::captured("city", "London")),
                Expr::var("c").member("Region").eq(Expr::captured("city", "London")),
            ),
        );
        let n = run(&QueryTree::sequence(Query::source("Customer").filter(l)));
        assert_eq!(n.parameters.len(), 1);
        assert_eq!(
            n.tree.to_string(),
            "Customer.Where(c => c.City == @__city_0 || c.Region == @__city_0)"
        );
    }

    #[test]
    fn paging_counts_are_parameterized() {
        let q = Query::source("Customer").take(Expr::constant(10i64));
        let n = run(&QueryTree::sequence(q.clone()));
        assert_eq!(n.parameters, vec![("__p_0".to_string(), Scalar::Int(10))]);

        let cfg = EngineConfig {
            parameterize_paging: false,
            ..EngineConfig::default()
        };
        let n = normalize(&QueryTree::sequence(q), &ClientFunctions::new(), &cfg).unwrap();
        assert!(n.parameters.is_empty());
        assert_eq!(n.tree.to_string(), "Customer.Take(10)");
    }

    #[test]
    fn signature_ignores_values_but_not_constants() {
        let a = run(&QueryTree::sequence(Query::source("Customer").filter(city_filter("city", "London"))));
        let b = run(&QueryTree::sequence(Query::source("Customer").filter(city_filter("city", "Berlin"))));
        assert_eq!(a.signature, b.signature);

        let inline = |city: &str| {
            QueryTree::sequence(Query::source("Customer").filter(Lambda::new(
                "c",
                Expr::var("c").member("City").eq(Expr::constant(city)),
            )))
        };
        assert_ne!(run(&inline("London")).signature, run(&inline("Berlin")).signature);
    }

    #[test]
    fn collapses_negation_and_constant_logic() {
        let body = Expr::binary(
            BinaryOp::AndAlso,
            Expr::var("c").member("Active").eq(Expr::constant(true)).not().not(),
            Expr::binary(BinaryOp::OrElse, Expr::constant(1i64).eq(Expr::constant(1i64)), Expr::var("c").member("X")),
        );
        let n = run(&QueryTree::sequence(Query::source("Customer").filter(Lambda::new("c", body))));
        assert_eq!(n.tree.to_string(), "Customer.Where(c => c.Active == true)");
    }

    #[test]
    fn tautological_filters_disappear() {
        let body = Expr::binary(BinaryOp::NotEqual, Expr::New { members: vec![] }, Expr::Constant(Scalar::Null));
        let n = run(&QueryTree::sequence(Query::source("Customer").filter(Lambda::new("c", body))));
        assert_eq!(n.tree.query, Query::source("Customer"));
    }

    #[test]
    fn coalesce_becomes_conditional() {
        let sel = Lambda::new(
            "c",
            Expr::Coalesce {
                left: Box::new(Expr::var("c").member("Region")),
                right: Box::new(Expr::constant("n/a")),
            },
        );
        let n = run(&QueryTree::sequence(Query::source("Customer").select(sel)));
        assert_eq!(
            n.tree.to_string(),
            r#"Customer.Select(c => c.Region != null ? c.Region : "n/a")"#
        );
    }

    #[test]
    fn terminal_lambdas_move_into_the_chain() {
        let tree = QueryTree::scalar(
            Query::source("Order"),
            Terminal::Count {
                predicate: Some(Lambda::new("o", Expr::var("o").member("Shipped"))),
                long: false,
            },
        );
        let n = run(&tree);
        assert_eq!(n.tree.to_string(), "Order.Where(o => o.Shipped).Count()");
    }

    #[test]
    fn constant_subtrees_fold() {
        let body = Expr::var("o").member("OrderID").eq(Expr::binary(
            BinaryOp::Add,
            Expr::constant(10000i64),
            Expr::constant(258i64),
        ));
        let n = run(&QueryTree::sequence(Query::source("Order").filter(Lambda::new("o", body))));
        assert_eq!(n.tree.to_string(), "Order.Where(o => o.OrderID == 10258)");
        assert!(n.parameters.is_empty());
    }

    #[test]
    fn evaluation_failures_propagate_unchanged() {
        let body = Expr::var("o").member("OrderID").eq(Expr::binary(
            BinaryOp::Divide,
            Expr::captured("n", 1i64),
            Expr::constant(0i64),
        ));
        let tree = QueryTree::sequence(Query::source("Order").filter(Lambda::new("o", body)));
        let err = normalize(&tree, &ClientFunctions::new(), &EngineConfig::default()).unwrap_err();
        assert!(matches!(err, crate::error::PlanError::Eval(EvalError::DivideByZero)));
    }

    #[test]
    fn store_only_calls_stay_in_the_tree() {
        let now = Expr::Call {
            receiver: None,
            method: "DateTime.UtcNow".into(),
            args: vec![],
        };
        let body = Expr::binary(BinaryOp::LessThan, Expr::var("o").member("OrderDate"), now);
        let n = run(&QueryTree::sequence(Query::source("Order").filter(Lambda::new("o", body))));
        assert_eq!(n.tree.to_string(), "Order.Where(o => o.OrderDate < DateTime.UtcNow())");
    }
}
