//! Compiled plans: what the executor hands to a transport.
//!
//! A plan is a template. It never holds parameter values; those come from
//! the normalized query of each invocation, so one plan serves every
//! structurally identical query.

use std::collections::HashMap;

use docql_core::expr::Lambda;
use docql_core::plan::{Finish, ResultShape};
use docql_core::sql::SelectExpr;
use docql_core::types::Scalar;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryPlan {
    /// Entity type the query was rooted at.
    pub entity: String,
    pub container: String,
    pub select: SelectExpr,
    /// `select` rendered once, at compile time.
    pub text: String,
    /// Placeholder names in order of first appearance in `text`.
    pub placeholders: Vec<String>,
    pub result_shape: ResultShape,
    /// Client-side selectors applied, in order, to each materialized row.
    pub residual: Vec<Lambda>,
    pub finish: Finish,
    /// Continuation-token paging was requested.
    pub paged: bool,
    /// The statement has an explicit ORDER BY.
    pub ordered: bool,
}

impl QueryPlan {
    /// Values for the statement's placeholders, in placeholder order.
    ///
    /// Bindings the statement never references (a captured value the
    /// compiler folded away, say) are left out; the store only ever sees
    /// parameters that appear in `text`.
    pub fn bind(&self, params: &HashMap<String, Scalar>) -> Vec<(String, Scalar)> {
        self.placeholders
            .iter()
            .filter_map(|name| params.get(name).map(|v| (name.clone(), v.clone())))
            .collect()
    }
}

/// A value known at compile time, or the name of a bound parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ValueSlot {
    Literal(Scalar),
    Parameter(String),
}

impl ValueSlot {
    pub fn resolve(&self, params: &HashMap<String, Scalar>) -> Option<Scalar> {
        match self {
            ValueSlot::Literal(s) => Some(s.clone()),
            ValueSlot::Parameter(p) => params.get(p).cloned(),
        }
    }
}

/// Direct fetch of one document by id (and partition key).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointReadPlan {
    pub entity: String,
    pub container: String,
    pub id: ValueSlot,
    pub partition_key: Option<ValueSlot>,
    /// Discriminator values a fetched document may carry; empty when the
    /// type is not discriminated.
    pub discriminators: Vec<String>,
    pub result_shape: ResultShape,
    pub finish: Finish,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CompiledPlan {
    Query(QueryPlan),
    PointRead(PointReadPlan),
}

impl CompiledPlan {
    pub fn is_point_read(&self) -> bool {
        matches!(self, CompiledPlan::PointRead(_))
    }

    /// Dialect text; `None` for point reads.
    pub fn text(&self) -> Option<&str> {
        match self {
            CompiledPlan::Query(q) => Some(&q.text),
            CompiledPlan::PointRead(_) => None,
        }
    }

    pub fn finish(&self) -> Finish {
        match self {
            CompiledPlan::Query(q) => q.finish,
            CompiledPlan::PointRead(p) => p.finish,
        }
    }

    /// The bindings this plan sends to the store, in the order it uses them.
    pub fn bind(&self, params: &HashMap<String, Scalar>) -> Vec<(String, Scalar)> {
        match self {
            CompiledPlan::Query(q) => q.bind(params),
            CompiledPlan::PointRead(p) => [Some(&p.id), p.partition_key.as_ref()]
                .into_iter()
                .flatten()
                .filter_map(|slot| match slot {
                    ValueSlot::Parameter(name) => params.get(name).map(|v| (name.clone(), v.clone())),
                    ValueSlot::Literal(_) => None,
                })
                .collect(),
        }
    }

    pub fn container(&self) -> &str {
        match self {
            CompiledPlan::Query(q) => &q.container,
            CompiledPlan::PointRead(p) => &p.container,
        }
    }

    /// The command as it is logged when sent to the store: bound parameters
    /// as `@name='value'` lines, a blank line, then the text; or
    /// `ReadItem(<partition key|None>, <id>)` for point reads.
    pub fn render_command(&self, params: &HashMap<String, Scalar>) -> String {
        match self {
            CompiledPlan::Query(q) => {
                let mut out = String::new();
                for name in &q.placeholders {
                    let value = params
                        .get(name)
                        .map(Scalar::to_log_string)
                        .unwrap_or_else(|| "?".to_string());
                    out.push_str(&format!("@{name}='{value}'\n"));
                }
                if !out.is_empty() {
                    out.push('\n');
                }
                out.push_str(&q.text);
                out
            }
            CompiledPlan::PointRead(p) => {
                let show = |slot: Option<&ValueSlot>| match slot.and_then(|s| s.resolve(params)) {
                    Some(v) if !v.is_null() => v.to_log_string(),
                    _ => "None".to_string(),
                };
                format!(
                    "ReadItem({}, {})",
                    show(p.partition_key.as_ref()),
                    show(Some(&p.id))
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docql_core::sql::{FromClause, SqlExpr};

    #[test]
    fn command_log_format() {
        let select = SelectExpr::new(SqlExpr::alias("c"), FromClause::Root { alias: "c".into() });
        let plan = CompiledPlan::Query(QueryPlan {
            entity: "Customer".into(),
            container: "Northwind".into(),
            text: "SELECT VALUE c\nFROM root c\nWHERE (c[\"City\"] = @__city_0)".into(),
            select,
            placeholders: vec!["__city_0".into()],
            result_shape: ResultShape::Entity {
                entity: "Customer".into(),
            },
            residual: Vec::new(),
            finish: Finish::Sequence,
            paged: false,
            ordered: false,
        });
        let params = HashMap::from([("__city_0".to_string(), Scalar::from("London"))]);
        assert_eq!(
            plan.render_command(&params),
            "@__city_0='London'\n\nSELECT VALUE c\nFROM root c\nWHERE (c[\"City\"] = @__city_0)"
        );
    }

    #[test]
    fn only_placeholders_are_bound() {
        let select = SelectExpr::new(SqlExpr::alias("c"), FromClause::Root { alias: "c".into() });
        let plan = QueryPlan {
            entity: "Customer".into(),
            container: "Northwind".into(),
            text: "SELECT VALUE c\nFROM root c\nWHERE ((c[\"City\"] = @__city_0) AND (c[\"id\"] != @__id_1))".into(),
            select,
            placeholders: vec!["__city_0".into(), "__id_1".into()],
            result_shape: ResultShape::Entity {
                entity: "Customer".into(),
            },
            residual: Vec::new(),
            finish: Finish::Sequence,
            paged: false,
            ordered: false,
        };
        let params = HashMap::from([
            ("__id_1".to_string(), Scalar::from("ALFKI")),
            ("__city_0".to_string(), Scalar::from("London")),
            ("__unused_2".to_string(), Scalar::from(7i64)),
        ]);
        assert_eq!(
            plan.bind(&params),
            vec![
                ("__city_0".to_string(), Scalar::from("London")),
                ("__id_1".to_string(), Scalar::from("ALFKI")),
            ]
        );
    }

    #[test]
    fn point_read_log_format() {
        let plan = CompiledPlan::PointRead(PointReadPlan {
            entity: "Customer".into(),
            container: "Northwind".into(),
            id: ValueSlot::Literal(Scalar::from("ALFKI")),
            partition_key: None,
            discriminators: vec!["Customer".into()],
            result_shape: ResultShape::Entity {
                entity: "Customer".into(),
            },
            finish: Finish::First { or_default: true },
        });
        assert_eq!(plan.render_command(&HashMap::new()), "ReadItem(None, ALFKI)");
        assert!(plan.text().is_none());
    }
}
