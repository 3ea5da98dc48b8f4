#![forbid(unsafe_code)]
//! docql-planner: from query trees to store commands.
//!
//! Stages, in the order `Planner::plan` runs them:
//!   * `normalize`: evaluate captured subtrees into parameters, simplify,
//!     and compute the structural signature used as the cache key
//!   * `resolve`: find the single root entity type and its discriminator
//!   * `classify`: decide what runs in the store and what runs client side
//!   * `point_read`: short-circuit key lookups into direct fetches
//!   * `compile`: build and render the dialect select statement
//!
//! Failures are raised here, before any store round trip, as the closed
//! `QueryError` taxonomy (see `report`).
//!
//! `dsl` parses method-chain query text and YAML models / case files.

pub mod classify;
pub mod compile;
pub mod dsl;
pub mod error;
pub mod normalize;
pub mod plan;
pub mod point_read;
pub mod report;
pub mod resolve;

use std::collections::BTreeMap;
use std::sync::Arc;

use docql_core::config::EngineConfig;
use docql_core::error::QueryError;
use docql_core::expr::QueryTree;
use docql_core::model::Model;
use docql_core::types::Scalar;
use docql_operators::ClientFunctions;

pub use dsl::DslError;
pub use error::{PlanError, Result};
pub use normalize::NormalizedQuery;
pub use plan::{CompiledPlan, PointReadPlan, QueryPlan, ValueSlot};
pub use report::Diagnostic;

/// The translation pipeline for one entity model.
#[derive(Clone)]
pub struct Planner {
    model: Arc<Model>,
    config: EngineConfig,
    functions: Arc<ClientFunctions>,
}

impl Planner {
    pub fn new(model: impl Into<Arc<Model>>, config: EngineConfig) -> Self {
        Self {
            model: model.into(),
            config,
            functions: Arc::new(ClientFunctions::default()),
        }
    }

    /// Register client-evaluated functions callable from queries.
    pub fn with_functions(mut self, functions: ClientFunctions) -> Self {
        self.functions = Arc::new(functions);
        self
    }

    pub fn model(&self) -> &Arc<Model> {
        &self.model
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn functions(&self) -> &ClientFunctions {
        &self.functions
    }

    /// Parse method-chain query text against this planner's model.
    pub fn parse(&self, text: &str, captures: &BTreeMap<String, Scalar>) -> std::result::Result<QueryTree, DslError> {
        dsl::parse_query(text, &self.model, captures)
    }

    pub fn normalize(&self, tree: &QueryTree) -> Result<NormalizedQuery> {
        normalize::normalize(tree, &self.functions, &self.config)
    }

    /// Compile a normalized tree. Depends only on its structure and
    /// parameter types, so the result can be cached by signature.
    pub fn compile(&self, normalized: &NormalizedQuery) -> std::result::Result<CompiledPlan, QueryError> {
        let tree = &normalized.tree;
        let root = resolve::resolve_root(tree, &self.model)?;
        let classified = classify::classify(tree, &self.functions)?;

        let types = normalized.parameter_types();
        if self.config.point_reads_enabled {
            if let Some(p) = point_read::try_point_read(&classified, &self.model, &root, &types) {
                return Ok(CompiledPlan::PointRead(p));
            }
        }

        let plan = compile::compile_select(&classified, &root, &self.model, &self.config, &types)?;
        Ok(CompiledPlan::Query(plan))
    }

    /// Normalize and compile in one step.
    pub fn plan(&self, tree: &QueryTree) -> Result<(NormalizedQuery, CompiledPlan)> {
        let normalized = self.normalize(tree)?;
        let plan = self.compile(&normalized).map_err(|e| {
            #[cfg(feature = "tracing")]
            tracing::debug!(code = e.code(), "query rejected");
            e
        })?;
        Ok((normalized, plan))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docql_core::model::{EntityType, DEFAULT_DISCRIMINATOR_PROPERTY};
    use docql_core::schema::{DataType, Property};

    fn planner(point_reads: bool) -> Planner {
        let mut customer = EntityType::new("Customer", "Northwind");
        customer.set_name = Some("customers".into());
        customer.discriminator_value = Some("Customer".into());
        customer.key = vec!["CustomerID".into()];
        customer.properties = vec![
            Property::new("CustomerID", DataType::Utf8).json("id"),
            Property::new("City", DataType::Utf8).nullable(),
        ];
        let model = Model::new(DEFAULT_DISCRIMINATOR_PROPERTY, vec![customer]).unwrap();
        let config = EngineConfig {
            point_reads_enabled: point_reads,
            ..EngineConfig::default()
        };
        Planner::new(model, config)
    }

    fn plan(p: &Planner, text: &str) -> Result<(NormalizedQuery, CompiledPlan)> {
        let captures = BTreeMap::from([("city".to_string(), Scalar::from("London"))]);
        p.plan(&p.parse(text, &captures).unwrap())
    }

    #[test]
    fn captured_values_become_parameters() {
        let (n, plan) = plan(&planner(true), "customers.Where(c => c.City == $city)").unwrap();
        assert_eq!(
            plan.render_command(&n.parameter_map()),
            "@__city_0='London'\n\nSELECT VALUE c\nFROM root c\nWHERE ((c[\"Discriminator\"] = \"Customer\") AND (c[\"City\"] = @__city_0))"
        );
    }

    #[test]
    fn point_reads_can_be_disabled() {
        let text = "customers.Where(c => c.CustomerID == \"ALFKI\").FirstOrDefault()";
        let (_, p) = plan(&planner(true), text).unwrap();
        assert!(p.is_point_read());
        let (_, p) = plan(&planner(false), text).unwrap();
        assert!(!p.is_point_read());
        assert!(p.text().unwrap().contains("(c[\"id\"] = \"ALFKI\")"));
    }

    #[test]
    fn signature_ignores_captured_values() {
        let p = planner(true);
        let london = p.parse("customers.Where(c => c.City == $city)", &BTreeMap::from([("city".into(), Scalar::from("London"))])).unwrap();
        let paris = p.parse("customers.Where(c => c.City == $city)", &BTreeMap::from([("city".into(), Scalar::from("Paris"))])).unwrap();
        let a = p.normalize(&london).unwrap();
        let b = p.normalize(&paris).unwrap();
        assert_eq!(a.signature, b.signature);
        assert_ne!(a.parameters, b.parameters);
    }

    #[test]
    fn failures_surface_as_query_errors() {
        let err = plan(&planner(true), "customers.Skip(5).Take(10).Distinct().Take(3)").unwrap_err();
        assert_eq!(err.code(), "NestedPagingUnsupported");
    }
}
