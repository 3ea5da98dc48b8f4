//! Dialect compilation.
//!
//! Takes the store part of a classified tree and produces one select
//! statement: the discriminator restriction first, then each operator of
//! the chain, then the terminal reduction.

pub mod functions;
mod select;
mod shape;
mod subquery;
mod translate;

use std::collections::HashMap;

use docql_core::config::EngineConfig;
use docql_core::error::QueryError;
use docql_core::expr::Query;
use docql_core::model::Model;
use docql_core::plan::Finish;
use docql_core::schema::DataType;
use docql_core::sql::SqlExpr;

pub use shape::{Binding, Shape};

use self::select::SelectBuilder;
use self::translate::Translator;
use crate::classify::Classified;
use crate::plan::QueryPlan;
use crate::report;
use crate::resolve::{discriminator_predicate, RootInfo};

/// Compile a classified tree rooted at `root` into a query plan.
pub fn compile_select(
    classified: &Classified,
    root: &RootInfo,
    model: &Model,
    config: &EngineConfig,
    param_types: &HashMap<String, DataType>,
) -> Result<QueryPlan, QueryError> {
    let tree = &classified.store;
    let (paged, body) = match &tree.query {
        Query::Paginate { input } => (true, input.as_ref()),
        q => (false, q),
    };

    let mut chain = vec![body];
    let mut q = body;
    while let Some(input) = q.input() {
        chain.push(input);
        q = input;
    }
    chain.reverse();

    let alias = config.root_alias.as_str();
    let mut tr = Translator::new(model, config, param_types);
    let start = Binding::new(
        SqlExpr::alias(alias),
        Shape::Entity {
            entity: root.entity.clone(),
        },
    );
    let discriminator = discriminator_predicate(model, &root.entity, &SqlExpr::alias(alias));
    let mut b = SelectBuilder::root(alias, start, discriminator);

    for op in chain {
        tr.apply(&mut b, op)?;
    }
    if b.group_pending() {
        return Err(report::unsupported(
            body,
            "GroupBy must be followed by a projection of its key and aggregates",
        ));
    }
    let finish = match &tree.terminal {
        Some(t) => tr.apply_terminal(&mut b, t, body)?,
        None => Finish::Sequence,
    };
    if b.has_dangling_offset() {
        return Err(report::unsupported(body, "Skip must be followed by Take"));
    }

    let result_shape = b.result_shape();
    let ordered = b.is_ordered();
    let select = b.build();
    let text = select.to_text();
    let placeholders = select.parameters();

    #[cfg(feature = "tracing")]
    tracing::debug!(entity = %root.entity, placeholders = placeholders.len(), "compiled select");

    Ok(QueryPlan {
        entity: root.entity.clone(),
        container: root.container.clone(),
        select,
        text,
        placeholders,
        result_shape,
        residual: classified.residual.clone(),
        finish,
        paged,
        ordered,
    })
}
