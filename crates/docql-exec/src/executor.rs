//! Query execution: normalize, look up or compile, send, materialize, finish.
//!
//! The blocking and async entry points share every step except the
//! transport call, so they produce identical results.

use std::collections::HashMap;
use std::sync::Arc;

use docql_core::expr::{Query, QueryTree};
use docql_core::model::Model;
use docql_core::plan::Finish;
use docql_core::types::Scalar;
use docql_operators::{apply_residual, finish_rows, EvalContext};
use docql_planner::{CompiledPlan, NormalizedQuery, Planner, PointReadPlan, QueryPlan};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::cache::QueryCache;
use crate::context::QueryContext;
use crate::error::{ExecError, Result};
use crate::materialize::Materializer;
use crate::metrics::emit_span;
use crate::transport::{FeedPage, FeedRequest, ReadRequest, Transport};

/// Result of a non-paged invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum QueryOutput {
    Sequence(Vec<Value>),
    Scalar(Value),
}

impl QueryOutput {
    pub fn into_values(self) -> Vec<Value> {
        match self {
            QueryOutput::Sequence(v) => v,
            QueryOutput::Scalar(Value::Null) => Vec::new(),
            QueryOutput::Scalar(v) => vec![v],
        }
    }

    pub fn as_scalar(&self) -> Option<&Value> {
        match self {
            QueryOutput::Scalar(v) => Some(v),
            QueryOutput::Sequence(_) => None,
        }
    }
}

/// One page of a continuation-token paged query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page {
    pub values: Vec<Value>,
    /// Resumes after this page; `None` once the result is exhausted.
    pub continuation: Option<String>,
}

/// A normalized query with its (possibly cached) plan.
#[derive(Debug, Clone)]
pub struct Prepared {
    pub normalized: NormalizedQuery,
    pub plan: Arc<CompiledPlan>,
}

impl Prepared {
    /// The command in its recorded form.
    pub fn command(&self) -> String {
        self.plan.render_command(&self.normalized.parameter_map())
    }

    /// The values sent to the store, in placeholder order.
    pub fn bindings(&self) -> Vec<(String, Scalar)> {
        self.plan.bind(&self.normalized.parameter_map())
    }
}

pub struct Executor {
    planner: Planner,
    transport: Arc<dyn Transport>,
    cache: Option<QueryCache>,
}

impl Executor {
    pub fn new(planner: Planner, transport: Arc<dyn Transport>) -> Self {
        let cache = planner
            .config()
            .query_cache_enabled
            .then(|| QueryCache::new(planner.config().query_cache_capacity));
        Self {
            planner,
            transport,
            cache,
        }
    }

    pub fn planner(&self) -> &Planner {
        &self.planner
    }

    pub fn cache(&self) -> Option<&QueryCache> {
        self.cache.as_ref()
    }

    /// Whether the blocking entry points can be used with this transport.
    pub fn supports_sync(&self) -> bool {
        self.transport.supports_sync()
    }

    /// Normalize `tree` and fetch its plan from the cache, compiling on a miss.
    pub fn prepare(&self, tree: &QueryTree) -> Result<Prepared> {
        let normalized = self.planner.normalize(tree)?;
        let compile = || {
            #[cfg(feature = "tracing")]
            tracing::debug!(signature = %normalized.signature.short_hex(), "compiling query");
            self.planner.compile(&normalized)
        };
        let plan = match &self.cache {
            Some(cache) => cache.get_or_compile(normalized.signature, compile)?,
            None => Arc::new(compile()?),
        };
        Ok(Prepared { normalized, plan })
    }

    pub fn execute(&self, tree: &QueryTree, ctx: &QueryContext) -> Result<QueryOutput> {
        if !self.supports_sync() {
            return Err(ExecError::SyncUnsupported);
        }
        let prepared = self.prepare(tree)?;
        let run = Invocation::new(&self.planner, &prepared, ctx);
        match prepared.plan.as_ref() {
            CompiledPlan::PointRead(p) => {
                let (pk_path, pk_value) = run.partition_key(p);
                let id = run.id(p)?;
                let request = ReadRequest {
                    container: &p.container,
                    id: &id,
                    partition_key: pk_path.zip(pk_value.as_ref()),
                    activity_id: run.activity_id,
                };
                let doc = self
                    .transport
                    .read_item(&request)
                    .map_err(|e| e.into_exec(run.activity_id))?;
                run.finish_point_read(p, doc)
            }
            CompiledPlan::Query(q) => {
                let params = run.store_parameters(q);
                let mut rows = Vec::new();
                let mut continuation: Option<String> = None;
                loop {
                    let request = run.feed_request(q, &params, None, continuation.as_deref());
                    let page = self
                        .transport
                        .query(&request)
                        .map_err(|e| e.into_exec(run.activity_id))?;
                    continuation = run.collect(page, &mut rows);
                    if continuation.is_none() {
                        break;
                    }
                }
                run.finish_query(q, rows)
            }
        }
    }

    pub async fn execute_async(&self, tree: &QueryTree, ctx: &QueryContext) -> Result<QueryOutput> {
        let prepared = self.prepare(tree)?;
        let run = Invocation::new(&self.planner, &prepared, ctx);
        match prepared.plan.as_ref() {
            CompiledPlan::PointRead(p) => {
                let (pk_path, pk_value) = run.partition_key(p);
                let id = run.id(p)?;
                let request = ReadRequest {
                    container: &p.container,
                    id: &id,
                    partition_key: pk_path.zip(pk_value.as_ref()),
                    activity_id: run.activity_id,
                };
                let doc = self
                    .transport
                    .read_item_async(&request)
                    .await
                    .map_err(|e| e.into_exec(run.activity_id))?;
                run.finish_point_read(p, doc)
            }
            CompiledPlan::Query(q) => {
                let params = run.store_parameters(q);
                let mut rows = Vec::new();
                let mut continuation: Option<String> = None;
                loop {
                    let request = run.feed_request(q, &params, None, continuation.as_deref());
                    let page = self
                        .transport
                        .query_async(&request)
                        .await
                        .map_err(|e| e.into_exec(run.activity_id))?;
                    continuation = run.collect(page, &mut rows);
                    if continuation.is_none() {
                        break;
                    }
                }
                run.finish_query(q, rows)
            }
        }
    }

    /// Fetch one page of `tree`, resuming after `continuation`.
    ///
    /// `tree` must be a sequence query; it is paged as a whole, so paging
    /// markers may only appear at its outermost position.
    pub fn to_page(
        &self,
        tree: &QueryTree,
        page_size: Option<usize>,
        continuation: Option<&str>,
        ctx: &QueryContext,
    ) -> Result<Page> {
        if !self.supports_sync() {
            return Err(ExecError::SyncUnsupported);
        }
        let tree = paged(tree)?;
        let prepared = self.prepare(&tree)?;
        let q = self.paged_plan(&tree, &prepared)?;
        let run = Invocation::new(&self.planner, &prepared, ctx);
        let params = run.store_parameters(q);
        let request = run.feed_request(q, &params, Some(self.page_size(page_size)), continuation);
        let page = self
            .transport
            .query(&request)
            .map_err(|e| e.into_exec(run.activity_id))?;
        run.into_page(q, page)
    }

    pub async fn to_page_async(
        &self,
        tree: &QueryTree,
        page_size: Option<usize>,
        continuation: Option<&str>,
        ctx: &QueryContext,
    ) -> Result<Page> {
        let tree = paged(tree)?;
        let prepared = self.prepare(&tree)?;
        let q = self.paged_plan(&tree, &prepared)?;
        let run = Invocation::new(&self.planner, &prepared, ctx);
        let params = run.store_parameters(q);
        let request = run.feed_request(q, &params, Some(self.page_size(page_size)), continuation);
        let page = self
            .transport
            .query_async(&request)
            .await
            .map_err(|e| e.into_exec(run.activity_id))?;
        run.into_page(q, page)
    }

    fn page_size(&self, requested: Option<usize>) -> usize {
        requested
            .filter(|n| *n > 0)
            .unwrap_or(self.planner.config().default_page_size)
    }

    fn paged_plan<'p>(&self, tree: &QueryTree, prepared: &'p Prepared) -> Result<&'p QueryPlan> {
        let CompiledPlan::Query(q) = prepared.plan.as_ref() else {
            return Err(docql_planner::report::paging_misuse(tree, "a point read cannot be paged").into());
        };
        if !q.ordered {
            if self.planner.config().reject_unordered_paging {
                return Err(docql_planner::report::paging_misuse(
                    tree,
                    "the paged query has no ordering, so page boundaries are not stable",
                )
                .into());
            }
            #[cfg(feature = "tracing")]
            tracing::warn!(entity = %q.entity, "paging a query without ORDER BY; page boundaries are not stable");
        }
        Ok(q)
    }
}

/// Mark `tree` for paging; only sequence queries can be paged.
fn paged(tree: &QueryTree) -> Result<QueryTree> {
    if tree.terminal.is_some() {
        return Err(docql_planner::report::paging_misuse(tree, "only sequence results can be paged").into());
    }
    Ok(match &tree.query {
        Query::Paginate { .. } => tree.clone(),
        q => QueryTree::sequence(Query::Paginate {
            input: Box::new(q.clone()),
        }),
    })
}

/// State of one invocation: its activity id, bindings and plan.
struct Invocation<'a> {
    model: &'a Model,
    planner: &'a Planner,
    activity_id: Uuid,
    bindings: HashMap<String, Scalar>,
}

impl<'a> Invocation<'a> {
    fn new(planner: &'a Planner, prepared: &'a Prepared, ctx: &'a QueryContext) -> Self {
        let activity_id = Uuid::new_v4();
        let bindings = prepared.normalized.parameter_map();
        ctx.record(|| prepared.plan.render_command(&bindings));
        emit_span(
            "query",
            &[
                ("activity_id", activity_id.to_string()),
                ("signature", prepared.normalized.signature.short_hex()),
                ("point_read", prepared.plan.is_point_read().to_string()),
            ],
        );
        Self {
            model: planner.model(),
            planner,
            activity_id,
            bindings,
        }
    }

    /// Parameters referenced by the statement text.
    fn store_parameters(&self, q: &QueryPlan) -> HashMap<String, Value> {
        q.bind(&self.bindings)
            .into_iter()
            .map(|(k, v)| (k, v.to_json()))
            .collect()
    }

    /// Every binding; residual selectors may read values the statement does not.
    fn parameters(&self) -> HashMap<String, Value> {
        self.bindings
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect()
    }

    fn feed_request<'r>(
        &self,
        q: &'r QueryPlan,
        params: &'r HashMap<String, Value>,
        page_size: Option<usize>,
        continuation: Option<&'r str>,
    ) -> FeedRequest<'r> {
        FeedRequest {
            container: &q.container,
            select: &q.select,
            text: &q.text,
            parameters: params,
            page_size,
            continuation,
            activity_id: self.activity_id,
        }
    }

    fn collect(&self, page: FeedPage, rows: &mut Vec<Value>) -> Option<String> {
        #[cfg(feature = "tracing")]
        tracing::trace!(
            activity_id = %self.activity_id,
            documents = page.documents.len(),
            has_next = page.continuation.is_some(),
            "feed page"
        );
        rows.extend(page.documents);
        page.continuation
    }

    fn eval_ctx<'p>(&'p self, params: &'p HashMap<String, Value>) -> EvalContext<'p> {
        EvalContext {
            params,
            functions: self.planner.functions(),
        }
    }

    /// Materialize and run residual projections over store rows.
    fn shape_rows(&self, q: &QueryPlan, rows: Vec<Value>) -> Result<Vec<Value>> {
        let mat = Materializer::new(self.model);
        let params = self.parameters();
        let ctx = self.eval_ctx(&params);
        rows.into_iter()
            .map(|raw| {
                let v = mat.materialize(&q.result_shape, raw);
                if q.residual.is_empty() {
                    Ok(v)
                } else {
                    Ok(apply_residual(&q.residual, v, ctx)?)
                }
            })
            .collect()
    }

    fn finish_query(&self, q: &QueryPlan, rows: Vec<Value>) -> Result<QueryOutput> {
        let rows = self.shape_rows(q, rows)?;
        finish(q.finish, rows)
    }

    fn into_page(&self, q: &QueryPlan, page: FeedPage) -> Result<Page> {
        #[cfg(feature = "tracing")]
        tracing::debug!(
            activity_id = %self.activity_id,
            documents = page.documents.len(),
            has_next = page.continuation.is_some(),
            "page fetched"
        );
        let values = self.shape_rows(q, page.documents)?;
        Ok(Page {
            values,
            continuation: page.continuation,
        })
    }

    fn id(&self, p: &PointReadPlan) -> Result<String> {
        let id = p.id.resolve(&self.bindings).unwrap_or(Scalar::Null);
        match id {
            Scalar::Str(s) => Ok(s),
            other => Err(docql_core::Error::Invariant(format!(
                "point read id must be a string, got {}",
                other.to_log_string()
            ))
            .into()),
        }
    }

    /// Stored name and bound value of the partition key, when the type has one.
    fn partition_key(&self, p: &PointReadPlan) -> (Option<&'a str>, Option<Value>) {
        let path = self
            .model
            .entity(&p.entity)
            .and_then(|e| e.partition_key.as_deref().and_then(|pk| e.property(pk)))
            .map(|prop| prop.json_name.as_str());
        let value = p
            .partition_key
            .as_ref()
            .and_then(|slot| slot.resolve(&self.bindings))
            .map(|s| s.to_json());
        (path, value)
    }

    fn finish_point_read(&self, p: &PointReadPlan, doc: Option<Value>) -> Result<QueryOutput> {
        let discriminator = self.model.discriminator_property();
        let doc = doc.filter(|d| {
            p.discriminators.is_empty()
                || d.get(discriminator)
                    .and_then(Value::as_str)
                    .is_some_and(|v| p.discriminators.iter().any(|x| x == v))
        });

        #[cfg(feature = "tracing")]
        tracing::debug!(activity_id = %self.activity_id, found = doc.is_some(), "point read");

        let mat = Materializer::new(self.model);
        let rows: Vec<Value> = doc
            .into_iter()
            .map(|d| mat.materialize(&p.result_shape, d))
            .collect();
        finish(p.finish, rows)
    }
}

fn finish(finish: Finish, rows: Vec<Value>) -> Result<QueryOutput> {
    if finish.is_sequence() {
        return Ok(QueryOutput::Sequence(rows));
    }
    Ok(QueryOutput::Scalar(finish_rows(finish, rows)?))
}
