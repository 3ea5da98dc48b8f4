//! End-to-end execution against the in-memory transport.

use docql::planner::dsl::load_model;
use docql::prelude::*;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

fn seed(transport: &MemoryTransport) {
    transport.insert_many(
        "Northwind",
        vec![
            json!({"id": "ALFKI", "City": "Berlin", "Discriminator": "Customer",
                   "Orders": [{"Total": 12.5, "Shipped": true}]}),
            json!({"id": "AROUT", "City": "London", "Discriminator": "Customer", "Orders": []}),
            json!({"id": "BSBEV", "City": "London", "Discriminator": "Customer",
                   "Orders": [{"Total": 3.0, "Shipped": false}]}),
            json!({"OrderID": 10258, "CustomerID": "ALFKI", "Discriminator": "Order"}),
            json!({"OrderID": 10259, "CustomerID": "AROUT", "Discriminator": "Order"}),
        ],
    );
    transport.insert_many(
        "Zoo",
        vec![
            json!({"id": "a1", "Name": "Lion", "Discriminator": "Animal"}),
            json!({"id": "b1", "Name": "Kiwi", "CanFly": false, "Discriminator": "Bird"}),
            json!({"id": "x1", "Name": "Fossil", "Discriminator": "Rock"}),
        ],
    );
}

fn executor_with(transport: MemoryTransport, config: EngineConfig) -> (Executor, Arc<MemoryTransport>) {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/northwind.yaml");
    let model = load_model(path).expect("model fixture loads");
    seed(&transport);
    let transport = Arc::new(transport);
    (Executor::new(Planner::new(model, config), transport.clone()), transport)
}

fn executor() -> (Executor, Arc<MemoryTransport>) {
    executor_with(MemoryTransport::new(), EngineConfig::default())
}

fn parse(exec: &Executor, text: &str, captures: &[(&str, Scalar)]) -> QueryTree {
    let captures: BTreeMap<String, Scalar> = captures
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect();
    exec.planner().parse(text, &captures).unwrap()
}

#[test]
fn test_entities_are_materialized_with_model_names() {
    let (exec, _) = executor();
    let tree = parse(&exec, "customers.Where(c => c.City == $city).OrderBy(c => c.CustomerID)", &[("city", "London".into())]);
    let rows = exec.execute(&tree, &QueryContext::new()).unwrap().into_values();
    assert_eq!(
        rows,
        vec![
            json!({"CustomerID": "AROUT", "City": "London", "Orders": []}),
            json!({"CustomerID": "BSBEV", "City": "London", "Orders": [{"Total": 3.0, "Shipped": false}]}),
        ]
    );
}

#[test]
fn test_derived_members_and_unknown_discriminators() {
    let (exec, _) = executor();
    let tree = parse(&exec, "animals.OrderBy(a => a.Id)", &[]);
    let rows = exec.execute(&tree, &QueryContext::new()).unwrap().into_values();
    assert_eq!(
        rows,
        vec![
            json!({"Id": "a1", "Name": "Lion"}),
            json!({"Id": "b1", "Name": "Kiwi", "CanFly": false}),
        ]
    );
}

#[test]
fn test_point_read_bypasses_query_text() {
    let (exec, transport) = executor();
    let log = Arc::new(CommandLog::new());
    let ctx = QueryContext::new().with_recorder(log.clone());
    let tree = parse(&exec, "customers.Where(c => c.CustomerID == \"ALFKI\")", &[]);
    let rows = exec.execute(&tree, &ctx).unwrap().into_values();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["City"], json!("Berlin"));
    assert_eq!(log.entries(), vec!["ReadItem(None, ALFKI)".to_string()]);
    assert_eq!(transport.request_count(), 1);
}

#[test]
fn test_point_read_respects_the_discriminator() {
    let (exec, _) = executor();
    let tree = parse(&exec, "animals.Where(a => a.Id == \"x1\").FirstOrDefault()", &[]);
    let out = exec.execute(&tree, &QueryContext::new()).unwrap();
    assert_eq!(out, QueryOutput::Scalar(Value::Null));
}

#[test]
fn test_rejected_queries_never_reach_the_store() {
    let (exec, transport) = executor();
    let tree = parse(&exec, "customers.Join(orders, c => c.CustomerID, o => o.CustomerID, (c, o) => o)", &[]);
    let err = exec.execute(&tree, &QueryContext::new()).unwrap_err();
    assert_eq!(err.code(), "MultipleRootTypes");
    assert_eq!(transport.request_count(), 0);
}

#[test]
fn test_recorded_commands_carry_parameters() {
    let (exec, _) = executor();
    let log = Arc::new(CommandLog::new());
    let ctx = QueryContext::new().with_recorder(log.clone());
    let tree = parse(&exec, "customers.Where(c => c.City == $city)", &[("city", "London".into())]);
    exec.execute(&tree, &ctx).unwrap();
    assert_eq!(
        log.last().unwrap(),
        "@__city_0='London'\n\nSELECT VALUE c\nFROM root c\nWHERE ((c[\"Discriminator\"] = \"Customer\") AND (c[\"City\"] = @__city_0))"
    );

    // Contexts without a recorder record nothing.
    exec.execute(&tree, &QueryContext::new()).unwrap();
    assert_eq!(log.len(), 1);
}

#[test]
fn test_cache_reuses_plans_across_captured_values() {
    let (exec, _) = executor();
    let ctx = QueryContext::new();
    let text = "customers.Where(c => c.City == $city).Count()";
    let london = exec.execute(&parse(&exec, text, &[("city", "London".into())]), &ctx).unwrap();
    let berlin = exec.execute(&parse(&exec, text, &[("city", "Berlin".into())]), &ctx).unwrap();
    assert_eq!(london, QueryOutput::Scalar(json!(2)));
    assert_eq!(berlin, QueryOutput::Scalar(json!(1)));

    let stats = exec.cache().unwrap().stats();
    assert_eq!((stats.entries, stats.hits, stats.misses), (1, 1, 1));
}

#[test]
fn test_cache_can_be_disabled() {
    let config = EngineConfig {
        query_cache_enabled: false,
        ..EngineConfig::default()
    };
    let (exec, _) = executor_with(MemoryTransport::new(), config);
    assert!(exec.cache().is_none());
    let tree = parse(&exec, "customers.Count()", &[]);
    assert_eq!(exec.execute(&tree, &QueryContext::new()).unwrap(), QueryOutput::Scalar(json!(3)));
}

#[test]
fn test_paging_round_trip() {
    let (exec, transport) = executor();
    let tree = parse(&exec, "customers.OrderBy(c => c.CustomerID).Select(c => c.CustomerID)", &[]);
    let ctx = QueryContext::new();

    let first = exec.to_page(&tree, Some(2), None, &ctx).unwrap();
    assert_eq!(first.values, vec![json!("ALFKI"), json!("AROUT")]);
    let token = first.continuation.expect("more rows remain");

    let second = exec.to_page(&tree, Some(2), Some(&token), &ctx).unwrap();
    assert_eq!(second.values, vec![json!("BSBEV")]);
    assert!(second.continuation.is_none());
    assert_eq!(transport.request_count(), 2);

    // A token only resumes the statement that issued it.
    let other = parse(&exec, "orders.OrderBy(o => o.OrderID)", &[]);
    let err = exec.to_page(&other, Some(2), Some(&token), &ctx).unwrap_err();
    assert!(matches!(err, ExecError::Query(_)));
}

#[test]
fn test_paging_rejects_inner_markers_and_scalars() {
    let (exec, _) = executor();
    let ctx = QueryContext::new();
    let scalar = parse(&exec, "customers.Count()", &[]);
    let err = exec.to_page(&scalar, Some(2), None, &ctx).unwrap_err();
    assert_eq!(err.code(), "PagingMisuse");
    let ExecError::Query(e) = &err else {
        panic!("unexpected {err:?}");
    };
    assert_eq!(e.expression(), Some("Customer.Count()"));

    let inner = parse(&exec, "customers.AsPaged().Where(c => c.City == \"London\")", &[]);
    let err = exec.to_page(&inner, Some(2), None, &ctx).unwrap_err();
    assert_eq!(err.code(), "PagingMisuse");
    let ExecError::Query(e) = &err else {
        panic!("unexpected {err:?}");
    };
    assert!(e.expression().is_some_and(|x| x.starts_with("Customer.AsPaged().Where(")));
}

#[test]
fn test_paged_key_equality_is_a_query() {
    let (exec, _) = executor();
    let log = Arc::new(CommandLog::new());
    let ctx = QueryContext::new().with_recorder(log.clone());
    let tree = parse(&exec, "customers.Where(c => c.CustomerID == \"ALFKI\")", &[]);
    let page = exec.to_page(&tree, Some(2), None, &ctx).unwrap();
    assert_eq!(page.values.len(), 1);
    assert!(page.continuation.is_none());
    assert!(log.last().unwrap().starts_with("SELECT VALUE c"));
}

#[test]
fn test_async_only_transport() {
    let (exec, transport) = executor_with(MemoryTransport::async_only(), EngineConfig::default());
    let tree = parse(&exec, "customers.Count()", &[]);
    let err = exec.execute(&tree, &QueryContext::new()).unwrap_err();
    assert_eq!(err.code(), "SyncUnsupported");
    assert_eq!(transport.request_count(), 0);

    let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
    let out = rt.block_on(exec.execute_async(&tree, &QueryContext::new())).unwrap();
    assert_eq!(out, QueryOutput::Scalar(json!(3)));
}

#[tokio::test]
async fn test_async_paging_matches_sync_paging() {
    let (exec, _) = executor();
    let tree = parse(&exec, "customers.OrderBy(c => c.CustomerID).Select(c => c.City)", &[]);
    let ctx = QueryContext::new();
    let sync = exec.to_page(&tree, Some(2), None, &ctx).unwrap();
    let async_page = exec.to_page_async(&tree, Some(2), None, &ctx).await.unwrap();
    assert_eq!(sync.values, async_page.values);
    assert_eq!(sync.continuation, async_page.continuation);
}

#[test]
fn test_store_failures_are_transient() {
    let (exec, transport) = executor();
    transport.reject_next("Request rate is large.");
    let tree = parse(&exec, "customers.Count()", &[]);
    let err = exec.execute(&tree, &QueryContext::new()).unwrap_err();
    assert_eq!(err.code(), "TransientStoreFailure");
    // The next request is served normally.
    assert!(exec.execute(&tree, &QueryContext::new()).is_ok());
}

#[test]
fn test_mistyped_key_captures_match_the_query_path() {
    for point_reads in [true, false] {
        let config = EngineConfig {
            point_reads_enabled: point_reads,
            ..EngineConfig::default()
        };
        let (exec, _) = executor_with(MemoryTransport::new(), config);
        let text = "customers.Where(c => c.CustomerID == $id)";
        for id in [Scalar::Null, Scalar::from(5i64)] {
            let tree = parse(&exec, text, &[("id", id.clone())]);
            assert!(!exec.prepare(&tree).unwrap().plan.is_point_read());
            let out = exec.execute(&tree, &QueryContext::new()).unwrap();
            assert_eq!(out, QueryOutput::Sequence(vec![]), "id {id:?}, point reads {point_reads}");
        }

        let found = parse(&exec, text, &[("id", "ALFKI".into())]);
        assert_eq!(exec.prepare(&found).unwrap().plan.is_point_read(), point_reads);
        assert_eq!(exec.execute(&found, &QueryContext::new()).unwrap().into_values().len(), 1);
    }
}

#[test]
fn test_store_receives_only_referenced_parameters() {
    let (exec, _) = executor();
    let log = Arc::new(CommandLog::new());
    let ctx = QueryContext::new().with_recorder(log.clone());
    let tree = parse(&exec, "customers.Select(c => c.City == $city).Count()", &[("city", "London".into())]);

    let prepared = exec.prepare(&tree).unwrap();
    let CompiledPlan::Query(q) = prepared.plan.as_ref() else {
        panic!("expected a query plan");
    };
    assert_eq!(prepared.normalized.parameters.len(), 1);
    assert_eq!(prepared.bindings().len(), q.placeholders.len());
    assert!(q.placeholders.is_empty());

    assert_eq!(exec.execute(&tree, &ctx).unwrap(), QueryOutput::Scalar(json!(3)));
    assert!(log.last().unwrap().starts_with("SELECT VALUE COUNT(1)"));

    let filtered = parse(&exec, "customers.Where(c => c.City == $city).OrderBy(c => c.CustomerID)", &[("city", "London".into())]);
    let prepared = exec.prepare(&filtered).unwrap();
    assert_eq!(prepared.bindings(), vec![("__city_0".to_string(), Scalar::from("London"))]);
}

#[test]
fn test_tokens_do_not_carry_across_bindings() {
    let (exec, _) = executor();
    let ctx = QueryContext::new();
    let text = "customers.Where(c => c.City == $city).OrderBy(c => c.CustomerID)";
    let london = parse(&exec, text, &[("city", "London".into())]);
    let first = exec.to_page(&london, Some(1), None, &ctx).unwrap();
    let token = first.continuation.expect("a second London customer remains");

    let berlin = parse(&exec, text, &[("city", "Berlin".into())]);
    assert!(exec.to_page(&berlin, Some(1), Some(&token), &ctx).is_err());
    let second = exec.to_page(&london, Some(1), Some(&token), &ctx).unwrap();
    assert_eq!(second.values[0]["CustomerID"], json!("BSBEV"));
}
