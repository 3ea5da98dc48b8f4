use criterion::{criterion_group, criterion_main, Criterion};
use docql_core::config::EngineConfig;
use docql_core::types::Scalar;
use docql_exec::{Executor, MemoryTransport, QueryContext};
use docql_planner::dsl::parse_model;
use docql_planner::Planner;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;

const MODEL: &str = r#"
entities:
  - name: Customer
    container: Northwind
    set: customers
    discriminator: Customer
    key: [CustomerID]
    properties:
      - { name: CustomerID, json: id, type: string }
      - { name: City, type: string, nullable: true }
      - { name: Rank, type: int }
"#;

const QUERY: &str =
    "customers.Where(c => c.City == $city && c.Rank > 3 || c.City.StartsWith(\"L\")).OrderBy(c => c.Rank).Take(20)";

fn executor(cache: bool) -> Executor {
    let config = EngineConfig {
        query_cache_enabled: cache,
        ..EngineConfig::default()
    };
    let transport = Arc::new(MemoryTransport::new());
    transport.insert_many(
        "Northwind",
        (0..1000).map(|i| {
            json!({
                "id": format!("C{i:04}"),
                "City": if i % 3 == 0 { "London" } else { "Berlin" },
                "Rank": i % 10,
                "Discriminator": "Customer",
            })
        }),
    );
    let model = parse_model(MODEL).unwrap();
    Executor::new(Planner::new(model, config), transport)
}

fn bench_prepare(c: &mut Criterion) {
    let captures = BTreeMap::from([("city".to_string(), Scalar::from("London"))]);
    for (name, cache) in [("prepare_uncached", false), ("prepare_cached", true)] {
        let exec = executor(cache);
        let tree = exec.planner().parse(QUERY, &captures).unwrap();
        c.bench_function(name, |b| {
            b.iter(|| {
                let _ = exec.prepare(&tree).unwrap();
            })
        });
    }
}

fn bench_execute(c: &mut Criterion) {
    let captures = BTreeMap::from([("city".to_string(), Scalar::from("London"))]);
    let exec = executor(true);
    let tree = exec.planner().parse(QUERY, &captures).unwrap();
    let ctx = QueryContext::new();
    c.bench_function("execute_1000_documents", |b| {
        b.iter(|| {
            let _ = exec.execute(&tree, &ctx).unwrap();
        })
    });
}

criterion_group!(compile, bench_prepare, bench_execute);
criterion_main!(compile);
