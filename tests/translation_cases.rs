//! Table-driven translation tests: every case in `fixtures/translation_cases.yaml`
//! is planned against `fixtures/northwind.yaml` and checked by one runner.

use docql_core::config::EngineConfig;
use docql_planner::dsl::{check_case, load_cases, load_model, parse_cases};
use docql_planner::Planner;
use std::path::PathBuf;

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(name)
}

fn planner(config: EngineConfig) -> Planner {
    let model = load_model(fixture("northwind.yaml")).expect("model fixture loads");
    Planner::new(model, config)
}

#[test]
fn test_translation_cases() {
    let file = load_cases(fixture("translation_cases.yaml")).expect("case fixture loads");
    let planner = planner(EngineConfig::default().with_overrides(&file.config));
    assert!(!file.cases.is_empty());

    let failures: Vec<String> = file
        .cases
        .iter()
        .map(|case| check_case(&planner, case))
        .filter(|outcome| !outcome.passed())
        .map(|outcome| format!("{}:\n  {}", outcome.name, outcome.mismatches.join("\n  ")))
        .collect();
    assert!(failures.is_empty(), "failing cases:\n{}", failures.join("\n"));
}

#[test]
fn test_case_file_config_overrides() {
    let file = parse_cases(
        r#"
config: { point_reads_enabled: false, parameterize_paging: false }
cases:
  - name: key_equality_compiles
    query: customers.Where(c => c.CustomerID == "ALFKI")
    sql: |
      SELECT VALUE c
      FROM root c
      WHERE ((c["Discriminator"] = "Customer") AND (c["id"] = "ALFKI"))
  - name: inline_limit
    query: customers.OrderBy(c => c.CustomerID).Take(10)
    sql: |
      SELECT VALUE c
      FROM root c
      WHERE (c["Discriminator"] = "Customer")
      ORDER BY c["id"]
      OFFSET 0 LIMIT 10
    parameters: {}
"#,
    )
    .unwrap();
    let planner = planner(EngineConfig::default().with_overrides(&file.config));
    for case in &file.cases {
        let outcome = check_case(&planner, case);
        assert!(outcome.passed(), "{}: {:?}", outcome.name, outcome.mismatches);
    }
}

#[test]
fn test_failures_name_both_root_types() {
    let file = load_cases(fixture("translation_cases.yaml")).unwrap();
    let case = file
        .cases
        .iter()
        .find(|c| c.name == "join_across_roots")
        .expect("join case present");
    let outcome = check_case(&planner(EngineConfig::default()), case);
    let failure = outcome.failure.expect("join is rejected");
    assert_eq!(failure.code, "MultipleRootTypes");
    assert!(failure.message.contains("'Customer'"));
    assert!(failure.message.contains("'Order'"));
    assert!(outcome.command.is_none());
}

#[test]
fn test_mismatches_are_reported() {
    let file = parse_cases(
        r#"
cases:
  - name: expects_failure_but_compiles
    query: customers.Count()
    error: NestedPagingUnsupported
  - name: expects_query_but_point_reads
    query: customers.Where(c => c.CustomerID == "ALFKI")
    sql: SELECT VALUE c FROM root c
"#,
    )
    .unwrap();
    let planner = planner(EngineConfig::default());
    for case in &file.cases {
        assert!(!check_case(&planner, case).passed(), "{} should fail", case.name);
    }
}
