//! docql CLI: explain, validate, and run object queries against a model.

use clap::{Parser, Subcommand};
use docql_core::config::EngineConfig;
use docql_core::types::Scalar;
use docql_exec::{CommandLog, Executor, MemoryTransport, QueryContext};
use docql_planner::dsl::{check_case, load_cases, load_model};
use docql_planner::{Diagnostic, Planner};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "docql")]
#[command(about = "Object queries compiled to a JSON document-store dialect", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a query against documents loaded from a JSON file
    Run {
        /// Path to the model YAML file
        #[arg(short, long)]
        model: PathBuf,

        /// JSON object mapping container names to document arrays
        #[arg(short, long)]
        documents: PathBuf,

        /// Query text, e.g. `customers.Where(c => c.City == $city)`
        #[arg(short, long)]
        query: String,

        /// Captured value as name=value; the value is read as JSON, else as a string
        #[arg(short, long = "capture")]
        captures: Vec<String>,

        /// Fetch a single page of this size instead of the whole result
        #[arg(long)]
        page_size: Option<usize>,

        /// Continuation token returned by a previous page
        #[arg(long, requires = "page_size")]
        continuation: Option<String>,

        /// Use the async entry points
        #[arg(long)]
        r#async: bool,

        /// Print the recorded store commands to stderr
        #[arg(long)]
        show_commands: bool,
    },

    /// Check a YAML file of translation cases against their expectations
    Validate {
        /// Path to the model YAML file
        #[arg(short, long)]
        model: PathBuf,

        /// Path to the cases YAML file
        #[arg(short, long)]
        cases: PathBuf,

        /// Print outcomes as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show how a query is normalized and compiled (EXPLAIN)
    Explain {
        /// Path to the model YAML file
        #[arg(short, long)]
        model: PathBuf,

        /// Query text
        #[arg(short, long)]
        query: String,

        /// Captured value as name=value
        #[arg(short, long = "capture")]
        captures: Vec<String>,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_env("DOCQL_LOG").unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            model,
            documents,
            query,
            captures,
            page_size,
            continuation,
            r#async,
            show_commands,
        } => {
            let opts = RunOptions {
                page_size,
                continuation,
                use_async: r#async,
                show_commands,
            };
            if let Err(e) = run_query(&model, &documents, &query, &captures, opts) {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        }
        Commands::Validate { model, cases, json } => match validate_cases(&model, &cases, json) {
            Ok(0) => println!("✓ All cases passed"),
            Ok(failed) => {
                eprintln!("{} case(s) failed", failed);
                std::process::exit(1);
            }
            Err(e) => {
                eprintln!("Validation failed: {}", e);
                std::process::exit(1);
            }
        },
        Commands::Explain {
            model,
            query,
            captures,
        } => {
            if let Err(e) = explain_query(&model, &query, &captures) {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        }
    }
}

struct RunOptions {
    page_size: Option<usize>,
    continuation: Option<String>,
    use_async: bool,
    show_commands: bool,
}

fn planner_for(model_path: &PathBuf) -> Result<Planner, Box<dyn std::error::Error>> {
    let model = load_model(model_path)?;
    Ok(Planner::new(model, EngineConfig::from_env()))
}

fn run_query(
    model_path: &PathBuf,
    documents_path: &PathBuf,
    query: &str,
    captures: &[String],
    opts: RunOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    let planner = planner_for(model_path)?;
    let tree = planner.parse(query, &parse_captures(captures)?)?;

    let transport = Arc::new(MemoryTransport::new());
    let containers: BTreeMap<String, Vec<Value>> = serde_json::from_str(&fs::read_to_string(documents_path)?)?;
    for (container, docs) in containers {
        tracing::debug!(container = %container, documents = docs.len(), "loading container");
        transport.insert_many(&container, docs);
    }

    let executor = Executor::new(planner, transport);
    let log = Arc::new(CommandLog::new());
    let ctx = QueryContext::new().with_recorder(log.clone());

    let output = match (opts.page_size, opts.use_async) {
        (Some(size), false) => {
            serde_json::to_value(executor.to_page(&tree, Some(size), opts.continuation.as_deref(), &ctx)?)?
        }
        (None, false) => serde_json::to_value(executor.execute(&tree, &ctx)?)?,
        (page_size, true) => {
            let rt = tokio::runtime::Builder::new_current_thread().build()?;
            rt.block_on(async {
                let value = match page_size {
                    Some(size) => serde_json::to_value(
                        executor
                            .to_page_async(&tree, Some(size), opts.continuation.as_deref(), &ctx)
                            .await?,
                    )?,
                    None => serde_json::to_value(executor.execute_async(&tree, &ctx).await?)?,
                };
                Ok::<_, Box<dyn std::error::Error>>(value)
            })?
        }
    };

    if opts.show_commands {
        for command in log.entries() {
            eprintln!("{}\n", command);
        }
    }
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

/// Returns the number of failed cases.
fn validate_cases(
    model_path: &PathBuf,
    cases_path: &PathBuf,
    json: bool,
) -> Result<usize, Box<dyn std::error::Error>> {
    let model = load_model(model_path)?;
    let file = load_cases(cases_path)?;
    let config = EngineConfig::from_env().with_overrides(&file.config);
    let planner = Planner::new(model, config);

    let outcomes: Vec<_> = file.cases.iter().map(|c| check_case(&planner, c)).collect();
    let failed = outcomes.iter().filter(|o| !o.passed()).count();

    if json {
        println!("{}", serde_json::to_string_pretty(&outcomes)?);
        return Ok(failed);
    }
    for outcome in &outcomes {
        if outcome.passed() {
            println!("ok    {}", outcome.name);
        } else {
            println!("FAIL  {}", outcome.name);
            for m in &outcome.mismatches {
                println!("      {}", m.replace('\n', "\n      "));
            }
        }
    }
    Ok(failed)
}

fn explain_query(model_path: &PathBuf, query: &str, captures: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    let planner = planner_for(model_path)?;
    let tree = planner.parse(query, &parse_captures(captures)?)?;

    println!("Query Plan");
    println!("==========");
    println!();
    println!("Input:      {}", tree);

    let normalized = match planner.normalize(&tree) {
        Ok(n) => n,
        Err(e) => return report_failure(Diagnostic::from(&e)),
    };
    println!("Normalized: {}", normalized.tree);
    println!("Signature:  {}", normalized.signature.short_hex());
    println!();

    match planner.compile(&normalized) {
        Ok(plan) => {
            let kind = if plan.is_point_read() { "point read" } else { "query" };
            println!("Command ({kind}, container {}):", plan.container());
            println!();
            println!("{}", plan.render_command(&normalized.parameter_map()));
            Ok(())
        }
        Err(e) => report_failure(Diagnostic::from(&e)),
    }
}

fn report_failure(d: Diagnostic) -> Result<(), Box<dyn std::error::Error>> {
    println!("Rejected: {}", d.code);
    println!("  {}", d.message);
    if let Some(expr) = &d.expression {
        println!("  at: {}", expr);
    }
    Err(format!("query rejected ({})", d.code).into())
}

fn parse_captures(pairs: &[String]) -> Result<BTreeMap<String, Scalar>, String> {
    pairs
        .iter()
        .map(|pair| {
            let (name, raw) = pair
                .split_once('=')
                .ok_or_else(|| format!("capture `{}` is not name=value", pair))?;
            let value = serde_json::from_str::<Value>(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
            Ok((name.trim().to_string(), Scalar::from_json(&value)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::parse_captures;
    use docql_core::types::Scalar;

    #[test]
    fn captures_read_json_then_strings() {
        let caps = parse_captures(&["n=3".into(), "city=London".into(), "s=\"7\"".into()]).unwrap();
        assert_eq!(caps["n"], Scalar::from(3i64));
        assert_eq!(caps["city"], Scalar::from("London"));
        assert_eq!(caps["s"], Scalar::from("7"));
    }

    #[test]
    fn malformed_captures_are_rejected() {
        assert!(parse_captures(&["nope".into()]).is_err());
    }
}
