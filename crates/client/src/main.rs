//! `quarry` command-line tool: explain, analyze, derive metadata for, or run a JSON plan.

use std::error::Error;
use std::path::{Path, PathBuf};

use arrow::util::pretty::pretty_format_batches;
use clap::{Args, Parser, Subcommand, ValueEnum};
use quarry_client::Engine;
use quarry_common::EngineConfig;
use quarry_planner::{PlanNode, Value};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "quarry", version, about = "Inspect and run quarry operator plans")]
struct Cli {
    /// Engine configuration file (JSON); `QUARRY_*` variables override it.
    #[arg(long, global = true, env = "QUARRY_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct PlanArgs {
    /// Catalog file: a JSON array of table definitions, optionally with inline rows.
    #[arg(long)]
    catalog: Option<PathBuf>,

    /// Operator plan (JSON).
    #[arg(long)]
    plan: PathBuf,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the plan tree.
    Explain(PlanArgs),
    /// Print the structural signature, used columns and partition values.
    Analyze(PlanArgs),
    /// Print the plan tree annotated with row count, cost and memory estimates.
    Metadata(PlanArgs),
    /// Execute the plan against the catalog's inline rows.
    Run {
        #[command(flatten)]
        plan: PlanArgs,
        #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

fn load_engine(config: Option<&Path>, args: &PlanArgs) -> Result<(Engine, PlanNode), Box<dyn Error>> {
    let config = match config {
        Some(path) => EngineConfig::load_from_json(path)?,
        None => EngineConfig::from_env(),
    };
    let engine = Engine::new(config)?;
    if let Some(catalog) = &args.catalog {
        engine.load_catalog(catalog)?;
    }
    let plan = PlanNode::from_json(&std::fs::read_to_string(&args.plan)?)?;
    Ok((engine, plan))
}

fn json_value(v: &Value) -> serde_json::Value {
    use serde_json::Value as Json;
    match v {
        Value::Null => Json::Null,
        Value::Boolean(b) => Json::Bool(*b),
        Value::Int32(x) => Json::from(*x),
        Value::Int64(x) => Json::from(*x),
        Value::Float32(x) => serde_json::Number::from_f64(f64::from(*x)).map_or(Json::Null, Json::Number),
        Value::Float64(x) => serde_json::Number::from_f64(*x).map_or(Json::Null, Json::Number),
        Value::Utf8(s) => Json::String(s.clone()),
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .try_init();

    let cli = Cli::parse();
    let config = cli.config.as_deref();
    match cli.command {
        Command::Explain(args) => {
            let (engine, plan) = load_engine(config, &args)?;
            print!("{}", engine.explain(&plan));
        }
        Command::Analyze(args) => {
            let (engine, plan) = load_engine(config, &args)?;
            let shape = engine.analyze(&plan);
            let partitions = shape
                .partition_values()
                .iter()
                .map(|(id, values)| (id.0.to_string(), serde_json::json!(values)))
                .collect::<serde_json::Map<_, _>>();
            let report = serde_json::json!({
                "query_name": shape.query_name(),
                "tables": shape.tables(),
                "used_columns": shape.used_columns().values().cloned().collect::<Vec<_>>(),
                "partition_values": partitions,
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Metadata(args) => {
            let (engine, plan) = load_engine(config, &args)?;
            print!("{}", engine.explain_with_metadata(&plan)?);
        }
        Command::Run { plan: args, format } => {
            let (engine, plan) = load_engine(config, &args)?;
            let runtime = tokio::runtime::Runtime::new()?;
            let batch = runtime.block_on(engine.collect_batch(&plan))?;
            match format {
                OutputFormat::Table => println!("{}", pretty_format_batches(&[batch])?),
                OutputFormat::Json => {
                    let rows = quarry_execution::rows_from_batch(&batch)?;
                    let rows = rows
                        .iter()
                        .map(|r| r.iter().map(json_value).collect::<Vec<_>>())
                        .collect::<Vec<_>>();
                    println!("{}", serde_json::to_string_pretty(&rows)?);
                }
            }
        }
    }
    Ok(())
}
