//! `attest` binary: grade an output against a declared test case.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

use attest_core::TestCase;
use attest_runtime::{AssertionEngine, EngineConfig, RunAssertionsParams, TracingTelemetry};

#[derive(Parser)]
#[command(name = "attest")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Grade LLM outputs against declared assertions", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate one output against a test case and print the grading
    /// result as JSON
    Eval {
        /// Test case YAML (vars, assert list, threshold, options)
        #[arg(long)]
        test: PathBuf,

        /// Output text to grade, or a path when --output-file is set
        #[arg(long)]
        output: String,

        /// Treat --output as a file path; JSON files are parsed as
        /// structured output
        #[arg(long)]
        output_file: bool,

        /// Prompt the output was generated from
        #[arg(long)]
        prompt: Option<String>,

        /// Base path for file:// assertion values (defaults to the test
        /// file's directory)
        #[arg(long)]
        base_path: Option<PathBuf>,

        /// Maximum assertions evaluated concurrently
        #[arg(long)]
        max_concurrency: Option<usize>,

        /// Observed latency in milliseconds; omit for cached results
        #[arg(long)]
        latency_ms: Option<u64>,

        /// Observed completion cost
        #[arg(long)]
        cost: Option<f64>,

        /// Token log-probabilities as a JSON array, e.g. "[-0.1, -0.4]"
        #[arg(long)]
        log_probs: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Eval {
            test,
            output,
            output_file,
            prompt,
            base_path,
            max_concurrency,
            latency_ms,
            cost,
            log_probs,
        } => {
            eval(
                test,
                output,
                output_file,
                prompt,
                base_path,
                max_concurrency,
                latency_ms,
                cost,
                log_probs,
            )
            .await
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn eval(
    test_path: PathBuf,
    output: String,
    output_file: bool,
    prompt: Option<String>,
    base_path: Option<PathBuf>,
    max_concurrency: Option<usize>,
    latency_ms: Option<u64>,
    cost: Option<f64>,
    log_probs: Option<String>,
) -> Result<()> {
    let test_yaml = fs::read_to_string(&test_path)
        .with_context(|| format!("reading test case {}", test_path.display()))?;
    let test: TestCase = serde_yaml::from_str(&test_yaml)
        .with_context(|| format!("parsing test case {}", test_path.display()))?;

    let output = load_output(&output, output_file)?;
    let log_probs: Option<Vec<f64>> = log_probs
        .as_deref()
        .map(serde_json::from_str)
        .transpose()
        .context("parsing --log-probs")?;

    let base_path = base_path
        .or_else(|| test_path.parent().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("."));
    let mut config = EngineConfig::from_env().with_base_path(base_path);
    if let Some(width) = max_concurrency {
        config = config.with_max_concurrency(width);
    }

    let engine = AssertionEngine::builder()
        .config(config)
        .telemetry(std::sync::Arc::new(TracingTelemetry))
        .build();

    let result = engine
        .run_assertions(RunAssertionsParams {
            prompt: prompt.as_deref(),
            provider: None,
            test: &test,
            output: &output,
            latency_ms,
            log_probs: log_probs.as_deref(),
            cost,
        })
        .await
        .context("assertion run aborted")?;

    println!("{}", serde_json::to_string_pretty(&result)?);
    if !result.pass {
        std::process::exit(1);
    }
    Ok(())
}

fn load_output(output: &str, from_file: bool) -> Result<Value> {
    if !from_file {
        return Ok(Value::String(output.to_string()));
    }
    let contents = fs::read_to_string(output).with_context(|| format!("reading output {output}"))?;
    if output.ends_with(".json") {
        serde_json::from_str(&contents).with_context(|| format!("parsing output {output}"))
    } else {
        Ok(Value::String(contents))
    }
}
