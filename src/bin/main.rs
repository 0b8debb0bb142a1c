use std::env;
use std::process::ExitCode;
use std::sync::Arc;
use swift_agent_pipeline::{GeminiService, Message, Pipeline, PipelineConfig};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: swift-pipeline <batch.json> [--rules] [--report <path>]";

struct Args {
    batch: String,
    rules: bool,
    report: Option<String>,
}

fn parse_args() -> Result<Args, String> {
    let mut batch = None;
    let mut rules = false;
    let mut report = None;

    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--rules" => rules = true,
            "--report" => report = Some(args.next().ok_or("--report needs a path")?),
            "-h" | "--help" => return Err(USAGE.to_string()),
            other if other.starts_with("--") => return Err(format!("unknown flag {}", other)),
            other => batch = Some(other.to_string()),
        }
    }

    Ok(Args {
        batch: batch.ok_or_else(|| USAGE.to_string())?,
        rules,
        report,
    })
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = match parse_args() {
        Ok(args) => args,
        Err(message) => {
            eprintln!("{}", message);
            return ExitCode::from(2);
        }
    };

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Pipeline failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let config = PipelineConfig::from_env()?;
    let raw = tokio::fs::read_to_string(&args.batch).await?;
    let batch: Vec<Message> = serde_json::from_str(&raw)?;

    info!(path = %args.batch, messages = batch.len(), rules = args.rules, "Loaded batch");

    let service = Arc::new(GeminiService::from_env()?);
    let mut builder = Pipeline::builder(service, config);
    if args.rules {
        builder = builder
            .with_rule_evaluator()
            .with_rule_classifiers()
            .with_static_planner();
    }

    let outcome = builder.build()?.run(batch).await?;

    if let Some(path) = &args.report {
        tokio::fs::write(path, outcome.report.render_text()).await?;
        info!(path = %path, "Report saved");
    }

    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}
