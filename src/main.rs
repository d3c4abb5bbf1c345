use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;
use futures::stream::{self, StreamExt};
use serde_json::Value;

use product_scout::guess::OpenAiGuesser;
use product_scout::{
    EngineConfig, Extraction, ExtractionError, Extractor, FailureResponse, HttpSource, ProductResponse,
    StaticDocument, StrategyRegistry,
};

#[derive(Debug, Parser)]
#[command(name = "product-scout")]
#[command(about = "Extract product name, price and image from e-commerce pages")]
struct Cli {
    /// Product page URLs
    #[arg(required = true)]
    urls: Vec<String>,

    /// Read the page from a local HTML file instead of fetching it (one URL only)
    #[arg(long, value_name = "FILE")]
    html: Option<PathBuf>,

    /// Extra strategy definitions (JSON array), registered after the built-ins
    #[arg(long = "strategies", value_name = "FILE")]
    strategy_files: Vec<PathBuf>,

    /// Finish every chain with an LLM guess (needs OPENAI_API_KEY)
    #[arg(long)]
    llm: bool,

    /// Pages extracted at the same time
    #[arg(long, default_value_t = 4, value_parser = clap::value_parser!(u16).range(1..))]
    concurrency: u16,

    /// Print the full extraction (per-strategy outcomes) instead of the flat payload
    #[arg(long)]
    details: bool,

    /// Log as JSON lines
    #[arg(long, env = "SCOUT_JSON_LOGS")]
    json_logs: bool,
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("product_scout=info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(llm: bool) -> anyhow::Result<EngineConfig> {
    if llm {
        let config = EngineConfig::from_lookup(|key| match key {
            "SCOUT_LLM_ENABLED" => Some("true".to_string()),
            other => std::env::var(other).ok(),
        })?;
        return Ok(config);
    }
    Ok(EngineConfig::from_env()?)
}

fn build_extractor(cli: &Cli, config: &EngineConfig) -> anyhow::Result<Extractor> {
    let mut registry = StrategyRegistry::builtin(config.strategy_budget)?;
    for path in &cli.strategy_files {
        registry.load_file(path, config.strategy_budget)?;
    }

    let mut extractor = Extractor::new(registry, config);
    if let Some(guess) = &config.guess {
        extractor = extractor.with_guesser(Arc::new(OpenAiGuesser::new(guess)?));
    }
    Ok(extractor)
}

fn render(result: &Result<Extraction, ExtractionError>, details: bool) -> anyhow::Result<Value> {
    let value = match result {
        Ok(extraction) if details => serde_json::to_value(extraction)?,
        Ok(extraction) => serde_json::to_value(ProductResponse::from(extraction))?,
        Err(err) => serde_json::to_value(FailureResponse::from(err))?,
    };
    Ok(value)
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let config = load_config(cli.llm)?;
    let extractor = build_extractor(&cli, &config)?;

    if let Some(path) = &cli.html {
        let [url] = cli.urls.as_slice() else {
            bail!("--html takes exactly one URL (the page's address), got {}", cli.urls.len());
        };
        let html = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let document = StaticDocument::from_parts(url, html)?;
        let result = extractor.extract(url, document).await;
        println!("{}", render(&result, cli.details)?);
        return Ok(if result.is_ok() { ExitCode::SUCCESS } else { ExitCode::FAILURE });
    }

    let source = HttpSource::new(config.fetch_timeout, &config.user_agent)?;
    let results: Vec<Result<Extraction, ExtractionError>> = stream::iter(cli.urls.iter())
        .map(|url| extractor.extract_from(url, &source))
        .buffered(usize::from(cli.concurrency))
        .collect()
        .await;

    let mut failures = 0;
    for result in &results {
        if result.is_err() {
            failures += 1;
        }
        println!("{}", render(result, cli.details)?);
    }

    tracing::info!(total = results.len(), failures, "done");
    Ok(if failures == results.len() { ExitCode::FAILURE } else { ExitCode::SUCCESS })
}
