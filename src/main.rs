// src/main.rs
// Lanewise CLI - ask configured providers, or run a simulated demo

use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use lanewise::backend::{
    Backend, BackendError, BackendSet, CapabilityScores, CostTier, ProviderSpec, Scripted,
    SimulatedBackend,
};
use lanewise::config::{EnvConfig, OrchestratorConfig};
use lanewise::telemetry::TracingSink;
use lanewise::types::{BudgetTier, Evidence};
use lanewise::{AggregatedResponse, LaneName, Orchestrator, QueryClass, QueryPreferences};
use std::sync::Arc;
use std::time::Duration;
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "lanewise")]
#[command(about = "Multi-lane retrieval orchestrator")]
#[command(version)]
struct Cli {
    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer a query using the providers in the config file
    Ask {
        query: String,

        /// Budget tier (fast, standard, thorough); derived from the class by default
        #[arg(long)]
        tier: Option<BudgetTier>,

        /// Query class (simple, technical, research); classified by default
        #[arg(long)]
        class: Option<QueryClass>,

        /// Print the full response as JSON
        #[arg(long)]
        json: bool,
    },

    /// Answer a query against simulated backends
    Demo {
        query: String,

        /// Make every provider in a lane fail (repeatable)
        #[arg(long)]
        fail: Vec<LaneName>,

        /// Make every provider in a lane exceed its budget (repeatable)
        #[arg(long)]
        slow: Vec<LaneName>,

        /// Run the query this many times to exercise the breakers
        #[arg(long, default_value = "1")]
        runs: u32,

        #[arg(long)]
        json: bool,
    },

    /// Validate the configuration and environment
    CheckConfig,
}

fn load_config() -> (EnvConfig, OrchestratorConfig) {
    let env = EnvConfig::from_env();
    let config = OrchestratorConfig::load_with_env(&env);
    (env, config)
}

async fn run_ask(
    query: String,
    tier: Option<BudgetTier>,
    class: Option<QueryClass>,
    json: bool,
) -> Result<()> {
    let (_, config) = load_config();
    let backends = config.http_backends(|name| std::env::var(name).ok())?;
    if backends.is_empty() {
        info!("No providers with endpoints configured; the answer will be degraded");
    }
    let orchestrator = Orchestrator::new(&config, backends, Arc::new(TracingSink))?;

    let prefs = QueryPreferences {
        tier,
        class,
        ..QueryPreferences::default()
    };
    let response = orchestrator.handle(&query, prefs).await?;
    print_response(&response, json)
}

fn demo_backends(fail: &[LaneName], slow: &[LaneName]) -> BackendSet {
    let outcome = |lane: LaneName, ok: Scripted| {
        if fail.contains(&lane) {
            Scripted::Fail(BackendError::Unavailable(format!("{lane} provider is down")))
        } else {
            ok
        }
    };
    let latency = |lane: LaneName, ms: u64| {
        if slow.contains(&lane) {
            Duration::from_secs(30)
        } else {
            Duration::from_millis(ms)
        }
    };
    let backend = |spec: ProviderSpec, ms: u64, ok: Scripted| -> Arc<dyn Backend> {
        let lane = spec.lane;
        Arc::new(SimulatedBackend::new(spec, latency(lane, ms), outcome(lane, ok)))
    };

    BackendSet::new()
        .with(backend(
            ProviderSpec::new("graph", LaneName::KnowledgeGraph, CostTier::Local),
            200,
            Scripted::Evidence(vec![Evidence::new(
                "kg:France/capital",
                "France -> capital -> Paris",
                0.95,
            )]),
        ))
        .with(backend(
            ProviderSpec::new("qdrant", LaneName::Vector, CostTier::Local),
            300,
            Scripted::Evidence(vec![Evidence::new(
                "doc:geography/france#2",
                "Paris is the capital and most populous city of France.",
                0.88,
            )]),
        ))
        .with(backend(
            ProviderSpec::new("search", LaneName::Web, CostTier::Free),
            400,
            Scripted::Evidence(vec![Evidence::new(
                "https://en.wikipedia.org/wiki/Paris",
                "Paris is the capital of France, on the Seine.",
                0.8,
            )]),
        ))
        .with(backend(
            ProviderSpec::new("ollama", LaneName::Llm, CostTier::Local)
                .with_capability(CapabilityScores::uniform(0.6)),
            900,
            Scripted::Answer("The capital of France is Paris.".into()),
        ))
        .with(backend(
            ProviderSpec::new("openai", LaneName::Llm, CostTier::Paid)
                .with_capability(CapabilityScores::uniform(0.9))
                .with_cost(0.01),
            700,
            Scripted::Answer("Paris is the capital of France.".into()),
        ))
}

async fn run_demo(
    query: String,
    fail: Vec<LaneName>,
    slow: Vec<LaneName>,
    runs: u32,
    json: bool,
) -> Result<()> {
    let config = OrchestratorConfig::default();
    let orchestrator =
        Orchestrator::new(&config, demo_backends(&fail, &slow), Arc::new(TracingSink))?;

    for run in 1..=runs.max(1) {
        let response = orchestrator
            .handle(&query, QueryPreferences::default())
            .await?;
        if runs > 1 {
            println!("=== run {run} ===");
        }
        print_response(&response, json)?;
    }

    println!("\nProvider health:");
    for snapshot in orchestrator.health_snapshots() {
        println!(
            "  {:<8} {:<9} failures={} rate={:.2}",
            snapshot.provider.as_str(),
            snapshot.state.to_string(),
            snapshot.consecutive_failures,
            snapshot.failure_rate
        );
    }
    Ok(())
}

fn run_check_config() -> Result<()> {
    let (env, config) = load_config();
    let mut validation = env.validate();
    validation.merge(config.validate());
    println!("{}", validation.report());
    if !validation.is_valid() {
        bail!("configuration has {} error(s)", validation.errors.len());
    }
    Ok(())
}

fn print_response(response: &AggregatedResponse, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(response)?);
        return Ok(());
    }

    println!("{}\n", response.answer);
    for citation in &response.citations {
        println!(
            "  [{}] {} ({}, {}, {:.2})",
            citation.id, citation.snippet, citation.source, citation.lane, citation.confidence
        );
    }
    println!(
        "\nlevel: {}  latency: {}ms  trace: {}",
        response.degradation_level, response.total_latency_ms, response.trace_id
    );
    for (lane, status) in &response.per_lane_status {
        let provider = status
            .provider
            .as_ref()
            .map(|p| p.as_str())
            .unwrap_or("-");
        match status.error {
            Some(kind) => println!(
                "  {:<6} {:<8} {:>5}ms  {} ({})",
                lane.as_str(),
                status.outcome.as_str(),
                status.latency_ms,
                provider,
                kind
            ),
            None => println!(
                "  {:<6} {:<8} {:>5}ms  {}",
                lane.as_str(),
                status.outcome.as_str(),
                status.latency_ms,
                provider
            ),
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env files (global first, then project)
    if let Some(home) = dirs::home_dir() {
        let _ = dotenvy::from_path(home.join(".lanewise/.env"));
    }
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let log_level = if cli.verbose { Level::DEBUG } else { Level::WARN };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Ask {
            query,
            tier,
            class,
            json,
        } => run_ask(query, tier, class, json).await?,
        Commands::Demo {
            query,
            fail,
            slow,
            runs,
            json,
        } => run_demo(query, fail, slow, runs, json).await?,
        Commands::CheckConfig => run_check_config()?,
    }

    Ok(())
}
