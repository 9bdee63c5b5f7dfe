//! City Scout CLI
//!
//! Runs the research scenarios, calls single tools directly, or prints the
//! agent tree.

use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;

use city_scout::agents::{Agent, ToolCallingAgent};
use city_scout::ai::Provider;
use city_scout::config::{secrets, Credentials, ScoutConfig};
use city_scout::report::{self, OutputFormat as ReportFormat};
use city_scout::scenarios::{self, MapOutcome};
use city_scout::tools::{VisitWebpageTool, WebSearchTool};

/// Exit code for a map run that used its whole step budget
const EXIT_BUDGET_EXHAUSTED: i32 = 2;

#[derive(Parser)]
#[command(name = "city-scout")]
#[command(about = "Researches the most populated cities and maps them")]
#[command(version)]
struct Cli {
    /// Config file (defaults to <config_dir>/city-scout/config.toml)
    #[arg(short, long, env = "CITY_SCOUT_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum OutputFormat {
    Text,
    Json,
}

impl From<OutputFormat> for ReportFormat {
    fn from(format: OutputFormat) -> Self {
        match format {
            OutputFormat::Text => ReportFormat::Text,
            OutputFormat::Json => ReportFormat::Json,
        }
    }
}

#[derive(Subcommand, Clone)]
enum Commands {
    /// Table of the 10 most populated cities
    Cities,

    /// Map of the same cities, checked by a vision model
    Map,

    /// Both runs, table first
    All,

    /// Run one web search
    Search {
        /// Search query
        query: String,
    },

    /// Fetch one page as Markdown
    Visit {
        /// Page URL
        url: String,
    },

    /// Show the manager and the agents it delegates to
    Agents,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    city_scout::load_dotenv();
    city_scout::init_logging(cli.verbose);

    match run_command(cli).await {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            process::exit(1);
        }
    }
}

async fn run_command(cli: Cli) -> anyhow::Result<i32> {
    let config = ScoutConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    let format = cli.format;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, stopping after the current step");
            on_interrupt.cancel();
        }
    });

    match cli.command.unwrap_or(Commands::All) {
        Commands::Cities => {
            let credentials = Credentials::from_env()?;
            run_cities(&config, &credentials, format, cancel).await?;
            Ok(0)
        }

        Commands::Map => {
            let credentials = Credentials::from_env()?;
            run_map(&config, &credentials, format, cancel).await
        }

        Commands::All => {
            let credentials = Credentials::from_env()?;
            run_cities(&config, &credentials, format, cancel.clone()).await?;
            run_map(&config, &credentials, format, cancel).await
        }

        Commands::Search { query } => {
            let key = secrets::tavily_key_from_env()?;
            let tool = WebSearchTool::new(&key, Duration::from_secs(config.search.timeout_secs))?
                .with_endpoint(&config.search.endpoint);
            let results = tool.search(&query).await?;
            let value: serde_json::Value =
                serde_json::from_str(&results).context("Search results were not JSON")?;
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(0)
        }

        Commands::Visit { url } => {
            let tool = VisitWebpageTool::new(
                Duration::from_secs(config.fetch.timeout_secs),
                config.fetch.max_chars,
            )?;
            let text = tool.visit(&url).await;
            match format {
                OutputFormat::Json => {
                    println!("{}", serde_json::json!({ "url": url, "content": text }))
                }
                OutputFormat::Text => println!("{}", text),
            }
            Ok(0)
        }

        Commands::Agents => {
            let credentials = Credentials::from_env()?;
            let manager = build_manager(&config, &credentials)?;
            let structure = manager.structure();
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&structure)?),
                OutputFormat::Text => print!("{}", structure.visualize()),
            }
            Ok(0)
        }
    }
}

fn build_manager(
    config: &ScoutConfig,
    credentials: &Credentials,
) -> anyhow::Result<ToolCallingAgent> {
    let model: Arc<dyn Provider> = scenarios::build_model(config, credentials)?;
    let web_agent = scenarios::build_web_agent(
        model.clone(),
        scenarios::build_research_tools(config, credentials)?,
        config,
    )
    .context("Failed to build web agent")?;

    let manager = scenarios::build_map_manager(
        model.clone(),
        model,
        Arc::new(web_agent),
        scenarios::build_python_executor(config),
        config,
    )
    .context("Failed to build manager agent")?;
    Ok(manager)
}

async fn run_cities(
    config: &ScoutConfig,
    credentials: &Credentials,
    format: OutputFormat,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let model = scenarios::build_model(config, credentials)?;
    let tools = scenarios::build_research_tools(config, credentials)?;
    let agent = scenarios::build_cities_agent(model, tools, config)
        .context("Failed to build cities agent")?;

    let outcome = scenarios::run_cities(&agent, cancel)
        .await
        .context("City research run failed")?;

    report::print_answer(&outcome.answer, format.into())?;
    println!("{}", report::format_usage(outcome.steps_taken, &outcome.token_usage));
    Ok(())
}

async fn run_map(
    config: &ScoutConfig,
    credentials: &Credentials,
    format: OutputFormat,
    cancel: CancellationToken,
) -> anyhow::Result<i32> {
    let manager = build_manager(config, credentials)?;
    print!("{}", manager.structure().visualize());

    let artifact = scenarios::artifact_location(config);
    let outcome = scenarios::run_map(&manager, &artifact, cancel)
        .await
        .context("Map run failed")?;

    match outcome {
        MapOutcome::Accepted { path, outcome } => {
            match format {
                OutputFormat::Json => println!(
                    "{}",
                    serde_json::json!({
                        "status": "accepted",
                        "artifact": path,
                        "answer": outcome.answer,
                        "steps": outcome.steps_taken,
                        "token_usage": outcome.token_usage,
                    })
                ),
                OutputFormat::Text => {
                    println!("Map accepted: {}", path.display());
                    println!("{}", report::format_usage(outcome.steps_taken, &outcome.token_usage));
                }
            }
            Ok(0)
        }
        MapOutcome::BudgetExhausted { max_steps, last_error } => {
            match format {
                OutputFormat::Json => println!(
                    "{}",
                    serde_json::json!({
                        "status": "budget_exhausted",
                        "max_steps": max_steps,
                        "last_error": last_error,
                    })
                ),
                OutputFormat::Text => {
                    println!("No accepted map after {} steps", max_steps);
                    if let Some(error) = last_error {
                        println!("Last error: {}", error);
                    }
                }
            }
            Ok(EXIT_BUDGET_EXHAUSTED)
        }
    }
}
