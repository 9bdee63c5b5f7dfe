//! The two research runs: a ranked city table, and the same data drawn as a map
//!
//! Construction takes providers and executors as trait objects so the runs can
//! be driven by scripted fakes.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::agents::{Agent, AgentError, PlotVerifier, RunOutcome, ToolCallingAgent};
use crate::ai::{CompletionOptions, Provider, ProviderError, ProviderFactory};
use crate::config::{ConfigError, Credentials, ScoutConfig};
use crate::tools::{
    CodeExecutionTool, CodeExecutor, ImportPolicy, PythonExecutor, Tool, ToolError,
    VisitWebpageTool, WebSearchTool,
};

pub const REQUEST_CITIES: &str = "Return a sorted list of the 10 most populated cities in the world, \
along with their population count (in millions with two decimal places), \
and their approximate daily temperature in December at their location.";

pub const WEB_AGENT_NAME: &str = "web_agent";
pub const MAP_MANAGER_NAME: &str = "manager";

#[derive(Debug, thiserror::Error)]
pub enum ScenarioError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Tool(#[from] ToolError),
    #[error(transparent)]
    Agent(#[from] AgentError),
    #[error("Could not remove stale artifact {path}: {reason}")]
    StaleArtifact { path: String, reason: String },
}

/// How a map run ended
#[derive(Debug)]
pub enum MapOutcome {
    Accepted { path: PathBuf, outcome: RunOutcome },
    BudgetExhausted { max_steps: usize, last_error: Option<String> },
}

/// Instructions for the map run, built on the city request
pub fn map_task(artifact: &Path) -> String {
    let file = artifact
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| artifact.display().to_string());

    format!(
        r#"{request}

Then make me a spatial map of the world using px.scatter_map, with the biggest cities
represented as scatter points of size depending on population count and color depending
on the average temperature in December.
Label all cities and ensure that the text of the labels don't overlap.
The title of the map is "Top 10 most populated cities with December temperatures".
The title must be on the top (y-coordinate) and be center (x-coordinate).
Save the map to {file}, then return it!

Here's an example of how to plot and return a map:
import plotly.express as px
df = px.data.carshare()
fig = px.scatter_map(df, lat="centroid_lat", lon="centroid_lon", text="name", color="peak_hour",
     color_continuous_scale=px.colors.sequential.Magma_r, size_max=15, zoom=1)
fig.write_image("{file}")

Then call final_answer with the path of the saved map.

Do not invent any numbers! You must only use numbers sourced from the internet."#,
        request = REQUEST_CITIES,
        file = file
    )
}

/// Where the artifact lands: relative paths resolve against the sandbox directory
pub fn artifact_location(config: &ScoutConfig) -> PathBuf {
    let path = &config.check.artifact_path;
    match &config.sandbox.working_dir {
        Some(dir) if path.is_relative() => dir.join(path),
        _ => path.clone(),
    }
}

pub fn completion_options(config: &ScoutConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: config.model.temperature,
        max_tokens: Some(config.model.max_completion_tokens),
        top_p: config.model.top_p,
        stop: config.model.stop.clone(),
    }
}

pub fn build_model(
    config: &ScoutConfig,
    credentials: &Credentials,
) -> Result<Arc<dyn Provider>, ScenarioError> {
    let provider = ProviderFactory::create(
        config.provider_kind()?,
        Some(credentials.openai_api_key.as_str()),
        Some(config.model.model_id.as_str()),
        config.model.api_base.as_deref(),
        Duration::from_secs(config.model.timeout_secs),
    )?;
    tracing::info!("Using model {} via {}", provider.model(), provider.name());
    Ok(provider)
}

/// `web_search` and `visit_webpage`, configured from settings
pub fn build_research_tools(
    config: &ScoutConfig,
    credentials: &Credentials,
) -> Result<Vec<Arc<dyn Tool>>, ScenarioError> {
    let search = WebSearchTool::new(
        &credentials.tavily_api_key,
        Duration::from_secs(config.search.timeout_secs),
    )?
    .with_endpoint(&config.search.endpoint);
    let visit = VisitWebpageTool::new(
        Duration::from_secs(config.fetch.timeout_secs),
        config.fetch.max_chars,
    )?;
    Ok(vec![Arc::new(search) as Arc<dyn Tool>, Arc::new(visit)])
}

pub fn build_python_executor(config: &ScoutConfig) -> Arc<dyn CodeExecutor> {
    let policy = ImportPolicy::new(config.sandbox.authorized_imports.as_slice());
    let mut executor = PythonExecutor::new(
        &config.sandbox.python_bin,
        policy,
        Duration::from_secs(config.sandbox.timeout_secs),
    );
    if let Some(dir) = &config.sandbox.working_dir {
        executor = executor.with_working_dir(dir);
    }
    Arc::new(executor)
}

/// Single agent for the city table
pub fn build_cities_agent(
    model: Arc<dyn Provider>,
    tools: Vec<Arc<dyn Tool>>,
    config: &ScoutConfig,
) -> Result<ToolCallingAgent, AgentError> {
    tools
        .into_iter()
        .fold(ToolCallingAgent::builder(model), |b, t| b.tool(t))
        .max_steps(config.agents.web_max_steps)
        .verbosity(config.agents.verbosity)
        .options(completion_options(config))
        .build()
}

/// Worker the map manager delegates research to
pub fn build_web_agent(
    model: Arc<dyn Provider>,
    tools: Vec<Arc<dyn Tool>>,
    config: &ScoutConfig,
) -> Result<ToolCallingAgent, AgentError> {
    tools
        .into_iter()
        .fold(ToolCallingAgent::builder(model), |b, t| b.tool(t))
        .name(WEB_AGENT_NAME)
        .description("Runs web searches for you.")
        .max_steps(config.agents.web_max_steps)
        .verbosity(config.agents.verbosity)
        .options(completion_options(config))
        .build()
}

/// Manager with no research tools of its own: it delegates to `web_agent`,
/// runs allow-listed Python and must pass the plot check before it finishes
pub fn build_map_manager(
    model: Arc<dyn Provider>,
    vision: Arc<dyn Provider>,
    web_agent: Arc<dyn Agent>,
    executor: Arc<dyn CodeExecutor>,
    config: &ScoutConfig,
) -> Result<ToolCallingAgent, AgentError> {
    let artifact = artifact_location(config);
    let verifier = PlotVerifier::new(vision, artifact.clone(), config.check.verdict_mode);

    ToolCallingAgent::builder(model)
        .name(MAP_MANAGER_NAME)
        .description("Researches the largest cities and maps them.")
        .tool(Arc::new(CodeExecutionTool::new(executor)))
        .managed_agent(web_agent)
        .planning_interval(config.agents.planning_interval)
        .verbosity(config.agents.verbosity)
        .max_steps(config.agents.manager_max_steps)
        .final_answer_check(Arc::new(verifier))
        .artifact_path(artifact)
        .options(completion_options(config))
        .build()
}

/// Delete an artifact left by an earlier run so it can never be validated
pub async fn remove_stale_artifact(path: &Path) -> Result<bool, ScenarioError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {
            tracing::info!("Removed stale artifact {:?}", path);
            Ok(true)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(ScenarioError::StaleArtifact {
            path: path.display().to_string(),
            reason: e.to_string(),
        }),
    }
}

pub async fn run_cities(
    agent: &ToolCallingAgent,
    cancel: CancellationToken,
) -> Result<RunOutcome, ScenarioError> {
    Ok(agent.run_with_cancellation(REQUEST_CITIES, cancel).await?)
}

/// Run the map manager. Budget exhaustion is an outcome, not an error.
pub async fn run_map(
    manager: &ToolCallingAgent,
    artifact: &Path,
    cancel: CancellationToken,
) -> Result<MapOutcome, ScenarioError> {
    remove_stale_artifact(artifact).await?;

    match manager
        .run_with_cancellation(&map_task(artifact), cancel)
        .await
    {
        Ok(outcome) => {
            let path = outcome
                .answer
                .artifact_path()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| artifact.to_path_buf());
            Ok(MapOutcome::Accepted { path, outcome })
        }
        Err(AgentError::StepBudgetExhausted {
            max_steps,
            last_error,
        }) => {
            tracing::warn!("Map run used all {} steps without an accepted plot", max_steps);
            Ok(MapOutcome::BudgetExhausted {
                max_steps,
                last_error,
            })
        }
        Err(e) => Err(e.into()),
    }
}
