//! City Scout - a web research agent
//! Searches the web for the largest cities, tabulates them and maps them

// Model providers
pub mod ai;

// Agent loop, delegation and answer checks
pub mod agents;

// Settings and credentials
pub mod config;

// Research and code tools
pub mod tools;

// Terminal output
pub mod report;

// Research runs
pub mod scenarios;

/// Install the global subscriber. `RUST_LOG` wins over `verbose`.
pub fn init_logging(verbose: bool) {
    let default = if verbose {
        "city_scout=debug"
    } else {
        "city_scout=info"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));

    // A second init (tests, embedding) is harmless
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .try_init();
}

/// Load `.env` from the working directory or its parents, if there is one
pub fn load_dotenv() {
    if let Err(e) = dotenvy::dotenv() {
        tracing::debug!("No .env file found or error loading: {}", e);
    }
}
