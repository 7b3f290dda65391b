//! simdex CLI
//!
//! Main entry point for the simdex command-line tool.
//! Maintains a similarity index over an item corpus and searches it.

mod commands;

use clap::{Parser, Subcommand};
use commands::{
    AddCommand, DeleteCommand, ImportCommand, InitCommand, RebuildCommand, SearchCommand,
    StatsCommand, UpdateCommand,
};
use simdex_core::{config::AppConfig, logging, AppResult};
use std::path::PathBuf;

/// simdex - mutable similarity index over an item corpus
#[derive(Parser, Debug)]
#[command(name = "simdex")]
#[command(about = "Mutable similarity index over an item corpus", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to workspace directory (default: current directory)
    #[arg(short, long, global = true, env = "SIMDEX_WORKSPACE")]
    workspace: Option<PathBuf>,

    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Corpus to operate on
    #[arg(long, global = true, env = "SIMDEX_CORPUS")]
    corpus: Option<String>,

    /// Embedding provider (mock, ollama)
    #[arg(short, long, global = true, env = "SIMDEX_PROVIDER")]
    provider: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, env = "RUST_LOG")]
    log_level: Option<String>,

    /// Enable verbose output (sets log level to debug)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Disable colored output
    #[arg(long, global = true, env = "NO_COLOR")]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the configuration of a corpus
    Init(InitCommand),

    /// Add an item
    Add(AddCommand),

    /// Replace an item and rebuild the index
    Update(UpdateCommand),

    /// Remove an item
    Delete(DeleteCommand),

    /// Find the items closest to a query
    Search(SearchCommand),

    /// Bulk-load items from a JSON file
    Import(ImportCommand),

    /// Re-embed the whole corpus
    Rebuild(RebuildCommand),

    /// Show corpus and index statistics
    Stats(StatsCommand),
}

#[tokio::main]
async fn main() -> AppResult<()> {
    // Parse command-line arguments first (needed for logging config)
    let cli = Cli::parse();

    // Load base configuration from environment and workspace config file
    let mut config = AppConfig::load()?;
    if let Some(path) = &cli.config {
        config = config.merge_yaml(path)?;
    }

    // Apply CLI overrides
    let config = config.with_overrides(
        cli.workspace,
        cli.config,
        cli.corpus,
        cli.provider,
        cli.log_level,
        cli.verbose,
        cli.no_color,
    );
    config.validate()?;

    // Initialize logging with final configuration
    logging::init_logging(config.log_level.as_deref(), config.no_color, config.log_format)?;

    tracing::info!("simdex starting");
    tracing::debug!("Workspace: {:?}", config.workspace);
    tracing::debug!("Corpus: {}", config.corpus);

    config.ensure_state_dir()?;

    let command_name = match &cli.command {
        Commands::Init(_) => "init",
        Commands::Add(_) => "add",
        Commands::Update(_) => "update",
        Commands::Delete(_) => "delete",
        Commands::Search(_) => "search",
        Commands::Import(_) => "import",
        Commands::Rebuild(_) => "rebuild",
        Commands::Stats(_) => "stats",
    };
    let _span = tracing::info_span!("command", name = command_name).entered();

    // Route to command handlers
    let result = match cli.command {
        Commands::Init(cmd) => cmd.execute(&config).await,
        Commands::Add(cmd) => cmd.execute(&config).await,
        Commands::Update(cmd) => cmd.execute(&config).await,
        Commands::Delete(cmd) => cmd.execute(&config).await,
        Commands::Search(cmd) => cmd.execute(&config).await,
        Commands::Import(cmd) => cmd.execute(&config).await,
        Commands::Rebuild(cmd) => cmd.execute(&config).await,
        Commands::Stats(cmd) => cmd.execute(&config).await,
    };

    match &result {
        Ok(_) => tracing::info!("Command completed successfully"),
        Err(e) => tracing::error!(kind = %e.kind(), "Command failed: {}", e),
    }

    result
}
