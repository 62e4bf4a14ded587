//! Deepwell CLI: single model calls and deep research runs from the terminal.

mod commands;

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Deepwell: resilient LLM calls and multi-phase deep research
#[derive(Parser, Debug)]
#[command(name = "deepwell", version, about, long_about = None)]
struct Cli {
    /// Workspace directory (searched for .deepwell/config.toml)
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// List registered models and their supported parameters
    Models,
    /// Invoke one model once
    Invoke {
        /// Registered model id
        #[arg(short, long)]
        model: String,
        /// System instruction (prompt is sent as-is when omitted)
        #[arg(short, long)]
        system: Option<String>,
        #[arg(long)]
        temperature: Option<f32>,
        #[arg(long)]
        top_p: Option<f32>,
        #[arg(long)]
        top_k: Option<u32>,
        #[arg(long)]
        max_tokens: Option<u32>,
        /// Reasoning effort: minimal, low, medium, high
        #[arg(long, value_parser = commands::parse_effort)]
        effort: Option<deepwell_core::ReasoningEffort>,
        /// Enable provider-side web search
        #[arg(long)]
        web_search: bool,
        /// Print the full response as JSON
        #[arg(long)]
        json: bool,
        /// The prompt
        prompt: String,
    },
    /// Run the four-phase research pipeline over a query
    Research {
        /// concise, balanced or comprehensive
        #[arg(short, long)]
        depth: Option<deepwell_core::DepthTier>,
        /// Maximum number of sub-questions
        #[arg(long)]
        questions: Option<usize>,
        /// Sub-questions answered concurrently
        #[arg(long)]
        parallel: Option<usize>,
        /// Disable provider-side grounding
        #[arg(long)]
        no_grounding: bool,
        /// Original instruction for the final deliverable (defaults to the query)
        #[arg(long)]
        instruction: Option<String>,
        /// Extra directive applied while finalizing
        #[arg(long)]
        post_process: Option<String>,
        /// Write the Markdown report to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Print the full report as JSON
        #[arg(long)]
        json: bool,
        /// The research query
        query: String,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Subcommand, Debug)]
enum ConfigAction {
    /// Create a default configuration file in the workspace
    Init,
    /// Show the merged configuration
    Show,
    /// Validate the merged configuration and report warnings
    Validate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Set up tracing: human-readable stderr + JSON file logging
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(filter));

    let log_dir = directories::ProjectDirs::from("dev", "deepwell", "deepwell")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "deepwell.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    commands::handle_command(cli.command, &workspace, cli.quiet).await
}
