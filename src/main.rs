use std::path::PathBuf;

use clap::{Parser, Subcommand};
use focusgate::Result;
use focusgate::commands::{classify, serve, show_status};
use focusgate::config::{run_interactive_config, show_config};

#[derive(Parser)]
#[command(name = "focusgate")]
#[command(about = "Semantic relevance engine deciding whether page content is distracting")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configure the embedding backend, windowing and default keywords
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Classify a document and print the result as JSON
    Classify {
        /// Text to classify. Read from stdin when neither TEXT nor --file is given
        #[arg(conflicts_with = "file")]
        text: Option<String>,
        /// Read the text to classify from a file
        #[arg(long)]
        file: Option<PathBuf>,
        /// Comma-separated blocked topics, overriding the configured ones
        #[arg(long, value_delimiter = ',')]
        blocked: Option<Vec<String>>,
        /// Comma-separated allowed topics, overriding the configured ones
        #[arg(long, value_delimiter = ',')]
        allowed: Option<Vec<String>>,
    },
    /// Load the embedding model and show the engine status
    Status,
    /// Serve classification requests as JSON lines on stdio
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    // stdout carries command output and the host protocol
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Config { show } => {
            if show {
                show_config()?;
            } else {
                run_interactive_config()?;
            }
        }
        Commands::Classify {
            text,
            file,
            blocked,
            allowed,
        } => {
            classify(text, file.as_deref(), blocked, allowed).await?;
        }
        Commands::Status => {
            show_status().await?;
        }
        Commands::Serve => {
            serve().await?;
        }
    }

    Ok(())
}
