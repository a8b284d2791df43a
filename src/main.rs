use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use cinebrain::commands::{build_index, recommend, show_status};
use cinebrain::config::{run_interactive_config, show_config};
use cinebrain::engine::ItemFilter;

#[derive(Parser)]
#[command(name = "cinebrain")]
#[command(about = "Content-based movie recommendations from local embeddings")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configure Ollama connection and settings
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Embed a catalog (JSON array or JSON Lines) into the index
    Build {
        /// Path to the catalog file
        catalog: PathBuf,
        /// Discard the existing index and embed everything again
        #[arg(long)]
        full: bool,
    },
    /// Recommend movies similar to a description
    Recommend {
        /// Free-text description of what to watch
        query: String,
        /// Number of recommendations (defaults to the configured value)
        #[arg(short, long)]
        k: Option<usize>,
        /// Only include these genres (repeatable, any may match)
        #[arg(long = "genre")]
        genres: Vec<String>,
        /// Earliest release year
        #[arg(long)]
        min_year: Option<i32>,
        /// Latest release year
        #[arg(long)]
        max_year: Option<i32>,
        /// Minimum average rating (0-10)
        #[arg(long)]
        min_rating: Option<f64>,
    },
    /// Show provider and index status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
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
        Commands::Build { catalog, full } => {
            build_index(&catalog, full).await?;
        }
        Commands::Recommend {
            query,
            k,
            genres,
            min_year,
            max_year,
            min_rating,
        } => {
            let filter = ItemFilter {
                genres,
                min_year,
                max_year,
                min_rating,
            };
            recommend(&query, k, filter).await?;
        }
        Commands::Status => {
            show_status().await?;
        }
    }

    Ok(())
}
