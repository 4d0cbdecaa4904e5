mod sync_cmds;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use cardsync_config::AppConfig;

#[derive(Debug, Parser)]
#[command(
    name = "cardsync",
    version,
    about = "Sync dictionary images into flashcard notes"
)]
struct Cli {
    /// Config file; missing means defaults.
    #[arg(long, global = true, default_value = "config/default.toml")]
    config: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Render, upload and substitute images for one or more notes.
    Sync {
        /// JSON file holding a note request or an array of them.
        #[arg(long, value_name = "PATH")]
        input: PathBuf,
        /// Write the outcome JSON here instead of stdout.
        #[arg(long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
    /// Print the stored filename for an image path.
    Filename {
        #[arg(long)]
        dictionary: String,
        path: String,
    },
    /// Print the placeholder token for a dictionary and index.
    Token {
        #[arg(long)]
        dictionary: String,
        #[arg(long)]
        index: usize,
    },
    /// Inspect the local sync record.
    Record {
        #[command(subcommand)]
        command: RecordCommands,
    },
}

#[derive(Debug, Subcommand)]
enum RecordCommands {
    /// List recorded filenames, oldest first.
    List,
    /// Show the path to the record file.
    Path,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = AppConfig::load_from(&cli.config)?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.telemetry.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Sync { input, output } => {
            sync_cmds::run_sync(&config, &input, output.as_deref()).await?;
        }
        Commands::Filename { dictionary, path } => {
            println!("{}", sync_cmds::filename_for(&config, &dictionary, &path));
        }
        Commands::Token { dictionary, index } => {
            println!("{}", sync_cmds::token_for(&dictionary, index));
        }
        Commands::Record { command } => match command {
            RecordCommands::List => {
                let record = sync_cmds::record(&config);
                let entries = record.list().await?;
                for entry in &entries {
                    println!("{entry}");
                }
                eprintln!("({} recorded under {})", entries.len(), record.namespace());
            }
            RecordCommands::Path => {
                println!("{}", sync_cmds::record(&config).path().display());
            }
        },
    }

    Ok(())
}
