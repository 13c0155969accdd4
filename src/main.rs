use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use pdf_qa::commands::{ask_question, ingest_documents, load_config, show_status};
use pdf_qa::config::{get_config_dir, run_interactive_config, show_config};

#[derive(Parser)]
#[command(name = "pdf-qa")]
#[command(about = "Ask questions about your PDF documents")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configure the embedding model and answer generation
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Add PDF files to the knowledge base
    Ingest {
        /// PDF files to ingest
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Ask a question about the ingested documents
    Ask {
        /// The question to answer
        question: String,
        /// Number of passages to retrieve
        #[arg(long, short = 'k', value_parser = clap::value_parser!(u16).range(1..=100))]
        top_k: Option<u16>,
    },
    /// Show the state of the knowledge base and its models
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
                show_config(&load_config()?);
            } else {
                run_interactive_config(&get_config_dir()?)?;
            }
        }
        Commands::Ingest { paths } => {
            ingest_documents(&paths).await?;
        }
        Commands::Ask { question, top_k } => {
            ask_question(&question, top_k.map(usize::from)).await?;
        }
        Commands::Status => {
            show_status().await?;
        }
    }

    Ok(())
}
