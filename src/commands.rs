use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use console::style;
use tracing::{error, info};

use crate::config::{Config, get_config_dir};
use crate::embeddings::OllamaClient;
use crate::pipeline::{FailureKind, RagContext};

/// Load the configuration from the default directory
#[inline]
pub fn load_config() -> Result<Config> {
    let config_dir = get_config_dir().context("Failed to resolve configuration directory")?;
    Config::load(&config_dir)
}

async fn open_context() -> Result<RagContext> {
    let config = load_config()?;
    RagContext::from_config(config)
        .await
        .context("Failed to open knowledge base")
}

/// Ingest PDF files into the knowledge base and print a per-file summary
#[inline]
pub async fn ingest_documents(paths: &[PathBuf]) -> Result<()> {
    if paths.is_empty() {
        bail!("No files given to ingest");
    }

    let context = open_context().await?;
    info!("Ingesting {} files", paths.len());

    let report = context.ingest(paths).await;

    for file in &report.succeeded {
        println!(
            "{} {} ({} pages, {} chunks)",
            style("✓").green(),
            file.source,
            file.pages,
            file.chunks
        );
    }

    for failure in &report.failed {
        let marker = match failure.kind {
            FailureKind::Unreadable => style("⚠ skipped").yellow(),
            FailureKind::Fatal => style("✗ failed").red(),
            FailureKind::NotAttempted => style("- not attempted").dim(),
        };
        println!("{} {}: {}", marker, failure.path.display(), failure.reason);
    }

    println!();
    println!(
        "Ingested {} of {} files, {} new chunks",
        report.succeeded.len(),
        paths.len(),
        report.total_chunks
    );
    println!("Knowledge base: {} chunks", context.stats().chunk_count);

    if report.aborted {
        error!("Ingestion aborted");
        bail!("Ingestion aborted, see the failures above");
    }

    Ok(())
}

/// Answer a question from the knowledge base and print the cited sources
#[inline]
pub async fn ask_question(question: &str, top_k: Option<usize>) -> Result<()> {
    let context = open_context().await?;

    if context.store().is_empty() {
        println!("The knowledge base is empty.");
        println!("Use 'pdf-qa ingest <file.pdf>' to add documents.");
        return Ok(());
    }

    let answer = context.ask(question, top_k).await?;

    println!("{}", answer.answer);

    if !answer.sources.is_empty() {
        println!();
        println!("{}", style("Sources:").bold());
        for source in &answer.sources {
            println!(
                "  {} (page {}) [{:.3}]",
                style(&source.source).cyan(),
                source.page,
                source.score
            );
            println!("    {}", style(&source.excerpt).dim());
        }
    }

    Ok(())
}

/// Show knowledge base contents, model health and the answer backend
#[inline]
pub async fn show_status() -> Result<()> {
    let config = load_config().unwrap_or_default();

    println!("📊 PDF QA Status Report");
    println!("{}", "=".repeat(50));
    println!();

    println!("🤖 Ollama Status:");
    match OllamaClient::new(&config.embedding) {
        Ok(client) => {
            let checked = client.clone();
            match tokio::task::spawn_blocking(move || checked.health_check()).await {
                Ok(Ok(())) => {
                    println!(
                        "   ✅ Ollama: Connected ({}:{})",
                        config.embedding.host, config.embedding.port
                    );
                    println!("   📋 Model: {}", client.model());
                    println!("   🔢 Batch Size: {}", client.batch_size());
                }
                Ok(Err(e)) => println!("   ⚠️  Ollama: Unavailable - {e:#}"),
                Err(e) => println!("   ❌ Ollama: Health check failed - {e}"),
            }
        }
        Err(e) => println!("   ❌ Ollama: Invalid configuration - {e:#}"),
    }

    println!();
    println!("💬 Answer Backend:");
    let context = match open_context().await {
        Ok(context) => context,
        Err(e) => {
            println!("   ❌ Knowledge base: {e:#}");
            return Ok(());
        }
    };
    if context.generation_backend().is_external() {
        println!(
            "   ✅ Generative ({} at {})",
            config.generation.model, config.generation.base_url
        );
    } else {
        println!("   📝 Extractive (no generation provider configured)");
    }

    println!();
    println!("🔍 Knowledge Base:");
    let stats = context.stats();
    println!("   📁 Location: {}", stats.data_dir.display());
    println!("   📊 Chunks: {}", stats.chunk_count);
    println!("   📚 Documents: {}", stats.source_count);
    println!("   🔢 Dimension: {}", stats.dimension);
    println!("   🔄 Generation: {}", stats.generation);

    let sources = context.store().sources();
    if !sources.is_empty() {
        println!();
        for (source, chunks) in sources {
            println!("   📄 {source} ({chunks} chunks)");
        }
    }

    Ok(())
}
