//! Ingest command

use anyhow::Result;
use crate::app::IngestArgs;
use ragrail_core::rag::{InMemoryEmbeddingStore, IngestOptions, Ingestor};
use ragrail_core::{Config, LlmEmbedder};
use std::sync::Arc;

pub async fn run(args: IngestArgs, config: &Config) -> Result<()> {
    let mut config = config.clone();
    if let Some(path) = args.path {
        config.rag.path = Some(path);
    }
    if let Some(pattern) = args.pattern {
        config.rag.pattern = pattern;
    }
    config.validate()?;
    let rag = &config.rag;

    let options = IngestOptions::from_config(rag)?;
    let embedder = LlmEmbedder::from_config(config.llm.clone())?;
    let ingestor = Ingestor::new(options, Arc::new(embedder));

    let files = ingestor.scan()?;
    if files.is_empty() {
        println!("No documents match '{}'", rag.pattern);
        return Ok(());
    }
    println!("Ingesting {} documents...", files.len());

    let store = InMemoryEmbeddingStore::new();
    let report = ingestor.ingest(&store).await?;
    store.save_to_file(&rag.reuse_embeddings.file)?;

    println!("Ingestion complete:");
    println!("  Files:    {}", report.files);
    println!("  Segments: {}", report.segments);
    println!("  Saved to: {}", rag.reuse_embeddings.file.display());
    if !rag.reuse_embeddings.enabled {
        println!("Set rag.reuse-embeddings.enabled to use these embeddings in 'ask'.");
    }

    Ok(())
}
