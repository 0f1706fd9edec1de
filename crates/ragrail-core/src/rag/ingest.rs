//! Document ingestion into an embedding store

use super::{DocumentSplitter, EmbeddingStore, InMemoryEmbeddingStore, TextSegment};
use crate::config::{expand_braces, RagConfig};
use crate::error::{RagRailError, Result};
use crate::llm::Embedder;
use glob::Pattern;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::{DirEntry, WalkDir};

/// Directories never descended into
const EXCLUDE_DIRS: &[&str] = &[
    "node_modules",
    ".git",
    ".cache",
    "vendor",
    "dist",
    "build",
    "__pycache__",
    ".venv",
    "target",
];

/// Segments sent to the embedder per request
const EMBED_BATCH_SIZE: usize = 32;

/// Where and how documents are read
#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub root: PathBuf,
    pub pattern: String,
    pub recursive: bool,
    pub max_segment_size: usize,
    pub max_overlap_size: usize,
}

impl IngestOptions {
    pub fn from_config(config: &RagConfig) -> Result<Self> {
        let root = config.path.clone().ok_or_else(|| {
            RagRailError::Config("missing required property 'rag.path'".to_string())
        })?;
        Ok(Self {
            root,
            pattern: config.pattern.clone(),
            recursive: config.recursive,
            max_segment_size: config.max_segment_size,
            max_overlap_size: config.max_overlap_size,
        })
    }
}

/// Counts from one ingestion run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub files: usize,
    pub segments: usize,
}

/// Reads documents, splits them, embeds the segments and stores them
pub struct Ingestor {
    options: IngestOptions,
    splitter: DocumentSplitter,
    embedder: Arc<dyn Embedder>,
}

impl Ingestor {
    pub fn new(options: IngestOptions, embedder: Arc<dyn Embedder>) -> Self {
        let splitter = DocumentSplitter::new(options.max_segment_size, options.max_overlap_size);
        Self {
            options,
            splitter,
            embedder,
        }
    }

    /// Files under the root matching the pattern, sorted by path
    pub fn scan(&self) -> Result<Vec<PathBuf>> {
        let root = &self.options.root;
        if !root.is_dir() {
            return Err(RagRailError::Config(format!(
                "invalid property 'rag.path': {} is not a directory",
                root.display()
            )));
        }

        let patterns = expand_braces(&self.options.pattern)
            .iter()
            .map(|p| Pattern::new(p))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut walker = WalkDir::new(root).follow_links(true);
        if !self.options.recursive {
            walker = walker.max_depth(1);
        }

        let mut files = Vec::new();
        for entry in walker.into_iter().filter_entry(|e| !should_skip(e)) {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }

            let relative = entry
                .path()
                .strip_prefix(root)
                .map(|p| p.to_string_lossy().to_string())
                .unwrap_or_else(|_| entry.path().to_string_lossy().to_string());

            if patterns.iter().any(|p| p.matches(&relative)) {
                files.push(entry.path().to_path_buf());
            }
        }

        files.sort();
        Ok(files)
    }

    /// Load one file as a segment with `file_name` and `absolute_directory_path`
    pub fn load_document(path: &Path) -> Result<TextSegment> {
        let text = std::fs::read_to_string(path)?;
        let absolute = std::fs::canonicalize(path)?;
        let file_name = absolute
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let directory = absolute
            .parent()
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or_default();

        Ok(TextSegment::new(text)
            .with_meta("file_name", file_name)
            .with_meta("absolute_directory_path", directory))
    }

    pub async fn ingest(&self, store: &dyn EmbeddingStore) -> Result<IngestReport> {
        let files = self.scan()?;
        let mut segments = Vec::new();
        for file in &files {
            let document = Self::load_document(file)?;
            let parts = self.splitter.split(&document);
            tracing::debug!("Split {} into {} segments", file.display(), parts.len());
            segments.extend(parts);
        }

        for batch in segments.chunks(EMBED_BATCH_SIZE) {
            let texts: Vec<String> = batch.iter().map(|s| s.text.clone()).collect();
            let embeddings = self.embedder.embed_batch(&texts).await?;
            store.add_all(embeddings, batch.to_vec()).await?;
        }

        let report = IngestReport {
            files: files.len(),
            segments: segments.len(),
        };
        tracing::info!(
            "Ingested {} files ({} segments) from {}",
            report.files,
            report.segments,
            self.options.root.display()
        );
        Ok(report)
    }
}

fn should_skip(entry: &DirEntry) -> bool {
    if entry.depth() == 0 {
        return false;
    }
    let name = entry.file_name().to_string_lossy();
    if name.starts_with('.') {
        return true;
    }
    entry.file_type().is_dir() && EXCLUDE_DIRS.iter().any(|d| name == *d)
}

/// Build an in-memory store from the configured documents
///
/// With `rag.reuse-embeddings.enabled` and an existing embeddings file, the
/// file is loaded instead of ingesting; otherwise documents are ingested and
/// the file is written for the next run.
pub async fn ingest_with_reuse(
    config: &RagConfig,
    embedder: Arc<dyn Embedder>,
) -> Result<Arc<InMemoryEmbeddingStore>> {
    let reuse = &config.reuse_embeddings;
    if reuse.enabled && reuse.file.exists() {
        tracing::info!("Reusing embeddings from {}", reuse.file.display());
        return Ok(Arc::new(InMemoryEmbeddingStore::load_from_file(&reuse.file)?));
    }

    let store = Arc::new(InMemoryEmbeddingStore::new());
    let ingestor = Ingestor::new(IngestOptions::from_config(config)?, embedder);
    ingestor.ingest(store.as_ref()).await?;

    if reuse.enabled {
        store.save_to_file(&reuse.file)?;
    }
    Ok(store)
}
