/// Knowledge base indexing
///
/// Loads every document in a bot's contexts directory into its collection.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::rag::RAGSystem;

/// A plain-text document read from disk, named by its full file name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDocument {
    pub name: String,
    pub path: PathBuf,
    pub content: String,
}

/// Read every regular file in `dir` as UTF-8 text, sorted by file name
pub fn load_documents(dir: &Path) -> Result<Vec<SourceDocument>> {
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read contexts directory {}", dir.display()))?
    {
        let path = entry?.path();
        if path.is_file() {
            paths.push(path);
        }
    }
    paths.sort();

    paths
        .into_iter()
        .map(|path| -> Result<SourceDocument> {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let name = path
                .file_name()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string());
            Ok(SourceDocument { name, path, content })
        })
        .collect()
}

/// Embed and store every document in `dir`, returning the number of chunks
pub async fn build_index(rag: &RAGSystem, dir: &Path) -> Result<usize> {
    let documents = load_documents(dir)?;
    log::info!(
        "Indexing {} documents from {} into {}",
        documents.len(),
        dir.display(),
        rag.collection()
    );

    let mut total_chunks = 0;
    for document in &documents {
        let mut metadata = HashMap::new();
        metadata.insert("source".to_string(), document.path.display().to_string());

        total_chunks += rag
            .add_document(&document.name, &document.content, metadata)
            .await?;
    }

    log::info!("Indexed {} chunks into {}", total_chunks, rag.collection());
    Ok(total_chunks)
}
