/// RAG (Retrieval-Augmented Generation) module with PostgreSQL + pgvector
///
/// This module handles:
/// - Document splitting and embedding
/// - Vector storage in PostgreSQL with pgvector extension
/// - Semantic retrieval of relevant chunks
/// - The "stuff" QA chain: retrieved chunks go into one system prompt,
///   the question goes in as the user message

use anyhow::{Context, Result};
use async_trait::async_trait;
use pgvector::Vector;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sqlx::{PgPool, Row};
use std::collections::{HashMap, VecDeque};
use tiktoken_rs::CoreBPE;

use crate::config::{BotConfig, Config};
use crate::prompts::qa_system_prompt;

/// Separator the character splitter cuts on
pub const SPLIT_SEPARATOR: &str = "\n\n";
pub const CHUNK_SIZE: usize = 1000;
pub const CHUNK_OVERLAP: usize = 0;

lazy_static::lazy_static! {
    static ref CL100K: Option<CoreBPE> = tiktoken_rs::cl100k_base().ok();
}

/// Anything that can answer a question; the webhook handlers only see this
#[async_trait]
pub trait QaChain: Send + Sync {
    async fn run(&self, query: &str) -> Result<String>;
}

/// Represents a message sent to the chat completions API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub role: String, // "system", "user" or "assistant"
    pub content: String,
}

impl ConversationMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".to_string(), content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".to_string(), content: content.into() }
    }
}

/// OpenAI API request/response structures
#[derive(Debug, Serialize)]
struct OpenAIEmbeddingRequest<'a> {
    input: &'a str,
    model: &'a str,
}

#[derive(Debug, Deserialize)]
struct OpenAIEmbeddingResponse {
    data: Vec<OpenAIEmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct OpenAIEmbeddingData {
    embedding: Vec<f32>,
}

#[derive(Debug, Serialize)]
struct OpenAIChatRequest<'a> {
    model: &'a str,
    messages: Vec<ConversationMessage>,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct OpenAIChatResponse {
    choices: Vec<OpenAIChatChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChatChoice {
    message: ConversationMessage,
}

/// Open a Postgres pool, accounting for pgBouncer-style poolers
pub async fn connect_pool(database_url: &str, max_connections: u32) -> Result<PgPool> {
    let use_pooler = database_url.contains(":6543") || database_url.contains("pgbouncer=true");

    let mut pool_options = sqlx::postgres::PgPoolOptions::new()
        .max_connections(max_connections);

    if use_pooler {
        log::info!("Using connection pooler - disabling statement timeout");
        pool_options = pool_options.after_connect(|conn, _meta| {
            Box::pin(async move {
                sqlx::query("SET statement_timeout = 0")
                    .execute(conn)
                    .await?;
                Ok(())
            })
        });
    }

    pool_options
        .connect(database_url)
        .await
        .context("Failed to connect to PostgreSQL")
}

/// Retrieval QA chain over one bot's collection
pub struct RAGSystem {
    collection: String,
    openai_api_key: String,
    openai_api_base: String,
    embedding_model: String,
    gpt_model: String,
    gpt_temperature: f32,
    top_k_chunks: usize,
    max_context_tokens: usize,
    db_pool: PgPool,
    http_client: reqwest::Client,
}

impl RAGSystem {
    /// Connect to the bot's vector database
    pub async fn new(config: &Config, bot: &BotConfig) -> Result<Self> {
        let db_pool = connect_pool(&bot.database_url, 10).await?;
        Ok(Self::with_pool(config, bot, db_pool))
    }

    /// Build on an existing pool
    pub fn with_pool(config: &Config, bot: &BotConfig, db_pool: PgPool) -> Self {
        Self {
            collection: bot.collection.clone(),
            openai_api_key: config.openai_api_key.clone(),
            openai_api_base: config.openai_api_base.clone(),
            embedding_model: config.embedding_model.clone(),
            gpt_model: config.gpt_model.clone(),
            gpt_temperature: config.gpt_temperature,
            top_k_chunks: config.top_k_chunks,
            max_context_tokens: config.max_context_tokens,
            db_pool,
            http_client: reqwest::Client::new(),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Initialize the collection table if it doesn't exist
    ///
    /// No approximate vector index is created: collections are a few hundred
    /// chunks, and an exact scan always returns the true top-k.
    pub async fn initialize_collection(&self) -> Result<()> {
        log::info!("Initializing collection {}...", self.collection);

        sqlx::query("CREATE EXTENSION IF NOT EXISTS vector")
            .execute(&self.db_pool)
            .await
            .context("Failed to create vector extension")?;

        sqlx::query(&create_table_sql(&self.collection))
            .execute(&self.db_pool)
            .await
            .context("Failed to create embeddings table")?;

        // Collections created before exact search carried an ivfflat index
        sqlx::query(&format!("DROP INDEX IF EXISTS {}_embedding_idx", self.collection))
            .execute(&self.db_pool)
            .await
            .context("Failed to drop approximate vector index")?;

        log::info!("Collection {} initialized successfully", self.collection);
        Ok(())
    }

    /// POST a JSON body to the OpenAI API and decode the reply
    async fn post_openai<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        let response = self
            .http_client
            .post(format!("{}/{}", self.openai_api_base, path))
            .bearer_auth(&self.openai_api_key)
            .json(body)
            .send()
            .await
            .with_context(|| format!("Failed to send {} request", path))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());
            anyhow::bail!("OpenAI API error on {} (status {}): {}", path, status, error_text);
        }

        let response_text = response
            .text()
            .await
            .context("Failed to read response body")?;

        serde_json::from_str(&response_text)
            .with_context(|| format!("Failed to parse {} response. Response was: {}", path, response_text))
    }

    /// Generate embeddings for text using OpenAI API
    pub async fn generate_embedding(&self, text: &str) -> Result<Vec<f32>> {
        let request = OpenAIEmbeddingRequest {
            input: text,
            model: &self.embedding_model,
        };

        let response: OpenAIEmbeddingResponse = self.post_openai("embeddings", &request).await?;

        response
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .context("No embedding returned")
    }

    /// Add a document to the collection, replacing any earlier version
    ///
    /// All chunks are embedded before the table is touched, then the old rows
    /// of the document are deleted and the new ones inserted in one
    /// transaction.
    ///
    /// # Arguments
    /// * `document_name` - Name/identifier for the document
    /// * `content` - Full text content of the document
    /// * `metadata` - Additional metadata (e.g., source file)
    pub async fn add_document(
        &self,
        document_name: &str,
        content: &str,
        metadata: HashMap<String, String>,
    ) -> Result<usize> {
        log::info!("Adding document: {}", document_name);

        let chunks = split_text(content, SPLIT_SEPARATOR, CHUNK_SIZE, CHUNK_OVERLAP);
        log::info!("Split into {} chunks", chunks.len());

        let mut embeddings = Vec::with_capacity(chunks.len());
        for chunk_text in &chunks {
            embeddings.push(self.generate_embedding(chunk_text).await?);
        }

        let mut tx = self
            .db_pool
            .begin()
            .await
            .context("Failed to start transaction")?;

        let removed = sqlx::query(&delete_document_sql(&self.collection))
            .bind(document_name)
            .execute(&mut *tx)
            .await
            .context("Failed to remove previous chunks")?
            .rows_affected();
        if removed > 0 {
            log::info!("Replaced {} previous chunks of {}", removed, document_name);
        }

        let insert_query = insert_chunk_sql(&self.collection);
        for (idx, (chunk_text, embedding)) in chunks.iter().zip(embeddings).enumerate() {
            let mut chunk_metadata = metadata.clone();
            chunk_metadata.insert("document".to_string(), document_name.to_string());
            chunk_metadata.insert("chunk_index".to_string(), idx.to_string());

            let metadata_json = serde_json::to_value(&chunk_metadata)
                .context("Failed to serialize metadata")?;

            sqlx::query(&insert_query)
                .bind(chunk_id(document_name, idx))
                .bind(chunk_text)
                .bind(Vector::from(embedding))
                .bind(metadata_json)
                .execute(&mut *tx)
                .await
                .context("Failed to insert embedding")?;
        }

        tx.commit().await.context("Failed to commit document")?;

        log::info!("Document added successfully with {} chunks", chunks.len());
        Ok(chunks.len())
    }

    /// Retrieve the chunks closest to the query by cosine distance
    pub async fn retrieve_relevant_chunks(&self, query: &str) -> Result<Vec<String>> {
        log::debug!("Retrieving relevant chunks from {}", self.collection);

        let query_embedding = self.generate_embedding(query).await?;

        let search_query = format!(
            r#"
            SELECT content
            FROM {}
            ORDER BY embedding <=> $1
            LIMIT $2
            "#,
            self.collection
        );

        let rows = sqlx::query(&search_query)
            .bind(Vector::from(query_embedding))
            .bind(self.top_k_chunks as i64)
            .fetch_all(&self.db_pool)
            .await
            .context("Failed to search for similar vectors")?;

        let chunks: Vec<String> = rows
            .into_iter()
            .map(|row| row.get::<String, _>("content"))
            .collect();

        log::info!("Retrieved {} relevant chunks", chunks.len());
        Ok(chunks)
    }

    /// Answer the query from the given context chunks
    pub async fn generate_response(&self, query: &str, context_chunks: &[String]) -> Result<String> {
        let context = fit_chunks_to_budget(context_chunks, self.max_context_tokens, count_tokens);
        if context.len() < context_chunks.len() {
            log::warn!(
                "Dropped {} of {} chunks to stay within {} context tokens",
                context_chunks.len() - context.len(),
                context_chunks.len(),
                self.max_context_tokens
            );
        }

        let request = OpenAIChatRequest {
            model: &self.gpt_model,
            messages: vec![
                ConversationMessage::system(qa_system_prompt(&context)),
                ConversationMessage::user(query),
            ],
            temperature: self.gpt_temperature,
        };

        let response: OpenAIChatResponse = self.post_openai("chat/completions", &request).await?;

        let answer = response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .context("No response from GPT")?;

        log::info!("Response generated successfully");
        Ok(answer)
    }
}

#[async_trait]
impl QaChain for RAGSystem {
    async fn run(&self, query: &str) -> Result<String> {
        let chunks = self.retrieve_relevant_chunks(query).await?;
        self.generate_response(query, &chunks).await
    }
}

/// Row ID of the `idx`-th chunk of a document
pub fn chunk_id(document_name: &str, idx: usize) -> String {
    format!("{}_{}", document_name, idx)
}

// 1536 dimensions for text-embedding-ada-002
fn create_table_sql(collection: &str) -> String {
    format!(
        r#"
        CREATE TABLE IF NOT EXISTS {} (
            id TEXT PRIMARY KEY,
            content TEXT NOT NULL,
            embedding vector(1536),
            metadata JSONB,
            created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
        )
        "#,
        collection
    )
}

fn delete_document_sql(collection: &str) -> String {
    format!("DELETE FROM {} WHERE metadata->>'document' = $1", collection)
}

fn insert_chunk_sql(collection: &str) -> String {
    format!(
        r#"
        INSERT INTO {} (id, content, embedding, metadata)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (id) DO UPDATE
        SET content = $2, embedding = $3, metadata = $4
        "#,
        collection
    )
}

/// Split text on `separator` and merge the pieces into chunks of at most
/// `chunk_size` characters, carrying up to `overlap` characters of trailing
/// pieces into the next chunk. A piece longer than `chunk_size` becomes its
/// own oversized chunk.
pub fn split_text(text: &str, separator: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let sep_len = separator.chars().count();
    let mut chunks = Vec::new();
    let mut current: VecDeque<&str> = VecDeque::new();
    let mut total = 0usize;

    let join = |pieces: &VecDeque<&str>| -> Option<String> {
        let joined = pieces.iter().copied().collect::<Vec<_>>().join(separator);
        let joined = joined.trim();
        (!joined.is_empty()).then(|| joined.to_string())
    };

    for piece in text.split(separator).filter(|p| !p.is_empty()) {
        let len = piece.chars().count();
        let sep_if_any = |current: &VecDeque<&str>| if current.is_empty() { 0 } else { sep_len };

        if total + len + sep_if_any(&current) > chunk_size && !current.is_empty() {
            if total > chunk_size {
                log::warn!("Created a chunk of size {}, which is longer than the specified {}", total, chunk_size);
            }
            chunks.extend(join(&current));

            while total > overlap || (total > 0 && total + len + sep_if_any(&current) > chunk_size) {
                let removed = current.len() > 1;
                match current.pop_front() {
                    Some(first) => total -= first.chars().count() + if removed { sep_len } else { 0 },
                    None => break,
                }
            }
        }

        current.push_back(piece);
        total += len + if current.len() > 1 { sep_len } else { 0 };
    }

    if total > chunk_size {
        log::warn!("Created a chunk of size {}, which is longer than the specified {}", total, chunk_size);
    }
    chunks.extend(join(&current));
    chunks
}

/// Count tokens with the cl100k tokenizer, estimating when it is unavailable
pub fn count_tokens(text: &str) -> usize {
    match &*CL100K {
        Some(bpe) => bpe.encode_with_special_tokens(text).len(),
        None => text.chars().count() / 4 + 1,
    }
}

/// Keep leading chunks while their total token count stays within the budget
pub fn fit_chunks_to_budget(
    chunks: &[String],
    budget: usize,
    count: impl Fn(&str) -> usize,
) -> Vec<String> {
    let mut used = 0;
    chunks
        .iter()
        .take_while(|chunk| {
            used += count(chunk.as_str());
            used <= budget
        })
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_short_text_is_one_chunk() {
        let chunks = split_text("alpha\n\nbeta", "\n\n", 100, 0);
        assert_eq!(chunks, vec!["alpha\n\nbeta".to_string()]);
    }

    #[test]
    fn test_split_merges_paragraphs_up_to_chunk_size() {
        let text = "aaaa\n\nbbbb\n\ncccc\n\ndddd";
        // "aaaa\n\nbbbb" is 10 characters
        let chunks = split_text(text, "\n\n", 10, 0);
        assert_eq!(chunks, vec!["aaaa\n\nbbbb".to_string(), "cccc\n\ndddd".to_string()]);
    }

    #[test]
    fn test_split_keeps_oversized_piece_whole() {
        let long = "x".repeat(25);
        let text = format!("short\n\n{}\n\ntail", long);
        let chunks = split_text(&text, "\n\n", 10, 0);
        assert_eq!(chunks, vec!["short".to_string(), long, "tail".to_string()]);
    }

    #[test]
    fn test_split_skips_blank_pieces() {
        let chunks = split_text("\n\n\n\n  \n\nword\n\n", "\n\n", 100, 0);
        assert_eq!(chunks, vec!["word".to_string()]);
        assert!(split_text("", "\n\n", 100, 0).is_empty());
    }

    #[test]
    fn test_split_with_overlap_repeats_trailing_piece() {
        let chunks = split_text("aa\n\nbb\n\ncc", "\n\n", 6, 2);
        assert_eq!(chunks, vec!["aa\n\nbb".to_string(), "bb\n\ncc".to_string()]);
    }

    #[test]
    fn test_fit_chunks_to_budget() {
        let chunks = vec!["abc".to_string(), "defg".to_string(), "hi".to_string()];
        let by_len = |s: &str| s.len();
        assert_eq!(fit_chunks_to_budget(&chunks, 7, by_len), chunks[..2].to_vec());
        assert_eq!(fit_chunks_to_budget(&chunks, 100, by_len), chunks);
        assert!(fit_chunks_to_budget(&chunks, 2, by_len).is_empty());
    }

    #[test]
    fn test_count_tokens_is_positive_for_text() {
        assert!(count_tokens("What is the dress code on campus?") > 0);
    }

    #[test]
    fn test_count_tokens_from_many_threads() {
        let text = "Students must wear their ID inside the campus.";
        let expected = count_tokens(text);
        let handles: Vec<_> = (0..8)
            .map(|_| std::thread::spawn(move || count_tokens(text)))
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), expected);
        }
    }

    #[test]
    fn test_chunk_id() {
        assert_eq!(chunk_id("rules.txt", 3), "rules.txt_3");
        assert_ne!(chunk_id("rules.txt", 0), chunk_id("rules.md", 0));
    }

    #[test]
    fn test_schema_uses_exact_search() {
        let sql = create_table_sql("prefect_langchain_store");
        assert!(sql.contains("CREATE TABLE IF NOT EXISTS prefect_langchain_store"));
        assert!(sql.contains("embedding vector(1536)"));
        assert!(!sql.to_lowercase().contains("ivfflat"));
    }

    #[test]
    fn test_reindex_deletes_rows_of_the_same_document() {
        let sql = delete_document_sql("panelist_langchain_store");
        assert_eq!(
            sql,
            "DELETE FROM panelist_langchain_store WHERE metadata->>'document' = $1"
        );
        assert!(insert_chunk_sql("panelist_langchain_store").contains("ON CONFLICT (id) DO UPDATE"));
    }
}
