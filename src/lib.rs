/// ITE RAG Bots Library
///
/// Webhook front-end for the panelist and prefect Telegram bots: update
/// screening and deduplication, prompt templating, retrieval QA over
/// pgvector, and chunked delivery of answers.

pub mod bot;
pub mod config;
pub mod dedup;
pub mod handlers;
pub mod http_server;
pub mod indexer;
pub mod prompts;
pub mod rag;
pub mod telegram;
