/// ITE RAG bots
///
/// Serves two Telegram bots over webhooks:
/// - panelist: three AI judges with different personalities evaluate a
///   startup pitch against the competition knowledge base
/// - prefect: answers questions from the student handbook
///
/// Both answer through a retrieval QA chain over pgvector and the OpenAI API.

use anyhow::Result;
use ite_rag_bots::{bot, config};

#[tokio::main]
async fn main() -> Result<()> {
    pretty_env_logger::init();

    log::info!("Starting ITE RAG bots...");

    let cfg = config::Config::from_env()?;

    cfg.validate().await?;

    bot::run(cfg).await?;

    Ok(())
}
