/// Build a bot's vector collection from its contexts directory
///
/// Run with: cargo run --bin build_index -- <panelist|prefect>

use anyhow::{Context, Result};
use ite_rag_bots::{
    config::{BotKind, Config},
    indexer::build_index,
    rag::RAGSystem,
};

#[tokio::main]
async fn main() -> Result<()> {
    pretty_env_logger::init();

    let kind: BotKind = std::env::args()
        .nth(1)
        .context("Usage: build_index <panelist|prefect>")?
        .parse()?;

    let config = Config::from_env()?;
    let bot_config = config.bot(kind);

    let rag = RAGSystem::new(&config, bot_config).await?;
    rag.initialize_collection().await?;

    let chunks = build_index(&rag, &bot_config.contexts_dir).await?;
    log::info!("Done: {} chunks in {}", chunks, rag.collection());

    Ok(())
}
