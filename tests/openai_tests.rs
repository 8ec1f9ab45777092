use ite_rag_bots::config::{BotConfig, BotKind, Config};
use ite_rag_bots::rag::RAGSystem;
use serde_json::{json, Value};
use sqlx::postgres::PgPoolOptions;
use std::path::PathBuf;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn test_config(api_base: &str, max_context_tokens: usize) -> Config {
    let bot = |kind: BotKind| BotConfig {
        kind,
        telegram_token: "123:abc".to_string(),
        webhook_secret: None,
        database_url: "postgres://postgres@localhost/unused".to_string(),
        collection: format!("{}_langchain_store", kind),
        contexts_dir: PathBuf::from("var/contexts").join(kind.as_str()),
    };

    Config {
        openai_api_key: "test-key".to_string(),
        openai_api_base: api_base.to_string(),
        gpt_model: "gpt-3.5-turbo".to_string(),
        gpt_temperature: 0.1,
        embedding_model: "text-embedding-ada-002".to_string(),
        top_k_chunks: 4,
        max_context_tokens,
        redis_url: None,
        update_id_cache_duration_secs: 900,
        webhook_url: None,
        webhook_port: 8080,
        panelist: bot(BotKind::Panelist),
        prefect: bot(BotKind::Prefect),
    }
}

/// RAG system whose database is never contacted
fn rag_for(server: &MockServer, max_context_tokens: usize) -> RAGSystem {
    let config = test_config(&server.uri(), max_context_tokens);
    let pool = PgPoolOptions::new()
        .connect_lazy(&config.prefect.database_url)
        .unwrap();
    RAGSystem::with_pool(&config, &config.prefect, pool)
}

fn chat_reply(contents: &[&str]) -> Value {
    let choices: Vec<Value> = contents
        .iter()
        .map(|c| json!({ "index": 0, "message": { "role": "assistant", "content": c } }))
        .collect();
    json!({ "id": "chatcmpl-1", "object": "chat.completion", "choices": choices })
}

async fn sent_chat_request(server: &MockServer) -> Value {
    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    requests[0].body_json().unwrap()
}

#[tokio::test]
async fn test_generate_response_stuffs_context_and_returns_first_choice() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_reply(&[
            "Wear your ID at all times.",
            "second choice",
        ])))
        .mount(&server)
        .await;

    let rag = rag_for(&server, 3000);
    let chunks = vec![
        "Students must wear their ID inside the campus.".to_string(),
        "Slippers are not allowed in classrooms.".to_string(),
    ];

    let answer = rag.generate_response("What is the dress code?", &chunks).await.unwrap();
    assert_eq!(answer, "Wear your ID at all times.");

    let body = sent_chat_request(&server).await;
    assert_eq!(body["model"], "gpt-3.5-turbo");
    let messages = body["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["role"], "system");
    let system = messages[0]["content"].as_str().unwrap();
    assert!(system.starts_with("Use the following pieces of context"));
    assert!(system.ends_with(&format!("{}\n\n{}", chunks[0], chunks[1])));
    assert_eq!(messages[1]["role"], "user");
    assert_eq!(messages[1]["content"], "What is the dress code?");
}

#[tokio::test]
async fn test_generate_response_drops_chunks_over_token_budget() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_reply(&["ok"])))
        .mount(&server)
        .await;

    let rag = rag_for(&server, 50);
    let chunks = vec![
        "The library opens at 7 AM.".to_string(),
        "overflow ".repeat(200),
    ];

    rag.generate_response("When does the library open?", &chunks).await.unwrap();

    let body = sent_chat_request(&server).await;
    let system = body["messages"][0]["content"].as_str().unwrap();
    assert!(system.contains("The library opens at 7 AM."));
    assert!(!system.contains("overflow"));
}

#[tokio::test]
async fn test_non_success_status_is_an_error_with_status_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(429).set_body_string("Rate limit reached for requests"))
        .mount(&server)
        .await;

    let rag = rag_for(&server, 3000);
    let err = rag
        .generate_response("Anything?", &[])
        .await
        .unwrap_err()
        .to_string();

    assert!(err.contains("429"), "{}", err);
    assert!(err.contains("Rate limit reached for requests"), "{}", err);
}

#[tokio::test]
async fn test_empty_choices_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_reply(&[])))
        .mount(&server)
        .await;

    let rag = rag_for(&server, 3000);
    let err = rag.generate_response("Anything?", &[]).await.unwrap_err();

    assert!(err.to_string().contains("No response from GPT"));
}

#[tokio::test]
async fn test_generate_embedding_returns_first_vector() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .and(header("authorization", "Bearer test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "object": "list",
            "data": [{ "object": "embedding", "index": 0, "embedding": [0.25, -0.5, 1.0] }],
            "model": "text-embedding-ada-002"
        })))
        .mount(&server)
        .await;

    let rag = rag_for(&server, 3000);
    let embedding = rag.generate_embedding("Library hours").await.unwrap();
    assert_eq!(embedding, vec![0.25, -0.5, 1.0]);

    let requests = server.received_requests().await.unwrap();
    let body: Value = requests[0].body_json().unwrap();
    assert_eq!(body["input"], "Library hours");
    assert_eq!(body["model"], "text-embedding-ada-002");
}

#[tokio::test]
async fn test_unparseable_reply_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>gateway</html>"))
        .mount(&server)
        .await;

    let rag = rag_for(&server, 3000);
    let err = rag.generate_embedding("x").await.unwrap_err().to_string();
    assert!(err.contains("Failed to parse embeddings response"), "{}", err);
}
