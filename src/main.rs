use std::env;
use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use colored::Colorize;
use dotenv::dotenv;
use tokio::net::TcpListener;

use rust_policy_qa::api;
use rust_policy_qa::config::{EngineConfig, IndexBackend};
use rust_policy_qa::embedding::{Embedder, EmbeddingService, GeminiEmbedder};
use rust_policy_qa::orchestrator::QueryOrchestrator;
use rust_policy_qa::providers::{CompletionProvider, GeminiProvider, KeyRotator, OpenAiProvider};

#[derive(Parser, Debug)]
#[command(author, version, about = "Document question-answering service", long_about = None)]
struct Args {
    #[arg(long, default_value = "3000")]
    port: u16,

    /// Use the external Qdrant index backend instead of the in-process one.
    #[arg(long)]
    qdrant: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::init();

    let args = Args::parse();
    let mut config = EngineConfig::from_env()?;
    if args.qdrant {
        config.index_backend = IndexBackend::Qdrant;
    }

    // One key pool for the Gemini provider and embedder; rotation on
    // quota errors picks the next spare.
    let google_keys = KeyRotator::from_env().map(Arc::new);

    let provider: Arc<dyn CompletionProvider> = if let Some(keys) = &google_keys {
        Arc::new(GeminiProvider::new(keys.clone(), config.llm_model.clone()))
    } else if let Ok(key) = env::var("OPENAI_API_KEY") {
        let model = env::var("OPENAI_CHAT_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());
        Arc::new(OpenAiProvider::new(key, model))
    } else {
        anyhow::bail!("Set GOOGLE_API_KEY or OPENAI_API_KEY to select a language model");
    };

    let primary: Option<Box<dyn Embedder>> = google_keys.map(|keys| {
        Box::new(GeminiEmbedder::new(keys, config.embedding_model.clone())) as Box<dyn Embedder>
    });
    if primary.is_none() {
        log::warn!("No embedding API key configured; retrieval will run in degraded hashing mode");
    }
    let embedding = Arc::new(EmbeddingService::new(primary));

    let orchestrator = Arc::new(QueryOrchestrator::new(config.clone(), embedding, provider)?);

    println!("{}", "Document QA engine".bold().green());
    println!("  model:   {}", orchestrator.model_info().cyan());
    println!("  backend: {:?}", config.index_backend);
    println!("  port:    {}", args.port);

    let app = api::create_api(orchestrator, env::var("API_TOKEN").ok());
    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    let listener = TcpListener::bind(addr).await?;
    log::info!("Listening on {}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}
