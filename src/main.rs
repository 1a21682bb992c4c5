//! Study Companion server
//!
//! Entry point for the retrieval-augmented chat assistant.

use mimalloc::MiMalloc;

/// Global allocator for improved performance (M-MIMALLOC-APPS).
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use std::sync::Arc;

use dotenvy::dotenv;

use study_companion::config::AppConfig;
use study_companion::{server, telemetry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env (if present)
    let _ = dotenv();

    let config = match AppConfig::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            std::process::exit(1);
        }
    };

    telemetry::init(config.log.format);

    tracing::info!(
        name: "config.loaded",
        embedding_provider = ?config.embedding.provider,
        index_provider = ?config.index.provider,
        preset = ?config.assistant.preset,
        "Configuration loaded"
    );

    server::start_server(Arc::new(config)).await
}
