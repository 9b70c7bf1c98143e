pub mod app;
pub mod chat;
pub mod citation;
pub mod cli;
pub mod config;
pub mod doc_processor;
pub mod llm;
pub mod ocr;
pub mod session;
pub mod viewer;

use app::App;
use clap::Parser;
use config::{Config, ConfigError};
use doc_processor::PdfTextExtractor;
use llm::gemini::{GeminiBackend, GeminiConfig};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "pdf_chat_lib=debug,warn"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .init();
}

pub async fn run() -> anyhow::Result<()> {
    let args = cli::Args::parse();
    init_tracing(args.verbose);
    dotenvy::dotenv().ok();

    let mut config = Config::load(args.config.as_deref())?;
    args.apply(&mut config);

    if !config.has_api_key() {
        if let Some(key) = cli::prompt_api_key().await? {
            config = config.with_api_key(key);
        }
    }
    if !config.has_api_key() {
        eprintln!("{}", cli::CONFIG_ERROR_SCREEN);
        return Err(ConfigError::MissingApiKey.into());
    }

    let gemini = Arc::new(GeminiBackend::new(GeminiConfig::from_config(&config)?));
    tracing::info!(model = %config.model, ocr_model = %config.ocr_model, "gemini backend ready");

    let mut app = App::new(config, Arc::new(PdfTextExtractor), gemini.clone(), gemini);
    cli::run_repl(&mut app, args.file).await
}
