pub mod api;
pub mod cleaner;
pub mod config;
pub mod error;
pub mod inference;
pub mod service;

use std::sync::Arc;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::{
    cleaner::build_cleaner,
    config::ServerConfig,
    inference::{load_backend, ModelBackend},
    service::GenerationService,
};

/// `fmt` logging filtered by `RUST_LOG`, `info` when unset.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Loads the model once and wires it to the configured cleaning policy.
///
/// Model loading is blocking (mmap + hub download), so it runs off the async executor.
pub async fn build_service(config: &ServerConfig) -> Result<Arc<GenerationService>> {
    let settings = config.model.clone();
    let backend: Arc<dyn ModelBackend> =
        Arc::new(tokio::task::spawn_blocking(move || load_backend(&settings)).await??);

    Ok(Arc::new(GenerationService::new(
        backend,
        build_cleaner(&config.cleaner),
        config.service,
    )))
}
