use coach_llm::{api, build_service, config::ServerConfig, init_tracing};
use tokio::net::TcpListener;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------
    // Logging + config
    // -----------------------------
    let config = ServerConfig::from_env()?;
    init_tracing();

    println!(
        "🚀 Starting coach generation server ({:?} variant)...",
        config.variant
    );
    info!(
        model = %config.model.source,
        cleaner = %config.cleaner.policy,
        default_max_tokens = config.service.default_max_tokens,
        strip_prompt_echo = config.service.strip_prompt_echo,
        "configuration loaded"
    );

    // -----------------------------
    // Model backend (loaded once, shared read-only)
    // -----------------------------
    let service = build_service(&config).await?;

    let app = api::router(service);

    let listener = TcpListener::bind(config.bind).await?;
    println!("🌐 HTTP listening on http://{}", config.bind);
    println!("🛠 Generation API at http://{}/generate", config.bind);

    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}
