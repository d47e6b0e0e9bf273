use anyhow::{bail, Result};
use coach_llm::{build_service, config::ServerConfig, init_tracing, service::GenerationRequest};
use std::env;

/// One-shot generation through the same service the HTTP server uses.
/// Handy for checking a freshly merged model directory before serving it.
#[tokio::main]
async fn main() -> Result<()> {
    let config = ServerConfig::from_env()?;
    init_tracing();

    let prompt = env::args().skip(1).collect::<Vec<_>>().join(" ");
    if prompt.trim().is_empty() {
        bail!("usage: coach-generate <prompt>");
    }

    println!("🎯 Prompt: {prompt}");

    let service = build_service(&config).await?;
    let request = GenerationRequest::new(prompt, config.service.default_max_tokens as i64);
    let result = service.generate(request).await?;

    println!("{}", result.text);
    Ok(())
}
