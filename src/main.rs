use std::sync::Arc;

use anyhow::Context;

use wecom_gateway::api::{MessageSender, TokenCache, WecomClient};
use wecom_gateway::config::{DEFAULT_SYSTEM_PROMPT, GatewayConfig};
use wecom_gateway::crypto::WecomCrypto;
use wecom_gateway::dispatcher::{Dispatcher, DispatcherConfig};
use wecom_gateway::llm::{LlmConfig, create_provider};
use wecom_gateway::routes::{AppState, gateway_routes};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = GatewayConfig::from_env().context("Invalid gateway configuration")?;

    eprintln!("📨 WeCom Gateway v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Callback: http://0.0.0.0:{}/callback", config.port);
    eprintln!(
        "   Corp: {}",
        config
            .masked_corp_id()
            .unwrap_or_else(|| "not configured".to_string())
    );

    // ── Crypto ──────────────────────────────────────────────────────────
    let crypto = Arc::new(WecomCrypto::new(&config).context("Invalid WECOM_ENCODING_AES_KEY")?);
    if !crypto.is_configured() {
        tracing::warn!("WeCom callback credentials missing; callbacks will be refused");
    }

    // ── Platform API ────────────────────────────────────────────────────
    let http = reqwest::Client::builder()
        .user_agent(concat!("wecom-gateway/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to build HTTP client")?;
    let tokens = Arc::new(TokenCache::new(&config, http.clone()));
    let sender: Arc<dyn MessageSender> = Arc::new(WecomClient::new(&config, http, tokens));

    // ── AI backend ──────────────────────────────────────────────────────
    let llm_config = LlmConfig::from_env().context("Invalid AI backend configuration")?;
    eprintln!("   Model: {}", llm_config.model);
    let llm = create_provider(&llm_config).context("Failed to create AI provider")?;

    let system_prompt = std::env::var("GATEWAY_SYSTEM_PROMPT")
        .ok()
        .filter(|p| !p.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string());

    let dispatcher = Arc::new(Dispatcher::new(
        Arc::clone(&sender),
        llm,
        DispatcherConfig {
            system_prompt,
            reply_markdown: config.reply_markdown,
        },
    ));

    // ── HTTP server ─────────────────────────────────────────────────────
    let port = config.port;
    let app = gateway_routes(AppState {
        crypto,
        dispatcher,
        sender,
    });

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .with_context(|| format!("Failed to bind port {port}"))?;
    tracing::info!(port, "Gateway listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
