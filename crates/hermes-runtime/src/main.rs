//! hermes: side panel runtime binary.
//!
//! The production surface is the library; this binary exposes the URL
//! validator for scripting and a simulated end-to-end demo.

use std::sync::Arc;

use clap::Parser;
use serde_json::json;

use hermes_browser::{MemoryStore, MemoryTabs, ScriptedTokenEndpoint};
use hermes_core::{canonicalize, classify};
use hermes_runtime::{Environment, Hermes};

mod cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();

    let filter = std::env::var("HERMES_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .init();

    match args.command {
        cli::Command::Classify(opts) => match classify(&opts.url) {
            Ok(()) => println!("ok"),
            Err(reason) => {
                println!("rejected: {}", reason.message());
                std::process::exit(1);
            }
        },
        cli::Command::Canonicalize(opts) => {
            classify(&opts.url).map_err(|r| anyhow::anyhow!(r.message().to_string()))?;
            let origin = canonicalize(&opts.url)
                .ok_or_else(|| anyhow::anyhow!("URL has no canonical origin"))?;
            println!("{origin}");
        }
        cli::Command::Demo => run_demo().await?,
    }

    Ok(())
}

/// Walk the full lifecycle against an in-memory browser: link a tenant
/// tab, fetch a token pair, refresh it, then close the tab and watch the
/// link die.
async fn run_demo() -> anyhow::Result<()> {
    let tabs = Arc::new(MemoryTabs::new());
    let endpoint = Arc::new(ScriptedTokenEndpoint::new());
    let env = Environment {
        tabs: tabs.clone(),
        extractor: tabs.clone(),
        session: Arc::new(MemoryStore::new()),
        durable: Arc::new(MemoryStore::new()),
        endpoint: endpoint.clone(),
    };

    let hermes = Hermes::new(env);
    let worker = hermes.startup().await;

    let tab = tabs.open_tab(1, "https://acme.prd.mykronos.com/wfd/home", "Workforce");
    hermes.toggle_panel(Some(&tab)).await;
    let state = hermes.link_state();
    println!("linked: {} -> {:?}", tab.url, state.status);

    let base = hermes
        .current_tenant_base_url()
        .await
        .ok_or_else(|| anyhow::anyhow!("no tenant resolved"))?;
    println!("tenant base: {base}");

    endpoint.push_fetch(Ok(json!({
        "accessToken": "demo-access-token",
        "refreshToken": "demo-refresh-token",
        "expiresInSeconds": 3600,
    })));
    let pair = hermes.fetch_access_token(&base, "demo-client").await?;
    println!("access token: {}", pair.access_token);

    hermes.save_client_secret(&base, "demo-secret").await?;
    endpoint.push_refresh(Ok(json!({
        "access_token": "demo-access-token-2",
        "expires_in": 1800,
    })));
    let pair = hermes.refresh_access_token(&base).await?;
    println!("refreshed token: {}", pair.access_token);

    tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
    let display = hermes.timer_display();
    println!("timers: access {} refresh {}", display.access, display.refresh);

    tabs.close_tab(tab.id);
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    println!("after close: {:?}", hermes.link_state().status);

    worker.abort();
    Ok(())
}
