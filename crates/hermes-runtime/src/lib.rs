//! Runtime wiring for the Hermes side panel: link tracking, token
//! lifecycle, countdown timers, and the background service, assembled
//! over the capability traits in `hermes-browser`.

pub mod diag;
pub mod keys;
pub mod service;
pub mod timers;
pub mod tokens;
pub mod tracker;

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::watch;

use hermes_browser::{KeyValueStore, PageExtractor, Tab, TabHost, TokenEndpoint};
use hermes_core::HermesError;
use hermes_core::link::{LinkState, PresentationStatus, UiHints};
use hermes_core::token::{TenantCredentialRecord, TokenPair};

use crate::diag::DiagSink;
use crate::service::BackgroundService;
use crate::timers::{CountdownDriver, TimerDisplay};
use crate::tokens::TokenManager;
use crate::tracker::LinkTracker;

/// The browser surfaces Hermes runs against. Session storage is scoped
/// to the browser session; durable storage survives restarts.
pub struct Environment {
    pub tabs: Arc<dyn TabHost>,
    pub extractor: Arc<dyn PageExtractor>,
    pub session: Arc<dyn KeyValueStore>,
    pub durable: Arc<dyn KeyValueStore>,
    pub endpoint: Arc<dyn TokenEndpoint>,
}

/// Top-level handle: one per extension instance.
pub struct Hermes {
    tracker: Arc<LinkTracker>,
    tokens: Arc<TokenManager>,
    timers: Arc<CountdownDriver>,
    service: Arc<BackgroundService>,
}

impl Hermes {
    pub fn new(env: Environment) -> Self {
        let diag = Arc::new(DiagSink::new(env.durable.clone()));
        let tracker = Arc::new(LinkTracker::new(
            env.tabs.clone(),
            env.session.clone(),
            diag.clone(),
        ));
        let tokens = Arc::new(TokenManager::new(
            env.durable,
            env.endpoint,
            env.tabs.clone(),
            env.extractor,
            diag.clone(),
        ));
        let timers = Arc::new(CountdownDriver::new(env.session.clone()));
        let service = Arc::new(BackgroundService::new(
            tracker.clone(),
            env.tabs,
            env.session,
            diag,
        ));
        Self {
            tracker,
            tokens,
            timers,
            service,
        }
    }

    /// Restore persisted state and spawn the background event loop.
    pub async fn startup(&self) -> tokio::task::JoinHandle<()> {
        self.service.startup().await;
        if let Some(base) = self.tracker.resolve_base_url().await {
            match self.tokens.record(&base).await {
                Ok(record) => self.timers.restore_from_record(record.as_ref(), Utc::now()),
                Err(e) => tracing::warn!("timer restore skipped: {e}"),
            }
        }
        self.service.spawn()
    }

    // ─── Link surface ────────────────────────────────────────────────

    pub async fn toggle_panel(&self, active_tab: Option<&Tab>) -> bool {
        self.service.toggle(active_tab).await
    }

    pub fn panel_open(&self) -> bool {
        self.service.global_open()
    }

    pub async fn link_to_tab(&self, tab: &Tab) -> Result<LinkState, HermesError> {
        self.tracker.link_to_tab(tab).await
    }

    pub async fn revalidate_link(&self) -> Result<LinkState, HermesError> {
        self.tracker.revalidate().await
    }

    pub async fn switch_to_linked_tab(&self) -> Result<(), HermesError> {
        self.tracker.switch_to_linked_tab().await
    }

    pub fn link_state(&self) -> LinkState {
        self.tracker.current()
    }

    pub fn subscribe_link(&self) -> watch::Receiver<LinkState> {
        self.tracker.subscribe()
    }

    pub async fn presentation(&self) -> (PresentationStatus, UiHints) {
        self.tracker.presentation().await
    }

    /// Foreground regained focus or visibility.
    pub async fn foreground_resumed(&self) {
        self.service.on_foreground_resumed().await;
    }

    // ─── Token surface ───────────────────────────────────────────────

    /// Tenant base URL the token operations target right now.
    pub async fn current_tenant_base_url(&self) -> Option<String> {
        self.tracker.resolve_base_url().await
    }

    pub async fn credential_record(
        &self,
        base_url: &str,
    ) -> Result<Option<TenantCredentialRecord>, HermesError> {
        self.tokens.record(base_url).await
    }

    /// Fetch a fresh token pair and start both countdowns from the
    /// awaited result. The caller observes tokens and running timers
    /// together, not a fire-and-forget that resolves later.
    pub async fn fetch_access_token(
        &self,
        base_url: &str,
        client_id: &str,
    ) -> Result<TokenPair, HermesError> {
        let pair = self.tokens.fetch_access_token(base_url, client_id).await?;
        self.timers.start_access(pair.access_token_expires_at);
        if let Some(at) = pair.refresh_token_expires_at {
            self.timers.start_refresh(at);
        }
        Ok(pair)
    }

    /// Refresh the access token and restart its countdown. The refresh
    /// timer keeps running on its own schedule.
    pub async fn refresh_access_token(&self, base_url: &str) -> Result<TokenPair, HermesError> {
        let pair = self.tokens.refresh_access_token(base_url).await?;
        self.timers.start_access(pair.access_token_expires_at);
        Ok(pair)
    }

    pub async fn save_client_id(&self, base_url: &str, client_id: &str) -> Result<(), HermesError> {
        self.tokens.save_client_id(base_url, client_id).await
    }

    pub async fn save_client_secret(
        &self,
        base_url: &str,
        client_secret: &str,
    ) -> Result<(), HermesError> {
        self.tokens.save_client_secret(base_url, client_secret).await
    }

    pub async fn clear_tenant(&self, base_url: &str) -> Result<(), HermesError> {
        self.tokens.clear_tenant(base_url).await
    }

    // ─── Timer surface ───────────────────────────────────────────────

    pub fn timer_display(&self) -> TimerDisplay {
        self.timers.display()
    }

    pub fn subscribe_timers(&self) -> watch::Receiver<TimerDisplay> {
        self.timers.subscribe()
    }
}
