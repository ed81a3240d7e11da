//! Tab link tracker: owns the session-scoped [`LinkState`], revalidates
//! the linked tab, and resolves the current tenant base URL.
//!
//! Concurrency: `revalidate` holds an in-flight latch so overlapping
//! triggers (periodic tick firing while a focus-driven revalidation is
//! still awaiting a tab lookup) collapse into one logical revalidation —
//! the second caller observes the first's state instead of issuing a
//! duplicate tab query.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use tokio::sync::watch;

use hermes_browser::{KeyValueStore, TabHost, Tab, WindowState, get_json, set_json};
use hermes_core::link::{LinkState, PresentationStatus, TabId, UiHints, hints, presentation};
use hermes_core::validator::{RejectReason, canonicalize, classify};
use hermes_core::HermesError;

use crate::diag::DiagSink;
use crate::keys;

pub struct LinkTracker {
    tabs: Arc<dyn TabHost>,
    session: Arc<dyn KeyValueStore>,
    diag: Arc<DiagSink>,
    revalidating: AtomicBool,
    state_tx: watch::Sender<LinkState>,
}

impl LinkTracker {
    pub fn new(
        tabs: Arc<dyn TabHost>,
        session: Arc<dyn KeyValueStore>,
        diag: Arc<DiagSink>,
    ) -> Self {
        let (state_tx, _) = watch::channel(LinkState::empty());
        Self {
            tabs,
            session,
            diag,
            revalidating: AtomicBool::new(false),
            state_tx,
        }
    }

    /// Current in-memory state.
    pub fn current(&self) -> LinkState {
        self.state_tx.borrow().clone()
    }

    /// Observe link state transitions.
    pub fn subscribe(&self) -> watch::Receiver<LinkState> {
        self.state_tx.subscribe()
    }

    /// Re-read the persisted state once at startup. After this the
    /// tracker is the sole writer.
    pub async fn restore(&self) {
        match get_json::<LinkState>(self.session.as_ref(), keys::LINK_STATE).await {
            Ok(Some(state)) => {
                self.state_tx.send_replace(state);
            }
            Ok(None) => {}
            Err(e) => self.diag.warn(format!("link state restore failed: {e}")).await,
        }
    }

    /// Link to a tab after validating its URL. Validation failures carry
    /// the rejection reason; the caller decides how to surface it.
    pub async fn link_to_tab(&self, tab: &Tab) -> Result<LinkState, HermesError> {
        classify(&tab.url).map_err(HermesError::InvalidSessionUrl)?;
        let origin = canonicalize(&tab.url)
            .ok_or(HermesError::InvalidSessionUrl(RejectReason::Malformed))?;
        let state = LinkState::linked_ok(
            tab.id,
            tab.window_id,
            tab.url.clone(),
            origin,
            tab.title.clone(),
            Utc::now(),
        );
        tracing::info!(tab_id = tab.id, "linked to tab");
        Ok(self.commit(state).await)
    }

    /// Revalidate the linked tab against its live URL.
    ///
    /// Safe to call concurrently with itself: an in-flight revalidation
    /// makes a new call a no-op that returns the current state.
    pub async fn revalidate(&self) -> Result<LinkState, HermesError> {
        if self.revalidating.swap(true, Ordering::SeqCst) {
            return Ok(self.current());
        }
        let result = self.revalidate_inner().await;
        self.revalidating.store(false, Ordering::SeqCst);
        result
    }

    async fn revalidate_inner(&self) -> Result<LinkState, HermesError> {
        let mut state = self.current();
        let Some(tab_id) = state.linked_tab_id else {
            // Nothing linked: closed stays closed, uninitialized stays put.
            return Ok(state);
        };

        match self.tabs.tab(tab_id).await {
            None => {
                tracing::info!(tab_id, "linked tab gone, marking closed");
                state.mark_closed(Utc::now());
            }
            Some(tab) => match classify(&tab.url) {
                Ok(()) => {
                    let origin = canonicalize(&tab.url)
                        .ok_or(HermesError::InvalidSessionUrl(RejectReason::Malformed))?;
                    state.mark_ok(tab.url, origin, tab.title, Utc::now());
                }
                Err(reason) => {
                    tracing::debug!(tab_id, %reason, "linked tab no longer validates");
                    state.mark_stale(reason, Some(tab.url), Utc::now());
                }
            },
        }

        Ok(self.commit(state).await)
    }

    /// Tenant base URL for API calls: the linked origin while the link is
    /// healthy, otherwise the focused tab if it validates.
    pub async fn resolve_base_url(&self) -> Option<String> {
        let state = self.current();
        if let Some(origin) = state.resolved_origin() {
            return Some(origin.to_string());
        }
        let tab = self.tabs.active_tab().await?;
        classify(&tab.url).ok()?;
        canonicalize(&tab.url)
    }

    /// Bring the linked tab's window to the foreground and activate the
    /// tab, restoring (not clobbering) a maximized/fullscreen window.
    pub async fn switch_to_linked_tab(&self) -> Result<(), HermesError> {
        let state = self.current();
        let tab_id = state.linked_tab_id.ok_or(HermesError::NoLinkedTab)?;
        let tab = self
            .tabs
            .tab(tab_id)
            .await
            .ok_or(HermesError::LinkedTabClosed)?;

        let restore = match self.tabs.window(tab.window_id).await {
            Some(w) if w.state != WindowState::Normal => Some(w.state),
            _ => None,
        };
        self.tabs.focus_window(tab.window_id, restore).await?;
        self.tabs.activate_tab(tab_id).await?;
        self.revalidate().await?;
        Ok(())
    }

    /// Background event: a tab was removed.
    pub async fn handle_tab_removed(&self, tab_id: TabId) {
        let mut state = self.current();
        if state.linked_tab_id != Some(tab_id) {
            return;
        }
        tracing::info!(tab_id, "linked tab closed");
        state.mark_closed(Utc::now());
        self.commit(state).await;
    }

    /// Background event: a tab navigated. Only the linked tab matters.
    pub async fn handle_tab_navigated(&self, tab_id: TabId, url: &str, title: &str) {
        let mut state = self.current();
        if state.linked_tab_id != Some(tab_id) {
            return;
        }
        match classify(url) {
            Ok(()) => {
                if let Some(origin) = canonicalize(url) {
                    state.mark_ok(url, origin, title, Utc::now());
                }
            }
            Err(reason) => state.mark_stale(reason, Some(url.to_string()), Utc::now()),
        }
        self.commit(state).await;
    }

    /// The toolbar was used on a tab that does not validate: record the
    /// reason so the panel can explain itself.
    pub async fn mark_unlinkable(&self, reason: RejectReason) {
        let mut state = self.current();
        state.mark_stale(reason, None, Utc::now());
        self.commit(state).await;
    }

    /// Presentation state against the currently active tab, with the UI
    /// copy to render. Read-only.
    pub async fn presentation(&self) -> (PresentationStatus, UiHints) {
        let active = self.tabs.active_tab().await.map(|t| t.id);
        let status = presentation(&self.current(), active);
        (status, hints(status))
    }

    /// Publish in memory, then persist. Storage failures are logged and
    /// the in-memory state stands — the store is a recovery aid, not the
    /// source of truth within a session.
    async fn commit(&self, state: LinkState) -> LinkState {
        self.state_tx.send_replace(state.clone());
        if let Err(e) = set_json(self.session.as_ref(), keys::LINK_STATE, &state).await {
            self.diag.error(format!("link state persist failed: {e}")).await;
        }
        state
    }
}

// ─── Tests ───────────────────────────────────────────────────────────
