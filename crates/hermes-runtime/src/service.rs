//! Background service: single writer of the link state and the global
//! side-panel open flag.
//!
//! Multiple foreground panel instances must not race over session state,
//! so this service owns both: it reads the persisted open flag once at
//! startup (the reconciliation rule — no split-brain between an
//! in-memory mirror and the store) and afterwards is the sole mutator.
//! It also consumes tab events so link state stays accurate without the
//! foreground polling.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use hermes_browser::{KeyValueStore, Tab, TabEvent, TabHost, get_json, set_json};
use hermes_core::classify;

use crate::diag::DiagSink;
use crate::keys;
use crate::tracker::LinkTracker;

/// Periodic revalidation interval.
pub const REVALIDATE_INTERVAL: Duration = Duration::from_secs(60);

pub struct BackgroundService {
    tracker: Arc<LinkTracker>,
    tabs: Arc<dyn TabHost>,
    session: Arc<dyn KeyValueStore>,
    diag: Arc<DiagSink>,
    global_open: AtomicBool,
}

impl BackgroundService {
    pub fn new(
        tracker: Arc<LinkTracker>,
        tabs: Arc<dyn TabHost>,
        session: Arc<dyn KeyValueStore>,
        diag: Arc<DiagSink>,
    ) -> Self {
        Self {
            tracker,
            tabs,
            session,
            diag,
            global_open: AtomicBool::new(false),
        }
    }

    /// Startup reconciliation: read the persisted flag and link state
    /// once; from here on this service is the only writer.
    pub async fn startup(&self) {
        match get_json::<bool>(self.session.as_ref(), keys::GLOBAL_OPEN).await {
            Ok(flag) => self.global_open.store(flag.unwrap_or(false), Ordering::SeqCst),
            Err(e) => self.diag.warn(format!("open flag restore failed: {e}")).await,
        }
        self.tracker.restore().await;
        tracing::info!(open = self.global_open.load(Ordering::SeqCst), "service started");
    }

    /// Whether the side panel is enabled across all tabs.
    pub fn global_open(&self) -> bool {
        self.global_open.load(Ordering::SeqCst)
    }

    /// Toolbar action: toggle the panel globally. Opening on a valid
    /// tenant tab auto-links it; opening elsewhere records why the tab
    /// could not be linked. Returns the new flag value.
    pub async fn toggle(&self, tab: Option<&Tab>) -> bool {
        let open = !self.global_open.load(Ordering::SeqCst);
        self.global_open.store(open, Ordering::SeqCst);
        if let Err(e) = set_json(self.session.as_ref(), keys::GLOBAL_OPEN, &open).await {
            self.diag.error(format!("open flag persist failed: {e}")).await;
        }

        if open {
            if let Some(tab) = tab {
                match classify(&tab.url) {
                    Ok(()) => {
                        if let Err(e) = self.tracker.link_to_tab(tab).await {
                            self.diag.warn(format!("auto-link failed: {e}")).await;
                        }
                    }
                    Err(reason) => self.tracker.mark_unlinkable(reason).await,
                }
            }
        }
        open
    }

    /// Foreground regained visibility or window focus: revalidate. The
    /// tracker's in-flight latch absorbs bursts.
    pub async fn on_foreground_resumed(&self) {
        if let Err(e) = self.tracker.revalidate().await {
            self.diag.warn(format!("revalidation failed: {e}")).await;
        }
    }

    /// Event loop: periodic revalidation plus tab update/remove events.
    /// Runs until the tab host drops its event channel.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let service = Arc::clone(self);
        // Subscribe before spawning so no event fired in the gap is lost.
        let mut events = service.tabs.subscribe();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(REVALIDATE_INTERVAL);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        if let Err(e) = service.tracker.revalidate().await {
                            service.diag.warn(format!("periodic revalidation failed: {e}")).await;
                        }
                    }
                    event = events.recv() => match event {
                        Ok(TabEvent::Removed(tab_id)) => {
                            service.tracker.handle_tab_removed(tab_id).await;
                        }
                        Ok(TabEvent::Navigated { tab_id, url, title }) => {
                            service.tracker.handle_tab_navigated(tab_id, &url, &title).await;
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "tab event stream lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        })
    }
}

// ─── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use hermes_browser::{MemoryStore, MemoryTabs};
    use hermes_core::link::LinkStatus;

    const TENANT_URL: &str = "https://foo.prd.mykronos.com/wfd/home";

    fn build(tabs: Arc<MemoryTabs>, session: Arc<MemoryStore>) -> Arc<BackgroundService> {
        let diag = Arc::new(DiagSink::new(Arc::new(MemoryStore::new()) as _));
        let tracker = Arc::new(LinkTracker::new(
            tabs.clone() as _,
            session.clone() as _,
            diag.clone(),
        ));
        Arc::new(BackgroundService::new(
            tracker,
            tabs as _,
            session as _,
            diag,
        ))
    }

    #[tokio::test]
    async fn startup_reconciles_persisted_flag_once() {
        let tabs = Arc::new(MemoryTabs::new());
        let session = Arc::new(MemoryStore::new());
        set_json(session.as_ref(), keys::GLOBAL_OPEN, &true)
            .await
            .expect("seed");

        let service = build(tabs, session);
        assert!(!service.global_open());
        service.startup().await;
        assert!(service.global_open());
    }

    #[tokio::test]
    async fn toggle_persists_and_auto_links_valid_tab() {
        let tabs = Arc::new(MemoryTabs::new());
        let tab = tabs.open_tab(1, TENANT_URL, "WFM");
        let session = Arc::new(MemoryStore::new());
        let service = build(tabs, session.clone());
        service.startup().await;

        assert!(service.toggle(Some(&tab)).await);
        assert_eq!(
            session.peek(keys::GLOBAL_OPEN).and_then(|v| v.as_bool()),
            Some(true)
        );
        assert_eq!(service.tracker.current().status, LinkStatus::Ok);

        assert!(!service.toggle(None).await);
        assert_eq!(
            session.peek(keys::GLOBAL_OPEN).and_then(|v| v.as_bool()),
            Some(false)
        );
    }

    #[tokio::test]
    async fn toggle_on_invalid_tab_records_the_reason() {
        let tabs = Arc::new(MemoryTabs::new());
        let tab = tabs.open_tab(1, "https://foo.prd.mykronos.com/authn/login", "Login");
        let service = build(tabs, Arc::new(MemoryStore::new()));
        service.startup().await;

        service.toggle(Some(&tab)).await;
        let state = service.tracker.current();
        assert_eq!(state.status, LinkStatus::Stale);
        assert_eq!(
            state.validation_message,
            "Invalid Login - Authentication Required"
        );
    }

    #[tokio::test]
    async fn event_loop_marks_closed_on_tab_removal() {
        let tabs = Arc::new(MemoryTabs::new());
        let tab = tabs.open_tab(1, TENANT_URL, "WFM");
        let service = build(tabs.clone(), Arc::new(MemoryStore::new()));
        service.startup().await;
        service.tracker.link_to_tab(&tab).await.expect("link");

        let worker = service.spawn();
        let mut states = service.tracker.subscribe();
        tabs.close_tab(tab.id);

        // Wait for the event loop to apply the transition.
        loop {
            states.changed().await.expect("tracker alive");
            if states.borrow().status == LinkStatus::Closed {
                break;
            }
        }
        worker.abort();
    }

    #[tokio::test]
    async fn event_loop_marks_stale_on_navigation_away() {
        let tabs = Arc::new(MemoryTabs::new());
        let tab = tabs.open_tab(1, TENANT_URL, "WFM");
        let service = build(tabs.clone(), Arc::new(MemoryStore::new()));
        service.startup().await;
        service.tracker.link_to_tab(&tab).await.expect("link");

        let worker = service.spawn();
        let mut states = service.tracker.subscribe();
        tabs.navigate(tab.id, "https://foo.prd.mykronos.com/wfd/unauthorized");

        loop {
            states.changed().await.expect("tracker alive");
            if states.borrow().status == LinkStatus::Stale {
                break;
            }
        }
        worker.abort();
    }
}
