//! Tab-query capability: the browser surface the link tracker and token
//! manager run against. Trait-based for mock injection; [`MemoryTabs`]
//! backs tests and the simulated demo.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use hermes_core::link::{TabId, WindowId};
use hermes_core::HermesError;

// ─── Types ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tab {
    pub id: TabId,
    pub window_id: WindowId,
    pub url: String,
    pub title: String,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowState {
    #[default]
    Normal,
    Maximized,
    Fullscreen,
    Minimized,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowInfo {
    pub id: WindowId,
    pub focused: bool,
    pub state: WindowState,
    /// Private windows cannot issue credentialed fetches; the token
    /// manager falls back to tab-based retrieval there.
    pub incognito: bool,
}

/// Browser tab events the background service reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TabEvent {
    Removed(TabId),
    Navigated {
        tab_id: TabId,
        url: String,
        title: String,
    },
}

// ─── Capabilities ────────────────────────────────────────────────────

#[async_trait]
pub trait TabHost: Send + Sync {
    /// Active tab of the focused window, if any.
    async fn active_tab(&self) -> Option<Tab>;

    /// Look up a tab by id. `None` when the tab no longer exists.
    async fn tab(&self, id: TabId) -> Option<Tab>;

    /// Open a URL in a new inactive tab (the incognito token fallback).
    async fn create_background_tab(&self, url: &str) -> Result<Tab, HermesError>;

    async fn remove_tab(&self, id: TabId) -> Result<(), HermesError>;

    async fn activate_tab(&self, id: TabId) -> Result<(), HermesError>;

    async fn window(&self, id: WindowId) -> Option<WindowInfo>;

    /// Window hosting the foreground UI (for the incognito check).
    async fn current_window(&self) -> Option<WindowInfo>;

    /// Bring a window to the foreground. `restore` carries the window's
    /// prior non-normal state so focusing does not clobber a maximized or
    /// fullscreen window.
    async fn focus_window(
        &self,
        id: WindowId,
        restore: Option<WindowState>,
    ) -> Result<(), HermesError>;

    /// Subscribe to tab update/remove events.
    fn subscribe(&self) -> broadcast::Receiver<TabEvent>;
}

/// Scripted-extraction capability: read a page's rendered text (the
/// token JSON the fallback flow scrapes from the opened tab).
#[async_trait]
pub trait PageExtractor: Send + Sync {
    async fn page_text(&self, tab_id: TabId) -> Result<Option<String>, HermesError>;
}

// ─── In-memory implementation ────────────────────────────────────────

#[derive(Debug, Default)]
struct MemoryTabsInner {
    tabs: HashMap<TabId, Tab>,
    windows: HashMap<WindowId, WindowInfo>,
    page_texts: HashMap<TabId, String>,
    /// Page texts assigned to background tabs as they are created.
    queued_page_texts: VecDeque<String>,
    active: Option<TabId>,
    current_window: Option<WindowId>,
    next_tab_id: TabId,
}

/// Simulated browser for tests and the demo. Counts `tab()` lookups so
/// tests can assert revalidation collapsing, and can add artificial
/// latency to widen await windows.
pub struct MemoryTabs {
    inner: Mutex<MemoryTabsInner>,
    events: broadcast::Sender<TabEvent>,
    lookup_calls: AtomicUsize,
    latency: Mutex<Option<Duration>>,
}

impl Default for MemoryTabs {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTabs {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            inner: Mutex::new(MemoryTabsInner {
                next_tab_id: 1,
                ..Default::default()
            }),
            events,
            lookup_calls: AtomicUsize::new(0),
            latency: Mutex::new(None),
        }
    }

    /// Delay every tab lookup, widening the await window for
    /// interleaving tests.
    #[must_use]
    pub fn with_lookup_latency(self, latency: Duration) -> Self {
        *self.latency.lock().expect("tabs lock") = Some(latency);
        self
    }

    /// Number of `tab()` lookups issued so far.
    pub fn lookup_calls(&self) -> usize {
        self.lookup_calls.load(Ordering::SeqCst)
    }

    /// Open a tab in the given window, creating the window on first use.
    /// The new tab becomes active.
    pub fn open_tab(&self, window_id: WindowId, url: &str, title: &str) -> Tab {
        let mut inner = self.inner.lock().expect("tabs lock");
        let id = inner.next_tab_id;
        inner.next_tab_id += 1;
        let tab = Tab {
            id,
            window_id,
            url: url.to_string(),
            title: title.to_string(),
        };
        inner.tabs.insert(id, tab.clone());
        inner.windows.entry(window_id).or_insert(WindowInfo {
            id: window_id,
            focused: true,
            state: WindowState::Normal,
            incognito: false,
        });
        inner.active = Some(id);
        inner.current_window.get_or_insert(window_id);
        tab
    }

    /// Navigate an existing tab, emitting the matching event.
    pub fn navigate(&self, tab_id: TabId, url: &str) {
        let mut inner = self.inner.lock().expect("tabs lock");
        let Some(tab) = inner.tabs.get_mut(&tab_id) else {
            return;
        };
        tab.url = url.to_string();
        let title = tab.title.clone();
        drop(inner);
        let _ = self.events.send(TabEvent::Navigated {
            tab_id,
            url: url.to_string(),
            title,
        });
    }

    /// Close a tab, emitting the removal event.
    pub fn close_tab(&self, tab_id: TabId) {
        let mut inner = self.inner.lock().expect("tabs lock");
        if inner.tabs.remove(&tab_id).is_none() {
            return;
        }
        inner.page_texts.remove(&tab_id);
        if inner.active == Some(tab_id) {
            inner.active = None;
        }
        drop(inner);
        let _ = self.events.send(TabEvent::Removed(tab_id));
    }

    pub fn set_active(&self, tab_id: TabId) {
        let mut inner = self.inner.lock().expect("tabs lock");
        if inner.tabs.contains_key(&tab_id) {
            inner.active = Some(tab_id);
        }
    }

    pub fn set_window_state(&self, window_id: WindowId, state: WindowState) {
        let mut inner = self.inner.lock().expect("tabs lock");
        if let Some(w) = inner.windows.get_mut(&window_id) {
            w.state = state;
        }
    }

    pub fn set_incognito(&self, window_id: WindowId, incognito: bool) {
        let mut inner = self.inner.lock().expect("tabs lock");
        if let Some(w) = inner.windows.get_mut(&window_id) {
            w.incognito = incognito;
        }
    }

    pub fn set_page_text(&self, tab_id: TabId, text: &str) {
        let mut inner = self.inner.lock().expect("tabs lock");
        inner.page_texts.insert(tab_id, text.to_string());
    }

    /// Queue rendered page text for the next background tab created (the
    /// token JSON the fallback flow will scrape).
    pub fn queue_page_text(&self, text: &str) {
        let mut inner = self.inner.lock().expect("tabs lock");
        inner.queued_page_texts.push_back(text.to_string());
    }

    pub fn window_state(&self, window_id: WindowId) -> Option<WindowState> {
        let inner = self.inner.lock().expect("tabs lock");
        inner.windows.get(&window_id).map(|w| w.state)
    }

    pub fn active_tab_id(&self) -> Option<TabId> {
        self.inner.lock().expect("tabs lock").active
    }

    pub fn tab_exists(&self, tab_id: TabId) -> bool {
        self.inner.lock().expect("tabs lock").tabs.contains_key(&tab_id)
    }

    async fn apply_latency(&self) {
        let latency = *self.latency.lock().expect("tabs lock");
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl TabHost for MemoryTabs {
    async fn active_tab(&self) -> Option<Tab> {
        self.apply_latency().await;
        let inner = self.inner.lock().expect("tabs lock");
        inner.active.and_then(|id| inner.tabs.get(&id).cloned())
    }

    async fn tab(&self, id: TabId) -> Option<Tab> {
        self.lookup_calls.fetch_add(1, Ordering::SeqCst);
        self.apply_latency().await;
        self.inner.lock().expect("tabs lock").tabs.get(&id).cloned()
    }

    async fn create_background_tab(&self, url: &str) -> Result<Tab, HermesError> {
        let mut inner = self.inner.lock().expect("tabs lock");
        let id = inner.next_tab_id;
        inner.next_tab_id += 1;
        let window_id = inner.current_window.unwrap_or(1);
        let tab = Tab {
            id,
            window_id,
            url: url.to_string(),
            title: String::new(),
        };
        inner.tabs.insert(id, tab.clone());
        if let Some(text) = inner.queued_page_texts.pop_front() {
            inner.page_texts.insert(id, text);
        }
        Ok(tab)
    }

    async fn remove_tab(&self, id: TabId) -> Result<(), HermesError> {
        let mut inner = self.inner.lock().expect("tabs lock");
        inner.tabs.remove(&id);
        inner.page_texts.remove(&id);
        Ok(())
    }

    async fn activate_tab(&self, id: TabId) -> Result<(), HermesError> {
        let mut inner = self.inner.lock().expect("tabs lock");
        if !inner.tabs.contains_key(&id) {
            return Err(HermesError::LinkedTabClosed);
        }
        inner.active = Some(id);
        Ok(())
    }

    async fn window(&self, id: WindowId) -> Option<WindowInfo> {
        self.inner.lock().expect("tabs lock").windows.get(&id).copied()
    }

    async fn current_window(&self) -> Option<WindowInfo> {
        let inner = self.inner.lock().expect("tabs lock");
        inner
            .current_window
            .and_then(|id| inner.windows.get(&id).copied())
    }

    async fn focus_window(
        &self,
        id: WindowId,
        restore: Option<WindowState>,
    ) -> Result<(), HermesError> {
        let mut inner = self.inner.lock().expect("tabs lock");
        for w in inner.windows.values_mut() {
            w.focused = w.id == id;
        }
        let Some(w) = inner.windows.get_mut(&id) else {
            return Err(HermesError::LinkedTabClosed);
        };
        // Only overwrite the state when the caller asks for a restore;
        // focusing must not knock a maximized window back to normal.
        if let Some(state) = restore {
            w.state = state;
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<TabEvent> {
        self.events.subscribe()
    }
}

#[async_trait]
impl PageExtractor for MemoryTabs {
    async fn page_text(&self, tab_id: TabId) -> Result<Option<String>, HermesError> {
        let inner = self.inner.lock().expect("tabs lock");
        Ok(inner.page_texts.get(&tab_id).cloned())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────
