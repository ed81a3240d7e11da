//! Countdown timer driver for the two token timers.
//!
//! Exactly one access timer and one refresh timer exist system-wide;
//! starting a new one aborts the previous. Each 1-second tick recomputes
//! the remaining time from the expiry timestamp (the source of truth),
//! renders `mm:ss`, and checkpoints the counter to the session store so
//! a reloaded panel can show something immediately. At zero the timer
//! stops itself and renders `--:--`; it never auto-refreshes.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use hermes_browser::{KeyValueStore, set_json};
use hermes_core::timer::{TIMER_EXPIRED, format_mm_ss, remaining_seconds, restore_display};
use hermes_core::token::TenantCredentialRecord;

use crate::keys;

const TICK: Duration = Duration::from_secs(1);

/// Rendered `mm:ss` values for the UI layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerDisplay {
    pub access: String,
    pub refresh: String,
}

impl Default for TimerDisplay {
    fn default() -> Self {
        Self {
            access: TIMER_EXPIRED.to_string(),
            refresh: TIMER_EXPIRED.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerKind {
    Access,
    Refresh,
}

impl TimerKind {
    fn checkpoint_key(self) -> &'static str {
        match self {
            Self::Access => keys::ACCESS_TIMER_CHECKPOINT,
            Self::Refresh => keys::REFRESH_TIMER_CHECKPOINT,
        }
    }

    fn apply(self, display: &mut TimerDisplay, value: String) {
        match self {
            Self::Access => display.access = value,
            Self::Refresh => display.refresh = value,
        }
    }
}

pub struct CountdownDriver {
    session: Arc<dyn KeyValueStore>,
    display_tx: watch::Sender<TimerDisplay>,
    access_task: Mutex<Option<JoinHandle<()>>>,
    refresh_task: Mutex<Option<JoinHandle<()>>>,
}

impl CountdownDriver {
    pub fn new(session: Arc<dyn KeyValueStore>) -> Self {
        let (display_tx, _) = watch::channel(TimerDisplay::default());
        Self {
            session,
            display_tx,
            access_task: Mutex::new(None),
            refresh_task: Mutex::new(None),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<TimerDisplay> {
        self.display_tx.subscribe()
    }

    pub fn display(&self) -> TimerDisplay {
        self.display_tx.borrow().clone()
    }

    /// Start (or restart) the access-token countdown.
    pub fn start_access(&self, expires_at: DateTime<Utc>) {
        self.start(TimerKind::Access, expires_at);
    }

    /// Start (or restart) the refresh-token countdown.
    pub fn start_refresh(&self, expires_at: DateTime<Utc>) {
        self.start(TimerKind::Refresh, expires_at);
    }

    pub fn stop_access(&self) {
        self.stop(TimerKind::Access);
    }

    pub fn stop_refresh(&self) {
        self.stop(TimerKind::Refresh);
    }

    /// Recover both timers from a stored record after a reload. Remaining
    /// time comes from the expiry timestamps, never from the persisted
    /// checkpoint counters.
    pub fn restore_from_record(&self, record: Option<&TenantCredentialRecord>, now: DateTime<Utc>) {
        let (access_at, refresh_at) = match record {
            Some(r) => (
                r.access_token.as_ref().and(r.access_token_expires_at),
                r.refresh_token.as_ref().and(r.refresh_token_expires_at),
            ),
            None => (None, None),
        };

        match access_at.filter(|at| now < *at) {
            Some(at) => self.start_access(at),
            None => {
                self.stop(TimerKind::Access);
                let display = restore_display(access_at, now);
                self.display_tx
                    .send_modify(|d| TimerKind::Access.apply(d, display));
            }
        }
        match refresh_at.filter(|at| now < *at) {
            Some(at) => self.start_refresh(at),
            None => {
                self.stop(TimerKind::Refresh);
                let display = restore_display(refresh_at, now);
                self.display_tx
                    .send_modify(|d| TimerKind::Refresh.apply(d, display));
            }
        }
    }

    fn start(&self, kind: TimerKind, expires_at: DateTime<Utc>) {
        let session = Arc::clone(&self.session);
        let tx = self.display_tx.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(TICK);
            loop {
                interval.tick().await;
                let remaining = remaining_seconds(expires_at, Utc::now());
                tx.send_modify(|d| kind.apply(d, format_mm_ss(remaining)));

                if remaining <= 0 {
                    let _ = session.remove(&[kind.checkpoint_key()]).await;
                    tracing::info!(kind = ?kind, "token timer expired");
                    break;
                }
                if let Err(e) = set_json(session.as_ref(), kind.checkpoint_key(), &remaining).await
                {
                    tracing::warn!("timer checkpoint write failed: {e}");
                }
            }
        });

        // One timer of each kind system-wide: the previous one dies here.
        if let Some(prev) = self.task_slot(kind).lock().expect("timer lock").replace(handle) {
            prev.abort();
        }
    }

    fn stop(&self, kind: TimerKind) {
        if let Some(task) = self.task_slot(kind).lock().expect("timer lock").take() {
            task.abort();
        }
        self.display_tx
            .send_modify(|d| kind.apply(d, TIMER_EXPIRED.to_string()));
    }

    fn task_slot(&self, kind: TimerKind) -> &Mutex<Option<JoinHandle<()>>> {
        match kind {
            TimerKind::Access => &self.access_task,
            TimerKind::Refresh => &self.refresh_task,
        }
    }
}

impl Drop for CountdownDriver {
    fn drop(&mut self) {
        for slot in [&self.access_task, &self.refresh_task] {
            if let Ok(mut guard) = slot.lock() {
                if let Some(task) = guard.take() {
                    task.abort();
                }
            }
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────
