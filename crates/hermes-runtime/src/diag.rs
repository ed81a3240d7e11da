//! Diagnostic sink: mirrors runtime events into `tracing` and appends
//! failures to the bounded circular log in the durable store.
//!
//! Appends happen unconditionally — console verbosity is controlled by
//! the tracing filter, but the persisted log always records network and
//! storage failures so post-hoc diagnosis works.

use std::sync::Arc;

use chrono::Utc;

use hermes_browser::{KeyValueStore, get_json, set_json};
use hermes_core::diaglog::{DiagLog, LogEntry, LogLevel};

use crate::keys;

pub struct DiagSink {
    durable: Arc<dyn KeyValueStore>,
}

impl DiagSink {
    pub fn new(durable: Arc<dyn KeyValueStore>) -> Self {
        Self { durable }
    }

    pub async fn error(&self, message: impl Into<String>) {
        self.record(LogLevel::Error, message.into()).await;
    }

    pub async fn warn(&self, message: impl Into<String>) {
        self.record(LogLevel::Warn, message.into()).await;
    }

    pub async fn info(&self, message: impl Into<String>) {
        self.record(LogLevel::Info, message.into()).await;
    }

    async fn record(&self, level: LogLevel, message: String) {
        match level {
            LogLevel::Error => tracing::error!("{message}"),
            LogLevel::Warn => tracing::warn!("{message}"),
            LogLevel::Info => tracing::info!("{message}"),
            LogLevel::Debug => tracing::debug!("{message}"),
        }

        // Read-modify-write of the log array; the cap is enforced by
        // DiagLog. A store that rejects the append only loses the entry,
        // never the operation that produced it.
        let entries = match get_json::<Vec<LogEntry>>(self.durable.as_ref(), keys::DIAG_LOG).await {
            Ok(entries) => entries.unwrap_or_default(),
            Err(e) => {
                tracing::warn!("diag log read failed: {e}");
                Vec::new()
            }
        };
        let mut log = DiagLog::from_entries(entries);
        log.push(level, message, Utc::now());
        if let Err(e) = set_json(self.durable.as_ref(), keys::DIAG_LOG, &log.to_entries()).await {
            tracing::warn!("diag log write failed: {e}");
        }
    }
}
