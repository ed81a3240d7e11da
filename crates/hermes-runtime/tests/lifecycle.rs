//! End-to-end lifecycle through the public runtime handle: open the
//! panel on a tenant tab, fetch and refresh tokens, lose the tab, and
//! recover state after a simulated reload.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use serde_json::json;

use hermes_browser::{MemoryStore, MemoryTabs, ScriptedTokenEndpoint};
use hermes_core::link::LinkStatus;
use hermes_core::{HermesError, expire_check};
use hermes_runtime::{Environment, Hermes};

const TENANT_URL: &str = "https://acme.prd.mykronos.com/wfd/home";
const VANITY_BASE: &str = "https://acme-nosso.prd.mykronos.com/";

struct Rig {
    tabs: Arc<MemoryTabs>,
    session: Arc<MemoryStore>,
    durable: Arc<MemoryStore>,
    endpoint: Arc<ScriptedTokenEndpoint>,
}

impl Rig {
    fn new() -> Self {
        Self {
            tabs: Arc::new(MemoryTabs::new()),
            session: Arc::new(MemoryStore::new()),
            durable: Arc::new(MemoryStore::new()),
            endpoint: Arc::new(ScriptedTokenEndpoint::new()),
        }
    }

    fn hermes(&self) -> Hermes {
        Hermes::new(Environment {
            tabs: self.tabs.clone(),
            extractor: self.tabs.clone(),
            session: self.session.clone(),
            durable: self.durable.clone(),
            endpoint: self.endpoint.clone(),
        })
    }
}

fn fetch_body() -> serde_json::Value {
    json!({ "accessToken": "AT", "refreshToken": "RT", "expiresInSeconds": 3600 })
}

#[tokio::test]
async fn panel_lifecycle_from_link_to_tab_loss() {
    let rig = Rig::new();
    let hermes = rig.hermes();
    let worker = hermes.startup().await;

    // Toggle on a valid tenant tab: panel opens and the tab is linked.
    let tab = rig.tabs.open_tab(1, TENANT_URL, "Workforce");
    assert!(hermes.toggle_panel(Some(&tab)).await);
    assert_eq!(hermes.link_state().status, LinkStatus::Ok);
    assert_eq!(
        hermes.current_tenant_base_url().await.as_deref(),
        Some(VANITY_BASE)
    );

    // Fetch a token pair against the resolved tenant.
    rig.endpoint.push_fetch(Ok(fetch_body()));
    let pair = hermes
        .fetch_access_token(VANITY_BASE, "client-1")
        .await
        .expect("fetch");
    assert_eq!(pair.access_token, "AT");

    let record = hermes
        .credential_record(VANITY_BASE)
        .await
        .expect("read")
        .expect("stored");
    let validity = expire_check(&record, Utc::now());
    assert!(validity.access_valid);
    assert!(validity.refresh_valid);
    // The refresh window is a fixed 8 hours; it outlives the access token.
    assert!(
        record.refresh_token_expires_at.expect("refresh expiry")
            > record.access_token_expires_at.expect("access expiry")
    );

    // Refresh needs the client secret on file first.
    assert_eq!(
        hermes.refresh_access_token(VANITY_BASE).await,
        Err(HermesError::MissingClientSecret)
    );
    hermes
        .save_client_secret(VANITY_BASE, "secret")
        .await
        .expect("save secret");
    rig.endpoint
        .push_refresh(Ok(json!({ "access_token": "AT2", "expires_in": 1800 })));
    let pair = hermes
        .refresh_access_token(VANITY_BASE)
        .await
        .expect("refresh");
    assert_eq!(pair.access_token, "AT2");
    assert_eq!(pair.refresh_token.as_deref(), Some("RT"));

    // Closing the linked tab kills the link via the background loop.
    let mut states = hermes.subscribe_link();
    rig.tabs.close_tab(tab.id);
    loop {
        states.changed().await.expect("runtime alive");
        if states.borrow().status == LinkStatus::Closed {
            break;
        }
    }
    assert_eq!(
        hermes.switch_to_linked_tab().await,
        Err(HermesError::NoLinkedTab)
    );

    worker.abort();
}

/// Parse a rendered `mm:ss` display back into seconds. Minutes may
/// exceed two digits for long windows.
fn displayed_seconds(display: &str) -> i64 {
    let (m, s) = display.split_once(':').expect("mm:ss display");
    m.parse::<i64>().expect("minutes") * 60 + s.parse::<i64>().expect("seconds")
}

#[tokio::test]
async fn fetch_starts_both_countdowns_and_refresh_restarts_only_access() {
    let rig = Rig::new();
    rig.tabs.open_tab(1, TENANT_URL, "Workforce");
    let hermes = rig.hermes();
    let worker = hermes.startup().await;

    // Before any token exists, nothing is counting down.
    assert_eq!(hermes.timer_display().access, "--:--");
    assert_eq!(hermes.timer_display().refresh, "--:--");

    rig.endpoint.push_fetch(Ok(fetch_body()));
    hermes
        .fetch_access_token(VANITY_BASE, "client-1")
        .await
        .expect("fetch");
    tokio::time::sleep(Duration::from_millis(50)).await;

    // The awaited fetch started both countdowns: access near 3600s,
    // refresh near the fixed 8h window.
    let display = hermes.timer_display();
    let access = displayed_seconds(&display.access);
    assert!((3590..=3600).contains(&access), "access showed {access}s");
    let refresh = displayed_seconds(&display.refresh);
    assert!(
        (8 * 3600 - 10..=8 * 3600).contains(&refresh),
        "refresh showed {refresh}s"
    );

    // Refresh restarts the access countdown from the new lifetime and
    // leaves the refresh countdown on its original schedule.
    hermes
        .save_client_secret(VANITY_BASE, "secret")
        .await
        .expect("save secret");
    rig.endpoint
        .push_refresh(Ok(json!({ "access_token": "AT2", "expires_in": 1800 })));
    hermes
        .refresh_access_token(VANITY_BASE)
        .await
        .expect("refresh");
    tokio::time::sleep(Duration::from_millis(50)).await;

    let display = hermes.timer_display();
    let access = displayed_seconds(&display.access);
    assert!((1790..=1800).contains(&access), "access showed {access}s");
    let refresh = displayed_seconds(&display.refresh);
    assert!(
        (8 * 3600 - 10..=8 * 3600).contains(&refresh),
        "refresh showed {refresh}s"
    );

    worker.abort();
}

#[tokio::test]
async fn reload_recovers_link_open_flag_and_timers() {
    let rig = Rig::new();
    let tab = rig.tabs.open_tab(1, TENANT_URL, "Workforce");

    // First life: open, link, fetch.
    {
        let hermes = rig.hermes();
        let worker = hermes.startup().await;
        hermes.toggle_panel(Some(&tab)).await;
        rig.endpoint.push_fetch(Ok(fetch_body()));
        hermes
            .fetch_access_token(VANITY_BASE, "client-1")
            .await
            .expect("fetch");
        worker.abort();
    }

    // Second life over the same stores: state comes back without any
    // user action, timers recomputed from the stored expiries.
    let hermes = rig.hermes();
    let worker = hermes.startup().await;
    assert!(hermes.panel_open());
    assert_eq!(hermes.link_state().status, LinkStatus::Ok);
    assert_eq!(hermes.link_state().linked_tab_id, Some(tab.id));

    tokio::time::sleep(Duration::from_millis(50)).await;
    let display = hermes.timer_display();
    assert_ne!(display.access, "--:--");
    assert_ne!(display.refresh, "--:--");

    worker.abort();
}

#[tokio::test]
async fn expired_stored_tokens_do_not_restart_timers() {
    let rig = Rig::new();
    rig.tabs.open_tab(1, TENANT_URL, "Workforce");

    {
        let hermes = rig.hermes();
        let worker = hermes.startup().await;
        rig.endpoint.push_fetch(Ok(fetch_body()));
        hermes
            .fetch_access_token(VANITY_BASE, "client-1")
            .await
            .expect("fetch");
        worker.abort();
    }

    // Age the stored record past both expiries.
    let mut map: std::collections::HashMap<String, hermes_core::TenantCredentialRecord> =
        serde_json::from_value(rig.durable.peek("hermesClients").expect("stored"))
            .expect("valid map");
    let record = map.get_mut(VANITY_BASE).expect("record");
    let past = Utc::now() - ChronoDuration::minutes(1);
    record.access_token_expires_at = Some(past);
    record.refresh_token_expires_at = Some(past);
    hermes_browser::set_json(rig.durable.as_ref(), "hermesClients", &map)
        .await
        .expect("write back");

    let hermes = rig.hermes();
    let worker = hermes.startup().await;
    let display = hermes.timer_display();
    assert_eq!(display.access, "--:--");
    assert_eq!(display.refresh, "--:--");

    worker.abort();
}
