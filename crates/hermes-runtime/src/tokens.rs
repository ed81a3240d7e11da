//! Token lifecycle manager: fetch, refresh, and edit per-tenant
//! credential records in the durable store.
//!
//! Every mutation funnels through [`TokenManager::mutate`], which
//! re-reads the full credential map immediately before writing and
//! merges only the fields the operation owns — a token fetch and a
//! manual client-secret edit interleaved at the await boundary both
//! land.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::Mutex;

use hermes_browser::{KeyValueStore, PageExtractor, TabHost, TokenEndpoint, get_json, set_json};
use hermes_core::token::{
    self, TenantCredentialRecord, TokenPair,
};
use hermes_core::HermesError;

use crate::diag::DiagSink;
use crate::keys;

/// Settle delay before scraping the token JSON from the fallback tab.
/// A fixed delay, not a readiness signal: the tab just navigated to a
/// same-origin page we control the timing of.
pub const FALLBACK_SETTLE_DELAY: Duration = Duration::from_millis(1500);

type CredentialMap = HashMap<String, TenantCredentialRecord>;

pub struct TokenManager {
    durable: Arc<dyn KeyValueStore>,
    endpoint: Arc<dyn TokenEndpoint>,
    tabs: Arc<dyn TabHost>,
    extractor: Arc<dyn PageExtractor>,
    diag: Arc<DiagSink>,
    /// Serializes read-modify-write of the credential map within this
    /// process. The store itself stays lock-free.
    write_lock: Mutex<()>,
}

impl TokenManager {
    pub fn new(
        durable: Arc<dyn KeyValueStore>,
        endpoint: Arc<dyn TokenEndpoint>,
        tabs: Arc<dyn TabHost>,
        extractor: Arc<dyn PageExtractor>,
        diag: Arc<DiagSink>,
    ) -> Self {
        Self {
            durable,
            endpoint,
            tabs,
            extractor,
            diag,
            write_lock: Mutex::new(()),
        }
    }

    /// Credential record for a tenant, if one exists.
    pub async fn record(
        &self,
        base_url: &str,
    ) -> Result<Option<TenantCredentialRecord>, HermesError> {
        Ok(self.load_map().await?.remove(base_url))
    }

    /// Fetch a fresh token pair with the tenant's ambient web session.
    ///
    /// Picks the direct credentialed fetch, or the tab-based fallback
    /// when running in a private window where credentialed fetch is not
    /// available. Both paths persist the same record shape.
    pub async fn fetch_access_token(
        &self,
        base_url: &str,
        client_id: &str,
    ) -> Result<TokenPair, HermesError> {
        let url = token::token_url(base_url, client_id);
        let incognito = self
            .tabs
            .current_window()
            .await
            .is_some_and(|w| w.incognito);

        let body = if incognito {
            tracing::info!("private window, using tab-based token retrieval");
            self.fetch_body_via_tab(&url).await?
        } else {
            self.logged(self.endpoint.fetch_token(&url).await).await?
        };

        let now = Utc::now();
        let pair = token::parse_fetch_response(&body, now)?;

        let base = base_url.to_string();
        let id = client_id.to_string();
        let url2 = url.clone();
        let pair2 = pair.clone();
        self.mutate(move |map| {
            let record = map
                .entry(base.clone())
                .or_insert_with(|| TenantCredentialRecord::new(&base, id.clone(), now));
            record.client_id = id;
            record.token_url = url2;
            record.apply_fetched(&pair2, now);
        })
        .await?;

        tracing::info!(%base_url, "token fetched and saved");
        Ok(pair)
    }

    /// Incognito fallback: render the token endpoint in a background
    /// tab, scrape the JSON it displays, then close the tab. A page with
    /// no extractable JSON fails without touching the stored record.
    async fn fetch_body_via_tab(&self, url: &str) -> Result<Value, HermesError> {
        let tab = self.tabs.create_background_tab(url).await?;
        tokio::time::sleep(FALLBACK_SETTLE_DELAY).await;

        let text = self.extractor.page_text(tab.id).await;
        // The scratch tab goes away no matter how extraction went.
        if let Err(e) = self.tabs.remove_tab(tab.id).await {
            tracing::warn!("failed to close token tab: {e}");
        }

        let text = text?.ok_or_else(|| {
            HermesError::InvalidTokenResponse("no token JSON found on the page".to_string())
        })?;
        serde_json::from_str(&text).map_err(|e| {
            HermesError::InvalidTokenResponse(format!("page text is not JSON: {e}"))
        })
    }

    /// Exchange the stored refresh token for a new access token.
    ///
    /// Precondition failures (no refresh token, refresh token expired,
    /// missing client secret) fail fast before any network call. On
    /// success only the access-token fields are replaced.
    pub async fn refresh_access_token(&self, base_url: &str) -> Result<TokenPair, HermesError> {
        let record = self
            .record(base_url)
            .await?
            .ok_or(HermesError::NoValidRefreshToken)?;
        let inputs = token::refresh_preconditions(&record, Utc::now())?;

        let body = self
            .logged(
                self.endpoint
                    .refresh_token(&token::refresh_url(base_url), &token::refresh_form(&inputs))
                    .await,
            )
            .await?;

        let now = Utc::now();
        let (access_token, expires_at) = token::parse_refresh_response(&body, now)?;

        let base = base_url.to_string();
        let access = access_token.clone();
        self.mutate(move |map| {
            if let Some(r) = map.get_mut(&base) {
                r.apply_refreshed(access, expires_at, now);
            }
        })
        .await?;

        tracing::info!(%base_url, "access token refreshed");
        Ok(TokenPair {
            access_token,
            access_token_expires_at: expires_at,
            refresh_token: record.refresh_token,
            refresh_token_expires_at: record.refresh_token_expires_at,
        })
    }

    /// Save a client id, deriving the tenant's token URL and default API
    /// URL. Creates the record when none exists.
    pub async fn save_client_id(&self, base_url: &str, client_id: &str) -> Result<(), HermesError> {
        let now = Utc::now();
        let base = base_url.to_string();
        let id = client_id.to_string();
        self.mutate(move |map| {
            let record = map
                .entry(base.clone())
                .or_insert_with(|| TenantCredentialRecord::new(&base, id.clone(), now));
            record.token_url = token::token_url(&base, &id);
            record.api_url = token::default_api_url(&base);
            record.client_id = id;
            record.last_edited_at = now;
        })
        .await?;
        Ok(())
    }

    /// Save a client secret on the tenant's record.
    pub async fn save_client_secret(
        &self,
        base_url: &str,
        client_secret: &str,
    ) -> Result<(), HermesError> {
        let now = Utc::now();
        let base = base_url.to_string();
        let secret = client_secret.to_string();
        self.mutate(move |map| {
            let record = map
                .entry(base.clone())
                .or_insert_with(|| TenantCredentialRecord::new(&base, "", now));
            record.client_secret = Some(secret);
            record.last_edited_at = now;
        })
        .await?;
        Ok(())
    }

    /// Explicit user action: drop one tenant's record. The only deletion
    /// path — expiry never removes records.
    pub async fn clear_tenant(&self, base_url: &str) -> Result<(), HermesError> {
        let base = base_url.to_string();
        self.mutate(move |map| {
            map.remove(&base);
        })
        .await?;
        Ok(())
    }

    /// All records, for the admin surface.
    pub async fn all_records(&self) -> Result<CredentialMap, HermesError> {
        self.load_map().await
    }

    async fn load_map(&self) -> Result<CredentialMap, HermesError> {
        match get_json::<CredentialMap>(self.durable.as_ref(), keys::CLIENT_DATA).await {
            Ok(map) => Ok(map.unwrap_or_default()),
            Err(e) => {
                self.diag.error(format!("credential map read failed: {e}")).await;
                Err(e)
            }
        }
    }

    /// Serialized read-modify-write: re-read the map immediately before
    /// writing so interleaved operations never blind-overwrite each
    /// other's fields.
    async fn mutate(
        &self,
        f: impl FnOnce(&mut CredentialMap) + Send,
    ) -> Result<(), HermesError> {
        let _guard = self.write_lock.lock().await;
        let mut map = self.load_map().await?;
        f(&mut map);
        if let Err(e) = set_json(self.durable.as_ref(), keys::CLIENT_DATA, &map).await {
            self.diag.error(format!("credential map write failed: {e}")).await;
            return Err(e);
        }
        Ok(())
    }

    /// Log network failures to the circular log unconditionally before
    /// propagating.
    async fn logged(&self, result: Result<Value, HermesError>) -> Result<Value, HermesError> {
        if let Err(e) = &result {
            self.diag.error(format!("token endpoint call failed: {e}")).await;
        }
        result
    }
}

// ─── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use serde_json::json;

    use hermes_browser::{MemoryStore, MemoryTabs, ScriptedTokenEndpoint};
    use hermes_core::token::expire_check;

    const BASE: &str = "https://foo-nosso.prd.mykronos.com/";

    struct Rig {
        durable: Arc<MemoryStore>,
        endpoint: Arc<ScriptedTokenEndpoint>,
        tabs: Arc<MemoryTabs>,
        manager: TokenManager,
    }

    fn rig() -> Rig {
        let durable = Arc::new(MemoryStore::new());
        let endpoint = Arc::new(ScriptedTokenEndpoint::new());
        let tabs = Arc::new(MemoryTabs::new());
        tabs.open_tab(1, "https://foo.prd.mykronos.com/wfd/home", "WFM");
        let diag = Arc::new(DiagSink::new(Arc::new(MemoryStore::new()) as _));
        let manager = TokenManager::new(
            durable.clone() as _,
            endpoint.clone() as _,
            tabs.clone() as _,
            tabs.clone() as _,
            diag,
        );
        Rig {
            durable,
            endpoint,
            tabs,
            manager,
        }
    }

    fn fetch_body() -> Value {
        json!({ "accessToken": "AT", "refreshToken": "RT", "expiresInSeconds": 3600 })
    }

    #[tokio::test]
    async fn fetch_persists_record_with_both_expiries() {
        let r = rig();
        r.endpoint.push_fetch(Ok(fetch_body()));

        let before = Utc::now();
        let pair = r
            .manager
            .fetch_access_token(BASE, "my-client")
            .await
            .expect("fetch");
        let after = Utc::now();

        let record = r.manager.record(BASE).await.expect("read").expect("stored");
        assert_eq!(record.access_token.as_deref(), Some("AT"));
        assert_eq!(record.refresh_token.as_deref(), Some("RT"));
        assert_eq!(record.client_id, "my-client");

        // access expiry = now + 3600s, refresh expiry = now + 8h.
        let access_at = record.access_token_expires_at.expect("access expiry");
        assert!(access_at >= before + ChronoDuration::seconds(3600));
        assert!(access_at <= after + ChronoDuration::seconds(3600));
        let refresh_at = record.refresh_token_expires_at.expect("refresh expiry");
        assert!(refresh_at >= before + ChronoDuration::hours(8));
        assert!(refresh_at <= after + ChronoDuration::hours(8));

        let validity = expire_check(&record, Utc::now());
        assert!(validity.access_valid);
        assert!(!expire_check(&record, access_at).access_valid);
        assert_eq!(pair.access_token, "AT");
    }

    #[tokio::test]
    async fn fetch_preserves_existing_secret_and_api_url() {
        let r = rig();
        r.manager
            .save_client_secret(BASE, "S")
            .await
            .expect("save secret");
        r.endpoint.push_fetch(Ok(fetch_body()));

        r.manager
            .fetch_access_token(BASE, "c")
            .await
            .expect("fetch");
        let record = r.manager.record(BASE).await.expect("read").expect("stored");
        assert_eq!(record.client_secret.as_deref(), Some("S"));
        assert_eq!(record.api_url, format!("{BASE}api"));
    }

    #[tokio::test]
    async fn invalid_fetch_response_writes_nothing() {
        let r = rig();
        r.endpoint
            .push_fetch(Ok(json!({ "accessToken": "AT", "refreshToken": "RT" })));

        let err = r
            .manager
            .fetch_access_token(BASE, "c")
            .await
            .expect_err("missing expiresInSeconds");
        assert!(matches!(err, HermesError::InvalidTokenResponse(_)));
        assert_eq!(r.manager.record(BASE).await.expect("read"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn incognito_fallback_matches_direct_record_shape() {
        let r = rig();
        r.tabs.set_incognito(1, true);
        r.tabs.queue_page_text(&fetch_body().to_string());

        r.manager
            .fetch_access_token(BASE, "c")
            .await
            .expect("fallback fetch");

        // No direct endpoint call; scratch tab was closed.
        assert_eq!(r.endpoint.fetch_calls(), 0);
        let record = r.manager.record(BASE).await.expect("read").expect("stored");
        assert_eq!(record.access_token.as_deref(), Some("AT"));
        assert_eq!(record.refresh_token.as_deref(), Some("RT"));
    }

    #[tokio::test(start_paused = true)]
    async fn fallback_without_json_leaves_no_half_written_record() {
        let r = rig();
        r.tabs.set_incognito(1, true);
        // No page text queued: the rendered page had no <pre> JSON.

        let err = r
            .manager
            .fetch_access_token(BASE, "c")
            .await
            .expect_err("nothing to scrape");
        assert!(matches!(err, HermesError::InvalidTokenResponse(_)));
        assert_eq!(r.manager.record(BASE).await.expect("read"), None);
    }

    #[tokio::test]
    async fn refresh_replaces_only_access_fields() {
        let r = rig();
        r.endpoint.push_fetch(Ok(fetch_body()));
        r.manager
            .fetch_access_token(BASE, "c")
            .await
            .expect("fetch");
        r.manager
            .save_client_secret(BASE, "S")
            .await
            .expect("save secret");
        let before = r.manager.record(BASE).await.expect("read").expect("stored");

        r.endpoint
            .push_refresh(Ok(json!({ "access_token": "AT2", "expires_in": 1800 })));
        let pair = r
            .manager
            .refresh_access_token(BASE)
            .await
            .expect("refresh");

        assert_eq!(pair.access_token, "AT2");
        let after = r.manager.record(BASE).await.expect("read").expect("stored");
        assert_eq!(after.access_token.as_deref(), Some("AT2"));
        assert_eq!(after.refresh_token, before.refresh_token);
        assert_eq!(
            after.refresh_token_expires_at,
            before.refresh_token_expires_at
        );
    }

    #[tokio::test]
    async fn expired_refresh_token_fails_with_zero_network_calls() {
        let r = rig();
        r.endpoint.push_fetch(Ok(fetch_body()));
        r.manager
            .fetch_access_token(BASE, "c")
            .await
            .expect("fetch");
        r.manager
            .save_client_secret(BASE, "S")
            .await
            .expect("save secret");

        // Force the refresh window into the past.
        let past = Utc::now() - ChronoDuration::minutes(1);
        let mut map = r.manager.all_records().await.expect("read");
        map.get_mut(BASE).expect("record").refresh_token_expires_at = Some(past);
        set_json(r.durable.as_ref(), keys::CLIENT_DATA, &map)
            .await
            .expect("write");

        let err = r
            .manager
            .refresh_access_token(BASE)
            .await
            .expect_err("expired refresh token");
        assert_eq!(err, HermesError::RefreshTokenExpired);
        assert_eq!(r.endpoint.refresh_calls(), 0);
    }

    #[tokio::test]
    async fn refresh_preconditions_precede_network() {
        let r = rig();
        // No record at all.
        assert_eq!(
            r.manager.refresh_access_token(BASE).await,
            Err(HermesError::NoValidRefreshToken)
        );

        // Token on file but no secret.
        r.endpoint.push_fetch(Ok(fetch_body()));
        r.manager
            .fetch_access_token(BASE, "c")
            .await
            .expect("fetch");
        assert_eq!(
            r.manager.refresh_access_token(BASE).await,
            Err(HermesError::MissingClientSecret)
        );
        assert_eq!(r.endpoint.refresh_calls(), 0);
    }

    #[tokio::test]
    async fn interleaved_mutations_lose_no_update() {
        let r = rig();
        r.manager.save_client_id(BASE, "A").await.expect("seed");

        // A slow token fetch and a manual secret edit interleave at the
        // await boundary; the merge discipline must land both.
        r.endpoint.push_fetch(Ok(fetch_body()));
        let fetch = r.manager.fetch_access_token(BASE, "A");
        let edit = r.manager.save_client_secret(BASE, "S");
        let (fetched, edited) = tokio::join!(fetch, edit);
        fetched.expect("fetch");
        edited.expect("edit");

        let record = r.manager.record(BASE).await.expect("read").expect("stored");
        assert_eq!(record.client_secret.as_deref(), Some("S"));
        assert_eq!(record.access_token.as_deref(), Some("AT"));
    }

    #[tokio::test]
    async fn clear_tenant_is_the_only_deletion_path() {
        let r = rig();
        r.endpoint.push_fetch(Ok(fetch_body()));
        r.manager
            .fetch_access_token(BASE, "c")
            .await
            .expect("fetch");

        r.manager.clear_tenant(BASE).await.expect("clear");
        assert_eq!(r.manager.record(BASE).await.expect("read"), None);
    }
}
