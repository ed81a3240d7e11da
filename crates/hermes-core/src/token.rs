//! Per-tenant credential records and token expiry logic.
//!
//! The token endpoint and the refresh endpoint disagree on casing:
//! fetch responses are camelCase (`accessToken`, `expiresInSeconds`),
//! refresh responses are snake_case (`access_token`, `expires_in`).
//! That inconsistency is vendor contract and is preserved here.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::HermesError;

// ─── Constants ───────────────────────────────────────────────────────

/// Fixed refresh-token lifetime. Vendor policy: always issue-time + 8h,
/// never derived from the server-provided refresh lifetime.
pub const REFRESH_TOKEN_LIFETIME_HOURS: i64 = 8;

/// Form value identifying the vendor's auth chain on refresh.
pub const REFRESH_AUTH_CHAIN: &str = "OAuthLdapService";

// ─── Record ──────────────────────────────────────────────────────────

/// Durable credential record, one per tenant, keyed by the tenant's
/// canonical base URL.
///
/// Invariant: an expiry timestamp is present iff its token is present.
/// Records are never auto-expired out of storage — expiry is a logic
/// concept; deletion only happens through an explicit clear.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantCredentialRecord {
    pub client_id: String,
    #[serde(default)]
    pub client_secret: Option<String>,
    pub token_url: String,
    pub api_url: String,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub access_token_expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub refresh_token_expires_at: Option<DateTime<Utc>>,
    pub last_edited_at: DateTime<Utc>,
}

impl TenantCredentialRecord {
    /// Fresh record for a tenant that has no token yet. Derives the
    /// tenant's token URL and default API URL from the base URL.
    pub fn new(base_url: &str, client_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        let client_id = client_id.into();
        Self {
            token_url: token_url(base_url, &client_id),
            api_url: default_api_url(base_url),
            client_id,
            client_secret: None,
            access_token: None,
            access_token_expires_at: None,
            refresh_token: None,
            refresh_token_expires_at: None,
            last_edited_at: now,
        }
    }

    /// Apply a successful token fetch: replaces both token pairs, keeps
    /// `client_secret` and `api_url` already on file.
    pub fn apply_fetched(&mut self, pair: &TokenPair, now: DateTime<Utc>) {
        self.access_token = Some(pair.access_token.clone());
        self.access_token_expires_at = Some(pair.access_token_expires_at);
        self.refresh_token = pair.refresh_token.clone();
        self.refresh_token_expires_at = pair.refresh_token_expires_at;
        self.last_edited_at = now;
    }

    /// Apply a successful refresh: replaces only the access-token fields,
    /// leaving the refresh token and its expiry untouched.
    pub fn apply_refreshed(
        &mut self,
        access_token: impl Into<String>,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) {
        self.access_token = Some(access_token.into());
        self.access_token_expires_at = Some(expires_at);
        self.last_edited_at = now;
    }
}

/// Token endpoint URL for a tenant base URL and client id.
pub fn token_url(base_url: &str, client_id: &str) -> String {
    format!("{base_url}accessToken?clientId={client_id}")
}

/// Default API URL derived from the tenant base URL.
pub fn default_api_url(base_url: &str) -> String {
    format!("{base_url}api")
}

/// Refresh endpoint URL for a tenant base URL.
pub fn refresh_url(base_url: &str) -> String {
    format!("{base_url}api/authentication/access_token")
}

// ─── Token pair ──────────────────────────────────────────────────────

/// Result of a token fetch or refresh, with computed expiry timestamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub access_token_expires_at: DateTime<Utc>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub refresh_token_expires_at: Option<DateTime<Utc>>,
}

/// Access-token expiry from the server-provided duration.
pub fn access_expiry(now: DateTime<Utc>, expires_in_seconds: i64) -> DateTime<Utc> {
    now + Duration::seconds(expires_in_seconds)
}

/// Refresh-token expiry: fixed 8-hour window from issue time.
pub fn refresh_expiry(now: DateTime<Utc>) -> DateTime<Utc> {
    now + Duration::hours(REFRESH_TOKEN_LIFETIME_HOURS)
}

// ─── Wire parsing ────────────────────────────────────────────────────

/// Parse a token-fetch response body (camelCase vendor shape).
///
/// All three fields are required; a missing or empty field fails with
/// [`HermesError::InvalidTokenResponse`] naming the field.
pub fn parse_fetch_response(body: &Value, now: DateTime<Utc>) -> Result<TokenPair, HermesError> {
    let access_token = require_str(body, "accessToken")?;
    let refresh_token = require_str(body, "refreshToken")?;
    let expires_in = require_i64(body, "expiresInSeconds")?;

    Ok(TokenPair {
        access_token,
        access_token_expires_at: access_expiry(now, expires_in),
        refresh_token: Some(refresh_token),
        refresh_token_expires_at: Some(refresh_expiry(now)),
    })
}

/// Parse a refresh response body (snake_case vendor shape). Only the new
/// access token and its lifetime come back; refresh fields are untouched.
pub fn parse_refresh_response(
    body: &Value,
    now: DateTime<Utc>,
) -> Result<(String, DateTime<Utc>), HermesError> {
    let access_token = require_str(body, "access_token")?;
    let expires_in = require_i64(body, "expires_in")?;
    Ok((access_token, access_expiry(now, expires_in)))
}

fn require_str(body: &Value, field: &str) -> Result<String, HermesError> {
    match body.get(field).and_then(Value::as_str) {
        Some(s) if !s.is_empty() => Ok(s.to_string()),
        _ => Err(HermesError::InvalidTokenResponse(format!(
            "missing required field '{field}'"
        ))),
    }
}

fn require_i64(body: &Value, field: &str) -> Result<i64, HermesError> {
    body.get(field)
        .and_then(Value::as_i64)
        .filter(|n| *n > 0)
        .ok_or_else(|| {
            HermesError::InvalidTokenResponse(format!("missing required field '{field}'"))
        })
}

// ─── Expiry check ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenValidity {
    pub access_valid: bool,
    pub refresh_valid: bool,
}

/// Pure expiry check: a token is valid iff `now` is strictly before its
/// expiry timestamp. Absent tokens are never valid.
pub fn expire_check(record: &TenantCredentialRecord, now: DateTime<Utc>) -> TokenValidity {
    let valid = |token: &Option<String>, expires: &Option<DateTime<Utc>>| {
        token.is_some() && expires.is_some_and(|at| now < at)
    };
    TokenValidity {
        access_valid: valid(&record.access_token, &record.access_token_expires_at),
        refresh_valid: valid(&record.refresh_token, &record.refresh_token_expires_at),
    }
}

// ─── Refresh preconditions ───────────────────────────────────────────

/// Inputs for the refresh network call, extracted once preconditions hold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshInputs {
    pub refresh_token: String,
    pub client_id: String,
    pub client_secret: String,
}

/// Check refresh preconditions in order, failing fast before any network
/// call: no refresh token, expired refresh token, missing client secret.
pub fn refresh_preconditions(
    record: &TenantCredentialRecord,
    now: DateTime<Utc>,
) -> Result<RefreshInputs, HermesError> {
    let refresh_token = record
        .refresh_token
        .clone()
        .ok_or(HermesError::NoValidRefreshToken)?;

    match record.refresh_token_expires_at {
        Some(at) if now < at => {}
        _ => return Err(HermesError::RefreshTokenExpired),
    }

    let client_secret = record
        .client_secret
        .clone()
        .filter(|s| !s.is_empty())
        .ok_or(HermesError::MissingClientSecret)?;

    Ok(RefreshInputs {
        refresh_token,
        client_id: record.client_id.clone(),
        client_secret,
    })
}

/// Form body for the refresh POST. The `auth_chain` value is part of the
/// vendor contract.
pub fn refresh_form(inputs: &RefreshInputs) -> Vec<(String, String)> {
    vec![
        ("refresh_token".into(), inputs.refresh_token.clone()),
        ("client_id".into(), inputs.client_id.clone()),
        ("client_secret".into(), inputs.client_secret.clone()),
        ("grant_type".into(), "refresh_token".into()),
        ("auth_chain".into(), REFRESH_AUTH_CHAIN.into()),
    ]
}

// ─── Tests ───────────────────────────────────────────────────────────
