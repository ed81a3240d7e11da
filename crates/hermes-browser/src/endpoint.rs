//! Token endpoint capability: the network-fetch surface that can carry
//! ambient browser session credentials. [`HttpTokenEndpoint`] is the
//! real client; [`ScriptedTokenEndpoint`] serves canned responses for
//! tests and the simulated demo.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::Value;

use hermes_core::HermesError;

// ─── Trait ───────────────────────────────────────────────────────────

#[async_trait]
pub trait TokenEndpoint: Send + Sync {
    /// GET the token endpoint with ambient session credentials.
    /// Returns the response body as JSON; non-2xx is a network failure.
    async fn fetch_token(&self, url: &str) -> Result<Value, HermesError>;

    /// POST the refresh form to the refresh endpoint.
    async fn refresh_token(
        &self,
        url: &str,
        form: &[(String, String)],
    ) -> Result<Value, HermesError>;
}

// ─── HTTP implementation ─────────────────────────────────────────────

/// reqwest-backed endpoint client with a cookie store, so the session
/// cookie established in the linked tab rides along on token requests.
pub struct HttpTokenEndpoint {
    client: reqwest::Client,
}

impl HttpTokenEndpoint {
    pub fn new() -> Result<Self, HermesError> {
        let client = reqwest::Client::builder()
            .cookie_store(true)
            .build()
            .map_err(|e| HermesError::NetworkFailure(format!("http client: {e}")))?;
        Ok(Self { client })
    }

    async fn read_json(response: reqwest::Response) -> Result<Value, HermesError> {
        let status = response.status();
        if !status.is_success() {
            return Err(HermesError::NetworkFailure(format!(
                "HTTP status {status}"
            )));
        }
        response
            .json()
            .await
            .map_err(|e| HermesError::InvalidTokenResponse(format!("body is not JSON: {e}")))
    }
}

#[async_trait]
impl TokenEndpoint for HttpTokenEndpoint {
    async fn fetch_token(&self, url: &str) -> Result<Value, HermesError> {
        let response = self
            .client
            .get(url)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| HermesError::NetworkFailure(e.to_string()))?;
        Self::read_json(response).await
    }

    async fn refresh_token(
        &self,
        url: &str,
        form: &[(String, String)],
    ) -> Result<Value, HermesError> {
        let response = self
            .client
            .post(url)
            .form(form)
            .send()
            .await
            .map_err(|e| HermesError::NetworkFailure(e.to_string()))?;
        Self::read_json(response).await
    }
}

// ─── Scripted implementation ─────────────────────────────────────────

/// Canned-response endpoint for tests and simulation. Counts calls so
/// tests can assert that precondition failures perform zero network
/// calls.
#[derive(Debug, Default)]
pub struct ScriptedTokenEndpoint {
    fetch_responses: Mutex<VecDeque<Result<Value, HermesError>>>,
    refresh_responses: Mutex<VecDeque<Result<Value, HermesError>>>,
    fetch_calls: AtomicUsize,
    refresh_calls: AtomicUsize,
}

impl ScriptedTokenEndpoint {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_fetch(&self, response: Result<Value, HermesError>) {
        self.fetch_responses
            .lock()
            .expect("endpoint lock")
            .push_back(response);
    }

    pub fn push_refresh(&self, response: Result<Value, HermesError>) {
        self.refresh_responses
            .lock()
            .expect("endpoint lock")
            .push_back(response);
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    fn next(
        queue: &Mutex<VecDeque<Result<Value, HermesError>>>,
    ) -> Result<Value, HermesError> {
        queue
            .lock()
            .expect("endpoint lock")
            .pop_front()
            .unwrap_or_else(|| {
                Err(HermesError::NetworkFailure(
                    "no scripted response queued".to_string(),
                ))
            })
    }
}

#[async_trait]
impl TokenEndpoint for ScriptedTokenEndpoint {
    async fn fetch_token(&self, _url: &str) -> Result<Value, HermesError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        Self::next(&self.fetch_responses)
    }

    async fn refresh_token(
        &self,
        _url: &str,
        _form: &[(String, String)],
    ) -> Result<Value, HermesError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        Self::next(&self.refresh_responses)
    }
}

// ─── Tests ───────────────────────────────────────────────────────────
