//! Tenant session URL validation and vanity-origin canonicalization.
//!
//! [`classify`] decides whether a URL belongs to a usable tenant web
//! session; [`canonicalize`] maps a tenant hostname to its API-capable
//! "vanity" origin. Both are pure and total.

use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

// ─── Constants ───────────────────────────────────────────────────────

/// Suffix every tenant hostname must carry.
const TENANT_DOMAIN: &str = "mykronos.com";

/// Developer portal host. API sessions are not obtainable there, so it is
/// rejected even though it sits on the tenant domain.
const DEVELOPER_PORTAL_HOST: &str = "adp-developer.mykronos.com";

/// Path segment of the authentication redirect (session not yet established).
const AUTH_REDIRECT_SEGMENT: &str = "/authn/";

/// Path segment of the unauthorized-access page.
const UNAUTHORIZED_SEGMENT: &str = "/wfd/unauthorized";

/// Marker carried by hostnames that are already on the vanity variant.
const VANITY_MARKER: &str = "-nosso";

/// Environment suffix rewrites, keyed by the two known environment
/// suffixes. Kept table-driven: the mapping is vendor policy, not
/// something call sites should re-derive.
const VANITY_REWRITES: [(&str, &str); 2] = [
    (".prd.mykronos.com", "-nosso.prd.mykronos.com"),
    (".npr.mykronos.com", "-nosso.npr.mykronos.com"),
];

// ─── Rejection reasons ───────────────────────────────────────────────

/// Why a URL was rejected as a session source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// URL could not be parsed at all.
    Malformed,
    /// Host is not on the tenant web-application domain.
    WrongDomain,
    /// Authentication redirect page — session not yet established.
    AuthRedirect,
    /// Unauthorized-access page.
    Unauthorized,
    /// Developer portal host — no API session obtainable there.
    DeveloperPortal,
}

impl RejectReason {
    /// User-facing message matching the reason.
    pub fn message(self) -> &'static str {
        match self {
            Self::Malformed => "Invalid URL",
            Self::WrongDomain => "Invalid Domain",
            Self::AuthRedirect => "Invalid Login - Authentication Required",
            Self::Unauthorized => "Invalid Login - Unauthorized Access",
            Self::DeveloperPortal => "Developer Portal not supported for API session",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

// ─── classify ────────────────────────────────────────────────────────

/// Classify a URL as a valid tenant session source.
///
/// Returns `Ok(())` when the URL points at a live tenant web session, or
/// the specific [`RejectReason`] otherwise. Every rejection carries a
/// distinct reason so callers can render a non-generic message.
pub fn classify(raw: &str) -> Result<(), RejectReason> {
    let url = Url::parse(raw).map_err(|_| RejectReason::Malformed)?;
    let host = url.host_str().ok_or(RejectReason::Malformed)?;

    if !is_tenant_host(host) {
        return Err(RejectReason::WrongDomain);
    }
    if host.eq_ignore_ascii_case(DEVELOPER_PORTAL_HOST) {
        return Err(RejectReason::DeveloperPortal);
    }

    let path = url.path();
    if path.contains(AUTH_REDIRECT_SEGMENT) {
        return Err(RejectReason::AuthRedirect);
    }
    if path.contains(UNAUTHORIZED_SEGMENT) {
        return Err(RejectReason::Unauthorized);
    }

    Ok(())
}

fn is_tenant_host(host: &str) -> bool {
    let host = host.to_ascii_lowercase();
    host == TENANT_DOMAIN || host.ends_with(&format!(".{TENANT_DOMAIN}"))
}

// ─── canonicalize ────────────────────────────────────────────────────

/// Map a tenant URL to its canonical vanity/API origin.
///
/// Hosts on a known environment suffix that do not already carry the
/// vanity marker get the suffix rewritten; everything else passes through
/// unchanged. The result is an origin string with a trailing slash.
/// Idempotent: canonicalizing an already-canonical origin is a no-op.
///
/// Returns `None` when the URL cannot be parsed or has no host.
pub fn canonicalize(raw: &str) -> Option<String> {
    let url = Url::parse(raw).ok()?;
    let host = url.host_str()?.to_ascii_lowercase();

    let mut vanity = host.clone();
    if !host.contains(VANITY_MARKER) {
        for (env_suffix, vanity_suffix) in VANITY_REWRITES {
            if host.ends_with(env_suffix) {
                let stem = &host[..host.len() - env_suffix.len()];
                vanity = format!("{stem}{vanity_suffix}");
                break;
            }
        }
    }

    Some(format!("{}://{vanity}/", url.scheme()))
}

// ─── Tests ───────────────────────────────────────────────────────────
