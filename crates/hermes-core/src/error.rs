//! Error taxonomy shared across the workspace.

use thiserror::Error;

use crate::validator::RejectReason;

/// Every async entry point in the runtime resolves to one of these kinds;
/// nothing is allowed to escape as an unclassified panic or rejection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HermesError {
    /// Tenant URL failed session validation. Carries the rejection reason
    /// so the caller can render a specific message.
    #[error("invalid session url: {0}")]
    InvalidSessionUrl(RejectReason),

    /// The link tracker has no tab to resolve.
    #[error("no linked tab")]
    NoLinkedTab,

    /// The linked tab no longer exists.
    #[error("linked tab no longer exists")]
    LinkedTabClosed,

    /// Token endpoint replied but the payload is missing required fields.
    #[error("invalid token response: {0}")]
    InvalidTokenResponse(String),

    /// Fetch threw or returned a non-2xx status.
    #[error("network failure: {0}")]
    NetworkFailure(String),

    /// Refresh requires a stored client secret.
    #[error("client secret is required to refresh the access token")]
    MissingClientSecret,

    /// No refresh token on file for the tenant.
    #[error("no valid refresh token found")]
    NoValidRefreshToken,

    /// Refresh token is past its 8-hour window; a full re-fetch is required.
    #[error("refresh token has expired")]
    RefreshTokenExpired,

    /// Persistence layer rejected an operation. Non-fatal: logged, and the
    /// operation proceeds in memory where possible.
    #[error("storage failure: {0}")]
    StorageFailure(String),
}
