//! hermes-core: pure state machines and data model for the Hermes side panel.
//! URL/session validation, tab-link state transitions, credential records
//! with token expiry logic, countdown arithmetic, and the bounded
//! diagnostic log. No IO, no async — all effects live in hermes-runtime.

pub mod diaglog;
pub mod error;
pub mod link;
pub mod timer;
pub mod token;
pub mod validator;

pub use error::HermesError;
pub use link::{LinkState, LinkStatus, PresentationStatus, TabId, UiHints, WindowId};
pub use token::{TenantCredentialRecord, TokenPair, TokenValidity, expire_check};
pub use validator::{RejectReason, canonicalize, classify};
