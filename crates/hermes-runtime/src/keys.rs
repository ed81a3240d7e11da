//! Storage keys for the session and durable namespaces.

/// Session namespace: serialized [`hermes_core::LinkState`] singleton.
pub const LINK_STATE: &str = "hermesLinkState";

/// Session namespace: global side-panel open flag.
pub const GLOBAL_OPEN: &str = "hermesGlobalOpen";

/// Session namespace: access-token countdown checkpoint (display nicety;
/// the expiry timestamp on the record is the source of truth).
pub const ACCESS_TIMER_CHECKPOINT: &str = "accessTokenTimer";

/// Session namespace: refresh-token countdown checkpoint.
pub const REFRESH_TIMER_CHECKPOINT: &str = "refreshTokenTimer";

/// Durable namespace: credential records keyed by tenant base URL.
pub const CLIENT_DATA: &str = "hermesClients";

/// Durable namespace: bounded circular diagnostic log.
pub const DIAG_LOG: &str = "extension_logs";
