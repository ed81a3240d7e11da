//! hermes-browser: browser environment IO boundary.
//! Capability traits for tab queries, session/durable key-value storage,
//! the token endpoint, and rendered-page extraction — plus in-memory
//! implementations for tests and simulation, and a reqwest-backed token
//! endpoint client. No business logic.

pub mod endpoint;
pub mod storage;
pub mod tabs;

pub use endpoint::{HttpTokenEndpoint, ScriptedTokenEndpoint, TokenEndpoint};
pub use storage::{KeyValueStore, MemoryStore, get_json, set_json};
pub use tabs::{MemoryTabs, PageExtractor, Tab, TabEvent, TabHost, WindowInfo, WindowState};
