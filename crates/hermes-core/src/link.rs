//! Tab-link state machine: which browser tab is the authenticated session
//! source of truth, and how stale/closed links present to the UI.
//!
//! Pure transitions only — the runtime tracker owns tab queries and
//! storage. `UNLINKED → LINKED_OK → {LINKED_STALE, LINKED_CLOSED}`;
//! the only ways back to `LINKED_OK` are an explicit re-link or a
//! revalidation that finds the *same* tab valid again.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::validator::RejectReason;

/// Browser tab identifier as reported by the tab host.
pub type TabId = i64;
/// Browser window identifier as reported by the tab host.
pub type WindowId = i64;

// ─── Status ──────────────────────────────────────────────────────────

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkStatus {
    /// No link has been established this browser session.
    #[default]
    Uninitialized,
    /// Linked tab was live and valid as of `last_validation_at`.
    Ok,
    /// Linked tab still exists but its URL no longer validates.
    Stale,
    /// Linked tab was removed. Terminal until an explicit re-link.
    Closed,
}

// ─── State ───────────────────────────────────────────────────────────

/// Session-scoped singleton tracking the linked tab.
///
/// Invariant: `status == Ok` implies `linked_tab_id` and `linked_origin`
/// are present and the tab was live as of `last_validation_at`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkState {
    pub linked_tab_id: Option<TabId>,
    pub linked_window_id: Option<WindowId>,
    pub linked_url: Option<String>,
    /// Canonical vanity origin of the linked tab.
    pub linked_origin: Option<String>,
    #[serde(default)]
    pub linked_title: String,
    pub status: LinkStatus,
    pub last_validation_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub validation_message: String,
}

impl LinkState {
    /// Empty state at extension startup.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Establish (or re-establish) a link to a validated tab.
    pub fn linked_ok(
        tab_id: TabId,
        window_id: WindowId,
        url: impl Into<String>,
        origin: impl Into<String>,
        title: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            linked_tab_id: Some(tab_id),
            linked_window_id: Some(window_id),
            linked_url: Some(url.into()),
            linked_origin: Some(origin.into()),
            linked_title: title.into(),
            status: LinkStatus::Ok,
            last_validation_at: Some(now),
            validation_message: "Session active".to_string(),
        }
    }

    /// Revalidation found the same tab live and valid again.
    pub fn mark_ok(
        &mut self,
        url: impl Into<String>,
        origin: impl Into<String>,
        title: impl Into<String>,
        now: DateTime<Utc>,
    ) {
        self.linked_url = Some(url.into());
        self.linked_origin = Some(origin.into());
        self.linked_title = title.into();
        self.status = LinkStatus::Ok;
        self.last_validation_at = Some(now);
        self.validation_message = "Session active".to_string();
    }

    /// The linked tab's URL no longer validates.
    pub fn mark_stale(&mut self, reason: RejectReason, url: Option<String>, now: DateTime<Utc>) {
        if let Some(url) = url {
            self.linked_url = Some(url);
        }
        self.status = LinkStatus::Stale;
        self.last_validation_at = Some(now);
        self.validation_message = reason.message().to_string();
    }

    /// The linked tab was removed. Clears the tab identity so no later
    /// revalidation can resurrect the link without an explicit re-link.
    pub fn mark_closed(&mut self, now: DateTime<Utc>) {
        self.linked_tab_id = None;
        self.linked_window_id = None;
        self.linked_url = None;
        self.linked_origin = None;
        self.linked_title.clear();
        self.status = LinkStatus::Closed;
        self.last_validation_at = Some(now);
        self.validation_message = "Linked tab was closed".to_string();
    }

    /// Origin usable for API calls, only while the link is healthy.
    pub fn resolved_origin(&self) -> Option<&str> {
        match self.status {
            LinkStatus::Ok => self.linked_origin.as_deref(),
            _ => None,
        }
    }
}

// ─── Presentation ────────────────────────────────────────────────────

/// Canonical presentation states derived from [`LinkState`] plus the
/// currently active tab. Presentation only — never written back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresentationStatus {
    Ok,
    Stale,
    /// Covers both "tab closed" and "never linked".
    NoLink,
    /// A link exists but the user is looking at a different tab.
    WrongTab,
}

/// Data the UI layer renders for a presentation state. Plain data so any
/// UI technology can render it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UiHints {
    pub banner: &'static str,
    pub hint: &'static str,
    /// `None` means no overlay: the panel is fully usable.
    pub overlay: Option<&'static str>,
}

/// Derive the presentation state for the given active tab.
pub fn presentation(state: &LinkState, active_tab: Option<TabId>) -> PresentationStatus {
    match state.status {
        LinkStatus::Uninitialized | LinkStatus::Closed => PresentationStatus::NoLink,
        _ if state.linked_tab_id != active_tab => PresentationStatus::WrongTab,
        LinkStatus::Ok => PresentationStatus::Ok,
        LinkStatus::Stale => PresentationStatus::Stale,
    }
}

/// Banner/hint/overlay copy for each presentation state.
pub fn hints(status: PresentationStatus) -> UiHints {
    match status {
        PresentationStatus::Ok => UiHints {
            banner: "Linked",
            hint: "Session active in this tab",
            overlay: None,
        },
        PresentationStatus::Stale => UiHints {
            banner: "Session Needs Attention",
            hint: "Your session may have expired. Please refresh the page.",
            overlay: Some("Session may have expired. Return to WFM to refresh your session."),
        },
        PresentationStatus::NoLink => UiHints {
            banner: "Not Linked",
            hint: "Open a WFM tab and relink to continue.",
            overlay: Some("Linked tab was closed. Relink to a valid WFM page to continue."),
        },
        PresentationStatus::WrongTab => UiHints {
            banner: "Not Active Tab",
            hint: "Return to linked tab to use Hermes",
            overlay: Some("Hermes is active in another tab. Click below to return."),
        },
    }
}

// ─── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        "2026-08-25T12:00:00Z".parse().expect("timestamp")
    }

    fn linked() -> LinkState {
        LinkState::linked_ok(
            7,
            1,
            "https://foo.prd.mykronos.com/wfd/home",
            "https://foo-nosso.prd.mykronos.com/",
            "Workforce Manager",
            now(),
        )
    }

    #[test]
    fn ok_state_satisfies_invariant() {
        let state = linked();
        assert_eq!(state.status, LinkStatus::Ok);
        assert!(state.linked_tab_id.is_some());
        assert!(state.linked_origin.is_some());
        assert_eq!(
            state.resolved_origin(),
            Some("https://foo-nosso.prd.mykronos.com/")
        );
    }

    #[test]
    fn stale_keeps_tab_identity_and_blocks_resolution() {
        let mut state = linked();
        state.mark_stale(RejectReason::AuthRedirect, None, now());
        assert_eq!(state.status, LinkStatus::Stale);
        assert_eq!(state.linked_tab_id, Some(7));
        assert_eq!(state.resolved_origin(), None);
        assert_eq!(
            state.validation_message,
            "Invalid Login - Authentication Required"
        );
    }

    #[test]
    fn closed_clears_tab_identity() {
        let mut state = linked();
        state.mark_closed(now());
        assert_eq!(state.status, LinkStatus::Closed);
        assert_eq!(state.linked_tab_id, None);
        assert_eq!(state.resolved_origin(), None);
    }

    #[test]
    fn stale_tab_can_recover_via_mark_ok() {
        let mut state = linked();
        state.mark_stale(RejectReason::AuthRedirect, None, now());
        state.mark_ok(
            "https://foo.prd.mykronos.com/wfd/home",
            "https://foo-nosso.prd.mykronos.com/",
            "Workforce Manager",
            now(),
        );
        assert_eq!(state.status, LinkStatus::Ok);
    }

    #[test]
    fn presentation_covers_four_canonical_states() {
        let state = linked();
        assert_eq!(presentation(&state, Some(7)), PresentationStatus::Ok);
        assert_eq!(presentation(&state, Some(9)), PresentationStatus::WrongTab);

        let mut stale = linked();
        stale.mark_stale(RejectReason::Unauthorized, None, now());
        assert_eq!(presentation(&stale, Some(7)), PresentationStatus::Stale);

        let mut closed = linked();
        closed.mark_closed(now());
        assert_eq!(presentation(&closed, Some(7)), PresentationStatus::NoLink);
        assert_eq!(presentation(&LinkState::empty(), None), PresentationStatus::NoLink);
    }

    #[test]
    fn only_ok_presents_without_overlay() {
        assert!(hints(PresentationStatus::Ok).overlay.is_none());
        for s in [
            PresentationStatus::Stale,
            PresentationStatus::NoLink,
            PresentationStatus::WrongTab,
        ] {
            assert!(hints(s).overlay.is_some());
        }
    }

    #[test]
    fn link_state_round_trips_through_session_storage_shape() {
        let state = linked();
        let json = serde_json::to_value(&state).expect("serialize");
        assert!(json.get("linkedTabId").is_some());
        let back: LinkState = serde_json::from_value(json).expect("deserialize");
        assert_eq!(state, back);
    }
}
