//! Session data and the session-level state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::api::Identity;

/// The authenticated identity currently held in memory. Created on
/// successful login or restoration, destroyed on logout or unrecoverable
/// refresh failure. Persisted only as this serialized snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub user_id: String,
    pub display_name: String,
    pub role: String,
    pub started_at: DateTime<Utc>,
}

impl Session {
    /// Build a session from the identity profile, taking the role from
    /// the profile and falling back to the login response's role tag.
    pub fn from_identity(
        identity: &Identity,
        fallback_role: Option<&str>,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id: identity.id.clone(),
            display_name: identity.display_name.clone(),
            role: identity
                .role
                .clone()
                .or_else(|| fallback_role.map(str::to_string))
                .unwrap_or_default(),
            started_at,
        }
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.role == role
    }

    pub fn has_any_role(&self, roles: &[&str]) -> bool {
        roles.iter().any(|role| self.role == *role)
    }

    /// Session age for display (e.g. in a status bar)
    pub fn age_display(&self) -> String {
        let minutes = (Utc::now() - self.started_at).num_minutes();
        if minutes < 1 {
            "just now".to_string()
        } else if minutes < 60 {
            format!("{}m ago", minutes)
        } else if minutes < 1440 {
            format!("{}h ago", minutes / 60)
        } else {
            format!("{}d ago", minutes / 1440)
        }
    }
}

/// Session-level state. `Authenticated` carries the session so an
/// authenticated state without an identity is unrepresentable.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    Unauthenticated,
    Restoring,
    Authenticated(Session),
}

impl SessionState {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, SessionState::Authenticated(_))
    }

    pub fn session(&self) -> Option<&Session> {
        match self {
            SessionState::Authenticated(session) => Some(session),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SessionState::Unauthenticated => "unauthenticated",
            SessionState::Restoring => "restoring",
            SessionState::Authenticated(_) => "authenticated",
        }
    }
}

/// Inputs to the session state machine.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    RestoreStarted,
    RestoreSucceeded(Session),
    RestoreFailed,
    LoggedIn(Session),
    LoggedOut,
}

/// Pure transition function. Transitions not listed leave the state
/// unchanged; callers sequence events so an unchanged result means the
/// event was not applicable in the current state.
pub fn transition(state: &SessionState, event: SessionEvent) -> SessionState {
    match (state, event) {
        (SessionState::Unauthenticated | SessionState::Restoring, SessionEvent::RestoreStarted) => {
            SessionState::Restoring
        }
        (SessionState::Restoring, SessionEvent::RestoreSucceeded(session)) => {
            SessionState::Authenticated(session)
        }
        (SessionState::Restoring, SessionEvent::RestoreFailed) => SessionState::Unauthenticated,
        (_, SessionEvent::LoggedIn(session)) => SessionState::Authenticated(session),
        (_, SessionEvent::LoggedOut) => SessionState::Unauthenticated,
        (current, _) => current.clone(),
    }
}
