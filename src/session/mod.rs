//! Session ownership and lifecycle orchestration.
//!
//! This module provides:
//! - `SessionState`: tagged-union session state with a pure transition
//!   function, so an authenticated state without an identity cannot exist
//! - `SessionController`: the orchestrator that owns the token cell and
//!   drives restore, login, logout, and refresh

pub mod controller;
pub mod state;

pub use controller::{AuthEvents, AuthHandle, NoopEvents, SessionController};
pub use state::{transition, Session, SessionEvent, SessionState};
