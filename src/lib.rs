//! authgate - session and token lifecycle coordination for API clients.
//!
//! This crate owns the concurrency-sensitive part of a client's
//! authentication layer:
//!
//! - `RefreshCoordinator`: single-flight token refresh - concurrent
//!   callers share one network call, requests that arrive mid-refresh are
//!   queued and replayed when it settles
//! - `ProactiveScheduler`: renews the access token at the midpoint of its
//!   validity window, independent of request traffic
//! - `SessionController`: restore-on-startup, login, logout, and the
//!   narrow boundary the application's HTTP layer consumes
//! - `AuthFault`: a closed fault taxonomy with differentiated retry policy
//!
//! The crate is a library consumed by a UI or transport layer; it spawns
//! no process, parses no flags, and installs no tracing subscriber.

pub mod api;
pub mod config;
pub mod error;
pub mod refresh;
pub mod scheduler;
pub mod session;
pub mod store;
pub mod token;

pub use api::{AuthApi, HttpAuthApi, Identity, LoginResponse, RefreshResponse};
pub use config::AuthConfig;
pub use error::{AuthFault, RetryPolicy};
pub use refresh::RefreshCoordinator;
pub use scheduler::{ProactiveScheduler, RefreshDriver};
pub use session::{AuthEvents, AuthHandle, Session, SessionController, SessionEvent, SessionState};
pub use store::{SessionStore, StorageBackend};
pub use token::Claims;
