//! Web server module (Axum + ingest API).

pub mod auth;
pub mod dashboard;
pub mod handlers;
pub mod router;
pub mod server;

pub use server::{run_server, WebServerConfig};

use crate::notify::Notifier;
use crate::store::Store;

/// Shared state handed to every request handler.
#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub notifier: Notifier,
}
