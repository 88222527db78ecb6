//! Pagewise server: HTTP API and session management for scrape sessions.

pub mod config;
pub mod events;
pub mod session;
pub mod transport;
pub mod types;

pub use config::{build_orchestrator, load_profile, resolve_profile_source, ProfileSource};
pub use events::{EventBus, ScrapeEvent};
pub use session::SessionManager;
pub use transport::{router, HttpTransport};
pub use types::{ServerError, ServerResult};
