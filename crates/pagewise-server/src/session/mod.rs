//! Scrape session management.

pub mod manager;

pub use manager::{SessionManager, DEFAULT_RETENTION};
