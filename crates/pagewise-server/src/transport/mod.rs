//! Transport layer for the scrape API.

pub mod http;

pub use http::{router, HttpTransport, ServerState};
