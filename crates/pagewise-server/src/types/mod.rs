//! Data types used by the server.

pub mod error;
pub mod session;

pub use error::*;
pub use session::*;
