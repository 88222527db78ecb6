//! Pagewise: paginated record extraction from dynamic pages, with per-page
//! progress streamed to observers.

pub mod driver;
pub mod extract;
pub mod orchestrator;
pub mod pagination;
pub mod profile;
pub mod publisher;
pub mod request;
pub mod setup;
pub mod template;
pub mod types;

pub use driver::{DriverFactory, NavigationResult, NoopFactory, PageDriver};
pub use extract::{ExtractionConfig, ExtractionStep, InclusionPredicate, LocatorSpec, PageSnapshot};
pub use orchestrator::{Orchestrator, PreparedSession, ScrapeSettings};
pub use pagination::{PaginationController, PaginationSettings, PaginationState};
pub use profile::{ProfileError, SiteProfile};
pub use publisher::{ProgressPublisher, Subscription, SubscriptionId};
pub use request::{ScrapeRequest, ValidatedRequest};
pub use setup::{FormLogin, SessionSetup};
pub use template::{FieldRegistry, FieldSpec, Template, ValueRule};
pub use types::*;
