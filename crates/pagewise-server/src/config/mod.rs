//! Configuration loading and resolution.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use pagewise::{Orchestrator, ProfileError, SiteProfile};

use crate::types::ServerResult;

/// Built-in profile used when nothing else is configured.
pub const DEFAULT_PROFILE: &str = include_str!("../../assets/linkedin-people.json");

pub const DEFAULT_ADDR: &str = "127.0.0.1:3000";

const PROFILE_ENV: &str = "PAGEWISE_PROFILE";
const ADDR_ENV: &str = "PAGEWISE_ADDR";
const CWD_PROFILE: &str = "pagewise.json";

/// Where the site profile comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProfileSource {
    File(PathBuf),
    Builtin,
}

impl std::fmt::Display for ProfileSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProfileSource::File(path) => write!(f, "{}", path.display()),
            ProfileSource::Builtin => write!(f, "<built-in>"),
        }
    }
}

/// Resolve the profile: explicit flag, then `PAGEWISE_PROFILE`, then
/// `./pagewise.json`, then the built-in profile.
pub fn resolve_profile_source(explicit: Option<&Path>) -> ProfileSource {
    resolve_profile_source_in(explicit, std::env::var(PROFILE_ENV).ok(), Path::new("."))
}

fn resolve_profile_source_in(
    explicit: Option<&Path>,
    env_path: Option<String>,
    cwd: &Path,
) -> ProfileSource {
    if let Some(path) = explicit {
        return ProfileSource::File(path.to_path_buf());
    }

    if let Some(path) = env_path.filter(|p| !p.trim().is_empty()) {
        return ProfileSource::File(PathBuf::from(path));
    }

    let cwd_profile = cwd.join(CWD_PROFILE);
    if cwd_profile.exists() {
        return ProfileSource::File(cwd_profile);
    }

    ProfileSource::Builtin
}

pub fn load_profile(source: &ProfileSource) -> Result<SiteProfile, ProfileError> {
    match source {
        ProfileSource::File(path) => SiteProfile::from_file(path),
        ProfileSource::Builtin => SiteProfile::from_json(DEFAULT_PROFILE),
    }
}

/// Build the orchestrator for `profile`.
///
/// With `login` set, the profile's sign-in recipe (if any) runs before
/// every session, with credentials read from the environment.
pub fn build_orchestrator(profile: &SiteProfile, login: bool) -> ServerResult<Orchestrator> {
    let orchestrator = Orchestrator::new(
        Arc::new(profile.fields.clone()),
        profile.extraction_config()?,
        profile.scrape_settings(),
    );

    match (&profile.login, login) {
        (Some(recipe), true) => {
            let form = recipe.to_form_login(|name| std::env::var(name).ok())?;
            tracing::info!("Sessions sign in at {} first", recipe.url);
            Ok(orchestrator.with_setup(Arc::new(form)))
        }
        _ => Ok(orchestrator),
    }
}

/// Listen address: explicit flag, then `PAGEWISE_ADDR`, then the default.
pub fn resolve_addr(explicit: Option<&str>) -> String {
    if let Some(addr) = explicit {
        return addr.to_string();
    }
    std::env::var(ADDR_ENV).unwrap_or_else(|_| DEFAULT_ADDR.to_string())
}

/// Load `.env` from the working directory, if present.
pub fn load_dotenv() {
    match dotenvy::dotenv() {
        Ok(path) => tracing::debug!("Loaded environment from {}", path.display()),
        Err(e) if e.not_found() => {}
        Err(e) => tracing::warn!("Ignoring malformed .env: {e}"),
    }
}
