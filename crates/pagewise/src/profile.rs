//! Site profiles: everything site-specific, loaded from JSON.
//!
//! A profile carries the field registry, the results container and item
//! locator, the next-control locator, the inclusion predicate, timings,
//! and an optional sign-in recipe. The engine itself never hardcodes a
//! selector.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::extract::{ExtractionConfig, ExtractionStep, InclusionPredicate, LocatorSpec};
use crate::orchestrator::ScrapeSettings;
use crate::pagination::PaginationSettings;
use crate::setup::FormLogin;
use crate::template::FieldRegistry;

/// Errors raised while loading a profile.
#[derive(thiserror::Error, Debug)]
pub enum ProfileError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid profile: {0}")]
    Invalid(String),

    #[error("Missing credential: environment variable {0} is not set")]
    MissingCredential(String),
}

/// Timing knobs, in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Timing {
    pub retry_backoff_ms: u64,
    pub next_wait_ms: u64,
    pub reveal_delay_ms: u64,
    pub settle_ms: u64,
    pub navigation_timeout_ms: u64,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            retry_backoff_ms: 2000,
            next_wait_ms: 5000,
            reveal_delay_ms: 1000,
            settle_ms: 2000,
            navigation_timeout_ms: 30_000,
        }
    }
}

/// How to sign in before scraping. Credentials come from the environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRecipe {
    pub url: String,
    pub username_field: String,
    pub password_field: String,
    pub submit: String,
    pub ready: String,
    pub username_env: String,
    pub password_env: String,
    #[serde(default = "default_ready_timeout_ms")]
    pub ready_timeout_ms: u64,
}

fn default_ready_timeout_ms() -> u64 {
    30_000
}

impl LoginRecipe {
    /// Build the login step, reading credentials with `lookup`.
    pub fn to_form_login(
        &self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<FormLogin, ProfileError> {
        let read = |name: &str| {
            lookup(name)
                .filter(|v| !v.is_empty())
                .ok_or_else(|| ProfileError::MissingCredential(name.to_string()))
        };
        Ok(FormLogin {
            login_url: self.url.clone(),
            username_field: self.username_field.clone(),
            password_field: self.password_field.clone(),
            submit: self.submit.clone(),
            ready: self.ready.clone(),
            ready_timeout: Duration::from_millis(self.ready_timeout_ms),
            username: read(&self.username_env)?,
            password: read(&self.password_env)?,
        })
    }
}

/// A versioned description of one target site.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteProfile {
    pub name: String,
    #[serde(default = "default_profile_version")]
    pub version: String,
    pub fields: FieldRegistry,
    /// Selector of the single results container.
    pub container: String,
    pub items: LocatorSpec,
    pub next_control: String,
    #[serde(default)]
    pub inclusion: InclusionPredicate,
    #[serde(default)]
    pub timing: Timing,
    #[serde(default)]
    pub login: Option<LoginRecipe>,
}

fn default_profile_version() -> String {
    "1".to_string()
}

impl SiteProfile {
    /// Parse and check a profile.
    pub fn from_json(json: &str) -> Result<Self, ProfileError> {
        let profile: Self = serde_json::from_str(json)?;
        profile.check()?;
        Ok(profile)
    }

    pub fn from_file(path: &Path) -> Result<Self, ProfileError> {
        let json = std::fs::read_to_string(path)?;
        let profile = Self::from_json(&json)?;
        tracing::info!(
            "Loaded profile '{}' v{} from {} ({} fields)",
            profile.name,
            profile.version,
            path.display(),
            profile.fields.len()
        );
        Ok(profile)
    }

    fn check(&self) -> Result<(), ProfileError> {
        if self.fields.is_empty() {
            return Err(ProfileError::Invalid("profile defines no fields".to_string()));
        }
        if let InclusionPredicate::RequireAny { fields } | InclusionPredicate::RequireAll { fields } =
            &self.inclusion
        {
            if fields.is_empty() {
                return Err(ProfileError::Invalid(
                    "inclusion predicate lists no fields".to_string(),
                ));
            }
            if let Some(unknown) = fields.iter().find(|f| self.fields.get(f).is_none()) {
                return Err(ProfileError::Invalid(format!(
                    "inclusion predicate names unknown field '{unknown}'"
                )));
            }
        }

        // Compile every selector once so typos surface at load time.
        let all: Vec<&str> = self.fields.names().collect();
        let template = self
            .fields
            .resolve(all.as_slice())
            .map_err(|e| ProfileError::Invalid(e.to_string()))?;
        let config = self
            .extraction_config()
            .map_err(|e| ProfileError::Invalid(e.to_string()))?;
        ExtractionStep::new(&template, &config).map_err(|e| ProfileError::Invalid(e.to_string()))?;
        Ok(())
    }

    pub fn extraction_config(&self) -> crate::types::ScrapeResult<ExtractionConfig> {
        Ok(ExtractionConfig {
            container: self.container.clone(),
            locator: self.items.build()?,
            inclusion: self.inclusion.clone(),
        })
    }

    pub fn scrape_settings(&self) -> ScrapeSettings {
        ScrapeSettings {
            retry_backoff: Duration::from_millis(self.timing.retry_backoff_ms),
            pagination: PaginationSettings {
                next_control: self.next_control.clone(),
                next_wait: Duration::from_millis(self.timing.next_wait_ms),
                reveal_delay: Duration::from_millis(self.timing.reveal_delay_ms),
                settle_interval: Duration::from_millis(self.timing.settle_ms),
            },
        }
    }

    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_millis(self.timing.navigation_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROFILE: &str = r##"{
        "name": "directory",
        "version": "2024-06",
        "fields": {
            "Name": { "selector": "a.name span" },
            "Photo": { "selector": "img", "rule": "attribute:src" }
        },
        "container": ".results",
        "items": { "strategy": "selector", "selector": "li" },
        "nextControl": "button.next",
        "inclusion": { "kind": "require_any", "fields": ["Name"] },
        "timing": { "retryBackoffMs": 500 },
        "login": {
            "url": "https://example.test/login",
            "usernameField": "#u", "passwordField": "#p",
            "submit": "#go", "ready": ".app",
            "usernameEnv": "DIR_USER", "passwordEnv": "DIR_PASS"
        }
    }"##;

    #[test]
    fn test_profile_parses_with_defaults() {
        let profile = SiteProfile::from_json(PROFILE).unwrap();
        assert_eq!(profile.version, "2024-06");
        assert_eq!(profile.timing.retry_backoff_ms, 500);
        assert_eq!(profile.timing.settle_ms, 2000);

        let settings = profile.scrape_settings();
        assert_eq!(settings.retry_backoff, Duration::from_millis(500));
        assert_eq!(settings.pagination.next_control, "button.next");
    }

    #[test]
    fn test_login_reads_credentials() {
        let profile = SiteProfile::from_json(PROFILE).unwrap();
        let recipe = profile.login.unwrap();

        let login = recipe
            .to_form_login(|k| match k {
                "DIR_USER" => Some("ada".into()),
                "DIR_PASS" => Some("secret".into()),
                _ => None,
            })
            .unwrap();
        assert_eq!(login.username, "ada");
        assert_eq!(login.ready_timeout, Duration::from_secs(30));

        let err = recipe.to_form_login(|_| None).unwrap_err();
        assert!(matches!(err, ProfileError::MissingCredential(ref v) if v == "DIR_USER"));
    }

    #[test]
    fn test_bad_selector_rejected_at_load() {
        let broken = PROFILE.replace("a.name span", "a.name[");
        let err = SiteProfile::from_json(&broken).unwrap_err();
        assert!(matches!(err, ProfileError::Invalid(_)));
    }

    #[test]
    fn test_inclusion_must_name_known_fields() {
        let broken = PROFILE.replace(r#""fields": ["Name"]"#, r#""fields": ["Title"]"#);
        let err = SiteProfile::from_json(&broken).unwrap_err();
        assert!(err.to_string().contains("Title"));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("site.json");
        std::fs::write(&path, PROFILE).unwrap();
        let profile = SiteProfile::from_file(&path).unwrap();
        assert_eq!(profile.name, "directory");

        let missing = SiteProfile::from_file(&dir.path().join("nope.json")).unwrap_err();
        assert!(matches!(missing, ProfileError::Io(_)));
    }
}
