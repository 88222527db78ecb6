//! Pre-loop session setup, such as signing in.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;

use crate::driver::PageDriver;
use crate::types::DriverError;

/// A step run against a fresh driver before the target is opened.
#[async_trait]
pub trait SessionSetup: Send + Sync {
    async fn prepare(&self, driver: &mut dyn PageDriver) -> Result<(), DriverError>;
}

/// Sign in through a username/password form.
#[derive(Clone)]
pub struct FormLogin {
    pub login_url: String,
    pub username_field: String,
    pub password_field: String,
    pub submit: String,
    /// Element that only exists once signed in.
    pub ready: String,
    pub ready_timeout: Duration,
    pub username: String,
    pub password: String,
}

impl fmt::Debug for FormLogin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FormLogin")
            .field("login_url", &self.login_url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl SessionSetup for FormLogin {
    async fn prepare(&self, driver: &mut dyn PageDriver) -> Result<(), DriverError> {
        tracing::info!("Signing in at {}", self.login_url);
        driver.navigate(&self.login_url).await?;
        driver.fill(&self.username_field, &self.username).await?;
        driver.fill(&self.password_field, &self.password).await?;
        driver.click(&self.submit).await?;

        if !driver.wait_for(&self.ready, self.ready_timeout).await? {
            return Err(DriverError::Timeout(format!(
                "sign-in did not reach '{}' within {}ms",
                self.ready,
                self.ready_timeout.as_millis()
            )));
        }
        tracing::info!("Signed in as {}", self.username);
        Ok(())
    }
}
