//! Authentication configuration parsed from environment variables.

pub const DEFAULT_APPLICATION_PATH: &str = "/";
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Endpoint that validates a bearer JWT and starts a cookie session.
pub const LOGIN_PATH: &str = "/dropin/client/login";
/// Endpoint notified on sign-out. Its response is ignored.
pub const LOGOUT_PATH: &str = "/dropin/client/logout";
/// Endpoint answering with the current user.
pub const USER_PATH: &str = "/dropin/client/user";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config parse failed: {0}")]
    Parse(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthConfig {
    /// Path under the page origin where the same-origin server is mounted.
    pub application_path: String,
    pub connect_timeout_secs: u64,
    /// Whole-request timeout. `None` lets requests hang as long as the
    /// server does.
    pub request_timeout_secs: Option<u64>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            application_path: DEFAULT_APPLICATION_PATH.to_owned(),
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            request_timeout_secs: None,
        }
    }
}

impl AuthConfig {
    /// Build typed config from environment variables.
    ///
    /// Optional:
    /// - `DROPIN_APPLICATION_PATH`: default `/`, must start with `/`
    /// - `DROPIN_CONNECT_TIMEOUT_SECS`: default 10
    /// - `DROPIN_REQUEST_TIMEOUT_SECS`: unset means no timeout
    ///
    /// # Errors
    ///
    /// Returns an error if the application path is not absolute.
    pub fn from_env() -> Result<Self, ConfigError> {
        let application_path = parse_application_path(std::env::var("DROPIN_APPLICATION_PATH").ok().as_deref())?;
        let connect_timeout_secs = env_parse_u64("DROPIN_CONNECT_TIMEOUT_SECS").unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS);
        let request_timeout_secs = env_parse_u64("DROPIN_REQUEST_TIMEOUT_SECS");

        Ok(Self { application_path, connect_timeout_secs, request_timeout_secs })
    }
}

fn env_parse_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|v| v.parse::<u64>().ok())
}

fn parse_application_path(raw: Option<&str>) -> Result<String, ConfigError> {
    let path = raw.map_or(DEFAULT_APPLICATION_PATH, str::trim);
    if path.is_empty() {
        return Ok(DEFAULT_APPLICATION_PATH.to_owned());
    }
    if !path.starts_with('/') {
        return Err(ConfigError::Parse(format!("DROPIN_APPLICATION_PATH must start with '/': {path}")));
    }
    Ok(path.to_owned())
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
