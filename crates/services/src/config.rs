use std::time::Duration;

use crate::error::ConfigError;

pub const DEFAULT_DEMO_USERNAME: &str = "demo";
pub const DEFAULT_DEMO_PASSWORD: &str = "demo123";
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);
pub const DEFAULT_PROGRESS_THRESHOLD: u8 = 2;

/// Sampling behaviour of the progress tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackerConfig {
    /// Time between scroll samples.
    pub interval: Duration,
    /// A sample is written only when it differs from the last known
    /// progress by more than this many percentage points.
    pub threshold: u8,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            threshold: DEFAULT_PROGRESS_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServicesConfig {
    /// Credentials that open the ephemeral demo session instead of a user account.
    pub demo_username: String,
    pub demo_password: String,
    pub tracker: TrackerConfig,
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            demo_username: DEFAULT_DEMO_USERNAME.to_owned(),
            demo_password: DEFAULT_DEMO_PASSWORD.to_owned(),
            tracker: TrackerConfig::default(),
        }
    }
}

impl ServicesConfig {
    /// Read overrides from `BOOKSHELF_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if a numeric variable does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Like [`ServicesConfig::from_env`] with an explicit variable source.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if a numeric variable does not parse.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(user) = lookup("BOOKSHELF_DEMO_USER").filter(|v| !v.trim().is_empty()) {
            config.demo_username = user.trim().to_owned();
        }
        if let Some(password) = lookup("BOOKSHELF_DEMO_PASSWORD").filter(|v| !v.is_empty()) {
            config.demo_password = password;
        }
        if let Some(raw) = lookup("BOOKSHELF_POLL_MS") {
            let millis = raw
                .trim()
                .parse::<u64>()
                .ok()
                .filter(|ms| *ms > 0)
                .ok_or(ConfigError::InvalidValue {
                    var: "BOOKSHELF_POLL_MS",
                    raw: raw.clone(),
                })?;
            config.tracker.interval = Duration::from_millis(millis);
        }
        if let Some(raw) = lookup("BOOKSHELF_PROGRESS_THRESHOLD") {
            config.tracker.threshold = raw
                .trim()
                .parse::<u8>()
                .ok()
                .filter(|t| *t <= 100)
                .ok_or(ConfigError::InvalidValue {
                    var: "BOOKSHELF_PROGRESS_THRESHOLD",
                    raw: raw.clone(),
                })?;
        }

        Ok(config)
    }

    /// Whether the pair matches the configured demo credentials exactly.
    #[must_use]
    pub fn is_demo_login(&self, username: &str, password: &str) -> bool {
        username == self.demo_username && password == self.demo_password
    }
}
