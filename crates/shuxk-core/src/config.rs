//! Application configuration management.
//!
//! This module handles loading and saving the application configuration:
//! portal endpoints, polling intervals, the selection form layout and the
//! last student id used.
//!
//! Configuration is stored at `~/.config/shuxk/config.json`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::auth::authenticator::{DEFAULT_PORTAL_URL, DEFAULT_SSO_LOGIN_PREFIX};
use crate::auth::AuthSettings;
use crate::portal::submitter::DEFAULT_ARTIFACT_NAME;
use crate::portal::{AmbiguousPolicy, FormSchema, PollOptions, SubmitOptions};
use crate::utils::RetryPolicy;

/// Application name used for config/cache directory paths
const APP_NAME: &str = "shuxk";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Probe interval while the window is still closed.
const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;

/// Probe interval after a probe that couldn't be judged.
const DEFAULT_FAILURE_INTERVAL_SECS: u64 = 5;

/// Delay between submission attempts.
const DEFAULT_SUBMIT_RETRY_SECS: u64 = 3;

const DEFAULT_SUBMIT_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub portal_url: String,
    pub sso_login_prefix: String,
    pub poll_interval_secs: u64,
    pub failure_interval_secs: u64,
    /// `None` waits for the window indefinitely.
    pub window_timeout_secs: Option<u64>,
    pub on_ambiguous: AmbiguousPolicy,
    pub form_schema: FormSchema,
    pub submit_retry_secs: u64,
    pub submit_attempts: u32,
    pub artifact_path: PathBuf,
    /// Overrides the cache directory sessions are kept in.
    pub session_dir: Option<PathBuf>,
    pub last_student_id: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            portal_url: DEFAULT_PORTAL_URL.to_string(),
            sso_login_prefix: DEFAULT_SSO_LOGIN_PREFIX.to_string(),
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            failure_interval_secs: DEFAULT_FAILURE_INTERVAL_SECS,
            window_timeout_secs: None,
            on_ambiguous: AmbiguousPolicy::default(),
            form_schema: FormSchema::default(),
            submit_retry_secs: DEFAULT_SUBMIT_RETRY_SECS,
            submit_attempts: DEFAULT_SUBMIT_ATTEMPTS,
            artifact_path: PathBuf::from(DEFAULT_ARTIFACT_NAME),
            session_dir: None,
            last_student_id: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Directory session files are kept in.
    pub fn session_dir(&self) -> Result<PathBuf> {
        if let Some(ref dir) = self.session_dir {
            return Ok(dir.clone());
        }
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    pub fn auth_settings(&self) -> AuthSettings {
        AuthSettings {
            portal_url: self.portal_url.clone(),
            sso_login_prefix: self.sso_login_prefix.clone(),
            ..AuthSettings::default()
        }
    }

    pub fn poll_options(&self) -> PollOptions {
        PollOptions {
            interval: Duration::from_secs(self.poll_interval_secs),
            failure_interval: Duration::from_secs(self.failure_interval_secs),
            timeout: self.window_timeout_secs.map(Duration::from_secs),
            on_ambiguous: self.on_ambiguous,
        }
    }

    pub fn submit_options(&self) -> SubmitOptions {
        SubmitOptions {
            schema: self.form_schema,
            artifact_path: self.artifact_path.clone(),
        }
    }

    pub fn submit_retry(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.submit_attempts,
            Duration::from_secs(self.submit_retry_secs),
        )
    }
}
