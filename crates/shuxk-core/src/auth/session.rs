use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::Credential;

/// Token time-to-live in seconds.
/// The portal drops idle ASP.NET sessions after roughly 25 minutes.
const TOKEN_TTL_SECS: i64 = 1500;

/// Opaque portal session cookie value plus when it was obtained.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub value: String,
    pub issued_at: DateTime<Utc>,
}

impl Token {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            issued_at: Utc::now(),
        }
    }

    /// Advisory only: the server is the authority on whether a token still works.
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at()
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.issued_at + Duration::seconds(TOKEN_TTL_SECS)
    }

    /// Get minutes remaining until expiry (for display)
    pub fn minutes_until_expiry(&self) -> i64 {
        (self.expires_at() - Utc::now()).num_minutes().max(0)
    }
}

/// What gets persisted: identity and the last token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionData {
    #[serde(flatten)]
    pub credential: Credential,
    pub token: Option<Token>,
}

/// The one piece of mutable state: a credential and its current token.
/// Collaborators read the token through [`Session::token`]; only the
/// authenticator replaces it.
pub struct Session {
    path: PathBuf,
    data: SessionData,
}

impl Session {
    /// New session without a token, persisted under `dir`.
    pub fn new(dir: &Path, credential: Credential) -> Self {
        let path = Self::session_path(dir, credential.student_id());
        Self {
            path,
            data: SessionData {
                credential,
                token: None,
            },
        }
    }

    /// Load the session for `student_id` from `dir`, if one was saved.
    pub fn load(dir: &Path, student_id: &str) -> Result<Option<Self>> {
        let path = Self::session_path(dir, student_id);
        if !path.exists() {
            return Ok(None);
        }

        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read session file {}", path.display()))?;
        let data: SessionData = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse session file {}", path.display()))?;

        if data.credential.student_id() != student_id {
            anyhow::bail!(
                "Session file {} belongs to {}",
                path.display(),
                data.credential.student_id()
            );
        }
        Ok(Some(Self { path, data }))
    }

    /// Save session to disk
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(&self.data)?;
        std::fs::write(&self.path, contents)
            .with_context(|| format!("Failed to write session file {}", self.path.display()))?;
        Ok(())
    }

    /// Remove the persisted session file and forget the token
    pub fn clear(&mut self) -> Result<()> {
        self.data.token = None;
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
        }
        Ok(())
    }

    pub fn credential(&self) -> &Credential {
        &self.data.credential
    }

    pub fn student_id(&self) -> &str {
        self.data.credential.student_id()
    }

    pub fn token(&self) -> Option<&Token> {
        self.data.token.as_ref()
    }

    /// True when there is no token or its advisory lifetime has passed.
    pub fn needs_refresh(&self) -> bool {
        self.data.token.as_ref().map(|t| t.is_expired()).unwrap_or(true)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn set_token(&mut self, token: Token) {
        self.data.token = Some(token);
    }

    fn session_path(dir: &Path, student_id: &str) -> PathBuf {
        dir.join(format!("session-{}.json", student_id))
    }
}
