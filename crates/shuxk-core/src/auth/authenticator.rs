//! SSO login and term-selection handshake.
//!
//! A token is only produced once the whole handshake has gone through:
//! portal → SSO login form → term page → term selection. Any partial run is
//! thrown away and, if the failure looks transient, started over with a
//! fresh cookie store.

use std::time::Duration;

use scraper::Html;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::api::client::SESSION_COOKIE;
use crate::api::table::{element_text, selector};
use crate::api::{ApiError, HttpRequest, Transport};
use crate::models::Term;
use crate::utils::{retry, RetryError, RetryPolicy};

use super::{Credential, Session, Token};

// ============================================================================
// Constants
// ============================================================================

/// Default portal entry point; it redirects to the SSO gateway.
pub const DEFAULT_PORTAL_URL: &str = "http://xk.autoisp.shu.edu.cn";

/// Where the portal is expected to send us to log in.
pub const DEFAULT_SSO_LOGIN_PREFIX: &str = "https://oauth.shu.edu.cn/login";

/// Text the SSO gateway shows when the password is wrong.
const AUTH_FAILED_MARKER: &str = "认证失败";

/// Value of the SSO form's submit button.
const LOGIN_SUBMIT_VALUE: &str = "登录/Login";

/// Path the SSO gateway redirects to after a successful login.
const TERM_PAGE_SUFFIX: &str = "/Home/TermIndex";

/// Endpoint the chosen term is posted to, relative to the term page.
const TERM_SELECT_SUFFIX: &str = "/Home/TermSelect";

/// Full handshake attempts before giving up.
const MAX_LOGIN_ATTEMPTS: u32 = 5;

/// Pause between handshake attempts.
const LOGIN_RETRY_DELAY_SECS: u64 = 3;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Invalid student id or password")]
    InvalidCredentials,

    #[error("Unexpected redirect while {stage}: {url}")]
    UnexpectedRedirect { stage: &'static str, url: String },

    #[error("No term offered on the term-selection page")]
    NoTerms,

    #[error("Portal did not accept the term selection")]
    LoginRejected,

    #[error(transparent)]
    Transport(#[from] ApiError),

    #[error("Authentication failed after {attempts} attempts: {last}")]
    AuthenticationFailed { attempts: u32, last: Box<AuthError> },
}

impl AuthError {
    /// Whether running the whole handshake again may help.
    pub fn is_retryable(&self) -> bool {
        match self {
            AuthError::UnexpectedRedirect { .. } | AuthError::LoginRejected | AuthError::NoTerms => {
                true
            }
            AuthError::Transport(_) => true,
            AuthError::InvalidCredentials | AuthError::AuthenticationFailed { .. } => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuthSettings {
    pub portal_url: String,
    pub sso_login_prefix: String,
    pub retry: RetryPolicy,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            portal_url: DEFAULT_PORTAL_URL.to_string(),
            sso_login_prefix: DEFAULT_SSO_LOGIN_PREFIX.to_string(),
            retry: RetryPolicy::new(
                MAX_LOGIN_ATTEMPTS,
                Duration::from_secs(LOGIN_RETRY_DELAY_SECS),
            ),
        }
    }
}

/// Obtains portal tokens. The only component that writes a session's token.
pub struct Authenticator<T> {
    transport: T,
    settings: AuthSettings,
}

impl<T: Transport> Authenticator<T> {
    pub fn new(transport: T, settings: AuthSettings) -> Self {
        Self {
            transport,
            settings,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Run the handshake, retrying transient failures.
    pub async fn authenticate(&self, credential: &Credential) -> Result<Token, AuthError> {
        let result = retry(self.settings.retry, AuthError::is_retryable, |attempt| {
            debug!(attempt, student_id = credential.student_id(), "Starting login handshake");
            self.handshake(credential)
        })
        .await;

        match result {
            Ok(token) => Ok(token),
            Err(RetryError::Aborted(e)) => Err(e),
            Err(RetryError::Exhausted { attempts, last }) => {
                error!(attempts, error = %last, "Giving up on login");
                Err(AuthError::AuthenticationFailed {
                    attempts,
                    last: Box::new(last),
                })
            }
        }
    }

    /// Log in again and store the new token in `session`, then persist it.
    pub async fn refresh(&self, session: &mut Session) -> Result<(), AuthError> {
        let token = self.authenticate(session.credential()).await?;
        session.set_token(token);
        if let Err(e) = session.save() {
            warn!(error = %e, "Failed to save session");
        }
        info!(student_id = session.student_id(), "Login successful");
        Ok(())
    }

    /// Refresh only when the session has no token or it is past its TTL.
    /// Returns whether a login happened.
    pub async fn ensure_fresh(&self, session: &mut Session) -> Result<bool, AuthError> {
        if !session.needs_refresh() {
            return Ok(false);
        }
        info!("Session token missing or expired, logging in");
        self.refresh(session).await?;
        Ok(true)
    }

    async fn handshake(&self, credential: &Credential) -> Result<Token, AuthError> {
        self.transport.reset_cookies();

        let start = self
            .transport
            .execute(HttpRequest::get(&self.settings.portal_url))
            .await?;
        if !start.url.starts_with(&self.settings.sso_login_prefix) {
            return Err(AuthError::UnexpectedRedirect {
                stage: "opening the portal",
                url: start.url,
            });
        }

        let login_form = vec![
            ("username".to_string(), credential.student_id().to_string()),
            ("password".to_string(), credential.password().to_string()),
            ("login_submit".to_string(), LOGIN_SUBMIT_VALUE.to_string()),
        ];
        let login = self
            .transport
            .execute(
                HttpRequest::post(&start.url)
                    .form(login_form)
                    .header("Referer", start.url.clone()),
            )
            .await?;
        if login.body.contains(AUTH_FAILED_MARKER) {
            error!(student_id = credential.student_id(), "SSO rejected the password");
            return Err(AuthError::InvalidCredentials);
        }

        let Some(portal_root) = login.url.strip_suffix(TERM_PAGE_SUFFIX) else {
            return Err(AuthError::UnexpectedRedirect {
                stage: "signing in",
                url: login.url.clone(),
            });
        };

        let terms = parse_terms(&login.body)?;
        let term = terms.first().ok_or(AuthError::NoTerms)?;
        if terms.len() > 1 {
            info!(
                offered = terms.len(),
                chosen = %term.display_name,
                "Several terms offered, choosing the first"
            );
        }

        let select_url = format!("{}{}", portal_root, TERM_SELECT_SUFFIX);
        let selected = self
            .transport
            .execute(
                HttpRequest::post(&select_url)
                    .form(vec![("termId".to_string(), term.id.to_string())])
                    .header("Referer", login.url.clone()),
            )
            .await?;
        if !selected.body.contains(credential.student_id()) {
            debug!(url = %selected.url, "Term selection response shows no logged-in student");
            return Err(AuthError::LoginRejected);
        }

        let value = self
            .transport
            .cookie(&self.settings.portal_url, SESSION_COOKIE)
            .ok_or_else(|| {
                warn!("Term selection succeeded but no session cookie was set");
                AuthError::LoginRejected
            })?;

        debug!(term = term.id, "Handshake complete");
        Ok(Token::new(value))
    }
}

/// Terms listed on the term-selection page: rows carrying the term id in a
/// `value` attribute, display name in the first cell.
fn parse_terms(html: &str) -> Result<Vec<Term>, ApiError> {
    let document = Html::parse_document(html);
    let row_sel = selector("tr[value]")?;
    let cell_sel = selector("td")?;

    let terms = document
        .select(&row_sel)
        .filter_map(|row| {
            let raw_id = row.value().attr("value")?;
            let Ok(id) = raw_id.trim().parse() else {
                debug!(value = raw_id, "Skipping term row with non-numeric id");
                return None;
            };
            let display_name = row
                .select(&cell_sel)
                .next()
                .map(|c| element_text(&c))
                .unwrap_or_default();
            Some(Term { id, display_name })
        })
        .collect();
    Ok(terms)
}
