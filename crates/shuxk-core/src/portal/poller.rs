//! Waiting for the registration window to open.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::api::{ApiError, HttpResponse, PortalClient, Transport};
use crate::auth::{AuthError, Authenticator, Session};

/// Shown on the fast-input page before the window opens.
const NOT_OPEN_MARKER: &str = "选课时间未到";

/// Part of the eligibility panel, only rendered once selection is allowed.
const OPEN_MARKER: &str = "英语等级";

/// What to do when a probe can't tell whether the window is open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AmbiguousPolicy {
    /// Keep the current token and probe again after the failure interval.
    #[default]
    Retry,
    /// Log in again before the next probe.
    Reauthenticate,
}

#[derive(Debug, Clone, Copy)]
pub struct PollOptions {
    pub interval: Duration,
    pub failure_interval: Duration,
    /// `None` waits forever.
    pub timeout: Option<Duration>,
    pub on_ambiguous: AmbiguousPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowStatus {
    Opened,
    TimedOut,
}

/// Reading of a single probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WindowState {
    Open,
    NotYetOpen,
    CannotJudge(String),
}

#[derive(Error, Debug)]
pub enum PollError {
    #[error("Polling interrupted")]
    Interrupted,

    #[error(transparent)]
    Auth(#[from] AuthError),
}

/// Classify a fast-input probe. Anything that is neither clearly closed nor
/// clearly open, including transport faults, is `CannotJudge`.
pub fn classify(probe: Result<HttpResponse, ApiError>) -> WindowState {
    match probe {
        Err(e) => WindowState::CannotJudge(e.to_string()),
        Ok(r) if !r.is_success() => WindowState::CannotJudge(format!("status {}", r.status)),
        Ok(r) if r.body.contains(NOT_OPEN_MARKER) => WindowState::NotYetOpen,
        Ok(r) if r.body.contains(OPEN_MARKER) => WindowState::Open,
        Ok(r) => WindowState::CannotJudge(format!("no known marker at {}", r.url)),
    }
}

/// Resolves once `cancel` reads true. A dropped sender never cancels.
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow_and_update() {
            return;
        }
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

pub struct WindowPoller<'a, T> {
    client: &'a PortalClient<T>,
    authenticator: &'a Authenticator<T>,
    options: PollOptions,
}

impl<'a, T: Transport> WindowPoller<'a, T> {
    pub fn new(
        client: &'a PortalClient<T>,
        authenticator: &'a Authenticator<T>,
        options: PollOptions,
    ) -> Self {
        Self {
            client,
            authenticator,
            options,
        }
    }

    /// Probe until the window opens, the timeout passes, or `cancel` fires.
    pub async fn wait_for_window(
        &self,
        session: &mut Session,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<WindowStatus, PollError> {
        let started = Instant::now();
        let deadline = self.options.timeout.map(|t| started + t);
        let mut probes: u32 = 0;

        loop {
            if *cancel.borrow() {
                return Err(PollError::Interrupted);
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Ok(gave_up(started, probes));
            }

            let fresh = tokio::select! {
                biased;
                _ = cancelled(cancel) => return Err(PollError::Interrupted),
                _ = deadline_passed(deadline) => return Ok(gave_up(started, probes)),
                fresh = self.authenticator.ensure_fresh(session) => fresh,
            };

            let state = match fresh {
                Err(e) => login_failed(e)?,
                Ok(_) => {
                    probes += 1;
                    tokio::select! {
                        biased;
                        _ = cancelled(cancel) => return Err(PollError::Interrupted),
                        _ = deadline_passed(deadline) => return Ok(gave_up(started, probes)),
                        probe = self.client.fetch_fast_input(session) => classify(probe),
                    }
                }
            };

            let pause = match state {
                WindowState::Open => {
                    info!(probes, "Registration window is open");
                    return Ok(WindowStatus::Opened);
                }
                WindowState::NotYetOpen => {
                    info!(
                        probes,
                        next_probe_secs = self.options.interval.as_secs(),
                        "Registration window not open yet"
                    );
                    self.options.interval
                }
                WindowState::CannotJudge(reason) => {
                    warn!(probes, reason = %reason, "Cannot tell whether the registration window is open");
                    if self.options.on_ambiguous == AmbiguousPolicy::Reauthenticate {
                        info!("Token may be stale, logging in again");
                        let refreshed = tokio::select! {
                            biased;
                            _ = cancelled(cancel) => return Err(PollError::Interrupted),
                            _ = deadline_passed(deadline) => return Ok(gave_up(started, probes)),
                            refreshed = self.authenticator.refresh(session) => refreshed,
                        };
                        if let Err(e) = refreshed {
                            login_failed(e)?;
                        }
                    }
                    self.options.failure_interval
                }
            };

            let pause = match deadline {
                Some(d) => pause.min(d.saturating_duration_since(Instant::now())),
                None => pause,
            };
            debug!(pause_ms = pause.as_millis() as u64, "Sleeping before next probe");
            tokio::select! {
                biased;
                _ = cancelled(cancel) => return Err(PollError::Interrupted),
                _ = tokio::time::sleep(pause) => {}
            }
        }
    }
}

/// Resolves at `deadline`, never when there is none.
async fn deadline_passed(deadline: Option<Instant>) {
    match deadline {
        Some(d) => tokio::time::sleep_until(d).await,
        None => std::future::pending::<()>().await,
    }
}

fn gave_up(started: Instant, probes: u32) -> WindowStatus {
    info!(
        probes,
        elapsed_secs = started.elapsed().as_secs(),
        "Gave up waiting for the registration window"
    );
    WindowStatus::TimedOut
}

/// A rejected password ends the poll. Any other login failure counts as an
/// ambiguous probe and is retried after the failure interval.
fn login_failed(e: AuthError) -> Result<WindowState, PollError> {
    match e {
        AuthError::InvalidCredentials => Err(PollError::Auth(e)),
        e => {
            warn!(error = %e, "Login failed while waiting for the window");
            Ok(WindowState::CannotJudge(format!("login failed: {e}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::client::{FAST_INPUT_PATH, SESSION_COOKIE};
    use crate::auth::{AuthSettings, Credential, Token};
    use crate::testing::ScriptedTransport;
    use crate::utils::RetryPolicy;

    const BASE: &str = "http://xk.example.edu";
    const CLOSED: &str = "<html><p>选课时间未到</p></html>";
    const OPEN: &str = "<html><td>英语等级</td></html>";
    const LOGIN_PAGE: &str = "<html>请先登录</html>";

    fn options(interval: u64, timeout: Option<u64>) -> PollOptions {
        PollOptions {
            interval: Duration::from_secs(interval),
            failure_interval: Duration::from_secs(1),
            timeout: timeout.map(Duration::from_secs),
            on_ambiguous: AmbiguousPolicy::Retry,
        }
    }

    fn session(dir: &std::path::Path) -> Session {
        let mut session = Session::new(dir, Credential::new("19120001", "pw").unwrap());
        session.set_token(Token::new("tok-1"));
        session
    }

    fn probe_url() -> String {
        format!("{BASE}{FAST_INPUT_PATH}")
    }

    fn authenticator() -> Authenticator<ScriptedTransport> {
        let settings = AuthSettings {
            portal_url: BASE.to_string(),
            sso_login_prefix: "https://sso.example.edu/login".to_string(),
            ..AuthSettings::default()
        };
        Authenticator::new(ScriptedTransport::new(), settings)
    }

    #[test]
    fn test_classify() {
        let page = |status: u16, body: &str| {
            Ok(HttpResponse { url: probe_url(), status, body: body.to_string() })
        };
        assert_eq!(classify(page(200, CLOSED)), WindowState::NotYetOpen);
        assert_eq!(classify(page(200, OPEN)), WindowState::Open);
        assert!(matches!(classify(page(200, LOGIN_PAGE)), WindowState::CannotJudge(_)));
        assert!(matches!(classify(page(500, OPEN)), WindowState::CannotJudge(_)));
        assert!(matches!(
            classify(Err(ApiError::Transport("timeout".into()))),
            WindowState::CannotJudge(_)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_after_timeout_not_before() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session(dir.path());
        let client = PortalClient::new(
            ScriptedTransport::repeating(HttpResponse {
                url: probe_url(),
                status: 200,
                body: CLOSED.to_string(),
            }),
            BASE,
        );
        let auth = authenticator();
        let (_tx, mut rx) = watch::channel(false);

        let started = Instant::now();
        let status = WindowPoller::new(&client, &auth, options(1, Some(3)))
            .wait_for_window(&mut session, &mut rx)
            .await
            .unwrap();

        let elapsed = started.elapsed();
        assert_eq!(status, WindowStatus::TimedOut);
        assert!(elapsed >= Duration::from_secs(3), "returned early: {elapsed:?}");
        assert!(elapsed < Duration::from_secs(4), "returned late: {elapsed:?}");
        assert_eq!(client.transport().request_count(), 3);
        assert_eq!(auth.transport().request_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_login_still_times_out_on_schedule() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session(dir.path());
        session.set_token(Token {
            value: "tok-old".to_string(),
            issued_at: chrono::Utc::now() - chrono::Duration::hours(1),
        });
        let client = PortalClient::new(ScriptedTransport::new(), BASE);
        let auth = Authenticator::new(
            ScriptedTransport::repeating(HttpResponse {
                url: format!("{BASE}/Maint"),
                status: 200,
                body: "maintenance".to_string(),
            }),
            AuthSettings {
                portal_url: BASE.to_string(),
                sso_login_prefix: "https://sso.example.edu/login".to_string(),
                ..AuthSettings::default()
            },
        );
        let (_tx, mut rx) = watch::channel(false);

        let started = Instant::now();
        let status = WindowPoller::new(&client, &auth, options(1, Some(3)))
            .wait_for_window(&mut session, &mut rx)
            .await
            .unwrap();

        let elapsed = started.elapsed();
        assert_eq!(status, WindowStatus::TimedOut);
        assert!(elapsed >= Duration::from_secs(3), "returned early: {elapsed:?}");
        assert!(elapsed < Duration::from_secs(4), "returned late: {elapsed:?}");
        assert_eq!(client.transport().request_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_login_is_retried_like_an_ambiguous_probe() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = Session::new(dir.path(), Credential::new("19120001", "pw").unwrap());
        let client = PortalClient::new(ScriptedTransport::new(), BASE);
        client.transport().push(&probe_url(), 200, OPEN);

        let auth = Authenticator::new(
            ScriptedTransport::new(),
            AuthSettings {
                portal_url: BASE.to_string(),
                sso_login_prefix: "https://sso.example.edu/login".to_string(),
                retry: RetryPolicy::new(1, Duration::from_secs(3)),
            },
        );
        auth.transport()
            .set_cookie_on(&format!("{BASE}/Home/TermSelect"), SESSION_COOKIE, "tok-2");
        // the first login gives up at once, the next loop logs in
        auth.transport()
            .push(&format!("{BASE}/Maint"), 200, "maintenance")
            .push("https://sso.example.edu/login", 200, "<form></form>")
            .push(
                &format!("{BASE}/Home/TermIndex"),
                200,
                r#"<table><tr value="20193"><td>冬季学期</td></tr></table>"#,
            )
            .push(&format!("{BASE}/Home/StudentIndex"), 200, "19120001");
        let (_tx, mut rx) = watch::channel(false);

        let started = Instant::now();
        let status = WindowPoller::new(&client, &auth, options(30, None))
            .wait_for_window(&mut session, &mut rx)
            .await
            .unwrap();

        assert_eq!(status, WindowStatus::Opened);
        assert_eq!(session.token().unwrap().value, "tok-2");
        // one failure interval, no normal poll interval
        assert!(started.elapsed() >= Duration::from_secs(1));
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(client.transport().request_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_password_ends_poll() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = Session::new(dir.path(), Credential::new("19120001", "bad").unwrap());
        let client = PortalClient::new(ScriptedTransport::new(), BASE);
        let auth = authenticator();
        auth.transport().push(
            "https://sso.example.edu/login",
            200,
            "<form></form>",
        );
        auth.transport().push(
            "https://sso.example.edu/login",
            200,
            "<p>认证失败</p>",
        );
        let (_tx, mut rx) = watch::channel(false);

        let err = WindowPoller::new(&client, &auth, options(1, Some(60)))
            .wait_for_window(&mut session, &mut rx)
            .await
            .unwrap_err();

        assert!(matches!(err, PollError::Auth(AuthError::InvalidCredentials)));
        assert_eq!(client.transport().request_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_after_closed_probes() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session(dir.path());
        let transport = ScriptedTransport::new();
        transport
            .push(&probe_url(), 200, CLOSED)
            .push(&probe_url(), 200, CLOSED)
            .push(&probe_url(), 200, OPEN);
        let client = PortalClient::new(transport, BASE);
        let auth = authenticator();
        let (_tx, mut rx) = watch::channel(false);

        let started = Instant::now();
        let status = WindowPoller::new(&client, &auth, options(30, None))
            .wait_for_window(&mut session, &mut rx)
            .await
            .unwrap();

        assert_eq!(status, WindowStatus::Opened);
        assert!(started.elapsed() >= Duration::from_secs(60));
        assert!(started.elapsed() < Duration::from_secs(61));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ambiguous_probe_retries_at_failure_interval() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session(dir.path());
        let transport = ScriptedTransport::new();
        transport
            .push(&probe_url(), 200, LOGIN_PAGE)
            .push_error(ApiError::Transport("connection reset".into()))
            .push(&probe_url(), 200, OPEN);
        let client = PortalClient::new(transport, BASE);
        let auth = authenticator();
        let (_tx, mut rx) = watch::channel(false);

        let started = Instant::now();
        let status = WindowPoller::new(&client, &auth, options(30, None))
            .wait_for_window(&mut session, &mut rx)
            .await
            .unwrap();

        assert_eq!(status, WindowStatus::Opened);
        // two failure intervals, no normal poll interval
        assert!(started.elapsed() < Duration::from_secs(3));
        assert_eq!(auth.transport().request_count(), 0);
        assert_eq!(session.token().unwrap().value, "tok-1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_ambiguous_probe_can_trigger_login() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session(dir.path());
        let transport = ScriptedTransport::new();
        transport
            .push(&probe_url(), 200, LOGIN_PAGE)
            .push(&probe_url(), 200, OPEN);
        let client = PortalClient::new(transport, BASE);

        let auth = authenticator();
        auth.transport()
            .set_cookie_on(&format!("{BASE}/Home/TermSelect"), SESSION_COOKIE, "tok-2")
            .push("https://sso.example.edu/login", 200, "<form></form>")
            .push(
                &format!("{BASE}/Home/TermIndex"),
                200,
                r#"<table><tr value="20193"><td>冬季学期</td></tr></table>"#,
            )
            .push(&format!("{BASE}/Home/StudentIndex"), 200, "19120001");
        let (_tx, mut rx) = watch::channel(false);

        let opts = PollOptions {
            on_ambiguous: AmbiguousPolicy::Reauthenticate,
            ..options(30, None)
        };
        let status = WindowPoller::new(&client, &auth, opts)
            .wait_for_window(&mut session, &mut rx)
            .await
            .unwrap();

        assert_eq!(status, WindowStatus::Opened);
        assert_eq!(session.token().unwrap().value, "tok-2");
        let probes = client.transport().requests();
        assert_eq!(probes[1].header_value("cookie"), Some("ASP.NET_SessionId=tok-2"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_before_first_probe() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session(dir.path());
        let client = PortalClient::new(ScriptedTransport::new(), BASE);
        let auth = authenticator();
        let (tx, mut rx) = watch::channel(false);
        tx.send(true).unwrap();

        let err = WindowPoller::new(&client, &auth, options(1, None))
            .wait_for_window(&mut session, &mut rx)
            .await
            .unwrap_err();

        assert!(matches!(err, PollError::Interrupted));
        assert_eq!(client.transport().request_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_sleep() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session(dir.path());
        let client = PortalClient::new(
            ScriptedTransport::repeating(HttpResponse {
                url: probe_url(),
                status: 200,
                body: CLOSED.to_string(),
            }),
            BASE,
        );
        let auth = authenticator();
        let (tx, mut rx) = watch::channel(false);
        let poller = WindowPoller::new(&client, &auth, options(30, None));

        let started = Instant::now();
        let (result, _) = tokio::join!(poller.wait_for_window(&mut session, &mut rx), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            tx.send(true).unwrap();
        });

        assert!(matches!(result, Err(PollError::Interrupted)));
        assert!(started.elapsed() < Duration::from_secs(6));
        assert_eq!(client.transport().request_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_sender_does_not_cancel() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session(dir.path());
        let transport = ScriptedTransport::new();
        transport.push(&probe_url(), 200, CLOSED).push(&probe_url(), 200, OPEN);
        let client = PortalClient::new(transport, BASE);
        let auth = authenticator();
        let (tx, mut rx) = watch::channel(false);
        drop(tx);

        let status = WindowPoller::new(&client, &auth, options(1, None))
            .wait_for_window(&mut session, &mut rx)
            .await
            .unwrap();
        assert_eq!(status, WindowStatus::Opened);
    }
}
