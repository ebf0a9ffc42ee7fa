//! One run of the selection workflow: log in, wait for the window, submit.

use std::future::Future;
use std::process::ExitCode;

use anyhow::{Context, Result};
use chrono::Local;
use tokio::sync::watch;
use tracing::{info, warn};

use shuxk_core::api::{ApiError, HttpTransport, PortalClient};
use shuxk_core::auth::credentials::validate_student_id;
use shuxk_core::auth::{AuthError, Authenticator, Credential, CredentialStore, Session};
use shuxk_core::config::Config;
use shuxk_core::models::{load_course_list, CourseInfo, CourseSelection};
use shuxk_core::portal::{PollError, SubmitError, Submitter, WindowPoller, WindowStatus};
use shuxk_core::utils::retry;

use crate::args::Args;

/// Environment variable read before falling back to the keychain.
const PASSWORD_ENV: &str = "SHUXK_PASSWORD";

/// Exit code when the window never opened before the timeout.
const EXIT_TIMED_OUT: u8 = 2;

/// Exit code after Ctrl-C.
const EXIT_INTERRUPTED: u8 = 130;

/// Where the password for a fresh session came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PasswordSource {
    Environment,
    Keychain,
    Prompt,
}

/// Pick a password: environment first, then keychain, then `prompt`.
fn resolve_password(
    env: Option<String>,
    keychain: impl FnOnce() -> Result<String>,
    prompt: impl FnOnce() -> Result<String>,
) -> Result<(String, PasswordSource)> {
    if let Some(password) = env.filter(|p| !p.is_empty()) {
        return Ok((password, PasswordSource::Environment));
    }
    match keychain() {
        Ok(password) => return Ok((password, PasswordSource::Keychain)),
        Err(e) => info!(error = %e, "No password in keychain"),
    }
    Ok((prompt()?, PasswordSource::Prompt))
}

fn prompt_password(student_id: &str) -> Result<String> {
    rpassword::prompt_password(format!("Password for {student_id}: "))
        .context("Failed to read password")
}

/// Reuse the saved session for `student_id`, or start a new one.
fn open_session(args: &Args, config: &Config) -> Result<(Session, Option<PasswordSource>)> {
    let dir = config.session_dir()?;
    let student_id = args.student_id.as_str();

    if args.forget_password {
        if let Err(e) = CredentialStore::delete(student_id) {
            warn!(error = %e, "Could not remove keychain password");
        }
    } else {
        match Session::load(&dir, student_id) {
            Ok(Some(session)) => {
                info!(path = %session.path().display(), "Loaded saved session");
                return Ok((session, None));
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Ignoring unreadable session file"),
        }
    }

    let (password, source) = resolve_password(
        std::env::var(PASSWORD_ENV).ok(),
        || CredentialStore::get_password(student_id),
        || prompt_password(student_id),
    )?;
    let credential = Credential::new(student_id, password)?;
    let mut session = Session::new(&dir, credential);
    if args.forget_password {
        session.clear()?;
    }
    Ok((session, Some(source)))
}

fn print_outcomes(outcomes: &[shuxk_core::models::SelectionOutcome]) {
    if outcomes.is_empty() {
        println!("The portal returned no results.");
        return;
    }
    for outcome in outcomes {
        println!("{}", outcome.display_line());
    }
    let succeeded = outcomes.iter().filter(|o| o.success).count();
    println!("{succeeded}/{} courses selected.", outcomes.len());
}

fn course_line(selection: &CourseSelection, info: &CourseInfo) -> String {
    let seats = if info.is_full() {
        "full".to_string()
    } else {
        format!("{} left", info.seats_left())
    };
    format!(
        "{selection} {} {} credit {} [{}/{}, {seats}] {}",
        info.course_name,
        info.teacher_name,
        info.credit,
        info.enrolled_count,
        info.capacity,
        info.select_restriction,
    )
}

async fn query_courses(
    client: &PortalClient<HttpTransport>,
    session: &Session,
    queries: &[String],
) -> Result<()> {
    for query in queries {
        let selection = CourseSelection::parse(query)
            .with_context(|| format!("Expected COURSE-TEACHER, got {query:?}"))?;
        match client
            .query_course(session, &selection.course_code, &selection.teacher_code)
            .await
        {
            Ok(info) => println!("{}", course_line(&selection, &info)),
            Err(ApiError::NotFound(_)) => println!("{selection} not offered"),
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// Cancellation flag flipped by Ctrl-C.
fn interrupt_channel() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted");
            let _ = tx.send(true);
        }
    });
    rx
}

/// Run `work` unless Ctrl-C arrives first, in which case `None`.
async fn until_interrupted<F: Future>(cancel: &mut watch::Receiver<bool>, work: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        Ok(_) = cancel.wait_for(|interrupted| *interrupted) => None,
        output = work => Some(output),
    }
}

pub async fn run(args: Args) -> Result<ExitCode> {
    validate_student_id(&args.student_id)?;

    let mut config = Config::load()?;
    args.apply(&mut config);

    let (mut session, source) = open_session(&args, &config)?;
    let authenticator = Authenticator::new(HttpTransport::new()?, config.auth_settings());
    let client = PortalClient::new(HttpTransport::new()?, &config.portal_url);

    match authenticator.ensure_fresh(&mut session).await {
        Ok(_) => {}
        Err(e) => {
            if matches!(e, AuthError::InvalidCredentials) {
                if let Err(clear_err) = session.clear() {
                    warn!(error = %clear_err, "Could not remove session file");
                }
                if source != Some(PasswordSource::Environment) {
                    let _ = CredentialStore::delete(session.student_id());
                }
            }
            return Err(e.into());
        }
    }

    if let Some(token) = session.token() {
        let until = token.expires_at().with_timezone(&Local);
        println!(
            "Logged in as {}, session valid until {} ({} min).",
            session.student_id(),
            until.format("%H:%M"),
            token.minutes_until_expiry()
        );
    }

    if source == Some(PasswordSource::Prompt) {
        let password = session.credential().password();
        if let Err(e) = CredentialStore::store(session.student_id(), password) {
            warn!(error = %e, "Could not save password to keychain");
        }
    }
    if config.last_student_id.as_deref() != Some(session.student_id()) {
        config.last_student_id = Some(session.student_id().to_string());
        if let Err(e) = config.save() {
            warn!(error = %e, "Could not save config");
        }
    }

    if !args.query.is_empty() {
        query_courses(&client, &session, &args.query).await?;
        return Ok(ExitCode::SUCCESS);
    }

    let courses = load_course_list(&args.courses)?;
    if courses.is_empty() {
        println!("No courses listed in {}.", args.courses.display());
        return Ok(ExitCode::SUCCESS);
    }
    for course in &courses {
        println!("Queued {course}");
    }

    let mut cancel = interrupt_channel();
    let poller = WindowPoller::new(&client, &authenticator, config.poll_options());
    match poller.wait_for_window(&mut session, &mut cancel).await {
        Ok(WindowStatus::Opened) => println!("Selection window is open, submitting."),
        Ok(WindowStatus::TimedOut) => {
            println!("Selection window did not open in time.");
            return Ok(ExitCode::from(EXIT_TIMED_OUT));
        }
        Err(PollError::Interrupted) => return Ok(ExitCode::from(EXIT_INTERRUPTED)),
        Err(e) => return Err(e.into()),
    }

    let submission = async {
        authenticator.ensure_fresh(&mut session).await?;
        let session = &session;
        let courses = courses.as_slice();
        let submitter = &Submitter::new(&client, config.submit_options());
        let outcomes = retry(
            config.submit_retry(),
            |e: &SubmitError| matches!(e, SubmitError::Api(api) if api.is_transient()),
            move |_| submitter.submit(session, courses),
        )
        .await?;
        Ok::<_, anyhow::Error>(outcomes)
    };
    let Some(outcomes) = until_interrupted(&mut cancel, submission).await else {
        println!("Interrupted, submission abandoned.");
        return Ok(ExitCode::from(EXIT_INTERRUPTED));
    };
    let outcomes = outcomes?;

    print_outcomes(&outcomes);
    Ok(ExitCode::SUCCESS)
}
