//! Test doubles shared by the unit tests.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::{Arc, Mutex};

use crate::api::{ApiError, HttpRequest, HttpResponse, Transport};

/// Replays canned responses in order and records every request.
#[derive(Default)]
pub struct ScriptedTransport {
    responses: Mutex<VecDeque<Result<HttpResponse, ApiError>>>,
    /// Fallback once the script runs out; `None` means panic.
    repeat: Option<HttpResponse>,
    requests: Mutex<Vec<HttpRequest>>,
    cookies: Mutex<HashMap<String, String>>,
    /// Cookies that appear in the store once the request with this URL prefix
    /// is answered.
    cookie_on: Mutex<Vec<(String, String, String)>>,
    resets: Mutex<u32>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every request with the same response.
    pub fn repeating(response: HttpResponse) -> Self {
        Self {
            repeat: Some(response),
            ..Self::default()
        }
    }

    pub fn push(&self, url: &str, status: u16, body: &str) -> &Self {
        self.responses.lock().unwrap().push_back(Ok(HttpResponse {
            url: url.to_string(),
            status,
            body: body.to_string(),
        }));
        self
    }

    pub fn push_error(&self, err: ApiError) -> &Self {
        self.responses.lock().unwrap().push_back(Err(err));
        self
    }

    /// Put `name=value` in the cookie store when a request to a URL starting
    /// with `url_prefix` is executed.
    pub fn set_cookie_on(&self, url_prefix: &str, name: &str, value: &str) -> &Self {
        self.cookie_on.lock().unwrap().push((
            url_prefix.to_string(),
            name.to_string(),
            value.to_string(),
        ));
        self
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn reset_count(&self) -> u32 {
        *self.resets.lock().unwrap()
    }
}

impl Transport for ScriptedTransport {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, ApiError> {
        for (prefix, name, value) in self.cookie_on.lock().unwrap().iter() {
            if request.url.starts_with(prefix.as_str()) {
                self.cookies
                    .lock()
                    .unwrap()
                    .insert(name.clone(), value.clone());
            }
        }
        self.requests.lock().unwrap().push(request);

        let next = self.responses.lock().unwrap().pop_front();
        match (next, &self.repeat) {
            (Some(response), _) => response,
            (None, Some(repeat)) => Ok(repeat.clone()),
            (None, None) => panic!("ScriptedTransport ran out of responses"),
        }
    }

    fn cookie(&self, _url: &str, name: &str) -> Option<String> {
        self.cookies.lock().unwrap().get(name).cloned()
    }

    fn reset_cookies(&self) {
        self.cookies.lock().unwrap().clear();
        *self.resets.lock().unwrap() += 1;
    }
}

/// In-memory log sink for asserting on `tracing` output.
#[derive(Clone, Default)]
pub struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl LogBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Capture log lines on the current thread until the guard is dropped.
pub fn capture_logs() -> (tracing::subscriber::DefaultGuard, LogBuffer) {
    let buffer = LogBuffer::default();
    let writer = buffer.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::DEBUG)
        .finish();
    (tracing::subscriber::set_default(subscriber), buffer)
}
