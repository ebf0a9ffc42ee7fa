//! HTTP transport seam.
//!
//! Everything that talks to the portal or the SSO gateway goes through the
//! [`Transport`] trait so the handshake and the portal calls can be driven by
//! a scripted transport in tests. [`HttpTransport`] is the reqwest-backed
//! implementation used by the binary.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use reqwest::cookie::{CookieStore, Jar};
use reqwest::{header, Client, Url};
use tracing::debug;

use super::ApiError;

/// HTTP request timeout in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Browser-like user agent; the portal rejects obviously scripted clients.
const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_13) AppleWebKit/603.1.13 (KHTML, like Gecko) Version/10.1 Safari/603.1.13";

const ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,image/apng,*/*;q=0.8";

const ACCEPT_LANGUAGE: &str = "zh-CN,zh;q=0.9,en;q=0.8,zh-TW;q=0.7";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
        }
    }
}

/// A single outgoing request. Query and form fields keep their order, the
/// selection form is positional.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub form: Vec<(String, String)>,
    pub headers: Vec<(&'static str, String)>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::Get, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::Post, url)
    }

    fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            query: Vec::new(),
            form: Vec::new(),
            headers: Vec::new(),
        }
    }

    pub fn query(mut self, query: Vec<(String, String)>) -> Self {
        self.query = query;
        self
    }

    pub fn form(mut self, form: Vec<(String, String)>) -> Self {
        self.form = form;
        self
    }

    pub fn header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }

    /// Value of the first form field called `name`.
    pub fn form_value(&self, name: &str) -> Option<&str> {
        self.form
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Value of the first header called `name` (case-insensitive).
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Response after redirects have been followed.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// Final URL, after redirects.
    pub url: String,
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

pub trait Transport: Send + Sync {
    /// Dispatch one request, following redirects.
    ///
    /// Network-level faults surface as [`ApiError::Transport`].
    fn execute(
        &self,
        request: HttpRequest,
    ) -> impl Future<Output = Result<HttpResponse, ApiError>> + Send;

    /// Look up a cookie the transport's cookie store holds for `url`.
    fn cookie(&self, url: &str, name: &str) -> Option<String>;

    /// Drop every stored cookie so the next request starts a new HTTP session.
    fn reset_cookies(&self);
}

struct HttpState {
    client: Client,
    jar: Arc<Jar>,
}

/// reqwest-backed transport with its own cookie store.
/// Clone is not provided; the authenticator and the portal client each own one.
pub struct HttpTransport {
    state: Mutex<HttpState>,
}

impl HttpTransport {
    pub fn new() -> Result<Self, ApiError> {
        Ok(Self {
            state: Mutex::new(Self::build_state()?),
        })
    }

    fn build_state() -> Result<HttpState, ApiError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(header::ACCEPT, header::HeaderValue::from_static(ACCEPT));
        headers.insert(
            header::ACCEPT_LANGUAGE,
            header::HeaderValue::from_static(ACCEPT_LANGUAGE),
        );

        let jar = Arc::new(Jar::default());
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .cookie_provider(Arc::clone(&jar))
            .build()?;

        Ok(HttpState { client, jar })
    }

    fn client(&self) -> Client {
        // Client is an Arc internally, cloning shares the connection pool
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .client
            .clone()
    }
}

impl Transport for HttpTransport {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, ApiError> {
        let client = self.client();
        debug!(method = request.method.as_str(), url = %request.url, "http request");

        let mut builder = match request.method {
            Method::Get => client.get(&request.url),
            Method::Post => client.post(&request.url),
        };
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if !request.form.is_empty() {
            builder = builder.form(&request.form);
        }
        for (name, value) in &request.headers {
            builder = builder.header(*name, value);
        }

        let response = builder.send().await?;
        let url = response.url().to_string();
        let status = response.status().as_u16();
        let body = response.text().await?;

        debug!(status, url = %url, bytes = body.len(), "http response");
        Ok(HttpResponse { url, status, body })
    }

    fn cookie(&self, url: &str, name: &str) -> Option<String> {
        let url = Url::parse(url).ok()?;
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let header = state.jar.cookies(&url)?;
        let header = header.to_str().ok()?;
        find_cookie(header, name)
    }

    fn reset_cookies(&self) {
        match Self::build_state() {
            Ok(fresh) => {
                *self.state.lock().unwrap_or_else(PoisonError::into_inner) = fresh;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to rebuild HTTP client, keeping old cookies");
            }
        }
    }
}

/// Pick `name` out of a `Cookie:` header value (`a=1; b=2`).
pub(crate) fn find_cookie(header: &str, name: &str) -> Option<String> {
    header.split(';').find_map(|pair| {
        let (key, value) = pair.trim().split_once('=')?;
        (key == name).then(|| value.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_cookie() {
        let header = "route=abc; ASP.NET_SessionId=k3j2h1; lang=zh";
        assert_eq!(find_cookie(header, "ASP.NET_SessionId").as_deref(), Some("k3j2h1"));
        assert_eq!(find_cookie(header, "route").as_deref(), Some("abc"));
        assert_eq!(find_cookie(header, "missing"), None);
        assert_eq!(find_cookie("", "route"), None);
    }

    #[test]
    fn test_request_builders_keep_field_order() {
        let req = HttpRequest::post("http://portal/x")
            .form(vec![
                ("b".to_string(), "2".to_string()),
                ("a".to_string(), "1".to_string()),
            ])
            .header("Referer", "http://sso/login");

        assert_eq!(req.method, Method::Post);
        assert_eq!(req.form[0].0, "b");
        assert_eq!(req.form_value("a"), Some("1"));
        assert_eq!(req.header_value("referer"), Some("http://sso/login"));
    }

    #[test]
    fn test_response_success_range() {
        let ok = HttpResponse { url: String::new(), status: 204, body: String::new() };
        let bad = HttpResponse { url: String::new(), status: 302, body: String::new() };
        assert!(ok.is_success());
        assert!(!bad.is_success());
    }
}
