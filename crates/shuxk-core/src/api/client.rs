//! Authenticated client for the course selection portal.
//!
//! This module provides the `PortalClient` struct, which attaches the
//! session's token as the `ASP.NET_SessionId` cookie on every request and
//! exposes the handful of portal pages the rest of the crate needs.

use tracing::debug;

use crate::auth::Session;
use crate::models::CourseInfo;

use super::table::{self, CellCount, RowSchema};
use super::transport::{HttpRequest, HttpResponse, Method, Transport};
use super::ApiError;

// ============================================================================
// Constants
// ============================================================================

/// Cookie name the portal keeps its session id in.
pub const SESSION_COOKIE: &str = "ASP.NET_SessionId";

/// Page that shows the eligibility panel once the window is open.
pub const FAST_INPUT_PATH: &str = "/CourseSelectionStudent/FastInput";

/// Course search endpoint.
pub const QUERY_COURSE_PATH: &str = "/StudentQuery/CtrlViewQueryCourse";

/// Selection submit endpoint.
pub const SELECTION_RESULT_PATH: &str = "/CourseSelectionStudent/CtrlViewOperationResult";

/// Page size requested from the course search.
const QUERY_PAGE_SIZE: u32 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QueryColumn {
    CourseName,
    Credit,
    TeacherName,
    Capacity,
    Enrolled,
    Restriction,
}

/// Column layout of `table.tbllist` on the course search page.
const QUERY_SCHEMA: RowSchema<QueryColumn> = RowSchema {
    cells: CellCount::AtLeast(11),
    columns: &[
        (QueryColumn::CourseName, 1),
        (QueryColumn::Credit, 2),
        (QueryColumn::TeacherName, 4),
        (QueryColumn::Capacity, 7),
        (QueryColumn::Enrolled, 8),
        (QueryColumn::Restriction, 10),
    ],
};

/// Client for portal pages behind the SSO login.
pub struct PortalClient<T> {
    transport: T,
    base_url: String,
}

impl<T: Transport> PortalClient<T> {
    pub fn new(transport: T, base_url: &str) -> Self {
        Self {
            transport,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn resolve_url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    /// Send a request with the session token attached as the session cookie.
    ///
    /// The response is returned whatever its status; deciding whether the
    /// body means "stale token" is left to the caller.
    pub async fn request(
        &self,
        session: &Session,
        method: Method,
        path: &str,
        query: Vec<(String, String)>,
        form: Vec<(String, String)>,
    ) -> Result<HttpResponse, ApiError> {
        let token = session.token().ok_or(ApiError::Unauthorized)?;
        let request = match method {
            Method::Get => HttpRequest::get(self.resolve_url(path)),
            Method::Post => HttpRequest::post(self.resolve_url(path)),
        }
        .query(query)
        .form(form)
        .header("Cookie", format!("{}={}", SESSION_COOKIE, token.value));

        debug!(method = method.as_str(), path, "portal request");
        self.transport.execute(request).await
    }

    pub async fn get(
        &self,
        session: &Session,
        path: &str,
        query: Vec<(String, String)>,
    ) -> Result<HttpResponse, ApiError> {
        self.request(session, Method::Get, path, query, Vec::new()).await
    }

    pub async fn post(
        &self,
        session: &Session,
        path: &str,
        form: Vec<(String, String)>,
    ) -> Result<HttpResponse, ApiError> {
        self.request(session, Method::Post, path, Vec::new(), form).await
    }

    /// Check if response is successful, returning an error with body if not.
    pub fn check_response(response: HttpResponse) -> Result<HttpResponse, ApiError> {
        if response.is_success() {
            Ok(response)
        } else {
            Err(ApiError::from_status(response.status, &response.body))
        }
    }

    // ===== Portal pages =====

    /// Fetch the fast-input page used to tell whether the window is open.
    pub async fn fetch_fast_input(&self, session: &Session) -> Result<HttpResponse, ApiError> {
        self.get(session, FAST_INPUT_PATH, Vec::new()).await
    }

    /// Submit an already-built selection form.
    pub async fn post_selection(
        &self,
        session: &Session,
        path: &str,
        form: Vec<(String, String)>,
    ) -> Result<HttpResponse, ApiError> {
        let response = self.post(session, path, form).await?;
        Self::check_response(response)
    }

    /// Look up capacity and enrolment for one course/teacher pair.
    pub async fn query_course(
        &self,
        session: &Session,
        course_code: &str,
        teacher_code: &str,
    ) -> Result<CourseInfo, ApiError> {
        let query = course_query_params(course_code, teacher_code);
        let response = self.get(session, QUERY_COURSE_PATH, query).await?;
        let response = Self::check_response(response)?;
        parse_course_info(&response.body, course_code, teacher_code)
    }
}

fn course_query_params(course_code: &str, teacher_code: &str) -> Vec<(String, String)> {
    let page_size = QUERY_PAGE_SIZE.to_string();
    [
        ("CourseNo", course_code),
        ("TeachNo", teacher_code),
        ("CourseName", ""),
        ("TeachName", ""),
        ("CourseTime", ""),
        ("NotFull", "false"),
        ("Credit", ""),
        ("Campus", "0"),
        ("Enrolls", ""),
        ("DataCount", "0"),
        ("MinCapacity", ""),
        ("MaxCapacity", ""),
        ("PageIndex", "1"),
        ("PageSize", page_size.as_str()),
        ("FunctionString", "InitPage"),
    ]
    .iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

fn parse_number(value: &str, what: &str) -> Result<u32, ApiError> {
    value
        .trim()
        .parse()
        .map_err(|_| ApiError::InvalidResponse(format!("{what} is not a number: {value:?}")))
}

fn parse_course_info(
    html: &str,
    course_code: &str,
    teacher_code: &str,
) -> Result<CourseInfo, ApiError> {
    let rows = table::extract_rows(html, "table.tbllist")?.unwrap_or_default();
    let row = rows
        .iter()
        .filter(|row| !row.is_heading)
        .map(|row| row.cells.as_slice())
        .find(|cells| QUERY_SCHEMA.accepts(cells))
        .ok_or_else(|| ApiError::NotFound(format!("course {}-{}", course_code, teacher_code)))?;

    let s = &QUERY_SCHEMA;
    Ok(CourseInfo {
        course_name: s.require(row, QueryColumn::CourseName)?.to_string(),
        teacher_name: s.require(row, QueryColumn::TeacherName)?.to_string(),
        capacity: parse_number(s.require(row, QueryColumn::Capacity)?, "capacity")?,
        enrolled_count: parse_number(s.require(row, QueryColumn::Enrolled)?, "enrolled count")?,
        credit: parse_number(s.require(row, QueryColumn::Credit)?, "credit")?,
        select_restriction: s.require(row, QueryColumn::Restriction)?.to_string(),
    })
}
