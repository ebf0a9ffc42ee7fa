//! Submitting course selections and reading the result table.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::api::client::SELECTION_RESULT_PATH;
use crate::api::table::{self, CellCount, RowSchema, TableRow};
use crate::api::{ApiError, PortalClient, Transport};
use crate::auth::Session;
use crate::models::{CourseSelection, SelectionOutcome};

/// Default file the raw result page is dumped to when it can't be read.
pub const DEFAULT_ARTIFACT_NAME: &str = "result.html";

/// Upstream form layouts. Every layout sends a fixed number of slots and pads
/// the unused ones with empty values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormSchema {
    /// `ListCourse[i].CID` / `.TNo` / `.NeedBook`, 6 slots.
    #[default]
    ListCourse,
    /// `cids[i]` / `tnos[i]`, 9 slots.
    ParallelArrays,
}

impl FormSchema {
    pub fn slots(&self) -> usize {
        match self {
            FormSchema::ListCourse => 6,
            FormSchema::ParallelArrays => 9,
        }
    }

    /// Build the form body. `selections` must already fit in [`slots`](Self::slots).
    pub fn build_form(&self, student_id: &str, selections: &[CourseSelection]) -> Vec<(String, String)> {
        let slot = |i: usize| {
            selections
                .get(i)
                .map(|s| (s.course_code.as_str(), s.teacher_code.as_str()))
                .unwrap_or(("", ""))
        };

        let mut form = Vec::new();
        match self {
            FormSchema::ListCourse => {
                form.push(("IgnorClassMark".to_string(), "False".to_string()));
                form.push(("IgnorCourseGroup".to_string(), "False".to_string()));
                form.push(("IgnorCredit".to_string(), "False".to_string()));
                form.push(("StudentNo".to_string(), student_id.to_string()));
                for i in 0..self.slots() {
                    let (cid, tno) = slot(i);
                    form.push((format!("ListCourse[{i}].CID"), cid.to_string()));
                    form.push((format!("ListCourse[{i}].TNo"), tno.to_string()));
                    form.push((format!("ListCourse[{i}].NeedBook"), "false".to_string()));
                }
            }
            FormSchema::ParallelArrays => {
                form.push(("StudentNo".to_string(), student_id.to_string()));
                for i in 0..self.slots() {
                    let (cid, tno) = slot(i);
                    form.push((format!("cids[{i}]"), cid.to_string()));
                    form.push((format!("tnos[{i}]"), tno.to_string()));
                }
            }
        }
        form
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResultColumn {
    CourseCode,
    CourseName,
    TeacherCode,
    TeacherName,
    Credit,
    CourseTime,
    Message,
}

/// Column layout of the selection result table.
const RESULT_SCHEMA: RowSchema<ResultColumn> = RowSchema {
    cells: CellCount::Exactly(10),
    columns: &[
        (ResultColumn::CourseCode, 1),
        (ResultColumn::CourseName, 2),
        (ResultColumn::TeacherCode, 3),
        (ResultColumn::TeacherName, 4),
        (ResultColumn::Credit, 5),
        (ResultColumn::CourseTime, 6),
        (ResultColumn::Message, 9),
    ],
};

#[derive(Error, Debug)]
pub enum SubmitError {
    #[error("Could not read the selection result ({rows} rows), raw page saved to {}", .artifact.display())]
    UnparseableResult { rows: usize, artifact: PathBuf },

    #[error("Could not save the unreadable result page to {}: {source}", .path.display())]
    Artifact {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Api(#[from] ApiError),
}

#[derive(Debug, Clone)]
pub struct SubmitOptions {
    pub schema: FormSchema,
    /// Where to dump result pages that can't be parsed.
    pub artifact_path: PathBuf,
}

impl Default for SubmitOptions {
    fn default() -> Self {
        Self {
            schema: FormSchema::default(),
            artifact_path: PathBuf::from(DEFAULT_ARTIFACT_NAME),
        }
    }
}

pub struct Submitter<'a, T> {
    client: &'a PortalClient<T>,
    options: SubmitOptions,
}

impl<'a, T: Transport> Submitter<'a, T> {
    pub fn new(client: &'a PortalClient<T>, options: SubmitOptions) -> Self {
        Self { client, options }
    }

    /// Submit `selections` in one request and return the portal's verdicts.
    ///
    /// An empty list returns no outcomes without contacting the portal.
    pub async fn submit(
        &self,
        session: &Session,
        selections: &[CourseSelection],
    ) -> Result<Vec<SelectionOutcome>, SubmitError> {
        if selections.is_empty() {
            warn!("No courses to submit");
            return Ok(Vec::new());
        }

        let slots = self.options.schema.slots();
        let selections = if selections.len() > slots {
            warn!(
                requested = selections.len(),
                slots,
                "More courses than form slots, ignoring the extra ones"
            );
            &selections[..slots]
        } else {
            selections
        };

        let form = self.options.schema.build_form(session.student_id(), selections);
        info!(courses = selections.len(), "Submitting course selection");
        let response = self
            .client
            .post_selection(session, SELECTION_RESULT_PATH, form)
            .await?;

        match parse_result_page(&response.body)? {
            ResultPage::Outcomes(outcomes) => Ok(outcomes),
            ResultPage::Unreadable { rows } => {
                write_artifact(&self.options.artifact_path, &response.body)?;
                error!(
                    rows,
                    artifact = %self.options.artifact_path.display(),
                    "Cannot parse selection result, raw page saved"
                );
                Err(SubmitError::UnparseableResult {
                    rows,
                    artifact: self.options.artifact_path.clone(),
                })
            }
        }
    }
}

enum ResultPage {
    Outcomes(Vec<SelectionOutcome>),
    /// No table, or nothing below its heading.
    Unreadable { rows: usize },
}

/// Only rows with `td` cells count. The first of them is the page's message
/// row; rows that don't match the schema are dropped with a warning.
fn parse_result_page(html: &str) -> Result<ResultPage, ApiError> {
    let Some(rows) = table::extract_rows(html, "table")? else {
        return Ok(ResultPage::Unreadable { rows: 0 });
    };
    let data: Vec<(usize, &TableRow)> = rows
        .iter()
        .enumerate()
        .filter(|(_, row)| !row.is_heading)
        .collect();
    if data.len() <= 1 {
        return Ok(ResultPage::Unreadable { rows: data.len() });
    }

    let s = &RESULT_SCHEMA;
    let mut outcomes = Vec::with_capacity(data.len() - 1);
    for &(index, row) in data.iter().skip(1) {
        if !s.accepts(&row.cells) {
            warn!(
                row = index,
                cells = row.cells.len(),
                "Dropping result row with unexpected cell count"
            );
            continue;
        }
        let cells = row.cells.as_slice();
        let message = s.require(cells, ResultColumn::Message)?.to_string();
        outcomes.push(SelectionOutcome {
            course_code: s.require(cells, ResultColumn::CourseCode)?.to_string(),
            course_name: s.require(cells, ResultColumn::CourseName)?.to_string(),
            teacher_code: s.require(cells, ResultColumn::TeacherCode)?.to_string(),
            teacher_name: s.require(cells, ResultColumn::TeacherName)?.to_string(),
            credit: s.require(cells, ResultColumn::Credit)?.to_string(),
            course_time: s.require(cells, ResultColumn::CourseTime)?.to_string(),
            success: SelectionOutcome::is_success_message(&message),
            failure_reason: message,
        });
    }
    Ok(ResultPage::Outcomes(outcomes))
}

/// Write `body` to `path` through a temporary file so an interrupted write
/// never leaves a truncated artifact behind.
fn write_artifact(path: &Path, body: &str) -> Result<(), SubmitError> {
    let wrap = |source| SubmitError::Artifact {
        path: path.to_path_buf(),
        source,
    };
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".partial");
    let tmp = PathBuf::from(tmp);

    let written = std::fs::File::create(&tmp).and_then(|mut file| {
        file.write_all(body.as_bytes())?;
        file.sync_all()
    });
    if let Err(e) = written.and_then(|()| std::fs::rename(&tmp, path)) {
        let _ = std::fs::remove_file(&tmp);
        return Err(wrap(e));
    }
    Ok(())
}
