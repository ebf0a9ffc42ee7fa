//! Course selection requests and course query snapshots.

use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// One desired (course, teacher) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseSelection {
    pub course_code: String,
    pub teacher_code: String,
}

impl CourseSelection {
    pub fn new(course_code: impl Into<String>, teacher_code: impl Into<String>) -> Self {
        Self {
            course_code: course_code.into(),
            teacher_code: teacher_code.into(),
        }
    }

    /// Parse `courseCode-teacherCode`.
    pub fn parse(s: &str) -> Option<Self> {
        let (course, teacher) = s.split_once('-')?;
        let (course, teacher) = (course.trim(), teacher.trim());
        if course.is_empty() || teacher.is_empty() {
            return None;
        }
        Some(Self::new(course, teacher))
    }
}

impl fmt::Display for CourseSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.course_code, self.teacher_code)
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CourseListError {
    #[error("line {line}: expected courseCode-teacherCode, got {content:?}")]
    Malformed { line: usize, content: String },
}

/// Parse a course list: one `courseCode-teacherCode` per line, `#` comments
/// and blank lines ignored.
pub fn parse_course_list(text: &str) -> Result<Vec<CourseSelection>, CourseListError> {
    let mut selections = Vec::new();
    for (i, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let selection = CourseSelection::parse(line).ok_or_else(|| CourseListError::Malformed {
            line: i + 1,
            content: line.to_string(),
        })?;
        selections.push(selection);
    }
    debug!(count = selections.len(), "Parsed course list");
    Ok(selections)
}

/// Read and parse a course list file.
pub fn load_course_list(path: &Path) -> Result<Vec<CourseSelection>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read course list {}", path.display()))?;
    parse_course_list(&text)
        .with_context(|| format!("Failed to parse course list {}", path.display()))
}

/// Capacity snapshot of one course/teacher pair from the query page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseInfo {
    pub course_name: String,
    pub teacher_name: String,
    pub capacity: u32,
    pub enrolled_count: u32,
    pub credit: u32,
    pub select_restriction: String,
}

impl CourseInfo {
    pub fn is_full(&self) -> bool {
        self.enrolled_count >= self.capacity
    }

    pub fn seats_left(&self) -> u32 {
        self.capacity.saturating_sub(self.enrolled_count)
    }
}
