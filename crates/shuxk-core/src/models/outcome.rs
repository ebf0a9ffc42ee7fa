use serde::{Deserialize, Serialize};

/// Marker the portal puts in the result column when a course was taken.
pub const SUCCESS_MARKER: &str = "成功";

/// Result of one submitted course, as reported by the portal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionOutcome {
    pub course_code: String,
    pub course_name: String,
    pub teacher_code: String,
    pub teacher_name: String,
    pub credit: String,
    pub course_time: String,
    pub failure_reason: String,
    pub success: bool,
}

impl SelectionOutcome {
    /// Whether a result message reports success.
    pub fn is_success_message(message: &str) -> bool {
        message.contains(SUCCESS_MARKER)
    }

    pub fn display_line(&self) -> String {
        let status = if self.success { "OK" } else { "FAILED" };
        format!(
            "[{}] {}-{} {} ({}) {}",
            status,
            self.course_code,
            self.teacher_code,
            self.course_name,
            self.teacher_name,
            self.failure_reason
        )
    }
}
