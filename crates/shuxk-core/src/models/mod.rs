//! Data models for the course selection portal.
//!
//! - `Term`: an entry on the term-selection page
//! - `CourseSelection`, `CourseList`: what the student wants to enroll in
//! - `CourseInfo`: capacity snapshot from the course query page
//! - `SelectionOutcome`: one row of the submission result table

pub mod course;
pub mod outcome;
pub mod term;

pub use course::{load_course_list, parse_course_list, CourseInfo, CourseListError, CourseSelection};
pub use outcome::SelectionOutcome;
pub use term::Term;
