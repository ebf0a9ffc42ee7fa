//! Registration window polling and course selection submission.

pub mod poller;
pub mod submitter;

pub use poller::{AmbiguousPolicy, PollError, PollOptions, WindowPoller, WindowState, WindowStatus};
pub use submitter::{FormSchema, SubmitError, SubmitOptions, Submitter};
