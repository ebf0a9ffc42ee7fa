use serde::{Deserialize, Serialize};

/// A registration term offered on the term-selection page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Term {
    pub id: i64,
    pub display_name: String,
}
