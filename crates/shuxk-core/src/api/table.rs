//! Positional HTML table extraction.
//!
//! The portal renders results as plain tables whose columns only have meaning
//! by position. Each page gets a [`RowSchema`] naming the columns it reads, so
//! a markup change means editing one index table, not the parsing code.

use scraper::{ElementRef, Html, Selector};

use super::ApiError;

/// How many cells a data row must have to be read with a schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellCount {
    Exactly(usize),
    AtLeast(usize),
}

impl CellCount {
    pub fn accepts(&self, n: usize) -> bool {
        match *self {
            CellCount::Exactly(want) => n == want,
            CellCount::AtLeast(min) => n >= min,
        }
    }
}

/// Column layout of one table.
#[derive(Debug)]
pub struct RowSchema<C: 'static> {
    pub cells: CellCount,
    pub columns: &'static [(C, usize)],
}

impl<C: Copy + PartialEq + std::fmt::Debug> RowSchema<C> {
    pub fn accepts(&self, row: &[String]) -> bool {
        self.cells.accepts(row.len())
    }

    /// Text of `column` in `row`, or `None` if the schema has no such column
    /// or the row is too short.
    pub fn cell<'r>(&self, row: &'r [String], column: C) -> Option<&'r str> {
        let index = self
            .columns
            .iter()
            .find(|(c, _)| *c == column)
            .map(|(_, i)| *i)?;
        row.get(index).map(String::as_str)
    }

    /// Like [`cell`](Self::cell) but reports the missing column as an error.
    pub fn require<'r>(&self, row: &'r [String], column: C) -> Result<&'r str, ApiError> {
        self.cell(row, column).ok_or_else(|| {
            ApiError::InvalidResponse(format!(
                "row with {} cells has no {:?} column",
                row.len(),
                column
            ))
        })
    }
}

pub(crate) fn selector(css: &str) -> Result<Selector, ApiError> {
    Selector::parse(css)
        .map_err(|e| ApiError::InvalidResponse(format!("bad selector {css:?}: {e}")))
}

/// Trimmed text content of an element.
pub(crate) fn element_text(element: &ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_string()
}

/// One `tr` of a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRow {
    /// Trimmed text of every `td`/`th`, in document order.
    pub cells: Vec<String>,
    /// Row made only of `th` cells.
    pub is_heading: bool,
}

/// Rows of the first table matching `table_css`. `Ok(None)` when no table
/// matches.
pub fn extract_rows(html: &str, table_css: &str) -> Result<Option<Vec<TableRow>>, ApiError> {
    let document = Html::parse_document(html);
    let table_sel = selector(table_css)?;
    let row_sel = selector("tr")?;
    let cell_sel = selector("td, th")?;
    let data_sel = selector("td")?;

    let Some(table) = document.select(&table_sel).next() else {
        return Ok(None);
    };

    let rows = table
        .select(&row_sel)
        .map(|row| TableRow {
            cells: row.select(&cell_sel).map(|c| element_text(&c)).collect(),
            is_heading: row.select(&data_sel).next().is_none(),
        })
        .collect();
    Ok(Some(rows))
}
