use std::io::Read;

use crate::error::{PipelineError, Result};

/// A materialized tabular source: header row plus string cells.
///
/// Rows shorter than the header are padded with empty cells so every row can be
/// indexed by column position.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new(headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        let width = headers.len();
        let rows = rows
            .into_iter()
            .map(|mut row| {
                if row.len() < width {
                    row.resize(width, String::new());
                }
                row
            })
            .collect();
        Self { headers, rows }
    }

    /// Read a delimited file with a header row
    pub fn from_reader<R: Read>(reader: R, delimiter: u8) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .delimiter(delimiter)
            .flexible(true)
            .from_reader(reader);

        let headers: Vec<String> = reader.headers()?.iter().map(|h| h.to_string()).collect();
        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            rows.push(record.iter().map(|c| c.to_string()).collect());
        }
        Ok(Self::new(headers, rows))
    }

    pub fn from_csv_bytes(bytes: &[u8]) -> Result<Self> {
        Self::from_reader(bytes, b',')
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    /// Like [`Table::column_index`] but a missing column is a format failure
    pub fn require_column(&self, source_name: &str, name: &str) -> Result<usize> {
        self.column_index(name).ok_or_else(|| PipelineError::MissingColumn {
            source_name: source_name.to_string(),
            column: name.to_string(),
        })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
