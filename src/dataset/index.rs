//! Dataset index (`data.csv`) reading and writing.
//!
//! Format:
//! - UTF-8, comma-separated, one header row naming the columns
//! - first column is the image file name, the rest are label fields
//! - double-quoted fields may contain commas and `""`-escaped quotes
//! - every data row must have exactly as many cells as the header

use std::collections::HashSet;
use std::fs;
use std::io::{self, Write};
use std::path::Path;

use crate::error::{Error, Result};
use crate::pipeline::record::LabelRow;

/// File name of the index inside every dataset folder.
pub const INDEX_FILE_NAME: &str = "data.csv";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetIndex {
    columns: Vec<String>,
    rows: Vec<LabelRow>,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

impl DatasetIndex {
    /// An index with the given header and no rows.
    pub fn new(columns: Vec<String>) -> DatasetIndex {
        DatasetIndex { columns, rows: Vec::new() }
    }

    pub fn with_rows(columns: Vec<String>, rows: Vec<LabelRow>) -> DatasetIndex {
        DatasetIndex { columns, rows }
    }

    /// Reads `<folder>/data.csv`.
    pub fn read_from_folder(folder: &Path) -> Result<DatasetIndex> {
        DatasetIndex::read(&folder.join(INDEX_FILE_NAME))
    }

    pub fn read(path: &Path) -> Result<DatasetIndex> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(Error::MissingIndex { path: path.to_path_buf() })
            }
            Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                return Err(malformed(path, 1, "file is not valid UTF-8"))
            }
            Err(e) => return Err(e.into()),
        };
        DatasetIndex::parse(&text, path)
    }

    /// Parses index text; `origin` is only used in error messages.
    pub fn parse(text: &str, origin: &Path) -> Result<DatasetIndex> {
        let mut lines = text
            .lines()
            .enumerate()
            .map(|(i, line)| (i + 1, line.trim_end()))
            .filter(|(_, line)| !line.is_empty());

        let columns = match lines.next() {
            Some((_, header)) => parse_csv_row(header),
            None => return Err(malformed(origin, 1, "missing header row")),
        };

        let mut rows = Vec::new();
        for (line_no, line) in lines {
            let cells = parse_csv_row(line);
            if cells.len() != columns.len() {
                return Err(malformed(
                    origin,
                    line_no,
                    &format!("expected {} columns, got {}", columns.len(), cells.len()),
                ));
            }
            rows.push(LabelRow::new(cells));
        }

        Ok(DatasetIndex { columns, rows })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[LabelRow] {
        &self.rows
    }

    pub fn row(&self, idx: usize) -> Option<&LabelRow> {
        self.rows.get(idx)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn push(&mut self, row: LabelRow) {
        self.rows.push(row);
    }

    /// Set of every image file name referenced by the index.
    pub fn filenames(&self) -> HashSet<String> {
        self.rows
            .iter()
            .filter_map(|row| row.filename().ok().map(str::to_owned))
            .collect()
    }

    /// Serializes the header and rows back to CSV text.
    pub fn to_csv_string(&self) -> String {
        let mut out = String::new();
        push_csv_row(&mut out, &self.columns);
        for row in &self.rows {
            push_csv_row(&mut out, row.fields());
        }
        out
    }

    /// Writes the index next to a temporary sibling and renames it into
    /// place, so readers never see a partially written file.
    pub fn write_atomic(&self, path: &Path) -> Result<()> {
        let tmp = path.with_extension("csv.tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(self.to_csv_string().as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

fn malformed(path: &Path, line: usize, reason: &str) -> Error {
    Error::MalformedIndex {
        path: path.to_path_buf(),
        line,
        reason: reason.to_owned(),
    }
}

/// Parses a single CSV row, handling double-quoted fields.
fn parse_csv_row(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                // Escaped quote inside quoted field.
                current.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => fields.push(std::mem::take(&mut current)),
            c => current.push(c),
        }
    }
    fields.push(current);
    fields
}

fn push_csv_row(out: &mut String, cells: &[String]) {
    for (i, cell) in cells.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        if cell.contains([',', '"', '\n', '\r']) {
            out.push('"');
            out.push_str(&cell.replace('"', "\"\""));
            out.push('"');
        } else {
            out.push_str(cell);
        }
    }
    out.push('\n');
}
