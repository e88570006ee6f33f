//! CSV ingestion of one response column.

use anyhow::{Context as _, Result, bail};
use std::path::Path;

use survey_core::ResponseRecord;

/// Responses read from one column, plus that column's header.
#[derive(Debug, Clone, Default)]
pub struct Ingested {
    /// Header cell of the response column
    pub column_title: String,
    /// Non-empty responses in row order
    pub responses: Vec<ResponseRecord>,
}

/// Zero-based index of a spreadsheet column letter (`A` → 0, `AA` → 26).
///
/// Returns `None` for anything that is not one to three ASCII letters.
pub fn column_index(letters: &str) -> Option<usize> {
    let letters = letters.trim();
    if letters.is_empty() || letters.len() > 3 || !letters.chars().all(|ch| ch.is_ascii_alphabetic()) {
        return None;
    }
    let number = letters
        .bytes()
        .map(|byte| usize::from(byte.to_ascii_uppercase() - b'A') + 1)
        .fold(0, |acc, digit| acc * 26 + digit);
    Some(number - 1)
}

/// Resolves `column` against the header row: an exact header name wins,
/// otherwise it is read as a column letter.
fn resolve_column(header: &[String], column: &str) -> Result<usize> {
    let wanted = column.trim();
    if let Some(position) = header.iter().position(|cell| cell.trim() == wanted) {
        return Ok(position);
    }
    column_index(wanted).with_context(|| {
        format!("column '{wanted}' is neither a header name nor a column letter")
    })
}

/// Reads the non-empty cells of `column` from the CSV file at `path`.
///
/// Row 1 is the header. Data rows keep their 1-based row number so the first
/// one becomes `R2`. Rows too short to have the column are skipped.
///
/// # Errors
/// Returns an error if the file cannot be read or parsed, has no header row,
/// or the column cannot be resolved.
pub fn read_responses(path: &Path, column: &str) -> Result<Ingested> {
    tracing::info!(path = %path.display(), column, "Reading responses");

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("failed to open {}", path.display()))?;

    let mut rows = reader.records();
    let Some(header) = rows.next() else {
        bail!("{} has no header row", path.display());
    };
    let header: Vec<String> = header
        .with_context(|| format!("failed to read header of {}", path.display()))?
        .iter()
        .map(|cell| cell.trim_start_matches('\u{feff}').to_owned())
        .collect();
    let index = resolve_column(&header, column)?;

    let mut ingested = Ingested {
        column_title: header.get(index).map(|cell| cell.trim().to_owned()).unwrap_or_default(),
        responses: Vec::new(),
    };

    for (offset, row) in rows.enumerate() {
        let row_position = offset + 2;
        let row = row.with_context(|| format!("failed to read row {row_position}"))?;
        let Some(cell) = row.get(index) else {
            tracing::warn!(row = row_position, column, "Row does not have the response column");
            continue;
        };
        let text = cell.trim();
        if text.is_empty() {
            tracing::debug!(row = row_position, "Empty response");
            continue;
        }
        ingested.responses.push(ResponseRecord::new(row_position, text));
    }

    tracing::info!(count = ingested.responses.len(), "Read responses");
    Ok(ingested)
}

#[cfg(test)]
#[allow(
    clippy::assertions_on_result_states,
    reason = "Test code is allowed to use unwrap and has different conventions"
)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn write_csv(dir: &TempDir, contents: &str) -> PathBuf {
        let path = dir.path().join("responses.csv");
        if let Err(error) = fs::write(&path, contents) {
            panic!("failed to write fixture: {error}");
        }
        path
    }

    #[test]
    fn test_column_index() {
        assert_eq!(column_index("A"), Some(0));
        assert_eq!(column_index("b"), Some(1));
        assert_eq!(column_index("Z"), Some(25));
        assert_eq!(column_index("AA"), Some(26));
        assert_eq!(column_index("AZ"), Some(51));
        assert_eq!(column_index("B2"), None);
        assert_eq!(column_index(""), None);
        assert_eq!(column_index("Comments"), None);
    }

    #[test]
    fn test_read_by_letter_skips_empty_and_short_rows() {
        let dir = TempDir::new().unwrap_or_else(|error| panic!("temp dir: {error}"));
        let path = write_csv(
            &dir,
            "Id,Comment\n1,No parking\n2,   \n3\n4,\"Staff, friendly\"\n",
        );

        match read_responses(&path, "B") {
            Ok(ingested) => {
                assert_eq!(ingested.column_title, "Comment");
                let ids: Vec<&str> = ingested.responses.iter().map(|record| record.id.as_str()).collect();
                assert_eq!(ids, vec!["R2", "R5"]);
                assert_eq!(ingested.responses[1].text, "Staff, friendly");
                assert_eq!(ingested.responses[1].row_position, 5);
            }
            Err(error) => panic!("ingest failed: {error}"),
        }
    }

    #[test]
    fn test_read_by_header_name() {
        let dir = TempDir::new().unwrap_or_else(|error| panic!("temp dir: {error}"));
        let path = write_csv(&dir, "\u{feff}Comment,Score\n  Long wait  ,3\n");

        match read_responses(&path, "Comment") {
            Ok(ingested) => {
                assert_eq!(ingested.column_title, "Comment");
                assert_eq!(ingested.responses.len(), 1);
                assert_eq!(ingested.responses[0].text, "Long wait");
            }
            Err(error) => panic!("ingest failed: {error}"),
        }
    }

    #[test]
    fn test_unknown_column_is_rejected() {
        let dir = TempDir::new().unwrap_or_else(|error| panic!("temp dir: {error}"));
        let path = write_csv(&dir, "Comment\nhello\n");
        assert!(read_responses(&path, "Feedback text").is_err());
    }
}
