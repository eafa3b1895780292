//! Delimited input lists: repository URLs to clone and directories to delete.
//!
//! The first record is a header; values are read from one named column.
//! Quoted fields (`"a,b"`, `""` escapes, embedded newlines) are supported.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use crate::core::errors::{MinerError, Result};

/// Values of `column` in file order. Blank values are skipped.
pub fn read_column(path: &Path, column: &str, delimiter: u8) -> Result<Vec<String>> {
    let bytes = fs::read(path).map_err(|e| MinerError::io(path, e))?;
    let text = String::from_utf8(bytes).map_err(|e| MinerError::InputMalformed {
        path: path.to_path_buf(),
        details: format!("not valid UTF-8: {e}"),
    })?;
    let malformed = |details: String| MinerError::InputMalformed {
        path: path.to_path_buf(),
        details,
    };

    let records = parse_records(text.trim_start_matches('\u{feff}'), delimiter).map_err(malformed)?;
    let mut records = records.into_iter();
    let header = records
        .next()
        .ok_or_else(|| malformed("file is empty; expected a header row".to_string()))?;
    let index = header
        .iter()
        .position(|name| name.trim() == column)
        .ok_or_else(|| malformed(format!("column {column:?} not found in header {header:?}")))?;

    Ok(records
        .filter_map(|mut record| {
            (index < record.len()).then(|| std::mem::take(&mut record[index]))
        })
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .collect())
}

/// Sorted, de-duplicated values of `column`.
pub fn read_unique_column(path: &Path, column: &str, delimiter: u8) -> Result<Vec<String>> {
    let unique: BTreeSet<String> = read_column(path, column, delimiter)?.into_iter().collect();
    Ok(unique.into_iter().collect())
}

fn parse_records(text: &str, delimiter: u8) -> std::result::Result<Vec<Vec<String>>, String> {
    let delimiter = char::from(delimiter);
    let mut records = Vec::new();
    let mut record = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut line = 1usize;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.push('"');
                }
                '"' => in_quotes = false,
                '\n' => {
                    line += 1;
                    field.push(c);
                }
                _ => field.push(c),
            }
            continue;
        }
        match c {
            '"' if field.is_empty() => in_quotes = true,
            c if c == delimiter => record.push(std::mem::take(&mut field)),
            '\r' if chars.peek() == Some(&'\n') => {}
            '\n' => {
                line += 1;
                record.push(std::mem::take(&mut field));
                if !(record.len() == 1 && record[0].is_empty()) {
                    records.push(std::mem::take(&mut record));
                }
                record.clear();
            }
            _ => field.push(c),
        }
    }
    if in_quotes {
        return Err(format!("unterminated quoted field at line {line}"));
    }
    if !field.is_empty() || !record.is_empty() {
        record.push(field);
        records.push(record);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(contents: &str) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("list.csv");
        fs::write(&path, contents).unwrap();
        (dir, path)
    }

    #[test]
    fn reads_named_column() {
        let (_dir, path) = write(
            "ID,URL,STARS\n1,https://github.com/b/two,5\n2,https://github.com/a/one,9\n",
        );
        assert_eq!(
            read_column(&path, "URL", b',').unwrap(),
            vec!["https://github.com/b/two", "https://github.com/a/one"]
        );
    }

    #[test]
    fn unique_is_sorted_and_deduplicated() {
        let (_dir, path) = write("REPO\n/m/b\n/m/a\n/m/b\n\n/m/a\n");
        assert_eq!(
            read_unique_column(&path, "REPO", b',').unwrap(),
            vec!["/m/a", "/m/b"]
        );
    }

    #[test]
    fn quoted_fields_and_crlf() {
        let (_dir, path) = write("\u{feff}NAME,REPO\r\n\"x, \"\"y\"\"\",\"/m/with,comma\"\r\nz,/m/plain\r\n");
        assert_eq!(
            read_column(&path, "REPO", b',').unwrap(),
            vec!["/m/with,comma", "/m/plain"]
        );
    }

    #[test]
    fn custom_delimiter() {
        let (_dir, path) = write("REPO;N\n/m/a;1\n");
        assert_eq!(read_column(&path, "REPO", b';').unwrap(), vec!["/m/a"]);
    }

    #[test]
    fn missing_column_is_malformed() {
        let (_dir, path) = write("NAME\nx\n");
        let err = read_column(&path, "REPO", b',').unwrap_err();
        assert_eq!(err.code(), "RMN-2001");
    }

    #[test]
    fn unterminated_quote_is_malformed() {
        let (_dir, path) = write("REPO\n\"/m/a\n");
        assert_eq!(read_column(&path, "REPO", b',').unwrap_err().code(), "RMN-2001");
    }

    #[test]
    fn missing_file_is_io() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_column(&dir.path().join("nope.csv"), "REPO", b',').unwrap_err();
        assert_eq!(err.code(), "RMN-3001");
    }

    #[test]
    fn short_rows_are_skipped() {
        let (_dir, path) = write("A,REPO\nonly\nx,/m/a\n");
        assert_eq!(read_column(&path, "REPO", b',').unwrap(), vec!["/m/a"]);
    }
}
