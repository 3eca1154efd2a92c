//! Durable ledgers: append-only CSV records of completed work and
//! discovered imports.
//!
//! Two instances of one pattern. Both reload their key set from disk on
//! every append, so a re-run, or an external writer between runs, never
//! produces duplicate rows. Losing a write costs a re-run of the batch,
//! not correctness; callers log ledger errors and keep going.
//!
//! ```text
//! processed_issues.csv      path,processed_at
//! discovered_imports.csv    issue_key,import,found_at
//! ```

use std::collections::HashSet;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = core::result::Result<T, LedgerError>;

/// Append-only ledger of processed issue files.
///
/// One row per file path, stamped when the batch finished the file.
/// A path, once recorded, is never reprocessed by a later run.
pub struct ProcessedLedger {
    path: PathBuf,
}

impl ProcessedLedger {
    const HEADER: &'static str = "path,processed_at\n";

    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The set of file paths already processed. A missing ledger file is
    /// an empty set, not an error.
    pub fn load(&self) -> Result<HashSet<String>> {
        let rows = load_rows(&self.path)?;
        Ok(rows
            .into_iter()
            .filter_map(|mut row| {
                if row.is_empty() {
                    None
                } else {
                    Some(row.swap_remove(0))
                }
            })
            .collect())
    }

    /// Record a file as processed, unless it already is.
    ///
    /// The existing set is reloaded from disk first so repeat calls, in
    /// this run or a later one, write at most one row per path.
    pub fn record(&self, file: &str) -> Result<()> {
        let existing = self.load()?;
        if existing.contains(file) {
            return Ok(());
        }
        append_rows(
            &self.path,
            Self::HEADER,
            &[vec![file.to_string(), now_stamp()]],
        )
    }
}

/// Append-only ledger of discovered imports, unique per
/// `(issue_key, import)` pair.
pub struct ImportLedger {
    path: PathBuf,
}

impl ImportLedger {
    const HEADER: &'static str = "issue_key,import,found_at\n";

    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Existing `(issue_key, import)` pairs. A missing ledger file is an
    /// empty set, not an error.
    pub fn load(&self) -> Result<HashSet<(String, String)>> {
        let rows = load_rows(&self.path)?;
        Ok(rows
            .into_iter()
            .filter_map(|mut row| {
                if row.len() < 2 {
                    None
                } else {
                    let import = row.swap_remove(1);
                    let key = row.swap_remove(0);
                    Some((key, import))
                }
            })
            .collect())
    }

    /// Append the imports not already recorded for this issue key.
    ///
    /// The pair set is reloaded from disk first, so appends stay
    /// duplicate-free across calls and across runs. Returns the number of
    /// rows actually written.
    pub fn append_new<'a>(
        &self,
        issue_key: &str,
        imports: impl IntoIterator<Item = &'a String>,
    ) -> Result<usize> {
        let existing = self.load()?;
        let stamp = now_stamp();

        let rows: Vec<Vec<String>> = imports
            .into_iter()
            .filter(|import| !existing.contains(&(issue_key.to_string(), (*import).clone())))
            .map(|import| vec![issue_key.to_string(), import.clone(), stamp.clone()])
            .collect();

        if rows.is_empty() {
            return Ok(0);
        }
        append_rows(&self.path, Self::HEADER, &rows)?;
        Ok(rows.len())
    }
}

// ── Shared file plumbing ──

/// Read every data row, skipping the header. Missing file → no rows.
fn load_rows(path: &Path) -> Result<Vec<Vec<String>>> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    Ok(contents
        .lines()
        .skip(1)
        .filter(|line| !line.is_empty())
        .map(decode_row)
        .collect())
}

/// Append rows, writing the header first when the ledger does not exist
/// yet. Rows are buffered into one `write_all` so a row is never split.
fn append_rows(path: &Path, header: &str, rows: &[Vec<String>]) -> Result<()> {
    let fresh = !path.exists();
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;

    let mut out = String::new();
    if fresh {
        out.push_str(header);
    }
    for row in rows {
        let fields: Vec<&str> = row.iter().map(String::as_str).collect();
        out.push_str(&encode_row(&fields));
    }
    file.write_all(out.as_bytes())?;
    Ok(())
}

/// Wall-clock stamp in the ledgers' `YYYY-MM-DD HH:MM:SS` format.
fn now_stamp() -> String {
    jiff::Zoned::now().strftime("%Y-%m-%d %H:%M:%S").to_string()
}

// ── Row codec ──
//
// Fields are single-line by construction (paths, identifiers, stamps);
// commas and quotes still need escaping so arbitrary paths round-trip.

/// Encode one row, quoting fields containing a comma or quote.
fn encode_row(fields: &[&str]) -> String {
    let mut row = String::new();
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            row.push(',');
        }
        if field.contains([',', '"']) {
            row.push('"');
            row.push_str(&field.replace('"', "\"\""));
            row.push('"');
        } else {
            row.push_str(field);
        }
    }
    row.push('\n');
    row
}

/// Decode one row into fields, honoring quoted fields with doubled
/// quotes. Malformed trailing quotes degrade to literal content rather
/// than failing the whole ledger.
fn decode_row(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut quoted = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        if quoted {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.push('"');
                }
                '"' => quoted = false,
                _ => field.push(c),
            }
        } else {
            match c {
                '"' if field.is_empty() => quoted = true,
                ',' => fields.push(std::mem::take(&mut field)),
                _ => field.push(c),
            }
        }
    }
    fields.push(field);
    fields
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempfile::TempDir;

    fn ledger_paths() -> (TempDir, PathBuf, PathBuf) {
        let dir = TempDir::new().unwrap();
        let processed = dir.path().join("processed.csv");
        let imports = dir.path().join("imports.csv");
        (dir, processed, imports)
    }

    // ── Processed ledger ──

    #[test]
    fn missing_ledger_loads_empty() {
        let (_dir, processed, _) = ledger_paths();
        let ledger = ProcessedLedger::new(&processed);

        assert!(ledger.load().unwrap().is_empty());
    }

    #[test]
    fn record_writes_header_once() {
        let (_dir, processed, _) = ledger_paths();
        let ledger = ProcessedLedger::new(&processed);

        ledger.record("issues/SPARK-1.json").unwrap();
        ledger.record("issues/SPARK-2.json").unwrap();

        let contents = fs::read_to_string(&processed).unwrap();
        let headers = contents.lines().filter(|l| *l == "path,processed_at").count();
        assert_eq!(headers, 1);
        assert_eq!(contents.lines().count(), 3);
    }

    #[test]
    fn record_is_idempotent() {
        let (_dir, processed, _) = ledger_paths();
        let ledger = ProcessedLedger::new(&processed);

        ledger.record("issues/SPARK-1.json").unwrap();
        ledger.record("issues/SPARK-1.json").unwrap();

        let loaded = ledger.load().unwrap();
        assert_eq!(loaded.len(), 1);
        assert!(loaded.contains("issues/SPARK-1.json"));

        let contents = fs::read_to_string(&processed).unwrap();
        assert_eq!(contents.lines().count(), 2); // header + one row
    }

    #[test]
    fn record_survives_reopening() {
        let (_dir, processed, _) = ledger_paths();

        ProcessedLedger::new(&processed)
            .record("issues/SPARK-1.json")
            .unwrap();

        // Fresh instance, as a new process run would create.
        let reopened = ProcessedLedger::new(&processed);
        assert!(reopened.load().unwrap().contains("issues/SPARK-1.json"));
        reopened.record("issues/SPARK-1.json").unwrap();
        assert_eq!(reopened.load().unwrap().len(), 1);
    }

    #[test]
    fn paths_with_commas_round_trip() {
        let (_dir, processed, _) = ledger_paths();
        let ledger = ProcessedLedger::new(&processed);

        let awkward = "issues/weird, dir/SPARK-1.json";
        ledger.record(awkward).unwrap();

        assert!(ledger.load().unwrap().contains(awkward));
    }

    // ── Import ledger ──

    #[test]
    fn append_new_dedupes_within_and_across_calls() {
        let (_dir, _, imports) = ledger_paths();
        let ledger = ImportLedger::new(&imports);

        let first = vec!["com.acme.Foo".to_string(), "com.acme.Bar".to_string()];
        assert_eq!(ledger.append_new("JIRA-1", &first).unwrap(), 2);

        // Same pair again plus one new entry.
        let second = vec!["com.acme.Foo".to_string(), "com.acme.Baz".to_string()];
        assert_eq!(ledger.append_new("JIRA-1", &second).unwrap(), 1);

        let pairs = ledger.load().unwrap();
        assert_eq!(pairs.len(), 3);
        assert!(pairs.contains(&("JIRA-1".to_string(), "com.acme.Foo".to_string())));
        assert!(pairs.contains(&("JIRA-1".to_string(), "com.acme.Baz".to_string())));
    }

    #[test]
    fn same_import_under_different_keys_is_two_rows() {
        let (_dir, _, imports) = ledger_paths();
        let ledger = ImportLedger::new(&imports);

        let entry = vec!["com.acme.Foo".to_string()];
        assert_eq!(ledger.append_new("JIRA-1", &entry).unwrap(), 1);
        assert_eq!(ledger.append_new("JIRA-2", &entry).unwrap(), 1);

        assert_eq!(ledger.load().unwrap().len(), 2);
    }

    #[test]
    fn append_nothing_writes_nothing() {
        let (_dir, _, imports) = ledger_paths();
        let ledger = ImportLedger::new(&imports);

        assert_eq!(ledger.append_new("JIRA-1", &Vec::<String>::new()).unwrap(), 0);
        assert!(!imports.exists());
    }

    #[test]
    fn import_rows_carry_three_columns() {
        let (_dir, _, imports) = ledger_paths();
        let ledger = ImportLedger::new(&imports);

        ledger
            .append_new("JIRA-1", &vec!["com.acme.Foo".to_string()])
            .unwrap();

        let contents = fs::read_to_string(&imports).unwrap();
        let mut lines = contents.lines();
        assert_eq!(lines.next(), Some("issue_key,import,found_at"));

        let row = decode_row(lines.next().unwrap());
        assert_eq!(row.len(), 3);
        assert_eq!(row[0], "JIRA-1");
        assert_eq!(row[1], "com.acme.Foo");
    }

    // ── Row codec ──

    #[test]
    fn codec_round_trips_plain_fields() {
        let encoded = encode_row(&["a", "b", "c"]);
        assert_eq!(encoded, "a,b,c\n");
        assert_eq!(decode_row(encoded.trim_end()), ["a", "b", "c"]);
    }

    #[test]
    fn codec_round_trips_commas_and_quotes() {
        let fields = ["with, comma", r#"with "quotes""#, "plain"];
        let encoded = encode_row(&fields);

        assert_eq!(decode_row(encoded.trim_end()), fields);
    }

    #[test]
    fn codec_handles_empty_fields() {
        assert_eq!(decode_row("a,,c"), ["a", "", "c"]);
        assert_eq!(decode_row(""), [""]);
    }
}
