//! Batch driver: discover pending issue files and run each through the
//! mining pipeline.
//!
//! The driver owns the run's lifecycle: enumerate the corpus, subtract
//! the processed ledger, and process the remainder strictly in order.
//! Per-document failures leave the document off the ledger for the next
//! run; only startup problems (bad token, unbuildable client) are fatal.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::thread;

use ignore::WalkBuilder;
use serde_json::Value;

use crate::config::Config;
use crate::github::GithubMiner;
use crate::http::{HttpClient, HttpError, IssueRetry, RetryPolicy};
use crate::ledger::{ImportLedger, ProcessedLedger};
use crate::mine;

/// Directory name excluded from discovery at any depth. The issue
/// exporter stages partial downloads there.
const SCRATCH_DIR: &str = "temp";

#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("bearer token cannot form an HTTP header: {0}")]
    Token(#[from] reqwest::header::InvalidHeaderValue),

    #[error(transparent)]
    Http(#[from] HttpError),
}

/// Why one issue file could not be processed. None of these abort the
/// batch; the file stays off the processed ledger and is retried on the
/// next run.
#[derive(Debug, thiserror::Error)]
enum DocumentError {
    #[error("unreadable: {0}")]
    Read(#[source] io::Error),

    #[error("not valid JSON: {0}")]
    Parse(#[source] serde_json::Error),

    #[error("no `self` URL in document")]
    MissingSelf,

    #[error("live snapshot unavailable after {attempts} attempt(s): {source}")]
    Fetch {
        attempts: u32,
        #[source]
        source: HttpError,
    },
}

/// Outcome counts for one batch run.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub discovered: usize,
    pub pending: usize,
    pub processed: usize,
    pub failed: usize,
    pub imports_recorded: usize,
}

/// Run the batch to completion over every pending issue file.
pub fn run(config: &Config) -> Result<RunSummary, DriverError> {
    let http = HttpClient::new(RetryPolicy::default())?;
    let miner = GithubMiner::new(&http, &config.github_token, config.commit_pacing)?;
    let issue_retry = IssueRetry::new(config.issue_pacing);
    let processed_ledger = ProcessedLedger::new(&config.processed_ledger);
    let import_ledger = ImportLedger::new(&config.imports_ledger);

    let discovered = discover_issue_files(&config.issues_dir);
    let already = match processed_ledger.load() {
        Ok(set) => set,
        Err(e) => {
            tracing::warn!("could not read processed ledger: {e}; treating all files as pending");
            HashSet::new()
        }
    };
    let work = pending(&discovered, &already);

    let mut summary = RunSummary {
        discovered: discovered.len(),
        pending: work.len(),
        ..RunSummary::default()
    };
    tracing::info!(
        "{} issue file(s) discovered, {} already processed, {} pending",
        summary.discovered,
        already.len(),
        summary.pending
    );

    for (idx, path) in work.iter().enumerate() {
        tracing::info!("[{}/{}] {}", idx + 1, summary.pending, path.display());

        match process_document(path, &http, &miner, &issue_retry, &import_ledger) {
            Ok(recorded) => {
                summary.imports_recorded += recorded;
                summary.processed += 1;
                if let Err(e) = processed_ledger.record(&path_key(path)) {
                    tracing::warn!("could not record {} as processed: {e}", path.display());
                }
            }
            Err(e) => {
                summary.failed += 1;
                tracing::warn!("{}: {e}; will retry next run", path.display());
            }
        }
    }

    Ok(summary)
}

/// Discover issue export files under `root`.
///
/// Recursive, skipping any directory named `temp` at any depth, keeping
/// only `.json` files, sorted for a deterministic processing order.
/// Unreadable entries are logged and skipped; discovery is always total.
pub fn discover_issue_files(root: &Path) -> Vec<PathBuf> {
    let mut builder = WalkBuilder::new(root);
    builder
        .standard_filters(false) // The corpus is data, not a source tree.
        .filter_entry(|entry| {
            let is_dir = entry.file_type().is_some_and(|ft| ft.is_dir());
            !(is_dir && entry.file_name() == SCRATCH_DIR)
        })
        .sort_by_file_name(Ord::cmp);

    let mut files = Vec::new();
    for entry in builder.build() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("skipping unreadable entry under {}: {e}", root.display());
                continue;
            }
        };
        let path = entry.path();
        if entry.file_type().is_some_and(|ft| ft.is_file())
            && path.extension().is_some_and(|ext| ext == "json")
        {
            files.push(path.to_path_buf());
        }
    }
    files
}

/// The unit of work for this run: discovered files minus processed ones.
fn pending<'a>(discovered: &'a [PathBuf], processed: &HashSet<String>) -> Vec<&'a PathBuf> {
    discovered
        .iter()
        .filter(|path| !processed.contains(&path_key(path)))
        .collect()
}

/// Process one issue file end to end.
///
/// Returns the number of import rows persisted. Per-PR and per-commit
/// failures are absorbed below this level; only local-file problems and
/// an unfetchable snapshot surface here.
fn process_document(
    path: &Path,
    http: &HttpClient,
    miner: &GithubMiner<'_>,
    issue_retry: &IssueRetry,
    import_ledger: &ImportLedger,
) -> Result<usize, DocumentError> {
    let issue_key = issue_key_for(path);
    let self_url = load_self_url(path)?;

    let snapshot = fetch_snapshot(http, issue_retry, &self_url)?;

    let pr_urls = mine::find_pull_request_urls(&snapshot);
    if pr_urls.is_empty() {
        // Finding nothing is a valid outcome; the file still counts as done.
        tracing::info!("  no pull-request references in {issue_key}");
        return Ok(0);
    }
    tracing::info!("  {} pull-request reference(s) in {issue_key}", pr_urls.len());

    let mut recorded = 0;
    for url in &pr_urls {
        let Some(pr) = mine::parse_pull_request_url(url) else {
            tracing::warn!("  unparseable reference skipped: {url}");
            continue;
        };

        let imports = miner.process_pull_request(&pr);
        if imports.is_empty() {
            continue;
        }

        match import_ledger.append_new(&issue_key, &imports) {
            Ok(written) => {
                if written > 0 {
                    tracing::info!("  recorded {written} new import(s) for {issue_key}");
                }
                recorded += written;
            }
            Err(e) => tracing::warn!("  could not persist imports for {issue_key}: {e}"),
        }
    }
    Ok(recorded)
}

/// Read a local issue document and pull out its `self` URL.
fn load_self_url(path: &Path) -> Result<String, DocumentError> {
    let text = fs::read_to_string(path).map_err(DocumentError::Read)?;
    let document: Value = serde_json::from_str(&text).map_err(DocumentError::Parse)?;
    document
        .get("self")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or(DocumentError::MissingSelf)
}

/// Fetch the live issue snapshot under the linear retry schedule.
///
/// Every attempt sleeps first: the initial one as rate-limit courtesy,
/// later ones on the schedule's fixed steps.
fn fetch_snapshot(
    http: &HttpClient,
    retry: &IssueRetry,
    url: &str,
) -> Result<Value, DocumentError> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        thread::sleep(retry.delay_before(attempt));

        match http.get_json(url, None) {
            Ok(snapshot) => return Ok(snapshot),
            Err(e) if attempt < retry.max_attempts => {
                tracing::warn!("  attempt {attempt}/{} failed: {e}", retry.max_attempts);
            }
            Err(e) => {
                return Err(DocumentError::Fetch {
                    attempts: attempt,
                    source: e,
                });
            }
        }
    }
}

/// Issue key for a document: the file stem (`SPARK-123.json` → `SPARK-123`).
fn issue_key_for(path: &Path) -> String {
    path.file_stem()
        .map_or_else(|| path.to_string_lossy().into_owned(), |stem| {
            stem.to_string_lossy().into_owned()
        })
}

/// Ledger key for a document: its path, as stored and compared.
fn path_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempfile::TempDir;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "{}").unwrap();
    }

    // ── Discovery ──

    #[test]
    fn discovery_is_recursive_and_sorted() {
        let dir = TempDir::new().unwrap();
        touch(&dir.path().join("b").join("HDFS-2.json"));
        touch(&dir.path().join("a").join("SPARK-1.json"));
        touch(&dir.path().join("KAFKA-3.json"));

        let files = discover_issue_files(dir.path());
        let names: Vec<String> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();

        assert_eq!(names, ["KAFKA-3.json", "SPARK-1.json", "HDFS-2.json"]);
    }

    #[test]
    fn discovery_excludes_scratch_subtrees_at_any_depth() {
        let dir = TempDir::new().unwrap();
        touch(&dir.path().join("SPARK-1.json"));
        touch(&dir.path().join("temp").join("SPARK-2.json"));
        touch(&dir.path().join("a").join("temp").join("b").join("SPARK-3.json"));

        let files = discover_issue_files(dir.path());

        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("SPARK-1.json"));
    }

    #[test]
    fn discovery_keeps_only_json_files() {
        let dir = TempDir::new().unwrap();
        touch(&dir.path().join("SPARK-1.json"));
        touch(&dir.path().join("notes.txt"));
        touch(&dir.path().join("SPARK-2.json.bak"));

        let files = discover_issue_files(dir.path());

        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("SPARK-1.json"));
    }

    #[test]
    fn discovery_of_missing_root_is_empty() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope");

        assert!(discover_issue_files(&missing).is_empty());
    }

    #[test]
    fn a_file_named_temp_is_not_excluded() {
        // Only directories named `temp` are scratch space.
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("temp"), "{}").unwrap();
        touch(&dir.path().join("SPARK-1.json"));

        let files = discover_issue_files(dir.path());
        assert_eq!(files.len(), 1);
    }

    // ── Pending computation ──

    #[test]
    fn pending_is_discovered_minus_processed() {
        let discovered = vec![
            PathBuf::from("issues/SPARK-1.json"),
            PathBuf::from("issues/SPARK-2.json"),
            PathBuf::from("issues/SPARK-3.json"),
        ];
        let processed: HashSet<String> = ["issues/SPARK-2.json".to_string()].into();

        let work = pending(&discovered, &processed);

        assert_eq!(work.len(), 2);
        assert_eq!(*work[0], PathBuf::from("issues/SPARK-1.json"));
        assert_eq!(*work[1], PathBuf::from("issues/SPARK-3.json"));
    }

    #[test]
    fn fully_processed_corpus_yields_no_work() {
        let discovered = vec![PathBuf::from("issues/SPARK-1.json")];
        let processed: HashSet<String> = ["issues/SPARK-1.json".to_string()].into();

        assert!(pending(&discovered, &processed).is_empty());
    }

    // ── Local document handling ──

    #[test]
    fn issue_key_is_the_file_stem() {
        assert_eq!(issue_key_for(Path::new("issues/spark/SPARK-123.json")), "SPARK-123");
        assert_eq!(issue_key_for(Path::new("HDFS-1.json")), "HDFS-1");
    }

    #[test]
    fn self_url_is_extracted_from_the_document() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("SPARK-1.json");
        fs::write(
            &path,
            r#"{"self": "https://issues.example.org/rest/api/2/issue/1", "fields": {}}"#,
        )
        .unwrap();

        assert_eq!(
            load_self_url(&path).unwrap(),
            "https://issues.example.org/rest/api/2/issue/1"
        );
    }

    #[test]
    fn document_without_self_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("SPARK-1.json");
        fs::write(&path, r#"{"fields": {}}"#).unwrap();

        assert!(matches!(
            load_self_url(&path),
            Err(DocumentError::MissingSelf)
        ));
    }

    #[test]
    fn document_with_non_string_self_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("SPARK-1.json");
        fs::write(&path, r#"{"self": 42}"#).unwrap();

        assert!(matches!(
            load_self_url(&path),
            Err(DocumentError::MissingSelf)
        ));
    }

    #[test]
    fn unreadable_or_malformed_documents_fail() {
        let dir = TempDir::new().unwrap();

        let missing = dir.path().join("missing.json");
        assert!(matches!(load_self_url(&missing), Err(DocumentError::Read(_))));

        let garbled = dir.path().join("garbled.json");
        fs::write(&garbled, "not json {").unwrap();
        assert!(matches!(load_self_url(&garbled), Err(DocumentError::Parse(_))));
    }
}
