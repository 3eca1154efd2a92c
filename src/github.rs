//! Commit walking against the source-hosting API.
//!
//! One pull request at a time: list its commits, fetch each commit's
//! files and patches, and run the import extractor over the Java ones.
//! Failures are absorbed at the smallest useful granularity: a failed
//! commit fetch skips that commit, a failed listing empties the whole
//! pull request. Neither reaches the batch driver.

use std::collections::BTreeSet;
use std::thread;
use std::time::Duration;

use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue, InvalidHeaderValue};
use serde::Deserialize;

use crate::extract;
use crate::http::HttpClient;
use crate::mine::PullRequestRef;

/// One entry of a pull request's commit listing.
#[derive(Debug, Deserialize)]
pub struct CommitSummary {
    pub sha: String,
}

/// A full commit record: the files it touched, with inline patch text
/// where the API provides one.
#[derive(Debug, Deserialize)]
pub struct CommitDetail {
    pub sha: String,
    #[serde(default)]
    pub files: Vec<ChangedFile>,
}

/// A changed file within a commit.
///
/// `patch` is absent for binary files and for diffs too large for the
/// API to inline; such files are skipped, not errors.
#[derive(Debug, Deserialize)]
pub struct ChangedFile {
    pub filename: String,
    pub patch: Option<String>,
}

/// Walks pull requests on the source host, mining added imports.
pub struct GithubMiner<'a> {
    http: &'a HttpClient,
    headers: HeaderMap,
    commit_pacing: Duration,
}

impl<'a> GithubMiner<'a> {
    /// Build a miner with bearer authentication.
    ///
    /// Fails only when the token cannot form a header value, which the
    /// caller treats as startup-fatal.
    pub fn new(
        http: &'a HttpClient,
        token: &str,
        commit_pacing: Duration,
    ) -> Result<Self, InvalidHeaderValue> {
        let mut auth = HeaderValue::from_str(&format!("Bearer {token}"))?;
        auth.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, auth);
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github.v3+json"),
        );

        Ok(Self {
            http,
            headers,
            commit_pacing,
        })
    }

    /// Mine every commit of one pull request for added imports.
    ///
    /// Returns the deduplicated union across commits. A failure listing
    /// commits yields an empty set; a failure fetching one commit skips
    /// that commit and keeps its siblings.
    pub fn process_pull_request(&self, pr: &PullRequestRef) -> BTreeSet<String> {
        let commits = match self.list_commits(pr) {
            Ok(commits) => commits,
            Err(e) => {
                tracing::warn!("failed to list commits for {}: {e}", pr.canonical_url());
                return BTreeSet::new();
            }
        };
        tracing::info!(
            "{}/{} pull {}: {} commit(s)",
            pr.owner,
            pr.repo,
            pr.number,
            commits.len()
        );

        let mut imports = BTreeSet::new();
        for (i, commit) in commits.iter().enumerate() {
            // Pacing between commit fetches, skipped for the first.
            if i > 0 {
                thread::sleep(self.commit_pacing);
            }

            let short = short_sha(&commit.sha);
            tracing::info!("  commit {short} ({}/{})", i + 1, commits.len());

            match self.fetch_commit(pr, &commit.sha) {
                Ok(detail) => {
                    let found = commit_imports(&detail);
                    if !found.is_empty() {
                        tracing::info!("    {} added import(s)", found.len());
                    }
                    imports.extend(found);
                }
                Err(e) => tracing::warn!("  skipping commit {short}: {e}"),
            }
        }
        imports
    }

    fn list_commits(&self, pr: &PullRequestRef) -> crate::http::Result<Vec<CommitSummary>> {
        let url = format!(
            "https://api.github.com/repos/{}/{}/pulls/{}/commits",
            pr.owner, pr.repo, pr.number
        );
        self.http.get_json(&url, Some(&self.headers))
    }

    fn fetch_commit(&self, pr: &PullRequestRef, sha: &str) -> crate::http::Result<CommitDetail> {
        let url = format!(
            "https://api.github.com/repos/{}/{}/commits/{sha}",
            pr.owner, pr.repo
        );
        self.http.get_json(&url, Some(&self.headers))
    }
}

/// Distinct imports added across one commit's Java files.
///
/// Non-Java files and files without an inline patch contribute nothing.
pub fn commit_imports(detail: &CommitDetail) -> BTreeSet<String> {
    let mut imports = BTreeSet::new();
    for file in &detail.files {
        if !extract::is_java_source(&file.filename) {
            continue;
        }
        if let Some(patch) = &file.patch {
            imports.extend(extract::extract_added_imports(patch));
        }
    }
    imports
}

/// Abbreviated sha for log lines.
fn short_sha(sha: &str) -> &str {
    sha.get(..7).unwrap_or(sha)
}
