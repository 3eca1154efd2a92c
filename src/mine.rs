//! Reference mining: locate pull-request URLs anywhere in an issue snapshot.
//!
//! Issue payloads have no fixed schema. A pull-request link can sit in a
//! description field, a comment body, a remote-link object, or a field
//! nobody anticipated, at any depth. The miner walks the whole value tree
//! and pattern-matches every string scalar it passes.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

/// Matches a pull-request URL, capturing `(owner, repo, number)`.
static PR_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"https://github\.com/([^/\s]+)/([^/\s]+)/pull/(\d+)")
        .expect("pull-request URL pattern is valid")
});

/// A parsed pull-request reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequestRef {
    pub owner: String,
    pub repo: String,
    pub number: u64,
}

impl PullRequestRef {
    /// The canonical URL form of the reference.
    pub fn canonical_url(&self) -> String {
        format!(
            "https://github.com/{}/{}/pull/{}",
            self.owner, self.repo, self.number
        )
    }
}

/// Parse a pull-request URL into its parts.
///
/// The match may sit anywhere inside `text`; only the first match is
/// taken. Returns `None` when no recognizable reference is present.
pub fn parse_pull_request_url(text: &str) -> Option<PullRequestRef> {
    let caps = PR_URL.captures(text)?;
    Some(PullRequestRef {
        owner: caps[1].to_string(),
        repo: caps[2].to_string(),
        number: caps[3].parse().ok()?,
    })
}

/// Collect every distinct pull-request URL reachable in `root`.
///
/// URLs are reconstructed canonically from the captured groups, so
/// surrounding prose or formatting noise never yields two entries for the
/// same pull request. Output preserves first-seen order; a single string
/// may contribute several matches.
pub fn find_pull_request_urls(root: &Value) -> Vec<String> {
    let mut found = Vec::new();
    let mut visited = HashSet::new();
    walk(root, &mut visited, &mut found);
    found
}

/// Recursive dispatch over the three value shapes: scalar, sequence,
/// mapping.
///
/// `visited` holds the addresses of composite values already descended in
/// this traversal, keyed by identity rather than equality. `serde_json`
/// trees cannot alias today; the guard keeps the walk terminating if a
/// shared or cyclic structure ever reaches it.
fn walk(value: &Value, visited: &mut HashSet<usize>, found: &mut Vec<String>) {
    match value {
        Value::String(text) => {
            // Cheap pre-check before paying for the regex.
            if text.contains("github.com") && text.contains("/pull/") {
                for caps in PR_URL.captures_iter(text) {
                    let url = format!(
                        "https://github.com/{}/{}/pull/{}",
                        &caps[1], &caps[2], &caps[3]
                    );
                    if !found.contains(&url) {
                        found.push(url);
                    }
                }
            }
        }
        Value::Array(items) => {
            if visited.insert(std::ptr::from_ref(value) as usize) {
                for item in items {
                    walk(item, visited, found);
                }
            }
        }
        Value::Object(map) => {
            if visited.insert(std::ptr::from_ref(value) as usize) {
                for item in map.values() {
                    walk(item, visited, found);
                }
            }
        }
        Value::Null | Value::Bool(_) | Value::Number(_) => {}
    }
}
