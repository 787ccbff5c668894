//! Source-host URL handling and repository file selection
//!
//! Users paste browser links (`github.com/o/r/blob/main/compose.yaml`) or bare
//! repository links (`github.com/o/r`). Blob links are rewritten to their raw
//! form; repository links are expanded by listing the tree and picking the
//! most deployable file.

use std::time::Duration;

use async_trait::async_trait;
use deckhand_common::Error;
use serde::Deserialize;
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

use crate::classify::is_compose_filename;

const GITHUB_HOST: &str = "github.com";
const GITHUB_RAW_HOST: &str = "raw.githubusercontent.com";
const GITHUB_API: &str = "https://api.github.com";

/// Default request timeout for source hosts
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Directories whose YAML files are treated as cluster manifests
const MANIFEST_DIRS: &[&str] = &["k8s", "kubernetes", "manifests", "deploy"];

/// Owner and name of a hosted repository
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RepoIdentity {
    /// Host name, e.g. `github.com`
    pub host: String,
    /// Owning user or organization
    pub owner: String,
    /// Repository name without `.git`
    pub repo: String,
}

/// Text retrieved from a source host
#[derive(Clone, Debug)]
pub struct FetchedSource {
    /// File contents
    pub text: String,
    /// File name the contents were stored under
    pub filename: Option<String>,
    /// Repository the file came from
    pub repo: Option<RepoIdentity>,
}

/// Retrieve deployable text from a URL
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    /// Fetch a file, or the best deployable file of a repository
    async fn fetch(&self, url: &str) -> Result<FetchedSource, Error>;
}

/// Rewrite a browser blob link to the raw-content link serving the same file.
///
/// Other URLs are returned unchanged.
pub fn normalize_url(url: &str) -> String {
    let url = url.trim();
    if let Some(rest) = strip_host(url, GITHUB_HOST) {
        if let Some((repo, path)) = rest.split_once("/blob/") {
            return format!("https://{}/{}/{}", GITHUB_RAW_HOST, repo, path);
        }
    }
    if url.contains("/-/blob/") {
        return url.replacen("/-/blob/", "/-/raw/", 1);
    }
    url.to_string()
}

/// Owner and repository of a hosted URL, if it has them
pub fn repo_identity(url: &str) -> Option<RepoIdentity> {
    let trimmed = url.trim();
    let without_scheme = trimmed
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(trimmed);
    let mut segments = without_scheme.split('/').filter(|s| !s.is_empty());
    let host = segments.next()?.to_ascii_lowercase();
    let owner = segments.next()?;
    let repo = segments.next()?;
    let repo = repo.strip_suffix(".git").unwrap_or(repo);
    if owner.is_empty() || repo.is_empty() {
        return None;
    }
    let host = if host == GITHUB_RAW_HOST {
        GITHUB_HOST.to_string()
    } else {
        host
    };
    Some(RepoIdentity {
        host,
        owner: owner.to_string(),
        repo: repo.to_string(),
    })
}

/// Whether a URL names a whole repository rather than one file
pub fn is_repository_root(url: &str) -> bool {
    let Some(rest) = strip_host(url.trim(), GITHUB_HOST) else {
        return false;
    };
    let segments: Vec<&str> = rest.split('/').filter(|s| !s.is_empty()).collect();
    segments.len() == 2 || (segments.len() == 4 && segments[2] == "tree")
}

/// Pick the most deployable file from a repository listing.
///
/// Compose files win over build recipes, which win over charts and
/// manifests. Within a tier the shallowest path wins, then the
/// lexicographically first.
pub fn select_source_file<'a, I>(paths: I) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    paths
        .into_iter()
        .filter_map(|path| source_rank(path).map(|rank| (rank, depth(path), path)))
        .min()
        .map(|(_, _, path)| path)
}

fn source_rank(path: &str) -> Option<u8> {
    let filename = file_name(path);
    if is_compose_filename(filename) {
        return Some(0);
    }
    if filename == "Dockerfile" || filename == "Containerfile" {
        return Some(1);
    }
    if filename == "Chart.yaml" {
        return Some(2);
    }
    let is_yaml = filename.ends_with(".yaml") || filename.ends_with(".yml");
    let in_manifest_dir = path
        .split('/')
        .rev()
        .skip(1)
        .any(|dir| MANIFEST_DIRS.contains(&dir));
    (is_yaml && in_manifest_dir).then_some(3)
}

fn depth(path: &str) -> usize {
    path.matches('/').count()
}

fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn strip_host<'a>(url: &'a str, host: &str) -> Option<&'a str> {
    let without_scheme = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .unwrap_or(url);
    let without_www = without_scheme
        .strip_prefix("www.")
        .unwrap_or(without_scheme);
    without_www.strip_prefix(host)?.strip_prefix('/')
}

#[derive(Deserialize)]
struct RepoInfo {
    default_branch: String,
}

#[derive(Deserialize)]
struct TreeListing {
    tree: Vec<TreeEntry>,
}

#[derive(Deserialize)]
struct TreeEntry {
    path: String,
    #[serde(rename = "type")]
    kind: String,
}

/// [`SourceFetcher`] for GitHub-hosted sources
#[derive(Clone, Debug)]
pub struct GitHubFetcher {
    client: reqwest::Client,
}

impl GitHubFetcher {
    /// Create a fetcher with its own HTTP client
    pub fn new(timeout: Duration) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("deckhand/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::config(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    /// Create a fetcher with a custom HTTP client
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn get_text(&self, url: &str) -> Result<String, Error> {
        debug!(url = %url, "fetching source");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| request_error(url, e))?;
        if !response.status().is_success() {
            return Err(Error::upstream(
                "fetch source",
                format!("{} returned HTTP {}", url, response.status()),
            ));
        }
        response
            .text()
            .await
            .map_err(|e| Error::upstream("fetch source", format!("reading {}: {}", url, e)))
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, url: &str) -> Result<T, Error> {
        let text = self.get_text(url).await?;
        serde_json::from_str(&text)
            .map_err(|e| Error::upstream("fetch source", format!("invalid JSON from {}: {}", url, e)))
    }

    async fn fetch_repository(&self, url: &str, repo: RepoIdentity) -> Result<FetchedSource, Error> {
        let branch = match explicit_branch(url) {
            Some(branch) => branch,
            None => {
                let info: RepoInfo = self
                    .get_json(&format!("{}/repos/{}/{}", GITHUB_API, repo.owner, repo.repo))
                    .await?;
                info.default_branch
            }
        };

        let listing: TreeListing = self
            .get_json(&format!(
                "{}/repos/{}/{}/git/trees/{}?recursive=1",
                GITHUB_API, repo.owner, repo.repo, branch
            ))
            .await?;
        let path = select_source_file(
            listing
                .tree
                .iter()
                .filter(|entry| entry.kind == "blob")
                .map(|entry| entry.path.as_str()),
        )
        .ok_or_else(|| {
            Error::input_for_field(
                "url",
                format!(
                    "no compose file, build recipe, chart or manifest found in {}/{}",
                    repo.owner, repo.repo
                ),
            )
        })?
        .to_string();

        info!(owner = %repo.owner, repo = %repo.repo, branch = %branch, path = %path, "selected repository source file");
        let raw = format!(
            "https://{}/{}/{}/{}/{}",
            GITHUB_RAW_HOST, repo.owner, repo.repo, branch, path
        );
        let text = self.get_text(&raw).await?;
        Ok(FetchedSource {
            text,
            filename: Some(file_name(&path).to_string()),
            repo: Some(repo),
        })
    }
}

#[async_trait]
impl SourceFetcher for GitHubFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedSource, Error> {
        if is_repository_root(url) {
            let repo = repo_identity(url)
                .ok_or_else(|| Error::input_for_field("url", format!("not a repository URL: {}", url)))?;
            return self.fetch_repository(url, repo).await;
        }

        let raw = normalize_url(url);
        let text = self.get_text(&raw).await?;
        let filename = raw
            .split(['?', '#'])
            .next()
            .map(file_name)
            .filter(|name| !name.is_empty())
            .map(String::from);
        Ok(FetchedSource {
            text,
            filename,
            repo: repo_identity(url),
        })
    }
}

fn explicit_branch(url: &str) -> Option<String> {
    let rest = strip_host(url.trim(), GITHUB_HOST)?;
    let segments: Vec<&str> = rest.split('/').filter(|s| !s.is_empty()).collect();
    match segments.as_slice() {
        [_, _, "tree", branch] => Some((*branch).to_string()),
        _ => None,
    }
}

fn request_error(url: &str, err: reqwest::Error) -> Error {
    if err.is_timeout() {
        Error::upstream("fetch source", format!("{} timed out", url))
    } else {
        Error::upstream("fetch source", format!("request to {} failed: {}", url, err))
    }
}
