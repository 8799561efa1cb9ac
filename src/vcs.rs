//! Version-control collaborator.
//!
//! [`VersionControl`] is everything the ingestion pipeline needs from git:
//! a local working tree for a project source, the commit log, and per-commit
//! diffs. [`GitCli`] implements it by shelling out to the `git` binary.
//!
//! Remote sources are cloned into `<cache_dir>/<sha256(url)[..12]>` and
//! fast-forwarded on later runs. Local directories are used in place and
//! never modified.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::process::Command;

use codelore_core::models::CommitInfo;

const FIELD_SEP: char = '\x1f';
const RECORD_SEP: char = '\x1e';

/// Which view of a single commit to produce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffSpec {
    /// `<status>\t<path>` lines for the commit.
    NameStatus(String),
    /// Full unified patch for the commit.
    Patch(String),
}

#[async_trait]
pub trait VersionControl: Send + Sync {
    /// Resolve `source` to a local working tree, cloning or pulling remotes.
    async fn clone_or_pull(&self, source: &str) -> Result<PathBuf>;

    /// True when `dir` is the root of a git working tree.
    fn is_repository(&self, dir: &Path) -> bool {
        dir.join(".git").exists()
    }

    /// Full commit log, newest first. Empty for a repository without commits.
    async fn log(&self, repo: &Path) -> Result<Vec<CommitInfo>>;

    async fn show(&self, repo: &Path, spec: &DiffSpec) -> Result<String>;
}

/// [`VersionControl`] backed by the `git` command-line client.
pub struct GitCli {
    cache_dir: PathBuf,
}

impl GitCli {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
        }
    }

    /// Clone destination for a remote URL.
    pub fn cache_path(&self, url: &str) -> PathBuf {
        self.cache_dir.join(short_hash(url))
    }
}

#[async_trait]
impl VersionControl for GitCli {
    async fn clone_or_pull(&self, source: &str) -> Result<PathBuf> {
        let local = Path::new(source);
        if local.is_dir() {
            return local
                .canonicalize()
                .with_context(|| format!("Failed to resolve {}", local.display()));
        }

        if !is_remote(source) {
            bail!("Source '{}' is neither a local directory nor a git URL", source);
        }

        let dest = self.cache_path(source);
        if dest.join(".git").exists() {
            tracing::debug!(url = source, dest = %dest.display(), "pulling cached clone");
            git(Some(&dest), &["pull", "--ff-only"]).await?;
        } else {
            std::fs::create_dir_all(&self.cache_dir).with_context(|| {
                format!("Failed to create cache directory: {}", self.cache_dir.display())
            })?;
            tracing::debug!(url = source, dest = %dest.display(), "cloning");
            let dest_str = dest.to_string_lossy().to_string();
            git(None, &["clone", source, &dest_str]).await?;
        }
        Ok(dest)
    }

    async fn log(&self, repo: &Path) -> Result<Vec<CommitInfo>> {
        let head = Command::new("git")
            .args(["rev-parse", "--verify", "--quiet", "HEAD"])
            .current_dir(repo)
            .output()
            .await
            .with_context(|| "Failed to execute 'git rev-parse'. Is git installed?")?;
        if !head.status.success() {
            return Ok(Vec::new());
        }

        let format = format!("--format=%H{f}%an{f}%at{f}%B{r}", f = "%x1f", r = "%x1e");
        let out = git(Some(repo), &["log", &format]).await?;
        Ok(parse_log(&out))
    }

    async fn show(&self, repo: &Path, spec: &DiffSpec) -> Result<String> {
        match spec {
            DiffSpec::NameStatus(hash) => {
                git(Some(repo), &["show", "--name-status", "--format=", hash]).await
            }
            DiffSpec::Patch(hash) => {
                git(Some(repo), &["show", "--format=", "--patch", hash]).await
            }
        }
    }
}

async fn git(dir: Option<&Path>, args: &[&str]) -> Result<String> {
    let mut cmd = Command::new("git");
    cmd.args(args);
    if let Some(dir) = dir {
        cmd.current_dir(dir);
    }

    let output = cmd
        .output()
        .await
        .with_context(|| format!("Failed to execute 'git {}'. Is git installed?", args[0]))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("git {} failed: {}", args[0], stderr.trim());
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

fn is_remote(source: &str) -> bool {
    source.contains("://") || source.starts_with("git@")
}

/// Parse `git log --format=%H%x1f%an%x1f%at%x1f%B%x1e` output.
pub fn parse_log(text: &str) -> Vec<CommitInfo> {
    text.split(RECORD_SEP)
        .filter_map(|record| {
            let record = record.trim_start_matches(&['\n', '\r'][..]);
            if record.trim().is_empty() {
                return None;
            }
            let mut fields = record.splitn(4, FIELD_SEP);
            let hash = fields.next()?.trim().to_string();
            let author = fields.next()?.trim().to_string();
            let timestamp = fields.next()?.trim().parse::<i64>().ok()?;
            let message = fields.next().unwrap_or("").trim_end().to_string();
            Some(CommitInfo {
                hash,
                author,
                timestamp,
                message,
            })
        })
        .collect()
}

fn short_hash(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())[..12].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_multi_line_messages() {
        let out = "aaa\x1fAlice\x1f1700000100\x1fSecond\n\nBody line\n\x1e\nbbb\x1fBob\x1f1700000000\x1fFirst\n\x1e\n";
        let commits = parse_log(out);
        assert_eq!(commits.len(), 2);
        assert_eq!(commits[0].hash, "aaa");
        assert_eq!(commits[0].author, "Alice");
        assert_eq!(commits[0].timestamp, 1_700_000_100);
        assert_eq!(commits[0].message, "Second\n\nBody line");
        assert_eq!(commits[1].subject(), "First");
    }

    #[test]
    fn empty_log_output() {
        assert!(parse_log("").is_empty());
        assert!(parse_log("\n").is_empty());
    }

    #[test]
    fn remote_detection() {
        assert!(is_remote("https://github.com/org/repo.git"));
        assert!(is_remote("git@github.com:org/repo.git"));
        assert!(!is_remote("./some/dir"));
    }

    #[test]
    fn cache_path_is_stable_per_url() {
        let git = GitCli::new("/tmp/cache");
        let a = git.cache_path("https://example.com/a.git");
        assert_eq!(a, git.cache_path("https://example.com/a.git"));
        assert_ne!(a, git.cache_path("https://example.com/b.git"));
        assert_eq!(a.file_name().map(|n| n.len()), Some(12));
    }

    #[tokio::test]
    async fn local_directory_is_used_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let git = GitCli::new(dir.path().join("cache"));
        let resolved = git
            .clone_or_pull(dir.path().to_str().unwrap())
            .await
            .unwrap();
        assert_eq!(resolved, dir.path().canonicalize().unwrap());
        assert!(!dir.path().join("cache").exists());
    }
}
