//! Working-tree enumeration with the project ignore policy.
//!
//! A path is skipped when any of these match:
//! - a well-known vendored/build directory name (`.git`, `node_modules`, ...),
//! - the static denylist of lockfiles and binary extensions,
//! - the root `.gitignore`,
//! - `ingest.exclude_globs` from the config.
//!
//! Ignored directories are pruned without descending into them.

use std::path::Path;

use anyhow::Result;
use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use walkdir::{DirEntry, WalkDir};

const DENY_DIRS: &[&str] = &[
    ".git",
    ".hg",
    ".svn",
    "node_modules",
    "target",
    "dist",
    "build",
    "__pycache__",
    ".venv",
    "venv",
    ".idea",
    ".vscode",
    ".next",
];

const DENY_GLOBS: &[&str] = &[
    "**/package-lock.json",
    "**/yarn.lock",
    "**/pnpm-lock.yaml",
    "**/Cargo.lock",
    "**/poetry.lock",
    "**/Gemfile.lock",
    "**/composer.lock",
    "**/go.sum",
    "**/*.min.js",
    "**/*.map",
    "**/.DS_Store",
    "**/*.{png,jpg,jpeg,gif,bmp,ico,webp,svg,tiff,psd}",
    "**/*.{pdf,doc,docx,ppt,pptx,xls,xlsx}",
    "**/*.{zip,gz,tgz,tar,bz2,xz,7z,rar,jar,war}",
    "**/*.{exe,dll,so,dylib,a,o,obj,class,pyc,wasm,bin}",
    "**/*.{woff,woff2,ttf,otf,eot}",
    "**/*.{mp3,mp4,wav,ogg,mov,avi,webm}",
    "**/*.{sqlite,sqlite3,db}",
];

pub struct IgnorePolicy {
    gitignore: Gitignore,
    denylist: GlobSet,
    excludes: GlobSet,
}

impl IgnorePolicy {
    /// Build the policy for a working tree rooted at `root`.
    pub fn load(root: &Path, exclude_globs: &[String]) -> Result<Self> {
        let mut builder = GitignoreBuilder::new(root);
        let gitignore_path = root.join(".gitignore");
        if gitignore_path.is_file() {
            if let Some(err) = builder.add(&gitignore_path) {
                tracing::warn!(
                    path = %gitignore_path.display(),
                    error = %err,
                    "partially invalid .gitignore"
                );
            }
        }
        let gitignore = builder.build()?;

        let deny: Vec<String> = DENY_GLOBS.iter().map(|g| g.to_string()).collect();
        Ok(Self {
            gitignore,
            denylist: build_globset(&deny)?,
            excludes: build_globset(exclude_globs)?,
        })
    }

    /// `rel` is relative to the root, `/`-separated.
    pub fn is_ignored(&self, rel: &str, is_dir: bool) -> bool {
        if is_dir {
            let name = rel.rsplit('/').next().unwrap_or(rel);
            if DENY_DIRS.contains(&name) {
                return true;
            }
        } else if self.denylist.is_match(rel) {
            return true;
        }
        self.excludes.is_match(rel) || self.gitignore.matched(rel, is_dir).is_ignore()
    }
}

/// Relative paths of every non-ignored regular file under `root`, sorted.
pub fn walk_project(root: &Path, policy: &IgnorePolicy) -> Result<Vec<String>> {
    let mut paths = Vec::new();

    let walker = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| {
            entry.depth() == 0
                || !policy.is_ignored(&relative(root, entry), entry.file_type().is_dir())
        });

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(error = %e, "skipping unreadable path");
                continue;
            }
        };
        if entry.file_type().is_file() {
            paths.push(relative(root, &entry));
        }
    }

    paths.sort();
    Ok(paths)
}

fn relative(root: &Path, entry: &DirEntry) -> String {
    let path = entry.path();
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(root: &Path, rel: &str) {
        let p = root.join(rel);
        fs::create_dir_all(p.parent().unwrap()).unwrap();
        fs::write(p, "x").unwrap();
    }

    #[test]
    fn applies_every_ignore_layer() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        touch(root, "src/main.rs");
        touch(root, "README.md");
        touch(root, "node_modules/pkg/index.js");
        touch(root, "web/node_modules/pkg/index.js");
        touch(root, ".git/HEAD");
        touch(root, "Cargo.lock");
        touch(root, "assets/logo.png");
        touch(root, "secret/keys.txt");
        touch(root, "generated/out.rs");
        fs::write(root.join(".gitignore"), "secret/\n*.log\n").unwrap();
        touch(root, "debug.log");

        let policy = IgnorePolicy::load(root, &["generated/**".to_string()]).unwrap();
        let paths = walk_project(root, &policy).unwrap();
        assert_eq!(paths, vec![".gitignore", "README.md", "src/main.rs"]);
    }

    #[test]
    fn missing_gitignore_is_fine() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "a.txt");
        let policy = IgnorePolicy::load(dir.path(), &[]).unwrap();
        assert_eq!(walk_project(dir.path(), &policy).unwrap(), vec!["a.txt"]);
    }
}
