#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::StreamExt;
use tempfile::TempDir;
use tokio::sync::Notify;

use codelore::app::App;
use codelore::config::Config;
use codelore::vcs::{DiffSpec, VersionControl};
use codelore::{db, migrate, projects};
use codelore_core::gateway::{ModelGateway, TextStream};
use codelore_core::models::{ChatMessage, CommitInfo};

pub const DIMS: usize = 128;

/// Deterministic model: bag-of-words hashed embeddings, scripted completions.
///
/// A completion returns the reply of the first rule whose needle occurs in
/// the concatenated prompt; without a match it echoes the last user message.
#[derive(Default)]
pub struct FakeGateway {
    rules: Mutex<Vec<(String, String)>>,
    failures: Mutex<Vec<String>>,
    prompts: Mutex<Vec<String>>,
    pub embed_calls: AtomicUsize,
    pub complete_calls: AtomicUsize,
}

impl FakeGateway {
    pub fn reply_when(&self, needle: &str, reply: &str) {
        self.rules
            .lock()
            .unwrap()
            .push((needle.to_string(), reply.to_string()));
    }

    pub fn fail_when(&self, needle: &str) {
        self.failures.lock().unwrap().push(needle.to_string());
    }

    pub fn clear_failures(&self) {
        self.failures.lock().unwrap().clear();
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn calls(&self) -> (usize, usize) {
        (
            self.embed_calls.load(Ordering::SeqCst),
            self.complete_calls.load(Ordering::SeqCst),
        )
    }

    fn check_failure(&self, text: &str) -> Result<()> {
        let failures = self.failures.lock().unwrap();
        match failures.iter().find(|n| text.contains(n.as_str())) {
            Some(n) => Err(anyhow!("model unavailable for {}", n)),
            None => Ok(()),
        }
    }
}

pub fn hashed_embedding(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; DIMS];
    for token in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() >= 2)
    {
        let mut h: u64 = 0xcbf29ce484222325;
        for b in token.to_lowercase().bytes() {
            h ^= b as u64;
            h = h.wrapping_mul(0x100000001b3);
        }
        v[(h % DIMS as u64) as usize] += 1.0;
    }
    if v.iter().all(|x| *x == 0.0) {
        v[0] = 1.0;
    }
    v
}

#[async_trait]
impl ModelGateway for FakeGateway {
    fn embedding_model(&self) -> &str {
        "fake-hash"
    }

    fn dims(&self) -> usize {
        DIMS
    }

    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.embed_calls.fetch_add(1, Ordering::SeqCst);
        for t in texts {
            self.check_failure(t)?;
        }
        Ok(texts.iter().map(|t| hashed_embedding(t)).collect())
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        self.complete_calls.fetch_add(1, Ordering::SeqCst);
        let prompt = messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        self.prompts.lock().unwrap().push(prompt.clone());
        self.check_failure(&prompt)?;

        let rules = self.rules.lock().unwrap();
        if let Some((_, reply)) = rules.iter().find(|(n, _)| prompt.contains(n.as_str())) {
            return Ok(reply.clone());
        }
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == codelore_core::models::Role::User)
            .map(|m| m.content.clone())
            .unwrap_or_default();
        Ok(last_user.chars().take(400).collect())
    }

    async fn complete_stream(&self, messages: &[ChatMessage]) -> Result<TextStream> {
        let text = self.complete(messages).await?;
        let pieces: Vec<Result<String>> = text
            .split_inclusive(' ')
            .map(|s| Ok(s.to_string()))
            .collect();
        Ok(futures::stream::iter(pieces).boxed())
    }
}

struct FakeCommit {
    info: CommitInfo,
    name_status: String,
    patch: String,
}

/// Version control over a fixed working tree and a scripted history.
pub struct FakeVcs {
    root: PathBuf,
    repository: bool,
    /// Newest first, as `git log` prints.
    commits: Mutex<Vec<FakeCommit>>,
    /// Sources passed to `clone_or_pull`, in call order.
    resolved: Mutex<Vec<PathBuf>>,
    holds: Mutex<Vec<(PathBuf, Arc<Notify>)>>,
    pub log_calls: AtomicUsize,
}

impl FakeVcs {
    pub fn new(root: &Path, repository: bool) -> Self {
        Self {
            root: root.to_path_buf(),
            repository,
            commits: Mutex::new(Vec::new()),
            resolved: Mutex::new(Vec::new()),
            holds: Mutex::new(Vec::new()),
            log_calls: AtomicUsize::new(0),
        }
    }

    /// Make `clone_or_pull(source)` wait until the returned gate is notified.
    pub fn hold(&self, source: &Path) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.holds
            .lock()
            .unwrap()
            .push((source.to_path_buf(), gate.clone()));
        gate
    }

    pub fn resolved(&self) -> Vec<PathBuf> {
        self.resolved.lock().unwrap().clone()
    }

    /// Record a commit on top of the history.
    pub fn commit(&self, hash: &str, timestamp: i64, message: &str, name_status: &str, patch: &str) {
        self.commits.lock().unwrap().insert(
            0,
            FakeCommit {
                info: CommitInfo {
                    hash: hash.to_string(),
                    author: "Dana".to_string(),
                    timestamp,
                    message: message.to_string(),
                },
                name_status: name_status.to_string(),
                patch: patch.to_string(),
            },
        );
    }
}

#[async_trait]
impl VersionControl for FakeVcs {
    async fn clone_or_pull(&self, source: &str) -> Result<PathBuf> {
        let dir = PathBuf::from(source);
        self.resolved.lock().unwrap().push(dir.clone());
        let gate = self
            .holds
            .lock()
            .unwrap()
            .iter()
            .find(|(held, _)| *held == dir)
            .map(|(_, gate)| gate.clone());
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if dir.is_dir() {
            Ok(dir)
        } else {
            Ok(self.root.clone())
        }
    }

    fn is_repository(&self, _dir: &Path) -> bool {
        self.repository
    }

    async fn log(&self, _repo: &Path) -> Result<Vec<CommitInfo>> {
        self.log_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .commits
            .lock()
            .unwrap()
            .iter()
            .map(|c| c.info.clone())
            .collect())
    }

    async fn show(&self, _repo: &Path, spec: &DiffSpec) -> Result<String> {
        let commits = self.commits.lock().unwrap();
        let (hash, patch) = match spec {
            DiffSpec::NameStatus(h) => (h, false),
            DiffSpec::Patch(h) => (h, true),
        };
        let c = commits
            .iter()
            .find(|c| &c.info.hash == hash)
            .ok_or_else(|| anyhow!("unknown commit {}", hash))?;
        Ok(if patch {
            c.patch.clone()
        } else {
            c.name_status.clone()
        })
    }
}

/// A patch comfortably above the default triviality threshold.
pub fn big_patch(topic: &str) -> String {
    let mut p = format!("diff --git a/{t} b/{t}\n--- a/{t}\n+++ b/{t}\n", t = topic);
    for i in 0..20 {
        p.push_str(&format!("+    let value_{} = compute_{}(input);\n", i, topic));
    }
    p
}

pub struct Harness {
    pub dir: TempDir,
    pub root: PathBuf,
    pub app: App,
    pub gateway: Arc<FakeGateway>,
    pub vcs: Arc<FakeVcs>,
    pub project_id: i64,
}

impl Harness {
    pub async fn new(repository: bool) -> Self {
        Self::with_config(repository, |_| {}).await
    }

    pub async fn with_config(repository: bool, tweak: impl FnOnce(&mut Config)) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("work");
        std::fs::create_dir_all(&root).unwrap();

        let mut config = Config::minimal(dir.path().join("data/lore.sqlite"));
        tweak(&mut config);
        let pool = db::connect(&config).await.unwrap();
        migrate::apply(&pool, &config).await.unwrap();

        let gateway = Arc::new(FakeGateway::default());
        let vcs = Arc::new(FakeVcs::new(&root, repository));
        let app = App::new(pool, config, gateway.clone(), vcs.clone());
        let project = projects::create_project(&app.pool, "demo", root.to_str().unwrap())
            .await
            .unwrap();

        Self {
            dir,
            root,
            app,
            gateway,
            vcs,
            project_id: project.id,
        }
    }

    pub fn write(&self, rel: &str, content: &str) {
        let path = self.root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    pub fn remove(&self, rel: &str) {
        std::fs::remove_file(self.root.join(rel)).unwrap();
    }

    pub async fn ingest(&self) -> codelore::ingest::IngestReport {
        codelore::ingest::run_ingestion(
            &self.app,
            self.project_id,
            self.root.to_str().unwrap(),
            &codelore::progress::NoLogger,
        )
        .await
        .unwrap()
    }

    pub async fn scalar(&self, sql: &str) -> i64 {
        sqlx::query_scalar(sql)
            .bind(self.project_id)
            .fetch_one(&self.app.pool)
            .await
            .unwrap()
    }

    pub async fn file_paths(&self) -> Vec<String> {
        sqlx::query_scalar("SELECT path FROM indexed_files WHERE project_id = ? ORDER BY path")
            .bind(self.project_id)
            .fetch_all(&self.app.pool)
            .await
            .unwrap()
    }

    pub async fn chunk_names(&self, path: &str) -> Vec<String> {
        sqlx::query_scalar(
            "SELECT c.name FROM code_chunks c JOIN indexed_files f ON f.id = c.file_id \
             WHERE f.project_id = ? AND f.path = ? ORDER BY c.start_line",
        )
        .bind(self.project_id)
        .bind(path)
        .fetch_all(&self.app.pool)
        .await
        .unwrap()
    }

    pub async fn file_id(&self, path: &str) -> Option<i64> {
        sqlx::query_scalar("SELECT id FROM indexed_files WHERE project_id = ? AND path = ?")
            .bind(self.project_id)
            .bind(path)
            .fetch_optional(&self.app.pool)
            .await
            .unwrap()
    }
}
