//! # Codelore
//!
//! An incremental knowledge index over a software project, and question
//! answering on top of it.
//!
//! Ingestion keeps a SQLite index in step with a project's working tree and
//! git history: changed files are summarized, chunked and embedded; new
//! commits are embedded, linked to the files they touch, close the tasks
//! they reference, or yield a retrospective task. Questions are answered
//! from a context bundle fused from several vector searches, and finished
//! conversations can be distilled into knowledge notes that feed back into
//! retrieval.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────┐
//! │ Working tree │──▶│  File sync   │──▶│          │
//! └──────────────┘   └──────────────┘   │  SQLite  │
//! ┌──────────────┐   ┌──────────────┐   │  index   │
//! │ Git history  │──▶│  Git sync    │──▶│          │
//! └──────────────┘   └──────────────┘   └────┬─────┘
//!                                            │
//!                    ┌──────────────┐        │
//!                    │  Retrieval   │◀───────┘
//!                    │  + answer    │
//!                    └──────┬───────┘
//!                           ▼
//!                    ┌──────────────┐
//!                    │  Knowledge   │
//!                    │  capture     │
//!                    └──────────────┘
//! ```
//!
//! Runtime-independent pieces (chunkers, retrieval assembly, response
//! parsing) live in the `codelore-core` crate.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] / [`migrate`] | Connection pool and schema |
//! | [`app`] | Shared handles for every operation |
//! | [`gateway`] | OpenAI-compatible model gateway |
//! | [`vcs`] | Git collaborator |
//! | [`walk`] | Ignore-aware tree walk |
//! | [`file_sync`] / [`git_sync`] | Ingestion engines |
//! | [`ingest`] / [`queue`] | Run orchestration and the global job queue |
//! | [`sqlite_store`] | Vector search over the index |
//! | [`answer`] | Streamed answers and conversation turns |
//! | [`knowledge`] | Knowledge-note capture |
//! | [`projects`] / [`tasks`] / [`documents`] / [`conversations`] | Entity operations |

pub mod answer;
pub mod app;
pub mod config;
pub mod conversations;
pub mod db;
pub mod documents;
pub mod extract;
pub mod file_sync;
pub mod gateway;
pub mod git_sync;
pub mod ingest;
pub mod knowledge;
pub mod migrate;
pub mod progress;
pub mod projects;
pub mod queue;
pub mod sqlite_store;
pub mod stats;
pub mod tasks;
pub mod vcs;
pub mod walk;
