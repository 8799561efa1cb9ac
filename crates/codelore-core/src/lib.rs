//! # codelore core
//!
//! Runtime-agnostic logic for codelore: data models, content chunkers,
//! vector utilities, the model-gateway trait, commit parsing, retrospective
//! and knowledge prompt handling, the retrieval store abstraction and the
//! retrieval algorithm.
//!
//! This crate has no tokio, sqlx or filesystem dependency. The application
//! crate supplies the SQLite store, the HTTP gateway and the git client.

pub mod chunk;
pub mod commit;
pub mod embedding;
pub mod error;
pub mod gateway;
pub mod knowledge;
pub mod models;
pub mod retrieval;
pub mod retrospective;
pub mod store;
