//! Shared handles for every operation: pool, config and collaborators.

use std::sync::Arc;

use anyhow::Result;
use sqlx::SqlitePool;

use codelore_core::gateway::ModelGateway;

use crate::config::Config;
use crate::sqlite_store::SqliteStore;
use crate::vcs::{GitCli, VersionControl};
use crate::{db, gateway, migrate};

#[derive(Clone)]
pub struct App {
    pub pool: SqlitePool,
    pub config: Config,
    pub gateway: Arc<dyn ModelGateway>,
    pub vcs: Arc<dyn VersionControl>,
}

impl App {
    /// Connect, migrate and build the configured collaborators.
    pub async fn open(config: Config) -> Result<Self> {
        let gateway = gateway::create_gateway(&config.model)?;
        let vcs: Arc<dyn VersionControl> = Arc::new(GitCli::new(config.ingest.cache_dir.clone()));
        let pool = db::connect(&config).await?;
        migrate::apply(&pool, &config).await?;
        Ok(Self::new(pool, config, gateway, vcs))
    }

    pub fn new(
        pool: SqlitePool,
        config: Config,
        gateway: Arc<dyn ModelGateway>,
        vcs: Arc<dyn VersionControl>,
    ) -> Self {
        Self {
            pool,
            config,
            gateway,
            vcs,
        }
    }

    pub fn store(&self) -> SqliteStore {
        SqliteStore::new(self.pool.clone())
    }
}
