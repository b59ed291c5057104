//! Store and pipeline wiring shared by the HTTP handlers and the worker loops.

use std::sync::Arc;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use tracing::info;

use docpipe_infra::config::PipelineConfig;
use docpipe_infra::jobs::PipelineDeps;
use docpipe_infra::output_store::{InMemoryOutputStore, OutputStore, PostgresOutputStore};
use docpipe_infra::rendering::{PlaceholderRenderer, StaticTemplateCatalog};
use docpipe_infra::service::GenerationService;
use docpipe_infra::work_store::{InMemoryWorkStore, PostgresWorkStore, WorkStore};
use docpipe_infra::workers::{WorkerHandle, WorkerRuntime};
use docpipe_loadtest::{InMemoryRunStore, LoadTestConfig, LoadTestHarness};

/// Everything a handler needs, built once at startup.
#[derive(Clone)]
pub struct AppServices {
    pub generation: GenerationService,
    pub load_tests: LoadTestHarness,
    pub catalog: Arc<StaticTemplateCatalog>,
    pub outputs: Arc<dyn OutputStore>,
    deps: PipelineDeps,
    config: PipelineConfig,
}

impl AppServices {
    fn assemble(
        store: Arc<dyn WorkStore>,
        outputs: Arc<dyn OutputStore>,
        config: PipelineConfig,
        load_test: LoadTestConfig,
    ) -> Self {
        let catalog = Arc::new(StaticTemplateCatalog::new());
        let deps = PipelineDeps {
            store: store.clone(),
            outputs: outputs.clone(),
            resolver: catalog.clone(),
            renderer: Arc::new(PlaceholderRenderer),
        };
        let generation = GenerationService::new(store, &config);
        let load_tests = LoadTestHarness::new(
            generation.clone(),
            outputs.clone(),
            Arc::new(InMemoryRunStore::new()),
            load_test,
        );

        Self {
            generation,
            load_tests,
            catalog,
            outputs,
            deps,
            config,
        }
    }

    /// Process-local stores (dev/test).
    pub fn in_memory(config: PipelineConfig, load_test: LoadTestConfig) -> Self {
        Self::assemble(
            InMemoryWorkStore::arc(),
            Arc::new(InMemoryOutputStore::new()),
            config,
            load_test,
        )
    }

    /// Postgres-backed stores; applies the schema before returning.
    pub async fn postgres(
        database_url: &str,
        config: PipelineConfig,
        load_test: LoadTestConfig,
    ) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(16)
            .connect(database_url)
            .await
            .context("failed to connect to Postgres")?;
        PostgresWorkStore::apply_schema(&pool)
            .await
            .context("failed to apply generation pipeline schema")?;

        Ok(Self::assemble(
            Arc::new(PostgresWorkStore::new(pool.clone())),
            Arc::new(PostgresOutputStore::new(pool)),
            config,
            load_test,
        ))
    }

    /// Start the claim, recovery and retention loops for this process.
    pub fn spawn_workers(&self) -> WorkerHandle {
        WorkerRuntime::spawn(self.deps.clone(), self.config.clone())
    }
}

/// Pick Postgres when `DATABASE_URL` is set, in-memory stores otherwise.
pub async fn build_services(config: PipelineConfig) -> anyhow::Result<AppServices> {
    match std::env::var("DATABASE_URL") {
        Ok(url) if !url.trim().is_empty() => {
            info!("using Postgres-backed stores");
            AppServices::postgres(&url, config, LoadTestConfig::default()).await
        }
        _ => {
            info!("DATABASE_URL not set; using in-memory stores");
            Ok(AppServices::in_memory(config, LoadTestConfig::default()))
        }
    }
}
