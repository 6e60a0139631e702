//! Shared pipeline state: data paths, config, the batch log and the result
//! store, opened once per invocation and handed to each command.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context as _;
use sdglens_batch::{
    BatchApi, BatchBuilder, BatchPipeline, Merger, OpenAiBatchClient, PollOptions, Poller,
    RetryPolicy, Submitter,
};
use sdglens_core::{DataPaths, PipelineConfig};
use sdglens_store::{BatchLog, SqliteResultStore};
use tracing::{info, warn};

pub struct AppState {
    pub paths: DataPaths,
    pub config: PipelineConfig,
    pub log: Arc<BatchLog>,
    pub store: Arc<SqliteResultStore>,
}

impl AppState {
    pub fn open(data_dir: &Path) -> anyhow::Result<Self> {
        let paths = DataPaths::new(data_dir)
            .with_context(|| format!("creating data directories under {}", data_dir.display()))?;
        let config = PipelineConfig::load(&paths.config_file)?;

        let (log, recovered) = BatchLog::open_or_recover(&paths.batch_log)?;
        if recovered {
            warn!("Batch log was unreadable; run `sdglens reconcile` to rebuild it");
        }
        let store = SqliteResultStore::open(paths.results_db())
            .map_err(|e| anyhow::anyhow!("Failed to open result store: {}", e))?;

        info!("Data directory: {}", paths.root.display());
        Ok(Self {
            paths,
            config,
            log: Arc::new(log),
            store: Arc::new(store),
        })
    }

    pub fn retry(&self) -> RetryPolicy {
        RetryPolicy::new(self.config.retry_attempts)
    }

    pub fn poll_options(&self) -> PollOptions {
        PollOptions::from_config(&self.config)
    }

    pub fn builder(&self) -> anyhow::Result<BatchBuilder> {
        Ok(BatchBuilder::from_config(&self.config)?)
    }

    /// The provider client. Fails when no API key is configured.
    pub fn api(&self) -> anyhow::Result<Arc<dyn BatchApi>> {
        Ok(Arc::new(OpenAiBatchClient::from_config(&self.config)?))
    }

    pub fn submitter(&self, api: Arc<dyn BatchApi>) -> Submitter {
        Submitter::new(api, self.log.clone(), &self.paths, &self.config).with_retry(self.retry())
    }

    pub fn poller(&self, api: Arc<dyn BatchApi>) -> Poller {
        Poller::new(api, self.log.clone()).with_retry(self.retry())
    }

    pub fn merger(&self, api: Arc<dyn BatchApi>) -> Merger {
        Merger::new(
            api,
            self.log.clone(),
            self.store.clone(),
            &self.paths.batch_results,
        )
        .with_retry(self.retry())
    }

    pub fn pipeline(&self, api: Arc<dyn BatchApi>) -> BatchPipeline {
        BatchPipeline::new(
            self.submitter(api.clone()),
            self.poller(api.clone()),
            self.merger(api),
        )
    }
}
