use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;

use crate::config::HarvestConfig;
use crate::harvest::fetcher::RateLimitedFetcher;
use crate::harvest::queue::BatchQueue;
use crate::harvest::store::RecordStore;
use crate::orchestrator::{HarvestLoop, HarvestSummary};

/// Command-line overrides layered on top of `HarvestConfig::from_env()`.
#[derive(Debug, Clone, Default)]
pub struct HarvestOverrides {
    pub results_csv: Option<PathBuf>,
    pub pending_dir: Option<PathBuf>,
    pub processed_dir: Option<PathBuf>,
    pub key_column: Option<String>,
    pub base_url: Option<String>,
    pub delay_secs: Option<f64>,
    pub timeout_secs: Option<f64>,
    pub max_in_flight: Option<usize>,
}

impl HarvestOverrides {
    pub fn apply(self, mut cfg: HarvestConfig) -> HarvestConfig {
        if let Some(v) = self.results_csv {
            cfg.results_csv = v;
        }
        if let Some(v) = self.pending_dir {
            cfg.queue.pending_dir = v;
        }
        if let Some(v) = self.processed_dir {
            cfg.queue.processed_dir = v;
        }
        if let Some(v) = self.key_column {
            cfg.queue.key_column = v;
        }
        if let Some(v) = self.base_url {
            cfg.fetcher.base_url = v;
        }
        if let Some(secs) = self.delay_secs.filter(|s| s.is_finite() && *s >= 0.0) {
            cfg.fetcher.request_delay = Duration::from_secs_f64(secs);
        }
        if let Some(secs) = self.timeout_secs.filter(|s| s.is_finite() && *s > 0.0) {
            cfg.fetcher.session_timeout = Duration::from_secs_f64(secs);
        }
        if let Some(v) = self.max_in_flight {
            cfg.max_in_flight = v;
        }
        cfg
    }
}

pub async fn run(cfg: HarvestConfig) -> Result<HarvestSummary> {
    info!(
        results = %cfg.results_csv.display(),
        pending = %cfg.queue.pending_dir.display(),
        processed = %cfg.queue.processed_dir.display(),
        base_url = %cfg.fetcher.base_url,
        delay_ms = cfg.fetcher.request_delay.as_millis() as u64,
        max_in_flight = cfg.max_in_flight,
        "harvest: starting"
    );

    let fetcher = RateLimitedFetcher::new(cfg.fetcher.clone()).context("harvest: build fetcher")?;
    let harvest = HarvestLoop::new(
        BatchQueue::new(cfg.queue.clone()),
        Arc::new(RecordStore::new(&cfg.results_csv)),
        Arc::new(fetcher),
    )
    .with_max_in_flight(cfg.max_in_flight);

    let summary = harvest.run().await.context("harvest: loop halted")?;
    super::print_summary(&summary)?;
    Ok(summary)
}
