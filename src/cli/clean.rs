use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::cleaner::{self, CleanSummary};
use crate::config::CleanConfig;

#[derive(Debug, Clone, Default)]
pub struct CleanOverrides {
    pub results_csv: Option<PathBuf>,
    pub translations_csv: Option<PathBuf>,
    pub output_csv: Option<PathBuf>,
}

impl CleanOverrides {
    pub fn apply(self, mut cfg: CleanConfig) -> CleanConfig {
        if let Some(v) = self.results_csv {
            cfg.results_csv = v;
        }
        if let Some(v) = self.translations_csv {
            cfg.translations_csv = v;
        }
        if let Some(v) = self.output_csv {
            cfg.output_csv = v;
        }
        cfg
    }
}

pub async fn run(cfg: CleanConfig) -> Result<CleanSummary> {
    let summary = cleaner::run(&cfg)
        .await
        .with_context(|| format!("clean: rewriting {}", cfg.results_csv.display()))?;
    super::print_summary(&summary)?;
    Ok(summary)
}
