use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::info;

use crate::config::TranslateConfig;
use crate::translate::{CategoryTranslator, GoogleTranslateClient, TranslateSummary};

#[derive(Debug, Clone, Default)]
pub struct TranslateOverrides {
    pub results_csv: Option<PathBuf>,
    pub translations_csv: Option<PathBuf>,
    pub dictionary_csv: Option<PathBuf>,
    pub target_lang: Option<String>,
}

impl TranslateOverrides {
    pub fn apply(self, mut cfg: TranslateConfig) -> TranslateConfig {
        if let Some(v) = self.results_csv {
            cfg.results_csv = v;
        }
        if let Some(v) = self.translations_csv {
            cfg.translations_csv = v;
        }
        if let Some(v) = self.dictionary_csv {
            cfg.dictionary_csv = v;
        }
        if let Some(v) = self.target_lang {
            cfg.target_lang = v;
        }
        cfg
    }
}

pub async fn run(cfg: TranslateConfig) -> Result<TranslateSummary> {
    info!(
        results = %cfg.results_csv.display(),
        translations = %cfg.translations_csv.display(),
        dictionary = %cfg.dictionary_csv.display(),
        target = %cfg.target_lang,
        "translate: starting"
    );
    let client = GoogleTranslateClient::new(&cfg.endpoint, &cfg.target_lang, cfg.timeout)
        .context("translate: build client")?;
    let summary = CategoryTranslator::new(cfg, client)
        .run()
        .await
        .context("translate: pass halted")?;
    super::print_summary(&summary)?;
    Ok(summary)
}
