//! Category translation pass over the harvested dataset.
//!
//! Category labels that are not English dictionary words are translated once
//! and appended to the translations table, which the cleaner later uses to
//! rewrite the dataset.
pub mod google;

pub use google::GoogleTranslateClient;

use std::collections::{BTreeSet, HashSet};
use std::path::Path;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::TranslateConfig;
use crate::error::{HarvestError, Result, TranslateError};
use crate::harvest::store::{AppendTable, RecordStore, TableRow};

/// One row of the translations table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Translation {
    #[serde(rename = "category")]
    pub source: String,
    pub src_lang: String,
    #[serde(rename = "translation")]
    pub translated: String,
    pub target_lang: String,
}

impl TableRow for Translation {
    const HEADER: &'static [&'static str] = &["category", "src_lang", "translation", "target_lang"];
    const KEY_COLUMN: &'static str = "category";

    fn key(&self) -> &str {
        &self.source
    }
}

pub type TranslationTable = AppendTable<Translation>;

#[async_trait::async_trait]
pub trait Translator: Send + Sync {
    async fn translate(&self, text: &str) -> std::result::Result<Translation, TranslateError>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TranslateSummary {
    pub categories_seen: usize,
    pub non_dictionary: usize,
    pub already_translated: usize,
    pub translated: usize,
    pub failed: usize,
}

pub struct CategoryTranslator<T> {
    cfg: TranslateConfig,
    translator: T,
}

impl<T: Translator> CategoryTranslator<T> {
    pub fn new(cfg: TranslateConfig, translator: T) -> Self {
        Self { cfg, translator }
    }

    /// Categories that still need a translation, sorted.
    pub async fn pending_categories(&self, summary: &mut TranslateSummary) -> Result<Vec<String>> {
        let categories = RecordStore::new(&self.cfg.results_csv)
            .load_rows()
            .await?
            .into_iter()
            .map(|r| r.category.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect::<BTreeSet<_>>();
        summary.categories_seen = categories.len();
        if categories.is_empty() {
            return Ok(Vec::new());
        }

        let dictionary = load_dictionary(&self.cfg.dictionary_csv, &self.cfg.dictionary_column)?;
        let foreign: Vec<String> = categories
            .into_iter()
            .filter(|c| !dictionary.contains(&c.to_lowercase()))
            .collect();
        summary.non_dictionary = foreign.len();

        let done = TranslationTable::new(&self.cfg.translations_csv).load_keys().await?;
        let pending: Vec<String> = foreign.into_iter().filter(|c| !done.contains(c)).collect();
        summary.already_translated = summary.non_dictionary - pending.len();
        Ok(pending)
    }

    /// Translate every pending category, pacing requests with random jitter.
    /// A failed word is skipped; a failed append ends the pass.
    pub async fn run(&self) -> Result<TranslateSummary> {
        let mut summary = TranslateSummary::default();
        let pending = self.pending_categories(&mut summary).await?;
        info!(
            seen = summary.categories_seen,
            non_dictionary = summary.non_dictionary,
            pending = pending.len(),
            "category translation starting"
        );

        let table = TranslationTable::new(&self.cfg.translations_csv);
        for (idx, category) in pending.iter().enumerate() {
            if idx > 0 {
                tokio::time::sleep(self.jitter()).await;
            }
            match self.translator.translate(category).await {
                Ok(translation) => {
                    table.append(&translation).await?;
                    summary.translated += 1;
                    info!(%category, translated = %translation.translated, src = %translation.src_lang, "translated category");
                }
                Err(err) => {
                    summary.failed += 1;
                    warn!(%category, %err, "translation failed; will retry next run");
                }
            }
        }

        info!(?summary, "category translation done");
        Ok(summary)
    }

    fn jitter(&self) -> Duration {
        let lo = self.cfg.jitter_min.as_secs_f64();
        let hi = self.cfg.jitter_max.as_secs_f64();
        if hi <= lo {
            return self.cfg.jitter_min;
        }
        Duration::from_secs_f64(rand::thread_rng().gen_range(lo..hi))
    }
}

/// Lowercased words of the dictionary file's word column.
fn load_dictionary(path: &Path, column: &str) -> Result<HashSet<String>> {
    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .map_err(|e| HarvestError::io(path, e.into()))?;
    let idx = rdr
        .headers()
        .map_err(|e| HarvestError::corrupt(path, format!("unreadable header: {e}")))?
        .iter()
        .position(|h| h.trim() == column)
        .ok_or_else(|| HarvestError::corrupt(path, format!("no `{column}` column")))?;

    let mut words = HashSet::new();
    for rec in rdr.records() {
        let Ok(rec) = rec else { continue };
        if let Some(word) = rec.get(idx).map(str::trim).filter(|w| !w.is_empty()) {
            words.insert(word.to_lowercase());
        }
    }
    Ok(words)
}
