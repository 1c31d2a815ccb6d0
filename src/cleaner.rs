//! Rewrites the category column of the harvested dataset into a new file,
//! substituting translated labels. The source dataset is never modified.
use std::collections::HashMap;
use std::path::Path;

use tracing::info;

use crate::config::CleanConfig;
use crate::error::{HarvestError, Result};
use crate::translate::TranslationTable;

#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct CleanSummary {
    pub rows: usize,
    pub rewritten: usize,
}

/// `category → translation` from the translations table; later rows win.
pub async fn load_mapping(path: &Path) -> Result<HashMap<String, String>> {
    Ok(TranslationTable::new(path)
        .load_rows()
        .await?
        .into_iter()
        .map(|t| (t.source, t.translated))
        .collect())
}

pub async fn run(cfg: &CleanConfig) -> Result<CleanSummary> {
    let input = match tokio::fs::read(&cfg.results_csv).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!(results = %cfg.results_csv.display(), "no harvested dataset yet; nothing to clean");
            return Ok(CleanSummary::default());
        }
        Err(e) => return Err(HarvestError::io(&cfg.results_csv, e)),
    };
    let mapping = load_mapping(&cfg.translations_csv).await?;

    let (output, summary) = rewrite_column(&cfg.results_csv, &input, &cfg.category_column, &mapping)?;

    let tmp = cfg.output_csv.with_extension("csv.tmp");
    tokio::fs::write(&tmp, &output)
        .await
        .map_err(|e| HarvestError::io(&tmp, e))?;
    tokio::fs::rename(&tmp, &cfg.output_csv)
        .await
        .map_err(|e| HarvestError::io(&cfg.output_csv, e))?;

    info!(
        output = %cfg.output_csv.display(),
        rows = summary.rows,
        rewritten = summary.rewritten,
        mapping = mapping.len(),
        "cleaned dataset written"
    );
    Ok(summary)
}

fn rewrite_column(
    path: &Path,
    input: &[u8],
    column: &str,
    mapping: &HashMap<String, String>,
) -> Result<(Vec<u8>, CleanSummary)> {
    let mut rdr = csv::ReaderBuilder::new().flexible(true).from_reader(input);
    let headers = rdr
        .headers()
        .map_err(|e| HarvestError::corrupt(path, format!("unreadable header: {e}")))?
        .clone();
    let idx = headers
        .iter()
        .position(|h| h == column)
        .ok_or_else(|| HarvestError::corrupt(path, format!("no `{column}` column")))?;

    let mut wtr = csv::Writer::from_writer(Vec::with_capacity(input.len()));
    let to_io = |e: csv::Error| HarvestError::io(path, e.into());
    wtr.write_record(&headers).map_err(to_io)?;

    let mut summary = CleanSummary::default();
    for rec in rdr.records() {
        let rec = rec.map_err(|e| HarvestError::corrupt(path, e.to_string()))?;
        summary.rows += 1;
        match rec.get(idx).and_then(|v| mapping.get(v)) {
            Some(replacement) => {
                summary.rewritten += 1;
                let fields = rec
                    .iter()
                    .enumerate()
                    .map(|(i, f)| if i == idx { replacement.as_str() } else { f });
                wtr.write_record(fields).map_err(to_io)?;
            }
            None => wtr.write_record(&rec).map_err(to_io)?,
        }
    }
    let out = wtr
        .into_inner()
        .map_err(|e| HarvestError::io(path, e.into_error()))?;
    Ok((out, summary))
}
