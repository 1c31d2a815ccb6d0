use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use snap_harvest::cli::{
    clean::{self as clean_cmd, CleanOverrides},
    harvest::{self as harvest_cmd, HarvestOverrides},
    translate::{self as translate_cmd, TranslateOverrides},
};
use snap_harvest::config::{CleanConfig, HarvestConfig, TranslateConfig};
use snap_harvest::telemetry::init_tracing;
use snap_harvest::util::env as env_util;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "snap-harvest", version, about = "Incremental profile harvester")]
struct Cli {
    /// Harvested dataset (env: SNAP_RESULTS_CSV)
    #[arg(long, global = true)]
    results_csv: Option<PathBuf>,
    /// Category translations table (env: SNAP_TRANSLATIONS_CSV)
    #[arg(long, global = true)]
    translations_csv: Option<PathBuf>,
    /// Fallback log filter when RUST_LOG is unset
    #[arg(long, global = true, default_value = "info")]
    log: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug, Clone)]
#[command(rename_all = "kebab-case")]
enum Commands {
    /// Drain pending batches into the dataset until none remain
    Harvest(HarvestArgs),
    /// Translate category labels that are not dictionary words
    Translate(TranslateArgs),
    /// Write a copy of the dataset with translated categories
    Clean(CleanArgs),
    /// Harvest, then translate, then clean
    RunAll {
        #[command(flatten)]
        harvest: HarvestArgs,
        #[command(flatten)]
        translate: TranslateArgs,
        #[command(flatten)]
        clean: CleanArgs,
        /// Skip the translate step (env: SNAP_SKIP_TRANSLATE)
        #[arg(long, default_value_t = false)]
        skip_translate: bool,
    },
}

#[derive(Args, Debug, Clone, Default)]
struct HarvestArgs {
    /// Directory of pending batch files (env: SNAP_PENDING_DIR)
    #[arg(long)]
    pending_dir: Option<PathBuf>,
    /// Directory retired batches are moved into (env: SNAP_PROCESSED_DIR)
    #[arg(long)]
    processed_dir: Option<PathBuf>,
    /// Batch column holding the keys (env: SNAP_BATCH_KEY_COLUMN)
    #[arg(long)]
    key_column: Option<String>,
    /// Lookup URL prefix; the key is appended (env: SNAP_API_BASE_URL)
    #[arg(long)]
    base_url: Option<String>,
    /// Per-request delay in seconds (env: SNAP_REQUEST_DELAY_SECS)
    #[arg(long)]
    delay_secs: Option<f64>,
    /// Request timeout in seconds (env: SNAP_SESSION_TIMEOUT_SECS)
    #[arg(long)]
    timeout_secs: Option<f64>,
    /// Cap on concurrent fetches, 0 = unbounded (env: SNAP_MAX_IN_FLIGHT)
    #[arg(long)]
    max_in_flight: Option<usize>,
}

#[derive(Args, Debug, Clone, Default)]
struct TranslateArgs {
    /// Dictionary of English words (env: SNAP_DICTIONARY_CSV)
    #[arg(long)]
    dictionary_csv: Option<PathBuf>,
    /// Target language code (env: SNAP_TRANSLATE_TARGET)
    #[arg(long)]
    target_lang: Option<String>,
}

#[derive(Args, Debug, Clone, Default)]
struct CleanArgs {
    /// Output path for the rewritten dataset (env: SNAP_CLEANED_CSV)
    #[arg(long)]
    output_csv: Option<PathBuf>,
}

impl Cli {
    fn harvest_config(&self, args: HarvestArgs) -> HarvestConfig {
        HarvestOverrides {
            results_csv: self.results_csv.clone(),
            pending_dir: args.pending_dir,
            processed_dir: args.processed_dir,
            key_column: args.key_column,
            base_url: args.base_url,
            delay_secs: args.delay_secs,
            timeout_secs: args.timeout_secs,
            max_in_flight: args.max_in_flight,
        }
        .apply(HarvestConfig::from_env())
    }

    fn translate_config(&self, args: TranslateArgs) -> TranslateConfig {
        TranslateOverrides {
            results_csv: self.results_csv.clone(),
            translations_csv: self.translations_csv.clone(),
            dictionary_csv: args.dictionary_csv,
            target_lang: args.target_lang,
        }
        .apply(TranslateConfig::from_env())
    }

    fn clean_config(&self, args: CleanArgs) -> CleanConfig {
        CleanOverrides {
            results_csv: self.results_csv.clone(),
            translations_csv: self.translations_csv.clone(),
            output_csv: args.output_csv,
        }
        .apply(CleanConfig::from_env())
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log)?;
    env_util::bootstrap_cli("snap-harvest");

    match cli.command.clone() {
        Commands::Harvest(args) => {
            harvest_cmd::run(cli.harvest_config(args)).await?;
        }
        Commands::Translate(args) => {
            translate_cmd::run(cli.translate_config(args)).await?;
        }
        Commands::Clean(args) => {
            clean_cmd::run(cli.clean_config(args)).await?;
        }
        Commands::RunAll {
            harvest,
            translate,
            clean,
            skip_translate,
        } => {
            harvest_cmd::run(cli.harvest_config(harvest)).await?;
            if skip_translate || env_util::env_flag("SNAP_SKIP_TRANSLATE", false) {
                info!("run-all: translate step skipped");
            } else {
                translate_cmd::run(cli.translate_config(translate)).await?;
            }
            clean_cmd::run(cli.clean_config(clean)).await?;
        }
    }
    Ok(())
}
