//! Explicit per-component configuration. Each struct is built once (from env,
//! then CLI overrides) and handed to the component that needs it.
use std::path::PathBuf;
use std::time::Duration;

use crate::util::env::{env_opt, env_parse, env_path, env_secs};

pub const DEFAULT_API_BASE_URL: &str = "https://gramsnap.com/api/ig/userInfoByUsername/";
pub const DEFAULT_TRANSLATE_URL: &str = "https://translate.googleapis.com/translate_a/single";
pub const DEFAULT_USER_AGENT: &str = "snap-harvest/0.1";

pub const DEFAULT_RESULTS_CSV: &str = "scrape_results.csv";
pub const DEFAULT_TRANSLATIONS_CSV: &str = "category_translations.csv";
pub const DEFAULT_DICTIONARY_CSV: &str = "OPTED-Dictionary.csv";
pub const DEFAULT_CLEANED_CSV: &str = "translated_scrape_results.csv";
pub const DEFAULT_PENDING_DIR: &str = "users_to_scrape";
pub const DEFAULT_PROCESSED_DIR: &str = "scraped_df";

#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// The key is appended verbatim (after percent-encoding) to this URL.
    pub base_url: String,
    /// Slept by every fetch task before it issues its request.
    pub request_delay: Duration,
    /// Whole-request timeout applied by the HTTP client.
    pub session_timeout: Duration,
    pub user_agent: String,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_BASE_URL.to_string(),
            request_delay: Duration::from_secs(5),
            session_timeout: Duration::from_secs(60),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl FetcherConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            base_url: env_opt("SNAP_API_BASE_URL").unwrap_or(d.base_url),
            request_delay: env_secs("SNAP_REQUEST_DELAY_SECS", d.request_delay),
            session_timeout: env_secs("SNAP_SESSION_TIMEOUT_SECS", d.session_timeout),
            user_agent: env_opt("SNAP_USER_AGENT").unwrap_or(d.user_agent),
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub pending_dir: PathBuf,
    pub processed_dir: PathBuf,
    /// Header of the column holding candidate keys in each batch file.
    pub key_column: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            pending_dir: PathBuf::from(DEFAULT_PENDING_DIR),
            processed_dir: PathBuf::from(DEFAULT_PROCESSED_DIR),
            key_column: "account".to_string(),
        }
    }
}

impl QueueConfig {
    pub fn from_env() -> Self {
        Self {
            pending_dir: env_path("SNAP_PENDING_DIR", DEFAULT_PENDING_DIR),
            processed_dir: env_path("SNAP_PROCESSED_DIR", DEFAULT_PROCESSED_DIR),
            key_column: env_opt("SNAP_BATCH_KEY_COLUMN").unwrap_or_else(|| "account".into()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HarvestConfig {
    pub results_csv: PathBuf,
    pub queue: QueueConfig,
    pub fetcher: FetcherConfig,
    /// Upper bound on concurrently running fetch tasks; 0 means unbounded.
    pub max_in_flight: usize,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            results_csv: PathBuf::from(DEFAULT_RESULTS_CSV),
            queue: QueueConfig::default(),
            fetcher: FetcherConfig::default(),
            max_in_flight: 0,
        }
    }
}

impl HarvestConfig {
    pub fn from_env() -> Self {
        Self {
            results_csv: env_path("SNAP_RESULTS_CSV", DEFAULT_RESULTS_CSV),
            queue: QueueConfig::from_env(),
            fetcher: FetcherConfig::from_env(),
            max_in_flight: env_parse("SNAP_MAX_IN_FLIGHT", 0usize),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TranslateConfig {
    pub results_csv: PathBuf,
    pub translations_csv: PathBuf,
    pub dictionary_csv: PathBuf,
    pub dictionary_column: String,
    pub category_column: String,
    pub endpoint: String,
    pub target_lang: String,
    pub jitter_min: Duration,
    pub jitter_max: Duration,
    pub timeout: Duration,
}

impl Default for TranslateConfig {
    fn default() -> Self {
        Self {
            results_csv: PathBuf::from(DEFAULT_RESULTS_CSV),
            translations_csv: PathBuf::from(DEFAULT_TRANSLATIONS_CSV),
            dictionary_csv: PathBuf::from(DEFAULT_DICTIONARY_CSV),
            dictionary_column: "Word".to_string(),
            category_column: "category".to_string(),
            endpoint: DEFAULT_TRANSLATE_URL.to_string(),
            target_lang: "en".to_string(),
            jitter_min: Duration::from_secs(5),
            jitter_max: Duration::from_secs(10),
            timeout: Duration::from_secs(30),
        }
    }
}

impl TranslateConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            results_csv: env_path("SNAP_RESULTS_CSV", DEFAULT_RESULTS_CSV),
            translations_csv: env_path("SNAP_TRANSLATIONS_CSV", DEFAULT_TRANSLATIONS_CSV),
            dictionary_csv: env_path("SNAP_DICTIONARY_CSV", DEFAULT_DICTIONARY_CSV),
            dictionary_column: env_opt("SNAP_DICTIONARY_COLUMN").unwrap_or(d.dictionary_column),
            category_column: d.category_column,
            endpoint: env_opt("SNAP_TRANSLATE_URL").unwrap_or(d.endpoint),
            target_lang: env_opt("SNAP_TRANSLATE_TARGET").unwrap_or(d.target_lang),
            jitter_min: env_secs("SNAP_TRANSLATE_JITTER_MIN_SECS", d.jitter_min),
            jitter_max: env_secs("SNAP_TRANSLATE_JITTER_MAX_SECS", d.jitter_max),
            timeout: d.timeout,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CleanConfig {
    pub results_csv: PathBuf,
    pub translations_csv: PathBuf,
    pub output_csv: PathBuf,
    pub category_column: String,
}

impl Default for CleanConfig {
    fn default() -> Self {
        Self {
            results_csv: PathBuf::from(DEFAULT_RESULTS_CSV),
            translations_csv: PathBuf::from(DEFAULT_TRANSLATIONS_CSV),
            output_csv: PathBuf::from(DEFAULT_CLEANED_CSV),
            category_column: "category".to_string(),
        }
    }
}

impl CleanConfig {
    pub fn from_env() -> Self {
        Self {
            results_csv: env_path("SNAP_RESULTS_CSV", DEFAULT_RESULTS_CSV),
            translations_csv: env_path("SNAP_TRANSLATIONS_CSV", DEFAULT_TRANSLATIONS_CSV),
            output_csv: env_path("SNAP_CLEANED_CSV", DEFAULT_CLEANED_CSV),
            category_column: "category".to_string(),
        }
    }
}
