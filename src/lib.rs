pub mod cleaner;
pub mod cli;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod telemetry;
pub mod translate;

pub mod harvest {
    pub mod fetcher;
    pub mod queue;
    pub mod store;
}

pub mod normalization {
    pub mod profile;
}

pub mod util {
    pub mod env;
}

pub use error::{FetchError, HarvestError, TranslateError};
pub use harvest::fetcher::{ProfileLookup, RateLimitedFetcher};
pub use harvest::queue::{BatchHandle, BatchQueue};
pub use harvest::store::{AppendTable, RecordStore, TableRow};
pub use normalization::profile::ProfileRecord;
pub use orchestrator::{HarvestLoop, HarvestSummary};
