use tracing_subscriber::{fmt, EnvFilter};

use crate::util::env::env_flag;

/// Install the global subscriber for the CLI. `RUST_LOG` wins over
/// `default_filter`; `SNAP_LOG_COMPACT=1` switches to single-line output
/// without source locations, which reads better for long unattended runs.
pub fn init_tracing(default_filter: &str) -> anyhow::Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let builder = fmt().with_env_filter(filter).with_target(true);

    let installed = if env_flag("SNAP_LOG_COMPACT", false) {
        builder.compact().try_init()
    } else {
        builder.with_file(true).with_line_number(true).try_init()
    };
    installed.map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))
}
