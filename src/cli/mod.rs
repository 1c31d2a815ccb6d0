pub mod clean;
pub mod harvest;
pub mod translate;

use serde::Serialize;

/// Summaries go to stdout as pretty JSON so runs can be piped into `jq`.
pub(crate) fn print_summary<T: Serialize>(summary: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(summary)?);
    Ok(())
}
