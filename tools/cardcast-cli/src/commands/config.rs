//! Print the effective configuration.

use cardcast_common::config::AppConfig;

pub fn run(config: &AppConfig) -> anyhow::Result<()> {
    println!("# {}", AppConfig::path().display());
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}
