//! `opswatch config show`: print the effective configuration

use anyhow::Result;
use opswatch_engine::EngineConfig;

use crate::output::OutputFormat;

pub fn run(config: &EngineConfig, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(config)?),
        OutputFormat::Table | OutputFormat::Text => {
            print!("{}", toml::to_string_pretty(config)?);
        }
    }
    Ok(())
}
