use anyhow::Result;
use taskchain::TaskchainConfig;

/// Prints the configuration after file and environment overrides.
pub fn execute(config: &TaskchainConfig) -> Result<()> {
    print!("{}", toml::to_string_pretty(config)?);
    Ok(())
}
