pub mod config;
pub mod discovery;
pub mod publisher;
pub mod server;
pub mod source;
pub mod type_inference;

use std::path::PathBuf;

use anyhow::{anyhow, Result};
use chrono_tz::Tz;

pub use config::{BooleanTokens, InferenceConfig, PluginConfig, SourceConfig};
pub use discovery::{DiscoveryEngine, DiscoveryError, SchemaRegistry};
pub use publisher::{PublishError, PublishEvent, Publisher};
pub use server::PluginServer;

#[derive(clap::Parser, Debug)]
#[command(
    name = "tabula-plugin",
    about = "Reference plugin: discovers CSV schemas and publishes typed records"
)]
pub struct PluginArgs {
    /// Address to listen on (port 0 picks a free port)
    #[arg(
        long,
        env = "TABULA_BIND",
        default_value_t = tabula_protocol::defaults::DEFAULT_PLUGIN_BIND_ADDR.to_string()
    )]
    pub bind: String,

    /// Data rows per file used for type inference
    #[arg(
        long,
        env = "TABULA_SAMPLE_ROWS",
        default_value_t = tabula_protocol::defaults::DEFAULT_SAMPLE_ROWS
    )]
    pub sample_rows: usize,

    /// Which tokens count as booleans
    #[arg(long, env = "TABULA_BOOLEAN_TOKENS", value_enum, default_value_t = BooleanTokens::Permissive)]
    pub boolean_tokens: BooleanTokens,

    /// IANA zone whose midnight dates convert to
    #[arg(
        long,
        env = "TABULA_REFERENCE_TZ",
        default_value = tabula_protocol::defaults::DEFAULT_REFERENCE_TZ
    )]
    pub reference_tz: String,

    /// Field delimiter of source files
    #[arg(long, env = "TABULA_DELIMITER", default_value_t = ',')]
    pub delimiter: char,

    /// Debug logging for this plugin
    #[arg(short, long)]
    pub verbose: bool,

    /// Also write logs to this file
    #[arg(long, env = "TABULA_PLUGIN_LOG")]
    pub log_file: Option<PathBuf>,
}

impl PluginArgs {
    pub fn into_config(self) -> Result<PluginConfig> {
        let reference_tz: Tz = self
            .reference_tz
            .parse()
            .map_err(|e| anyhow!("Unknown reference time zone '{}': {}", self.reference_tz, e))?;

        if !self.delimiter.is_ascii() {
            return Err(anyhow!("Delimiter must be a single ASCII character"));
        }
        if self.sample_rows == 0 {
            return Err(anyhow!("--sample-rows must be at least 1"));
        }

        Ok(PluginConfig {
            bind_addr: self.bind,
            inference: InferenceConfig {
                boolean_tokens: self.boolean_tokens,
                sample_rows: self.sample_rows,
                reference_tz,
            },
            source: SourceConfig {
                delimiter: self.delimiter as u8,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_defaults_map_to_default_config() {
        let args = PluginArgs::try_parse_from(["tabula-plugin"]).unwrap();
        let config = args.into_config().unwrap();
        assert_eq!(config.bind_addr, "127.0.0.1:0");
        assert_eq!(config.inference.reference_tz, Tz::UTC);
        assert_eq!(config.inference.boolean_tokens, BooleanTokens::Permissive);
        assert_eq!(config.source.delimiter, b',');
    }

    #[test]
    fn test_flags_override() {
        let args = PluginArgs::try_parse_from([
            "tabula-plugin",
            "--boolean-tokens",
            "strict",
            "--reference-tz",
            "America/New_York",
            "--delimiter",
            ";",
            "--sample-rows",
            "10",
        ])
        .unwrap();
        let config = args.into_config().unwrap();
        assert_eq!(config.inference.boolean_tokens, BooleanTokens::Strict);
        assert_eq!(config.inference.reference_tz, chrono_tz::America::New_York);
        assert_eq!(config.inference.sample_rows, 10);
        assert_eq!(config.source.delimiter, b';');
    }

    #[test]
    fn test_unknown_zone_is_rejected() {
        let args =
            PluginArgs::try_parse_from(["tabula-plugin", "--reference-tz", "Mars/Olympus"]).unwrap();
        assert!(args.into_config().is_err());
    }
}
