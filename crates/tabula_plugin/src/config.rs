//! Plugin configuration (plain data, built from CLI args in `lib.rs`).

use chrono_tz::Tz;
use tabula_protocol::defaults;

/// Which literal tokens classify as booleans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum BooleanTokens {
    /// `true` / `false` only
    Strict,
    /// Also `t` / `f`
    #[default]
    Permissive,
}

/// Settings for classification, conversion and sampling.
#[derive(Debug, Clone)]
pub struct InferenceConfig {
    pub boolean_tokens: BooleanTokens,
    /// Data rows per file fed to the majority vote.
    pub sample_rows: usize,
    /// Dates convert to midnight in this zone.
    pub reference_tz: Tz,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            boolean_tokens: BooleanTokens::default(),
            sample_rows: defaults::DEFAULT_SAMPLE_ROWS,
            reference_tz: Tz::UTC,
        }
    }
}

/// Delimited-text reader settings.
#[derive(Debug, Clone, Copy)]
pub struct SourceConfig {
    pub delimiter: u8,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self { delimiter: b',' }
    }
}

/// Plugin process configuration.
#[derive(Debug, Clone)]
pub struct PluginConfig {
    pub bind_addr: String,
    pub inference: InferenceConfig,
    pub source: SourceConfig,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            bind_addr: defaults::DEFAULT_PLUGIN_BIND_ADDR.to_string(),
            inference: InferenceConfig::default(),
            source: SourceConfig::default(),
        }
    }
}
