use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use opsync_transport::TransportConfig;
use serde::Deserialize;

use crate::parser::ParserConfig;

/// Deserializable configuration for a whole sync session.
///
/// All durations are integral milliseconds, the way the platform's other
/// client settings are expressed. Every field has a default matching the
/// protocol's documented behavior, so an empty TOML document is a valid
/// configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncConfig {
    pub transport: TransportSettings,
    pub parser: ParserSettings,
}

impl SyncConfig {
    pub fn from_toml(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read config at {}", path.display()))?;
        Ok(Self::from_toml(&contents)?)
    }

    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            reconnect_delay: Duration::from_millis(self.transport.reconnect_delay_ms),
            max_reconnect_attempts: self.transport.max_reconnect_attempts,
            connect_timeout: Duration::from_millis(self.transport.connect_timeout_ms),
        }
    }

    pub fn parser_config(&self) -> ParserConfig {
        let settings = &self.parser;
        ParserConfig {
            enable_validation: settings.enable_validation,
            max_message_size: settings.max_message_size,
            max_operations_per_message: settings.max_operations_per_message,
            operation_timeout: Duration::from_millis(settings.operation_timeout_ms),
            max_tracked_messages: settings.max_tracked_messages,
            allowed_file_paths: settings.allowed_file_paths.clone(),
            blocked_file_paths: settings.blocked_file_paths.clone(),
            allowed_commands: settings.allowed_commands.clone(),
            blocked_commands: settings.blocked_commands.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TransportSettings {
    pub reconnect_delay_ms: u64,
    pub max_reconnect_attempts: Option<u32>,
    pub connect_timeout_ms: u64,
}

impl Default for TransportSettings {
    fn default() -> Self {
        let defaults = TransportConfig::default();
        Self {
            reconnect_delay_ms: defaults.reconnect_delay.as_millis() as u64,
            max_reconnect_attempts: defaults.max_reconnect_attempts,
            connect_timeout_ms: defaults.connect_timeout.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ParserSettings {
    pub enable_validation: bool,
    pub max_message_size: usize,
    pub max_operations_per_message: usize,
    pub operation_timeout_ms: u64,
    pub max_tracked_messages: usize,
    pub allowed_file_paths: Vec<String>,
    pub blocked_file_paths: Vec<String>,
    pub allowed_commands: Vec<String>,
    pub blocked_commands: Vec<String>,
}

impl Default for ParserSettings {
    fn default() -> Self {
        let defaults = ParserConfig::default();
        Self {
            enable_validation: defaults.enable_validation,
            max_message_size: defaults.max_message_size,
            max_operations_per_message: defaults.max_operations_per_message,
            operation_timeout_ms: defaults.operation_timeout.as_millis() as u64,
            max_tracked_messages: defaults.max_tracked_messages,
            allowed_file_paths: defaults.allowed_file_paths,
            blocked_file_paths: defaults.blocked_file_paths,
            allowed_commands: defaults.allowed_commands,
            blocked_commands: defaults.blocked_commands,
        }
    }
}
