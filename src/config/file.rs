//! TOML configuration file loading
//!
//! Supports `~/.config/casabot/config.toml` as a persistent config source.
//! All fields are optional, the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct CasabotConfigFile {
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerFileConfig,

    /// Assistant backend configuration
    #[serde(default)]
    pub assistant: AssistantFileConfig,

    /// Voice/audio configuration
    #[serde(default)]
    pub voice: VoiceFileConfig,

    /// API keys for speech engines
    #[serde(default)]
    pub api_keys: ApiKeysFileConfig,
}

/// Server configuration
#[derive(Debug, Default, Deserialize)]
pub struct ServerFileConfig {
    pub port: Option<u16>,
    pub host: Option<String>,
    pub static_dir: Option<String>,
    /// Global request budget per minute; absent disables rate limiting
    pub rate_limit_rpm: Option<u32>,
}

/// Assistant backend configuration
#[derive(Debug, Default, Deserialize)]
pub struct AssistantFileConfig {
    /// MCP endpoint (e.g. "http://homeassistant.local:8123/api/mcp")
    pub url: Option<String>,
    /// Long-lived access token
    pub token: Option<String>,
    /// Conversation tool exposed by the backend
    pub tool: Option<String>,
    pub request_timeout_secs: Option<u64>,
    pub handshake_timeout_secs: Option<u64>,
    pub reconnect_interval_secs: Option<u64>,
}

/// Voice processing configuration
#[derive(Debug, Default, Deserialize)]
pub struct VoiceFileConfig {
    pub enabled: Option<bool>,

    /// "whisper" or "deepgram"
    pub stt_provider: Option<String>,
    pub stt_model: Option<String>,

    /// "openai", "elevenlabs" or "none"
    pub tts_provider: Option<String>,
    pub tts_model: Option<String>,
    pub tts_voice: Option<String>,
    pub tts_speed: Option<f32>,

    pub transcribe_timeout_secs: Option<u64>,
    pub synthesize_timeout_secs: Option<u64>,

    /// How long synthesized replies stay downloadable
    pub audio_ttl_secs: Option<u64>,
}

/// API keys configuration
#[derive(Debug, Default, Deserialize)]
pub struct ApiKeysFileConfig {
    pub openai: Option<String>,
    pub deepgram: Option<String>,
    pub elevenlabs: Option<String>,
}

/// Load the TOML config file from the standard path
///
/// Returns `CasabotConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> CasabotConfigFile {
    config_file_path().map_or_else(CasabotConfigFile::default, |path| load_from(&path))
}

/// Load a config file from an explicit path, falling back to defaults
pub fn load_from(path: &Path) -> CasabotConfigFile {
    if !path.exists() {
        return CasabotConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                CasabotConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            CasabotConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/casabot/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("casabot").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_partial_file() {
        let fc: CasabotConfigFile = toml::from_str(
            r#"
            [assistant]
            url = "http://ha.local:8123/api/mcp"
            request_timeout_secs = 5

            [voice]
            tts_provider = "none"
            "#,
        )
        .unwrap();

        assert_eq!(fc.assistant.url.as_deref(), Some("http://ha.local:8123/api/mcp"));
        assert_eq!(fc.assistant.request_timeout_secs, Some(5));
        assert_eq!(fc.voice.tts_provider.as_deref(), Some("none"));
        assert!(fc.server.port.is_none());
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let fc = load_from(&dir.path().join("absent.toml"));
        assert!(fc.assistant.url.is_none());
    }

    #[test]
    fn unparsable_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[server\nport = ").unwrap();
        let fc = load_from(&path);
        assert!(fc.server.port.is_none());
    }

    #[test]
    fn reads_file_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[server]\nport = 9000\n").unwrap();
        assert_eq!(load_from(&path).server.port, Some(9000));
    }
}
