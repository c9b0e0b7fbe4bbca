//! Configuration management for Casabot
//!
//! Values resolve as env > TOML file > default.

pub mod file;

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::voice::{SttProvider, TtsProvider};
use crate::{Error, Result};

use file::CasabotConfigFile;

/// Default MCP endpoint of a local Home Assistant instance
pub const DEFAULT_ASSISTANT_URL: &str = "http://localhost:8123/api/mcp";

/// Casabot configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP API server configuration
    pub server: ServerConfig,

    /// Assistant backend configuration
    pub assistant: AssistantConfig,

    /// Voice configuration
    pub voice: VoiceConfig,

    /// API keys for speech engines
    pub api_keys: ApiKeys,
}

/// HTTP API server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port to listen on
    pub port: u16,

    /// Address to bind
    pub host: String,

    /// Path to static files directory (web UI)
    pub static_dir: Option<PathBuf>,

    /// Global requests per minute, `None` disables limiting
    pub rate_limit_rpm: Option<u32>,
}

/// Assistant backend configuration
#[derive(Debug, Clone)]
pub struct AssistantConfig {
    /// MCP endpoint URL
    pub url: url::Url,

    /// Bearer token for the backend
    pub token: Option<SecretString>,

    /// Name of the conversation tool to call
    pub tool: String,

    /// Upper bound on one request/reply exchange
    pub request_timeout: Duration,

    /// Upper bound on the session handshake
    pub handshake_timeout: Duration,

    /// Minimum spacing between caller-driven reconnect attempts
    pub reconnect_interval: Duration,
}

/// Voice processing configuration
#[derive(Debug, Clone)]
pub struct VoiceConfig {
    /// Enable voice input and spoken replies
    pub enabled: bool,

    pub stt_provider: SttProvider,

    /// STT model (e.g. "whisper-1", "nova-2")
    pub stt_model: String,

    pub tts_provider: TtsProvider,

    /// TTS model (e.g. "tts-1", "eleven_monolingual_v1")
    pub tts_model: String,

    /// TTS voice identifier
    pub tts_voice: String,

    /// TTS speed multiplier (0.25 to 4.0)
    pub tts_speed: f32,

    pub transcribe_timeout: Duration,
    pub synthesize_timeout: Duration,

    /// Lifetime of cached reply audio
    pub audio_ttl: Duration,
}

/// API keys for external services
#[derive(Debug, Clone, Default)]
pub struct ApiKeys {
    /// `OpenAI` API key (Whisper and TTS)
    pub openai: Option<SecretString>,

    /// `Deepgram` API key (optional STT)
    pub deepgram: Option<SecretString>,

    /// `ElevenLabs` API key (optional TTS)
    pub elevenlabs: Option<SecretString>,
}

impl Config {
    /// Load configuration from the environment and the config file
    ///
    /// # Errors
    ///
    /// Returns error if a value is present but invalid
    pub fn load() -> Result<Self> {
        Self::load_with_options(false)
    }

    /// Load configuration with explicit voice disable option
    ///
    /// # Errors
    ///
    /// Returns error if a value is present but invalid
    pub fn load_with_options(disable_voice: bool) -> Result<Self> {
        let fc = file::load_config_file();
        let mut config = Self::resolve(fc, |key| std::env::var(key).ok())?;

        if disable_voice {
            tracing::info!("voice explicitly disabled via --disable-voice");
            config.voice.enabled = false;
        }

        Ok(config)
    }

    /// Resolve configuration from a parsed file and an environment lookup
    ///
    /// # Errors
    ///
    /// Returns error on an unparsable URL, number or provider name
    pub fn resolve<F>(fc: CasabotConfigFile, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let server = ServerConfig {
            port: match parse_env(&env, "CASABOT_PORT")? {
                Some(port) => Some(port),
                None => parse_env(&env, "PORT")?,
            }
            .or(fc.server.port)
            .unwrap_or(8000),
            host: env("CASABOT_HOST")
                .or(fc.server.host)
                .unwrap_or_else(|| "0.0.0.0".to_string()),
            static_dir: env("CASABOT_STATIC_DIR")
                .or(fc.server.static_dir)
                .map(PathBuf::from),
            rate_limit_rpm: parse_env(&env, "CASABOT_RATE_LIMIT_RPM")?
                .or(fc.server.rate_limit_rpm)
                .filter(|rpm| *rpm > 0),
        };

        let raw_url = env("CASABOT_ASSISTANT_URL")
            .or(fc.assistant.url)
            .unwrap_or_else(|| DEFAULT_ASSISTANT_URL.to_string());
        let url = url::Url::parse(&raw_url)
            .map_err(|e| Error::Config(format!("invalid assistant url {raw_url:?}: {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::Config(format!(
                "assistant url must be http or https, got {}",
                url.scheme()
            )));
        }

        let assistant = AssistantConfig {
            url,
            token: env("HOME_ASSISTANT_TOKEN")
                .or(fc.assistant.token)
                .filter(|t| !t.is_empty())
                .map(SecretString::from),
            tool: env("CASABOT_ASSISTANT_TOOL")
                .or(fc.assistant.tool)
                .unwrap_or_else(|| "assist".to_string()),
            request_timeout: secs(
                parse_env(&env, "CASABOT_REQUEST_TIMEOUT_SECS")?
                    .or(fc.assistant.request_timeout_secs),
                30,
            ),
            handshake_timeout: secs(fc.assistant.handshake_timeout_secs, 10),
            // Zero is meaningful here: it turns caller-driven reconnects off
            reconnect_interval: fc
                .assistant
                .reconnect_interval_secs
                .map_or(Duration::from_secs(15), Duration::from_secs),
        };

        let stt_provider = env("CASABOT_STT_PROVIDER")
            .or(fc.voice.stt_provider)
            .map_or(Ok(SttProvider::Whisper), |s| s.parse())?;
        let tts_provider = env("CASABOT_TTS_PROVIDER")
            .or(fc.voice.tts_provider)
            .map_or(Ok(TtsProvider::OpenAi), |s| s.parse())?;

        let voice = VoiceConfig {
            enabled: fc.voice.enabled.unwrap_or(true),
            stt_provider,
            stt_model: env("CASABOT_STT_MODEL")
                .or(fc.voice.stt_model)
                .unwrap_or_else(|| stt_provider.default_model().to_string()),
            tts_provider,
            tts_model: env("CASABOT_TTS_MODEL")
                .or(fc.voice.tts_model)
                .unwrap_or_else(|| tts_provider.default_model().to_string()),
            tts_voice: fc
                .voice
                .tts_voice
                .unwrap_or_else(|| tts_provider.default_voice().to_string()),
            tts_speed: fc.voice.tts_speed.unwrap_or(1.0).clamp(0.25, 4.0),
            transcribe_timeout: secs(fc.voice.transcribe_timeout_secs, 30),
            synthesize_timeout: secs(fc.voice.synthesize_timeout_secs, 20),
            audio_ttl: secs(fc.voice.audio_ttl_secs, 300),
        };

        let api_keys = ApiKeys {
            openai: secret(env("OPENAI_API_KEY").or(fc.api_keys.openai)),
            deepgram: secret(env("DEEPGRAM_API_KEY").or(fc.api_keys.deepgram)),
            elevenlabs: secret(env("ELEVENLABS_API_KEY").or(fc.api_keys.elevenlabs)),
        };

        Ok(Self {
            server,
            assistant,
            voice,
            api_keys,
        })
    }
}

fn parse_env<F, T>(env: &F, key: &str) -> Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    env(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|e| Error::Config(format!("{key}={raw:?}: {e}")))
        })
        .transpose()
}

const fn secs(value: Option<u64>, default: u64) -> Duration {
    match value {
        Some(0) | None => Duration::from_secs(default),
        Some(v) => Duration::from_secs(v),
    }
}

fn secret(value: Option<String>) -> Option<SecretString> {
    value.filter(|v| !v.is_empty()).map(SecretString::from)
}
