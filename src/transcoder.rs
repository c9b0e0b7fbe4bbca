//! Transcoder gateway
//!
//! Uniform async contract over the speech engines: audio in, transcript out;
//! reply text in, downloadable audio reference out. Every engine call is
//! bounded by a timeout and nothing is retried here.

use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use bytes::Bytes;
use mini_moka::sync::Cache;
use serde::Serialize;
use uuid::Uuid;

use crate::config::{ApiKeys, VoiceConfig};
use crate::error::TranscriptionError;
use crate::voice::{SpeechToText, SttProvider, TextToSpeech, TtsProvider};
use crate::{Error, Result};

/// Path under which synthesized audio is served
pub const AUDIO_ROUTE_PREFIX: &str = "/api/audio";

/// Upper bound on cached reply clips
const AUDIO_CACHE_CAPACITY: u64 = 256;

/// Raw audio submitted by the UI
#[derive(Debug, Clone)]
pub struct AudioPayload {
    bytes: Bytes,
    mime_type: String,
}

impl AudioPayload {
    /// Wrap raw bytes; the container is sniffed and overrides `mime_type` when recognized
    pub fn new(bytes: impl Into<Bytes>, mime_type: impl Into<String>) -> Self {
        let bytes = bytes.into();
        let declared = mime_type.into();
        let mime_type = sniff_container(&bytes).map_or(declared, ToString::to_string);
        Self { bytes, mime_type }
    }

    /// Decode a base64 blob as produced by the browser recorder
    ///
    /// Accepts both bare base64 and `data:<mime>;base64,<data>` URLs.
    ///
    /// # Errors
    ///
    /// Returns `Malformed` if the text is not valid base64
    pub fn from_base64(
        encoded: &str,
        mime_type: Option<&str>,
    ) -> std::result::Result<Self, TranscriptionError> {
        let encoded = encoded.trim();
        let (data_url_mime, data) = match encoded.strip_prefix("data:") {
            Some(rest) => {
                let (header, data) = rest
                    .split_once(',')
                    .ok_or_else(|| TranscriptionError::Malformed("data URL without payload".into()))?;
                let mime = header.trim_end_matches(";base64");
                (Some(mime.split(';').next().unwrap_or(mime).to_string()), data)
            }
            None => (None, encoded),
        };

        let bytes = base64::engine::general_purpose::STANDARD
            .decode(data)
            .map_err(|e| TranscriptionError::Malformed(format!("invalid base64: {e}")))?;

        let mime = mime_type
            .map(ToString::to_string)
            .or(data_url_mime)
            .unwrap_or_else(|| "audio/wav".to_string());

        Ok(Self::new(bytes, mime))
    }

    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    #[must_use]
    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Reject payloads no engine could make sense of
    ///
    /// # Errors
    ///
    /// `EmptyPayload` for no bytes or a WAV with no samples, `Malformed` for a broken WAV
    pub fn validate(&self) -> std::result::Result<(), TranscriptionError> {
        if self.bytes.is_empty() {
            return Err(TranscriptionError::EmptyPayload);
        }

        if is_wav(&self.mime_type) {
            let reader = hound::WavReader::new(Cursor::new(self.bytes.as_ref()))
                .map_err(|e| TranscriptionError::Malformed(format!("invalid WAV: {e}")))?;
            if reader.duration() == 0 {
                return Err(TranscriptionError::EmptyPayload);
            }
        }

        Ok(())
    }
}

fn is_wav(mime_type: &str) -> bool {
    matches!(mime_type, "audio/wav" | "audio/x-wav" | "audio/wave")
}

/// Identify common audio containers by magic bytes
///
/// Browsers label `MediaRecorder` output inconsistently, so the bytes win.
fn sniff_container(bytes: &[u8]) -> Option<&'static str> {
    match bytes {
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'A', b'V', b'E', ..] => Some("audio/wav"),
        [0x1A, 0x45, 0xDF, 0xA3, ..] => Some("audio/webm"),
        [b'O', b'g', b'g', b'S', ..] => Some("audio/ogg"),
        // ISO base media box: 4-byte size then "ftyp"
        [_, _, _, _, b'f', b't', b'y', b'p', ..] => Some("audio/mp4"),
        [b'I', b'D', b'3', ..] | [0xFF, 0xFB | 0xF3 | 0xF2, ..] => Some("audio/mpeg"),
        _ => None,
    }
}

/// Outcome of a successful transcription call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transcript {
    /// Non-empty recognized text
    Text(String),
    /// The engine heard nothing usable
    Unintelligible,
}

impl Transcript {
    /// Classify raw engine output; blank text is never a success
    #[must_use]
    pub fn from_engine_output(raw: &str) -> Self {
        let text = raw.trim();
        if text.is_empty() {
            Self::Unintelligible
        } else {
            Self::Text(text.to_string())
        }
    }
}

/// Reference to synthesized audio the UI can fetch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AudioRef {
    pub id: Uuid,
    pub url: String,
    pub mime_type: String,
}

/// Cached synthesized clip
#[derive(Debug, Clone)]
pub struct StoredAudio {
    pub bytes: Bytes,
    pub mime_type: &'static str,
}

/// TTL store for reply audio, keyed by clip id
#[derive(Clone)]
pub struct AudioStore {
    cache: Cache<Uuid, StoredAudio>,
}

impl AudioStore {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            cache: Cache::builder()
                .max_capacity(AUDIO_CACHE_CAPACITY)
                .time_to_live(ttl)
                .build(),
        }
    }

    /// Store a clip and return its reference
    pub fn insert(&self, bytes: impl Into<Bytes>, mime_type: &'static str) -> AudioRef {
        let id = Uuid::new_v4();
        self.cache.insert(
            id,
            StoredAudio {
                bytes: bytes.into(),
                mime_type,
            },
        );
        AudioRef {
            id,
            url: format!("{AUDIO_ROUTE_PREFIX}/{id}"),
            mime_type: mime_type.to_string(),
        }
    }

    #[must_use]
    pub fn get(&self, id: &Uuid) -> Option<StoredAudio> {
        self.cache.get(id)
    }
}

/// Speech-to-text engine
#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    /// Return the raw engine transcript
    async fn recognize(&self, audio: &[u8], mime_type: &str) -> Result<String>;
}

/// Text-to-speech engine
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Return encoded audio for `text`
    async fn speak(&self, text: &str) -> Result<Vec<u8>>;

    /// Container of the audio `speak` returns
    fn mime_type(&self) -> &'static str;
}

/// Contract the orchestrator depends on
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Convert user audio to text
    ///
    /// # Errors
    ///
    /// `Error::Transcription` for empty, malformed or unprocessable audio,
    /// `Error::Timeout` when the engine exceeds its bound
    async fn transcribe(&self, payload: &AudioPayload) -> Result<Transcript>;

    /// Convert reply text to audio; `Ok(None)` when synthesis is off
    ///
    /// # Errors
    ///
    /// `Error::Synthesis` or `Error::Timeout` when the engine fails
    async fn synthesize(&self, text: &str) -> Result<Option<AudioRef>>;

    fn can_transcribe(&self) -> bool;

    fn can_synthesize(&self) -> bool;
}

/// Engines plus timeouts plus reply audio storage
pub struct TranscoderGateway {
    recognizer: Option<Arc<dyn SpeechRecognizer>>,
    synthesizer: Option<Arc<dyn SpeechSynthesizer>>,
    store: AudioStore,
    transcribe_timeout: Duration,
    synthesize_timeout: Duration,
}

impl TranscoderGateway {
    /// Create a gateway with no engines attached
    #[must_use]
    pub fn new(store: AudioStore) -> Self {
        Self {
            recognizer: None,
            synthesizer: None,
            store,
            transcribe_timeout: Duration::from_secs(30),
            synthesize_timeout: Duration::from_secs(20),
        }
    }

    /// Build engines from voice configuration
    ///
    /// A provider without an API key is left out with a warning.
    #[must_use]
    pub fn from_config(voice: &VoiceConfig, keys: &ApiKeys, store: AudioStore) -> Self {
        let mut gateway = Self::new(store).timeouts(voice.transcribe_timeout, voice.synthesize_timeout);

        if !voice.enabled {
            tracing::info!("voice disabled, transcoder runs without engines");
            return gateway;
        }

        let stt_key = match voice.stt_provider {
            SttProvider::Whisper => keys.openai.clone(),
            SttProvider::Deepgram => keys.deepgram.clone(),
        };
        match stt_key {
            Some(key) => {
                tracing::info!(provider = ?voice.stt_provider, model = %voice.stt_model, "speech-to-text enabled");
                gateway = gateway.recognizer(Arc::new(SpeechToText::new(
                    voice.stt_provider,
                    key,
                    voice.stt_model.clone(),
                )));
            }
            None => {
                tracing::warn!(provider = ?voice.stt_provider, "no API key for speech-to-text, voice input unavailable");
            }
        }

        let tts = match voice.tts_provider {
            TtsProvider::OpenAi => keys.openai.clone().map(|key| {
                TextToSpeech::new_openai(
                    key,
                    voice.tts_voice.clone(),
                    voice.tts_speed,
                    voice.tts_model.clone(),
                )
            }),
            TtsProvider::ElevenLabs => keys.elevenlabs.clone().map(|key| {
                TextToSpeech::new_elevenlabs(key, voice.tts_voice.clone(), voice.tts_model.clone())
            }),
            TtsProvider::Disabled => None,
        };
        match tts {
            Some(tts) => {
                tracing::info!(provider = ?voice.tts_provider, voice = %voice.tts_voice, "text-to-speech enabled");
                gateway = gateway.synthesizer(Arc::new(tts));
            }
            None if voice.tts_provider == TtsProvider::Disabled => {
                tracing::info!("text-to-speech disabled, replies are text only");
            }
            None => {
                tracing::warn!(provider = ?voice.tts_provider, "no API key for text-to-speech, replies are text only");
            }
        }

        gateway
    }

    #[must_use]
    pub fn recognizer(mut self, recognizer: Arc<dyn SpeechRecognizer>) -> Self {
        self.recognizer = Some(recognizer);
        self
    }

    #[must_use]
    pub fn synthesizer(mut self, synthesizer: Arc<dyn SpeechSynthesizer>) -> Self {
        self.synthesizer = Some(synthesizer);
        self
    }

    #[must_use]
    pub const fn timeouts(mut self, transcribe: Duration, synthesize: Duration) -> Self {
        self.transcribe_timeout = transcribe;
        self.synthesize_timeout = synthesize;
        self
    }

    /// Store holding synthesized clips
    #[must_use]
    pub const fn store(&self) -> &AudioStore {
        &self.store
    }
}

#[async_trait]
impl Transcoder for TranscoderGateway {
    async fn transcribe(&self, payload: &AudioPayload) -> Result<Transcript> {
        payload.validate()?;

        let recognizer = self.recognizer.as_ref().ok_or_else(|| {
            TranscriptionError::EngineUnavailable("no speech-to-text engine configured".into())
        })?;

        let raw = tokio::time::timeout(
            self.transcribe_timeout,
            recognizer.recognize(payload.bytes(), payload.mime_type()),
        )
        .await
        .map_err(|_| Error::timeout("transcription", self.transcribe_timeout))?
        .map_err(|e| match e {
            Error::Transcription(inner) => inner,
            other => TranscriptionError::EngineUnavailable(other.to_string()),
        })?;

        Ok(Transcript::from_engine_output(&raw))
    }

    async fn synthesize(&self, text: &str) -> Result<Option<AudioRef>> {
        let Some(synthesizer) = self.synthesizer.as_ref() else {
            return Ok(None);
        };

        let text = text.trim();
        if text.is_empty() {
            return Ok(None);
        }

        let audio = tokio::time::timeout(self.synthesize_timeout, synthesizer.speak(text))
            .await
            .map_err(|_| Error::timeout("synthesis", self.synthesize_timeout))??;

        if audio.is_empty() {
            return Err(Error::Synthesis("engine returned no audio".to_string()));
        }

        tracing::debug!(audio_bytes = audio.len(), "reply synthesized");
        Ok(Some(self.store.insert(audio, synthesizer.mime_type())))
    }

    fn can_transcribe(&self) -> bool {
        self.recognizer.is_some()
    }

    fn can_synthesize(&self) -> bool {
        self.synthesizer.is_some()
    }
}
