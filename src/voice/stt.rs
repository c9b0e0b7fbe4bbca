//! Speech-to-text (STT) processing

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use super::SttProvider;
use crate::error::TranscriptionError;
use crate::transcoder::SpeechRecognizer;
use crate::Result;

const WHISPER_URL: &str = "https://api.openai.com/v1/audio/transcriptions";
const DEEPGRAM_URL: &str = "https://api.deepgram.com/v1/listen";

/// Response from OpenAI Whisper transcription API
#[derive(serde::Deserialize)]
struct WhisperResponse {
    text: String,
}

/// Response from Deepgram transcription API
#[derive(serde::Deserialize)]
struct DeepgramResponse {
    results: DeepgramResults,
}

#[derive(serde::Deserialize)]
struct DeepgramResults {
    channels: Vec<DeepgramChannel>,
}

#[derive(serde::Deserialize)]
struct DeepgramChannel {
    alternatives: Vec<DeepgramAlternative>,
}

#[derive(serde::Deserialize)]
struct DeepgramAlternative {
    transcript: String,
}

/// Transcribes speech to text
pub struct SpeechToText {
    client: reqwest::Client,
    api_key: SecretString,
    model: String,
    provider: SttProvider,
    endpoint: String,
}

impl SpeechToText {
    /// Create a new STT instance for the given provider
    #[must_use]
    pub fn new(provider: SttProvider, api_key: SecretString, model: String) -> Self {
        let endpoint = match provider {
            SttProvider::Whisper => WHISPER_URL,
            SttProvider::Deepgram => DEEPGRAM_URL,
        };

        Self {
            client: reqwest::Client::new(),
            api_key,
            model,
            provider,
            endpoint: endpoint.to_string(),
        }
    }

    /// Point the engine at a different API endpoint (proxies, self-hosted Whisper)
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Provider this engine talks to
    #[must_use]
    pub const fn provider(&self) -> SttProvider {
        self.provider
    }

    /// Transcribe audio to text
    ///
    /// # Arguments
    ///
    /// * `audio` - Encoded audio bytes
    /// * `mime_type` - Container type, e.g. `audio/wav` or `audio/webm`
    ///
    /// # Errors
    ///
    /// Returns error if the request fails or the API rejects the audio
    pub async fn transcribe(&self, audio: &[u8], mime_type: &str) -> Result<String> {
        match self.provider {
            SttProvider::Whisper => self.transcribe_whisper(audio, mime_type).await,
            SttProvider::Deepgram => self.transcribe_deepgram(audio, mime_type).await,
        }
    }

    /// Transcribe using OpenAI Whisper
    async fn transcribe_whisper(&self, audio: &[u8], mime_type: &str) -> Result<String> {
        tracing::debug!(audio_bytes = audio.len(), "starting Whisper transcription");

        let form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(audio.to_vec())
                    .file_name(file_name_for(mime_type))
                    .mime_str(mime_type)
                    .map_err(|e| TranscriptionError::Malformed(e.to_string()))?,
            )
            .text("model", self.model.clone());

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(self.api_key.expose_secret())
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Whisper request failed");
                TranscriptionError::EngineUnavailable(e.to_string())
            })?;

        let status = response.status();
        tracing::debug!(status = %status, "received response");

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Whisper API error");
            return Err(rejection(status, body).into());
        }

        let result: WhisperResponse = response.json().await.map_err(|e| {
            tracing::error!(error = %e, "failed to parse response");
            TranscriptionError::EngineUnavailable(e.to_string())
        })?;

        tracing::info!(chars = result.text.len(), "transcription complete");
        Ok(result.text)
    }

    /// Transcribe using Deepgram
    async fn transcribe_deepgram(&self, audio: &[u8], mime_type: &str) -> Result<String> {
        tracing::debug!(audio_bytes = audio.len(), "starting Deepgram transcription");

        let response = self
            .client
            .post(&self.endpoint)
            .query(&[("model", self.model.as_str()), ("punctuate", "true")])
            .header("Authorization", format!("Token {}", self.api_key.expose_secret()))
            .header("Content-Type", mime_type)
            .body(audio.to_vec())
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Deepgram request failed");
                TranscriptionError::EngineUnavailable(e.to_string())
            })?;

        let status = response.status();
        tracing::debug!(status = %status, "received response");

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Deepgram API error");
            return Err(rejection(status, body).into());
        }

        let result: DeepgramResponse = response.json().await.map_err(|e| {
            tracing::error!(error = %e, "failed to parse Deepgram response");
            TranscriptionError::EngineUnavailable(e.to_string())
        })?;

        let transcript = result
            .results
            .channels
            .first()
            .and_then(|c| c.alternatives.first())
            .map(|a| a.transcript.clone())
            .unwrap_or_default();

        tracing::info!(chars = transcript.len(), "transcription complete");
        Ok(transcript)
    }
}

#[async_trait]
impl SpeechRecognizer for SpeechToText {
    async fn recognize(&self, audio: &[u8], mime_type: &str) -> Result<String> {
        self.transcribe(audio, mime_type).await
    }
}

/// 400 means the engine could not decode what we sent; anything else is on the engine
fn rejection(status: reqwest::StatusCode, body: String) -> TranscriptionError {
    if status == reqwest::StatusCode::BAD_REQUEST {
        TranscriptionError::Malformed(body)
    } else {
        TranscriptionError::EngineUnavailable(format!("STT API error {status}: {body}"))
    }
}

/// Whisper infers the container from the file extension
fn file_name_for(mime_type: &str) -> &'static str {
    match mime_type.split(';').next().unwrap_or_default().trim() {
        "audio/webm" => "audio.webm",
        "audio/ogg" => "audio.ogg",
        "audio/mpeg" | "audio/mp3" => "audio.mp3",
        "audio/mp4" | "audio/m4a" => "audio.m4a",
        _ => "audio.wav",
    }
}
