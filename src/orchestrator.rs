//! Conversation orchestrator
//!
//! Drives one user turn through transcription, the assistant and synthesis.
//! This is where every failure is contained: handlers always get a
//! displayable [`TurnResult`], raw errors only reach the logs.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use governor::{Quota, RateLimiter, clock::DefaultClock, state::InMemoryState, state::NotKeyed};
use serde::Serialize;
use tracing::Instrument;
use uuid::Uuid;

use crate::assistant::{Assistant, AssistantReply, AssistantRequest, SessionState};
use crate::transcoder::{AudioPayload, AudioRef, Transcoder, Transcript};
use crate::{Error, Result};

/// Reply to an empty or whitespace-only text turn
pub const NOTHING_TO_PROCESS: &str = "Please enter a message.";

/// Reply when audio held no usable speech
pub const NOT_UNDERSTOOD: &str = "I couldn't understand your voice message. Please try again.";

/// Reply when the assistant could not answer
pub const APOLOGY: &str =
    "I'm sorry, I'm having trouble processing your request right now. Please try again.";

/// Reply when the speech engine could not process the recording
pub const VOICE_APOLOGY: &str =
    "I'm sorry, I'm having trouble processing your voice message right now. Please try again.";

type ReconnectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// What the user submitted
#[derive(Debug, Clone)]
pub enum TurnInput {
    Text(String),
    Audio(AudioPayload),
}

/// One user interaction
#[derive(Debug, Clone)]
pub struct Turn {
    id: Uuid,
    input: TurnInput,
    created_at: DateTime<Utc>,
}

impl Turn {
    #[must_use]
    pub fn new(input: TurnInput) -> Self {
        Self {
            id: Uuid::new_v4(),
            input,
            created_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::new(TurnInput::Text(text.into()))
    }

    #[must_use]
    pub fn audio(payload: AudioPayload) -> Self {
        Self::new(TurnInput::Audio(payload))
    }

    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    #[must_use]
    pub const fn input(&self) -> &TurnInput {
        &self.input
    }

    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// How a turn ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnOutcome {
    Answered,
    NothingToProcess,
    NotUnderstood,
    Failed,
}

/// Displayable result of one turn
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TurnResult {
    pub turn_id: Uuid,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio: Option<AudioRef>,
    pub outcome: TurnOutcome,
}

impl TurnResult {
    fn answered(reply: AssistantReply, audio: Option<AudioRef>) -> Self {
        Self {
            turn_id: reply.turn_id,
            text: reply.text,
            audio,
            outcome: TurnOutcome::Answered,
        }
    }

    fn fixed(turn_id: Uuid, text: &str, outcome: TurnOutcome) -> Self {
        Self {
            turn_id,
            text: text.to_string(),
            audio: None,
            outcome,
        }
    }
}

/// Stateless turn driver over an assistant and a transcoder
pub struct Orchestrator {
    assistant: Arc<dyn Assistant>,
    transcoder: Arc<dyn Transcoder>,
    reconnect: Option<ReconnectLimiter>,
}

impl Orchestrator {
    /// Create an orchestrator that never re-initializes the assistant itself
    #[must_use]
    pub fn new(assistant: Arc<dyn Assistant>, transcoder: Arc<dyn Transcoder>) -> Self {
        Self {
            assistant,
            transcoder,
            reconnect: None,
        }
    }

    /// Allow one session re-initialization attempt per `interval` when a
    /// turn finds the session failed or never started
    #[must_use]
    pub fn reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect = Quota::with_period(interval)
            .map(|q| RateLimiter::direct(q.allow_burst(NonZeroU32::MIN)));
        self
    }

    /// Whether voice input and spoken replies are available
    #[must_use]
    pub fn voice_capabilities(&self) -> (bool, bool) {
        (self.transcoder.can_transcribe(), self.transcoder.can_synthesize())
    }

    /// Handle a typed message
    pub async fn handle_text_turn(&self, text: &str) -> TurnResult {
        self.handle_turn(Turn::text(text)).await
    }

    /// Handle a recorded voice message
    pub async fn handle_audio_turn(&self, payload: AudioPayload) -> TurnResult {
        self.handle_turn(Turn::audio(payload)).await
    }

    /// Handle a voice message as delivered by the browser (base64 or data URL)
    pub async fn handle_base64_audio_turn(&self, encoded: &str, mime_type: Option<&str>) -> TurnResult {
        match AudioPayload::from_base64(encoded, mime_type) {
            Ok(payload) => self.handle_audio_turn(payload).await,
            Err(e) => {
                let turn_id = Uuid::new_v4();
                tracing::warn!(%turn_id, error = %e, "undecodable audio payload");
                TurnResult::fixed(turn_id, NOT_UNDERSTOOD, TurnOutcome::NotUnderstood)
            }
        }
    }

    /// Handle any turn
    pub async fn handle_turn(&self, turn: Turn) -> TurnResult {
        let span = tracing::info_span!(
            "turn",
            turn_id = %turn.id(),
            modality = match turn.input() {
                TurnInput::Text(_) => "text",
                TurnInput::Audio(_) => "audio",
            }
        );

        async move {
            let result = match turn.input() {
                TurnInput::Text(text) => self.text_turn(turn.id(), text).await,
                TurnInput::Audio(payload) => self.audio_turn(turn.id(), payload).await,
            };
            tracing::info!(outcome = ?result.outcome, has_audio = result.audio.is_some(), "turn complete");
            result
        }
        .instrument(span)
        .await
    }

    async fn text_turn(&self, turn_id: Uuid, text: &str) -> TurnResult {
        let Ok(request) = AssistantRequest::new(turn_id, text) else {
            return TurnResult::fixed(turn_id, NOTHING_TO_PROCESS, TurnOutcome::NothingToProcess);
        };

        match self.ask(request).await {
            Ok(reply) => TurnResult::answered(reply, None),
            Err(e) => Self::assistant_failure(turn_id, &e),
        }
    }

    async fn audio_turn(&self, turn_id: Uuid, payload: &AudioPayload) -> TurnResult {
        tracing::debug!(audio_bytes = payload.bytes().len(), mime = payload.mime_type(), "transcribing");

        let transcript = match self.transcoder.transcribe(payload).await {
            Ok(Transcript::Text(text)) => text,
            Ok(Transcript::Unintelligible) => {
                tracing::info!("no speech recognized");
                return TurnResult::fixed(turn_id, NOT_UNDERSTOOD, TurnOutcome::NotUnderstood);
            }
            Err(Error::Transcription(e)) if e.is_bad_input() => {
                tracing::warn!(error = %e, "unusable audio payload");
                return TurnResult::fixed(turn_id, NOT_UNDERSTOOD, TurnOutcome::NotUnderstood);
            }
            Err(e) => {
                tracing::error!(error = %e, kind = e.kind(), "transcription failed");
                return TurnResult::fixed(turn_id, VOICE_APOLOGY, TurnOutcome::Failed);
            }
        };

        let Ok(request) = AssistantRequest::new(turn_id, &transcript) else {
            return TurnResult::fixed(turn_id, NOT_UNDERSTOOD, TurnOutcome::NotUnderstood);
        };

        let reply = match self.ask(request).await {
            Ok(reply) => reply,
            Err(e) => return Self::assistant_failure(turn_id, &e),
        };

        let audio = match self.transcoder.synthesize(&reply.text).await {
            Ok(audio) => audio,
            Err(e) => {
                tracing::warn!(error = %e, kind = e.kind(), "synthesis failed, replying with text only");
                None
            }
        };

        TurnResult::answered(reply, audio)
    }

    /// Send a request, re-initializing a dead session first when the limiter allows
    async fn ask(&self, request: AssistantRequest) -> Result<AssistantReply> {
        match self.assistant.send(request.clone()).await {
            Err(Error::NotReady(state @ (SessionState::Failed | SessionState::Uninitialized)))
                if self.may_reconnect() =>
            {
                tracing::info!(%state, "re-initializing assistant session");
                self.assistant.initialize().await?;
                self.assistant.send(request).await
            }
            other => other,
        }
    }

    fn may_reconnect(&self) -> bool {
        self.reconnect
            .as_ref()
            .is_some_and(|limiter| limiter.check().is_ok())
    }

    fn assistant_failure(turn_id: Uuid, e: &Error) -> TurnResult {
        match e {
            Error::Backend { diagnostic, .. } => {
                tracing::error!(diagnostic = %diagnostic, "assistant backend reported failure");
            }
            other => tracing::error!(error = %other, kind = other.kind(), "assistant request failed"),
        }
        TurnResult::fixed(turn_id, APOLOGY, TurnOutcome::Failed)
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;

    struct EchoAssistant;

    #[async_trait]
    impl Assistant for EchoAssistant {
        async fn initialize(&self) -> Result<()> {
            Ok(())
        }

        async fn send(&self, request: AssistantRequest) -> Result<AssistantReply> {
            Ok(AssistantReply {
                turn_id: request.turn_id(),
                text: format!("you said {}", request.text()),
                latency: Duration::ZERO,
                success: true,
            })
        }

        fn state(&self) -> SessionState {
            SessionState::Ready
        }
    }

    struct NoVoice;

    #[async_trait]
    impl Transcoder for NoVoice {
        async fn transcribe(&self, _payload: &AudioPayload) -> Result<Transcript> {
            Err(crate::error::TranscriptionError::EngineUnavailable("off".into()).into())
        }

        async fn synthesize(&self, _text: &str) -> Result<Option<AudioRef>> {
            Ok(None)
        }

        fn can_transcribe(&self) -> bool {
            false
        }

        fn can_synthesize(&self) -> bool {
            false
        }
    }

    fn orchestrator() -> Orchestrator {
        Orchestrator::new(Arc::new(EchoAssistant), Arc::new(NoVoice))
    }

    #[tokio::test]
    async fn text_turn_uses_turn_id_of_request() {
        let turn = Turn::text("  hello  ");
        let id = turn.id();
        let result = orchestrator().handle_turn(turn).await;

        assert_eq!(result.turn_id, id);
        assert_eq!(result.text, "you said hello");
        assert_eq!(result.outcome, TurnOutcome::Answered);
    }

    #[tokio::test]
    async fn engine_outage_gets_voice_apology() {
        let payload = AudioPayload::new(vec![0x1A, 0x45, 0xDF, 0xA3], "audio/webm");
        let result = orchestrator().handle_audio_turn(payload).await;
        assert_eq!(result.text, VOICE_APOLOGY);
        assert_eq!(result.outcome, TurnOutcome::Failed);
    }

    #[tokio::test]
    async fn undecodable_base64_is_not_understood() {
        let result = orchestrator().handle_base64_audio_turn("%%%", None).await;
        assert_eq!(result.text, NOT_UNDERSTOOD);
        assert!(result.audio.is_none());
    }

    #[test]
    fn result_serializes_without_absent_audio() {
        let result = TurnResult::fixed(Uuid::nil(), NOTHING_TO_PROCESS, TurnOutcome::NothingToProcess);
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["outcome"], "nothing_to_process");
        assert_eq!(json["text"], NOTHING_TO_PROCESS);
        assert!(json.get("audio").is_none());
    }

    #[test]
    fn zero_reconnect_interval_disables_reconnect() {
        let orch = orchestrator().reconnect_interval(Duration::ZERO);
        assert!(!orch.may_reconnect());
    }
}
