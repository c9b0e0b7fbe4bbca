//! Shared test utilities
#![allow(dead_code)]

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use casabot::assistant::{
    Assistant, AssistantClient, AssistantReply, AssistantRequest, AssistantTransport, SessionInfo,
    SessionState,
};
use casabot::transcoder::{AudioStore, SpeechRecognizer, SpeechSynthesizer, TranscoderGateway};
use casabot::{Error, Orchestrator, Result};

/// Bytes that sniff as an MP3 frame
pub const MP3_CLIP: &[u8] = &[0xFF, 0xFB, 0x90, 0x64, 0x00, 0x00];

/// Build a mono 16 kHz WAV recording from samples
#[must_use]
pub fn wav_bytes(samples: &[i16]) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 16_000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).expect("wav writer");
        for s in samples {
            writer.write_sample(*s).expect("write sample");
        }
        writer.finalize().expect("finalize wav");
    }
    cursor.into_inner()
}

/// Half a second of a quiet tone
#[must_use]
pub fn speech_wav() -> Vec<u8> {
    let samples: Vec<i16> = (0..8000).map(|i| if i % 20 < 10 { 800 } else { -800 }).collect();
    wav_bytes(&samples)
}

/// How the fake backend answers a delivered request
#[derive(Debug, Clone, Copy)]
pub enum Backend {
    /// Reply with "echo: <text>"
    Echo,
    /// Always reply with this text
    Reply(&'static str),
    /// Backend reports an application error
    Failing,
    /// Transport drops mid-exchange
    Disconnect,
}

/// In-memory assistant with call counters
pub struct StubAssistant {
    state: Mutex<SessionState>,
    backend: Backend,
    handshake_ok: bool,
    pub sends: AtomicUsize,
    pub exchanges: AtomicUsize,
    pub initializations: AtomicUsize,
}

impl StubAssistant {
    #[must_use]
    pub fn ready(backend: Backend) -> Arc<Self> {
        Arc::new(Self::with_state(SessionState::Ready, backend, true))
    }

    /// Session in `state`; re-initialization succeeds only if `handshake_ok`
    #[must_use]
    pub fn in_state(state: SessionState, backend: Backend, handshake_ok: bool) -> Arc<Self> {
        Arc::new(Self::with_state(state, backend, handshake_ok))
    }

    fn with_state(state: SessionState, backend: Backend, handshake_ok: bool) -> Self {
        Self {
            state: Mutex::new(state),
            backend,
            handshake_ok,
            sends: AtomicUsize::new(0),
            exchanges: AtomicUsize::new(0),
            initializations: AtomicUsize::new(0),
        }
    }

    pub fn sends(&self) -> usize {
        self.sends.load(Ordering::SeqCst)
    }

    pub fn exchanges(&self) -> usize {
        self.exchanges.load(Ordering::SeqCst)
    }

    pub fn initializations(&self) -> usize {
        self.initializations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Assistant for StubAssistant {
    async fn initialize(&self) -> Result<()> {
        self.initializations.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        if self.handshake_ok {
            *state = SessionState::Ready;
            Ok(())
        } else {
            *state = SessionState::Failed;
            Err(Error::Connection("connection refused".into()))
        }
    }

    async fn send(&self, request: AssistantRequest) -> Result<AssistantReply> {
        self.sends.fetch_add(1, Ordering::SeqCst);
        let state = *self.state.lock().unwrap();
        if state != SessionState::Ready {
            return Err(Error::NotReady(state));
        }
        self.exchanges.fetch_add(1, Ordering::SeqCst);

        let text = match self.backend {
            Backend::Echo => format!("echo: {}", request.text()),
            Backend::Reply(text) => text.to_string(),
            Backend::Failing => return Err(Error::backend("tool raised: intent not matched")),
            Backend::Disconnect => {
                *self.state.lock().unwrap() = SessionState::Failed;
                return Err(Error::Connection("connection reset by peer".into()));
            }
        };

        Ok(AssistantReply {
            turn_id: request.turn_id(),
            text,
            latency: Duration::from_millis(5),
            success: true,
        })
    }

    fn state(&self) -> SessionState {
        *self.state.lock().unwrap()
    }
}

/// What the fake speech engine hears
#[derive(Debug, Clone, Copy)]
pub enum Hearing {
    Words(&'static str),
    Silence,
    Offline,
    Hang,
}

/// Fake speech-to-text engine
pub struct StubRecognizer {
    hearing: Hearing,
    pub calls: AtomicUsize,
}

impl StubRecognizer {
    #[must_use]
    pub fn new(hearing: Hearing) -> Arc<Self> {
        Arc::new(Self {
            hearing,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SpeechRecognizer for StubRecognizer {
    async fn recognize(&self, _audio: &[u8], _mime_type: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.hearing {
            Hearing::Words(text) => Ok(text.to_string()),
            Hearing::Silence => Ok("  ".to_string()),
            Hearing::Offline => Err(Error::Connection("stt service unreachable".into())),
            Hearing::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(String::new())
            }
        }
    }
}

/// Fake text-to-speech engine
pub struct StubSynthesizer {
    working: bool,
    pub calls: AtomicUsize,
}

impl StubSynthesizer {
    #[must_use]
    pub fn new(working: bool) -> Arc<Self> {
        Arc::new(Self {
            working,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SpeechSynthesizer for StubSynthesizer {
    async fn speak(&self, _text: &str) -> Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.working {
            Ok(MP3_CLIP.to_vec())
        } else {
            Err(Error::Synthesis("tts quota exceeded".into()))
        }
    }

    fn mime_type(&self) -> &'static str {
        "audio/mpeg"
    }
}

/// Gateway over the given fake engines with short timeouts
#[must_use]
pub fn gateway(recognizer: Option<Arc<StubRecognizer>>, synthesizer: Option<Arc<StubSynthesizer>>) -> TranscoderGateway {
    let mut gateway = TranscoderGateway::new(AudioStore::new(Duration::from_secs(60)))
        .timeouts(Duration::from_secs(5), Duration::from_secs(5));
    if let Some(r) = recognizer {
        gateway = gateway.recognizer(r);
    }
    if let Some(s) = synthesizer {
        gateway = gateway.synthesizer(s);
    }
    gateway
}

/// Orchestrator over a stub assistant and a gateway
#[must_use]
pub fn orchestrator(assistant: Arc<dyn Assistant>, gateway: TranscoderGateway) -> Orchestrator {
    Orchestrator::new(assistant, Arc::new(gateway))
}

/// Transport that echoes after a per-message delay and records overlap
pub struct EchoTransport {
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub order: Mutex<Vec<String>>,
}

impl EchoTransport {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            order: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl AssistantTransport for EchoTransport {
    async fn handshake(&self) -> Result<SessionInfo> {
        Ok(SessionInfo {
            session_id: Some("echo-session".into()),
            ..SessionInfo::default()
        })
    }

    async fn exchange(&self, _session: &SessionInfo, text: &str) -> Result<String> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.order.lock().unwrap().push(text.to_string());

        // Later messages answer faster, so overlap would reorder replies
        let delay = 50u64.saturating_sub(text.len() as u64 * 3);
        tokio::time::sleep(Duration::from_millis(delay)).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(format!("echo: {text}"))
    }
}

/// Ready client over an [`EchoTransport`]
pub async fn echo_client(transport: Arc<EchoTransport>) -> Arc<AssistantClient> {
    let client = Arc::new(AssistantClient::new(transport));
    client.initialize().await.expect("echo handshake");
    client
}
