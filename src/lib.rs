//! Casabot - voice and text chat gateway for a Home Assistant backend
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                   Web UI / CLI                       │
//! │      /api/chat  │  /api/chat/audio  │  /api/audio   │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                  Orchestrator                        │
//! │   one turn: transcribe → ask → synthesize            │
//! └──────────┬─────────────────────────────┬────────────┘
//!            │                             │
//! ┌──────────▼───────────┐   ┌─────────────▼────────────┐
//! │  Transcoder Gateway  │   │     Assistant Client      │
//! │  STT  │  TTS  │ clips│   │  MCP session (JSON-RPC)   │
//! └──────────────────────┘   └──────────────────────────┘
//! ```

pub mod api;
pub mod assistant;
pub mod config;
pub mod daemon;
pub mod error;
pub mod orchestrator;
pub mod transcoder;
pub mod voice;

pub use assistant::{Assistant, AssistantClient, AssistantReply, AssistantRequest, SessionState};
pub use config::Config;
pub use daemon::Daemon;
pub use error::{Error, Result, TranscriptionError};
pub use orchestrator::{Orchestrator, Turn, TurnInput, TurnOutcome, TurnResult};
pub use transcoder::{AudioPayload, AudioRef, AudioStore, Transcoder, TranscoderGateway, Transcript};
