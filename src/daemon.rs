//! Daemon - the main gateway service
//!
//! Wires configuration into the assistant session, the speech engines and the
//! orchestrator, then serves the web UI until interrupted.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::api::ApiServerBuilder;
use crate::assistant::{Assistant, AssistantClient, McpTransport, SessionState};
use crate::orchestrator::Orchestrator;
use crate::transcoder::{AudioStore, TranscoderGateway};
use crate::{Config, Result};

/// The casabot daemon
pub struct Daemon {
    config: Config,
    assistant: Arc<AssistantClient>,
    transcoder: Arc<TranscoderGateway>,
    orchestrator: Arc<Orchestrator>,
}

impl Daemon {
    /// Build all components from configuration; no network traffic yet
    #[must_use]
    pub fn new(config: Config) -> Self {
        let transport = Arc::new(McpTransport::from_config(&config.assistant));
        let assistant = Arc::new(
            AssistantClient::new(transport)
                .request_timeout(config.assistant.request_timeout)
                .handshake_timeout(config.assistant.handshake_timeout),
        );

        let store = AudioStore::new(config.voice.audio_ttl);
        let transcoder = Arc::new(TranscoderGateway::from_config(&config.voice, &config.api_keys, store));

        let orchestrator = Arc::new(
            Orchestrator::new(assistant.clone(), transcoder.clone())
                .reconnect_interval(config.assistant.reconnect_interval),
        );

        Self {
            config,
            assistant,
            transcoder,
            orchestrator,
        }
    }

    #[must_use]
    pub fn orchestrator(&self) -> Arc<Orchestrator> {
        self.orchestrator.clone()
    }

    #[must_use]
    pub const fn assistant(&self) -> &Arc<AssistantClient> {
        &self.assistant
    }

    #[must_use]
    pub const fn transcoder(&self) -> &Arc<TranscoderGateway> {
        &self.transcoder
    }

    /// Perform the backend handshake, logging the outcome
    ///
    /// # Errors
    ///
    /// Returns error if the session could not be established
    pub async fn connect(&self) -> Result<SessionState> {
        let url = self.config.assistant.url.as_str();
        match self.assistant.initialize().await {
            Ok(()) => {
                let info = self.assistant.session_info().await.unwrap_or_default();
                tracing::info!(
                    url,
                    server = info.server_name.as_deref().unwrap_or("unknown"),
                    protocol = info.protocol_version.as_deref().unwrap_or("unknown"),
                    "assistant session ready"
                );
                Ok(self.assistant.state())
            }
            Err(e) => {
                tracing::error!(url, error = %e, "assistant handshake failed");
                Err(e)
            }
        }
    }

    /// Run the daemon until interrupted
    ///
    /// # Errors
    ///
    /// Returns error if the API server cannot bind or fails while serving
    pub async fn run(self) -> Result<()> {
        let (stt, tts) = self.orchestrator.voice_capabilities();
        tracing::info!(
            host = %self.config.server.host,
            port = self.config.server.port,
            assistant = %self.config.assistant.url,
            stt,
            tts,
            "daemon running"
        );

        // Serve immediately; turns answer with an apology until the session is up
        let assistant = self.assistant.clone();
        let url = self.config.assistant.url.to_string();
        tokio::spawn(async move {
            if let Err(e) = assistant.initialize().await {
                tracing::error!(url = %url, error = %e, "assistant handshake failed, will retry on demand");
            }
        });

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutdown requested");
                let _ = shutdown_tx.send(()).await;
            }
        });

        let server = ApiServerBuilder::new(
            self.orchestrator.clone(),
            self.assistant.clone(),
            self.transcoder.store().clone(),
        )
        .host(self.config.server.host.clone())
        .port(self.config.server.port)
        .static_dir(self.config.server.static_dir.clone())
        .rate_limit(self.config.server.rate_limit_rpm)
        .build();

        let served = server
            .run_until(async move {
                shutdown_rx.recv().await;
            })
            .await;

        self.assistant.shutdown().await;
        tracing::info!("daemon stopped");

        served
    }
}
