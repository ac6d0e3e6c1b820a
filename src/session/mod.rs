//! Per-connection session orchestrator
//!
//! The session owns the state machine, the capture buffer, and the lifetime
//! of every per-turn task. All inbound frames funnel through `handle_frame`;
//! all outbound frames go through the single-writer queue in [`outbound`].
//! A new `AUDIO_START` while a turn is in flight cancels that turn and drops
//! its queued audio before the replacement utterance begins.

pub mod outbound;
pub mod state;
mod turn;

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::chunker::ChunkerConfig;
use crate::llm::{AckModel, ChatModel};
use crate::memory::MemoryHandle;
use crate::protocol::{AudioStartMeta, Frame, MessageType, SynthesizeRequest};
use crate::stt::Transcriber;
use crate::style::VoiceStyle;
use crate::tools::ToolRegistry;
use crate::tts::Synthesizer;
use crate::{Error, Result};

pub use outbound::{channel as outbound_channel, OutboundDrain, OutboundSender};
pub use state::{SessionEvent, SessionState};

use turn::{TurnContext, TURN_TIMEOUT};

/// Accepted range for client-declared capture sample rates
const SAMPLE_RATE_RANGE: std::ops::RangeInclusive<u32> = 8_000..=48_000;

/// External collaborators a session pipes between
pub struct Services {
    pub stt: Arc<dyn Transcriber>,
    pub tts: Arc<dyn Synthesizer>,
    pub ack: Arc<dyn AckModel>,
    pub chat: Arc<dyn ChatModel>,
    pub tools: Arc<ToolRegistry>,
    pub memory: MemoryHandle,
    /// Model identifier forwarded in main-layer requests
    pub chat_model: String,
}

/// Per-connection options resolved from query parameters and config
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub user_id: String,
    pub style: VoiceStyle,
    pub capture_max_seconds: u64,
    pub chunker: ChunkerConfig,
}

/// Shared view of the session state, writable from the turn task
#[derive(Clone)]
pub struct SharedState {
    inner: Arc<Mutex<SessionState>>,
}

impl SharedState {
    fn new() -> Self {
        Self { inner: Arc::new(Mutex::new(SessionState::Idle)) }
    }

    /// Current state
    #[must_use]
    pub fn get(&self) -> SessionState {
        *self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Apply an event; invalid events leave the state unchanged
    pub fn apply(&self, event: SessionEvent) -> SessionState {
        let mut guard = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(next) = guard.next(event) {
            if next != *guard {
                tracing::debug!(from = %*guard, to = %next, ?event, "state transition");
            }
            *guard = next;
        }
        *guard
    }

    /// Transitions defined by orchestration rules rather than the table
    /// (turn cancellation, direct synthesis)
    pub(crate) fn force(&self, state: SessionState) {
        let mut guard = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        *guard = state;
    }
}

/// One voice session, created per accepted socket
pub struct Session {
    id: String,
    options: SessionOptions,
    services: Arc<Services>,
    outbound: OutboundSender,
    state: SharedState,
    capture: Vec<u8>,
    sample_rate: u32,
    conversation_id: Arc<Mutex<Option<String>>>,
    cancel: CancellationToken,
    turn_cancel: Option<CancellationToken>,
    turn_task: Option<JoinHandle<()>>,
}

impl Session {
    #[must_use]
    pub fn new(services: Arc<Services>, options: SessionOptions, outbound: OutboundSender) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            options,
            services,
            outbound,
            state: SharedState::new(),
            capture: Vec::new(),
            sample_rate: 16_000,
            conversation_id: Arc::new(Mutex::new(None)),
            cancel: CancellationToken::new(),
            turn_cancel: None,
            turn_task: None,
        }
    }

    /// Current session state (for tests and introspection)
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state.get()
    }

    /// Token cancelling every task owned by this session
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run the session to completion: `READY`, then frames until the inbound
    /// channel closes or a protocol violation ends the connection.
    ///
    /// # Errors
    ///
    /// Returns the protocol error when the connection must close with 4002;
    /// all other failures are surfaced as `ERROR` frames and recovered.
    pub async fn run(mut self, mut inbound: mpsc::Receiver<Frame>) -> Result<()> {
        self.outbound.control(Frame::ready()).await?;
        tracing::info!(
            session_id = %self.id,
            user_id = %self.options.user_id,
            style = self.options.style.as_str(),
            "voice session connected"
        );

        let result = loop {
            let frame = tokio::select! {
                maybe = inbound.recv() => match maybe {
                    Some(frame) => frame,
                    None => break Ok(()),
                },
                () = self.cancel.cancelled() => break Ok(()),
            };

            if let Err(e) = self.handle_frame(frame).await {
                let _ = self
                    .outbound
                    .control(Frame::error(e.wire_code(), &client_message(&e)))
                    .await;

                if e.closes_connection() {
                    break Err(e);
                }

                tracing::warn!(session_id = %self.id, error = %e, "session error, recovering to idle");
                self.abort_turn();
                self.capture = Vec::new();
                self.state.apply(SessionEvent::FatalError);
            }
        };

        self.shutdown();
        tracing::info!(session_id = %self.id, "voice session closed");
        result
    }

    /// Dispatch one inbound frame
    async fn handle_frame(&mut self, frame: Frame) -> Result<()> {
        match frame.kind {
            MessageType::Ping => self.outbound.control(Frame::pong()).await,
            MessageType::AudioStart => self.on_audio_start(&frame),
            MessageType::AudioChunk => self.on_audio_chunk(&frame),
            MessageType::AudioEnd => self.on_audio_end(),
            MessageType::Synthesize => self.on_synthesize(&frame),
            other => Err(Error::Protocol(format!(
                "client may not send {} frames",
                other.as_str()
            ))),
        }
    }

    fn on_audio_start(&mut self, frame: &Frame) -> Result<()> {
        let meta: AudioStartMeta = if frame.payload.is_empty() {
            AudioStartMeta { sample_rate: 16_000, channels: 1 }
        } else {
            frame.json()?
        };

        if !SAMPLE_RATE_RANGE.contains(&meta.sample_rate) {
            return Err(Error::SampleRate(meta.sample_rate));
        }

        // Any in-flight turn dies now; queued audio of that turn never
        // reaches the wire
        if matches!(
            self.state.get(),
            SessionState::Processing | SessionState::Generating | SessionState::Speaking
        ) {
            tracing::debug!(session_id = %self.id, "barge-in, cancelling current turn");
            self.abort_turn();
            self.state.force(SessionState::Idle);
        }

        self.state.apply(SessionEvent::AudioStart);
        self.capture = Vec::new();
        self.sample_rate = meta.sample_rate;

        tracing::debug!(
            session_id = %self.id,
            sample_rate = meta.sample_rate,
            channels = meta.channels,
            "capture started"
        );
        Ok(())
    }

    fn on_audio_chunk(&mut self, frame: &Frame) -> Result<()> {
        if self.state.get() != SessionState::Listening {
            // Chunks legitimately trail AUDIO_END and barge-ins; drop them
            tracing::trace!(session_id = %self.id, "dropping audio chunk outside capture");
            return Ok(());
        }

        self.capture.extend_from_slice(&frame.payload);

        let max_bytes =
            self.sample_rate as usize * 2 * self.options.capture_max_seconds as usize;
        if self.capture.len() > max_bytes {
            return Err(Error::CaptureTooLong(format!(
                "utterance exceeded {} seconds",
                self.options.capture_max_seconds
            )));
        }
        Ok(())
    }

    fn on_audio_end(&mut self) -> Result<()> {
        if self.state.get() != SessionState::Listening {
            tracing::trace!(session_id = %self.id, "ignoring audio end outside capture");
            return Ok(());
        }

        self.state.apply(SessionEvent::AudioEnd);
        let pcm = Bytes::from(std::mem::take(&mut self.capture));
        tracing::debug!(session_id = %self.id, bytes = pcm.len(), "utterance complete");

        let ctx = self.turn_context(pcm);
        self.spawn_turn(|ctx| turn::run_turn(ctx), ctx);
        Ok(())
    }

    fn on_synthesize(&mut self, frame: &Frame) -> Result<()> {
        let request: SynthesizeRequest = frame.json()?;
        if self.state.get() != SessionState::Idle {
            tracing::warn!(session_id = %self.id, "synthesize ignored while busy");
            return Ok(());
        }
        if request.text.trim().is_empty() {
            return Err(Error::Protocol("synthesize with empty text".into()));
        }

        self.state.force(SessionState::Generating);
        let ctx = self.turn_context(Bytes::new());
        self.spawn_turn(move |ctx| turn::run_synthesize(ctx, request), ctx);
        Ok(())
    }

    fn turn_context(&mut self, pcm: Bytes) -> TurnContext {
        TurnContext {
            seq: self.outbound.begin_turn(),
            user_id: self.options.user_id.clone(),
            style: self.options.style,
            pcm,
            sample_rate: self.sample_rate,
            services: Arc::clone(&self.services),
            outbound: self.outbound.clone(),
            conversation_id: Arc::clone(&self.conversation_id),
            chunker: self.options.chunker,
            state: self.state.clone(),
        }
    }

    /// Spawn a turn future under the session's cancellation scope with the
    /// whole-turn timeout. Failures become a single `ERROR` frame and an
    /// idle reset; cancelled turns emit nothing further.
    fn spawn_turn<F, Fut>(&mut self, body: F, ctx: TurnContext)
    where
        F: FnOnce(TurnContext) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        let cancel = self.cancel.child_token();
        self.turn_cancel = Some(cancel.clone());

        let outbound = self.outbound.clone();
        let state = self.state.clone();
        let session_id = self.id.clone();

        self.turn_task = Some(tokio::spawn(async move {
            let result = tokio::select! {
                () = cancel.cancelled() => return,
                out = tokio::time::timeout(TURN_TIMEOUT, body(ctx)) => {
                    out.unwrap_or_else(|_| Err(Error::Model("turn exceeded its total budget".into())))
                }
            };

            if let Err(e) = result {
                tracing::warn!(session_id = %session_id, error = %e, "turn failed");
                let _ = outbound
                    .control(Frame::error(e.wire_code(), &client_message(&e)))
                    .await;
                state.apply(SessionEvent::FatalError);
            }
        }));
    }

    /// Cancel the in-flight turn and drop its queued frames
    fn abort_turn(&mut self) {
        if let Some(cancel) = self.turn_cancel.take() {
            cancel.cancel();
        }
        if let Some(task) = self.turn_task.take() {
            task.abort();
        }
        self.outbound.invalidate_live_turn();
    }

    fn shutdown(&mut self) {
        self.state.apply(SessionEvent::SocketClose);
        self.cancel.cancel();
        if let Some(task) = self.turn_task.take() {
            task.abort();
        }
    }
}

/// What the client is told. Internal details stay in the logs.
fn client_message(error: &Error) -> String {
    if error.wire_code() == "INTERNAL" {
        "internal error".to_string()
    } else {
        error.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_state_applies_valid_transitions() {
        let state = SharedState::new();
        assert_eq!(state.get(), SessionState::Idle);

        state.apply(SessionEvent::AudioStart);
        assert_eq!(state.get(), SessionState::Listening);

        // Invalid event leaves the state alone
        state.apply(SessionEvent::FirstAudio);
        assert_eq!(state.get(), SessionState::Listening);
    }

    #[test]
    fn client_messages_redact_internal_errors() {
        assert_eq!(client_message(&Error::Internal("channel closed".into())), "internal error");
        assert!(client_message(&Error::Stt("whisper down".into())).contains("whisper down"));
    }
}
