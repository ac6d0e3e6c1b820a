//! One utterance, end to end
//!
//! `run_turn` drives capture bytes through STT, overlaps the fast
//! acknowledgment pipeline with the main model stream, feeds chunked text to
//! TTS, and closes the turn out with `AUDIO_END` and `DONE`. The main
//! pipeline may not push audio until the fast pipeline has either pushed its
//! last chunk or declared it has none.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;

use super::state::SessionEvent;
use super::{Services, SharedState};
use crate::chunker::{ChunkerConfig, TextChunker};
use crate::llm::client::PendingToolCall;
use crate::llm::{fast, ChatEvent, ChatMessage, ChatRequest, FunctionCall, ToolCall};
use crate::memory::TurnRole;
use crate::prompt::{
    build_system_prompt, prime_user_message, UserMemoryContext, CONTEXT_ENTITY_LIMIT,
    CONTEXT_TURN_LIMIT,
};
use crate::protocol::{Frame, SynthesizeRequest};
use crate::session::outbound::OutboundSender;
use crate::style::{Prosody, VoiceStyle};
use crate::tts::DEFAULT_SAMPLE_RATE;
use crate::{Error, Result};

/// Whole-turn ceiling, transcript to `DONE`
pub(crate) const TURN_TIMEOUT: Duration = Duration::from_secs(60);

/// Budget for the main model's first streamed event
const FIRST_TOKEN_TIMEOUT: Duration = Duration::from_secs(15);

/// Budget for each synthesized audio chunk
const TTS_CHUNK_TIMEOUT: Duration = Duration::from_secs(10);

/// Cap on tool-call rounds per turn
const MAX_TOOL_ROUNDS: usize = 10;

/// Max tokens requested from the main model
const MAX_TOKENS: u32 = 1024;

/// Everything a turn needs, detached from the session's read loop
pub(crate) struct TurnContext {
    pub seq: u64,
    pub user_id: String,
    pub style: VoiceStyle,
    pub pcm: Bytes,
    pub sample_rate: u32,
    pub services: Arc<Services>,
    pub outbound: OutboundSender,
    pub conversation_id: Arc<Mutex<Option<String>>>,
    pub chunker: ChunkerConfig,
    pub state: SharedState,
}

/// Audio bookkeeping for one turn: whether `AUDIO_START` went out and how
/// much PCM followed it
#[derive(Default)]
struct TurnAudio {
    started: AtomicBool,
    bytes: AtomicUsize,
    sample_rate: AtomicU32,
}

impl TurnAudio {
    /// Returns true exactly once, for the caller that must announce the
    /// stream
    fn mark_started(&self) -> bool {
        !self.started.swap(true, Ordering::SeqCst)
    }

    fn started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    fn record(&self, len: usize, sample_rate: u32) {
        self.bytes.fetch_add(len, Ordering::SeqCst);
        self.sample_rate.store(sample_rate, Ordering::SeqCst);
    }

    fn duration_seconds(&self) -> f64 {
        let rate = self.sample_rate.load(Ordering::SeqCst).max(1);
        // 16-bit mono: two bytes per sample
        #[allow(clippy::cast_precision_loss)]
        let samples = self.bytes.load(Ordering::SeqCst) as f64 / 2.0;
        samples / f64::from(rate)
    }
}

/// Run one full turn. The caller owns cancellation and the turn-level
/// timeout; everything here is free to be dropped mid-await.
pub(crate) async fn run_turn(ctx: TurnContext) -> Result<()> {
    let transcript = ctx
        .services
        .stt
        .transcribe(&ctx.pcm, ctx.sample_rate)
        .await?;

    for partial in &transcript.partials {
        ctx.outbound
            .turn(ctx.seq, Frame::transcription(partial, false))
            .await?;
    }

    let text = transcript.text.trim().to_string();
    if text.is_empty() {
        tracing::debug!(session_seq = ctx.seq, "silent utterance");
        ctx.state.apply(SessionEvent::SttEmpty);
        ctx.outbound.turn(ctx.seq, Frame::done()).await?;
        return Ok(());
    }

    ctx.outbound
        .turn(ctx.seq, Frame::transcription(&text, true))
        .await?;
    ctx.state.apply(SessionEvent::SttFinal);

    let audio = TurnAudio::default();
    let ack_planned = fast::needs_acknowledgment(&text, ctx.style);
    let (ack_done_tx, ack_done_rx) = oneshot::channel();
    let (chunk_tx, chunk_rx) = mpsc::channel::<String>(32);

    let fast_fut = fast_pipeline(&ctx, &text, &audio, ack_done_tx);
    let main_fut = main_pipeline(&ctx, &text, ack_planned, chunk_tx);
    let drain_fut = tts_drain(&ctx, chunk_rx, ack_done_rx, &audio);

    let ((), main_result, drain_result) = tokio::join!(fast_fut, main_fut, drain_fut);
    drain_result?;
    let answer = main_result?;

    if let Err(e) = persist_turn(&ctx, &text, &answer).await {
        tracing::warn!(error = %e, "failed to persist conversation turn");
    }

    if audio.started() {
        ctx.outbound
            .turn(ctx.seq, Frame::audio_end(audio.duration_seconds()))
            .await?;
    }
    ctx.outbound.turn(ctx.seq, Frame::done()).await?;
    ctx.state.apply(SessionEvent::TurnComplete);

    Ok(())
}

/// Direct synthesis: client-provided text straight to TTS, no models
pub(crate) async fn run_synthesize(ctx: TurnContext, request: SynthesizeRequest) -> Result<()> {
    let audio = TurnAudio::default();
    let prosody = Prosody {
        speech_rate: request.speech_rate,
        exaggeration: request.exaggeration,
    };

    let mut chunker = TextChunker::new(ctx.chunker);
    let mut chunks = chunker.push(&request.text);
    chunks.extend(chunker.finish());

    for chunk in chunks {
        synth_and_enqueue(&ctx, &chunk, prosody, &audio, false).await?;
    }

    if audio.started() {
        ctx.outbound
            .turn(ctx.seq, Frame::audio_end(audio.duration_seconds()))
            .await?;
    }
    ctx.state.apply(SessionEvent::TurnComplete);
    Ok(())
}

/// Fast path: resolve the acknowledgment and push its audio first. Failures
/// degrade to silence; the main answer is still coming either way. The done
/// signal fires on every exit path, or the main pipeline would wait forever.
async fn fast_pipeline(
    ctx: &TurnContext,
    transcript: &str,
    audio: &TurnAudio,
    done: oneshot::Sender<()>,
) {
    let result: Result<()> = async {
        let Some(ack) =
            fast::resolve_acknowledgment(transcript, ctx.style, &*ctx.services.ack).await
        else {
            return Ok(());
        };

        tracing::debug!(text = %ack.text, intent = %ack.intent, "speaking acknowledgment");

        let mut chunker = TextChunker::new(ctx.chunker);
        let mut chunks = chunker.push(&ack.text);
        chunks.extend(chunker.finish());

        for chunk in chunks {
            synth_and_enqueue(ctx, &chunk, ctx.style.prosody(), audio, true).await?;
        }
        Ok(())
    }
    .await;

    if let Err(e) = result {
        tracing::warn!(error = %e, "acknowledgment pipeline failed; continuing without it");
    }
    let _ = done.send(());
}

/// Main path: build the prompt from memory, stream the model with its tool
/// loop, forward text deltas to the wire, and hand chunker output to the
/// TTS drain. Returns the full answer text.
async fn main_pipeline(
    ctx: &TurnContext,
    transcript: &str,
    ack_planned: bool,
    chunk_tx: mpsc::Sender<String>,
) -> Result<String> {
    let memory = &ctx.services.memory;
    let context = UserMemoryContext {
        entities: memory
            .recent_entities(&ctx.user_id, CONTEXT_ENTITY_LIMIT)
            .await
            .unwrap_or_default(),
        summary: memory
            .fresh_summary(&ctx.user_id)
            .await
            .ok()
            .flatten()
            .map(|s| s.summary),
        recent_turns: memory
            .recent_turns(&ctx.user_id, CONTEXT_TURN_LIMIT)
            .await
            .unwrap_or_default(),
    };

    let system = build_system_prompt(&context, ctx.style);
    let mut messages = vec![
        ChatMessage::system(&system),
        ChatMessage::user(&prime_user_message(transcript, ack_planned)),
    ];
    let tools = ctx.services.tools.descriptors();

    let mut chunker = TextChunker::new(ctx.chunker);
    let mut answer = String::new();
    let mut first_event_seen = false;

    for round in 0..MAX_TOOL_ROUNDS {
        let request = ChatRequest {
            model: ctx.services.chat_model.clone(),
            messages: messages.clone(),
            stream: true,
            tools: Some(tools.clone()),
            conversation: ctx
                .conversation_id
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .clone(),
            max_tokens: MAX_TOKENS,
        };

        let mut stream = ctx.services.chat.stream_chat(&request).await?;
        let mut round_text = String::new();
        let mut pending: Vec<PendingToolCall> = Vec::new();
        let mut finish_reason = None;

        loop {
            let next = if first_event_seen {
                stream.next().await
            } else {
                match timeout(FIRST_TOKEN_TIMEOUT, stream.next()).await {
                    Ok(item) => {
                        first_event_seen = true;
                        item
                    }
                    Err(_) => {
                        return Err(Error::Model(
                            "main model produced no output within the first-token budget".into(),
                        ))
                    }
                }
            };
            let Some(event) = next else { break };
            let event = event?;

            if PendingToolCall::absorb(&mut pending, &event) {
                continue;
            }

            match event {
                ChatEvent::ContentDelta(delta) => {
                    ctx.outbound.turn(ctx.seq, Frame::llm_chunk(&delta)).await?;
                    round_text.push_str(&delta);
                    for chunk in chunker.push(&delta) {
                        // A closed drain means the audio side already failed;
                        // keep streaming text and let join surface its error
                        let _ = chunk_tx.send(chunk).await;
                    }
                }
                ChatEvent::ConversationId(id) => {
                    *ctx.conversation_id
                        .lock()
                        .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(id);
                }
                ChatEvent::Done { finish_reason: reason } => {
                    finish_reason = reason;
                    break;
                }
                ChatEvent::ToolCallStart { .. } | ChatEvent::ToolCallDelta { .. } => {}
            }
        }

        answer.push_str(&round_text);

        if finish_reason.as_deref() == Some("tool_calls") && !pending.is_empty() {
            tracing::debug!(round, calls = pending.len(), "executing tool round");

            let tool_calls: Vec<ToolCall> = pending
                .iter()
                .map(|call| ToolCall {
                    id: call.id.clone(),
                    function: FunctionCall {
                        name: call.name.clone(),
                        arguments: call.arguments.clone(),
                    },
                })
                .collect();
            let content = if round_text.is_empty() { None } else { Some(round_text) };
            messages.push(ChatMessage::assistant_tool_calls(content, tool_calls));

            for call in &pending {
                let output = match ctx
                    .services
                    .tools
                    .execute(&ctx.user_id, &call.name, &call.arguments)
                    .await
                {
                    Ok(output) => output,
                    // Tool failures go back to the model as text; it may
                    // retry or apologize, the session stays up
                    Err(e) => format!("Error: {e}"),
                };
                messages.push(ChatMessage::tool(&call.id, &output));
            }
            continue;
        }

        break;
    }

    if let Some(residual) = chunker.finish() {
        let _ = chunk_tx.send(residual).await;
    }

    Ok(answer)
}

/// Serial TTS drain for main-answer chunks. Holds main audio back until the
/// acknowledgment pipeline signals it is done enqueuing (or declined).
async fn tts_drain(
    ctx: &TurnContext,
    mut chunk_rx: mpsc::Receiver<String>,
    ack_done: oneshot::Receiver<()>,
    audio: &TurnAudio,
) -> Result<()> {
    let _ = ack_done.await;

    while let Some(chunk) = chunk_rx.recv().await {
        synth_and_enqueue(ctx, &chunk, ctx.style.prosody(), audio, false).await?;
    }
    Ok(())
}

/// Synthesize one text chunk and enqueue its audio in generation order,
/// announcing the stream on the first chunk of the turn
async fn synth_and_enqueue(
    ctx: &TurnContext,
    text: &str,
    prosody: Prosody,
    audio: &TurnAudio,
    is_ack: bool,
) -> Result<()> {
    let mut stream = ctx.services.tts.synthesize(text, prosody).await?;

    loop {
        let chunk = match timeout(TTS_CHUNK_TIMEOUT, stream.next()).await {
            Err(_) => return Err(Error::Tts("synthesis chunk timed out".into())),
            Ok(None) => break,
            Ok(Some(item)) => item?,
        };
        if chunk.pcm.is_empty() {
            continue;
        }

        if audio.mark_started() {
            let rate = if chunk.sample_rate == 0 { DEFAULT_SAMPLE_RATE } else { chunk.sample_rate };
            ctx.state.apply(SessionEvent::FirstAudio);
            ctx.outbound.turn(ctx.seq, Frame::audio_start(rate)).await?;
        }

        audio.record(chunk.pcm.len(), chunk.sample_rate);
        ctx.outbound
            .turn(ctx.seq, Frame::tts_audio(chunk.pcm, is_ack))
            .await?;
    }

    Ok(())
}

/// Append the completed exchange to the conversation ring. Barged-in turns
/// never get here, so half-spoken answers stay out of history.
async fn persist_turn(ctx: &TurnContext, transcript: &str, answer: &str) -> Result<()> {
    let memory = &ctx.services.memory;
    memory
        .append_turn(&ctx.user_id, TurnRole::User, transcript)
        .await?;
    if !answer.is_empty() {
        memory
            .append_turn(&ctx.user_id, TurnRole::Assistant, answer)
            .await?;
    }
    Ok(())
}
