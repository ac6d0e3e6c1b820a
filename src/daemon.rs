//! Daemon - the gateway service
//!
//! Serves the single WebSocket endpoint, adapts socket messages to the
//! session's frame representation (binary or JSON fallback), and runs the
//! background sweep that expires old conversation turns.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::config::{Config, SessionConfig};
use crate::llm::{HttpAckModel, HttpChatModel};
use crate::memory::{self, MemoryHandle};
use crate::protocol::{json, Frame};
use crate::session::{outbound_channel, Services, Session, SessionOptions};
use crate::stt::HttpTranscriber;
use crate::style::VoiceStyle;
use crate::tools::{DomainLookup, HttpDomainGateway, ToolRegistry};
use crate::tts::HttpSynthesizer;
use crate::{ChunkerConfig, Error, Result};

/// Close code when the `userId` query parameter is missing
const CLOSE_MISSING_USER_ID: u16 = 4001;

/// Close code for protocol violations
const CLOSE_PROTOCOL: u16 = 4002;

/// Interval of the expired-turn sweep
const SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

/// The voice gateway daemon
pub struct Daemon {
    config: Config,
    services: Arc<Services>,
}

/// Shared router state
struct AppState {
    services: Arc<Services>,
    session_config: SessionConfig,
}

impl Daemon {
    /// Create a daemon: open the memory store and wire up the upstream
    /// adapters.
    ///
    /// # Errors
    ///
    /// Returns error if the memory store cannot be initialized
    pub fn new(config: Config) -> Result<Self> {
        let pool = memory::init(&config.memory.db_path)?;
        let handle = MemoryHandle::new(pool, config.memory.conversation_ttl_hours);
        tracing::info!(path = %config.memory.db_path.display(), "memory store ready");

        let domain: Option<Arc<dyn DomainLookup>> = config
            .upstream
            .domain_api_endpoint
            .clone()
            .map(|url| Arc::new(HttpDomainGateway::new(url)) as Arc<dyn DomainLookup>);
        if domain.is_none() {
            tracing::info!("no domain API configured; wallet and fleet tools will degrade");
        }

        let tools = Arc::new(ToolRegistry::new(handle.clone(), domain));

        let services = Arc::new(Services {
            stt: Arc::new(HttpTranscriber::new(config.upstream.stt_endpoint.clone())),
            tts: Arc::new(HttpSynthesizer::new(config.upstream.tts_endpoint.clone())),
            ack: Arc::new(HttpAckModel::new(
                config.upstream.llm_fast_endpoint.clone(),
                config.upstream.llm_fast_model.clone(),
            )),
            chat: Arc::new(HttpChatModel::new(config.upstream.llm_main_endpoint.clone())),
            tools,
            memory: handle,
            chat_model: config.upstream.llm_main_model.clone(),
        });

        Ok(Self { config, services })
    }

    /// Run until interrupted
    ///
    /// # Errors
    ///
    /// Returns error if the listener cannot bind or the server fails
    pub async fn run(self) -> Result<()> {
        let sweeper = self.services.memory.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                interval.tick().await;
                if let Err(e) = sweeper.cleanup_expired() {
                    tracing::warn!(error = %e, "conversation sweep failed");
                }
            }
        });

        let app = router(Arc::clone(&self.services), self.config.session.clone());
        let listener = tokio::net::TcpListener::bind(&self.config.ws_addr).await?;
        tracing::info!(addr = %self.config.ws_addr, "voice gateway listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| Error::Internal(format!("server error: {e}")))?;

        Ok(())
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}

/// Build the gateway router
#[must_use]
pub fn router(services: Arc<Services>, session_config: SessionConfig) -> Router {
    Router::new()
        .route("/ws/voice", get(ws_upgrade))
        .with_state(Arc::new(AppState { services, session_config }))
}

/// Query parameters on the WebSocket URL
#[derive(Debug, Deserialize)]
struct WsQuery {
    #[serde(rename = "userId")]
    user_id: Option<String>,
    /// `true` opts into the binary codec; default is the JSON fallback
    binary: Option<String>,
    /// Voice style name; defaults to `normal`
    style: Option<String>,
}

async fn ws_upgrade(
    State(state): State<Arc<AppState>>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, query))
}

/// Bridge one socket to a session: reader decodes client messages into
/// frames, the single writer encodes outbound frames in the session's mode.
async fn handle_socket(mut socket: WebSocket, state: Arc<AppState>, query: WsQuery) {
    let Some(user_id) = query.user_id.filter(|id| !id.is_empty()) else {
        tracing::warn!("rejecting connection without userId");
        let _ = socket
            .send(Message::Close(Some(CloseFrame {
                code: CLOSE_MISSING_USER_ID,
                reason: "missing userId".into(),
            })))
            .await;
        return;
    };

    let binary_mode = Arc::new(AtomicBool::new(
        query
            .binary
            .as_deref()
            .is_some_and(|b| b.eq_ignore_ascii_case("true")),
    ));
    let style = VoiceStyle::from_name(query.style.as_deref().unwrap_or_default());

    let (mut sink, mut source) = socket.split();
    let (out_tx, mut drain) = outbound_channel(state.session_config.outbound_queue_capacity);
    let (in_tx, in_rx) = mpsc::channel::<Frame>(64);

    // Single writer: encodes in whichever mode the session is in
    let writer_mode = Arc::clone(&binary_mode);
    let writer = tokio::spawn(async move {
        while let Some(frame) = drain.next().await {
            let message = if writer_mode.load(Ordering::Relaxed) {
                Message::Binary(frame.encode())
            } else {
                match json::encode_server_frame(&frame) {
                    Ok(text) => Message::Text(text.into()),
                    Err(e) => {
                        tracing::warn!(error = %e, "unencodable outbound frame");
                        continue;
                    }
                }
            };
            if sink.send(message).await.is_err() {
                break;
            }
        }
        sink
    });

    let options = SessionOptions {
        user_id,
        style,
        capture_max_seconds: state.session_config.capture_max_seconds,
        chunker: ChunkerConfig::with_mode(state.session_config.chunk_mode_default),
    };
    let session = Session::new(Arc::clone(&state.services), options, out_tx.clone());
    let session_task = tokio::spawn(session.run(in_rx));

    // Reader: decode client messages. A client that starts sending binary
    // frames flips the session into binary mode even without the query
    // parameter.
    let mut reader_error: Option<Error> = None;
    while let Some(Ok(message)) = source.next().await {
        let decoded = match message {
            Message::Binary(data) => {
                binary_mode.store(true, Ordering::Relaxed);
                Frame::parse(data)
            }
            Message::Text(text) => json::decode_client_text(&text),
            Message::Close(_) => break,
            // axum answers transport pings itself
            Message::Ping(_) | Message::Pong(_) => continue,
        };

        match decoded {
            Ok(frame) => {
                if in_tx.send(frame).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                let _ = out_tx
                    .control(Frame::error(e.wire_code(), &e.to_string()))
                    .await;
                reader_error = Some(e);
                break;
            }
        }
    }

    drop(in_tx);
    let session_result = session_task.await;
    drop(out_tx);

    // The queue is drained before the writer returns the sink, so any ERROR
    // frame is flushed before the close frame goes out
    let protocol_violation = reader_error.is_some()
        || matches!(&session_result, Ok(Err(e)) if e.closes_connection());

    if let Ok(mut sink) = writer.await {
        let close = if protocol_violation {
            Some(CloseFrame {
                code: CLOSE_PROTOCOL,
                reason: "protocol violation".into(),
            })
        } else {
            None
        };
        let _ = sink.send(Message::Close(close)).await;
    }
}
