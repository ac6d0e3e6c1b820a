//! Outbound frame queue and the single-writer contract
//!
//! Every producer in a session submits frames here; one drain task owns the
//! socket, so outbound frames are totally ordered. Frames belonging to a
//! turn carry its sequence number: when a barge-in invalidates the turn,
//! already-queued audio is dropped at the drain instead of reaching the
//! wire.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::protocol::Frame;
use crate::{Error, Result};

/// How long a producer may wait for queue space before the turn is aborted
const SEND_WAIT: Duration = Duration::from_secs(2);

/// A queued outbound item
#[derive(Debug)]
enum Outbound {
    /// Always delivered (READY, PONG, ERROR)
    Control(Frame),
    /// Delivered only while `seq` is still the live turn
    Turn { seq: u64, frame: Frame },
}

/// Producer handle to the outbound queue
#[derive(Clone)]
pub struct OutboundSender {
    tx: mpsc::Sender<Outbound>,
    live_turn: Arc<AtomicU64>,
}

impl OutboundSender {
    /// Submit a control frame; these bypass turn filtering
    ///
    /// # Errors
    ///
    /// Returns `SlowClient` if the queue stays full past the wait budget
    pub async fn control(&self, frame: Frame) -> Result<()> {
        self.send(Outbound::Control(frame)).await
    }

    /// Submit a frame on behalf of turn `seq`
    ///
    /// # Errors
    ///
    /// Returns `SlowClient` if the queue stays full past the wait budget
    pub async fn turn(&self, seq: u64, frame: Frame) -> Result<()> {
        self.send(Outbound::Turn { seq, frame }).await
    }

    async fn send(&self, item: Outbound) -> Result<()> {
        match self.tx.send_timeout(item, SEND_WAIT).await {
            Ok(()) => Ok(()),
            Err(mpsc::error::SendTimeoutError::Timeout(_)) => Err(Error::SlowClient(
                "outbound queue full; client is not draining audio".to_string(),
            )),
            Err(mpsc::error::SendTimeoutError::Closed(_)) => {
                Err(Error::Internal("outbound queue closed".to_string()))
            }
        }
    }

    /// Allocate the next turn sequence and make it live
    pub fn begin_turn(&self) -> u64 {
        self.live_turn.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Invalidate the current turn so its queued frames are dropped at the
    /// drain. Used on barge-in before the replacement turn exists.
    pub fn invalidate_live_turn(&self) {
        self.live_turn.fetch_add(1, Ordering::SeqCst);
    }

    /// Sequence of the currently live turn
    #[must_use]
    pub fn live_turn(&self) -> u64 {
        self.live_turn.load(Ordering::SeqCst)
    }
}

/// Consumer half: yields frames in submission order, skipping frames whose
/// turn is no longer live
pub struct OutboundDrain {
    rx: mpsc::Receiver<Outbound>,
    live_turn: Arc<AtomicU64>,
}

impl OutboundDrain {
    /// Next frame to put on the wire, or `None` when all producers are gone
    pub async fn next(&mut self) -> Option<Frame> {
        while let Some(item) = self.rx.recv().await {
            match item {
                Outbound::Control(frame) => return Some(frame),
                Outbound::Turn { seq, frame } => {
                    if seq >= self.live_turn.load(Ordering::SeqCst) {
                        return Some(frame);
                    }
                    tracing::trace!(seq, kind = ?frame.kind, "dropping frame from cancelled turn");
                }
            }
        }
        None
    }
}

/// Create the bounded outbound queue
#[must_use]
pub fn channel(capacity: usize) -> (OutboundSender, OutboundDrain) {
    let (tx, rx) = mpsc::channel(capacity);
    let live_turn = Arc::new(AtomicU64::new(0));
    (
        OutboundSender { tx, live_turn: Arc::clone(&live_turn) },
        OutboundDrain { rx, live_turn },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Frame;

    #[tokio::test]
    async fn frames_drain_in_submission_order() {
        let (tx, mut drain) = channel(8);
        let seq = tx.begin_turn();

        tx.control(Frame::ready()).await.unwrap();
        tx.turn(seq, Frame::llm_chunk("a")).await.unwrap();
        tx.turn(seq, Frame::llm_chunk("b")).await.unwrap();
        drop(tx);

        let kinds: Vec<_> = [
            drain.next().await.unwrap(),
            drain.next().await.unwrap(),
            drain.next().await.unwrap(),
        ]
        .into_iter()
        .map(|f| f.kind)
        .collect();
        assert_eq!(
            kinds,
            vec![
                crate::protocol::MessageType::Ready,
                crate::protocol::MessageType::LlmChunk,
                crate::protocol::MessageType::LlmChunk,
            ]
        );
        assert!(drain.next().await.is_none());
    }

    #[tokio::test]
    async fn stale_turn_frames_are_dropped() {
        let (tx, mut drain) = channel(8);
        let old = tx.begin_turn();

        tx.turn(old, Frame::llm_chunk("stale")).await.unwrap();
        tx.invalidate_live_turn();
        let new = tx.begin_turn();
        tx.turn(new, Frame::llm_chunk("live")).await.unwrap();
        drop(tx);

        let frame = drain.next().await.unwrap();
        assert_eq!(frame.text().unwrap(), "live");
        assert!(drain.next().await.is_none());
    }

    #[tokio::test]
    async fn control_frames_survive_invalidation() {
        let (tx, mut drain) = channel(8);
        let seq = tx.begin_turn();

        tx.turn(seq, Frame::llm_chunk("audio")).await.unwrap();
        tx.control(Frame::error("UPSTREAM", "stt failed")).await.unwrap();
        tx.invalidate_live_turn();
        drop(tx);

        let frame = drain.next().await.unwrap();
        assert_eq!(frame.kind, crate::protocol::MessageType::Error);
        assert!(drain.next().await.is_none());
    }

    #[tokio::test]
    async fn full_queue_times_out_as_slow_client() {
        let (tx, _drain) = channel(1);
        let seq = tx.begin_turn();

        tx.turn(seq, Frame::llm_chunk("one")).await.unwrap();

        // Nothing drains; paused time auto-advances past the wait budget
        tokio::time::pause();
        let err = tx.turn(seq, Frame::llm_chunk("two")).await.unwrap_err();
        assert_eq!(err.wire_code(), "SLOW_CLIENT");
    }
}
