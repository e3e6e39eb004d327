//! Per-run bounded event channel.
//!
//! One producer (the orchestrator, through an [`EventSender`]) and one
//! consumer (the stream transport, through an [`EventReceiver`]).
//!
//! ```text
//! orchestrator ──send──▶ [ Event | Event | … | Terminal | End ] ──pull(timeout)──▶ transport
//!                                                                  │
//!                                                   idle > timeout └─▶ synthesized Heartbeat
//! ```
//!
//! Guarantees:
//! - events arrive in the order they were sent;
//! - at most one terminal event (`complete`/`error`) is ever delivered, and
//!   it is immediately followed by the end sentinel;
//! - if the producer disappears without a terminal event, the receiver
//!   synthesizes an `error` event so the stream still ends with exactly one.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use intel_harness_core::events::ProgressEvent;
use intel_harness_core::profiles::AnalysisMode;

use crate::sink::EventSink;

#[derive(Debug)]
enum Frame {
    Event(ProgressEvent),
    End,
}

/// Create a channel holding at most `capacity` undelivered frames. A full
/// channel applies backpressure to the producer.
pub fn event_channel(capacity: usize) -> (EventSender, EventReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(2));
    (
        EventSender {
            tx,
            terminated: Arc::new(AtomicBool::new(false)),
        },
        EventReceiver {
            rx,
            mode: None,
            saw_terminal: false,
            finished: false,
        },
    )
}

#[derive(Clone)]
pub struct EventSender {
    tx: mpsc::Sender<Frame>,
    terminated: Arc<AtomicBool>,
}

impl EventSender {
    /// Send one event. Returns `false` if it was dropped because a terminal
    /// event was already sent or the receiver is gone.
    pub async fn send(&self, event: ProgressEvent) -> bool {
        if event.is_terminal() {
            if self.terminated.swap(true, Ordering::SeqCst) {
                warn!(event = event.type_name(), "dropping second terminal event");
                return false;
            }
            let delivered = self.tx.send(Frame::Event(event)).await.is_ok();
            let _ = self.tx.send(Frame::End).await;
            return delivered;
        }
        if self.terminated.load(Ordering::SeqCst) {
            debug!(event = event.type_name(), "dropping event after terminal");
            return false;
        }
        self.tx.send(Frame::Event(event)).await.is_ok()
    }

    /// [`send`](Self::send), abandoned once `cancel` fires while the
    /// channel is full. An event that fits is still delivered after
    /// cancellation.
    pub async fn send_until(&self, event: ProgressEvent, cancel: &CancellationToken) -> bool {
        tokio::select! {
            biased;
            delivered = self.send(event) => delivered,
            _ = cancel.cancelled() => {
                debug!("event dropped, run cancelled while the channel was full");
                false
            }
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventSink for EventSender {
    async fn emit(&self, event: ProgressEvent) {
        self.send(event).await;
    }
}

pub struct EventReceiver {
    rx: mpsc::Receiver<Frame>,
    mode: Option<AnalysisMode>,
    saw_terminal: bool,
    finished: bool,
}

impl EventReceiver {
    /// Stamp synthesized heartbeats and errors with this mode.
    pub fn with_mode(mut self, mode: AnalysisMode) -> Self {
        self.mode = Some(mode);
        self
    }

    fn stamp(&self, event: ProgressEvent) -> ProgressEvent {
        match self.mode {
            Some(mode) => event.with_mode(mode),
            None => event,
        }
    }

    /// Wait up to `timeout` for the next event.
    ///
    /// Returns a synthesized heartbeat on timeout and `None` once the
    /// stream has ended. Never blocks longer than `timeout`.
    pub async fn pull(&mut self, timeout: Duration) -> Option<ProgressEvent> {
        if self.finished {
            return None;
        }
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Err(_) => Some(self.stamp(ProgressEvent::heartbeat())),
            Ok(Some(Frame::Event(event))) => {
                if event.is_terminal() {
                    self.saw_terminal = true;
                }
                Some(event)
            }
            Ok(Some(Frame::End)) => {
                self.finished = true;
                None
            }
            Ok(None) => {
                self.finished = true;
                if self.saw_terminal {
                    None
                } else {
                    self.saw_terminal = true;
                    warn!("event producer closed without a terminal event");
                    Some(self.stamp(ProgressEvent::error(
                        "event stream closed before the run finished",
                        None,
                        Vec::new(),
                    )))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TICK: Duration = Duration::from_secs(1);

    #[tokio::test]
    async fn delivers_in_order_then_ends() {
        let (tx, mut rx) = event_channel(8);
        tx.send(ProgressEvent::status("a", "")).await;
        tx.send(ProgressEvent::status("b", "")).await;
        tx.send(ProgressEvent::error("boom", None, vec![])).await;

        let mut types = Vec::new();
        while let Some(event) = rx.pull(TICK).await {
            types.push(event.type_name());
        }
        assert_eq!(types, vec!["status_update", "status_update", "error"]);
        assert!(rx.pull(TICK).await.is_none());
    }

    #[tokio::test]
    async fn second_terminal_and_late_events_are_dropped() {
        let (tx, mut rx) = event_channel(8);
        assert!(tx.send(ProgressEvent::error("first", None, vec![])).await);
        assert!(!tx.send(ProgressEvent::error("second", None, vec![])).await);
        assert!(!tx.send(ProgressEvent::status("late", "")).await);
        assert!(tx.is_terminated());

        let first = rx.pull(TICK).await.unwrap();
        assert!(first.is_terminal());
        assert!(rx.pull(TICK).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn idle_channel_yields_heartbeat() {
        let (tx, rx) = event_channel(8);
        let mut rx = rx.with_mode(AnalysisMode::Deep);
        let started = tokio::time::Instant::now();
        let event = rx.pull(TICK).await.unwrap();
        assert_eq!(event.type_name(), "heartbeat");
        assert_eq!(event.analysis_mode, Some(AnalysisMode::Deep));
        assert!(started.elapsed() <= TICK + Duration::from_millis(10));
        drop(tx);
    }

    #[tokio::test]
    async fn full_channel_send_gives_up_on_cancel() {
        let (tx, mut rx) = event_channel(2);
        let cancel = CancellationToken::new();
        assert!(tx.send_until(ProgressEvent::status("a", ""), &cancel).await);
        assert!(tx.send_until(ProgressEvent::status("b", ""), &cancel).await);

        let blocked = {
            let tx = tx.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { tx.send_until(ProgressEvent::status("c", ""), &cancel).await })
        };
        tokio::task::yield_now().await;
        assert!(!blocked.is_finished());

        cancel.cancel();
        let delivered = tokio::time::timeout(TICK, blocked).await.unwrap().unwrap();
        assert!(!delivered);

        // Room in the channel: delivered even though cancelled.
        rx.pull(TICK).await.unwrap();
        rx.pull(TICK).await.unwrap();
        assert!(tx.send_until(ProgressEvent::error("x", None, vec![]), &cancel).await);
    }

    #[tokio::test]
    async fn dropped_producer_synthesizes_error() {
        let (tx, mut rx) = event_channel(8);
        tx.send(ProgressEvent::status("start", "")).await;
        drop(tx);
        assert_eq!(rx.pull(TICK).await.unwrap().type_name(), "status_update");
        let synthesized = rx.pull(TICK).await.unwrap();
        assert_eq!(synthesized.type_name(), "error");
        assert!(rx.pull(TICK).await.is_none());
    }
}
