//! Session registry for streaming runs.
//!
//! A [`SessionManager`] owns every live [`Session`] in a concurrent map.
//! Sessions move `running → completed | error` exactly once, are kept for
//! a grace period after that so clients can still look up the outcome, and
//! are then removed by [`SessionManager::purge_expired`].
//!
//! A session that is still running after `max_lifetime_secs` is cancelled
//! and marked `error` by the same sweep.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use intel_harness_core::clock::{Clock, SystemClock};
use intel_harness_core::events::{EventKind, ProgressEvent};
use intel_harness_core::models::AnalysisReport;
use intel_harness_core::profiles::AnalysisMode;

use crate::channel::{event_channel, EventReceiver, EventSender};
use crate::config::SessionConfig;
use crate::sink::EventSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Running,
    Completed,
    Error,
}

/// Session record, as returned by lookups.
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    pub subject_label: String,
    pub analysis_mode: AnalysisMode,
    pub status: SessionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<AnalysisReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Set when the session leaves `running`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    cancel: CancellationToken,
}

/// Everything a caller needs to drive one streaming run.
pub struct OpenedSession {
    pub session_id: String,
    /// Producer side; records the terminal status before forwarding.
    pub sink: SessionSink,
    pub receiver: EventReceiver,
    pub cancel: CancellationToken,
}

pub struct SessionManager {
    sessions: DashMap<String, Session>,
    clock: Arc<dyn Clock>,
    config: SessionConfig,
}

impl SessionManager {
    pub fn new(config: SessionConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: SessionConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            sessions: DashMap::new(),
            clock,
            config,
        }
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.config.heartbeat_secs)
    }

    /// Register a running session and queue its `session_start` event, so
    /// it is always the first event the consumer sees.
    pub async fn open(self: &Arc<Self>, subject_label: &str, mode: AnalysisMode) -> OpenedSession {
        let session_id = uuid::Uuid::new_v4().to_string();
        let cancel = CancellationToken::new();
        let (sender, receiver) = event_channel(self.config.channel_capacity);

        self.sessions.insert(
            session_id.clone(),
            Session {
                session_id: session_id.clone(),
                started_at: self.clock.now(),
                subject_label: subject_label.to_string(),
                analysis_mode: mode,
                status: SessionStatus::Running,
                result: None,
                error: None,
                expires_at: None,
                cancel: cancel.clone(),
            },
        );
        info!(session_id = %session_id, subject = %subject_label, %mode, "session opened");

        sender
            .send(
                ProgressEvent::session_start(
                    session_id.clone(),
                    format!("Starting {} analysis for {}", mode, subject_label),
                )
                .with_mode(mode),
            )
            .await;

        OpenedSession {
            sink: SessionSink {
                manager: Arc::clone(self),
                session_id: session_id.clone(),
                sender,
                cancel: cancel.clone(),
            },
            receiver: receiver.with_mode(mode),
            session_id,
            cancel,
        }
    }

    pub fn get(&self, session_id: &str) -> Option<Session> {
        self.sessions.get(session_id).map(|s| s.value().clone())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Apply a terminal event. No-op unless the session is still running.
    pub fn record_terminal(&self, session_id: &str, event: &ProgressEvent) {
        let Some(mut session) = self.sessions.get_mut(session_id) else {
            return;
        };
        if session.status != SessionStatus::Running {
            return;
        }
        match &event.kind {
            EventKind::Complete { data } => {
                session.status = SessionStatus::Completed;
                session.result = Some(data.as_ref().clone());
            }
            EventKind::Error { message, .. } => {
                session.status = SessionStatus::Error;
                session.error = Some(message.clone());
            }
            _ => return,
        }
        session.expires_at = Some(self.expiry_from(self.clock.now()));
        debug!(session_id, status = ?session.status, "session finished");
    }

    /// `now + grace_secs`, saturating at the latest representable instant.
    fn expiry_from(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        seconds(self.config.grace_secs)
            .and_then(|grace| now.checked_add_signed(grace))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Request cancellation of a running session. Returns `false` if the
    /// session is unknown or already finished.
    pub fn cancel(&self, session_id: &str) -> bool {
        match self.sessions.get(session_id) {
            Some(session) if session.status == SessionStatus::Running => {
                info!(session_id, "session cancellation requested");
                session.cancel.cancel();
                true
            }
            _ => false,
        }
    }

    /// Expire overdue running sessions and drop finished sessions whose
    /// grace period has elapsed. Returns the number removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let max_lifetime = seconds(self.config.max_lifetime_secs);

        for mut session in self.sessions.iter_mut() {
            let overdue = max_lifetime.is_some_and(|limit| now - session.started_at >= limit);
            if session.status == SessionStatus::Running && overdue {
                warn!(session_id = %session.session_id, "session exceeded max lifetime");
                session.cancel.cancel();
                session.status = SessionStatus::Error;
                session.error = Some("session expired".to_string());
                session.expires_at = Some(self.expiry_from(now));
            }
        }

        let before = self.sessions.len();
        self.sessions
            .retain(|_, s| s.expires_at.map_or(true, |expires_at| expires_at > now));
        let purged = before.saturating_sub(self.sessions.len());
        if purged > 0 {
            info!(purged, remaining = self.sessions.len(), "purged sessions");
        }
        purged
    }

    /// Run [`purge_expired`](Self::purge_expired) every
    /// `purge_interval_secs` until `shutdown` fires.
    pub fn spawn_purge_task(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        let period = Duration::from_secs(self.config.purge_interval_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        manager.purge_expired();
                    }
                }
            }
        })
    }
}

fn seconds(secs: u64) -> Option<chrono::Duration> {
    i64::try_from(secs).ok().and_then(chrono::Duration::try_seconds)
}

/// Producer-side sink for one session.
pub struct SessionSink {
    manager: Arc<SessionManager>,
    session_id: String,
    sender: EventSender,
    cancel: CancellationToken,
}

#[async_trait]
impl EventSink for SessionSink {
    async fn emit(&self, event: ProgressEvent) {
        if event.is_terminal() {
            self.manager.record_terminal(&self.session_id, &event);
        }
        // A stalled consumer must not pin the producer past cancellation.
        self.sender.send_until(event, &self.cancel).await;
    }
}
