//! Best-effort push notifications for finished analyses.
//!
//! Events are fire-and-forget: nothing is stored and nothing waits for a
//! subscriber. Clients that miss an event fall back to polling the store.

use serde::Serialize;
use serde_json::Value;
use sitescan_core::AnalysisId;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EventKind {
    #[serde(rename = "analysisCompleted")]
    Completed,
    #[serde(rename = "analysisFailed")]
    Failed,
}

impl EventKind {
    /// Event name on the wire.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "analysisCompleted",
            Self::Failed => "analysisFailed",
        }
    }
}

/// One message on the notification topic.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationEvent {
    pub sequence: u64,
    pub analysis_id: AnalysisId,
    /// `analysis:{id}`
    pub room: String,
    pub event: EventKind,
    pub payload: Value,
}

/// Side channel that announces terminal transitions.
pub trait NotificationPublisher: Send + Sync {
    fn publish(&self, analysis_id: &AnalysisId, event: EventKind, payload: Value);
}

/// Publisher that drops everything; used when notifications are disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPublisher;

impl NotificationPublisher for NoopPublisher {
    fn publish(&self, analysis_id: &AnalysisId, event: EventKind, _payload: Value) {
        trace!(analysis_id = %analysis_id, event = event.as_str(), "Notifications disabled");
    }
}

/// In-process topic backed by a broadcast channel.
#[derive(Debug)]
pub struct BroadcastPublisher {
    tx: broadcast::Sender<NotificationEvent>,
    sequence: AtomicU64,
}

impl BroadcastPublisher {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            sequence: AtomicU64::new(0),
        }
    }

    /// Every event, for every analysis.
    pub fn subscribe_all(&self) -> broadcast::Receiver<NotificationEvent> {
        self.tx.subscribe()
    }

    /// Events for one analysis only.
    pub fn subscribe(&self, analysis_id: &AnalysisId) -> AnalysisSubscription {
        AnalysisSubscription {
            room: analysis_id.room_key(),
            rx: self.tx.subscribe(),
        }
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl NotificationPublisher for BroadcastPublisher {
    fn publish(&self, analysis_id: &AnalysisId, event: EventKind, payload: Value) {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let message = NotificationEvent {
            sequence,
            analysis_id: analysis_id.clone(),
            room: analysis_id.room_key(),
            event,
            payload,
        };
        // No receivers is not an error.
        let delivered = self.tx.send(message).unwrap_or(0);
        debug!(
            analysis_id = %analysis_id,
            event = event.as_str(),
            delivered,
            "Published notification"
        );
    }
}

/// Receiver filtered to a single room.
pub struct AnalysisSubscription {
    room: String,
    rx: broadcast::Receiver<NotificationEvent>,
}

impl AnalysisSubscription {
    /// Next event for this analysis, or `None` once the publisher is gone.
    ///
    /// Events lost to lag are skipped.
    pub async fn recv(&mut self) -> Option<NotificationEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if event.room == self.room => return Some(event),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(room = %self.room, skipped, "Subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
