//! Event types for the PVLIT event system
//!
//! Provides shared event definitions and the EventBus used by all PVLIT
//! services. Events are broadcast in-process and can be serialized for SSE
//! transmission to connected clients.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// PVLIT event types
///
/// All services emit through this central enum so subscribers get type safety
/// and exhaustive matching. Payloads are flat and serde-friendly because the
/// same values go out on the wire via SSE.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PvlitEvent {
    /// An ingestion job was accepted and its pipeline started
    IngestJobStarted {
        job_id: Uuid,
        organization_id: Uuid,
        /// Number of raw records accepted into the job
        total: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Per-item progress during an ingestion job
    ///
    /// Emitted at least once per resolved item; throttled persistence is the
    /// consumer's concern, not the emitter's.
    IngestProgressUpdate {
        job_id: Uuid,
        /// Percentage complete (0.0 - 100.0)
        progress: f64,
        found: usize,
        created: usize,
        duplicates: usize,
        failed: usize,
        current_operation: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// An ingestion job resolved every item and finished
    IngestJobCompleted {
        job_id: Uuid,
        created: usize,
        duplicates: usize,
        failed: usize,
        /// created / (created + failed), 1.0 when nothing was attempted
        success_rate: f64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// An ingestion job was aborted (cancellation or store outage)
    IngestJobFailed {
        job_id: Uuid,
        error: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A reviewer checked out a batch of cases
    BatchAllocated {
        organization_id: Uuid,
        reviewer_id: Uuid,
        batch_id: Uuid,
        track: String,
        stage: String,
        count: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A reviewer released their checked-out cases
    BatchReleased {
        organization_id: Uuid,
        reviewer_id: Uuid,
        released: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A case moved through a workflow transition
    RecordRouted {
        organization_id: Uuid,
        record_id: Uuid,
        from_stage: String,
        to_stage: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A classification endpoint changed health state (breaker trip/recovery)
    EndpointHealthChanged {
        endpoint: String,
        healthy: bool,
        consecutive_failures: u32,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl PvlitEvent {
    /// Event type name for SSE event framing
    pub fn event_type(&self) -> &'static str {
        match self {
            PvlitEvent::IngestJobStarted { .. } => "IngestJobStarted",
            PvlitEvent::IngestProgressUpdate { .. } => "IngestProgressUpdate",
            PvlitEvent::IngestJobCompleted { .. } => "IngestJobCompleted",
            PvlitEvent::IngestJobFailed { .. } => "IngestJobFailed",
            PvlitEvent::BatchAllocated { .. } => "BatchAllocated",
            PvlitEvent::BatchReleased { .. } => "BatchReleased",
            PvlitEvent::RecordRouted { .. } => "RecordRouted",
            PvlitEvent::EndpointHealthChanged { .. } => "EndpointHealthChanged",
        }
    }

    /// Whether the event belongs to the ingestion stream
    pub fn is_ingest_event(&self) -> bool {
        matches!(
            self,
            PvlitEvent::IngestJobStarted { .. }
                | PvlitEvent::IngestProgressUpdate { .. }
                | PvlitEvent::IngestJobCompleted { .. }
                | PvlitEvent::IngestJobFailed { .. }
        )
    }
}

/// Central event distribution bus for application-wide events
///
/// Uses tokio::broadcast internally, providing:
/// - Non-blocking publish (slow subscribers don't block producers)
/// - Multiple concurrent subscribers
/// - Automatic cleanup when subscribers drop
/// - Lagged message detection for slow subscribers
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PvlitEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with the given channel capacity
    ///
    /// Old events are dropped once `capacity` unread events accumulate for a
    /// subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<PvlitEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists,
    /// `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: PvlitEvent,
    ) -> std::result::Result<usize, broadcast::error::SendError<PvlitEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring whether anyone is listening
    ///
    /// Used for progress updates and other events where a missing subscriber
    /// is acceptable.
    pub fn emit_lossy(&self, event: PvlitEvent) {
        let _ = self.tx.send(event);
    }

    /// Configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_emit_and_receive() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.emit(PvlitEvent::IngestJobStarted {
            job_id: Uuid::new_v4(),
            organization_id: Uuid::new_v4(),
            total: 3,
            timestamp: chrono::Utc::now(),
        })
        .unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type(), "IngestJobStarted");
        assert!(event.is_ingest_event());
    }

    #[test]
    fn test_emit_lossy_without_subscribers() {
        let bus = EventBus::new(4);
        // Must not panic or error with zero subscribers
        bus.emit_lossy(PvlitEvent::BatchReleased {
            organization_id: Uuid::new_v4(),
            reviewer_id: Uuid::new_v4(),
            released: 0,
            timestamp: chrono::Utc::now(),
        });
    }

    #[test]
    fn test_event_serialization_tags_type() {
        let event = PvlitEvent::RecordRouted {
            organization_id: Uuid::new_v4(),
            record_id: Uuid::new_v4(),
            from_stage: "TRIAGE_ICSR".to_string(),
            to_stage: "ASSESSMENT_ICSR".to_string(),
            timestamp: chrono::Utc::now(),
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "RecordRouted");
        assert_eq!(json["from_stage"], "TRIAGE_ICSR");
    }
}
