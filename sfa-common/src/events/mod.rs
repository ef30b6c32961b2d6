//! Event types for the SFA pipeline event system
//!
//! Provides the shared event definitions, the EventBus (broadcast fan-out),
//! and the EventSink seam that stage executors publish through.
//!
//! Delivery is at-least-once: observers must tolerate duplicate and
//! out-of-order events for the same (track, stage). See [`projection`]
//! for a correct consumer-side merge.

mod projection;

pub use projection::{PipelineState, StageView};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Mutex;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Pipeline stage identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Audio acquisition (metadata + download)
    Download,
    /// Stem separation (local or cloud engine)
    Processing,
    /// Feature analysis
    Analysis,
}

impl Stage {
    /// Stable string form used in the job store and the work queue
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Download => "download",
            Stage::Processing => "processing",
            Stage::Analysis => "analysis",
        }
    }

    /// Parse from the stable string form
    pub fn parse(s: &str) -> Option<Stage> {
        match s {
            "download" => Some(Stage::Download),
            "processing" => Some(Stage::Processing),
            "analysis" => Some(Stage::Analysis),
            _ => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stage job status
///
/// Moves forward only: `queued → running → {completed|failed|cancelled}`.
/// Terminal states are never left once entered; retry creates a new job row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl StageStatus {
    /// Stable string form used in the job store
    pub fn as_str(&self) -> &'static str {
        match self {
            StageStatus::Queued => "queued",
            StageStatus::Running => "running",
            StageStatus::Completed => "completed",
            StageStatus::Failed => "failed",
            StageStatus::Cancelled => "cancelled",
        }
    }

    /// Parse from the stable string form
    pub fn parse(s: &str) -> Option<StageStatus> {
        match s {
            "queued" => Some(StageStatus::Queued),
            "running" => Some(StageStatus::Running),
            "completed" => Some(StageStatus::Completed),
            "failed" => Some(StageStatus::Failed),
            "cancelled" => Some(StageStatus::Cancelled),
            _ => None,
        }
    }

    /// True for completed/failed/cancelled
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StageStatus::Completed | StageStatus::Failed | StageStatus::Cancelled
        )
    }

    /// Position in the monotonic stage-state lattice:
    /// `queued < running < {completed|failed|cancelled}`
    pub fn rank(&self) -> u8 {
        match self {
            StageStatus::Queued => 0,
            StageStatus::Running => 1,
            StageStatus::Completed | StageStatus::Failed | StageStatus::Cancelled => 2,
        }
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// SFA pipeline event types
///
/// Payloads are small and self-contained: no event carries a handle back
/// into the job store. Consumers that need full state re-query it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PipelineEvent {
    /// Stage progress / status transition for one track
    ///
    /// Also carries stage completion (`status: completed, progress: 100`).
    StageProgress {
        /// Track the stage belongs to
        track_id: Uuid,
        /// Which stage
        stage: Stage,
        /// Status at the time of publication
        status: StageStatus,
        /// Coarse progress, 0-100
        progress: u8,
        /// When the event was published
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Stage reached a failure or cancellation terminal state
    StageFailed {
        /// Track the stage belongs to
        track_id: Uuid,
        /// Which stage
        stage: Stage,
        /// Captured error detail or cancellation reason
        reason: String,
        /// When the event was published
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// All requested stages finished for a track
    PipelineComplete {
        /// Track whose pipeline finished
        track_id: Uuid,
        /// When the event was published
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Batch run progress update
    BatchProgress {
        /// Batch run identifier
        batch_id: Uuid,
        /// Batch run state; "running" while tracks are still in flight
        status: String,
        /// Tracks completed so far
        completed_count: usize,
        /// Tracks failed so far
        failed_count: usize,
        /// Total tracks in the batch
        total_count: usize,
        /// When the event was published
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Batch run finished (completed + failed == total)
    BatchComplete {
        /// Batch run identifier
        batch_id: Uuid,
        /// Tracks that completed
        completed_count: usize,
        /// Tracks that failed
        failed_count: usize,
        /// Total tracks in the batch
        total_count: usize,
        /// When the event was published
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl PipelineEvent {
    /// Event type name (matches the serialized `type` tag)
    pub fn event_type(&self) -> &'static str {
        match self {
            PipelineEvent::StageProgress { .. } => "StageProgress",
            PipelineEvent::StageFailed { .. } => "StageFailed",
            PipelineEvent::PipelineComplete { .. } => "PipelineComplete",
            PipelineEvent::BatchProgress { .. } => "BatchProgress",
            PipelineEvent::BatchComplete { .. } => "BatchComplete",
        }
    }

    /// Track this event is scoped to, if any (batch events return None)
    pub fn track_id(&self) -> Option<Uuid> {
        match self {
            PipelineEvent::StageProgress { track_id, .. }
            | PipelineEvent::StageFailed { track_id, .. }
            | PipelineEvent::PipelineComplete { track_id, .. } => Some(*track_id),
            _ => None,
        }
    }
}

/// Outbound event seam for stage executors and the coordinator
///
/// Production wiring is the [`EventBus`]; tests use a [`RecordingSink`].
/// Publication is fire-and-forget: a sink must never block the publisher.
pub trait EventSink: Send + Sync {
    /// Publish one event to whoever is watching
    fn publish(&self, event: PipelineEvent);
}

/// Event bus wrapping a tokio broadcast channel
///
/// Any number of observers may subscribe without the publisher knowing
/// about them. Slow subscribers lag and drop old events rather than
/// applying backpressure.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PipelineEvent>,
    capacity: usize,
}

impl EventBus {
    /// Create a new EventBus with the given channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all pipeline events
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    pub fn emit(
        &self,
        event: PipelineEvent,
    ) -> std::result::Result<usize, broadcast::error::SendError<PipelineEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring whether anyone is listening
    pub fn emit_lossy(&self, event: PipelineEvent) {
        let _ = self.tx.send(event);
    }

    /// Current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl EventSink for EventBus {
    fn publish(&self, event: PipelineEvent) {
        self.emit_lossy(event);
    }
}

/// In-memory sink that records everything published through it
///
/// Test double for [`EventSink`]; lets tests assert on the exact event
/// sequence an executor produced.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<PipelineEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all events published so far
    pub fn events(&self) -> Vec<PipelineEvent> {
        self.events.lock().expect("recording sink poisoned").clone()
    }
}

impl EventSink for RecordingSink {
    fn publish(&self, event: PipelineEvent) {
        self.events
            .lock()
            .expect("recording sink poisoned")
            .push(event);
    }
}
