//! Pipeline stage and progress event types
//!
//! Progress flows one way, from the orchestrator to a single consumer, over a
//! bounded channel. The producer never waits on the consumer for routine
//! progress: when the buffer is full the event is dropped. Terminal events
//! (completed, cancelled, failed) are awaited so the consumer always learns
//! how a run ended.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Pipeline stages in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Audio or manual lag estimation and video trimming
    Sync,
    /// Per-camera 2D landmark detection and aggregation
    #[serde(rename = "detect_2d")]
    Detect2D,
    /// Multi-view triangulation (or single-camera fallback)
    #[serde(rename = "triangulate_3d")]
    Triangulate3D,
    /// Axis convention remap
    Normalize,
    /// Temporal gap filling and smoothing
    Filter,
    /// Segment and whole-body center of mass
    ComputeCom,
    /// Final artifact writing
    Persist,
}

impl Stage {
    /// All stages in execution order
    pub const ALL: [Stage; 7] = [
        Stage::Sync,
        Stage::Detect2D,
        Stage::Triangulate3D,
        Stage::Normalize,
        Stage::Filter,
        Stage::ComputeCom,
        Stage::Persist,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Stage::Sync => "sync",
            Stage::Detect2D => "detect_2d",
            Stage::Triangulate3D => "triangulate_3d",
            Stage::Normalize => "normalize",
            Stage::Filter => "filter",
            Stage::ComputeCom => "compute_com",
            Stage::Persist => "persist",
        }
    }

    /// Stage that follows this one, `None` after Persist
    pub fn next(&self) -> Option<Stage> {
        let idx = Stage::ALL.iter().position(|s| s == self)?;
        Stage::ALL.get(idx + 1).copied()
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Events streamed from a pipeline run to its controller
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PipelineEvent {
    /// Run accepted and about to enter the first stage
    RunStarted {
        run_id: Uuid,
        session_folder: String,
        timestamp: DateTime<Utc>,
    },

    /// Stage entered
    StageStarted {
        run_id: Uuid,
        stage: Stage,
        timestamp: DateTime<Utc>,
    },

    /// Stage skipped, its artifacts were loaded from disk
    StageSkipped {
        run_id: Uuid,
        stage: Stage,
        /// Artifact files reused in place of running the stage
        reused: Vec<String>,
        timestamp: DateTime<Utc>,
    },

    /// Stage finished
    StageCompleted {
        run_id: Uuid,
        stage: Stage,
        elapsed_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// Intra-stage progress
    Progress {
        run_id: Uuid,
        stage: Stage,
        current: usize,
        total: usize,
        message: String,
        timestamp: DateTime<Utc>,
    },

    /// Best-effort QA check failed, run continues
    QaWarning {
        run_id: Uuid,
        stage: Stage,
        message: String,
        timestamp: DateTime<Utc>,
    },

    /// Run finished every stage
    RunCompleted {
        run_id: Uuid,
        elapsed_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// Run stopped by the cancellation token
    RunCancelled {
        run_id: Uuid,
        /// Last stage that completed before cancellation was observed
        last_stage: Option<Stage>,
        timestamp: DateTime<Utc>,
    },

    /// Run aborted by a fatal error
    RunFailed {
        run_id: Uuid,
        stage: Option<Stage>,
        error: String,
        timestamp: DateTime<Utc>,
    },
}

impl PipelineEvent {
    pub fn event_type(&self) -> &str {
        match self {
            PipelineEvent::RunStarted { .. } => "RunStarted",
            PipelineEvent::StageStarted { .. } => "StageStarted",
            PipelineEvent::StageSkipped { .. } => "StageSkipped",
            PipelineEvent::StageCompleted { .. } => "StageCompleted",
            PipelineEvent::Progress { .. } => "Progress",
            PipelineEvent::QaWarning { .. } => "QaWarning",
            PipelineEvent::RunCompleted { .. } => "RunCompleted",
            PipelineEvent::RunCancelled { .. } => "RunCancelled",
            PipelineEvent::RunFailed { .. } => "RunFailed",
        }
    }

    /// True for the last event a run emits
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PipelineEvent::RunCompleted { .. }
                | PipelineEvent::RunCancelled { .. }
                | PipelineEvent::RunFailed { .. }
        )
    }
}

/// Create a bounded single-producer/single-consumer progress channel
pub fn progress_channel(capacity: usize) -> (ProgressSender, ProgressReceiver) {
    let capacity = capacity.max(1);
    let (tx, rx) = mpsc::channel(capacity);
    (ProgressSender { tx, capacity }, ProgressReceiver { rx })
}

/// Producer half, owned by the orchestrator
///
/// Not `Clone`: one producer per run.
pub struct ProgressSender {
    tx: mpsc::Sender<PipelineEvent>,
    capacity: usize,
}

impl ProgressSender {
    /// Emit a non-terminal event without waiting
    ///
    /// Returns `false` if the event was dropped because the buffer is full
    /// or the consumer has gone away.
    pub fn emit(&self, event: PipelineEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(event)) => {
                tracing::debug!(
                    event_type = event.event_type(),
                    "Progress consumer lagging, event dropped"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Emit a terminal event, waiting for buffer space
    ///
    /// A closed channel is not an error: the run outcome is also logged.
    pub async fn emit_terminal(&self, event: PipelineEvent) {
        if let Err(e) = self.tx.send(event).await {
            tracing::debug!(
                event_type = e.0.event_type(),
                "Progress consumer closed before terminal event"
            );
        }
    }

    /// True once the consumer half has been dropped
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Consumer half, owned by the controller
pub struct ProgressReceiver {
    rx: mpsc::Receiver<PipelineEvent>,
}

impl ProgressReceiver {
    /// Wait for the next event, `None` once the producer is gone
    pub async fn recv(&mut self) -> Option<PipelineEvent> {
        self.rx.recv().await
    }

    /// Take the next buffered event without waiting
    pub fn try_recv(&mut self) -> Option<PipelineEvent> {
        self.rx.try_recv().ok()
    }

    /// Take every buffered event without waiting
    pub fn drain(&mut self) -> Vec<PipelineEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }
}
