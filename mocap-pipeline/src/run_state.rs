//! Pipeline run state machine
//!
//! A run moves forward through the stages in order
//! (Sync → Detect2D → Triangulate3D → Normalize → Filter → ComputeCOM → Persist)
//! and ends in exactly one terminal state. Backward moves and moves out of a
//! terminal state are rejected.

use chrono::{DateTime, Utc};
use mocap_common::events::Stage;
use mocap_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Current run state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "stage", rename_all = "snake_case")]
pub enum RunState {
    /// Created, no stage entered yet
    Pending,
    /// Executing (or skipping) a stage
    Running(Stage),
    /// Every stage finished
    Completed,
    /// Stopped by the cancellation token
    Cancelled,
    /// Aborted by a fatal error
    Failed,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Completed | RunState::Cancelled | RunState::Failed)
    }
}

/// State transition record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub run_id: Uuid,
    pub old_state: RunState,
    pub new_state: RunState,
    pub transitioned_at: DateTime<Utc>,
}

/// How a stage was handled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageOutcome {
    Executed,
    Skipped,
}

/// Per-stage record kept for the run summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageRecord {
    pub outcome: StageOutcome,
    pub elapsed_ms: u64,
}

/// In-memory run record, persisted as the run summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    pub run_id: Uuid,
    pub state: RunState,
    pub session_folder: String,
    pub stages: BTreeMap<Stage, StageRecord>,
    /// Normalized lag per camera, seconds (filled by Sync)
    pub lag_seconds: BTreeMap<String, f64>,
    /// Best-effort QA failures, logged and carried on
    pub qa_warnings: Vec<String>,
    /// Points that could not be triangulated
    pub underdetermined_points: usize,
    /// NaN entries per produced array
    pub nan_counts: BTreeMap<String, usize>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl PipelineRun {
    pub fn new(run_id: Uuid, session_folder: String) -> Self {
        Self {
            run_id,
            state: RunState::Pending,
            session_folder,
            stages: BTreeMap::new(),
            lag_seconds: BTreeMap::new(),
            qa_warnings: Vec::new(),
            underdetermined_points: 0,
            nan_counts: BTreeMap::new(),
            error: None,
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    /// Move to a new state, enforcing forward-only progress
    pub fn transition_to(&mut self, new_state: RunState) -> Result<StateTransition> {
        let allowed = match (self.state, new_state) {
            (old, _) if old.is_terminal() => false,
            (_, RunState::Pending) => false,
            (_, s) if s.is_terminal() => true,
            (RunState::Pending, RunState::Running(stage)) => stage == Stage::Sync,
            (RunState::Running(current), RunState::Running(next)) => current.next() == Some(next),
            _ => false,
        };
        if !allowed {
            return Err(Error::Internal(format!(
                "illegal run transition {:?} -> {:?}",
                self.state, new_state
            )));
        }

        let transition = StateTransition {
            run_id: self.run_id,
            old_state: self.state,
            new_state,
            transitioned_at: Utc::now(),
        };
        self.state = new_state;

        if new_state.is_terminal() {
            self.ended_at = Some(Utc::now());
        }

        Ok(transition)
    }

    /// Stage the run is in, if any
    pub fn current_stage(&self) -> Option<Stage> {
        match self.state {
            RunState::Running(stage) => Some(stage),
            _ => None,
        }
    }

    /// Last stage with a completion record
    pub fn last_completed_stage(&self) -> Option<Stage> {
        self.stages.keys().next_back().copied()
    }

    pub fn record_stage(&mut self, stage: Stage, outcome: StageOutcome, elapsed_ms: u64) {
        self.stages.insert(stage, StageRecord { outcome, elapsed_ms });
    }

    pub fn add_qa_warning(&mut self, message: String) {
        self.qa_warnings.push(message);
    }

    pub fn fail(&mut self, error: String) -> Result<StateTransition> {
        self.error = Some(error);
        self.transition_to(RunState::Failed)
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn elapsed_ms(&self) -> u64 {
        let end = self.ended_at.unwrap_or_else(Utc::now);
        (end - self.started_at).num_milliseconds().max(0) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run() -> PipelineRun {
        PipelineRun::new(Uuid::new_v4(), "/tmp/session".into())
    }

    #[test]
    fn test_forward_progression() {
        let mut r = run();
        for stage in Stage::ALL {
            r.transition_to(RunState::Running(stage)).unwrap();
        }
        let t = r.transition_to(RunState::Completed).unwrap();
        assert_eq!(t.old_state, RunState::Running(Stage::Persist));
        assert!(r.is_terminal());
        assert!(r.ended_at.is_some());
    }

    #[test]
    fn test_cannot_skip_ahead_or_go_back() {
        let mut r = run();
        assert!(r.transition_to(RunState::Running(Stage::Detect2D)).is_err());
        r.transition_to(RunState::Running(Stage::Sync)).unwrap();
        r.transition_to(RunState::Running(Stage::Detect2D)).unwrap();
        assert!(r.transition_to(RunState::Running(Stage::Sync)).is_err());
        assert!(r.transition_to(RunState::Running(Stage::Normalize)).is_err());
    }

    #[test]
    fn test_terminal_is_final() {
        let mut r = run();
        r.transition_to(RunState::Running(Stage::Sync)).unwrap();
        r.transition_to(RunState::Cancelled).unwrap();
        assert!(r.transition_to(RunState::Running(Stage::Detect2D)).is_err());
        assert!(r.transition_to(RunState::Completed).is_err());
    }

    #[test]
    fn test_fail_records_error() {
        let mut r = run();
        r.transition_to(RunState::Running(Stage::Sync)).unwrap();
        r.fail("no audio".into()).unwrap();
        assert_eq!(r.state, RunState::Failed);
        assert_eq!(r.error.as_deref(), Some("no audio"));
    }

    #[test]
    fn test_last_completed_stage_follows_stage_order() {
        let mut r = run();
        r.record_stage(Stage::Sync, StageOutcome::Skipped, 0);
        r.record_stage(Stage::Triangulate3D, StageOutcome::Executed, 40);
        r.record_stage(Stage::Detect2D, StageOutcome::Executed, 10);
        assert_eq!(r.last_completed_stage(), Some(Stage::Triangulate3D));
    }

    #[test]
    fn test_state_serialization() {
        let json = serde_json::to_value(RunState::Running(Stage::ComputeCom)).unwrap();
        assert_eq!(json["state"], "running");
        assert_eq!(json["stage"], "compute_com");
        let json = serde_json::to_value(RunState::Completed).unwrap();
        assert_eq!(json["state"], "completed");
    }
}
