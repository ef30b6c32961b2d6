//! Consumer-side pipeline state projection
//!
//! The coordinator does not own a canonical per-track status view; any
//! observer reconstructs one from the event stream. Because delivery is
//! at-least-once and unordered across stages, the merge must be
//! idempotent and monotonic: a stale `queued` must never overwrite a
//! later `running` or a terminal status.

use super::{PipelineEvent, Stage, StageStatus};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Last observed status and progress for one stage of one track
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StageView {
    pub status: StageStatus,
    pub progress: u8,
}

/// Projected per-track pipeline view, merged by (track, stage)
///
/// Merge rules:
/// - A status with a higher lattice rank always wins.
/// - At equal rank, progress only moves forward.
/// - A terminal status is never replaced, not even by another terminal
///   status: the first terminal observation wins.
#[derive(Debug, Clone, Default)]
pub struct PipelineState {
    stages: HashMap<(Uuid, Stage), StageView>,
}

impl PipelineState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one observed event; duplicates and reordering are tolerated
    pub fn apply(&mut self, event: &PipelineEvent) {
        let (track_id, stage, incoming) = match event {
            PipelineEvent::StageProgress {
                track_id,
                stage,
                status,
                progress,
                ..
            } => (
                *track_id,
                *stage,
                StageView {
                    status: *status,
                    progress: *progress,
                },
            ),
            PipelineEvent::StageFailed {
                track_id, stage, ..
            } => (
                *track_id,
                *stage,
                StageView {
                    status: StageStatus::Failed,
                    progress: 0,
                },
            ),
            // Completion and batch events carry no per-stage state
            _ => return,
        };

        match self.stages.get_mut(&(track_id, stage)) {
            None => {
                self.stages.insert((track_id, stage), incoming);
            }
            Some(current) => {
                if current.status.is_terminal() {
                    return;
                }
                if incoming.status.rank() > current.status.rank() {
                    *current = incoming;
                } else if incoming.status.rank() == current.status.rank()
                    && incoming.progress > current.progress
                {
                    current.progress = incoming.progress;
                }
            }
        }
    }

    /// Current view for one (track, stage), if any event has been seen
    pub fn stage(&self, track_id: Uuid, stage: Stage) -> Option<StageView> {
        self.stages.get(&(track_id, stage)).copied()
    }

    /// All stage views for one track
    pub fn track(&self, track_id: Uuid) -> HashMap<Stage, StageView> {
        self.stages
            .iter()
            .filter(|((tid, _), _)| *tid == track_id)
            .map(|((_, stage), view)| (*stage, *view))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn progress_event(track_id: Uuid, status: StageStatus, progress: u8) -> PipelineEvent {
        PipelineEvent::StageProgress {
            track_id,
            stage: Stage::Processing,
            status,
            progress,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_out_of_order_queued_does_not_regress() {
        // Events produced [queued, running, completed], delivered
        // [running, queued, completed].
        let track_id = Uuid::new_v4();
        let mut state = PipelineState::new();

        state.apply(&progress_event(track_id, StageStatus::Running, 10));
        state.apply(&progress_event(track_id, StageStatus::Queued, 0));
        state.apply(&progress_event(track_id, StageStatus::Completed, 100));

        let view = state.stage(track_id, Stage::Processing).unwrap();
        assert_eq!(view.status, StageStatus::Completed);
        assert_eq!(view.progress, 100);
    }

    #[test]
    fn test_progress_only_moves_forward_at_equal_rank() {
        let track_id = Uuid::new_v4();
        let mut state = PipelineState::new();

        state.apply(&progress_event(track_id, StageStatus::Running, 60));
        state.apply(&progress_event(track_id, StageStatus::Running, 40)); // duplicate redelivery

        let view = state.stage(track_id, Stage::Processing).unwrap();
        assert_eq!(view.progress, 60);
    }

    #[test]
    fn test_terminal_is_never_replaced() {
        let track_id = Uuid::new_v4();
        let mut state = PipelineState::new();

        state.apply(&progress_event(track_id, StageStatus::Cancelled, 0));
        state.apply(&progress_event(track_id, StageStatus::Completed, 100));

        let view = state.stage(track_id, Stage::Processing).unwrap();
        assert_eq!(view.status, StageStatus::Cancelled);
    }

    #[test]
    fn test_stage_failed_event_projects_failure() {
        let track_id = Uuid::new_v4();
        let mut state = PipelineState::new();

        state.apply(&progress_event(track_id, StageStatus::Running, 30));
        state.apply(&PipelineEvent::StageFailed {
            track_id,
            stage: Stage::Processing,
            reason: "adapter timeout".to_string(),
            timestamp: Utc::now(),
        });

        let view = state.stage(track_id, Stage::Processing).unwrap();
        assert_eq!(view.status, StageStatus::Failed);
    }

    #[test]
    fn test_tracks_are_independent() {
        let t1 = Uuid::new_v4();
        let t2 = Uuid::new_v4();
        let mut state = PipelineState::new();

        state.apply(&progress_event(t1, StageStatus::Completed, 100));
        state.apply(&progress_event(t2, StageStatus::Running, 5));

        assert_eq!(
            state.stage(t1, Stage::Processing).unwrap().status,
            StageStatus::Completed
        );
        assert_eq!(
            state.stage(t2, Stage::Processing).unwrap().status,
            StageStatus::Running
        );
        assert_eq!(state.track(t1).len(), 1);
    }
}
