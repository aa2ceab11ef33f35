//! Watermark scheduler for one case identity.
//!
//! Every instance of a population is started before the deploy and advanced
//! to its watermark: slot `k` of `M` crosses `k // (M / S)` checkpoints before
//! the deploy and the rest after it. Across the whole population each of the
//! `S` stages therefore runs at least once on each side of the boundary.

use crate::stage::IMPLICIT_STAGES;
use crate::{Advance, CaseDef, CaseFailure, CaseInstance, EpochStatus, StagedExecution};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, warn};

pub const SKIPPED_AFTER_FAILED_BEFORE: &str =
    "post-deploy phase skipped because the pre-deploy phase failed";

/// How far an execution got before the deploy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Progress {
    /// Created, not driven.
    Pending,
    Advanced(u32),
    /// Failed before the deploy; must not be resumed.
    Failed,
}

impl Progress {
    pub fn crossed(self) -> Option<u32> {
        match self {
            Self::Pending => Some(0),
            Self::Advanced(crossed) => Some(crossed),
            Self::Failed => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BeforeBoundary {
    pub slot: usize,
    pub need: u32,
    pub crossed: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AfterBoundary {
    Completed { slot: usize, crossed: u32 },
    Skipped { slot: usize, reason: String },
}

struct PausedRun {
    slot: usize,
    instance_id: String,
    execution: StagedExecution,
    progress: Progress,
}

/// Checkpoints slot `k` crosses before the deploy: `floor(k / (M / S))`,
/// computed as `floor(k * S / M)` and capped at `S - 1`.
pub fn watermark(slot: usize, population: usize, segments: u32) -> u32 {
    if population == 0 || segments == 0 {
        return 0;
    }
    let need = (slot as u128 * u128::from(segments)) / population as u128;
    need.min(u128::from(segments - 1)) as u32
}

pub struct RunCoordinator {
    case: Arc<CaseDef>,
    segments: u32,
    population: usize,
    created: usize,
    paused: VecDeque<PausedRun>,
}

impl RunCoordinator {
    pub(crate) fn new(case: Arc<CaseDef>, segments: u32, population: usize) -> Self {
        Self {
            case,
            segments,
            population,
            created: 0,
            paused: VecDeque::new(),
        }
    }

    pub fn case(&self) -> &Arc<CaseDef> {
        &self.case
    }

    pub fn segments(&self) -> u32 {
        self.segments
    }

    pub fn population(&self) -> usize {
        self.population
    }

    pub fn created(&self) -> usize {
        self.created
    }

    /// Executions created before the deploy and not yet resumed.
    pub fn pending(&self) -> usize {
        self.paused.len()
    }

    pub fn expected_checkpoints(&self) -> u32 {
        self.segments - IMPLICIT_STAGES
    }

    /// Pre-deploy call: start the next slot and drive it to its watermark.
    /// An execution that completes early stays queued so its post-deploy call
    /// still checks the checkpoint total.
    pub async fn advance_before(
        &mut self,
        instance: &CaseInstance,
        epoch: EpochStatus,
    ) -> Result<BeforeBoundary, CaseFailure> {
        let slot = self.created;
        self.created += 1;
        if slot >= self.population {
            warn!(
                case = self.case.name(),
                slot,
                population = self.population,
                "more pre-deploy calls than registered instances"
            );
        }
        let need = watermark(slot, self.population, self.segments);
        let mut execution = instance.start(epoch);
        debug!(case = %instance.id, slot, need, "advancing before deploy");

        let mut crossed = 0;
        while crossed < need {
            match execution.advance().await {
                Ok(Advance::Checkpoint) => crossed += 1,
                Ok(Advance::Completed) => break,
                Err(failure) => {
                    self.paused.push_back(PausedRun {
                        slot,
                        instance_id: instance.id.clone(),
                        execution,
                        progress: Progress::Failed,
                    });
                    return Err(failure);
                }
            }
        }

        let progress = if need == 0 {
            Progress::Pending
        } else {
            Progress::Advanced(crossed)
        };
        self.paused.push_back(PausedRun {
            slot,
            instance_id: instance.id.clone(),
            execution,
            progress,
        });
        Ok(BeforeBoundary {
            slot,
            need,
            crossed,
        })
    }

    /// Post-deploy call: resume the oldest paused execution to completion.
    pub async fn advance_after(&mut self, instance_id: &str) -> Result<AfterBoundary, CaseFailure> {
        let Some(mut run) = self.paused.pop_front() else {
            return Err(CaseFailure::Failed(format!(
                "no paused execution left for '{instance_id}'"
            )));
        };
        if run.instance_id != instance_id {
            warn!(
                expected = %run.instance_id,
                actual = instance_id,
                "post-deploy call resumed an execution created by another instance"
            );
        }
        let Some(before) = run.progress.crossed() else {
            return Ok(AfterBoundary::Skipped {
                slot: run.slot,
                reason: SKIPPED_AFTER_FAILED_BEFORE.to_string(),
            });
        };

        let crossed = before + run.execution.finish().await?;
        let expected = self.expected_checkpoints();
        debug!(case = %run.instance_id, slot = run.slot, crossed, expected, "finished after deploy");
        if crossed != expected {
            return Err(CaseFailure::CheckpointMismatch { expected, crossed });
        }
        Ok(AfterBoundary::Completed {
            slot: run.slot,
            crossed,
        })
    }

    /// No deploy configured: run the body straight through.
    pub async fn run_standalone(
        instance: &CaseInstance,
        epoch: EpochStatus,
    ) -> Result<u32, CaseFailure> {
        instance.start(epoch).finish().await
    }
}
