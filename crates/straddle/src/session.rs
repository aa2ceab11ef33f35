use crate::coordinator::AfterBoundary;
use crate::events::{CaseEvent, LifecycleEvent, SessionEventKind};
use crate::{
    CaseDef, CaseInstance, CaseOutcome, CaseReport, CollectionPlanner, DeployAction, Epoch,
    EpochState, EpochStatus, Plan, PlanStep, RunCoordinator, SessionConfig, SessionReport,
    StraddleError,
};
use std::sync::Arc;
use tracing::info;

pub const SKIPPED_AFTER_CRASH: &str = "skipped after deploy crash";
pub const DEPLOYMENT_BANNER: &str = "DEPLOYMENT TESTING";

/// One orchestration session: plans the cases, then consumes the plan one
/// call at a time. A session deploys at most once.
pub struct Session {
    config: SessionConfig,
    epoch: EpochState,
}

impl Session {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            epoch: EpochState::new(),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn epoch(&self) -> EpochStatus {
        self.epoch.status()
    }

    pub fn plan(&self, cases: &[Arc<CaseDef>]) -> Result<Plan, StraddleError> {
        CollectionPlanner::new(&self.config).plan(cases)
    }

    pub async fn run(self, cases: &[Arc<CaseDef>]) -> Result<SessionReport, StraddleError> {
        let plan = self.plan(cases)?;
        self.execute(plan).await
    }

    pub async fn execute(self, plan: Plan) -> Result<SessionReport, StraddleError> {
        let Plan {
            deploy_mode,
            steps,
            rejected,
            mut populations,
        } = plan;
        let events = self.config.events.clone();
        events.emit(SessionEventKind::Session(LifecycleEvent::Started {
            deploy_mode,
            planned_calls: steps.len(),
        }));
        if deploy_mode && !steps.is_empty() {
            events.banner(DEPLOYMENT_BANNER);
        }
        info!(deploy_mode, planned_calls = steps.len(), "session started");

        let mut entries = Vec::with_capacity(steps.len() + rejected.len());
        for rejection in rejected {
            self.record(
                &mut entries,
                rejection.case,
                None,
                CaseOutcome::Errored {
                    message: rejection.error.to_string(),
                },
            );
        }

        for step in steps {
            let epoch = self.epoch.current();
            let case_id = step.case_id().to_string();
            events.emit(SessionEventKind::Case(CaseEvent::Started {
                case_id: case_id.clone(),
                epoch,
            }));
            let outcome = match &step {
                PlanStep::Standalone(instance) => self.run_standalone(instance).await,
                PlanStep::Deploy(action) => self.run_deploy(action).await,
                PlanStep::Population(instance) => match populations.coordinator_mut(&instance.case) {
                    Some(coordinator) => self.run_population_call(coordinator, instance, epoch).await,
                    None => CaseOutcome::Errored {
                        message: format!("no coordinator registered for '{}'", instance.case.name()),
                    },
                },
            };
            self.record(&mut entries, case_id, Some(epoch), outcome);
        }

        let report = SessionReport {
            deploy_mode,
            final_epoch: self.epoch.current(),
            entries,
        };
        let counts = report.counts();
        events.emit(SessionEventKind::Session(LifecycleEvent::Finished {
            passed: counts.passed,
            failed: counts.failed,
            skipped: counts.skipped,
            errored: counts.errored,
        }));
        info!(
            passed = counts.passed,
            failed = counts.failed,
            skipped = counts.skipped,
            errored = counts.errored,
            epoch = %report.final_epoch,
            "session finished"
        );
        Ok(report)
    }

    async fn run_standalone(&self, instance: &CaseInstance) -> CaseOutcome {
        match RunCoordinator::run_standalone(instance, self.epoch.status()).await {
            Ok(_) => CaseOutcome::Passed,
            Err(failure) => CaseOutcome::Failed {
                message: failure.to_string(),
            },
        }
    }

    async fn run_deploy(&self, action: &DeployAction) -> CaseOutcome {
        match action.run(&self.epoch, &self.config.events).await {
            Ok(_) => CaseOutcome::Passed,
            Err(error) => CaseOutcome::Failed {
                message: error.to_string(),
            },
        }
    }

    async fn run_population_call(
        &self,
        coordinator: &mut RunCoordinator,
        instance: &CaseInstance,
        epoch: Epoch,
    ) -> CaseOutcome {
        match epoch {
            Epoch::Crashed => CaseOutcome::Skipped {
                reason: SKIPPED_AFTER_CRASH.to_string(),
            },
            Epoch::Before => match coordinator.advance_before(instance, self.epoch.status()).await {
                Ok(_) => CaseOutcome::Passed,
                Err(failure) => CaseOutcome::Failed {
                    message: failure.to_string(),
                },
            },
            Epoch::After => match coordinator.advance_after(&instance.id).await {
                Ok(AfterBoundary::Completed { .. }) => CaseOutcome::Passed,
                Ok(AfterBoundary::Skipped { reason, .. }) => CaseOutcome::Skipped { reason },
                Err(failure) => CaseOutcome::Failed {
                    message: failure.to_string(),
                },
            },
        }
    }

    fn record(
        &self,
        entries: &mut Vec<CaseReport>,
        case_id: String,
        epoch: Option<Epoch>,
        outcome: CaseOutcome,
    ) {
        let phase = epoch.unwrap_or_default();
        let event = match &outcome {
            CaseOutcome::Passed => CaseEvent::Passed {
                case_id: case_id.clone(),
                epoch: phase,
            },
            CaseOutcome::Failed { message } => CaseEvent::Failed {
                case_id: case_id.clone(),
                epoch: phase,
                message: message.clone(),
            },
            CaseOutcome::Skipped { reason } => CaseEvent::Skipped {
                case_id: case_id.clone(),
                epoch: phase,
                reason: reason.clone(),
            },
            CaseOutcome::Errored { message } => CaseEvent::Errored {
                case_id: case_id.clone(),
                message: message.clone(),
            },
        };
        self.config.events.emit(SessionEventKind::Case(event));
        entries.push(CaseReport {
            case_id,
            epoch,
            outcome,
        });
    }
}
