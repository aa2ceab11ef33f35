use crate::registry::{CaseIdentity, PopulationBuilder};
use crate::stage::count_segments;
use crate::{
    CaseDef, CaseInstance, DeployAction, PopulationRegistry, SessionConfig, StraddleError,
    deploy::DEPLOY_CASE_ID,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// One entry of the ordered plan.
#[derive(Clone, Debug)]
pub enum PlanStep {
    /// No deploy configured: the body runs straight through.
    Standalone(CaseInstance),
    /// Population member. Routed on the epoch at the time it executes.
    Population(CaseInstance),
    Deploy(DeployAction),
}

impl PlanStep {
    pub fn case_id(&self) -> &str {
        match self {
            Self::Standalone(instance) | Self::Population(instance) => &instance.id,
            Self::Deploy(_) => DEPLOY_CASE_ID,
        }
    }
}

/// A case excluded at planning time.
#[derive(Debug)]
pub struct PlanRejection {
    pub case: String,
    pub error: StraddleError,
}

pub struct Plan {
    pub deploy_mode: bool,
    pub steps: Vec<PlanStep>,
    pub rejected: Vec<PlanRejection>,
    pub populations: PopulationRegistry,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn population_size(&self) -> usize {
        self.steps
            .iter()
            .filter(|step| matches!(step, PlanStep::Population(_)))
            .count()
            / 2
    }
}

pub struct CollectionPlanner<'a> {
    config: &'a SessionConfig,
}

impl<'a> CollectionPlanner<'a> {
    pub fn new(config: &'a SessionConfig) -> Self {
        Self { config }
    }

    pub fn plan(&self, cases: &[Arc<CaseDef>]) -> Result<Plan, StraddleError> {
        let cases = distinct(cases);
        match self.config.deploy_command.as_deref() {
            None => Ok(standalone_plan(&cases)),
            Some(command) => self.deploy_plan(&cases, command),
        }
    }

    fn deploy_plan(&self, cases: &[Arc<CaseDef>], command: &str) -> Result<Plan, StraddleError> {
        let mut builder = PopulationBuilder::new();
        let mut population = Vec::new();
        let mut rejected = Vec::new();

        for case in cases.iter().filter(|case| case.is_deployment()) {
            let segments = match count_segments(case, &self.config.checkpoint_keyword) {
                Ok(segments) => segments,
                Err(error @ StraddleError::Usage(_)) => {
                    warn!(case = case.name(), %error, "deployment case rejected");
                    rejected.push(PlanRejection {
                        case: case.name().to_string(),
                        error,
                    });
                    continue;
                }
                Err(error) => return Err(error),
            };
            let parameter_sets = case.parameter_sets();
            // Segment-major: watermark group g holds every parameter set once.
            for segment in 0..segments {
                for (ids, params) in &parameter_sets {
                    builder.register(case, segments);
                    population.push(CaseInstance::new(
                        Arc::clone(case),
                        ids.clone(),
                        params.clone(),
                        Some(segment),
                    ));
                }
            }
            debug!(
                case = case.name(),
                segments,
                population = builder.population(case),
                "deployment population planned"
            );
        }

        let populations = builder.seal();
        if population.is_empty() {
            return Ok(Plan {
                deploy_mode: true,
                steps: Vec::new(),
                rejected,
                populations,
            });
        }

        let deploy = DeployAction::new(command, self.config.shell.clone());
        let mut steps: Vec<PlanStep> = population
            .iter()
            .cloned()
            .map(PlanStep::Population)
            .collect();
        steps.push(PlanStep::Deploy(deploy));
        steps.extend(population.into_iter().map(PlanStep::Population));
        Ok(Plan {
            deploy_mode: true,
            steps,
            rejected,
            populations,
        })
    }
}

fn standalone_plan(cases: &[Arc<CaseDef>]) -> Plan {
    let steps = cases
        .iter()
        .flat_map(|case| case.instances())
        .map(PlanStep::Standalone)
        .collect();
    Plan {
        deploy_mode: false,
        steps,
        rejected: Vec::new(),
        populations: PopulationRegistry::default(),
    }
}

fn distinct(cases: &[Arc<CaseDef>]) -> Vec<Arc<CaseDef>> {
    let mut seen = BTreeSet::new();
    cases
        .iter()
        .filter(|case| {
            let fresh = seen.insert(CaseIdentity::of(case));
            if !fresh {
                warn!(case = case.name(), "case listed twice, ignoring the duplicate");
            }
            fresh
        })
        .cloned()
        .collect()
}
