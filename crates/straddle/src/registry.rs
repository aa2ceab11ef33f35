use crate::{CaseDef, RunCoordinator};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Reference identity of a case definition.
#[derive(Clone, Debug)]
pub struct CaseIdentity(Arc<CaseDef>);

impl CaseIdentity {
    pub fn of(case: &Arc<CaseDef>) -> Self {
        Self(Arc::clone(case))
    }

    pub fn case(&self) -> &Arc<CaseDef> {
        &self.0
    }

    fn address(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }
}

impl PartialEq for CaseIdentity {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for CaseIdentity {}

impl PartialOrd for CaseIdentity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CaseIdentity {
    fn cmp(&self, other: &Self) -> Ordering {
        self.address().cmp(&other.address())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Census {
    segments: u32,
    population: usize,
}

/// Collecting phase: instances are counted per identity. Nothing can run
/// until the builder is sealed.
#[derive(Debug, Default)]
pub struct PopulationBuilder {
    census: BTreeMap<CaseIdentity, Census>,
}

impl PopulationBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts one more instance of `case`; returns the population so far.
    pub fn register(&mut self, case: &Arc<CaseDef>, segments: u32) -> usize {
        let census = self
            .census
            .entry(CaseIdentity::of(case))
            .or_insert(Census {
                segments,
                population: 0,
            });
        census.population += 1;
        census.population
    }

    pub fn population(&self, case: &Arc<CaseDef>) -> usize {
        self.census
            .get(&CaseIdentity::of(case))
            .map(|census| census.population)
            .unwrap_or_default()
    }

    /// Fixes every population and creates the coordinators.
    pub fn seal(self) -> PopulationRegistry {
        let coordinators = self
            .census
            .into_iter()
            .map(|(identity, census)| {
                let coordinator = RunCoordinator::new(
                    Arc::clone(identity.case()),
                    census.segments,
                    census.population,
                );
                (identity, coordinator)
            })
            .collect();
        PopulationRegistry { coordinators }
    }
}

/// Running phase: populations are fixed, one coordinator per identity.
#[derive(Default)]
pub struct PopulationRegistry {
    coordinators: BTreeMap<CaseIdentity, RunCoordinator>,
}

impl PopulationRegistry {
    pub fn coordinator(&self, case: &Arc<CaseDef>) -> Option<&RunCoordinator> {
        self.coordinators.get(&CaseIdentity::of(case))
    }

    pub fn coordinator_mut(&mut self, case: &Arc<CaseDef>) -> Option<&mut RunCoordinator> {
        self.coordinators.get_mut(&CaseIdentity::of(case))
    }

    pub fn len(&self) -> usize {
        self.coordinators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coordinators.is_empty()
    }

    /// Executions started before the deploy that have not been resumed yet.
    pub fn pending(&self) -> usize {
        self.coordinators.values().map(RunCoordinator::pending).sum()
    }
}
