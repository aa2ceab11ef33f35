use crate::Epoch;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CaseOutcome {
    Passed,
    Failed { message: String },
    Skipped { reason: String },
    Errored { message: String },
}

impl CaseOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Passed => "passed",
            Self::Failed { .. } => "failed",
            Self::Skipped { .. } => "skipped",
            Self::Errored { .. } => "errored",
        }
    }

    pub fn is_passed(&self) -> bool {
        matches!(self, Self::Passed)
    }
}

/// Outcome of one call. `epoch` is the phase the call started in, so the
/// `deploy` entry always reads `before`; planning errors carry none.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseReport {
    pub case_id: String,
    pub epoch: Option<Epoch>,
    pub outcome: CaseOutcome,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeCounts {
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub errored: usize,
}

impl OutcomeCounts {
    pub fn total(&self) -> usize {
        self.passed + self.failed + self.skipped + self.errored
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionReport {
    pub deploy_mode: bool,
    pub final_epoch: Epoch,
    pub entries: Vec<CaseReport>,
}

impl SessionReport {
    pub fn counts(&self) -> OutcomeCounts {
        let mut counts = OutcomeCounts::default();
        for entry in &self.entries {
            match entry.outcome {
                CaseOutcome::Passed => counts.passed += 1,
                CaseOutcome::Failed { .. } => counts.failed += 1,
                CaseOutcome::Skipped { .. } => counts.skipped += 1,
                CaseOutcome::Errored { .. } => counts.errored += 1,
            }
        }
        counts
    }

    pub fn is_success(&self) -> bool {
        let counts = self.counts();
        counts.failed == 0 && counts.errored == 0
    }

    pub fn entries_for<'a>(&'a self, case_id: &'a str) -> impl Iterator<Item = &'a CaseReport> {
        self.entries
            .iter()
            .filter(move |entry| entry.case_id == case_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(case_id: &str, outcome: CaseOutcome) -> CaseReport {
        CaseReport {
            case_id: case_id.to_string(),
            epoch: Some(Epoch::Before),
            outcome,
        }
    }

    #[test]
    fn counts_expected_one_bucket_per_outcome() {
        let report = SessionReport {
            deploy_mode: true,
            final_epoch: Epoch::After,
            entries: vec![
                entry("a", CaseOutcome::Passed),
                entry("a", CaseOutcome::Skipped {
                    reason: "r".to_string(),
                }),
                entry("b", CaseOutcome::Failed {
                    message: "m".to_string(),
                }),
                entry("c", CaseOutcome::Passed),
            ],
        };
        let counts = report.counts();
        assert_eq!(
            counts,
            OutcomeCounts {
                passed: 2,
                failed: 1,
                skipped: 1,
                errored: 0,
            }
        );
        assert_eq!(counts.total(), 4);
        assert!(!report.is_success());
        assert_eq!(report.entries_for("a").count(), 2);
    }
}
