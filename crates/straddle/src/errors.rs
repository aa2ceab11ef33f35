use thiserror::Error;

/// Error type returned by case bodies. Any error converts with `?`.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub const CHECKPOINT_MISMATCH_MESSAGE: &str = "checkpoints must be reached unconditionally";

#[derive(Debug, Error)]
pub enum StraddleError {
    #[error("usage error: {0}")]
    Usage(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("runtime error: {0}")]
    Runtime(String),
    #[error(transparent)]
    Deploy(#[from] DeployFailure),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("Deploy returned {}.\n\nstdout: {stdout}\n\nstderr: {stderr}", exit_code_label(.exit_code))]
pub struct DeployFailure {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

fn exit_code_label(exit_code: &Option<i32>) -> String {
    exit_code
        .map(|code| code.to_string())
        .unwrap_or_else(|| "no exit code".to_string())
}

/// Why a single case call did not pass.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CaseFailure {
    #[error("{0}")]
    Failed(String),
    #[error("case panicked: {0}")]
    Panicked(String),
    #[error("{CHECKPOINT_MISMATCH_MESSAGE} (expected {expected}, crossed {crossed})")]
    CheckpointMismatch { expected: u32, crossed: u32 },
}

impl CaseFailure {
    pub fn from_body_error(error: BoxError) -> Self {
        Self::Failed(error.to_string())
    }
}
