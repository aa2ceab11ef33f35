use crate::events::{DeployEvent, SessionEventKind};
use crate::{DeployFailure, Epoch, EpochState, EventSink, StraddleError};
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tokio::process::Command;
use tracing::{info, warn};

pub const DEPLOY_CASE_ID: &str = "deploy";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeployReport {
    pub command: String,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

/// The synthetic case sitting between the two halves of the plan.
#[derive(Clone, Debug)]
pub struct DeployAction {
    command: String,
    shell: String,
    attempted: Arc<AtomicBool>,
}

impl DeployAction {
    pub fn new(command: impl Into<String>, shell: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            shell: shell.into(),
            attempted: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn attempted(&self) -> bool {
        self.attempted.load(Ordering::SeqCst)
    }

    /// Runs the deploy command once and moves the epoch to `after`, or to
    /// `crashed` when the command cannot be launched or exits non-zero.
    pub async fn run(
        &self,
        epoch: &EpochState,
        events: &EventSink,
    ) -> Result<DeployReport, StraddleError> {
        if self.attempted.swap(true, Ordering::SeqCst) {
            return Err(StraddleError::Runtime(
                "deploy action already ran in this session".to_string(),
            ));
        }
        if epoch.current() != Epoch::Before {
            return Err(StraddleError::Runtime(format!(
                "deploy requested while the session is '{}'",
                epoch.current()
            )));
        }

        events.banner("DEPLOY STARTED");
        events.banner(format!(">> {}", self.command));
        events.emit(SessionEventKind::Deploy(DeployEvent::Started {
            command: self.command.clone(),
        }));
        info!(command = %self.command, shell = %self.shell, "deploy started");

        let started = Instant::now();
        let output = Command::new(&self.shell)
            .arg("-c")
            .arg(&self.command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await;
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let failure = match output {
            Ok(output) if output.status.success() => {
                epoch.mark_deployed();
                events.emit(SessionEventKind::Deploy(DeployEvent::Finished {
                    command: self.command.clone(),
                    duration_ms,
                }));
                events.banner("DEPLOY FINISHED");
                info!(duration_ms, "deploy finished");
                return Ok(DeployReport {
                    command: self.command.clone(),
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                    duration_ms,
                });
            }
            Ok(output) => DeployFailure {
                exit_code: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            },
            Err(error) => DeployFailure {
                exit_code: None,
                stdout: String::new(),
                stderr: format!("failed to launch deploy command with '{}': {error}", self.shell),
            },
        };

        epoch.mark_crashed();
        events.emit(SessionEventKind::Deploy(DeployEvent::Failed {
            command: self.command.clone(),
            exit_code: failure.exit_code,
            duration_ms,
        }));
        warn!(exit_code = ?failure.exit_code, "deploy failed, remaining calls will be skipped");
        Err(StraddleError::Deploy(failure))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::events::{SessionEvent, SharedSessionEventObserver};
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn recording_sink() -> (EventSink, Arc<Mutex<Vec<SessionEventKind>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let observer_seen = Arc::clone(&seen);
        let observer: SharedSessionEventObserver = Arc::new(move |event: &SessionEvent| {
            observer_seen
                .lock()
                .expect("observer mutex should lock")
                .push(event.kind.clone());
        });
        (EventSink::with_observer(observer), seen)
    }

    #[tokio::test(flavor = "current_thread")]
    async fn deploy_success_expected_after_epoch_and_side_effect() {
        let temp = TempDir::new().expect("temp dir should be created");
        let marker = temp.path().join("deployed");
        let action = DeployAction::new(format!("echo v2 > '{}'", marker.display()), "sh");
        let epoch = EpochState::new();
        let (events, seen) = recording_sink();

        let report = action
            .run(&epoch, &events)
            .await
            .expect("deploy should succeed");

        assert_eq!(epoch.current(), Epoch::After);
        assert_eq!(
            std::fs::read_to_string(&marker).expect("marker should exist"),
            "v2\n"
        );
        assert!(report.stderr.is_empty());
        let banners: Vec<String> = seen
            .lock()
            .expect("observer mutex should lock")
            .iter()
            .filter_map(|kind| match kind {
                SessionEventKind::Banner(banner) => Some(banner.text.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(banners[0], "DEPLOY STARTED");
        assert!(banners[1].starts_with(">> echo v2"));
        assert_eq!(banners[2], "DEPLOY FINISHED");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn deploy_non_zero_exit_expected_crashed_with_captured_streams() {
        let action = DeployAction::new("echo partial; echo migration failed >&2; exit 3", "sh");
        let epoch = EpochState::new();
        let (events, seen) = recording_sink();

        let error = action
            .run(&epoch, &events)
            .await
            .expect_err("deploy should fail");

        assert_eq!(epoch.current(), Epoch::Crashed);
        let failure = match error {
            StraddleError::Deploy(failure) => failure,
            other => panic!("expected deploy failure, got {other:?}"),
        };
        assert_eq!(failure.exit_code, Some(3));
        assert_eq!(failure.stdout, "partial\n");
        assert_eq!(failure.stderr, "migration failed\n");
        assert!(
            !seen
                .lock()
                .expect("observer mutex should lock")
                .iter()
                .any(|kind| matches!(kind, SessionEventKind::Banner(b) if b.text == "DEPLOY FINISHED"))
        );
    }

    #[tokio::test(flavor = "current_thread")]
    async fn deploy_unknown_command_expected_crashed() {
        let action = DeployAction::new("no_that_command_straddle", "sh");
        let epoch = EpochState::new();
        let error = action
            .run(&epoch, &EventSink::default())
            .await
            .expect_err("unknown command should fail");
        assert_eq!(epoch.current(), Epoch::Crashed);
        assert!(error.to_string().contains("Deploy returned 127"));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn deploy_second_attempt_expected_refused() {
        let action = DeployAction::new("true", "sh");
        let epoch = EpochState::new();
        action
            .run(&epoch, &EventSink::default())
            .await
            .expect("first deploy should succeed");
        let error = action
            .run(&epoch, &EventSink::default())
            .await
            .expect_err("second deploy should be refused");
        assert!(matches!(error, StraddleError::Runtime(_)));
        assert!(action.attempted());
        assert_eq!(epoch.current(), Epoch::After);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn deploy_missing_shell_expected_crashed_without_exit_code() {
        let action = DeployAction::new("true", "/nonexistent/straddle-shell");
        let epoch = EpochState::new();
        let error = action
            .run(&epoch, &EventSink::default())
            .await
            .expect_err("missing shell should fail");
        let failure = match error {
            StraddleError::Deploy(failure) => failure,
            other => panic!("expected deploy failure, got {other:?}"),
        };
        assert_eq!(failure.exit_code, None);
        assert_eq!(epoch.current(), Epoch::Crashed);
    }
}
