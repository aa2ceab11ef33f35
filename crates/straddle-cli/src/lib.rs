//! Command-line host for straddle sessions.
//!
//! A suite binary hands its cases to [`run_harness`] from `main`; the same
//! entry point works as the `main` of a `harness = false` test target. With
//! no subcommand, or with arguments meant for the libtest harness, it runs
//! the session with the `run` defaults.

use clap::error::ErrorKind;
use clap::{ArgAction, Parser, Subcommand};
use serde_json::json;
use std::ffi::OsString;
use std::process::ExitCode;
use std::sync::Arc;
use straddle::{
    CaseDef, CaseEvent, CaseOutcome, DEFAULT_SHELL, EventSink, LifecycleEvent, Plan, PlanStep,
    Session, SessionConfig, SessionEvent, SessionEventKind, SessionReport, session_event_channel,
};
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = BIN_NAME)]
#[command(about = "Runs staged cases across a single deploy")]
pub struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

const BIN_NAME: &str = "straddle-cli";

#[derive(Subcommand, Debug)]
enum Commands {
    Run(RunArgs),
    Plan(PlanArgs),
}

#[derive(clap::Args, Debug)]
struct DeployArgs {
    /// Shell command executed once between the two population phases.
    #[arg(long = "deploy-cmd", env = "STRADDLE_DEPLOY_CMD")]
    deploy_cmd: Option<String>,
    #[arg(long, env = "STRADDLE_SHELL", default_value = DEFAULT_SHELL)]
    shell: String,
}

#[derive(clap::Args, Debug)]
struct RunArgs {
    #[command(flatten)]
    deploy: DeployArgs,
    #[arg(long = "no-stream-events", action = ArgAction::SetTrue)]
    no_stream_events: bool,
    #[arg(long, action = ArgAction::SetTrue)]
    event_json: bool,
}

#[derive(clap::Args, Debug)]
struct PlanArgs {
    #[command(flatten)]
    deploy: DeployArgs,
    #[arg(long, action = ArgAction::SetTrue)]
    json: bool,
}

impl DeployArgs {
    fn config(&self) -> SessionConfig {
        SessionConfig::default()
            .with_deploy_command(self.deploy_cmd.as_deref())
            .with_shell(self.shell.clone())
    }
}

/// Parses the process arguments and runs `cases`.
pub async fn run_harness(cases: Vec<Arc<CaseDef>>) -> ExitCode {
    let _ = dotenvy::dotenv();
    init_tracing();
    let cli = match parse_cli_from(std::env::args_os()) {
        Ok(cli) => cli,
        Err(error) => error.exit(),
    };
    run_cli(cli, &cases).await
}

/// Parses `args`, treating a missing subcommand or unrecognised arguments
/// (libtest flags, test name filters) as a plain `run`.
pub fn parse_cli_from<I, T>(args: I) -> Result<Cli, clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    match Cli::try_parse_from(args) {
        Ok(Cli { command: None }) => default_run(),
        Ok(cli) => Ok(cli),
        Err(error)
            if matches!(
                error.kind(),
                ErrorKind::UnknownArgument | ErrorKind::InvalidSubcommand
            ) =>
        {
            warn!(kind = ?error.kind(), "ignoring unrecognised arguments, running with defaults");
            default_run()
        }
        Err(error) => Err(error),
    }
}

fn default_run() -> Result<Cli, clap::Error> {
    Cli::try_parse_from([BIN_NAME, "run"])
}

pub async fn run_cli(cli: Cli, cases: &[Arc<CaseDef>]) -> ExitCode {
    let result = match cli.command {
        Some(Commands::Run(args)) => run_command(args, cases).await,
        Some(Commands::Plan(args)) => plan_command(args, cases),
        None => Err("no subcommand given".to_string()),
    };

    match result {
        Ok(code) => code,
        Err(error) => {
            eprintln!("error: {error}");
            ExitCode::from(1)
        }
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .try_init();
}

async fn run_command(args: RunArgs, cases: &[Arc<CaseDef>]) -> Result<ExitCode, String> {
    let (event_sink, event_task) = event_stream(!args.no_stream_events, args.event_json);
    let config = args.deploy.config().with_events(event_sink);

    let report = Session::new(config)
        .run(cases)
        .await
        .map_err(|error| error.to_string())?;

    if let Some(task) = event_task {
        task.await.map_err(|error| error.to_string())?;
    }

    print_session_summary(&report);
    Ok(exit_code_for_report(&report))
}

fn plan_command(args: PlanArgs, cases: &[Arc<CaseDef>]) -> Result<ExitCode, String> {
    let session = Session::new(args.deploy.config());
    let plan = session.plan(cases).map_err(|error| error.to_string())?;
    if args.json {
        let json = serde_json::to_string_pretty(&plan_json(&plan)).map_err(|e| e.to_string())?;
        println!("{json}");
    } else {
        println!(
            "mode: {}",
            if plan.deploy_mode { "deploy" } else { "standalone" }
        );
        for step in &plan.steps {
            println!("{} {}", step_kind(step), step.case_id());
        }
        for rejection in &plan.rejected {
            println!("rejected {}: {}", rejection.case, rejection.error);
        }
    }
    if plan.rejected.is_empty() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(2))
    }
}

fn plan_json(plan: &Plan) -> serde_json::Value {
    let steps: Vec<_> = plan
        .steps
        .iter()
        .map(|step| json!({ "kind": step_kind(step), "id": step.case_id() }))
        .collect();
    let rejected: Vec<_> = plan
        .rejected
        .iter()
        .map(|rejection| json!({ "case": rejection.case, "error": rejection.error.to_string() }))
        .collect();
    json!({
        "deploy_mode": plan.deploy_mode,
        "population_size": plan.population_size(),
        "steps": steps,
        "rejected": rejected,
    })
}

fn step_kind(step: &PlanStep) -> &'static str {
    match step {
        PlanStep::Standalone(_) => "standalone",
        PlanStep::Population(_) => "population",
        PlanStep::Deploy(_) => "deploy",
    }
}

fn event_stream(
    stream_events: bool,
    event_json: bool,
) -> (EventSink, Option<tokio::task::JoinHandle<()>>) {
    if !stream_events {
        return (EventSink::default(), None);
    }

    let (tx, mut rx) = session_event_channel();
    let task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if event_json {
                match serde_json::to_string(&event) {
                    Ok(line) => println!("{line}"),
                    Err(_) => print_event_text(&event),
                }
            } else {
                print_event_text(&event);
            }
        }
    });
    (EventSink::with_sender(tx), Some(task))
}

fn print_event_text(event: &SessionEvent) {
    if let Some(line) = render_event_text(&event.kind) {
        println!("{line}");
    }
}

fn render_event_text(kind: &SessionEventKind) -> Option<String> {
    match kind {
        SessionEventKind::Banner(banner) => Some(format!("===== {} =====", banner.text)),
        SessionEventKind::Session(LifecycleEvent::Started {
            deploy_mode,
            planned_calls,
        }) => Some(format!(
            "session started: deploy_mode={deploy_mode} planned_calls={planned_calls}"
        )),
        SessionEventKind::Session(LifecycleEvent::Finished { .. }) => None,
        SessionEventKind::Case(case) => render_case_event(case),
        SessionEventKind::Deploy(_) => None,
    }
}

fn render_case_event(event: &CaseEvent) -> Option<String> {
    match event {
        CaseEvent::Started { .. } => None,
        CaseEvent::Passed { case_id, epoch } => Some(format!("{case_id} [{epoch}] PASSED")),
        CaseEvent::Failed {
            case_id,
            epoch,
            message,
        } => Some(format!("{case_id} [{epoch}] FAILED\n{}", indent(message))),
        CaseEvent::Skipped {
            case_id,
            epoch,
            reason,
        } => Some(format!("{case_id} [{epoch}] SKIPPED ({reason})")),
        CaseEvent::Errored { case_id, message } => {
            Some(format!("{case_id} ERROR\n{}", indent(message)))
        }
    }
}

fn indent(message: &str) -> String {
    message
        .lines()
        .map(|line| format!("    {line}"))
        .collect::<Vec<_>>()
        .join("\n")
}

fn print_session_summary(report: &SessionReport) {
    for entry in &report.entries {
        match &entry.outcome {
            CaseOutcome::Failed { message } | CaseOutcome::Errored { message } => {
                let first_line = message.lines().next().unwrap_or_default();
                println!("{} {}: {first_line}", entry.outcome.as_str(), entry.case_id);
            }
            CaseOutcome::Passed | CaseOutcome::Skipped { .. } => {}
        }
    }
    println!("epoch: {}", report.final_epoch);
    println!("{}", summary_line(report));
}

fn summary_line(report: &SessionReport) -> String {
    let counts = report.counts();
    format!(
        "passed={} failed={} skipped={} errors={}",
        counts.passed, counts.failed, counts.skipped, counts.errored
    )
}

fn exit_code_for_report(report: &SessionReport) -> ExitCode {
    if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use straddle::{BannerEvent, CaseReport, Epoch};

    #[test]
    fn run_args_expected_deploy_command_and_shell() {
        let cli = Cli::try_parse_from([
            "straddle-cli",
            "run",
            "--deploy-cmd",
            "make deploy",
            "--shell",
            "bash",
            "--event-json",
        ])
        .expect("run args should parse");
        let Some(Commands::Run(args)) = cli.command else {
            panic!("expected run subcommand");
        };
        assert!(args.event_json);
        assert!(!args.no_stream_events);
        let config = args.deploy.config();
        assert_eq!(config.deploy_command.as_deref(), Some("make deploy"));
        assert_eq!(config.shell, "bash");
    }

    #[test]
    fn blank_deploy_command_expected_standalone_config() {
        let cli = Cli::try_parse_from(["straddle-cli", "plan", "--deploy-cmd", "  "])
            .expect("plan args should parse");
        let Some(Commands::Plan(args)) = cli.command else {
            panic!("expected plan subcommand");
        };
        assert!(!args.deploy.config().deploy_mode());
    }

    #[test]
    fn no_arguments_expected_default_run() {
        let cli = parse_cli_from([BIN_NAME]).expect("empty args should fall back to run");
        let Some(Commands::Run(args)) = cli.command else {
            panic!("expected run subcommand");
        };
        assert!(!args.event_json);
        assert!(!args.no_stream_events);
    }

    #[test]
    fn libtest_arguments_expected_default_run() {
        for args in [
            vec![BIN_NAME, "--nocapture"],
            vec![BIN_NAME, "--test-threads", "1"],
            vec![BIN_NAME, "test_production_counter"],
        ] {
            let cli = parse_cli_from(args.clone())
                .unwrap_or_else(|error| panic!("{args:?} should fall back to run: {error}"));
            assert!(matches!(cli.command, Some(Commands::Run(_))), "{args:?}");
        }
    }

    #[test]
    fn help_request_expected_clap_error_kept() {
        let error = parse_cli_from([BIN_NAME, "--help"]).expect_err("help should not run");
        assert_eq!(error.kind(), ErrorKind::DisplayHelp);
    }

    #[test]
    fn render_event_text_expected_banner_and_case_lines() {
        let banner = SessionEventKind::Banner(BannerEvent {
            text: "DEPLOY STARTED".to_string(),
        });
        assert_eq!(
            render_event_text(&banner).as_deref(),
            Some("===== DEPLOY STARTED =====")
        );

        let skipped = SessionEventKind::Case(CaseEvent::Skipped {
            case_id: "test_app[2]".to_string(),
            epoch: Epoch::Crashed,
            reason: "skipped after deploy crash".to_string(),
        });
        assert_eq!(
            render_event_text(&skipped).as_deref(),
            Some("test_app[2] [crashed] SKIPPED (skipped after deploy crash)")
        );

        let failed = SessionEventKind::Case(CaseEvent::Failed {
            case_id: "deploy".to_string(),
            epoch: Epoch::Before,
            message: "Deploy returned 1.\n\nstdout: \n\nstderr: boom".to_string(),
        });
        let rendered = render_event_text(&failed).expect("failure should render");
        assert!(rendered.starts_with("deploy [before] FAILED\n    Deploy returned 1."));
        assert!(rendered.ends_with("    stderr: boom"));
    }

    #[test]
    fn summary_line_expected_all_four_counts() {
        let report = SessionReport {
            deploy_mode: true,
            final_epoch: Epoch::After,
            entries: vec![
                CaseReport {
                    case_id: "a".to_string(),
                    epoch: Some(Epoch::Before),
                    outcome: CaseOutcome::Passed,
                },
                CaseReport {
                    case_id: "b".to_string(),
                    epoch: None,
                    outcome: CaseOutcome::Errored {
                        message: "need at least one checkpoint".to_string(),
                    },
                },
            ],
        };
        assert_eq!(summary_line(&report), "passed=1 failed=0 skipped=0 errors=1");
        assert!(!report.is_success());
    }
}
