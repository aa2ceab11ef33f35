use serde_json::Value;
use std::process::ExitCode;
use std::sync::Arc;
use straddle::{CaseDef, Epoch, staged_case};
use tracing::info;

/// Stand-in for an application whose state must survive a deploy.
#[derive(Debug, Default)]
struct ProductionApp {
    counter: u32,
}

impl ProductionApp {
    fn bump(&mut self) -> u32 {
        self.counter += 1;
        self.counter
    }
}

fn production_counter_case() -> Arc<CaseDef> {
    staged_case!("test_production_counter", |cx| async move {
        let mut app = ProductionApp::default();
        if app.bump() != 1 {
            return Err("counter should start at one".into());
        }
        cx.checkpoint().await;
        if app.bump() != 2 {
            return Err(format!("counter lost across {} boundary", cx.epoch().current()).into());
        }
        cx.checkpoint().await;
        if app.bump() != 3 {
            return Err("counter should reach three".into());
        }
        Ok(())
    })
    .deployment()
    .into_shared()
}

fn epoch_visible_case() -> Arc<CaseDef> {
    staged_case!("test_epoch_visible", |cx, params| async move {
        let region = params
            .get("region")
            .and_then(Value::as_str)
            .unwrap_or("default")
            .to_string();
        let first = cx.epoch().current();
        cx.checkpoint().await;
        let second = cx.epoch().current();
        if first == Epoch::After && second == Epoch::Before {
            return Err(format!("epoch went backwards in {region}").into());
        }
        info!(region = %region, %first, %second, "epoch observed");
        Ok(())
    })
    .deployment()
    .parametrize("region", ["eu", "us"])
    .into_shared()
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    straddle_cli::run_harness(vec![production_counter_case(), epoch_visible_case()]).await
}
