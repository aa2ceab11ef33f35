use crate::Epoch;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionEvent {
    pub sequence_no: u64,
    pub timestamp: String,
    pub kind: SessionEventKind,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "category", rename_all = "snake_case")]
pub enum SessionEventKind {
    Session(LifecycleEvent),
    Banner(BannerEvent),
    Case(CaseEvent),
    Deploy(DeployEvent),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LifecycleEvent {
    Started {
        deploy_mode: bool,
        planned_calls: usize,
    },
    Finished {
        passed: usize,
        failed: usize,
        skipped: usize,
        errored: usize,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BannerEvent {
    pub text: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CaseEvent {
    Started {
        case_id: String,
        epoch: Epoch,
    },
    Passed {
        case_id: String,
        epoch: Epoch,
    },
    Failed {
        case_id: String,
        epoch: Epoch,
        message: String,
    },
    Skipped {
        case_id: String,
        epoch: Epoch,
        reason: String,
    },
    Errored {
        case_id: String,
        message: String,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeployEvent {
    Started {
        command: String,
    },
    Finished {
        command: String,
        duration_ms: u64,
    },
    Failed {
        command: String,
        exit_code: Option<i32>,
        duration_ms: u64,
    },
}

pub trait SessionEventObserver: Send + Sync {
    fn on_event(&self, event: &SessionEvent);
}

impl<F> SessionEventObserver for F
where
    F: Fn(&SessionEvent) + Send + Sync,
{
    fn on_event(&self, event: &SessionEvent) {
        self(event);
    }
}

pub type SharedSessionEventObserver = Arc<dyn SessionEventObserver>;
pub type SessionEventSender = mpsc::UnboundedSender<SessionEvent>;
pub type SessionEventReceiver = mpsc::UnboundedReceiver<SessionEvent>;

/// Reporting surface. Sequence numbers are assigned here, shared by clones.
#[derive(Clone, Default)]
pub struct EventSink {
    observer: Option<SharedSessionEventObserver>,
    sender: Option<SessionEventSender>,
    sequence: Arc<AtomicU64>,
}

impl EventSink {
    pub fn with_observer(observer: SharedSessionEventObserver) -> Self {
        Self {
            observer: Some(observer),
            ..Self::default()
        }
    }

    pub fn with_sender(sender: SessionEventSender) -> Self {
        Self {
            sender: Some(sender),
            ..Self::default()
        }
    }

    pub fn observer(mut self, observer: SharedSessionEventObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn sender(mut self, sender: SessionEventSender) -> Self {
        self.sender = Some(sender);
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.observer.is_some() || self.sender.is_some()
    }

    pub fn emit(&self, kind: SessionEventKind) {
        if !self.is_enabled() {
            return;
        }
        let event = SessionEvent {
            sequence_no: self.sequence.fetch_add(1, Ordering::SeqCst) + 1,
            timestamp: timestamp_now(),
            kind,
        };
        if let Some(observer) = self.observer.as_ref() {
            observer.on_event(&event);
        }
        if let Some(sender) = self.sender.as_ref() {
            let _ = sender.send(event);
        }
    }

    pub fn banner(&self, text: impl Into<String>) {
        self.emit(SessionEventKind::Banner(BannerEvent { text: text.into() }));
    }
}

pub fn session_event_channel() -> (SessionEventSender, SessionEventReceiver) {
    mpsc::unbounded_channel()
}

fn timestamp_now() -> String {
    let since_epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    format!(
        "{}.{:03}Z",
        since_epoch.as_secs(),
        since_epoch.subsec_millis()
    )
}
