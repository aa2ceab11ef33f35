use crate::EventSink;
use crate::stage::DEFAULT_CHECKPOINT_KEYWORD;

pub const DEFAULT_SHELL: &str = "sh";

/// Configuration for one orchestration session.
#[derive(Clone)]
pub struct SessionConfig {
    /// Absent means deploy mode is off and every case runs straight through.
    pub deploy_command: Option<String>,
    pub shell: String,
    pub checkpoint_keyword: String,
    pub events: EventSink,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            deploy_command: None,
            shell: DEFAULT_SHELL.to_string(),
            checkpoint_keyword: DEFAULT_CHECKPOINT_KEYWORD.to_string(),
            events: EventSink::default(),
        }
    }
}

impl SessionConfig {
    pub fn with_deploy_command(mut self, command: Option<impl Into<String>>) -> Self {
        self.deploy_command = command
            .map(|command| Into::<String>::into(command).trim().to_string())
            .filter(|command| !command.is_empty());
        self
    }

    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    pub fn deploy_mode(&self) -> bool {
        self.deploy_command.is_some()
    }
}
