use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex};

/// Which side of the deploy boundary the session is on.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Epoch {
    #[default]
    Before,
    After,
    Crashed,
}

impl Epoch {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Before => "before",
            Self::After => "after",
            Self::Crashed => "crashed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Crashed)
    }
}

impl fmt::Display for Epoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Session-wide epoch value. Cloning shares the same underlying state.
#[derive(Clone, Debug, Default)]
pub struct EpochState {
    inner: Arc<Mutex<Epoch>>,
}

impl EpochState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Epoch {
        *self.inner.lock().expect("epoch mutex")
    }

    /// `before -> after`. A crashed session stays crashed.
    pub fn mark_deployed(&self) -> Epoch {
        let mut epoch = self.inner.lock().expect("epoch mutex");
        if *epoch == Epoch::Before {
            *epoch = Epoch::After;
        }
        *epoch
    }

    pub fn mark_crashed(&self) -> Epoch {
        let mut epoch = self.inner.lock().expect("epoch mutex");
        *epoch = Epoch::Crashed;
        *epoch
    }

    pub fn status(&self) -> EpochStatus {
        EpochStatus {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Read-only view of the epoch handed to case bodies.
#[derive(Clone, Debug)]
pub struct EpochStatus {
    inner: Arc<Mutex<Epoch>>,
}

impl EpochStatus {
    pub fn current(&self) -> Epoch {
        *self.inner.lock().expect("epoch mutex")
    }

    pub fn is_before(&self) -> bool {
        self.current() == Epoch::Before
    }

    pub fn is_after(&self) -> bool {
        self.current() == Epoch::After
    }
}
