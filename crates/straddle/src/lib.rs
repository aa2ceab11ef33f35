//! Deploy-straddling test orchestration.
//!
//! Staged cases are fanned out into populations, each instance advanced to a
//! different checkpoint before a single deploy command runs, then resumed to
//! completion after it. Every checkpoint of every case thereby executes on
//! both sides of the deploy.

pub mod case;
pub mod config;
pub mod coordinator;
pub mod deploy;
pub mod epoch;
pub mod errors;
pub mod events;
pub mod execution;
pub mod planner;
pub mod registry;
pub mod report;
pub mod session;
pub mod stage;

pub use case::*;
pub use config::*;
pub use coordinator::*;
pub use deploy::*;
pub use epoch::*;
pub use errors::*;
pub use events::*;
pub use execution::*;
pub use planner::*;
pub use registry::*;
pub use report::*;
pub use session::*;
pub use stage::*;
