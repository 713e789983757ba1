//! Domain types shared by every collection component.

pub mod error;
pub mod event;
pub mod session;
pub mod task;

pub use error::{
    AggregatorError, CollectorError, ConfigError, Result, SessionWarning, SourceError,
    SourceResult, ValidationError, WatchError,
};
pub use event::ErrorEvent;
pub use session::{
    CollectionSession, SessionMachine, SessionRequest, SessionState, StateTransition,
};
pub use task::{ExerciseOutcome, TaskKind, TaskOutcome, TaskRecord, TaskState};
