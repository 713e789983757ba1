//! Symptom Collection Core Library
//!
//! Time-boxed evidence collection against Kubernetes workloads: preflight
//! validation, instrumentation and exerciser sources, keyword log watchers,
//! event aggregation and the session orchestrator that ties them together.

pub mod aggregator;
pub mod barrier;
pub mod config;
pub mod domain;
pub mod evidence;
pub mod obs;
pub mod orchestrator;
pub mod preflight;
pub mod report;
pub mod telemetry;
pub mod timefmt;
pub mod watcher;

pub use aggregator::{ErrorAggregator, EventSink, ReportBuffer};
pub use barrier::{StopListener, StopSignal, TaskBarrier, TaskRegistry, TaskStatus};
pub use config::{CollectorConfig, LogFormat};
pub use domain::{
    AggregatorError, CollectionSession, CollectorError, ConfigError, ErrorEvent, ExerciseOutcome,
    Result, SessionRequest, SessionState, SessionWarning, SourceError, TaskKind, TaskState,
    ValidationError, WatchError,
};
pub use evidence::{EvidenceSource, Exerciser, InstrumentSource, SourceContext};
pub use orchestrator::SessionOrchestrator;
pub use preflight::{DeploymentReadiness, PreflightReport, PreflightValidator};
pub use report::SessionReport;
pub use telemetry::init_tracing;
pub use watcher::{KeywordMatcher, LogWatcher};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
