#![deny(unsafe_code)]

//! Orchestration of the validation stages.
//!
//! [`Pipeline`] runs the stage sequence over one dataset or a batch of
//! datasets and publishes [`PipelineEvent`]s. [`RunMonitor`] consumes those
//! events and owns the derived state observers render: stage summaries, the
//! remaining-time estimate from [`Estimator`] and the debounced alert set from
//! [`AlertAggregator`].

pub mod alerts;
pub mod board;
pub mod config;
pub mod error;
pub mod estimate;
pub mod event;
pub mod history;
pub mod monitor;
pub mod pipeline;

pub use alerts::{AlertAggregator, AlertsAggregated, ClearReason};
pub use board::{Alert, AlertSeverity, StageSummary};
pub use config::{EstimatorSettings, PipelineSettings};
pub use error::{HistoryError, PipelineError, SettingsError};
pub use estimate::{Estimator, OverallEtaResult, StageEtaResult, StageProgressSample};
pub use event::{EventSink, NullSink, PipelineEvent, ProgressEvent};
pub use history::{HistoryStore, PredictionModel, StageFit};
pub use monitor::{MonitorSnapshot, RunMonitor};
pub use pipeline::{BatchReport, CancellationToken, Pipeline, PipelineHandle, RunPlan, TargetFailure};
