//! Camera frame -> inference loop.
//!
//! A [`FrameLoop`] pulls frames from a [`FrameSource`], runs them through an
//! [`InferenceEngine`] one at a time, and publishes the latest result and
//! frame rate to a [`MetricsSink`]. The frame shape follows device
//! orientation via [`resolve`].

pub mod config;
pub mod error;
pub mod pipeline;
pub mod types;

pub use config::{AppConfig, CliArgs, LoopConfig, SourceConfig};
pub use error::{InferenceError, LoopError, SourceError};
pub use pipeline::{
    FrameLoop, FrameSource, InferenceEngine, LatestMetrics, LoopHandle, LoopState, LoopSummary,
    MetricsSink, OrientationTracker, PlatformFamily, resolve,
};
pub use types::{FpsSample, Frame, InferenceResult, Orientation, OutputShape};
