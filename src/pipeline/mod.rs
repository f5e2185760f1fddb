pub mod engine;
pub mod frame_loop;
pub mod metrics;
pub mod orientation;
pub mod shape;
pub mod source;

// Re-exports for convenience
pub use engine::{InferenceEngine, OrtEngine, OrtEngineConfig};
pub use frame_loop::{FrameLease, FrameLoop, FrameSource, LoopHandle, LoopState, LoopSummary};
pub use metrics::{ChannelSink, LatestMetrics, LogSink, MetricsEvent, MetricsSink, MetricsSnapshot};
pub use orientation::OrientationTracker;
pub use shape::{PlatformFamily, resolve};
pub use source::{CameraFacing, ImageSource};
