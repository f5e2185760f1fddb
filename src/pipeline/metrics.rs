use std::sync::{Arc, Mutex, PoisonError};

use crossbeam_channel::{Sender, TrySendError};

use crate::types::{FpsSample, InferenceResult};

/// Receives the latest frame rate and inference result from the frame loop.
/// Called only from the loop's worker thread. Last write wins.
pub trait MetricsSink: Send {
    fn publish_fps(&mut self, fps: FpsSample);
    fn publish_result(&mut self, result: Arc<InferenceResult>);
}

impl<M: MetricsSink + ?Sized> MetricsSink for Box<M> {
    fn publish_fps(&mut self, fps: FpsSample) {
        (**self).publish_fps(fps)
    }

    fn publish_result(&mut self, result: Arc<InferenceResult>) {
        (**self).publish_result(result)
    }
}

#[derive(Clone, Debug, Default)]
pub struct MetricsSnapshot {
    pub fps: Option<FpsSample>,
    pub result: Option<Arc<InferenceResult>>,
    /// Number of fps samples published so far.
    pub fps_updates: u64,
}

/// Holds only the most recent values; readers on other threads take snapshots.
#[derive(Clone, Debug, Default)]
pub struct LatestMetrics {
    inner: Arc<Mutex<MetricsSnapshot>>,
}

impl LatestMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl MetricsSink for LatestMetrics {
    fn publish_fps(&mut self, fps: FpsSample) {
        let mut latest = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        latest.fps = Some(fps);
        latest.fps_updates += 1;
    }

    fn publish_result(&mut self, result: Arc<InferenceResult>) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .result = Some(result);
    }
}

#[derive(Clone, Debug)]
pub enum MetricsEvent {
    Fps(FpsSample),
    Result(Arc<InferenceResult>),
}

/// Forwards updates to a consumer without ever blocking the loop. Updates are
/// dropped while the channel is full.
#[derive(Clone, Debug)]
pub struct ChannelSink {
    tx: Sender<MetricsEvent>,
}

impl ChannelSink {
    pub fn new(tx: Sender<MetricsEvent>) -> Self {
        Self { tx }
    }

    fn forward(&self, event: MetricsEvent) {
        match self.tx.try_send(event) {
            Ok(()) | Err(TrySendError::Full(_)) => {}
            Err(TrySendError::Disconnected(_)) => {
                log::trace!("metrics consumer gone, dropping update");
            }
        }
    }
}

impl MetricsSink for ChannelSink {
    fn publish_fps(&mut self, fps: FpsSample) {
        self.forward(MetricsEvent::Fps(fps));
    }

    fn publish_result(&mut self, result: Arc<InferenceResult>) {
        self.forward(MetricsEvent::Result(result));
    }
}

/// Logs every update before passing it on.
#[derive(Debug)]
pub struct LogSink<M> {
    inner: M,
    preview_len: usize,
}

impl<M: MetricsSink> LogSink<M> {
    pub fn new(inner: M) -> Self {
        Self {
            inner,
            preview_len: 8,
        }
    }

    pub fn with_preview_len(mut self, preview_len: usize) -> Self {
        self.preview_len = preview_len;
        self
    }
}

impl<M: MetricsSink> MetricsSink for LogSink<M> {
    fn publish_fps(&mut self, fps: FpsSample) {
        log::trace!("fps: {}", fps.whole());
        self.inner.publish_fps(fps);
    }

    fn publish_result(&mut self, result: Arc<InferenceResult>) {
        let shown = result.len().min(self.preview_len);
        log::debug!(
            "predictions {:?} ({} values): {:?}{}",
            result.shape,
            result.len(),
            &result.values[..shown],
            if shown < result.len() { " ..." } else { "" }
        );
        self.inner.publish_result(result);
    }
}
