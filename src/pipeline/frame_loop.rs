//! The frame inference loop.
//!
//! One worker thread runs cycles back to back: resolve the output shape, pull
//! a frame, run inference, publish metrics, release the frame, then check for
//! cancellation. At most one frame is held and one inference call is in flight
//! at any time.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU8, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, Sender, bounded};

use super::{
    engine::InferenceEngine,
    metrics::MetricsSink,
    orientation::OrientationTracker,
    shape,
};
use crate::{
    config::LoopConfig,
    error::{LoopError, SourceError},
    types::{FpsSample, Frame, OutputShape},
};

/// Produces frames on demand. `next_frame` may block until one is available.
pub trait FrameSource: Send {
    fn next_frame(&mut self, hint: OutputShape) -> Result<Frame, SourceError>;

    /// Hand a frame back once the loop is done with it. Called exactly once
    /// per frame returned from `next_frame`.
    fn release(&mut self, frame: Frame);

    /// Push the camera preview to the screen when auto-render is off.
    fn present(&mut self) {}
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn next_frame(&mut self, hint: OutputShape) -> Result<Frame, SourceError> {
        (**self).next_frame(hint)
    }

    fn release(&mut self, frame: Frame) {
        (**self).release(frame)
    }

    fn present(&mut self) {
        (**self).present()
    }
}

/// Releases its frame back to the source when dropped, including on unwind.
pub struct FrameLease<'a, S: FrameSource + ?Sized> {
    source: &'a mut S,
    frame: Frame,
}

impl<'a, S: FrameSource + ?Sized> FrameLease<'a, S> {
    pub fn acquire(source: &'a mut S, hint: OutputShape) -> Result<Self, SourceError> {
        let frame = source.next_frame(hint)?;
        Ok(Self { source, frame })
    }

    pub fn frame(&self) -> &Frame {
        &self.frame
    }
}

impl<S: FrameSource + ?Sized> Drop for FrameLease<'_, S> {
    fn drop(&mut self) {
        let placeholder = Frame {
            data: Vec::new(),
            width: 0,
            height: 0,
            timestamp: self.frame.timestamp,
        };
        let frame = std::mem::replace(&mut self.frame, placeholder);
        self.source.release(frame);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Running,
    CancelRequested,
    Stopped,
}

impl LoopState {
    fn to_bits(self) -> u8 {
        match self {
            LoopState::Idle => 0,
            LoopState::Running => 1,
            LoopState::CancelRequested => 2,
            LoopState::Stopped => 3,
        }
    }

    fn from_bits(bits: u8) -> Self {
        match bits {
            0 => LoopState::Idle,
            1 => LoopState::Running,
            2 => LoopState::CancelRequested,
            _ => LoopState::Stopped,
        }
    }
}

#[derive(Debug)]
struct StateCell(AtomicU8);

impl StateCell {
    fn new() -> Self {
        StateCell(AtomicU8::new(LoopState::Idle.to_bits()))
    }

    fn load(&self) -> LoopState {
        LoopState::from_bits(self.0.load(Ordering::Acquire))
    }

    fn store(&self, state: LoopState) {
        self.0.store(state.to_bits(), Ordering::Release);
    }

    fn transition(&self, from: LoopState, to: LoopState) -> bool {
        self.0
            .compare_exchange(from.to_bits(), to.to_bits(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Marks the loop stopped when the worker exits, however it exits.
struct StopOnExit(Arc<StateCell>);

impl Drop for StopOnExit {
    fn drop(&mut self) {
        self.0.store(LoopState::Stopped);
    }
}

/// Cloneable control handle usable from any thread.
#[derive(Clone, Debug)]
pub struct LoopHandle {
    state: Arc<StateCell>,
    wake: Sender<()>,
}

impl LoopHandle {
    pub fn state(&self) -> LoopState {
        self.state.load()
    }

    /// Ask the loop to stop at the end of the current cycle. Idempotent; a
    /// no-op unless the loop is running.
    pub fn cancel(&self) {
        if self.state.transition(LoopState::Running, LoopState::CancelRequested) {
            log::info!("frame loop cancel requested");
            // Cut short any frame pacing wait.
            let _ = self.wake.try_send(());
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LoopSummary {
    pub cycles: u64,
    pub failed_inferences: u64,
}

pub struct FrameLoop {
    config: LoopConfig,
    orientation: OrientationTracker,
    sink: Option<Box<dyn MetricsSink>>,
    handle: LoopHandle,
    wake_rx: Receiver<()>,
    worker: Option<thread::JoinHandle<Result<LoopSummary, LoopError>>>,
}

impl FrameLoop {
    pub fn new<M>(config: LoopConfig, orientation: OrientationTracker, sink: M) -> Self
    where
        M: MetricsSink + 'static,
    {
        let (wake_tx, wake_rx) = bounded(1);
        Self {
            config,
            orientation,
            sink: Some(Box::new(sink)),
            handle: LoopHandle {
                state: Arc::new(StateCell::new()),
                wake: wake_tx,
            },
            wake_rx,
            worker: None,
        }
    }

    pub fn handle(&self) -> LoopHandle {
        self.handle.clone()
    }

    pub fn state(&self) -> LoopState {
        self.handle.state()
    }

    pub fn cancel(&self) {
        self.handle.cancel();
    }

    /// Start cycling on a dedicated worker thread. Only valid once, from `Idle`.
    pub fn start<S, E>(&mut self, source: S, engine: E) -> Result<(), LoopError>
    where
        S: FrameSource + 'static,
        E: InferenceEngine + 'static,
    {
        let state = &self.handle.state;
        if !state.transition(LoopState::Idle, LoopState::Running) {
            return Err(LoopError::AlreadyRunning);
        }
        let Some(sink) = self.sink.take() else {
            state.store(LoopState::Stopped);
            return Err(LoopError::AlreadyRunning);
        };

        let worker = Worker {
            source,
            engine,
            sink,
            orientation: self.orientation.clone(),
            config: self.config.clone(),
            state: state.clone(),
            wake: self.wake_rx.clone(),
            summary: LoopSummary::default(),
        };

        log::info!(
            "starting frame loop (nominal {}, platform {}, pacing {})",
            self.config.nominal_shape,
            self.config.platform.label(),
            self.config
                .target_fps
                .map(|fps| format!("{fps} fps"))
                .unwrap_or_else(|| "off".to_string())
        );

        let spawned = thread::Builder::new()
            .name("frame-loop".into())
            .spawn(move || worker.run());
        match spawned {
            Ok(handle) => {
                self.worker = Some(handle);
                Ok(())
            }
            Err(err) => {
                state.store(LoopState::Stopped);
                log::error!("failed to spawn frame loop worker: {err}");
                Err(LoopError::Spawn(err))
            }
        }
    }

    /// Wait for the worker to finish. A fatal error is returned here once.
    pub fn join(&mut self) -> Result<LoopSummary, LoopError> {
        let worker = self.worker.take().ok_or(LoopError::NotRunning)?;
        match worker.join() {
            Ok(outcome) => outcome,
            Err(_) => {
                self.handle.state.store(LoopState::Stopped);
                log::error!("frame loop worker panicked");
                Err(LoopError::WorkerPanicked)
            }
        }
    }
}

impl Drop for FrameLoop {
    fn drop(&mut self) {
        self.cancel();
        if self.worker.is_some() {
            match self.join() {
                Ok(summary) => log::debug!("frame loop torn down after {} cycles", summary.cycles),
                Err(err) => log::warn!("frame loop ended with error during teardown: {err}"),
            }
        }
    }
}

enum Next {
    Continue,
    Stop,
}

struct Worker<S, E> {
    source: S,
    engine: E,
    sink: Box<dyn MetricsSink>,
    orientation: OrientationTracker,
    config: LoopConfig,
    state: Arc<StateCell>,
    wake: Receiver<()>,
    summary: LoopSummary,
}

impl<S: FrameSource, E: InferenceEngine> Worker<S, E> {
    fn run(mut self) -> Result<LoopSummary, LoopError> {
        let _stopped = StopOnExit(self.state.clone());

        loop {
            let cycle_start = Instant::now();
            match self.run_cycle() {
                Ok(Next::Continue) => {
                    if !self.config.auto_render {
                        self.source.present();
                    }
                    self.wait_for_slot(cycle_start);
                }
                Ok(Next::Stop) => {
                    log::info!(
                        "frame loop stopped after {} cycles ({} failed inferences)",
                        self.summary.cycles,
                        self.summary.failed_inferences
                    );
                    return Ok(self.summary);
                }
                Err(err) => {
                    log::error!(
                        "frame source failed after {} cycles, stopping: {err}",
                        self.summary.cycles
                    );
                    return Err(LoopError::SourceExhausted(err));
                }
            }
        }
    }

    fn run_cycle(&mut self) -> Result<Next, SourceError> {
        let orientation = self.orientation.current();
        let hint = shape::resolve(orientation, self.config.platform, self.config.nominal_shape);

        let lease = FrameLease::acquire(&mut self.source, hint)?;
        let start = Instant::now();
        match self.engine.infer(lease.frame()) {
            Ok(result) => self.sink.publish_result(Arc::new(result)),
            Err(err) => {
                self.summary.failed_inferences += 1;
                log::warn!("cycle {}: {err}", self.summary.cycles + 1);
            }
        }
        let elapsed = start.elapsed();
        self.sink.publish_fps(FpsSample::from_elapsed(elapsed));
        drop(lease);

        self.summary.cycles += 1;
        log::trace!(
            "cycle {} done in {elapsed:?} ({orientation}, {hint})",
            self.summary.cycles
        );

        if self.state.load() == LoopState::CancelRequested {
            Ok(Next::Stop)
        } else {
            Ok(Next::Continue)
        }
    }

    fn wait_for_slot(&self, cycle_start: Instant) {
        let Some(target_fps) = self.config.target_fps.filter(|fps| *fps > 0) else {
            thread::yield_now();
            return;
        };
        let slot = Duration::from_secs_f64(1.0 / f64::from(target_fps));
        let remaining = slot.saturating_sub(cycle_start.elapsed());
        if !remaining.is_zero() {
            // Woken early by cancel(); the boundary check still happens at the
            // end of the next cycle.
            let _ = self.wake.recv_timeout(remaining);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::InferenceError, pipeline::metrics::LatestMetrics, types::InferenceResult,
    };

    struct CountingSource {
        remaining: usize,
        released: Arc<AtomicU8>,
    }

    impl FrameSource for CountingSource {
        fn next_frame(&mut self, hint: OutputShape) -> Result<Frame, SourceError> {
            if self.remaining == 0 {
                return Err(SourceError::Exhausted);
            }
            self.remaining -= 1;
            Ok(Frame::new(vec![0; hint.byte_len()], hint.width, hint.height))
        }

        fn release(&mut self, _frame: Frame) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Echo;

    impl InferenceEngine for Echo {
        fn infer(&mut self, frame: &Frame) -> Result<InferenceResult, InferenceError> {
            Ok(InferenceResult::new(vec![frame.width as f32], vec![1]))
        }
    }

    fn new_loop() -> FrameLoop {
        FrameLoop::new(
            LoopConfig::default(),
            OrientationTracker::default(),
            LatestMetrics::new(),
        )
    }

    #[test]
    fn lease_releases_on_drop() {
        let released = Arc::new(AtomicU8::new(0));
        let mut source = CountingSource {
            remaining: 1,
            released: released.clone(),
        };
        {
            let lease = FrameLease::acquire(&mut source, OutputShape::new(2, 2)).unwrap();
            assert_eq!(lease.frame().data.len(), 12);
        }
        assert_eq!(released.load(Ordering::SeqCst), 1);
        assert!(FrameLease::acquire(&mut source, OutputShape::new(2, 2)).is_err());
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn new_loop_is_idle_and_cancel_is_noop() {
        let frame_loop = new_loop();
        assert_eq!(frame_loop.state(), LoopState::Idle);
        frame_loop.cancel();
        frame_loop.cancel();
        assert_eq!(frame_loop.state(), LoopState::Idle);
    }

    #[test]
    fn join_without_start_is_rejected() {
        let mut frame_loop = new_loop();
        assert!(matches!(frame_loop.join(), Err(LoopError::NotRunning)));
    }

    #[test]
    fn second_start_fails() {
        let mut frame_loop = new_loop();
        let released = Arc::new(AtomicU8::new(0));
        let source = || CountingSource {
            remaining: 3,
            released: released.clone(),
        };
        frame_loop.start(source(), Echo).unwrap();
        assert!(matches!(
            frame_loop.start(source(), Echo),
            Err(LoopError::AlreadyRunning)
        ));

        let outcome = frame_loop.join();
        assert!(matches!(
            outcome,
            Err(LoopError::SourceExhausted(SourceError::Exhausted))
        ));
        assert_eq!(frame_loop.state(), LoopState::Stopped);
        assert!(matches!(
            frame_loop.start(source(), Echo),
            Err(LoopError::AlreadyRunning)
        ));
        assert_eq!(released.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn state_bits_round_trip() {
        for state in [
            LoopState::Idle,
            LoopState::Running,
            LoopState::CancelRequested,
            LoopState::Stopped,
        ] {
            assert_eq!(LoopState::from_bits(state.to_bits()), state);
        }
    }
}
