use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Instant,
};

use anyhow::{Context, Result, anyhow};
use crossbeam_channel::{Receiver, Sender, bounded};
use nokhwa::{
    Camera,
    pixel_format::RgbFormat,
    query,
    utils::{ApiBackend, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType},
};

use super::{BufferPool, CameraFacing, rgba_converter, rgba_to_rgb, send_latest};
use crate::{
    error::SourceError,
    pipeline::frame_loop::FrameSource,
    types::{Frame, OutputShape},
};

// Formats macOS built-in cameras accept; many reject YUYV despite listing it.
const PREFERRED_PIXEL_FORMATS: &[FrameFormat] = &[
    FrameFormat::RAWRGB,
    FrameFormat::RAWBGR,
    FrameFormat::GRAY,
    FrameFormat::YUYV,
    FrameFormat::NV12,
    FrameFormat::MJPEG,
];

// Consecutive read failures after which the camera counts as disconnected.
const MAX_READ_FAILURES: u32 = 30;

#[derive(Clone, Debug)]
pub struct CameraDevice {
    pub index: CameraIndex,
    pub label: String,
}

pub fn available_cameras() -> Result<Vec<CameraDevice>> {
    let cameras = query(ApiBackend::Auto)?;
    Ok(cameras
        .into_iter()
        .map(|info| CameraDevice {
            index: info.index().clone(),
            label: info.human_name(),
        })
        .collect())
}

fn open_camera(index: &CameraIndex) -> Result<Camera> {
    let attempts = [
        RequestedFormat::with_formats(
            RequestedFormatType::AbsoluteHighestFrameRate,
            PREFERRED_PIXEL_FORMATS,
        ),
        RequestedFormat::with_formats(
            RequestedFormatType::AbsoluteHighestResolution,
            PREFERRED_PIXEL_FORMATS,
        ),
        RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestFrameRate),
        RequestedFormat::new::<RgbFormat>(RequestedFormatType::None),
    ];

    let mut last_err = None;
    for requested in attempts {
        match Camera::new(index.clone(), requested) {
            Ok(mut camera) => match camera.open_stream() {
                Ok(()) => return Ok(camera),
                Err(err) => last_err = Some(err.into()),
            },
            Err(err) => last_err = Some(err.into()),
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow!("failed to open camera with any supported format")))
}

struct CapturedFrame {
    image: rgba_converter::RgbaImage,
    timestamp: Instant,
}

struct CaptureThread {
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl CaptureThread {
    fn spawn(
        index: CameraIndex,
        tx: Sender<CapturedFrame>,
        evict: Receiver<CapturedFrame>,
    ) -> Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();

        let handle = thread::Builder::new()
            .name("camera-capture".into())
            .spawn(move || capture_frames(index, tx, evict, stop_flag))
            .context("failed to spawn camera capture thread")?;

        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }
}

impl Drop for CaptureThread {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn capture_frames(
    index: CameraIndex,
    tx: Sender<CapturedFrame>,
    evict: Receiver<CapturedFrame>,
    stop: Arc<AtomicBool>,
) {
    let mut camera = match open_camera(&index) {
        Ok(camera) => camera,
        Err(err) => {
            log::error!("failed to open camera {index:?}: {err:?}");
            return;
        }
    };

    let mut failures = 0;
    while !stop.load(Ordering::Relaxed) {
        let read_start = Instant::now();
        let buffer = match camera.frame() {
            Ok(buffer) => buffer,
            Err(err) => {
                failures += 1;
                log::warn!(
                    "camera frame read failed (after {:?}): {err:?}",
                    read_start.elapsed()
                );
                if failures >= MAX_READ_FAILURES {
                    log::error!("camera {index:?} failed {failures} reads in a row, giving up");
                    return;
                }
                continue;
            }
        };
        failures = 0;

        let image = match rgba_converter::convert(&buffer) {
            Ok(image) => image,
            Err(err) => {
                log::warn!("failed to decode camera frame: {err:?}");
                continue;
            }
        };

        // Keep only the newest frame; the loop pulls at its own pace.
        let frame = CapturedFrame {
            image,
            timestamp: Instant::now(),
        };
        if !send_latest(&tx, &evict, frame) {
            return;
        }
    }
}

/// Live camera feed. Capture runs on its own thread; `next_frame` waits for
/// the newest frame and resizes it to the requested shape.
pub struct CameraSource {
    frames: Receiver<CapturedFrame>,
    facing: CameraFacing,
    pool: BufferPool,
    // Dropped last so the receiver is gone before we join.
    _capture: CaptureThread,
}

impl CameraSource {
    pub fn open(index: u32, facing: CameraFacing) -> Result<Self> {
        let index = CameraIndex::Index(index);
        // Fail fast before spawning the capture thread.
        drop(open_camera(&index)?);

        let (tx, frames) = bounded(1);
        let capture = CaptureThread::spawn(index.clone(), tx, frames.clone())?;
        log::info!("camera {index:?} streaming ({} facing)", facing.label());

        Ok(Self {
            frames,
            facing,
            pool: BufferPool::default(),
            _capture: capture,
        })
    }

    /// The capture thread replaces whatever is waiting, so this is always the
    /// newest frame. `None` once capture has stopped.
    fn recv_latest(&self) -> Option<CapturedFrame> {
        self.frames.recv().ok()
    }
}

impl FrameSource for CameraSource {
    fn next_frame(&mut self, hint: OutputShape) -> Result<Frame, SourceError> {
        let captured = self
            .recv_latest()
            .ok_or_else(|| SourceError::Disconnected("camera capture stopped".into()))?;

        let mut data = self.pool.take();
        let image = &captured.image;
        rgba_to_rgb(
            &image.rgba,
            image.width,
            image.height,
            hint,
            self.facing.mirrors(),
            &mut data,
        )?;

        Ok(Frame {
            data,
            width: hint.width,
            height: hint.height,
            timestamp: captured.timestamp,
        })
    }

    fn release(&mut self, frame: Frame) {
        self.pool.give(frame.data);
    }
}
