use std::{
    thread,
    time::{Duration, Instant},
};

use anyhow::{Context, Result};
use clap::Parser;
use frame_loop::{
    AppConfig, CliArgs, FrameLoop, FrameSource, LatestMetrics, LoopError, LoopState,
    OrientationTracker, SourceConfig, SourceError,
    pipeline::{CameraFacing, LogSink, OrtEngine, OrtEngineConfig, source::ImageSource},
};

const STATUS_INTERVAL: Duration = Duration::from_secs(1);

fn main() -> Result<()> {
    env_logger::init();

    let config = AppConfig::from(CliArgs::parse());

    let orientation = OrientationTracker::new(config.orientation);
    orientation.on_change(|o| log::info!("orientation is now {o}"));

    let source = open_source(&config.source)?;
    let engine = OrtEngine::new(&OrtEngineConfig {
        intra_threads: config.intra_threads,
        ..OrtEngineConfig::new(&config.model_path)
    })
    .context("failed to prepare inference engine")?;

    let metrics = LatestMetrics::new();
    let mut frame_loop = FrameLoop::new(
        config.loop_config.clone(),
        orientation,
        LogSink::new(metrics.clone()),
    );
    frame_loop.start(source, engine)?;

    let started = Instant::now();
    while frame_loop.state() != LoopState::Stopped {
        thread::sleep(STATUS_INTERVAL);

        let snapshot = metrics.snapshot();
        match snapshot.fps {
            Some(fps) => log::info!(
                "FPS: {} ({} results)",
                fps.whole(),
                snapshot.result.as_ref().map_or(0, |r| r.len())
            ),
            None => log::info!("waiting for first frame"),
        }

        if config.run_for.is_some_and(|limit| started.elapsed() >= limit) {
            frame_loop.cancel();
        }
    }

    match frame_loop.join() {
        Ok(summary) => {
            log::info!(
                "done: {} cycles, {} failed inferences",
                summary.cycles,
                summary.failed_inferences
            );
            Ok(())
        }
        // A still image with a frame limit ends this way on purpose.
        Err(LoopError::SourceExhausted(SourceError::Exhausted))
            if matches!(config.source, SourceConfig::Image { .. }) =>
        {
            log::info!("image source exhausted");
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}

fn open_source(config: &SourceConfig) -> Result<Box<dyn FrameSource>> {
    match config {
        SourceConfig::Image {
            path,
            frame_limit,
            facing,
        } => Ok(Box::new(
            ImageSource::open(path)?
                .with_frame_limit(*frame_limit)
                .with_mirror(facing.mirrors()),
        )),
        SourceConfig::Camera { index, facing } => open_camera(*index, *facing),
    }
}

#[cfg(feature = "camera-nokhwa")]
fn open_camera(index: u32, facing: CameraFacing) -> Result<Box<dyn FrameSource>> {
    use frame_loop::pipeline::source::{CameraSource, available_cameras};

    match available_cameras() {
        Ok(devices) => {
            for device in devices {
                log::info!("found camera {:?}: {}", device.index, device.label);
            }
        }
        Err(err) => log::warn!("failed to list cameras: {err:?}"),
    }
    Ok(Box::new(CameraSource::open(index, facing)?))
}

#[cfg(not(feature = "camera-nokhwa"))]
fn open_camera(_index: u32, _facing: CameraFacing) -> Result<Box<dyn FrameSource>> {
    anyhow::bail!(
        "built without camera support; pass --image <path> or enable the camera-nokhwa feature"
    )
}
