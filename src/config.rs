use std::{ffi::OsString, path::PathBuf, time::Duration};

use clap::Parser;

use crate::{
    pipeline::{shape::PlatformFamily, source::CameraFacing},
    types::{Orientation, OutputShape},
};

// For pose models the input size matters little since the model crops and
// resizes itself; pick one that does not distort the image.
pub const OUTPUT_TENSOR_WIDTH: u32 = 224;
pub const OUTPUT_TENSOR_HEIGHT: u32 = 224;

pub const DEFAULT_MODEL_PATH: &str = "models/model.onnx";
pub const MODEL_PATH_ENV: &str = "FRAME_LOOP_MODEL_PATH";

/// Settings the frame loop reads once at start.
#[derive(Clone, Debug, PartialEq)]
pub struct LoopConfig {
    /// Shape in portrait orientation; swapped in landscape where the platform needs it.
    pub nominal_shape: OutputShape,
    pub platform: PlatformFamily,
    /// When false the loop asks the source to present the preview after each cycle.
    pub auto_render: bool,
    /// Upper bound on cycles per second. `None` runs as fast as cycles complete.
    pub target_fps: Option<u32>,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            nominal_shape: OutputShape::new(OUTPUT_TENSOR_WIDTH, OUTPUT_TENSOR_HEIGHT),
            platform: PlatformFamily::host(),
            auto_render: false,
            target_fps: None,
        }
    }
}

/// Where frames come from. `facing` mirrors front-facing input for both kinds.
#[derive(Clone, Debug, PartialEq)]
pub enum SourceConfig {
    Camera {
        index: u32,
        facing: CameraFacing,
    },
    Image {
        path: PathBuf,
        frame_limit: Option<u64>,
        facing: CameraFacing,
    },
}

impl Default for SourceConfig {
    fn default() -> Self {
        SourceConfig::Camera {
            index: 0,
            facing: CameraFacing::default(),
        }
    }
}

/// Command-line arguments of the `frame-loop` binary.
#[derive(Debug, Parser)]
#[command(
    name = "frame-loop",
    about = "Run camera frames through an ONNX model one at a time"
)]
pub struct CliArgs {
    /// ONNX model run on every frame.
    #[arg(long, value_name = "PATH", env = MODEL_PATH_ENV, default_value = DEFAULT_MODEL_PATH)]
    pub model: PathBuf,
    /// Camera index to open.
    #[arg(long, value_name = "INDEX", default_value_t = 0, conflicts_with = "image")]
    pub camera: u32,
    /// Which way the camera faces; front input is mirrored.
    #[arg(long, value_name = "front|back", default_value_t = CameraFacing::Back)]
    pub facing: CameraFacing,
    /// Serve a still image instead of a camera.
    #[arg(long, value_name = "PATH")]
    pub image: Option<PathBuf>,
    /// Stop after this many frames of the still image.
    #[arg(long, value_name = "N", requires = "image")]
    pub frames: Option<u64>,
    /// Output width in portrait orientation.
    #[arg(
        long,
        value_name = "PX",
        default_value_t = OUTPUT_TENSOR_WIDTH,
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    pub width: u32,
    /// Output height in portrait orientation.
    #[arg(
        long,
        value_name = "PX",
        default_value_t = OUTPUT_TENSOR_HEIGHT,
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    pub height: u32,
    /// Preview aspect convention; defaults to the host platform's.
    #[arg(long, value_name = "portrait|landscape")]
    pub platform: Option<PlatformFamily>,
    /// Device orientation at start.
    #[arg(long, value_name = "ORIENTATION", default_value_t = Orientation::PortraitUp)]
    pub orientation: Orientation,
    /// Cap on cycles per second.
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u32).range(1..))]
    pub target_fps: Option<u32>,
    /// The preview renders itself; skip the per-cycle present call.
    #[arg(long)]
    pub auto_render: bool,
    /// ONNX Runtime intra-op threads.
    #[arg(long, value_name = "N", default_value_t = 2)]
    pub threads: usize,
    /// Cancel the loop after this many seconds.
    #[arg(long, value_name = "SECS", value_parser = parse_seconds)]
    pub run_for: Option<Duration>,
}

fn parse_seconds(raw: &str) -> Result<Duration, String> {
    let secs: f64 = raw
        .parse()
        .map_err(|err| format!("invalid number of seconds '{raw}': {err}"))?;
    if !secs.is_finite() || secs < 0.0 {
        return Err(format!("expected a non-negative number of seconds, got {raw}"));
    }
    Ok(Duration::from_secs_f64(secs))
}

#[derive(Clone, Debug, PartialEq)]
pub struct AppConfig {
    pub loop_config: LoopConfig,
    pub source: SourceConfig,
    pub model_path: PathBuf,
    pub intra_threads: usize,
    pub orientation: Orientation,
    pub run_for: Option<Duration>,
}

impl AppConfig {
    /// Parse `args` (including the program name at index 0). `--help` comes
    /// back as an error of kind `DisplayHelp`.
    pub fn from_args<I, T>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        CliArgs::try_parse_from(args).map(Self::from)
    }
}

impl From<CliArgs> for AppConfig {
    fn from(args: CliArgs) -> Self {
        let loop_config = LoopConfig {
            nominal_shape: OutputShape::new(args.width, args.height),
            platform: args.platform.unwrap_or_else(PlatformFamily::host),
            auto_render: args.auto_render,
            target_fps: args.target_fps,
        };

        let source = match args.image {
            Some(path) => SourceConfig::Image {
                path,
                frame_limit: args.frames,
                facing: args.facing,
            },
            None => SourceConfig::Camera {
                index: args.camera,
                facing: args.facing,
            },
        };

        Self {
            loop_config,
            source,
            model_path: args.model,
            intra_threads: args.threads,
            orientation: args.orientation,
            run_for: args.run_for,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::{CommandFactory, error::ErrorKind};

    fn parse(list: &[&str]) -> Result<AppConfig, clap::Error> {
        AppConfig::from_args(std::iter::once("frame-loop").chain(list.iter().copied()))
    }

    #[test]
    fn cli_definition_is_consistent() {
        CliArgs::command().debug_assert();
    }

    #[test]
    fn defaults_use_square_224_input() {
        let config = LoopConfig::default();
        assert_eq!(config.nominal_shape, OutputShape::new(224, 224));
        assert!(!config.auto_render);
        assert_eq!(config.target_fps, None);

        let app = parse(&["--model", "m.onnx"]).unwrap();
        assert_eq!(app.loop_config.nominal_shape, OutputShape::new(224, 224));
        assert_eq!(app.source, SourceConfig::default());
        assert_eq!(app.intra_threads, 2);
        assert_eq!(app.orientation, Orientation::PortraitUp);
    }

    #[test]
    fn parses_image_source_and_shape() {
        let config = parse(&[
            "--image",
            "demo/pose.png",
            "--frames",
            "5",
            "--width=224",
            "--height",
            "160",
            "--platform",
            "landscape",
            "--orientation",
            "landscape-left",
            "--target-fps",
            "30",
            "--model",
            "m.onnx",
            "--run-for",
            "1.5",
            "--facing",
            "front",
        ])
        .unwrap();

        assert_eq!(
            config.source,
            SourceConfig::Image {
                path: PathBuf::from("demo/pose.png"),
                frame_limit: Some(5),
                facing: CameraFacing::Front,
            }
        );
        assert_eq!(config.loop_config.nominal_shape, OutputShape::new(224, 160));
        assert_eq!(config.loop_config.platform, PlatformFamily::LandscapeBiased);
        assert_eq!(config.loop_config.target_fps, Some(30));
        assert_eq!(config.orientation, Orientation::LandscapeLeft);
        assert_eq!(config.model_path, PathBuf::from("m.onnx"));
        assert_eq!(config.run_for, Some(Duration::from_millis(1500)));
    }

    #[test]
    fn parses_camera_source() {
        let config = parse(&["--camera", "1", "--facing", "front", "--model", "x"]).unwrap();
        assert_eq!(
            config.source,
            SourceConfig::Camera {
                index: 1,
                facing: CameraFacing::Front
            }
        );
    }

    #[test]
    fn help_is_not_a_usage_error() {
        let err = parse(&["--help"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DisplayHelp);
        assert_eq!(err.exit_code(), 0);
    }

    #[test]
    fn rejects_bad_arguments() {
        let cases: [&[&str]; 8] = [
            &["--bogus"],
            &["--width"],
            &["--width", "wide"],
            &["--width", "0"],
            &["--frames", "3"],
            &["--run-for", "-2"],
            &["--facing", "sideways"],
            &["--camera", "1", "--image", "a.png"],
        ];
        for args in cases {
            assert!(parse(args).is_err(), "accepted {args:?}");
        }
    }
}
