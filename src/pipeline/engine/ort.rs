use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use ndarray::Array4;
use ort::session::{Session, builder::GraphOptimizationLevel};
use ort::value::Tensor;
use rayon::prelude::*;

use super::InferenceEngine;
use crate::{
    error::InferenceError,
    types::{FRAME_DEPTH, Frame, InferenceResult},
};

#[derive(Clone, Debug)]
pub struct OrtEngineConfig {
    pub model_path: PathBuf,
    pub intra_threads: usize,
}

impl OrtEngineConfig {
    pub fn new(model_path: impl Into<PathBuf>) -> Self {
        Self {
            model_path: model_path.into(),
            intra_threads: 2,
        }
    }
}

/// ONNX Runtime session fed with `[1, H, W, 3]` tensors scaled to 0..1.
/// Returns the first model output flattened.
pub struct OrtEngine {
    session: Session,
}

impl OrtEngine {
    pub fn new(config: &OrtEngineConfig) -> Result<Self> {
        let session = load_session(&config.model_path, config.intra_threads)?;
        log::info!(
            "ORT engine ready using {} ({} intra threads)",
            config.model_path.display(),
            config.intra_threads
        );
        Ok(Self { session })
    }

    fn run(&mut self, frame: &Frame) -> Result<InferenceResult> {
        let tensor = Tensor::from_array(frame_to_batch(frame)?)?;
        let outputs = self
            .session
            .run(ort::inputs![tensor])
            .context("failed to run ORT session")?;

        if outputs.len() < 1 {
            return Err(anyhow!("model returned no outputs"));
        }

        let output = outputs[0].try_extract_array::<f32>()?;
        Ok(InferenceResult::new(
            output.iter().copied().collect(),
            output.shape().to_vec(),
        ))
    }
}

impl InferenceEngine for OrtEngine {
    fn infer(&mut self, frame: &Frame) -> Result<InferenceResult, InferenceError> {
        self.run(frame).map_err(InferenceError::from)
    }
}

fn load_session(model_path: &Path, intra_threads: usize) -> Result<Session> {
    let session = Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(intra_threads)?
        .commit_from_file(model_path)
        .with_context(|| format!("failed to load ORT session from {}", model_path.display()))?;
    Ok(session)
}

/// Add the batch axis and normalize pixel values.
pub(crate) fn frame_to_batch(frame: &Frame) -> Result<Array4<f32>> {
    let expected_len = frame.shape().byte_len();
    if frame.data.len() != expected_len {
        return Err(anyhow!(
            "frame buffer size mismatch: got {}, expected {}",
            frame.data.len(),
            expected_len
        ));
    }

    let normalized: Vec<f32> = frame.data.par_iter().map(|&v| v as f32 / 255.0).collect();
    Array4::<f32>::from_shape_vec(
        (
            1,
            frame.height as usize,
            frame.width as usize,
            FRAME_DEPTH as usize,
        ),
        normalized,
    )
    .map_err(|err| anyhow!("failed to build input tensor: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_has_leading_axis_and_unit_range() {
        let frame = Frame::new(vec![0, 255, 51, 102, 204, 255], 2, 1);
        let batch = frame_to_batch(&frame).unwrap();
        assert_eq!(batch.shape(), &[1, 1, 2, 3]);
        assert_eq!(batch[[0, 0, 0, 1]], 1.0);
        assert!((batch[[0, 0, 1, 0]] - 0.4).abs() < 1e-6);
    }

    #[test]
    fn batch_rejects_short_buffers() {
        let frame = Frame::new(vec![0; 5], 2, 1);
        assert!(frame_to_batch(&frame).is_err());
    }
}
