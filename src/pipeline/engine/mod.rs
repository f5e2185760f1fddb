mod ort;

use crate::{
    error::InferenceError,
    types::{Frame, InferenceResult},
};

pub use self::ort::{OrtEngine, OrtEngineConfig};

/// Runs one model invocation per frame. Implementations may block.
pub trait InferenceEngine: Send {
    fn infer(&mut self, frame: &Frame) -> Result<InferenceResult, InferenceError>;
}

impl<E: InferenceEngine + ?Sized> InferenceEngine for Box<E> {
    fn infer(&mut self, frame: &Frame) -> Result<InferenceResult, InferenceError> {
        (**self).infer(frame)
    }
}
