use std::path::Path;

use anyhow::{Context, Result, bail};

use super::{BufferPool, rgba_to_rgb};
use crate::{
    error::SourceError,
    pipeline::frame_loop::FrameSource,
    types::{Frame, OutputShape},
};

/// Serves the same still image over and over, resized to whatever shape the
/// loop asks for. Useful without a camera and for benchmarking a model.
pub struct ImageSource {
    rgba: Vec<u8>,
    width: u32,
    height: u32,
    mirror: bool,
    frame_limit: Option<u64>,
    served: u64,
    cached: Option<(OutputShape, Vec<u8>)>,
    pool: BufferPool,
}

impl ImageSource {
    pub fn open(path: &Path) -> Result<Self> {
        let image = ::image::open(path)
            .with_context(|| format!("failed to open image {}", path.display()))?
            .to_rgba8();
        let (width, height) = image.dimensions();
        log::info!("serving still image {} ({width}x{height})", path.display());
        Self::from_rgba(width, height, image.into_raw())
    }

    pub fn from_rgba(width: u32, height: u32, rgba: Vec<u8>) -> Result<Self> {
        let expected_len = (width as usize)
            .saturating_mul(height as usize)
            .saturating_mul(4);
        if rgba.len() != expected_len || expected_len == 0 {
            bail!(
                "invalid {width}x{height} RGBA image: got {} bytes, expected {}",
                rgba.len(),
                expected_len
            );
        }
        Ok(Self {
            rgba,
            width,
            height,
            mirror: false,
            frame_limit: None,
            served: 0,
            cached: None,
            pool: BufferPool::default(),
        })
    }

    /// Report exhaustion after this many frames.
    pub fn with_frame_limit(mut self, limit: Option<u64>) -> Self {
        self.frame_limit = limit;
        self
    }

    pub fn with_mirror(mut self, mirror: bool) -> Self {
        self.mirror = mirror;
        self
    }

    pub fn served(&self) -> u64 {
        self.served
    }

    pub fn released(&self) -> u64 {
        self.pool.recycled()
    }

    fn render(&mut self, hint: OutputShape) -> Result<&[u8]> {
        let stale = !matches!(&self.cached, Some((shape, _)) if *shape == hint);
        if stale {
            let mut rgb = self.cached.take().map(|(_, buf)| buf).unwrap_or_default();
            rgba_to_rgb(&self.rgba, self.width, self.height, hint, self.mirror, &mut rgb)?;
            log::debug!("still image rendered at {hint}");
            self.cached = Some((hint, rgb));
        }
        match &self.cached {
            Some((_, rgb)) => Ok(rgb.as_slice()),
            None => bail!("still image cache empty after render"),
        }
    }
}

impl FrameSource for ImageSource {
    fn next_frame(&mut self, hint: OutputShape) -> Result<Frame, SourceError> {
        if self.frame_limit.is_some_and(|limit| self.served >= limit) {
            return Err(SourceError::Exhausted);
        }

        let mut data = self.pool.take();
        data.extend_from_slice(self.render(hint)?);
        self.served += 1;
        Ok(Frame::new(data, hint.width, hint.height))
    }

    fn release(&mut self, frame: Frame) {
        self.pool.give(frame.data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checker() -> ImageSource {
        // 2x2: red, green / blue, white
        let rgba = vec![
            255, 0, 0, 255, 0, 255, 0, 255, //
            0, 0, 255, 255, 255, 255, 255, 255,
        ];
        ImageSource::from_rgba(2, 2, rgba).unwrap()
    }

    #[test]
    fn frames_follow_the_hint() {
        let mut source = checker();
        let frame = source.next_frame(OutputShape::new(2, 2)).unwrap();
        assert_eq!(frame.shape(), OutputShape::new(2, 2));
        assert_eq!(&frame.data[..6], &[255, 0, 0, 0, 255, 0]);
        source.release(frame);

        let frame = source.next_frame(OutputShape::new(4, 3)).unwrap();
        assert_eq!(frame.data.len(), 4 * 3 * 3);
        source.release(frame);
        assert_eq!(source.served(), 2);
        assert_eq!(source.released(), 2);
    }

    #[test]
    fn frame_limit_exhausts() {
        let mut source = checker().with_frame_limit(Some(1));
        let frame = source.next_frame(OutputShape::new(2, 2)).unwrap();
        source.release(frame);
        assert!(matches!(
            source.next_frame(OutputShape::new(2, 2)),
            Err(SourceError::Exhausted)
        ));
    }

    #[test]
    fn mirrored_source_flips_rows() {
        let mut source = checker().with_mirror(true);
        let frame = source.next_frame(OutputShape::new(2, 2)).unwrap();
        assert_eq!(&frame.data[..6], &[0, 255, 0, 255, 0, 0]);
    }

    #[test]
    fn rejects_mismatched_buffer() {
        assert!(ImageSource::from_rgba(2, 2, vec![0; 4]).is_err());
        assert!(ImageSource::from_rgba(0, 0, Vec::new()).is_err());
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(ImageSource::open(Path::new("does/not/exist.png")).is_err());
    }
}
