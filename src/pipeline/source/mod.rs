//! Frame sources the loop can pull from.

#[cfg(feature = "camera-nokhwa")]
pub mod camera;
pub mod still;
#[cfg(feature = "camera-nokhwa")]
mod rgba_converter;

use std::{fmt, str::FromStr};

use anyhow::{Context, Result, anyhow, bail};
use crossbeam_channel::{Receiver, Sender, TrySendError};
use fast_image_resize as fir;
use rayon::prelude::*;

use crate::types::OutputShape;

#[cfg(feature = "camera-nokhwa")]
pub use camera::{CameraDevice, CameraSource, available_cameras};
pub use still::ImageSource;

// Released buffers kept around for reuse.
const POOL_CAPACITY: usize = 2;

/// Which physical camera to open. Chosen when the source is built; the frame
/// loop never sees it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CameraFacing {
    Front,
    #[default]
    Back,
}

impl CameraFacing {
    pub fn toggled(self) -> Self {
        match self {
            CameraFacing::Front => CameraFacing::Back,
            CameraFacing::Back => CameraFacing::Front,
        }
    }

    /// Front cameras are shown mirrored, like a looking glass.
    pub fn mirrors(self) -> bool {
        self == CameraFacing::Front
    }

    pub fn label(self) -> &'static str {
        match self {
            CameraFacing::Front => "front",
            CameraFacing::Back => "back",
        }
    }
}

impl fmt::Display for CameraFacing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for CameraFacing {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "front" => Ok(CameraFacing::Front),
            "back" => Ok(CameraFacing::Back),
            other => Err(anyhow!("unknown camera facing '{other}'")),
        }
    }
}

/// Recycles pixel buffers handed back through `FrameSource::release`.
#[derive(Debug, Default)]
pub(crate) struct BufferPool {
    spare: Vec<Vec<u8>>,
    recycled: u64,
}

impl BufferPool {
    pub(crate) fn take(&mut self) -> Vec<u8> {
        self.spare.pop().unwrap_or_default()
    }

    pub(crate) fn give(&mut self, mut buf: Vec<u8>) {
        if self.spare.len() < POOL_CAPACITY {
            buf.clear();
            self.spare.push(buf);
        }
        self.recycled += 1;
    }

    pub(crate) fn recycled(&self) -> u64 {
        self.recycled
    }
}

/// Resize an RGBA image to `target` and drop the alpha channel, writing the
/// RGB result into `out`.
pub(crate) fn rgba_to_rgb(
    rgba: &[u8],
    width: u32,
    height: u32,
    target: OutputShape,
    mirror: bool,
    out: &mut Vec<u8>,
) -> Result<()> {
    if target.width == 0 || target.height == 0 {
        bail!("cannot produce an empty {target} frame");
    }
    let expected_len = (width as usize)
        .saturating_mul(height as usize)
        .saturating_mul(4);
    if rgba.len() != expected_len {
        bail!(
            "RGBA buffer size mismatch: got {}, expected {}",
            rgba.len(),
            expected_len
        );
    }

    let resized;
    let pixels: &[u8] = if (width, height) == (target.width, target.height) {
        rgba
    } else {
        let src_image =
            fir::images::Image::from_vec_u8(width, height, rgba.to_vec(), fir::PixelType::U8x4)?;
        let mut dst_image =
            fir::images::Image::new(target.width, target.height, fir::PixelType::U8x4);
        let resize_options = fir::ResizeOptions::new()
            .resize_alg(fir::ResizeAlg::Interpolation(fir::FilterType::Bilinear));
        fir::Resizer::new()
            .resize(&src_image, &mut dst_image, Some(&resize_options))
            .context("fast resize failed")?;
        resized = dst_image.into_vec();
        &resized
    };

    let row_px = target.width as usize;
    out.clear();
    out.resize(target.byte_len(), 0);
    out.par_chunks_exact_mut(row_px * 3)
        .zip(pixels.par_chunks_exact(row_px * 4))
        .for_each(|(dst_row, src_row)| {
            for (x, px) in src_row.chunks_exact(4).enumerate() {
                let dx = if mirror { row_px - 1 - x } else { x };
                dst_row[dx * 3..dx * 3 + 3].copy_from_slice(&px[..3]);
            }
        });

    Ok(())
}

/// Push into a single-slot channel, evicting the waiting value so the slot
/// always holds the newest one. `evict` must be a receiver of the same channel.
/// Returns false once every consumer is gone.
#[cfg_attr(not(feature = "camera-nokhwa"), allow(dead_code))]
pub(crate) fn send_latest<T>(tx: &Sender<T>, evict: &Receiver<T>, value: T) -> bool {
    let mut value = value;
    loop {
        match tx.try_send(value) {
            Ok(()) => return true,
            Err(TrySendError::Disconnected(_)) => return false,
            Err(TrySendError::Full(rejected)) => {
                // The consumer may win the race for the stale value; either way retry.
                let _ = evict.try_recv();
                value = rejected;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // 2x1 image: red then blue.
    const RED_BLUE: [u8; 8] = [255, 0, 0, 255, 0, 0, 255, 255];

    #[test]
    fn same_size_strips_alpha() {
        let mut out = Vec::new();
        rgba_to_rgb(&RED_BLUE, 2, 1, OutputShape::new(2, 1), false, &mut out).unwrap();
        assert_eq!(out, vec![255, 0, 0, 0, 0, 255]);
    }

    #[test]
    fn mirror_flips_rows() {
        let mut out = Vec::new();
        rgba_to_rgb(&RED_BLUE, 2, 1, OutputShape::new(2, 1), true, &mut out).unwrap();
        assert_eq!(out, vec![0, 0, 255, 255, 0, 0]);
    }

    #[test]
    fn resizes_to_target() {
        let rgba = vec![128u8; 8 * 6 * 4];
        let mut out = Vec::new();
        rgba_to_rgb(&rgba, 8, 6, OutputShape::new(3, 4), false, &mut out).unwrap();
        assert_eq!(out.len(), 3 * 4 * 3);
        assert!(out.iter().all(|&v| (127..=129).contains(&v)));
    }

    #[test]
    fn rejects_bad_input() {
        let mut out = Vec::new();
        assert!(rgba_to_rgb(&RED_BLUE, 3, 1, OutputShape::new(2, 1), false, &mut out).is_err());
        assert!(rgba_to_rgb(&RED_BLUE, 2, 1, OutputShape::new(0, 1), false, &mut out).is_err());
    }

    #[test]
    fn facing_toggles() {
        assert_eq!(CameraFacing::Back.toggled(), CameraFacing::Front);
        assert!(CameraFacing::Front.mirrors());
        assert_eq!("FRONT".parse::<CameraFacing>().unwrap(), CameraFacing::Front);
    }

    #[test]
    fn pool_reuses_buffers() {
        let mut pool = BufferPool::default();
        let buf = Vec::with_capacity(64);
        pool.give(buf);
        assert!(pool.take().capacity() >= 64);
        assert_eq!(pool.recycled(), 1);
    }

    #[test]
    fn send_latest_keeps_the_newest_value() {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let evict = rx.clone();
        for n in 1..=5 {
            assert!(send_latest(&tx, &evict, n));
        }
        assert_eq!(rx.try_recv(), Ok(5));
        assert!(rx.try_recv().is_err());

        assert!(send_latest(&tx, &evict, 6));
        assert_eq!(rx.recv(), Ok(6));
    }

    #[test]
    fn send_latest_stops_without_consumers() {
        let (tx, rx) = crossbeam_channel::bounded::<u8>(1);
        let evict = rx.clone();
        drop(rx);
        drop(evict);
        let (_, unrelated) = crossbeam_channel::bounded::<u8>(1);
        assert!(!send_latest(&tx, &unrelated, 1));
    }
}
