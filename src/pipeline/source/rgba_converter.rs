use anyhow::{Result, anyhow, bail};
use nokhwa::{Buffer, utils::FrameFormat};
use rayon::prelude::*;
use yuv::{
    YuvBiPlanarImage, YuvConversionMode, YuvPackedImage, YuvRange, YuvStandardMatrix,
    yuv_nv12_to_rgba, yuyv422_to_rgba,
};
use zune_jpeg::{
    JpegDecoder,
    zune_core::{bytestream::ZCursor, colorspace::ColorSpace, options::DecoderOptions},
};

#[derive(Debug)]
pub struct RgbaImage {
    pub rgba: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Decode whatever pixel format the camera delivered into packed RGBA.
pub fn convert(buffer: &Buffer) -> Result<RgbaImage> {
    let resolution = buffer.resolution();
    let (width, height) = (resolution.width_x, resolution.height_y);
    let data = buffer.buffer();
    let pixels = width as usize * height as usize;

    let rgba = match buffer.source_frame_format() {
        FrameFormat::MJPEG => return decode_mjpeg(data),
        FrameFormat::NV12 => {
            require_len("NV12", data, pixels + pixels / 2)?;
            let image = YuvBiPlanarImage {
                y_plane: &data[..pixels],
                y_stride: width,
                uv_plane: &data[pixels..pixels + pixels / 2],
                uv_stride: width,
                width,
                height,
            };
            let mut rgba = vec![0u8; pixels * 4];
            yuv_nv12_to_rgba(
                &image,
                &mut rgba,
                width * 4,
                YuvRange::Full,
                YuvStandardMatrix::Bt709,
                YuvConversionMode::Balanced,
            )
            .map_err(|err| anyhow!("NV12 to RGBA failed: {err:?}"))?;
            rgba
        }
        FrameFormat::YUYV => {
            require_len("YUYV", data, pixels * 2)?;
            let packed = YuvPackedImage {
                yuy: data,
                yuy_stride: width * 2,
                width,
                height,
            };
            let mut rgba = vec![0u8; pixels * 4];
            yuyv422_to_rgba(
                &packed,
                &mut rgba,
                width * 4,
                YuvRange::Full,
                YuvStandardMatrix::Bt709,
            )
            .map_err(|err| anyhow!("YUYV422 to RGBA failed: {err:?}"))?;
            rgba
        }
        FrameFormat::RAWRGB => expand_channels(data, pixels, 3, |src| [src[0], src[1], src[2]])?,
        FrameFormat::RAWBGR => expand_channels(data, pixels, 3, |src| [src[2], src[1], src[0]])?,
        FrameFormat::GRAY => expand_channels(data, pixels, 1, |src| [src[0], src[0], src[0]])?,
    };

    Ok(RgbaImage {
        rgba,
        width,
        height,
    })
}

fn require_len(label: &str, data: &[u8], expected: usize) -> Result<()> {
    if data.len() < expected {
        bail!(
            "{label} buffer too small: got {}, expected {}",
            data.len(),
            expected
        );
    }
    Ok(())
}

fn expand_channels<F>(data: &[u8], pixels: usize, channels: usize, pick: F) -> Result<Vec<u8>>
where
    F: Fn(&[u8]) -> [u8; 3] + Sync,
{
    require_len("raw", data, pixels * channels)?;
    let mut rgba = vec![0u8; pixels * 4];
    rgba.par_chunks_mut(4)
        .zip(data.par_chunks_exact(channels))
        .for_each(|(dst, src)| {
            dst[..3].copy_from_slice(&pick(src));
            dst[3] = 255;
        });
    Ok(rgba)
}

fn decode_mjpeg(data: &[u8]) -> Result<RgbaImage> {
    let options = DecoderOptions::default().jpeg_set_out_colorspace(ColorSpace::RGBA);
    let mut decoder = JpegDecoder::new_with_options(ZCursor::new(data), options);
    let rgba = decoder
        .decode()
        .map_err(|err| anyhow!("MJPEG decode failed: {err:?}"))?;
    let info = decoder
        .info()
        .ok_or_else(|| anyhow!("MJPEG decoder reported no image info"))?;

    let width = u32::try_from(info.width).map_err(|_| anyhow!("MJPEG width does not fit u32"))?;
    let height =
        u32::try_from(info.height).map_err(|_| anyhow!("MJPEG height does not fit u32"))?;
    require_len("MJPEG", &rgba, width as usize * height as usize * 4)?;
    Ok(RgbaImage {
        rgba,
        width,
        height,
    })
}
