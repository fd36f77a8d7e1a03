use std::path::Path;

use image::imageops::{self, FilterType};
use image::{DynamicImage, RgbImage};

use crate::errors::{HarnessError, HarnessResult};

/// Plane order of the produced tensor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelOrder {
    Bgr,
    Rgb,
}

impl ChannelOrder {
    /// RGB pixel component feeding output plane `plane`.
    fn source(&self, plane: usize) -> usize {
        match self {
            ChannelOrder::Bgr => 2 - plane,
            ChannelOrder::Rgb => plane,
        }
    }
}

/// Resize and normalization parameters. `mean[c]` applies to output plane `c`.
#[derive(Clone, Debug, PartialEq)]
pub struct PreprocessConfig {
    pub height: usize,
    pub width: usize,
    pub mean: [f32; 3],
    pub scale: f32,
    pub channel_order: ChannelOrder,
}

impl Default for PreprocessConfig {
    fn default() -> PreprocessConfig {
        PreprocessConfig {
            height: 224,
            width: 224,
            mean: [104.007, 116.669, 122.679],
            scale: 0.017,
            channel_order: ChannelOrder::Bgr,
        }
    }
}

/// A `[1, 3, height, width]` f32 tensor in channel-major order.
#[derive(Clone, Debug, PartialEq)]
pub struct InputTensor {
    data: Vec<f32>,
    height: usize,
    width: usize,
}

impl InputTensor {
    pub fn zeros(height: usize, width: usize) -> InputTensor {
        InputTensor { data: vec![0.0; 3 * height * width], height, width }
    }

    pub fn shape(&self) -> [usize; 4] {
        [1, 3, self.height, self.width]
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn byte_len(&self) -> usize {
        std::mem::size_of_val(self.data.as_slice())
    }
}

/// Reads and decodes the image at `path`, then runs [`preprocess_image`].
pub fn preprocess(path: impl AsRef<Path>, config: &PreprocessConfig) -> HarnessResult<InputTensor> {
    let path = path.as_ref();
    let bytes = std::fs::read(path)
        .map_err(|source| HarnessError::Io { path: path.to_path_buf(), source })?;
    let image = image::load_from_memory(&bytes)
        .map_err(|source| HarnessError::Decode { path: path.to_path_buf(), source })?;
    debug!("Decoded {path:?}: {}x{}", image.width(), image.height());
    preprocess_image(&image, config)
}

/// Resizes `image` (bilinear) and computes `(pixel - mean) * scale` per plane.
pub fn preprocess_image(
    image: &DynamicImage,
    config: &PreprocessConfig,
) -> HarnessResult<InputTensor> {
    let (height, width) = (config.height, config.width);
    if height == 0 || width == 0 {
        return Err(HarnessError::InvalidArgument(format!(
            "target size {height}x{width} must not be empty"
        )));
    }
    let target = |d: usize| {
        u32::try_from(d).map_err(|_| {
            HarnessError::InvalidArgument(format!("target dimension {d} is too large"))
        })
    };
    let (h, w) = (target(height)?, target(width)?);
    let rgb = image.to_rgb8();
    let resized: RgbImage = if rgb.dimensions() == (w, h) {
        rgb
    } else {
        imageops::resize(&rgb, w, h, FilterType::Triangle)
    };

    let mut data = Vec::with_capacity(3 * height * width);
    for plane in 0..3 {
        let source = config.channel_order.source(plane);
        let mean = config.mean[plane];
        data.extend(resized.pixels().map(|p| (p[source] as f32 - mean) * config.scale));
    }
    Ok(InputTensor { data, height, width })
}
