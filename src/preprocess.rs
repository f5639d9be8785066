//! Turns uploaded bytes into the tensor the network was trained on.
//!
//! The steps mirror training-time preprocessing exactly: decode, force RGB,
//! stretch to 224x224 with bicubic resampling, divide by 255, add a batch
//! axis. No mean/std normalization is applied.

use image::imageops::{self, FilterType};
use image::DynamicImage;
use ndarray::Array4;

use crate::error::PredictError;

pub const INPUT_SIZE: u32 = 224;
pub const CHANNELS: usize = 3;
pub const INPUT_SHAPE: [usize; 4] = [1, INPUT_SIZE as usize, INPUT_SIZE as usize, CHANNELS];

const RESAMPLING: FilterType = FilterType::CatmullRom;

/// Decodes an image from memory, guessing the format from its content.
pub fn decode(bytes: &[u8]) -> Result<DynamicImage, PredictError> {
    Ok(image::load_from_memory(bytes)?)
}

/// Builds the NHWC input tensor, shape `(1, 224, 224, 3)`, values in [0, 1].
pub fn to_tensor(img: &DynamicImage) -> Array4<f32> {
    let rgb = img.to_rgb8();
    let resized = imageops::resize(&rgb, INPUT_SIZE, INPUT_SIZE, RESAMPLING);
    let raw = resized.as_raw();
    let width = INPUT_SIZE as usize;

    Array4::from_shape_fn(
        (1, INPUT_SIZE as usize, INPUT_SIZE as usize, CHANNELS),
        |(_, y, x, c)| f32::from(raw[(y * width + x) * CHANNELS + c]) / 255.0,
    )
}

/// Decode and tensorize in one step.
pub fn prepare(bytes: &[u8]) -> Result<Array4<f32>, PredictError> {
    decode(bytes).map(|img| to_tensor(&img))
}
