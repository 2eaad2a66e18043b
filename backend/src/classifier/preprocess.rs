//! Fixed image preprocessing: resize, center-crop, scale to [0, 1] and
//! normalize with ImageNet statistics.

use image::error::{ImageError, LimitError, LimitErrorKind};
use image::{imageops::FilterType, DynamicImage, RgbImage};
use tch::Tensor;

use super::ClassifierError;

pub const RESIZE_SHORTER: u32 = 256;
pub const CROP_SIZE: u32 = 224;
/// Largest resize target accepted, in pixels (aspect ratios up to 256:1).
pub const MAX_RESIZED_PIXELS: u64 = 16 * 1024 * 1024;

/// ImageNet normalization mean values (RGB)
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
/// ImageNet normalization std values (RGB)
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Output size when scaling the shorter side to `RESIZE_SHORTER`.
pub fn resized_dimensions(width: u32, height: u32) -> (u32, u32) {
    let (short, long) = if width <= height {
        (width, height)
    } else {
        (height, width)
    };
    let new_long = (u64::from(RESIZE_SHORTER) * u64::from(long)) as f64 / f64::from(short);
    let new_long = new_long as u32;
    if width <= height {
        (RESIZE_SHORTER, new_long)
    } else {
        (new_long, RESIZE_SHORTER)
    }
}

/// Top-left corner of a centered `CROP_SIZE` window, rounding half to even.
pub fn center_crop_offsets(width: u32, height: u32) -> (u32, u32) {
    let offset = |dim: u32| (f64::from(dim.saturating_sub(CROP_SIZE)) / 2.0).round_ties_even() as u32;
    (offset(width), offset(height))
}

/// Rejects images that are empty or whose resize target exceeds
/// `MAX_RESIZED_PIXELS`.
pub fn check_geometry(width: u32, height: u32) -> Result<(u32, u32), ClassifierError> {
    if width == 0 || height == 0 {
        log::warn!("Rejected empty image ({}x{})", width, height);
        return Err(dimension_error());
    }
    let (new_w, new_h) = resized_dimensions(width, height);
    if u64::from(new_w) * u64::from(new_h) > MAX_RESIZED_PIXELS {
        log::warn!(
            "Rejected {}x{} image: resize target {}x{} is too large",
            width,
            height,
            new_w,
            new_h
        );
        return Err(dimension_error());
    }
    Ok((new_w, new_h))
}

fn dimension_error() -> ClassifierError {
    ClassifierError::Decode(ImageError::Limits(LimitError::from_kind(
        LimitErrorKind::DimensionError,
    )))
}

fn resize_and_crop(image: &RgbImage) -> Result<RgbImage, ClassifierError> {
    let (width, height) = image.dimensions();
    let (new_w, new_h) = check_geometry(width, height)?;
    let resized = if (new_w, new_h) == (width, height) {
        image.clone()
    } else {
        image::imageops::resize(image, new_w, new_h, FilterType::Triangle)
    };
    let (left, top) = center_crop_offsets(new_w, new_h);
    Ok(image::imageops::crop_imm(&resized, left, top, CROP_SIZE, CROP_SIZE).to_image())
}

/// Flattens an RGB image into CHW layout with per-channel normalization.
pub fn normalize(image: &RgbImage) -> Vec<f32> {
    let (width, height) = image.dimensions();
    let num_pixels = (width * height) as usize;
    let mut normalized = vec![0.0f32; 3 * num_pixels];

    for (i, pixel) in image.pixels().enumerate() {
        for c in 0..3 {
            let value = f32::from(pixel[c]) / 255.0;
            normalized[c * num_pixels + i] = (value - IMAGENET_MEAN[c]) / IMAGENET_STD[c];
        }
    }

    normalized
}

/// Produces the `[1, 3, 224, 224]` float tensor the network expects.
/// Alpha and grayscale inputs are flattened to RGB first.
pub fn preprocess(image: &DynamicImage) -> Result<Tensor, ClassifierError> {
    check_geometry(image.width(), image.height())?;
    let rgb = image.to_rgb8();
    let cropped = resize_and_crop(&rgb)?;
    let data = normalize(&cropped);
    let side = i64::from(CROP_SIZE);
    Tensor::from_slice(&data)
        .f_view([1, 3, side, side])
        .map_err(|e| ClassifierError::Inference(e.to_string()))
}
