//! Model input tensors from decoded images.
//!
//! The detector sees the whole frame stretched to its input size, matching the
//! independent per-axis scaling the decoder undoes. The classifier sees one
//! crop, resized and normalised with ImageNet statistics.

use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView};
use ndarray::{Array3, Array4, Axis};
use thiserror::Error;
use tracing::instrument;

use crate::classifier::{CropRegion, SourceImage};
use crate::config::ClassifierConfig;

const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PreprocessError {
    #[error("invalid image dimensions: {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },

    #[error("crop {region:?} lies outside a {width}x{height} image")]
    CropOutOfBounds {
        region: CropRegion,
        width: u32,
        height: u32,
    },
}

impl SourceImage for DynamicImage {
    fn dimensions(&self) -> (u32, u32) {
        GenericImageView::dimensions(self)
    }
}

/// `[1, 3, height, width]` RGB tensor scaled to `[0, 1]`, nearest-neighbour resized.
///
/// # Errors
///
/// [`PreprocessError::InvalidDimensions`] when the image or target is empty.
#[instrument(skip(image))]
pub fn detector_input(
    image: &DynamicImage,
    width: u32,
    height: u32,
) -> Result<Array4<f32>, PreprocessError> {
    let (src_w, src_h) = GenericImageView::dimensions(image);
    if src_w == 0 || src_h == 0 || width == 0 || height == 0 {
        return Err(PreprocessError::InvalidDimensions {
            width: src_w,
            height: src_h,
        });
    }

    let resized = image.resize_exact(width, height, FilterType::Nearest);
    Ok(to_chw(&resized, |_, v| v).insert_axis(Axis(0)))
}

/// `[1, 3, size, size]` tensor of one crop, normalised per channel, where
/// `size` is `config.input_size`.
///
/// # Errors
///
/// [`PreprocessError::InvalidDimensions`] for a zero input size,
/// [`PreprocessError::CropOutOfBounds`] when `region` does not fit the image.
#[instrument(skip(image))]
pub fn classifier_input(
    image: &DynamicImage,
    region: &CropRegion,
    config: &ClassifierConfig,
) -> Result<Array4<f32>, PreprocessError> {
    let size = config.input_size;
    if size == 0 {
        return Err(PreprocessError::InvalidDimensions {
            width: size,
            height: size,
        });
    }

    let (width, height) = GenericImageView::dimensions(image);
    let fits = region.width > 0
        && region.height > 0
        && region.x.checked_add(region.width).is_some_and(|r| r <= width)
        && region.y.checked_add(region.height).is_some_and(|b| b <= height);
    if !fits {
        return Err(PreprocessError::CropOutOfBounds {
            region: *region,
            width,
            height,
        });
    }

    let crop = image
        .crop_imm(region.x, region.y, region.width, region.height)
        .resize_exact(size, size, FilterType::Triangle);

    Ok(to_chw(&crop, |c, v| (v - IMAGENET_MEAN[c]) / IMAGENET_STD[c]).insert_axis(Axis(0)))
}

/// Planar RGB in `[0, 1]`, passed through `map(channel, value)`.
fn to_chw(image: &DynamicImage, map: impl Fn(usize, f32) -> f32) -> Array3<f32> {
    let rgb = image.to_rgb8();
    let (w, h) = rgb.dimensions();
    let mut out = Array3::<f32>::zeros((3, h as usize, w as usize));

    for (x, y, pixel) in rgb.enumerate_pixels() {
        for c in 0..3 {
            out[[c, y as usize, x as usize]] = map(c, f32::from(pixel[c]) / 255.0);
        }
    }
    out
}
