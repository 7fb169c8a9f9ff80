//! Motion mask stages: luma, Gaussian smoothing, thresholded background difference,
//! dilation and connected-region extraction.
//!
//! Color conversion and blur come from `image::imageops`; thresholding, morphology and
//! labelling from `imageproc`.

use anyhow::{anyhow, Result};
use image::imageops::{self, GaussianBlurParameters};
use image::{GrayImage, ImageBuffer, Luma, Rgb};
use imageproc::contrast::{threshold, ThresholdType};
use imageproc::distance_transform::Norm;
use imageproc::morphology::dilate;
use imageproc::region_labelling::{connected_components, Connectivity};
use std::collections::BTreeMap;

use crate::frame::Frame;

/// Largest Gaussian kernel the detector will build.
pub const MAX_BLUR_KERNEL: u32 = 101;

/// Per-pixel floating-point plane, as kept by the background model.
pub type MeanImage = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Luma of an RGB24 frame.
pub fn luma(frame: &Frame) -> Result<GrayImage> {
    let rgb = ImageBuffer::<Rgb<u8>, &[u8]>::from_raw(frame.width, frame.height, frame.pixels())
        .ok_or_else(|| {
            anyhow!(
                "frame buffer does not hold {}x{} RGB pixels",
                frame.width,
                frame.height
            )
        })?;
    Ok(imageops::grayscale(&rgb))
}

/// Gaussian blur with a square `kernel_size` kernel; sigma is derived from the size.
/// Sizes of 1 or less leave the image untouched.
pub fn smooth(gray: &GrayImage, kernel_size: u32) -> GrayImage {
    let size = kernel_size.min(MAX_BLUR_KERNEL);
    if size <= 1 || gray.width() == 0 || gray.height() == 0 {
        return gray.clone();
    }
    imageops::blur_advanced(gray, GaussianBlurParameters::new_from_kernel_size(size as f32))
}

/// Widen a luma plane to floating point.
pub fn to_mean(gray: &GrayImage) -> MeanImage {
    MeanImage::from_fn(gray.width(), gray.height(), |x, y| {
        Luma([f32::from(gray.get_pixel(x, y)[0])])
    })
}

/// Binary mask (0 / 255) of pixels whose difference from the rounded background exceeds
/// `sensitivity`.
pub fn difference_mask(current: &GrayImage, mean: &MeanImage, sensitivity: u8) -> Result<GrayImage> {
    if current.dimensions() != mean.dimensions() {
        return Err(anyhow!(
            "background is {:?} but frame is {:?}",
            mean.dimensions(),
            current.dimensions()
        ));
    }
    let diff = GrayImage::from_fn(current.width(), current.height(), |x, y| {
        let now = f32::from(current.get_pixel(x, y)[0]);
        let background = mean.get_pixel(x, y)[0].round();
        Luma([(now - background).abs().min(255.0) as u8])
    });
    Ok(threshold(&diff, sensitivity, ThresholdType::Binary))
}

/// Dilate a mask `iterations` times with a 3x3 square element.
pub fn grow(mask: &GrayImage, iterations: u32) -> GrayImage {
    // k passes of a 3x3 square equal one pass at chessboard radius k.
    let radius = u8::try_from(iterations).unwrap_or(u8::MAX);
    if radius == 0 {
        return mask.clone();
    }
    dilate(mask, Norm::LInf, radius)
}

/// A connected region of set mask pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Region {
    /// Pixel count.
    pub area: u32,
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

impl Region {
    fn at(x: u32, y: u32) -> Self {
        Self {
            area: 0,
            x,
            y,
            w: 1,
            h: 1,
        }
    }

    fn include(&mut self, x: u32, y: u32) {
        let right = (self.x + self.w).max(x + 1);
        let bottom = (self.y + self.h).max(y + 1);
        self.x = self.x.min(x);
        self.y = self.y.min(y);
        self.w = right - self.x;
        self.h = bottom - self.y;
        self.area += 1;
    }
}

/// 8-connected regions of a mask, in label order.
pub fn regions(mask: &GrayImage) -> Vec<Region> {
    let labels = connected_components(mask, Connectivity::Eight, Luma([0u8]));
    let mut found: BTreeMap<u32, Region> = BTreeMap::new();
    for (x, y, label) in labels.enumerate_pixels() {
        let label = label[0];
        if label == 0 {
            continue;
        }
        found
            .entry(label)
            .or_insert_with(|| Region::at(x, y))
            .include(x, y);
    }
    found.into_values().collect()
}
