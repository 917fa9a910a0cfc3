//! # Strip Splitting and Stitching
//!
//! The coordinator cuts an image into horizontal strips, one per worker, and
//! glues the compressed strips back together afterwards.
//!
//! ## Split rule
//!
//! ```text
//! strip_count  = min(workers, image_height)
//! strip_height = floor(image_height / strip_count)
//! strip i      = rows [i * strip_height, (i + 1) * strip_height), full width
//! ```
//!
//! The `image_height mod strip_count` rows below the last strip are **not**
//! sent to any worker and are therefore missing from the stitched result; the
//! output height is always `strip_count * strip_height`. Each split that drops
//! rows logs a warning.

use image::{imageops, GenericImage, Rgb, RgbImage};
use log::warn;

use crate::common::config::ContainerFormat;
use crate::common::messages::Envelope;
use crate::error::{ClusterError, Result};
use crate::processing::codec;

/// A contiguous horizontal slice of the source image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Strip {
    pub index: u32,
    pub top_offset: u32,
    pub height: u32,
    pub width: u32,
}

/// Strip geometry for an image of `width × height` shared by `workers` workers.
pub fn plan(width: u32, height: u32, workers: usize) -> Result<Vec<Strip>> {
    if workers == 0 {
        return Err(ClusterError::NoWorkers);
    }
    if width == 0 || height == 0 {
        return Err(ClusterError::Codec(format!(
            "cannot split an empty {}x{} image",
            width, height
        )));
    }

    let count = (workers as u64).min(height as u64) as u32;
    let strip_height = height / count;

    Ok((0..count)
        .map(|index| Strip {
            index,
            top_offset: index * strip_height,
            height: strip_height,
            width,
        })
        .collect())
}

/// Rows that fall below the last strip of `plan`.
pub fn dropped_rows(height: u32, strips: &[Strip]) -> u32 {
    height - strips.iter().map(|s| s.height).sum::<u32>()
}

/// Decode `image_bytes` and cut it into PNG-encoded strip envelopes.
///
/// Envelope `i` carries strip `i`; indices are assigned here and never change.
pub fn split(image_bytes: &[u8], workers: usize) -> Result<Vec<Envelope>> {
    let image = codec::decode(image_bytes)?;
    let (width, height) = image.dimensions();
    let strips = plan(width, height, workers)?;

    let dropped = dropped_rows(height, &strips);
    if dropped > 0 {
        warn!(
            "⚠️  Image height {} is not divisible by {} strips: last {} row(s) are dropped",
            height,
            strips.len(),
            dropped
        );
    }

    strips
        .iter()
        .map(|strip| {
            let part = imageops::crop_imm(&image, 0, strip.top_offset, strip.width, strip.height).to_image();
            let bytes = codec::encode(&part, ContainerFormat::Png)?;
            Ok(Envelope::new(strip.index, bytes))
        })
        .collect()
}

/// Decode the compressed strips and stack them vertically in ascending index order.
///
/// The input may arrive in any order. Every strip must have the same width;
/// the result height is the sum of the strip heights.
pub fn stitch(mut strips: Vec<Envelope>, format: ContainerFormat) -> Result<Vec<u8>> {
    if strips.is_empty() {
        return Err(ClusterError::Codec("nothing to stitch".to_string()));
    }
    strips.sort_by_key(|envelope| envelope.index);

    let parts = strips
        .iter()
        .map(|envelope| codec::decode(&envelope.payload))
        .collect::<Result<Vec<RgbImage>>>()?;

    let width = parts[0].width();
    if let Some(part) = parts.iter().find(|p| p.width() != width) {
        return Err(ClusterError::Codec(format!(
            "strip width {} does not match {}",
            part.width(),
            width
        )));
    }

    let height: u32 = parts.iter().map(|p| p.height()).sum();
    let mut combined = RgbImage::from_pixel(width, height, Rgb([255, 255, 255]));

    let mut offset = 0;
    for part in &parts {
        combined.copy_from(part, 0, offset)?;
        offset += part.height();
    }

    codec::encode(&combined, format)
}
