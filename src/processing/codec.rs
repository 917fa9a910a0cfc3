//! # Block Codec
//!
//! Lossy image compression built on the 8×8 block transform in [`dct`](super::dct).
//!
//! ## Algorithm
//!
//! 1. Decode the container into an RGB pixel grid (alpha is discarded)
//! 2. Pad width and height up to multiples of 8 with white pixels
//! 3. For every 8×8 block and each of the R, G, B channels independently,
//!    run DCT → quantize → dequantize → IDCT → clamp
//! 4. Write the samples back, crop to the original size and re-encode
//!
//! Blocks share no data, so they are transformed in parallel on the rayon
//! pool; the three channels of a block are joined in parallel as well.
//!
//! Channel order is fixed: index 0 is red, 1 green, 2 blue, both when blocks
//! are extracted and when they are written back.

use image::{imageops, ImageOutputFormat, Rgb, RgbImage};
use rayon::prelude::*;
use std::io::Cursor;

use super::dct::{to_sample, Block, DctKernel, BLOCK_SIZE};
use crate::common::config::ContainerFormat;
use crate::error::Result;

/// Fill color for padding pixels.
pub const PADDING_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

const CHANNELS: usize = 3;
const BLOCK: u32 = BLOCK_SIZE as u32;

/// Compress an encoded image and return it in the default container.
pub fn compress(image_bytes: &[u8]) -> Result<Vec<u8>> {
    compress_with(image_bytes, ContainerFormat::default())
}

/// Compress an encoded image and return it in `format`.
///
/// # Errors
/// - The input is not a decodable image
/// - Encoding the result fails
///
/// # Example
/// ```ignore
/// let raw = std::fs::read("photo.png")?;
/// let compressed = compress_with(&raw, ContainerFormat::Jpeg { quality: 90 })?;
/// ```
pub fn compress_with(image_bytes: &[u8], format: ContainerFormat) -> Result<Vec<u8>> {
    let image = decode(image_bytes)?;
    let compressed = compress_pixels(&image);
    encode(&compressed, format)
}

/// Decode any container the `image` crate understands into RGB pixels.
pub fn decode(image_bytes: &[u8]) -> Result<RgbImage> {
    Ok(image::load_from_memory(image_bytes)?.to_rgb8())
}

/// Encode RGB pixels into `format`.
pub fn encode(image: &RgbImage, format: ContainerFormat) -> Result<Vec<u8>> {
    let output = match format {
        ContainerFormat::Png => ImageOutputFormat::Png,
        ContainerFormat::Jpeg { quality } => ImageOutputFormat::Jpeg(quality),
    };

    let mut bytes = Vec::new();
    image.write_to(&mut Cursor::new(&mut bytes), output)?;
    Ok(bytes)
}

/// Run the block transform over a pixel grid; the result has the same size.
pub fn compress_pixels(image: &RgbImage) -> RgbImage {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return image.clone();
    }

    let mut padded = pad(image);
    let kernel = DctKernel::shared();

    let origins: Vec<(u32, u32)> = (0..padded.height())
        .step_by(BLOCK_SIZE)
        .flat_map(|y| (0..padded.width()).step_by(BLOCK_SIZE).map(move |x| (x, y)))
        .collect();

    let transformed: Vec<[Block; CHANNELS]> = origins
        .par_iter()
        .map(|&(x, y)| {
            let [red, green, blue] = extract_block(&padded, x, y);
            let (red, (green, blue)) = rayon::join(
                || kernel.reconstruct(&red),
                || rayon::join(|| kernel.reconstruct(&green), || kernel.reconstruct(&blue)),
            );
            [red, green, blue]
        })
        .collect();

    for (&(x, y), channels) in origins.iter().zip(transformed.iter()) {
        write_block(&mut padded, x, y, channels);
    }

    imageops::crop_imm(&padded, 0, 0, width, height).to_image()
}

/// Round both dimensions up to a multiple of 8, filling new pixels with [`PADDING_COLOR`].
pub fn pad(image: &RgbImage) -> RgbImage {
    let (width, height) = image.dimensions();
    let padded_width = width.div_ceil(BLOCK) * BLOCK;
    let padded_height = height.div_ceil(BLOCK) * BLOCK;

    if (padded_width, padded_height) == (width, height) {
        return image.clone();
    }

    let mut padded = RgbImage::from_pixel(padded_width, padded_height, PADDING_COLOR);
    for (x, y, pixel) in image.enumerate_pixels() {
        padded.put_pixel(x, y, *pixel);
    }
    padded
}

fn extract_block(image: &RgbImage, origin_x: u32, origin_y: u32) -> [Block; CHANNELS] {
    let mut channels = [[[0.0; BLOCK_SIZE]; BLOCK_SIZE]; CHANNELS];
    for dx in 0..BLOCK_SIZE {
        for dy in 0..BLOCK_SIZE {
            let pixel = image.get_pixel(origin_x + dx as u32, origin_y + dy as u32);
            for (c, channel) in channels.iter_mut().enumerate() {
                channel[dx][dy] = pixel[c] as f64;
            }
        }
    }
    channels
}

fn write_block(image: &mut RgbImage, origin_x: u32, origin_y: u32, channels: &[Block; CHANNELS]) {
    for dx in 0..BLOCK_SIZE {
        for dy in 0..BLOCK_SIZE {
            let pixel = Rgb(std::array::from_fn(|c| to_sample(channels[c][dx][dy])));
            image.put_pixel(origin_x + dx as u32, origin_y + dy as u32, pixel);
        }
    }
}
