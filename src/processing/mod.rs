//! # Image Processing
//!
//! The block codec run by every worker: an 8×8 DCT/quantization pipeline
//! applied per color channel.

pub mod codec;
pub mod dct;

pub use codec::{compress, compress_with};
