//! Conversion of PNG and JPEG images to the FreeWili image format (`.fwi`).
//!
//! Layout, all integers little-endian:
//!
//! | field              | type      |
//! |--------------------|-----------|
//! | magic `FW01IMG\0`  | 8 bytes   |
//! | flags (1)          | u32       |
//! | pixel count        | u32       |
//! | width              | u16       |
//! | height             | u16       |
//! | transparent color  | u16 (0)   |
//! | image id           | u16 (0)   |
//! | pixels             | u16 each  |
//!
//! Pixels are RGB565 in row-major order with their two bytes swapped, so the
//! display can copy them straight into its frame buffer. A fully transparent
//! pixel becomes the transparent color 0.

use std::path::Path;

use image::{DynamicImage, GenericImageView};
use tracing::info;

use crate::error::{HostError, Result};

/// File magic.
pub const FWI_MAGIC: &[u8; 8] = b"FW01IMG\0";

/// Header flag: the image uses a transparent color.
const FLAG_TRANSPARENT: u32 = 1;

/// Header size in bytes.
pub const FWI_HEADER_SIZE: usize = 24;

/// Largest width or height the header can express.
const MAX_DIMENSION: u32 = i16::MAX as u32;

/// Convert one RGBA pixel to byte-swapped RGB565.
pub fn rgb565_swapped(r: u8, g: u8, b: u8, alpha: Option<u8>) -> u16 {
    if alpha == Some(0) {
        return 0;
    }
    let r = (f32::from(r) / 255.0 * 31.0) as u16;
    let g = (f32::from(g) / 255.0 * 63.0) as u16;
    let b = (f32::from(b) / 255.0 * 31.0) as u16;
    ((r << 11) | (g << 5) | b).swap_bytes()
}

/// Encode a decoded image as an FWI file.
pub fn encode_fwi(image: &DynamicImage) -> Result<Vec<u8>> {
    let (width, height) = image.dimensions();
    if width > MAX_DIMENSION || height > MAX_DIMENSION {
        return Err(HostError::InvalidArgument(format!(
            "image is {}x{}, at most {} pixels per side are supported",
            width, height, MAX_DIMENSION
        )));
    }
    let has_alpha = image.color().has_alpha();
    let pixels = width * height;

    let mut out = Vec::with_capacity(FWI_HEADER_SIZE + pixels as usize * 2);
    out.extend_from_slice(FWI_MAGIC);
    out.extend_from_slice(&FLAG_TRANSPARENT.to_le_bytes());
    out.extend_from_slice(&pixels.to_le_bytes());
    out.extend_from_slice(&(width as u16).to_le_bytes());
    out.extend_from_slice(&(height as u16).to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());

    for pixel in image.to_rgba8().pixels() {
        let [r, g, b, a] = pixel.0;
        let alpha = has_alpha.then_some(a);
        out.extend_from_slice(&rgb565_swapped(r, g, b, alpha).to_le_bytes());
    }
    Ok(out)
}

/// Convert the image at `input` and write it to `output`.
pub fn convert_image(input: impl AsRef<Path>, output: impl AsRef<Path>) -> Result<()> {
    let input = input.as_ref();
    let output = output.as_ref();
    let image = image::open(input)?;
    let fwi = encode_fwi(&image)?;
    std::fs::write(output, &fwi)?;
    info!(
        "Converted {} ({}x{}) to {}",
        input.display(),
        image.width(),
        image.height(),
        output.display()
    );
    Ok(())
}
