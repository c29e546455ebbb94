//! Frame decoding and face-crop normalization.
//!
//! Every frame is reduced to 8-bit luma before detection; crops handed to
//! the matcher are square and resized to the provider's face size.

use crate::types::Rect;
use image::imageops::{self, FilterType};
use image::GrayImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("empty frame")]
    Empty,
    #[error("undecodable image: {0}")]
    Image(#[from] image::ImageError),
    #[error("region {region:?} lies outside the {width}x{height} frame")]
    OutOfBounds { region: Rect, width: u32, height: u32 },
}

/// Decode an encoded image (JPEG, PNG, ...) into grayscale.
pub fn decode(bytes: &[u8]) -> Result<GrayImage, DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }
    let img = image::load_from_memory(bytes)?;
    Ok(img.to_luma8())
}

/// Copy out `region`, clamped to the frame.
pub fn crop(frame: &GrayImage, region: &Rect) -> Result<GrayImage, DecodeError> {
    let clamped = region
        .clamp_to(frame.width(), frame.height())
        .ok_or(DecodeError::OutOfBounds {
            region: *region,
            width: frame.width(),
            height: frame.height(),
        })?;
    Ok(imageops::crop_imm(frame, clamped.x, clamped.y, clamped.width, clamped.height).to_image())
}

/// Resize a face crop to a `size`×`size` square.
pub fn normalize(face: &GrayImage, size: u32) -> GrayImage {
    if face.width() == size && face.height() == size {
        return face.clone();
    }
    imageops::resize(face, size, size, FilterType::Triangle)
}
