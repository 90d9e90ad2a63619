//! Bitmap reconstruction from strided frame buffers
//!
//! Hardware frame buffers often pad every row to an alignment boundary. The
//! reconstructor turns such a buffer into a dense RGBA image of exactly the
//! declared width and height.

use image::{imageops, RgbaImage};
use tracing::trace;

use super::frame::{RawFrame, RGBA_PIXEL_STRIDE};
use super::CaptureError;

/// Convert a raw frame into a dense RGBA image
///
/// With row padding the buffer is first laid out as a wider image
/// (`width + padding / pixel_stride` columns) and then cropped back to
/// `width`. The wide working image is dropped before returning.
pub fn reconstruct(frame: RawFrame) -> Result<RgbaImage, CaptureError> {
    let RawFrame {
        data,
        width,
        height,
        row_stride,
        pixel_stride,
        ..
    } = frame;

    if pixel_stride == 0 {
        return Err(CaptureError::ZeroPixelStride);
    }
    if pixel_stride != RGBA_PIXEL_STRIDE {
        return Err(CaptureError::UnsupportedPixelStride(pixel_stride));
    }
    if width == 0 || height == 0 {
        return Err(CaptureError::EmptyFrame);
    }

    let dense_row = pixel_stride as usize * width as usize;
    if (row_stride as usize) < dense_row {
        return Err(CaptureError::InvalidRowStride {
            row_stride,
            min: dense_row as u32,
        });
    }

    let row_padding = row_stride as usize - dense_row;
    let wide_width = width as usize + row_padding / pixel_stride as usize;
    let wide_row = wide_width * pixel_stride as usize;

    // The final row of a hardware buffer is not always padded.
    let required = row_stride as usize * (height as usize - 1) + dense_row;
    if data.len() < required {
        return Err(CaptureError::BufferTooSmall {
            expected: required,
            actual: data.len(),
        });
    }

    if row_padding == 0 {
        let mut data = data;
        data.truncate(dense_row * height as usize);
        return RgbaImage::from_raw(width, height, data).ok_or(CaptureError::BufferTooSmall {
            expected: dense_row * height as usize,
            actual: 0,
        });
    }

    trace!(
        "Reconstructing {}x{} frame with {} bytes of row padding",
        width,
        height,
        row_padding
    );

    // Padding that is not a whole number of pixels is skipped per row.
    let mut wide = Vec::with_capacity(wide_row * height as usize);
    for row in 0..height as usize {
        let start = row * row_stride as usize;
        let end = (start + wide_row).min(data.len());
        wide.extend_from_slice(&data[start..end]);
        wide.resize((row + 1) * wide_row, 0);
    }
    drop(data);

    let wide = RgbaImage::from_raw(wide_width as u32, height, wide).ok_or(
        CaptureError::BufferTooSmall {
            expected: wide_row * height as usize,
            actual: 0,
        },
    )?;

    let cropped = imageops::crop_imm(&wide, 0, 0, width, height).to_image();
    drop(wide);

    Ok(cropped)
}
