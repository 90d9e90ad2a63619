//! Frame data structures for captured screen content

use std::time::Instant;

/// Bytes per pixel of the RGBA buffers produced by every frame source
pub const RGBA_PIXEL_STRIDE: u32 = 4;

/// A raw frame as delivered by a frame source
///
/// Rows may be padded: `row_stride` is the distance in bytes between the
/// starts of two consecutive rows and can exceed `pixel_stride * width`.
#[derive(Debug)]
pub struct RawFrame {
    /// Raw RGBA pixel data, `row_stride * height` bytes (the last row may be unpadded)
    pub data: Vec<u8>,
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Bytes between the starts of consecutive rows
    pub row_stride: u32,
    /// Bytes per pixel
    pub pixel_stride: u32,
    /// Timestamp when frame was captured
    pub timestamp: Instant,
}

impl RawFrame {
    /// Create a frame from a strided buffer
    pub fn new(data: Vec<u8>, width: u32, height: u32, row_stride: u32, pixel_stride: u32) -> Self {
        Self {
            data,
            width,
            height,
            row_stride,
            pixel_stride,
            timestamp: Instant::now(),
        }
    }

    /// Create a frame from a dense RGBA buffer (no row padding)
    pub fn dense(data: Vec<u8>, width: u32, height: u32) -> Self {
        Self::new(data, width, height, width * RGBA_PIXEL_STRIDE, RGBA_PIXEL_STRIDE)
    }

    /// Get frame dimensions as (width, height)
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Row padding in bytes, negative when the declared stride is too small
    pub fn row_padding(&self) -> i64 {
        self.row_stride as i64 - self.pixel_stride as i64 * self.width as i64
    }
}
