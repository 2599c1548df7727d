//! Color packing and image sources for the pixel pipeline.

use embedded_graphics_core::geometry::Size;
use embedded_graphics_core::pixelcolor::{Rgb565, Rgb888, RgbColor, raw::RawU16};
use embedded_graphics_core::prelude::RawData;

/// Pack an 8-bit-per-channel color into the controller's RGB565 word.
///
/// Low bits are truncated, not rounded: red and blue keep bits 7..3, green
/// keeps bits 7..2.
pub const fn rgb565_from_rgb888(r: u8, g: u8, b: u8) -> u16 {
    ((r as u16 & 0xF8) << 8) | ((g as u16 & 0xFC) << 3) | (b as u16 >> 3)
}

/// Expand an RGB565 word back to RGB888 with the dropped low bits zeroed.
pub const fn rgb888_from_rgb565(raw: u16) -> (u8, u8, u8) {
    (
        ((raw >> 8) & 0xF8) as u8,
        ((raw >> 3) & 0xFC) as u8,
        ((raw << 3) & 0xF8) as u8,
    )
}

/// Raw RGB565 word of an `embedded-graphics` color.
pub fn raw565(color: Rgb565) -> u16 {
    RawU16::from(color).into_inner()
}

pub(crate) fn pack(color: Rgb888) -> u16 {
    rgb565_from_rgb888(color.r(), color.g(), color.b())
}

/// Read-only 2D pixel source consumed by `show`.
pub trait PixelSource {
    /// Image size in pixels.
    fn size(&self) -> Size;

    /// Color at `(x, y)`. Callers stay inside `size()`.
    fn pixel(&self, x: u32, y: u32) -> Rgb888;
}

/// Byte layout of an [`RgbImage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PixelLayout {
    /// `R, G, B`
    Rgb888,
    /// `R, G, B, A`; alpha is ignored
    Rgba8888,
}

impl PixelLayout {
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            PixelLayout::Rgb888 => 3,
            PixelLayout::Rgba8888 => 4,
        }
    }
}

/// Row-major packed image borrowed from a byte slice.
#[derive(Debug, Clone, Copy)]
pub struct RgbImage<'a> {
    data: &'a [u8],
    width: u32,
    height: u32,
    layout: PixelLayout,
}

impl<'a> RgbImage<'a> {
    /// Wrap `data`. Returns `None` when the slice is too short for
    /// `width * height` pixels.
    pub fn new(data: &'a [u8], width: u32, height: u32, layout: PixelLayout) -> Option<Self> {
        let needed = (width as usize)
            .checked_mul(height as usize)?
            .checked_mul(layout.bytes_per_pixel())?;
        if data.len() < needed {
            return None;
        }
        Some(Self {
            data,
            width,
            height,
            layout,
        })
    }
}

impl PixelSource for RgbImage<'_> {
    fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }

    fn pixel(&self, x: u32, y: u32) -> Rgb888 {
        let offset = (y as usize * self.width as usize + x as usize) * self.layout.bytes_per_pixel();
        Rgb888::new(
            self.data[offset],
            self.data[offset + 1],
            self.data[offset + 2],
        )
    }
}
