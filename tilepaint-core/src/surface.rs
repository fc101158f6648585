//! # Surfaces
//!
//! Anything pixels can be read from. Both sparse [`TileStore`]s and dense [`PlainSurface`]s
//! implement [`Surface`], so callers exporting or comparing images need not care which they hold.

use crate::color::Color;
use crate::pixel::{PixelFormat, Premul};
use crate::store::TileStore;
use crate::tile::AllocError;
use crate::util::Rect;

pub trait Surface {
    fn format(&self) -> PixelFormat;
    /// Extent of the content, or None if there is nothing to see.
    fn bounding_box(&self) -> Option<Rect>;
    /// Read a single premultiplied pixel. Outside the surface is transparent.
    fn pixel(&self, x: i32, y: i32) -> Premul;
    /// Copy a region out into a dense buffer in this surface's format.
    /// # Errors
    /// If the buffer could not be allocated.
    fn export(&self, rect: Rect) -> Result<PlainSurface, AllocError> {
        let mut out = PlainSurface::new(self.format(), rect.width(), rect.height())?;
        for (x, y) in rect.pixels() {
            // Within `rect`, so non-negative.
            out.set_pixel((x - rect.left) as u32, (y - rect.top) as u32, self.pixel(x, y));
        }
        Ok(out)
    }
}

impl Surface for TileStore {
    fn format(&self) -> PixelFormat {
        TileStore::format(self)
    }
    fn bounding_box(&self) -> Option<Rect> {
        TileStore::bounding_box(self)
    }
    fn pixel(&self, x: i32, y: i32) -> Premul {
        TileStore::pixel(self, x, y).as_array()
    }
    fn export(&self, rect: Rect) -> Result<PlainSurface, AllocError> {
        TileStore::export(self, rect)
    }
}

/// A dense, row-major image with its top-left at the origin and no row padding.
#[derive(Clone, PartialEq, Eq)]
pub struct PlainSurface {
    format: PixelFormat,
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}
impl std::fmt::Debug for PlainSurface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlainSurface")
            .field("format", &self.format)
            .field("width", &self.width)
            .field("height", &self.height)
            .finish_non_exhaustive()
    }
}
impl PlainSurface {
    /// Allocate a transparent surface.
    /// # Errors
    /// If the buffer could not be allocated.
    pub fn new(format: PixelFormat, width: u32, height: u32) -> Result<Self, AllocError> {
        let bytes = width as usize * height as usize * format.bytes_per_pixel();
        Ok(Self {
            format,
            width,
            height,
            pixels: crate::tile::try_zeroed(bytes)?,
        })
    }
    /// Wrap an existing buffer, which must be exactly `width * height` pixels.
    #[must_use]
    pub fn from_bytes(format: PixelFormat, width: u32, height: u32, pixels: Vec<u8>) -> Option<Self> {
        let expected = width as usize * height as usize * format.bytes_per_pixel();
        (pixels.len() == expected).then_some(Self {
            format,
            width,
            height,
            pixels,
        })
    }
    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }
    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.pixels
    }
    /// Byte distance between rows.
    #[must_use]
    pub fn stride(&self) -> usize {
        self.width as usize * self.format.bytes_per_pixel()
    }
    fn offset(&self, x: u32, y: u32) -> Option<usize> {
        (x < self.width && y < self.height)
            .then(|| y as usize * self.stride() + x as usize * self.format.bytes_per_pixel())
    }
    /// Raw bytes of one pixel.
    /// # Panics
    /// If the coordinate is out of bounds.
    pub fn pixel_bytes_mut(&mut self, x: u32, y: u32) -> &mut [u8] {
        let bpp = self.format.bytes_per_pixel();
        let offs = self
            .offset(x, y)
            .unwrap_or_else(|| panic!("pixel ({x}, {y}) out of bounds"));
        &mut self.pixels[offs..offs + bpp]
    }
    /// Write a pixel. Out of bounds writes are ignored.
    pub fn set_pixel(&mut self, x: u32, y: u32, px: Premul) {
        if let Some(offs) = self.offset(x, y) {
            let format = self.format;
            format.encode(px, &mut self.pixels[offs..]);
        }
    }
    /// Read a pixel as a color. Out of bounds is transparent.
    #[must_use]
    pub fn color(&self, x: u32, y: u32) -> Color {
        self.offset(x, y)
            .and_then(|offs| Color::from_array_lossy(self.format.decode(&self.pixels[offs..])).ok())
            .unwrap_or(Color::TRANSPARENT)
    }
    /// Re-encode into another format.
    /// # Errors
    /// If the new buffer could not be allocated.
    pub fn convert(&self, format: PixelFormat) -> Result<Self, AllocError> {
        if format == self.format {
            let mut pixels = crate::tile::try_zeroed(self.pixels.len())?;
            pixels.copy_from_slice(&self.pixels);
            return Ok(Self {
                pixels,
                ..*self
            });
        }
        let mut out = Self::new(format, self.width, self.height)?;
        let (src_bpp, dst_bpp) = (self.format.bytes_per_pixel(), format.bytes_per_pixel());
        for (src, dst) in self
            .pixels
            .chunks_exact(src_bpp)
            .zip(out.pixels.chunks_exact_mut(dst_bpp))
        {
            format.encode(self.format.decode(src), dst);
        }
        Ok(out)
    }
}
impl Surface for PlainSurface {
    fn format(&self) -> PixelFormat {
        self.format
    }
    fn bounding_box(&self) -> Option<Rect> {
        let has_content = self
            .pixels
            .chunks_exact(self.format.bytes_per_pixel())
            .any(|px| !self.format.is_transparent(px));
        has_content.then(|| Rect::from_xywh(0, 0, self.width, self.height))
    }
    fn pixel(&self, x: i32, y: i32) -> Premul {
        let (Ok(x), Ok(y)) = (u32::try_from(x), u32::try_from(y)) else {
            return [0.0; 4];
        };
        self.offset(x, y)
            .map_or([0.0; 4], |offs| self.format.decode(&self.pixels[offs..]))
    }
}

#[cfg(test)]
mod test {
    use super::{PlainSurface, Surface};
    use crate::blend::BlendMode;
    use crate::color::Color;
    use crate::pixel::PixelFormat;
    use crate::store::TileStore;
    use crate::util::Rect;

    #[test]
    fn plain_bounds() {
        let mut surface = PlainSurface::new(PixelFormat::Rgba8, 3, 2).unwrap();
        assert_eq!(surface.bounding_box(), None);
        surface.set_pixel(2, 1, [1.0; 4]);
        // Ignored.
        surface.set_pixel(3, 0, [1.0; 4]);
        assert_eq!(surface.bounding_box(), Some(Rect::from_xywh(0, 0, 3, 2)));
        assert_eq!(surface.pixel(2, 1), [1.0; 4]);
        assert_eq!(surface.pixel(-1, 0), [0.0; 4]);
        assert_eq!(surface.color(2, 1), Color::WHITE);
    }
    #[test]
    fn from_bytes_checks_length() {
        assert!(PlainSurface::from_bytes(PixelFormat::Rgba8, 2, 2, vec![0; 15]).is_none());
        assert!(PlainSurface::from_bytes(PixelFormat::Rgba8, 2, 2, vec![0; 16]).is_some());
    }
    #[test]
    fn convert_formats() {
        let mut surface = PlainSurface::new(PixelFormat::RgbaF32Premultiplied, 1, 1).unwrap();
        surface.set_pixel(0, 0, [0.2, 0.0, 0.0, 0.2]);
        let straight = surface.convert(PixelFormat::Rgba8).unwrap();
        assert_eq!(straight.bytes(), [255, 0, 0, 51]);
        assert_eq!(straight.stride(), 4);
    }
    #[test]
    fn generic_export_matches_store() {
        let mut store = TileStore::default();
        store
            .fill_rect(Rect::from_xywh(-2, -2, 4, 4), Color::WHITE, BlendMode::Normal)
            .unwrap();
        let area = Rect::from_xywh(-3, -3, 6, 6);
        // Go through the default per-pixel path via a PlainSurface copy.
        let dense = Surface::export(&store, area).unwrap();
        let via_plain = Surface::export(&dense, Rect::from_xywh(0, 0, 6, 6)).unwrap();
        assert_eq!(dense, via_plain);
        assert_eq!(dense.color(1, 1), Color::WHITE);
        assert_eq!(dense.color(0, 0), Color::TRANSPARENT);
    }
}
