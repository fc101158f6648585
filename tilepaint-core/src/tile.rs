//! # Tiles
//!
//! The atomic unit of pixel storage. A tile is a `TILE_SIZE`² block of pixels at a grid-aligned
//! position, plus flags tracking its sharing and its mipmap cache.
//!
//! Tiles are shared between a [`TileStore`](crate::store::TileStore) and any number of
//! [`Snapshot`](crate::snapshot::Snapshot)s behind an `Arc`. A tile flagged [`TileFlags::READ_ONLY`]
//! is never written again - the store replaces it with a fresh copy instead.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use crate::pixel::{PixelFormat, Premul};
use crate::util::Rect;
use crate::TILE_SIZE;

/// Number of mip levels below the full-resolution tile. Level `MAX_MIP_LEVEL` is a single pixel.
pub const MAX_MIP_LEVEL: u32 = TILE_SIZE.trailing_zeros();

// TILE_SIZE as i32, for coordinate math.
#[allow(clippy::cast_possible_wrap)]
const TILE_SIZE_I: i32 = TILE_SIZE as i32;

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("failed to allocate {bytes} bytes of pixel storage")]
pub struct AllocError {
    pub bytes: usize,
}

/// Allocate a zeroed buffer, reporting failure instead of aborting.
pub(crate) fn try_zeroed(bytes: usize) -> Result<Vec<u8>, AllocError> {
    let mut buffer = Vec::new();
    buffer
        .try_reserve_exact(bytes)
        .map_err(|_| AllocError { bytes })?;
    buffer.resize(bytes, 0);
    Ok(buffer)
}

/// Position of a tile, as the pixel coordinate of its top-left corner.
/// Always a multiple of `TILE_SIZE`.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct TileCoord {
    x: i32,
    y: i32,
}
impl TileCoord {
    /// The tile covering the given pixel. Rounds toward negative infinity.
    #[must_use]
    pub fn containing(x: i32, y: i32) -> Self {
        Self {
            x: x.div_euclid(TILE_SIZE_I) * TILE_SIZE_I,
            y: y.div_euclid(TILE_SIZE_I) * TILE_SIZE_I,
        }
    }
    #[must_use]
    pub fn x(self) -> i32 {
        self.x
    }
    #[must_use]
    pub fn y(self) -> i32 {
        self.y
    }
    /// The pixel area covered by this tile.
    #[must_use]
    pub fn rect(self) -> Rect {
        Rect::from_xywh(self.x, self.y, TILE_SIZE, TILE_SIZE)
    }
    /// Every tile coordinate overlapping the rect, row by row.
    pub fn covering(rect: Rect) -> impl Iterator<Item = TileCoord> {
        let (first, last) = if rect.is_empty() {
            // Yields nothing.
            (Self { x: 0, y: 0 }, Self { x: -1, y: -1 })
        } else {
            (
                Self::containing(rect.left, rect.top),
                Self::containing(rect.right - 1, rect.bottom - 1),
            )
        };
        (first.y..=last.y)
            .step_by(TILE_SIZE as usize)
            .flat_map(move |y| {
                (first.x..=last.x)
                    .step_by(TILE_SIZE as usize)
                    .map(move |x| TileCoord { x, y })
            })
    }
}

bitflags::bitflags! {
    #[derive(Copy, Clone, PartialEq, Eq, Debug, Hash)]
    pub struct TileFlags: u8 {
        /// Shared with a snapshot. Must be cloned before writing.
        const READ_ONLY = 0b01;
        /// Pixels changed since the mipmap chain was built.
        const DAMAGED = 0b10;
    }
}

/// Box-filtered, premultiplied reductions of a tile. `levels[0]` is mip level 1.
pub struct MipChain {
    levels: Vec<Box<[Premul]>>,
}
impl MipChain {
    fn build(tile: &Tile) -> Self {
        let full: Box<[Premul]> = (0..TILE_SIZE * TILE_SIZE)
            .map(|idx| tile.pixel_at(idx % TILE_SIZE, idx / TILE_SIZE))
            .collect();
        let mut levels: Vec<Box<[Premul]>> = Vec::with_capacity(MAX_MIP_LEVEL as usize);
        let mut prev_size = TILE_SIZE as usize;
        for level in 0..MAX_MIP_LEVEL as usize {
            let prev: &[Premul] = if level == 0 { &full } else { &levels[level - 1] };
            let size = prev_size / 2;
            let next: Box<[Premul]> = (0..size * size)
                .map(|idx| {
                    let (x, y) = ((idx % size) * 2, (idx / size) * 2);
                    let quad = [
                        prev[y * prev_size + x],
                        prev[y * prev_size + x + 1],
                        prev[(y + 1) * prev_size + x],
                        prev[(y + 1) * prev_size + x + 1],
                    ];
                    [0, 1, 2, 3].map(|c| quad.iter().map(|px| px[c]).sum::<f32>() * 0.25)
                })
                .collect();
            levels.push(next);
            prev_size = size;
        }
        Self { levels }
    }
    /// Fetch a texel of `level` (`1..=MAX_MIP_LEVEL`), in that level's coordinates.
    /// Out-of-range reads are transparent.
    #[must_use]
    pub fn texel(&self, level: u32, x: u32, y: u32) -> Premul {
        let size = TILE_SIZE >> level;
        if level == 0 || x >= size || y >= size {
            return [0.0; 4];
        }
        self.levels
            .get(level as usize - 1)
            .and_then(|texels| texels.get((y * size + x) as usize))
            .copied()
            .unwrap_or([0.0; 4])
    }
}

pub struct Tile {
    coord: TileCoord,
    format: PixelFormat,
    pixels: Box<[u8]>,
    flags: AtomicU8,
    mipmaps: parking_lot::Mutex<Option<Arc<MipChain>>>,
}
impl std::fmt::Debug for Tile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tile")
            .field("coord", &self.coord)
            .field("format", &self.format)
            .field("flags", &self.flags())
            .finish_non_exhaustive()
    }
}
impl Tile {
    /// Byte length of one tile's pixel buffer in the given format.
    #[must_use]
    pub const fn byte_size_of(format: PixelFormat) -> usize {
        (TILE_SIZE * TILE_SIZE) as usize * format.bytes_per_pixel()
    }
    /// Create a cleared (fully transparent) tile.
    /// # Errors
    /// If the pixel buffer could not be allocated.
    pub fn new(coord: TileCoord, format: PixelFormat) -> Result<Self, AllocError> {
        let pixels = try_zeroed(Self::byte_size_of(format))?.into_boxed_slice();
        Ok(Self {
            coord,
            format,
            pixels,
            flags: AtomicU8::new(TileFlags::DAMAGED.bits()),
            mipmaps: parking_lot::Mutex::new(None),
        })
    }
    /// Copy the pixels into a new, writable tile. The copy starts out damaged with no mipmaps.
    /// # Errors
    /// If the pixel buffer could not be allocated.
    pub fn try_clone_writable(&self) -> Result<Self, AllocError> {
        let mut pixels = try_zeroed(self.pixels.len())?;
        pixels.copy_from_slice(&self.pixels);
        Ok(Self {
            coord: self.coord,
            format: self.format,
            pixels: pixels.into_boxed_slice(),
            flags: AtomicU8::new(TileFlags::DAMAGED.bits()),
            mipmaps: parking_lot::Mutex::new(None),
        })
    }
    #[must_use]
    pub fn coord(&self) -> TileCoord {
        self.coord
    }
    #[must_use]
    pub fn x(&self) -> i32 {
        self.coord.x
    }
    #[must_use]
    pub fn y(&self) -> i32 {
        self.coord.y
    }
    #[must_use]
    pub fn rect(&self) -> Rect {
        self.coord.rect()
    }
    #[must_use]
    pub fn format(&self) -> PixelFormat {
        self.format
    }
    #[must_use]
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }
    /// Mutable access to the raw pixels. Only reachable through an exclusively owned tile,
    /// which the store hands out from [`TileStore::write_tile`](crate::store::TileStore::write_tile).
    pub fn pixels_mut(&mut self) -> &mut [u8] {
        self.mark_written();
        &mut self.pixels
    }
    #[must_use]
    pub fn byte_size(&self) -> usize {
        self.pixels.len()
    }
    #[must_use]
    pub fn flags(&self) -> TileFlags {
        TileFlags::from_bits_truncate(self.flags.load(Ordering::Acquire))
    }
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.flags().contains(TileFlags::READ_ONLY)
    }
    #[must_use]
    pub fn is_damaged(&self) -> bool {
        self.flags().contains(TileFlags::DAMAGED)
    }
    /// Flag the tile as shared. Sticky - only an exclusive owner may clear it.
    pub(crate) fn mark_read_only(&self) {
        self.flags
            .fetch_or(TileFlags::READ_ONLY.bits(), Ordering::AcqRel);
    }
    /// Prepare an exclusively-owned tile for writing: no longer read only, mipmaps stale.
    pub(crate) fn mark_written(&mut self) {
        *self.flags.get_mut() = TileFlags::DAMAGED.bits();
        *self.mipmaps.get_mut() = None;
    }
    /// True if every pixel is fully transparent.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        let bpp = self.format.bytes_per_pixel();
        self.pixels
            .chunks_exact(bpp)
            .all(|px| self.format.is_transparent(px))
    }
    fn offset(&self, x: u32, y: u32) -> usize {
        (y * TILE_SIZE + x) as usize * self.format.bytes_per_pixel()
    }
    /// Read a pixel by tile-local coordinates. Out of bounds is transparent.
    #[must_use]
    pub fn pixel_at(&self, x: u32, y: u32) -> Premul {
        if x >= TILE_SIZE || y >= TILE_SIZE {
            return [0.0; 4];
        }
        let offs = self.offset(x, y);
        self.format.decode(&self.pixels[offs..])
    }
    /// Write a pixel by tile-local coordinates. Out of bounds writes are ignored.
    pub fn set_pixel_at(&mut self, x: u32, y: u32, px: Premul) {
        if x >= TILE_SIZE || y >= TILE_SIZE {
            return;
        }
        // Exactly DAMAGED means already writable with no cached mips to drop.
        if *self.flags.get_mut() != TileFlags::DAMAGED.bits() {
            self.mark_written();
        }
        let offs = self.offset(x, y);
        self.format.encode(px, &mut self.pixels[offs..]);
    }
    /// Get the mipmap chain, rebuilding it first if the tile is damaged.
    pub fn mipmaps(&self) -> Arc<MipChain> {
        let mut cache = self.mipmaps.lock();
        if let Some(chain) = cache.as_ref().filter(|_| !self.is_damaged()) {
            return chain.clone();
        }
        log::trace!("building mipmaps for tile {:?}", self.coord);
        let chain = Arc::new(MipChain::build(self));
        *cache = Some(chain.clone());
        self.flags
            .fetch_and(!TileFlags::DAMAGED.bits(), Ordering::AcqRel);
        chain
    }
}

#[cfg(test)]
mod test {
    use super::{Tile, TileCoord, TileFlags, MAX_MIP_LEVEL};
    use crate::pixel::PixelFormat;
    use crate::util::Rect;
    use crate::TILE_SIZE;

    #[test]
    fn coords_round_down() {
        assert_eq!(TileCoord::containing(0, 0), TileCoord::containing(63, 63));
        let negative = TileCoord::containing(-1, -64);
        assert_eq!((negative.x(), negative.y()), (-64, -64));
        assert_eq!(TileCoord::containing(64, 130).rect(), Rect::from_xywh(64, 128, 64, 64));
    }
    #[test]
    fn covering() {
        let coords: Vec<_> = TileCoord::covering(Rect::new(-1, 0, 65, 10)).collect();
        assert_eq!(
            coords,
            [
                TileCoord::containing(-64, 0),
                TileCoord::containing(0, 0),
                TileCoord::containing(64, 0)
            ]
        );
        assert_eq!(TileCoord::covering(Rect::new(0, 0, 0, 0)).count(), 0);
    }
    #[test]
    fn new_tile_is_empty() {
        let tile = Tile::new(TileCoord::containing(0, 0), PixelFormat::Rgba8Premultiplied).unwrap();
        assert!(tile.is_empty());
        assert!(!tile.is_read_only());
        assert_eq!(tile.byte_size(), (TILE_SIZE * TILE_SIZE * 4) as usize);
    }
    #[test]
    fn read_only_is_sticky_until_written() {
        let mut tile = Tile::new(TileCoord::containing(0, 0), PixelFormat::Rgba8).unwrap();
        tile.mark_read_only();
        assert!(tile.flags().contains(TileFlags::READ_ONLY));
        let copy = tile.try_clone_writable().unwrap();
        assert!(!copy.is_read_only());
        assert!(copy.is_damaged());
        tile.set_pixel_at(0, 0, [1.0; 4]);
        assert!(!tile.is_read_only());
    }
    #[test]
    fn mipmaps_average_and_refresh() {
        let mut tile =
            Tile::new(TileCoord::containing(0, 0), PixelFormat::RgbaF32Premultiplied).unwrap();
        tile.set_pixel_at(0, 0, [1.0, 0.0, 0.0, 1.0]);
        let chain = tile.mipmaps();
        assert!(!tile.is_damaged());
        assert_eq!(chain.texel(1, 0, 0), [0.25, 0.0, 0.0, 0.25]);
        assert_eq!(chain.texel(1, 1, 0), [0.0; 4]);
        let last = chain.texel(MAX_MIP_LEVEL, 0, 0);
        let expect = 1.0 / (TILE_SIZE * TILE_SIZE) as f32;
        assert!((last[0] - expect).abs() < 1e-7);

        // Writing damages, and the next fetch reflects the change.
        tile.set_pixel_at(1, 0, [1.0, 0.0, 0.0, 1.0]);
        assert!(tile.is_damaged());
        assert_eq!(tile.mipmaps().texel(1, 0, 0), [0.5, 0.0, 0.0, 0.5]);
    }
    #[test]
    fn runs_of_writes_invalidate_once() {
        let mut tile =
            Tile::new(TileCoord::containing(0, 0), PixelFormat::RgbaF32Premultiplied).unwrap();
        let first = tile.mipmaps();
        assert!(std::sync::Arc::ptr_eq(&first, &tile.mipmaps()));

        for x in 0..4 {
            tile.set_pixel_at(x, 0, [1.0; 4]);
        }
        assert_eq!(tile.flags(), TileFlags::DAMAGED);
        let second = tile.mipmaps();
        assert!(!std::sync::Arc::ptr_eq(&first, &second));
        assert_eq!(second.texel(1, 0, 0), [0.5; 4]);
        assert_eq!(second.texel(1, 1, 0), [0.5; 4]);
    }
}
