//! # Tile stores
//!
//! A sparse canvas: tiles exist only where something has been drawn. Every write goes through
//! [`TileStore::write_tile`], the one place where copy-on-write happens.

use std::sync::Arc;

use crate::blend::BlendMode;
use crate::color::Color;
use crate::pixel::PixelFormat;
use crate::surface::PlainSurface;
use crate::tile::{AllocError, Tile, TileCoord};
use crate::util::Rect;

pub type StoreID = crate::FuzzID<TileStore>;
/// Marker for [`StoreGeneration`].
pub struct GenerationMarker;
/// Identity of a store's structural state. Replaced whenever the store is reset outside of
/// the snapshot machinery (see [`TileStore::clear`]), so stale snapshots can notice.
pub type StoreGeneration = crate::FuzzID<GenerationMarker>;

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportError {
    #[error("stride of {stride} bytes is too small for rows of {width} pixels")]
    StrideTooSmall { stride: usize, width: u32 },
    #[error("buffer holds {len} bytes, {needed} needed")]
    BufferTooShort { len: usize, needed: usize },
    #[error("buffer of {height} rows with a stride of {stride} bytes is not addressable")]
    Overflow { stride: usize, height: u32 },
    #[error(transparent)]
    Alloc(#[from] AllocError),
}

pub struct TileStore {
    id: StoreID,
    generation: StoreGeneration,
    format: PixelFormat,
    tiles: hashbrown::HashMap<TileCoord, Arc<Tile>>,
}
impl std::fmt::Debug for TileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileStore")
            .field("id", &self.id)
            .field("generation", &self.generation)
            .field("format", &self.format)
            .field("tiles", &self.tiles.len())
            .finish()
    }
}
impl Default for TileStore {
    fn default() -> Self {
        Self::new(PixelFormat::default())
    }
}
impl TileStore {
    #[must_use]
    pub fn new(format: PixelFormat) -> Self {
        Self {
            id: StoreID::default(),
            generation: StoreGeneration::default(),
            format,
            tiles: hashbrown::HashMap::new(),
        }
    }
    #[must_use]
    pub fn id(&self) -> StoreID {
        self.id
    }
    #[must_use]
    pub fn generation(&self) -> StoreGeneration {
        self.generation
    }
    pub(crate) fn set_generation(&mut self, generation: StoreGeneration) {
        self.generation = generation;
    }
    #[must_use]
    pub fn format(&self) -> PixelFormat {
        self.format
    }
    /// Number of allocated tiles, empty or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tiles.len()
    }
    /// True if no tiles are allocated at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }
    pub fn tiles(&self) -> impl Iterator<Item = &Arc<Tile>> + '_ {
        self.tiles.values()
    }
    /// Coordinates of all allocated tiles, sorted.
    #[must_use]
    pub fn coords(&self) -> Vec<TileCoord> {
        let mut coords: Vec<_> = self.tiles.keys().copied().collect();
        coords.sort_unstable();
        coords
    }
    pub(crate) fn tile_map(&self) -> &hashbrown::HashMap<TileCoord, Arc<Tile>> {
        &self.tiles
    }
    pub(crate) fn insert_shared(&mut self, tile: Arc<Tile>) {
        self.tiles.insert(tile.coord(), tile);
    }
    pub(crate) fn remove(&mut self, coord: TileCoord) -> Option<Arc<Tile>> {
        self.tiles.remove(&coord)
    }
    /// Bytes of pixel data held by this store.
    #[must_use]
    pub fn memory_bytes(&self) -> usize {
        self.tiles.len() * Tile::byte_size_of(self.format)
    }
    /// The tile covering the given pixel, if allocated.
    #[must_use]
    pub fn get(&self, x: i32, y: i32) -> Option<&Tile> {
        self.tiles.get(&TileCoord::containing(x, y)).map(|tile| &**tile)
    }
    /// The tile covering the given pixel, allocating a clear one if there is none.
    ///
    /// The result may be shared with snapshots, use [`Self::write_tile`] to modify.
    /// # Errors
    /// If a new tile could not be allocated.
    pub fn get_or_create(&mut self, x: i32, y: i32) -> Result<&Tile, AllocError> {
        let coord = TileCoord::containing(x, y);
        let format = self.format;
        let tile = match self.tiles.entry(coord) {
            hashbrown::hash_map::Entry::Occupied(o) => o.into_mut(),
            hashbrown::hash_map::Entry::Vacant(v) => {
                log::trace!("creating tile {coord:?}");
                v.insert(Arc::new(Tile::new(coord, format)?))
            }
        };
        Ok(&**tile)
    }
    /// The tile covering the given pixel, guaranteed safe to write.
    ///
    /// Allocates a clear tile if there is none. If the tile is shared with a snapshot, it is
    /// cloned and the copy takes its place in the store, leaving the snapshot's view untouched.
    /// # Errors
    /// If a new tile or copy could not be allocated. The store is unchanged in that case.
    pub fn write_tile(&mut self, x: i32, y: i32) -> Result<&mut Tile, AllocError> {
        let coord = TileCoord::containing(x, y);
        let format = self.format;
        let slot = match self.tiles.entry(coord) {
            hashbrown::hash_map::Entry::Occupied(o) => o.into_mut(),
            hashbrown::hash_map::Entry::Vacant(v) => {
                log::trace!("creating tile {coord:?}");
                v.insert(Arc::new(Tile::new(coord, format)?))
            }
        };
        // A read-only tile nobody else references can be reclaimed in place. The flag is
        // cleared by `mark_written` below.
        if Arc::get_mut(slot).is_none() {
            log::trace!("copy-on-write of tile {coord:?}");
            *slot = Arc::new(slot.try_clone_writable()?);
        }
        // Unwrap OK - either it was unique already, or we just replaced it with a fresh Arc.
        let tile = Arc::get_mut(slot).expect("tile should be uniquely owned after copy-on-write");
        tile.mark_written();
        Ok(tile)
    }
    /// Drop every tile. This is a structural reset: the store takes on a new generation, and
    /// snapshots from before the reset can no longer be applied unless they recorded it.
    pub fn clear(&mut self) {
        self.tiles.clear();
        self.generation = StoreGeneration::default();
    }
    /// Remove tiles with no visible content. Returns the number removed.
    pub fn cleanup(&mut self) -> usize {
        let before = self.tiles.len();
        self.tiles.retain(|_, tile| !tile.is_empty());
        let removed = before - self.tiles.len();
        if removed != 0 {
            log::trace!("cleanup released {removed} tiles");
        }
        removed
    }
    /// Union of the extents of all tiles with content, or None if there is no content.
    ///
    /// Resolution is the tile grid, not individual pixels.
    #[must_use]
    pub fn bounding_box(&self) -> Option<Rect> {
        crate::util::union_all(
            self.tiles
                .values()
                .filter(|tile| !tile.is_empty())
                .map(|tile| tile.rect()),
        )
    }
    /// Read one pixel. Unallocated space is transparent.
    #[must_use]
    pub fn pixel(&self, x: i32, y: i32) -> Color {
        let Some(tile) = self.get(x, y) else {
            return Color::TRANSPARENT;
        };
        let (lx, ly) = local(tile.coord(), x, y);
        Color::from_array_lossy(tile.pixel_at(lx, ly)).unwrap_or(Color::TRANSPARENT)
    }
    /// Blend `color` over every pixel of `rect`.
    ///
    /// A stand-in for the brush engine, which lives elsewhere. Fully transparent colors only
    /// matter to [`BlendMode::Erase`]-like modes, but tiles are touched regardless.
    /// # Errors
    /// If a tile could not be allocated. Tiles before the failing one remain painted.
    pub fn fill_rect(&mut self, rect: Rect, color: Color, mode: BlendMode) -> Result<(), AllocError> {
        let src = color.as_array();
        for coord in TileCoord::covering(rect) {
            let tile = self.write_tile(coord.x(), coord.y())?;
            // Covering only yields tiles overlapping `rect`.
            let Some(area) = coord.rect().intersect(&rect) else {
                continue;
            };
            for (x, y) in area.pixels() {
                let (lx, ly) = local(coord, x, y);
                let dst = tile.pixel_at(lx, ly);
                tile.set_pixel_at(lx, ly, mode.apply(src, dst));
            }
        }
        Ok(())
    }
    /// Multiply every pixel by `opacity`, baking it into the content.
    /// # Errors
    /// If a copy-on-write clone could not be allocated.
    pub fn multiply_opacity(&mut self, opacity: f32) -> Result<(), AllocError> {
        let opacity = if opacity.is_nan() {
            0.0
        } else {
            opacity.clamp(0.0, 1.0)
        };
        for coord in self.coords() {
            let tile = self.write_tile(coord.x(), coord.y())?;
            for idx in 0..crate::TILE_SIZE * crate::TILE_SIZE {
                let (lx, ly) = (idx % crate::TILE_SIZE, idx / crate::TILE_SIZE);
                let px = tile.pixel_at(lx, ly);
                tile.set_pixel_at(lx, ly, px.map(|c| c * opacity));
            }
        }
        Ok(())
    }
    /// Copy a rectangular pixel buffer into the store, with its top-left at `(x, y)`.
    ///
    /// `stride` is the byte distance between rows of `bytes`. Pixels are converted from `format`
    /// into the store's format. The whole buffer is validated before any tile is touched, and
    /// each tile's content is committed in one piece.
    ///
    /// Returns the area written, or None if the buffer was zero-sized.
    /// # Errors
    /// On a malformed buffer, nothing is written. On allocation failure, earlier tiles are kept.
    #[allow(clippy::too_many_arguments)]
    pub fn import(
        &mut self,
        format: PixelFormat,
        bytes: &[u8],
        stride: usize,
        x: i32,
        y: i32,
        width: u32,
        height: u32,
    ) -> Result<Option<Rect>, ImportError> {
        let bpp = format.bytes_per_pixel();
        let overflow = ImportError::Overflow { stride, height };
        let row_len = (width as usize).checked_mul(bpp).ok_or(overflow)?;
        if stride < row_len {
            return Err(ImportError::StrideTooSmall { stride, width });
        }
        if width == 0 || height == 0 {
            return Ok(None);
        }
        let needed = stride
            .checked_mul(height as usize - 1)
            .and_then(|rows| rows.checked_add(row_len))
            .ok_or(overflow)?;
        if bytes.len() < needed {
            return Err(ImportError::BufferTooShort {
                len: bytes.len(),
                needed,
            });
        }
        let area = Rect::from_xywh(x, y, width, height);
        let store_format = self.format;
        let store_bpp = store_format.bytes_per_pixel();
        for coord in TileCoord::covering(area) {
            let Some(region) = coord.rect().intersect(&area) else {
                continue;
            };
            // Stage the tile's new content, then commit it with a single copy.
            let mut staged = match self.get(coord.x(), coord.y()) {
                Some(existing) => {
                    let mut staged = crate::tile::try_zeroed(existing.byte_size())?;
                    staged.copy_from_slice(existing.pixels());
                    staged
                }
                None => crate::tile::try_zeroed(Tile::byte_size_of(store_format))?,
            };
            for (px, py) in region.pixels() {
                // Inside `area`, so offsets are non-negative.
                let (sx, sy) = ((px - x) as usize, (py - y) as usize);
                let src = &bytes[sy * stride + sx * bpp..];
                let (lx, ly) = local(coord, px, py);
                let offs = (ly * crate::TILE_SIZE + lx) as usize * store_bpp;
                store_format.encode(format.decode(src), &mut staged[offs..]);
            }
            let tile = self.write_tile(coord.x(), coord.y())?;
            tile.pixels_mut().copy_from_slice(&staged);
        }
        Ok(Some(area))
    }
    /// Copy a region of the store out into a standalone buffer, in the store's format.
    /// # Errors
    /// If the output buffer could not be allocated.
    pub fn export(&self, rect: Rect) -> Result<PlainSurface, AllocError> {
        let mut out = PlainSurface::new(self.format, rect.width(), rect.height())?;
        let bpp = self.format.bytes_per_pixel();
        for coord in TileCoord::covering(rect) {
            let Some(tile) = self.get(coord.x(), coord.y()) else {
                // Unallocated, stays transparent.
                continue;
            };
            let Some(region) = coord.rect().intersect(&rect) else {
                continue;
            };
            for (px, py) in region.pixels() {
                let (lx, ly) = local(coord, px, py);
                let src_offs = (ly * crate::TILE_SIZE + lx) as usize * bpp;
                // Inside `rect`, so non-negative.
                let (ox, oy) = ((px - rect.left) as u32, (py - rect.top) as u32);
                out.pixel_bytes_mut(ox, oy)
                    .copy_from_slice(&tile.pixels()[src_offs..src_offs + bpp]);
            }
        }
        Ok(out)
    }
}

/// Convert a pixel coordinate into coordinates local to the given tile.
/// The pixel must lie within the tile.
pub(crate) fn local(coord: TileCoord, x: i32, y: i32) -> (u32, u32) {
    ((x - coord.x()) as u32, (y - coord.y()) as u32)
}

#[cfg(test)]
mod test {
    use super::{ImportError, TileStore};
    use crate::blend::BlendMode;
    use crate::color::Color;
    use crate::pixel::PixelFormat;
    use crate::util::Rect;
    use crate::TILE_SIZE;

    const RED: [u8; 4] = [255, 0, 0, 255];

    #[test]
    fn lazily_created() {
        let mut store = TileStore::new(PixelFormat::Rgba8Premultiplied);
        assert!(store.get(5, 5).is_none());
        let tile = store.get_or_create(70, -3).unwrap();
        assert_eq!((tile.x(), tile.y()), (64, -64));
        assert_eq!(store.len(), 1);
        // Still no content!
        assert_eq!(store.bounding_box(), None);
        assert_eq!(store.cleanup(), 1);
        assert!(store.is_empty());
    }
    #[test]
    fn bounding_box_is_union_of_content() {
        let mut store = TileStore::default();
        store
            .fill_rect(Rect::from_xywh(1, 1, 1, 1), Color::WHITE, BlendMode::Normal)
            .unwrap();
        store
            .fill_rect(Rect::from_xywh(200, -10, 1, 1), Color::WHITE, BlendMode::Normal)
            .unwrap();
        // And an allocated-but-empty tile far away, which should not count.
        store.get_or_create(-1000, -1000).unwrap();
        assert_eq!(store.bounding_box(), Some(Rect::new(0, -64, 256, 64)));
    }
    #[test]
    fn fill_and_read() {
        let mut store = TileStore::default();
        let red = Color::opaque_rgb8(255, 0, 0);
        store
            .fill_rect(Rect::from_xywh(60, 60, 10, 10), red, BlendMode::Normal)
            .unwrap();
        assert_eq!(store.len(), 4);
        assert_eq!(store.pixel(60, 60), red);
        assert_eq!(store.pixel(69, 69), red);
        assert_eq!(store.pixel(70, 70), Color::TRANSPARENT);
        store
            .fill_rect(Rect::from_xywh(60, 60, 10, 10), Color::BLACK, BlendMode::Erase)
            .unwrap();
        assert_eq!(store.pixel(65, 65), Color::TRANSPARENT);
        assert_eq!(store.cleanup(), 4);
    }
    #[test]
    fn import_export() {
        let mut store = TileStore::new(PixelFormat::Rgba8Premultiplied);
        // 3x2 image with a padded stride, spanning a tile seam.
        let stride = 3 * 4 + 4;
        let mut bytes = vec![0u8; stride * 2];
        for row in bytes.chunks_mut(stride) {
            for px in row[..12].chunks_mut(4) {
                px.copy_from_slice(&RED);
            }
        }
        let x = TILE_SIZE as i32 - 2;
        let area = store
            .import(PixelFormat::Rgba8Premultiplied, &bytes, stride, x, 0, 3, 2)
            .unwrap();
        assert_eq!(area, Some(Rect::from_xywh(x, 0, 3, 2)));
        assert_eq!(store.len(), 2);

        let out = store.export(Rect::from_xywh(x - 1, 0, 5, 1)).unwrap();
        assert_eq!(out.bytes(), [[0; 4], RED, RED, RED, [0; 4]].concat());
    }
    #[test]
    fn import_converts_format() {
        let mut store = TileStore::new(PixelFormat::Rgba8Premultiplied);
        store
            .import(PixelFormat::Rgba8, &[255, 255, 255, 51], 4, 0, 0, 1, 1)
            .unwrap();
        assert_eq!(store.export(Rect::from_xywh(0, 0, 1, 1)).unwrap().bytes(), [51; 4]);
    }
    #[test]
    fn import_rejects_short_buffers_untouched() {
        let mut store = TileStore::default();
        assert_eq!(
            store.import(PixelFormat::Rgba8, &[0; 4], 2, 0, 0, 1, 1),
            Err(ImportError::StrideTooSmall { stride: 2, width: 1 })
        );
        assert_eq!(
            store.import(PixelFormat::Rgba8, &[0; 7], 4, 0, 0, 1, 2),
            Err(ImportError::BufferTooShort { len: 7, needed: 8 })
        );
        assert!(store.is_empty());
    }
    #[test]
    fn import_rejects_unaddressable_stride() {
        let mut store = TileStore::default();
        let stride = usize::MAX / 2 + 1;
        assert_eq!(
            store.import(PixelFormat::Rgba8, &[0; 16], stride, 0, 0, 1, 3),
            Err(ImportError::Overflow { stride, height: 3 })
        );
        assert!(store.is_empty());
    }
    #[test]
    fn multiply_opacity_bakes() {
        let mut store = TileStore::default();
        store
            .fill_rect(Rect::from_xywh(0, 0, 1, 1), Color::WHITE, BlendMode::Normal)
            .unwrap();
        store.multiply_opacity(0.5).unwrap();
        assert_eq!(
            store.export(Rect::from_xywh(0, 0, 1, 1)).unwrap().bytes(),
            [128; 4]
        );
    }
    #[test]
    fn clear_changes_generation() {
        let mut store = TileStore::default();
        let before = store.generation();
        store.get_or_create(0, 0).unwrap();
        store.clear();
        assert!(store.is_empty());
        assert_ne!(before, store.generation());
    }
}
