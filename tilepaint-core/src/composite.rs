//! # Compositing
//!
//! Resample one tile store through an affine transform and blend it onto another.
//!
//! Minified sources are read from their tiles' mipmaps, choosing the level whose texels are
//! closest to one destination pixel without being smaller. Everything else samples full
//! resolution, bilinear or nearest. Pure integer translations always take the nearest path,
//! which maps source pixels onto destination pixels exactly.

use std::sync::Arc;

use crate::blend::Blend;
use crate::pixel::Premul;
use crate::store::TileStore;
use crate::tile::{AllocError, MipChain, Tile, TileCoord, MAX_MIP_LEVEL};
use crate::transform::{Matrix, TransformError};
use crate::util::Rect;

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompositeError {
    #[error("bad layer transform: {0}")]
    Transform(#[from] TransformError),
    #[error(transparent)]
    Alloc(#[from] AllocError),
}
impl CompositeError {
    #[must_use]
    pub fn is_exhaustion(&self) -> bool {
        matches!(self, Self::Alloc(_))
    }
}

/// Filtering for full-resolution sampling under non-translation transforms.
#[derive(
    strum::AsRefStr,
    strum::EnumIter,
    PartialEq,
    Eq,
    Copy,
    Clone,
    Hash,
    Debug,
    Default,
    serde::Serialize,
    serde::Deserialize,
)]
pub enum ResampleFilter {
    Nearest,
    #[default]
    Bilinear,
}

/// Choose a mip level for a destination-to-source scale factor.
///
/// Returns the level and the scale left over once the level is accounted for. Scales at or below
/// one (magnification or identity) use level 0 with no adjustment.
#[must_use]
pub fn mip_level_for_scale(scale: f32) -> (u32, f32) {
    // Also catches NaN.
    if !(scale > 1.0) {
        return (0, scale);
    }
    let level: u32 = az::saturating_cast(scale.log2().floor());
    let level = level.min(MAX_MIP_LEVEL);
    #[allow(clippy::cast_precision_loss)]
    let residual = scale / (1u32 << level) as f32;
    (level, residual)
}

/// Floor a float coordinate to a pixel index, None if unrepresentable.
fn pixel_index(v: f32) -> Option<i32> {
    az::checked_cast(v.floor())
}

/// Fetches source pixels, caching tile lookups and mipmap chains for the pass.
struct Sampler<'a> {
    store: &'a TileStore,
    level: u32,
    filter: ResampleFilter,
    last: Option<(TileCoord, Option<&'a Tile>)>,
    mips: hashbrown::HashMap<TileCoord, Arc<MipChain>>,
}
impl<'a> Sampler<'a> {
    fn new(store: &'a TileStore, level: u32, filter: ResampleFilter) -> Self {
        Self {
            store,
            level,
            filter,
            last: None,
            mips: hashbrown::HashMap::new(),
        }
    }
    fn tile(&mut self, coord: TileCoord) -> Option<&'a Tile> {
        if let Some((last, tile)) = self.last {
            if last == coord {
                return tile;
            }
        }
        let tile = self.store.tile_map().get(&coord).map(|tile| &**tile);
        self.last = Some((coord, tile));
        tile
    }
    /// A full-resolution pixel at integer source coordinates.
    fn pixel(&mut self, x: i32, y: i32) -> Premul {
        let coord = TileCoord::containing(x, y);
        match self.tile(coord) {
            Some(tile) => {
                let (lx, ly) = crate::store::local(coord, x, y);
                tile.pixel_at(lx, ly)
            }
            None => [0.0; 4],
        }
    }
    /// The texel of the current mip level covering integer source coordinates.
    fn texel(&mut self, x: i32, y: i32) -> Premul {
        let coord = TileCoord::containing(x, y);
        let Some(tile) = self.tile(coord) else {
            return [0.0; 4];
        };
        let level = self.level;
        let chain = self
            .mips
            .entry(coord)
            .or_insert_with(|| tile.mipmaps());
        let (lx, ly) = crate::store::local(coord, x, y);
        chain.texel(level, lx >> level, ly >> level)
    }
    /// Sample at a point in source space.
    fn sample(&mut self, [x, y]: [f32; 2], exact: bool) -> Premul {
        if self.level > 0 {
            return match (pixel_index(x), pixel_index(y)) {
                (Some(x), Some(y)) => self.texel(x, y),
                _ => [0.0; 4],
            };
        }
        if exact || self.filter == ResampleFilter::Nearest {
            return match (pixel_index(x), pixel_index(y)) {
                (Some(x), Some(y)) => self.pixel(x, y),
                _ => [0.0; 4],
            };
        }
        // Bilinear between the four nearest pixel centers.
        let (fx, fy) = (x - 0.5, y - 0.5);
        let (Some(x0), Some(y0)) = (pixel_index(fx), pixel_index(fy)) else {
            return [0.0; 4];
        };
        #[allow(clippy::cast_precision_loss)]
        let (tx, ty) = (fx - x0 as f32, fy - y0 as f32);
        let x1 = x0.saturating_add(1);
        let y1 = y0.saturating_add(1);
        let weighted = [
            (self.pixel(x0, y0), (1.0 - tx) * (1.0 - ty)),
            (self.pixel(x1, y0), tx * (1.0 - ty)),
            (self.pixel(x0, y1), (1.0 - tx) * ty),
            (self.pixel(x1, y1), tx * ty),
        ];
        [0, 1, 2, 3].map(|c| weighted.iter().map(|(px, w)| px[c] * w).sum())
    }
}

/// Blend `src`, placed by `src_to_dest`, onto `dest` within `clip`.
///
/// Every destination tile the source overlaps is obtained for writing, even if the blend turns
/// out to change nothing. Returns the destination area that may have changed, or None if the
/// source has nothing within the clip.
/// # Errors
/// If `src_to_dest` cannot be inverted, or a destination tile could not be allocated. In the
/// latter case tiles already composited keep their new content.
pub fn composite(
    src: &TileStore,
    src_to_dest: &Matrix,
    blend: Blend,
    filter: ResampleFilter,
    dest: &mut TileStore,
    clip: Rect,
) -> Result<Option<Rect>, CompositeError> {
    let dest_to_src = src_to_dest.invert()?;
    let (level, residual) = mip_level_for_scale(dest_to_src.uniform_scale());
    let exact = level == 0 && src_to_dest.is_integer_translation();
    // Bilinear reads reach half a pixel past each source tile.
    let reach = if exact || level > 0 || filter == ResampleFilter::Nearest {
        0
    } else {
        1
    };

    // First hop, clip into source space to find overlapping source tiles.
    let Some(src_area) = dest_to_src.transform_rect(&clip) else {
        return Ok(None);
    };
    // Second hop, each of those tiles back into destination space.
    let mut dest_coords = hashbrown::HashSet::new();
    for tile in src.tiles() {
        if !tile.rect().outset(reach).intersects(&src_area) {
            continue;
        }
        let Some(footprint) = src_to_dest
            .transform_rect(&tile.rect().outset(reach))
            .and_then(|rect| rect.intersect(&clip))
        else {
            continue;
        };
        dest_coords.extend(TileCoord::covering(footprint));
    }
    if dest_coords.is_empty() {
        return Ok(None);
    }
    let mut dest_coords: Vec<_> = dest_coords.into_iter().collect();
    dest_coords.sort_unstable();
    log::debug!(
        "compositing {} onto {} dest tiles, mip level {level} (residual {residual})",
        src.id(),
        dest_coords.len()
    );

    let mut sampler = Sampler::new(src, level, filter);
    let mut dirty: Option<Rect> = None;
    for coord in dest_coords {
        let Some(region) = coord.rect().intersect(&clip) else {
            continue;
        };
        let tile = dest.write_tile(coord.x(), coord.y())?;
        for (x, y) in region.pixels() {
            #[allow(clippy::cast_precision_loss)]
            let center = [x as f32 + 0.5, y as f32 + 0.5];
            let src_px = sampler.sample(dest_to_src.transform_point(center), exact);
            if src_px[3] <= 0.0 {
                continue;
            }
            let (lx, ly) = crate::store::local(coord, x, y);
            let dst_px = tile.pixel_at(lx, ly);
            tile.set_pixel_at(lx, ly, blend.apply(src_px, dst_px));
        }
        dirty = Some(dirty.map_or(region, |dirty| dirty.union(&region)));
    }
    Ok(dirty)
}
