//! # Layers
//!
//! A layer is a tile store placed into the document by a transform and mixed with what lies below
//! by a [`Blend`].

use crate::blend::Blend;
use crate::composite::{CompositeError, ResampleFilter};
use crate::pixel::PixelFormat;
use crate::store::{ImportError, TileStore};
use crate::surface::PlainSurface;
use crate::tile::AllocError;
use crate::transform::{Matrix, TransformError};
use crate::util::Rect;

pub type LayerID = crate::FuzzID<Layer>;

/// Everything about a layer except its pixels.
#[derive(Clone, PartialEq, Debug)]
pub struct LayerProperties {
    pub name: String,
    pub blend: Blend,
    pub visible: bool,
    /// Layer pixels to document space.
    pub matrix: Matrix,
}
impl Default for LayerProperties {
    fn default() -> Self {
        Self {
            name: String::new(),
            blend: Blend::default(),
            visible: true,
            matrix: Matrix::IDENTITY,
        }
    }
}

pub struct Layer {
    id: LayerID,
    name: String,
    store: TileStore,
    /// Layer pixels to document space.
    matrix: Matrix,
    /// Always the inverse of `matrix`.
    inverse: Matrix,
    blend: Blend,
    visible: bool,
}
impl std::fmt::Debug for Layer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Layer")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("store", &self.store)
            .field("blend", &self.blend)
            .field("visible", &self.visible)
            .finish_non_exhaustive()
    }
}
impl Layer {
    /// An empty, visible, untransformed layer.
    #[must_use]
    pub fn new(name: impl Into<String>, format: PixelFormat) -> Self {
        Self {
            id: LayerID::default(),
            name: name.into(),
            store: TileStore::new(format),
            matrix: Matrix::IDENTITY,
            inverse: Matrix::IDENTITY,
            blend: Blend::default(),
            visible: true,
        }
    }
    /// Create a layer holding a copy of the given pixel buffer, with its top-left at `(x, y)`.
    /// See [`TileStore::import`].
    /// # Errors
    /// If the buffer is malformed, or tiles could not be allocated.
    #[allow(clippy::too_many_arguments)]
    pub fn from_buffer(
        name: impl Into<String>,
        store_format: PixelFormat,
        buffer_format: PixelFormat,
        bytes: &[u8],
        stride: usize,
        x: i32,
        y: i32,
        width: u32,
        height: u32,
    ) -> Result<Self, ImportError> {
        let mut layer = Self::new(name, store_format);
        layer
            .store
            .import(buffer_format, bytes, stride, x, y, width, height)?;
        log::debug!(
            "{} imported {width}x{height}, {} tiles",
            layer.id,
            layer.store.len()
        );
        Ok(layer)
    }
    #[must_use]
    pub fn id(&self) -> LayerID {
        self.id
    }
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }
    #[must_use]
    pub fn store(&self) -> &TileStore {
        &self.store
    }
    /// Direct access to the pixels. Changes made this way are not recorded, see
    /// [`Document::edit_pixels`](crate::document::Document::edit_pixels) for that.
    pub fn store_mut(&mut self) -> &mut TileStore {
        &mut self.store
    }
    #[must_use]
    pub fn matrix(&self) -> &Matrix {
        &self.matrix
    }
    #[must_use]
    pub fn inverse(&self) -> &Matrix {
        &self.inverse
    }
    /// # Errors
    /// If the matrix is not invertible. The layer is left unchanged.
    pub fn set_matrix(&mut self, matrix: Matrix) -> Result<(), TransformError> {
        self.inverse = matrix.invert()?;
        self.matrix = matrix;
        Ok(())
    }
    #[must_use]
    pub fn blend(&self) -> Blend {
        self.blend
    }
    /// Set the blend. Opacity is clamped into `[0, 1]`.
    pub fn set_blend(&mut self, blend: Blend) {
        self.blend = Blend {
            opacity: blend.clamped_opacity(),
            ..blend
        };
    }
    #[must_use]
    pub fn opacity(&self) -> f32 {
        self.blend.opacity
    }
    pub fn set_opacity(&mut self, opacity: f32) {
        self.set_blend(Blend {
            opacity,
            ..self.blend
        });
    }
    #[must_use]
    pub fn visible(&self) -> bool {
        self.visible
    }
    pub fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }
    #[must_use]
    pub fn properties(&self) -> LayerProperties {
        LayerProperties {
            name: self.name.clone(),
            blend: self.blend,
            visible: self.visible,
            matrix: self.matrix,
        }
    }
    /// # Errors
    /// If the matrix is not invertible. The layer is left unchanged.
    pub fn set_properties(&mut self, properties: LayerProperties) -> Result<(), TransformError> {
        self.set_matrix(properties.matrix)?;
        self.name = properties.name;
        self.set_blend(properties.blend);
        self.visible = properties.visible;
        Ok(())
    }
    /// Blend this layer onto `dest`, within `clip`.
    ///
    /// `view` maps destination pixels into document space. Visibility is not considered here.
    /// Returns the destination area that may have changed.
    /// # Errors
    /// If the view is not invertible, or destination tiles could not be allocated.
    pub fn composite_into(
        &self,
        dest: &mut TileStore,
        clip: Rect,
        view: &Matrix,
        filter: ResampleFilter,
    ) -> Result<Option<Rect>, CompositeError> {
        let layer_to_dest = self.matrix.then(&view.invert()?);
        crate::composite::composite(&self.store, &layer_to_dest, self.blend, filter, dest, clip)
    }
    /// Copy the layer's pixels, in its own space, out into a buffer.
    ///
    /// With no area given, the bounding box of the content is used. None if that is empty.
    /// # Errors
    /// If the buffer could not be allocated.
    pub fn rasterize(&self, area: Option<Rect>) -> Result<Option<(Rect, PlainSurface)>, AllocError> {
        let Some(area) = area.or_else(|| self.store.bounding_box()) else {
            return Ok(None);
        };
        Ok(Some((area, self.store.export(area)?)))
    }
    /// Merge `src` into this layer's pixels, as they would look stacked with `src` on top.
    ///
    /// This layer's opacity is baked into its pixels first, then `src` is composited with its own
    /// blend and transform, and finally this layer's opacity becomes 1.
    /// Returns the area of this layer's pixels that may have changed.
    /// # Errors
    /// On allocation failure, or if either transform is unusable. The layer may be partially
    /// modified, so callers wanting atomicity should snapshot first.
    pub fn merge_from(
        &mut self,
        src: &Layer,
        filter: ResampleFilter,
    ) -> Result<Option<Rect>, CompositeError> {
        let mut dirty = None;
        if self.blend.opacity < 1.0 {
            self.store.multiply_opacity(self.blend.opacity)?;
            dirty = self.store.bounding_box();
        }
        let src_to_self = src.matrix.then(&self.inverse);
        let reach = src
            .store
            .bounding_box()
            .and_then(|bounds| src_to_self.transform_rect(&bounds))
            .map(|rect| rect.outset(1));
        if let Some(clip) = reach {
            let merged =
                crate::composite::composite(&src.store, &src_to_self, src.blend, filter, &mut self.store, clip)?;
            dirty = crate::util::union_all(dirty.into_iter().chain(merged));
        }
        self.blend.opacity = 1.0;
        Ok(dirty)
    }
}
