//! # Documents
//!
//! An ordered stack of [`Layer`]s, index 0 at the bottom, plus an optional background. There is
//! always at least one layer.
//!
//! Every modifying operation returns the [`Command`] describing it, which can be handed to a
//! [`CommandHistory`](crate::history::CommandHistory). Layers removed by a command are kept
//! detached rather than dropped, so undoing can put them back.

use crate::blend::BlendMode;
use crate::color::Color;
use crate::commands::{apply_all, Command, CommandConsumer, CommandError, DoUndo};
use crate::composite::{CompositeError, ResampleFilter};
use crate::config::CanvasConfig;
use crate::layer::{Layer, LayerID, LayerProperties};
use crate::pixel::{PixelFormat, Premul};
use crate::snapshot::Snapshot;
use crate::store::{ImportError, TileStore};
use crate::surface::{PlainSurface, Surface};
use crate::tile::{AllocError, TileCoord};
use crate::transform::{Matrix, TransformError};
use crate::util::Rect;

pub type DocumentID = crate::FuzzID<Document>;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum DocumentError {
    #[error("a document must keep at least one layer")]
    LastLayer,
    #[error("{0} is not in the document")]
    UnknownLayer(LayerID),
    #[error("index {index} out of range for {len} layers")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("no layer below {0} to merge into")]
    NoLayerBelow(LayerID),
    #[error(transparent)]
    Transform(#[from] TransformError),
    #[error(transparent)]
    Command(#[from] CommandError),
    #[error(transparent)]
    Composite(#[from] CompositeError),
    #[error(transparent)]
    Import(#[from] ImportError),
    #[error(transparent)]
    Alloc(#[from] AllocError),
}
impl DocumentError {
    /// True if the failure was due to running out of resources, as opposed to an invalid request.
    #[must_use]
    pub fn is_exhaustion(&self) -> bool {
        match self {
            Self::Alloc(_) | Self::Import(ImportError::Alloc(_)) => true,
            Self::Command(err) => err.is_exhaustion(),
            Self::Composite(err) => err.is_exhaustion(),
            _ => false,
        }
    }
}

/// What shows through where no layer covers the canvas.
#[derive(Clone, PartialEq, Debug)]
pub enum Background {
    Solid(Color),
    /// Repeated infinitely, with its top-left at the destination origin.
    Pattern(PlainSurface),
}
impl Background {
    fn pixel(&self, x: i32, y: i32) -> Premul {
        match self {
            Self::Solid(color) => color.as_array(),
            Self::Pattern(pattern) => {
                let (Ok(width), Ok(height)) = (
                    i32::try_from(pattern.width()),
                    i32::try_from(pattern.height()),
                ) else {
                    return [0.0; 4];
                };
                if width == 0 || height == 0 {
                    return [0.0; 4];
                }
                pattern.pixel(x.rem_euclid(width), y.rem_euclid(height))
            }
        }
    }
}

/// Which layers to draw, and how.
#[derive(Clone, Copy, Debug)]
pub struct RasterizeOptions<'a> {
    /// Only draw these layers. Order is always the document's.
    pub layers: Option<&'a [LayerID]>,
    /// Draw layers marked invisible too.
    pub include_hidden: bool,
    /// Draw the document background beneath the layers.
    pub paint_background: bool,
}
impl Default for RasterizeOptions<'_> {
    fn default() -> Self {
        Self {
            layers: None,
            include_hidden: false,
            paint_background: true,
        }
    }
}

pub struct Document {
    id: DocumentID,
    /// Name of the document, shown to the user.
    pub name: String,
    /// Bottom to top, never empty.
    layers: Vec<Layer>,
    /// Layers taken out by a command, kept for undo.
    detached: hashbrown::HashMap<LayerID, Layer>,
    active: usize,
    background: Option<Background>,
    format: PixelFormat,
    resample: ResampleFilter,
}
impl std::fmt::Debug for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Document")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("layers", &self.layers)
            .field("detached", &self.detached.len())
            .field("active", &self.active)
            .finish_non_exhaustive()
    }
}
impl Default for Document {
    fn default() -> Self {
        Self::new(&CanvasConfig::default())
    }
}
impl Document {
    /// A new document with one empty layer and no background.
    #[must_use]
    pub fn new(config: &CanvasConfig) -> Self {
        Self::with_layer(config, Layer::new("Layer 1", config.format))
    }
    /// A new document holding only the given layer.
    #[must_use]
    pub fn with_layer(config: &CanvasConfig, layer: Layer) -> Self {
        Self {
            id: DocumentID::default(),
            name: "New Document".into(),
            layers: vec![layer],
            detached: hashbrown::HashMap::new(),
            active: 0,
            background: None,
            format: config.format,
            resample: config.resample.filter(),
        }
    }
    #[must_use]
    pub fn id(&self) -> DocumentID {
        self.id
    }
    #[must_use]
    pub fn format(&self) -> PixelFormat {
        self.format
    }
    #[must_use]
    pub fn resample(&self) -> ResampleFilter {
        self.resample
    }
    pub fn set_resample(&mut self, filter: ResampleFilter) {
        self.resample = filter;
    }
    #[must_use]
    pub fn background(&self) -> Option<&Background> {
        self.background.as_ref()
    }
    pub fn set_background(&mut self, background: Option<Background>) {
        self.background = background;
    }
    /// A new empty layer in this document's pixel format. Not yet inserted.
    #[must_use]
    pub fn new_layer(&self, name: impl Into<String>) -> Layer {
        Layer::new(name, self.format)
    }
    /// Layers from bottom to top.
    #[must_use]
    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }
    #[must_use]
    pub fn len(&self) -> usize {
        self.layers.len()
    }
    /// Always false, a document has at least one layer.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
    #[must_use]
    pub fn position_of(&self, id: LayerID) -> Option<usize> {
        self.layers.iter().position(|layer| layer.id() == id)
    }
    #[must_use]
    pub fn layer(&self, id: LayerID) -> Option<&Layer> {
        self.layers.iter().find(|layer| layer.id() == id)
    }
    /// Mutable access to a layer. Changes made this way are not recorded.
    pub fn layer_mut(&mut self, id: LayerID) -> Option<&mut Layer> {
        self.layers.iter_mut().find(|layer| layer.id() == id)
    }
    #[must_use]
    pub fn active(&self) -> usize {
        self.active
    }
    #[must_use]
    pub fn active_layer(&self) -> &Layer {
        // Active is kept in range by every structural change.
        &self.layers[self.active]
    }
    /// # Errors
    /// If the index is out of range.
    pub fn set_active(&mut self, index: usize) -> Result<(), DocumentError> {
        if index >= self.layers.len() {
            return Err(DocumentError::IndexOutOfRange {
                index,
                len: self.layers.len(),
            });
        }
        self.active = index;
        Ok(())
    }
    /// Layers detached by removals that may still be undone.
    #[must_use]
    pub fn detached_len(&self) -> usize {
        self.detached.len()
    }
    /// Drop detached layers no longer referenced, e.g. after history was trimmed or flushed.
    /// Returns the number dropped.
    pub fn purge_detached(&mut self, keep: &hashbrown::HashSet<LayerID>) -> usize {
        let before = self.detached.len();
        self.detached.retain(|id, _| keep.contains(id));
        before - self.detached.len()
    }

    fn attach(&mut self, index: usize, layer: Layer) {
        self.layers.insert(index, layer);
        if self.layers.len() > 1 && self.active >= index {
            self.active += 1;
        }
    }
    /// Caller ensures there is more than one layer and the index is in range.
    fn detach(&mut self, index: usize) {
        let layer = self.layers.remove(index);
        if self.active > index || self.active >= self.layers.len() {
            self.active = self.active.saturating_sub(1);
        }
        self.detached.insert(layer.id(), layer);
    }

    /// Insert a layer so that it ends up at `index`.
    /// # Errors
    /// If `index` is past the top of the stack.
    pub fn insert_layer(&mut self, index: usize, layer: Layer) -> Result<Command, DocumentError> {
        let len = self.layers.len();
        if index > len {
            return Err(DocumentError::IndexOutOfRange { index, len });
        }
        let target = layer.id();
        log::debug!("inserting {target} at {index}");
        self.attach(index, layer);
        Ok(Command::LayerInserted { target, index })
    }
    /// Insert a layer on top of all others.
    pub fn push_layer(&mut self, layer: Layer) -> Command {
        let target = layer.id();
        let index = self.layers.len();
        self.attach(index, layer);
        Command::LayerInserted { target, index }
    }
    /// # Errors
    /// If the layer is not found, or is the only one left.
    pub fn remove_layer(&mut self, id: LayerID) -> Result<Command, DocumentError> {
        let index = self
            .position_of(id)
            .ok_or(DocumentError::UnknownLayer(id))?;
        if self.layers.len() == 1 {
            log::warn!("refusing to remove {id}, the last layer");
            return Err(DocumentError::LastLayer);
        }
        self.detach(index);
        Ok(Command::LayerRemoved { target: id, index })
    }
    /// Move a layer so that it ends up at index `to`.
    /// # Errors
    /// If the layer is not found or `to` is out of range.
    pub fn move_layer(&mut self, id: LayerID, to: usize) -> Result<Command, DocumentError> {
        let from = self
            .position_of(id)
            .ok_or(DocumentError::UnknownLayer(id))?;
        let len = self.layers.len();
        if to >= len {
            return Err(DocumentError::IndexOutOfRange { index: to, len });
        }
        if from == to {
            return Err(CommandError::NoOp.into());
        }
        self.shift(from, to);
        Ok(Command::LayerMoved {
            target: id,
            from,
            to,
        })
    }
    /// Move the layer at `from` to `to`, keeping the active layer the same.
    fn shift(&mut self, from: usize, to: usize) {
        let active = self.layers[self.active].id();
        let layer = self.layers.remove(from);
        self.layers.insert(to, layer);
        self.active = self.position_of(active).unwrap_or(0);
    }
    /// # Errors
    /// If the layer is not found, the new matrix is not invertible, or nothing would change.
    pub fn set_layer_properties(
        &mut self,
        id: LayerID,
        properties: LayerProperties,
    ) -> Result<Command, DocumentError> {
        let layer = self.layer_mut(id).ok_or(DocumentError::UnknownLayer(id))?;
        let from = layer.properties();
        layer.set_properties(properties)?;
        // Read back, opacity may have been clamped.
        let to = layer.properties();
        if from == to {
            return Err(CommandError::NoOp.into());
        }
        Ok(Command::Properties {
            target: id,
            from: Box::new(from),
            to: Box::new(to),
        })
    }
    /// Modify a layer's pixels through `edit`, recording the change.
    ///
    /// Returns the command recording the change, or None if nothing changed. Fully transparent
    /// tiles are released afterwards. If `edit` fails, the layer is restored and the error returned.
    /// # Errors
    /// If the layer is not found, or `edit` fails.
    pub fn edit_pixels<E>(
        &mut self,
        id: LayerID,
        edit: impl FnOnce(&mut TileStore) -> Result<(), E>,
    ) -> Result<Option<Command>, DocumentError>
    where
        DocumentError: From<E>,
    {
        let layer = self.layer_mut(id).ok_or(DocumentError::UnknownLayer(id))?;
        let store = layer.store_mut();
        let mut snapshot = Snapshot::capture(store);
        if let Err(err) = edit(&mut *store) {
            log::debug!("edit of {id} failed, restoring");
            snapshot.cancel(store)?;
            return Err(err.into());
        }
        store.cleanup();
        if !snapshot.reduce(store)? {
            return Ok(None);
        }
        Ok(Some(Command::Pixels {
            target: id,
            snapshots: smallvec::smallvec![snapshot],
        }))
    }
    /// Erase all content of a layer.
    /// # Errors
    /// If the layer is not found.
    pub fn clear_layer(&mut self, id: LayerID) -> Result<Option<Command>, DocumentError> {
        self.edit_pixels(id, |store| {
            store.clear();
            Ok::<_, DocumentError>(())
        })
    }
    /// Merge a layer into the one below it, and remove it.
    ///
    /// The lower layer's opacity is baked into its pixels and reset to 1.
    /// # Errors
    /// If the layer is not found or is the bottom-most.
    pub fn merge_down(&mut self, id: LayerID) -> Result<Command, DocumentError> {
        let index = self
            .position_of(id)
            .ok_or(DocumentError::UnknownLayer(id))?;
        if index == 0 {
            return Err(DocumentError::NoLayerBelow(id));
        }
        let filter = self.resample;
        let (below, above) = self.layers.split_at_mut(index);
        let (lower, upper) = (&mut below[index - 1], &above[0]);

        let lower_id = lower.id();
        let from = lower.properties();
        let mut snapshot = Snapshot::capture(lower.store());
        if let Err(err) = lower.merge_from(upper, filter) {
            snapshot.cancel(lower.store_mut())?;
            lower.set_blend(from.blend);
            return Err(err.into());
        }
        lower.store_mut().cleanup();
        let changed = snapshot.reduce(lower.store_mut())?;
        let to = lower.properties();
        log::debug!("merged {id} down into {lower_id}");

        let mut commands = Vec::with_capacity(3);
        if changed {
            commands.push(Command::Pixels {
                target: lower_id,
                snapshots: smallvec::smallvec![snapshot],
            });
        }
        if from != to {
            commands.push(Command::Properties {
                target: lower_id,
                from: Box::new(from),
                to: Box::new(to),
            });
        }
        self.detach(index);
        commands.push(Command::LayerRemoved { target: id, index });
        Ok(Command::Scope(commands.into_boxed_slice()))
    }
    /// Draw the document onto `dest` within `clip`.
    ///
    /// `view` maps destination pixels into document space. Layers are drawn bottom to top, then
    /// the background, if any and requested, is drawn beneath everything.
    /// Returns the destination area that may have changed.
    /// # Errors
    /// If the view is not invertible, or destination tiles could not be allocated.
    pub fn rasterize(
        &self,
        dest: &mut TileStore,
        clip: Rect,
        view: &Matrix,
        options: &RasterizeOptions<'_>,
    ) -> Result<Option<Rect>, DocumentError> {
        let mut dirty = None;
        for layer in &self.layers {
            if !(layer.visible() || options.include_hidden) {
                continue;
            }
            if options
                .layers
                .is_some_and(|subset| !subset.contains(&layer.id()))
            {
                continue;
            }
            let changed = layer.composite_into(dest, clip, view, self.resample)?;
            dirty = crate::util::union_all(dirty.into_iter().chain(changed));
        }
        if let Some(background) = self.background.as_ref().filter(|_| options.paint_background) {
            paint_beneath(dest, clip, background)?;
            dirty = crate::util::union_all(dirty.into_iter().chain([clip]));
        }
        Ok(dirty)
    }
    /// Render an area of the document, in document space, to a new buffer in the document's format.
    /// # Errors
    /// If the buffer could not be allocated.
    pub fn render(
        &self,
        area: Rect,
        options: &RasterizeOptions<'_>,
    ) -> Result<PlainSurface, DocumentError> {
        let mut dest = TileStore::new(self.format);
        let view = Matrix::translation(
            az::cast(area.left),
            az::cast(area.top),
        );
        let clip = Rect::from_xywh(0, 0, area.width(), area.height());
        self.rasterize(&mut dest, clip, &view, options)?;
        Ok(dest.export(clip)?)
    }
}

/// Draw the background under everything in `clip`.
fn paint_beneath(dest: &mut TileStore, clip: Rect, background: &Background) -> Result<(), AllocError> {
    for coord in TileCoord::covering(clip) {
        let Some(region) = coord.rect().intersect(&clip) else {
            continue;
        };
        let tile = dest.write_tile(coord.x(), coord.y())?;
        for (x, y) in region.pixels() {
            let (lx, ly) = crate::store::local(coord, x, y);
            let above = tile.pixel_at(lx, ly);
            tile.set_pixel_at(lx, ly, BlendMode::Normal.apply(above, background.pixel(x, y)));
        }
    }
    Ok(())
}

impl CommandConsumer<Command> for Document {
    fn apply(&mut self, command: DoUndo<'_, Command>) -> Result<(), CommandError> {
        // Insertion and removal are mirror images.
        let (attaching, target, index) = match command {
            DoUndo::Do(Command::Pixels { target, snapshots })
            | DoUndo::Undo(Command::Pixels { target, snapshots }) => {
                let layer = self
                    .layer_mut(*target)
                    .ok_or(CommandError::UnknownResource)?;
                return apply_all::<Snapshot, _>(layer.store_mut(), command.direction(), snapshots);
            }
            DoUndo::Do(Command::Properties { target, from, to })
            | DoUndo::Undo(Command::Properties {
                target,
                from: to,
                to: from,
            }) => {
                let layer = self
                    .layer_mut(*target)
                    .ok_or(CommandError::UnknownResource)?;
                if layer.properties() != **from {
                    return Err(CommandError::MismatchedState);
                }
                layer
                    .set_properties((**to).clone())
                    .map_err(|_| CommandError::MismatchedState)?;
                return Ok(());
            }
            DoUndo::Do(Command::LayerMoved { target, from, to })
            | DoUndo::Undo(Command::LayerMoved {
                target,
                from: to,
                to: from,
            }) => {
                if self.layers.get(*from).map(Layer::id) != Some(*target) || *to >= self.layers.len()
                {
                    return Err(CommandError::MismatchedState);
                }
                self.shift(*from, *to);
                return Ok(());
            }
            DoUndo::Do(Command::Scope(commands)) | DoUndo::Undo(Command::Scope(commands)) => {
                return apply_all::<Command, _>(self, command.direction(), commands);
            }
            DoUndo::Do(Command::LayerInserted { target, index })
            | DoUndo::Undo(Command::LayerRemoved { target, index }) => (true, *target, *index),
            DoUndo::Undo(Command::LayerInserted { target, index })
            | DoUndo::Do(Command::LayerRemoved { target, index }) => (false, *target, *index),
        };
        if attaching {
            if index > self.layers.len() {
                return Err(CommandError::MismatchedState);
            }
            let layer = self
                .detached
                .remove(&target)
                .ok_or(CommandError::UnknownResource)?;
            self.attach(index, layer);
        } else {
            if self.layers.get(index).map(Layer::id) != Some(target) || self.layers.len() == 1 {
                return Err(CommandError::MismatchedState);
            }
            self.detach(index);
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::{Background, Document, DocumentError, RasterizeOptions};
    use crate::blend::{Blend, BlendMode};
    use crate::color::Color;
    use crate::commands::{Command, CommandConsumer, CommandError, DoUndo};
    use crate::layer::LayerProperties;
    use crate::pixel::PixelFormat;
    use crate::store::TileStore;
    use crate::surface::PlainSurface;
    use crate::tile::AllocError;
    use crate::transform::Matrix;
    use crate::util::Rect;

    fn red() -> Color {
        Color::opaque_rgb8(255, 0, 0)
    }
    fn blue() -> Color {
        Color::opaque_rgb8(0, 0, 255)
    }
    fn fill(document: &mut Document, index: usize, rect: Rect, color: Color) -> Option<Command> {
        let id = document.layers()[index].id();
        document
            .edit_pixels(id, |store| store.fill_rect(rect, color, BlendMode::Normal))
            .unwrap()
    }
    fn undo(document: &mut Document, command: &Command) -> Result<(), CommandError> {
        document.apply(DoUndo::Undo(command))
    }
    fn redo(document: &mut Document, command: &Command) -> Result<(), CommandError> {
        document.apply(DoUndo::Do(command))
    }

    /// Opaque red beneath half-transparent blue, both covering 10x10 at the origin.
    fn red_blue() -> Document {
        let mut document = Document::default();
        let area = Rect::from_xywh(0, 0, 10, 10);
        fill(&mut document, 0, area, red());
        let mut top = document.new_layer("blue");
        top.set_opacity(0.5);
        document.push_layer(top);
        fill(&mut document, 1, area, blue());
        document
    }

    #[test]
    fn half_blue_over_red() {
        let _ = env_logger::builder().is_test(true).try_init();
        let document = red_blue();
        let out = document
            .render(Rect::from_xywh(0, 0, 10, 10), &RasterizeOptions::default())
            .unwrap();
        assert_eq!(&out.bytes()[..4], &[128, 0, 128, 255]);
        assert_eq!(&out.bytes()[out.bytes().len() - 4..], &[128, 0, 128, 255]);
    }
    #[test]
    fn hidden_and_subset() {
        let mut document = red_blue();
        let top = document.layers()[1].id();
        document.layer_mut(top).unwrap().set_visible(false);
        let area = Rect::from_xywh(0, 0, 1, 1);
        let out = document.render(area, &RasterizeOptions::default()).unwrap();
        assert_eq!(out.bytes(), [255, 0, 0, 255]);

        let subset = [top];
        let options = RasterizeOptions {
            layers: Some(&subset),
            include_hidden: true,
            ..RasterizeOptions::default()
        };
        let out = document.render(area, &options).unwrap();
        assert_eq!(out.bytes(), [0, 0, 128, 128]);
    }
    #[test]
    fn background_goes_beneath() {
        let mut document = Document::default();
        fill(&mut document, 0, Rect::from_xywh(0, 0, 1, 1), red().with_opacity(0.5));
        document.set_background(Some(Background::Solid(Color::WHITE)));
        let out = document
            .render(Rect::from_xywh(0, 0, 2, 1), &RasterizeOptions::default())
            .unwrap();
        // Half red over white, then plain white.
        assert_eq!(out.bytes(), [255, 127, 127, 255, 255, 255, 255, 255]);

        let options = RasterizeOptions {
            paint_background: false,
            ..RasterizeOptions::default()
        };
        let out = document.render(Rect::from_xywh(1, 0, 1, 1), &options).unwrap();
        assert_eq!(out.bytes(), [0; 4]);
    }
    #[test]
    fn pattern_background_repeats() {
        let mut pattern = PlainSurface::new(PixelFormat::Rgba8Premultiplied, 2, 1).unwrap();
        pattern.set_pixel(0, 0, [1.0; 4]);
        let mut document = Document::default();
        document.set_background(Some(Background::Pattern(pattern)));
        let out = document
            .render(Rect::from_xywh(-1, 0, 3, 1), &RasterizeOptions::default())
            .unwrap();
        // Anchored to the destination, not the document.
        assert_eq!(out.bytes(), [[255; 4], [0; 4], [255; 4]].concat());
    }
    #[test]
    fn transformed_view() {
        let document = red_blue();
        let mut dest = TileStore::default();
        // Destination pixels are half-size document pixels, so the 10x10 square covers 20x20.
        let dirty = document
            .rasterize(
                &mut dest,
                Rect::from_xywh(0, 0, 64, 64),
                &Matrix::scale(0.5),
                &RasterizeOptions::default(),
            )
            .unwrap();
        assert!(dirty.is_some());
        assert_eq!(dest.pixel(10, 10), dest.pixel(1, 1));
        assert_eq!(dest.pixel(25, 25), Color::TRANSPARENT);
    }
    #[test]
    fn last_layer_stays() {
        let mut document = Document::default();
        let only = document.layers()[0].id();
        assert_eq!(document.remove_layer(only).unwrap_err(), DocumentError::LastLayer);
        assert_eq!(document.len(), 1);
    }
    #[test]
    fn structural_undo() {
        let mut document = Document::default();
        let bottom = document.layers()[0].id();
        let inserted = document.push_layer(document.new_layer("top"));
        let top = document.layers()[1].id();
        document.set_active(1).unwrap();

        let removed = document.remove_layer(bottom).unwrap();
        assert_eq!(document.len(), 1);
        assert_eq!(document.active_layer().id(), top);
        assert_eq!(document.detached_len(), 1);

        undo(&mut document, &removed).unwrap();
        assert_eq!(document.layers()[0].id(), bottom);
        assert_eq!(document.active_layer().id(), top);
        // Can't redo the insert, it's already there.
        assert_eq!(redo(&mut document, &inserted), Err(CommandError::UnknownResource));

        let moved = document.move_layer(top, 0).unwrap();
        assert_eq!(document.layers()[0].id(), top);
        undo(&mut document, &moved).unwrap();
        assert_eq!(document.layers()[1].id(), top);

        undo(&mut document, &inserted).unwrap();
        assert_eq!(document.len(), 1);
        assert_eq!(document.active(), 0);
        redo(&mut document, &inserted).unwrap();
        assert_eq!(document.layers()[1].id(), top);
    }
    #[test]
    fn properties_undo() {
        let mut document = Document::default();
        let id = document.layers()[0].id();
        let props = LayerProperties {
            name: "renamed".into(),
            blend: Blend {
                opacity: 3.0,
                ..Blend::default()
            },
            ..document.layers()[0].properties()
        };
        let command = document.set_layer_properties(id, props.clone()).unwrap();
        assert_eq!(document.layers()[0].name(), "renamed");
        // Clamped.
        assert_eq!(document.layers()[0].opacity(), 1.0);
        assert_eq!(
            document
                .set_layer_properties(id, document.layers()[0].properties())
                .unwrap_err(),
            DocumentError::Command(CommandError::NoOp)
        );
        undo(&mut document, &command).unwrap();
        assert_eq!(document.layers()[0].name(), "Layer 1");
        assert_eq!(undo(&mut document, &command), Err(CommandError::MismatchedState));
    }
    #[test]
    fn pixels_undo() {
        let mut document = Document::default();
        let command = fill(&mut document, 0, Rect::from_xywh(0, 0, 3, 3), red()).unwrap();
        let store = document.layers()[0].store();
        assert_eq!(store.pixel(2, 2), red());
        undo(&mut document, &command).unwrap();
        assert!(document.layers()[0].store().is_empty());
        redo(&mut document, &command).unwrap();
        assert_eq!(document.layers()[0].store().pixel(2, 2), red());
    }
    #[test]
    fn failed_edit_restores() {
        let mut document = Document::default();
        fill(&mut document, 0, Rect::from_xywh(0, 0, 3, 3), red());
        let id = document.layers()[0].id();
        let result = document.edit_pixels(id, |store| {
            store.fill_rect(Rect::from_xywh(0, 0, 100, 100), blue(), BlendMode::Normal)?;
            Err(AllocError { bytes: 42 })
        });
        assert!(result.as_ref().unwrap_err().is_exhaustion());
        let store = document.layers()[0].store();
        assert_eq!(store.pixel(0, 0), red());
        assert_eq!(store.pixel(50, 50), Color::TRANSPARENT);
    }
    #[test]
    fn noop_edit_records_nothing() {
        let mut document = Document::default();
        let id = document.layers()[0].id();
        assert!(document
            .edit_pixels(id, |_| Ok::<_, AllocError>(()))
            .unwrap()
            .is_none());
        assert!(document.clear_layer(id).unwrap().is_none());
    }
    #[test]
    fn merge_down_and_undo() {
        let mut document = red_blue();
        let (lower, upper) = (document.layers()[0].id(), document.layers()[1].id());
        document.layer_mut(lower).unwrap().set_opacity(0.5);
        let area = Rect::from_xywh(0, 0, 1, 1);
        let before = document.render(area, &RasterizeOptions::default()).unwrap();

        let command = document.merge_down(upper).unwrap();
        assert_eq!(document.len(), 1);
        assert_eq!(document.layers()[0].opacity(), 1.0);
        let merged = document.render(area, &RasterizeOptions::default()).unwrap();
        // Same look, flattened.
        for (a, b) in before.bytes().iter().zip(merged.bytes()) {
            assert!(a.abs_diff(*b) <= 1, "{before:?} vs {merged:?}");
        }

        undo(&mut document, &command).unwrap();
        assert_eq!(document.len(), 2);
        assert_eq!(document.layers()[1].id(), upper);
        assert_eq!(document.layers()[0].opacity(), 0.5);
        assert_eq!(document.layers()[0].store().pixel(0, 0), red());
        redo(&mut document, &command).unwrap();
        assert_eq!(document.len(), 1);

        assert_eq!(
            document.merge_down(lower).unwrap_err(),
            DocumentError::NoLayerBelow(lower)
        );
    }
    #[test]
    fn scope_rolls_back() {
        let mut document = Document::default();
        let inserted = document.push_layer(document.new_layer("top"));
        let top = document.layers()[1].id();
        document.remove_layer(top).unwrap();
        // The first insert succeeds, the second finds nothing left to insert and the first is undone.
        let scope = Command::Scope(Box::new([
            Command::LayerInserted {
                target: top,
                index: 1,
            },
            inserted,
        ]));
        assert_eq!(redo(&mut document, &scope), Err(CommandError::UnknownResource));
        assert_eq!(document.len(), 1);
        assert_eq!(document.detached_len(), 1);
    }
}
