//! # Snapshots
//!
//! A snapshot records what a [`TileStore`] looked like before an operation, cheaply. Capturing
//! copies only tile references and flags each tile read-only, so the store's
//! [`write_tile`](TileStore::write_tile) clones instead of overwriting. Once the operation is
//! done, [`Snapshot::reduce`] diffs against the store and keeps only the tiles that changed,
//! both before and after. That pair is enough to flip the store back and forth for undo and redo.

use std::sync::Arc;

use crate::commands::{CommandConsumer, CommandError, Direction, DoUndo};
use crate::store::{StoreGeneration, StoreID, TileStore};
use crate::tile::{Tile, TileCoord};
use crate::util::Rect;

/// The area that may have changed due to an operation.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum DirtyArea {
    /// Unknown, assume anything could have changed.
    Everything,
    /// Nothing changed.
    Nothing,
    /// Every changed pixel lies within this rect.
    Rect(Rect),
}
impl DirtyArea {
    #[must_use]
    pub fn rect(&self) -> Option<Rect> {
        match self {
            Self::Rect(rect) => Some(*rect),
            _ => None,
        }
    }
}

/// Store state recorded by a finished snapshot.
#[derive(Copy, Clone, Debug)]
struct Reduced {
    /// Generation of the store after the operation.
    after: StoreGeneration,
    dirty: DirtyArea,
}

pub struct Snapshot {
    store: StoreID,
    /// Generation of the store at capture.
    before: StoreGeneration,
    /// Tiles as they were. After reduction, only those that changed.
    base: hashbrown::HashMap<TileCoord, Arc<Tile>>,
    /// Tiles as they are after the operation, for keys that changed.
    modified: hashbrown::HashMap<TileCoord, Arc<Tile>>,
    /// Keys that held tiles before the operation and none after.
    removed: hashbrown::HashSet<TileCoord>,
    /// None while the operation is still in progress.
    reduced: Option<Reduced>,
}
impl std::fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Snapshot")
            .field("store", &self.store)
            .field("base", &self.base.len())
            .field("modified", &self.modified.len())
            .field("removed", &self.removed.len())
            .field("dirty", &self.dirty_area())
            .finish()
    }
}
impl Snapshot {
    /// Record the current state of `store`. Every tile becomes read-only, and no pixels are copied.
    #[must_use]
    pub fn capture(store: &TileStore) -> Self {
        let base: hashbrown::HashMap<_, _> = store
            .tile_map()
            .iter()
            .map(|(coord, tile)| {
                tile.mark_read_only();
                (*coord, tile.clone())
            })
            .collect();
        log::trace!("captured {} tiles of {}", base.len(), store.id());
        Self {
            store: store.id(),
            before: store.generation(),
            base,
            modified: hashbrown::HashMap::new(),
            removed: hashbrown::HashSet::new(),
            reduced: None,
        }
    }
    #[must_use]
    pub fn store(&self) -> StoreID {
        self.store
    }
    #[must_use]
    pub fn is_reduced(&self) -> bool {
        self.reduced.is_some()
    }
    /// The area changed by the operation. Until reduced, that's [`DirtyArea::Everything`].
    #[must_use]
    pub fn dirty_area(&self) -> DirtyArea {
        self.reduced
            .map_or(DirtyArea::Everything, |reduced| reduced.dirty)
    }
    /// Finish the snapshot, now that the operation has completed. Keeps only what changed.
    ///
    /// Returns whether anything changed at all. If not, the snapshot is useless and may be dropped.
    /// If something did change, the store takes on a new generation, which orders this snapshot
    /// relative to any others taken of the same store.
    /// # Errors
    /// * [`CommandError::InvalidTransition`] if already reduced.
    /// * [`CommandError::MismatchedState`] if `store` is not the one captured.
    pub fn reduce(&mut self, store: &mut TileStore) -> Result<bool, CommandError> {
        if self.reduced.is_some() {
            log::warn!("snapshot of {} reduced twice", self.store);
            return Err(CommandError::InvalidTransition("snapshot already reduced"));
        }
        if store.id() != self.store {
            log::error!("snapshot of {} reduced against {}", self.store, store.id());
            return Err(CommandError::MismatchedState);
        }
        for (coord, tile) in store.tile_map() {
            let unchanged = tile.is_read_only()
                && self
                    .base
                    .get(coord)
                    .is_some_and(|before| Arc::ptr_eq(before, tile));
            if !unchanged {
                // Now shared between us and the store.
                tile.mark_read_only();
                self.modified.insert(*coord, tile.clone());
            }
        }
        let store_tiles = store.tile_map();
        self.removed = self
            .base
            .keys()
            .filter(|coord| !store_tiles.contains_key(*coord))
            .copied()
            .collect();
        // Keep only the before-state of keys that changed.
        let (modified, removed) = (&self.modified, &self.removed);
        self.base
            .retain(|coord, _| modified.contains_key(coord) || removed.contains(coord));

        let changed = !self.modified.is_empty() || !self.removed.is_empty();
        let dirty = crate::util::union_all(
            self.modified
                .keys()
                .chain(self.removed.iter())
                .map(|coord| coord.rect()),
        )
        .map_or(DirtyArea::Nothing, DirtyArea::Rect);
        log::debug!(
            "reduced snapshot of {}: {} modified, {} removed, dirty {dirty:?}",
            self.store,
            self.modified.len(),
            self.removed.len(),
        );
        // Unchanged content keeps its identity, even across a clear of an already empty store.
        let after = if changed {
            StoreGeneration::default()
        } else {
            self.before
        };
        store.set_generation(after);
        self.reduced = Some(Reduced { after, dirty });
        Ok(changed)
    }
    /// Flip `store` to the state before (`Undo`) or after (`Redo`) the operation.
    ///
    /// The store must be the one captured and must currently be in the opposite state, as tracked
    /// by its generation. Otherwise the store is left untouched.
    /// # Errors
    /// * [`CommandError::InvalidTransition`] if not yet reduced.
    /// * [`CommandError::MismatchedState`] if the store is not in the expected state.
    pub fn apply(&self, store: &mut TileStore, direction: Direction) -> Result<(), CommandError> {
        let Some(reduced) = self.reduced else {
            log::warn!("snapshot of {} applied before reduction", self.store);
            return Err(CommandError::InvalidTransition("snapshot not yet reduced"));
        };
        let (expected, target) = match direction {
            Direction::Undo => (reduced.after, self.before),
            Direction::Redo => (self.before, reduced.after),
        };
        if store.id() != self.store || store.generation() != expected {
            log::error!(
                "{direction:?} of snapshot for {} ({expected}) onto {} ({})",
                self.store,
                store.id(),
                store.generation()
            );
            return Err(CommandError::MismatchedState);
        }
        match direction {
            Direction::Undo => {
                for coord in self.modified.keys() {
                    store.remove(*coord);
                }
                for tile in self.base.values() {
                    store.insert_shared(tile.clone());
                }
            }
            Direction::Redo => {
                for coord in &self.removed {
                    store.remove(*coord);
                }
                for tile in self.modified.values() {
                    store.insert_shared(tile.clone());
                }
            }
        }
        store.set_generation(target);
        log::debug!("{direction:?} snapshot of {}, dirty {:?}", self.store, reduced.dirty);
        Ok(())
    }
    /// Abandon an operation in progress, restoring the store to how it was at capture.
    /// # Errors
    /// As [`Self::reduce`].
    pub fn cancel(mut self, store: &mut TileStore) -> Result<(), CommandError> {
        self.reduce(store)?;
        self.apply(store, Direction::Undo)
    }
    /// Bytes of pixel memory kept alive by this snapshot. Tiles may be shared with the store, so
    /// this is an upper bound on what dropping the snapshot frees.
    #[must_use]
    pub fn memory_estimate(&self) -> usize {
        self.base
            .values()
            .chain(self.modified.values())
            .map(|tile| tile.byte_size())
            .sum()
    }
}

impl CommandConsumer<Snapshot> for TileStore {
    fn apply(&mut self, command: DoUndo<'_, Snapshot>) -> Result<(), CommandError> {
        command.inner().apply(self, command.direction())
    }
}

#[cfg(test)]
mod test {
    use super::{DirtyArea, Snapshot};
    use crate::blend::BlendMode;
    use crate::color::Color;
    use crate::commands::{CommandConsumer, CommandError, Direction, DoUndo};
    use crate::store::TileStore;
    use crate::util::Rect;
    use crate::TILE_SIZE;

    fn paint(store: &mut TileStore, rect: Rect, color: Color) {
        store.fill_rect(rect, color, BlendMode::Normal).unwrap();
    }
    fn red() -> Color {
        Color::opaque_rgb8(255, 0, 0)
    }

    #[test]
    fn cow_isolation() {
        let _ = env_logger::builder().is_test(true).try_init();
        let mut store = TileStore::default();
        paint(&mut store, Rect::from_xywh(0, 0, 4, 4), red());
        let mut snapshot = Snapshot::capture(&store);
        assert!(store.get(0, 0).unwrap().is_read_only());

        paint(&mut store, Rect::from_xywh(0, 0, 1, 1), Color::WHITE);
        assert!(!store.get(0, 0).unwrap().is_read_only());
        assert_eq!(store.pixel(0, 0), Color::WHITE);
        // The snapshot's copy is untouched.
        assert!(snapshot.reduce(&mut store).unwrap());
        snapshot.apply(&mut store, Direction::Undo).unwrap();
        assert_eq!(store.pixel(0, 0), red());
    }
    #[test]
    fn round_trip() {
        let mut store = TileStore::default();
        paint(&mut store, Rect::from_xywh(0, 0, 10, 10), red());
        let before = store.export(Rect::from_xywh(-64, -64, 256, 256)).unwrap();

        let mut snapshot = Snapshot::capture(&store);
        paint(&mut store, Rect::from_xywh(5, 5, 100, 3), Color::WHITE);
        snapshot.reduce(&mut store).unwrap();
        let after = store.export(Rect::from_xywh(-64, -64, 256, 256)).unwrap();

        snapshot.apply(&mut store, Direction::Undo).unwrap();
        assert_eq!(store.export(Rect::from_xywh(-64, -64, 256, 256)).unwrap(), before);
        snapshot.apply(&mut store, Direction::Redo).unwrap();
        assert_eq!(store.export(Rect::from_xywh(-64, -64, 256, 256)).unwrap(), after);
        // Out of order.
        assert_eq!(
            snapshot.apply(&mut store, Direction::Redo),
            Err(CommandError::MismatchedState)
        );
    }
    #[test]
    fn dirty_area_covers_changes() {
        let mut store = TileStore::default();
        paint(&mut store, Rect::from_xywh(0, 0, 1, 1), red());
        paint(&mut store, Rect::from_xywh(300, 300, 1, 1), red());

        let mut snapshot = Snapshot::capture(&store);
        assert_eq!(snapshot.dirty_area(), DirtyArea::Everything);
        let stroke = Rect::from_xywh(-10, 20, 20, 5);
        paint(&mut store, stroke, Color::WHITE);
        snapshot.reduce(&mut store).unwrap();
        let dirty = snapshot.dirty_area().rect().unwrap();
        assert!(dirty.contains(&stroke));
        // The untouched tile far away is not part of it, nor kept.
        assert!(!dirty.contains_point(300, 300));
        assert_eq!(snapshot.base.len(), 1);
    }
    #[test]
    fn nothing_changed() {
        let mut store = TileStore::default();
        paint(&mut store, Rect::from_xywh(0, 0, 1, 1), red());
        let mut snapshot = Snapshot::capture(&store);
        assert!(!snapshot.reduce(&mut store).unwrap());
        assert_eq!(snapshot.dirty_area(), DirtyArea::Nothing);
        assert_eq!(snapshot.memory_estimate(), 0);
    }
    #[test]
    fn stroke_then_undo_is_empty() {
        let mut store = TileStore::default();
        let mut snapshot = Snapshot::capture(&store);
        paint(&mut store, Rect::from_xywh(0, 0, TILE_SIZE, TILE_SIZE), red());
        assert!(snapshot.reduce(&mut store).unwrap());
        assert_eq!(
            snapshot.dirty_area(),
            DirtyArea::Rect(Rect::from_xywh(0, 0, TILE_SIZE, TILE_SIZE))
        );
        snapshot.apply(&mut store, Direction::Undo).unwrap();
        assert!(store.is_empty());
        assert_eq!(store.bounding_box(), None);
    }
    #[test]
    fn painted_to_empty_is_undoable() {
        let mut store = TileStore::default();
        paint(&mut store, Rect::from_xywh(0, 0, 2, 2), red());
        let mut snapshot = Snapshot::capture(&store);
        store
            .fill_rect(Rect::from_xywh(0, 0, 2, 2), Color::BLACK, BlendMode::Erase)
            .unwrap();
        // Cleanup before reduce drops the now-empty tile entirely.
        assert_eq!(store.cleanup(), 1);
        assert!(snapshot.reduce(&mut store).unwrap());

        snapshot.apply(&mut store, Direction::Undo).unwrap();
        assert_eq!(store.pixel(1, 1), red());
        snapshot.apply(&mut store, Direction::Redo).unwrap();
        assert!(store.is_empty());
    }
    #[test]
    fn stale_after_clear() {
        let mut store = TileStore::default();
        let mut snapshot = Snapshot::capture(&store);
        paint(&mut store, Rect::from_xywh(0, 0, 2, 2), red());
        snapshot.reduce(&mut store).unwrap();
        // An unrecorded structural change.
        store.clear();
        assert_eq!(
            snapshot.apply(&mut store, Direction::Undo),
            Err(CommandError::MismatchedState)
        );
        // And a different store entirely.
        let mut other = TileStore::default();
        assert_eq!(
            snapshot.apply(&mut other, Direction::Undo),
            Err(CommandError::MismatchedState)
        );
    }
    #[test]
    fn recorded_clear() {
        let mut store = TileStore::default();
        paint(&mut store, Rect::from_xywh(0, 0, 2, 2), red());
        let mut snapshot = Snapshot::capture(&store);
        store.clear();
        snapshot.reduce(&mut store).unwrap();
        snapshot.apply(&mut store, Direction::Undo).unwrap();
        assert_eq!(store.pixel(0, 0), red());
        snapshot.apply(&mut store, Direction::Redo).unwrap();
        assert!(store.is_empty());
    }
    #[test]
    fn transitions() {
        let mut store = TileStore::default();
        let mut snapshot = Snapshot::capture(&store);
        assert!(matches!(
            snapshot.apply(&mut store, Direction::Undo),
            Err(CommandError::InvalidTransition(_))
        ));
        snapshot.reduce(&mut store).unwrap();
        assert!(matches!(
            snapshot.reduce(&mut store),
            Err(CommandError::InvalidTransition(_))
        ));
    }
    #[test]
    fn cancel_restores() {
        let mut store = TileStore::default();
        paint(&mut store, Rect::from_xywh(0, 0, 2, 2), red());
        let snapshot = Snapshot::capture(&store);
        paint(&mut store, Rect::from_xywh(0, 0, 100, 100), Color::WHITE);
        snapshot.cancel(&mut store).unwrap();
        assert_eq!(store.pixel(0, 0), red());
        assert_eq!(store.pixel(50, 50), Color::TRANSPARENT);
        assert_eq!(store.len(), 1);
    }
}
