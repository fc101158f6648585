//! # Commands
//!
//! Commands are the reversible records of every change to a [`Document`](crate::document::Document).
//! Each operation on the document hands back the command that describes it. Applying the command
//! forward (`Do`) repeats the change, and backward (`Undo`) reverts it. The
//! [`CommandHistory`](crate::history::CommandHistory) keeps them in undo and redo stacks.

use crate::layer::{LayerID, LayerProperties};
use crate::snapshot::Snapshot;
use crate::tile::AllocError;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("command constructed for a state that does not match the current state")]
    MismatchedState,
    #[error("resource referenced by the command is not found")]
    UnknownResource,
    #[error("command makes no changes")]
    NoOp,
    #[error("invalid transition: {0}")]
    InvalidTransition(&'static str),
    #[error(transparent)]
    Alloc(#[from] AllocError),
}
impl CommandError {
    /// True if the failure was due to running out of resources, as opposed to being asked to do
    /// something that doesn't make sense for the current state.
    #[must_use]
    pub fn is_exhaustion(&self) -> bool {
        matches!(self, Self::Alloc(_))
    }
}

pub trait CommandConsumer<C> {
    /// Apply a single command. If this generates an error,
    /// the state of `self` should *not* be observably changed.
    fn apply(&mut self, command: DoUndo<'_, C>) -> Result<(), CommandError>;
}

/// Which way to apply a recorded change.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Hash)]
pub enum Direction {
    /// Revert to the state before the change.
    Undo,
    /// Re-apply the change.
    Redo,
}
impl std::ops::Not for Direction {
    type Output = Self;
    fn not(self) -> Self {
        match self {
            Self::Undo => Self::Redo,
            Self::Redo => Self::Undo,
        }
    }
}

#[derive(Debug)]
pub enum Command {
    /// Pixel content of a layer changed. Snapshots are applied in order when redoing,
    /// and in reverse when undoing.
    Pixels {
        target: LayerID,
        snapshots: smallvec::SmallVec<[Snapshot; 1]>,
    },
    /// Non-pixel properties of a layer changed.
    Properties {
        target: LayerID,
        from: Box<LayerProperties>,
        to: Box<LayerProperties>,
    },
    /// A layer was added at the given position.
    LayerInserted { target: LayerID, index: usize },
    /// A layer was taken out from the given position. The layer itself is retained by the
    /// document, detached, so the removal can be undone.
    LayerRemoved { target: LayerID, index: usize },
    /// A layer moved positions.
    LayerMoved {
        target: LayerID,
        from: usize,
        to: usize,
    },
    /// Bundle many commands into one. Treated as a single command as far as the user can tell.
    Scope(Box<[Command]>),
}
impl Command {
    /// Sum of pixel memory held by this command's snapshots.
    #[must_use]
    pub fn memory_estimate(&self) -> usize {
        match self {
            Self::Pixels { snapshots, .. } => snapshots.iter().map(Snapshot::memory_estimate).sum(),
            Self::Scope(commands) => commands.iter().map(Self::memory_estimate).sum(),
            _ => 0,
        }
    }
    /// Every layer this command refers to.
    pub fn layers(&self) -> Box<dyn Iterator<Item = LayerID> + '_> {
        match self {
            Self::Pixels { target, .. }
            | Self::Properties { target, .. }
            | Self::LayerInserted { target, .. }
            | Self::LayerRemoved { target, .. }
            | Self::LayerMoved { target, .. } => Box::new(std::iter::once(*target)),
            Self::Scope(commands) => Box::new(commands.iter().flat_map(Self::layers)),
        }
    }
}

#[derive(PartialEq, Eq, Debug)]
pub enum DoUndo<'c, T> {
    Do(&'c T),
    Undo(&'c T),
}
impl<T> Clone for DoUndo<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for DoUndo<'_, T> {}
impl<'c, T> DoUndo<'c, T> {
    #[must_use]
    pub fn new(direction: Direction, command: &'c T) -> Self {
        match direction {
            Direction::Redo => Self::Do(command),
            Direction::Undo => Self::Undo(command),
        }
    }
    #[must_use]
    pub fn direction(&self) -> Direction {
        match self {
            Self::Do(_) => Direction::Redo,
            Self::Undo(_) => Direction::Undo,
        }
    }
    #[must_use]
    pub fn inner(&self) -> &'c T {
        match *self {
            Self::Do(c) | Self::Undo(c) => c,
        }
    }
    /// The same command, applied the opposite way.
    #[must_use]
    pub fn reversed(&self) -> Self {
        Self::new(!self.direction(), self.inner())
    }
}

/// Apply a sequence of commands as one, in order when doing and in reverse when undoing.
///
/// If any fails, the ones already applied are reverted before the error is returned, so the
/// consumer is left as it was.
/// # Errors
/// The first error encountered.
pub fn apply_all<C, Consumer: CommandConsumer<C> + ?Sized>(
    consumer: &mut Consumer,
    direction: Direction,
    commands: &[C],
) -> Result<(), CommandError> {
    let ordered: Vec<&C> = match direction {
        Direction::Redo => commands.iter().collect(),
        Direction::Undo => commands.iter().rev().collect(),
    };
    for (idx, command) in ordered.iter().enumerate() {
        if let Err(err) = consumer.apply(DoUndo::new(direction, *command)) {
            log::warn!("command {idx} of {} failed ({err}), rolling back", ordered.len());
            for done in ordered[..idx].iter().rev() {
                if let Err(rollback) = consumer.apply(DoUndo::new(!direction, *done)) {
                    // Nothing more can be done, the consumer is now in an unknown state.
                    log::error!("rollback failed: {rollback}");
                }
            }
            return Err(err);
        }
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::{apply_all, CommandConsumer, CommandError, Direction, DoUndo};

    /// Adds and subtracts, refusing to go negative.
    struct Counter(u32);
    impl CommandConsumer<u32> for Counter {
        fn apply(&mut self, command: DoUndo<'_, u32>) -> Result<(), CommandError> {
            match command {
                DoUndo::Do(n) => self.0 += n,
                DoUndo::Undo(n) => {
                    self.0 = self.0.checked_sub(*n).ok_or(CommandError::MismatchedState)?;
                }
            }
            Ok(())
        }
    }

    #[test]
    fn direction_flips() {
        assert_eq!(!Direction::Undo, Direction::Redo);
        let cmd = 5u32;
        let doundo = DoUndo::new(Direction::Redo, &cmd);
        assert_eq!(doundo, DoUndo::Do(&5));
        assert_eq!(doundo.reversed(), DoUndo::Undo(&5));
    }
    #[test]
    fn apply_all_in_order() {
        let mut counter = Counter(0);
        apply_all(&mut counter, Direction::Redo, &[1, 2, 3]).unwrap();
        assert_eq!(counter.0, 6);
        apply_all(&mut counter, Direction::Undo, &[1, 2, 3]).unwrap();
        assert_eq!(counter.0, 0);
    }
    #[test]
    fn apply_all_rolls_back() {
        let mut counter = Counter(3);
        // Undo runs 1 first, then 4 fails and the 1 is re-done.
        assert_eq!(
            apply_all(&mut counter, Direction::Undo, &[4, 1]),
            Err(CommandError::MismatchedState)
        );
        assert_eq!(counter.0, 3);
    }
    #[test]
    fn exhaustion() {
        assert!(CommandError::Alloc(crate::tile::AllocError { bytes: 1 }).is_exhaustion());
        assert!(!CommandError::NoOp.is_exhaustion());
    }
}
