//! # History
//!
//! Undo and redo stacks of [`Command`]s. The history doesn't know what the commands mean, it
//! only hands them to a [`CommandConsumer`] in the right direction and keeps the stacks in order.

use crate::commands::{Command, CommandConsumer, CommandError, DoUndo};
use crate::config::HistoryLimits;
use crate::layer::LayerID;

/// Lifecycle of an [`Entry`].
#[derive(Copy, Clone, PartialEq, Eq, Debug, Hash)]
pub enum EntryState {
    /// Created but not yet in a history.
    Pending,
    /// On the undo stack, its effect is present.
    Applied,
    /// On the redo stack, its effect is reverted.
    Undone,
    /// Discarded, can never be applied again.
    Flushed,
}

/// A command with a human-readable label, as tracked by the history.
#[derive(Debug)]
pub struct Entry {
    label: String,
    command: Command,
    state: EntryState,
}
impl Entry {
    #[must_use]
    pub fn new(label: impl Into<String>, command: Command) -> Self {
        Self {
            label: label.into(),
            command,
            state: EntryState::Pending,
        }
    }
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }
    #[must_use]
    pub fn command(&self) -> &Command {
        &self.command
    }
    #[must_use]
    pub fn state(&self) -> EntryState {
        self.state
    }
}

#[derive(Debug, Default)]
pub struct CommandHistory {
    /// Oldest first.
    undo: Vec<Entry>,
    /// Most recently undone last.
    redo: Vec<Entry>,
    limits: HistoryLimits,
}
impl CommandHistory {
    #[must_use]
    pub fn new(limits: HistoryLimits) -> Self {
        Self {
            undo: Vec::new(),
            redo: Vec::new(),
            limits,
        }
    }
    #[must_use]
    pub fn limits(&self) -> HistoryLimits {
        self.limits
    }
    /// Change the limits, discarding the oldest entries if now over.
    pub fn set_limits(&mut self, limits: HistoryLimits) {
        self.limits = limits;
        self.trim();
    }
    /// Record an already-applied command. Anything that could be redone is discarded.
    /// # Errors
    /// If the entry is not pending, as it was already pushed elsewhere.
    pub fn push(&mut self, mut entry: Entry) -> Result<(), CommandError> {
        if entry.state != EntryState::Pending {
            log::warn!("refusing to push {:?} entry {:?}", entry.state, entry.label);
            return Err(CommandError::InvalidTransition("entry already pushed"));
        }
        self.redo.clear();
        entry.state = EntryState::Applied;
        self.undo.push(entry);
        self.trim();
        Ok(())
    }
    /// Revert the most recent command.
    ///
    /// Returns false if there was nothing to undo.
    /// # Errors
    /// If the command could not be reverted. It stays on the undo stack.
    pub fn undo<Consumer>(&mut self, target: &mut Consumer) -> Result<bool, CommandError>
    where
        Consumer: CommandConsumer<Command> + ?Sized,
    {
        let Some(mut entry) = self.undo.pop() else {
            return Ok(false);
        };
        if let Err(err) = target.apply(DoUndo::Undo(&entry.command)) {
            log::error!("failed to undo {:?}: {err}", entry.label);
            self.undo.push(entry);
            return Err(err);
        }
        log::debug!("undid {:?}", entry.label);
        entry.state = EntryState::Undone;
        self.redo.push(entry);
        Ok(true)
    }
    /// Re-apply the most recently undone command.
    ///
    /// Returns false if there was nothing to redo.
    /// # Errors
    /// If the command could not be applied. It stays on the redo stack.
    pub fn redo<Consumer>(&mut self, target: &mut Consumer) -> Result<bool, CommandError>
    where
        Consumer: CommandConsumer<Command> + ?Sized,
    {
        let Some(mut entry) = self.redo.pop() else {
            return Ok(false);
        };
        if let Err(err) = target.apply(DoUndo::Do(&entry.command)) {
            log::error!("failed to redo {:?}: {err}", entry.label);
            self.redo.push(entry);
            return Err(err);
        }
        log::debug!("redid {:?}", entry.label);
        entry.state = EntryState::Applied;
        self.undo.push(entry);
        Ok(true)
    }
    /// Discard everything. Irreversible.
    ///
    /// Returns the discarded entries, oldest undo first and next redo last.
    pub fn flush(&mut self) -> Vec<Entry> {
        let mut flushed: Vec<Entry> = self.undo.drain(..).chain(self.redo.drain(..).rev()).collect();
        for entry in &mut flushed {
            entry.state = EntryState::Flushed;
        }
        log::debug!("flushed {} history entries", flushed.len());
        flushed
    }
    #[must_use]
    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }
    #[must_use]
    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }
    #[must_use]
    pub fn undo_label(&self) -> Option<&str> {
        self.undo.last().map(Entry::label)
    }
    #[must_use]
    pub fn redo_label(&self) -> Option<&str> {
        self.redo.last().map(Entry::label)
    }
    /// Entries that can be undone, oldest first.
    #[must_use]
    pub fn undo_entries(&self) -> &[Entry] {
        &self.undo
    }
    /// Entries that can be redone, next redo last.
    #[must_use]
    pub fn redo_entries(&self) -> &[Entry] {
        &self.redo
    }
    /// Bytes of pixel data held by all entries.
    #[must_use]
    pub fn memory_estimate(&self) -> u64 {
        self.undo
            .iter()
            .chain(&self.redo)
            .map(|entry| entry.command.memory_estimate() as u64)
            .sum()
    }
    /// Every layer any entry refers to. Layers detached from a document but not in here can no
    /// longer come back, see [`Document::purge_detached`](crate::document::Document::purge_detached).
    #[must_use]
    pub fn referenced_layers(&self) -> hashbrown::HashSet<LayerID> {
        self.undo
            .iter()
            .chain(&self.redo)
            .flat_map(|entry| entry.command.layers())
            .collect()
    }
    /// Discard the oldest undo entries until the undo stack is within limits.
    /// Redo entries are never dropped and don't count.
    fn trim(&mut self) {
        let mut bytes: u64 = self
            .undo
            .iter()
            .map(|entry| entry.command.memory_estimate() as u64)
            .sum();
        let mut dropped = 0usize;
        let mut freed = 0u64;
        while !self.undo.is_empty() && !self.limits.allows(self.undo.len(), bytes) {
            let oldest = self.undo.remove(0);
            let size = oldest.command.memory_estimate() as u64;
            bytes -= size;
            freed += size;
            dropped += 1;
        }
        if dropped != 0 {
            log::info!(
                "trimmed {dropped} history entries, freeing up to {}",
                human_bytes::human_bytes(freed as f64)
            );
        }
    }
}
