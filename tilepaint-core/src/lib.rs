//! # tilepaint-core
//!
//! Canvas storage and compositing. Pixels live in sparse, tiled [`store::TileStore`]s, shared
//! copy-on-write with [`snapshot::Snapshot`]s for cheap undo. [`layer::Layer`]s place stores into
//! a [`document::Document`], which composites them, and every change is recorded as a
//! [`commands::Command`] for the [`history::CommandHistory`].

pub mod blend;
pub mod color;
pub mod commands;
pub mod composite;
pub mod config;
pub mod document;
pub mod history;
pub mod id;
pub mod layer;
pub mod pixel;
pub mod snapshot;
pub mod store;
pub mod surface;
pub mod tile;
pub mod transform;
pub mod util;

pub use id::FuzzID;

/// Width and height of every tile, in pixels.
pub const TILE_SIZE: u32 = 64;
