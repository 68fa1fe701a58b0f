//! Spatial indexes over positioned simulation objects.
//!
//! * [`SpatialGrid`] – uniform grid of independently locked buckets.
//! * [`AllegianceGrid`] – the same grid plus per-column / per-cell
//!   allegiance counters for "nearest enemy" lookups.
//! * [`KdTree`] / [`SnapshotTree`] – immutable 2-d tree rebuilt from a
//!   snapshot of live objects, exact nearest-neighbour queries.
//!
//! Indexes never own the objects they point at; they store cloneable
//! handles (`Arc<Tank>`, `&Dot`, …) and read position / activity /
//! allegiance through [`Located`] and [`Aligned`].

use std::sync::Arc;

use glam::Vec2;
use thiserror::Error;

pub mod grid;
pub mod kd_tree;
mod lock;
pub mod tanks_grid;

pub use grid::SpatialGrid;
pub use kd_tree::{KdTree, SnapshotTree};
pub use tanks_grid::AllegianceGrid;

/*──────────────────────── object contract ────────────────────────*/

/// Anything an index can point at.
pub trait Located {
    fn position(&self) -> Vec2;

    /// Inactive objects are skipped by nearest-neighbour queries.
    fn is_active(&self) -> bool;
}

/// Objects that belong to one of the two sides.
pub trait Aligned: Located {
    fn allegiance(&self) -> Allegiance;
}

impl<T: Located + ?Sized> Located for &T {
    #[inline]
    fn position(&self) -> Vec2 {
        (**self).position()
    }
    #[inline]
    fn is_active(&self) -> bool {
        (**self).is_active()
    }
}

impl<T: Aligned + ?Sized> Aligned for &T {
    #[inline]
    fn allegiance(&self) -> Allegiance {
        (**self).allegiance()
    }
}

impl<T: Located + ?Sized> Located for Arc<T> {
    #[inline]
    fn position(&self) -> Vec2 {
        (**self).position()
    }
    #[inline]
    fn is_active(&self) -> bool {
        (**self).is_active()
    }
}

impl<T: Aligned + ?Sized> Aligned for Arc<T> {
    #[inline]
    fn allegiance(&self) -> Allegiance {
        (**self).allegiance()
    }
}

/*──────────────────────── core types ────────────────────────────*/

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Allegiance {
    Blue = 0,
    Red = 1,
}

impl Allegiance {
    pub const ALL: [Allegiance; 2] = [Allegiance::Blue, Allegiance::Red];

    /// Counter slot.
    #[inline(always)]
    pub fn index(self) -> usize {
        self as usize
    }

    #[inline(always)]
    pub fn opposite(self) -> Allegiance {
        match self {
            Allegiance::Blue => Allegiance::Red,
            Allegiance::Red => Allegiance::Blue,
        }
    }
}

/// One indexed object: where the index believes it is, and the handle.
#[derive(Clone, Debug)]
pub struct Entry<T> {
    pub position: Vec2,
    pub object: T,
}

/// Column / row of one grid cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CellCoord {
    pub col: usize,
    pub row: usize,
}

/// Result of a nearest-neighbour lookup.
#[derive(Clone, Debug)]
pub struct Neighbour<T> {
    pub object: T,
    pub dist_sq: f32,
}

/// Why a grid mutation was refused.  The grid is unchanged in both cases.
#[derive(Debug, Error, Clone, Copy, PartialEq)]
pub enum GridError {
    #[error("position {0} lies outside the grid boundary")]
    OutOfBounds(Vec2),

    #[error("no entry stored at {0}")]
    NotFound(Vec2),
}
