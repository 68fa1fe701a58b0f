//! Concurrent spatial indexes for a two-sided tank battle.
//!
//! * [`world`] – axis-aligned boundaries.
//! * [`spatial`] – bucket grid, allegiance-aware grid and snapshot k-d tree.
//! * [`sched`] – the worker pool the indexes and the simulation share.
//! * [`sim`] – headless battle driver built on top of the indexes.

pub mod sched;
pub mod sim;
pub mod spatial;
pub mod world;
