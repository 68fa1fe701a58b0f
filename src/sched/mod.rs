//! Work distribution for bulk index operations and per-tank phases.

mod pool;

pub use pool::{ForkScope, TaskError, TaskHandle, TaskPool, wait_all};
