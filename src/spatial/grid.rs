//! Uniform spatial hash over a bounded rectangle.
//!
//! * Cell size is a tuning knob: bigger cells mean longer bucket scans,
//!   smaller cells mean more buckets to visit per range query.
//! * Each cell keeps a `SmallVec` behind its own `RwLock`; operations on
//!   different cells never contend.
//! * Moving within a cell rewrites the stored position in place – that is
//!   the common case for slow movers.
//!
//! Cell index of a position:
//! `row = ⌊(y − min.y) / cell⌋`, `col = ⌊(x − min.x) / cell⌋`, both clamped
//! to the last row/column so the inclusive max edge still maps to a cell.

use std::sync::Arc;

use glam::Vec2;
use parking_lot::RwLock;
use smallvec::SmallVec;

use super::lock::write_pair;
use super::{CellCoord, Entry, GridError};
use crate::sched::TaskPool;
use crate::world::Boundary;

/// Bucket of one cell.  Most cells hold a handful of objects.
pub(crate) type Bucket<T> = SmallVec<[Entry<T>; 8]>;

/// Default bucket length above which a parallel range query forks.
pub const DEFAULT_PARALLEL_THRESHOLD: usize = 64;

pub struct SpatialGrid<T> {
    boundary: Boundary,
    cell_size: f32,
    rows: usize,
    cols: usize,
    /// Row-major: `cells[row * cols + col]`.
    cells: Vec<RwLock<Bucket<T>>>,
    scheduler: Option<Arc<TaskPool>>,
    parallel_threshold: usize,
}

/*───────────────────────── construction ─────────────────────────*/

impl<T> SpatialGrid<T> {
    /// Panics if `cell_size` is not a positive finite number.
    pub fn new(boundary: Boundary, cell_size: f32) -> Self {
        assert!(
            cell_size.is_finite() && cell_size > 0.0,
            "cell size must be positive, got {cell_size}"
        );

        let extent = boundary.extent();
        let cols = ((extent.x / cell_size).ceil() as usize).max(1);
        let rows = ((extent.y / cell_size).ceil() as usize).max(1);

        log::debug!("spatial grid {cols}×{rows} cells of {cell_size} over {boundary:?}");

        Self {
            boundary,
            cell_size,
            rows,
            cols,
            cells: (0..rows * cols).map(|_| RwLock::new(Bucket::new())).collect(),
            scheduler: None,
            parallel_threshold: DEFAULT_PARALLEL_THRESHOLD,
        }
    }

    /// Let [`SpatialGrid::par_for_each_within_bounds`] hand buckets longer
    /// than `threshold` to `scheduler`.
    pub fn with_scheduler(mut self, scheduler: Arc<TaskPool>, threshold: usize) -> Self {
        self.scheduler = Some(scheduler);
        self.parallel_threshold = threshold;
        self
    }

    #[inline]
    pub fn boundary(&self) -> Boundary {
        self.boundary
    }

    #[inline]
    pub fn cell_size(&self) -> f32 {
        self.cell_size
    }

    #[inline]
    pub fn rows(&self) -> usize {
        self.rows
    }

    #[inline]
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Total number of stored entries (not a consistent snapshot under
    /// concurrent writers).
    pub fn len(&self) -> usize {
        self.cells.iter().map(|c| c.read().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.iter().all(|c| c.read().is_empty())
    }

    /*──────────────────────── indexing ─────────────────────────*/

    /// Cell holding `p`, or `None` when `p` is outside the boundary.
    #[inline]
    pub fn cell_of(&self, p: Vec2) -> Option<CellCoord> {
        self.boundary.contains(p).then(|| self.cell_of_clamped(p))
    }

    /// Cell of a position already known to be inside the boundary.
    #[inline(always)]
    fn cell_of_clamped(&self, p: Vec2) -> CellCoord {
        let rel = (p - self.boundary.min) / self.cell_size;
        CellCoord {
            col: (rel.x as usize).min(self.cols - 1),
            row: (rel.y as usize).min(self.rows - 1),
        }
    }

    #[inline(always)]
    pub(crate) fn index(&self, cell: CellCoord) -> usize {
        debug_assert!(cell.col < self.cols && cell.row < self.rows);
        cell.row * self.cols + cell.col
    }

    #[inline]
    pub(crate) fn bucket(&self, cell: CellCoord) -> &RwLock<Bucket<T>> {
        &self.cells[self.index(cell)]
    }

    /// Inclusive cell range covered by an (already clipped) rectangle.
    fn covered(&self, rect: &Boundary) -> (CellCoord, CellCoord) {
        (self.cell_of_clamped(rect.min), self.cell_of_clamped(rect.max))
    }

    /*──────────────────────── mutation ─────────────────────────*/

    pub fn try_insert(&self, position: Vec2, object: T) -> Result<CellCoord, GridError> {
        let cell = self
            .cell_of(position)
            .ok_or(GridError::OutOfBounds(position))?;
        self.bucket(cell).write().push(Entry { position, object });
        Ok(cell)
    }

    /// `false` when `position` lies outside the boundary.
    #[inline]
    pub fn insert(&self, position: Vec2, object: T) -> bool {
        self.try_insert(position, object).is_ok()
    }

    /// Remove and return the entry stored at exactly `position`.
    ///
    /// Matching is exact float equality on both coordinates, so callers must
    /// pass the same value they inserted with.
    pub fn take(&self, position: Vec2) -> Result<Entry<T>, GridError> {
        let cell = self
            .cell_of(position)
            .ok_or(GridError::OutOfBounds(position))?;
        let mut bucket = self.bucket(cell).write();
        let i = bucket
            .iter()
            .position(|e| e.position == position)
            .ok_or(GridError::NotFound(position))?;
        Ok(bucket.swap_remove(i))
    }

    #[inline]
    pub fn remove(&self, position: Vec2) -> bool {
        self.take(position).is_ok()
    }

    /// Move the entry at `old` to `new`.
    ///
    /// * `old` outside → insert `object` at `new`;
    /// * `new` outside → remove the entry at `old`;
    /// * same cell → rewrite the stored position in place;
    /// * otherwise → move between buckets while holding both.
    pub fn try_update(&self, old: Vec2, new: Vec2, object: T) -> Result<(), GridError> {
        let Some(from) = self.cell_of(old) else {
            return self.try_insert(new, object).map(|_| ());
        };
        let Some(to) = self.cell_of(new) else {
            return self.take(old).map(|_| ());
        };

        if from == to {
            self.shift(from, old, new)
        } else {
            self.relocate(from, to, old, new, |_| ())
        }
    }

    #[inline]
    pub fn update(&self, old: Vec2, new: Vec2, object: T) -> bool {
        self.try_update(old, new, object).is_ok()
    }

    /// In-place position rewrite inside one bucket.
    pub(crate) fn shift(&self, cell: CellCoord, old: Vec2, new: Vec2) -> Result<(), GridError> {
        let mut bucket = self.bucket(cell).write();
        let entry = bucket
            .iter_mut()
            .find(|e| e.position == old)
            .ok_or(GridError::NotFound(old))?;
        entry.position = new;
        Ok(())
    }

    /// Move one entry across buckets while holding both, then let `inspect`
    /// look at the moved object.
    pub(crate) fn relocate<R>(
        &self,
        from: CellCoord,
        to: CellCoord,
        old: Vec2,
        new: Vec2,
        inspect: impl FnOnce(&T) -> R,
    ) -> Result<R, GridError> {
        let (src_idx, dst_idx) = (self.index(from), self.index(to));
        let mut pair = write_pair(&self.cells, src_idx, dst_idx);
        let (src, dst) = pair.both_mut(src_idx, dst_idx);

        let i = src
            .iter()
            .position(|e| e.position == old)
            .ok_or(GridError::NotFound(old))?;
        let mut entry = src.swap_remove(i);
        entry.position = new;
        let seen = inspect(&entry.object);
        dst.push(entry);
        Ok(seen)
    }

    /*──────────────────────── queries ──────────────────────────*/

    /// Call `f` for every entry whose position lies in `rect`.
    ///
    /// Each visited bucket is read-locked only while it is scanned.
    pub fn for_each_within_bounds<F>(&self, rect: &Boundary, mut f: F)
    where
        F: FnMut(&Entry<T>),
    {
        let Some(clipped) = self.boundary.clip(rect) else {
            return;
        };
        let (lo, hi) = self.covered(&clipped);

        for row in lo.row..=hi.row {
            for col in lo.col..=hi.col {
                let bucket = self.cells[row * self.cols + col].read();
                for entry in bucket.iter() {
                    if rect.contains(entry.position) {
                        f(entry);
                    }
                }
            }
        }
    }

    /// Like [`SpatialGrid::for_each_within_bounds`], but buckets longer than
    /// the configured threshold are scanned on the injected scheduler.
    ///
    /// Returns only after every forked scan finished.  Without a scheduler
    /// this runs inline.
    pub fn par_for_each_within_bounds<F>(&self, rect: &Boundary, f: F)
    where
        F: Fn(&Entry<T>) + Sync,
        T: Send + Sync,
    {
        let Some(scheduler) = self.scheduler.as_deref() else {
            self.for_each_within_bounds(rect, f);
            return;
        };
        let Some(clipped) = self.boundary.clip(rect) else {
            return;
        };
        let (lo, hi) = self.covered(&clipped);
        let rect = *rect;
        let f = &f;

        scheduler.fork(|scope| {
            for row in lo.row..=hi.row {
                for col in lo.col..=hi.col {
                    let cell = &self.cells[row * self.cols + col];
                    let scan = move || {
                        for entry in cell.read().iter() {
                            if rect.contains(entry.position) {
                                f(entry);
                            }
                        }
                    };
                    if cell.read().len() > self.parallel_threshold {
                        scope.submit(scan);
                    } else {
                        scan();
                    }
                }
            }
        });
    }
}

// ──────────────────────────────────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use glam::vec2;
    use rand::{Rng, SeedableRng, rngs::StdRng};
    use parking_lot::Mutex;

    fn square(size: f32) -> Boundary {
        Boundary::new(Vec2::ZERO, Vec2::splat(size))
    }

    fn collect(grid: &SpatialGrid<u32>, rect: Boundary) -> Vec<u32> {
        let mut ids = Vec::new();
        grid.for_each_within_bounds(&rect, |e| ids.push(e.object));
        ids.sort_unstable();
        ids
    }

    #[test]
    fn dimensions_round_up() {
        let grid: SpatialGrid<u32> = SpatialGrid::new(square(100.0), 25.0);
        assert_eq!((grid.cols(), grid.rows()), (4, 4));

        let grid: SpatialGrid<u32> =
            SpatialGrid::new(Boundary::new(Vec2::ZERO, vec2(1280.0, 1700.0)), 25.0);
        assert_eq!((grid.cols(), grid.rows()), (52, 68));
    }

    #[test]
    fn max_edge_maps_to_last_cell() {
        let grid: SpatialGrid<u32> = SpatialGrid::new(square(100.0), 25.0);
        assert_eq!(grid.cell_of(vec2(100.0, 100.0)), Some(CellCoord { col: 3, row: 3 }));
        assert_eq!(grid.cell_of(vec2(25.0, 0.0)), Some(CellCoord { col: 1, row: 0 }));
        assert_eq!(grid.cell_of(vec2(100.5, 0.0)), None);
        assert!(grid.insert(vec2(100.0, 100.0), 1));
        assert!(grid.remove(vec2(100.0, 100.0)));
    }

    #[test]
    fn insert_then_remove_restores_len() {
        let grid = SpatialGrid::new(square(100.0), 25.0);
        grid.insert(vec2(50.0, 50.0), 0u32);
        let before = grid.len();

        assert!(grid.insert(vec2(10.0, 10.0), 7));
        assert_eq!(grid.len(), before + 1);
        assert!(grid.remove(vec2(10.0, 10.0)));
        assert_eq!(grid.len(), before);
    }

    #[test]
    fn out_of_bounds_insert_is_refused() {
        let grid = SpatialGrid::new(square(100.0), 25.0);
        assert_eq!(
            grid.try_insert(vec2(-1.0, 5.0), 1u32),
            Err(GridError::OutOfBounds(vec2(-1.0, 5.0)))
        );
        assert!(!grid.insert(vec2(5.0, 101.0), 1));
        assert!(grid.is_empty());
    }

    #[test]
    fn removing_absent_position_fails() {
        let grid = SpatialGrid::new(square(100.0), 25.0);
        grid.insert(vec2(10.0, 10.0), 1u32);
        assert!(!grid.remove(vec2(11.0, 10.0)));
        assert!(matches!(grid.take(vec2(10.0, 10.5)), Err(GridError::NotFound(_))));
        assert!(!grid.remove(vec2(-3.0, 10.0)));
        assert_eq!(grid.len(), 1);
    }

    #[test]
    fn update_across_cells_moves_entry() {
        let grid = SpatialGrid::new(square(100.0), 25.0);
        grid.insert(vec2(5.0, 5.0), 9u32);
        assert!(grid.update(vec2(5.0, 5.0), vec2(30.0, 5.0), 9));

        let first = Boundary::new(vec2(0.0, 0.0), vec2(24.0, 24.0));
        let second = Boundary::new(vec2(25.0, 0.0), vec2(49.0, 24.0));
        assert!(collect(&grid, first).is_empty());
        assert_eq!(collect(&grid, second), vec![9]);
    }

    #[test]
    fn update_within_cell_rewrites_in_place() {
        let grid = SpatialGrid::new(square(100.0), 25.0);
        grid.insert(vec2(5.0, 5.0), 3u32);
        assert!(grid.update(vec2(5.0, 5.0), vec2(6.0, 7.0), 3));
        assert!(!grid.remove(vec2(5.0, 5.0)));
        assert!(grid.remove(vec2(6.0, 7.0)));
    }

    #[test]
    fn update_edge_cases_delegate() {
        let grid = SpatialGrid::new(square(100.0), 25.0);

        // old outside → insert
        assert!(grid.update(vec2(-5.0, 0.0), vec2(1.0, 1.0), 4u32));
        assert_eq!(grid.len(), 1);

        // new outside → remove
        assert!(grid.update(vec2(1.0, 1.0), vec2(500.0, 1.0), 4));
        assert!(grid.is_empty());

        // stale old position → nothing changes
        grid.insert(vec2(60.0, 60.0), 5);
        assert_eq!(
            grid.try_update(vec2(10.0, 10.0), vec2(80.0, 80.0), 5),
            Err(GridError::NotFound(vec2(10.0, 10.0)))
        );
        assert_eq!(collect(&grid, square(100.0)), vec![5]);
    }

    #[test]
    fn range_query_matches_brute_force() {
        let mut rng = StdRng::seed_from_u64(7);
        let points: Vec<Vec2> = (0..2_000)
            .map(|_| vec2(rng.gen_range(0.0..500.0), rng.gen_range(0.0..300.0)))
            .collect();
        let world = Boundary::new(Vec2::ZERO, vec2(500.0, 300.0));

        for cell_size in [7.0, 25.0, 64.0, 1_000.0] {
            let grid = SpatialGrid::new(world, cell_size);
            for (i, p) in points.iter().enumerate() {
                assert!(grid.insert(*p, i as u32));
            }

            for _ in 0..50 {
                let c = vec2(rng.gen_range(-50.0..550.0), rng.gen_range(-50.0..350.0));
                let rect = Boundary::around(c, rng.gen_range(1.0..120.0));

                let mut expected: Vec<u32> = points
                    .iter()
                    .enumerate()
                    .filter(|(_, p)| rect.contains(**p))
                    .map(|(i, _)| i as u32)
                    .collect();
                expected.sort_unstable();

                assert_eq!(collect(&grid, rect), expected, "cell size {cell_size}");
            }
        }
    }

    #[test]
    fn parallel_range_query_visits_each_entry_once() {
        let pool = Arc::new(TaskPool::new(4).unwrap());
        let world = square(200.0);
        // ~190 entries per bucket, far above the threshold of 8.
        let grid = SpatialGrid::new(world, 50.0).with_scheduler(pool, 8);

        let mut rng = StdRng::seed_from_u64(11);
        let points: Vec<Vec2> = (0..3_000)
            .map(|_| vec2(rng.gen_range(0.0..200.0), rng.gen_range(0.0..200.0)))
            .collect();
        for (i, p) in points.iter().enumerate() {
            grid.insert(*p, i as u32);
        }

        let rect = Boundary::new(vec2(20.0, 30.0), vec2(170.0, 120.0));
        let seen = Mutex::new(Vec::new());
        grid.par_for_each_within_bounds(&rect, |e| seen.lock().push(e.object));

        let mut seen = seen.into_inner();
        seen.sort_unstable();
        assert_eq!(seen, collect(&grid, rect));
    }

    #[test]
    fn concurrent_writers_lose_nothing() {
        let grid = SpatialGrid::new(square(100.0), 10.0);
        std::thread::scope(|s| {
            for t in 0..8u32 {
                let grid = &grid;
                s.spawn(move || {
                    for i in 0..500u32 {
                        let p = vec2((i % 100) as f32 + 0.01 * t as f32, (i / 5) as f32 * 0.5);
                        assert!(grid.insert(p, t * 1_000 + i));
                        if i % 2 == 0 {
                            let q = vec2(99.0 - p.x, p.y);
                            assert!(grid.update(p, q, t * 1_000 + i));
                            assert!(grid.remove(q));
                        }
                    }
                });
            }
        });
        assert_eq!(grid.len(), 8 * 250);
    }
}
