//! Allegiance-aware spatial hash.
//!
//! Wraps a [`SpatialGrid`] and keeps, next to every bucket mutation, two
//! counter tables:
//!
//! * per column – how many Blue / Red objects live anywhere in the column;
//! * per cell   – the same, restricted to one cell.
//!
//! [`AllegianceGrid::find_nearest_opposite`] walks those counters to pick a
//! column, then a row, and only then scans one bucket.  That makes the
//! lookup O(rows + cols) but **approximate**: it returns the nearest enemy
//! of the chosen cell, and a closer enemy in a neighbouring row or column
//! is missed.  Callers that need the exact answer use a
//! [`KdTree`](super::KdTree).
//!
//! ### Lock order
//!
//! Column totals are owned by one `RwLock` per column, per-cell counters by
//! one `RwLock` per row.  Every path that holds more than one lock acquires
//! them in this order, each class in ascending index:
//!
//! 1. column locks
//! 2. row locks
//! 3. bucket locks (inside [`SpatialGrid`])
//!
//! Readers of the counters take one lock per read and never hold one while
//! acquiring another.

use std::sync::Arc;

use glam::Vec2;
use parking_lot::RwLock;

use super::lock::write_pair;
use super::{Aligned, Allegiance, CellCoord, Entry, GridError, Neighbour, SpatialGrid};
use crate::sched::TaskPool;
use crate::world::Boundary;

/// Blue / Red population, indexed by [`Allegiance::index`].
type Counts = [u32; 2];

pub struct AllegianceGrid<T> {
    grid: SpatialGrid<T>,
    /// `columns[col]` – totals for that column.
    columns: Vec<RwLock<Counts>>,
    /// `rows[row][col]` – counters for cell (col, row).
    rows: Vec<RwLock<Vec<Counts>>>,
}

impl<T: Aligned> AllegianceGrid<T> {
    pub fn new(boundary: Boundary, cell_size: f32) -> Self {
        Self::from_grid(SpatialGrid::new(boundary, cell_size))
    }

    /// See [`SpatialGrid::with_scheduler`].
    pub fn with_scheduler(self, scheduler: Arc<TaskPool>, threshold: usize) -> Self {
        Self {
            grid: self.grid.with_scheduler(scheduler, threshold),
            ..self
        }
    }

    fn from_grid(grid: SpatialGrid<T>) -> Self {
        let (cols, rows) = (grid.cols(), grid.rows());
        Self {
            columns: (0..cols).map(|_| RwLock::new([0; 2])).collect(),
            rows: (0..rows).map(|_| RwLock::new(vec![[0; 2]; cols])).collect(),
            grid,
        }
    }

    #[inline]
    pub fn boundary(&self) -> Boundary {
        self.grid.boundary()
    }

    #[inline]
    pub fn rows(&self) -> usize {
        self.grid.rows()
    }

    #[inline]
    pub fn cols(&self) -> usize {
        self.grid.cols()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.grid.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.grid.is_empty()
    }

    #[inline]
    pub fn cell_of(&self, p: Vec2) -> Option<CellCoord> {
        self.grid.cell_of(p)
    }

    /*──────────────────────── mutation ─────────────────────────*/

    pub fn try_insert(&self, position: Vec2, object: T) -> Result<CellCoord, GridError> {
        let cell = self
            .grid
            .cell_of(position)
            .ok_or(GridError::OutOfBounds(position))?;
        let k = object.allegiance().index();

        let mut column = self.columns[cell.col].write();
        let mut row = self.rows[cell.row].write();
        self.grid.try_insert(position, object)?;
        column[k] += 1;
        row[cell.col][k] += 1;
        Ok(cell)
    }

    #[inline]
    pub fn insert(&self, position: Vec2, object: T) -> bool {
        self.try_insert(position, object).is_ok()
    }

    pub fn take(&self, position: Vec2) -> Result<Entry<T>, GridError> {
        let cell = self
            .grid
            .cell_of(position)
            .ok_or(GridError::OutOfBounds(position))?;

        let mut column = self.columns[cell.col].write();
        let mut row = self.rows[cell.row].write();
        let entry = self.grid.take(position)?;
        let k = entry.object.allegiance().index();
        debug_assert!(column[k] > 0 && row[cell.col][k] > 0, "counter underflow at {cell:?}");
        column[k] -= 1;
        row[cell.col][k] -= 1;
        Ok(entry)
    }

    #[inline]
    pub fn remove(&self, position: Vec2) -> bool {
        self.take(position).is_ok()
    }

    /// Same cases as [`SpatialGrid::try_update`]; a cross-cell move counts as
    /// remove + insert and holds every affected lock for its whole duration.
    pub fn try_update(&self, old: Vec2, new: Vec2, object: T) -> Result<(), GridError> {
        let Some(from) = self.grid.cell_of(old) else {
            return self.try_insert(new, object).map(|_| ());
        };
        let Some(to) = self.grid.cell_of(new) else {
            return self.take(old).map(|_| ());
        };
        if from == to {
            return self.grid.shift(from, old, new);
        }

        let mut columns = write_pair(&self.columns, from.col, to.col);
        let mut rows = write_pair(&self.rows, from.row, to.row);
        let k = self
            .grid
            .relocate(from, to, old, new, |obj| obj.allegiance().index())?;

        columns.get_mut(from.col)[k] -= 1;
        columns.get_mut(to.col)[k] += 1;
        rows.get_mut(from.row)[from.col][k] -= 1;
        rows.get_mut(to.row)[to.col][k] += 1;
        Ok(())
    }

    #[inline]
    pub fn update(&self, old: Vec2, new: Vec2, object: T) -> bool {
        self.try_update(old, new, object).is_ok()
    }

    /*──────────────────────── queries ──────────────────────────*/

    #[inline]
    pub fn for_each_within_bounds<F>(&self, rect: &Boundary, f: F)
    where
        F: FnMut(&Entry<T>),
    {
        self.grid.for_each_within_bounds(rect, f);
    }

    #[inline]
    pub fn par_for_each_within_bounds<F>(&self, rect: &Boundary, f: F)
    where
        F: Fn(&Entry<T>) + Sync,
        T: Send + Sync,
    {
        self.grid.par_for_each_within_bounds(rect, f);
    }

    /// Nearest active enemy of `subject` inside the cell picked by the
    /// column / row counters.
    ///
    /// 1. nearest column (by index distance) holding enemies, right scan
    ///    first, a left hit at equal or smaller distance wins;
    /// 2. the same two-way scan over that column's cells;
    /// 3. closest active enemy in that one bucket.
    ///
    /// Distances are measured from the subject's live position to each
    /// entry's stored position (where the grid last saw it), not to the
    /// enemy's live position.
    ///
    /// Returns `None` when the subject is outside the grid, no column holds
    /// an enemy, or the picked bucket turns out to hold no active enemy.
    /// Counters are read one at a time, so an enemy moving between steps
    /// can cause a miss but never corrupts anything.
    pub fn find_nearest_opposite(&self, subject: &T) -> Option<Neighbour<T>>
    where
        T: Clone,
    {
        let origin = subject.position();
        let here = self.grid.cell_of(origin)?;
        let ours = subject.allegiance();
        let enemy = ours.opposite().index();

        let col = nearest_index(here.col, self.cols(), |c| self.columns[c].read()[enemy] != 0)?;
        let row = nearest_index(here.row, self.rows(), |r| self.rows[r].read()[col][enemy] != 0)?;

        let bucket = self.grid.bucket(CellCoord { col, row }).read();
        let mut best: Option<Neighbour<T>> = None;
        for entry in bucket.iter() {
            if entry.object.allegiance() == ours || !entry.object.is_active() {
                continue;
            }
            let dist_sq = (entry.position - origin).length_squared();
            if best.as_ref().is_none_or(|b| dist_sq < b.dist_sq) {
                best = Some(Neighbour {
                    object: entry.object.clone(),
                    dist_sq,
                });
            }
        }
        best
    }

    /*──────────────────────── inspection ───────────────────────*/

    pub fn column_count(&self, col: usize, side: Allegiance) -> u32 {
        self.columns[col].read()[side.index()]
    }

    pub fn cell_count(&self, cell: CellCoord, side: Allegiance) -> u32 {
        self.rows[cell.row].read()[cell.col][side.index()]
    }

    /// Check both counter invariants: every column total equals the sum of
    /// its cell counters, and every cell counter equals its bucket contents.
    ///
    /// Meaningful only when no writer runs concurrently.
    pub fn counters_consistent(&self) -> bool {
        for col in 0..self.cols() {
            let totals = *self.columns[col].read();
            let mut summed: Counts = [0; 2];

            for row in 0..self.rows() {
                let cell = self.rows[row].read()[col];
                let mut stored: Counts = [0; 2];
                for entry in self.grid.bucket(CellCoord { col, row }).read().iter() {
                    stored[entry.object.allegiance().index()] += 1;
                }
                if cell != stored {
                    log::warn!("cell ({col}, {row}) counts {cell:?}, bucket holds {stored:?}");
                    return false;
                }
                summed[0] += cell[0];
                summed[1] += cell[1];
            }

            if totals != summed {
                log::warn!("column {col} counts {totals:?}, cells sum to {summed:?}");
                return false;
            }
        }
        true
    }
}

/// Index nearest to `start` in `0..len` for which `occupied` holds.
///
/// Scans upward from `start` first, then downward; the downward hit
/// replaces the upward one when it is at least as close.
fn nearest_index(start: usize, len: usize, occupied: impl Fn(usize) -> bool) -> Option<usize> {
    let up = (start..len).find(|&i| occupied(i));
    let down = (0..=start).rev().find(|&i| occupied(i));

    match (up, down) {
        (Some(u), Some(d)) if start - d <= u - start => Some(d),
        (Some(u), _) => Some(u),
        (None, d) => d,
    }
}

// ──────────────────────────────────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::spatial::Located;
    use glam::vec2;
    use rand::{Rng, SeedableRng, rngs::StdRng};
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Dot {
        id: u32,
        pos: Vec2,
        side: Allegiance,
        active: AtomicBool,
    }

    impl Dot {
        fn new(id: u32, pos: Vec2, side: Allegiance) -> Arc<Dot> {
            Arc::new(Dot {
                id,
                pos,
                side,
                active: AtomicBool::new(true),
            })
        }
    }

    impl Located for Dot {
        fn position(&self) -> Vec2 {
            self.pos
        }
        fn is_active(&self) -> bool {
            self.active.load(Ordering::Relaxed)
        }
    }

    impl Aligned for Dot {
        fn allegiance(&self) -> Allegiance {
            self.side
        }
    }

    fn grid() -> AllegianceGrid<Arc<Dot>> {
        AllegianceGrid::new(Boundary::new(Vec2::ZERO, vec2(100.0, 100.0)), 25.0)
    }

    #[test]
    fn nearest_index_prefers_left_on_ties() {
        let occ = |set: &'static [usize]| move |i: usize| set.contains(&i);
        assert_eq!(nearest_index(5, 10, occ(&[3, 7])), Some(3));
        assert_eq!(nearest_index(5, 10, occ(&[2, 7])), Some(7));
        assert_eq!(nearest_index(5, 10, occ(&[1])), Some(1));
        assert_eq!(nearest_index(5, 10, occ(&[9])), Some(9));
        assert_eq!(nearest_index(5, 10, occ(&[5, 6])), Some(5));
        assert_eq!(nearest_index(5, 10, occ(&[])), None);
    }

    #[test]
    fn same_cell_enemy_is_found() {
        let g = grid();
        assert_eq!((g.cols(), g.rows()), (4, 4));

        let x = Dot::new(1, vec2(10.0, 10.0), Allegiance::Red);
        let me = Dot::new(2, vec2(12.0, 12.0), Allegiance::Blue);
        assert!(g.insert(x.pos, x.clone()));
        assert!(g.insert(me.pos, me.clone()));

        let hit = g.find_nearest_opposite(&me).unwrap();
        assert_eq!(hit.object.id, 1);
        assert_eq!(hit.dist_sq, 8.0);
    }

    #[test]
    fn friends_and_inactive_enemies_are_ignored() {
        let g = grid();
        let me = Dot::new(0, vec2(50.0, 50.0), Allegiance::Blue);
        let friend = Dot::new(1, vec2(51.0, 50.0), Allegiance::Blue);
        let dead = Dot::new(2, vec2(52.0, 50.0), Allegiance::Red);
        let alive = Dot::new(3, vec2(60.0, 60.0), Allegiance::Red);
        for d in [&me, &friend, &dead, &alive] {
            g.insert(d.pos, Arc::clone(d));
        }
        dead.active.store(false, Ordering::Relaxed);

        assert_eq!(g.find_nearest_opposite(&me).unwrap().object.id, 3);
        assert!(g.find_nearest_opposite(&friend).is_some());
    }

    #[test]
    fn no_enemy_anywhere_gives_none() {
        let g = grid();
        let me = Dot::new(0, vec2(5.0, 5.0), Allegiance::Red);
        g.insert(me.pos, me.clone());
        g.insert(vec2(90.0, 90.0), Dot::new(1, vec2(90.0, 90.0), Allegiance::Red));
        assert!(g.find_nearest_opposite(&me).is_none());

        let outside = Dot::new(2, vec2(-1.0, 5.0), Allegiance::Blue);
        assert!(g.find_nearest_opposite(&outside).is_none());
    }

    #[test]
    fn chosen_cell_without_active_enemy_gives_none() {
        let g = grid();
        let me = Dot::new(0, vec2(12.0, 12.0), Allegiance::Blue);
        let dead = Dot::new(1, vec2(14.0, 14.0), Allegiance::Red);
        let alive = Dot::new(2, vec2(90.0, 90.0), Allegiance::Red);
        for d in [&me, &dead, &alive] {
            g.insert(d.pos, Arc::clone(d));
        }
        dead.active.store(false, Ordering::Relaxed);

        // Counters still point at cell (0, 0), whose only enemy is inactive.
        assert_eq!(g.cell_count(CellCoord { col: 0, row: 0 }, Allegiance::Red), 1);
        assert!(g.find_nearest_opposite(&me).is_none());
    }

    #[test]
    fn column_then_row_prefilter_is_approximate() {
        let g = grid();
        let me = Dot::new(0, vec2(12.0, 12.0), Allegiance::Blue);
        // Nearest column holding an enemy is col 0 (row 3); a metrically
        // closer enemy one column over in the same row is missed.
        let far_same_col = Dot::new(1, vec2(12.0, 90.0), Allegiance::Red);
        let near_next_col = Dot::new(2, vec2(30.0, 12.0), Allegiance::Red);
        g.insert(far_same_col.pos, far_same_col.clone());
        g.insert(near_next_col.pos, near_next_col.clone());

        assert_eq!(g.find_nearest_opposite(&me).unwrap().object.id, 1);
    }

    #[test]
    fn counters_follow_moves_and_removals() {
        let g = grid();
        let a = Dot::new(0, vec2(5.0, 5.0), Allegiance::Blue);
        g.insert(a.pos, a.clone());

        assert_eq!(g.column_count(0, Allegiance::Blue), 1);
        assert!(g.update(vec2(5.0, 5.0), vec2(30.0, 5.0), a.clone()));
        assert_eq!(g.column_count(0, Allegiance::Blue), 0);
        assert_eq!(g.column_count(1, Allegiance::Blue), 1);
        assert_eq!(g.cell_count(CellCoord { col: 1, row: 0 }, Allegiance::Blue), 1);

        // In-cell move leaves counters alone.
        assert!(g.update(vec2(30.0, 5.0), vec2(31.0, 6.0), a.clone()));
        assert_eq!(g.cell_count(CellCoord { col: 1, row: 0 }, Allegiance::Blue), 1);

        // Leaving the grid counts as removal.
        assert!(g.update(vec2(31.0, 6.0), vec2(31.0, 600.0), a.clone()));
        assert_eq!(g.column_count(1, Allegiance::Blue), 0);
        assert!(g.is_empty());

        // Failed operations leave counters untouched.
        assert!(!g.remove(vec2(31.0, 6.0)));
        assert!(!g.insert(vec2(-5.0, 0.0), a.clone()));
        assert!(g.counters_consistent());
    }

    #[test]
    fn counters_stay_consistent_under_random_operations() {
        let g = AllegianceGrid::new(Boundary::new(Vec2::ZERO, vec2(300.0, 200.0)), 17.0);
        let mut rng = StdRng::seed_from_u64(3);
        let mut live: Vec<(Vec2, Arc<Dot>)> = Vec::new();

        for i in 0..5_000u32 {
            let roll = rng.gen_range(0..10);
            if roll < 4 || live.is_empty() {
                let p = vec2(rng.gen_range(-20.0..320.0), rng.gen_range(-20.0..220.0));
                let side = if i % 2 == 0 { Allegiance::Blue } else { Allegiance::Red };
                let d = Dot::new(i, p, side);
                if g.insert(p, d.clone()) {
                    live.push((p, d));
                }
            } else if roll < 6 {
                let (p, _) = live.swap_remove(rng.gen_range(0..live.len()));
                assert!(g.remove(p));
            } else {
                let j = rng.gen_range(0..live.len());
                let (p, d) = live[j].clone();
                let q = p + vec2(rng.gen_range(-40.0..40.0), rng.gen_range(-40.0..40.0));
                assert!(g.update(p, q, d.clone()));
                if g.boundary().contains(q) {
                    live[j].0 = q;
                } else {
                    live.swap_remove(j);
                }
            }
        }

        assert_eq!(g.len(), live.len());
        assert!(g.counters_consistent());
    }

    #[test]
    fn concurrent_moves_and_queries_keep_counters_consistent() {
        let g = AllegianceGrid::new(Boundary::new(Vec2::ZERO, vec2(400.0, 400.0)), 25.0);
        let dots: Vec<Arc<Dot>> = (0..400u32)
            .map(|i| {
                let side = if i % 2 == 0 { Allegiance::Blue } else { Allegiance::Red };
                Dot::new(i, vec2((i % 20) as f32 * 20.0 + 0.5, (i / 20) as f32 * 20.0 + 0.5), side)
            })
            .collect();
        for d in &dots {
            assert!(g.insert(d.pos, d.clone()));
        }

        std::thread::scope(|s| {
            for chunk in dots.chunks(50) {
                let g = &g;
                s.spawn(move || {
                    let mut rng = StdRng::seed_from_u64(chunk[0].id as u64);
                    let mut at: Vec<Vec2> = chunk.iter().map(|d| d.pos).collect();
                    for _ in 0..200 {
                        for (d, p) in chunk.iter().zip(at.iter_mut()) {
                            // The y fraction is unique per dot, so two dots
                            // never share a position.
                            let q = vec2(
                                (p.x + rng.gen_range(-30.0..30.0)).clamp(0.0, 399.0).floor()
                                    + d.pos.x.fract(),
                                (p.y + rng.gen_range(-30.0..30.0)).clamp(0.0, 399.0).floor()
                                    + (d.id as f32) * 1e-3,
                            );
                            assert!(g.update(*p, q, d.clone()));
                            *p = q;
                            let _ = g.find_nearest_opposite(d);
                        }
                    }
                });
            }
        });

        assert_eq!(g.len(), dots.len());
        assert!(g.counters_consistent());
    }
}
