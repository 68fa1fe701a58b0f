//! Ordered acquisition of two slots out of a lock array.
//!
//! Every multi-lock path in this module tree goes through [`write_pair`],
//! which always takes the lower index first.  Together with the class order
//! used by [`AllegianceGrid`](super::AllegianceGrid)
//! (columns → rows → buckets) this gives one global order, so two writers
//! can never wait on each other in a cycle.

use parking_lot::{RwLock, RwLockWriteGuard};

pub(crate) struct WritePair<'a, S> {
    low: (usize, RwLockWriteGuard<'a, S>),
    high: Option<(usize, RwLockWriteGuard<'a, S>)>,
}

/// Write-lock `locks[a]` and `locks[b]` (once if `a == b`), lower index first.
pub(crate) fn write_pair<S>(locks: &[RwLock<S>], a: usize, b: usize) -> WritePair<'_, S> {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    let low = locks[lo].write();
    let high = (hi != lo).then(|| (hi, locks[hi].write()));
    WritePair {
        low: (lo, low),
        high,
    }
}

impl<S> WritePair<'_, S> {
    /// Guarded value for one of the two locked indices.
    pub(crate) fn get_mut(&mut self, index: usize) -> &mut S {
        match &mut self.high {
            Some((i, guard)) if *i == index => &mut **guard,
            _ => {
                debug_assert_eq!(self.low.0, index, "slot {index} is not locked");
                &mut *self.low.1
            }
        }
    }

    /// Both guarded values, in `(a, b)` order.  Requires `a != b`.
    pub(crate) fn both_mut(&mut self, a: usize, b: usize) -> (&mut S, &mut S) {
        let (lo_idx, lo) = (self.low.0, &mut *self.low.1);
        let Some((hi_idx, hi)) = self.high.as_mut() else {
            panic!("both_mut needs two distinct slots, got {a} twice");
        };
        debug_assert!((a == lo_idx && b == *hi_idx) || (a == *hi_idx && b == lo_idx));
        if a == lo_idx {
            (lo, &mut **hi)
        } else {
            (&mut **hi, lo)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_index_locks_once() {
        let locks: Vec<RwLock<u32>> = (0..4).map(RwLock::new).collect();
        let mut pair = write_pair(&locks, 2, 2);
        *pair.get_mut(2) += 10;
        drop(pair);
        assert_eq!(*locks[2].read(), 12);
    }

    #[test]
    fn both_mut_respects_argument_order() {
        let locks: Vec<RwLock<u32>> = (0..4).map(RwLock::new).collect();
        let mut pair = write_pair(&locks, 3, 1);
        let (a, b) = pair.both_mut(3, 1);
        assert_eq!((*a, *b), (3, 1));
        *a = 30;
        *b = 10;
        drop(pair);
        assert_eq!(*locks[3].read(), 30);
        assert_eq!(*locks[1].read(), 10);
    }

    #[test]
    fn opposite_orders_do_not_deadlock() {
        let locks: Vec<RwLock<u64>> = (0..2).map(|_| RwLock::new(0)).collect();
        std::thread::scope(|s| {
            for t in 0..4 {
                let locks = &locks;
                s.spawn(move || {
                    for _ in 0..2_000 {
                        let (a, b) = if t % 2 == 0 { (0, 1) } else { (1, 0) };
                        let mut pair = write_pair(locks, a, b);
                        let (x, y) = pair.both_mut(a, b);
                        *x += 1;
                        *y += 1;
                    }
                });
            }
        });
        assert_eq!(*locks[0].read(), 8_000);
        assert_eq!(*locks[1].read(), 8_000);
    }
}
