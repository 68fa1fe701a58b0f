//! 2-d tree over a snapshot of objects.
//!
//! * All nodes live in one `Vec`; children are indices into it.  The tree is
//!   never edited – a rebuild makes a new block.
//! * Each level splits at the median of its range (`select_nth_unstable`),
//!   alternating X / Y, so depth is ⌈log₂ n⌉ whatever the input order.
//! * Positions are captured at build time.  Only the *active* flag is read
//!   live, so objects that died since the rebuild are skipped but still
//!   steer the descent.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use glam::Vec2;
use parking_lot::RwLock;

use super::{Located, Neighbour};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Axis {
    X,
    Y,
}

impl Axis {
    #[inline(always)]
    fn at_depth(depth: usize) -> Axis {
        if depth % 2 == 0 { Axis::X } else { Axis::Y }
    }

    #[inline(always)]
    fn of(self, p: Vec2) -> f32 {
        match self {
            Axis::X => p.x,
            Axis::Y => p.y,
        }
    }
}

struct Node<T> {
    value: T,
    position: Vec2,
    axis: Axis,
    left: Option<u32>,
    right: Option<u32>,
}

impl<T> Node<T> {
    /// `(near, far, signed distance to the splitting line)` for `point`.
    #[inline(always)]
    fn sides(&self, point: Vec2) -> (Option<u32>, Option<u32>, f32) {
        let d = self.axis.of(self.position) - self.axis.of(point);
        if d > 0.0 {
            (self.left, self.right, d)
        } else {
            (self.right, self.left, d)
        }
    }
}

pub struct KdTree<T> {
    nodes: Vec<Node<T>>,
    root: Option<u32>,
}

/// Best candidate found so far during one query.
struct Best {
    index: Option<u32>,
    dist_sq: f32,
}

impl<T: Located> KdTree<T> {
    pub fn build(values: impl IntoIterator<Item = T>) -> Self {
        let mut nodes: Vec<Node<T>> = values
            .into_iter()
            .map(|value| Node {
                position: value.position(),
                value,
                axis: Axis::X,
                left: None,
                right: None,
            })
            .collect();
        assert!(nodes.len() < u32::MAX as usize, "too many objects for one tree");

        let len = nodes.len();
        let root = Self::partition(&mut nodes, 0, len, 0);
        Self { nodes, root }
    }

    /// Median-split `nodes[begin..end]` and return the index of its root.
    fn partition(nodes: &mut [Node<T>], begin: usize, end: usize, depth: usize) -> Option<u32> {
        if begin >= end {
            return None;
        }

        let axis = Axis::at_depth(depth);
        let middle = begin + (end - begin) / 2;
        nodes[begin..end].select_nth_unstable_by(middle - begin, |a, b| {
            axis.of(a.position).total_cmp(&axis.of(b.position))
        });

        let left = Self::partition(nodes, begin, middle, depth + 1);
        let right = Self::partition(nodes, middle + 1, end, depth + 1);

        let node = &mut nodes[middle];
        node.axis = axis;
        node.left = left;
        node.right = right;
        Some(middle as u32)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    #[inline(always)]
    fn consider(&self, index: u32, point: Vec2, best: &mut Best) {
        let node = &self.nodes[index as usize];
        if node.value.is_active() {
            let dist_sq = (node.position - point).length_squared();
            if dist_sq < best.dist_sq {
                best.dist_sq = dist_sq;
                best.index = Some(index);
            }
        }
    }

    fn answer(&self, best: Best) -> Option<Neighbour<T>>
    where
        T: Clone,
    {
        best.index.map(|i| Neighbour {
            object: self.nodes[i as usize].value.clone(),
            dist_sq: best.dist_sq,
        })
    }

    /// Closest active object to `point`, `None` if there is none.
    ///
    /// The far side of a split is visited only when the squared distance to
    /// the splitting line is below the best distance found so far.
    pub fn find_nearest_neighbour(&self, point: Vec2) -> Option<Neighbour<T>>
    where
        T: Clone,
    {
        let mut best = Best {
            index: None,
            dist_sq: f32::INFINITY,
        };
        self.descend(self.root, point, &mut best);
        self.answer(best)
    }

    fn descend(&self, index: Option<u32>, point: Vec2, best: &mut Best) {
        let Some(index) = index else { return };

        self.consider(index, point, best);
        if best.dist_sq == 0.0 {
            return;
        }

        let (near, far, d) = self.nodes[index as usize].sides(point);
        self.descend(near, point, best);
        if d * d >= best.dist_sq {
            return;
        }
        self.descend(far, point, best);
    }

    /// Same search as [`KdTree::find_nearest_neighbour`] with an explicit
    /// stack instead of recursion; visits nodes in the same order and
    /// returns the same object.
    pub fn find_nearest_neighbour_iterative(&self, point: Vec2) -> Option<Neighbour<T>>
    where
        T: Clone,
    {
        enum Step {
            Visit(u32),
            /// Far child, guarded by the squared plane distance.
            Far(Option<u32>, f32),
        }

        let mut best = Best {
            index: None,
            dist_sq: f32::INFINITY,
        };
        let mut stack: Vec<Step> = Vec::with_capacity(64);
        if let Some(root) = self.root {
            stack.push(Step::Visit(root));
        }

        while let Some(step) = stack.pop() {
            match step {
                Step::Visit(index) => {
                    self.consider(index, point, &mut best);
                    if best.dist_sq == 0.0 {
                        break;
                    }
                    let (near, far, d) = self.nodes[index as usize].sides(point);
                    stack.push(Step::Far(far, d * d));
                    if let Some(near) = near {
                        stack.push(Step::Visit(near));
                    }
                }
                Step::Far(far, plane_sq) => {
                    if plane_sq < best.dist_sq {
                        if let Some(far) = far {
                            stack.push(Step::Visit(far));
                        }
                    }
                }
            }
        }

        self.answer(best)
    }
}

/*──────────────────────── versioned snapshot ────────────────────────*/

/// A [`KdTree`] that can be rebuilt while readers keep using the old one.
///
/// Readers clone the current `Arc` and query it without holding any lock;
/// [`SnapshotTree::rebuild`] partitions the new block first and then swaps
/// the pointer.  A query straddling a rebuild finishes on the block it
/// started with, which stays alive until its last reader drops it.
pub struct SnapshotTree<T> {
    current: RwLock<Arc<KdTree<T>>>,
    generation: AtomicU64,
}

impl<T: Located> Default for SnapshotTree<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Located> SnapshotTree<T> {
    pub fn new() -> Self {
        Self {
            current: RwLock::new(Arc::new(KdTree::build(Vec::new()))),
            generation: AtomicU64::new(0),
        }
    }

    /// Replace the tree with one built from `values`; returns the new
    /// generation number.
    pub fn rebuild(&self, values: impl IntoIterator<Item = T>) -> u64 {
        let tree = Arc::new(KdTree::build(values));
        let len = tree.len();
        *self.current.write() = tree;
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        log::debug!("snapshot tree generation {generation}: {len} objects");
        generation
    }

    #[inline]
    pub fn snapshot(&self) -> Arc<KdTree<T>> {
        Arc::clone(&self.current.read())
    }

    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn find_nearest_neighbour(&self, point: Vec2) -> Option<Neighbour<T>>
    where
        T: Clone,
    {
        self.snapshot().find_nearest_neighbour(point)
    }
}
