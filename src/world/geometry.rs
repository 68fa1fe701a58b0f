use glam::Vec2;

/// Axis-aligned rectangle in simulation coordinates.
///
/// All predicates are inclusive on every edge.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Boundary {
    pub min: Vec2,
    pub max: Vec2,
}

impl Boundary {
    /// Panics when `min` is not strictly below `max` on both axes.
    pub fn new(min: Vec2, max: Vec2) -> Self {
        assert!(
            min.x < max.x && min.y < max.y,
            "boundary min {min} should be less than max {max}"
        );
        Self { min, max }
    }

    /// Square of half-width `radius` centred on `center`.
    pub fn around(center: Vec2, radius: f32) -> Self {
        Self::new(center - radius, center + radius)
    }

    #[inline]
    pub fn extent(&self) -> Vec2 {
        self.max - self.min
    }

    #[inline(always)]
    pub fn contains(&self, p: Vec2) -> bool {
        (self.min.x <= p.x && p.x <= self.max.x) && (self.min.y <= p.y && p.y <= self.max.y)
    }

    #[inline(always)]
    pub fn intersects(&self, other: &Boundary) -> bool {
        (self.min.x <= other.max.x && self.max.x >= other.min.x)
            && (self.min.y <= other.max.y && self.max.y >= other.min.y)
    }

    /// Overlap of two rectangles.
    ///
    /// The result may have zero width or height (touching edges), which is
    /// why it bypasses [`Boundary::new`].
    pub fn clip(&self, other: &Boundary) -> Option<Boundary> {
        if !self.intersects(other) {
            return None;
        }
        Some(Boundary {
            min: self.min.max(other.min),
            max: self.max.min(other.max),
        })
    }

    /// Nearest point inside the rectangle.
    #[inline]
    pub fn clamp(&self, p: Vec2) -> Vec2 {
        p.clamp(self.min, self.max)
    }
}

/*====================================================================*/
/*                                Tests                                */
/*====================================================================*/
