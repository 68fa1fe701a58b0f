mod geometry;

pub use geometry::Boundary;
