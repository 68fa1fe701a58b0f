use glam::{Vec2, vec2};
use thiserror::Error;

use crate::world::Boundary;

/// Which index answers "who is my nearest enemy".
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum Targeting {
    /// Column / row counters of the allegiance grid (fast, approximate).
    #[default]
    Grid,
    /// Snapshot k-d tree of the opposing side (exact, up to
    /// `rebuild_interval` ticks stale).
    Tree,
}

/// Battle parameters.  Defaults follow the classic 1280×1700 field.
#[derive(Clone, Debug)]
pub struct SimConfig {
    pub width: f32,
    pub height: f32,
    pub cell_size: f32,
    pub tanks_per_side: usize,
    pub tank_health: i32,
    /// Map units per tick.
    pub tank_speed: f32,
    pub collision_radius: f32,
    pub fire_range: f32,
    pub rocket_damage: i32,
    pub reload_ticks: u32,
    /// Snapshot trees are rebuilt every this many ticks.
    pub rebuild_interval: u64,
    /// Bucket length above which range scans fork onto the pool.
    pub parallel_threshold: usize,
    /// `0` = one worker per core.
    pub workers: usize,
    pub targeting: Targeting,
    pub seed: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            width: 1280.0,
            height: 1700.0,
            cell_size: 25.0,
            tanks_per_side: 640,
            tank_health: 1000,
            tank_speed: 1.0,
            collision_radius: 8.5,
            fire_range: 200.0,
            rocket_damage: 60,
            reload_ticks: 200,
            rebuild_interval: 1,
            parallel_threshold: 64,
            workers: 0,
            targeting: Targeting::Grid,
            seed: 0x7A_4E_u64,
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("`{field}` must be positive, got {value}")]
    NotPositive { field: &'static str, value: f64 },

    #[error("`{0}` must be at least 1")]
    Zero(&'static str),
}

impl SimConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("width", self.width),
            ("height", self.height),
            ("cell_size", self.cell_size),
            ("tank_speed", self.tank_speed),
            ("collision_radius", self.collision_radius),
            ("fire_range", self.fire_range),
        ];
        for (field, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::NotPositive {
                    field,
                    value: value as f64,
                });
            }
        }
        for (field, value) in [
            ("tank_health", self.tank_health),
            ("rocket_damage", self.rocket_damage),
        ] {
            if value <= 0 {
                return Err(ConfigError::NotPositive {
                    field,
                    value: value as f64,
                });
            }
        }
        if self.tanks_per_side == 0 {
            return Err(ConfigError::Zero("tanks_per_side"));
        }
        if self.rebuild_interval == 0 {
            return Err(ConfigError::Zero("rebuild_interval"));
        }
        Ok(())
    }

    #[inline]
    pub fn boundary(&self) -> Boundary {
        Boundary::new(Vec2::ZERO, vec2(self.width, self.height))
    }
}
