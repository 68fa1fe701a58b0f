use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use glam::{Vec2, vec2};
use rand::{Rng, SeedableRng, rngs::StdRng};
use thiserror::Error;

use super::{ConfigError, SimConfig, Tank, Targeting};
use crate::sched::{TaskError, TaskPool, wait_all};
use crate::spatial::{Aligned, Allegiance, AllegianceGrid, Located, SnapshotTree};
use crate::world::Boundary;

type TankRef = Arc<Tank>;

#[derive(Debug, Error)]
pub enum SimError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Task(#[from] TaskError),
}

/// What happened during one tick.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TickStats {
    pub tick: u64,
    /// Surviving tanks, indexed by [`Allegiance::index`].
    pub alive: [usize; 2],
    pub shots: usize,
    pub kills: usize,
}

/// Owns the tanks and their indexes and advances the battle one tick at a
/// time.
pub struct TicRunner {
    config: Arc<SimConfig>,
    pool: Arc<TaskPool>,
    tanks: Vec<TankRef>,
    grid: Arc<AllegianceGrid<TankRef>>,
    /// One tree per allegiance, holding that side's tanks.
    trees: [SnapshotTree<TankRef>; 2],
    ticks: u64,
}

impl TicRunner {
    /// Validate `config`, start a pool and deploy both armies.
    pub fn new(config: SimConfig) -> Result<Self, SimError> {
        config.validate()?;
        let pool = Arc::new(TaskPool::new(config.workers)?);
        let tanks = deploy(&config);
        Self::with_tanks(config, pool, tanks)
    }

    /// Start from an explicit line-up on an existing pool.  Tanks outside
    /// the field are dropped.
    pub fn with_tanks(
        config: SimConfig,
        pool: Arc<TaskPool>,
        tanks: impl IntoIterator<Item = Tank>,
    ) -> Result<Self, SimError> {
        config.validate()?;
        let grid = AllegianceGrid::new(config.boundary(), config.cell_size)
            .with_scheduler(Arc::clone(&pool), config.parallel_threshold);

        let mut placed = Vec::new();
        for tank in tanks {
            let tank = Arc::new(tank);
            match grid.try_insert(tank.position(), Arc::clone(&tank)) {
                Ok(_) => placed.push(tank),
                Err(e) => log::warn!("tank {} not deployed: {e}", tank.id()),
            }
        }
        log::debug!(
            "battle on {}x{} cells with {} tanks, {} workers",
            grid.cols(),
            grid.rows(),
            placed.len(),
            pool.workers()
        );

        Ok(Self {
            config: Arc::new(config),
            pool,
            tanks: placed,
            grid: Arc::new(grid),
            trees: [SnapshotTree::new(), SnapshotTree::new()],
            ticks: 0,
        })
    }

    #[inline]
    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    #[inline]
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Tanks still on the field.
    #[inline]
    pub fn tanks(&self) -> &[TankRef] {
        &self.tanks
    }

    #[inline]
    pub fn grid(&self) -> &AllegianceGrid<TankRef> {
        &self.grid
    }

    #[inline]
    pub fn tree(&self, side: Allegiance) -> &SnapshotTree<TankRef> {
        &self.trees[side.index()]
    }

    pub fn alive(&self) -> [usize; 2] {
        let mut alive = [0; 2];
        for t in &self.tanks {
            alive[t.allegiance().index()] += 1;
        }
        alive
    }

    /// The side left standing once the other has no tanks.
    pub fn winner(&self) -> Option<Allegiance> {
        match self.alive() {
            [0, 0] => None,
            [_, 0] => Some(Allegiance::Blue),
            [0, _] => Some(Allegiance::Red),
            _ => None,
        }
    }

    /*──────────────────────── one tick ─────────────────────────*/

    pub fn tick(&mut self) -> Result<TickStats, SimError> {
        self.movement()?;

        for t in &self.tanks {
            t.tick_reload();
        }

        if self.ticks % self.config.rebuild_interval == 0 {
            self.rebuild_trees();
        }

        let (shots, kills) = self.engage()?;
        self.bury_dead();
        debug_assert!(self.grid.counters_consistent());

        self.ticks += 1;
        let stats = TickStats {
            tick: self.ticks,
            alive: self.alive(),
            shots,
            kills,
        };
        log::debug!(
            "tick {}: blue {} red {}, {} shots, {} kills",
            stats.tick,
            stats.alive[0],
            stats.alive[1],
            stats.shots,
            stats.kills
        );
        Ok(stats)
    }

    fn chunks(&self) -> impl Iterator<Item = Vec<TankRef>> + '_ {
        let size = self.tanks.len().div_ceil(self.pool.workers() * 4).max(1);
        self.tanks.chunks(size).map(<[TankRef]>::to_vec)
    }

    fn movement(&self) -> Result<(), SimError> {
        let handles: Vec<_> = self
            .chunks()
            .map(|chunk| {
                let grid = Arc::clone(&self.grid);
                let config = Arc::clone(&self.config);
                self.pool.submit(move || {
                    for tank in &chunk {
                        step(&grid, &config, tank);
                    }
                })
            })
            .collect();
        Ok(wait_all(handles)?)
    }

    fn rebuild_trees(&self) {
        let tanks = &self.tanks;
        self.pool.fork(|scope| {
            for side in Allegiance::ALL {
                let tree = &self.trees[side.index()];
                scope.submit(move || {
                    tree.rebuild(
                        tanks
                            .iter()
                            .filter(|t| t.allegiance() == side && t.is_active())
                            .cloned(),
                    );
                });
            }
        });
    }

    fn engage(&self) -> Result<(usize, usize), SimError> {
        let shots = Arc::new(AtomicUsize::new(0));
        let kills = Arc::new(AtomicUsize::new(0));
        let trees = Arc::new([self.trees[0].snapshot(), self.trees[1].snapshot()]);

        let handles: Vec<_> = self
            .chunks()
            .map(|chunk| {
                let grid = Arc::clone(&self.grid);
                let config = Arc::clone(&self.config);
                let trees = Arc::clone(&trees);
                let (shots, kills) = (Arc::clone(&shots), Arc::clone(&kills));
                self.pool.submit(move || {
                    for tank in &chunk {
                        if !tank.is_active() || !tank.reloaded() {
                            continue;
                        }
                        let enemy = match config.targeting {
                            Targeting::Grid => grid.find_nearest_opposite(tank),
                            Targeting::Tree => trees[tank.allegiance().opposite().index()]
                                .find_nearest_neighbour(tank.position()),
                        };
                        let Some(enemy) = enemy else { continue };
                        if enemy.dist_sq > config.fire_range * config.fire_range {
                            continue;
                        }
                        if !tank.try_fire(config.reload_ticks) {
                            continue;
                        }
                        shots.fetch_add(1, Ordering::Relaxed);
                        if enemy.object.hit(config.rocket_damage) {
                            kills.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                })
            })
            .collect();
        wait_all(handles)?;

        Ok((shots.load(Ordering::Relaxed), kills.load(Ordering::Relaxed)))
    }

    /// Drop dead tanks from the grid.  Trees keep them until the next
    /// rebuild; their inactive flag hides them from queries.
    fn bury_dead(&mut self) {
        let grid = &self.grid;
        self.tanks.retain(|t| {
            if t.is_active() {
                return true;
            }
            if !grid.remove(t.position()) {
                log::warn!("dead tank {} was not indexed", t.id());
            }
            false
        });
    }
}

/// Move one tank: separation push away from overlapping neighbours, then a
/// step toward its target, clamped into the field.
fn step(grid: &AllegianceGrid<TankRef>, config: &SimConfig, tank: &TankRef) {
    if !tank.is_active() {
        return;
    }
    let here = tank.position();
    let reach = 2.0 * config.collision_radius;

    let mut push = Vec2::ZERO;
    grid.for_each_within_bounds(&Boundary::around(here, reach), |e| {
        if Arc::ptr_eq(&e.object, tank) || !e.object.is_active() {
            return;
        }
        let away = here - e.position;
        let dist = away.length();
        if dist > 0.0 && dist < reach {
            push += away / dist * (reach - dist) * 0.5;
        }
    });

    let toward = (tank.target() - here).clamp_length_max(config.tank_speed);
    // Clamping can land two tanks on the same edge coordinate; the grid
    // cannot tell entries with identical positions apart.
    let next = grid.boundary().clamp(here + push + toward);
    if next == here {
        return;
    }

    match grid.try_update(here, next, Arc::clone(tank)) {
        Ok(()) => tank.set_position(next),
        Err(e) => log::trace!("tank {} stays at {here}: {e}", tank.id()),
    }
}

/// Two armies on opposite bands of the field, each tank aiming at the
/// mirrored spot on the far side.
fn deploy(config: &SimConfig) -> Vec<Tank> {
    let mut rng = StdRng::seed_from_u64(config.seed);
    let (w, h) = (config.width, config.height);
    let margin = config.collision_radius.min(w * 0.5);
    let band = h * 0.2;

    let mut tanks = Vec::with_capacity(config.tanks_per_side * 2);
    let mut id = 0;
    for side in Allegiance::ALL {
        for _ in 0..config.tanks_per_side {
            let x = rng.gen_range(margin..=w - margin);
            let y = rng.gen_range(0.0..=band);
            let (position, target) = match side {
                Allegiance::Blue => (vec2(x, y), vec2(w - x, h - y)),
                Allegiance::Red => (vec2(x, h - y), vec2(w - x, y)),
            };
            tanks.push(Tank::new(id, side, position, target, config.tank_health));
            id += 1;
        }
    }
    tanks
}
