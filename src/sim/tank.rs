use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};

use glam::Vec2;
use parking_lot::RwLock;

use crate::spatial::{Aligned, Allegiance, Located};

/// One battle participant.
///
/// Shared between workers as `Arc<Tank>`: only the worker that moves a tank
/// writes its position, every other field is atomic.
#[derive(Debug)]
pub struct Tank {
    id: u32,
    allegiance: Allegiance,
    target: Vec2,
    position: RwLock<Vec2>,
    health: AtomicI32,
    /// Ticks until the next rocket is ready; `0` = loaded.
    reload: AtomicU32,
    active: AtomicBool,
}

impl Tank {
    pub fn new(id: u32, allegiance: Allegiance, position: Vec2, target: Vec2, health: i32) -> Self {
        Self {
            id,
            allegiance,
            target,
            position: RwLock::new(position),
            health: AtomicI32::new(health),
            reload: AtomicU32::new(0),
            active: AtomicBool::new(health > 0),
        }
    }

    #[inline]
    pub fn id(&self) -> u32 {
        self.id
    }

    #[inline]
    pub fn target(&self) -> Vec2 {
        self.target
    }

    #[inline]
    pub(crate) fn set_position(&self, p: Vec2) {
        *self.position.write() = p;
    }

    #[inline]
    pub fn health(&self) -> i32 {
        self.health.load(Ordering::Acquire)
    }

    /// Apply `damage`; `true` only for the hit that took health from
    /// positive to zero or below.  That hit also deactivates the tank.
    pub fn hit(&self, damage: i32) -> bool {
        let before = self.health.fetch_sub(damage, Ordering::AcqRel);
        let lethal = before > 0 && before <= damage;
        if lethal {
            self.deactivate();
        }
        lethal
    }

    #[inline]
    pub fn reloaded(&self) -> bool {
        self.reload.load(Ordering::Acquire) == 0
    }

    /// Spend the loaded rocket and start a `reload_ticks` countdown.
    /// Fails when not reloaded.
    pub fn try_fire(&self, reload_ticks: u32) -> bool {
        self.reload
            .compare_exchange(0, reload_ticks, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn tick_reload(&self) {
        let _ = self
            .reload
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |r| r.checked_sub(1));
    }

    #[inline]
    pub fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
    }
}

impl Located for Tank {
    #[inline]
    fn position(&self) -> Vec2 {
        *self.position.read()
    }

    #[inline]
    fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

impl Aligned for Tank {
    #[inline(always)]
    fn allegiance(&self) -> Allegiance {
        self.allegiance
    }
}
