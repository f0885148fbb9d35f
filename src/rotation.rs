//! C5: the two rotation policies. Neither policy performs I/O itself —
//! both only decide *whether* a `PPRF_ROT` should be journaled next; the
//! rewrap mechanics live in `journal::replay` and whatever drives it.

use crate::pprf::PprfState;

/// `HOLEPUNCH_KEY_GROWTH_MULT` from the original: arena capacity at create
/// time is sized to `refresh_interval * key_growth_mult * depth`.
pub const KEY_GROWTH_MULT: u32 = 2;

pub struct RotationController {
    refresh_interval: u32,
    punctures_since_rotation: u32,
}

impl RotationController {
    pub fn new(refresh_interval: u32) -> Self {
        Self { refresh_interval, punctures_since_rotation: 0 }
    }

    pub fn refresh_interval(&self) -> u32 {
        self.refresh_interval
    }

    /// Call after every successful puncture. Returns `true` once the
    /// refresh interval has elapsed and a rotation should be scheduled.
    pub fn record_puncture(&mut self) -> bool {
        self.punctures_since_rotation += 1;
        self.punctures_since_rotation >= self.refresh_interval
    }

    pub fn reset(&mut self) {
        self.punctures_since_rotation = 0;
    }

    /// Arena-pressure policy: true if free space cannot fit `2 * depth` new
    /// nodes, the maximum a single puncture can allocate.
    pub fn arena_under_pressure(pprf: &PprfState) -> bool {
        pprf.size() + 2 * pprf.depth() as u32 > pprf.capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_chacha::rand_core::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn fires_after_refresh_interval_punctures() {
        let mut controller = RotationController::new(3);
        assert!(!controller.record_puncture());
        assert!(!controller.record_puncture());
        assert!(controller.record_puncture());
        controller.reset();
        assert!(!controller.record_puncture());
    }

    #[test]
    fn arena_pressure_trips_before_capacity_is_exceeded() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let state = PprfState::new(8, [0u8; 16], &mut rng);
        assert!(RotationController::arena_under_pressure(&state));
    }
}
