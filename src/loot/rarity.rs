//! Rarity governance: minimum floor, pity counter with acceleration, dynamic
//! drop-weight shaping, per-rarity despawn overrides and sound cues, and the
//! per-session drop histogram.

use crate::hooks::DynDropWeights;
use crate::rng::Lcg;

pub const RARITY_COUNT: usize = 5;

/// Governor state. One instance per session; the generation pipeline samples
/// through it so floor/pity apply uniformly.
#[derive(Default)]
pub struct RarityGovernor {
    /// Minimum rarity floor; `None` disables.
    floor: Option<u8>,
    pity_counter: u32,
    epic_threshold: u32,
    legendary_threshold: u32,
    acceleration: bool,
    despawn_ms: [u32; RARITY_COUNT],
    spawn_sounds: [Option<String>; RARITY_COUNT],
    pickup_sounds: [Option<String>; RARITY_COUNT],
    drop_counts: [u64; RARITY_COUNT],
    dyn_weights: Option<Box<dyn DynDropWeights>>,
}

impl std::fmt::Debug for RarityGovernor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RarityGovernor")
            .field("floor", &self.floor)
            .field("pity_counter", &self.pity_counter)
            .field("epic_threshold", &self.epic_threshold)
            .field("legendary_threshold", &self.legendary_threshold)
            .field("acceleration", &self.acceleration)
            .finish()
    }
}

impl RarityGovernor {
    pub fn new() -> Self {
        Self {
            acceleration: true,
            ..Self::default()
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn set_min_floor(&mut self, floor: Option<u8>) {
        self.floor = floor.map(|f| f.min((RARITY_COUNT - 1) as u8));
    }

    pub fn min_floor(&self) -> Option<u8> {
        self.floor
    }

    pub fn set_pity_thresholds(&mut self, epic: u32, legendary: u32) {
        self.epic_threshold = epic;
        self.legendary_threshold = legendary;
    }

    pub fn reset_pity(&mut self) {
        self.pity_counter = 0;
    }

    pub fn pity_counter(&self) -> u32 {
        self.pity_counter
    }

    pub fn set_acceleration(&mut self, enabled: bool) {
        self.acceleration = enabled;
    }

    /// Effective threshold after acceleration: once the counter passes half
    /// the base, the remaining requirement drops to 3/4 of the base.
    fn effective(&self, base: u32) -> u32 {
        if base == 0 || !self.acceleration {
            return base;
        }
        if self.pity_counter > base / 2 {
            ((base * 3) / 4).max(1)
        } else {
            base
        }
    }

    pub fn effective_epic_threshold(&self) -> u32 {
        self.effective(self.epic_threshold)
    }

    pub fn effective_legendary_threshold(&self) -> u32 {
        self.effective(self.legendary_threshold)
    }

    pub fn set_dyn_weights(&mut self, hook: Option<Box<dyn DynDropWeights>>) {
        self.dyn_weights = hook;
    }

    pub fn set_despawn_ms(&mut self, rarity: u8, ms: u32) {
        if (rarity as usize) < RARITY_COUNT {
            self.despawn_ms[rarity as usize] = ms;
        }
    }

    /// Override in milliseconds; 0 means "use the default".
    pub fn despawn_ms(&self, rarity: u8) -> u32 {
        self.despawn_ms.get(rarity as usize).copied().unwrap_or(0)
    }

    pub fn set_spawn_sound(&mut self, rarity: u8, id: Option<&str>) {
        if (rarity as usize) < RARITY_COUNT {
            self.spawn_sounds[rarity as usize] = id.map(str::to_string);
        }
    }

    pub fn spawn_sound(&self, rarity: u8) -> Option<&str> {
        self.spawn_sounds.get(rarity as usize)?.as_deref()
    }

    pub fn set_pickup_sound(&mut self, rarity: u8, id: Option<&str>) {
        if (rarity as usize) < RARITY_COUNT {
            self.pickup_sounds[rarity as usize] = id.map(str::to_string);
        }
    }

    pub fn pickup_sound(&self, rarity: u8) -> Option<&str> {
        self.pickup_sounds.get(rarity as usize)?.as_deref()
    }

    /// Session histogram of produced rarities.
    pub fn record_drop(&mut self, rarity: u8) {
        if (rarity as usize) < RARITY_COUNT {
            self.drop_counts[rarity as usize] += 1;
        }
    }

    pub fn drop_counts(&self) -> [u64; RARITY_COUNT] {
        self.drop_counts
    }

    pub fn reset_drop_counts(&mut self) {
        self.drop_counts = [0; RARITY_COUNT];
    }

    /// Raise the roll to the floor when the floor lies inside `[rmin, rmax]`.
    pub fn apply_floor(&self, rolled: u8, rmin: u8, rmax: u8) -> u8 {
        match self.floor {
            Some(floor) if rolled < floor && floor >= rmin && floor <= rmax => floor,
            _ => rolled,
        }
    }

    /// Count sub-epic rolls and upgrade when a threshold trips. Legendary
    /// (needs rmax >= 4) is checked before epic (rmax >= 3); a trip resets
    /// the counter. The result is clamped into `[rmin, rmax]`.
    pub fn apply_pity(&mut self, rolled: u8, rmin: u8, rmax: u8) -> u8 {
        if rolled < 3 {
            self.pity_counter += 1;
        } else {
            self.pity_counter = 0;
        }
        let mut target = rolled;
        let eff_leg = self.effective_legendary_threshold();
        let eff_epic = self.effective_epic_threshold();
        if eff_leg > 0 && self.pity_counter >= eff_leg && rmax >= 4 {
            target = 4;
            self.pity_counter = 0;
        } else if eff_epic > 0 && self.pity_counter >= eff_epic && rmax >= 3 {
            target = 3;
            self.pity_counter = 0;
        }
        target.clamp(rmin, rmax)
    }

    /// Sample a rarity in `[rmin, rmax]`: unit weights shaped by the dynamic
    /// hook, weighted pick, then floor and pity.
    pub fn sample(&mut self, rng: &mut Lcg, rmin: u8, rmax: u8) -> u8 {
        let rmin = rmin.min((RARITY_COUNT - 1) as u8);
        let rmax = rmax.clamp(rmin, (RARITY_COUNT - 1) as u8);
        let mut weights = [0u32; RARITY_COUNT];
        for r in rmin..=rmax {
            weights[r as usize] = 1;
        }
        if let Some(hook) = &self.dyn_weights {
            hook.apply(&mut weights);
        }
        let total: u32 = (rmin..=rmax).map(|r| weights[r as usize]).sum();
        let mut rolled = rmin;
        if total > 0 {
            let pick = rng.range(total);
            let mut acc = 0u32;
            for r in rmin..=rmax {
                acc += weights[r as usize];
                if pick < acc {
                    rolled = r;
                    break;
                }
            }
        }
        let rolled = self.apply_floor(rolled, rmin, rmax);
        self.apply_pity(rolled, rmin, rmax)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn floor_raises_only_inside_range() {
        let mut gov = RarityGovernor::new();
        gov.set_min_floor(Some(2));
        assert_eq!(gov.apply_floor(0, 0, 4), 2);
        assert_eq!(gov.apply_floor(3, 0, 4), 3);
        // Floor outside the requested range is ignored.
        assert_eq!(gov.apply_floor(0, 0, 1), 0);
    }

    #[test]
    fn pity_upgrades_to_legendary_and_resets() {
        let mut gov = RarityGovernor::new();
        gov.set_acceleration(false);
        gov.set_pity_thresholds(0, 5);
        for _ in 0..4 {
            assert_eq!(gov.apply_pity(0, 0, 4), 0);
        }
        assert_eq!(gov.apply_pity(0, 0, 4), 4);
        assert_eq!(gov.pity_counter(), 0);
    }

    #[test]
    fn pity_epic_when_rmax_blocks_legendary() {
        let mut gov = RarityGovernor::new();
        gov.set_acceleration(false);
        gov.set_pity_thresholds(3, 0);
        gov.apply_pity(0, 0, 3);
        gov.apply_pity(1, 0, 3);
        assert_eq!(gov.apply_pity(2, 0, 3), 3);
    }

    #[test]
    fn acceleration_reduces_threshold_past_half() {
        let mut gov = RarityGovernor::new();
        gov.set_pity_thresholds(0, 8);
        assert_eq!(gov.effective_legendary_threshold(), 8);
        for _ in 0..5 {
            gov.apply_pity(0, 0, 2);
        }
        // counter 5 > 8/2 -> effective drops to 6
        assert_eq!(gov.effective_legendary_threshold(), 6);
    }

    #[test]
    fn epic_roll_resets_counter() {
        let mut gov = RarityGovernor::new();
        gov.set_pity_thresholds(0, 50);
        gov.apply_pity(1, 0, 4);
        gov.apply_pity(2, 0, 4);
        assert_eq!(gov.pity_counter(), 2);
        gov.apply_pity(3, 0, 4);
        assert_eq!(gov.pity_counter(), 0);
    }

    #[test]
    fn sample_honors_dynamic_weights() {
        let mut gov = RarityGovernor::new();
        // Zero out everything except rarity 2.
        gov.set_dyn_weights(Some(Box::new(|w: &mut [u32; 5]| {
            *w = [0, 0, 7, 0, 0];
        })));
        let mut rng = Lcg::new(99);
        for _ in 0..16 {
            assert_eq!(gov.sample(&mut rng, 0, 4), 2);
        }
    }

    #[test]
    fn sample_stays_in_range() {
        let mut gov = RarityGovernor::new();
        let mut rng = Lcg::new(5);
        for _ in 0..64 {
            let r = gov.sample(&mut rng, 1, 3);
            assert!((1..=3).contains(&r));
        }
    }
}
