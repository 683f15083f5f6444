//! Procedural enemy modifiers: weighted definitions with per-dimension cost
//! fractions, tier gating and incompatibility masks, rolled under a budget
//! cap from a deterministic xorshift32 stream.

use serde::{Deserialize, Serialize};

use crate::rng::XorShift32;
use crate::util::parse_kv_blocks;

pub const MAX_MODIFIERS: usize = 32;
pub const MAX_ACTIVE_MODIFIERS: usize = 8;
pub const DEFAULT_COST_CAP: f32 = 0.6;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModifierDef {
    pub id: i32,
    pub name: String,
    pub weight: f32,
    /// Allowed-tier bitmask; 0 in the config means "all tiers".
    pub tier_mask: u32,
    pub dps_cost: f32,
    pub control_cost: f32,
    pub mobility_cost: f32,
    /// Bitmask of modifier indices this one cannot coexist with.
    pub incompat_mask: u32,
    pub telegraph: String,
}

/// Result of a roll: chosen definition indices plus accumulated costs.
#[derive(Debug, Clone, Default)]
pub struct ModifierSet {
    pub picks: Vec<usize>,
    pub total_dps_cost: f32,
    pub total_control_cost: f32,
    pub total_mobility_cost: f32,
    pub applied_mask: u32,
}

#[derive(Debug, Default)]
pub struct ModifierRegistry {
    defs: Vec<ModifierDef>,
}

impl ModifierRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }

    pub fn at(&self, index: usize) -> Option<&ModifierDef> {
        self.defs.get(index)
    }

    pub fn by_id(&self, id: i32) -> Option<&ModifierDef> {
        self.defs.iter().find(|d| d.id == id)
    }

    pub fn clear(&mut self) {
        self.defs.clear();
    }

    pub fn insert(&mut self, mut def: ModifierDef) -> bool {
        if self.defs.len() >= MAX_MODIFIERS || def.name.is_empty() {
            return false;
        }
        if def.weight <= 0.0 {
            def.weight = 1.0;
        }
        if def.tier_mask == 0 {
            def.tier_mask = u32::MAX;
        }
        self.defs.push(def);
        true
    }

    pub fn load_from_file(&mut self, path: &str) -> std::io::Result<usize> {
        let text = std::fs::read_to_string(path)?;
        Ok(self.load_from_str(&text))
    }

    /// Parse modifier blocks. `tiers` and `incompat` values are digit lists
    /// setting the corresponding mask bits.
    pub fn load_from_str(&mut self, text: &str) -> usize {
        self.defs.clear();
        for block in parse_kv_blocks(text) {
            let def = ModifierDef {
                id: block.get_i32("id").unwrap_or(0),
                name: block.get("name").unwrap_or("").to_string(),
                weight: block.get_f32("weight").unwrap_or(0.0),
                tier_mask: block.get("tiers").map(parse_digit_mask).unwrap_or(0),
                dps_cost: block.get_f32("dps").unwrap_or(0.0),
                control_cost: block.get_f32("control").unwrap_or(0.0),
                mobility_cost: block.get_f32("mobility").unwrap_or(0.0),
                incompat_mask: block.get("incompat").map(parse_digit_mask).unwrap_or(0),
                telegraph: block.get("telegraph").unwrap_or("").to_string(),
            };
            self.insert(def);
        }
        self.defs.len()
    }

    /// Budget-capped incompat-aware weighted roll. Candidates must fit the
    /// per-dimension cap on all three cost axes; picks stop when the set is
    /// full or nothing remains selectable.
    pub fn roll(&self, seed: u32, tier_index: usize, cost_cap: f32) -> ModifierSet {
        let cap = if cost_cap > 0.0 { cost_cap } else { DEFAULT_COST_CAP };
        let mut out = ModifierSet::default();
        let mut rng = XorShift32::new(seed, 0xA5F_4321);
        for _ in 0..MAX_ACTIVE_MODIFIERS * 4 {
            let candidate_ok = |i: usize, d: &ModifierDef| -> bool {
                d.tier_mask & (1u32 << tier_index) != 0
                    && out.applied_mask & (1u32 << i) == 0
                    && d.incompat_mask & out.applied_mask == 0
                    && out.total_dps_cost + d.dps_cost <= cap
                    && out.total_control_cost + d.control_cost <= cap
                    && out.total_mobility_cost + d.mobility_cost <= cap
            };
            let total_w: f32 = self
                .defs
                .iter()
                .enumerate()
                .filter(|(i, d)| candidate_ok(*i, d))
                .map(|(_, d)| d.weight)
                .sum();
            if total_w <= 0.0 {
                break;
            }
            let mut r = rng.next_f32_closed() * total_w;
            let mut chosen = None;
            for (i, d) in self.defs.iter().enumerate() {
                if !candidate_ok(i, d) {
                    continue;
                }
                r -= d.weight;
                if r <= 0.0 {
                    chosen = Some(i);
                    break;
                }
            }
            let Some(i) = chosen else { break };
            let d = &self.defs[i];
            out.picks.push(i);
            out.total_dps_cost += d.dps_cost;
            out.total_control_cost += d.control_cost;
            out.total_mobility_cost += d.mobility_cost;
            out.applied_mask |= 1u32 << i;
            if out.picks.len() >= MAX_ACTIVE_MODIFIERS {
                break;
            }
        }
        out
    }
}

fn parse_digit_mask(v: &str) -> u32 {
    let mut mask = 0u32;
    for c in v.chars() {
        if let Some(d) = c.to_digit(10) {
            if d < 32 {
                mask |= 1u32 << d;
            }
        }
    }
    mask
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
id=0
name=Frenzied
weight=3
dps=0.3
telegraph=red glow

id=1
name=Armored
weight=2
control=0.2
incompat=2

id=2
name=Ghostly
weight=1
mobility=0.4
tiers=45
incompat=1

id=3
name=Volatile
weight=2
dps=0.35
";

    fn registry() -> ModifierRegistry {
        let mut reg = ModifierRegistry::new();
        assert_eq!(reg.load_from_str(SAMPLE), 4);
        reg
    }

    #[test]
    fn defaults_normalize_weight_and_tiers() {
        let mut reg = ModifierRegistry::new();
        reg.load_from_str("id=7\nname=Dull\nweight=0\n");
        let d = reg.by_id(7).unwrap();
        assert_eq!(d.weight, 1.0);
        assert_eq!(d.tier_mask, u32::MAX);
    }

    #[test]
    fn digit_masks_parse() {
        let reg = registry();
        let ghostly = reg.by_id(2).unwrap();
        assert_eq!(ghostly.tier_mask, (1 << 4) | (1 << 5));
        assert_eq!(ghostly.incompat_mask, 1 << 1);
    }

    #[test]
    fn roll_is_deterministic() {
        let reg = registry();
        let a = reg.roll(1234, 2, 0.6);
        let b = reg.roll(1234, 2, 0.6);
        assert_eq!(a.picks, b.picks);
    }

    #[test]
    fn roll_respects_cost_cap() {
        let reg = registry();
        for seed in 1..64u32 {
            let set = reg.roll(seed, 2, 0.6);
            assert!(set.total_dps_cost <= 0.6 + 1e-6);
            assert!(set.total_control_cost <= 0.6 + 1e-6);
            assert!(set.total_mobility_cost <= 0.6 + 1e-6);
        }
    }

    #[test]
    fn roll_avoids_incompatible_pairs() {
        let reg = registry();
        for seed in 1..128u32 {
            let set = reg.roll(seed, 5, 1.0);
            let has = |id: i32| {
                set.picks
                    .iter()
                    .any(|&i| reg.at(i).map(|d| d.id == id).unwrap_or(false))
            };
            assert!(!(has(1) && has(2)), "incompatible pair in seed {seed}");
        }
    }

    #[test]
    fn tier_gating_filters_candidates() {
        let reg = registry();
        // Tier 0: Ghostly (tiers=45) must never appear.
        for seed in 1..64u32 {
            let set = reg.roll(seed, 0, 1.0);
            assert!(set.picks.iter().all(|&i| reg.at(i).unwrap().id != 2));
        }
    }

    #[test]
    fn zero_cap_uses_default() {
        let reg = registry();
        let set = reg.roll(77, 2, 0.0);
        assert!(set.total_dps_cost <= DEFAULT_COST_CAP + 1e-6);
    }
}
