//! Enemy difficulty: tier/archetype taxonomy, sublinear base curves,
//! relative-level multipliers and derived attribute curves.

use serde::{Deserialize, Serialize};

use crate::util::parse_kv_flat;

/// Tier identifiers in escalation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TierId {
    Normal,
    Veteran,
    Elite,
    MiniBoss,
    Boss,
    Nemesis,
}

impl TierId {
    pub const ALL: [TierId; 6] = [
        TierId::Normal,
        TierId::Veteran,
        TierId::Elite,
        TierId::MiniBoss,
        TierId::Boss,
        TierId::Nemesis,
    ];

    pub fn index(self) -> usize {
        match self {
            TierId::Normal => 0,
            TierId::Veteran => 1,
            TierId::Elite => 2,
            TierId::MiniBoss => 3,
            TierId::Boss => 4,
            TierId::Nemesis => 5,
        }
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Archetype {
    Melee,
    Ranged,
    Caster,
    EliteSupport,
    Boss,
}

impl Archetype {
    pub const ALL: [Archetype; 5] = [
        Archetype::Melee,
        Archetype::Ranged,
        Archetype::Caster,
        Archetype::EliteSupport,
        Archetype::Boss,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Archetype::Melee => "Melee",
            Archetype::Ranged => "Ranged",
            Archetype::Caster => "Caster",
            Archetype::EliteSupport => "EliteSupport",
            Archetype::Boss => "Boss",
        }
    }
}

/// Budget multipliers one tier applies on top of the base curves.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TierBudgets {
    pub hp: f32,
    pub dps: f32,
    pub control: f32,
    pub mobility: f32,
}

#[derive(Debug, Clone, Copy)]
pub struct TierDesc {
    pub id: TierId,
    pub name: &'static str,
    pub mult: TierBudgets,
}

/// Static tier table. HP strictly escalates; DPS is allowed the single
/// Nemesis dip to preserve adaptive headroom.
pub const TIERS: [TierDesc; 6] = [
    TierDesc {
        id: TierId::Normal,
        name: "Normal",
        mult: TierBudgets { hp: 1.00, dps: 1.00, control: 1.00, mobility: 1.00 },
    },
    TierDesc {
        id: TierId::Veteran,
        name: "Veteran",
        mult: TierBudgets { hp: 1.25, dps: 1.15, control: 1.10, mobility: 1.05 },
    },
    TierDesc {
        id: TierId::Elite,
        name: "Elite",
        mult: TierBudgets { hp: 1.85, dps: 1.60, control: 1.40, mobility: 1.40 },
    },
    TierDesc {
        id: TierId::MiniBoss,
        name: "MiniBoss",
        mult: TierBudgets { hp: 3.20, dps: 2.20, control: 2.30, mobility: 2.30 },
    },
    TierDesc {
        id: TierId::Boss,
        name: "Boss",
        mult: TierBudgets { hp: 8.00, dps: 3.20, control: 2.80, mobility: 2.70 },
    },
    TierDesc {
        id: TierId::Nemesis,
        name: "Nemesis",
        mult: TierBudgets { hp: 8.50, dps: 3.00, control: 3.00, mobility: 2.90 },
    },
];

pub fn tier(id: TierId) -> &'static TierDesc {
    &TIERS[id.index()]
}

/// Tier multipliers as budgets (direct copy from the table).
pub fn base_budgets(id: TierId) -> TierBudgets {
    tier(id).mult
}

/// Table authoring check: hp strictly increasing.
pub fn validate_hp_monotonic() -> bool {
    TIERS.windows(2).all(|w| w[1].mult.hp > w[0].mult.hp)
}

/// Table authoring check: dps non-decreasing with at most one dip.
pub fn validate_dps_single_dip() -> bool {
    let mut dips = 0;
    let mut prev = f32::MIN;
    for t in &TIERS {
        if t.mult.dps < prev {
            dips += 1;
        } else {
            prev = t.mult.dps;
        }
    }
    dips <= 1
}

/// Tunable ΔL parameter set; loadable from a `key=value` file.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DifficultyParams {
    pub d_def: f32,
    pub d_dmg: f32,
    pub cap_def: f32,
    pub cap_dmg: f32,
    pub u_def: f32,
    pub u_dmg: f32,
    pub u_cap_def: f32,
    pub u_cap_dmg: f32,
    pub ramp_soft: f32,
    pub dominance_threshold: i32,
    pub trivial_threshold: i32,
    pub reward_trivial_scalar: f32,
}

impl Default for DifficultyParams {
    fn default() -> Self {
        Self {
            d_def: 0.05,
            d_dmg: 0.04,
            cap_def: 0.60,
            cap_dmg: 0.55,
            u_def: 0.06,
            u_dmg: 0.05,
            u_cap_def: 2.50,
            u_cap_dmg: 2.20,
            ramp_soft: 0.30,
            dominance_threshold: 8,
            trivial_threshold: 12,
            reward_trivial_scalar: 0.15,
        }
    }
}

impl DifficultyParams {
    pub fn load_from_str(&mut self, text: &str) {
        for (key, value) in parse_kv_flat(text) {
            let Ok(v) = value.parse::<f32>() else { continue };
            match key.as_str() {
                "d_def" => self.d_def = v,
                "d_dmg" => self.d_dmg = v,
                "cap_def" => self.cap_def = v,
                "cap_dmg" => self.cap_dmg = v,
                "u_def" => self.u_def = v,
                "u_dmg" => self.u_dmg = v,
                "u_cap_def" => self.u_cap_def = v,
                "u_cap_dmg" => self.u_cap_dmg = v,
                "ramp_soft" => self.ramp_soft = v,
                "dominance_threshold" => self.dominance_threshold = v as i32,
                "trivial_threshold" => self.trivial_threshold = v as i32,
                "reward_trivial_scalar" => self.reward_trivial_scalar = v,
            _ => {}
            }
        }
    }

    pub fn load_from_file(&mut self, path: &str) -> std::io::Result<()> {
        let text = std::fs::read_to_string(path)?;
        self.load_from_str(&text);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BaseStats {
    pub hp: f32,
    pub damage: f32,
    pub defense: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FinalStats {
    pub hp: f32,
    pub damage: f32,
    pub defense: f32,
    pub hp_mult: f32,
    pub dmg_mult: f32,
    pub def_mult: f32,
}

/// Derived secondary attributes (crit / resist proxies).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DerivedAttributes {
    pub crit_chance: f32,
    pub phys_resist: f32,
    pub elem_resist: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaSeverity {
    Equal,
    Minor,
    Moderate,
    Major,
    Dominance,
    Trivial,
}

pub fn base_hp(enemy_level: i32) -> f32 {
    100.0 * (enemy_level.max(1) as f32).powf(1.15)
}

pub fn base_damage(enemy_level: i32) -> f32 {
    12.0 * (enemy_level.max(1) as f32).powf(1.08)
}

pub fn base_defense(enemy_level: i32) -> f32 {
    8.0 * (enemy_level.max(1) as f32).powf(1.05)
}

pub fn base_stats(enemy_level: i32) -> BaseStats {
    BaseStats {
        hp: base_hp(enemy_level),
        damage: base_damage(enemy_level),
        defense: base_defense(enemy_level),
    }
}

/// Difficulty engine: global params plus per-biome overrides.
#[derive(Debug, Default)]
pub struct DifficultyEngine {
    params: DifficultyParams,
    biome_params: Vec<(i32, DifficultyParams)>,
}

pub const MAX_BIOME_PARAMS: usize = 32;

impl DifficultyEngine {
    pub fn new() -> Self {
        Self {
            params: DifficultyParams::default(),
            biome_params: Vec::new(),
        }
    }

    pub fn params(&self) -> &DifficultyParams {
        &self.params
    }

    pub fn params_mut(&mut self) -> &mut DifficultyParams {
        &mut self.params
    }

    pub fn reset(&mut self) {
        self.params = DifficultyParams::default();
        self.biome_params.clear();
    }

    pub fn register_biome_params(&mut self, biome_id: i32, params: DifficultyParams) -> bool {
        if biome_id < 0 {
            return false;
        }
        if let Some(entry) = self.biome_params.iter_mut().find(|(b, _)| *b == biome_id) {
            entry.1 = params;
            return true;
        }
        if self.biome_params.len() >= MAX_BIOME_PARAMS {
            return false;
        }
        self.biome_params.push((biome_id, params));
        true
    }

    pub fn params_for_biome(&self, biome_id: i32) -> &DifficultyParams {
        self.biome_params
            .iter()
            .find(|(b, _)| *b == biome_id)
            .map(|(_, p)| p)
            .unwrap_or(&self.params)
    }

    /// ΔL multipliers for hp and damage. ΔL > 0 (over-leveled player)
    /// shrinks both with a floor of 0.05; ΔL < 0 grows both behind a soft
    /// ramp with hard caps.
    pub fn relative_multipliers(&self, player_level: i32, enemy_level: i32) -> Option<(f32, f32)> {
        if player_level < 1 || enemy_level < 1 {
            return None;
        }
        let p = &self.params;
        let dl = player_level - enemy_level;
        let (hp_mult, dmg_mult) = if dl == 0 {
            (1.0, 1.0)
        } else if dl > 0 {
            let down_hp = (dl as f32 * p.d_def).min(p.cap_def);
            let down_dmg = (dl as f32 * p.d_dmg).min(p.cap_dmg);
            ((1.0 - down_hp).max(0.05), (1.0 - down_dmg).max(0.05))
        } else {
            let adl = (-dl) as f32;
            let up_hp = (adl * p.u_def - p.ramp_soft).clamp(0.0, p.u_cap_def);
            let up_dmg = (adl * p.u_dmg - p.ramp_soft).clamp(0.0, p.u_cap_dmg);
            (1.0 + up_hp, 1.0 + up_dmg)
        };
        Some((hp_mult, dmg_mult))
    }

    /// Final stats: base curves, tier multipliers, ΔL multipliers, then the
    /// adaptive scalar (clamped >= 0.01). Defense rides the hp path.
    pub fn final_stats(
        &self,
        player_level: i32,
        enemy_level: i32,
        tier_id: TierId,
        adaptive_scalar: f32,
    ) -> Option<FinalStats> {
        self.final_stats_biome(player_level, enemy_level, tier_id, -1, adaptive_scalar)
    }

    pub fn final_stats_biome(
        &self,
        player_level: i32,
        enemy_level: i32,
        tier_id: TierId,
        biome_id: i32,
        adaptive_scalar: f32,
    ) -> Option<FinalStats> {
        let base = base_stats(enemy_level);
        let t = tier(tier_id);
        let (rel_hp, rel_dmg) = self.relative_multipliers(player_level, enemy_level)?;
        // Biome hook: overrides currently carry no extra math but select the
        // parameter set future adjustments will read.
        let _ = self.params_for_biome(biome_id);
        let adapt = adaptive_scalar.max(0.01);
        Some(FinalStats {
            hp: base.hp * t.mult.hp * rel_hp * adapt,
            damage: base.damage * t.mult.dps * rel_dmg * adapt,
            defense: base.defense * t.mult.hp * rel_hp * adapt,
            hp_mult: rel_hp * t.mult.hp,
            dmg_mult: rel_dmg * t.mult.dps,
            def_mult: rel_hp * t.mult.hp,
        })
    }

    /// Reward scalar for over-leveled kills: full up to the dominance
    /// threshold, linear down to the trivial scalar at the trivial
    /// threshold, clamped thereafter.
    pub fn reward_scalar(&self, player_level: i32, enemy_level: i32) -> f32 {
        let p = &self.params;
        let dl = player_level - enemy_level;
        if dl >= p.trivial_threshold {
            return p.reward_trivial_scalar;
        }
        if dl <= 0 || dl <= p.dominance_threshold {
            return 1.0;
        }
        let span = (p.trivial_threshold - p.dominance_threshold) as f32;
        if span <= 0.0 {
            return 1.0;
        }
        let t = ((dl - p.dominance_threshold) as f32 / span).clamp(0.0, 1.0);
        1.0 - t * (1.0 - p.reward_trivial_scalar)
    }

    pub fn classify_delta(&self, player_level: i32, enemy_level: i32) -> DeltaSeverity {
        let p = &self.params;
        let dl = player_level - enemy_level;
        if dl == 0 {
            return DeltaSeverity::Equal;
        }
        if dl > 0 {
            if dl >= p.trivial_threshold {
                return DeltaSeverity::Trivial;
            }
            if dl >= p.dominance_threshold {
                return DeltaSeverity::Dominance;
            }
            if dl >= 5 {
                return DeltaSeverity::Major;
            }
            return DeltaSeverity::Minor;
        }
        if -dl >= 8 {
            DeltaSeverity::Major
        } else if -dl >= 4 {
            DeltaSeverity::Moderate
        } else {
            DeltaSeverity::Minor
        }
    }

    /// Crit grows log-slow capped at 30%; physical resist as L^0.6 capped
    /// at 60%; elemental slightly below physical capped at 55%.
    pub fn derived_attributes(&self, enemy_level: i32, tier_id: TierId) -> DerivedAttributes {
        let t = tier(tier_id);
        let level = enemy_level.max(1) as f32;
        let crit = (0.02
            + 0.12 * ((level + 1.0).ln() / 101.0f32.ln()) * (0.5 + 0.5 * t.mult.dps))
            .min(0.30);
        let phys = (0.05
            + 0.65 * level.powf(0.60) / 100.0f32.powf(0.60) * (0.4 + 0.6 * t.mult.hp))
            .min(0.60);
        let elem = (phys * 0.92).min(0.55);
        DerivedAttributes {
            crit_chance: crit,
            phys_resist: phys,
            elem_resist: elem,
        }
    }

    /// Effective-HP time-to-kill estimate: `hp * (1 + defense/500) / dps`.
    pub fn estimate_ttk_seconds(
        &self,
        player_level: i32,
        enemy_level: i32,
        tier_id: TierId,
        biome_id: i32,
        adaptive_scalar: f32,
        player_dps: f32,
    ) -> Option<f32> {
        if player_dps <= 0.0 {
            return None;
        }
        let fs =
            self.final_stats_biome(player_level, enemy_level, tier_id, biome_id, adaptive_scalar)?;
        let defense_factor = 1.0 + fs.defense / 500.0;
        Some(fs.hp * defense_factor / player_dps)
    }
}
