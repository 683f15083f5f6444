//! Affix definitions: typed prefix/suffix stat modifiers with per-rarity
//! selection weights, plus the deterministic roll helpers.

use std::collections::HashMap;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::rng::Lcg;
use crate::util::locate_config;

pub const MAX_AFFIXES: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AffixType {
    Prefix,
    Suffix,
}

/// Target stat of an affix. Unknown config strings map to `None` and the
/// line is retained (the affix still rolls, it just feeds no stat).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AffixStat {
    None,
    DamageFlat,
    AgilityFlat,
    StrengthFlat,
    DexterityFlat,
    VitalityFlat,
    IntelligenceFlat,
    ArmorFlat,
    ResistPhysical,
    ResistFire,
    ResistCold,
    ResistLightning,
    ResistPoison,
    ResistStatus,
    BlockChance,
    BlockValue,
    PhysConvFirePct,
    PhysConvFrostPct,
    PhysConvArcanePct,
    GuardRecoveryPct,
    ThornsPercent,
    ThornsCap,
}

impl AffixStat {
    fn parse(s: &str) -> Self {
        match s {
            "damage_flat" => AffixStat::DamageFlat,
            "agility_flat" => AffixStat::AgilityFlat,
            "strength_flat" => AffixStat::StrengthFlat,
            "dexterity_flat" => AffixStat::DexterityFlat,
            "vitality_flat" => AffixStat::VitalityFlat,
            "intelligence_flat" => AffixStat::IntelligenceFlat,
            "armor_flat" => AffixStat::ArmorFlat,
            "resist_physical" => AffixStat::ResistPhysical,
            "resist_fire" => AffixStat::ResistFire,
            "resist_cold" => AffixStat::ResistCold,
            "resist_lightning" => AffixStat::ResistLightning,
            "resist_poison" => AffixStat::ResistPoison,
            "resist_status" => AffixStat::ResistStatus,
            "block_chance" => AffixStat::BlockChance,
            "block_value" => AffixStat::BlockValue,
            "phys_conv_fire_pct" => AffixStat::PhysConvFirePct,
            "phys_conv_frost_pct" => AffixStat::PhysConvFrostPct,
            "phys_conv_arcane_pct" => AffixStat::PhysConvArcanePct,
            "guard_recovery_pct" => AffixStat::GuardRecoveryPct,
            "thorns_percent" => AffixStat::ThornsPercent,
            "thorns_cap" => AffixStat::ThornsCap,
            _ => AffixStat::None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AffixDef {
    pub id: String,
    pub kind: AffixType,
    pub stat: AffixStat,
    pub min_value: i32,
    pub max_value: i32,
    /// Selection weight per rarity tier 0..=4; 0 disables at that rarity.
    pub weight_per_rarity: [u32; 5],
}

#[derive(Debug, Default)]
pub struct AffixRegistry {
    defs: Vec<AffixDef>,
    by_id: HashMap<String, usize>,
}

impl AffixRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&AffixDef> {
        self.defs.get(index)
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.by_id.get(id).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &AffixDef)> {
        self.defs.iter().enumerate()
    }

    pub fn clear(&mut self) {
        self.defs.clear();
        self.by_id.clear();
    }

    pub fn insert(&mut self, mut def: AffixDef) -> Option<usize> {
        if self.defs.len() >= MAX_AFFIXES {
            warn!("affix capacity reached ({MAX_AFFIXES}), dropping '{}'", def.id);
            return None;
        }
        if def.max_value < def.min_value {
            def.max_value = def.min_value;
        }
        let index = self.defs.len();
        self.by_id.insert(def.id.clone(), index);
        self.defs.push(def);
        Some(index)
    }

    /// Load the affix config. Two line formats are accepted and detected on
    /// the first field: `TYPE,id,stat,min,max,w0..w4` or
    /// `id,0|1,stat,min,max,w0..w4`. Returns the number added.
    pub fn load_from_cfg(&mut self, path: &str) -> std::io::Result<usize> {
        let resolved = locate_config(path).ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, format!("affixes not found: {path}"))
        })?;
        let text = std::fs::read_to_string(&resolved)?;
        Ok(self.load_from_str(&text))
    }

    pub fn load_from_str(&mut self, text: &str) -> usize {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .comment(Some(b'#'))
            .trim(csv::Trim::All)
            .from_reader(text.as_bytes());
        let mut added = 0;
        for (line_no, record) in reader.records().enumerate() {
            let record = match record {
                Ok(r) => r,
                Err(e) => {
                    warn!("affixes line {}: {e}", line_no + 1);
                    continue;
                }
            };
            if record.len() == 0 || (record.len() == 1 && record[0].is_empty()) {
                continue;
            }
            match parse_record(&record) {
                Some(def) => {
                    if self.insert(def).is_some() {
                        added += 1;
                    }
                }
                None => warn!("affixes line {}: malformed, skipped", line_no + 1),
            }
        }
        added
    }

    /// JSON export of the whole registry (tooling surface).
    pub fn export_json(&self) -> serde_json::Result<String> {
        #[derive(Serialize)]
        struct Row<'a> {
            id: &'a str,
            #[serde(rename = "type")]
            kind: u8,
            stat: AffixStat,
            min: i32,
            max: i32,
            w: [u32; 5],
        }
        let rows: Vec<Row> = self
            .defs
            .iter()
            .map(|d| Row {
                id: &d.id,
                kind: match d.kind {
                    AffixType::Prefix => 0,
                    AffixType::Suffix => 1,
                },
                stat: d.stat,
                min: d.min_value,
                max: d.max_value,
                w: d.weight_per_rarity,
            })
            .collect();
        serde_json::to_string(&rows)
    }

    /// Weighted pick among same-type affixes enabled at `rarity`.
    /// Returns `None` when the total weight is zero.
    pub fn roll(&self, kind: AffixType, rarity: u8, rng: &mut Lcg) -> Option<usize> {
        if rarity > 4 {
            return None;
        }
        let total: u32 = self
            .defs
            .iter()
            .filter(|d| d.kind == kind)
            .map(|d| d.weight_per_rarity[rarity as usize])
            .sum();
        if total == 0 {
            return None;
        }
        let pick = rng.range(total);
        let mut acc = 0u32;
        for (i, d) in self.defs.iter().enumerate() {
            if d.kind != kind {
                continue;
            }
            let w = d.weight_per_rarity[rarity as usize];
            if w == 0 {
                continue;
            }
            acc += w;
            if pick < acc {
                return Some(i);
            }
        }
        None
    }

    /// Uniform value roll in `[min, max]`.
    pub fn roll_value(&self, affix_index: usize, rng: &mut Lcg) -> i32 {
        let Some(d) = self.defs.get(affix_index) else {
            return -1;
        };
        let span = d.max_value - d.min_value + 1;
        if span <= 0 {
            return d.min_value;
        }
        d.min_value + rng.range(span as u32) as i32
    }

    /// Quality-scaled value roll. A scalar above 1 biases toward the
    /// ceiling via the polynomial approximation of `u^(1/q)`:
    /// `y = u * (1 + (1 - exp) * (1 - u))` for exp in [0.25, 1].
    pub fn roll_value_scaled(&self, affix_index: usize, rng: &mut Lcg, quality_scalar: f32) -> i32 {
        let Some(d) = self.defs.get(affix_index) else {
            return -1;
        };
        let scalar = quality_scalar.max(0.0);
        let span = d.max_value - d.min_value + 1;
        if span <= 0 {
            return d.min_value;
        }
        let exp = if scalar <= 1.0 { 1.0 } else { 1.0 / scalar };
        let u = rng.next_unit_f32();
        let y = if (0.25..=1.0).contains(&exp) {
            u * (1.0 + (1.0 - exp) * (1.0 - u))
        } else {
            u
        };
        let mut offset = (y * span as f32) as i32;
        if offset >= span {
            offset = span - 1;
        }
        d.min_value + offset
    }
}

fn parse_record(record: &csv::StringRecord) -> Option<AffixDef> {
    if record.len() < 10 {
        return None;
    }
    // Format A leads with the type word, format B with the id; the tail
    // (stat, min, max, five weights) is identical.
    let first = record.get(0)?;
    let (kind, id) = match first {
        "PREFIX" => (AffixType::Prefix, record.get(1)?.to_string()),
        "SUFFIX" => (AffixType::Suffix, record.get(1)?.to_string()),
        _ => {
            let kind = if record.get(1)? == "1" {
                AffixType::Suffix
            } else {
                AffixType::Prefix
            };
            (kind, first.to_string())
        }
    };
    let num = |idx: usize| -> Option<i32> { record.get(idx).and_then(|s| s.parse().ok()) };
    let weight = |idx: usize| -> u32 { num(idx).unwrap_or(0).max(0) as u32 };
    Some(AffixDef {
        id,
        kind,
        stat: AffixStat::parse(record.get(2)?),
        min_value: num(3)?,
        max_value: num(4)?,
        weight_per_rarity: [weight(5), weight(6), weight(7), weight(8), weight(9)],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
PREFIX,sharp,damage_flat,1,5,10,8,6,4,2
SUFFIX,of_agility,agility_flat,1,4,10,8,6,4,2
swift,0,agility_flat,2,6,5,5,5,5,5
of_embers,1,resist_fire,1,3,0,4,4,4,4
odd,1,mystery_stat,1,2,1,1,1,1,1
";

    fn registry() -> AffixRegistry {
        let mut reg = AffixRegistry::new();
        assert_eq!(reg.load_from_str(SAMPLE), 5);
        reg
    }

    #[test]
    fn both_formats_parse() {
        let reg = registry();
        assert_eq!(reg.get(reg.index_of("sharp").unwrap()).unwrap().kind, AffixType::Prefix);
        assert_eq!(reg.get(reg.index_of("swift").unwrap()).unwrap().kind, AffixType::Prefix);
        assert_eq!(
            reg.get(reg.index_of("of_embers").unwrap()).unwrap().kind,
            AffixType::Suffix
        );
    }

    #[test]
    fn unknown_stat_maps_to_none() {
        let reg = registry();
        assert_eq!(reg.get(reg.index_of("odd").unwrap()).unwrap().stat, AffixStat::None);
    }

    #[test]
    fn roll_respects_type_and_disabled_weights() {
        let reg = registry();
        let embers = reg.index_of("of_embers").unwrap();
        let mut rng = Lcg::new(42);
        // of_embers has weight 0 at rarity 0, so suffix rolls there can only
        // pick the other suffixes.
        for _ in 0..32 {
            let idx = reg.roll(AffixType::Suffix, 0, &mut rng).unwrap();
            assert_ne!(idx, embers);
        }
    }

    #[test]
    fn roll_is_deterministic() {
        let reg = registry();
        let mut a = Lcg::new(777);
        let mut b = Lcg::new(777);
        for _ in 0..16 {
            assert_eq!(
                reg.roll(AffixType::Prefix, 2, &mut a),
                reg.roll(AffixType::Prefix, 2, &mut b)
            );
        }
    }

    #[test]
    fn value_roll_stays_in_bounds() {
        let reg = registry();
        let sharp = reg.index_of("sharp").unwrap();
        let mut rng = Lcg::new(9);
        for _ in 0..100 {
            let v = reg.roll_value(sharp, &mut rng);
            assert!((1..=5).contains(&v));
        }
    }

    #[test]
    fn scaled_roll_biases_upward() {
        let reg = registry();
        let sharp = reg.index_of("sharp").unwrap();
        let mut plain = Lcg::new(1234);
        let mut scaled = Lcg::new(1234);
        let n = 500;
        let sum_plain: i32 = (0..n).map(|_| reg.roll_value_scaled(sharp, &mut plain, 1.0)).sum();
        let sum_scaled: i32 = (0..n).map(|_| reg.roll_value_scaled(sharp, &mut scaled, 3.0)).sum();
        assert!(sum_scaled > sum_plain);
    }

    #[test]
    fn export_json_shape() {
        let reg = registry();
        let json = reg.export_json().unwrap();
        assert!(json.contains("\"id\":\"sharp\""));
        assert!(json.contains("\"w\":[10,8,6,4,2]"));
    }
}
