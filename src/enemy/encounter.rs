//! Encounter templates and deterministic composition.
//!
//! Templates are parsed from blank-line-separated `key=value` blocks;
//! composition uses a xorshift32 stream seeded from the encounter seed so a
//! given `(template, seed)` pair always yields the same unit list.

use serde::{Deserialize, Serialize};

use crate::rng::XorShift32;
use crate::util::parse_kv_blocks;

pub const MAX_ENCOUNTER_TEMPLATES: usize = 64;
pub const MAX_ENCOUNTER_UNITS: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncounterType {
    Swarm,
    Mixed,
    ChampionPack,
    BossRoom,
}

impl EncounterType {
    fn parse(s: &str) -> Self {
        match s {
            "mixed" => EncounterType::Mixed,
            "champion_pack" => EncounterType::ChampionPack,
            "boss_room" => EncounterType::BossRoom,
            _ => EncounterType::Swarm,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncounterTemplate {
    pub id: i32,
    pub name: String,
    pub encounter_type: EncounterType,
    pub min_count: i32,
    pub max_count: i32,
    pub boss: bool,
    pub support_min: i32,
    pub support_max: i32,
    pub elite_spacing: i32,
    pub elite_chance: f32,
}

impl Default for EncounterTemplate {
    fn default() -> Self {
        Self {
            id: 0,
            name: String::new(),
            encounter_type: EncounterType::Swarm,
            min_count: 0,
            max_count: 0,
            boss: false,
            support_min: 0,
            support_max: 0,
            elite_spacing: 3,
            elite_chance: 0.15,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncounterUnit {
    pub enemy_type_id: i32,
    pub level: i32,
    pub is_elite: bool,
    pub is_support: bool,
}

/// Composition output: up to 64 units plus aggregate flags.
#[derive(Debug, Clone, Default)]
pub struct EncounterComposition {
    pub template_id: i32,
    pub units: Vec<EncounterUnit>,
    pub elite_count: i32,
    pub support_count: i32,
    pub boss_present: bool,
}

#[derive(Debug, Default)]
pub struct EncounterTemplates {
    templates: Vec<EncounterTemplate>,
}

impl EncounterTemplates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    pub fn at(&self, index: usize) -> Option<&EncounterTemplate> {
        self.templates.get(index)
    }

    pub fn by_id(&self, id: i32) -> Option<&EncounterTemplate> {
        self.templates.iter().find(|t| t.id == id)
    }

    pub fn clear(&mut self) {
        self.templates.clear();
    }

    pub fn insert(&mut self, template: EncounterTemplate) -> bool {
        if self.templates.len() >= MAX_ENCOUNTER_TEMPLATES || template.name.is_empty() {
            return false;
        }
        self.templates.push(template);
        true
    }

    pub fn load_from_file(&mut self, path: &str) -> std::io::Result<usize> {
        let text = std::fs::read_to_string(path)?;
        Ok(self.load_from_str(&text))
    }

    /// Parse templates from block text; returns the count loaded.
    pub fn load_from_str(&mut self, text: &str) -> usize {
        self.templates.clear();
        for block in parse_kv_blocks(text) {
            let mut t = EncounterTemplate::default();
            if let Some(v) = block.get_i32("id") {
                t.id = v;
            }
            if let Some(v) = block.get("name") {
                t.name = v.to_string();
            }
            if let Some(v) = block.get("type") {
                t.encounter_type = EncounterType::parse(v);
            }
            if let Some(v) = block.get_i32("min") {
                t.min_count = v;
            }
            if let Some(v) = block.get_i32("max") {
                t.max_count = v;
            }
            if let Some(v) = block.get_i32("boss") {
                t.boss = v != 0;
            }
            if let Some(v) = block.get_i32("support_min") {
                t.support_min = v;
            }
            if let Some(v) = block.get_i32("support_max") {
                t.support_max = v;
            }
            if let Some(v) = block.get_i32("elite_spacing") {
                t.elite_spacing = v;
            }
            if let Some(v) = block.get_f32("elite_chance") {
                t.elite_chance = v;
            }
            self.insert(t);
        }
        self.templates.len()
    }

    /// Compose an encounter deterministically from `(template, seed)`.
    /// Unit levels align to the difficulty rating; enemy type resolution
    /// happens later in integration.
    pub fn compose(
        &self,
        template_id: i32,
        _player_level: i32,
        difficulty_rating: i32,
        _biome_id: i32,
        seed: u32,
    ) -> Option<EncounterComposition> {
        let t = self.by_id(template_id)?;
        let mut out = EncounterComposition {
            template_id,
            ..Default::default()
        };
        let mut rng = XorShift32::new(seed, 0xA53);
        let span = if t.max_count > t.min_count {
            t.max_count - t.min_count + 1
        } else {
            1
        };
        let mut count = t.min_count + rng.range(span);
        if count < t.min_count {
            count = t.min_count;
        }
        if count > t.max_count {
            count = t.max_count;
        }
        let mut next_elite_slot = if t.elite_spacing > 0 { t.elite_spacing } else { 3 };
        let spacing = if t.elite_spacing > 0 { t.elite_spacing } else { 3 };
        for i in 0..count.min(MAX_ENCOUNTER_UNITS as i32) {
            let mut unit = EncounterUnit {
                enemy_type_id: 0,
                level: difficulty_rating,
                is_elite: false,
                is_support: false,
            };
            if t.boss && i == 0 {
                unit.is_elite = true;
                out.boss_present = true;
            } else if i == next_elite_slot {
                if rng.next_f32() < t.elite_chance {
                    unit.is_elite = true;
                    out.elite_count += 1;
                    next_elite_slot = i + spacing;
                } else {
                    next_elite_slot = i + 1;
                }
            }
            out.units.push(unit);
        }
        if t.boss && t.support_max > 0 {
            let sup_span = if t.support_max > t.support_min {
                t.support_max - t.support_min + 1
            } else {
                1
            };
            let sup = t.support_min + rng.range(sup_span);
            for _ in 0..sup {
                if out.units.len() >= MAX_ENCOUNTER_UNITS {
                    break;
                }
                out.units.push(EncounterUnit {
                    enemy_type_id: 0,
                    level: difficulty_rating,
                    is_elite: false,
                    is_support: true,
                });
                out.support_count += 1;
            }
        }
        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
id=0
name=Rat Swarm
type=swarm
min=6
max=8
elite_spacing=3
elite_chance=0.5

id=3
name=Throne Room
type=boss_room
min=1
max=1
boss=1
support_min=2
support_max=4
";

    fn templates() -> EncounterTemplates {
        let mut t = EncounterTemplates::new();
        assert_eq!(t.load_from_str(SAMPLE), 2);
        t
    }

    #[test]
    fn parser_applies_defaults() {
        let t = templates();
        let swarm = t.by_id(0).unwrap();
        assert_eq!(swarm.encounter_type, EncounterType::Swarm);
        assert_eq!(swarm.elite_spacing, 3);
        let boss = t.by_id(3).unwrap();
        assert!(boss.boss);
        assert_eq!(boss.elite_chance, 0.15);
    }

    #[test]
    fn composition_count_in_template_bounds() {
        let t = templates();
        let c = t.compose(0, 10, 7, 1, 1234).unwrap();
        let base_units = c.units.iter().filter(|u| !u.is_support).count() as i32;
        assert!((6..=8).contains(&base_units));
        assert!(c.units.iter().all(|u| u.level == 7));
    }

    #[test]
    fn composition_is_deterministic() {
        let t = templates();
        let a = t.compose(0, 10, 5, 1, 999).unwrap();
        let b = t.compose(0, 10, 5, 1, 999).unwrap();
        assert_eq!(a.units, b.units);
        assert_eq!(a.elite_count, b.elite_count);
    }

    #[test]
    fn boss_template_marks_first_unit_and_adds_support() {
        let t = templates();
        let c = t.compose(3, 10, 9, 1, 42).unwrap();
        assert!(c.boss_present);
        assert!(c.units[0].is_elite);
        assert!((2..=4).contains(&c.support_count));
        let supports = c.units.iter().filter(|u| u.is_support).count() as i32;
        assert_eq!(supports, c.support_count);
    }

    #[test]
    fn zero_seed_still_composes() {
        let t = templates();
        assert!(t.compose(0, 10, 5, 1, 0).is_some());
    }

    #[test]
    fn unknown_template_is_none() {
        let t = templates();
        assert!(t.compose(99, 10, 5, 1, 1).is_none());
    }
}
