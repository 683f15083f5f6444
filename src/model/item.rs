//! Static item definitions and the lookup registry.
//!
//! Definitions are immutable templates loaded from a CSV config (with an
//! optional extended tail) or from a JSON export. Runtime items reference
//! them by index; a name-hash map backs the id lookup.

use std::collections::HashMap;
use std::path::Path;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::util::locate_config;

pub const MAX_ITEM_DEFS: usize = 4096;

/// Item category codes used in config files (0..=5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemCategory {
    Misc,
    Consumable,
    Weapon,
    Armor,
    Gem,
    Material,
}

impl ItemCategory {
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => ItemCategory::Consumable,
            2 => ItemCategory::Weapon,
            3 => ItemCategory::Armor,
            4 => ItemCategory::Gem,
            5 => ItemCategory::Material,
            _ => ItemCategory::Misc,
        }
    }

    pub fn code(self) -> i32 {
        match self {
            ItemCategory::Misc => 0,
            ItemCategory::Consumable => 1,
            ItemCategory::Weapon => 2,
            ItemCategory::Armor => 3,
            ItemCategory::Gem => 4,
            ItemCategory::Material => 5,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "misc" => Some(ItemCategory::Misc),
            "consumable" => Some(ItemCategory::Consumable),
            "weapon" => Some(ItemCategory::Weapon),
            "armor" => Some(ItemCategory::Armor),
            "gem" => Some(ItemCategory::Gem),
            "material" => Some(ItemCategory::Material),
            _ => None,
        }
    }
}

/// Implicit stat block rolled into the definition itself (not affixes).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImplicitStats {
    pub strength: i32,
    pub dexterity: i32,
    pub vitality: i32,
    pub intelligence: i32,
    pub armor_flat: i32,
    pub resist_physical: i32,
    pub resist_fire: i32,
    pub resist_cold: i32,
    pub resist_lightning: i32,
    pub resist_poison: i32,
    pub resist_status: i32,
}

/// Sprite-sheet placement for the world/inventory icon.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpriteRef {
    pub sheet: String,
    pub tx: i32,
    pub ty: i32,
    pub tw: i32,
    pub th: i32,
}

/// Immutable item template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemDef {
    pub id: String,
    pub name: String,
    pub category: ItemCategory,
    pub level_req: i32,
    pub stack_max: i32,
    pub base_value: i32,
    pub base_damage_min: i32,
    pub base_damage_max: i32,
    pub base_armor: i32,
    pub sprite: SpriteRef,
    pub rarity: u8,
    pub flags: u32,
    pub implicit: ImplicitStats,
    pub set_id: i32,
    pub socket_min: i32,
    pub socket_max: i32,
}

impl ItemDef {
    /// Enforce the definition invariants: stack_max >= 1, damage ordering,
    /// socket range inside [0, 6], rarity in 0..=4.
    fn normalize(&mut self) {
        if self.stack_max < 1 {
            self.stack_max = 1;
        }
        if self.base_damage_max < self.base_damage_min {
            self.base_damage_max = self.base_damage_min;
        }
        self.socket_min = self.socket_min.clamp(0, 6);
        self.socket_max = self.socket_max.clamp(self.socket_min, 6);
        if self.rarity > 4 {
            self.rarity = 4;
        }
    }
}

/// Registry of loaded definitions with an id -> index map.
#[derive(Debug, Default)]
pub struct ItemDefRegistry {
    defs: Vec<ItemDef>,
    by_id: HashMap<String, usize>,
}

impl ItemDefRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&ItemDef> {
        self.defs.get(index)
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.by_id.get(id).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &ItemDef)> {
        self.defs.iter().enumerate()
    }

    pub fn clear(&mut self) {
        self.defs.clear();
        self.by_id.clear();
    }

    /// Insert one definition; duplicate ids and capacity overruns are
    /// rejected with a warning.
    pub fn insert(&mut self, mut def: ItemDef) -> Option<usize> {
        if self.defs.len() >= MAX_ITEM_DEFS {
            warn!("item def capacity reached ({MAX_ITEM_DEFS}), dropping '{}'", def.id);
            return None;
        }
        if self.by_id.contains_key(&def.id) {
            warn!("duplicate item def id '{}', line skipped", def.id);
            return None;
        }
        def.normalize();
        let index = self.defs.len();
        self.by_id.insert(def.id.clone(), index);
        self.defs.push(def);
        Some(index)
    }

    /// Load definitions from the CSV config format. Malformed lines are
    /// logged and skipped; returns the number of definitions added.
    pub fn load_from_cfg(&mut self, path: &str) -> std::io::Result<usize> {
        let resolved = locate_config(path).ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, format!("item defs not found: {path}"))
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
                    warn!("item defs line {}: {e}", line_no + 1);
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
                None => warn!("item defs line {}: malformed, skipped", line_no + 1),
            }
        }
        added
    }

    /// Export every definition as a JSON array.
    pub fn export_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.defs)
    }

    /// Import a JSON array of definitions (appended to the registry).
    pub fn import_json(&mut self, json: &str) -> serde_json::Result<usize> {
        let defs: Vec<ItemDef> = serde_json::from_str(json)?;
        let mut added = 0;
        for def in defs {
            if self.insert(def).is_some() {
                added += 1;
            }
        }
        Ok(added)
    }

    /// Load a JSON export from disk.
    pub fn import_json_file(&mut self, path: &Path) -> std::io::Result<usize> {
        let text = std::fs::read_to_string(path)?;
        self.import_json(&text)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }
}

fn field_i32(record: &csv::StringRecord, idx: usize) -> Option<i32> {
    record.get(idx).and_then(|s| s.parse().ok())
}

fn field_i32_or(record: &csv::StringRecord, idx: usize, default: i32) -> i32 {
    record.get(idx).and_then(|s| s.parse().ok()).unwrap_or(default)
}

fn parse_record(record: &csv::StringRecord) -> Option<ItemDef> {
    if record.len() < 14 {
        return None;
    }
    let mut def = ItemDef {
        id: record.get(0)?.to_string(),
        name: record.get(1)?.to_string(),
        category: ItemCategory::from_code(field_i32(record, 2)?),
        level_req: field_i32(record, 3)?,
        stack_max: field_i32(record, 4)?,
        base_value: field_i32(record, 5)?,
        base_damage_min: field_i32(record, 6)?,
        base_damage_max: field_i32(record, 7)?,
        base_armor: field_i32(record, 8)?,
        sprite: SpriteRef {
            sheet: record.get(9)?.to_string(),
            tx: field_i32(record, 10)?,
            ty: field_i32(record, 11)?,
            tw: field_i32(record, 12)?,
            th: field_i32(record, 13)?,
        },
        rarity: field_i32_or(record, 14, 0).clamp(0, 4) as u8,
        flags: field_i32_or(record, 15, 0) as u32,
        implicit: ImplicitStats {
            strength: field_i32_or(record, 16, 0),
            dexterity: field_i32_or(record, 17, 0),
            vitality: field_i32_or(record, 18, 0),
            intelligence: field_i32_or(record, 19, 0),
            armor_flat: field_i32_or(record, 20, 0),
            resist_physical: field_i32_or(record, 21, 0),
            resist_fire: field_i32_or(record, 22, 0),
            resist_cold: field_i32_or(record, 23, 0),
            resist_lightning: field_i32_or(record, 24, 0),
            resist_poison: field_i32_or(record, 25, 0),
            resist_status: field_i32_or(record, 26, 0),
        },
        set_id: field_i32_or(record, 27, -1),
        socket_min: field_i32_or(record, 28, 0),
        socket_max: field_i32_or(record, 29, 0),
    };
    if def.id.is_empty() {
        return None;
    }
    def.normalize();
    Some(def)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
# id,name,cat,lvl,stack,value,dmin,dmax,armor,sheet,tx,ty,tw,th,rarity
long_sword,Long Sword,2,1,1,25,4,9,0,items.png,0,0,16,16,1,0,0,0,0,0,0,0,0,0,0,0,0,-1,0,2
arcane_dust,Arcane Dust,5,1,50,3,0,0,0,items.png,2,0,16,16
bad_line,only,three
";

    #[test]
    fn loads_core_and_extended_lines() {
        let mut reg = ItemDefRegistry::new();
        let added = reg.load_from_str(SAMPLE);
        assert_eq!(added, 2);
        let sword = reg.get(reg.index_of("long_sword").unwrap()).unwrap();
        assert_eq!(sword.category, ItemCategory::Weapon);
        assert_eq!(sword.socket_max, 2);
        assert_eq!(sword.rarity, 1);
        let dust = reg.get(reg.index_of("arcane_dust").unwrap()).unwrap();
        assert_eq!(dust.category, ItemCategory::Material);
        assert_eq!(dust.stack_max, 50);
        assert_eq!(dust.socket_max, 0);
    }

    #[test]
    fn duplicate_ids_are_skipped() {
        let mut reg = ItemDefRegistry::new();
        let twice = format!("{SAMPLE}{}", "long_sword,Copy,2,1,1,1,1,1,0,s.png,0,0,8,8\n");
        assert_eq!(reg.load_from_str(&twice), 2);
    }

    #[test]
    fn invariants_are_clamped() {
        let mut reg = ItemDefRegistry::new();
        reg.load_from_str("weird,Weird,2,1,0,1,9,4,0,s.png,0,0,8,8,9,0,0,0,0,0,0,0,0,0,0,0,0,-1,5,2\n");
        let def = reg.get(0).unwrap();
        assert_eq!(def.stack_max, 1);
        assert!(def.base_damage_max >= def.base_damage_min);
        assert!(def.socket_max >= def.socket_min);
        assert_eq!(def.rarity, 4);
    }

    #[test]
    fn json_round_trip() {
        let mut reg = ItemDefRegistry::new();
        reg.load_from_str(SAMPLE);
        let json = reg.export_json().unwrap();
        let mut reg2 = ItemDefRegistry::new();
        assert_eq!(reg2.import_json(&json).unwrap(), 2);
        assert_eq!(reg2.index_of("arcane_dust"), reg.index_of("arcane_dust"));
    }
}
