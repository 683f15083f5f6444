//! Weighted loot tables: `id,rolls_min,rolls_max,entry;entry;...` where each
//! entry is `item_id,weight,qmin,qmax[,rmin[,rmax]]`.

use std::collections::HashMap;

use log::warn;

use crate::model::item::ItemDefRegistry;
use crate::rng::Lcg;
use crate::util::locate_config;

pub const MAX_LOOT_TABLES: usize = 256;
pub const MAX_LOOT_ENTRIES: usize = 32;

#[derive(Debug, Clone, Copy)]
pub struct LootEntry {
    pub item_def_index: usize,
    pub weight: u32,
    pub qty_min: i32,
    pub qty_max: i32,
    /// Rarity sub-range; `None` means "use the definition's rarity".
    pub rarity_range: Option<(u8, u8)>,
}

#[derive(Debug, Clone)]
pub struct LootTableDef {
    pub id: String,
    pub rolls_min: i32,
    pub rolls_max: i32,
    pub entries: Vec<LootEntry>,
}

/// One produced drop before instance spawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LootDrop {
    pub item_def_index: usize,
    pub quantity: i32,
    /// Sampled rarity when the entry declared a sub-range.
    pub rarity: Option<u8>,
}

#[derive(Debug, Default)]
pub struct LootTables {
    tables: Vec<LootTableDef>,
    by_id: HashMap<String, usize>,
}

impl LootTables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&LootTableDef> {
        self.tables.get(index)
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.by_id.get(id).copied()
    }

    pub fn clear(&mut self) {
        self.tables.clear();
        self.by_id.clear();
    }

    pub fn load_from_cfg(&mut self, path: &str, defs: &ItemDefRegistry) -> std::io::Result<usize> {
        let resolved = locate_config(path).ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, format!("loot tables not found: {path}"))
        })?;
        let text = std::fs::read_to_string(&resolved)?;
        Ok(self.load_from_str(&text, defs))
    }

    /// Parse tables from text. Entries referencing unknown items or with
    /// zero weight are dropped; tables with no surviving entries are skipped.
    pub fn load_from_str(&mut self, text: &str, defs: &ItemDefRegistry) -> usize {
        let mut added = 0;
        for (line_no, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match parse_line(line, defs) {
                Some(table) => {
                    if self.tables.len() >= MAX_LOOT_TABLES {
                        warn!("loot table capacity reached ({MAX_LOOT_TABLES})");
                        break;
                    }
                    if self.by_id.contains_key(&table.id) {
                        warn!("duplicate loot table id '{}', line skipped", table.id);
                        continue;
                    }
                    self.by_id.insert(table.id.clone(), self.tables.len());
                    self.tables.push(table);
                    added += 1;
                }
                None => warn!("loot tables line {}: malformed or empty, skipped", line_no + 1),
            }
        }
        added
    }

    /// Roll a table, sampling rarity for entries that declare a sub-range.
    /// `rarity_sampler` is the governor hook `(rng, rmin, rmax) -> rarity`.
    pub fn roll(
        &self,
        table_index: usize,
        rng: &mut Lcg,
        max_out: usize,
        mut rarity_sampler: impl FnMut(&mut Lcg, u8, u8) -> u8,
    ) -> Vec<LootDrop> {
        let mut out = Vec::new();
        let Some(table) = self.tables.get(table_index) else {
            return out;
        };
        if max_out == 0 {
            return out;
        }
        let rolls_span = table.rolls_max - table.rolls_min + 1;
        let rolls = table.rolls_min
            + if rolls_span > 0 {
                rng.range(rolls_span as u32) as i32
            } else {
                0
            };
        for _ in 0..rolls {
            let total_w: u32 = table.entries.iter().map(|e| e.weight).sum();
            if total_w == 0 {
                break;
            }
            let pick = rng.range(total_w);
            let mut acc = 0u32;
            let mut chosen = None;
            for e in &table.entries {
                acc += e.weight;
                if pick < acc {
                    chosen = Some(e);
                    break;
                }
            }
            let Some(entry) = chosen else { continue };
            let qty_span = entry.qty_max - entry.qty_min + 1;
            let qty = entry.qty_min
                + if qty_span > 0 {
                    rng.range(qty_span as u32) as i32
                } else {
                    0
                };
            let rarity = entry
                .rarity_range
                .map(|(rmin, rmax)| rarity_sampler(rng, rmin, rmax));
            if out.len() < max_out {
                out.push(LootDrop {
                    item_def_index: entry.item_def_index,
                    quantity: qty,
                    rarity,
                });
            }
        }
        out
    }
}

fn parse_line(line: &str, defs: &ItemDefRegistry) -> Option<LootTableDef> {
    let mut fields = line.splitn(4, ',');
    let id = fields.next()?.trim();
    if id.is_empty() {
        return None;
    }
    let rolls_min: i32 = fields.next()?.trim().parse().ok()?;
    let rolls_max: i32 = fields.next()?.trim().parse().ok()?;
    let rolls_min = rolls_min.max(0);
    let rolls_max = rolls_max.max(rolls_min);
    let tail = fields.next()?;

    let mut entries = Vec::new();
    for seg in tail.split(';') {
        let seg = seg.trim();
        if seg.is_empty() {
            continue;
        }
        if entries.len() >= MAX_LOOT_ENTRIES {
            warn!("loot table '{id}': entry capacity reached ({MAX_LOOT_ENTRIES})");
            break;
        }
        let parts: Vec<&str> = seg.split(',').map(str::trim).collect();
        if parts.len() < 4 {
            warn!("loot table '{id}': malformed entry '{seg}'");
            continue;
        }
        let Some(item_def_index) = defs.index_of(parts[0]) else {
            warn!("loot table '{id}': unknown item '{}'", parts[0]);
            continue;
        };
        let weight: i32 = parts[1].parse().unwrap_or(0);
        if weight <= 0 {
            continue;
        }
        let qty_min: i32 = parts[2].parse().unwrap_or(1);
        let qty_max: i32 = parts[3].parse().unwrap_or(qty_min).max(qty_min);
        let rarity_range = match (parts.get(4), parts.get(5)) {
            (Some(rmin), rmax) => {
                let rmin: i32 = rmin.parse().unwrap_or(-1);
                if rmin < 0 {
                    None
                } else {
                    let rmax: i32 = rmax.and_then(|s| s.parse().ok()).unwrap_or(rmin);
                    let rmin = rmin.min(4) as u8;
                    let rmax = rmax.clamp(rmin as i32, 4) as u8;
                    Some((rmin, rmax))
                }
            }
            _ => None,
        };
        entries.push(LootEntry {
            item_def_index,
            weight: weight as u32,
            qty_min,
            qty_max,
            rarity_range,
        });
    }
    if entries.is_empty() {
        return None;
    }
    Some(LootTableDef {
        id: id.to_string(),
        rolls_min,
        rolls_max,
        entries,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defs() -> ItemDefRegistry {
        let mut reg = ItemDefRegistry::new();
        reg.load_from_str(
            "long_sword,Long Sword,2,1,1,25,4,9,0,s.png,0,0,16,16\n\
             iron_sword,Iron Sword,2,1,1,15,3,7,0,s.png,1,0,16,16\n\
             arcane_dust,Arcane Dust,5,1,50,3,0,0,0,s.png,2,0,16,16\n",
        );
        reg
    }

    #[test]
    fn parses_entries_with_rarity_range() {
        let defs = defs();
        let mut tables = LootTables::new();
        let n = tables.load_from_str(
            "swords,1,2,long_sword,10,1,1,1,3;iron_sword,5,1,1;unknown_item,5,1,1\n",
            &defs,
        );
        assert_eq!(n, 1);
        let t = tables.get(0).unwrap();
        assert_eq!(t.entries.len(), 2);
        assert_eq!(t.entries[0].rarity_range, Some((1, 3)));
        assert_eq!(t.entries[1].rarity_range, None);
    }

    #[test]
    fn table_without_entries_is_skipped() {
        let defs = defs();
        let mut tables = LootTables::new();
        assert_eq!(tables.load_from_str("empty,1,1,unknown,5,1,1\n", &defs), 0);
    }

    #[test]
    fn roll_produces_within_bounds() {
        let defs = defs();
        let mut tables = LootTables::new();
        tables.load_from_str("mats,2,4,arcane_dust,10,3,7\n", &defs);
        let mut rng = Lcg::new(123);
        let drops = tables.roll(0, &mut rng, 8, |_, rmin, _| rmin);
        assert!((2..=4).contains(&(drops.len() as i32)));
        for d in &drops {
            assert!((3..=7).contains(&d.quantity));
            assert_eq!(d.rarity, None);
        }
    }

    #[test]
    fn roll_is_deterministic() {
        let defs = defs();
        let mut tables = LootTables::new();
        tables.load_from_str("swords,1,3,long_sword,10,1,1,0,4;iron_sword,5,1,2\n", &defs);
        let mut a = Lcg::new(777);
        let mut b = Lcg::new(777);
        let da = tables.roll(0, &mut a, 8, |rng, rmin, rmax| {
            (rmin as u32 + rng.range((rmax - rmin + 1) as u32)) as u8
        });
        let db = tables.roll(0, &mut b, 8, |rng, rmin, rmax| {
            (rmin as u32 + rng.range((rmax - rmin + 1) as u32)) as u8
        });
        assert_eq!(da, db);
        assert_eq!(a.state(), b.state());
    }
}
