//! Per-definition user tags, lock/favorite flags and declaration-ordered
//! auto-tag rules with accent color caching.

use std::collections::HashMap;

use bitflags::bitflags;

use crate::model::item::{ItemCategory, ItemDef};

pub const MAX_TAGS_PER_DEF: usize = 4;
pub const MAX_TAG_LEN: usize = 23;
pub const MAX_TAG_RULES: usize = 32;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TagFlags: u32 {
        const FAVORITE = 0x1;
        const LOCKED = 0x2;
    }
}

#[derive(Debug, Clone, Default)]
struct TagEntry {
    flags: u32,
    tags: Vec<String>,
}

/// Tag store keyed by definition index.
#[derive(Debug, Default)]
pub struct TagStore {
    entries: HashMap<usize, TagEntry>,
}

impl TagStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn set_flags(&mut self, def_index: usize, flags: TagFlags) {
        self.entries.entry(def_index).or_default().flags = flags.bits();
    }

    pub fn flags(&self, def_index: usize) -> TagFlags {
        self.entries
            .get(&def_index)
            .map(|e| TagFlags::from_bits_truncate(e.flags))
            .unwrap_or(TagFlags::empty())
    }

    /// Locked or favorite definitions are protected from salvage.
    pub fn can_salvage(&self, def_index: usize) -> bool {
        let flags = self.flags(def_index);
        !flags.intersects(TagFlags::FAVORITE | TagFlags::LOCKED)
    }

    /// Add a tag; rejects empty/overlong tags, duplicates and overflow past
    /// the per-definition limit.
    pub fn add_tag(&mut self, def_index: usize, tag: &str) -> bool {
        if tag.is_empty() || tag.len() > MAX_TAG_LEN {
            return false;
        }
        let entry = self.entries.entry(def_index).or_default();
        if entry.tags.iter().any(|t| t.eq_ignore_ascii_case(tag)) {
            return false;
        }
        if entry.tags.len() >= MAX_TAGS_PER_DEF {
            return false;
        }
        entry.tags.push(tag.to_string());
        true
    }

    pub fn remove_tag(&mut self, def_index: usize, tag: &str) -> bool {
        let Some(entry) = self.entries.get_mut(&def_index) else {
            return false;
        };
        let before = entry.tags.len();
        entry.tags.retain(|t| !t.eq_ignore_ascii_case(tag));
        entry.tags.len() != before
    }

    pub fn has_tag(&self, def_index: usize, tag: &str) -> bool {
        self.entries
            .get(&def_index)
            .map(|e| e.tags.iter().any(|t| t.eq_ignore_ascii_case(tag)))
            .unwrap_or(false)
    }

    pub fn tags(&self, def_index: usize) -> Vec<&str> {
        self.entries
            .get(&def_index)
            .map(|e| e.tags.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, TagFlags, &[String])> {
        self.entries
            .iter()
            .map(|(&def, e)| (def, TagFlags::from_bits_truncate(e.flags), e.tags.as_slice()))
    }

    pub(crate) fn install(&mut self, def_index: usize, flags: TagFlags, tags: Vec<String>) {
        self.entries.insert(
            def_index,
            TagEntry {
                flags: flags.bits(),
                tags,
            },
        );
    }
}

/// One auto-tag rule. `max_rarity` of 0xFF leaves the upper bound open; a
/// zero category mask matches every category.
#[derive(Debug, Clone)]
pub struct TagRule {
    pub min_rarity: u8,
    pub max_rarity: u8,
    pub category_mask: u32,
    pub tag: String,
    pub accent_color_rgba: u32,
}

impl TagRule {
    fn matches(&self, def: &ItemDef) -> bool {
        if def.rarity < self.min_rarity {
            return false;
        }
        if self.max_rarity != 0xFF && def.rarity > self.max_rarity {
            return false;
        }
        if self.category_mask != 0 && self.category_mask & (1u32 << def.category.code()) == 0 {
            return false;
        }
        true
    }
}

/// Declaration-ordered rule set with a per-definition accent color cache;
/// the first rule contributing a non-zero color wins.
#[derive(Debug, Default)]
pub struct TagRuleSet {
    rules: Vec<TagRule>,
    accent_cache: HashMap<usize, u32>,
}

impl TagRuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&TagRule> {
        self.rules.get(index)
    }

    pub fn clear(&mut self) {
        self.rules.clear();
        self.accent_cache.clear();
    }

    pub fn add(
        &mut self,
        min_rarity: u8,
        max_rarity: u8,
        category_mask: u32,
        tag: &str,
        accent_color_rgba: u32,
    ) -> bool {
        if self.rules.len() >= MAX_TAG_RULES || tag.is_empty() || tag.len() > MAX_TAG_LEN {
            return false;
        }
        let max_rarity = if max_rarity == 0 { 0xFF } else { max_rarity };
        self.rules.push(TagRule {
            min_rarity,
            max_rarity,
            category_mask,
            tag: tag.to_string(),
            accent_color_rgba,
        });
        true
    }

    pub(crate) fn install(&mut self, rule: TagRule) -> bool {
        if self.rules.len() >= MAX_TAG_RULES {
            return false;
        }
        self.rules.push(rule);
        true
    }

    /// Evaluate all rules for a picked-up definition, adding matching tags
    /// and caching the first non-zero accent color.
    pub fn apply_on_pickup(&mut self, def_index: usize, def: &ItemDef, tags: &mut TagStore) {
        for rule in &self.rules {
            if !rule.matches(def) {
                continue;
            }
            if !rule.tag.is_empty() {
                tags.add_tag(def_index, &rule.tag);
            }
            if rule.accent_color_rgba != 0 {
                self.accent_cache.entry(def_index).or_insert(rule.accent_color_rgba);
            }
        }
    }

    pub fn accent_color(&self, def_index: usize) -> u32 {
        self.accent_cache.get(&def_index).copied().unwrap_or(0)
    }

    pub fn invalidate_accent_cache(&mut self) {
        self.accent_cache.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &TagRule> {
        self.rules.iter()
    }
}

/// Category bit helper for rule masks.
pub fn category_bit(category: ItemCategory) -> u32 {
    1u32 << category.code()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::item::ItemDefRegistry;

    fn defs() -> ItemDefRegistry {
        let mut reg = ItemDefRegistry::new();
        reg.load_from_str(
            "long_sword,Long Sword,2,1,1,25,4,9,0,s.png,0,0,16,16,3\n\
             arcane_dust,Arcane Dust,5,1,50,3,0,0,0,s.png,2,0,16,16,0\n",
        );
        reg
    }

    #[test]
    fn flags_gate_salvage() {
        let mut tags = TagStore::new();
        assert!(tags.can_salvage(0));
        tags.set_flags(0, TagFlags::LOCKED);
        assert!(!tags.can_salvage(0));
        tags.set_flags(0, TagFlags::FAVORITE);
        assert!(!tags.can_salvage(0));
        tags.set_flags(0, TagFlags::empty());
        assert!(tags.can_salvage(0));
    }

    #[test]
    fn tag_limits_enforced() {
        let mut tags = TagStore::new();
        assert!(!tags.add_tag(0, ""));
        assert!(!tags.add_tag(0, &"x".repeat(MAX_TAG_LEN + 1)));
        for i in 0..MAX_TAGS_PER_DEF {
            assert!(tags.add_tag(0, &format!("tag{i}")));
        }
        assert!(!tags.add_tag(0, "overflow"));
        // Duplicates (case-insensitive) rejected.
        assert!(!tags.add_tag(0, "TAG0"));
        assert!(tags.remove_tag(0, "tag0"));
        assert!(tags.add_tag(0, "replacement"));
    }

    #[test]
    fn rules_apply_in_declaration_order() {
        let defs = defs();
        let mut tags = TagStore::new();
        let mut rules = TagRuleSet::new();
        rules.add(2, 0xFF, 0, "valuable", 0xFF00_00FF);
        rules.add(0, 0xFF, category_bit(ItemCategory::Weapon), "weapon", 0x00FF_00FF);
        let sword = defs.get(0).unwrap();
        rules.apply_on_pickup(0, sword, &mut tags);
        assert!(tags.has_tag(0, "valuable"));
        assert!(tags.has_tag(0, "weapon"));
        // First rule with a non-zero color wins.
        assert_eq!(rules.accent_color(0), 0xFF00_00FF);
    }

    #[test]
    fn rule_rarity_and_category_gates() {
        let defs = defs();
        let mut tags = TagStore::new();
        let mut rules = TagRuleSet::new();
        rules.add(1, 2, 0, "mid", 0);
        rules.add(0, 0xFF, category_bit(ItemCategory::Material), "mat", 0x1111_1111);
        let sword = defs.get(0).unwrap(); // rarity 3 weapon
        let dust = defs.get(1).unwrap(); // rarity 0 material
        rules.apply_on_pickup(0, sword, &mut tags);
        rules.apply_on_pickup(1, dust, &mut tags);
        assert!(!tags.has_tag(0, "mid")); // rarity 3 above max 2
        assert!(!tags.has_tag(0, "mat"));
        assert!(tags.has_tag(1, "mat"));
        assert_eq!(rules.accent_color(1), 0x1111_1111);
        assert_eq!(rules.accent_color(0), 0);
    }

    #[test]
    fn zero_max_rarity_means_open() {
        let defs = defs();
        let mut tags = TagStore::new();
        let mut rules = TagRuleSet::new();
        rules.add(0, 0, 0, "all", 0);
        rules.apply_on_pickup(0, defs.get(0).unwrap(), &mut tags);
        assert!(tags.has_tag(0, "all"));
    }

    #[test]
    fn rule_capacity_bounded() {
        let mut rules = TagRuleSet::new();
        for i in 0..MAX_TAG_RULES {
            assert!(rules.add(0, 0xFF, 0, &format!("r{i}"), 0));
        }
        assert!(!rules.add(0, 0xFF, 0, "overflow", 0));
    }
}
