//! Built-in save components. Each component owns one section of the save
//! payload: a self-describing little-endian byte image with varuint counts.
//!
//! Item records are length-prefixed and parsed until the record slice is
//! exhausted, so fields appended later (the durability pair, then the
//! enchant level) read back from older saves with zero defaults.

use std::collections::HashMap;
use std::io::{Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt};
use log::warn;

use crate::inventory::entries::EntryLabels;
use crate::inventory::query::SavedSearch;
use crate::inventory::tags::{TagFlags, TagRule};
use crate::items::pool::{ItemInstance, MAX_SOCKETS};
use crate::rng::fnv1a64;
use crate::save::codec::{read_varuint, read_varuint64, write_varuint, write_varuint64};
use crate::save::replay::ReplayEvent;
use crate::save::state::{BuffState, GameState, SkillState, VendorItem};
use crate::save::{SaveError, SaveResult};

/// Component ids; the id doubles as the dirty-mask bit, so ids stay below
/// 32. Inventory instances precede player state because the player reader
/// resolves its equipment GUID against the loaded pool.
pub mod component_id {
    pub const WORLD_META: u16 = 0;
    pub const INVENTORY: u16 = 1;
    pub const INV_ENTRIES: u16 = 2;
    pub const INV_TAGS: u16 = 3;
    pub const INV_TAG_RULES: u16 = 4;
    pub const INV_SAVED_SEARCHES: u16 = 5;
    pub const PLAYER: u16 = 6;
    pub const SKILLS: u16 = 7;
    pub const BUFFS: u16 = 8;
    pub const VENDOR: u16 = 9;
    pub const STRINGS: u16 = 10;
    pub const REPLAY: u16 = 11;
}

pub const MAX_COMPONENT_ID: u16 = 31;

/// Record-level diff bookkeeping for the inventory component; owned by the
/// save manager and threaded through writes.
#[derive(Debug, Default)]
pub struct ComponentWriteMetrics {
    pub records_reused: u32,
    pub records_rewritten: u32,
    pub record_snapshot: HashMap<u64, u64>,
}

impl ComponentWriteMetrics {
    pub fn reset_counters(&mut self) {
        self.records_reused = 0;
        self.records_rewritten = 0;
    }
}

/// One serializable section of the save payload.
pub trait SaveComponent {
    fn id(&self) -> u16;
    fn name(&self) -> &'static str;
    fn write(
        &self,
        state: &GameState,
        metrics: &mut ComponentWriteMetrics,
        out: &mut Vec<u8>,
    ) -> SaveResult<()>;
    fn read(&self, state: &mut GameState, data: &[u8], version: u32) -> SaveResult<()>;
}

fn read_err(name: &'static str) -> impl Fn(std::io::Error) -> SaveError {
    move |e| SaveError::ComponentRead(format!("{name}: {e}"))
}

fn read_bytes(cur: &mut Cursor<&[u8]>, len: usize, name: &'static str) -> SaveResult<Vec<u8>> {
    let mut buf = vec![0u8; len];
    cur.read_exact(&mut buf).map_err(read_err(name))?;
    Ok(buf)
}

fn read_short_string(cur: &mut Cursor<&[u8]>, name: &'static str) -> SaveResult<String> {
    let len = cur.read_u8().map_err(read_err(name))? as usize;
    let bytes = read_bytes(cur, len, name)?;
    String::from_utf8(bytes).map_err(|_| SaveError::ComponentRead(format!("{name}: bad utf8")))
}

fn write_short_string(out: &mut Vec<u8>, s: &str) {
    let bytes = s.as_bytes();
    let len = bytes.len().min(255);
    out.push(len as u8);
    out.extend_from_slice(&bytes[..len]);
}

// ---- world meta ----

pub struct WorldMetaComponent;

impl SaveComponent for WorldMetaComponent {
    fn id(&self) -> u16 {
        component_id::WORLD_META
    }

    fn name(&self) -> &'static str {
        "world_meta"
    }

    fn write(
        &self,
        state: &GameState,
        _metrics: &mut ComponentWriteMetrics,
        out: &mut Vec<u8>,
    ) -> SaveResult<()> {
        out.extend_from_slice(&state.world.world_seed.to_le_bytes());
        out.extend_from_slice(&state.world.region_id.to_le_bytes());
        out.extend_from_slice(&state.world.biome_id.to_le_bytes());
        write_varuint64(out, state.world.playtime_ms);
        Ok(())
    }

    fn read(&self, state: &mut GameState, data: &[u8], _version: u32) -> SaveResult<()> {
        let mut cur = Cursor::new(data);
        let err = read_err(self.name());
        state.world.world_seed = cur.read_u32::<LittleEndian>().map_err(&err)?;
        state.world.region_id = cur.read_u32::<LittleEndian>().map_err(&err)?;
        state.world.biome_id = cur.read_u32::<LittleEndian>().map_err(&err)?;
        state.world.playtime_ms = read_varuint64(&mut cur).map_err(&err)?;
        Ok(())
    }
}

// ---- item instances ----

pub struct InventoryComponent;

fn write_item_record(out: &mut Vec<u8>, item: &ItemInstance) {
    write_varuint(out, item.def_index as u32);
    write_varuint64(out, item.quantity.max(0) as u64);
    write_varuint(out, item.rarity as u32);
    write_varuint(out, item.item_level.max(0) as u32);
    write_varuint(out, item.quality.max(0) as u32);
    out.extend_from_slice(&item.x.to_le_bytes());
    out.extend_from_slice(&item.y.to_le_bytes());
    out.extend_from_slice(&item.prefix_index.to_le_bytes());
    out.extend_from_slice(&item.prefix_value.to_le_bytes());
    out.extend_from_slice(&item.suffix_index.to_le_bytes());
    out.extend_from_slice(&item.suffix_value.to_le_bytes());
    out.extend_from_slice(&item.guid.to_le_bytes());
    out.extend_from_slice(&item.equip_hash_chain.to_le_bytes());
    write_varuint(out, item.socket_count.max(0) as u32);
    for s in 0..item.socket_count.min(MAX_SOCKETS as i32).max(0) as usize {
        out.extend_from_slice(&item.sockets[s].to_le_bytes());
    }
    out.extend_from_slice(&item.stored_affix_index.to_le_bytes());
    out.extend_from_slice(&item.stored_affix_value.to_le_bytes());
    out.push(item.stored_affix_used as u8);
    // Extended tail; readers tolerate its absence.
    out.extend_from_slice(&(item.durability_cur.clamp(0, u16::MAX as i32) as u16).to_le_bytes());
    out.extend_from_slice(&(item.durability_max.clamp(0, u16::MAX as i32) as u16).to_le_bytes());
    out.extend_from_slice(&(item.enchant_level.clamp(0, u16::MAX as i32) as u16).to_le_bytes());
}

fn read_item_record(record: &[u8]) -> SaveResult<ItemInstance> {
    const NAME: &str = "inventory";
    let mut cur = Cursor::new(record);
    let err = read_err(NAME);
    let def_index = read_varuint(&mut cur).map_err(&err)? as usize;
    let quantity = read_varuint64(&mut cur).map_err(&err)? as i32;
    let rarity = read_varuint(&mut cur).map_err(&err)?.min(4) as u8;
    let item_level = read_varuint(&mut cur).map_err(&err)? as i32;
    let quality = read_varuint(&mut cur).map_err(&err)? as i32;
    let x = cur.read_f32::<LittleEndian>().map_err(&err)?;
    let y = cur.read_f32::<LittleEndian>().map_err(&err)?;
    let prefix_index = cur.read_i32::<LittleEndian>().map_err(&err)?;
    let prefix_value = cur.read_i32::<LittleEndian>().map_err(&err)?;
    let suffix_index = cur.read_i32::<LittleEndian>().map_err(&err)?;
    let suffix_value = cur.read_i32::<LittleEndian>().map_err(&err)?;
    let guid = cur.read_u64::<LittleEndian>().map_err(&err)?;
    let equip_hash_chain = cur.read_u64::<LittleEndian>().map_err(&err)?;
    let socket_count = read_varuint(&mut cur).map_err(&err)?.min(MAX_SOCKETS as u32) as i32;
    let mut sockets = [-1i32; MAX_SOCKETS];
    for slot in sockets.iter_mut().take(socket_count as usize) {
        *slot = cur.read_i32::<LittleEndian>().map_err(&err)?;
    }
    let stored_affix_index = cur.read_i32::<LittleEndian>().map_err(&err)?;
    let stored_affix_value = cur.read_i32::<LittleEndian>().map_err(&err)?;
    let stored_affix_used = cur.read_u8().map_err(&err)? != 0;

    // Remaining-size heuristic for the appended fields.
    let remaining = record.len() as u64 - cur.position();
    let (durability_cur, durability_max) = if remaining >= 4 {
        (
            cur.read_u16::<LittleEndian>().map_err(&err)? as i32,
            cur.read_u16::<LittleEndian>().map_err(&err)? as i32,
        )
    } else {
        (0, 0)
    };
    let remaining = record.len() as u64 - cur.position();
    let enchant_level = if remaining >= 2 {
        cur.read_u16::<LittleEndian>().map_err(&err)? as i32
    } else {
        0
    };

    Ok(ItemInstance {
        def_index,
        quantity,
        x,
        y,
        life_ms: 0.0,
        rarity,
        item_level: item_level.max(1),
        quality: quality.clamp(0, 20),
        enchant_level,
        prefix_index,
        prefix_value,
        suffix_index,
        suffix_value,
        socket_count,
        sockets,
        durability_cur,
        durability_max,
        fractured: durability_max > 0 && durability_cur == 0,
        hidden_filter: false,
        guid,
        equip_hash_chain,
        stored_affix_index,
        stored_affix_value,
        stored_affix_used,
    })
}

impl SaveComponent for InventoryComponent {
    fn id(&self) -> u16 {
        component_id::INVENTORY
    }

    fn name(&self) -> &'static str {
        "inventory"
    }

    fn write(
        &self,
        state: &GameState,
        metrics: &mut ComponentWriteMetrics,
        out: &mut Vec<u8>,
    ) -> SaveResult<()> {
        let items: Vec<&ItemInstance> = state.pool.iter().map(|(_, it)| it).collect();
        write_varuint(out, items.len() as u32);
        let mut snapshot = HashMap::with_capacity(items.len());
        for item in items {
            let mut record = Vec::with_capacity(96);
            write_item_record(&mut record, item);
            let hash = fnv1a64(&record, 0);
            match metrics.record_snapshot.get(&item.guid) {
                Some(&prev) if prev == hash => metrics.records_reused += 1,
                _ => metrics.records_rewritten += 1,
            }
            snapshot.insert(item.guid, hash);
            write_varuint(out, record.len() as u32);
            out.extend_from_slice(&record);
        }
        metrics.record_snapshot = snapshot;
        Ok(())
    }

    fn read(&self, state: &mut GameState, data: &[u8], _version: u32) -> SaveResult<()> {
        let mut cur = Cursor::new(data);
        let err = read_err(self.name());
        let count = read_varuint(&mut cur).map_err(&err)?;
        state.pool.clear();
        for _ in 0..count {
            let len = read_varuint(&mut cur).map_err(&err)? as usize;
            let record = read_bytes(&mut cur, len, self.name())?;
            let item = read_item_record(&record)?;
            state
                .pool
                .restore(item)
                .map_err(|e| SaveError::ComponentRead(format!("inventory: {e}")))?;
        }
        Ok(())
    }
}

// ---- aggregate entries ----

pub struct InvEntriesComponent;

impl SaveComponent for InvEntriesComponent {
    fn id(&self) -> u16 {
        component_id::INV_ENTRIES
    }

    fn name(&self) -> &'static str {
        "inv_entries"
    }

    fn write(
        &self,
        state: &GameState,
        _metrics: &mut ComponentWriteMetrics,
        out: &mut Vec<u8>,
    ) -> SaveResult<()> {
        let entries: Vec<_> = state.entries.iter().collect();
        write_varuint(out, entries.len() as u32);
        for (def, qty, labels) in entries {
            write_varuint(out, def as u32);
            write_varuint64(out, qty);
            out.push(labels.bits() as u8);
        }
        Ok(())
    }

    fn read(&self, state: &mut GameState, data: &[u8], _version: u32) -> SaveResult<()> {
        let mut cur = Cursor::new(data);
        let err = read_err(self.name());
        let count = read_varuint(&mut cur).map_err(&err)?;
        state.entries.reset();
        for _ in 0..count {
            let def = read_varuint(&mut cur).map_err(&err)? as usize;
            let qty = read_varuint64(&mut cur).map_err(&err)?;
            let labels = EntryLabels::from_bits_truncate(cur.read_u8().map_err(&err)? as u32);
            state.entries.install(def, qty, labels);
        }
        state.entries.clear_dirty();
        Ok(())
    }
}

// ---- tags ----

pub struct InvTagsComponent;

impl SaveComponent for InvTagsComponent {
    fn id(&self) -> u16 {
        component_id::INV_TAGS
    }

    fn name(&self) -> &'static str {
        "inv_tags"
    }

    fn write(
        &self,
        state: &GameState,
        _metrics: &mut ComponentWriteMetrics,
        out: &mut Vec<u8>,
    ) -> SaveResult<()> {
        let mut rows: Vec<_> = state.tags.iter().collect();
        rows.sort_by_key(|(def, _, _)| *def);
        write_varuint(out, rows.len() as u32);
        for (def, flags, tags) in rows {
            write_varuint(out, def as u32);
            out.push(flags.bits() as u8);
            out.push(tags.len() as u8);
            for tag in tags {
                write_short_string(out, tag);
            }
        }
        Ok(())
    }

    fn read(&self, state: &mut GameState, data: &[u8], _version: u32) -> SaveResult<()> {
        let mut cur = Cursor::new(data);
        let err = read_err(self.name());
        let count = read_varuint(&mut cur).map_err(&err)?;
        state.tags.clear();
        for _ in 0..count {
            let def = read_varuint(&mut cur).map_err(&err)? as usize;
            let flags = TagFlags::from_bits_truncate(cur.read_u8().map_err(&err)? as u32);
            let tag_count = cur.read_u8().map_err(&err)? as usize;
            let mut tags = Vec::with_capacity(tag_count);
            for _ in 0..tag_count {
                tags.push(read_short_string(&mut cur, self.name())?);
            }
            state.tags.install(def, flags, tags);
        }
        Ok(())
    }
}

// ---- tag rules ----

pub struct InvTagRulesComponent;

impl SaveComponent for InvTagRulesComponent {
    fn id(&self) -> u16 {
        component_id::INV_TAG_RULES
    }

    fn name(&self) -> &'static str {
        "inv_tag_rules"
    }

    fn write(
        &self,
        state: &GameState,
        _metrics: &mut ComponentWriteMetrics,
        out: &mut Vec<u8>,
    ) -> SaveResult<()> {
        out.extend_from_slice(&(state.tag_rules.len() as u16).to_le_bytes());
        for rule in state.tag_rules.iter() {
            out.push(rule.min_rarity);
            out.push(rule.max_rarity);
            out.extend_from_slice(&rule.category_mask.to_le_bytes());
            out.extend_from_slice(&rule.accent_color_rgba.to_le_bytes());
            write_short_string(out, &rule.tag);
        }
        Ok(())
    }

    fn read(&self, state: &mut GameState, data: &[u8], _version: u32) -> SaveResult<()> {
        let mut cur = Cursor::new(data);
        let err = read_err(self.name());
        let count = cur.read_u16::<LittleEndian>().map_err(&err)?;
        state.tag_rules.clear();
        for _ in 0..count {
            let min_rarity = cur.read_u8().map_err(&err)?;
            let max_rarity = cur.read_u8().map_err(&err)?;
            let category_mask = cur.read_u32::<LittleEndian>().map_err(&err)?;
            let accent_color_rgba = cur.read_u32::<LittleEndian>().map_err(&err)?;
            let tag = read_short_string(&mut cur, self.name())?;
            state.tag_rules.install(TagRule {
                min_rarity,
                max_rarity,
                category_mask,
                tag,
                accent_color_rgba,
            });
        }
        state.tag_rules.invalidate_accent_cache();
        Ok(())
    }
}

// ---- saved searches ----

pub struct InvSavedSearchesComponent;

impl SaveComponent for InvSavedSearchesComponent {
    fn id(&self) -> u16 {
        component_id::INV_SAVED_SEARCHES
    }

    fn name(&self) -> &'static str {
        "inv_saved_searches"
    }

    fn write(
        &self,
        state: &GameState,
        _metrics: &mut ComponentWriteMetrics,
        out: &mut Vec<u8>,
    ) -> SaveResult<()> {
        out.extend_from_slice(&(state.query.saved_count() as u32).to_le_bytes());
        for s in (0..state.query.saved_count()).filter_map(|i| state.query.saved_at(i)) {
            write_short_string(out, &s.name);
            write_short_string(out, &s.query);
            write_short_string(out, &s.sort_keys);
        }
        Ok(())
    }

    fn read(&self, state: &mut GameState, data: &[u8], _version: u32) -> SaveResult<()> {
        let mut cur = Cursor::new(data);
        let err = read_err(self.name());
        let count = cur.read_u32::<LittleEndian>().map_err(&err)?;
        state.query.clear_saved();
        for _ in 0..count {
            let name = read_short_string(&mut cur, self.name())?;
            let query = read_short_string(&mut cur, self.name())?;
            let sort_keys = read_short_string(&mut cur, self.name())?;
            state.query.install_saved(SavedSearch {
                name,
                query,
                sort_keys,
            });
        }
        Ok(())
    }
}

// ---- player ----

pub struct PlayerComponent;

impl SaveComponent for PlayerComponent {
    fn id(&self) -> u16 {
        component_id::PLAYER
    }

    fn name(&self) -> &'static str {
        "player"
    }

    fn write(
        &self,
        state: &GameState,
        _metrics: &mut ComponentWriteMetrics,
        out: &mut Vec<u8>,
    ) -> SaveResult<()> {
        let p = &state.player;
        write_varuint(out, p.level.max(0) as u32);
        write_varuint64(out, p.xp);
        out.extend_from_slice(&p.gold.to_le_bytes());
        out.extend_from_slice(&p.health.to_le_bytes());
        out.extend_from_slice(&p.mana.to_le_bytes());
        out.extend_from_slice(&p.x.to_le_bytes());
        out.extend_from_slice(&p.y.to_le_bytes());
        out.extend_from_slice(&p.equipped_weapon_guid.to_le_bytes());
        Ok(())
    }

    fn read(&self, state: &mut GameState, data: &[u8], _version: u32) -> SaveResult<()> {
        let mut cur = Cursor::new(data);
        let err = read_err(self.name());
        state.player.level = read_varuint(&mut cur).map_err(&err)? as i32;
        state.player.xp = read_varuint64(&mut cur).map_err(&err)?;
        state.player.gold = cur.read_i64::<LittleEndian>().map_err(&err)?;
        state.player.health = cur.read_i32::<LittleEndian>().map_err(&err)?;
        state.player.mana = cur.read_i32::<LittleEndian>().map_err(&err)?;
        state.player.x = cur.read_f32::<LittleEndian>().map_err(&err)?;
        state.player.y = cur.read_f32::<LittleEndian>().map_err(&err)?;
        state.player.equipped_weapon_guid = cur.read_u64::<LittleEndian>().map_err(&err)?;
        // Inventory loads first (lower component id); resolve the GUID now.
        if state.player.equipped_weapon_guid != 0 {
            let guid = state.player.equipped_weapon_guid;
            let found = state.pool.iter().any(|(_, it)| it.guid == guid);
            if !found {
                warn!("equipped weapon guid {guid:#x} not present after load");
                state.player.equipped_weapon_guid = 0;
            }
        }
        Ok(())
    }
}

// ---- skills ----

pub struct SkillsComponent;

impl SaveComponent for SkillsComponent {
    fn id(&self) -> u16 {
        component_id::SKILLS
    }

    fn name(&self) -> &'static str {
        "skills"
    }

    fn write(
        &self,
        state: &GameState,
        _metrics: &mut ComponentWriteMetrics,
        out: &mut Vec<u8>,
    ) -> SaveResult<()> {
        write_varuint(out, state.skills.len() as u32);
        for s in &state.skills {
            out.extend_from_slice(&s.id.to_le_bytes());
            write_varuint(out, s.rank);
            out.extend_from_slice(&s.cooldown_ms.to_le_bytes());
        }
        Ok(())
    }

    fn read(&self, state: &mut GameState, data: &[u8], _version: u32) -> SaveResult<()> {
        let mut cur = Cursor::new(data);
        let err = read_err(self.name());
        let count = read_varuint(&mut cur).map_err(&err)?;
        state.skills.clear();
        for _ in 0..count {
            state.skills.push(SkillState {
                id: cur.read_u32::<LittleEndian>().map_err(&err)?,
                rank: read_varuint(&mut cur).map_err(&err)?,
                cooldown_ms: cur.read_f32::<LittleEndian>().map_err(&err)?,
            });
        }
        Ok(())
    }
}

// ---- buffs ----

pub struct BuffsComponent;

impl SaveComponent for BuffsComponent {
    fn id(&self) -> u16 {
        component_id::BUFFS
    }

    fn name(&self) -> &'static str {
        "buffs"
    }

    fn write(
        &self,
        state: &GameState,
        _metrics: &mut ComponentWriteMetrics,
        out: &mut Vec<u8>,
    ) -> SaveResult<()> {
        write_varuint(out, state.buffs.len() as u32);
        for b in &state.buffs {
            out.extend_from_slice(&b.id.to_le_bytes());
            write_varuint(out, b.remaining_ms);
            out.extend_from_slice(&b.magnitude.to_le_bytes());
        }
        Ok(())
    }

    fn read(&self, state: &mut GameState, data: &[u8], _version: u32) -> SaveResult<()> {
        let mut cur = Cursor::new(data);
        let err = read_err(self.name());
        let count = read_varuint(&mut cur).map_err(&err)?;
        state.buffs.clear();
        for _ in 0..count {
            state.buffs.push(BuffState {
                id: cur.read_u32::<LittleEndian>().map_err(&err)?,
                remaining_ms: read_varuint(&mut cur).map_err(&err)?,
                magnitude: cur.read_i32::<LittleEndian>().map_err(&err)?,
            });
        }
        Ok(())
    }
}

// ---- vendor ----

pub struct VendorComponent;

impl SaveComponent for VendorComponent {
    fn id(&self) -> u16 {
        component_id::VENDOR
    }

    fn name(&self) -> &'static str {
        "vendor"
    }

    fn write(
        &self,
        state: &GameState,
        _metrics: &mut ComponentWriteMetrics,
        out: &mut Vec<u8>,
    ) -> SaveResult<()> {
        out.extend_from_slice(&state.vendor.seed.to_le_bytes());
        out.extend_from_slice(&state.vendor.restock_ms.to_le_bytes());
        write_varuint(out, state.vendor.stock.len() as u32);
        for item in &state.vendor.stock {
            out.extend_from_slice(&item.def_index.to_le_bytes());
            out.extend_from_slice(&item.quantity.to_le_bytes());
            out.extend_from_slice(&item.price.to_le_bytes());
        }
        Ok(())
    }

    fn read(&self, state: &mut GameState, data: &[u8], _version: u32) -> SaveResult<()> {
        let mut cur = Cursor::new(data);
        let err = read_err(self.name());
        state.vendor.seed = cur.read_u32::<LittleEndian>().map_err(&err)?;
        state.vendor.restock_ms = cur.read_u32::<LittleEndian>().map_err(&err)?;
        let count = read_varuint(&mut cur).map_err(&err)?;
        state.vendor.stock.clear();
        for _ in 0..count {
            state.vendor.stock.push(VendorItem {
                def_index: cur.read_u32::<LittleEndian>().map_err(&err)?,
                quantity: cur.read_u32::<LittleEndian>().map_err(&err)?,
                price: cur.read_u32::<LittleEndian>().map_err(&err)?,
            });
        }
        Ok(())
    }
}

// ---- interned strings ----

pub struct StringsComponent;

impl SaveComponent for StringsComponent {
    fn id(&self) -> u16 {
        component_id::STRINGS
    }

    fn name(&self) -> &'static str {
        "strings"
    }

    fn write(
        &self,
        state: &GameState,
        _metrics: &mut ComponentWriteMetrics,
        out: &mut Vec<u8>,
    ) -> SaveResult<()> {
        write_varuint(out, state.strings.len() as u32);
        for s in state.strings.iter() {
            write_varuint(out, s.len() as u32);
            out.extend_from_slice(s.as_bytes());
        }
        Ok(())
    }

    fn read(&self, state: &mut GameState, data: &[u8], _version: u32) -> SaveResult<()> {
        let mut cur = Cursor::new(data);
        let err = read_err(self.name());
        let count = read_varuint(&mut cur).map_err(&err)?;
        let mut strings = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let len = read_varuint(&mut cur).map_err(&err)? as usize;
            let bytes = read_bytes(&mut cur, len, self.name())?;
            strings.push(
                String::from_utf8(bytes)
                    .map_err(|_| SaveError::ComponentRead("strings: bad utf8".into()))?,
            );
        }
        state.strings.install(strings);
        Ok(())
    }
}

// ---- replay ----

pub struct ReplayComponent;

impl SaveComponent for ReplayComponent {
    fn id(&self) -> u16 {
        component_id::REPLAY
    }

    fn name(&self) -> &'static str {
        "replay"
    }

    fn write(
        &self,
        state: &GameState,
        _metrics: &mut ComponentWriteMetrics,
        out: &mut Vec<u8>,
    ) -> SaveResult<()> {
        out.extend_from_slice(&(state.replay.len() as u32).to_le_bytes());
        out.extend_from_slice(&state.replay.event_bytes());
        out.extend_from_slice(&state.replay.hash());
        Ok(())
    }

    fn read(&self, state: &mut GameState, data: &[u8], version: u32) -> SaveResult<()> {
        if version < 8 {
            return Ok(());
        }
        let mut cur = Cursor::new(data);
        let err = read_err(self.name());
        let count = cur.read_u32::<LittleEndian>().map_err(&err)?;
        let mut events = Vec::with_capacity(count as usize);
        for _ in 0..count {
            events.push(ReplayEvent {
                frame: cur.read_u32::<LittleEndian>().map_err(&err)?,
                action_code: cur.read_u32::<LittleEndian>().map_err(&err)?,
                value: cur.read_i32::<LittleEndian>().map_err(&err)?,
            });
        }
        let mut stored = [0u8; 32];
        cur.read_exact(&mut stored).map_err(&err)?;
        state.replay.install(events);
        if state.replay.hash() != stored {
            return Err(SaveError::ComponentRead("replay: hash mismatch".into()));
        }
        Ok(())
    }
}

/// The standard component set, in registration order.
pub fn core_components() -> Vec<Box<dyn SaveComponent>> {
    vec![
        Box::new(WorldMetaComponent),
        Box::new(InventoryComponent),
        Box::new(InvEntriesComponent),
        Box::new(InvTagsComponent),
        Box::new(InvTagRulesComponent),
        Box::new(InvSavedSearchesComponent),
        Box::new(PlayerComponent),
        Box::new(SkillsComponent),
        Box::new(BuffsComponent),
        Box::new(VendorComponent),
        Box::new(StringsComponent),
        Box::new(ReplayComponent),
    ]
}
