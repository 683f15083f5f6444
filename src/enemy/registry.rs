//! Live enemy registry: a fixed array of registered enemies with
//! generational ids, position queries, damage application and compaction.

use crate::enemy::integration::Enemy;

pub const MAX_REGISTERED_ENEMIES: usize = 256;

/// Damage typing for `apply_damage`; physical is reduced by armor, the
/// elemental types by the matching resistance factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DamageType {
    Physical,
    Fire,
    Cold,
    Lightning,
    Poison,
}

/// Elemental resistance factors carried per registered enemy.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ResistProfile {
    pub fire: f32,
    pub cold: f32,
    pub lightning: f32,
    pub poison: f32,
}

#[derive(Debug, Clone)]
pub struct RegistryEntry {
    pub enemy_id: i32,
    pub room_id: i32,
    pub encounter_id: i32,
    pub position: (f32, f32),
    pub enemy: Enemy,
    pub resists: ResistProfile,
    pub hp: f32,
    pub alive: bool,
}

/// Outcome of a damage application.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DamageOutcome {
    NotFound,
    Applied { remaining_hp: f32 },
    Killed,
}

#[derive(Debug, Default)]
pub struct EnemyRegistry {
    entries: Vec<RegistryEntry>,
    next_enemy_id: i32,
}

impl EnemyRegistry {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            next_enemy_id: 1,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn alive_count(&self) -> usize {
        self.entries.iter().filter(|e| e.alive).count()
    }

    pub fn get(&self, enemy_id: i32) -> Option<&RegistryEntry> {
        self.entries
            .iter()
            .find(|e| e.enemy_id == enemy_id && e.alive)
    }

    /// Register a spawned enemy; returns its generational id or `None` when
    /// the registry is full.
    pub fn register(
        &mut self,
        room_id: i32,
        encounter_id: i32,
        position: (f32, f32),
        enemy: Enemy,
        resists: ResistProfile,
    ) -> Option<i32> {
        if self.entries.len() >= MAX_REGISTERED_ENEMIES {
            return None;
        }
        let enemy_id = self.next_enemy_id;
        self.next_enemy_id += 1;
        let hp = enemy.final_hp;
        self.entries.push(RegistryEntry {
            enemy_id,
            room_id,
            encounter_id,
            position,
            enemy,
            resists,
            hp,
            alive: true,
        });
        Some(enemy_id)
    }

    pub fn update_position(&mut self, enemy_id: i32, position: (f32, f32)) {
        if let Some(e) = self
            .entries
            .iter_mut()
            .find(|e| e.enemy_id == enemy_id && e.alive)
        {
            e.position = position;
        }
    }

    /// Nearest living enemy within `max_distance` (linear scan).
    pub fn find_nearest(&self, position: (f32, f32), max_distance: f32) -> Option<i32> {
        let mut best: Option<(f32, i32)> = None;
        for e in self.entries.iter().filter(|e| e.alive) {
            let dx = position.0 - e.position.0;
            let dy = position.1 - e.position.1;
            let dist = (dx * dx + dy * dy).sqrt();
            if dist <= max_distance && best.map(|(d, _)| dist < d).unwrap_or(true) {
                best = Some((dist, e.enemy_id));
            }
        }
        best.map(|(_, id)| id)
    }

    /// First living enemy within `tolerance` of the position.
    pub fn find_at_position(&self, position: (f32, f32), tolerance: f32) -> Option<i32> {
        self.entries
            .iter()
            .filter(|e| e.alive)
            .find(|e| {
                let dx = position.0 - e.position.0;
                let dy = position.1 - e.position.1;
                (dx * dx + dy * dy).sqrt() <= tolerance
            })
            .map(|e| e.enemy_id)
    }

    /// Apply typed damage. Physical is reduced by `armor / (armor + 100)`;
    /// elemental types by the entry's resistance factor.
    pub fn apply_damage(
        &mut self,
        enemy_id: i32,
        damage: f32,
        damage_type: DamageType,
    ) -> DamageOutcome {
        if damage < 0.0 {
            return DamageOutcome::NotFound;
        }
        let Some(e) = self
            .entries
            .iter_mut()
            .find(|e| e.enemy_id == enemy_id && e.alive)
        else {
            return DamageOutcome::NotFound;
        };
        let resist = match damage_type {
            DamageType::Physical => {
                let armor = e.enemy.final_defense;
                armor / (armor + 100.0)
            }
            DamageType::Fire => e.resists.fire,
            DamageType::Cold => e.resists.cold,
            DamageType::Lightning => e.resists.lightning,
            DamageType::Poison => e.resists.poison,
        };
        let effective = damage * (1.0 - resist.clamp(0.0, 1.0));
        e.hp -= effective;
        if e.hp <= 0.0 {
            e.alive = false;
            DamageOutcome::Killed
        } else {
            DamageOutcome::Applied { remaining_hp: e.hp }
        }
    }

    pub fn mark_dead(&mut self, enemy_id: i32) {
        if let Some(e) = self
            .entries
            .iter_mut()
            .find(|e| e.enemy_id == enemy_id && e.alive)
        {
            e.alive = false;
        }
    }

    /// Compact the array forward, dropping dead entries.
    pub fn cleanup_dead(&mut self) {
        self.entries.retain(|e| e.alive);
    }
}
