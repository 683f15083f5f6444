//! Bridges the difficulty, encounter and modifier systems into spawned
//! enemies: type mappings, room-driven template choice, per-unit stat and
//! modifier application, replay hashing and the spawn-position solver.

use bitflags::bitflags;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::enemy::difficulty::{Archetype, DifficultyEngine, TierId};
use crate::enemy::encounter::{EncounterTemplates, EncounterUnit};
use crate::enemy::modifiers::{ModifierRegistry, MAX_ACTIVE_MODIFIERS};
use crate::rng::{fnv1a64, XorShift32};

bitflags! {
    /// Dungeon room tags that shift encounter difficulty.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RoomTags: u32 {
        const ELITE = 0x1;
        const TREASURE = 0x2;
        const PUZZLE = 0x4;
    }
}

/// Declaration of a spawnable enemy type supplied by the shell.
#[derive(Debug, Clone)]
pub struct EnemyTypeDecl {
    pub id: i32,
    pub name: String,
    pub archetype: Archetype,
    pub tier_id: TierId,
    pub base_level_offset: i32,
}

/// Mapping table entry resolved at spawn time.
#[derive(Debug, Clone)]
pub struct EnemyTypeMapping {
    pub type_index: usize,
    pub id: i32,
    pub name: String,
    pub archetype: Archetype,
    pub tier_id: TierId,
    pub base_level_offset: i32,
}

/// Build the type mapping array; duplicate ids fail the build.
pub fn build_type_mappings(decls: &[EnemyTypeDecl]) -> Result<Vec<EnemyTypeMapping>, String> {
    let mut out = Vec::with_capacity(decls.len());
    for (i, d) in decls.iter().enumerate() {
        if decls[..i].iter().any(|other| other.id == d.id) {
            return Err(format!("duplicate enemy type id {}", d.id));
        }
        out.push(EnemyTypeMapping {
            type_index: i,
            id: d.id,
            name: d.name.clone(),
            archetype: d.archetype,
            tier_id: d.tier_id,
            base_level_offset: d.base_level_offset,
        });
    }
    Ok(out)
}

/// Runtime enemy record produced by finalize.
#[derive(Debug, Clone, Default)]
pub struct Enemy {
    pub type_index: usize,
    pub tier_id: usize,
    pub base_level_offset: i32,
    pub level: i32,
    pub elite: bool,
    pub boss: bool,
    pub support: bool,
    pub final_hp: f32,
    pub final_damage: f32,
    pub final_defense: f32,
    pub max_health: i32,
    pub health: i32,
    pub modifier_ids: Vec<i32>,
    pub encounter_id: i32,
    pub replay_hash_fragment: u32,
}

/// Room description handed in by the dungeon generator.
#[derive(Debug, Clone, Copy)]
pub struct RoomInfo {
    pub id: i32,
    pub width: i32,
    pub height: i32,
    pub tags: RoomTags,
}

impl RoomInfo {
    pub fn area(&self) -> i32 {
        self.width * self.height
    }
}

/// Prepared room encounter metadata.
#[derive(Debug, Clone, Copy)]
pub struct RoomEncounterInfo {
    pub room_id: i32,
    pub depth_level: i32,
    pub biome_id: i32,
    pub encounter_seed: u32,
    pub template_id: i32,
}

/// Deterministic XOR fold of the world/region/room/index identifiers.
pub fn encounter_seed(world_seed: u32, region_id: i32, room_id: i32, encounter_index: i32) -> u32 {
    world_seed ^ region_id as u32 ^ room_id as u32 ^ encounter_index as u32
}

/// Depth-threshold template choice with weighted rolls: boss rooms at
/// depth >= 8 (30%), champion packs at depth >= 5 (25%), mixed patrols at
/// depth >= 3 (40%), swarms otherwise.
pub fn choose_template(
    templates: &EncounterTemplates,
    room_depth: i32,
    _biome_id: i32,
    seed: u32,
) -> Option<i32> {
    if templates.is_empty() {
        return None;
    }
    let mut rng = XorShift32::new(seed, 1);
    if room_depth >= 8 && rng.range(100) < 30 && templates.by_id(3).is_some() {
        return Some(3);
    }
    if room_depth >= 5 && rng.range(100) < 25 && templates.by_id(2).is_some() {
        return Some(2);
    }
    if room_depth >= 3 && rng.range(100) < 40 && templates.by_id(1).is_some() {
        return Some(1);
    }
    if templates.by_id(0).is_some() {
        return Some(0);
    }
    templates.at(0).map(|t| t.id)
}

/// Room difficulty from depth, area and tags; floors at 1.
pub fn compute_room_difficulty(room_depth: i32, room_area: i32, tags: RoomTags) -> i32 {
    let mut difficulty = room_depth;
    if room_area > 64 {
        difficulty += 1;
    }
    if room_area > 144 {
        difficulty += 1;
    }
    if tags.contains(RoomTags::ELITE) {
        difficulty += 2;
    }
    if tags.contains(RoomTags::TREASURE) {
        difficulty += 1;
    }
    if tags.contains(RoomTags::PUZZLE) {
        difficulty -= 1;
    }
    difficulty.max(1)
}

/// Placement validation: boss rooms need 36 tiles, large swarms 25, any
/// encounter at least 9.
pub fn validate_template_placement(
    templates: &EncounterTemplates,
    template_id: i32,
    room: &RoomInfo,
) -> bool {
    let Some(t) = templates.by_id(template_id) else {
        return false;
    };
    let area = room.area();
    if t.boss && area < 36 {
        return false;
    }
    if t.max_count >= 8 && area < 25 {
        return false;
    }
    area >= 9
}

/// Choose and validate a template for a room; falls back to template 0 when
/// the preferred choice does not fit.
pub fn prepare_room_encounter(
    templates: &EncounterTemplates,
    room: &RoomInfo,
    world_seed: u32,
    region_id: i32,
    biome_id: i32,
) -> Option<RoomEncounterInfo> {
    let depth_level = room.id + 1;
    let seed = encounter_seed(world_seed, region_id, room.id, 0);
    let mut template_id = choose_template(templates, depth_level, biome_id, seed)?;
    if !validate_template_placement(templates, template_id, room) {
        template_id = 0;
        if !validate_template_placement(templates, template_id, room) {
            return None;
        }
    }
    Some(RoomEncounterInfo {
        room_id: room.id,
        depth_level,
        biome_id,
        encounter_seed: seed,
        template_id,
    })
}

/// Apply final stats to one unit; elites get the 1.5/1.2/1.1 bump after
/// tier and ΔL scaling.
pub fn apply_unit_stats(
    enemy: &mut Enemy,
    unit: &EncounterUnit,
    player_level: i32,
    mapping: &EnemyTypeMapping,
    difficulty: &DifficultyEngine,
    adaptive_scalar: f32,
) -> bool {
    enemy.level = unit.level;
    enemy.tier_id = mapping.tier_id.index();
    enemy.base_level_offset = mapping.base_level_offset;
    enemy.type_index = mapping.type_index;
    enemy.elite = unit.is_elite;
    enemy.support = unit.is_support;
    let Some(mut stats) =
        difficulty.final_stats(player_level, unit.level, mapping.tier_id, adaptive_scalar)
    else {
        return false;
    };
    if unit.is_elite {
        stats.hp *= 1.5;
        stats.damage *= 1.2;
        stats.defense *= 1.1;
    }
    enemy.final_hp = stats.hp;
    enemy.final_damage = stats.damage;
    enemy.final_defense = stats.defense;
    enemy.max_health = ((stats.hp + 0.5) as i32).max(1);
    enemy.health = enemy.max_health;
    true
}

/// Roll and attach modifiers. Bosses always roll; elites 75% of the time,
/// normals 20%. Budget caps: boss 1.0, elite 0.8, normal 0.6.
pub fn apply_unit_modifiers(
    enemy: &mut Enemy,
    modifier_seed: u32,
    is_elite: bool,
    is_boss: bool,
    modifiers: &ModifierRegistry,
) {
    enemy.modifier_ids.clear();
    let should_apply = if is_boss {
        true
    } else if is_elite {
        modifier_seed % 100 < 75
    } else {
        modifier_seed % 100 < 20
    };
    if !should_apply {
        return;
    }
    let cap = if is_boss {
        1.0
    } else if is_elite {
        0.8
    } else {
        0.6
    };
    let set = modifiers.roll(modifier_seed, enemy.tier_id, cap);
    for &pick in set.picks.iter().take(MAX_ACTIVE_MODIFIERS) {
        if let Some(def) = modifiers.at(pick) {
            enemy.modifier_ids.push(def.id);
        }
    }
}

/// Full per-unit finalization: metadata, stats, modifiers, validation.
pub fn finalize_spawn(
    enemy: &mut Enemy,
    unit: &EncounterUnit,
    info: &RoomEncounterInfo,
    player_level: i32,
    mapping: &EnemyTypeMapping,
    difficulty: &DifficultyEngine,
    adaptive_scalar: f32,
    modifiers: &ModifierRegistry,
    is_boss: bool,
) -> bool {
    enemy.encounter_id = info.room_id;
    enemy.replay_hash_fragment = info.encounter_seed;
    enemy.boss = is_boss;
    if !apply_unit_stats(enemy, unit, player_level, mapping, difficulty, adaptive_scalar) {
        return false;
    }
    let modifier_seed = info.encounter_seed ^ unit.enemy_type_id as u32 ^ 0xDEAD_BEEF;
    apply_unit_modifiers(enemy, modifier_seed, unit.is_elite, is_boss, modifiers);
    validate_final_stats(enemy)
}

/// Spawn-time invariants.
pub fn validate_final_stats(enemy: &Enemy) -> bool {
    enemy.final_hp >= 0.1
        && enemy.final_damage >= 0.0
        && enemy.final_defense >= 0.0
        && enemy.max_health > 0
        && enemy.health > 0
        && enemy.health <= enemy.max_health
        && enemy.level >= 1
        && enemy.modifier_ids.len() <= MAX_ACTIVE_MODIFIERS
}

/// FNV-1a 64 replay hash over the composition result.
pub fn replay_hash(template_id: i32, unit_levels: &[i32], modifier_ids: &[i32]) -> u64 {
    let mut bytes = Vec::with_capacity(8 + unit_levels.len() * 4 + modifier_ids.len() * 4);
    bytes.extend_from_slice(&template_id.to_le_bytes());
    for lvl in unit_levels {
        bytes.extend_from_slice(&lvl.to_le_bytes());
    }
    bytes.extend_from_slice(&(modifier_ids.len() as u32).to_le_bytes());
    for id in modifier_ids {
        bytes.extend_from_slice(&id.to_le_bytes());
    }
    fnv1a64(&bytes, 0)
}

/// One debug-ring record.
#[derive(Debug, Clone, Copy, Default)]
pub struct EncounterDebugRec {
    pub seed: u32,
    pub hash: u64,
    pub template_id: i32,
    pub unit_count: i32,
}

/// 32-slot ring of recent encounter compositions for debug dumps.
#[derive(Debug, Default)]
pub struct EncounterDebugRing {
    records: Vec<EncounterDebugRec>,
    head: usize,
}

pub const DEBUG_RING_SIZE: usize = 32;

impl EncounterDebugRing {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, rec: EncounterDebugRec) {
        if self.records.len() < DEBUG_RING_SIZE {
            self.records.push(rec);
        } else {
            self.records[self.head] = rec;
            self.head = (self.head + 1) % DEBUG_RING_SIZE;
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn dump(&self) -> String {
        let mut out = String::new();
        for r in &self.records {
            out.push_str(&format!(
                "seed={:#010x} hash={:#018x} template={} units={}\n",
                r.seed, r.hash, r.template_id, r.unit_count
            ));
        }
        out
    }
}

/// Room geometry for the spawn solver; obstacle zones are `(min_x, min_y,
/// max_x, max_y)` rectangles.
#[derive(Debug, Clone)]
pub struct RoomDimensions {
    pub min_x: f32,
    pub min_y: f32,
    pub max_x: f32,
    pub max_y: f32,
    pub obstacles: Vec<[f32; 4]>,
}

#[derive(Debug, Clone, Default)]
pub struct SpawnSolution {
    pub positions: Vec<(f32, f32)>,
    pub min_distance: f32,
    pub complete: bool,
}

const MAX_SPAWN_ATTEMPTS: usize = 50;

fn position_valid(
    x: f32,
    y: f32,
    dims: &RoomDimensions,
    placed: &[(f32, f32)],
    min_distance: f32,
) -> bool {
    if x < dims.min_x || x > dims.max_x || y < dims.min_y || y > dims.max_y {
        return false;
    }
    for obs in &dims.obstacles {
        if x >= obs[0] && x <= obs[2] && y >= obs[1] && y <= obs[3] {
            return false;
        }
    }
    placed.iter().all(|&(px, py)| {
        let (dx, dy) = (x - px, y - py);
        (dx * dx + dy * dy).sqrt() >= min_distance
    })
}

/// Place `unit_count` spawn positions. A boss (depth >= 5) anchors at the
/// room center; the rest take bounded random attempts respecting obstacles
/// and a minimum inter-unit distance (2.0 when few units, else 1.5). The
/// random stream is seeded from the encounter seed.
pub fn solve_spawn_positions(
    info: &RoomEncounterInfo,
    dims: &RoomDimensions,
    unit_count: usize,
) -> SpawnSolution {
    let mut solution = SpawnSolution {
        min_distance: if unit_count <= 4 { 2.0 } else { 1.5 },
        ..Default::default()
    };
    if unit_count == 0 {
        solution.complete = true;
        return solution;
    }
    let mut rng = SmallRng::seed_from_u64(info.encounter_seed as u64);
    let has_boss = info.depth_level >= 5;
    if has_boss {
        let cx = (dims.min_x + dims.max_x) / 2.0;
        let cy = (dims.min_y + dims.max_y) / 2.0;
        if position_valid(cx, cy, dims, &solution.positions, solution.min_distance) {
            solution.positions.push((cx, cy));
        }
    }
    let padding = 1.0;
    let span_x = (dims.max_x - dims.min_x - 2.0 * padding).max(0.0);
    let span_y = (dims.max_y - dims.min_y - 2.0 * padding).max(0.0);
    let mut all_placed = true;
    while solution.positions.len() < unit_count {
        let mut placed = false;
        for _ in 0..MAX_SPAWN_ATTEMPTS {
            let x = dims.min_x + padding + rng.gen::<f32>() * span_x;
            let y = dims.min_y + padding + rng.gen::<f32>() * span_y;
            if position_valid(x, y, dims, &solution.positions, solution.min_distance) {
                solution.positions.push((x, y));
                placed = true;
                break;
            }
        }
        if !placed {
            all_placed = false;
            break;
        }
    }
    solution.complete = all_placed && !solution.positions.is_empty();
    solution
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEMPLATES: &str = "\
id=0
name=Swarm
type=swarm
min=4
max=6

id=1
name=Patrol
type=mixed
min=3
max=5

id=2
name=Champions
type=champion_pack
min=2
max=3

id=3
name=Throne
type=boss_room
min=1
max=1
boss=1
support_min=1
support_max=2
";

    const MODIFIERS: &str = "\
id=0
name=Frenzied
weight=3
dps=0.3

id=1
name=Armored
weight=2
control=0.2
";

    fn templates() -> EncounterTemplates {
        let mut t = EncounterTemplates::new();
        t.load_from_str(TEMPLATES);
        t
    }

    fn modifiers() -> ModifierRegistry {
        let mut m = ModifierRegistry::new();
        m.load_from_str(MODIFIERS);
        m
    }

    fn mapping() -> EnemyTypeMapping {
        EnemyTypeMapping {
            type_index: 0,
            id: 1,
            name: "Skeleton".into(),
            archetype: Archetype::Melee,
            tier_id: TierId::Normal,
            base_level_offset: 0,
        }
    }

    #[test]
    fn duplicate_type_ids_fail_the_build() {
        let decls = vec![
            EnemyTypeDecl {
                id: 1,
                name: "Rat".into(),
                archetype: Archetype::Melee,
                tier_id: TierId::Normal,
                base_level_offset: 0,
            },
            EnemyTypeDecl {
                id: 1,
                name: "Bat".into(),
                archetype: Archetype::Ranged,
                tier_id: TierId::Normal,
                base_level_offset: 0,
            },
        ];
        assert!(build_type_mappings(&decls).is_err());
        assert_eq!(build_type_mappings(&decls[..1]).unwrap().len(), 1);
    }

    #[test]
    fn shallow_rooms_pick_swarm() {
        let t = templates();
        for seed in 1..32u32 {
            assert_eq!(choose_template(&t, 1, 0, seed), Some(0));
        }
    }

    #[test]
    fn deep_rooms_can_pick_boss_room() {
        let t = templates();
        let found = (1..200u32).any(|seed| choose_template(&t, 9, 0, seed) == Some(3));
        assert!(found);
    }

    #[test]
    fn room_difficulty_modifiers() {
        assert_eq!(compute_room_difficulty(3, 10, RoomTags::empty()), 3);
        assert_eq!(compute_room_difficulty(3, 100, RoomTags::empty()), 4);
        assert_eq!(compute_room_difficulty(3, 200, RoomTags::empty()), 5);
        assert_eq!(compute_room_difficulty(3, 10, RoomTags::ELITE), 5);
        assert_eq!(compute_room_difficulty(1, 10, RoomTags::PUZZLE), 1);
    }

    #[test]
    fn placement_validation_area_thresholds() {
        let t = templates();
        let small = RoomInfo { id: 0, width: 2, height: 2, tags: RoomTags::empty() };
        let mid = RoomInfo { id: 0, width: 5, height: 5, tags: RoomTags::empty() };
        let large = RoomInfo { id: 0, width: 8, height: 8, tags: RoomTags::empty() };
        assert!(!validate_template_placement(&t, 0, &small));
        assert!(validate_template_placement(&t, 0, &mid));
        assert!(!validate_template_placement(&t, 3, &mid));
        assert!(validate_template_placement(&t, 3, &large));
    }

    #[test]
    fn encounter_seed_folds_all_ids() {
        let base = encounter_seed(0xABCD, 1, 2, 0);
        assert_ne!(encounter_seed(0xABCD, 2, 2, 0), base);
        assert_ne!(encounter_seed(0xABCD, 1, 3, 0), base);
        assert_ne!(encounter_seed(0xABCE, 1, 2, 0), base);
    }

    #[test]
    fn unit_stats_apply_elite_multipliers() {
        let difficulty = DifficultyEngine::new();
        let unit = EncounterUnit {
            enemy_type_id: 0,
            level: 10,
            is_elite: false,
            is_support: false,
        };
        let elite_unit = EncounterUnit { is_elite: true, ..unit };
        let mut normal = Enemy::default();
        let mut elite = Enemy::default();
        assert!(apply_unit_stats(&mut normal, &unit, 10, &mapping(), &difficulty, 1.0));
        assert!(apply_unit_stats(&mut elite, &elite_unit, 10, &mapping(), &difficulty, 1.0));
        assert!((elite.final_hp / normal.final_hp - 1.5).abs() < 1e-3);
        assert!((elite.final_damage / normal.final_damage - 1.2).abs() < 1e-3);
        assert!(elite.health == elite.max_health);
    }

    #[test]
    fn bosses_always_roll_modifiers() {
        let mods = modifiers();
        let mut enemy = Enemy {
            tier_id: TierId::Boss.index(),
            ..Default::default()
        };
        apply_unit_modifiers(&mut enemy, 7, false, true, &mods);
        assert!(!enemy.modifier_ids.is_empty());
    }

    #[test]
    fn normals_rarely_roll_modifiers() {
        let mods = modifiers();
        let mut with = 0;
        for seed in 0..100u32 {
            let mut enemy = Enemy::default();
            apply_unit_modifiers(&mut enemy, seed, false, false, &mods);
            if !enemy.modifier_ids.is_empty() {
                with += 1;
            }
        }
        // Eligibility is seed % 100 < 20.
        assert_eq!(with, 20);
    }

    #[test]
    fn finalize_produces_valid_enemy() {
        let difficulty = DifficultyEngine::new();
        let mods = modifiers();
        let info = RoomEncounterInfo {
            room_id: 4,
            depth_level: 5,
            biome_id: 1,
            encounter_seed: 0x1234,
            template_id: 0,
        };
        let unit = EncounterUnit {
            enemy_type_id: 1,
            level: 8,
            is_elite: true,
            is_support: false,
        };
        let mut enemy = Enemy::default();
        assert!(finalize_spawn(
            &mut enemy, &unit, &info, 9, &mapping(), &difficulty, 1.0, &mods, false
        ));
        assert_eq!(enemy.encounter_id, 4);
        assert!(validate_final_stats(&enemy));
    }

    #[test]
    fn replay_hash_is_stable_and_sensitive() {
        let a = replay_hash(3, &[5, 5, 6], &[0, 2]);
        assert_eq!(a, replay_hash(3, &[5, 5, 6], &[0, 2]));
        assert_ne!(a, replay_hash(3, &[5, 5, 7], &[0, 2]));
        assert_ne!(a, replay_hash(2, &[5, 5, 6], &[0, 2]));
        assert_ne!(a, replay_hash(3, &[5, 5, 6], &[0]));
    }

    #[test]
    fn debug_ring_wraps_at_capacity() {
        let mut ring = EncounterDebugRing::new();
        for i in 0..40 {
            ring.record(EncounterDebugRec {
                seed: i,
                hash: i as u64,
                template_id: 0,
                unit_count: 1,
            });
        }
        assert_eq!(ring.len(), DEBUG_RING_SIZE);
        assert!(!ring.dump().is_empty());
    }

    #[test]
    fn spawn_solver_respects_bounds_and_distance() {
        let info = RoomEncounterInfo {
            room_id: 1,
            depth_level: 6,
            biome_id: 0,
            encounter_seed: 777,
            template_id: 0,
        };
        let dims = RoomDimensions {
            min_x: 0.0,
            min_y: 0.0,
            max_x: 12.0,
            max_y: 12.0,
            obstacles: vec![[4.0, 4.0, 5.0, 5.0]],
        };
        let solution = solve_spawn_positions(&info, &dims, 5);
        assert!(solution.complete);
        assert_eq!(solution.positions.len(), 5);
        // Boss anchored at center first at depth >= 5.
        assert_eq!(solution.positions[0], (6.0, 6.0));
        for (i, &(x, y)) in solution.positions.iter().enumerate() {
            assert!((0.0..=12.0).contains(&x) && (0.0..=12.0).contains(&y));
            assert!(!(x >= 4.0 && x <= 5.0 && y >= 4.0 && y <= 5.0));
            for &(ox, oy) in &solution.positions[i + 1..] {
                let d = ((x - ox).powi(2) + (y - oy).powi(2)).sqrt();
                assert!(d >= solution.min_distance - 1e-4);
            }
        }
    }

    #[test]
    fn spawn_solver_is_deterministic() {
        let info = RoomEncounterInfo {
            room_id: 1,
            depth_level: 2,
            biome_id: 0,
            encounter_seed: 4242,
            template_id: 0,
        };
        let dims = RoomDimensions {
            min_x: 0.0,
            min_y: 0.0,
            max_x: 10.0,
            max_y: 10.0,
            obstacles: Vec::new(),
        };
        let a = solve_spawn_positions(&info, &dims, 4);
        let b = solve_spawn_positions(&info, &dims, 4);
        assert_eq!(a.positions, b.positions);
    }

    #[test]
    fn cramped_room_reports_incomplete() {
        let info = RoomEncounterInfo {
            room_id: 1,
            depth_level: 1,
            biome_id: 0,
            encounter_seed: 9,
            template_id: 0,
        };
        let dims = RoomDimensions {
            min_x: 0.0,
            min_y: 0.0,
            max_x: 3.0,
            max_y: 3.0,
            obstacles: Vec::new(),
        };
        let solution = solve_spawn_positions(&info, &dims, 12);
        assert!(!solution.complete);
    }

    #[test]
    fn boss_spawn_sets_boss_center_first() {
        let info = RoomEncounterInfo {
            room_id: 2,
            depth_level: 5,
            biome_id: 0,
            encounter_seed: 31,
            template_id: 3,
        };
        let dims = RoomDimensions {
            min_x: 0.0,
            min_y: 0.0,
            max_x: 10.0,
            max_y: 10.0,
            obstacles: Vec::new(),
        };
        let solution = solve_spawn_positions(&info, &dims, 3);
        assert_eq!(solution.positions[0], (5.0, 5.0));
    }
}
