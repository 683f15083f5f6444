//! Save manager end-to-end: full round-trip of a generated session,
//! integrity envelope verification, tamper detection, incremental
//! equivalence, signature support, migration chain and recovery.

mod common;

use common::load_content;
use rogue_core::hooks::SignatureProvider;
use rogue_core::inventory::{EntryLabels, TagFlags};
use rogue_core::loot::{generate_item, GenerationContext, RarityGovernor};
use rogue_core::save::state::{BuffState, SkillState, VendorItem};
use rogue_core::save::{SaveError, SaveManager, TamperFlags, CURRENT_SAVE_VERSION};
use rogue_core::GameState;

const DESCRIPTOR_SIZE: usize = 28;

type ItemKey = (usize, i32, u8, i32, i32, i32, i32, i32, i32, i32);

fn item_multiset(state: &GameState) -> Vec<ItemKey> {
    let mut keys: Vec<ItemKey> = state
        .pool
        .iter()
        .map(|(_, it)| {
            (
                it.def_index,
                it.quantity,
                it.rarity,
                it.prefix_index,
                it.prefix_value,
                it.suffix_index,
                it.suffix_value,
                it.durability_cur,
                it.durability_max,
                it.enchant_level,
            )
        })
        .collect();
    keys.sort();
    keys
}

/// Build a session with 90 generated items across the two loot tables plus
/// populated sibling state.
fn populated_state() -> GameState {
    let pack = load_content();
    let mut state = GameState::with_pool_capacity(256);
    let mut governor = RarityGovernor::new();
    let mut rng_state = 777u32;
    let swords = pack.tables.index_of("swords").unwrap();
    let materials = pack.tables.index_of("materials").unwrap();
    let ctx = GenerationContext {
        enemy_level: 12,
        biome_id: 1,
        enemy_archetype: 0,
        player_luck: 2,
    };
    for i in 0..90 {
        let table = if i % 2 == 0 { swords } else { materials };
        let out = generate_item(
            table,
            &ctx,
            &mut rng_state,
            &pack.tables,
            &pack.defs,
            &pack.affixes,
            &mut governor,
            &mut state.pool,
        )
        .expect("generation");
        assert!(out.handle.is_some(), "pool should not fill");
    }
    assert_eq!(state.pool.active_count(), 90);

    state.world.world_seed = 0xDEAD_0001;
    state.world.region_id = 3;
    state.world.biome_id = 1;
    state.world.playtime_ms = 123_456_789;
    state.player = rogue_core::save::PlayerState {
        level: 14,
        xp: 52_000,
        gold: 812,
        health: 140,
        mana: 60,
        x: 10.5,
        y: -4.25,
        equipped_weapon_guid: state.pool.iter().next().map(|(_, it)| it.guid).unwrap_or(0),
    };
    state.entries.register_pickup(0, 2).unwrap();
    state.entries.register_pickup(2, 55).unwrap();
    state
        .entries
        .set_labels(2, EntryLabels::MATERIAL)
        .unwrap();
    state.tags.set_flags(0, TagFlags::FAVORITE);
    state.tags.add_tag(0, "starter");
    state.tag_rules.add(2, 0xFF, 0, "rare-plus", 0xFFAA_00FF);
    state.query.store_saved("mats", "category = material", "-qty");
    state.skills.push(SkillState {
        id: 4,
        rank: 3,
        cooldown_ms: 250.0,
    });
    state.buffs.push(BuffState {
        id: 9,
        remaining_ms: 4_000,
        magnitude: 12,
    });
    state.vendor.seed = 99;
    state.vendor.stock.push(VendorItem {
        def_index: 1,
        quantity: 3,
        price: 45,
    });
    state.strings.intern("fireball");
    state.strings.intern("frostbolt");
    state.replay.record_input(1, 7, 1);
    state.replay.record_input(2, 7, 0);
    state
}

fn manager_in(dir: &std::path::Path) -> SaveManager {
    SaveManager::with_dir(dir)
}

#[test]
fn save_round_trip_preserves_item_multiset_and_siblings() {
    let dir = tempfile::tempdir().unwrap();
    let mut manager = manager_in(dir.path());
    let mut state = populated_state();
    let before = item_multiset(&state);

    manager.save_slot(0, &state).unwrap();
    assert_eq!(manager.last_save_rc(), 0);
    assert!(manager.last_save_bytes() > 0);

    // Wipe and reload into the same session.
    state.pool.clear();
    assert_eq!(state.pool.active_count(), 0);
    let version = manager.load_slot(0, &mut state).unwrap();
    assert_eq!(version, CURRENT_SAVE_VERSION);
    assert_eq!(manager.last_tamper_flags(), TamperFlags::empty());
    assert_eq!(item_multiset(&state), before);

    // Sibling components round-trip too.
    assert_eq!(state.world.playtime_ms, 123_456_789);
    assert_eq!(state.player.level, 14);
    assert_ne!(state.player.equipped_weapon_guid, 0);
    assert_eq!(state.entries.quantity(2), 55);
    assert_eq!(state.entries.labels(2), EntryLabels::MATERIAL);
    assert!(state.tags.flags(0).contains(TagFlags::FAVORITE));
    assert!(state.tags.has_tag(0, "starter"));
    assert_eq!(state.tag_rules.len(), 1);
    assert_eq!(state.query.saved_count(), 1);
    assert_eq!(state.skills.len(), 1);
    assert_eq!(state.buffs.len(), 1);
    assert_eq!(state.vendor.stock.len(), 1);
    assert_eq!(state.strings.get(1), Some("frostbolt"));
    assert_eq!(state.replay.len(), 2);
}

#[test]
fn load_into_fresh_session_matches() {
    let dir = tempfile::tempdir().unwrap();
    let mut manager = manager_in(dir.path());
    let state = populated_state();
    let before = item_multiset(&state);
    manager.save_slot(1, &state).unwrap();

    let mut fresh = GameState::with_pool_capacity(256);
    manager.load_slot(1, &mut fresh).unwrap();
    assert_eq!(item_multiset(&fresh), before);
}

#[test]
fn descriptor_reports_all_sections() {
    let dir = tempfile::tempdir().unwrap();
    let mut manager = manager_in(dir.path());
    let state = populated_state();
    manager.save_slot(0, &state).unwrap();

    let descriptor = manager.read_descriptor(0).unwrap();
    assert_eq!(descriptor.version, CURRENT_SAVE_VERSION);
    assert_eq!(descriptor.section_count, 12);
    let mut ids = Vec::new();
    manager
        .for_each_section(0, |s| ids.push(s.id))
        .unwrap();
    assert_eq!(ids.len(), 12);
    assert!(ids.windows(2).all(|w| w[0] < w[1]), "sections sorted by id");

    let json = manager.export_json(0).unwrap();
    assert!(json.contains("\"section_count\": 12"));
}

#[test]
fn payload_tamper_trips_descriptor_crc() {
    let dir = tempfile::tempdir().unwrap();
    let mut manager = manager_in(dir.path());
    let state = populated_state();
    manager.save_slot(0, &state).unwrap();

    let path = manager.slot_path(0);
    let mut bytes = std::fs::read(&path).unwrap();
    let mid = DESCRIPTOR_SIZE + 40;
    bytes[mid] ^= 0xFF;
    std::fs::write(&path, &bytes).unwrap();

    let mut fresh = GameState::with_pool_capacity(256);
    match manager.load_slot(0, &mut fresh) {
        Err(SaveError::DescriptorCrc) => {}
        other => panic!("expected DescriptorCrc, got {other:?}"),
    }
    assert!(manager
        .last_tamper_flags()
        .contains(TamperFlags::DESCRIPTOR_CRC));
    assert_eq!(SaveError::DescriptorCrc.code(), -7);
}

#[test]
fn section_tamper_with_fixed_envelope_trips_section_crc() {
    let dir = tempfile::tempdir().unwrap();
    let mut manager = manager_in(dir.path());
    let state = populated_state();
    manager.save_slot(0, &state).unwrap();

    let path = manager.slot_path(0);
    let mut bytes = std::fs::read(&path).unwrap();
    // Flip one byte inside the first section's payload (after its 6-byte
    // header), then re-seal the outer CRC and SHA so only the per-section
    // CRC disagrees.
    let target = DESCRIPTOR_SIZE + 6 + 1;
    bytes[target] ^= 0x01;
    let payload_len = {
        // Recompute: find SH32 marker by scanning back from the end.
        let rest = &bytes[DESCRIPTOR_SIZE..];
        let pos = rest
            .windows(4)
            .rposition(|w| w == b"SH32")
            .expect("sha footer present");
        pos
    };
    let crc = crc32fast::hash(&bytes[DESCRIPTOR_SIZE..DESCRIPTOR_SIZE + payload_len]);
    bytes[24..28].copy_from_slice(&crc.to_le_bytes());
    use sha2::Digest;
    let mut hasher = sha2::Sha256::new();
    hasher.update(&bytes[DESCRIPTOR_SIZE..DESCRIPTOR_SIZE + payload_len]);
    let digest: [u8; 32] = hasher.finalize().into();
    let sha_at = DESCRIPTOR_SIZE + payload_len + 4;
    bytes[sha_at..sha_at + 32].copy_from_slice(&digest);
    std::fs::write(&path, &bytes).unwrap();

    let mut fresh = GameState::with_pool_capacity(256);
    match manager.load_slot(0, &mut fresh) {
        Err(SaveError::SectionCrc) => {}
        other => panic!("expected SectionCrc, got {other:?}"),
    }
    assert!(manager.last_tamper_flags().contains(TamperFlags::SECTION_CRC));
}

#[test]
fn incremental_save_is_byte_equivalent_and_reuses_sections() {
    let dir = tempfile::tempdir().unwrap();
    let mut manager = manager_in(dir.path());
    let state = populated_state();

    manager.set_incremental(true);
    manager.save_slot(0, &state).unwrap();
    let (reused, written) = manager.last_section_reuse();
    assert_eq!(reused, 0);
    assert_eq!(written, 12);

    // Second save with a clean dirty mask reuses everything and the
    // payload is byte-identical to a cold save of the same state.
    manager.save_slot(1, &state).unwrap();
    let (reused, written) = manager.last_section_reuse();
    assert_eq!(reused, 12);
    assert_eq!(written, 0);

    let mut cold = manager_in(dir.path());
    cold.save_slot(2, &state).unwrap();
    let warm_bytes = std::fs::read(manager.slot_path(1)).unwrap();
    let cold_bytes = std::fs::read(manager.slot_path(2)).unwrap();
    // Descriptor timestamps may differ; everything after them must not.
    assert_eq!(&warm_bytes[DESCRIPTOR_SIZE..], &cold_bytes[DESCRIPTOR_SIZE..]);

    // Dirtying one component rewrites exactly that section.
    manager.mark_component_dirty(rogue_core::save::component_id::PLAYER);
    manager.save_slot(3, &state).unwrap();
    let (reused, written) = manager.last_section_reuse();
    assert_eq!(reused, 11);
    assert_eq!(written, 1);
}

#[test]
fn inventory_record_diff_metrics() {
    let dir = tempfile::tempdir().unwrap();
    let mut manager = manager_in(dir.path());
    let mut state = populated_state();

    manager.save_slot(0, &state).unwrap();
    let (_, rewritten) = manager.inventory_diff_metrics();
    assert_eq!(rewritten, 90);

    // Untouched pool: every record reuses.
    manager.save_slot(0, &state).unwrap();
    let (reused, rewritten) = manager.inventory_diff_metrics();
    assert_eq!((reused, rewritten), (90, 0));

    // One mutation rewrites exactly one record.
    let handle = state.pool.handle_at(0).unwrap();
    state.pool.set_quality(handle, 5).unwrap();
    manager.save_slot(0, &state).unwrap();
    let (reused, rewritten) = manager.inventory_diff_metrics();
    assert_eq!((reused, rewritten), (89, 1));
}

#[test]
fn compression_round_trips_when_enabled() {
    let dir = tempfile::tempdir().unwrap();
    let mut manager = manager_in(dir.path());
    let state = populated_state();
    let before = item_multiset(&state);
    manager.set_compression(true, 32);
    manager.save_slot(0, &state).unwrap();

    let mut compressed_sections = 0;
    manager
        .for_each_section(0, |s| {
            if s.compressed {
                compressed_sections += 1;
            }
        })
        .unwrap();

    let mut fresh = GameState::with_pool_capacity(256);
    let mut loader = manager_in(dir.path());
    loader.load_slot(0, &mut fresh).unwrap();
    assert_eq!(item_multiset(&fresh), before);
}

struct ToySigner;

impl SignatureProvider for ToySigner {
    fn sign(&self, data: &[u8]) -> Option<Vec<u8>> {
        let mut h: u64 = 0xFEED_F00D;
        for (i, b) in data.iter().enumerate() {
            h = h
                .wrapping_mul(0x0100_0000_01b3)
                .wrapping_add(*b as u64 ^ (i as u64 & 0xFF));
        }
        Some(h.to_le_bytes().to_vec())
    }

    fn verify(&self, data: &[u8], sig: &[u8]) -> bool {
        self.sign(data).map(|s| s == sig).unwrap_or(false)
    }
}

#[test]
fn signature_footer_round_trips_and_detects_tamper() {
    let dir = tempfile::tempdir().unwrap();
    let mut manager = manager_in(dir.path());
    manager.set_signature_provider(Some(Box::new(ToySigner)));
    let state = populated_state();
    manager.save_slot(0, &state).unwrap();

    let mut fresh = GameState::with_pool_capacity(256);
    manager.load_slot(0, &mut fresh).unwrap();
    assert_eq!(manager.last_tamper_flags(), TamperFlags::empty());

    // Corrupt the trailing signature byte: CRC and SHA still pass, the
    // signature check must flag it.
    let path = manager.slot_path(0);
    let mut bytes = std::fs::read(&path).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;
    std::fs::write(&path, &bytes).unwrap();
    match manager.load_slot(0, &mut fresh) {
        Err(SaveError::Signature) => {}
        other => panic!("expected Signature, got {other:?}"),
    }
    assert!(manager.last_tamper_flags().contains(TamperFlags::SIGNATURE));
}

#[test]
fn older_version_runs_migration_chain() {
    let dir = tempfile::tempdir().unwrap();
    let mut manager = manager_in(dir.path());
    let state = populated_state();
    manager.save_slot(0, &state).unwrap();

    // Rewind the descriptor version to 8; payload layout is unchanged, so
    // the chain applies exactly one no-op step.
    let path = manager.slot_path(0);
    let mut bytes = std::fs::read(&path).unwrap();
    bytes[0..4].copy_from_slice(&8u32.to_le_bytes());
    std::fs::write(&path, &bytes).unwrap();

    let mut fresh = GameState::with_pool_capacity(256);
    let version = manager.load_slot(0, &mut fresh).unwrap();
    assert_eq!(version, 8);
    assert_eq!(manager.last_migration_steps(), 1);
    assert!(!manager.last_migration_failed());

    // A future version is rejected outright.
    bytes[0..4].copy_from_slice(&(CURRENT_SAVE_VERSION + 1).to_le_bytes());
    std::fs::write(&path, &bytes).unwrap();
    assert!(matches!(
        manager.load_slot(0, &mut fresh),
        Err(SaveError::Version(_))
    ));
}

#[test]
fn recovery_falls_back_to_autosave_ring() {
    let dir = tempfile::tempdir().unwrap();
    let mut manager = manager_in(dir.path());
    let state = populated_state();
    let before = item_multiset(&state);

    manager.save_slot(0, &state).unwrap();
    manager.autosave(&state).unwrap();
    assert_eq!(manager.autosave_count(), 1);

    // Corrupt the primary slot payload.
    let path = manager.slot_path(0);
    let mut bytes = std::fs::read(&path).unwrap();
    bytes[DESCRIPTOR_SIZE + 50] ^= 0xFF;
    std::fs::write(&path, &bytes).unwrap();

    let mut fresh = GameState::with_pool_capacity(256);
    manager.load_slot_with_recovery(0, &mut fresh).unwrap();
    assert!(manager.last_recovery_used());
    assert!(manager
        .last_tamper_flags()
        .contains(TamperFlags::DESCRIPTOR_CRC));
    assert_eq!(item_multiset(&fresh), before);
}

#[test]
fn recovery_propagates_non_integrity_errors() {
    let dir = tempfile::tempdir().unwrap();
    let mut manager = manager_in(dir.path());
    let mut fresh = GameState::with_pool_capacity(256);
    // Missing file is an open error, not an integrity failure.
    assert!(matches!(
        manager.load_slot_with_recovery(4, &mut fresh),
        Err(SaveError::Open(_))
    ));
    assert!(!manager.last_recovery_used());
}

#[test]
fn autosave_scheduler_honors_interval_combat_and_throttle() {
    let dir = tempfile::tempdir().unwrap();
    let mut manager = manager_in(dir.path());
    let state = populated_state();
    manager.set_autosave_interval_ms(1_000);
    manager.set_autosave_throttle_ms(500);

    assert!(!manager.update(100, true, &state).unwrap(), "combat blocks");
    assert!(manager.update(100, false, &state).unwrap(), "first fire");
    assert!(!manager.update(600, false, &state).unwrap(), "interval not met");
    assert!(manager.update(1_200, false, &state).unwrap(), "second fire");
    assert_eq!(manager.autosave_count(), 2);
}

#[test]
fn backup_rotation_prunes_old_backups() {
    let dir = tempfile::tempdir().unwrap();
    let mut manager = manager_in(dir.path());
    let state = populated_state();
    manager.save_slot(0, &state).unwrap();

    for _ in 0..4 {
        manager.backup_rotate(0, 2).unwrap();
    }
    let backups = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().map(|x| x == "bak").unwrap_or(false))
        .count();
    assert_eq!(backups, 2);
}

#[test]
fn delete_slot_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let mut manager = manager_in(dir.path());
    let state = populated_state();
    manager.save_slot(0, &state).unwrap();
    manager.delete_slot(0).unwrap();
    manager.delete_slot(0).unwrap();
    assert!(manager.read_descriptor(0).is_err());
}

#[test]
fn bad_slot_indices_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mut manager = manager_in(dir.path());
    let state = populated_state();
    assert!(matches!(
        manager.save_slot(99, &state),
        Err(SaveError::BadSlot)
    ));
    let mut fresh = GameState::new();
    assert!(matches!(
        manager.load_slot(99, &mut fresh),
        Err(SaveError::BadSlot)
    ));
    assert_eq!(SaveError::BadSlot.code(), -1);
}
