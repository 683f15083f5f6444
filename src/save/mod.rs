//! Versioned save manager: component registry, integrity envelope
//! (per-section CRC32, whole-payload CRC32 + SHA-256, optional signature),
//! RLE section compression, incremental section reuse, migration chain with
//! rollback, autosave ring and backup/recovery paths.

pub mod codec;
pub mod components;
pub mod migrations;
pub mod replay;
pub mod state;

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;

use bitflags::bitflags;
use byteorder::{ByteOrder, LittleEndian};
use log::{debug, info, warn};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::hooks::SignatureProvider;
use codec::{RleCodec, SectionCodec};
use components::{core_components, ComponentWriteMetrics, SaveComponent, MAX_COMPONENT_ID};
use migrations::{core_migrations, Migration};
use state::GameState;

pub use components::component_id;
pub use state::{
    BuffState, PlayerState, SkillState, StringIntern, VendorItem, VendorState, WorldMeta,
};

pub const CURRENT_SAVE_VERSION: u32 = 9;
pub const SAVE_SLOT_COUNT: usize = 8;
pub const AUTOSAVE_RING_SIZE: usize = 4;
/// Environment variable prefixing all save paths (test isolation).
pub const SAVE_DIR_ENV: &str = "ROGUE_TEST_SAVE_DIR";

const DESCRIPTOR_SIZE: usize = 28;
const SHA_FOOTER_SIZE: usize = 4 + 32;
const SHA_MAGIC: &[u8; 4] = b"SH32";
const SIG_MAGIC: &[u8; 4] = b"SGN0";
const DEFAULT_COMPRESS_MIN_BYTES: usize = 64;

bitflags! {
    /// Integrity-failure flags accumulated by the last load attempt.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct TamperFlags: u32 {
        const DESCRIPTOR_CRC = 0x1;
        const SECTION_CRC = 0x2;
        const SHA256 = 0x4;
        const SIGNATURE = 0x8;
    }
}

#[derive(Debug, Error)]
pub enum SaveError {
    #[error("invalid slot index")]
    BadSlot,
    #[error("open failed: {0}")]
    Open(String),
    #[error("descriptor read failed")]
    ReadHeader,
    #[error("unsupported format version {0}")]
    Version(u32),
    #[error("file size mismatch")]
    InvalidSize,
    #[error("payload read failed")]
    Payload,
    #[error("descriptor CRC mismatch")]
    DescriptorCrc,
    #[error("section read failed")]
    SectionRead,
    #[error("component read failed: {0}")]
    ComponentRead(String),
    #[error("SHA-256 mismatch")]
    Sha256,
    #[error("section CRC mismatch")]
    SectionCrc,
    #[error("migration step failed: {0}")]
    MigrationFail(String),
    #[error("migration chain incomplete at version {0}")]
    MigrationChain(u32),
    #[error("signature verification failed")]
    Signature,
    #[error("save format requires little-endian host")]
    StrictEndian,
    #[error("reentrant save rejected")]
    InSave,
}

impl SaveError {
    /// Stable numeric codes surfaced to the game shell.
    pub fn code(&self) -> i32 {
        match self {
            SaveError::BadSlot => -1,
            SaveError::Open(_) => -2,
            SaveError::ReadHeader => -3,
            SaveError::Version(_) => -4,
            SaveError::InvalidSize => -5,
            SaveError::Payload => -6,
            SaveError::DescriptorCrc => -7,
            SaveError::SectionRead => -8,
            SaveError::ComponentRead(_) => -9,
            SaveError::Sha256 => -17,
            SaveError::SectionCrc => -18,
            SaveError::MigrationFail(_) => -19,
            SaveError::MigrationChain(_) => -20,
            SaveError::Signature => -21,
            SaveError::StrictEndian => -30,
            SaveError::InSave => -99,
        }
    }

    fn is_integrity(&self) -> bool {
        matches!(
            self,
            SaveError::InvalidSize
                | SaveError::Payload
                | SaveError::DescriptorCrc
                | SaveError::Sha256
                | SaveError::SectionCrc
                | SaveError::Signature
        )
    }
}

pub type SaveResult<T> = Result<T, SaveError>;

/// 28-byte little-endian file header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaveDescriptor {
    pub version: u32,
    pub timestamp: u32,
    pub section_count: u32,
    pub component_mask: u32,
    pub total_size: u64,
    pub checksum: u32,
}

impl SaveDescriptor {
    fn encode(&self) -> [u8; DESCRIPTOR_SIZE] {
        let mut buf = [0u8; DESCRIPTOR_SIZE];
        LittleEndian::write_u32(&mut buf[0..4], self.version);
        LittleEndian::write_u32(&mut buf[4..8], self.timestamp);
        LittleEndian::write_u32(&mut buf[8..12], self.section_count);
        LittleEndian::write_u32(&mut buf[12..16], self.component_mask);
        LittleEndian::write_u64(&mut buf[16..24], self.total_size);
        LittleEndian::write_u32(&mut buf[24..28], self.checksum);
        buf
    }

    fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < DESCRIPTOR_SIZE {
            return None;
        }
        Some(Self {
            version: LittleEndian::read_u32(&buf[0..4]),
            timestamp: LittleEndian::read_u32(&buf[4..8]),
            section_count: LittleEndian::read_u32(&buf[8..12]),
            component_mask: LittleEndian::read_u32(&buf[12..16]),
            total_size: LittleEndian::read_u64(&buf[16..24]),
            checksum: LittleEndian::read_u32(&buf[24..28]),
        })
    }
}

/// Section metadata surfaced by the iteration API.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct SectionInfo {
    pub id: u16,
    pub stored_size: u32,
    pub compressed: bool,
    pub crc32: u32,
}

#[derive(Debug, Clone)]
struct CachedSection {
    stored: Vec<u8>,
    crc: u32,
}

/// Host endianness probe; the wire format is little-endian and writes are
/// refused on big-endian hosts when strict mode is on.
pub fn format_endianness_is_le() -> bool {
    cfg!(target_endian = "little")
}

pub struct SaveManager {
    dir: PathBuf,
    components: Vec<Box<dyn SaveComponent>>,
    migrations: Vec<Migration>,
    codec: Box<dyn SectionCodec>,
    sig_provider: Option<Box<dyn SignatureProvider>>,

    incremental: bool,
    dirty_mask: u32,
    cached_sections: HashMap<u16, CachedSection>,
    compress_enabled: bool,
    compress_min_bytes: usize,
    durable_writes: bool,
    strict_endian: bool,
    in_save: bool,

    autosave_interval_ms: u32,
    autosave_throttle_ms: u32,
    last_autosave_at_ms: Option<u32>,
    autosave_count: u32,

    inv_metrics: ComponentWriteMetrics,
    last_save_rc: i32,
    last_save_bytes: u32,
    last_save_ms: f64,
    last_sections_reused: u32,
    last_sections_written: u32,
    last_sha256: [u8; 32],
    last_tamper_flags: TamperFlags,
    last_recovery_used: bool,
    last_migration_steps: u32,
    last_migration_failed: bool,
    last_migration_ms: f64,
}

impl Default for SaveManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SaveManager {
    /// Manager with the core component set and migration chain registered.
    /// The save directory comes from `ROGUE_TEST_SAVE_DIR` when set.
    pub fn new() -> Self {
        let dir = std::env::var(SAVE_DIR_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."));
        Self::with_dir(dir)
    }

    pub fn with_dir(dir: impl Into<PathBuf>) -> Self {
        let mut manager = Self {
            dir: dir.into(),
            components: Vec::new(),
            migrations: core_migrations(),
            codec: Box::new(RleCodec),
            sig_provider: None,
            incremental: false,
            dirty_mask: u32::MAX,
            cached_sections: HashMap::new(),
            compress_enabled: false,
            compress_min_bytes: DEFAULT_COMPRESS_MIN_BYTES,
            durable_writes: false,
            strict_endian: false,
            in_save: false,
            autosave_interval_ms: 0,
            autosave_throttle_ms: 0,
            last_autosave_at_ms: None,
            autosave_count: 0,
            inv_metrics: ComponentWriteMetrics::default(),
            last_save_rc: 0,
            last_save_bytes: 0,
            last_save_ms: 0.0,
            last_sections_reused: 0,
            last_sections_written: 0,
            last_sha256: [0; 32],
            last_tamper_flags: TamperFlags::empty(),
            last_recovery_used: false,
            last_migration_steps: 0,
            last_migration_failed: false,
            last_migration_ms: 0.0,
        };
        // Core ids are unique and below the mask limit by construction.
        manager.components = core_components();
        manager.components.sort_by_key(|c| c.id());
        manager
    }

    /// Register an additional component. Ids must be unique and fit the
    /// 32-bit dirty mask.
    pub fn register_component(&mut self, comp: Box<dyn SaveComponent>) -> SaveResult<()> {
        if comp.id() > MAX_COMPONENT_ID {
            return Err(SaveError::BadSlot);
        }
        if self.components.iter().any(|c| c.id() == comp.id()) {
            return Err(SaveError::BadSlot);
        }
        self.components.push(comp);
        self.components.sort_by_key(|c| c.id());
        Ok(())
    }

    pub fn register_migration(&mut self, migration: Migration) {
        self.migrations.push(migration);
        self.migrations.sort_by_key(|m| m.from);
    }

    // ---- configuration ----

    pub fn set_incremental(&mut self, enabled: bool) {
        self.incremental = enabled;
        if enabled {
            self.dirty_mask = u32::MAX;
        } else {
            self.cached_sections.clear();
        }
    }

    pub fn mark_component_dirty(&mut self, id: u16) {
        if id <= MAX_COMPONENT_ID {
            self.dirty_mask |= 1u32 << id;
        }
    }

    pub fn mark_all_dirty(&mut self) {
        self.dirty_mask = u32::MAX;
    }

    pub fn component_is_dirty(&self, id: u16) -> bool {
        id <= MAX_COMPONENT_ID && self.dirty_mask & (1u32 << id) != 0
    }

    pub fn set_compression(&mut self, enabled: bool, min_bytes: usize) {
        self.compress_enabled = enabled;
        self.compress_min_bytes = if min_bytes == 0 {
            DEFAULT_COMPRESS_MIN_BYTES
        } else {
            min_bytes
        };
        // Cached stored payloads embed the compression decision.
        self.cached_sections.clear();
        self.dirty_mask = u32::MAX;
    }

    pub fn set_durable_writes(&mut self, enabled: bool) {
        self.durable_writes = enabled;
    }

    pub fn set_strict_endian(&mut self, enabled: bool) {
        self.strict_endian = enabled;
    }

    pub fn set_signature_provider(&mut self, provider: Option<Box<dyn SignatureProvider>>) {
        self.sig_provider = provider;
    }

    pub fn set_autosave_interval_ms(&mut self, ms: u32) {
        self.autosave_interval_ms = ms;
    }

    pub fn set_autosave_throttle_ms(&mut self, ms: u32) {
        self.autosave_throttle_ms = ms;
    }

    // ---- paths ----

    pub fn slot_path(&self, slot: usize) -> PathBuf {
        self.dir.join(format!("save_slot_{slot}.sav"))
    }

    pub fn autosave_path(&self, logical: usize) -> PathBuf {
        self.dir.join(format!("autosave_{logical}.sav"))
    }

    fn backup_path(&self, slot: usize, timestamp: u32) -> PathBuf {
        self.dir.join(format!("slot_{slot}_{timestamp}.bak"))
    }

    fn quicksave_path(&self) -> PathBuf {
        self.dir.join("quicksave.sav")
    }

    // ---- metrics ----

    pub fn last_save_rc(&self) -> i32 {
        self.last_save_rc
    }

    pub fn last_save_bytes(&self) -> u32 {
        self.last_save_bytes
    }

    pub fn last_save_ms(&self) -> f64 {
        self.last_save_ms
    }

    pub fn last_section_reuse(&self) -> (u32, u32) {
        (self.last_sections_reused, self.last_sections_written)
    }

    pub fn inventory_diff_metrics(&self) -> (u32, u32) {
        (
            self.inv_metrics.records_reused,
            self.inv_metrics.records_rewritten,
        )
    }

    pub fn last_sha256(&self) -> &[u8; 32] {
        &self.last_sha256
    }

    pub fn last_sha256_hex(&self) -> String {
        self.last_sha256.iter().map(|b| format!("{b:02x}")).collect()
    }

    pub fn last_tamper_flags(&self) -> TamperFlags {
        self.last_tamper_flags
    }

    pub fn last_recovery_used(&self) -> bool {
        self.last_recovery_used
    }

    pub fn last_migration_steps(&self) -> u32 {
        self.last_migration_steps
    }

    pub fn last_migration_failed(&self) -> bool {
        self.last_migration_failed
    }

    pub fn last_migration_ms(&self) -> f64 {
        self.last_migration_ms
    }

    pub fn autosave_count(&self) -> u32 {
        self.autosave_count
    }

    /// One-line status suitable for a UI status bar.
    pub fn status_string(&self) -> String {
        format!(
            "save rc={} bytes={} ms={:.2} reused={} written={}",
            self.last_save_rc,
            self.last_save_bytes,
            self.last_save_ms,
            self.last_sections_reused,
            self.last_sections_written
        )
    }

    // ---- save ----

    pub fn save_slot(&mut self, slot: usize, state: &GameState) -> SaveResult<()> {
        if slot >= SAVE_SLOT_COUNT {
            return Err(SaveError::BadSlot);
        }
        let path = self.slot_path(slot);
        self.save_to_path(&path, state)
    }

    pub fn quicksave(&mut self, state: &GameState) -> SaveResult<()> {
        let path = self.quicksave_path();
        self.save_to_path(&path, state)
    }

    /// Write one autosave into the ring and advance the counter.
    pub fn autosave(&mut self, state: &GameState) -> SaveResult<()> {
        let logical = self.autosave_count as usize % AUTOSAVE_RING_SIZE;
        let path = self.autosave_path(logical);
        self.save_to_path(&path, state)?;
        self.autosave_count += 1;
        Ok(())
    }

    /// Autosave scheduler tick: fires when the interval elapsed, combat is
    /// not active and the throttle gap is satisfied.
    pub fn update(&mut self, now_ms: u32, in_combat: bool, state: &GameState) -> SaveResult<bool> {
        if self.autosave_interval_ms == 0 || in_combat {
            return Ok(false);
        }
        let due = match self.last_autosave_at_ms {
            None => true,
            Some(last) => now_ms.wrapping_sub(last) >= self.autosave_interval_ms,
        };
        if !due {
            return Ok(false);
        }
        if let Some(last) = self.last_autosave_at_ms {
            if self.autosave_throttle_ms > 0
                && now_ms.wrapping_sub(last) < self.autosave_throttle_ms
            {
                return Ok(false);
            }
        }
        self.autosave(state)?;
        self.last_autosave_at_ms = Some(now_ms);
        Ok(true)
    }

    fn save_to_path(&mut self, path: &Path, state: &GameState) -> SaveResult<()> {
        if self.in_save {
            return Err(SaveError::InSave);
        }
        if self.strict_endian && !format_endianness_is_le() {
            return Err(SaveError::StrictEndian);
        }
        self.in_save = true;
        let result = self.save_to_path_inner(path, state);
        self.in_save = false;
        self.last_save_rc = match &result {
            Ok(()) => 0,
            Err(e) => e.code(),
        };
        result
    }

    fn save_to_path_inner(&mut self, path: &Path, state: &GameState) -> SaveResult<()> {
        let start = Instant::now();
        self.last_sections_reused = 0;
        self.last_sections_written = 0;
        self.inv_metrics.reset_counters();

        let mut payload: Vec<u8> = Vec::new();
        let mut section_count = 0u32;
        let mut component_mask = 0u32;
        for i in 0..self.components.len() {
            let id = self.components[i].id();
            let cached = if self.incremental && !self.component_is_dirty(id) {
                self.cached_sections
                    .get(&id)
                    .map(|c| (c.stored.clone(), c.crc))
            } else {
                None
            };
            let (stored, crc) = match cached {
                Some(hit) => {
                    self.last_sections_reused += 1;
                    hit
                }
                None => self.write_fresh_section(state, i)?,
            };
            debug!(
                "section id={id} name={} stored={}B crc={crc:#010x}",
                self.components[i].name(),
                strip_marker(&stored).len()
            );
            payload.extend_from_slice(&id.to_le_bytes());
            let mut size_field = strip_marker(&stored).len() as u32;
            if is_compressed_marker(&stored) {
                size_field |= 0x8000_0000;
            }
            payload.extend_from_slice(&size_field.to_le_bytes());
            payload.extend_from_slice(strip_marker(&stored));
            payload.extend_from_slice(&crc.to_le_bytes());
            if self.incremental {
                self.cached_sections.insert(id, CachedSection { stored, crc });
                self.dirty_mask &= !(1u32 << id);
            }
            section_count += 1;
            component_mask |= 1u32 << id;
        }
        if self.incremental {
            self.dirty_mask = 0;
        }

        let checksum = crc32fast::hash(&payload);
        let mut hasher = Sha256::new();
        hasher.update(&payload);
        let digest: [u8; 32] = hasher.finalize().into();
        self.last_sha256 = digest;

        let timestamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or(0);
        let mut descriptor = SaveDescriptor {
            version: CURRENT_SAVE_VERSION,
            timestamp,
            section_count,
            component_mask,
            total_size: 0,
            checksum,
        };

        let mut file_image = Vec::with_capacity(DESCRIPTOR_SIZE + payload.len() + 64);
        file_image.extend_from_slice(&descriptor.encode());
        file_image.extend_from_slice(&payload);
        file_image.extend_from_slice(SHA_MAGIC);
        file_image.extend_from_slice(&digest);
        if let Some(provider) = &self.sig_provider {
            let mut signed_region = payload.clone();
            signed_region.extend_from_slice(SHA_MAGIC);
            signed_region.extend_from_slice(&digest);
            let sig = provider
                .sign(&signed_region)
                .ok_or_else(|| SaveError::Open("signature provider failed".into()))?;
            file_image.extend_from_slice(&(sig.len() as u16).to_le_bytes());
            file_image.extend_from_slice(SIG_MAGIC);
            file_image.extend_from_slice(&sig);
        }
        descriptor.total_size = file_image.len() as u64;
        file_image[..DESCRIPTOR_SIZE].copy_from_slice(&descriptor.encode());

        std::fs::create_dir_all(&self.dir).map_err(|e| SaveError::Open(e.to_string()))?;
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)
            .map_err(|e| SaveError::Open(e.to_string()))?;
        tmp.write_all(&file_image)
            .map_err(|e| SaveError::Open(e.to_string()))?;
        tmp.flush().map_err(|e| SaveError::Open(e.to_string()))?;
        if self.durable_writes {
            tmp.as_file()
                .sync_all()
                .map_err(|e| SaveError::Open(e.to_string()))?;
        }
        tmp.persist(path)
            .map_err(|e| SaveError::Open(e.to_string()))?;

        self.last_save_bytes = descriptor.total_size as u32;
        self.last_save_ms = start.elapsed().as_secs_f64() * 1000.0;
        info!(
            "saved {} ({} bytes, {} sections, {} reused)",
            path.display(),
            self.last_save_bytes,
            section_count,
            self.last_sections_reused
        );
        Ok(())
    }

    /// Serialize one component and wrap it as a stored section payload
    /// (optionally compressed), returning the stored bytes plus their CRC.
    fn write_fresh_section(
        &mut self,
        state: &GameState,
        index: usize,
    ) -> SaveResult<(Vec<u8>, u32)> {
        let mut raw = Vec::new();
        let mut metrics = std::mem::take(&mut self.inv_metrics);
        let result = self.components[index].write(state, &mut metrics, &mut raw);
        self.inv_metrics = metrics;
        result?;
        self.last_sections_written += 1;
        let stored = if self.compress_enabled && raw.len() >= self.compress_min_bytes {
            match self.codec.compress(&raw) {
                Some(packed) if packed.len() + 4 < raw.len() => {
                    let mut stored = Vec::with_capacity(packed.len() + 5);
                    stored.push(COMPRESSED_MARKER);
                    stored.extend_from_slice(&(raw.len() as u32).to_le_bytes());
                    stored.extend_from_slice(&packed);
                    stored
                }
                _ => prepend_plain(raw),
            }
        } else {
            prepend_plain(raw)
        };
        let crc = crc32fast::hash(strip_marker(&stored));
        Ok((stored, crc))
    }

    // ---- load ----

    pub fn read_descriptor(&self, slot: usize) -> SaveResult<SaveDescriptor> {
        if slot >= SAVE_SLOT_COUNT {
            return Err(SaveError::BadSlot);
        }
        Self::read_descriptor_at(&self.slot_path(slot))
    }

    fn read_descriptor_at(path: &Path) -> SaveResult<SaveDescriptor> {
        let bytes = std::fs::read(path).map_err(|e| SaveError::Open(e.to_string()))?;
        SaveDescriptor::decode(&bytes).ok_or(SaveError::ReadHeader)
    }

    pub fn load_slot(&mut self, slot: usize, state: &mut GameState) -> SaveResult<u32> {
        if slot >= SAVE_SLOT_COUNT {
            return Err(SaveError::BadSlot);
        }
        let path = self.slot_path(slot);
        self.load_from_path(&path, state)
    }

    /// Load with autosave-ring fallback: integrity failures on the primary
    /// slot silently fall back to the newest valid autosave, preserving the
    /// original tamper flags.
    pub fn load_slot_with_recovery(&mut self, slot: usize, state: &mut GameState) -> SaveResult<u32> {
        self.last_recovery_used = false;
        let first = self.load_slot(slot, state);
        let err = match first {
            Ok(v) => return Ok(v),
            Err(e) => e,
        };
        if !err.is_integrity() {
            return Err(err);
        }
        let original_flags = self.last_tamper_flags;
        let mut candidates: Vec<(u32, PathBuf)> = Vec::new();
        for logical in 0..AUTOSAVE_RING_SIZE {
            let path = self.autosave_path(logical);
            if let Ok(desc) = Self::read_descriptor_at(&path) {
                if desc.version > 0 && desc.version <= CURRENT_SAVE_VERSION {
                    candidates.push((desc.timestamp, path));
                }
            }
        }
        candidates.sort_by(|a, b| b.0.cmp(&a.0));
        for (_, path) in candidates {
            match self.load_from_path(&path, state) {
                Ok(v) => {
                    warn!("recovered from autosave {}", path.display());
                    self.last_recovery_used = true;
                    self.last_tamper_flags |= original_flags;
                    return Ok(v);
                }
                Err(_) => continue,
            }
        }
        self.last_tamper_flags |= original_flags;
        Err(err)
    }

    fn load_from_path(&mut self, path: &Path, state: &mut GameState) -> SaveResult<u32> {
        if self.strict_endian && !format_endianness_is_le() {
            return Err(SaveError::StrictEndian);
        }
        self.last_tamper_flags = TamperFlags::empty();
        self.last_migration_steps = 0;
        self.last_migration_failed = false;
        self.last_migration_ms = 0.0;

        let bytes = std::fs::read(path).map_err(|e| SaveError::Open(e.to_string()))?;
        let descriptor = SaveDescriptor::decode(&bytes).ok_or(SaveError::ReadHeader)?;
        if descriptor.version == 0 || descriptor.version > CURRENT_SAVE_VERSION {
            return Err(SaveError::Version(descriptor.version));
        }
        if descriptor.total_size != bytes.len() as u64 {
            return Err(SaveError::InvalidSize);
        }
        let rest = &bytes[DESCRIPTOR_SIZE..];

        // Locate the payload boundary by walking the section structure;
        // the integrity footers sit directly after it.
        let crc_region_len =
            payload_region_len(rest, descriptor.version, descriptor.section_count)?;
        let crc_region = &rest[..crc_region_len];
        if crc32fast::hash(crc_region) != descriptor.checksum {
            self.last_tamper_flags |= TamperFlags::DESCRIPTOR_CRC;
            return Err(SaveError::DescriptorCrc);
        }
        if descriptor.version >= 7 {
            if rest.len() < crc_region_len + SHA_FOOTER_SIZE {
                return Err(SaveError::InvalidSize);
            }
            let sha_at = &rest[crc_region_len..crc_region_len + SHA_FOOTER_SIZE];
            if &sha_at[..4] != SHA_MAGIC {
                self.last_tamper_flags |= TamperFlags::SHA256;
                return Err(SaveError::Sha256);
            }
            let mut hasher = Sha256::new();
            hasher.update(crc_region);
            let digest: [u8; 32] = hasher.finalize().into();
            if digest != sha_at[4..] {
                self.last_tamper_flags |= TamperFlags::SHA256;
                return Err(SaveError::Sha256);
            }
            self.last_sha256 = digest;
            // Optional signature block after the SHA footer (v9+):
            // u16 length, SGN0, signature bytes over payload + SHA footer.
            let sig_at = crc_region_len + SHA_FOOTER_SIZE;
            if descriptor.version >= 9 && rest.len() >= sig_at + 6 {
                let sig_len = LittleEndian::read_u16(&rest[sig_at..sig_at + 2]) as usize;
                if &rest[sig_at + 2..sig_at + 6] != SIG_MAGIC
                    || rest.len() < sig_at + 6 + sig_len
                {
                    self.last_tamper_flags |= TamperFlags::SIGNATURE;
                    return Err(SaveError::Signature);
                }
                if let Some(provider) = &self.sig_provider {
                    let signed_region = &rest[..sig_at];
                    let sig_bytes = &rest[sig_at + 6..sig_at + 6 + sig_len];
                    if !provider.verify(signed_region, sig_bytes) {
                        self.last_tamper_flags |= TamperFlags::SIGNATURE;
                        return Err(SaveError::Signature);
                    }
                }
            }
        }

        // Migration chain. Steps run against a scratch copy; the original
        // payload is only replaced when the whole chain succeeds, so a
        // failed step leaves the pre-migration bytes (and the on-disk file)
        // untouched.
        let mut payload = crc_region.to_vec();
        if descriptor.version < CURRENT_SAVE_VERSION {
            let migration_start = Instant::now();
            let mut migrated = payload.clone();
            let mut version = descriptor.version;
            while version < CURRENT_SAVE_VERSION {
                let Some(step) = self
                    .migrations
                    .iter()
                    .find(|m| m.from == version && m.to == version + 1)
                    .copied()
                else {
                    self.last_migration_failed = true;
                    return Err(SaveError::MigrationChain(version));
                };
                if let Err(msg) = (step.apply)(&mut migrated) {
                    self.last_migration_failed = true;
                    return Err(SaveError::MigrationFail(format!("{}: {msg}", step.name)));
                }
                debug!("applied migration {}", step.name);
                version += 1;
                self.last_migration_steps += 1;
            }
            payload = migrated;
            self.last_migration_ms = migration_start.elapsed().as_secs_f64() * 1000.0;
        }

        // Section walk + component dispatch.
        let mut offset = 0usize;
        let mut seen = 0u32;
        while offset < payload.len() {
            if payload.len() - offset < 6 {
                return Err(SaveError::SectionRead);
            }
            let id = LittleEndian::read_u16(&payload[offset..offset + 2]);
            let size_field = LittleEndian::read_u32(&payload[offset + 2..offset + 6]);
            offset += 6;
            let compressed = size_field & 0x8000_0000 != 0;
            let stored_size = (size_field & 0x7FFF_FFFF) as usize;
            if payload.len() - offset < stored_size {
                return Err(SaveError::SectionRead);
            }
            let stored = &payload[offset..offset + stored_size];
            offset += stored_size;
            if descriptor.version >= 7 {
                if payload.len() - offset < 4 {
                    return Err(SaveError::SectionRead);
                }
                let crc = LittleEndian::read_u32(&payload[offset..offset + 4]);
                offset += 4;
                if crc32fast::hash(stored) != crc {
                    self.last_tamper_flags |= TamperFlags::SECTION_CRC;
                    return Err(SaveError::SectionCrc);
                }
            }
            let raw: Vec<u8> = if compressed {
                if stored.len() < 4 {
                    return Err(SaveError::SectionRead);
                }
                let expected = LittleEndian::read_u32(&stored[..4]) as usize;
                self.codec
                    .decompress(&stored[4..], expected)
                    .map_err(|_| SaveError::SectionRead)?
            } else {
                stored.to_vec()
            };
            match self.components.iter().find(|c| c.id() == id) {
                Some(comp) => comp.read(state, &raw, descriptor.version)?,
                None => warn!("unknown save component id {id}, section skipped"),
            }
            seen += 1;
        }
        if seen != descriptor.section_count {
            return Err(SaveError::SectionRead);
        }
        Ok(descriptor.version)
    }

    // ---- section iteration / tooling ----

    /// Iterate section metadata of a slot file without dispatching readers.
    pub fn for_each_section(
        &self,
        slot: usize,
        mut f: impl FnMut(&SectionInfo),
    ) -> SaveResult<u32> {
        if slot >= SAVE_SLOT_COUNT {
            return Err(SaveError::BadSlot);
        }
        let bytes =
            std::fs::read(self.slot_path(slot)).map_err(|e| SaveError::Open(e.to_string()))?;
        let descriptor = SaveDescriptor::decode(&bytes).ok_or(SaveError::ReadHeader)?;
        let sections = Self::collect_sections(&bytes, &descriptor)?;
        for s in &sections {
            f(s);
        }
        Ok(sections.len() as u32)
    }

    fn collect_sections(
        bytes: &[u8],
        descriptor: &SaveDescriptor,
    ) -> SaveResult<Vec<SectionInfo>> {
        if descriptor.total_size != bytes.len() as u64 {
            return Err(SaveError::InvalidSize);
        }
        let rest = &bytes[DESCRIPTOR_SIZE..];
        let len = payload_region_len(rest, descriptor.version, descriptor.section_count)?;
        let payload = &rest[..len];
        let mut sections = Vec::new();
        let mut offset = 0usize;
        while offset < payload.len() {
            if payload.len() - offset < 6 {
                return Err(SaveError::SectionRead);
            }
            let id = LittleEndian::read_u16(&payload[offset..offset + 2]);
            let size_field = LittleEndian::read_u32(&payload[offset + 2..offset + 6]);
            offset += 6;
            let compressed = size_field & 0x8000_0000 != 0;
            let stored_size = (size_field & 0x7FFF_FFFF) as usize;
            if payload.len() - offset < stored_size {
                return Err(SaveError::SectionRead);
            }
            offset += stored_size;
            let crc = if descriptor.version >= 7 {
                if payload.len() - offset < 4 {
                    return Err(SaveError::SectionRead);
                }
                let crc = LittleEndian::read_u32(&payload[offset..offset + 4]);
                offset += 4;
                crc
            } else {
                0
            };
            sections.push(SectionInfo {
                id,
                stored_size: stored_size as u32,
                compressed,
                crc32: crc,
            });
        }
        Ok(sections)
    }

    /// Debug JSON dump of the descriptor and section metadata.
    pub fn export_json(&self, slot: usize) -> SaveResult<String> {
        if slot >= SAVE_SLOT_COUNT {
            return Err(SaveError::BadSlot);
        }
        let bytes =
            std::fs::read(self.slot_path(slot)).map_err(|e| SaveError::Open(e.to_string()))?;
        let descriptor = SaveDescriptor::decode(&bytes).ok_or(SaveError::ReadHeader)?;
        let sections = Self::collect_sections(&bytes, &descriptor)?;
        let value = serde_json::json!({
            "version": descriptor.version,
            "timestamp": descriptor.timestamp,
            "section_count": descriptor.section_count,
            "component_mask": descriptor.component_mask,
            "total_size": descriptor.total_size,
            "checksum": descriptor.checksum,
            "sections": sections,
        });
        serde_json::to_string_pretty(&value).map_err(|e| SaveError::Open(e.to_string()))
    }

    // ---- slot management ----

    pub fn delete_slot(&mut self, slot: usize) -> SaveResult<()> {
        if slot >= SAVE_SLOT_COUNT {
            return Err(SaveError::BadSlot);
        }
        match std::fs::remove_file(self.slot_path(slot)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SaveError::Open(e.to_string())),
        }
    }

    /// Copy the slot file to a timestamped `.bak` and prune the oldest
    /// backups past `max_backups`.
    pub fn backup_rotate(&mut self, slot: usize, max_backups: usize) -> SaveResult<PathBuf> {
        if slot >= SAVE_SLOT_COUNT {
            return Err(SaveError::BadSlot);
        }
        let src = self.slot_path(slot);
        let descriptor = Self::read_descriptor_at(&src)?;
        let mut dst = self.backup_path(slot, descriptor.timestamp);
        // Same-second rotations get a disambiguating suffix.
        let mut bump = 0u32;
        while dst.exists() {
            bump += 1;
            dst = self.backup_path(slot, descriptor.timestamp.wrapping_add(bump));
        }
        std::fs::copy(&src, &dst).map_err(|e| SaveError::Open(e.to_string()))?;
        let prefix = format!("slot_{slot}_");
        let mut backups: Vec<PathBuf> = std::fs::read_dir(&self.dir)
            .map_err(|e| SaveError::Open(e.to_string()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                p.extension().map(|e| e == "bak").unwrap_or(false)
                    && p.file_name()
                        .and_then(|n| n.to_str())
                        .map(|n| n.starts_with(&prefix))
                        .unwrap_or(false)
            })
            .collect();
        backups.sort();
        while backups.len() > max_backups {
            let victim = backups.remove(0);
            let _ = std::fs::remove_file(victim);
        }
        Ok(dst)
    }
}

/// Walk `section_count` sections from the start of `rest` and return the
/// byte length of the section region (the CRC/SHA-covered payload).
fn payload_region_len(rest: &[u8], version: u32, section_count: u32) -> SaveResult<usize> {
    let mut offset = 0usize;
    for _ in 0..section_count {
        if rest.len() - offset < 6 {
            return Err(SaveError::SectionRead);
        }
        let size_field = LittleEndian::read_u32(&rest[offset + 2..offset + 6]);
        offset += 6;
        let stored_size = (size_field & 0x7FFF_FFFF) as usize;
        if rest.len() - offset < stored_size {
            return Err(SaveError::SectionRead);
        }
        offset += stored_size;
        if version >= 7 {
            if rest.len() - offset < 4 {
                return Err(SaveError::SectionRead);
            }
            offset += 4;
        }
    }
    Ok(offset)
}

// Stored payloads carry a one-byte in-memory marker distinguishing
// compressed from plain sections; the marker never reaches the file.
const COMPRESSED_MARKER: u8 = 1;
const PLAIN_MARKER: u8 = 0;

fn prepend_plain(raw: Vec<u8>) -> Vec<u8> {
    let mut stored = Vec::with_capacity(raw.len() + 1);
    stored.push(PLAIN_MARKER);
    stored.extend_from_slice(&raw);
    stored
}

fn is_compressed_marker(stored: &[u8]) -> bool {
    stored.first().copied() == Some(COMPRESSED_MARKER)
}

fn strip_marker(stored: &[u8]) -> &[u8] {
    &stored[1..]
}
