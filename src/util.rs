//! Small shared helpers: key=value block parsing for the plain-text config
//! formats and the upward path scan used when asset files are addressed
//! relative to a test working directory.

use std::path::{Path, PathBuf};

/// Environment variable controlling core log verbosity.
pub const LOG_LEVEL_ENV: &str = "ROGUE_LOG_LEVEL";

/// Verbosity from `ROGUE_LOG_LEVEL` (default WARN). The library never
/// installs a logger; shells feed this into whatever logger they own.
pub fn log_level_from_env() -> log::LevelFilter {
    match std::env::var(LOG_LEVEL_ENV)
        .unwrap_or_default()
        .to_ascii_uppercase()
        .as_str()
    {
        "OFF" => log::LevelFilter::Off,
        "ERROR" => log::LevelFilter::Error,
        "INFO" => log::LevelFilter::Info,
        "DEBUG" => log::LevelFilter::Debug,
        "TRACE" => log::LevelFilter::Trace,
        _ => log::LevelFilter::Warn,
    }
}

/// One `key=value` block from a blank-line-separated config file.
#[derive(Debug, Clone, Default)]
pub struct KvBlock {
    pairs: Vec<(String, String)>,
}

impl KvBlock {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn get_i32(&self, key: &str) -> Option<i32> {
        self.get(key).and_then(|v| v.trim().parse().ok())
    }

    pub fn get_f32(&self, key: &str) -> Option<f32> {
        self.get(key).and_then(|v| v.trim().parse().ok())
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

/// Split text into `key=value` blocks separated by blank lines. Lines
/// without `=` and `#` comments are skipped; keys and values are trimmed.
pub fn parse_kv_blocks(text: &str) -> Vec<KvBlock> {
    let mut blocks = Vec::new();
    let mut cur = KvBlock::default();
    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            if !cur.is_empty() {
                blocks.push(std::mem::take(&mut cur));
            }
            continue;
        }
        if trimmed.starts_with('#') {
            continue;
        }
        if let Some(eq) = trimmed.find('=') {
            let key = trimmed[..eq].trim().to_string();
            let value = trimmed[eq + 1..].trim().to_string();
            cur.pairs.push((key, value));
        }
    }
    if !cur.is_empty() {
        blocks.push(cur);
    }
    blocks
}

/// Parse a flat `key=value` file (no blocks) into pairs.
pub fn parse_kv_flat(text: &str) -> Vec<(String, String)> {
    parse_kv_blocks(text)
        .into_iter()
        .flat_map(|b| b.pairs)
        .collect()
}

/// Resolve `rel` by walking up from `base` at most `max_levels` parents.
/// Returns the first existing candidate.
pub fn find_upwards(base: &Path, rel: &str, max_levels: usize) -> Option<PathBuf> {
    let mut cur = base.to_path_buf();
    for _ in 0..=max_levels {
        let candidate = cur.join(rel);
        if candidate.is_file() {
            return Some(candidate);
        }
        if !cur.pop() {
            break;
        }
    }
    None
}

/// Best-effort locate a config file: the given path first, then an upward
/// scan from the working directory, then from the executable directory.
pub fn locate_config(path: &str) -> Option<PathBuf> {
    let direct = Path::new(path);
    if direct.is_file() {
        return Some(direct.to_path_buf());
    }
    if let Ok(cwd) = std::env::current_dir() {
        if let Some(found) = find_upwards(&cwd, path, 8) {
            return Some(found);
        }
    }
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            if let Some(found) = find_upwards(dir, path, 8) {
                return Some(found);
            }
        }
    }
    None
}
