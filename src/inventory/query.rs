//! Inventory query engine: a small recursive-descent expression language
//! over aggregate entries, composite sorting, trigram fuzzy search, an LRU
//! result cache and persisted saved searches.
//!
//! Aggregated predicates (affix_weight, quality, durability_pct) use
//! ANY-instance semantics: a definition matches if at least one active
//! instance satisfies the comparison.

use std::collections::{HashMap, HashSet};

use crate::inventory::entries::InventoryEntries;
use crate::inventory::tags::TagStore;
use crate::items::pool::ItemPool;
use crate::model::item::{ItemCategory, ItemDefRegistry};
use crate::rng::{fnv1a32, fnv1a32_ci};

pub const QUERY_CACHE_MAX: usize = 32;
pub const QUERY_CACHE_RESULT_MAX: usize = 64;
pub const SAVED_SEARCH_MAX: usize = 16;
pub const SAVED_SEARCH_NAME_MAX: usize = 23;
const TRIGRAM_BUCKETS: usize = 64;

/// Read-only state a query evaluates against.
#[derive(Clone, Copy)]
pub struct QueryContext<'a> {
    pub defs: &'a ItemDefRegistry,
    pub entries: &'a InventoryEntries,
    pub tags: &'a TagStore,
    pub pool: &'a ItemPool,
}

// ---- lexer ----

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Eof,
    Ident(String),
    Int(i64),
    Str(String),
    Op(CmpOp),
    LParen,
    RParen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Substr,
}

struct Lexer<'a> {
    rest: &'a str,
    cur: Token,
}

impl<'a> Lexer<'a> {
    fn new(s: &'a str) -> Self {
        let mut lex = Self {
            rest: s,
            cur: Token::Eof,
        };
        lex.advance();
        lex
    }

    fn advance(&mut self) {
        self.rest = self.rest.trim_start();
        let mut chars = self.rest.chars();
        let Some(c) = chars.next() else {
            self.cur = Token::Eof;
            return;
        };
        match c {
            '(' => {
                self.cur = Token::LParen;
                self.rest = &self.rest[1..];
            }
            ')' => {
                self.cur = Token::RParen;
                self.rest = &self.rest[1..];
            }
            '"' => {
                let body = &self.rest[1..];
                let end = body.find('"').unwrap_or(body.len());
                self.cur = Token::Str(body[..end].to_string());
                self.rest = &body[(end + 1).min(body.len())..];
            }
            c if c.is_ascii_digit() => {
                let end = self
                    .rest
                    .find(|ch: char| !ch.is_ascii_digit())
                    .unwrap_or(self.rest.len());
                self.cur = Token::Int(self.rest[..end].parse().unwrap_or(0));
                self.rest = &self.rest[end..];
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let end = self
                    .rest
                    .find(|ch: char| !(ch.is_ascii_alphanumeric() || ch == '_' || ch == '-'))
                    .unwrap_or(self.rest.len());
                self.cur = Token::Ident(self.rest[..end].to_ascii_lowercase());
                self.rest = &self.rest[end..];
            }
            _ => {
                let two = &self.rest[..self.rest.len().min(2)];
                let (op, len) = match two {
                    ">=" => (Some(CmpOp::Ge), 2),
                    "<=" => (Some(CmpOp::Le), 2),
                    "!=" => (Some(CmpOp::Ne), 2),
                    _ => match c {
                        '>' => (Some(CmpOp::Gt), 1),
                        '<' => (Some(CmpOp::Lt), 1),
                        '=' => (Some(CmpOp::Eq), 1),
                        '~' => (Some(CmpOp::Substr), 1),
                        _ => (None, 1),
                    },
                };
                self.rest = &self.rest[len..];
                self.cur = match op {
                    Some(op) => Token::Op(op),
                    None => Token::Eof,
                };
            }
        }
    }
}

// ---- AST ----

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PredField {
    Rarity,
    AffixWeight,
    Tag,
    EquipSlot,
    Quality,
    DurabilityPct,
    Qty,
    Category,
}

#[derive(Debug, Clone)]
struct Predicate {
    field: PredField,
    op: CmpOp,
    int_val: i64,
    str_val: String,
}

#[derive(Debug)]
enum Node {
    Pred(Predicate),
    And(Box<Node>, Box<Node>),
    Or(Box<Node>, Box<Node>),
}

fn field_from_ident(s: &str) -> Option<PredField> {
    match s {
        "rarity" => Some(PredField::Rarity),
        "affix_weight" => Some(PredField::AffixWeight),
        "tag" => Some(PredField::Tag),
        "equip_slot" => Some(PredField::EquipSlot),
        "quality" => Some(PredField::Quality),
        "durability_pct" => Some(PredField::DurabilityPct),
        "qty" | "quantity" => Some(PredField::Qty),
        "category" => Some(PredField::Category),
        _ => None,
    }
}

struct Parser<'a> {
    lexer: Lexer<'a>,
    error: Option<String>,
}

impl<'a> Parser<'a> {
    fn new(s: &'a str) -> Self {
        Self {
            lexer: Lexer::new(s),
            error: None,
        }
    }

    fn fail(&mut self, msg: &str) -> Option<Node> {
        if self.error.is_none() {
            self.error = Some(msg.to_string());
        }
        None
    }

    fn parse_factor(&mut self) -> Option<Node> {
        match self.lexer.cur.clone() {
            Token::LParen => {
                self.lexer.advance();
                let inner = self.parse_expr()?;
                if self.lexer.cur == Token::RParen {
                    self.lexer.advance();
                }
                Some(inner)
            }
            Token::Ident(name) => {
                let Some(field) = field_from_ident(&name) else {
                    return self.fail("unknown field");
                };
                self.lexer.advance();
                let Token::Op(op) = self.lexer.cur.clone() else {
                    return self.fail("expected comparison operator");
                };
                self.lexer.advance();
                let mut pred = Predicate {
                    field,
                    op,
                    int_val: 0,
                    str_val: String::new(),
                };
                match self.lexer.cur.clone() {
                    Token::Int(v) => {
                        pred.int_val = v;
                        self.lexer.advance();
                    }
                    Token::Ident(s) | Token::Str(s) => {
                        pred.str_val = s;
                        self.lexer.advance();
                    }
                    _ => return self.fail("expected value"),
                }
                Some(Node::Pred(pred))
            }
            _ => self.fail("expected predicate or group"),
        }
    }

    fn parse_term(&mut self) -> Option<Node> {
        let mut left = self.parse_factor()?;
        while let Token::Ident(word) = &self.lexer.cur {
            if word != "and" {
                break;
            }
            self.lexer.advance();
            let right = self.parse_factor()?;
            left = Node::And(Box::new(left), Box::new(right));
        }
        Some(left)
    }

    fn parse_expr(&mut self) -> Option<Node> {
        let mut left = self.parse_term()?;
        while let Token::Ident(word) = &self.lexer.cur {
            if word != "or" {
                break;
            }
            self.lexer.advance();
            let right = self.parse_term()?;
            left = Node::Or(Box::new(left), Box::new(right));
        }
        Some(left)
    }
}

// ---- evaluation ----

fn icontains(hay: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return true;
    }
    hay.to_ascii_lowercase().contains(&needle.to_ascii_lowercase())
}

fn compare_int(lhs: i64, rhs: i64, op: CmpOp) -> bool {
    match op {
        CmpOp::Eq => lhs == rhs,
        CmpOp::Ne => lhs != rhs,
        CmpOp::Lt => lhs < rhs,
        CmpOp::Le => lhs <= rhs,
        CmpOp::Gt => lhs > rhs,
        CmpOp::Ge => lhs >= rhs,
        CmpOp::Substr => false,
    }
}

/// Heuristic equip-slot to category mapping.
fn equip_slot_matches(slot: &str, category: ItemCategory) -> bool {
    if icontains(slot, "weapon") {
        return category == ItemCategory::Weapon;
    }
    const ARMOR_WORDS: [&str; 8] =
        ["armor", "helm", "chest", "legs", "ring", "amulet", "belt", "cloak"];
    if ARMOR_WORDS.iter().any(|w| icontains(slot, w)) {
        return category == ItemCategory::Armor;
    }
    category == ItemCategory::Misc
}

fn any_instance(pool: &ItemPool, def_index: usize, mut f: impl FnMut(&crate::items::pool::ItemInstance) -> bool) -> bool {
    pool.iter()
        .any(|(_, it)| it.def_index == def_index && f(it))
}

fn eval_predicate(p: &Predicate, def_index: usize, ctx: &QueryContext) -> bool {
    match p.field {
        PredField::Qty => compare_int(ctx.entries.quantity(def_index) as i64, p.int_val, p.op),
        PredField::Rarity => ctx
            .defs
            .get(def_index)
            .map(|d| compare_int(d.rarity as i64, p.int_val, p.op))
            .unwrap_or(false),
        PredField::Category => {
            let Some(def) = ctx.defs.get(def_index) else {
                return false;
            };
            if p.op == CmpOp::Substr && !p.str_val.is_empty() {
                return icontains(&def.name, &p.str_val);
            }
            let target = if !p.str_val.is_empty() {
                ItemCategory::from_name(&p.str_val)
                    .map(|c| c.code() as i64)
                    .unwrap_or(p.int_val)
            } else {
                p.int_val
            };
            compare_int(def.category.code() as i64, target, p.op)
        }
        PredField::Tag => match p.op {
            CmpOp::Eq => ctx.tags.has_tag(def_index, &p.str_val),
            CmpOp::Ne => !ctx.tags.has_tag(def_index, &p.str_val),
            CmpOp::Substr => ctx
                .tags
                .tags(def_index)
                .iter()
                .any(|t| icontains(t, &p.str_val)),
            _ => false,
        },
        PredField::EquipSlot => ctx
            .defs
            .get(def_index)
            .map(|d| equip_slot_matches(&p.str_val, d.category))
            .unwrap_or(false),
        PredField::AffixWeight => any_instance(ctx.pool, def_index, |it| {
            compare_int(it.total_affix_weight() as i64, p.int_val, p.op)
        }),
        PredField::Quality => any_instance(ctx.pool, def_index, |it| {
            compare_int(it.quality as i64, p.int_val, p.op)
        }),
        PredField::DurabilityPct => any_instance(ctx.pool, def_index, |it| {
            it.durability_max > 0
                && compare_int(
                    (it.durability_cur as i64 * 100) / it.durability_max as i64,
                    p.int_val,
                    p.op,
                )
        }),
    }
}

fn eval_node(node: &Node, def_index: usize, ctx: &QueryContext) -> bool {
    match node {
        Node::Pred(p) => eval_predicate(p, def_index, ctx),
        Node::And(l, r) => eval_node(l, def_index, ctx) && eval_node(r, def_index, ctx),
        Node::Or(l, r) => eval_node(l, def_index, ctx) || eval_node(r, def_index, ctx),
    }
}

// ---- engine ----

#[derive(Debug, Clone)]
struct CacheEntry {
    hash: u32,
    results: Vec<usize>,
    last_use: u64,
}

#[derive(Debug, Clone)]
pub struct SavedSearch {
    pub name: String,
    pub query: String,
    pub sort_keys: String,
}

/// The engine owns the caches, the fuzzy index and saved searches; the
/// queried state is passed per call.
#[derive(Debug, Default)]
pub struct QueryEngine {
    cache: Vec<CacheEntry>,
    cache_stamp: u64,
    cache_enabled: bool,
    cache_hits: u64,
    cache_misses: u64,
    trigrams: HashMap<usize, [u32; TRIGRAM_BUCKETS]>,
    trigram_built: bool,
    trigram_dirty: HashSet<usize>,
    saved: Vec<SavedSearch>,
    last_error: Option<String>,
}

impl QueryEngine {
    pub fn new() -> Self {
        Self {
            cache_enabled: true,
            ..Self::default()
        }
    }

    /// Last parse diagnostic; cleared by the next parse.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Execute an expression over definitions with live quantities. Parse
    /// failures return no matches and record the diagnostic.
    pub fn execute(&mut self, expr: &str, ctx: QueryContext) -> Vec<usize> {
        self.last_error = None;
        if expr.trim().is_empty() {
            return Vec::new();
        }
        let mut parser = Parser::new(expr);
        let node = parser.parse_expr();
        if let Some(err) = parser.error {
            self.last_error = Some(err);
            return Vec::new();
        }
        let Some(node) = node else {
            self.last_error = Some("empty expression".to_string());
            return Vec::new();
        };
        ctx.entries
            .iter()
            .map(|(def, _, _)| def)
            .filter(|&def| eval_node(&node, def, &ctx))
            .collect()
    }

    /// Cached execution keyed by the FNV hash of the expression text.
    pub fn execute_cached(&mut self, expr: &str, ctx: QueryContext) -> Vec<usize> {
        if !self.cache_enabled {
            return self.execute(expr, ctx);
        }
        let hash = fnv1a32(expr);
        self.cache_stamp += 1;
        let stamp = self.cache_stamp;
        if let Some(entry) = self
            .cache
            .iter_mut()
            .find(|e| e.hash == hash && !e.results.is_empty())
        {
            self.cache_hits += 1;
            entry.last_use = stamp;
            return entry.results.clone();
        }
        self.cache_misses += 1;
        let mut results = self.execute(expr, ctx);
        results.truncate(QUERY_CACHE_RESULT_MAX);
        if self.cache.len() < QUERY_CACHE_MAX {
            self.cache.push(CacheEntry {
                hash,
                results: results.clone(),
                last_use: stamp,
            });
        } else if let Some(victim) = self.cache.iter_mut().min_by_key(|e| e.last_use) {
            *victim = CacheEntry {
                hash,
                results: results.clone(),
                last_use: stamp,
            };
        }
        results
    }

    pub fn cache_stats(&self) -> (u64, u64) {
        (self.cache_hits, self.cache_misses)
    }

    pub fn reset_cache_stats(&mut self) {
        self.cache_hits = 0;
        self.cache_misses = 0;
    }

    pub fn set_cache_enabled(&mut self, enabled: bool) {
        self.cache_enabled = enabled;
    }

    pub fn invalidate_cache(&mut self) {
        self.cache.clear();
    }

    /// Instance mutation hook: invalidates the result cache and marks the
    /// definition's trigram row for lazy rebuild.
    pub fn on_instance_mutation(&mut self, def_index: usize) {
        self.trigram_dirty.insert(def_index);
        self.invalidate_cache();
    }

    /// Composite sort, mutating `def_indices` in place. Keys are a comma
    /// list from {rarity, qty, quantity, name, category}; a `-` prefix
    /// sorts that key descending. Returns false on an unknown key.
    pub fn sort(&self, def_indices: &mut [usize], keys: &str, ctx: QueryContext) -> bool {
        #[derive(Clone, Copy, PartialEq, Eq)]
        enum SortKey {
            Rarity,
            Qty,
            Name,
            Category,
        }
        let mut parsed: Vec<(SortKey, bool)> = Vec::new();
        for raw in keys.split(',') {
            let raw = raw.trim().to_ascii_lowercase();
            if raw.is_empty() {
                continue;
            }
            let (name, desc) = match raw.strip_prefix('-') {
                Some(rest) => (rest, true),
                None => (raw.as_str(), false),
            };
            let key = match name {
                "rarity" => SortKey::Rarity,
                "qty" | "quantity" => SortKey::Qty,
                "name" => SortKey::Name,
                "category" => SortKey::Category,
                _ => return false,
            };
            parsed.push((key, desc));
            if parsed.len() == 4 {
                break;
            }
        }
        if parsed.is_empty() {
            return true;
        }
        let decorate = |def: usize| -> Vec<i64> {
            let d = ctx.defs.get(def);
            parsed
                .iter()
                .map(|&(key, desc)| {
                    let v = match key {
                        SortKey::Rarity => d.map(|d| d.rarity as i64).unwrap_or(0),
                        SortKey::Qty => ctx.entries.quantity(def).min(i64::MAX as u64) as i64,
                        SortKey::Name => {
                            d.map(|d| fnv1a32_ci(&d.name) as i64).unwrap_or(0)
                        }
                        SortKey::Category => d.map(|d| d.category.code() as i64).unwrap_or(0),
                    };
                    if desc {
                        -v
                    } else {
                        v
                    }
                })
                .collect()
        };
        let mut decorated: Vec<(Vec<i64>, usize)> = def_indices
            .iter()
            .map(|&def| (decorate(def), def))
            .collect();
        decorated.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));
        for (slot, (_, def)) in def_indices.iter_mut().zip(decorated) {
            *slot = def;
        }
        true
    }

    // ---- fuzzy search ----

    fn trigram_row(name: &str) -> [u32; TRIGRAM_BUCKETS] {
        let mut row = [0u32; TRIGRAM_BUCKETS];
        let lower: Vec<u8> = name
            .bytes()
            .filter_map(|b| {
                let c = b.to_ascii_lowercase();
                if c.is_ascii_lowercase() || c == b' ' {
                    Some(c)
                } else {
                    None
                }
            })
            .collect();
        if lower.len() < 3 {
            return row;
        }
        for w in lower.windows(3) {
            if w.contains(&b' ') {
                continue;
            }
            let h = ((w[0] as u32) << 16) ^ ((w[1] as u32) << 8) ^ (w[2] as u32);
            let bucket = ((h >> 26) & 63) as usize;
            row[bucket] |= 1u32 << (h & 31);
        }
        row
    }

    fn query_bits(text: &str) -> Option<[u32; TRIGRAM_BUCKETS]> {
        let lower: Vec<u8> = text
            .bytes()
            .filter_map(|b| {
                let c = b.to_ascii_lowercase();
                c.is_ascii_lowercase().then_some(c)
            })
            .collect();
        if lower.len() < 3 {
            return None;
        }
        let mut bits = [0u32; TRIGRAM_BUCKETS];
        for w in lower.windows(3) {
            let h = ((w[0] as u32) << 16) ^ ((w[1] as u32) << 8) ^ (w[2] as u32);
            let bucket = ((h >> 26) & 63) as usize;
            bits[bucket] |= 1u32 << (h & 31);
        }
        Some(bits)
    }

    /// Rebuild the whole index from definitions with live quantities.
    pub fn rebuild_fuzzy_index(&mut self, ctx: QueryContext) {
        self.trigrams.clear();
        self.trigram_dirty.clear();
        for (def, _, _) in ctx.entries.iter() {
            if let Some(d) = ctx.defs.get(def) {
                self.trigrams.insert(def, Self::trigram_row(&d.name));
            }
        }
        self.trigram_built = true;
    }

    /// Fuzzy name search: query trigram bits must be a subset of the
    /// definition's row. Dirty rows are rebuilt lazily.
    pub fn fuzzy_search(&mut self, text: &str, ctx: QueryContext) -> Vec<usize> {
        let Some(query) = Self::query_bits(text) else {
            return Vec::new();
        };
        if !self.trigram_built {
            self.rebuild_fuzzy_index(ctx);
        } else {
            let dirty: Vec<usize> = self.trigram_dirty.drain().collect();
            for def in dirty {
                if ctx.entries.quantity(def) > 0 {
                    if let Some(d) = ctx.defs.get(def) {
                        self.trigrams.insert(def, Self::trigram_row(&d.name));
                        continue;
                    }
                }
                self.trigrams.remove(&def);
            }
        }
        let mut out: Vec<usize> = ctx
            .entries
            .iter()
            .filter_map(|(def, _, _)| {
                let row = self.trigrams.get(&def)?;
                let subset = query
                    .iter()
                    .zip(row.iter())
                    .all(|(q, r)| q & r == *q);
                subset.then_some(def)
            })
            .collect();
        out.sort_unstable();
        out
    }

    // ---- saved searches ----

    pub fn saved_count(&self) -> usize {
        self.saved.len()
    }

    pub fn saved_at(&self, index: usize) -> Option<&SavedSearch> {
        self.saved.get(index)
    }

    pub fn saved_name(&self, index: usize) -> Option<&str> {
        self.saved.get(index).map(|s| s.name.as_str())
    }

    /// Store or overwrite a saved search by (case-insensitive) name.
    pub fn store_saved(&mut self, name: &str, query: &str, sort_keys: &str) -> bool {
        if name.is_empty() || name.len() > SAVED_SEARCH_NAME_MAX || query.is_empty() {
            return false;
        }
        if let Some(existing) = self
            .saved
            .iter_mut()
            .find(|s| s.name.eq_ignore_ascii_case(name))
        {
            existing.query = query.to_string();
            existing.sort_keys = sort_keys.to_string();
            return true;
        }
        if self.saved.len() >= SAVED_SEARCH_MAX {
            return false;
        }
        self.saved.push(SavedSearch {
            name: name.to_string(),
            query: query.to_string(),
            sort_keys: sort_keys.to_string(),
        });
        true
    }

    pub fn get_saved(&self, name: &str) -> Option<&SavedSearch> {
        self.saved.iter().find(|s| s.name.eq_ignore_ascii_case(name))
    }

    /// Execute a saved search (cached) and apply its sort keys.
    pub fn apply_saved(&mut self, name: &str, ctx: QueryContext) -> Vec<usize> {
        let Some(saved) = self.get_saved(name).cloned() else {
            return Vec::new();
        };
        let mut results = self.execute_cached(&saved.query, ctx);
        if !results.is_empty() && !saved.sort_keys.is_empty() {
            self.sort(&mut results, &saved.sort_keys, ctx);
        }
        results
    }

    // Quick-action bar wrappers: index-based access to the saved searches.

    pub fn quick_action_count(&self) -> usize {
        self.saved_count()
    }

    pub fn quick_action_name(&self, index: usize) -> Option<&str> {
        self.saved_name(index)
    }

    pub fn quick_action_apply(&mut self, index: usize, ctx: QueryContext) -> Vec<usize> {
        let Some(name) = self.saved_name(index).map(str::to_string) else {
            return Vec::new();
        };
        self.apply_saved(&name, ctx)
    }

    pub(crate) fn clear_saved(&mut self) {
        self.saved.clear();
    }

    pub(crate) fn install_saved(&mut self, search: SavedSearch) -> bool {
        if self.saved.len() >= SAVED_SEARCH_MAX {
            return false;
        }
        self.saved.push(search);
        true
    }
}
