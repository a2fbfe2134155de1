// src/idmap.rs
//
// =============================================================================
// FLOWBRIDGE: ID MAPPER & HANDLE DERIVATION
// =============================================================================
//
// Generators build the target tree with source IDs first, accumulating an
// old -> new table here, then run one finalize walk that rewrites every
// ID-bearing field. This keeps the remap out of every sub-generator's
// signature.
//
// All randomness routes through the injectable `IdSource`: seeded in tests,
// UUID-backed in production. Two conversions on the same bytes with the same
// source produce byte-identical output.

use crate::model::{ComparisonOperator, ConditionCase};
use crate::vars::sanitize_id_fragment;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

// ============================================================================
// 1. ID SOURCE
// ============================================================================

pub trait IdSource: Send {
    /// A fresh UUIDv4-shaped string.
    fn uuid(&mut self) -> String;

    /// Four lowercase hex characters.
    fn short_hex(&mut self) -> String;

    /// A fresh 13-digit numeric ID (Dify-style timestamp shape).
    fn numeric(&mut self) -> u64;
}

/// Production source: cryptographically strong UUIDs, numeric IDs anchored
/// to the current epoch milliseconds.
pub struct SystemIds {
    next_numeric: u64,
}

impl SystemIds {
    pub fn new() -> Self {
        Self {
            next_numeric: chrono::Utc::now().timestamp_millis() as u64,
        }
    }
}

impl Default for SystemIds {
    fn default() -> Self {
        Self::new()
    }
}

impl IdSource for SystemIds {
    fn uuid(&mut self) -> String {
        Uuid::new_v4().to_string()
    }

    fn short_hex(&mut self) -> String {
        Uuid::new_v4().simple().to_string()[..4].to_string()
    }

    fn numeric(&mut self) -> u64 {
        let id = self.next_numeric;
        self.next_numeric += 1;
        id
    }
}

/// Deterministic source for tests and reproducible batch runs.
pub struct SeededIds {
    state: u64,
    next_numeric: u64,
}

impl SeededIds {
    pub fn new(seed: u64) -> Self {
        Self {
            state: seed.max(1),
            next_numeric: 1_700_000_000_000,
        }
    }

    fn next(&mut self) -> u64 {
        // xorshift64
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }
}

impl IdSource for SeededIds {
    fn uuid(&mut self) -> String {
        let a = self.next();
        let b = self.next();
        format!(
            "{:08x}-{:04x}-4{:03x}-8{:03x}-{:012x}",
            (a >> 32) as u32,
            (a >> 16) as u16,
            (a & 0xFFF) as u16,
            (b >> 48) as u16 & 0xFFF,
            b & 0xFFFF_FFFF_FFFF
        )
    }

    fn short_hex(&mut self) -> String {
        format!("{:04x}", self.next() & 0xFFFF)
    }

    fn numeric(&mut self) -> u64 {
        let id = self.next_numeric;
        self.next_numeric += 1;
        id
    }
}

// ============================================================================
// 2. THE REMAP TABLE
// ============================================================================

#[derive(Debug, Default)]
pub struct IdMapper {
    map: HashMap<String, String>,
    used: HashSet<String>,
}

impl IdMapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `old -> new`. The new ID is marked used.
    pub fn insert(&mut self, old: impl Into<String>, new: impl Into<String>) {
        let new = new.into();
        self.used.insert(new.clone());
        self.map.insert(old.into(), new);
    }

    /// Reserve an ID without mapping anything onto it (e.g. synthetic
    /// iteration-start nodes derived from their parent).
    pub fn reserve(&mut self, id: impl Into<String>) {
        self.used.insert(id.into());
    }

    pub fn resolve(&self, old: &str) -> Option<&str> {
        self.map.get(old).map(String::as_str)
    }

    /// Remapped ID, or the original when no entry exists.
    pub fn rewrite(&self, id: &str) -> String {
        self.resolve(id).unwrap_or(id).to_string()
    }

    /// Rewrite a `[node_id, field, ...]` selector head in place.
    pub fn rewrite_selector(&self, selector: &mut [String]) {
        if let Some(head) = selector.first_mut() {
            if let Some(new) = self.resolve(head) {
                *head = new.to_string();
            }
        }
    }

    pub fn is_used(&self, id: &str) -> bool {
        self.used.contains(id)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

// ============================================================================
// 3. CONDITION-CASE HANDLES
// ============================================================================

/// Tokens every platform understands without translation.
fn is_canonical_case_token(s: &str) -> bool {
    if matches!(s, "true" | "false" | "default") {
        return true;
    }
    !s.is_empty() && s.len() <= 2 && s.bytes().all(|b| b.is_ascii_digit())
}

/// Derive a target-side handle for a non-default condition case.
///
/// Scheme: keep canonical tokens; otherwise `{operator}_{sanitized_value}`
/// from the first condition, made unique within the node by `_1`, `_2`, ...
/// and, as a last resort, a 4-hex suffix from the ID source.
pub fn derive_case_handle(
    case: &ConditionCase,
    used: &mut HashSet<String>,
    ids: &mut dyn IdSource,
) -> String {
    if is_canonical_case_token(&case.case_id) && used.insert(case.case_id.clone()) {
        return case.case_id.clone();
    }

    let base = match case.conditions.first() {
        Some(cond) => {
            let fragment = sanitize_id_fragment(&cond.value);
            let op = operator_token(cond.comparison_operator);
            if fragment.is_empty() {
                format!("{op}_condition")
            } else {
                format!("{op}_{fragment}")
            }
        }
        None => "condition".to_string(),
    };

    if used.insert(base.clone()) {
        return base;
    }
    for n in 1..=32 {
        let candidate = format!("{base}_{n}");
        if used.insert(candidate.clone()) {
            return candidate;
        }
    }
    // Pathological collision density; fall back to a random suffix.
    let candidate = format!("{base}_{}", ids.short_hex());
    used.insert(candidate.clone());
    candidate
}

fn operator_token(op: ComparisonOperator) -> &'static str {
    use ComparisonOperator::*;
    match op {
        Equal => "is",
        NotEqual => "not",
        Contains => "contains",
        NotContains => "excludes",
        StartsWith => "starts",
        EndsWith => "ends",
        GreaterThan => "gt",
        LessThan => "lt",
        GreaterOrEqual => "ge",
        LessOrEqual => "le",
        Empty => "empty",
        NotEmpty => "filled",
    }
}

// ============================================================================
// 4. CLASSIFIER HANDLES
// ============================================================================

/// Deterministic fallback when neither the ordinal nor the semantic mapping
/// applies: hash the source ID into 1..=9 so conversion stays reproducible.
pub fn classifier_hash_handle(source_id: &str) -> u32 {
    let digest = Sha256::digest(source_id.as_bytes());
    (digest[0] as u32 % 9) + 1
}

/// Semantic classifier handle from a class name, unique within the node.
pub fn semantic_class_handle(name: &str, used: &mut HashSet<String>) -> String {
    let base = {
        let s = sanitize_id_fragment(name);
        if s.is_empty() {
            "class".to_string()
        } else {
            s
        }
    };
    if used.insert(base.clone()) {
        return base;
    }
    let mut n = 1;
    loop {
        let candidate = format!("{base}_{n}");
        if used.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}
