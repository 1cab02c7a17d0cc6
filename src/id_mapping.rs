//! The short-ID bijection store (§4.3).
//!
//! Maps compact base-36 public identifiers to the 26-char ULID portion of
//! an internal issue id. Stored as a sorted mapping document; serialized
//! order uses a natural (digit-aware) sort so `a2 < a10`.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use rand::Rng;
use serde::{Deserialize, Serialize};

const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const OPTIMAL_LENGTH_THRESHOLD: usize = 50_000;
const MAX_ATTEMPTS_PER_LENGTH: u32 = 10;

/// Errors from short-id resolution and allocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdMappingError {
    /// `resolveToInternalId` was given an input with no mapping entry.
    Unknown {
        /// The offending input, as given.
        input: String,
    },
    /// Allocation exhausted attempts at the optimal length and the next length.
    AllocationExhausted {
        /// Count of ids already present in the mapping.
        existing_count: usize,
    },
}

impl fmt::Display for IdMappingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown { input } => write!(f, "unknown short id `{input}`"),
            Self::AllocationExhausted { existing_count } => {
                write!(f, "short-id allocation exhausted ({existing_count} existing ids)")
            }
        }
    }
}

impl std::error::Error for IdMappingError {}

/// The short-id -> ULID mapping document, plus ids created/recovered by the
/// most recent [`reconcile`] call (exposed for the sync orchestrator's
/// counts-based commit message, §4.7 step 7).
#[derive(Debug, Clone, Default)]
pub struct IdMapping {
    /// short id -> 26-char ULID.
    entries: BTreeMap<String, String>,
}

/// On-disk representation: a flat list so duplicate keys from a prior
/// text-level merge can be detected and reported before collapsing.
#[derive(Debug, Serialize, Deserialize)]
struct OnDiskEntry {
    short_id: String,
    ulid: String,
}

/// Partition of ids produced by [`reconcile`].
#[derive(Debug, Default, Clone)]
pub struct ReconcileOutcome {
    /// Ids that received a brand-new random short id.
    pub created: Vec<String>,
    /// Ids whose short id was recovered from `history`.
    pub recovered: Vec<String>,
}

impl IdMapping {
    /// Load a mapping document, tolerating duplicate keys from a prior
    /// text-level merge (first-occurrence wins; duplicates are warned about).
    ///
    /// # Errors
    /// Any I/O or deserialization failure other than the file being absent
    /// (an absent file loads as an empty mapping).
    pub fn load(path: &Path) -> Result<Self, crate::error::TbdError> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(e.into()),
        };
        let on_disk: Vec<OnDiskEntry> = serde_yaml::from_str(&raw).map_err(|e| crate::error::TbdError::Config {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;

        let mut entries = BTreeMap::new();
        for entry in on_disk {
            if entries.contains_key(&entry.short_id) {
                tracing::warn!(short_id = %entry.short_id, "duplicate short-id entry; keeping first occurrence");
                continue;
            }
            entries.insert(entry.short_id, entry.ulid);
        }
        Ok(Self { entries })
    }

    /// Save the mapping in natural (digit-aware) sorted order, rewriting the
    /// file cleanly (eliminating any duplicates tolerated on load).
    ///
    /// # Errors
    /// Any I/O error writing the document.
    pub fn save(&self, path: &Path) -> Result<(), crate::error::TbdError> {
        let mut keys: Vec<&String> = self.entries.keys().collect();
        keys.sort_by(|a, b| natural_cmp(a, b));
        let on_disk: Vec<OnDiskEntry> = keys
            .into_iter()
            .map(|k| OnDiskEntry {
                short_id: k.clone(),
                ulid: self.entries[k].clone(),
            })
            .collect();
        let text = serde_yaml::to_string(&on_disk).map_err(|e| crate::error::TbdError::Config {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, text)?;
        Ok(())
    }

    /// `optimalLength(n)`: 4 while under 50,000 entries, else 5.
    #[must_use]
    pub const fn optimal_length(n: usize) -> usize {
        if n < OPTIMAL_LENGTH_THRESHOLD {
            4
        } else {
            5
        }
    }

    /// Generate a random unused short id at the optimal length, falling back
    /// to `optimal_length + 1` after 10 failed attempts.
    ///
    /// # Errors
    /// [`IdMappingError::AllocationExhausted`] if both lengths are exhausted.
    pub fn generate_unique_short_id(&self) -> Result<String, IdMappingError> {
        let optimal = Self::optimal_length(self.entries.len());
        for length in [optimal, optimal + 1] {
            for _ in 0..MAX_ATTEMPTS_PER_LENGTH {
                let candidate = random_id(length);
                if !self.entries.contains_key(&candidate) {
                    return Ok(candidate);
                }
            }
        }
        Err(IdMappingError::AllocationExhausted {
            existing_count: self.entries.len(),
        })
    }

    /// Resolve an input (full internal id, bare ULID with/without prefix,
    /// bare short id, or prefixed short id) to its internal ULID.
    ///
    /// # Errors
    /// [`IdMappingError::Unknown`] if the input does not resolve to a short
    /// id present in this mapping (full/bare ULIDs always resolve to
    /// themselves and never error here).
    pub fn resolve_to_internal_id(&self, input: &str) -> Result<String, IdMappingError> {
        let stripped = strip_known_prefix(input).to_lowercase();

        if stripped.len() == 26 {
            return Ok(stripped);
        }

        self.entries
            .get(&stripped)
            .cloned()
            .ok_or_else(|| IdMappingError::Unknown { input: input.to_string() })
    }

    /// Reconcile this mapping against `ids` (the post-merge set of internal
    /// ULIDs): ids already mapped are left alone; unmapped ids recover their
    /// short id from `history` if one exists and is free, otherwise a new
    /// random mapping is created.
    pub fn reconcile(&mut self, ids: &[String], history: &Self) -> ReconcileOutcome {
        let mut outcome = ReconcileOutcome::default();
        let mapped_ulids: std::collections::HashSet<String> = self.entries.values().cloned().collect();

        for ulid in ids {
            if mapped_ulids.contains(ulid) {
                continue;
            }
            if let Some(short_id) = history.short_id_for(ulid)
                && !self.entries.contains_key(&short_id)
            {
                self.entries.insert(short_id.clone(), ulid.clone());
                outcome.recovered.push(ulid.clone());
                continue;
            }
            match self.generate_unique_short_id() {
                Ok(short_id) => {
                    self.entries.insert(short_id, ulid.clone());
                    outcome.created.push(ulid.clone());
                }
                Err(_) => {
                    // Allocation exhausted; leave unmapped rather than panic.
                    // The caller's subsequent `resolve_to_internal_id` calls
                    // for this id will surface `Unknown` until a later
                    // reconcile succeeds (e.g. after manual cleanup).
                    tracing::warn!(ulid = %ulid, "short-id allocation exhausted during reconcile");
                }
            }
        }
        outcome
    }

    /// Merge `other` into `self` (union). On a `(short_id -> differing ULID)`
    /// conflict the local (`self`) side wins, with a warning. On a
    /// `(ULID -> differing short_id)` conflict the local side also wins.
    pub fn merge(&mut self, other: &Self) {
        for (short_id, ulid) in &other.entries {
            match self.entries.get(short_id) {
                Some(existing) if existing != ulid => {
                    tracing::warn!(short_id, local = %existing, remote = %ulid, "short-id conflict; local wins");
                }
                Some(_) => {}
                None => {
                    self.entries.insert(short_id.clone(), ulid.clone());
                }
            }
        }
    }

    /// A copy of this mapping containing only entries whose ULID is in `ulids`.
    #[must_use]
    pub fn subset(&self, ulids: &std::collections::HashSet<String>) -> Self {
        Self {
            entries: self
                .entries
                .iter()
                .filter(|(_, ulid)| ulids.contains(*ulid))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }

    /// The short id currently mapped to `ulid`, if any.
    #[must_use]
    pub fn short_id_for(&self, ulid: &str) -> Option<String> {
        self.entries
            .iter()
            .find(|(_, v)| v.as_str() == ulid)
            .map(|(k, _)| k.clone())
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the mapping has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn strip_known_prefix(input: &str) -> &str {
    match input.split_once('-') {
        Some((_, rest)) if matches!(rest.len(), 26 | 4 | 5) => rest,
        _ => input,
    }
}

fn random_id(length: usize) -> String {
    let mut rng = rand::rng();
    (0..length)
        .map(|_| {
            let idx = rng.random_range(0..ALPHABET.len());
            ALPHABET[idx] as char
        })
        .collect()
}

/// Digit-aware comparison so `a2 < a10` when sorting for serialization.
fn natural_cmp(a: &str, b: &str) -> std::cmp::Ordering {
    let mut ai = a.chars().peekable();
    let mut bi = b.chars().peekable();
    loop {
        match (ai.peek(), bi.peek()) {
            (None, None) => return std::cmp::Ordering::Equal,
            (None, Some(_)) => return std::cmp::Ordering::Less,
            (Some(_), None) => return std::cmp::Ordering::Greater,
            (Some(ac), Some(bc)) => {
                if ac.is_ascii_digit() && bc.is_ascii_digit() {
                    let a_num: String = ai.by_ref().take_while(char::is_ascii_digit).collect();
                    let b_num: String = bi.by_ref().take_while(char::is_ascii_digit).collect();
                    let a_val: u64 = a_num.parse().unwrap_or(0);
                    let b_val: u64 = b_num.parse().unwrap_or(0);
                    match a_val.cmp(&b_val) {
                        std::cmp::Ordering::Equal => {}
                        other => return other,
                    }
                } else {
                    match ac.cmp(bc) {
                        std::cmp::Ordering::Equal => {
                            ai.next();
                            bi.next();
                        }
                        other => return other,
                    }
                }
            }
        }
    }
}

#[cfg(all(test, feature = "proptests"))]
mod property_tests;
