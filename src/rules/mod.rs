//! Clue-to-tag rule table driving reference inference.
//!
//! Rules come from a pipe-delimited data file (`clue|tag`, one per line).
//! The table is sorted longest-clue-first so prefix and substring scans
//! find the most specific rule, and pre-indexed by first character and by
//! target tag. Building the indexes is pure; the sorted form is persisted
//! to a JSON side cache so repeated runs skip the work. The table is
//! read-only after load and safe to share across conversions.

mod inferer;

pub use inferer::{Inferer, generate_id, reftype_for};
pub(crate) use inferer::basename_without_ext;

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// One `clue|tag` mapping from the rules file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleEntry {
    pub clue: String,
    pub tag: String,
}

/// Sorted, indexed rule set.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct RuleTable {
    /// Entries sorted by descending clue length; ties keep file order.
    entries: Vec<RuleEntry>,
    by_first_char: HashMap<char, Vec<usize>>,
    by_tag: HashMap<String, Vec<usize>>,
}

impl RuleTable {
    /// Parse rules from `clue|tag` lines.
    ///
    /// Blank lines and `#` comments are skipped; clues are lowercased.
    pub fn parse(text: &str) -> Result<RuleTable> {
        let mut entries = Vec::new();
        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((clue, tag)) = line.split_once('|') else {
                return Err(Error::Rules(format!(
                    "line {}: expected clue|tag, got {line:?}",
                    lineno + 1
                )));
            };
            let clue = clue.trim().to_lowercase();
            let tag = tag.trim().to_string();
            if clue.is_empty() || tag.is_empty() {
                return Err(Error::Rules(format!("line {}: empty clue or tag", lineno + 1)));
            }
            entries.push(RuleEntry { clue, tag });
        }
        Ok(Self::from_entries(entries))
    }

    fn from_entries(mut entries: Vec<RuleEntry>) -> RuleTable {
        // Stable sort keeps file order among equal-length clues.
        entries.sort_by_key(|e| std::cmp::Reverse(e.clue.chars().count()));

        let mut by_first_char: HashMap<char, Vec<usize>> = HashMap::new();
        let mut by_tag: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, entry) in entries.iter().enumerate() {
            if let Some(first) = entry.clue.chars().next() {
                by_first_char.entry(first).or_default().push(i);
            }
            by_tag.entry(entry.tag.clone()).or_default().push(i);
        }

        RuleTable {
            entries,
            by_first_char,
            by_tag,
        }
    }

    /// Load the table, preferring the JSON side cache next to `cache_dir`.
    ///
    /// The cache content is deterministic for a given rules file, so a
    /// concurrent writer producing the same bytes is harmless.
    pub fn load_or_build(rules_path: &Path, cache_dir: &Path) -> Result<RuleTable> {
        let stem = rules_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "rules".to_string());
        let cache_path = cache_dir.join(format!("{stem}.index.json"));

        if let Ok(bytes) = fs::read(&cache_path) {
            match serde_json::from_slice(&bytes) {
                Ok(table) => {
                    debug!(cache = %cache_path.display(), "loaded rule table from cache");
                    return Ok(table);
                }
                Err(err) => {
                    warn!(cache = %cache_path.display(), %err, "discarding unreadable rule cache");
                }
            }
        }

        let text = fs::read_to_string(rules_path)?;
        let table = Self::parse(&text)?;

        fs::create_dir_all(cache_dir)?;
        match serde_json::to_vec(&table) {
            Ok(bytes) => {
                if let Err(err) = fs::write(&cache_path, bytes) {
                    warn!(cache = %cache_path.display(), %err, "could not persist rule cache");
                }
            }
            Err(err) => warn!(%err, "could not serialize rule cache"),
        }
        Ok(table)
    }

    /// All entries, longest clue first.
    pub fn entries(&self) -> impl Iterator<Item = &RuleEntry> {
        self.entries.iter()
    }

    /// Entries whose clue starts with `c`, longest clue first.
    pub fn with_first_char(&self, c: char) -> impl Iterator<Item = &RuleEntry> {
        self.by_first_char
            .get(&c)
            .into_iter()
            .flatten()
            .map(|&i| &self.entries[i])
    }

    /// Entries mapping to `tag`, longest clue first.
    pub fn for_tag(&self, tag: &str) -> impl Iterator<Item = &RuleEntry> {
        self.by_tag
            .get(tag)
            .into_iter()
            .flatten()
            .map(|&i| &self.entries[i])
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_sorts_longest_first() {
        let table = RuleTable::parse("f|fn\nfig|fig\ntab|table-wrap\n").unwrap();
        let clues: Vec<&str> = table.entries().map(|e| e.clue.as_str()).collect();
        assert_eq!(clues, vec!["fig", "tab", "f"]);
    }

    #[test]
    fn parse_keeps_file_order_on_ties() {
        let table = RuleTable::parse("tab|table-wrap\nfig|fig\n").unwrap();
        let clues: Vec<&str> = table.entries().map(|e| e.clue.as_str()).collect();
        assert_eq!(clues, vec!["tab", "fig"]);
    }

    #[test]
    fn parse_rejects_missing_delimiter() {
        assert!(RuleTable::parse("figfig\n").is_err());
    }

    #[test]
    fn first_char_index_scans_in_sorted_order() {
        let table = RuleTable::parse("f|fn\nfig|fig\n").unwrap();
        let clues: Vec<&str> = table.with_first_char('f').map(|e| e.clue.as_str()).collect();
        assert_eq!(clues, vec!["fig", "f"]);
    }

    #[test]
    fn cache_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let rules_path = dir.path().join("rules.txt");
        std::fs::write(&rules_path, "fig|fig\ntab|table-wrap\n").unwrap();

        let built = RuleTable::load_or_build(&rules_path, dir.path()).unwrap();
        assert_eq!(built.len(), 2);
        assert!(dir.path().join("rules.index.json").exists());

        // Second load hits the cache even if the rules file disappears.
        std::fs::remove_file(&rules_path).unwrap();
        let cached = RuleTable::load_or_build(&rules_path, dir.path()).unwrap();
        let a: Vec<_> = built.entries().collect();
        let b: Vec<_> = cached.entries().collect();
        assert_eq!(a, b);
    }
}
