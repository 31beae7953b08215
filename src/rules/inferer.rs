//! Heuristic classification of anchors, link text, and file names.
//!
//! The inferer is the read side of the rule table: pure functions that map
//! the clues visible in legacy markup (an anchor's `name`, a link's visible
//! text, the basename of a referenced file) to a semantic element tag and a
//! cross-reference type. Results are best-effort; `None` means the caller
//! leaves the node alone.

use super::RuleTable;

/// Four-letter prefixes of body-section headings that legacy links point
/// at ("Introduction", "Métodos", "Discussão", "Referências", ...).
const SECTION_PREFIXES: &[&str] = &[
    "intr", "meto", "mate", "resu", "disc", "conc", "refe", "bibl", "abst", "summ", "ackn", "agra",
];

/// Cross-reference type for an inferred element tag.
pub fn reftype_for(tag: &str) -> &str {
    match tag {
        "table-wrap" => "table",
        "ref" => "bibr",
        other => other,
    }
}

/// Build a document-unique id from an inferred base.
///
/// The base is lowercased; a base not starting with a letter gets a
/// placeholder prefix so the id stays XML-legal. Bodies after the first
/// carry a `-bodyN` suffix to keep ids unique when several bodies of the
/// same document are converted.
pub fn generate_id(base: &str, body_index: u32) -> String {
    let mut id = base.trim().to_lowercase();
    if !id.chars().next().is_some_and(|c| c.is_alphabetic()) {
        id = format!("replace_by_reftype{id}");
    }
    if body_index <= 1 {
        id
    } else {
        format!("{id}-body{body_index}")
    }
}

/// Heuristic classifier over a loaded [`RuleTable`].
#[derive(Debug, Clone, Copy)]
pub struct Inferer<'a> {
    table: &'a RuleTable,
}

impl<'a> Inferer<'a> {
    pub fn new(table: &'a RuleTable) -> Self {
        Self { table }
    }

    /// Classify an anchor `name` attribute.
    ///
    /// Alphabetic names are matched longest-clue-first as prefixes, then as
    /// substrings. A single-letter clue followed by something non-numeric
    /// ("fnote" matching clue "f") is a footnote marker, not the clue's own
    /// tag. Names starting with punctuation are symbol footnotes; anything
    /// else defaults to a footnote.
    pub fn tag_and_reftype_from_name(&self, name: &str) -> Option<(String, String)> {
        let name = name.trim().to_lowercase();
        let first = name.chars().next()?;

        if first.is_alphabetic() {
            for entry in self.table.with_first_char(first) {
                if name.starts_with(&entry.clue) {
                    if entry.clue.chars().count() == 1 {
                        let rest = &name[entry.clue.len()..];
                        if !rest.is_empty() && !rest.chars().all(|c| c.is_ascii_digit()) {
                            return Some(("fn".to_string(), "fn".to_string()));
                        }
                    }
                    return Some((entry.tag.clone(), reftype_for(&entry.tag).to_string()));
                }
            }
            for entry in self.table.entries() {
                if entry.clue.chars().count() > 1 && name.contains(&entry.clue) {
                    return Some((entry.tag.clone(), reftype_for(&entry.tag).to_string()));
                }
            }
            return Some(("fn".to_string(), "fn".to_string()));
        }

        if !first.is_alphanumeric() {
            return Some(("symbol".to_string(), "fn".to_string()));
        }
        Some(("fn".to_string(), "fn".to_string()))
    }

    /// Classify the visible text of a link.
    ///
    /// Leading punctuation (list markers, parentheses) is skipped before
    /// matching. Multi-character clues only; a lone character is a footnote
    /// marker. Section-heading prefixes become internal `target` anchors.
    pub fn tag_and_reftype_from_link_text(&self, text: &str) -> Option<(String, String)> {
        let lower = text.trim().to_lowercase();
        let stripped = lower.trim_start_matches(|c: char| !c.is_alphanumeric());

        if let Some(first) = stripped.chars().next() {
            for entry in self.table.with_first_char(first) {
                if entry.clue.chars().count() > 1 && stripped.starts_with(&entry.clue) {
                    return Some((entry.tag.clone(), reftype_for(&entry.tag).to_string()));
                }
            }
        }

        if lower.chars().count() == 1 {
            return Some(("fn".to_string(), "fn".to_string()));
        }

        let prefix: String = stripped.chars().take(4).collect();
        if SECTION_PREFIXES.contains(&prefix.as_str()) {
            return Some(("target".to_string(), "other".to_string()));
        }

        if stripped.starts_with("corresp") || stripped.starts_with("endere") {
            return Some(("corresp".to_string(), "corresp".to_string()));
        }
        if stripped.contains("image") || stripped.starts_with("imagem") || stripped.starts_with("imagen")
        {
            return Some(("fig".to_string(), "fig".to_string()));
        }
        if stripped.starts_with("anex") || stripped.starts_with("annex") || stripped.starts_with("apend")
        {
            return Some(("app".to_string(), "app".to_string()));
        }

        None
    }

    /// Classify a referenced file path and derive an id from its basename.
    ///
    /// With a `tag` hint, candidates are restricted to that tag's clues
    /// plus a single-letter fallback. A clue matches when it occurs in the
    /// basename with no letter touching either side; the id is the clue
    /// plus whatever follows the match ("fig1.gif" with clue "fig" gives
    /// id "fig1").
    pub fn tag_and_reftype_and_id_from_filepath(
        &self,
        path: &str,
        tag: Option<&str>,
    ) -> Option<(String, String, String)> {
        let base = basename_without_ext(path).to_lowercase();
        if base.is_empty() {
            return None;
        }

        let candidates: Vec<(String, String)> = match tag {
            Some(tag) => {
                let mut c: Vec<(String, String)> = self
                    .table
                    .for_tag(tag)
                    .map(|e| (e.clue.clone(), e.tag.clone()))
                    .collect();
                if let Some(first) = tag.chars().next() {
                    c.push((first.to_string(), tag.to_string()));
                }
                c
            }
            None => self
                .table
                .entries()
                .map(|e| (e.clue.clone(), e.tag.clone()))
                .collect(),
        };

        for (clue, tag) in candidates {
            if clue.is_empty() {
                continue;
            }
            if let Some(pos) = base.find(&clue) {
                let before_ok = base[..pos].chars().next_back().is_none_or(|c| !c.is_alphabetic());
                let after = &base[pos + clue.len()..];
                let after_ok = after.chars().next().is_none_or(|c| !c.is_alphabetic());
                if before_ok && after_ok {
                    let id = format!("{clue}{after}");
                    return Some((tag.clone(), reftype_for(&tag).to_string(), id));
                }
            }
        }
        None
    }
}

/// Basename of a path or URL, without directories, query, or extension.
pub(crate) fn basename_without_ext(path: &str) -> &str {
    let base = path.rsplit(['/', '\\']).next().unwrap_or(path);
    let base = base.split(['?', '#']).next().unwrap_or(base);
    match base.rfind('.') {
        Some(0) | None => base,
        Some(dot) => &base[..dot],
    }
}
