//! Structural normalization passes.
//!
//! These run before reference annotation and rewrite legacy presentation
//! markup into the target vocabulary: deprecated wrappers are stripped,
//! blocks and emphasis retagged, tables cleaned, line breaks resolved, and
//! the body's direct children put into a schema-legal shape. Each pass is
//! small and order-dependent; see the pass table in `pipeline::mod`.

use std::collections::HashMap;

use tracing::warn;

use super::PassState;
use crate::dom::{Document, NodeId, is_blank};
use crate::error::Result;

/// Presentational wrappers removed content-preserving.
const DEPRECATED_TAGS: &[&str] = &[
    "font", "small", "big", "dir", "span", "s", "center", "blink", "tt", "nobr", "wbr",
];

/// Elements that may legitimately be empty.
const EMPTY_EXEMPT: &[&str] = &["a", "br", "img", "hr"];

/// Elements that keep their `style` attribute (table structure only).
const STYLE_KEEP: &[&str] = &[
    "table", "tr", "td", "th", "caption", "col", "colgroup", "thead", "tbody", "tfoot",
    "style-content",
];

/// Containers where `br` means a hard line break rather than a paragraph
/// boundary.
const BREAK_CONTAINERS: &[&str] = &["label", "title", "caption", "th", "td"];

/// Inline style tags, legacy and converted forms.
const STYLE_TAGS: &[&str] = &["b", "i", "em", "strong", "u", "bold", "italic", "underline"];

/// Parents where a paragraph is structurally expected.
const P_PARENTS: &[&str] = &[
    "body", "sec", "list-item", "def", "def-item", "disp-quote", "fn", "app", "boxed-text",
    "caption", "abstract", "trans-abstract", "td", "th",
];

/// `list-item` children that stay unwrapped.
const LIST_ITEM_KEEP: &[&str] = &["label", "title", "p", "def-list", "list"];

const TABLE_ATTRS: &[&str] = &[
    "id", "frame", "rules", "border", "cellspacing", "cellpadding", "width", "summary", "style",
];
const CELL_ATTRS: &[&str] = &[
    "align", "valign", "rowspan", "colspan", "char", "charoff", "scope", "headers", "style",
];
const TABLE_CHILDREN: &[&str] = &["caption", "col", "colgroup", "thead", "tbody", "tfoot", "tr"];
const CELL_CHILDREN: &[&str] = &[
    "p", "bold", "italic", "underline", "sup", "sub", "a", "img", "graphic", "inline-graphic",
    "xref", "break", "list", "def-list", "ext-link", "named-content", "table",
];

/// Text-bearing parents that demand the inline form of a graphic.
const INLINE_PARENTS: &[&str] = &[
    "p", "bold", "italic", "underline", "sup", "sub", "td", "th", "label", "title", "attrib",
    "term", "named-content", "styled-content", "a", "xref",
];

/// `disp-quote` children that stay unwrapped.
const DISP_QUOTE_KEEP: &[&str] = &["p", "disp-quote", "attrib"];

/// Tags allowed as direct children of `body`.
const BODY_CHILDREN: &[&str] = &[
    "p", "sec", "list", "def-list", "disp-quote", "table-wrap", "table-wrap-group", "table",
    "fig", "fig-group", "fn", "fn-group", "app", "app-group", "disp-formula",
    "disp-formula-group", "graphic", "media", "preformat", "code", "boxed-text", "verse-group",
    "supplementary-material", "related-article", "ack", "ref-list", "sig-block", "target",
];

pub(crate) fn strip_deprecated_tags(doc: &mut Document, st: &PassState) -> Result<()> {
    for tag in DEPRECATED_TAGS {
        doc.strip_tag(st.body, tag);
    }
    Ok(())
}

/// Suffix repeated `id` values so id-based lookups are unambiguous.
///
/// The first occurrence keeps the original value; later ones get
/// `-duplicate-N` with N counting duplicates from zero.
pub(crate) fn disambiguate_duplicate_ids(doc: &mut Document, st: &PassState) -> Result<()> {
    let mut seen: HashMap<String, u32> = HashMap::new();
    for d in doc.descendants(st.body) {
        let Some(id) = doc.attr(d, "id").map(str::to_string) else {
            continue;
        };
        match seen.get_mut(&id) {
            None => {
                seen.insert(id, 0);
            }
            Some(n) => {
                let renamed = format!("{id}-duplicate-{n}");
                *n += 1;
                doc.set_attr(d, "id", &renamed);
            }
        }
    }
    Ok(())
}

/// Remove emphasis markers that contain no visible text.
pub(crate) fn strip_exceeding_styles(doc: &mut Document, st: &PassState) -> Result<()> {
    for d in doc.descendants(st.body) {
        if STYLE_TAGS.contains(&doc.tag(d)) && doc.text_content(d).trim().is_empty() {
            doc.unwrap_node(d);
        }
    }
    Ok(())
}

/// Drop empty elements until none remain.
///
/// Removing an empty child can leave its parent empty, so the scan repeats
/// to a fixed point. Node count strictly decreases each round.
pub(crate) fn remove_empty_elements(doc: &mut Document, st: &PassState) -> Result<()> {
    loop {
        let mut removed = false;
        let mut nodes = doc.descendants(st.body);
        nodes.reverse();
        for d in nodes {
            if doc.is_comment(d) || EMPTY_EXEMPT.contains(&doc.tag(d)) {
                continue;
            }
            if doc.children(d).is_empty() && is_blank(doc.text(d)) && doc.parent(d).is_some() {
                doc.remove(d, false);
                removed = true;
            }
        }
        if !removed {
            break;
        }
    }
    Ok(())
}

pub(crate) fn strip_style_attributes(doc: &mut Document, st: &PassState) -> Result<()> {
    for d in doc.descendants(st.body) {
        if !STYLE_KEEP.contains(&doc.tag(d)) {
            doc.remove_attr(d, "style");
        }
    }
    Ok(())
}

/// Resolve `br`: a hard break in label-like containers, a paragraph split
/// inside `p`, and plain removal everywhere else.
pub(crate) fn normalize_line_breaks(doc: &mut Document, st: &PassState) -> Result<()> {
    for d in doc.descendants(st.body) {
        if doc.tag(d) == "br"
            && let Some(parent) = doc.parent(d)
            && BREAK_CONTAINERS.contains(&doc.tag(parent))
        {
            doc.set_tag(d, "break");
        }
    }

    loop {
        let split = doc.descendants(st.body).into_iter().find(|&d| {
            doc.tag(d) == "p" && doc.children(d).iter().any(|&c| doc.tag(c) == "br")
        });
        let Some(p) = split else { break };
        split_paragraph_at_break(doc, p);
    }

    for d in doc.descendants(st.body) {
        if doc.tag(d) == "br" {
            doc.remove(d, false);
        }
    }
    Ok(())
}

/// Split `p` into two sibling paragraphs at its first direct `br`.
fn split_paragraph_at_break(doc: &mut Document, p: NodeId) {
    let Some(br) = doc
        .children(p)
        .iter()
        .copied()
        .find(|&c| doc.tag(c) == "br")
    else {
        return;
    };
    let Some(pos) = doc.position(br) else { return };
    let rest: Vec<NodeId> = doc.children(p)[pos + 1..].to_vec();

    let next = doc.create_element("p");
    let text = doc.take_tail(br);
    doc.set_text(next, text);
    let tail = doc.take_tail(p);
    doc.set_tail(next, tail);
    doc.insert_after(p, next);
    for c in rest {
        doc.append(next, c);
    }
    doc.detach(br);
}

/// Map legacy block and inline tags onto the target vocabulary.
pub(crate) fn convert_blocks(doc: &mut Document, st: &PassState) -> Result<()> {
    for d in doc.descendants(st.body) {
        let tag = doc.tag(d).to_string();
        match tag.as_str() {
            "p" => {
                retain_attrs(doc, d, &["id", "content-type"], false);
                if let Some(parent) = doc.parent(d) {
                    let ptag = doc.tag(parent);
                    if ptag != "#document" && !P_PARENTS.contains(&ptag) {
                        warn!(pid = %st.ctx.pid, parent = %ptag, "paragraph in unexpected container");
                    }
                }
            }
            "div" => {
                doc.set_tag(d, "p");
                retain_attrs(doc, d, &["id"], false);
            }
            "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
                doc.set_tag(d, "p");
                retain_attrs(doc, d, &["id"], false);
                doc.set_attr(d, "content-type", &tag);
            }
            "hr" => {
                doc.set_tag(d, "p");
                doc.clear_attrs(d);
                doc.set_attr(d, "content-type", "hr");
            }
            "i" | "em" => doc.set_tag(d, "italic"),
            "b" | "strong" => doc.set_tag(d, "bold"),
            "u" => doc.set_tag(d, "underline"),
            "blockquote" => {
                doc.set_tag(d, "disp-quote");
            }
            "ol" => {
                doc.set_tag(d, "list");
                retain_attrs(doc, d, &["id"], false);
                doc.set_attr(d, "list-type", "order");
            }
            "ul" => {
                doc.set_tag(d, "list");
                retain_attrs(doc, d, &["id"], false);
                doc.set_attr(d, "list-type", "bullet");
            }
            "dl" => {
                doc.set_tag(d, "def-list");
                retain_attrs(doc, d, &["id"], false);
            }
            "dd" => {
                doc.set_tag(d, "def-item");
                retain_attrs(doc, d, &["id"], false);
            }
            "dt" => {
                doc.set_tag(d, "term");
                retain_attrs(doc, d, &["id"], false);
            }
            "li" => convert_list_item(doc, d),
            _ => {}
        }
    }
    Ok(())
}

/// `li` → `list-item`, with bare text and inline children grouped into
/// synthetic paragraphs.
fn convert_list_item(doc: &mut Document, li: NodeId) {
    doc.set_tag(li, "list-item");
    retain_attrs(doc, li, &["id"], false);

    let original: Vec<NodeId> = doc.children(li).to_vec();
    let mut wrap: Option<NodeId> = None;
    match doc.take_text(li) {
        Some(text) if !text.trim().is_empty() => {
            let p = doc.create_element("p");
            doc.set_text(p, Some(text));
            doc.insert_child(li, 0, p);
            wrap = Some(p);
        }
        _ => {}
    }
    for c in original {
        if LIST_ITEM_KEEP.contains(&doc.tag(c)) {
            wrap = None;
            if !is_blank(doc.tail(c)) {
                let p = doc.create_element("p");
                let tail = doc.take_tail(c);
                doc.set_text(p, tail);
                doc.insert_after(c, p);
                wrap = Some(p);
            }
            continue;
        }
        let w = match wrap {
            Some(w) => w,
            None => {
                let p = doc.create_element("p");
                doc.insert_before(c, p);
                wrap = Some(p);
                p
            }
        };
        doc.append(w, c);
    }
}

/// Reduce tables to the schema's attribute and child allow-lists.
///
/// Kept attribute values are lowercased; disallowed children are discarded
/// outright, not inlined.
pub(crate) fn clean_tables(doc: &mut Document, st: &PassState) -> Result<()> {
    for d in doc.descendants(st.body) {
        match doc.tag(d) {
            "table" => {
                retain_attrs(doc, d, TABLE_ATTRS, true);
                discard_children(doc, d, TABLE_CHILDREN);
            }
            "td" | "th" => {
                retain_attrs(doc, d, CELL_ATTRS, true);
                discard_children(doc, d, CELL_CHILDREN);
            }
            _ => {}
        }
    }
    Ok(())
}

fn discard_children(doc: &mut Document, parent: NodeId, allowed: &[&str]) {
    for c in doc.children(parent).to_vec() {
        if doc.is_comment(c) || allowed.contains(&doc.tag(c)) {
            continue;
        }
        doc.detach(c);
        doc.set_tail(c, None);
    }
}

/// A graphic sitting in running text is an `inline-graphic`.
pub(crate) fn promote_inline_graphics(doc: &mut Document, st: &PassState) -> Result<()> {
    for d in doc.descendants(st.body) {
        if doc.tag(d) == "graphic"
            && let Some(parent) = doc.parent(d)
            && INLINE_PARENTS.contains(&doc.tag(parent))
        {
            doc.set_tag(d, "inline-graphic");
        }
    }
    Ok(())
}

/// Give every `disp-quote` schema-legal content: attributes cleared, bare
/// text promoted to paragraphs, stray children wrapped.
pub(crate) fn normalize_disp_quotes(doc: &mut Document, st: &PassState) -> Result<()> {
    for dq in doc.find_all(st.body, "disp-quote") {
        doc.clear_attrs(dq);
        match doc.take_text(dq) {
            Some(text) if !text.trim().is_empty() => {
                let p = doc.create_element("p");
                doc.set_text(p, Some(text));
                doc.insert_child(dq, 0, p);
            }
            _ => {}
        }
        for c in doc.children(dq).to_vec() {
            if doc.is_comment(c) {
                continue;
            }
            if !is_blank(doc.tail(c)) {
                let p = doc.create_element("p");
                let tail = doc.take_tail(c);
                doc.set_text(p, tail);
                doc.insert_after(c, p);
            }
            if !DISP_QUOTE_KEEP.contains(&doc.tag(c)) {
                doc.wrap(c, "p");
            }
        }
    }
    Ok(())
}

pub(crate) fn remove_comments(doc: &mut Document, st: &PassState) -> Result<()> {
    for d in doc.descendants(st.body) {
        if doc.is_comment(d) {
            doc.remove(d, false);
        }
    }
    Ok(())
}

/// Dissolve paragraphs nested inside paragraphs.
///
/// The outer `p`'s leading text and inline children regroup into sibling
/// paragraphs before it, inner paragraphs move up unchanged, and the
/// emptied wrapper is removed. Repeats until no `p` contains a `p`; each
/// round removes one wrapper, so the loop is bounded.
pub(crate) fn flatten_nested_paragraphs(doc: &mut Document, st: &PassState) -> Result<()> {
    loop {
        let outer = doc.descendants(st.body).into_iter().find(|&d| {
            doc.tag(d) == "p" && doc.children(d).iter().any(|&c| doc.tag(c) == "p")
        });
        let Some(outer) = outer else { break };
        flatten_paragraph(doc, outer);
    }
    Ok(())
}

fn flatten_paragraph(doc: &mut Document, outer: NodeId) {
    let Some(parent) = doc.parent(outer) else {
        return;
    };
    let Some(mut at) = doc.position(outer) else {
        return;
    };
    let kids: Vec<NodeId> = doc.children(outer).to_vec();

    let mut pending: Option<NodeId> = None;
    if let Some(text) = doc.take_text(outer)
        && !text.trim().is_empty()
    {
        let p = doc.create_element("p");
        doc.set_text(p, Some(text));
        doc.insert_child(parent, at, p);
        at += 1;
        pending = Some(p);
    }
    for c in kids {
        if doc.tag(c) == "p" {
            doc.insert_child(parent, at, c);
            at += 1;
            pending = None;
        } else {
            let w = match pending {
                Some(w) => w,
                None => {
                    let p = doc.create_element("p");
                    doc.insert_child(parent, at, p);
                    at += 1;
                    pending = Some(p);
                    p
                }
            };
            doc.append(w, c);
        }
    }
    doc.remove(outer, false);
}

/// Bring the direct children of `body` into schema-legal form: stray tail
/// text becomes sibling paragraphs and runs of inline children are wrapped.
pub(crate) fn normalize_body_children(doc: &mut Document, st: &PassState) -> Result<()> {
    let body = st.body;
    for c in doc.children(body).to_vec() {
        if !is_blank(doc.tail(c)) {
            let p = doc.create_element("p");
            let tail = doc.take_tail(c);
            doc.set_text(p, tail);
            doc.insert_after(c, p);
        }
    }
    if !is_blank(doc.text(body)) {
        let p = doc.create_element("p");
        let text = doc.take_text(body);
        doc.set_text(p, text);
        doc.insert_child(body, 0, p);
    }

    let mut pending: Option<NodeId> = None;
    for c in doc.children(body).to_vec() {
        if doc.is_comment(c) || BODY_CHILDREN.contains(&doc.tag(c)) {
            pending = None;
            continue;
        }
        let w = match pending {
            Some(w) => w,
            None => {
                let p = doc.create_element("p");
                doc.insert_before(c, p);
                pending = Some(p);
                p
            }
        };
        doc.append(w, c);
    }
    Ok(())
}

/// Keep only `allowed` attributes, optionally lowercasing kept values.
fn retain_attrs(doc: &mut Document, id: NodeId, allowed: &[&str], lowercase: bool) {
    let kept: Vec<(String, String)> = doc
        .attrs(id)
        .iter()
        .filter(|(k, _)| allowed.contains(&k.as_str()))
        .map(|(k, v)| {
            let v = if lowercase { v.to_lowercase() } else { v.clone() };
            (k.clone(), v)
        })
        .collect();
    doc.clear_attrs(id);
    for (k, v) in kept {
        doc.set_attr(id, &k, &v);
    }
}
