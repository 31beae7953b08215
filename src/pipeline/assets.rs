//! Asset materialization: turning annotated nodes into real elements.
//!
//! The second half of reference resolution. Annotated anchors become the
//! asset elements they mark (`fn`, `fig`, `app`, ...), annotated images are
//! wrapped into their asset with an adjacent label/caption pulled in, and
//! the originating links are rewritten into `xref` elements. A final
//! sanitization step repairs structural leftovers and strips the transient
//! annotation attributes.

use tracing::{debug, warn};

use super::PassState;
use super::normalize::promote_inline_graphics;
use super::xref::{XML_ID, XML_LABEL, XML_REFTYPE, XML_TAG, strip_annotations};
use crate::dom::{Document, NodeId, is_blank};
use crate::error::Result;

const XLINK_NS: &str = "http://www.w3.org/1999/xlink";

/// Block assets that get lifted out of a wrapping paragraph.
const LIFTABLE_ASSETS: &[&str] = &["fig", "table-wrap", "app", "disp-formula", "fn-group"];

/// Drop thumbnail previews, promoting a plain wrapping link to the
/// full-size image it points at.
pub(crate) fn remove_thumbnail_images(doc: &mut Document, st: &PassState) -> Result<()> {
    for img in doc.find_all(st.body, "img") {
        let Some(src) = doc.attr(img, "src") else {
            continue;
        };
        if !src.to_lowercase().contains("thumb") {
            continue;
        }
        let parent = doc.parent(img);
        doc.remove(img, false);
        if let Some(parent) = parent
            && doc.tag(parent) == "a"
            && doc.children(parent).is_empty()
            && is_blank(doc.text(parent))
            && let Some(href) = doc.attr(parent, "href").map(str::to_string)
        {
            doc.clear_attrs(parent);
            doc.set_tag(parent, "img");
            doc.set_attr(parent, "src", &href);
        }
    }
    Ok(())
}

pub(crate) fn materialize_assets(doc: &mut Document, st: &PassState) -> Result<()> {
    materialize_tables(doc, st);
    materialize_anchors(doc, st);
    materialize_images(doc, st);
    materialize_links(doc, st);
    Ok(())
}

/// `table[@id]` is unambiguous: wrap it and pull in an adjacent label.
fn materialize_tables(doc: &mut Document, st: &PassState) {
    for table in doc.find_all(st.body, "table") {
        let Some(id) = doc.attr(table, "id").map(str::to_string) else {
            continue;
        };
        if doc.parent(table).is_some_and(|p| doc.tag(p) == "table-wrap") {
            continue;
        }
        doc.remove_attr(table, "id");
        let wrapper = doc.wrap(table, "table-wrap");
        doc.set_attr(wrapper, "id", &id);
        attach_label_caption(doc, wrapper, None, st);
    }
}

/// Retag annotated `a[name]` markers into their asset elements.
fn materialize_anchors(doc: &mut Document, st: &PassState) {
    for a in doc.find_all(st.body, "a") {
        if doc.attr(a, "href").is_some() || doc.attr(a, "name").is_none() {
            continue;
        }
        let Some(tag) = doc.attr(a, XML_TAG).map(str::to_string) else {
            debug!(pid = %st.ctx.pid, "anchor without classification left in place");
            continue;
        };
        let tag = if tag == "symbol" { "fn".to_string() } else { tag };
        let Some(id) = doc.attr(a, XML_ID).map(str::to_string) else {
            continue;
        };
        let label = doc.attr(a, XML_LABEL).map(str::to_string);

        doc.remove_attr(a, "name");
        doc.set_tag(a, &tag);
        doc.set_attr(a, "id", &id);
        if tag == "fn" && !is_blank(doc.tail(a)) {
            // A footnote marker's tail is the footnote text itself.
            let p = doc.create_element("p");
            let tail = doc.take_tail(a);
            doc.set_text(p, tail);
            doc.append(a, p);
        }
        if let Some(label) = label.filter(|l| !l.is_empty()) {
            let l = doc.create_element("label");
            doc.set_text(l, Some(label));
            doc.insert_child(a, 0, l);
        }
    }
}

/// Turn every image into a `graphic`, wrapping annotated ones into their
/// asset element.
fn materialize_images(doc: &mut Document, st: &PassState) {
    for img in doc.find_all(st.body, "img") {
        let annotation = doc.attr(img, XML_TAG).map(str::to_string);
        let id = doc.attr(img, XML_ID).map(str::to_string);
        let label = doc.attr(img, XML_LABEL).map(str::to_string);
        let src = doc.remove_attr(img, "src").unwrap_or_default();
        doc.clear_attrs(img);
        doc.set_tag(img, "graphic");
        doc.set_attr(img, "xlink:href", &src);

        let (Some(tag), Some(id)) = (annotation, id) else {
            continue;
        };
        let tag = if tag == "symbol" { "fn".to_string() } else { tag };
        let asset = find_or_create_asset_node(doc, st.body, img, &id, &tag);
        if doc.parent(img) != Some(asset) {
            let parent = doc.parent(img);
            let pos = doc.position(img);
            let tail = doc.take_tail(img);
            doc.detach(img);
            // The tail stays behind at the image's old position.
            if let (Some(parent), Some(pos), Some(tail)) = (parent, pos, tail) {
                doc.merge_into_flow(parent, pos, &tail);
            }
            doc.append(asset, img);
        }
        attach_label_caption(doc, asset, label.as_deref(), st);
    }
}

fn materialize_links(doc: &mut Document, st: &PassState) {
    for a in doc.find_all(st.body, "a") {
        let Some(href) = doc.attr(a, "href").map(str::to_string) else {
            continue;
        };
        if let Some(target) = href.strip_prefix('#') {
            if target.eq_ignore_ascii_case("ref") {
                materialize_citation(doc, a, st);
                continue;
            }
            let rid = doc
                .attr(a, XML_ID)
                .map(str::to_string)
                .unwrap_or_else(|| target.to_string());
            let target_exists = doc
                .descendants(st.body)
                .into_iter()
                .any(|d| d != a && doc.attr(d, "id") == Some(rid.as_str()));
            if doc.attr(a, XML_TAG).is_some() && target_exists {
                let reftype = doc.attr(a, XML_REFTYPE).unwrap_or("other").to_string();
                to_xref(doc, a, &reftype, &rid);
            } else if doc.text_content(a).trim_start().starts_with('*') {
                // Internal navigation markers without a target carry no
                // content worth keeping.
                doc.remove(a, false);
            } else {
                warn!(pid = %st.ctx.pid, target = %target, "unresolved internal reference");
            }
        } else if doc.attr(a, XML_TAG).is_some() {
            materialize_external_asset(doc, a, &href, st);
        } else {
            doc.clear_attrs(a);
            doc.set_tag(a, "ext-link");
            doc.set_attr(a, "ext-link-type", "uri");
            doc.set_attr(a, "xlink:href", &href);
        }
    }
}

/// `href="#ref"` marks a citation; the rid comes from the link's number.
fn materialize_citation(doc: &mut Document, a: NodeId, st: &PassState) {
    let text = doc.text_content(a);
    let digits: String = text
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(char::is_ascii_digit)
        .collect();
    if digits.is_empty() {
        warn!(pid = %st.ctx.pid, text = %text.trim(), "citation link without a number");
        return;
    }
    if let Ok(n) = digits.parse::<usize>()
        && !st.ctx.ref_items.is_empty()
        && n > st.ctx.ref_items.len()
    {
        warn!(
            pid = %st.ctx.pid,
            citation = n,
            refs = st.ctx.ref_items.len(),
            "citation number exceeds reference count"
        );
    }
    to_xref(doc, a, "bibr", &format!("B{digits}"));
}

/// A link to an external file produces an asset near the link's block.
///
/// `.htm`/`.html` targets are converted through the resolver and embedded;
/// everything else (and any fetch failure) becomes a `graphic` pointing at
/// the href verbatim.
fn materialize_external_asset(doc: &mut Document, a: NodeId, href: &str, st: &PassState) {
    let tag = doc.attr(a, XML_TAG).unwrap_or("fig").to_string();
    let tag = if tag == "symbol" { "fn".to_string() } else { tag };
    let reftype = doc.attr(a, XML_REFTYPE).unwrap_or("other").to_string();
    let Some(id) = doc.attr(a, XML_ID).map(str::to_string) else {
        return;
    };
    let label = doc.attr(a, XML_LABEL).map(str::to_string);

    let block = enclosing_block(doc, a, st.body);
    let asset = doc.create_element(&tag);
    doc.set_attr(asset, "id", &id);
    doc.insert_after(block, asset);

    let path = href.split(['?', '#']).next().unwrap_or(href).to_lowercase();
    let is_html = path.ends_with(".htm") || path.ends_with(".html");
    let mut filled = false;
    if is_html && let Some(resolver) = st.resolver {
        if let Some(conv) = resolver.resolve(href, st.ctx) {
            for child in conv.doc.children(conv.body).to_vec() {
                let imported = doc.import_from(&conv.doc, child);
                doc.append(asset, imported);
            }
            filled = true;
        }
    }
    if !filled {
        let g = doc.create_element("graphic");
        doc.set_attr(g, "xlink:href", href);
        doc.append(asset, g);
    }
    if let Some(label) = label.filter(|l| !l.is_empty()) {
        let l = doc.create_element("label");
        doc.set_text(l, Some(label));
        doc.insert_child(asset, 0, l);
    }
    to_xref(doc, a, &reftype, &id);
}

/// Ancestor of `node` that is a direct child of `body` (or `node` itself).
fn enclosing_block(doc: &Document, node: NodeId, body: NodeId) -> NodeId {
    let mut block = node;
    while let Some(parent) = doc.parent(block) {
        if parent == body {
            break;
        }
        block = parent;
    }
    block
}

fn to_xref(doc: &mut Document, a: NodeId, reftype: &str, rid: &str) {
    doc.clear_attrs(a);
    doc.set_tag(a, "xref");
    doc.set_attr(a, "ref-type", reftype);
    doc.set_attr(a, "rid", rid);
}

/// Locate the element an annotation refers to, or create it.
///
/// Preference order: an element already carrying the id; the nearest
/// preceding childless element with any id (an unclaimed marker); a fresh
/// element inserted before `origin`.
fn find_or_create_asset_node(
    doc: &mut Document,
    body: NodeId,
    origin: NodeId,
    id: &str,
    tag: &str,
) -> NodeId {
    if let Some(existing) = doc
        .descendants(body)
        .into_iter()
        .find(|&d| d != origin && doc.attr(d, "id") == Some(id))
    {
        return existing;
    }

    let mut prev = doc.prev_sibling(origin);
    while let Some(p) = prev {
        let mut subtree = vec![p];
        subtree.extend(doc.descendants(p));
        for &d in subtree.iter().rev() {
            if !doc.is_comment(d) && doc.children(d).is_empty() && doc.attr(d, "id").is_some() {
                doc.set_tag(d, tag);
                doc.set_attr(d, "id", id);
                return d;
            }
        }
        prev = doc.prev_sibling(p);
    }

    let fresh = doc.create_element(tag);
    doc.set_attr(fresh, "id", id);
    doc.insert_before(origin, fresh);
    fresh
}

/// Pull an adjacent label/caption into `asset`.
///
/// With a label hint from annotation, a `label` child is synthesized
/// directly. Otherwise the previous and next siblings are checked for text
/// starting with one of the asset tag's clues and consumed when found.
fn attach_label_caption(doc: &mut Document, asset: NodeId, hint: Option<&str>, st: &PassState) {
    if doc
        .children(asset)
        .first()
        .is_some_and(|&c| doc.tag(c) == "label")
    {
        return;
    }
    if let Some(hint) = hint.filter(|h| !h.is_empty()) {
        let l = doc.create_element("label");
        doc.set_text(l, Some(hint.to_string()));
        doc.insert_child(asset, 0, l);
        return;
    }

    let clues: Vec<String> = st
        .rules
        .for_tag(doc.tag(asset))
        .map(|e| e.clue.clone())
        .collect();
    if clues.is_empty() {
        return;
    }
    for sib in [doc.prev_sibling(asset), doc.next_sibling(asset)] {
        let Some(sib) = sib else { continue };
        let text = doc.text_content(sib);
        let text = text.trim();
        if text.is_empty() || !clues.iter().any(|c| text.to_lowercase().starts_with(c.as_str())) {
            continue;
        }
        let (label, title) = split_label_caption(text);
        doc.remove(sib, false);
        if let Some(title) = title {
            let caption = doc.create_element("caption");
            let t = doc.create_element("title");
            doc.set_text(t, Some(title));
            doc.append(caption, t);
            doc.insert_child(asset, 0, caption);
        }
        let l = doc.create_element("label");
        doc.set_text(l, Some(label));
        doc.insert_child(asset, 0, l);
        return;
    }
}

/// Split "Figura 1 - legend text" style strings into label and title.
fn split_label_caption(text: &str) -> (String, Option<String>) {
    for sep in [" - ", " \u{2013} ", " \u{2014} ", ": "] {
        if let Some((label, title)) = text.split_once(sep) {
            return (label.trim().to_string(), Some(title.trim().to_string()));
        }
    }
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() <= 3 {
        (text.to_string(), None)
    } else {
        (words[..2].join(" "), Some(words[2..].join(" ")))
    }
}

/// Final structural corrections after materialization.
pub(crate) fn sanitize(doc: &mut Document, st: &PassState) -> Result<()> {
    fix_graphics_in_ext_links(doc, st.body);
    fix_table_nesting(doc, st.body);
    wrap_bare_footnote_text(doc, st.body);
    promote_inline_graphics(doc, st)?;
    lift_assets_out_of_paragraphs(doc, st.body);
    strip_annotations(doc, st.body);
    declare_xlink(doc, st.body);
    Ok(())
}

/// An `ext-link` that only wraps a graphic collapses into the graphic.
fn fix_graphics_in_ext_links(doc: &mut Document, body: NodeId) {
    for el in doc.find_all(body, "ext-link") {
        if doc.children(el).len() != 1 || !is_blank(doc.text(el)) {
            continue;
        }
        let g = doc.children(el)[0];
        if doc.tag(g) != "graphic" && doc.tag(g) != "inline-graphic" {
            continue;
        }
        if doc.attr(g, "xlink:href").is_none()
            && let Some(href) = doc.attr(el, "xlink:href").map(str::to_string)
        {
            doc.set_attr(g, "xlink:href", &href);
        }
        doc.unwrap_node(el);
    }
}

/// A bare `table` outside a wrap (and outside a cell) gets one.
fn fix_table_nesting(doc: &mut Document, body: NodeId) {
    for table in doc.find_all(body, "table") {
        let Some(parent) = doc.parent(table) else {
            continue;
        };
        if !matches!(doc.tag(parent), "table-wrap" | "td" | "th") {
            doc.wrap(table, "table-wrap");
        }
    }
}

/// Bare text directly inside `fn`/`def`/`def-item` is wrapped in a `p`.
fn wrap_bare_footnote_text(doc: &mut Document, body: NodeId) {
    for d in doc.descendants(body) {
        if !matches!(doc.tag(d), "fn" | "def" | "def-item") || is_blank(doc.text(d)) {
            continue;
        }
        let pos = if doc
            .children(d)
            .first()
            .is_some_and(|&c| doc.tag(c) == "label")
        {
            1
        } else {
            0
        };
        let p = doc.create_element("p");
        let text = doc.take_text(d);
        doc.set_text(p, text);
        doc.insert_child(d, pos, p);
    }
}

/// Unwrap paragraphs that only hold a single block asset.
fn lift_assets_out_of_paragraphs(doc: &mut Document, body: NodeId) {
    for p in doc.find_all(body, "p") {
        if doc.attr(p, "id").is_some() || !is_blank(doc.text(p)) {
            continue;
        }
        if doc.children(p).len() == 1 && LIFTABLE_ASSETS.contains(&doc.tag(doc.children(p)[0])) {
            doc.unwrap_node(p);
        }
    }
}

fn declare_xlink(doc: &mut Document, body: NodeId) {
    let uses_xlink = doc.descendants(body).into_iter().any(|d| {
        doc.attrs(d)
            .iter()
            .any(|(k, _)| k.starts_with("xlink:"))
    });
    if uses_xlink && doc.attr(body, "xmlns:xlink").is_none() {
        doc.set_attr(body, "xmlns:xlink", XLINK_NS);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{PipelineContext, xref};
    use crate::rules::RuleTable;

    fn rules() -> RuleTable {
        RuleTable::parse("fig|fig\ntab|table-wrap\nanx|app\nf|fn\nt|table-wrap\n").unwrap()
    }

    fn resolve(input: &str) -> String {
        let rules = rules();
        let ctx = PipelineContext::new("pid", 1);
        let mut doc = Document::parse_xml(input).unwrap();
        let body = doc.find(doc.root(), "body").unwrap();
        let st = PassState {
            rules: &rules,
            ctx: &ctx,
            resolver: None,
            body,
        };
        remove_thumbnail_images(&mut doc, &st).unwrap();
        xref::annotate_references(&mut doc, &st).unwrap();
        materialize_assets(&mut doc, &st).unwrap();
        sanitize(&mut doc, &st).unwrap();
        doc.to_xml(body)
    }

    #[test]
    fn annotated_image_becomes_a_figure() {
        let out = resolve(r#"<p><img src="fig1.gif"/></p>"#);
        assert_eq!(
            out,
            concat!(
                r#"<body xmlns:xlink="http://www.w3.org/1999/xlink">"#,
                r#"<fig id="fig1"><graphic xlink:href="fig1.gif"/></fig></body>"#
            )
        );
    }

    #[test]
    fn citation_link_becomes_bibr_xref() {
        let out = resolve(r##"<p><a href="#ref">(3)</a></p>"##);
        assert_eq!(
            out,
            r#"<body><p><xref ref-type="bibr" rid="B3">(3)</xref></p></body>"#
        );
    }

    #[test]
    fn footnote_anchor_materializes_with_label_and_content() {
        let out = resolve(
            r##"<p>Vide nota<a href="#f1">1</a></p><p><a name="f1"></a>Nota de rodap&#233;.</p>"##,
        );
        assert_eq!(
            out,
            concat!(
                r#"<body><p>Vide nota<xref ref-type="fn" rid="f1">1</xref></p>"#,
                r#"<p><fn id="f1"><label>1</label><p>Nota de rodapé.</p></fn></p></body>"#
            )
        );
    }

    #[test]
    fn table_with_id_pulls_in_adjacent_label() {
        let out = resolve(
            r#"<p>Tabela 1 - Resultados</p><table id="t1"><tr><td>x</td></tr></table>"#,
        );
        assert_eq!(
            out,
            concat!(
                r#"<body><table-wrap id="t1"><label>Tabela 1</label>"#,
                r#"<caption><title>Resultados</title></caption>"#,
                r#"<table><tr><td>x</td></tr></table></table-wrap></body>"#
            )
        );
    }

    #[test]
    fn dangling_star_anchor_is_dropped() {
        let out = resolve(r##"<p><a href="#top">*</a>back</p>"##);
        assert_eq!(out, "<body><p>back</p></body>");
    }

    #[test]
    fn external_file_link_without_resolver_becomes_graphic_asset() {
        let out = resolve(r#"<p><a href="/img/anx1.gif">Anexo 1</a></p>"#);
        assert_eq!(
            out,
            concat!(
                r#"<body xmlns:xlink="http://www.w3.org/1999/xlink">"#,
                r#"<p><xref ref-type="app" rid="anx1">Anexo 1</xref></p>"#,
                r#"<app id="anx1"><label>anexo 1</label>"#,
                r#"<graphic xlink:href="/img/anx1.gif"/></app></body>"#
            )
        );
    }

    #[test]
    fn unclassified_external_link_becomes_ext_link() {
        let out = resolve(r#"<p><a href="http://example.com/x">site</a></p>"#);
        assert_eq!(
            out,
            concat!(
                r#"<body xmlns:xlink="http://www.w3.org/1999/xlink">"#,
                r#"<p><ext-link ext-link-type="uri" xlink:href="http://example.com/x">site</ext-link></p></body>"#
            )
        );
    }

    #[test]
    fn thumbnail_is_replaced_by_full_size_image() {
        let out = resolve(r#"<p><a href="fig2.gif"><img src="fig2thumb.gif"/></a></p>"#);
        assert_eq!(
            out,
            concat!(
                r#"<body xmlns:xlink="http://www.w3.org/1999/xlink">"#,
                r#"<fig id="fig2"><graphic xlink:href="fig2.gif"/></fig></body>"#
            )
        );
    }

    #[test]
    fn graphic_collapses_out_of_ext_link() {
        let out = resolve(r#"<p><ext-link xlink:href="a.gif"><graphic/></ext-link></p>"#);
        assert_eq!(
            out,
            concat!(
                r#"<body xmlns:xlink="http://www.w3.org/1999/xlink">"#,
                r#"<p><inline-graphic xlink:href="a.gif"/></p></body>"#
            )
        );
    }

    #[test]
    fn bare_table_gets_a_wrap() {
        let out = resolve("<table><tr><td>x</td></tr></table>");
        assert_eq!(
            out,
            "<body><table-wrap><table><tr><td>x</td></tr></table></table-wrap></body>"
        );
    }

    #[test]
    fn label_caption_splitting() {
        assert_eq!(
            split_label_caption("Figura 2 - Mapa da regiao"),
            ("Figura 2".to_string(), Some("Mapa da regiao".to_string()))
        );
        assert_eq!(split_label_caption("Tabela 1"), ("Tabela 1".to_string(), None));
        assert_eq!(
            split_label_caption("Quadro 3 Esquema geral do estudo"),
            ("Quadro 3".to_string(), Some("Esquema geral do estudo".to_string()))
        );
    }
}
