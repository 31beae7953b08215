//! Cross-reference index and the annotation pass.
//!
//! Annotation is the first half of reference resolution: candidate nodes
//! (links, anchors, images) get transient `xml_*` attributes recording the
//! semantic element they stand for. No structure changes here; the
//! materialization pass consumes the annotations and strips them.

use std::collections::BTreeMap;

use super::PassState;
use crate::dom::{Document, NodeId};
use crate::error::Result;
use crate::rules::{Inferer, basename_without_ext, generate_id};

/// Transient annotation attributes, stripped before output.
pub(crate) const XML_TAG: &str = "xml_tag";
pub(crate) const XML_REFTYPE: &str = "xml_reftype";
pub(crate) const XML_ID: &str = "xml_id";
pub(crate) const XML_LABEL: &str = "xml_label";

/// Links sharing one normalized visible text.
#[derive(Debug, Default)]
pub(crate) struct LinkTextGroup {
    /// `a[href="#..."]` nodes.
    pub(crate) internal: Vec<NodeId>,
    /// `a[href]` nodes pointing at files or URLs.
    pub(crate) external: Vec<NodeId>,
}

/// A named anchor and the links that reference it.
#[derive(Debug)]
pub(crate) struct AnchorGroup {
    pub(crate) anchor: NodeId,
    pub(crate) references: Vec<NodeId>,
}

/// Derived index over the live tree; rebuilt after structural mutation.
#[derive(Debug, Default)]
pub(crate) struct XrefIndex {
    pub(crate) by_link_text: BTreeMap<String, LinkTextGroup>,
    pub(crate) by_anchor_name: BTreeMap<String, AnchorGroup>,
    pub(crate) by_target_file: BTreeMap<String, Vec<NodeId>>,
}

impl XrefIndex {
    pub(crate) fn build(doc: &Document, body: NodeId) -> XrefIndex {
        let mut index = XrefIndex::default();
        for d in doc.descendants(body) {
            match doc.tag(d) {
                "a" => {
                    if let Some(href) = doc.attr(d, "href") {
                        let href = href.to_string();
                        let text = doc.text_content(d).trim().to_lowercase();
                        let group = index.by_link_text.entry(text).or_default();
                        if href.starts_with('#') {
                            group.internal.push(d);
                        } else {
                            group.external.push(d);
                            let base = basename_without_ext(&href).to_lowercase();
                            if !base.is_empty() {
                                index.by_target_file.entry(base).or_default().push(d);
                            }
                        }
                    } else if let Some(name) = doc.attr(d, "name") {
                        index
                            .by_anchor_name
                            .entry(name.to_string())
                            .or_insert(AnchorGroup {
                                anchor: d,
                                references: Vec::new(),
                            });
                    }
                }
                "img" => {
                    if let Some(src) = doc.attr(d, "src") {
                        let base = basename_without_ext(src).to_lowercase();
                        if !base.is_empty() {
                            index.by_target_file.entry(base).or_default().push(d);
                        }
                    }
                }
                _ => {}
            }
        }
        // Pair anchors with the links that point at them.
        for d in doc.descendants(body) {
            if doc.tag(d) == "a"
                && let Some(target) = doc.attr(d, "href").and_then(|h| h.strip_prefix('#'))
                && let Some(group) = index.by_anchor_name.get_mut(target)
            {
                group.references.push(d);
            }
        }
        index
    }
}

fn annotate(doc: &mut Document, node: NodeId, tag: &str, reftype: &str, id: &str) {
    doc.set_attr(node, XML_TAG, tag);
    doc.set_attr(node, XML_REFTYPE, reftype);
    doc.set_attr(node, XML_ID, id);
}

/// Annotate candidate references with their inferred semantic role.
///
/// Three sweeps over the index: link-text groups, anchor-name groups, then
/// image groups. Later sweeps may refine what earlier ones wrote; images
/// sharing a filename stem deliberately overwrite each other's annotation
/// so a group collapses onto one logical asset.
pub(crate) fn annotate_references(doc: &mut Document, st: &PassState) -> Result<()> {
    let index = XrefIndex::build(doc, st.body);
    let inferer = Inferer::new(st.rules);
    let body_index = st.ctx.body_index;

    for (text, group) in &index.by_link_text {
        let inferred = inferer.tag_and_reftype_from_link_text(text);

        for &node in &group.internal {
            let Some(target) = doc.attr(node, "href").and_then(|h| h.strip_prefix('#')) else {
                continue;
            };
            let target = target.to_string();
            // "#ref" marks a bibliographic citation, resolved without the
            // rule table at materialization.
            if target.eq_ignore_ascii_case("ref") {
                continue;
            }
            let fallback = inferer.tag_and_reftype_from_name(&target);
            if let Some((tag, reftype)) = inferred.clone().or(fallback) {
                annotate(doc, node, &tag, &reftype, &target);
            }
        }

        for &node in &group.external {
            let Some(href) = doc.attr(node, "href").map(str::to_string) else {
                continue;
            };
            let hint = inferred.as_ref().map(|(tag, _)| tag.as_str());
            let annotated = match inferer.tag_and_reftype_and_id_from_filepath(&href, hint) {
                Some((tag, reftype, id)) => Some((tag, reftype, id)),
                None => inferred.clone().and_then(|(tag, reftype)| {
                    let base = basename_without_ext(&href);
                    if base.is_empty() {
                        None
                    } else {
                        Some((tag, reftype, base.to_string()))
                    }
                }),
            };
            if let Some((tag, reftype, id)) = annotated {
                annotate(doc, node, &tag, &reftype, &generate_id(&id, body_index));
                let label = text.trim();
                if !label.is_empty() {
                    doc.set_attr(node, XML_LABEL, label);
                }
            }
        }
    }

    for (name, group) in &index.by_anchor_name {
        let following = doc.tail(group.anchor).map(str::to_string);
        let inferred = following
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .and_then(|t| inferer.tag_and_reftype_from_link_text(t))
            .or_else(|| inferer.tag_and_reftype_from_name(name));
        let Some((tag, reftype)) = inferred else {
            continue;
        };
        let id = generate_id(name, body_index);
        annotate(doc, group.anchor, &tag, &reftype, &id);
        if let Some(&first) = group.references.first() {
            let label = doc.text_content(first).trim().to_string();
            if !label.is_empty() {
                doc.set_attr(group.anchor, XML_LABEL, &label);
            }
        }
        for &r in &group.references {
            annotate(doc, r, &tag, &reftype, &id);
        }
    }

    for nodes in index.by_target_file.values() {
        for &node in nodes {
            if doc.tag(node) != "img" {
                continue;
            }
            let Some(src) = doc.attr(node, "src").map(str::to_string) else {
                continue;
            };
            let Some((tag, reftype, id)) = inferer.tag_and_reftype_and_id_from_filepath(&src, None)
            else {
                continue;
            };
            let id = generate_id(&id, body_index);
            let owner = doc
                .descendants(st.body)
                .into_iter()
                .find(|&d| d != node && doc.attr(d, XML_ID) == Some(id.as_str()));
            match owner {
                Some(owner) => {
                    // Inherit an existing annotation for the same asset;
                    // the last image in the group wins.
                    let tag = doc.attr(owner, XML_TAG).unwrap_or(&tag).to_string();
                    let reftype = doc.attr(owner, XML_REFTYPE).unwrap_or(&reftype).to_string();
                    let label = doc.attr(owner, XML_LABEL).map(str::to_string);
                    annotate(doc, node, &tag, &reftype, &id);
                    if let Some(label) = label {
                        doc.set_attr(node, XML_LABEL, &label);
                    }
                }
                None => annotate(doc, node, &tag, &reftype, &id),
            }
        }
    }

    Ok(())
}

/// Remove every transient annotation attribute under `body`.
pub(crate) fn strip_annotations(doc: &mut Document, body: NodeId) {
    for d in doc.descendants(body) {
        doc.remove_attr(d, XML_TAG);
        doc.remove_attr(d, XML_REFTYPE);
        doc.remove_attr(d, XML_ID);
        doc.remove_attr(d, XML_LABEL);
    }
}
