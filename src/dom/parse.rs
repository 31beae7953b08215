//! Parsing of legacy body fragments into [`Document`] trees.
//!
//! Legacy bodies are HTML stored inside XML article records. Most are
//! well-formed enough for a strict XML read, which preserves every element
//! verbatim; the rest (unclosed `<p>`, bare `<br>`, unquoted attributes,
//! unknown entities) fall back to a lenient html5ever parse that applies
//! browser recovery rules.

use std::cell::RefCell;

use html5ever::tendril::{StrTendril, TendrilSink};
use html5ever::tree_builder::{ElementFlags, NodeOrText, QuirksMode, TreeSink};
use html5ever::{Attribute as Html5Attribute, ParseOpts, QualName, parse_document};
use quick_xml::Reader;
use quick_xml::events::Event;

use super::{Document, NodeId};
use crate::error::{Error, Result};

impl Document {
    /// Parse a body fragment, tolerating legacy tag soup.
    ///
    /// Tries a strict XML read first and falls back to html5ever recovery
    /// when the fragment is not well-formed. The fragment is wrapped in a
    /// `body` element unless it already carries one.
    pub fn parse_fragment(input: &str) -> Document {
        match Self::parse_xml(input) {
            Ok(doc) => doc,
            Err(_) => parse_html(input),
        }
    }

    /// Strict XML parse of a fragment.
    ///
    /// Fails with [`Error::Parse`] on anything not well-formed: mismatched
    /// or unclosed end tags, broken attributes, entities outside the known
    /// set. Tag and attribute names are lowercased; attribute order is
    /// preserved.
    pub fn parse_xml(input: &str) -> Result<Document> {
        let trimmed = input.trim_start();
        let wrapped;
        let has_body_root = trimmed
            .as_bytes()
            .get(..5)
            .is_some_and(|head| head.eq_ignore_ascii_case(b"<body"));
        let source = if has_body_root {
            input
        } else {
            wrapped = format!("<body>{input}</body>");
            &wrapped
        };

        let mut reader = Reader::from_str(source);
        let mut doc = Document::new("#document");
        let mut stack = vec![doc.root()];

        loop {
            match reader.read_event() {
                Ok(Event::Start(e)) => {
                    let id = open_element(&mut doc, *stack.last().expect("stack"), &e)?;
                    stack.push(id);
                }
                Ok(Event::Empty(e)) => {
                    open_element(&mut doc, *stack.last().expect("stack"), &e)?;
                }
                Ok(Event::End(_)) => {
                    if stack.len() > 1 {
                        stack.pop();
                    }
                }
                Ok(Event::Text(e)) => {
                    let text = String::from_utf8_lossy(e.as_ref()).into_owned();
                    doc.append_flow_text(*stack.last().expect("stack"), &text);
                }
                Ok(Event::CData(e)) => {
                    let text = String::from_utf8_lossy(e.as_ref()).into_owned();
                    doc.append_flow_text(*stack.last().expect("stack"), &text);
                }
                Ok(Event::GeneralRef(e)) => {
                    let name = String::from_utf8_lossy(e.as_ref()).into_owned();
                    match resolve_entity(&name) {
                        Some(s) => doc.append_flow_text(*stack.last().expect("stack"), &s),
                        None => {
                            return Err(Error::Parse(format!("unknown entity reference &{name};")));
                        }
                    }
                }
                Ok(Event::Comment(e)) => {
                    let text = String::from_utf8_lossy(e.as_ref()).into_owned();
                    let comment = doc.create_comment(&text);
                    doc.append(*stack.last().expect("stack"), comment);
                }
                Ok(Event::Decl(_)) | Ok(Event::PI(_)) | Ok(Event::DocType(_)) => {}
                Ok(Event::Eof) => break,
                Err(e) => return Err(Error::Parse(e.to_string())),
            }
        }

        if stack.len() > 1 {
            return Err(Error::Parse("unclosed elements at end of input".to_string()));
        }
        Ok(doc)
    }
}

fn open_element(
    doc: &mut Document,
    parent: NodeId,
    e: &quick_xml::events::BytesStart<'_>,
) -> Result<NodeId> {
    let tag = String::from_utf8_lossy(e.name().as_ref()).to_lowercase();
    let id = doc.create_element(&tag);
    for attr in e.attributes() {
        let attr = attr.map_err(|err| Error::Parse(err.to_string()))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).to_lowercase();
        let value = attr
            .unescape_value()
            .map_err(|err| Error::Parse(err.to_string()))?;
        doc.set_attr(id, &key, &value);
    }
    doc.append(parent, id);
    Ok(id)
}

/// Resolve an XML or legacy HTML entity reference.
///
/// The table covers the XML five, numeric references, and the named
/// entities that actually occur in the legacy corpus (Latin-1 accents,
/// typographic punctuation). Anything else is unresolved.
pub(crate) fn resolve_entity(entity: &str) -> Option<String> {
    let known = match entity {
        "apos" => "'",
        "quot" => "\"",
        "lt" => "<",
        "gt" => ">",
        "amp" => "&",
        "nbsp" => "\u{a0}",
        "aacute" => "á",
        "agrave" => "à",
        "acirc" => "â",
        "atilde" => "ã",
        "auml" => "ä",
        "eacute" => "é",
        "egrave" => "è",
        "ecirc" => "ê",
        "euml" => "ë",
        "iacute" => "í",
        "icirc" => "î",
        "iuml" => "ï",
        "oacute" => "ó",
        "ograve" => "ò",
        "ocirc" => "ô",
        "otilde" => "õ",
        "ouml" => "ö",
        "uacute" => "ú",
        "ucirc" => "û",
        "uuml" => "ü",
        "ccedil" => "ç",
        "ntilde" => "ñ",
        "Aacute" => "Á",
        "Eacute" => "É",
        "Iacute" => "Í",
        "Oacute" => "Ó",
        "Uacute" => "Ú",
        "Ccedil" => "Ç",
        "Ntilde" => "Ñ",
        "Atilde" => "Ã",
        "Otilde" => "Õ",
        "sect" => "§",
        "para" => "¶",
        "deg" => "°",
        "ordm" => "º",
        "ordf" => "ª",
        "middot" => "·",
        "plusmn" => "±",
        "times" => "×",
        "divide" => "÷",
        "micro" => "µ",
        "sup2" => "²",
        "sup3" => "³",
        "frac12" => "½",
        "ndash" => "–",
        "mdash" => "—",
        "lsquo" => "\u{2018}",
        "rsquo" => "\u{2019}",
        "ldquo" => "\u{201c}",
        "rdquo" => "\u{201d}",
        "hellip" => "…",
        "copy" => "©",
        "reg" => "®",
        "trade" => "™",
        _ => "",
    };
    if !known.is_empty() {
        return Some(known.to_string());
    }

    if let Some(hex) = entity.strip_prefix("#x").or_else(|| entity.strip_prefix("#X")) {
        if let Ok(code) = u32::from_str_radix(hex, 16)
            && let Some(c) = char::from_u32(code)
        {
            return Some(c.to_string());
        }
    } else if let Some(dec) = entity.strip_prefix('#')
        && let Ok(code) = dec.parse::<u32>()
        && let Some(c) = char::from_u32(code)
    {
        return Some(c.to_string());
    }

    None
}

/// Lenient parse via html5ever browser recovery rules.
fn parse_html(input: &str) -> Document {
    let wrapped = format!("<html><head></head><body>{input}</body></html>");
    let sink = DomSink::new();
    let sink = parse_document(sink, ParseOpts::default())
        .from_utf8()
        .one(wrapped.as_bytes());
    sink.into_document()
}

/// Attribute name with prefix preserved ("xlink:href").
fn qualified_attr_name(name: &QualName) -> String {
    match &name.prefix {
        Some(prefix) => format!("{}:{}", prefix, name.local),
        None => name.local.to_string(),
    }
}

/// html5ever TreeSink building a [`Document`] directly.
///
/// Text lands in the text/tail slots as it arrives: content appended to an
/// element with children becomes the last child's tail, otherwise the
/// element's own text. Interior mutability because the TreeSink trait takes
/// `&self` everywhere.
struct DomSink {
    doc: RefCell<Document>,
    /// Element names kept alive for `elem_name`, indexed by arena slot.
    names: RefCell<Vec<QualName>>,
    quirks_mode: RefCell<QuirksMode>,
}

static EMPTY_NAME: QualName = QualName {
    prefix: None,
    ns: html5ever::ns!(),
    local: html5ever::local_name!(""),
};

impl DomSink {
    fn new() -> Self {
        Self {
            doc: RefCell::new(Document::new("#document")),
            names: RefCell::new(vec![EMPTY_NAME.clone()]),
            quirks_mode: RefCell::new(QuirksMode::NoQuirks),
        }
    }

    fn into_document(self) -> Document {
        self.doc.into_inner()
    }

    /// Keep the name table aligned with the arena.
    fn register(&self, id: NodeId, name: QualName) -> NodeHandle {
        let mut names = self.names.borrow_mut();
        debug_assert_eq!(names.len(), id.0 as usize);
        names.push(name);
        NodeHandle(id)
    }

    fn append_child(&self, parent: NodeId, child: NodeOrText<NodeHandle>) {
        let mut doc = self.doc.borrow_mut();
        match child {
            NodeOrText::AppendNode(node) => doc.append(parent, node.0),
            NodeOrText::AppendText(text) => doc.append_flow_text(parent, &text),
        }
    }
}

/// Handle used by TreeSink to reference nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct NodeHandle(NodeId);

impl Default for NodeHandle {
    fn default() -> Self {
        NodeHandle(NodeId(u32::MAX))
    }
}

impl TreeSink for DomSink {
    type Handle = NodeHandle;
    type Output = Self;
    type ElemName<'a>
        = &'a QualName
    where
        Self: 'a;

    fn finish(self) -> Self::Output {
        self
    }

    fn parse_error(&self, _msg: std::borrow::Cow<'static, str>) {
        // Recovery is the point of this code path; errors are expected.
    }

    fn get_document(&self) -> Self::Handle {
        NodeHandle(self.doc.borrow().root())
    }

    fn elem_name<'a>(&'a self, target: &'a Self::Handle) -> Self::ElemName<'a> {
        let names = self.names.borrow();
        match names.get(target.0.0 as usize) {
            Some(name) => {
                // SAFETY: the name table lives as long as self and entries are
                // never removed or reallocated out from under a caller within
                // a single parse; the borrow checker cannot see through the
                // RefCell, so the lifetime is extended manually.
                unsafe { std::mem::transmute::<&QualName, &'a QualName>(name) }
            }
            None => &EMPTY_NAME,
        }
    }

    fn create_element(
        &self,
        name: QualName,
        attrs: Vec<Html5Attribute>,
        _flags: ElementFlags,
    ) -> Self::Handle {
        let mut doc = self.doc.borrow_mut();
        let id = doc.create_element(name.local.as_ref());
        for attr in &attrs {
            doc.set_attr(id, &qualified_attr_name(&attr.name), &attr.value);
        }
        drop(doc);
        self.register(id, name)
    }

    fn create_comment(&self, text: StrTendril) -> Self::Handle {
        let id = self.doc.borrow_mut().create_comment(&text);
        self.register(id, EMPTY_NAME.clone())
    }

    fn create_pi(&self, _target: StrTendril, _data: StrTendril) -> Self::Handle {
        let id = self.doc.borrow_mut().create_comment("");
        self.register(id, EMPTY_NAME.clone())
    }

    fn append(&self, parent: &Self::Handle, child: NodeOrText<Self::Handle>) {
        self.append_child(parent.0, child);
    }

    fn append_based_on_parent_node(
        &self,
        element: &Self::Handle,
        prev_element: &Self::Handle,
        child: NodeOrText<Self::Handle>,
    ) {
        let parent = self.doc.borrow().parent(element.0);
        match parent {
            Some(parent) => self.append_child(parent, child),
            None => self.append(prev_element, child),
        }
    }

    fn append_doctype_to_document(
        &self,
        _name: StrTendril,
        _public_id: StrTendril,
        _system_id: StrTendril,
    ) {
        // Doctype carries nothing the conversion needs.
    }

    fn get_template_contents(&self, target: &Self::Handle) -> Self::Handle {
        *target
    }

    fn same_node(&self, x: &Self::Handle, y: &Self::Handle) -> bool {
        x.0 == y.0
    }

    fn set_quirks_mode(&self, mode: QuirksMode) {
        *self.quirks_mode.borrow_mut() = mode;
    }

    fn append_before_sibling(&self, sibling: &Self::Handle, new_node: NodeOrText<Self::Handle>) {
        let mut doc = self.doc.borrow_mut();
        match new_node {
            NodeOrText::AppendNode(node) => doc.insert_before(sibling.0, node.0),
            NodeOrText::AppendText(text) => {
                if let (Some(parent), Some(pos)) = (doc.parent(sibling.0), doc.position(sibling.0))
                {
                    doc.merge_into_flow(parent, pos, &text);
                }
            }
        }
    }

    fn add_attrs_if_missing(&self, target: &Self::Handle, attrs: Vec<Html5Attribute>) {
        let mut doc = self.doc.borrow_mut();
        for attr in &attrs {
            let name = qualified_attr_name(&attr.name);
            if doc.attr(target.0, &name).is_none() {
                doc.set_attr(target.0, &name, &attr.value);
            }
        }
    }

    fn remove_from_parent(&self, target: &Self::Handle) {
        self.doc.borrow_mut().detach(target.0);
    }

    fn reparent_children(&self, node: &Self::Handle, new_parent: &Self::Handle) {
        let mut doc = self.doc.borrow_mut();
        let children: Vec<NodeId> = doc.children(node.0).to_vec();
        for child in children {
            doc.append(new_parent.0, child);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xml_parse_preserves_structure() {
        let doc = Document::parse_xml("<p>Hello <b>world</b> again</p>").unwrap();
        let body = doc.find(doc.root(), "body").unwrap();
        let p = doc.children(body)[0];
        assert_eq!(doc.tag(p), "p");
        assert_eq!(doc.text(p), Some("Hello "));
        let b = doc.children(p)[0];
        assert_eq!(doc.text(b), Some("world"));
        assert_eq!(doc.tail(b), Some(" again"));
    }

    #[test]
    fn xml_parse_rejects_mismatched_tags() {
        assert!(Document::parse_xml("<p>one<p>two</p>").is_err());
    }

    #[test]
    fn xml_parse_rejects_unknown_entities() {
        assert!(Document::parse_xml("<p>&bogus;</p>").is_err());
    }

    #[test]
    fn xml_parse_resolves_legacy_entities() {
        let doc = Document::parse_xml("<p>S&atilde;o &#80;aulo</p>").unwrap();
        let body = doc.find(doc.root(), "body").unwrap();
        let p = doc.children(body)[0];
        assert_eq!(doc.text(p), Some("São Paulo"));
    }

    #[test]
    fn xml_parse_lowercases_tags_and_attrs() {
        let doc = Document::parse_xml(r#"<P ALIGN="CENTER">x</P>"#).unwrap();
        let body = doc.find(doc.root(), "body").unwrap();
        let p = doc.children(body)[0];
        assert_eq!(doc.tag(p), "p");
        assert_eq!(doc.attr(p, "align"), Some("CENTER"));
    }

    #[test]
    fn fragment_parse_recovers_tag_soup() {
        // Unclosed <p> and bare <br> force the html5ever path.
        let doc = Document::parse_fragment("<p>one<br>two<p>three");
        let body = doc.find(doc.root(), "body").unwrap();
        assert_eq!(doc.find_all(body, "p").len(), 2);
        assert_eq!(doc.find_all(body, "br").len(), 1);
        assert!(doc.text_content(body).contains("three"));
    }

    #[test]
    fn fragment_parse_accepts_multibyte_leading_text() {
        // The body-root probe must not slice inside 'ç' (bytes 4..6).
        let doc = Document::parse_fragment("Citação inicial<p>x</p>");
        let body = doc.find(doc.root(), "body").unwrap();
        assert!(doc.text_content(body).contains("Citação"));
    }

    #[test]
    fn fragment_parse_keeps_existing_body() {
        let doc = Document::parse_fragment(r#"<body index="1"><p>x</p></body>"#);
        let body = doc.find(doc.root(), "body").unwrap();
        assert_eq!(doc.attr(body, "index"), Some("1"));
    }

    #[test]
    fn comments_survive_xml_parse() {
        let doc = Document::parse_xml("<p>a<!-- note -->b</p>").unwrap();
        let body = doc.find(doc.root(), "body").unwrap();
        let p = doc.children(body)[0];
        assert_eq!(doc.children(p).len(), 1);
        assert!(doc.is_comment(doc.children(p)[0]));
        // comment splits the flow: "a" before, "b" as the comment's tail
        assert_eq!(doc.text(p), Some("a"));
        assert_eq!(doc.tail(doc.children(p)[0]), Some("b"));
    }
}
