//! Mutable document tree for body conversion.
//!
//! Legacy article bodies are parsed into an arena-backed tree: all nodes live
//! in a contiguous vector owned by [`Document`], and parent/child links are
//! plain indices ([`NodeId`]). This keeps `getparent()`-style navigation cheap
//! without reference-counting cycles.
//!
//! Text placement follows the text/tail convention: `text` is the content
//! before an element's first child, `tail` is the content between the
//! element's end tag and its next sibling. Every structural mutation keeps
//! the single-owner invariant: a node is in exactly one parent's child list,
//! and moves are detach-then-reattach.

mod parse;
mod serialize;

/// Unique identifier for a node within a [`Document`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub(crate) u32);

/// Tag used for comment nodes; never emitted to converted output.
pub(crate) const COMMENT_TAG: &str = "#comment";

#[derive(Debug, Clone)]
struct NodeData {
    tag: String,
    /// Ordered attributes; qualified names are opaque strings ("xlink:href").
    attrs: Vec<(String, String)>,
    text: Option<String>,
    tail: Option<String>,
    children: Vec<NodeId>,
    parent: Option<NodeId>,
}

impl NodeData {
    fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_string(),
            attrs: Vec::new(),
            text: None,
            tail: None,
            children: Vec::new(),
            parent: None,
        }
    }
}

/// Arena-backed document tree.
///
/// Detached nodes stay allocated in the arena but become unreachable; a
/// conversion run is short-lived so nothing is ever reclaimed mid-run.
#[derive(Debug, Clone)]
pub struct Document {
    nodes: Vec<NodeData>,
    root: NodeId,
}

impl Document {
    /// Create a document with a single empty root element.
    pub fn new(root_tag: &str) -> Self {
        let mut doc = Self {
            nodes: Vec::new(),
            root: NodeId(0),
        };
        doc.root = doc.create_element(root_tag);
        doc
    }

    /// The root node.
    pub fn root(&self) -> NodeId {
        self.root
    }

    fn node(&self, id: NodeId) -> &NodeData {
        &self.nodes[id.0 as usize]
    }

    fn node_mut(&mut self, id: NodeId) -> &mut NodeData {
        &mut self.nodes[id.0 as usize]
    }

    /// Allocate a new detached element.
    pub fn create_element(&mut self, tag: &str) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(NodeData::new(tag));
        id
    }

    /// Allocate a detached comment node holding `text`.
    pub(crate) fn create_comment(&mut self, text: &str) -> NodeId {
        let id = self.create_element(COMMENT_TAG);
        self.node_mut(id).text = Some(text.to_string());
        id
    }

    pub fn tag(&self, id: NodeId) -> &str {
        &self.node(id).tag
    }

    pub fn set_tag(&mut self, id: NodeId, tag: &str) {
        self.node_mut(id).tag = tag.to_string();
    }

    pub fn is_comment(&self, id: NodeId) -> bool {
        self.node(id).tag == COMMENT_TAG
    }

    pub fn attr(&self, id: NodeId, name: &str) -> Option<&str> {
        self.node(id)
            .attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Set an attribute, replacing any existing value in place.
    pub fn set_attr(&mut self, id: NodeId, name: &str, value: &str) {
        let attrs = &mut self.node_mut(id).attrs;
        if let Some(entry) = attrs.iter_mut().find(|(k, _)| k == name) {
            entry.1 = value.to_string();
        } else {
            attrs.push((name.to_string(), value.to_string()));
        }
    }

    pub fn remove_attr(&mut self, id: NodeId, name: &str) -> Option<String> {
        let attrs = &mut self.node_mut(id).attrs;
        let pos = attrs.iter().position(|(k, _)| k == name)?;
        Some(attrs.remove(pos).1)
    }

    pub fn clear_attrs(&mut self, id: NodeId) {
        self.node_mut(id).attrs.clear();
    }

    /// Ordered attribute list.
    pub fn attrs(&self, id: NodeId) -> &[(String, String)] {
        &self.node(id).attrs
    }

    pub fn text(&self, id: NodeId) -> Option<&str> {
        self.node(id).text.as_deref()
    }

    pub fn set_text(&mut self, id: NodeId, text: Option<String>) {
        self.node_mut(id).text = text;
    }

    pub fn take_text(&mut self, id: NodeId) -> Option<String> {
        self.node_mut(id).text.take()
    }

    pub fn tail(&self, id: NodeId) -> Option<&str> {
        self.node(id).tail.as_deref()
    }

    pub fn set_tail(&mut self, id: NodeId, tail: Option<String>) {
        self.node_mut(id).tail = tail;
    }

    pub fn take_tail(&mut self, id: NodeId) -> Option<String> {
        self.node_mut(id).tail.take()
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.node(id).children
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).parent
    }

    /// Index of `id` within its parent's child list.
    pub fn position(&self, id: NodeId) -> Option<usize> {
        let parent = self.parent(id)?;
        self.node(parent).children.iter().position(|&c| c == id)
    }

    pub fn prev_sibling(&self, id: NodeId) -> Option<NodeId> {
        let parent = self.parent(id)?;
        let pos = self.position(id)?;
        if pos == 0 {
            None
        } else {
            Some(self.node(parent).children[pos - 1])
        }
    }

    pub fn next_sibling(&self, id: NodeId) -> Option<NodeId> {
        let parent = self.parent(id)?;
        let pos = self.position(id)?;
        self.node(parent).children.get(pos + 1).copied()
    }

    /// Detach a node from its parent, leaving text and tail untouched.
    pub fn detach(&mut self, id: NodeId) {
        if let Some(parent) = self.node(id).parent {
            let children = &mut self.node_mut(parent).children;
            if let Some(pos) = children.iter().position(|&c| c == id) {
                children.remove(pos);
            }
            self.node_mut(id).parent = None;
        }
    }

    /// Append `child` as the last child of `parent`.
    pub fn append(&mut self, parent: NodeId, child: NodeId) {
        self.detach(child);
        self.node_mut(child).parent = Some(parent);
        self.node_mut(parent).children.push(child);
    }

    /// Insert `child` at `index` within `parent`'s child list.
    pub fn insert_child(&mut self, parent: NodeId, index: usize, child: NodeId) {
        self.detach(child);
        self.node_mut(child).parent = Some(parent);
        let children = &mut self.node_mut(parent).children;
        let index = index.min(children.len());
        children.insert(index, child);
    }

    /// Insert `node` immediately before `sibling`.
    pub fn insert_before(&mut self, sibling: NodeId, node: NodeId) {
        if let (Some(parent), Some(pos)) = (self.parent(sibling), self.position(sibling)) {
            self.insert_child(parent, pos, node);
        }
    }

    /// Insert `node` immediately after `sibling`.
    pub fn insert_after(&mut self, sibling: NodeId, node: NodeId) {
        if let (Some(parent), Some(pos)) = (self.parent(sibling), self.position(sibling)) {
            self.insert_child(parent, pos + 1, node);
        }
    }

    /// Merge `s` into the text flow at child position `pos` of `parent`:
    /// the preceding sibling's tail, or the parent's text when first.
    pub(crate) fn merge_into_flow(&mut self, parent: NodeId, pos: usize, s: &str) {
        if s.is_empty() {
            return;
        }
        if pos > 0 {
            let prev = self.node(parent).children[pos - 1];
            let tail = self.node_mut(prev).tail.get_or_insert_with(String::new);
            tail.push_str(s);
        } else {
            let text = self.node_mut(parent).text.get_or_insert_with(String::new);
            text.push_str(s);
        }
    }

    /// Append `s` at the end of `parent`'s content flow.
    pub(crate) fn append_flow_text(&mut self, parent: NodeId, s: &str) {
        let pos = self.node(parent).children.len();
        self.merge_into_flow(parent, pos, s);
    }

    /// Detach `id` and drop its subtree. The node's tail, and when
    /// `keep_text` its own text, are inlined into the surrounding flow.
    pub fn remove(&mut self, id: NodeId, keep_text: bool) {
        let Some(parent) = self.parent(id) else {
            return;
        };
        let Some(pos) = self.position(id) else {
            return;
        };
        let mut merged = String::new();
        if keep_text && let Some(text) = self.node(id).text.as_deref() {
            merged.push_str(text);
        }
        if let Some(tail) = self.node(id).tail.as_deref() {
            merged.push_str(tail);
        }
        self.detach(id);
        self.node_mut(id).tail = None;
        self.merge_into_flow(parent, pos, &merged);
    }

    /// Remove `id` but keep its content: text merges into the surrounding
    /// flow and children are promoted into the node's position in order.
    pub fn unwrap_node(&mut self, id: NodeId) {
        let Some(parent) = self.parent(id) else {
            return;
        };
        let Some(pos) = self.position(id) else {
            return;
        };
        self.detach(id);
        if let Some(text) = self.node_mut(id).text.take() {
            self.merge_into_flow(parent, pos, &text);
        }
        let kids = std::mem::take(&mut self.node_mut(id).children);
        for (i, &kid) in kids.iter().enumerate() {
            self.node_mut(kid).parent = Some(parent);
            self.node_mut(parent).children.insert(pos + i, kid);
        }
        if let Some(tail) = self.node_mut(id).tail.take() {
            match kids.last() {
                Some(&last) => {
                    let t = self.node_mut(last).tail.get_or_insert_with(String::new);
                    t.push_str(&tail);
                }
                None => self.merge_into_flow(parent, pos, &tail),
            }
        }
    }

    /// Wrap `id` in a new `tag` element that takes over its tree position
    /// and its tail.
    pub fn wrap(&mut self, id: NodeId, tag: &str) -> NodeId {
        let wrapper = self.create_element(tag);
        let tail = self.node_mut(id).tail.take();
        self.node_mut(wrapper).tail = tail;
        match (self.parent(id), self.position(id)) {
            (Some(parent), Some(pos)) => {
                self.node_mut(parent).children[pos] = wrapper;
                self.node_mut(wrapper).parent = Some(parent);
                self.node_mut(id).parent = None;
            }
            _ => {
                if self.root == id {
                    self.root = wrapper;
                }
            }
        }
        self.node_mut(id).parent = Some(wrapper);
        self.node_mut(wrapper).children.push(id);
        wrapper
    }

    /// Remove every `tag` element under `scope` (content-preserving).
    ///
    /// Children are promoted in place and text is folded into the
    /// surrounding flow, so document order survives. Handles nested
    /// occurrences: each removal may expose further matches.
    pub fn strip_tag(&mut self, scope: NodeId, tag: &str) {
        loop {
            let next = self
                .descendants(scope)
                .into_iter()
                .find(|&d| self.tag(d) == tag);
            match next {
                Some(id) => self.unwrap_node(id),
                None => break,
            }
        }
    }

    /// All descendants of `id` in document order, excluding `id` itself.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.node(id).children.iter().rev().copied().collect();
        while let Some(n) = stack.pop() {
            out.push(n);
            stack.extend(self.node(n).children.iter().rev().copied());
        }
        out
    }

    /// First descendant with the given tag, in document order.
    pub fn find(&self, scope: NodeId, tag: &str) -> Option<NodeId> {
        self.descendants(scope)
            .into_iter()
            .find(|&d| self.tag(d) == tag)
    }

    /// All descendants with the given tag, in document order.
    pub fn find_all(&self, scope: NodeId, tag: &str) -> Vec<NodeId> {
        self.descendants(scope)
            .into_iter()
            .filter(|&d| self.tag(d) == tag)
            .collect()
    }

    /// Concatenated visible text of the subtree (the node's tail excluded).
    pub fn text_content(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.collect_text(id, &mut out);
        out
    }

    fn collect_text(&self, id: NodeId, out: &mut String) {
        if self.is_comment(id) {
            return;
        }
        if let Some(text) = self.text(id) {
            out.push_str(text);
        }
        for &child in self.children(id).iter() {
            self.collect_text(child, out);
            if !self.is_comment(child)
                && let Some(tail) = self.tail(child)
            {
                out.push_str(tail);
            }
        }
    }

    /// Deep-copy a subtree from another document; the copy is detached and
    /// carries no tail.
    pub fn import_from(&mut self, src: &Document, node: NodeId) -> NodeId {
        let copy = self.import_rec(src, node);
        self.node_mut(copy).tail = None;
        copy
    }

    fn import_rec(&mut self, src: &Document, node: NodeId) -> NodeId {
        let copy = self.create_element(src.tag(node));
        self.node_mut(copy).attrs = src.node(node).attrs.clone();
        self.node_mut(copy).text = src.node(node).text.clone();
        self.node_mut(copy).tail = src.node(node).tail.clone();
        for &child in src.children(node).iter() {
            let c = self.import_rec(src, child);
            self.append(copy, c);
        }
        copy
    }
}

/// Whether an optional text slot holds any non-whitespace content.
pub(crate) fn is_blank(text: Option<&str>) -> bool {
    text.is_none_or(|t| t.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> (Document, NodeId) {
        // <body>pre<b>bold</b>mid<i>it</i>post</body>
        let mut doc = Document::new("body");
        let body = doc.root();
        doc.set_text(body, Some("pre".into()));
        let b = doc.create_element("b");
        doc.set_text(b, Some("bold".into()));
        doc.set_tail(b, Some("mid".into()));
        doc.append(body, b);
        let i = doc.create_element("i");
        doc.set_text(i, Some("it".into()));
        doc.set_tail(i, Some("post".into()));
        doc.append(body, i);
        (doc, body)
    }

    #[test]
    fn text_content_concatenates_in_order() {
        let (doc, body) = sample();
        assert_eq!(doc.text_content(body), "preboldmiditpost");
    }

    #[test]
    fn wrap_takes_position_and_tail() {
        let (mut doc, body) = sample();
        let b = doc.children(body)[0];
        let wrapper = doc.wrap(b, "p");
        assert_eq!(doc.tag(doc.children(body)[0]), "p");
        assert_eq!(doc.tail(wrapper), Some("mid"));
        assert_eq!(doc.tail(b), None);
        assert_eq!(doc.children(wrapper), &[b]);
        assert_eq!(doc.parent(b), Some(wrapper));
    }

    #[test]
    fn unwrap_promotes_children_and_merges_text() {
        let mut doc = Document::new("body");
        let body = doc.root();
        let span = doc.create_element("span");
        doc.set_text(span, Some("a".into()));
        doc.set_tail(span, Some("c".into()));
        doc.append(body, span);
        let b = doc.create_element("b");
        doc.set_text(b, Some("b".into()));
        doc.append(span, b);

        doc.unwrap_node(span);
        assert_eq!(doc.text(body), Some("a"));
        assert_eq!(doc.children(body).len(), 1);
        let b = doc.children(body)[0];
        assert_eq!(doc.tag(b), "b");
        assert_eq!(doc.tail(b), Some("c"));
    }

    #[test]
    fn remove_keeps_tail_in_flow() {
        let (mut doc, body) = sample();
        let b = doc.children(body)[0];
        doc.remove(b, false);
        // b's tail "mid" merges into body's text after "pre"
        assert_eq!(doc.text(body), Some("premid"));
        assert_eq!(doc.children(body).len(), 1);
    }

    #[test]
    fn remove_keep_text_inlines_node_text() {
        let (mut doc, body) = sample();
        let b = doc.children(body)[0];
        doc.remove(b, true);
        assert_eq!(doc.text(body), Some("preboldmid"));
    }

    #[test]
    fn strip_tag_handles_nesting() {
        let mut doc = Document::new("body");
        let body = doc.root();
        let outer = doc.create_element("font");
        doc.set_text(outer, Some("x".into()));
        doc.append(body, outer);
        let inner = doc.create_element("font");
        doc.set_text(inner, Some("y".into()));
        doc.append(outer, inner);

        doc.strip_tag(body, "font");
        assert!(doc.find(body, "font").is_none());
        assert_eq!(doc.text(body), Some("xy"));
    }

    #[test]
    fn descendants_are_document_ordered() {
        let (mut doc, body) = sample();
        let i = doc.children(body)[1];
        let sub = doc.create_element("sub");
        doc.append(i, sub);
        let tags: Vec<&str> = doc
            .descendants(body)
            .into_iter()
            .map(|d| doc.tag(d))
            .collect();
        assert_eq!(tags, vec!["b", "i", "sub"]);
    }

    #[test]
    fn single_owner_after_moves() {
        let (mut doc, body) = sample();
        let b = doc.children(body)[0];
        let i = doc.children(body)[1];
        doc.append(i, b);
        assert_eq!(doc.children(body), &[i]);
        assert_eq!(doc.parent(b), Some(i));
    }
}
