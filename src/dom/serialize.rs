//! XML serialization of [`Document`] subtrees.

use std::io;

use quick_xml::Writer;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};

use super::{Document, NodeId};

impl Document {
    /// Serialize the subtree rooted at `id` to an XML string.
    ///
    /// Attributes are emitted in stored order and the node's own tail is
    /// not included, so the output of two runs over an unchanged tree is
    /// byte-identical. Used for pass snapshots, fragment cache files, and
    /// test assertions.
    pub fn to_xml(&self, id: NodeId) -> String {
        let mut writer = Writer::new(Vec::new());
        self.write_node(&mut writer, id)
            .expect("serialization to memory failed");
        String::from_utf8(writer.into_inner()).unwrap_or_default()
    }

    fn write_node(&self, writer: &mut Writer<Vec<u8>>, id: NodeId) -> io::Result<()> {
        if self.is_comment(id) {
            let text = self.text(id).unwrap_or_default();
            writer.write_event(Event::Comment(BytesText::new(text)))?;
            return Ok(());
        }

        let tag = self.tag(id);
        let mut start = BytesStart::new(tag);
        for (name, value) in self.attrs(id) {
            start.push_attribute((name.as_str(), value.as_str()));
        }

        let text = self.text(id).filter(|t| !t.is_empty());
        if text.is_none() && self.children(id).is_empty() {
            writer.write_event(Event::Empty(start))?;
            return Ok(());
        }

        writer.write_event(Event::Start(start))?;
        if let Some(text) = text {
            writer.write_event(Event::Text(BytesText::new(text)))?;
        }
        for &child in self.children(id).iter() {
            self.write_node(writer, child)?;
            if let Some(tail) = self.tail(child).filter(|t| !t.is_empty()) {
                writer.write_event(Event::Text(BytesText::new(tail)))?;
            }
        }
        writer.write_event(Event::End(BytesEnd::new(tag)))?;
        Ok(())
    }
}
