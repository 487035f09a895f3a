//! Owned XML document model.
//!
//! The checking core needs a small, stable surface over parsed XML:
//! element/attribute lookup along `//Ctx/Step/@attr` paths, document
//! order traversal, and a line number for every node so violations can
//! point at the source. Documents are immutable once parsed.
//!
//! Namespace prefixes are kept in the stored names; matching is done
//! on the local part so `xs:element` and `xsd:element` compare equal.

use anyhow::{Result, anyhow};
use encoding_rs::Encoding;
use quick_xml::Reader;
use quick_xml::events::Event;

use crate::io_utils;

pub type NodeId = usize;

#[derive(Debug)]
struct NodeData {
    name: String,
    attrs: Vec<(String, String)>,
    /// Character data before the first child element.
    text: String,
    /// Character data following this element inside its parent.
    tail: String,
    children: Vec<NodeId>,
    parent: Option<NodeId>,
    offset: usize,
}

/// An immutable parsed XML tree with its origin encoding preserved.
#[derive(Debug)]
pub struct Document {
    nodes: Vec<NodeData>,
    line_starts: Vec<usize>,
    encoding: &'static Encoding,
}

/// A borrowed handle to one element of a [`Document`].
#[derive(Debug, Clone, Copy)]
pub struct Node<'a> {
    doc: &'a Document,
    id: NodeId,
}

/// One hit of a path lookup: an element or an attribute value.
#[derive(Debug, Clone)]
pub enum PathHit<'a> {
    Element(Node<'a>),
    Attr(&'a str),
}

pub fn local_name(name: &str) -> &str {
    match name.rsplit_once(':') {
        Some((_, local)) => local,
        None => name,
    }
}

impl Document {
    /// Parses a document from raw bytes, trying UTF-8 then cp1251.
    pub fn parse(bytes: &[u8]) -> Result<Document> {
        let decoded = io_utils::decode_auto(bytes)?;
        Self::parse_str(&decoded.text, decoded.encoding)
    }

    pub fn parse_str(text: &str, encoding: &'static Encoding) -> Result<Document> {
        let mut reader = Reader::from_str(text);
        reader.config_mut().trim_text(true);

        let mut nodes: Vec<NodeData> = Vec::new();
        let mut open: Vec<NodeId> = Vec::new();
        loop {
            match reader.read_event() {
                Ok(Event::Start(e)) => {
                    // Position just past the start tag's `>` stays on
                    // the element's own line for single-line tags.
                    let offset = (reader.buffer_position() as usize).saturating_sub(1);
                    let id = push_node(&mut nodes, &mut open, &e, offset)?;
                    open.push(id);
                }
                Ok(Event::Empty(e)) => {
                    let offset = (reader.buffer_position() as usize).saturating_sub(1);
                    push_node(&mut nodes, &mut open, &e, offset)?;
                }
                Ok(Event::End(_)) => {
                    open.pop();
                }
                Ok(Event::Text(t)) => {
                    if let Some(&current) = open.last() {
                        let piece = t
                            .unescape()
                            .map_err(|err| anyhow!("XML text unescape error: {err}"))?;
                        // Text before the first child is the element's
                        // own text; later runs are the tail of the
                        // preceding child.
                        let slot = match nodes[current].children.last() {
                            Some(&last_child) => &mut nodes[last_child].tail,
                            None => &mut nodes[current].text,
                        };
                        if !slot.is_empty() {
                            slot.push(' ');
                        }
                        slot.push_str(&piece);
                    }
                }
                Ok(Event::Eof) => break,
                // Comments, declarations, PIs, CDATA and DTD carry no
                // structure the checkers read.
                Ok(_) => {}
                Err(err) => {
                    return Err(anyhow!(
                        "XML parse error at byte {}: {err}",
                        reader.error_position()
                    ));
                }
            }
        }
        if nodes.is_empty() {
            return Err(anyhow!("Document has no root element"));
        }

        let mut line_starts = vec![0usize];
        for (idx, byte) in text.bytes().enumerate() {
            if byte == b'\n' {
                line_starts.push(idx + 1);
            }
        }

        Ok(Document {
            nodes,
            line_starts,
            encoding,
        })
    }

    pub fn encoding(&self) -> &'static Encoding {
        self.encoding
    }

    pub fn root(&self) -> Node<'_> {
        Node { doc: self, id: 0 }
    }

    fn line_of_offset(&self, offset: usize) -> usize {
        match self.line_starts.binary_search(&offset) {
            Ok(line) => line + 1,
            Err(line) => line,
        }
    }

    /// Resolves an absolute `//First/Step/.../@attr` path against the
    /// whole tree. The first step matches any element in document
    /// order (root included); the remaining steps descend through
    /// children. A final `@attr` step selects attribute values.
    pub fn select(&self, path: &str) -> Vec<PathHit<'_>> {
        let trimmed = path.trim().trim_start_matches('/');
        let steps: Vec<&str> = trimmed.split('/').filter(|s| !s.is_empty()).collect();
        if steps.is_empty() {
            return Vec::new();
        }

        let mut hits = Vec::new();
        let first = steps[0];
        if let Some(attr) = first.strip_prefix('@') {
            // Attribute straight off the root.
            if let Some(value) = self.root().attr(attr) {
                hits.push(PathHit::Attr(value));
            }
            return hits;
        }
        for start in self.root().descendants_and_self() {
            if local_name(start.name()) == first {
                start.walk_steps(&steps[1..], &mut hits);
            }
        }
        hits
    }

    pub fn exists(&self, path: &str) -> bool {
        !self.select(path).is_empty()
    }

    pub fn count(&self, path: &str) -> usize {
        self.select(path).len()
    }

    /// First attribute value a path resolves to, if any.
    pub fn attr_value(&self, path: &str) -> Option<&str> {
        self.select(path).into_iter().find_map(|hit| match hit {
            PathHit::Attr(value) => Some(value),
            PathHit::Element(_) => None,
        })
    }
}

fn push_node(
    nodes: &mut Vec<NodeData>,
    open: &mut [NodeId],
    e: &quick_xml::events::BytesStart<'_>,
    offset: usize,
) -> Result<NodeId> {
    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
    let mut attrs = Vec::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|err| anyhow!("Malformed attribute in <{name}>: {err}"))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|err| anyhow!("Malformed attribute value in <{name}>: {err}"))?
            .into_owned();
        attrs.push((key, value));
    }
    let id = nodes.len();
    let parent = open.last().copied();
    nodes.push(NodeData {
        name,
        attrs,
        text: String::new(),
        tail: String::new(),
        children: Vec::new(),
        parent,
        offset,
    });
    if let Some(parent_id) = parent {
        nodes[parent_id].children.push(id);
    } else if id != 0 {
        return Err(anyhow!("Multiple root elements"));
    }
    Ok(id)
}

impl<'a> Node<'a> {
    pub fn name(&self) -> &'a str {
        &self.doc.nodes[self.id].name
    }

    pub fn local_name(&self) -> &'a str {
        local_name(self.name())
    }

    pub fn text(&self) -> &'a str {
        &self.doc.nodes[self.id].text
    }

    pub fn tail(&self) -> &'a str {
        &self.doc.nodes[self.id].tail
    }

    pub fn line(&self) -> usize {
        self.doc.line_of_offset(self.doc.nodes[self.id].offset)
    }

    pub fn attr(&self, name: &str) -> Option<&'a str> {
        self.doc.nodes[self.id]
            .attrs
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn attrs(&self) -> impl Iterator<Item = (&'a str, &'a str)> {
        self.doc.nodes[self.id]
            .attrs
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn parent(&self) -> Option<Node<'a>> {
        self.doc.nodes[self.id]
            .parent
            .map(|id| Node { doc: self.doc, id })
    }

    pub fn children(&self) -> impl Iterator<Item = Node<'a>> + '_ {
        self.doc.nodes[self.id]
            .children
            .iter()
            .map(|&id| Node { doc: self.doc, id })
    }

    pub fn children_named(&self, name: &str) -> Vec<Node<'a>> {
        self.children()
            .filter(|child| local_name(child.name()) == name)
            .collect()
    }

    pub fn first_child_named(&self, name: &str) -> Option<Node<'a>> {
        self.children()
            .find(|child| local_name(child.name()) == name)
    }

    /// Document-order traversal of this node and everything below it.
    pub fn descendants_and_self(&self) -> Vec<Node<'a>> {
        let mut out = Vec::new();
        let mut stack = vec![self.id];
        while let Some(id) = stack.pop() {
            out.push(Node { doc: self.doc, id });
            for &child in self.doc.nodes[id].children.iter().rev() {
                stack.push(child);
            }
        }
        out
    }

    pub fn descendants_named(&self, name: &str) -> Vec<Node<'a>> {
        self.descendants_and_self()
            .into_iter()
            .skip(1)
            .filter(|node| local_name(node.name()) == name)
            .collect()
    }

    pub fn ancestors(&self) -> Vec<Node<'a>> {
        let mut out = Vec::new();
        let mut current = self.parent();
        while let Some(node) = current {
            current = node.parent();
            out.push(node);
        }
        out
    }

    fn walk_steps(&self, steps: &[&str], hits: &mut Vec<PathHit<'a>>) {
        match steps.split_first() {
            None => hits.push(PathHit::Element(*self)),
            Some((step, rest)) => {
                if let Some(attr) = step.strip_prefix('@') {
                    if rest.is_empty() {
                        if let Some(value) = self.attr(attr) {
                            hits.push(PathHit::Attr(value));
                        }
                    }
                    return;
                }
                for child in self.children() {
                    if local_name(child.name()) == *step {
                        child.walk_steps(rest, hits);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<Файл ИдФайл="NO_NDS_1">
  <Документ КНД="1151111" ВерсФорм="5.01">
    <СвПред ОКТМО="45000000"/>
    <СвПред ОКТМО="46000000"/>
  </Документ>
</Файл>"#;

    fn doc() -> Document {
        Document::parse_str(SAMPLE, encoding_rs::UTF_8).unwrap()
    }

    #[test]
    fn select_resolves_elements_and_attributes() {
        let doc = doc();
        assert!(doc.exists("//Файл"));
        assert!(doc.exists("//Файл/Документ"));
        assert!(doc.exists("//Документ"));
        assert!(!doc.exists("//Отчёт"));
        assert_eq!(doc.attr_value("//Документ/@КНД"), Some("1151111"));
        assert_eq!(doc.count("//Документ/СвПред"), 2);
        assert_eq!(doc.count("//Документ/СвПред/@ОКТМО"), 2);
    }

    #[test]
    fn lines_point_into_the_source() {
        let doc = doc();
        let hits = doc.select("//Документ/СвПред");
        let PathHit::Element(first) = &hits[0] else {
            panic!("expected element hit");
        };
        assert_eq!(first.line(), 3);
    }

    #[test]
    fn namespace_prefixes_match_on_local_names() {
        let xml = r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
  <xs:element name="Файл"/>
</xs:schema>"#;
        let doc = Document::parse_str(xml, encoding_rs::UTF_8).unwrap();
        assert_eq!(doc.root().local_name(), "schema");
        assert_eq!(doc.root().descendants_named("element").len(), 1);
    }

    #[test]
    fn ancestors_walk_to_the_root() {
        let doc = doc();
        let hits = doc.select("//СвПред");
        let PathHit::Element(node) = &hits[0] else {
            panic!("expected element hit");
        };
        let names: Vec<&str> = node.ancestors().iter().map(|n| n.name()).collect();
        assert_eq!(names, vec!["Документ", "Файл"]);
    }

    #[test]
    fn mixed_content_splits_text_and_tails() {
        let xml = r#"<error>Значение <select select="@Код"/> недопустимо</error>"#;
        let doc = Document::parse_str(xml, encoding_rs::UTF_8).unwrap();
        let root = doc.root();
        assert_eq!(root.text(), "Значение");
        let child = root.children().next().unwrap();
        assert_eq!(child.attr("select"), Some("@Код"));
        assert_eq!(child.tail(), "недопустимо");
    }

    #[test]
    fn cp1251_bytes_parse_with_fallback() {
        let (bytes, _, _) = encoding_rs::WINDOWS_1251.encode(SAMPLE);
        let doc = Document::parse(&bytes).unwrap();
        assert_eq!(doc.encoding(), encoding_rs::WINDOWS_1251);
        assert_eq!(doc.attr_value("//Файл/@ИдФайл"), Some("NO_NDS_1"));
    }
}
