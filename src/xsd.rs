//! Parsed XSD model and structural validation.
//!
//! A schema descriptor carries a compiled validator; this module is
//! that surface. It resolves element declarations (inline and named
//! complex types), required attributes, and occurrence bounds, and
//! checks a document against them, reporting `{line, message}` pairs.
//! Lexical facets of simple types stay with the external XSD engine.
//!
//! The parsed schema document itself remains reachable through
//! [`XsdSchema::document`] so the assertion harvester can walk its
//! `xs:appinfo` annotations.

use std::collections::HashMap;

use anyhow::{Result, anyhow};

use crate::dom::{Document, Node, local_name};

#[derive(Debug, Clone)]
pub struct XsdViolation {
    pub line: usize,
    pub message: String,
}

#[derive(Debug, Clone)]
struct AttrDecl {
    name: String,
    required: bool,
}

#[derive(Debug, Clone)]
struct ElementDecl {
    name: String,
    min_occurs: u32,
    max_occurs: Option<u32>,
    type_ref: Option<String>,
    inline: Option<TypeDef>,
}

#[derive(Debug, Clone, Default)]
struct TypeDef {
    attrs: Vec<AttrDecl>,
    particles: Vec<Particle>,
    open_content: bool,
}

#[derive(Debug, Clone)]
enum Particle {
    Element(ElementDecl),
    Choice {
        min_occurs: u32,
        branches: Vec<ElementDecl>,
    },
}

/// Compiled structural validator plus the schema document it came from.
#[derive(Debug)]
pub struct XsdSchema {
    doc: Document,
    roots: Vec<ElementDecl>,
    types: HashMap<String, TypeDef>,
}

impl XsdSchema {
    pub fn parse(bytes: &[u8]) -> Result<XsdSchema> {
        let doc = Document::parse(bytes)?;
        Self::compile(doc)
    }

    pub fn compile(doc: Document) -> Result<XsdSchema> {
        let root = doc.root();
        if root.local_name() != "schema" {
            return Err(anyhow!(
                "Expected xs:schema root, found <{}>",
                root.name()
            ));
        }

        let mut types = HashMap::new();
        let mut roots = Vec::new();
        for child in root.children() {
            match local_name(child.name()) {
                "complexType" => {
                    let name = child
                        .attr("name")
                        .ok_or_else(|| anyhow!("Top-level xs:complexType without a name"))?;
                    types.insert(name.to_string(), parse_type(child)?);
                }
                "element" => roots.push(parse_element(child)?),
                _ => {}
            }
        }
        if roots.is_empty() {
            return Err(anyhow!("Schema declares no root element"));
        }
        Ok(XsdSchema { doc, roots, types })
    }

    pub fn document(&self) -> &Document {
        &self.doc
    }

    /// Validates the document structure and collects every violation.
    pub fn validate(&self, doc: &Document) -> Vec<XsdViolation> {
        let mut violations = Vec::new();
        let root = doc.root();
        match self
            .roots
            .iter()
            .find(|decl| decl.name == root.local_name())
        {
            Some(decl) => self.validate_element(root, decl, &mut violations),
            None => violations.push(XsdViolation {
                line: root.line(),
                message: format!(
                    "Element '{}': no matching global declaration available",
                    root.name()
                ),
            }),
        }
        violations
    }

    fn resolve_type<'s>(&'s self, decl: &'s ElementDecl) -> Option<&'s TypeDef> {
        if let Some(inline) = &decl.inline {
            return Some(inline);
        }
        let reference = decl.type_ref.as_deref()?;
        self.types.get(local_name(reference))
    }

    fn validate_element(&self, node: Node<'_>, decl: &ElementDecl, out: &mut Vec<XsdViolation>) {
        let Some(typedef) = self.resolve_type(decl) else {
            // Simple-typed leaf (builtin or unknown named type):
            // nothing structural to check.
            return;
        };

        for attr in &typedef.attrs {
            if attr.required && node.attr(&attr.name).is_none() {
                out.push(XsdViolation {
                    line: node.line(),
                    message: format!(
                        "Element '{}': missing required attribute '{}'",
                        node.name(),
                        attr.name
                    ),
                });
            }
        }

        let mut declared: HashMap<&str, &ElementDecl> = HashMap::new();
        for particle in &typedef.particles {
            match particle {
                Particle::Element(child) => {
                    declared.insert(child.name.as_str(), child);
                }
                Particle::Choice { branches, .. } => {
                    for branch in branches {
                        declared.insert(branch.name.as_str(), branch);
                    }
                }
            }
        }

        let mut counts: HashMap<&str, u32> = HashMap::new();
        for child in node.children() {
            *counts.entry(child.local_name()).or_insert(0) += 1;
        }

        for particle in &typedef.particles {
            match particle {
                Particle::Element(child) => {
                    let seen = counts.get(child.name.as_str()).copied().unwrap_or(0);
                    if seen < child.min_occurs {
                        out.push(XsdViolation {
                            line: node.line(),
                            message: format!(
                                "Element '{}': missing required child element '{}'",
                                node.name(),
                                child.name
                            ),
                        });
                    }
                    if let Some(max) = child.max_occurs
                        && seen > max
                    {
                        out.push(XsdViolation {
                            line: node.line(),
                            message: format!(
                                "Element '{}': element '{}' occurs {} times, at most {} allowed",
                                node.name(),
                                child.name,
                                seen,
                                max
                            ),
                        });
                    }
                }
                Particle::Choice {
                    min_occurs,
                    branches,
                } => {
                    if *min_occurs > 0
                        && !branches
                            .iter()
                            .any(|branch| counts.contains_key(branch.name.as_str()))
                    {
                        let options = branches
                            .iter()
                            .map(|branch| branch.name.as_str())
                            .collect::<Vec<_>>()
                            .join(" | ");
                        out.push(XsdViolation {
                            line: node.line(),
                            message: format!(
                                "Element '{}': none of the choice alternatives ( {options} ) is present",
                                node.name()
                            ),
                        });
                    }
                }
            }
        }

        for child in node.children() {
            match declared.get(child.local_name()) {
                Some(child_decl) => self.validate_element(child, child_decl, out),
                None => {
                    if !typedef.open_content {
                        out.push(XsdViolation {
                            line: child.line(),
                            message: format!(
                                "Element '{}': unexpected element '{}'",
                                node.name(),
                                child.name()
                            ),
                        });
                    }
                }
            }
        }
    }
}

fn occurs(node: Node<'_>, attr: &str, default: u32) -> u32 {
    node.attr(attr)
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

fn max_occurs(node: Node<'_>) -> Option<u32> {
    match node.attr("maxOccurs") {
        Some("unbounded") => None,
        Some(value) => value.parse().ok(),
        None => Some(1),
    }
}

fn parse_element(node: Node<'_>) -> Result<ElementDecl> {
    let name = node
        .attr("name")
        .or_else(|| node.attr("ref"))
        .ok_or_else(|| anyhow!("xs:element without name or ref"))?;
    let inline = match node.first_child_named("complexType") {
        Some(inner) => Some(parse_type(inner)?),
        None => None,
    };
    Ok(ElementDecl {
        name: local_name(name).to_string(),
        min_occurs: occurs(node, "minOccurs", 1),
        max_occurs: max_occurs(node),
        type_ref: node.attr("type").map(str::to_string),
        inline,
    })
}

fn parse_type(node: Node<'_>) -> Result<TypeDef> {
    let mut typedef = TypeDef::default();
    collect_content(node, &mut typedef)?;
    Ok(typedef)
}

fn collect_content(node: Node<'_>, typedef: &mut TypeDef) -> Result<()> {
    for child in node.children() {
        match local_name(child.name()) {
            "attribute" => {
                if let Some(name) = child.attr("name") {
                    typedef.attrs.push(AttrDecl {
                        name: name.to_string(),
                        required: child.attr("use") == Some("required"),
                    });
                }
            }
            "sequence" | "all" => collect_content(child, typedef)?,
            "choice" => {
                let mut branches = Vec::new();
                for branch in child.children() {
                    if local_name(branch.name()) == "element" {
                        branches.push(parse_element(branch)?);
                    }
                }
                typedef.particles.push(Particle::Choice {
                    min_occurs: occurs(child, "minOccurs", 1),
                    branches,
                });
            }
            "element" => {
                typedef
                    .particles
                    .push(Particle::Element(parse_element(child)?));
            }
            "simpleContent" | "complexContent" => {
                for inner in child.children() {
                    if matches!(local_name(inner.name()), "extension" | "restriction") {
                        collect_content(inner, typedef)?;
                    }
                }
            }
            "any" => typedef.open_content = true,
            // Annotations and facets carry no structure.
            _ => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCHEMA: &str = r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
  <xs:element name="Файл">
    <xs:complexType>
      <xs:sequence>
        <xs:element name="Документ" type="ТДокумент"/>
      </xs:sequence>
      <xs:attribute name="ИдФайл" use="required"/>
    </xs:complexType>
  </xs:element>
  <xs:complexType name="ТДокумент">
    <xs:sequence>
      <xs:element name="СвНП" minOccurs="1"/>
      <xs:element name="Подписант" minOccurs="0"/>
    </xs:sequence>
    <xs:attribute name="КНД" use="required"/>
  </xs:complexType>
</xs:schema>"#;

    fn schema() -> XsdSchema {
        XsdSchema::parse(SCHEMA.as_bytes()).unwrap()
    }

    fn parse_doc(xml: &str) -> Document {
        Document::parse_str(xml, encoding_rs::UTF_8).unwrap()
    }

    #[test]
    fn valid_document_yields_no_violations() {
        let doc = parse_doc(
            r#"<Файл ИдФайл="f"><Документ КНД="1"><СвНП/></Документ></Файл>"#,
        );
        assert!(schema().validate(&doc).is_empty());
    }

    #[test]
    fn missing_required_child_is_reported_with_a_line() {
        let doc = parse_doc("<Файл ИдФайл=\"f\">\n  <Документ КНД=\"1\"/>\n</Файл>");
        let violations = schema().validate(&doc);
        assert_eq!(violations.len(), 1);
        assert!(violations[0].message.contains("СвНП"));
        assert_eq!(violations[0].line, 2);
    }

    #[test]
    fn missing_required_attribute_is_reported() {
        let doc = parse_doc(r#"<Файл><Документ КНД="1"><СвНП/></Документ></Файл>"#);
        let violations = schema().validate(&doc);
        assert_eq!(violations.len(), 1);
        assert!(violations[0].message.contains("ИдФайл"));
    }

    #[test]
    fn optional_elements_may_be_absent_but_not_repeated() {
        let doc = parse_doc(
            r#"<Файл ИдФайл="f"><Документ КНД="1"><СвНП/><Подписант/><Подписант/></Документ></Файл>"#,
        );
        let violations = schema().validate(&doc);
        assert_eq!(violations.len(), 1);
        assert!(violations[0].message.contains("Подписант"));
    }

    #[test]
    fn unexpected_elements_are_flagged() {
        let doc = parse_doc(
            r#"<Файл ИдФайл="f"><Документ КНД="1"><СвНП/><Лишний/></Документ></Файл>"#,
        );
        let violations = schema().validate(&doc);
        assert_eq!(violations.len(), 1);
        assert!(violations[0].message.contains("Лишний"));
    }

    #[test]
    fn required_choice_demands_one_branch() {
        let xsd = r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
  <xs:element name="Док">
    <xs:complexType>
      <xs:choice>
        <xs:element name="НПЮЛ"/>
        <xs:element name="НПФЛ"/>
      </xs:choice>
    </xs:complexType>
  </xs:element>
</xs:schema>"#;
        let schema = XsdSchema::parse(xsd.as_bytes()).unwrap();
        let doc = parse_doc("<Док/>");
        let violations = schema.validate(&doc);
        assert_eq!(violations.len(), 1);
        assert!(violations[0].message.contains("НПЮЛ"));

        let doc = parse_doc("<Док><НПФЛ/></Док>");
        assert!(schema.validate(&doc).is_empty());
    }
}
