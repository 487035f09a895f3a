//! FNS compendium: the vendor catalogue index and the Schematron
//! assertion harvester.
//!
//! Built once at startup and read-only afterwards. The catalogue file
//! `formats.xml` names every known form (KND) with its versions; each
//! version's XSD is parsed, compiled, and its embedded Schematron
//! rules harvested and pre-tokenized here, so checking a document
//! never re-reads the expression text.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use log::{debug, info};

use crate::dom::{Document, Node};
use crate::error::CheckError;
use crate::fns::tokenizer::{self, Token};
use crate::xsd::XsdSchema;

/// Error template attached to one assertion: the literal text with
/// embedded sub-expressions re-evaluated on failure.
#[derive(Debug, Clone)]
pub struct ErrorTemplate {
    pub code: String,
    pub text: String,
    pub placeholders: Vec<Placeholder>,
}

#[derive(Debug, Clone)]
pub struct Placeholder {
    /// The literal `select` text as it appears inside the template.
    pub select: String,
    pub rpn: Vec<Token>,
}

/// One harvested Schematron assertion.
#[derive(Debug, Clone)]
pub struct SchematronRule {
    pub name: String,
    pub context: String,
    pub test: String,
    pub test_rpn: Vec<Token>,
    pub error: ErrorTemplate,
    /// Set when an `xs:choice` ancestor makes the rule optional: a
    /// missing context then skips the rule instead of failing.
    pub in_choice: bool,
}

/// One schema version of a format: the compiled validator plus its
/// pre-tokenized rules and validity window.
#[derive(Debug)]
pub struct SchemaVersion {
    pub xsd_name: String,
    pub schema: XsdSchema,
    pub rules: Vec<SchematronRule>,
    pub date_from: Option<NaiveDate>,
    pub date_till: Option<NaiveDate>,
    pub info_format: Option<String>,
}

#[derive(Debug)]
pub struct FormatEntry {
    pub alias_short: String,
    pub alias_full: String,
    pub versions: HashMap<String, SchemaVersion>,
}

/// Process-wide immutable index of FNS schema descriptors, keyed by
/// `(KND, version)`.
#[derive(Debug)]
pub struct FnsCompendium {
    formats: HashMap<String, FormatEntry>,
}

const CATALOGUE_FILE: &str = "formats.xml";

impl FnsCompendium {
    /// Loads the catalogue and every referenced XSD under `root`.
    /// A single bad file fails the whole load.
    pub fn load(root: &Path) -> Result<FnsCompendium> {
        let catalogue_path = root.join(CATALOGUE_FILE);
        let bytes = std::fs::read(&catalogue_path)
            .with_context(|| format!("Opening FNS catalogue {catalogue_path:?}"))?;
        let catalogue = Document::parse(&bytes).map_err(|err| CheckError::CompendiumParse {
            file: CATALOGUE_FILE.to_string(),
            cause: err.to_string(),
        })?;

        let mut formats = HashMap::new();
        for format in catalogue.root().children_named("format") {
            let direction = format.attr("direction").unwrap_or("");
            if !(direction == "ФНС" || direction.is_empty()) {
                continue;
            }
            if format.attr("obsolete") == Some("true") {
                continue;
            }
            let knd = require_attr(format, "knd", CATALOGUE_FILE)?;

            let mut versions = HashMap::new();
            for version in format.children_named("version") {
                let number = require_attr(version, "number", CATALOGUE_FILE)?;
                let xsd_name = require_attr(version, "xsd", CATALOGUE_FILE)?;
                versions.insert(
                    number.to_string(),
                    load_version(root, version, xsd_name)?,
                );
            }
            debug!("Catalogue format КНД {knd}: {} version(s)", versions.len());
            formats.insert(
                knd.to_string(),
                FormatEntry {
                    alias_short: format.attr("alias-short").unwrap_or("").to_string(),
                    alias_full: format.attr("alias-full").unwrap_or("").to_string(),
                    versions,
                },
            );
        }
        info!("FNS compendium loaded: {} format(s)", formats.len());
        Ok(FnsCompendium { formats })
    }

    pub fn descriptor(&self, knd: &str, version: &str) -> Option<&SchemaVersion> {
        self.formats.get(knd)?.versions.get(version)
    }

    pub fn format(&self, knd: &str) -> Option<&FormatEntry> {
        self.formats.get(knd)
    }

    pub fn formats(&self) -> impl Iterator<Item = (&String, &FormatEntry)> {
        self.formats.iter()
    }
}

fn require_attr<'a>(node: Node<'a>, name: &str, file: &str) -> Result<&'a str, CheckError> {
    node.attr(name).ok_or_else(|| CheckError::CompendiumParse {
        file: file.to_string(),
        cause: format!(
            "Элемент <{}> без обязательного атрибута {name}",
            node.name()
        ),
    })
}

fn load_version(root: &Path, version: Node<'_>, xsd_name: &str) -> Result<SchemaVersion> {
    let xsd_path = root.join(xsd_name);
    let bytes = std::fs::read(&xsd_path)
        .with_context(|| format!("Opening XSD schema {xsd_path:?}"))?;
    let schema = XsdSchema::parse(&bytes).map_err(|err| CheckError::XsdParse {
        xsd_name: xsd_name.to_string(),
        cause: err.to_string(),
    })?;
    let rules = harvest_rules(schema.document(), xsd_name)?;
    debug!("{xsd_name}: {} assertion(s) harvested", rules.len());

    let parse_date = |attr: &str| {
        version
            .attr(attr)
            .and_then(|value| NaiveDate::parse_from_str(value, "%d.%m.%Y").ok())
    };
    Ok(SchemaVersion {
        xsd_name: xsd_name.to_string(),
        schema,
        rules,
        date_from: parse_date("date-from"),
        date_till: parse_date("date-till"),
        info_format: version.attr("info-format").map(str::to_string),
    })
}

/// Walks every `xs:appinfo` of a schema document and emits one rule
/// per `<assert>`/`<error>` pair, pre-tokenizing the test expression
/// and every error-template placeholder.
///
/// Rules under a `minOccurs="0"` ancestor are dropped here (the parent
/// may legitimately be absent); an `xs:choice` ancestor is recorded on
/// the rule and consulted at check time.
pub fn harvest_rules(schema_doc: &Document, xsd_name: &str) -> Result<Vec<SchematronRule>> {
    let mut rules = Vec::new();

    for appinfo in schema_doc.root().descendants_named("appinfo") {
        let ancestors = appinfo.ancestors();
        if ancestors
            .iter()
            .any(|node| node.attr("minOccurs") == Some("0"))
        {
            continue;
        }
        let in_choice = ancestors
            .iter()
            .any(|node| node.local_name() == "choice");

        for pattern in appinfo.children() {
            let Some(name) = pattern.attr("name") else {
                continue;
            };
            for rule in pattern.children() {
                let context = match rule.attr("context") {
                    Some(context) => context,
                    None => {
                        return Err(CheckError::CompendiumParse {
                            file: xsd_name.to_string(),
                            cause: format!("Правило в шаблоне {name} без атрибута context"),
                        }
                        .into());
                    }
                };
                for assertion in rule.children() {
                    let Some(test) = assertion.attr("test") else {
                        continue;
                    };
                    let test_rpn = tokenize_or_fail(test, xsd_name)?;
                    for error_node in assertion.children() {
                        let error = build_template(error_node, xsd_name)?;
                        rules.push(SchematronRule {
                            name: name.to_string(),
                            context: context.to_string(),
                            test: test.to_string(),
                            test_rpn: test_rpn.clone(),
                            error,
                            in_choice,
                        });
                    }
                }
            }
        }
    }
    Ok(rules)
}

fn tokenize_or_fail(expression: &str, xsd_name: &str) -> Result<Vec<Token>> {
    tokenizer::tokenize(expression)
        .map_err(|err| CheckError::tokenizer(expression, xsd_name, err).into())
}

/// Assembles the error template: element text, each `<select>` child
/// appended in place, tails preserved, whitespace collapsed.
fn build_template(error_node: Node<'_>, xsd_name: &str) -> Result<ErrorTemplate> {
    let code = error_node.attr("code").unwrap_or("").to_string();
    let mut text = error_node.text().to_string();
    let mut placeholders = Vec::new();

    for child in error_node.children() {
        if let Some(select) = child.attr("select") {
            placeholders.push(Placeholder {
                select: select.to_string(),
                rpn: tokenize_or_fail(select, xsd_name)?,
            });
            text.push_str(select);
        }
        if !child.tail().is_empty() {
            text.push(' ');
            text.push_str(child.tail());
        }
    }

    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
    Ok(ErrorTemplate {
        code,
        text,
        placeholders,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const XSD: &str = r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
  <xs:element name="Файл">
    <xs:annotation>
      <xs:appinfo>
        <pattern name="Проверка имени файла">
          <rule context="Файл">
            <assert test="usch:getFileName() = @ИдФайл">
              <error code="0400400007">Имя файла
                <select select="usch:getFileName()"/> не совпадает со значением элемента ИдФайл
                <select select="@ИдФайл"/>
              </error>
            </assert>
          </rule>
        </pattern>
      </xs:appinfo>
    </xs:annotation>
    <xs:complexType>
      <xs:attribute name="ИдФайл" use="required"/>
    </xs:complexType>
  </xs:element>
</xs:schema>"#;

    #[test]
    fn harvest_collects_pretokenized_rules() {
        let doc = Document::parse_str(XSD, encoding_rs::UTF_8).unwrap();
        let rules = harvest_rules(&doc, "test.xsd").unwrap();
        assert_eq!(rules.len(), 1);
        let rule = &rules[0];
        assert_eq!(rule.name, "Проверка имени файла");
        assert_eq!(rule.context, "Файл");
        assert!(!rule.test_rpn.is_empty());
        assert!(!rule.in_choice);
        assert_eq!(rule.error.code, "0400400007");
        assert_eq!(rule.error.placeholders.len(), 2);
        assert_eq!(
            rule.error.text,
            "Имя файла usch:getFileName() не совпадает со значением элемента ИдФайл @ИдФайл"
        );
    }

    #[test]
    fn min_occurs_zero_ancestors_drop_their_rules() {
        let xsd = r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
  <xs:element name="Файл">
    <xs:complexType>
      <xs:sequence>
        <xs:element name="Подписант" minOccurs="0">
          <xs:annotation>
            <xs:appinfo>
              <pattern name="Необязательная проверка">
                <rule context="Подписант">
                  <assert test="@ПрПодп = 1">
                    <error code="1">текст</error>
                  </assert>
                </rule>
              </pattern>
            </xs:appinfo>
          </xs:annotation>
        </xs:element>
      </xs:sequence>
    </xs:complexType>
  </xs:element>
</xs:schema>"#;
        let doc = Document::parse_str(xsd, encoding_rs::UTF_8).unwrap();
        let rules = harvest_rules(&doc, "test.xsd").unwrap();
        assert!(rules.is_empty());
    }

    #[test]
    fn choice_ancestry_is_recorded() {
        let xsd = r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
  <xs:element name="Файл">
    <xs:complexType>
      <xs:choice>
        <xs:element name="НПЮЛ">
          <xs:annotation>
            <xs:appinfo>
              <pattern name="Проверка ЮЛ">
                <rule context="НПЮЛ">
                  <assert test="@ИННЮЛ != ''">
                    <error code="2">нет ИНН</error>
                  </assert>
                </rule>
              </pattern>
            </xs:appinfo>
          </xs:annotation>
        </xs:element>
      </xs:choice>
    </xs:complexType>
  </xs:element>
</xs:schema>"#;
        let doc = Document::parse_str(xsd, encoding_rs::UTF_8).unwrap();
        let rules = harvest_rules(&doc, "test.xsd").unwrap();
        assert_eq!(rules.len(), 1);
        assert!(rules[0].in_choice);
    }

    #[test]
    fn bad_test_expression_fails_the_load() {
        let xsd = r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
  <xs:element name="Файл">
    <xs:annotation>
      <xs:appinfo>
        <pattern name="Сломанная проверка">
          <rule context="Файл">
            <assert test="bogus(@х">
              <error code="3">текст</error>
            </assert>
          </rule>
        </pattern>
      </xs:appinfo>
    </xs:annotation>
  </xs:element>
</xs:schema>"#;
        let doc = Document::parse_str(xsd, encoding_rs::UTF_8).unwrap();
        let err = harvest_rules(&doc, "broken.xsd").unwrap_err();
        assert!(err.to_string().contains("лексическом анализе"));
    }
}
