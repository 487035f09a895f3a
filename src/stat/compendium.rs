//! STAT compendium: in-memory index of metaForm templates.
//!
//! Every file under the compendium tree is a form template keyed by
//! `{OKUD}_{IDF}`. Control expressions are tokenized here, at load
//! time; checking a document never re-parses expression text.
//! Controls that reference the previous period (`{{…}}`) carry data
//! this checker cannot see and are dropped.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use anyhow::{Context, Result};
use log::{debug, info};

use crate::dom::{Document, Node};
use crate::error::CheckError;
use crate::io_utils;
use crate::stat::tokenizer::{self, StatToken};

#[derive(Debug, Clone)]
pub struct TitleField {
    pub name: String,
    pub dic: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ColumnScheme {
    pub code: String,
    pub col_type: String,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct RowScheme {
    pub code: String,
    pub row_type: String,
    pub name: String,
}

/// Section descriptor: the numeric (type Z) columns form the dataframe
/// grid; the remaining declared columns are known but carry no cells.
#[derive(Debug, Clone)]
pub struct SectionScheme {
    pub code: String,
    pub name: String,
    pub columns: Vec<ColumnScheme>,
    pub rows: Vec<RowScheme>,
    /// Grid column code → column index.
    pub col_index: HashMap<String, usize>,
    /// Grid column codes in index order.
    pub col_codes: Vec<i64>,
    /// Every declared column code, grid or not.
    pub known_codes: HashSet<String>,
}

/// One control: the rule itself, an optional guard condition, and an
/// optional period-applicability predicate, all pre-tokenized.
#[derive(Debug, Clone)]
pub struct Control {
    pub id: String,
    pub name: String,
    pub rule_text: String,
    pub rule: Vec<StatToken>,
    pub condition_text: Option<String>,
    pub condition: Option<Vec<StatToken>>,
    pub period_text: Option<String>,
    pub period: Option<Vec<StatToken>>,
    /// Section the rule reads, taken from its first element reference.
    pub section: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct Dictionary {
    pub name: String,
    pub terms: HashMap<String, String>,
}

#[derive(Debug)]
pub struct FormScheme {
    pub meta: HashMap<String, String>,
    pub title: HashMap<String, TitleField>,
    pub sections: HashMap<String, SectionScheme>,
    pub controls: Vec<Control>,
    pub dics: HashMap<String, Dictionary>,
}

/// Process-wide immutable index of form templates keyed `{OKUD}_{IDF}`.
#[derive(Debug)]
pub struct StatCompendium {
    forms: HashMap<String, FormScheme>,
}

impl StatCompendium {
    /// Loads every template under `root/compendium`. A single bad file
    /// fails the whole load.
    pub fn load(root: &Path) -> Result<StatCompendium> {
        let comp_root = root.join("compendium");
        let mut forms = HashMap::new();
        for path in io_utils::walk_files(&comp_root)? {
            let file_name = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            let bytes = std::fs::read(&path)
                .with_context(|| format!("Opening template {path:?}"))?;
            let doc = Document::parse(&bytes).map_err(|err| CheckError::CompendiumParse {
                file: file_name.clone(),
                cause: err.to_string(),
            })?;
            let (key, scheme) = build_scheme(&doc, &file_name)?;
            debug!(
                "Шаблон {file_name}: форма {key}, {} раздел(ов), {} контролей",
                scheme.sections.len(),
                scheme.controls.len()
            );
            forms.insert(key, scheme);
        }
        info!("STAT compendium loaded: {} form(s)", forms.len());
        Ok(StatCompendium { forms })
    }

    pub fn form(&self, key: &str) -> Option<&FormScheme> {
        self.forms.get(key)
    }

    pub fn forms(&self) -> impl Iterator<Item = (&String, &FormScheme)> {
        self.forms.iter()
    }
}

/// Parses one template document into its form scheme and index key.
pub fn build_scheme(doc: &Document, file_name: &str) -> Result<(String, FormScheme)> {
    let root = doc.root();
    let okud = root.attr("OKUD").ok_or_else(|| CheckError::CompendiumParse {
        file: file_name.to_string(),
        cause: "Не найден обязательный атрибут \"OKUD\" в разделе metaForm".to_string(),
    })?;
    let idf: i64 = root
        .attr("idf")
        .unwrap_or("0")
        .parse()
        .map_err(|_| CheckError::CompendiumParse {
            file: file_name.to_string(),
            cause: "Невалидный атрибут idf в разделе metaForm".to_string(),
        })?;
    let key = format!("{okud}_{idf}");

    let meta = root
        .attrs()
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .collect();

    let scheme = FormScheme {
        meta,
        title: title_data(root),
        sections: sections_data(root, file_name)?,
        controls: controls_data(root, file_name)?,
        dics: dics_data(root),
    };
    Ok((key, scheme))
}

fn title_data(root: Node<'_>) -> HashMap<String, TitleField> {
    let mut title = HashMap::new();
    if let Some(section) = root.first_child_named("title") {
        for item in section.descendants_named("item") {
            let (Some(field), Some(name)) = (item.attr("field"), item.attr("name")) else {
                continue;
            };
            title.insert(
                field.to_string(),
                TitleField {
                    name: name.to_string(),
                    dic: item.attr("dic").map(str::to_string),
                },
            );
        }
    }
    title
}

fn sections_data(root: Node<'_>, file_name: &str) -> Result<HashMap<String, SectionScheme>> {
    let mut sections = HashMap::new();
    let Some(container) = root.first_child_named("sections") else {
        return Ok(sections);
    };
    for section in container.descendants_named("section") {
        let code = section
            .attr("code")
            .ok_or_else(|| CheckError::CompendiumParse {
                file: file_name.to_string(),
                cause: "Не найден обязательный атрибут в элементе \"section\": code".to_string(),
            })?;
        let name = section.attr("name").unwrap_or("").to_string();

        let mut columns = Vec::new();
        let mut col_index = HashMap::new();
        let mut col_codes = Vec::new();
        let mut known_codes = HashSet::new();
        for column in section.descendants_named("column") {
            let Some(col_code) = column.attr("code") else {
                continue;
            };
            let col_type = column.attr("type").unwrap_or("").to_string();
            known_codes.insert(col_code.to_string());
            if col_type == "B" {
                continue;
            }
            columns.push(ColumnScheme {
                code: col_code.to_string(),
                col_type: col_type.clone(),
                name: column.attr("name").unwrap_or("").to_string(),
            });
            // Only numeric-coded type Z columns carry cells.
            if col_type == "Z"
                && let Ok(numeric) = col_code.parse::<i64>()
            {
                col_index.insert(col_code.to_string(), col_codes.len());
                col_codes.push(numeric);
            }
        }

        let rows = section
            .descendants_named("row")
            .into_iter()
            .filter_map(|row| {
                let code = row.attr("code")?;
                let row_type = row.attr("type").unwrap_or("").to_string();
                // Caption rows take no input.
                if row_type == "C" {
                    return None;
                }
                Some(RowScheme {
                    code: code.to_string(),
                    row_type,
                    name: row.attr("name").unwrap_or("").to_string(),
                })
            })
            .collect();

        sections.insert(
            code.to_string(),
            SectionScheme {
                code: code.to_string(),
                name,
                columns,
                rows,
                col_index,
                col_codes,
                known_codes,
            },
        );
    }
    Ok(sections)
}

fn controls_data(root: Node<'_>, file_name: &str) -> Result<Vec<Control>> {
    let mut controls = Vec::new();
    let Some(container) = root.first_child_named("controls") else {
        return Ok(controls);
    };
    for control in container.descendants_named("control") {
        let Some(rule_text) = control.attr("rule") else {
            continue;
        };
        let rule_text = rule_text.to_lowercase();
        // No previous-period data is available to the checker.
        if rule_text.contains("{{") {
            continue;
        }
        let rule = tokenizer::tokenize_rule(&rule_text)
            .map_err(|err| CheckError::tokenizer(&rule_text, file_name, err))?;

        let condition_text = control
            .attr("condition")
            .map(str::to_lowercase)
            .filter(|text| !text.trim().is_empty());
        if condition_text.as_deref().is_some_and(|text| text.contains("{{")) {
            continue;
        }
        let condition = condition_text
            .as_deref()
            .map(|text| {
                tokenizer::tokenize_condition(text)
                    .map_err(|err| CheckError::tokenizer(text, file_name, err))
            })
            .transpose()?;

        let period_text = control
            .attr("periodClause")
            .map(str::to_lowercase)
            .filter(|text| !text.trim().is_empty());
        let period = period_text
            .as_deref()
            .map(|text| {
                tokenizer::tokenize_period(text)
                    .map_err(|err| CheckError::tokenizer(text, file_name, err))
            })
            .transpose()?;

        let section = rule.iter().find_map(|token| match token {
            StatToken::Element(element) => Some(element.section),
            _ => None,
        });

        controls.push(Control {
            id: control.attr("id").unwrap_or("").to_string(),
            name: control.attr("name").unwrap_or("").to_string(),
            rule_text,
            rule,
            condition_text,
            condition,
            period_text,
            period,
            section,
        });
    }
    Ok(controls)
}

fn dics_data(root: Node<'_>) -> HashMap<String, Dictionary> {
    let mut dics = HashMap::new();
    if let Some(container) = root.first_child_named("dics") {
        for dic in container.descendants_named("dic") {
            let Some(id) = dic.attr("id") else {
                continue;
            };
            let terms = dic
                .descendants_named("term")
                .into_iter()
                .filter_map(|term| {
                    Some((term.attr("id")?.to_string(), term.text().to_string()))
                })
                .collect();
            dics.insert(
                id.to_string(),
                Dictionary {
                    name: dic.attr("name").unwrap_or("").to_string(),
                    terms,
                },
            );
        }
    }
    dics
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEMPLATE: &str = r#"<metaForm OKUD="0606010" idf="3" name="Сведения о производстве">
  <title>
    <item field="okpo" name="Код предприятия" dic="s_okpo"/>
    <item field="god" name="Отчётный год"/>
  </title>
  <sections>
    <section code="1" name="Раздел 1">
      <columns>
        <column code="0" type="B" name="Наименование"/>
        <column code="1" type="Z" name="Графа 1"/>
        <column code="2" type="Z" name="Графа 2"/>
      </columns>
      <rows>
        <row code="00" type="C" name="Заголовок"/>
        <row code="01" type="D" name="Строка 1"/>
        <row code="02" type="D" name="Строка 2"/>
      </rows>
    </section>
  </sections>
  <controls>
    <control id="К-1" name="Сумма граф" rule="SUM({[1][*][1]}) |=| SUM({[1][*][2]})"
             condition="" periodClause=""/>
    <control id="К-2" name="Диапазон" rule="0 |&lt;=| {[1][01][1]} |&lt;=| 100"
             condition="{[1][02][1]} |&gt;| 0" periodClause="(&amp;np in (1, 4))"/>
    <control id="К-3" name="Прошлый период" rule="{{[1][01][1]}} |=| {[1][01][1]}"/>
  </controls>
  <dics>
    <dic id="s_god" name="Годы">
      <term id="2019">за 2019 год</term>
    </dic>
  </dics>
</metaForm>"#;

    fn scheme() -> (String, FormScheme) {
        let doc = Document::parse_str(TEMPLATE, encoding_rs::UTF_8).unwrap();
        build_scheme(&doc, "0606010_3.xml").unwrap()
    }

    #[test]
    fn key_combines_okud_and_idf() {
        let (key, _) = scheme();
        assert_eq!(key, "0606010_3");
    }

    #[test]
    fn sections_keep_only_numeric_grid_columns_and_data_rows() {
        let (_, scheme) = scheme();
        let section = &scheme.sections["1"];
        assert_eq!(section.col_codes, vec![1, 2]);
        assert_eq!(section.col_index["2"], 1);
        assert!(section.known_codes.contains("0"));
        assert!(!section.col_index.contains_key("0"));
        assert_eq!(section.rows.len(), 2);
    }

    #[test]
    fn controls_are_pretokenized_and_previous_period_dropped() {
        let (_, scheme) = scheme();
        assert_eq!(scheme.controls.len(), 2);
        let first = &scheme.controls[0];
        assert_eq!(first.id, "К-1");
        assert!(first.condition.is_none());
        assert!(first.period.is_none());
        assert_eq!(first.section, Some(1));

        let second = &scheme.controls[1];
        assert!(second.condition.is_some());
        assert!(second.period.is_some());
    }

    #[test]
    fn title_and_dictionaries_are_indexed() {
        let (_, scheme) = scheme();
        assert_eq!(scheme.title["okpo"].dic.as_deref(), Some("s_okpo"));
        assert!(scheme.title["god"].dic.is_none());
        assert_eq!(scheme.dics["s_god"].terms["2019"], "за 2019 год");
        assert_eq!(scheme.meta["OKUD"], "0606010");
    }
}
