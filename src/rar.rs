//! RAR direction: alcohol-market declarations checked purely against
//! their XSD, resolved by form number and version.

use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;

use anyhow::{Context, Result};
use log::info;
use regex::Regex;

use crate::error::{AssertEntry, CheckError, CheckStatus, VerifyResult};
use crate::input::CheckedFile;
use crate::io_utils;
use crate::xsd::XsdSchema;

/// Compendium keyed `{form_number}.{major}.{minor}` from XSD names
/// shaped `(\d+)-o-(\d+)_(\d+).xsd`.
#[derive(Debug)]
pub struct RarCompendium {
    schemas: HashMap<String, XsdSchema>,
}

fn xsd_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^(\d+)-o-(\d+)_(\d+)\.xsd$").expect("xsd name pattern"))
}

impl RarCompendium {
    pub fn load(root: &Path) -> Result<RarCompendium> {
        let comp_root = root.join("compendium");
        let mut schemas = HashMap::new();
        for path in io_utils::walk_files(&comp_root)? {
            let file_name = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            let Some(captures) = xsd_name_pattern().captures(&file_name) else {
                continue;
            };
            let key = format!("{}.{}.{}", &captures[1], &captures[2], &captures[3]);
            let bytes =
                std::fs::read(&path).with_context(|| format!("Opening XSD {path:?}"))?;
            let schema = XsdSchema::parse(&bytes).map_err(|err| CheckError::XsdParse {
                xsd_name: file_name.clone(),
                cause: err.to_string(),
            })?;
            schemas.insert(key, schema);
        }
        info!("RAR compendium loaded: {} schema(s)", schemas.len());
        Ok(RarCompendium { schemas })
    }

    pub fn schema(&self, key: &str) -> Option<&XsdSchema> {
        self.schemas.get(key)
    }
}

pub struct RarChecker<'c> {
    compendium: &'c RarCompendium,
}

impl<'c> RarChecker<'c> {
    pub fn new(compendium: &'c RarCompendium) -> Self {
        Self { compendium }
    }

    pub fn check_file(&self, file: &mut CheckedFile) {
        let mut result = VerifyResult::passed();
        self.run(file, &mut result);
        file.verify_result = Some(result);
    }

    fn run(&self, file: &CheckedFile, result: &mut VerifyResult) {
        let form_ver = file.document.attr_value("//Файл/@ВерсФорм");
        let form_num = file.document.attr_value("//Файл/ФормаОтч/@НомФорм");
        let (Some(form_ver), Some(form_num)) = (form_ver, form_num) else {
            result.fail(
                CheckStatus::Failed,
                format!("Не найдена проверочная схема для файла {}", file.filename),
            );
            return;
        };
        let key = format!("{form_num}.{form_ver}");
        let Some(schema) = self.compendium.schema(&key) else {
            result.fail(
                CheckStatus::Failed,
                format!("Не найдена проверочная схема {key} для файла {}", file.filename),
            );
            return;
        };

        let violations = schema.validate(&file.document);
        if !violations.is_empty() {
            for violation in &violations {
                result.asserts.push(AssertEntry::new(
                    violation.line.to_string(),
                    violation.message.clone(),
                ));
            }
            result.result = CheckStatus::FailedXsd;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xsd_names_parse_into_versioned_keys() {
        let captures = xsd_name_pattern().captures("7-o-4_01.xsd").unwrap();
        assert_eq!(
            format!("{}.{}.{}", &captures[1], &captures[2], &captures[3]),
            "7.4.01"
        );
        assert!(xsd_name_pattern().captures("schema.xsd").is_none());
    }
}
