//! EDO direction: document-exchange files checked by filename prefix
//! and XSD structure only.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use log::info;

use crate::error::{AssertEntry, CheckError, CheckStatus, VerifyResult};
use crate::input::CheckedFile;
use crate::io_utils;
use crate::xsd::XsdSchema;

/// Compendium of exchange schemas keyed by filename prefix.
#[derive(Debug)]
pub struct EdoCompendium {
    schemas: HashMap<String, XsdSchema>,
}

/// First two underscore-separated filename tokens; `mark`/`pros`
/// prefixes drop their trailing 4-character suffix.
pub fn schema_prefix(filename: &str) -> String {
    let base = io_utils::strip_extension(filename);
    let mut prefix = base
        .split('_')
        .take(2)
        .collect::<Vec<_>>()
        .join("_");
    let lowered = prefix.to_lowercase();
    if (lowered.starts_with("mark") || lowered.starts_with("pros")) && prefix.len() >= 4 {
        prefix.truncate(prefix.len() - 4);
    }
    prefix
}

impl EdoCompendium {
    pub fn load(root: &Path) -> Result<EdoCompendium> {
        let comp_root = root.join("compendium");
        let mut schemas = HashMap::new();
        for path in io_utils::walk_files(&comp_root)? {
            let file_name = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            let bytes =
                std::fs::read(&path).with_context(|| format!("Opening XSD {path:?}"))?;
            let schema = XsdSchema::parse(&bytes).map_err(|err| CheckError::XsdParse {
                xsd_name: file_name.clone(),
                cause: err.to_string(),
            })?;
            schemas.insert(schema_prefix(&file_name), schema);
        }
        info!("EDO compendium loaded: {} schema(s)", schemas.len());
        Ok(EdoCompendium { schemas })
    }

    pub fn schema(&self, prefix: &str) -> Option<&XsdSchema> {
        self.schemas.get(prefix)
    }
}

pub struct EdoChecker<'c> {
    compendium: &'c EdoCompendium,
}

impl<'c> EdoChecker<'c> {
    pub fn new(compendium: &'c EdoCompendium) -> Self {
        Self { compendium }
    }

    pub fn check_file(&self, file: &mut CheckedFile) {
        let mut result = VerifyResult::passed();
        self.run(file, &mut result);
        file.verify_result = Some(result);
    }

    fn run(&self, file: &CheckedFile, result: &mut VerifyResult) {
        let prefix = schema_prefix(&file.filename);
        let Some(schema) = self.compendium.schema(&prefix) else {
            result.fail(
                CheckStatus::Failed,
                format!("Не найдена проверочная схема для файла {}", file.filename),
            );
            return;
        };

        let file_id = file.document.root().attr("ИдФайл").unwrap_or("");
        if file_id != file.basename() {
            result.asserts.push(AssertEntry::new(
                "0400400007",
                format!(
                    "Имя файла обмена {} не совпадает со значением элемента ИдФайл {}",
                    file.filename, file_id
                ),
            ));
            result.fail(
                CheckStatus::FailedSch,
                "Проверка имени файла на соответствие значению атрибута @ИдФайл",
            );
        }

        let violations = schema.validate(&file.document);
        if !violations.is_empty() {
            for violation in &violations {
                result.asserts.push(AssertEntry::new(
                    violation.line.to_string(),
                    format!("{} (строка {})", violation.message, violation.line),
                ));
            }
            result.result = CheckStatus::FailedXsd;
        }
    }
}
