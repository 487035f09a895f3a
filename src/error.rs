//! Error taxonomy and the verification result structure.
//!
//! Every failure the checking pipeline can produce is a [`CheckError`]
//! variant with a human-readable message. The façades catch taxonomy
//! errors and fold them into a [`VerifyResult`]; no taxonomy error
//! crosses the public boundary raw.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CheckError {
    /// Rule context not found in the document and the rule is not optional.
    #[error("Контекст {context} в файле {file} не найден")]
    Context { context: String, file: String },

    /// Required attribute missing from the document.
    #[error("Атрибут {context}/{node} в файле {file} не найден")]
    NodeAttribute {
        context: String,
        node: String,
        file: String,
    },

    /// Expression did not tokenize.
    #[error("Ошибка при лексическом анализе выражения {expression} в файле {file} ({cause})")]
    Tokenizer {
        expression: String,
        file: String,
        cause: String,
    },

    /// Expression evaluator raised; recovered locally during rule
    /// evaluation, re-raised during error-template rendering.
    #[error("Ошибка при интерпретации выражения {expression} в файле {file} ({cause})")]
    Parser {
        expression: String,
        file: String,
        cause: String,
    },

    /// Numeric coercion failed.
    #[error("Ошибка при приведении к вещественному типу аргументов {args:?}: {cause}")]
    TypeConv { args: Vec<String>, cause: String },

    /// No schema descriptor for the document key.
    #[error("Не найдена проверочная схема для файла с КНД {knd} для версии {version}")]
    SchemeNotFound { knd: String, version: String },

    /// The file lacks the metadata needed to pick a schema.
    #[error("Не найдена информация о КНД и версии проверяемого файла")]
    FileAttribute,

    /// DataFrame selection is empty. Consumed by the interpreter,
    /// never surfaced.
    #[error("Получена пустая выборка")]
    EmptyExtract,

    /// A compendium file failed to load. Fatal at startup.
    #[error("Ошибка при работе с файлом компендиума {file} ({cause})")]
    CompendiumParse { file: String, cause: String },

    /// An XSD schema failed to parse or compile. Fatal at startup.
    #[error("Ошибка при чтении/преобразовании XSD схемы {xsd_name} ({cause})")]
    XsdParse { xsd_name: String, cause: String },

    /// STAT interpreter escape, fatal to the current document.
    #[error("Ошибка при интерпретации выражения {expression}")]
    Interpreter { expression: String },

    /// Input file could not be processed (malformed name or content).
    #[error("Ошибка при обработке файла {file} ({description})")]
    Input { file: String, description: String },
}

impl CheckError {
    pub fn tokenizer(expression: &str, file: &str, cause: impl ToString) -> Self {
        Self::Tokenizer {
            expression: expression.to_string(),
            file: file.to_string(),
            cause: cause.to_string(),
        }
    }

    pub fn parser(expression: &str, file: &str, cause: impl ToString) -> Self {
        Self::Parser {
            expression: expression.to_string(),
            file: file.to_string(),
            cause: cause.to_string(),
        }
    }

    pub fn input(file: &str, description: impl ToString) -> Self {
        Self::Input {
            file: file.to_string(),
            description: description.to_string(),
        }
    }
}

/// Aggregated outcome of checking a single document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Passed,
    FailedXsd,
    FailedSch,
    FailedXqr,
    FailedSum,
    FailedVer,
    Failed,
}

impl CheckStatus {
    pub fn is_passed(self) -> bool {
        self == CheckStatus::Passed
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CheckStatus::Passed => "passed",
            CheckStatus::FailedXsd => "failed_xsd",
            CheckStatus::FailedSch => "failed_sch",
            CheckStatus::FailedXqr => "failed_xqr",
            CheckStatus::FailedSum => "failed_sum",
            CheckStatus::FailedVer => "failed_ver",
            CheckStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recorded violation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssertEntry {
    pub error_code: String,
    pub description: String,
    pub inspection_items: Vec<String>,
}

impl AssertEntry {
    pub fn new(error_code: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            error_code: error_code.into(),
            description: description.into(),
            inspection_items: Vec::new(),
        }
    }
}

/// The verification result written back onto the checked file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyResult {
    pub result: CheckStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub asserts: Vec<AssertEntry>,
}

impl VerifyResult {
    pub fn passed() -> Self {
        Self {
            result: CheckStatus::Passed,
            description: None,
            asserts: Vec::new(),
        }
    }

    pub fn fail(&mut self, status: CheckStatus, description: impl Into<String>) {
        self.result = status;
        self.description = Some(description.into());
    }
}

impl Default for VerifyResult {
    fn default() -> Self {
        Self::passed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes_with_wire_names() {
        let json = serde_json::to_string(&CheckStatus::FailedSch).unwrap();
        assert_eq!(json, "\"failed_sch\"");
        let json = serde_json::to_string(&CheckStatus::FailedVer).unwrap();
        assert_eq!(json, "\"failed_ver\"");
    }

    #[test]
    fn verify_result_omits_empty_description() {
        let result = VerifyResult::passed();
        let json = serde_json::to_string(&result).unwrap();
        assert!(!json.contains("description"));
        assert!(json.contains("\"result\":\"passed\""));
    }

    #[test]
    fn error_messages_carry_the_offending_pieces() {
        let err = CheckError::Context {
            context: "Файл".into(),
            file: "report.xml".into(),
        };
        let text = err.to_string();
        assert!(text.contains("Файл"));
        assert!(text.contains("report.xml"));
    }
}
