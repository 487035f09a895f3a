//! FNS checker façade: drives XSD validation, assertion evaluation and
//! error collection for one tax-form document.

use chrono::{Datelike, NaiveDate};
use log::{debug, warn};
use regex::Regex;
use std::sync::OnceLock;

use crate::dom::Document;
use crate::error::{AssertEntry, CheckError, CheckStatus, VerifyResult};
use crate::fns::compendium::{FnsCompendium, SchemaVersion, SchematronRule};
use crate::fns::interpreter::Evaluator;
use crate::input::CheckedFile;

/// Document metadata used to pick a schema descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentInfo {
    pub knd: String,
    pub version: String,
    pub period: Option<String>,
    pub year: Option<String>,
}

pub struct FnsChecker<'c> {
    compendium: &'c FnsCompendium,
    /// Enables the supplemental filename-mask, declared-encoding and
    /// period-window verifications.
    strict: bool,
}

impl<'c> FnsChecker<'c> {
    pub fn new(compendium: &'c FnsCompendium) -> Self {
        Self {
            compendium,
            strict: false,
        }
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Checks one document and writes its verification result.
    pub fn check_file(&self, file: &mut CheckedFile) {
        let mut result = VerifyResult::passed();
        self.run(file, &mut result);
        file.verify_result = Some(result);
    }

    fn run(&self, file: &CheckedFile, result: &mut VerifyResult) {
        let info = match resolve_info(&file.document) {
            Ok(info) => info,
            Err(err) => {
                result.fail(CheckStatus::Failed, err.to_string());
                return;
            }
        };
        debug!(
            "{}: КНД {} версия {}",
            file.filename, info.knd, info.version
        );
        let Some(descriptor) = self.compendium.descriptor(&info.knd, &info.version) else {
            let err = CheckError::SchemeNotFound {
                knd: info.knd.clone(),
                version: info.version.clone(),
            };
            result.fail(CheckStatus::Failed, err.to_string());
            return;
        };

        if self.strict && !self.verify_supplements(file, &info, descriptor, result) {
            return;
        }

        // The file-id mismatch is recorded but does not stop the
        // pipeline: a later XSD or Schematron failure is the more
        // specific diagnosis and overrides the status.
        if let Some(file_id) = file.document.root().attr("ИдФайл")
            && file_id != file.basename()
        {
            result.fail(
                CheckStatus::FailedVer,
                format!(
                    "Имя файла обмена {} не совпадает со значением элемента ИдФайл {}",
                    file.filename, file_id
                ),
            );
        }

        let violations = descriptor.schema.validate(&file.document);
        if !violations.is_empty() {
            for violation in &violations {
                result.asserts.push(AssertEntry::new(
                    violation.line.to_string(),
                    format!("{} (строка {})", violation.message, violation.line),
                ));
            }
            result.fail(
                CheckStatus::FailedXsd,
                format!(
                    "Ошибка при валидации по xsd схеме файла {}",
                    file.filename
                ),
            );
            return;
        }

        if let Err(err) = self.validate_schematron(file, descriptor, result) {
            result.fail(CheckStatus::FailedSch, err.to_string());
        }
    }

    fn validate_schematron(
        &self,
        file: &CheckedFile,
        descriptor: &SchemaVersion,
        result: &mut VerifyResult,
    ) -> Result<(), CheckError> {
        if descriptor.rules.is_empty() {
            return Ok(());
        }
        let mut evaluator = Evaluator::new(&file.document, &file.filename);
        let mut failures = Vec::new();

        for rule in &descriptor.rules {
            if !file.document.exists(&format!("//{}", rule.context)) {
                if rule.in_choice {
                    // Optional branch not taken by this document.
                    continue;
                }
                return Err(CheckError::Context {
                    context: rule.context.clone(),
                    file: file.filename.clone(),
                });
            }
            match evaluator.evaluate(&rule.test_rpn, &rule.test, &rule.context) {
                Ok(value) if !value.truthy() => {
                    let description = render_error(&mut evaluator, rule)?;
                    failures.push(AssertEntry::new(rule.error.code.clone(), description));
                }
                Ok(_) => {}
                Err(err) => {
                    // Partial data must not fail the whole document;
                    // the rule's own failure is suppressed.
                    warn!("{}: подавлена ошибка интерпретации: {err}", file.filename);
                }
            }
        }

        if !failures.is_empty() {
            result.asserts.extend(failures);
            result.fail(CheckStatus::FailedSch, "Ошибки при проверке fns");
        }
        Ok(())
    }

    /// Supplemental verifications: filename mask, declared encoding,
    /// and the descriptor's validity window. Returns `false` when the
    /// pipeline must stop.
    fn verify_supplements(
        &self,
        file: &CheckedFile,
        info: &DocumentInfo,
        descriptor: &SchemaVersion,
        result: &mut VerifyResult,
    ) -> bool {
        match verify_filename_mask(&file.filename) {
            Some(inn_kpp) => {
                if !verify_inn_kpp(&file.document, &inn_kpp) {
                    result.asserts.push(AssertEntry::new(
                        "",
                        format!(
                            "ИНН/КПП в имени файла {} не совпадает с данными файла",
                            file.filename
                        ),
                    ));
                    result.fail(CheckStatus::FailedVer, "Ошибка сверки ИНН/КПП");
                    return false;
                }
            }
            None => {
                result.asserts.push(AssertEntry::new(
                    "",
                    format!("Имя файла {} не соответствует маске ФНС", file.filename),
                ));
                result.fail(CheckStatus::FailedVer, "Имя файла не соответствует маске");
                return false;
            }
        }

        if !declared_encoding_is_cp1251(&file.content) {
            result.asserts.push(AssertEntry::new(
                "",
                "Файл должен быть объявлен в кодировке windows-1251".to_string(),
            ));
            result.fail(CheckStatus::FailedVer, "Неверная кодировка файла");
            return false;
        }

        if !verify_period_window(info, descriptor) {
            result.asserts.push(AssertEntry::new(
                "",
                "Период отчёта не попадает в срок действия формата".to_string(),
            ));
            result.fail(CheckStatus::FailedVer, "Период вне срока действия формата");
            return false;
        }
        true
    }
}

/// Resolves `(KND, version)` plus period metadata from the document:
/// `Документ@КНД`, falling back to `@Индекс`, then the attribute at
/// `//Документ/ОписПерСвед/@КНД`; the version comes from the root's
/// `@ВерсФорм`.
pub fn resolve_info(doc: &Document) -> Result<DocumentInfo, CheckError> {
    let document_node = doc
        .root()
        .first_child_named("Документ")
        .ok_or(CheckError::FileAttribute)?;
    let knd = document_node
        .attr("КНД")
        .or_else(|| document_node.attr("Индекс"))
        .or_else(|| doc.attr_value("//Документ/ОписПерСвед/@КНД"))
        .ok_or(CheckError::FileAttribute)?;
    let version = doc
        .root()
        .attr("ВерсФорм")
        .ok_or(CheckError::FileAttribute)?;
    Ok(DocumentInfo {
        knd: knd.to_string(),
        version: version.to_string(),
        period: document_node.attr("Период").map(str::to_string),
        year: document_node.attr("ОтчетГод").map(str::to_string),
    })
}

fn masks() -> &'static (Regex, Regex) {
    static MASKS: OnceLock<(Regex, Regex)> = OnceLock::new();
    MASKS.get_or_init(|| {
        let common = Regex::new(
            r"^[a-z]+_[a-z0-9.]+_\d{4}_(\d{4})_(\d{12}|\d{19})_\d{8}_[-a-z0-9]{1,36}\.xml$",
        )
        .expect("common mask");
        let invoice = Regex::new(
            r"^(1115104)_(\d{12}|\d{19})_(\d{4})_[-a-z0-9]{36}_\d{8}_[-a-z0-9]{36}\.xml$",
        )
        .expect("invoice mask");
        (common, invoice)
    })
}

/// Matches the filename against the known FNS masks; on success the
/// captured ИНН/КПП block is returned.
pub fn verify_filename_mask(filename: &str) -> Option<String> {
    let lowered = filename.to_lowercase();
    let (common, invoice) = masks();
    if let Some(captures) = common.captures(&lowered) {
        return Some(captures[2].to_string());
    }
    if let Some(captures) = invoice.captures(&lowered) {
        return Some(captures[2].to_string());
    }
    None
}

/// Compares the filename's ИНН/КПП block against the taxpayer block
/// inside the document. Proxy submissions (`Подписант/СвПред`) are
/// not required to match.
pub fn verify_inn_kpp(doc: &Document, inn_kpp: &str) -> bool {
    if doc.exists("//Подписант/СвПред") {
        return true;
    }
    let inn = doc.attr_value("//НПЮЛ/@ИННЮЛ").unwrap_or("");
    let kpp = doc.attr_value("//НПЮЛ/@КПП").unwrap_or("");
    match inn_kpp.len() {
        19 => format!("{inn}{kpp}") == inn_kpp,
        12 => inn_kpp == inn || inn_kpp == "0".repeat(12),
        _ => true,
    }
}

pub fn declared_encoding_is_cp1251(content: &[u8]) -> bool {
    let needle: &[u8] = b"windows-1251";
    let head = content[..content.len().min(80)].to_ascii_lowercase();
    head.windows(needle.len()).any(|window| window == needle)
}

/// Month offsets per FNS period code: the report window inside the
/// report year.
fn period_bounds(period: &str) -> Option<(u32, u32)> {
    match period {
        "21" => Some((0, 3)),
        "22" => Some((3, 6)),
        "23" => Some((6, 9)),
        "24" => Some((9, 12)),
        "31" => Some((0, 6)),
        "33" => Some((0, 9)),
        "34" => Some((0, 12)),
        _ => None,
    }
}

/// Checks `date_from <= year_start + period_begin` and
/// `year_start + period_end <= date_till`. Documents without a period
/// (or with an unknown code) pass.
pub fn verify_period_window(info: &DocumentInfo, descriptor: &SchemaVersion) -> bool {
    let (Some(period), Some(year)) = (&info.period, &info.year) else {
        return true;
    };
    let Some((begin, end)) = period_bounds(period) else {
        return true;
    };
    let Ok(year) = year.parse::<i32>() else {
        return false;
    };
    let Some(year_start) = NaiveDate::from_ymd_opt(year, 1, 1) else {
        return false;
    };
    let shift = |months: u32| {
        let month0 = months % 12;
        let year_carry = (months / 12) as i32;
        NaiveDate::from_ymd_opt(year_start.year() + year_carry, month0 + 1, 1)
    };
    let (Some(min_date), Some(max_date)) = (shift(begin), shift(end)) else {
        return false;
    };
    let from_ok = descriptor.date_from.is_none_or(|from| from <= min_date);
    let till_ok = descriptor.date_till.is_none_or(|till| max_date <= till);
    from_ok && till_ok
}

/// Renders the rule's error template: each placeholder is re-evaluated
/// in the failing rule's context and substituted into the text.
fn render_error(
    evaluator: &mut Evaluator<'_>,
    rule: &SchematronRule,
) -> Result<String, CheckError> {
    let mut text = rule.error.text.clone();
    for placeholder in &rule.error.placeholders {
        let value = evaluator.evaluate(&placeholder.rpn, &placeholder.select, &rule.context)?;
        text = text.replace(&placeholder.select, &value.to_string());
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(xml: &str) -> Document {
        Document::parse_str(xml, encoding_rs::UTF_8).unwrap()
    }

    #[test]
    fn info_resolution_walks_the_fallback_chain() {
        let doc = parse(r#"<Файл ВерсФорм="5.01"><Документ КНД="1151111"/></Файл>"#);
        assert_eq!(resolve_info(&doc).unwrap().knd, "1151111");

        let doc = parse(r#"<Файл ВерсФорм="5.01"><Документ Индекс="1151112"/></Файл>"#);
        assert_eq!(resolve_info(&doc).unwrap().knd, "1151112");

        let doc = parse(
            r#"<Файл ВерсФорм="5.01"><Документ><ОписПерСвед КНД="1151113"/></Документ></Файл>"#,
        );
        assert_eq!(resolve_info(&doc).unwrap().knd, "1151113");
    }

    #[test]
    fn missing_metadata_is_a_file_attribute_error() {
        let doc = parse("<Файл><Другое/></Файл>");
        assert!(matches!(
            resolve_info(&doc),
            Err(CheckError::FileAttribute)
        ));
        let doc = parse(r#"<Файл ВерсФорм="5.01"><Документ/></Файл>"#);
        assert!(matches!(
            resolve_info(&doc),
            Err(CheckError::FileAttribute)
        ));
    }

    #[test]
    fn common_mask_accepts_regular_report_names() {
        let captured = verify_filename_mask(
            "NO_RASCHSV_9105_9105_9105017720910501001_20190705_5A036D6A-DC48-B98B-1145-5D92E85FEC16.xml",
        );
        assert_eq!(captured.as_deref(), Some("9105017720910501001"));
        assert!(verify_filename_mask("NO_NDS_9_2367.xml").is_none());
    }

    #[test]
    fn declared_encoding_check_reads_the_prologue() {
        assert!(declared_encoding_is_cp1251(
            br#"<?xml version="1.0" encoding="windows-1251"?><r/>"#
        ));
        assert!(!declared_encoding_is_cp1251(
            br#"<?xml version="1.0" encoding="utf-8"?><r/>"#
        ));
    }

    #[test]
    fn inn_kpp_comparison_handles_both_lengths() {
        let doc = parse(r#"<Файл><НПЮЛ ИННЮЛ="910501772091" КПП="0910501"/></Файл>"#);
        assert!(verify_inn_kpp(&doc, "9105017720910910501"));
        assert!(!verify_inn_kpp(&doc, "0000000000000000000"));
        assert!(verify_inn_kpp(&doc, "910501772091"));
        assert!(verify_inn_kpp(&doc, &"0".repeat(12)));
    }

    #[test]
    fn period_window_compares_against_descriptor_dates() {
        let schema = crate::xsd::XsdSchema::parse(
            r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema"><xs:element name="Файл"/></xs:schema>"#
                .as_bytes(),
        )
        .unwrap();
        let descriptor = SchemaVersion {
            xsd_name: "NO_NDS.xsd".to_string(),
            schema,
            rules: Vec::new(),
            date_from: NaiveDate::from_ymd_opt(2019, 1, 1),
            date_till: NaiveDate::from_ymd_opt(2019, 12, 31),
            info_format: None,
        };
        let info = |period: Option<&str>, year: Option<&str>| DocumentInfo {
            knd: "1151111".to_string(),
            version: "5.06".to_string(),
            period: period.map(str::to_string),
            year: year.map(str::to_string),
        };

        // First quarter of 2019 fits the window.
        assert!(verify_period_window(&info(Some("21"), Some("2019")), &descriptor));
        // The full year of 2019 ends past date_till (01.01.2020).
        assert!(!verify_period_window(&info(Some("34"), Some("2019")), &descriptor));
        // No period: nothing to verify.
        assert!(verify_period_window(&info(None, Some("2019")), &descriptor));
        // Unknown period codes pass through.
        assert!(verify_period_window(&info(Some("99"), Some("2019")), &descriptor));
    }
}
