//! STAT checker façade: builds the per-section dataframes and drives
//! the control loop for one statistical report.

use std::collections::HashMap;

use log::{debug, warn};

use crate::error::{AssertEntry, CheckError, CheckStatus, VerifyResult};
use crate::input::CheckedFile;
use crate::io_utils;
use crate::stat::compendium::{FormScheme, StatCompendium};
use crate::stat::dataframe::DataFrame;
use crate::stat::interpreter::{FrameMap, PeriodEvaluator, StatEvaluator};

/// Report identity parsed from the filename
/// `{OKUD}_{IDF}_{IDP}_{OKPO}_{YEAR}_{PERIOD}[_extra][__info]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatFileInfo {
    pub okud: String,
    pub idf: i64,
    pub idp: String,
    pub okpo: String,
    pub year: String,
    pub period: String,
    pub extra: Vec<String>,
}

impl StatFileInfo {
    /// The compendium key of this report's form.
    pub fn form_key(&self) -> String {
        format!("{}_{}", self.okud, self.idf)
    }
}

pub fn parse_filename(filename: &str) -> Result<StatFileInfo, CheckError> {
    let pure = io_utils::strip_extension(filename);
    // Everything after a doubled underscore is free-form extra info.
    let main = pure.split("__").next().unwrap_or(&pure);
    let fields: Vec<&str> = main.split('_').collect();
    if fields.len() < 6 {
        return Err(CheckError::input(
            filename,
            "Формат названия файла не распознан",
        ));
    }
    let idf: i64 = fields[1].parse().map_err(|_| {
        CheckError::input(filename, "Невалидная информация в заголовке файла")
    })?;
    Ok(StatFileInfo {
        okud: fields[0].to_string(),
        idf,
        idp: fields[2].to_string(),
        okpo: fields[3].to_string(),
        year: fields[4].to_string(),
        period: fields[5].to_string(),
        extra: fields[6..].iter().map(|s| s.to_string()).collect(),
    })
}

pub struct StatChecker<'c> {
    compendium: &'c StatCompendium,
}

impl<'c> StatChecker<'c> {
    pub fn new(compendium: &'c StatCompendium) -> Self {
        Self { compendium }
    }

    /// Checks one report and writes its verification result.
    pub fn check_file(&self, file: &mut CheckedFile) {
        let mut result = VerifyResult::passed();
        self.run(file, &mut result);
        file.verify_result = Some(result);
    }

    fn run(&self, file: &CheckedFile, result: &mut VerifyResult) {
        let info = match parse_filename(&file.filename) {
            Ok(info) => info,
            Err(err) => {
                result.asserts.push(AssertEntry::new("", err.to_string()));
                result.fail(CheckStatus::Failed, err.to_string());
                return;
            }
        };
        let key = info.form_key();
        let Some(scheme) = self.compendium.form(&key) else {
            result.fail(
                CheckStatus::Failed,
                format!("Не найдена проверочная схема для ОКУД {key}"),
            );
            return;
        };
        debug!("{}: форма {key}, период {}", file.filename, info.period);

        let frames = match build_frames(file, scheme) {
            Ok(frames) => frames,
            Err(err) => {
                result.asserts.push(AssertEntry::new("", err.to_string()));
                result.fail(CheckStatus::Failed, err.to_string());
                return;
            }
        };

        let period_evaluator = PeriodEvaluator::new(info.period.clone());
        let evaluator = StatEvaluator::new(&frames, Some(info.period.clone()));
        let mut failures = Vec::new();

        for control in &scheme.controls {
            // A control whose section is absent or empty has nothing
            // to read; it is kept in the compendium but skipped here.
            let Some(section) = control.section else {
                continue;
            };
            let section_filled = frames
                .get(&section.to_string())
                .is_some_and(|frame| !frame.is_empty());
            if !section_filled {
                debug!(
                    "{}: контроль {} пропущен, раздел {section} не заполнен",
                    file.filename, control.id
                );
                continue;
            }

            let outcome = self.run_control(control, &period_evaluator, &evaluator);
            match outcome {
                Ok(true) => {}
                Ok(false) => {
                    failures.push(AssertEntry::new(control.id.clone(), control.name.clone()));
                }
                Err(err) => {
                    warn!("{}: контроль {}: {err}", file.filename, control.id);
                    result.fail(CheckStatus::Failed, err.to_string());
                    return;
                }
            }
        }

        if !failures.is_empty() {
            result.asserts.extend(failures);
            result.result = CheckStatus::Failed;
        }
    }

    /// Runs one control; `Ok(true)` means the document satisfies it
    /// (or the control does not apply).
    fn run_control(
        &self,
        control: &crate::stat::compendium::Control,
        period_evaluator: &PeriodEvaluator,
        evaluator: &StatEvaluator<'_>,
    ) -> Result<bool, CheckError> {
        if let (Some(period), Some(text)) = (&control.period, &control.period_text)
            && !period_evaluator.evaluate(period, text)?
        {
            return Ok(true);
        }
        if let (Some(condition), Some(text)) = (&control.condition, &control.condition_text)
            && !evaluator.evaluate_condition(condition, text)?
        {
            return Ok(true);
        }
        evaluator.evaluate_rule(&control.rule, &control.rule_text)
    }
}

/// Builds one dataframe per declared report section and validates the
/// title block's attribute shape.
fn build_frames(file: &CheckedFile, scheme: &FormScheme) -> Result<FrameMap, CheckError> {
    let root = file.document.root();

    if let Some(title) = root.first_child_named("title") {
        for item in title.descendants_named("item") {
            if item.attr("name").is_none() || item.attr("value").is_none() {
                return Err(CheckError::input(
                    &file.filename,
                    "Не найден обязательный атрибут в элементе item",
                ));
            }
        }
    }

    let mut frames: FrameMap = HashMap::new();
    if let Some(sections) = root.first_child_named("sections") {
        for section in sections.descendants_named("section") {
            let code = section.attr("code").ok_or_else(|| {
                CheckError::input(
                    &file.filename,
                    "Не найден обязательный атрибут в разделе sections: code",
                )
            })?;
            let section_scheme = scheme.sections.get(code).ok_or_else(|| {
                CheckError::input(
                    &file.filename,
                    format!("Раздел {code} отсутствует в проверочной схеме"),
                )
            })?;
            let frame = DataFrame::from_section(section, section_scheme)
                .map_err(|err| CheckError::input(&file.filename, err.to_string()))?;
            frames.insert(code.to_string(), frame);
        }
    }
    Ok(frames)
}
