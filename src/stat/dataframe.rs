//! Tabular container for one report section.
//!
//! A dense numeric matrix (`nrows × ncols`) with the row and column
//! codes declared by the form template, up to three specific-axis
//! labels per row, and inverted indices for code and label lookup.
//! Layout:
//!
//! ```text
//!             col_codes   [][][][]
//! s1 s2 s3    row_codes
//! [] [] []    []          [][][][]
//! [] [] []    []          [ data ]
//! [] [] []    []          [][][][]
//! ```
//!
//! Built once per document section, consumed read-only by the
//! interpreter. Selections filter by code/label/range and yield a new
//! frame; an empty selection raises the dedicated empty-extract escape
//! the interpreter maps to rule/condition defaults.

use std::collections::{BTreeSet, HashMap};

use anyhow::{Result, anyhow};

use crate::dom::Node;
use crate::error::CheckError;
use crate::stat::compendium::SectionScheme;
use crate::stat::tokenizer::AxisToken;

#[derive(Debug, Clone)]
pub struct DataFrame {
    data: Vec<Vec<f64>>,
    specs: Vec<[Option<String>; 3]>,
    row_codes: Vec<i64>,
    col_codes: Vec<i64>,
    irows: HashMap<i64, BTreeSet<usize>>,
    ispecs: [HashMap<String, BTreeSet<usize>>; 3],
}

impl DataFrame {
    /// Builds a frame from prepared vectors; the inverted indices are
    /// derived here so sub-frames always carry consistent ones.
    pub fn new(
        data: Vec<Vec<f64>>,
        specs: Vec<[Option<String>; 3]>,
        row_codes: Vec<i64>,
        col_codes: Vec<i64>,
    ) -> DataFrame {
        let mut irows: HashMap<i64, BTreeSet<usize>> = HashMap::new();
        let mut ispecs: [HashMap<String, BTreeSet<usize>>; 3] = Default::default();
        for (rx, code) in row_codes.iter().enumerate() {
            irows.entry(*code).or_default().insert(rx);
        }
        for (rx, labels) in specs.iter().enumerate() {
            for (sx, label) in labels.iter().enumerate() {
                if let Some(label) = label {
                    ispecs[sx].entry(label.clone()).or_default().insert(rx);
                }
            }
        }
        DataFrame {
            data,
            specs,
            row_codes,
            col_codes,
            irows,
            ispecs,
        }
    }

    /// Builds the frame for one document section using the template's
    /// section descriptor: one row per `row` element, one column per
    /// numeric (type Z) template column. Cells parse as float, empty
    /// cells become 0.
    pub fn from_section(section: Node<'_>, scheme: &SectionScheme) -> Result<DataFrame> {
        let rows = section.descendants_named("row");
        let ncols = scheme.col_codes.len();

        let mut data = vec![vec![0.0; ncols]; rows.len()];
        let mut specs: Vec<[Option<String>; 3]> = vec![Default::default(); rows.len()];
        let mut row_codes = vec![0i64; rows.len()];

        for (rx, row) in rows.iter().enumerate() {
            let code = row
                .attr("code")
                .ok_or_else(|| anyhow!("Элемент row без атрибута code"))?;
            row_codes[rx] = code
                .parse()
                .map_err(|_| anyhow!("Невалидный код строки '{code}'"))?;

            for (name, value) in row.attrs() {
                match name {
                    "code" => {}
                    "s1" => specs[rx][0] = Some(value.to_lowercase()),
                    "s2" => specs[rx][1] = Some(value.to_lowercase()),
                    "s3" => specs[rx][2] = Some(value.to_lowercase()),
                    other => {
                        return Err(anyhow!("Неверный атрибут элемента row: {other}"));
                    }
                }
            }

            for col in row.descendants_named("col") {
                let col_code = col
                    .attr("code")
                    .ok_or_else(|| anyhow!("Элемент col без атрибута code"))?;
                let cx = scheme.col_index.get(col_code).copied().ok_or_else(|| {
                    anyhow!("Графа {col_code} отсутствует в проверочной схеме")
                })?;
                let text = col.text().trim();
                data[rx][cx] = if text.is_empty() {
                    0.0
                } else {
                    text.parse().map_err(|_| {
                        anyhow!("Невалидное значение графы {col_code}: '{text}'")
                    })?
                };
            }
        }

        Ok(DataFrame::new(
            data,
            specs,
            row_codes,
            scheme.col_codes.clone(),
        ))
    }

    pub fn dim(&self) -> (usize, usize) {
        let ncols = self.data.first().map(|row| row.len()).unwrap_or(0);
        (self.data.len(), ncols)
    }

    pub fn is_empty(&self) -> bool {
        let (nrows, ncols) = self.dim();
        nrows == 0 || ncols == 0
    }

    pub fn data(&self) -> &[Vec<f64>] {
        &self.data
    }

    /// The single element of a 1×1 frame.
    pub fn get_scalar(&self) -> f64 {
        self.data[0][0]
    }

    /// Filters the frame by row, column and specific-axis descriptor
    /// lists. Descriptors are consumed in reverse (RPN convention): a
    /// range marker takes the two codes emitted before it, bounds
    /// excluded on both ends. Unknown codes are skipped silently; an
    /// empty result raises the empty-extract escape.
    pub fn get(
        &self,
        rows: &[AxisToken],
        cols: &[AxisToken],
        specs: &[Vec<AxisToken>; 3],
    ) -> Result<DataFrame, CheckError> {
        let mut row_indices = self.filter_rows(rows);
        for (sx, spec) in specs.iter().enumerate() {
            if spec.is_empty() {
                continue;
            }
            let spec_indices = self.filter_specs(sx, spec, &row_indices);
            row_indices = row_indices.intersection(&spec_indices).copied().collect();
        }
        let col_indices = self.filter_cols(cols);

        if row_indices.is_empty() || col_indices.is_empty() {
            return Err(CheckError::EmptyExtract);
        }

        let data = row_indices
            .iter()
            .map(|&rx| col_indices.iter().map(|&cx| self.data[rx][cx]).collect())
            .collect();
        let specs_out = row_indices
            .iter()
            .map(|&rx| self.specs[rx].clone())
            .collect();
        let row_codes = row_indices.iter().map(|&rx| self.row_codes[rx]).collect();
        let col_codes = col_indices.iter().map(|&cx| self.col_codes[cx]).collect();
        Ok(DataFrame::new(data, specs_out, row_codes, col_codes))
    }

    fn filter_rows(&self, tokens: &[AxisToken]) -> BTreeSet<usize> {
        let mut indices = BTreeSet::new();
        let mut tokens: Vec<&AxisToken> = tokens.iter().collect();
        while let Some(token) = tokens.pop() {
            match token {
                AxisToken::Wild => indices.extend(0..self.row_codes.len()),
                AxisToken::Range => {
                    let max = pop_code(&mut tokens);
                    let min = pop_code(&mut tokens);
                    if let (Some(min), Some(max)) = (min, max) {
                        indices.extend(
                            self.row_codes
                                .iter()
                                .enumerate()
                                .filter(|&(_, &code)| code > min && code < max)
                                .map(|(rx, _)| rx),
                        );
                    }
                }
                AxisToken::Code(code) => {
                    if let Some(hits) = self.irows.get(code) {
                        indices.extend(hits.iter().copied());
                    }
                }
                AxisToken::Label(_) => {}
            }
        }
        indices
    }

    fn filter_specs(
        &self,
        sx: usize,
        tokens: &[AxisToken],
        selected: &BTreeSet<usize>,
    ) -> BTreeSet<usize> {
        let mut indices = BTreeSet::new();
        let mut tokens: Vec<&AxisToken> = tokens.iter().collect();
        while let Some(token) = tokens.pop() {
            match token {
                AxisToken::Wild => indices.extend(selected.iter().copied()),
                AxisToken::Range => {
                    let max = pop_label(&mut tokens);
                    let min = pop_label(&mut tokens);
                    if let (Some(min), Some(max)) = (min, max) {
                        indices.extend(
                            self.specs
                                .iter()
                                .enumerate()
                                .filter(|(_, labels)| {
                                    labels[sx]
                                        .as_deref()
                                        .is_some_and(|l| l > min.as_str() && l < max.as_str())
                                })
                                .map(|(rx, _)| rx),
                        );
                    }
                }
                AxisToken::Label(label) => {
                    if let Some(hits) = self.ispecs[sx].get(label) {
                        indices.extend(hits.iter().copied());
                    }
                }
                AxisToken::Code(code) => {
                    if let Some(hits) = self.ispecs[sx].get(&code.to_string()) {
                        indices.extend(hits.iter().copied());
                    }
                }
            }
        }
        indices
    }

    fn filter_cols(&self, tokens: &[AxisToken]) -> BTreeSet<usize> {
        let mut indices = BTreeSet::new();
        let mut tokens: Vec<&AxisToken> = tokens.iter().collect();
        while let Some(token) = tokens.pop() {
            match token {
                AxisToken::Wild => indices.extend(0..self.col_codes.len()),
                AxisToken::Range => {
                    let max = pop_code(&mut tokens);
                    let min = pop_code(&mut tokens);
                    if let (Some(min), Some(max)) = (min, max) {
                        indices.extend(
                            self.col_codes
                                .iter()
                                .enumerate()
                                .filter(|&(_, &code)| code > min && code < max)
                                .map(|(cx, _)| cx),
                        );
                    }
                }
                AxisToken::Code(code) => {
                    indices.extend(
                        self.col_codes
                            .iter()
                            .enumerate()
                            .filter(|(_, c)| *c == code)
                            .map(|(cx, _)| cx),
                    );
                }
                AxisToken::Label(_) => {}
            }
        }
        indices
    }

    /// Column sums: a 1×ncols frame. NaN counts as 0.
    pub fn sum_cols(&self) -> DataFrame {
        let (nrows, ncols) = self.dim();
        let mut sums = vec![0.0; ncols];
        for rx in 0..nrows {
            for (cx, sum) in sums.iter_mut().enumerate() {
                let value = self.data[rx][cx];
                if !value.is_nan() {
                    *sum += value;
                }
            }
        }
        DataFrame::new(
            vec![sums],
            vec![Default::default()],
            vec![0],
            self.col_codes.clone(),
        )
    }

    /// Row sums: an nrows×1 frame. NaN counts as 0.
    pub fn sum_rows(&self) -> DataFrame {
        let sums: Vec<Vec<f64>> = self
            .data
            .iter()
            .map(|row| {
                vec![row.iter().filter(|value| !value.is_nan()).sum()]
            })
            .collect();
        DataFrame::new(sums, self.specs.clone(), self.row_codes.clone(), vec![0])
    }

    /// Whole-table sum. NaN counts as 0.
    pub fn sum_all(&self) -> f64 {
        self.data
            .iter()
            .flatten()
            .filter(|value| !value.is_nan())
            .sum()
    }

    /// Cell-wise transform, same shape and codes.
    pub fn map(&self, f: impl Fn(f64) -> f64) -> DataFrame {
        let data = self
            .data
            .iter()
            .map(|row| row.iter().map(|&value| f(value)).collect())
            .collect();
        DataFrame::new(
            data,
            self.specs.clone(),
            self.row_codes.clone(),
            self.col_codes.clone(),
        )
    }

    /// Element-wise combination of two same-shape frames.
    pub fn zip_with(
        &self,
        other: &DataFrame,
        f: impl Fn(f64, f64) -> f64,
    ) -> Result<DataFrame, CheckError> {
        if self.dim() != other.dim() {
            return Err(CheckError::Interpreter {
                expression: format!(
                    "операция над таблицами разной размерности {:?} и {:?}",
                    self.dim(),
                    other.dim()
                ),
            });
        }
        let data = self
            .data
            .iter()
            .zip(&other.data)
            .map(|(a, b)| a.iter().zip(b).map(|(&x, &y)| f(x, y)).collect())
            .collect();
        Ok(DataFrame::new(
            data,
            self.specs.clone(),
            self.row_codes.clone(),
            self.col_codes.clone(),
        ))
    }

    /// True iff every pair of corresponding cells satisfies `f`.
    pub fn compare_all(
        &self,
        other: &DataFrame,
        f: impl Fn(f64, f64) -> bool,
    ) -> Result<bool, CheckError> {
        if self.dim() != other.dim() {
            return Err(CheckError::Interpreter {
                expression: format!(
                    "сравнение таблиц разной размерности {:?} и {:?}",
                    self.dim(),
                    other.dim()
                ),
            });
        }
        Ok(self
            .data
            .iter()
            .zip(&other.data)
            .all(|(a, b)| a.iter().zip(b).all(|(&x, &y)| f(x, y))))
    }

    /// True iff every cell satisfies `f` against the scalar.
    pub fn compare_scalar(&self, scalar: f64, f: impl Fn(f64, f64) -> bool) -> bool {
        self.data
            .iter()
            .all(|row| row.iter().all(|&value| f(value, scalar)))
    }

    /// Replaces NaN cells with `filler`.
    pub fn fill_none(&self, filler: f64) -> DataFrame {
        self.map(|value| if value.is_nan() { filler } else { value })
    }

    /// True iff every cell is NaN.
    pub fn is_none(&self) -> bool {
        self.data.iter().flatten().all(|value| value.is_nan())
    }

    pub fn abs(&self) -> DataFrame {
        self.map(f64::abs)
    }

    /// Cell-wise rounding to `precision` decimal places.
    pub fn round(&self, precision: i32) -> DataFrame {
        let factor = 10f64.powi(precision);
        self.map(move |value| (value * factor).round() / factor)
    }

    /// The smallest cell value, NaN ignored.
    pub fn floor_min(&self) -> f64 {
        self.data
            .iter()
            .flatten()
            .filter(|value| !value.is_nan())
            .fold(f64::INFINITY, |acc, &value| acc.min(value))
    }
}

fn pop_code(tokens: &mut Vec<&AxisToken>) -> Option<i64> {
    match tokens.pop() {
        Some(AxisToken::Code(code)) => Some(*code),
        _ => None,
    }
}

fn pop_label<'a>(tokens: &mut Vec<&'a AxisToken>) -> Option<&'a String> {
    match tokens.pop() {
        Some(AxisToken::Label(label)) => Some(label),
        _ => None,
    }
}
