//! Tokenizer for STAT control expressions.
//!
//! Control expressions address cells of a report section through
//! bracketed references `{[section][rows][cols]([s1][s2][s3])?}` and
//! compare aggregates with pipe-ringed operators `|<| |<=| |=| |>|
//! |>=| |<>|`. The output is a postfix stream; an element reference is
//! emitted as ONE composite token so the interpreter receives the
//! whole selection at once.
//!
//! Two constructions are closed at tokenization time instead of being
//! driven by interpreter flags: the three-operand comparison
//! `a |op1| b |op2| c` becomes a dedicated ternary token after the
//! three operand streams, and `&np in (c1, c2, …)` becomes one
//! self-contained membership token.

use std::fmt;

use thiserror::Error;

#[derive(Debug, Error)]
#[error("{0}")]
pub struct SyntaxError(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Lt,
    Le,
    Eq,
    Gt,
    Ge,
    Ne,
}

impl fmt::Display for CmpOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Eq => "=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
            CmpOp::Ne => "<>",
        };
        f.write_str(text)
    }
}

/// One descriptor on a selection axis. Consumed in reverse by the
/// dataframe: a `Range` marker is preceded by its two bounds.
#[derive(Debug, Clone, PartialEq)]
pub enum AxisToken {
    Wild,
    Code(i64),
    Label(String),
    Range,
}

/// A composite element reference: one report section plus row, column
/// and up-to-three specific-axis descriptor lists.
#[derive(Debug, Clone, PartialEq)]
pub struct ElementRef {
    pub section: i64,
    pub rows: Vec<AxisToken>,
    pub cols: Vec<AxisToken>,
    pub specs: [Vec<AxisToken>; 3],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatFunc {
    Abs,
    Floor,
    IsNull,
    NullIf,
    Round,
    Coalesce,
}

impl fmt::Display for StatFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            StatFunc::Abs => "abs",
            StatFunc::Floor => "floor",
            StatFunc::IsNull => "isnull",
            StatFunc::NullIf => "nullif",
            StatFunc::Round => "round",
            StatFunc::Coalesce => "coalesce",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StatToken {
    Num(f64),
    Element(ElementRef),
    /// Context-sensitive aggregation over the preceding operand.
    Sum,
    Func(StatFunc, usize),
    Add,
    Sub,
    Mul,
    Div,
    And,
    Or,
    Cmp(CmpOp),
    /// `a |op1| b |op2| c`, emitted after the three operand streams.
    TernaryCmp(CmpOp, CmpOp),
    /// The report period symbol `&np`.
    Period,
    PeriodCode(String),
    /// Self-contained `&np in (…)` membership test.
    PeriodIn(Vec<String>),
}

#[derive(Debug, Clone, PartialEq)]
enum Lexeme {
    Num(String),
    Word(String),
    PipedCmp(CmpOp),
    BareCmp(CmpOp),
    Np,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    LPar,
    RPar,
    Comma,
    Star,
    Dash,
    Plus,
    Slash,
}

fn scan(expr: &str) -> Result<Vec<Lexeme>, SyntaxError> {
    let chars: Vec<char> = expr.chars().collect();
    let mut out = Vec::new();
    let mut pos = 0;

    while pos < chars.len() {
        let c = chars[pos];
        match c {
            ' ' | '\t' | '\n' | '\r' => pos += 1,
            '{' => {
                out.push(Lexeme::LBrace);
                pos += 1;
            }
            '}' => {
                out.push(Lexeme::RBrace);
                pos += 1;
            }
            '[' => {
                out.push(Lexeme::LBracket);
                pos += 1;
            }
            ']' => {
                out.push(Lexeme::RBracket);
                pos += 1;
            }
            '(' => {
                out.push(Lexeme::LPar);
                pos += 1;
            }
            ')' => {
                out.push(Lexeme::RPar);
                pos += 1;
            }
            ',' => {
                out.push(Lexeme::Comma);
                pos += 1;
            }
            '*' => {
                out.push(Lexeme::Star);
                pos += 1;
            }
            '-' => {
                out.push(Lexeme::Dash);
                pos += 1;
            }
            '+' => {
                out.push(Lexeme::Plus);
                pos += 1;
            }
            '/' => {
                out.push(Lexeme::Slash);
                pos += 1;
            }
            '&' => {
                let tail: String = chars[pos..].iter().take(3).collect();
                if tail == "&np" {
                    out.push(Lexeme::Np);
                    pos += 3;
                } else {
                    return Err(SyntaxError(format!("Unexpected '&' at position {pos}")));
                }
            }
            '|' => {
                let close = chars[pos + 1..]
                    .iter()
                    .position(|&ch| ch == '|')
                    .ok_or_else(|| SyntaxError("Unterminated piped comparator".into()))?;
                let inner: String = chars[pos + 1..pos + 1 + close].iter().collect();
                let op = parse_cmp(inner.trim())
                    .ok_or_else(|| SyntaxError(format!("Unknown comparator |{inner}|")))?;
                out.push(Lexeme::PipedCmp(op));
                pos += close + 2;
            }
            '<' | '>' | '=' => {
                let two: String = chars[pos..].iter().take(2).collect();
                let (op, len) = match two.as_str() {
                    "<=" => (CmpOp::Le, 2),
                    ">=" => (CmpOp::Ge, 2),
                    "<>" => (CmpOp::Ne, 2),
                    _ => match c {
                        '<' => (CmpOp::Lt, 1),
                        '>' => (CmpOp::Gt, 1),
                        _ => (CmpOp::Eq, 1),
                    },
                };
                out.push(Lexeme::BareCmp(op));
                pos += len;
            }
            c if c.is_ascii_digit() => {
                let start = pos;
                while pos < chars.len() && (chars[pos].is_ascii_digit() || chars[pos] == '.') {
                    pos += 1;
                }
                // A run glued to letters is a label, e.g. `01а`.
                if pos < chars.len() && is_label_char(chars[pos]) {
                    while pos < chars.len() && is_label_char(chars[pos]) {
                        pos += 1;
                    }
                    out.push(Lexeme::Word(chars[start..pos].iter().collect()));
                } else {
                    out.push(Lexeme::Num(chars[start..pos].iter().collect()));
                }
            }
            c if is_label_char(c) => {
                let start = pos;
                while pos < chars.len() && is_label_char(chars[pos]) {
                    pos += 1;
                }
                out.push(Lexeme::Word(chars[start..pos].iter().collect()));
            }
            other => {
                return Err(SyntaxError(format!("Unexpected character '{other}'")));
            }
        }
    }
    Ok(out)
}

fn is_label_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, 'а'..='я' | 'А'..='Я' | 'ё' | 'Ё' | '.' | '_')
}

fn parse_cmp(text: &str) -> Option<CmpOp> {
    match text {
        "<" => Some(CmpOp::Lt),
        "<=" => Some(CmpOp::Le),
        "=" => Some(CmpOp::Eq),
        ">" => Some(CmpOp::Gt),
        ">=" => Some(CmpOp::Ge),
        "<>" => Some(CmpOp::Ne),
        _ => None,
    }
}

/// Tokenizes a control rule: one (possibly ternary) comparison, or a
/// parenthesized period predicate.
pub fn tokenize_rule(expr: &str) -> Result<Vec<StatToken>, SyntaxError> {
    Parser::run(expr, |parser| parser.log_expr())
}

/// Tokenizes a guard condition: comparisons joined by `and`/`or`.
pub fn tokenize_condition(expr: &str) -> Result<Vec<StatToken>, SyntaxError> {
    Parser::run(expr, |parser| parser.condition())
}

/// Tokenizes a period-applicability predicate.
pub fn tokenize_period(expr: &str) -> Result<Vec<StatToken>, SyntaxError> {
    Parser::run(expr, |parser| parser.period_cond())
}

struct Parser {
    lexemes: Vec<Lexeme>,
    pos: usize,
    out: Vec<StatToken>,
}

impl Parser {
    fn run(
        expr: &str,
        entry: impl FnOnce(&mut Parser) -> Result<(), SyntaxError>,
    ) -> Result<Vec<StatToken>, SyntaxError> {
        if expr.contains("{{") {
            return Err(SyntaxError("Previous-period references are not supported".into()));
        }
        let mut parser = Parser {
            lexemes: scan(expr)?,
            pos: 0,
            out: Vec::new(),
        };
        entry(&mut parser)?;
        if parser.pos != parser.lexemes.len() {
            return Err(SyntaxError(format!(
                "Trailing input after position {}",
                parser.pos
            )));
        }
        if parser.out.is_empty() {
            return Err(SyntaxError("Empty expression".into()));
        }
        Ok(parser.out)
    }

    fn peek(&self) -> Option<&Lexeme> {
        self.lexemes.get(self.pos)
    }

    fn peek_at(&self, ahead: usize) -> Option<&Lexeme> {
        self.lexemes.get(self.pos + ahead)
    }

    fn next(&mut self) -> Option<Lexeme> {
        let lexeme = self.lexemes.get(self.pos).cloned();
        if lexeme.is_some() {
            self.pos += 1;
        }
        lexeme
    }

    fn expect(&mut self, expected: &Lexeme, what: &str) -> Result<(), SyntaxError> {
        match self.next() {
            Some(ref lexeme) if lexeme == expected => Ok(()),
            other => Err(SyntaxError(format!("Expected {what}, found {other:?}"))),
        }
    }

    fn is_word(&self, word: &str) -> bool {
        matches!(self.peek(), Some(Lexeme::Word(w)) if w == word)
    }

    fn condition(&mut self) -> Result<(), SyntaxError> {
        self.log_expr()?;
        loop {
            if self.is_word("and") {
                self.next();
                self.log_expr()?;
                self.out.push(StatToken::And);
            } else if self.is_word("or") {
                self.next();
                self.log_expr()?;
                self.out.push(StatToken::Or);
            } else {
                break;
            }
        }
        Ok(())
    }

    fn log_expr(&mut self) -> Result<(), SyntaxError> {
        // A parenthesized period predicate is the only form opening
        // with `( &np`.
        if self.peek() == Some(&Lexeme::LPar) && self.peek_at(1) == Some(&Lexeme::Np) {
            return self.period_cond();
        }
        self.arith_expr()?;
        let first = match self.next() {
            Some(Lexeme::PipedCmp(op)) => op,
            other => {
                return Err(SyntaxError(format!(
                    "Expected |comparator|, found {other:?}"
                )));
            }
        };
        self.arith_expr()?;
        if let Some(Lexeme::PipedCmp(second)) = self.peek().cloned() {
            self.next();
            self.arith_expr()?;
            self.out.push(StatToken::TernaryCmp(first, second));
        } else {
            self.out.push(StatToken::Cmp(first));
        }
        Ok(())
    }

    fn period_cond(&mut self) -> Result<(), SyntaxError> {
        self.expect(&Lexeme::LPar, "'('")?;
        self.period_expr()?;
        loop {
            if self.is_word("and") {
                self.next();
                self.period_expr()?;
                self.out.push(StatToken::And);
            } else if self.is_word("or") {
                self.next();
                self.period_expr()?;
                self.out.push(StatToken::Or);
            } else {
                break;
            }
        }
        self.expect(&Lexeme::RPar, "')'")
    }

    fn period_expr(&mut self) -> Result<(), SyntaxError> {
        self.expect(&Lexeme::Np, "'&np'")?;
        match self.next() {
            Some(Lexeme::BareCmp(op)) => {
                self.out.push(StatToken::Period);
                match self.next() {
                    Some(Lexeme::Num(code)) => self.out.push(StatToken::PeriodCode(code)),
                    other => {
                        return Err(SyntaxError(format!(
                            "Expected period code, found {other:?}"
                        )));
                    }
                }
                self.out.push(StatToken::Cmp(op));
                Ok(())
            }
            Some(Lexeme::Word(word)) if word == "in" => {
                self.expect(&Lexeme::LPar, "'(' after in")?;
                let mut codes = Vec::new();
                loop {
                    match self.next() {
                        Some(Lexeme::Num(code)) => codes.push(code),
                        other => {
                            return Err(SyntaxError(format!(
                                "Expected period code, found {other:?}"
                            )));
                        }
                    }
                    match self.next() {
                        Some(Lexeme::Comma) => continue,
                        Some(Lexeme::RPar) => break,
                        other => {
                            return Err(SyntaxError(format!(
                                "Expected ',' or ')', found {other:?}"
                            )));
                        }
                    }
                }
                self.out.push(StatToken::PeriodIn(codes));
                Ok(())
            }
            other => Err(SyntaxError(format!(
                "Expected comparator or 'in' after &np, found {other:?}"
            ))),
        }
    }

    fn arith_expr(&mut self) -> Result<(), SyntaxError> {
        self.term()?;
        loop {
            let token = match self.peek() {
                Some(Lexeme::Plus) => StatToken::Add,
                Some(Lexeme::Dash) => StatToken::Sub,
                _ => break,
            };
            self.next();
            self.term()?;
            self.out.push(token);
        }
        Ok(())
    }

    fn term(&mut self) -> Result<(), SyntaxError> {
        self.multiplic()?;
        loop {
            let token = match self.peek() {
                Some(Lexeme::Star) => StatToken::Mul,
                Some(Lexeme::Slash) => StatToken::Div,
                _ => break,
            };
            self.next();
            self.multiplic()?;
            self.out.push(token);
        }
        Ok(())
    }

    fn multiplic(&mut self) -> Result<(), SyntaxError> {
        match self.peek().cloned() {
            Some(Lexeme::LPar) => {
                self.next();
                self.arith_expr()?;
                self.expect(&Lexeme::RPar, "')'")
            }
            Some(Lexeme::Dash) => {
                self.next();
                match self.next() {
                    Some(Lexeme::Num(raw)) => {
                        let value = parse_number(&raw)?;
                        self.out.push(StatToken::Num(-value));
                        Ok(())
                    }
                    other => Err(SyntaxError(format!(
                        "Expected number after '-', found {other:?}"
                    ))),
                }
            }
            Some(Lexeme::Num(raw)) => {
                self.next();
                self.out.push(StatToken::Num(parse_number(&raw)?));
                Ok(())
            }
            Some(Lexeme::LBrace) => self.element(),
            Some(Lexeme::Word(word)) if word == "sum" => {
                self.next();
                self.valid_area()?;
                self.out.push(StatToken::Sum);
                Ok(())
            }
            Some(Lexeme::Word(word)) => self.function(&word),
            other => Err(SyntaxError(format!("Expected operand, found {other:?}"))),
        }
    }

    /// Operand of `sum`: an element, a function call, or a
    /// parenthesized arithmetic expression.
    fn valid_area(&mut self) -> Result<(), SyntaxError> {
        match self.peek().cloned() {
            Some(Lexeme::LBrace) => self.element(),
            Some(Lexeme::LPar) => {
                self.next();
                self.arith_expr()?;
                self.expect(&Lexeme::RPar, "')'")
            }
            Some(Lexeme::Word(word)) if word != "sum" => self.function(&word),
            other => Err(SyntaxError(format!(
                "Expected sum operand, found {other:?}"
            ))),
        }
    }

    fn function(&mut self, word: &str) -> Result<(), SyntaxError> {
        let func = match word {
            "abs" => StatFunc::Abs,
            "floor" => StatFunc::Floor,
            "isnull" => StatFunc::IsNull,
            "nullif" => StatFunc::NullIf,
            "round" => StatFunc::Round,
            "coalesce" => StatFunc::Coalesce,
            other => {
                return Err(SyntaxError(format!("Unknown function '{other}'")));
            }
        };
        self.next();
        self.expect(&Lexeme::LPar, &format!("'(' after {word}"))?;
        let mut argc = 1;
        self.arith_expr()?;
        while self.peek() == Some(&Lexeme::Comma) {
            self.next();
            self.arith_expr()?;
            argc += 1;
        }
        self.expect(&Lexeme::RPar, "')'")?;
        let arity_ok = match func {
            StatFunc::Abs | StatFunc::Floor => argc == 1,
            StatFunc::IsNull | StatFunc::NullIf => argc == 2,
            StatFunc::Round => argc == 2 || argc == 3,
            StatFunc::Coalesce => argc >= 1,
        };
        if !arity_ok {
            return Err(SyntaxError(format!(
                "{func} does not take {argc} argument(s)"
            )));
        }
        self.out.push(StatToken::Func(func, argc));
        Ok(())
    }

    fn element(&mut self) -> Result<(), SyntaxError> {
        self.expect(&Lexeme::LBrace, "'{'")?;
        let section = self.section_axis()?;
        let rows = self.position_axis()?;
        let cols = self.position_axis()?;
        let mut specs: [Vec<AxisToken>; 3] = Default::default();
        let mut sx = 0;
        while self.peek() == Some(&Lexeme::LBracket) && sx < 3 {
            specs[sx] = self.spec_axis()?;
            sx += 1;
        }
        self.expect(&Lexeme::RBrace, "'}'")?;
        self.out.push(StatToken::Element(ElementRef {
            section,
            rows,
            cols,
            specs,
        }));
        Ok(())
    }

    fn section_axis(&mut self) -> Result<i64, SyntaxError> {
        self.expect(&Lexeme::LBracket, "'['")?;
        let section = match self.next() {
            Some(Lexeme::Num(raw)) => raw
                .parse()
                .map_err(|_| SyntaxError(format!("Bad section number '{raw}'")))?,
            other => {
                return Err(SyntaxError(format!(
                    "Expected section number, found {other:?}"
                )));
            }
        };
        self.expect(&Lexeme::RBracket, "']'")?;
        Ok(section)
    }

    /// Row/column descriptor list: `*`, codes, code ranges.
    fn position_axis(&mut self) -> Result<Vec<AxisToken>, SyntaxError> {
        self.expect(&Lexeme::LBracket, "'['")?;
        let mut tokens = Vec::new();
        if self.peek() == Some(&Lexeme::Star) {
            self.next();
            tokens.push(AxisToken::Wild);
        } else {
            loop {
                let code = match self.next() {
                    Some(Lexeme::Num(raw)) => raw
                        .parse()
                        .map_err(|_| SyntaxError(format!("Bad axis code '{raw}'")))?,
                    other => {
                        return Err(SyntaxError(format!(
                            "Expected axis code, found {other:?}"
                        )));
                    }
                };
                if self.peek() == Some(&Lexeme::Dash) {
                    self.next();
                    let upper = match self.next() {
                        Some(Lexeme::Num(raw)) => raw
                            .parse()
                            .map_err(|_| SyntaxError(format!("Bad axis code '{raw}'")))?,
                        other => {
                            return Err(SyntaxError(format!(
                                "Expected range bound, found {other:?}"
                            )));
                        }
                    };
                    tokens.push(AxisToken::Code(code));
                    tokens.push(AxisToken::Code(upper));
                    tokens.push(AxisToken::Range);
                } else {
                    tokens.push(AxisToken::Code(code));
                }
                if self.peek() == Some(&Lexeme::Comma) {
                    self.next();
                    continue;
                }
                break;
            }
        }
        self.expect(&Lexeme::RBracket, "']'")?;
        Ok(tokens)
    }

    /// Specific-axis descriptor list over label strings.
    fn spec_axis(&mut self) -> Result<Vec<AxisToken>, SyntaxError> {
        self.expect(&Lexeme::LBracket, "'['")?;
        let mut tokens = Vec::new();
        if self.peek() == Some(&Lexeme::Star) {
            self.next();
            tokens.push(AxisToken::Wild);
        } else {
            loop {
                let label = match self.next() {
                    Some(Lexeme::Word(word)) => word,
                    Some(Lexeme::Num(raw)) => raw,
                    other => {
                        return Err(SyntaxError(format!(
                            "Expected specific label, found {other:?}"
                        )));
                    }
                };
                if self.peek() == Some(&Lexeme::Dash) {
                    self.next();
                    let upper = match self.next() {
                        Some(Lexeme::Word(word)) => word,
                        Some(Lexeme::Num(raw)) => raw,
                        other => {
                            return Err(SyntaxError(format!(
                                "Expected range bound, found {other:?}"
                            )));
                        }
                    };
                    tokens.push(AxisToken::Label(label));
                    tokens.push(AxisToken::Label(upper));
                    tokens.push(AxisToken::Range);
                } else {
                    tokens.push(AxisToken::Label(label));
                }
                if self.peek() == Some(&Lexeme::Comma) {
                    self.next();
                    continue;
                }
                break;
            }
        }
        self.expect(&Lexeme::RBracket, "']'")?;
        Ok(tokens)
    }
}

fn parse_number(raw: &str) -> Result<f64, SyntaxError> {
    raw.parse()
        .map_err(|_| SyntaxError(format!("Bad number '{raw}'")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn element(
        section: i64,
        rows: Vec<AxisToken>,
        cols: Vec<AxisToken>,
    ) -> StatToken {
        StatToken::Element(ElementRef {
            section,
            rows,
            cols,
            specs: Default::default(),
        })
    }

    #[test]
    fn column_sum_comparison_tokenizes() {
        let stream = tokenize_rule("sum({[1][*][1]}) |=| sum({[1][*][2]})").unwrap();
        assert_eq!(
            stream,
            vec![
                element(1, vec![AxisToken::Wild], vec![AxisToken::Code(1)]),
                StatToken::Sum,
                element(1, vec![AxisToken::Wild], vec![AxisToken::Code(2)]),
                StatToken::Sum,
                StatToken::Cmp(CmpOp::Eq),
            ]
        );
    }

    #[test]
    fn ternary_comparison_becomes_one_token() {
        let stream = tokenize_rule("0 |<=| {[1][01][3]} |<=| 100").unwrap();
        assert_eq!(
            stream,
            vec![
                StatToken::Num(0.0),
                element(1, vec![AxisToken::Code(1)], vec![AxisToken::Code(3)]),
                StatToken::Num(100.0),
                StatToken::TernaryCmp(CmpOp::Le, CmpOp::Le),
            ]
        );
    }

    #[test]
    fn ranges_emit_bounds_then_marker() {
        let stream = tokenize_rule("{[2][01-05][*]} |>| 0").unwrap();
        assert_eq!(
            stream,
            vec![
                element(
                    2,
                    vec![AxisToken::Code(1), AxisToken::Code(5), AxisToken::Range],
                    vec![AxisToken::Wild],
                ),
                StatToken::Num(0.0),
                StatToken::Cmp(CmpOp::Gt),
            ]
        );
    }

    #[test]
    fn specific_axes_ride_along() {
        let stream = tokenize_rule("{[1][10][2][мясо][*]} |<>| 0").unwrap();
        let StatToken::Element(element) = &stream[0] else {
            panic!("expected element");
        };
        assert_eq!(element.specs[0], vec![AxisToken::Label("мясо".into())]);
        assert_eq!(element.specs[1], vec![AxisToken::Wild]);
        assert!(element.specs[2].is_empty());
    }

    #[test]
    fn period_predicates_close_in_lists() {
        let stream = tokenize_period("(&np in (1, 4, 7) and &np <> 12)").unwrap();
        assert_eq!(
            stream,
            vec![
                StatToken::PeriodIn(vec!["1".into(), "4".into(), "7".into()]),
                StatToken::Period,
                StatToken::PeriodCode("12".into()),
                StatToken::Cmp(CmpOp::Ne),
                StatToken::And,
            ]
        );
    }

    #[test]
    fn conditions_join_with_connectives() {
        let stream =
            tokenize_condition("{[1][01][1]} |>| 0 and {[1][01][2]} |>| 0").unwrap();
        assert_eq!(stream.last(), Some(&StatToken::And));
        assert_eq!(
            stream
                .iter()
                .filter(|token| matches!(token, StatToken::Cmp(_)))
                .count(),
            2
        );
    }

    #[test]
    fn functions_carry_their_arity() {
        let stream = tokenize_rule("round({[1][01][1]} / 3, 2) |=| 5").unwrap();
        assert!(stream.contains(&StatToken::Func(StatFunc::Round, 2)));
        let stream = tokenize_rule("isnull({[1][01][1]}, 0) |=| 0").unwrap();
        assert!(stream.contains(&StatToken::Func(StatFunc::IsNull, 2)));
    }

    #[test]
    fn previous_period_references_are_rejected() {
        let err = tokenize_rule("{{[1][01][1]}} |=| 0").unwrap_err();
        assert!(err.to_string().contains("Previous-period"));
    }

    #[test]
    fn negative_numbers_parse_in_operand_position() {
        let stream = tokenize_rule("{[1][01][1]} |>=| -5.5").unwrap();
        assert_eq!(stream[1], StatToken::Num(-5.5));
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(tokenize_rule("").is_err());
        assert!(tokenize_rule("{[1][01]}").is_err());
        assert!(tokenize_rule("{[1][01][1]} |!| 0").is_err());
        assert!(tokenize_period("(&np !! 3)").is_err());
    }
}
