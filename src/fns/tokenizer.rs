//! Tokenizer for Schematron test expressions.
//!
//! Converts an expression string into a postfix (RPN) token stream:
//! operands precede their operators, variadic argument lists precede
//! the function name, and `not` follows its parenthesized operand.
//! The stream is consumed by [`crate::fns::interpreter`].
//!
//! Node reference words are built from the Russian alphabet, digits
//! and `@ / : . _ -`; a space joins two word runs when the second run
//! is itself a node word (some schemas carry spaces inside step
//! names). Digit-only runs are integer literals, `d+.d*` runs are
//! floats, and quoted runs are strings or `dd.mm.yyyy` dates.

use std::fmt;

use thiserror::Error;

/// Expression rejected by the grammar.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct SyntaxError(pub String);

/// One element of the postfix stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// Unsigned integer literal, kept in source form.
    Int(String),
    /// Decimal float literal, kept in source form.
    Float(String),
    /// Quoted string literal, quotes stripped.
    Str(String),
    /// Quoted `dd.mm.yyyy` date literal, quotes stripped.
    Date(String),
    /// Node reference word (attribute step marked by `@`).
    Node(String),
    Op(Op),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Lt,
    Le,
    Eq,
    Gt,
    Ge,
    Ne,
    Add,
    Sub,
    Mul,
    Mod,
    And,
    Or,
    Not,
    Count,
    Round,
    Sum,
    Number,
    Substring,
    Concat,
    FileName,
    Iif,
    CompareDate,
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Op::Lt => "<",
            Op::Le => "<=",
            Op::Eq => "=",
            Op::Gt => ">",
            Op::Ge => ">=",
            Op::Ne => "!=",
            Op::Add => "+",
            Op::Sub => "-",
            Op::Mul => "*",
            Op::Mod => "mod",
            Op::And => "and",
            Op::Or => "or",
            Op::Not => "not",
            Op::Count => "count",
            Op::Round => "round",
            Op::Sum => "sum",
            Op::Number => "number",
            Op::Substring => "substring",
            Op::Concat => "concat",
            Op::FileName => "usch:getFileName",
            Op::Iif => "usch:iif",
            Op::CompareDate => "usch:compareDate",
        };
        f.write_str(text)
    }
}

/// Raw lexeme produced by the scanner, before parsing.
#[derive(Debug, Clone, PartialEq)]
enum Lexeme {
    Int(String),
    Float(String),
    Quoted(String),
    Word(String),
    Keyword(&'static str),
    Comp(Op),
    Plus,
    Minus,
    Star,
    LPar,
    RPar,
    Comma,
}

fn is_node_char(c: char) -> bool {
    matches!(c, 'а'..='я' | 'А'..='Я' | 'ё' | 'Ё')
        || c.is_ascii_digit()
        || matches!(c, '@' | '/' | ':' | '.' | '_' | '-')
}

fn is_node_start(c: char) -> bool {
    matches!(c, 'а'..='я' | 'А'..='Я' | 'ё' | 'Ё' | '@' | '/' | '_')
}

const KEYWORDS: &[&str] = &[
    "and",
    "or",
    "not",
    "mod",
    "count",
    "round",
    "sum",
    "number",
    "substring",
    "concat",
    "usch:getFileName",
    "usch:iif",
    "usch:compareDate",
];

fn scan(expr: &str) -> Result<Vec<Lexeme>, SyntaxError> {
    let chars: Vec<char> = expr.chars().collect();
    let mut out = Vec::new();
    let mut pos = 0;

    while pos < chars.len() {
        let c = chars[pos];
        match c {
            ' ' | '\t' | '\n' | '\r' => pos += 1,
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
            '+' => {
                out.push(Lexeme::Plus);
                pos += 1;
            }
            '*' => {
                out.push(Lexeme::Star);
                pos += 1;
            }
            '-' => {
                out.push(Lexeme::Minus);
                pos += 1;
            }
            '<' => {
                if chars.get(pos + 1) == Some(&'=') {
                    out.push(Lexeme::Comp(Op::Le));
                    pos += 2;
                } else {
                    out.push(Lexeme::Comp(Op::Lt));
                    pos += 1;
                }
            }
            '>' => {
                if chars.get(pos + 1) == Some(&'=') {
                    out.push(Lexeme::Comp(Op::Ge));
                    pos += 2;
                } else {
                    out.push(Lexeme::Comp(Op::Gt));
                    pos += 1;
                }
            }
            '=' => {
                out.push(Lexeme::Comp(Op::Eq));
                pos += 1;
            }
            '!' => {
                if chars.get(pos + 1) == Some(&'=') {
                    out.push(Lexeme::Comp(Op::Ne));
                    pos += 2;
                } else {
                    return Err(SyntaxError("Stray '!'".into()));
                }
            }
            '\'' => {
                pos += 1;
                let start = pos;
                while pos < chars.len() && chars[pos] != '\'' {
                    pos += 1;
                }
                if pos == chars.len() {
                    return Err(SyntaxError("Unterminated string literal".into()));
                }
                let value: String = chars[start..pos].iter().collect();
                out.push(Lexeme::Quoted(value));
                pos += 1;
            }
            c if c.is_ascii_digit() => {
                let start = pos;
                while pos < chars.len() && (chars[pos].is_ascii_digit() || chars[pos] == '.') {
                    pos += 1;
                }
                // A digit run glued to node characters is a node word,
                // e.g. `2НДФЛ` or `1.1/@Признак`.
                if pos < chars.len() && is_node_char(chars[pos]) && chars[pos] != '.' {
                    pos = scan_node_tail(&chars, pos);
                    let word: String = chars[start..pos].iter().collect();
                    out.push(Lexeme::Word(word));
                } else {
                    let run: String = chars[start..pos].iter().collect();
                    if run.contains('.') {
                        out.push(Lexeme::Float(run));
                    } else {
                        out.push(Lexeme::Int(run));
                    }
                }
            }
            c if c.is_ascii_alphabetic() => {
                let start = pos;
                while pos < chars.len()
                    && (chars[pos].is_ascii_alphanumeric() || chars[pos] == ':')
                {
                    pos += 1;
                }
                let word: String = chars[start..pos].iter().collect();
                match KEYWORDS.iter().find(|k| **k == word) {
                    Some(keyword) => out.push(Lexeme::Keyword(keyword)),
                    None => {
                        return Err(SyntaxError(format!("Unknown keyword '{word}'")));
                    }
                }
            }
            c if is_node_start(c) => {
                let start = pos;
                pos = scan_node_tail(&chars, pos);
                let word: String = chars[start..pos].iter().collect();
                out.push(Lexeme::Word(word));
            }
            other => {
                return Err(SyntaxError(format!("Unexpected character '{other}'")));
            }
        }
    }
    Ok(out)
}

/// Consumes a node word starting at `pos`, gluing a following run
/// across a single space when that run is itself a node word.
fn scan_node_tail(chars: &[char], mut pos: usize) -> usize {
    loop {
        while pos < chars.len() && is_node_char(chars[pos]) {
            pos += 1;
        }
        // A trailing hyphen belongs to a binary minus, not the word.
        if pos > 0 && chars[pos - 1] == '-' {
            return pos - 1;
        }
        let mut ahead = pos;
        while ahead < chars.len() && chars[ahead] == ' ' {
            ahead += 1;
        }
        if ahead > pos && ahead < chars.len() && is_node_start(chars[ahead]) {
            pos = ahead;
            continue;
        }
        return pos;
    }
}

/// Tokenizes a Schematron expression into its postfix stream.
pub fn tokenize(expr: &str) -> Result<Vec<Token>, SyntaxError> {
    let lexemes = scan(expr)?;
    let mut parser = Parser {
        lexemes,
        pos: 0,
        out: Vec::new(),
    };
    parser.expr()?;
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

struct Parser {
    lexemes: Vec<Lexeme>,
    pos: usize,
    out: Vec<Token>,
}

impl Parser {
    fn peek(&self) -> Option<&Lexeme> {
        self.lexemes.get(self.pos)
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

    fn expr(&mut self) -> Result<(), SyntaxError> {
        self.term()?;
        while self.peek() == Some(&Lexeme::Keyword("or")) {
            self.next();
            self.term()?;
            self.out.push(Token::Op(Op::Or));
        }
        Ok(())
    }

    fn term(&mut self) -> Result<(), SyntaxError> {
        self.factor()?;
        while self.peek() == Some(&Lexeme::Keyword("and")) {
            self.next();
            self.factor()?;
            self.out.push(Token::Op(Op::And));
        }
        Ok(())
    }

    fn factor(&mut self) -> Result<(), SyntaxError> {
        self.left_expr()?;
        while let Some(&Lexeme::Comp(op)) = self.peek() {
            self.next();
            self.comparand()?;
            self.out.push(Token::Op(op));
        }
        Ok(())
    }

    /// Right-hand side of a comparison: a literal or another atom.
    fn comparand(&mut self) -> Result<(), SyntaxError> {
        match self.peek().cloned() {
            Some(Lexeme::Int(value)) => {
                self.next();
                self.out.push(Token::Int(value));
                Ok(())
            }
            Some(Lexeme::Float(value)) => {
                self.next();
                self.out.push(Token::Float(value));
                Ok(())
            }
            Some(Lexeme::Quoted(value)) => {
                self.next();
                self.out.push(quoted_token(value));
                Ok(())
            }
            _ => self.left_expr(),
        }
    }

    fn left_expr(&mut self) -> Result<(), SyntaxError> {
        self.atom()?;
        loop {
            let op = match self.peek() {
                Some(Lexeme::Star) => Op::Mul,
                Some(Lexeme::Minus) => Op::Sub,
                Some(Lexeme::Plus) => Op::Add,
                Some(Lexeme::Keyword("mod")) => Op::Mod,
                _ => break,
            };
            self.next();
            self.atom()?;
            self.out.push(Token::Op(op));
        }
        Ok(())
    }

    fn atom(&mut self) -> Result<(), SyntaxError> {
        match self.peek().cloned() {
            Some(Lexeme::Keyword("not")) => {
                self.next();
                self.expect(&Lexeme::LPar, "'(' after not")?;
                self.expr()?;
                self.expect(&Lexeme::RPar, "')'")?;
                self.out.push(Token::Op(Op::Not));
                Ok(())
            }
            Some(Lexeme::LPar) => {
                self.next();
                self.expr()?;
                self.expect(&Lexeme::RPar, "')'")
            }
            Some(Lexeme::Word(word)) => {
                self.next();
                self.out.push(Token::Node(word));
                Ok(())
            }
            Some(Lexeme::Int(value)) => {
                self.next();
                self.out.push(Token::Int(value));
                Ok(())
            }
            Some(Lexeme::Float(value)) => {
                self.next();
                self.out.push(Token::Float(value));
                Ok(())
            }
            Some(Lexeme::Quoted(value)) => {
                self.next();
                self.out.push(quoted_token(value));
                Ok(())
            }
            Some(Lexeme::Keyword(keyword)) => self.function(keyword),
            other => Err(SyntaxError(format!("Expected operand, found {other:?}"))),
        }
    }

    fn function(&mut self, keyword: &'static str) -> Result<(), SyntaxError> {
        self.next();
        self.expect(&Lexeme::LPar, &format!("'(' after {keyword}"))?;
        match keyword {
            "count" | "round" | "sum" => {
                self.node_operand()?;
                self.expect(&Lexeme::RPar, "')'")?;
                let op = match keyword {
                    "count" => Op::Count,
                    "round" => Op::Round,
                    _ => Op::Sum,
                };
                self.out.push(Token::Op(op));
            }
            "number" => {
                self.expr()?;
                self.expect(&Lexeme::RPar, "')'")?;
                self.out.push(Token::Op(Op::Number));
            }
            "substring" => {
                self.node_operand()?;
                self.expect(&Lexeme::Comma, "',' in substring")?;
                self.integer_literal()?;
                if self.peek() == Some(&Lexeme::Comma) {
                    self.next();
                    self.integer_literal()?;
                }
                self.expect(&Lexeme::RPar, "')'")?;
                self.out.push(Token::Op(Op::Substring));
            }
            "concat" => {
                self.node_operand()?;
                self.expect(&Lexeme::Comma, "',' in concat")?;
                self.node_operand()?;
                while self.peek() == Some(&Lexeme::Comma) {
                    self.next();
                    self.node_operand()?;
                }
                self.expect(&Lexeme::RPar, "')'")?;
                self.out.push(Token::Op(Op::Concat));
            }
            "usch:getFileName" => {
                self.expect(&Lexeme::RPar, "')'")?;
                self.out.push(Token::Op(Op::FileName));
            }
            "usch:iif" => {
                self.expr()?;
                self.expect(&Lexeme::Comma, "',' in usch:iif")?;
                self.expr()?;
                self.expect(&Lexeme::Comma, "',' in usch:iif")?;
                self.expr()?;
                self.expect(&Lexeme::RPar, "')'")?;
                self.out.push(Token::Op(Op::Iif));
            }
            "usch:compareDate" => {
                self.node_operand()?;
                self.expect(&Lexeme::Comma, "',' in usch:compareDate")?;
                self.node_operand()?;
                self.expect(&Lexeme::RPar, "')'")?;
                self.out.push(Token::Op(Op::CompareDate));
            }
            other => {
                return Err(SyntaxError(format!(
                    "'{other}' is not callable in this position"
                )));
            }
        }
        Ok(())
    }

    /// A node argument: a word, optionally chained with `*`/`-`, or a
    /// parenthesized chain.
    fn node_operand(&mut self) -> Result<(), SyntaxError> {
        if self.peek() == Some(&Lexeme::LPar) {
            self.next();
            self.node_operand()?;
            return self.expect(&Lexeme::RPar, "')'");
        }
        match self.next() {
            Some(Lexeme::Word(word)) => self.out.push(Token::Node(word)),
            other => {
                return Err(SyntaxError(format!(
                    "Expected node reference, found {other:?}"
                )));
            }
        }
        loop {
            let op = match self.peek() {
                Some(Lexeme::Star) => Op::Mul,
                Some(Lexeme::Minus) => Op::Sub,
                _ => break,
            };
            self.next();
            match self.next() {
                Some(Lexeme::Word(word)) => self.out.push(Token::Node(word)),
                other => {
                    return Err(SyntaxError(format!(
                        "Expected node reference, found {other:?}"
                    )));
                }
            }
            self.out.push(Token::Op(op));
        }
        Ok(())
    }

    fn integer_literal(&mut self) -> Result<(), SyntaxError> {
        match self.next() {
            Some(Lexeme::Int(value)) => {
                self.out.push(Token::Int(value));
                Ok(())
            }
            other => Err(SyntaxError(format!(
                "Expected integer literal, found {other:?}"
            ))),
        }
    }
}

fn quoted_token(value: String) -> Token {
    if is_date_literal(&value) {
        Token::Date(value)
    } else {
        Token::Str(value)
    }
}

fn is_date_literal(value: &str) -> bool {
    let bytes = value.as_bytes();
    bytes.len() == 10
        && bytes[2] == b'.'
        && bytes[5] == b'.'
        && bytes
            .iter()
            .enumerate()
            .all(|(i, b)| matches!(i, 2 | 5) || b.is_ascii_digit())
}
