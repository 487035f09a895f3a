//! Stack interpreter for tokenized Schematron expressions.
//!
//! Walks a postfix stream against a parsed document, resolving node
//! references through the rule context. All scratch state lives in an
//! explicit [`Evaluator`] value; the operator dispatch itself is
//! stateless, so evaluators can run on independent workers without
//! sharing anything but the compendium.
//!
//! Coercion rules are deliberately asymmetric and load-bearing:
//! `<` compares the string forms of its operands, `=`/`!=` compare
//! strings when both sides are strings and numbers otherwise, and the
//! remaining orderings go numeric only when both sides coerce.

use std::collections::HashMap;
use std::fmt;

use crate::dom::Document;
use crate::error::CheckError;
use crate::fns::tokenizer::{Op, Token};
use crate::io_utils;

/// Result of evaluating an expression or sub-expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Num(f64),
    Str(String),
}

impl Value {
    pub fn truthy(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::Num(n) => *n != 0.0,
            Value::Str(s) => !s.is_empty(),
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Num(n) => Some(*n),
            Value::Str(s) => s.trim().parse().ok(),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => f.write_str(if *b { "true" } else { "false" }),
            Value::Num(n) => write!(f, "{n}"),
            Value::Str(s) => f.write_str(s),
        }
    }
}

/// Evaluation state for one document: the document view, its filename,
/// and the per-document memoization tables.
pub struct Evaluator<'a> {
    doc: &'a Document,
    file_name: &'a str,
    node_cache: HashMap<String, Value>,
    func_cache: HashMap<String, Value>,
}

impl<'a> Evaluator<'a> {
    pub fn new(doc: &'a Document, file_name: &'a str) -> Self {
        Self {
            doc,
            file_name,
            node_cache: HashMap::new(),
            func_cache: HashMap::new(),
        }
    }

    /// Drops both memoization tables.
    pub fn clear_cache(&mut self) {
        self.node_cache.clear();
        self.func_cache.clear();
    }

    /// Evaluates a postfix stream in the given rule context. Any
    /// failure inside evaluation is wrapped as a parser error carrying
    /// the original expression text.
    pub fn evaluate(
        &mut self,
        rpn: &[Token],
        expression: &str,
        context: &str,
    ) -> Result<Value, CheckError> {
        let mut stack: Vec<Token> = rpn.to_vec();
        let value = self.eval_stack(&mut stack, context).map_err(|err| {
            CheckError::parser(expression, self.file_name, err)
        })?;
        if !stack.is_empty() {
            return Err(CheckError::parser(
                expression,
                self.file_name,
                format!("{} operand(s) left on the stack", stack.len()),
            ));
        }
        Ok(value)
    }

    fn eval_stack(&mut self, stack: &mut Vec<Token>, context: &str) -> Result<Value, CheckError> {
        let token = stack
            .pop()
            .ok_or_else(|| CheckError::input(self.file_name, "Evaluation stack underflow"))?;

        match token {
            Token::Int(raw) | Token::Float(raw) | Token::Str(raw) | Token::Date(raw) => {
                Ok(Value::Str(raw))
            }
            Token::Node(node) => self.evaluate_node(&node, context),
            Token::Op(op) => self.apply(op, stack, context),
        }
    }

    fn apply(
        &mut self,
        op: Op,
        stack: &mut Vec<Token>,
        context: &str,
    ) -> Result<Value, CheckError> {
        match op {
            Op::FileName => Ok(Value::Str(io_utils::strip_extension(self.file_name))),

            Op::Not => {
                let arg = self.eval_stack(stack, context)?;
                Ok(Value::Bool(!arg.truthy()))
            }
            Op::Count => {
                // The one operator that consumes its operand as a raw
                // token: the node-set is counted, not evaluated.
                let node = match stack.pop() {
                    Some(Token::Node(node)) => node,
                    other => {
                        return Err(CheckError::input(
                            self.file_name,
                            format!("count() expects a node reference, found {other:?}"),
                        ));
                    }
                };
                let key = format!("count/{context}/{node}");
                if let Some(hit) = self.func_cache.get(&key) {
                    return Ok(hit.clone());
                }
                let count = self.doc.count(&format!("//{context}/{node}"));
                let value = Value::Str(count.to_string());
                self.func_cache.insert(key, value.clone());
                Ok(value)
            }
            Op::Round => {
                let arg = self.eval_stack(stack, context)?;
                let key = format!("round/{context}/{arg}");
                if let Some(hit) = self.func_cache.get(&key) {
                    return Ok(hit.clone());
                }
                let number = coerce_f64(&arg)?;
                let value = Value::Num(number.round());
                self.func_cache.insert(key, value.clone());
                Ok(value)
            }
            // Pass-through markers around a node value.
            Op::Sum | Op::Number => self.eval_stack(stack, context),

            Op::Substring => {
                let arg3 = self.eval_stack(stack, context)?;
                let arg2 = self.eval_stack(stack, context)?;
                let is_digits = |value: &Value| {
                    matches!(value, Value::Str(s) if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()))
                };
                if !is_digits(&arg2) {
                    // Two-argument form: the middle pop was the node.
                    return substring(&arg2, &arg3, None);
                }
                let arg1 = self.eval_stack(stack, context)?;
                substring(&arg1, &arg2, Some(&arg3))
            }
            Op::Iif => {
                let otherwise = self.eval_stack(stack, context)?;
                let then = self.eval_stack(stack, context)?;
                let cond = self.eval_stack(stack, context)?;
                Ok(if cond.truthy() { then } else { otherwise })
            }
            Op::Concat => {
                let mut args = Vec::new();
                while matches!(stack.last(), Some(Token::Node(_))) {
                    args.push(self.eval_stack(stack, context)?);
                }
                // Popping yields the arguments in reverse order.
                args.reverse();
                let joined: String = args.iter().map(|value| value.to_string()).collect();
                Ok(Value::Str(joined))
            }
            Op::CompareDate => {
                let second = self.eval_stack(stack, context)?;
                let first = self.eval_stack(stack, context)?;
                Ok(Value::Bool(first.to_string() == second.to_string()))
            }

            Op::Add | Op::Sub | Op::Mul | Op::Mod => {
                let rhs = self.eval_stack(stack, context)?;
                let lhs = self.eval_stack(stack, context)?;
                let b = coerce_f64(&rhs)?;
                let a = coerce_f64(&lhs)?;
                let result = match op {
                    Op::Add => a + b,
                    Op::Sub => a - b,
                    Op::Mul => a * b,
                    _ => a % b,
                };
                Ok(Value::Num(result))
            }

            Op::And | Op::Or => {
                let rhs = self.eval_stack(stack, context)?;
                let lhs = self.eval_stack(stack, context)?;
                let result = if op == Op::And {
                    lhs.truthy() && rhs.truthy()
                } else {
                    lhs.truthy() || rhs.truthy()
                };
                Ok(Value::Bool(result))
            }

            Op::Lt | Op::Le | Op::Eq | Op::Gt | Op::Ge | Op::Ne => {
                let rhs = self.eval_stack(stack, context)?;
                let lhs = self.eval_stack(stack, context)?;
                compare(op, &lhs, &rhs)
            }
        }
    }

    fn evaluate_node(&mut self, node: &str, context: &str) -> Result<Value, CheckError> {
        let element = format!("//{context}/{node}");
        if let Some(hit) = self.node_cache.get(&element) {
            return Ok(hit.clone());
        }
        let value = if node.contains('@') {
            match self.doc.attr_value(&element) {
                Some(text) => Value::Str(text.to_string()),
                None => {
                    return Err(CheckError::NodeAttribute {
                        context: context.to_string(),
                        node: node.to_string(),
                        file: self.file_name.to_string(),
                    });
                }
            }
        } else {
            Value::Bool(self.doc.exists(&element))
        };
        self.node_cache.insert(element, value.clone());
        Ok(value)
    }
}

fn coerce_f64(value: &Value) -> Result<f64, CheckError> {
    value.as_f64().ok_or_else(|| CheckError::TypeConv {
        args: vec![value.to_string()],
        cause: "not a number".to_string(),
    })
}

/// `substring(node, start[, length])` with a 1-indexed start, counted
/// in characters.
fn substring(node: &Value, start: &Value, length: Option<&Value>) -> Result<Value, CheckError> {
    let text = node.to_string();
    let start: usize = start.to_string().trim().parse().map_err(|_| {
        CheckError::TypeConv {
            args: vec![start.to_string()],
            cause: "substring start is not an integer".to_string(),
        }
    })?;
    let skip = start.saturating_sub(1);
    let taken: String = match length {
        Some(length) => {
            let length: usize = length.to_string().trim().parse().map_err(|_| {
                CheckError::TypeConv {
                    args: vec![length.to_string()],
                    cause: "substring length is not an integer".to_string(),
                }
            })?;
            text.chars().skip(skip).take(length).collect()
        }
        None => text.chars().skip(skip).collect(),
    };
    Ok(Value::Str(taken))
}

fn compare(op: Op, lhs: &Value, rhs: &Value) -> Result<Value, CheckError> {
    let result = match op {
        // String ordering regardless of operand types; several tax
        // schemas depend on `'09' < '10'` staying lexicographic.
        Op::Lt => lhs.to_string() < rhs.to_string(),
        Op::Eq | Op::Ne => {
            let equal = match (lhs, rhs) {
                (Value::Str(a), Value::Str(b)) => a == b,
                (Value::Bool(a), Value::Bool(b)) => a == b,
                _ => match (lhs.as_f64(), rhs.as_f64()) {
                    (Some(a), Some(b)) => a == b,
                    _ => false,
                },
            };
            if op == Op::Eq { equal } else { !equal }
        }
        Op::Le | Op::Gt | Op::Ge => {
            let ordering = match (lhs, rhs) {
                (Value::Str(a), Value::Str(b)) => a.cmp(b),
                _ => {
                    let a = coerce_f64(lhs)?;
                    let b = coerce_f64(rhs)?;
                    a.partial_cmp(&b).ok_or_else(|| CheckError::TypeConv {
                        args: vec![lhs.to_string(), rhs.to_string()],
                        cause: "incomparable numbers".to_string(),
                    })?
                }
            };
            match op {
                Op::Le => ordering != std::cmp::Ordering::Greater,
                Op::Gt => ordering == std::cmp::Ordering::Greater,
                _ => ordering != std::cmp::Ordering::Less,
            }
        }
        _ => unreachable!("non-comparison operator"),
    };
    Ok(Value::Bool(result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fns::tokenizer::tokenize;

    const FILE: &str = "NO_NDS_9_2367_2367_2317083000231.xml";

    const XML: &str = r#"<Файл ИдФайл="NO_NDS_9_2367_2367_2317083000231" ВерсФорм="5.06">
  <Документ КНД="1151111" ПрПодп="2">
    <СвПред Наименование="ООО Тест"/>
    <СвНП ОКТМО="45380000" СумНал="100" СумВыч="40"/>
  </Документ>
</Файл>"#;

    fn doc() -> Document {
        Document::parse_str(XML, encoding_rs::UTF_8).unwrap()
    }

    fn eval(expr: &str, context: &str) -> Result<Value, CheckError> {
        let doc = doc();
        let rpn = tokenize(expr).unwrap();
        let mut evaluator = Evaluator::new(&doc, FILE);
        evaluator.evaluate(&rpn, expr, context)
    }

    #[test]
    fn filename_matches_file_id_attribute() {
        let value = eval("usch:getFileName() = @ИдФайл", "Файл").unwrap();
        assert_eq!(value, Value::Bool(true));
    }

    #[test]
    fn count_pops_the_raw_node_token() {
        assert_eq!(
            eval("count(СвПред) = 1", "Документ").unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            eval("count(СвОтсут) = 0", "Документ").unwrap(),
            Value::Bool(true)
        );
    }

    #[test]
    fn missing_attribute_raises_node_attribute_error() {
        let doc = doc();
        let expr = "@Отсутствует = '1'";
        let rpn = tokenize(expr).unwrap();
        let mut evaluator = Evaluator::new(&doc, FILE);
        let err = evaluator.evaluate(&rpn, expr, "Документ").unwrap_err();
        // Wrapped as a parser error carrying the original cause text.
        assert!(matches!(err, CheckError::Parser { .. }));
        assert!(err.to_string().contains("Отсутствует"));
    }

    #[test]
    fn element_reference_is_existence() {
        assert_eq!(eval("СвПред", "Документ").unwrap(), Value::Bool(true));
        assert_eq!(eval("СвОтсут", "Документ").unwrap(), Value::Bool(false));
    }

    #[test]
    fn arithmetic_coerces_attribute_strings() {
        let value = eval("@СумНал - @СумВыч > 0", "Документ/СвНП").unwrap();
        assert_eq!(value, Value::Bool(true));
    }

    #[test]
    fn lt_is_string_lexicographic() {
        // Numerically 5 < 10; lexicographically "5" > "10".
        assert_eq!(eval("'5' < '10'", "Файл").unwrap(), Value::Bool(false));
        assert_eq!(eval("'09' < '10'", "Файл").unwrap(), Value::Bool(true));
    }

    #[test]
    fn substring_is_one_indexed() {
        let value = eval("substring(@ОКТМО, 1, 2) = '45'", "Документ/СвНП").unwrap();
        assert_eq!(value, Value::Bool(true));
        // The two-argument form relies on the middle operand not being
        // a digit sequence, so it only suits non-numeric node values.
        let value = eval(
            "substring(@Наименование, 5) = 'Тест'",
            "Документ/СвПред",
        )
        .unwrap();
        assert_eq!(value, Value::Bool(true));
    }

    #[test]
    fn iif_selects_by_condition_truthiness() {
        let value = eval(
            "usch:iif(@ПрПодп=2, count(СвПред)!=0, count(СвПред)=0)",
            "Документ",
        )
        .unwrap();
        assert_eq!(value, Value::Bool(true));
    }

    #[test]
    fn concat_joins_in_source_order() {
        let value = eval(
            "concat(@ОКТМО, @СумНал) = '45380000100'",
            "Документ/СвНП",
        )
        .unwrap();
        assert_eq!(value, Value::Bool(true));
    }

    #[test]
    fn evaluation_is_cache_pure() {
        let doc = doc();
        let expr = "count(СвПред) = 1 and count(СвПред) != 0";
        let rpn = tokenize(expr).unwrap();
        let mut evaluator = Evaluator::new(&doc, FILE);
        let first = evaluator.evaluate(&rpn, expr, "Документ").unwrap();
        let second = evaluator.evaluate(&rpn, expr, "Документ").unwrap();
        evaluator.clear_cache();
        let third = evaluator.evaluate(&rpn, expr, "Документ").unwrap();
        assert_eq!(first, second);
        assert_eq!(second, third);
    }

    #[test]
    fn type_conversion_failure_wraps_as_parser_error() {
        let err = eval("@Наименование - 1 > 0", "Документ/СвПред").unwrap_err();
        assert!(matches!(err, CheckError::Parser { .. }));
        assert!(err.to_string().contains("вещественному типу"));
    }

    proptest::proptest! {
        // Every accepted expression leaves exactly one value on the
        // stack: the evaluator rejects leftovers, so Ok proves the
        // stream's arities balance.
        #[test]
        fn accepted_streams_evaluate_to_one_value(
            a in 0u32..100,
            b in 0u32..100,
            op_idx in 0usize..6,
            conjunction in proptest::bool::ANY
        ) {
            let ops = ["<", "<=", "=", ">", ">=", "!="];
            let op = ops[op_idx];
            let expr = if conjunction {
                format!("'{a}' {op} '{b}' and count(СвПред) != 0")
            } else {
                format!("'{a}' {op} '{b}' or count(СвПред) = 1")
            };
            let doc = doc();
            let rpn = tokenize(&expr).expect("grammar accepts the expression");
            let mut evaluator = Evaluator::new(&doc, FILE);
            let value = evaluator.evaluate(&rpn, &expr, "Документ").expect("stream balances");
            proptest::prop_assert!(matches!(value, Value::Bool(_)));
        }
    }
}
