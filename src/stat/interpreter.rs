//! Interpreters for STAT control expressions.
//!
//! [`StatEvaluator`] walks a postfix stream against the per-section
//! dataframes. Operands are a tagged union; the context-sensitive
//! `sum` returns a [`Operand::PendingSum`] that stays unresolved until
//! the other operand's shape is known, at which point the binary
//! dispatcher picks the aggregation axis:
//!
//! * other is scalar or 1×1 → whole-table sum;
//! * other is 1×N → column sums;
//! * other is N×1 → row sums;
//! * other is M×N with both above 1 → template error.
//!
//! An empty selection escapes through the dedicated empty-extract
//! error and is mapped to `true` for a rule and `false` for a guard
//! condition: an empty selection silently passes a rule but disables a
//! conditional. Everything else that goes wrong inside evaluation is
//! fatal to the current document.

use std::collections::HashMap;

use crate::error::CheckError;
use crate::stat::dataframe::DataFrame;
use crate::stat::tokenizer::{CmpOp, StatFunc, StatToken};

/// A value on the evaluation stack.
#[derive(Debug, Clone)]
pub enum Operand {
    Scalar(f64),
    Frame(DataFrame),
    /// Aggregation bound late, once the consumer's shape is known.
    PendingSum(DataFrame),
    Bool(bool),
    /// Result of `nullif` on equal arguments; absorbs arithmetic.
    Null,
    /// A period code, ordered as a string.
    Code(String),
}

impl Operand {
    pub fn truthy(&self) -> bool {
        match self {
            Operand::Bool(b) => *b,
            Operand::Scalar(s) => *s != 0.0,
            Operand::Null => false,
            Operand::Code(code) => !code.is_empty(),
            Operand::Frame(_) | Operand::PendingSum(_) => true,
        }
    }
}

pub type FrameMap = HashMap<String, DataFrame>;

/// Evaluator for control rules and guard conditions of one document.
pub struct StatEvaluator<'f> {
    frames: &'f FrameMap,
    period: Option<String>,
}

impl<'f> StatEvaluator<'f> {
    pub fn new(frames: &'f FrameMap, period: Option<String>) -> Self {
        Self { frames, period }
    }

    /// Evaluates a control rule; an empty selection passes it.
    pub fn evaluate_rule(&self, rpn: &[StatToken], expression: &str) -> Result<bool, CheckError> {
        match self.eval(rpn) {
            Ok(operand) => Ok(operand.truthy()),
            Err(CheckError::EmptyExtract) => Ok(true),
            Err(_) => Err(CheckError::Interpreter {
                expression: expression.to_string(),
            }),
        }
    }

    /// Evaluates a guard condition; an empty selection disables it.
    pub fn evaluate_condition(
        &self,
        rpn: &[StatToken],
        expression: &str,
    ) -> Result<bool, CheckError> {
        match self.eval(rpn) {
            Ok(operand) => Ok(operand.truthy()),
            Err(CheckError::EmptyExtract) => Ok(false),
            Err(_) => Err(CheckError::Interpreter {
                expression: expression.to_string(),
            }),
        }
    }

    fn eval(&self, rpn: &[StatToken]) -> Result<Operand, CheckError> {
        let mut stack: Vec<StatToken> = rpn.to_vec();
        let result = self.eval_stack(&mut stack)?;
        if !stack.is_empty() {
            return Err(CheckError::Interpreter {
                expression: format!("{} операнд(ов) осталось на стеке", stack.len()),
            });
        }
        Ok(result)
    }

    fn eval_stack(&self, stack: &mut Vec<StatToken>) -> Result<Operand, CheckError> {
        let token = stack.pop().ok_or(CheckError::Interpreter {
            expression: "стек выражения пуст".to_string(),
        })?;

        match token {
            StatToken::Num(value) => Ok(Operand::Scalar(value)),

            StatToken::Element(element) => {
                let key = element.section.to_string();
                let frame = self.frames.get(&key).ok_or(CheckError::Interpreter {
                    expression: format!("раздел {key} отсутствует в отчёте"),
                })?;
                let selection = frame.get(&element.rows, &element.cols, &element.specs)?;
                Ok(Operand::Frame(selection))
            }

            StatToken::Sum => {
                let arg = self.eval_stack(stack)?;
                Ok(match arg {
                    Operand::Frame(frame) => Operand::PendingSum(frame),
                    other => other,
                })
            }

            StatToken::Func(func, argc) => {
                let mut args = Vec::with_capacity(argc);
                for _ in 0..argc {
                    args.push(self.eval_stack(stack)?);
                }
                args.reverse();
                apply_function(func, args)
            }

            StatToken::Add | StatToken::Sub | StatToken::Mul | StatToken::Div => {
                let rhs = self.eval_stack(stack)?;
                let lhs = self.eval_stack(stack)?;
                let (lhs, rhs) = resolve_pair(lhs, rhs)?;
                let op: fn(f64, f64) -> f64 = match token {
                    StatToken::Add => |a, b| a + b,
                    StatToken::Sub => |a, b| a - b,
                    StatToken::Mul => |a, b| a * b,
                    _ => |a, b| a / b,
                };
                arith(lhs, rhs, op)
            }

            StatToken::And | StatToken::Or => {
                let rhs = self.eval_stack(stack)?;
                let lhs = self.eval_stack(stack)?;
                let result = if matches!(token, StatToken::And) {
                    lhs.truthy() && rhs.truthy()
                } else {
                    lhs.truthy() || rhs.truthy()
                };
                Ok(Operand::Bool(result))
            }

            StatToken::Cmp(op) => {
                let rhs = self.eval_stack(stack)?;
                let lhs = self.eval_stack(stack)?;
                let (lhs, rhs) = resolve_pair(lhs, rhs)?;
                Ok(Operand::Bool(compare(op, &lhs, &rhs)?))
            }

            StatToken::TernaryCmp(first, second) => {
                let c = self.eval_stack(stack)?;
                let b = self.eval_stack(stack)?;
                let a = self.eval_stack(stack)?;
                let (a, b) = resolve_pair(a, b)?;
                let (b, c) = resolve_pair(b, c)?;
                let result = compare(first, &a, &b)? && compare(second, &b, &c)?;
                Ok(Operand::Bool(result))
            }

            StatToken::Period => {
                let period = self.period.as_deref().ok_or(CheckError::Interpreter {
                    expression: "период отчёта не задан".to_string(),
                })?;
                Ok(Operand::Code(period.to_string()))
            }
            StatToken::PeriodCode(code) => Ok(Operand::Code(code)),
            StatToken::PeriodIn(codes) => {
                let period = self.period.as_deref().ok_or(CheckError::Interpreter {
                    expression: "период отчёта не задан".to_string(),
                })?;
                Ok(Operand::Bool(codes.iter().any(|code| code == period)))
            }
        }
    }
}

/// Period-predicate evaluator: comparisons, `in` lists and boolean
/// connectives against the report period only.
pub struct PeriodEvaluator {
    period: String,
}

impl PeriodEvaluator {
    pub fn new(period: impl Into<String>) -> Self {
        Self {
            period: period.into(),
        }
    }

    pub fn evaluate(&self, rpn: &[StatToken], expression: &str) -> Result<bool, CheckError> {
        let frames = FrameMap::new();
        let evaluator = StatEvaluator::new(&frames, Some(self.period.clone()));
        match evaluator.eval(rpn) {
            Ok(operand) => Ok(operand.truthy()),
            Err(_) => Err(CheckError::Interpreter {
                expression: expression.to_string(),
            }),
        }
    }
}

/// Resolves pending sums against the other operand's shape.
fn resolve_pair(lhs: Operand, rhs: Operand) -> Result<(Operand, Operand), CheckError> {
    match (lhs, rhs) {
        (Operand::PendingSum(f), Operand::PendingSum(g)) => Ok((
            Operand::Scalar(f.sum_all()),
            Operand::Scalar(g.sum_all()),
        )),
        (Operand::PendingSum(f), rhs) => {
            let resolved = resolve_against(f, &rhs)?;
            Ok((resolved, rhs))
        }
        (lhs, Operand::PendingSum(g)) => {
            let resolved = resolve_against(g, &lhs)?;
            Ok((lhs, resolved))
        }
        pair => Ok(pair),
    }
}

fn resolve_against(pending: DataFrame, other: &Operand) -> Result<Operand, CheckError> {
    match other {
        Operand::Frame(frame) => match frame.dim() {
            (1, 1) => Ok(Operand::Scalar(pending.sum_all())),
            (1, _) => Ok(Operand::Frame(pending.sum_cols())),
            (_, 1) => Ok(Operand::Frame(pending.sum_rows())),
            _ => Err(CheckError::Interpreter {
                expression: "Ошибка при работе с контекстом функции SUM".to_string(),
            }),
        },
        _ => Ok(Operand::Scalar(pending.sum_all())),
    }
}

fn arith(lhs: Operand, rhs: Operand, op: fn(f64, f64) -> f64) -> Result<Operand, CheckError> {
    match (lhs, rhs) {
        (Operand::Null, _) | (_, Operand::Null) => Ok(Operand::Null),
        (Operand::Scalar(a), Operand::Scalar(b)) => Ok(Operand::Scalar(op(a, b))),
        (Operand::Frame(f), Operand::Scalar(s)) => Ok(Operand::Frame(f.map(|x| op(x, s)))),
        (Operand::Scalar(s), Operand::Frame(f)) => Ok(Operand::Frame(f.map(|x| op(s, x)))),
        (Operand::Frame(f), Operand::Frame(g)) => Ok(Operand::Frame(f.zip_with(&g, op)?)),
        (Operand::Bool(b), rhs) => arith(Operand::Scalar(b as u8 as f64), rhs, op),
        (lhs, Operand::Bool(b)) => arith(lhs, Operand::Scalar(b as u8 as f64), op),
        (lhs, rhs) => Err(CheckError::Interpreter {
            expression: format!("невалидные аргументы операции: {lhs:?}, {rhs:?}"),
        }),
    }
}

fn cmp_f64(op: CmpOp, a: f64, b: f64) -> bool {
    match op {
        CmpOp::Lt => a < b,
        CmpOp::Le => a <= b,
        CmpOp::Eq => a == b,
        CmpOp::Gt => a > b,
        CmpOp::Ge => a >= b,
        CmpOp::Ne => a != b,
    }
}

fn compare(op: CmpOp, lhs: &Operand, rhs: &Operand) -> Result<bool, CheckError> {
    match (lhs, rhs) {
        (Operand::Scalar(a), Operand::Scalar(b)) => Ok(cmp_f64(op, *a, *b)),
        (Operand::Frame(f), Operand::Scalar(s)) => {
            Ok(f.compare_scalar(*s, |x, y| cmp_f64(op, x, y)))
        }
        (Operand::Scalar(s), Operand::Frame(f)) => {
            let s = *s;
            Ok(f.compare_scalar(s, move |x, y| cmp_f64(op, y, x)))
        }
        (Operand::Frame(f), Operand::Frame(g)) => f.compare_all(g, |x, y| cmp_f64(op, x, y)),
        (Operand::Code(a), Operand::Code(b)) => {
            let ordering = a.cmp(b);
            Ok(match op {
                CmpOp::Lt => ordering.is_lt(),
                CmpOp::Le => ordering.is_le(),
                CmpOp::Eq => ordering.is_eq(),
                CmpOp::Gt => ordering.is_gt(),
                CmpOp::Ge => ordering.is_ge(),
                CmpOp::Ne => ordering.is_ne(),
            })
        }
        (Operand::Bool(a), Operand::Bool(b)) => Ok(match op {
            CmpOp::Eq => a == b,
            CmpOp::Ne => a != b,
            _ => {
                return Err(CheckError::Interpreter {
                    expression: "булевы значения не упорядочены".to_string(),
                });
            }
        }),
        _ => Err(CheckError::Interpreter {
            expression: format!("несравнимые аргументы: {lhs:?}, {rhs:?}"),
        }),
    }
}

fn operands_equal(lhs: &Operand, rhs: &Operand) -> Result<bool, CheckError> {
    compare(CmpOp::Eq, lhs, rhs)
}

fn apply_function(func: StatFunc, mut args: Vec<Operand>) -> Result<Operand, CheckError> {
    match func {
        StatFunc::Abs => match args.remove(0) {
            Operand::Frame(f) => Ok(Operand::Frame(f.abs())),
            Operand::PendingSum(f) => Ok(Operand::Scalar(f.sum_all().abs())),
            Operand::Scalar(s) => Ok(Operand::Scalar(s.abs())),
            other => Err(CheckError::Interpreter {
                expression: format!("abs: невалидный аргумент {other:?}"),
            }),
        },
        StatFunc::Floor => match args.remove(0) {
            Operand::Frame(f) => Ok(Operand::Scalar(f.floor_min())),
            Operand::PendingSum(f) => Ok(Operand::Scalar(f.sum_all().floor())),
            Operand::Scalar(s) => Ok(Operand::Scalar(s.floor())),
            other => Err(CheckError::Interpreter {
                expression: format!("floor: невалидный аргумент {other:?}"),
            }),
        },
        StatFunc::IsNull => {
            let substitution = args.pop().expect("arity checked at tokenization");
            let element = args.pop().expect("arity checked at tokenization");
            let filler = match substitution {
                Operand::Scalar(s) => s,
                other => {
                    return Err(CheckError::Interpreter {
                        expression: format!("isnull: невалидная замена {other:?}"),
                    });
                }
            };
            match element {
                Operand::Frame(f) => Ok(Operand::Frame(f.fill_none(filler))),
                Operand::Scalar(s) if s.is_nan() => Ok(Operand::Scalar(filler)),
                Operand::Scalar(s) => Ok(Operand::Scalar(s)),
                Operand::Null => Ok(Operand::Scalar(filler)),
                other => Err(CheckError::Interpreter {
                    expression: format!("isnull: невалидный аргумент {other:?}"),
                }),
            }
        }
        StatFunc::NullIf => {
            let rhs = args.pop().expect("arity checked at tokenization");
            let lhs = args.pop().expect("arity checked at tokenization");
            if operands_equal(&lhs, &rhs)? {
                Ok(Operand::Null)
            } else {
                Ok(Operand::Bool(true))
            }
        }
        StatFunc::Round => {
            let op_type_or_precision = args.pop().expect("arity checked at tokenization");
            let (element, precision) = if args.len() == 2 {
                // Three-argument form: the trailing operation type is
                // accepted and ignored, as the templates expect.
                let precision = args.pop().expect("arity checked at tokenization");
                (args.pop().expect("arity"), precision)
            } else {
                (args.pop().expect("arity"), op_type_or_precision)
            };
            let precision = match precision {
                Operand::Scalar(s) => s as i32,
                other => {
                    return Err(CheckError::Interpreter {
                        expression: format!("round: невалидная точность {other:?}"),
                    });
                }
            };
            match element {
                Operand::Frame(f) => Ok(Operand::Frame(f.round(precision))),
                Operand::PendingSum(f) => {
                    let factor = 10f64.powi(precision);
                    Ok(Operand::Scalar((f.sum_all() * factor).round() / factor))
                }
                Operand::Scalar(s) => {
                    let factor = 10f64.powi(precision);
                    Ok(Operand::Scalar((s * factor).round() / factor))
                }
                other => Err(CheckError::Interpreter {
                    expression: format!("round: невалидный аргумент {other:?}"),
                }),
            }
        }
        StatFunc::Coalesce => {
            let mut last = None;
            for arg in args {
                let is_null = match &arg {
                    Operand::Null => true,
                    Operand::Scalar(s) => s.is_nan(),
                    Operand::Frame(f) => f.is_none(),
                    _ => false,
                };
                if !is_null {
                    return Ok(arg);
                }
                last = Some(arg);
            }
            Ok(last.unwrap_or(Operand::Null))
        }
    }
}
