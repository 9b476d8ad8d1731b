//! Restricted formula language used by `showIf` conditions and computed fields.
//!
//! Formulas are parsed into a small AST and interpreted against a context map.
//! Nothing is compiled or executed from the source text: only arithmetic,
//! comparisons, boolean logic, identifier lookup, and a fixed set of helpers
//! are available. Evaluation failures never escape [`Evaluator::evaluate`];
//! they are logged at debug level and collapse to `None`.

pub mod ast;
pub mod dates;
pub mod lexer;
pub mod operand;
pub mod parser;

use std::sync::LazyLock;

use chrono::{Local, NaiveDate};
use regex::{Captures, Regex};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::context::Context;
use ast::{BinaryOp, Expr, Function, LogicalOp, UnaryOp};
use operand::Operand;

/// Spreadsheet-style cell references such as `report2_ST_B7` or `report2.1_ST_B7`.
static CELL_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\breport\d+(?:\.\d+)?_[A-Z]{1,3}_[A-Z]+\d+\b").expect("cell reference pattern")
});

/// Errors raised while parsing or interpreting a formula.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExprError {
    #[error("syntax error at offset {offset}: {message}")]
    Syntax { offset: usize, message: String },
    #[error("formula is {length} characters long (limit {limit})")]
    TooLong { length: usize, limit: usize },
    #[error("formula nests deeper than {0} levels")]
    TooDeep(usize),
    #[error("formula exceeded the evaluation budget of {0} steps")]
    BudgetExceeded(usize),
    #[error("'{0}' is not defined")]
    UnknownIdentifier(String),
    #[error("'{0}' is not an allowed function")]
    UnknownFunction(String),
    #[error("'.{0}' is not an allowed member")]
    UnknownMember(String),
    #[error("{function} expects {expected} argument(s), got {found}")]
    Arity {
        function: String,
        expected: usize,
        found: usize,
    },
    #[error("{0}")]
    Type(String),
}

impl ExprError {
    pub(crate) fn syntax(offset: usize, message: impl Into<String>) -> Self {
        ExprError::Syntax {
            offset,
            message: message.into(),
        }
    }
}

/// Cost ceilings applied to every evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct ExprLimits {
    pub max_formula_length: usize,
    pub max_depth: usize,
    pub max_steps: usize,
}

impl Default for ExprLimits {
    fn default() -> Self {
        Self {
            max_formula_length: 4096,
            max_depth: 64,
            max_steps: 10_000,
        }
    }
}

impl Expr {
    /// Parses a formula with the default limits.
    pub fn parse(formula: &str) -> Result<Expr, ExprError> {
        Self::parse_with(formula, &ExprLimits::default())
    }

    pub fn parse_with(formula: &str, limits: &ExprLimits) -> Result<Expr, ExprError> {
        if formula.len() > limits.max_formula_length {
            return Err(ExprError::TooLong {
                length: formula.len(),
                limit: limits.max_formula_length,
            });
        }
        let tokens = lexer::tokenize(formula)?;
        parser::parse(tokens, formula.len(), limits.max_depth)
    }
}

/// Interprets formulas against a context map.
#[derive(Debug, Clone)]
pub struct Evaluator {
    limits: ExprLimits,
    today: NaiveDate,
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::new(ExprLimits::default())
    }
}

impl Evaluator {
    pub fn new(limits: ExprLimits) -> Self {
        Self {
            limits,
            today: Local::now().date_naive(),
        }
    }

    /// Pins the date used by `age()`.
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = today;
        self
    }

    pub fn limits(&self) -> &ExprLimits {
        &self.limits
    }

    /// Evaluates a formula; any failure yields `None`. `Some` never holds `Value::Null`.
    pub fn evaluate(&self, formula: &str, ctx: &Context) -> Option<Value> {
        match self.try_evaluate(formula, ctx) {
            Ok(value) => value,
            Err(err) => {
                debug!(formula, error = %err, "formula evaluation failed");
                None
            }
        }
    }

    /// Evaluates a visibility condition. Blank conditions are always satisfied.
    pub fn condition(&self, formula: Option<&str>, ctx: &Context) -> Option<bool> {
        match formula.map(str::trim).filter(|formula| !formula.is_empty()) {
            None => Some(true),
            Some(formula) => match self.try_evaluate(formula, ctx) {
                Ok(value) => Some(is_truthy(value.as_ref())),
                Err(err) => {
                    debug!(formula, error = %err, "condition evaluation failed");
                    None
                }
            },
        }
    }

    pub fn try_evaluate(&self, formula: &str, ctx: &Context) -> Result<Option<Value>, ExprError> {
        let source = substitute_cell_references(formula, ctx);
        let expr = Expr::parse_with(&source, &self.limits)?;
        let mut steps = 0usize;
        let result = self.eval(&expr, ctx, &mut steps)?;
        Ok(result.into_value())
    }

    fn eval(&self, expr: &Expr, ctx: &Context, steps: &mut usize) -> Result<Operand, ExprError> {
        *steps += 1;
        if *steps > self.limits.max_steps {
            return Err(ExprError::BudgetExceeded(self.limits.max_steps));
        }

        match expr {
            Expr::Number(value) => Ok(Operand::Number(*value)),
            Expr::Text(text) => Ok(Operand::Text(text.clone())),
            Expr::Bool(flag) => Ok(Operand::Bool(*flag)),
            Expr::Null => Ok(Operand::Null),
            Expr::Undefined => Ok(Operand::Undefined),
            Expr::Ident(name) => lookup(ctx, name),
            Expr::Unary { op, operand } => {
                let value = self.eval(operand, ctx, steps)?;
                Ok(match op {
                    UnaryOp::Not => Operand::Bool(!value.truthy()),
                    UnaryOp::Negate => Operand::Number(-value.to_number()),
                    UnaryOp::Plus => Operand::Number(value.to_number()),
                })
            }
            Expr::Binary { op, left, right } => {
                let left = self.eval(left, ctx, steps)?;
                let right = self.eval(right, ctx, steps)?;
                Ok(apply_binary(*op, &left, &right))
            }
            Expr::Logical { op, left, right } => {
                let left = self.eval(left, ctx, steps)?;
                match (op, left.truthy()) {
                    (LogicalOp::And, false) | (LogicalOp::Or, true) => Ok(left),
                    _ => self.eval(right, ctx, steps),
                }
            }
            Expr::Conditional {
                test,
                consequent,
                alternate,
            } => {
                if self.eval(test, ctx, steps)?.truthy() {
                    self.eval(consequent, ctx, steps)
                } else {
                    self.eval(alternate, ctx, steps)
                }
            }
            Expr::Call { function, args } => {
                let args = args
                    .iter()
                    .map(|arg| self.eval(arg, ctx, steps))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(self.call(*function, &args))
            }
            Expr::Length(target) => Ok(self.eval(target, ctx, steps)?.length()),
            Expr::Includes { target, needle } => {
                let target = self.eval(target, ctx, steps)?;
                let needle = self.eval(needle, ctx, steps)?;
                target.includes(&needle).map(Operand::Bool).ok_or_else(|| {
                    ExprError::Type(format!(
                        "cannot call includes on {}",
                        target.to_display()
                    ))
                })
            }
        }
    }

    fn call(&self, function: Function, args: &[Operand]) -> Operand {
        let first = args.first().unwrap_or(&Operand::Undefined);
        let optional_int = |value: Option<i64>| {
            value
                .map(|value| Operand::Number(value as f64))
                .unwrap_or(Operand::Null)
        };
        match function {
            Function::Age => optional_int(dates::age(first, self.today)),
            Function::ParseDate => dates::parse_date(first)
                .map(Operand::Date)
                .unwrap_or(Operand::Null),
            Function::DiffDays => {
                let second = args.get(1).unwrap_or(&Operand::Undefined);
                optional_int(dates::diff_days(first, second))
            }
            Function::Round => Operand::Number(js_round(first.to_number())),
            Function::Floor => Operand::Number(first.to_number().floor()),
            Function::Ceil => Operand::Number(first.to_number().ceil()),
            Function::Abs => Operand::Number(first.to_number().abs()),
            Function::Min => Operand::Number(fold_numbers(args, f64::INFINITY, f64::min)),
            Function::Max => Operand::Number(fold_numbers(args, f64::NEG_INFINITY, f64::max)),
        }
    }
}

/// Evaluates with a default [`Evaluator`].
pub fn evaluate(formula: &str, ctx: &Context) -> Option<Value> {
    Evaluator::default().evaluate(formula, ctx)
}

/// Truthiness of an evaluation result; `None` is falsy.
pub fn is_truthy(value: Option<&Value>) -> bool {
    value
        .map(|value| Operand::from_value(value).truthy())
        .unwrap_or(false)
}

/// Whether a context key is shaped like a cell reference. Such keys are only reachable through substitution.
pub fn is_cell_reference(key: &str) -> bool {
    CELL_REFERENCE
        .find(key)
        .is_some_and(|found| found.start() == 0 && found.end() == key.len())
}

/// Inlines cell references that the context can resolve; unresolved references are left untouched.
pub fn substitute_cell_references(formula: &str, ctx: &Context) -> String {
    CELL_REFERENCE
        .replace_all(formula, |caps: &Captures<'_>| {
            let reference = &caps[0];
            match ctx.get(reference) {
                Some(Value::Number(number)) => number.to_string(),
                Some(Value::Null) | None => reference.to_string(),
                Some(Value::String(text)) => quote(text),
                Some(other) => quote(&other.to_string()),
            }
        })
        .into_owned()
}

fn quote(text: &str) -> String {
    serde_json::to_string(text).unwrap_or_else(|_| "null".to_string())
}

fn lookup(ctx: &Context, name: &str) -> Result<Operand, ExprError> {
    if is_cell_reference(name) {
        return Err(ExprError::UnknownIdentifier(name.to_string()));
    }
    ctx.get(name)
        .map(Operand::from_binding)
        .ok_or_else(|| ExprError::UnknownIdentifier(name.to_string()))
}

fn apply_binary(op: BinaryOp, left: &Operand, right: &Operand) -> Operand {
    match op {
        BinaryOp::Add => left.add(right),
        BinaryOp::Subtract => Operand::Number(left.to_number() - right.to_number()),
        BinaryOp::Multiply => Operand::Number(left.to_number() * right.to_number()),
        BinaryOp::Divide => Operand::Number(left.to_number() / right.to_number()),
        BinaryOp::Remainder => Operand::Number(left.to_number() % right.to_number()),
        BinaryOp::Equal => Operand::Bool(left.loose_eq(right)),
        BinaryOp::NotEqual => Operand::Bool(!left.loose_eq(right)),
        BinaryOp::StrictEqual => Operand::Bool(left.strict_eq(right)),
        BinaryOp::StrictNotEqual => Operand::Bool(!left.strict_eq(right)),
        BinaryOp::Less => Operand::Bool(left.compare(right).is_some_and(|o| o.is_lt())),
        BinaryOp::LessEqual => Operand::Bool(left.compare(right).is_some_and(|o| o.is_le())),
        BinaryOp::Greater => Operand::Bool(left.compare(right).is_some_and(|o| o.is_gt())),
        BinaryOp::GreaterEqual => Operand::Bool(left.compare(right).is_some_and(|o| o.is_ge())),
    }
}

/// `Math.round` rounds halves towards positive infinity.
fn js_round(value: f64) -> f64 {
    (value + 0.5).floor()
}

fn fold_numbers(args: &[Operand], init: f64, pick: fn(f64, f64) -> f64) -> f64 {
    let mut acc = init;
    for arg in args {
        let value = arg.to_number();
        if value.is_nan() {
            return f64::NAN;
        }
        acc = pick(acc, value);
    }
    acc
}
