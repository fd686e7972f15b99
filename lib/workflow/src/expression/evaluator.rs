//! Expression evaluation.

use super::parser::{Builtin, CompareOp, Expr, parse};
use super::{ExpressionContext, ExpressionError};
use crate::execution::JobStatus;
use regex::{Captures, Regex};
use std::cmp::Ordering;
use std::sync::LazyLock;

static INTERPOLATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{\{\s*([^}]+)\s*\}\}").expect("interpolation pattern is valid")
});

/// Removes an optional `${{ }}` wrapper and surrounding whitespace.
fn unwrap_expression(expression: &str) -> &str {
    let trimmed = expression.trim();
    trimmed
        .strip_prefix("${{")
        .and_then(|rest| rest.strip_suffix("}}"))
        .unwrap_or(trimmed)
        .trim()
}

/// Evaluates a guard expression to a boolean. Empty expressions are true.
///
/// # Errors
///
/// Returns an error if the expression does not parse.
pub fn evaluate(expression: &str, ctx: &ExpressionContext) -> Result<bool, ExpressionError> {
    let expr = unwrap_expression(expression);
    if expr.is_empty() {
        return Ok(true);
    }
    Ok(truth(&parse(expr)?, ctx))
}

/// Evaluates an expression to text.
///
/// A bare path that resolves yields its raw value; anything else yields
/// `"true"` or `"false"`. Empty expressions yield an empty string.
///
/// # Errors
///
/// Returns an error if the expression does not parse.
pub fn evaluate_to_string(
    expression: &str,
    ctx: &ExpressionContext,
) -> Result<String, ExpressionError> {
    let expr = unwrap_expression(expression);
    if expr.is_empty() {
        return Ok(String::new());
    }
    let parsed = parse(expr)?;
    if let Expr::Path(path) = &parsed
        && let Some(value) = ctx.resolve(path)
    {
        return Ok(value.to_string());
    }
    Ok(truth(&parsed, ctx).to_string())
}

/// Replaces every `${{ ... }}` span in `text` with its string value.
///
/// A span whose expression fails to parse is kept verbatim, braces
/// included, rather than rendered as `"false"`, so a typo stays visible
/// in the instruction that reaches the executor.
#[must_use]
pub fn interpolate(text: &str, ctx: &ExpressionContext) -> String {
    INTERPOLATION
        .replace_all(text, |caps: &Captures<'_>| {
            evaluate_to_string(caps[1].trim(), ctx).unwrap_or_else(|_| caps[0].to_string())
        })
        .into_owned()
}

fn is_truthy(value: &str) -> bool {
    let lower = value.to_lowercase();
    !matches!(lower.as_str(), "false" | "0" | "" | "null" | "none")
}

fn builtin(builtin: Builtin, ctx: &ExpressionContext) -> bool {
    let mut statuses = ctx.job_statuses();
    match builtin {
        Builtin::Success => statuses.all(|s| s.satisfies_dependents()),
        Builtin::Failure => statuses.any(|s| s == JobStatus::Failed),
        Builtin::Always => true,
        Builtin::Cancelled => statuses.any(|s| s == JobStatus::Cancelled),
    }
}

fn truth(expr: &Expr, ctx: &ExpressionContext) -> bool {
    match expr {
        Expr::Or(left, right) => truth(left, ctx) || truth(right, ctx),
        Expr::And(left, right) => truth(left, ctx) && truth(right, ctx),
        Expr::Compare { left, op, right } => compare(&operand(left, ctx), *op, &operand(right, ctx)),
        Expr::Not(inner) => !truth(inner, ctx),
        Expr::Bool(b) => *b,
        Expr::Call(b) => builtin(*b, ctx),
        Expr::Path(path) => ctx.resolve(path).is_some_and(is_truthy),
        // Literals only carry meaning as comparison operands.
        Expr::Str(_) | Expr::Number(_) => false,
    }
}

/// The text an expression contributes to a comparison.
///
/// Paths that do not resolve stand for themselves, so `status == done`
/// compares against the word `done`.
fn operand(expr: &Expr, ctx: &ExpressionContext) -> String {
    match expr {
        Expr::Str(text) | Expr::Number(text) => text.clone(),
        Expr::Path(path) => ctx.resolve(path).unwrap_or(path).to_string(),
        other => truth(other, ctx).to_string(),
    }
}

fn compare(left: &str, op: CompareOp, right: &str) -> bool {
    let ordering = match op {
        CompareOp::Eq => return left == right,
        CompareOp::Ne => return left != right,
        _ => match (left.parse::<f64>(), right.parse::<f64>()) {
            (Ok(l), Ok(r)) => l.partial_cmp(&r),
            _ => Some(left.cmp(right)),
        },
    };
    let Some(ordering) = ordering else {
        return false;
    };
    match op {
        CompareOp::Lt => ordering == Ordering::Less,
        CompareOp::Le => ordering != Ordering::Greater,
        CompareOp::Gt => ordering == Ordering::Greater,
        CompareOp::Ge => ordering != Ordering::Less,
        CompareOp::Eq | CompareOp::Ne => false,
    }
}
