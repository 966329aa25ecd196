//! Comparison factories.
//!
//! Results are numeric 0/1 values in the promoted element type. Comparisons
//! are non-differentiable by convention: their backward rule contributes
//! zero gradient, which is not an error. Either side may be a float
//! literal, promoted to a cached scalar constant.

use arbor_core::Result;

use crate::expr::Expr;
use crate::kind::{CmpOp, Kind};
use crate::ops::{binary, resolve_operands, Operand};

fn cmp<'a>(op: CmpOp, a: impl Into<Operand<'a>>, b: impl Into<Operand<'a>>) -> Result<Expr> {
    let (a, b) = resolve_operands(a.into(), b.into())?;
    binary(Kind::Cmp { op }, &a, &b)
}

/// Elementwise `a < b`.
pub fn lt<'a>(a: impl Into<Operand<'a>>, b: impl Into<Operand<'a>>) -> Result<Expr> {
    cmp(CmpOp::Lt, a, b)
}

/// Elementwise `a <= b`.
pub fn le<'a>(a: impl Into<Operand<'a>>, b: impl Into<Operand<'a>>) -> Result<Expr> {
    cmp(CmpOp::Le, a, b)
}

/// Elementwise `a > b`.
pub fn gt<'a>(a: impl Into<Operand<'a>>, b: impl Into<Operand<'a>>) -> Result<Expr> {
    cmp(CmpOp::Gt, a, b)
}

/// Elementwise `a >= b`.
pub fn ge<'a>(a: impl Into<Operand<'a>>, b: impl Into<Operand<'a>>) -> Result<Expr> {
    cmp(CmpOp::Ge, a, b)
}

/// Elementwise `a == b`.
pub fn eq<'a>(a: impl Into<Operand<'a>>, b: impl Into<Operand<'a>>) -> Result<Expr> {
    cmp(CmpOp::Eq, a, b)
}

/// Elementwise `a != b`.
pub fn ne<'a>(a: impl Into<Operand<'a>>, b: impl Into<Operand<'a>>) -> Result<Expr> {
    cmp(CmpOp::Ne, a, b)
}
