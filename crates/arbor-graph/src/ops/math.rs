//! Mathematical factories: exponentials, logarithms, trigonometry, roots.

use arbor_core::Result;

use crate::expr::Expr;
use crate::kind::Kind;
use crate::ops::{arithmetic, unary_float};

/// Elementwise natural logarithm.
pub fn log(a: &Expr) -> Result<Expr> {
    unary_float(Kind::Log, a)
}

/// Elementwise natural exponential.
pub fn exp(a: &Expr) -> Result<Expr> {
    unary_float(Kind::Exp, a)
}

pub fn sin(a: &Expr) -> Result<Expr> {
    unary_float(Kind::Sin, a)
}

pub fn cos(a: &Expr) -> Result<Expr> {
    unary_float(Kind::Cos, a)
}

pub fn tan(a: &Expr) -> Result<Expr> {
    unary_float(Kind::Tan, a)
}

/// Elementwise `sqrt(a + eps)`. The epsilon is added before the root to
/// avoid a domain error at zero; the backward rule divides by
/// `2 * sqrt(a + eps)` accordingly.
pub fn sqrt(a: &Expr, eps: f32) -> Result<Expr> {
    unary_float(Kind::Sqrt { eps }, a)
}

/// Elementwise square, built as `a * a` (both gradient paths accumulate).
pub fn square(a: &Expr) -> Result<Expr> {
    arithmetic::mul(a, a)
}

/// Elementwise absolute value.
pub fn abs(a: &Expr) -> Result<Expr> {
    unary_float(Kind::Abs, a)
}

/// Numerically stable `log(exp(a) + exp(b))`, composed as
/// `m + log(exp(a - m) + exp(b - m))` with `m = maximum(a, b)`.
pub fn logaddexp(a: &Expr, b: &Expr) -> Result<Expr> {
    let m = arithmetic::maximum(a, b)?;
    let ea = exp(&arithmetic::sub(a, &m)?)?;
    let eb = exp(&arithmetic::sub(b, &m)?)?;
    arithmetic::add(&m, &log(&arithmetic::add(&ea, &eb)?)?)
}
