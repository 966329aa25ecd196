//! Arithmetic factories: `+ - * /`, negation, elementwise min/max, and the
//! scalar-literal sugar behind the operator overloads.

use arbor_core::{ArborError, Result};

use crate::expr::Expr;
use crate::kind::Kind;
use crate::ops::{binary, resolve_operands, unary_float, Operand};

/// Elementwise `a + b` with broadcasting.
pub fn add(a: &Expr, b: &Expr) -> Result<Expr> {
    binary(Kind::Add, a, b)
}

/// Elementwise `a - b` with broadcasting.
pub fn sub(a: &Expr, b: &Expr) -> Result<Expr> {
    binary(Kind::Sub, a, b)
}

/// Elementwise `a * b` with broadcasting.
pub fn mul(a: &Expr, b: &Expr) -> Result<Expr> {
    binary(Kind::Mul, a, b)
}

/// Elementwise `a / b` with broadcasting.
pub fn div(a: &Expr, b: &Expr) -> Result<Expr> {
    binary(Kind::Div, a, b)
}

/// Elementwise negation.
pub fn neg(a: &Expr) -> Result<Expr> {
    unary_float(Kind::Neg, a)
}

/// `a + v`, promoting the literal to a cached scalar constant.
pub fn add_value(a: &Expr, v: f32) -> Result<Expr> {
    let scalar = a.graph()?.scalar(v, a.dtype());
    add(a, &scalar)
}

/// `v - a`, promoting the literal to a cached scalar constant.
pub fn value_sub(v: f32, a: &Expr) -> Result<Expr> {
    let scalar = a.graph()?.scalar(v, a.dtype());
    sub(&scalar, a)
}

/// `a * v`, promoting the literal to a cached scalar constant.
pub fn mul_value(a: &Expr, v: f32) -> Result<Expr> {
    let scalar = a.graph()?.scalar(v, a.dtype());
    mul(a, &scalar)
}

/// `v / a`, promoting the literal to a cached scalar constant.
pub fn value_div(v: f32, a: &Expr) -> Result<Expr> {
    let scalar = a.graph()?.scalar(v, a.dtype());
    div(&scalar, a)
}

/// Elementwise maximum; either side may be a float literal.
pub fn maximum<'a>(a: impl Into<Operand<'a>>, b: impl Into<Operand<'a>>) -> Result<Expr> {
    let (a, b) = resolve_operands(a.into(), b.into())?;
    binary(Kind::Maximum, &a, &b)
}

/// Elementwise minimum; either side may be a float literal.
pub fn minimum<'a>(a: impl Into<Operand<'a>>, b: impl Into<Operand<'a>>) -> Result<Expr> {
    let (a, b) = resolve_operands(a.into(), b.into())?;
    binary(Kind::Minimum, &a, &b)
}

/// Sum of a non-empty list of expressions (the linear "activation").
pub fn plus(nodes: &[Expr]) -> Result<Expr> {
    let (first, rest) = nodes
        .split_first()
        .ok_or_else(|| ArborError::Storage("plus: empty expression list".into()))?;
    let mut acc = first.clone();
    for node in rest {
        acc = add(&acc, node)?;
    }
    Ok(acc)
}
