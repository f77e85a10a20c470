use crate::ast::Tag;
use rust_decimal::{prelude::ToPrimitive, Decimal, MathematicalOps};
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithmeticError {
    #[error("division by zero")]
    DivisionByZero,
    #[error("result out of range")]
    Overflow,
    #[error("no real result")]
    NotReal,
    #[error("not an arithmetic operator")]
    NotArithmetic,
}

pub fn parse(text: &str) -> Option<Decimal> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if text.contains(|ch: char| ch == 'e' || ch == 'E') {
        return Decimal::from_scientific(text).ok();
    }
    Decimal::from_str(text)
        .ok()
        .or_else(|| Decimal::from_str(&format!("0{}", text)).ok())
}

/// Canonical text for a number: no trailing zeros after the point.
pub fn format(value: Decimal) -> String {
    value.normalize().to_string()
}

pub fn apply(tag: Tag, left: Decimal, right: Decimal) -> Result<Decimal, ArithmeticError> {
    match tag {
        Tag::Add => left.checked_add(right).ok_or(ArithmeticError::Overflow),
        Tag::Sub => left.checked_sub(right).ok_or(ArithmeticError::Overflow),
        Tag::Mul => left.checked_mul(right).ok_or(ArithmeticError::Overflow),
        Tag::Div if right.is_zero() => Err(ArithmeticError::DivisionByZero),
        Tag::Div => left.checked_div(right).ok_or(ArithmeticError::Overflow),
        Tag::Mod if right.is_zero() => Err(ArithmeticError::DivisionByZero),
        Tag::Mod => left.checked_rem(right).ok_or(ArithmeticError::Overflow),
        Tag::Pow => power(left, right),
        Tag::Min => Ok(left.min(right)),
        Tag::Max => Ok(left.max(right)),
        _ => Err(ArithmeticError::NotArithmetic),
    }
}

/// Compares two numbers; `None` when `tag` is not a comparison.
pub fn compare(tag: Tag, left: Decimal, right: Decimal) -> Option<bool> {
    match tag {
        Tag::Eq => Some(left == right),
        Tag::Ne => Some(left != right),
        Tag::Lt => Some(left < right),
        Tag::Gt => Some(left > right),
        Tag::Le => Some(left <= right),
        Tag::Ge => Some(left >= right),
        _ => None,
    }
}

fn power(base: Decimal, exponent: Decimal) -> Result<Decimal, ArithmeticError> {
    if base.is_zero() && exponent.is_sign_negative() && !exponent.is_zero() {
        return Err(ArithmeticError::DivisionByZero);
    }
    if base.is_sign_negative() && !base.is_zero() && !exponent.fract().is_zero() {
        return Err(ArithmeticError::NotReal);
    }
    let result = match exponent.fract().is_zero().then(|| exponent.to_i64()).flatten() {
        Some(exponent) if exponent < 0 => base
            .checked_powi(-exponent)
            .and_then(|denominator| Decimal::ONE.checked_div(denominator)),
        Some(exponent) => base.checked_powi(exponent),
        None => base.checked_powd(exponent),
    };
    result.ok_or(ArithmeticError::Overflow)
}
