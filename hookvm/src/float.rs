// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The hook decimal float: a signed 64-bit encoding of a decimal number,
//! arithmetic-compatible with the ledger's issued-asset amounts.
//!
//! Layout, from the top bit down: one unused bit, the sign bit (set means
//! positive), an 8-bit exponent stored with a bias of 97, and a 54-bit
//! mantissa. A non-zero value is canonical: mantissa in
//! `[10^15, 10^16 - 1]`, exponent in `[-96, 80]`. Zero is the single
//! all-zero word.

use hookvm_abi::{compare_mode, ReturnCode};

pub const MIN_MANTISSA: u64 = 1_000_000_000_000_000;
pub const MAX_MANTISSA: u64 = 9_999_999_999_999_999;
pub const MIN_EXPONENT: i32 = -96;
pub const MAX_EXPONENT: i32 = 80;

const EXPONENT_BIAS: i32 = 97;
const SIGN_BIT: u64 = 1 << 62;
const MANTISSA_MASK: u64 = (1 << 54) - 1;

/// Exponent of a non-zero encoding. The caller has validated `f`.
pub fn exponent(f: i64) -> i32 {
    (((f as u64) >> 54) & 0xFF) as i32 - EXPONENT_BIAS
}

/// Mantissa of a non-zero encoding. The caller has validated `f`.
pub fn mantissa(f: i64) -> u64 {
    f as u64 & MANTISSA_MASK
}

/// The sign convention: a clear bit 62 means negative. The zero encoding
/// reads as negative here; callers special-case zero first.
pub fn is_negative(f: i64) -> bool {
    f as u64 & SIGN_BIT == 0
}

fn invert_sign(f: i64) -> i64 {
    (f as u64 ^ SIGN_BIT) as i64
}

fn with_sign(f: i64, negative: bool) -> i64 {
    if is_negative(f) == negative {
        f
    } else {
        invert_sign(f)
    }
}

/// Reject ill-formed encodings: negative words, and non-zero words whose
/// mantissa or exponent fall outside the canonical ranges.
pub fn require_valid(f: i64) -> Result<(), ReturnCode> {
    if f < 0 {
        return Err(ReturnCode::InvalidFloat);
    }
    if f != 0 {
        let m = mantissa(f);
        let e = exponent(f);
        if !(MIN_MANTISSA..=MAX_MANTISSA).contains(&m) || !(MIN_EXPONENT..=MAX_EXPONENT).contains(&e)
        {
            return Err(ReturnCode::InvalidFloat);
        }
    }
    Ok(())
}

/// Assemble an encoding from already-canonical parts.
fn make(m: u64, e: i32, negative: bool) -> Result<i64, ReturnCode> {
    if m == 0 {
        return Ok(0);
    }
    if m > MAX_MANTISSA {
        return Err(ReturnCode::MantissaOversized);
    }
    if e > MAX_EXPONENT {
        return Err(ReturnCode::ExponentOversized);
    }
    if e < MIN_EXPONENT {
        return Err(ReturnCode::ExponentUndersized);
    }
    let word = m | (((e + EXPONENT_BIAS) as u64) << 54);
    Ok(with_sign(word as i64, negative))
}

/// Normalize `(mantissa, exponent)` into the canonical ranges and encode.
/// Exponent underflow and overflow both yield `InvalidFloat`.
pub fn set(mut exp: i32, mantissa: i64) -> Result<i64, ReturnCode> {
    if mantissa == 0 {
        return Ok(0);
    }
    let negative = mantissa < 0;
    let mut m = mantissa.unsigned_abs();

    while m < MIN_MANTISSA {
        m *= 10;
        exp -= 1;
        if exp < MIN_EXPONENT {
            return Err(ReturnCode::InvalidFloat);
        }
    }
    while m > MAX_MANTISSA {
        m /= 10;
        exp += 1;
        if exp > MAX_EXPONENT {
            return Err(ReturnCode::InvalidFloat);
        }
    }

    make(m, exp, negative)
}

/// Normalize a signed mantissa the way the ledger's issued-amount
/// arithmetic does: truncating division, zero below the smallest
/// representable value, `Overflow` past the largest exponent.
fn normalize(m: i64, mut exp: i32) -> Result<i64, ReturnCode> {
    if m == 0 {
        return Ok(0);
    }
    let negative = m < 0;
    let mut m = m.unsigned_abs();

    while m < MIN_MANTISSA {
        m *= 10;
        exp -= 1;
    }
    while m > MAX_MANTISSA {
        m /= 10;
        exp += 1;
    }
    if exp > MAX_EXPONENT {
        return Err(ReturnCode::Overflow);
    }
    if exp < MIN_EXPONENT {
        return Ok(0);
    }
    make(m, exp, negative)
}

fn signed_mantissa(f: i64) -> i64 {
    let m = mantissa(f) as i64;
    if is_negative(f) {
        -m
    } else {
        m
    }
}

/// `1.0`.
pub fn one() -> i64 {
    // 10^15 * 10^-15, already canonical
    make(MIN_MANTISSA, -15, false).expect("one is canonical")
}

pub fn negate(f: i64) -> Result<i64, ReturnCode> {
    if f == 0 {
        return Ok(0);
    }
    require_valid(f)?;
    Ok(invert_sign(f))
}

/// 128-bit widening product of the mantissas, divided back down into the
/// canonical range.
pub fn multiply(f1: i64, f2: i64) -> Result<i64, ReturnCode> {
    require_valid(f1)?;
    require_valid(f2)?;
    if f1 == 0 || f2 == 0 {
        return Ok(0);
    }

    let mut exp = exponent(f1) + exponent(f2);
    let mut product = mantissa(f1) as u128 * mantissa(f2) as u128;
    while product > MAX_MANTISSA as u128 {
        if exp > MAX_EXPONENT {
            return Err(ReturnCode::Overflow);
        }
        product /= 10;
        exp += 1;
    }
    let negative = is_negative(f1) != is_negative(f2);

    match set(exp, product as i64) {
        Ok(out) => Ok(with_sign(out, negative)),
        Err(_) => Err(ReturnCode::InvalidFloat),
    }
}

/// Multiply by `numerator / denominator` with directed rounding on the
/// 128-bit intermediate; `round_up` rounds the magnitude away from zero.
pub fn mulratio(f1: i64, round_up: bool, numerator: u32, denominator: u32) -> Result<i64, ReturnCode> {
    require_valid(f1)?;
    if f1 == 0 {
        return Ok(0);
    }
    if denominator == 0 {
        return Err(ReturnCode::DivisionByZero);
    }

    let den = denominator as u128;
    let scaled = mantissa(f1) as u128 * numerator as u128;
    let mut m = if round_up {
        (scaled + den - 1) / den
    } else {
        scaled / den
    };

    let mut exp = exponent(f1);
    while m > MAX_MANTISSA as u128 {
        if exp > MAX_EXPONENT {
            return Err(ReturnCode::Overflow);
        }
        m = if round_up { (m + 9) / 10 } else { m / 10 };
        exp += 1;
    }

    let negative = is_negative(f1);
    match set(exp, m as i64) {
        Ok(out) => Ok(with_sign(out, negative)),
        Err(e) => Err(e),
    }
}

/// Addition through the ledger's issued-amount rules: align exponents by
/// truncating the lower-exponent mantissa, collapse `|m| <= 10` to zero,
/// then renormalize.
pub fn sum(f1: i64, f2: i64) -> Result<i64, ReturnCode> {
    require_valid(f1)?;
    require_valid(f2)?;
    if f1 == 0 {
        return Ok(f2);
    }
    if f2 == 0 {
        return Ok(f1);
    }

    let mut m1 = signed_mantissa(f1);
    let mut e1 = exponent(f1);
    let mut m2 = signed_mantissa(f2);
    let mut e2 = exponent(f2);

    while e1 < e2 {
        m1 /= 10;
        e1 += 1;
    }
    while e2 < e1 {
        m2 /= 10;
        e2 += 1;
    }

    let m = m1 + m2;
    if (-10..=10).contains(&m) {
        return Ok(0);
    }
    normalize(m, e1)
}

/// Mantissa long division, digit by digit.
pub fn divide(f1: i64, f2: i64) -> Result<i64, ReturnCode> {
    require_valid(f1)?;
    require_valid(f2)?;
    if f2 == 0 {
        return Err(ReturnCode::DivisionByZero);
    }
    if f1 == 0 {
        return Ok(0);
    }

    let mut man1 = mantissa(f1);
    let exp1 = exponent(f1);
    let mut man2 = mantissa(f2);
    let mut exp2 = exponent(f2);

    // scale the divisor to just below the dividend
    while man2 > man1 {
        man2 /= 10;
        exp2 += 1;
    }
    if man2 == 0 {
        return Err(ReturnCode::DivisionByZero);
    }
    while man2 < man1 {
        if man2 * 10 > man1 {
            break;
        }
        man2 *= 10;
        exp2 -= 1;
    }

    let mut man3: u64 = 0;
    let mut exp3 = exp1 - exp2;
    while man2 > 0 {
        let mut digit = 0;
        while man1 >= man2 {
            man1 -= man2;
            digit += 1;
        }
        man3 = man3 * 10 + digit;
        man2 /= 10;
        if man2 == 0 {
            break;
        }
        exp3 -= 1;
    }

    while man3 < MIN_MANTISSA {
        man3 *= 10;
        exp3 -= 1;
        if exp3 < MIN_EXPONENT {
            return Ok(0);
        }
    }
    while man3 > MAX_MANTISSA {
        man3 /= 10;
        exp3 += 1;
        if exp3 > MAX_EXPONENT {
            return Err(ReturnCode::InvalidFloat);
        }
    }

    let negative = is_negative(f1) != is_negative(f2);
    make(man3, exp3, negative)
}

pub fn invert(f: i64) -> Result<i64, ReturnCode> {
    if f == 0 {
        return Err(ReturnCode::DivisionByZero);
    }
    divide(one(), f)
}

/// Compare under a bitfield mode. `LESS | GREATER` means "not equal"; all
/// three bits together, or none, is invalid.
pub fn compare(f1: i64, f2: i64, mode: u32) -> Result<i64, ReturnCode> {
    require_valid(f1)?;
    require_valid(f2)?;

    let equal = mode & compare_mode::EQUAL != 0;
    let less = mode & compare_mode::LESS != 0;
    let greater = mode & compare_mode::GREATER != 0;

    if (equal && less && greater) || mode == 0 {
        return Err(ReturnCode::InvalidArgument);
    }

    let ord = value_cmp(f1, f2);
    let hit = (less && greater && ord != std::cmp::Ordering::Equal)
        || (equal && ord == std::cmp::Ordering::Equal)
        || (!(less && greater) && greater && ord == std::cmp::Ordering::Greater)
        || (!(less && greater) && less && ord == std::cmp::Ordering::Less);

    Ok(hit as i64)
}

fn value_cmp(f1: i64, f2: i64) -> std::cmp::Ordering {
    use std::cmp::Ordering;

    let class = |f: i64| -> i8 {
        if f == 0 {
            0
        } else if is_negative(f) {
            -1
        } else {
            1
        }
    };
    let c1 = class(f1);
    let c2 = class(f2);
    if c1 != c2 {
        return c1.cmp(&c2);
    }
    if c1 == 0 {
        return Ordering::Equal;
    }

    // same sign, both canonical: exponent dominates, mantissa breaks ties
    let magnitude = (exponent(f1), mantissa(f1)).cmp(&(exponent(f2), mantissa(f2)));
    if c1 > 0 {
        magnitude
    } else {
        magnitude.reverse()
    }
}

/// Mantissa after rescaling to exponent -6. The `decimal_places` argument
/// is accepted for ABI compatibility and currently unused.
pub fn int(f: i64, _decimal_places: u32, absolute: bool) -> Result<i64, ReturnCode> {
    require_valid(f)?;
    if f == 0 {
        return Ok(0);
    }

    if is_negative(f) && !absolute {
        return Err(ReturnCode::CantReturnNegative);
    }

    let mut m = mantissa(f);
    let mut e = exponent(f);
    while e > -6 {
        m = m.checked_mul(10).ok_or(ReturnCode::InvalidFloat)?;
        e -= 1;
    }
    while e < -6 {
        m /= 10;
        e += 1;
    }
    if m > i64::MAX as u64 {
        return Err(ReturnCode::InvalidFloat);
    }
    Ok(m as i64)
}

pub fn exponent_checked(f: i64) -> Result<i64, ReturnCode> {
    require_valid(f)?;
    if f == 0 {
        return Ok(0);
    }
    Ok(exponent(f) as i64)
}

pub fn mantissa_checked(f: i64) -> Result<i64, ReturnCode> {
    require_valid(f)?;
    if f == 0 {
        return Ok(0);
    }
    Ok(mantissa(f) as i64)
}

pub fn sign_checked(f: i64) -> Result<i64, ReturnCode> {
    require_valid(f)?;
    if f == 0 {
        return Ok(0);
    }
    Ok(is_negative(f) as i64)
}

pub fn exponent_set(f: i64, exp: i32) -> Result<i64, ReturnCode> {
    require_valid(f)?;
    if f == 0 {
        return Ok(0);
    }
    make(mantissa(f), exp, is_negative(f))
}

pub fn mantissa_set(f: i64, m: i64) -> Result<i64, ReturnCode> {
    require_valid(f)?;
    if m == 0 {
        return Ok(0);
    }
    if m < 0 || m as u64 > MAX_MANTISSA {
        return Err(ReturnCode::MantissaOversized);
    }
    make(m as u64, exponent(f), is_negative(f))
}

pub fn sign_set(f: i64, negative: bool) -> Result<i64, ReturnCode> {
    require_valid(f)?;
    if f == 0 {
        return Ok(0);
    }
    Ok(with_sign(f, negative))
}

/// Serialized amount forms for [`sto_bytes`].
pub enum StoForm {
    /// 8-byte native (drops) value, no header.
    Native,
    /// 8-byte issued value, no header, no currency or issuer.
    Short,
    /// Header for `field_id`, 8-byte issued value, 20-byte currency,
    /// 20-byte issuer.
    Issued {
        field_id: u32,
        currency: [u8; 20],
        issuer: [u8; 20],
    },
}

/// Encode a float as a serialized amount.
pub fn sto_bytes(f: i64, form: &StoForm) -> Result<Vec<u8>, ReturnCode> {
    require_valid(f)?;

    let mut out = Vec::with_capacity(51);
    if let StoForm::Issued { field_id, .. } = form {
        let ty = (field_id >> 16) as u16;
        let field = (field_id & 0xFFFF) as u16;
        match (ty < 16, field < 16) {
            (true, true) => out.push(((ty as u8) << 4) | field as u8),
            (true, false) => {
                out.push((ty as u8) << 4);
                out.push(field as u8);
            }
            (false, true) => {
                out.push((field as u8) << 4);
                out.push(ty as u8);
            }
            (false, false) => {
                out.push(0);
                out.push(ty as u8);
                out.push(field as u8);
            }
        }
    }

    let negative = f != 0 && is_negative(f);
    let mut value = [0u8; 8];
    match form {
        StoForm::Native => {
            // rescale to drops (exponent -6)
            let (mut m, mut e) = if f == 0 { (0, -6) } else { (mantissa(f), exponent(f)) };
            while e < -6 {
                m /= 10;
                e += 1;
            }
            while e > -6 {
                m = m.checked_mul(10).ok_or(ReturnCode::InvalidFloat)?;
                e -= 1;
            }
            if m >> 62 != 0 {
                return Err(ReturnCode::InvalidFloat);
            }
            let word = m | if negative { 0 } else { 1 << 62 };
            value.copy_from_slice(&word.to_be_bytes());
        }
        StoForm::Short | StoForm::Issued { .. } => {
            if f != 0 {
                let exp = (exponent(f) + EXPONENT_BIAS) as u64;
                let word = (1 << 63)
                    | if negative { 0 } else { 1 << 62 }
                    | (exp << 54)
                    | mantissa(f);
                value.copy_from_slice(&word.to_be_bytes());
            } else {
                value[0] = 0b1100_0000;
            }
        }
    }
    out.extend_from_slice(&value);

    if let StoForm::Issued { currency, issuer, .. } = form {
        out.extend_from_slice(currency);
        out.extend_from_slice(issuer);
    }
    Ok(out)
}

/// Decode a serialized amount (optionally still wrapped in its field
/// header) back into a float.
pub fn sto_set(buf: &[u8]) -> Result<i64, ReturnCode> {
    if buf.len() < 8 {
        return Err(ReturnCode::NotAnObject);
    }

    let mut at = 0;
    if buf.len() > 8 {
        let high = buf[0] >> 4;
        let low = buf[0] & 0xF;
        at = if high == 0 && low == 0 {
            if buf.len() < 11 {
                return Err(ReturnCode::NotAnObject);
            }
            3
        } else if high == 0 || low == 0 {
            if buf.len() < 10 {
                return Err(ReturnCode::NotAnObject);
            }
            2
        } else {
            1
        };
    }

    let word = u64::from_be_bytes(buf[at..at + 8].try_into().expect("8 bytes checked"));
    if word >> 63 == 0 {
        // native form: bit 62 is the sign, the rest is drops
        let negative = word >> 62 & 1 == 0;
        let drops = (word & ((1 << 62) - 1)) as i64;
        return set(-6, if negative { -drops } else { drops });
    }

    let negative = word >> 62 & 1 == 0;
    let exp = ((word >> 54) & 0xFF) as i32 - EXPONENT_BIAS;
    let m = (word & MANTISSA_MASK) as i64;
    if m == 0 {
        return Ok(0);
    }
    set(exp, if negative { -m } else { m })
}
