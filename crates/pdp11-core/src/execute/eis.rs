//! Extended instruction set arithmetic: MUL, DIV, ASH, ASHC.
//!
//! Register pairs follow the hardware: an even register names the high
//! word and its odd partner the low word; with an odd register both halves
//! land in the same register and the low half wins.

use super::flags::Flags;

/// Result of an EIS operation: `high` goes to the named register and `low`
/// to its odd partner, `None` leaving the register untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EisResult {
    pub high: Option<u16>,
    pub low: Option<u16>,
    pub flags: Flags,
}

/// Sign-extends the 6-bit shift count of ASH and ASHC.
const fn shift_count(src: u16) -> i32 {
    let count = (src & 0o77) as i32;
    if count >= 32 {
        count - 64
    } else {
        count
    }
}

pub fn mul(reg_value: u16, src: u16, even: bool) -> EisResult {
    let product = i32::from(reg_value as i16) * i32::from(src as i16);
    let word = product as u32;
    EisResult {
        high: even.then_some((word >> 16) as u16),
        low: Some(word as u16),
        flags: Flags {
            n: product < 0,
            z: product == 0,
            v: false,
            c: product < i32::from(i16::MIN) || product > i32::from(i16::MAX),
        },
    }
}

pub fn div(high: u16, low: u16, src: u16) -> EisResult {
    let dividend = ((u32::from(high) << 16) | u32::from(low)) as i32;
    let divisor = i32::from(src as i16);
    if divisor == 0 {
        return EisResult {
            high: None,
            low: None,
            flags: Flags {
                n: false,
                z: true,
                v: true,
                c: true,
            },
        };
    }
    if dividend == i32::MIN && divisor == -1 {
        return EisResult {
            high: None,
            low: None,
            flags: Flags {
                n: false,
                z: false,
                v: true,
                c: false,
            },
        };
    }
    let quotient = dividend / divisor;
    if quotient > i32::from(i16::MAX) || quotient < i32::from(i16::MIN) {
        return EisResult {
            high: None,
            low: None,
            flags: Flags {
                n: quotient < 0,
                z: false,
                v: true,
                c: false,
            },
        };
    }
    let remainder = dividend % divisor;
    EisResult {
        high: Some(quotient as u16),
        low: Some(remainder as u16),
        flags: Flags {
            n: quotient < 0,
            z: quotient == 0,
            v: false,
            c: false,
        },
    }
}

pub fn ash(value: u16, src: u16) -> EisResult {
    let count = shift_count(src);
    let signed = i64::from(value as i16);
    let (result, v, c) = if count == 0 {
        (value, false, false)
    } else if count > 0 {
        let shifted = signed << count;
        let carry = (u64::from(value) << count) >> 16 & 1 != 0;
        let overflow = shifted < i64::from(i16::MIN) || shifted > i64::from(i16::MAX);
        (shifted as u16, overflow, carry)
    } else {
        let right = -count;
        ((signed >> right) as u16, false, (signed >> (right - 1)) & 1 != 0)
    };
    EisResult {
        high: Some(result),
        low: None,
        flags: Flags {
            n: result & 0o100_000 != 0,
            z: result == 0,
            v,
            c,
        },
    }
}

pub fn ashc(high: u16, low: u16, src: u16) -> EisResult {
    let count = shift_count(src);
    let raw = (u32::from(high) << 16) | u32::from(low);
    let signed = i64::from(raw as i32);
    let (result, v, c) = if count == 0 {
        (raw, false, false)
    } else if count > 0 {
        let shifted = signed << count;
        let carry = (u64::from(raw) << count) >> 32 & 1 != 0;
        let overflow = shifted < i64::from(i32::MIN) || shifted > i64::from(i32::MAX);
        (shifted as u32, overflow, carry)
    } else {
        let right = -count;
        ((signed >> right) as u32, false, (signed >> (right - 1)) & 1 != 0)
    };
    EisResult {
        high: Some((result >> 16) as u16),
        low: Some(result as u16),
        flags: Flags {
            n: result & 0x8000_0000 != 0,
            z: result == 0,
            v,
            c,
        },
    }
}
