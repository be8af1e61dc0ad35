//! Condition-code arithmetic for the single and double operand groups.
//!
//! Every function takes operands already truncated to the operation width
//! and returns the truncated result together with the new N/Z/V/C.

use crate::memory::Width;
use crate::state::ProcessorStatus;

/// New condition codes of one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[allow(clippy::struct_excessive_bools)]
pub struct Flags {
    pub n: bool,
    pub z: bool,
    pub v: bool,
    pub c: bool,
}

impl Flags {
    pub const fn apply(self, psw: &mut ProcessorStatus) {
        psw.n = self.n;
        psw.z = self.z;
        psw.v = self.v;
        psw.c = self.c;
    }

    /// N and Z from `result`, V clear, C as given.
    const fn logical(width: Width, result: u16, c: bool) -> Self {
        Self {
            n: is_negative(width, result),
            z: result == 0,
            v: false,
            c,
        }
    }
}

pub const fn mask(width: Width) -> u16 {
    match width {
        Width::Word => 0o177_777,
        Width::Byte => 0o377,
    }
}

pub const fn sign_bit(width: Width) -> u16 {
    match width {
        Width::Word => 0o100_000,
        Width::Byte => 0o200,
    }
}

pub const fn is_negative(width: Width, value: u16) -> bool {
    value & sign_bit(width) != 0
}

/// Largest positive value of the width (`077777` or `0177`).
const fn max_positive(width: Width) -> u16 {
    sign_bit(width) - 1
}

pub const fn mov(width: Width, src: u16, c: bool) -> Flags {
    Flags::logical(width, src, c)
}

pub const fn add(width: Width, src: u16, dst: u16) -> (u16, Flags) {
    let sum = src as u32 + dst as u32;
    let result = sum as u16 & mask(width);
    let v = is_negative(width, !(src ^ dst) & (src ^ result));
    (
        result,
        Flags {
            n: is_negative(width, result),
            z: result == 0,
            v,
            c: sum > mask(width) as u32,
        },
    )
}

/// `dst - src`, as `SUB` computes it.
pub const fn sub(width: Width, src: u16, dst: u16) -> (u16, Flags) {
    let result = dst.wrapping_sub(src) & mask(width);
    let v = is_negative(width, (dst ^ src) & (!src ^ result));
    (
        result,
        Flags {
            n: is_negative(width, result),
            z: result == 0,
            v,
            c: dst < src,
        },
    )
}

/// `src - dst`, as `CMP` computes it.
pub const fn cmp(width: Width, src: u16, dst: u16) -> Flags {
    let result = src.wrapping_sub(dst) & mask(width);
    Flags {
        n: is_negative(width, result),
        z: result == 0,
        v: is_negative(width, (src ^ dst) & (!dst ^ result)),
        c: src < dst,
    }
}

pub const fn logical(width: Width, result: u16, c: bool) -> Flags {
    Flags::logical(width, result, c)
}

pub const fn clr() -> Flags {
    Flags {
        n: false,
        z: true,
        v: false,
        c: false,
    }
}

pub const fn com(width: Width, dst: u16) -> (u16, Flags) {
    let result = !dst & mask(width);
    (result, Flags::logical(width, result, true))
}

pub const fn inc(width: Width, dst: u16, c: bool) -> (u16, Flags) {
    let result = dst.wrapping_add(1) & mask(width);
    (
        result,
        Flags {
            n: is_negative(width, result),
            z: result == 0,
            v: result == sign_bit(width),
            c,
        },
    )
}

pub const fn dec(width: Width, dst: u16, c: bool) -> (u16, Flags) {
    let result = dst.wrapping_sub(1) & mask(width);
    (
        result,
        Flags {
            n: is_negative(width, result),
            z: result == 0,
            v: result == max_positive(width),
            c,
        },
    )
}

pub const fn neg(width: Width, dst: u16) -> (u16, Flags) {
    let result = dst.wrapping_neg() & mask(width);
    (
        result,
        Flags {
            n: is_negative(width, result),
            z: result == 0,
            v: result == sign_bit(width),
            c: result != 0,
        },
    )
}

pub const fn adc(width: Width, dst: u16, c: bool) -> (u16, Flags) {
    let result = dst.wrapping_add(c as u16) & mask(width);
    (
        result,
        Flags {
            n: is_negative(width, result),
            z: result == 0,
            v: c && result == sign_bit(width),
            c: c && result == 0,
        },
    )
}

pub const fn sbc(width: Width, dst: u16, c: bool) -> (u16, Flags) {
    let result = dst.wrapping_sub(c as u16) & mask(width);
    (
        result,
        Flags {
            n: is_negative(width, result),
            z: result == 0,
            v: c && result == max_positive(width),
            c: c && dst == 0,
        },
    )
}

pub const fn tst(width: Width, dst: u16) -> Flags {
    Flags::logical(width, dst, false)
}

/// Shift and rotate results share V = N xor C.
const fn shifted(width: Width, result: u16, c: bool) -> (u16, Flags) {
    let n = is_negative(width, result);
    (
        result,
        Flags {
            n,
            z: result == 0,
            v: n ^ c,
            c,
        },
    )
}

pub const fn ror(width: Width, dst: u16, c: bool) -> (u16, Flags) {
    let carry_in = if c { sign_bit(width) } else { 0 };
    shifted(width, (dst >> 1) | carry_in, dst & 1 != 0)
}

pub const fn rol(width: Width, dst: u16, c: bool) -> (u16, Flags) {
    let result = ((dst << 1) | c as u16) & mask(width);
    shifted(width, result, is_negative(width, dst))
}

pub const fn asr(width: Width, dst: u16) -> (u16, Flags) {
    let result = (dst >> 1) | (dst & sign_bit(width));
    shifted(width, result, dst & 1 != 0)
}

pub const fn asl(width: Width, dst: u16) -> (u16, Flags) {
    let result = (dst << 1) & mask(width);
    shifted(width, result, is_negative(width, dst))
}

pub const fn swab(dst: u16) -> (u16, Flags) {
    let result = dst.rotate_left(8);
    let low = result & 0o377;
    (
        result,
        Flags {
            n: low & 0o200 != 0,
            z: low == 0,
            v: false,
            c: false,
        },
    )
}
