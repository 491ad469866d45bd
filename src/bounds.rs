//! Bound arithmetic for the Bleichenbacher search.
//!
//! Every division below is an explicit floor or ceiling. Swapping one for
//! the other either drops the plaintext from the interval set or stalls
//! the narrowing, so each formula names its rounding.

use std::convert::TryFrom;

use num_bigint::BigUint;
use num_traits::{One, Zero};

use crate::error::{AttackError, Result};
use crate::interval::Interval;
use crate::rsa::RsaKey;

/// Constants derived once from the public key `(n, e)`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModulusContext {
    n: BigUint,
    e: BigUint,
    k: usize,
    b: BigUint,
    two_b: BigUint,
    three_b: BigUint,
    three_b_minus_one: BigUint,
    b256: BigUint,
    window_depth: u64,
    initial: Interval,
}

impl ModulusContext {
    pub fn new(key: &dyn RsaKey) -> Result<Self> {
        let n = key.modulus().clone();
        let k = key.size_bytes();
        if k < 3 {
            return Err(AttackError::MalformedInput(format!(
                "modulus of {} bytes leaves no room for a 00 02 prefix",
                k
            )));
        }

        let b = BigUint::one() << (8 * (k - 2));
        let two_b = &b * 2u32;
        let three_b = &b * 3u32;
        let three_b_minus_one = &three_b - 1u32;
        let b256 = &b << 8;
        // Number of 256B windows below n; at least one since n >= 2^(8(k-1)).
        let window_depth = u64::try_from(&n / &b256).unwrap_or(u64::MAX).max(1);
        let initial = Interval::new(two_b.clone(), three_b_minus_one.clone()).ok_or_else(|| {
            AttackError::InvariantViolation("2B exceeds 3B - 1".to_string())
        })?;

        Ok(Self {
            n,
            e: key.pub_exp().clone(),
            k,
            b,
            two_b,
            three_b,
            three_b_minus_one,
            b256,
            window_depth,
            initial,
        })
    }

    pub fn n(&self) -> &BigUint {
        &self.n
    }

    pub fn e(&self) -> &BigUint {
        &self.e
    }

    /// Modulus length in bytes.
    pub fn k(&self) -> usize {
        self.k
    }

    pub fn b(&self) -> &BigUint {
        &self.b
    }

    pub fn two_b(&self) -> &BigUint {
        &self.two_b
    }

    pub fn three_b(&self) -> &BigUint {
        &self.three_b
    }

    pub fn b256(&self) -> &BigUint {
        &self.b256
    }

    pub fn window_depth(&self) -> u64 {
        self.window_depth
    }

    /// `M_0 = {[2B, 3B - 1]}`.
    pub fn initial_interval(&self) -> Interval {
        self.initial.clone()
    }
}

/// `floor((a + b - 1) / b)`.
pub fn ceil_div(a: &BigUint, b: &BigUint) -> BigUint {
    (a + b - 1u32) / b
}

pub fn floor_div(a: &BigUint, b: &BigUint) -> BigUint {
    a / b
}

/// Step 2a: the first multiplier that can wrap `[2B, 3B)` past `n`, `ceil(n / 3B)`.
pub fn step2a_start(ctx: &ModulusContext) -> BigUint {
    ceil_div(&ctx.n, &ctx.three_b)
}

/// Step 2c: first window index, `ceil(2 (b s_prev - 2B) / n)`.
pub fn step2c_r_start(ctx: &ModulusContext, interval: &Interval, s_prev: &BigUint) -> BigUint {
    let bs = interval.upper() * s_prev;
    if bs <= ctx.two_b {
        return BigUint::zero();
    }
    ceil_div(&((bs - &ctx.two_b) * 2u32), &ctx.n)
}

/// Step 2c: multipliers for window `r`,
/// `[ceil((2B + rn) / b), floor((3B - 1 + rn) / a)]`, or `None` when empty.
pub fn step2c_s_range(ctx: &ModulusContext, interval: &Interval, r: &BigUint) -> Option<Interval> {
    let rn = r * &ctx.n;
    let lower = ceil_div(&(&ctx.two_b + &rn), interval.upper());
    let upper = floor_div(&(&ctx.three_b_minus_one + &rn), interval.lower());
    Interval::new(lower, upper)
}

/// Step 2x: the first 256B window, `i = 1 ..= depth`, whose preimage under
/// `s` lies strictly inside `(prev_lower, prev_upper)`.
///
/// The window for `i` is `[floor((i 256B + 2B) / s), floor((i 256B + 3B) / s)]`.
pub fn step2x_window(
    ctx: &ModulusContext,
    s: &BigUint,
    prev_lower: &BigUint,
    prev_upper: &BigUint,
) -> Option<Interval> {
    if s.is_zero() {
        return None;
    }
    let mut base = ctx.b256.clone();
    for _ in 0..ctx.window_depth {
        let new_lower = floor_div(&(&base + &ctx.two_b), s);
        let new_upper = floor_div(&(&base + &ctx.three_b), s);
        if &new_lower > prev_lower && &new_upper < prev_upper {
            return Interval::new(new_lower, new_upper);
        }
        base += &ctx.b256;
    }
    None
}

/// Step 3: the sub-intervals of `interval` consistent with `m s mod n`
/// being PKCS conforming.
///
/// Enumerates `r` from `ceil((a s - 3B + 1) / n)` to `floor((b s - 2B) / n)`
/// and clips `[ceil((2B + rn) / s), floor((3B - 1 + rn) / s)]` to `[a, b]`.
pub fn narrow(ctx: &ModulusContext, interval: &Interval, s: &BigUint) -> Vec<Interval> {
    let a = interval.lower();
    let b = interval.upper();
    let mut result = vec![];
    if s.is_zero() {
        return result;
    }

    let a_s = a * s;
    // a s - 3B + 1 > -n, so a non-positive numerator rounds up to zero.
    let mut r = if a_s > ctx.three_b_minus_one {
        ceil_div(&(a_s - &ctx.three_b_minus_one), &ctx.n)
    } else {
        BigUint::zero()
    };
    let b_s = b * s;
    if b_s < ctx.two_b {
        return result;
    }
    let r_max = floor_div(&(b_s - &ctx.two_b), &ctx.n);

    while r <= r_max {
        let rn = &r * &ctx.n;
        let lower = ceil_div(&(&ctx.two_b + &rn), s).max(a.clone());
        let upper = floor_div(&(&ctx.three_b_minus_one + &rn), s).min(b.clone());
        log::trace!("r = {:x}: [{:x}, {:x}]", r, lower, upper);
        if let Some(candidate) = Interval::new(lower, upper) {
            result.push(candidate);
        }
        r += 1u32;
    }
    result
}
