use num_bigint::BigUint;

use crate::bounds::ModulusContext;
use crate::error::{AttackError, Result};

/// Big-endian encoding of `value` in exactly `size` bytes, left padded with zeros.
pub fn to_block(value: &BigUint, size: usize) -> Result<Vec<u8>> {
    let bytes = value.to_bytes_be();
    if bytes.len() > size {
        return Err(AttackError::InvariantViolation(format!(
            "{} byte value does not fit a {} byte block",
            bytes.len(),
            size
        )));
    }
    let mut block = vec![0u8; size - bytes.len()];
    block.extend_from_slice(&bytes);
    Ok(block)
}

/// Multiplier as seen by the oracle: `s^e mod n`, or `s` itself for an
/// oracle that works on plaintexts.
pub fn blinding_factor(ctx: &ModulusContext, plaintext_oracle: bool, s: &BigUint) -> BigUint {
    if plaintext_oracle {
        s.clone()
    } else {
        s.modpow(ctx.e(), ctx.n())
    }
}

/// Candidate `original * s^e mod n` (or `original * s mod n`) serialized to
/// the oracle's block size.
pub fn prepare(
    ctx: &ModulusContext,
    plaintext_oracle: bool,
    original: &BigUint,
    s: &BigUint,
) -> Result<Vec<u8>> {
    let candidate = (original * blinding_factor(ctx, plaintext_oracle, s)) % ctx.n();
    to_block(&candidate, ctx.k())
}
