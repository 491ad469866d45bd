use std::convert::TryFrom;

use anyhow::{ensure, Context, Result};
use num_bigint::{BigInt, BigUint, RandBigInt};
use num_bigint_dig::RandPrime;
use num_integer::Integer;
use num_traits::{One, Zero};
use rand_core::OsRng;

pub fn rand_bigint(limit: &BigUint) -> BigUint {
    OsRng.gen_biguint_range(&BigUint::zero(), limit)
}

/// Inverse of `value` modulo `modulo`, failing when they share a factor.
pub fn inv_mod(value: &BigUint, modulo: &BigUint) -> Result<BigUint> {
    ensure!(!modulo.is_zero(), "modulus must be non-zero");
    let value = BigInt::from(value.clone());
    let modulo = BigInt::from(modulo.clone());
    let egcd = value.extended_gcd(&modulo);
    ensure!(egcd.gcd.is_one(), "{} has no inverse modulo {}", value, modulo);
    egcd.x
        .mod_floor(&modulo)
        .to_biguint()
        .context("reduced inverse is negative")
}

/// Random prime with exactly `bit_size` bits.
pub fn rand_prime(bit_size: u64) -> Result<BigUint> {
    ensure!(bit_size >= 2, "a {} bit prime does not exist", bit_size);
    let bits = usize::try_from(bit_size).context("prime size overflows usize")?;
    let prime: num_bigint_dig::BigUint = RandPrime::gen_prime(&mut OsRng, bits);
    Ok(BigUint::from_bytes_be(&prime.to_bytes_be()))
}
