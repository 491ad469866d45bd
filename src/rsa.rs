use anyhow::Result;
use lazy_static::lazy_static;
use num_bigint::BigUint;
use num_traits::One;

use crate::math::{inv_mod, rand_prime};

lazy_static! {
    pub static ref E3: BigUint = 3u32.into();
    pub static ref E65537: BigUint = 65537u32.into();
}

/// Public half of an RSA key: the `(n, e)` pair every oracle exposes.
pub trait RsaKey {
    fn modulus(&self) -> &BigUint;
    fn pub_exp(&self) -> &BigUint;

    /// Byte length `k` of the modulus, i.e. the smallest `k` with `2^(8k) > n`.
    fn size_bytes(&self) -> usize {
        ((self.modulus().bits() + 7) / 8) as usize
    }
}

pub trait RsaPrivateKey: RsaKey {
    fn priv_exp(&self) -> &BigUint;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RsaPublicKey {
    modulus: BigUint,
    pub_exp: BigUint,
}

impl RsaPublicKey {
    pub fn new(modulus: BigUint, pub_exp: BigUint) -> Self {
        Self { modulus, pub_exp }
    }

    pub fn from_key(key: &dyn RsaKey) -> Self {
        Self::new(key.modulus().clone(), key.pub_exp().clone())
    }
}

impl RsaKey for RsaPublicKey {
    fn modulus(&self) -> &BigUint {
        &self.modulus
    }

    fn pub_exp(&self) -> &BigUint {
        &self.pub_exp
    }
}

#[derive(Clone)]
struct RsaPrivateKeyImpl {
    public: RsaPublicKey,
    priv_exp: BigUint,
}

impl RsaKey for RsaPrivateKeyImpl {
    fn modulus(&self) -> &BigUint {
        self.public.modulus()
    }

    fn pub_exp(&self) -> &BigUint {
        self.public.pub_exp()
    }
}

impl RsaPrivateKey for RsaPrivateKeyImpl {
    fn priv_exp(&self) -> &BigUint {
        &self.priv_exp
    }
}

pub fn gen_rsa(bit_size: u64, pub_exp: &BigUint) -> Result<(RsaPublicKey, impl RsaPrivateKey)> {
    loop {
        let p = rand_prime(bit_size / 2)?;
        let q = rand_prime(bit_size / 2)?;
        if p == q {
            continue;
        }
        let totient = (&p - BigUint::one()) * (&q - BigUint::one());
        let priv_exp = match inv_mod(pub_exp, &totient) {
            Ok(inverse) => inverse,
            Err(_) => continue,
        };

        let public = RsaPublicKey::new(&p * &q, pub_exp.to_owned());
        let private = RsaPrivateKeyImpl {
            public: public.clone(),
            priv_exp,
        };
        return Ok((public, private));
    }
}

pub fn rsa_public_raw(key: &dyn RsaKey, data: &BigUint) -> BigUint {
    data.modpow(key.pub_exp(), key.modulus())
}

pub fn rsa_private_raw(key: &dyn RsaPrivateKey, data: &BigUint) -> BigUint {
    data.modpow(key.priv_exp(), key.modulus())
}
