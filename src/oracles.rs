use anyhow::Context;
use num_bigint::BigUint;

use crate::error::OracleError;
use crate::message::to_block;
use crate::padding::{Pkcs1Check, Pkcs1Encryption};
use crate::rsa::{gen_rsa, rsa_private_raw, rsa_public_raw, RsaKey, RsaPrivateKey, RsaPublicKey};

/// Anything that answers "does this candidate decrypt to a PKCS#1
/// conforming block?".
///
/// Implementations own their transport, retries and timeouts; the attack
/// treats every `Err` as fatal.
pub trait Oracle {
    fn check_pkcs_conformity(&mut self, candidate: &[u8]) -> Result<bool, OracleError>;

    /// Candidate width in bytes, equal to the modulus length.
    fn block_size(&self) -> usize;

    fn public_key(&self) -> &dyn RsaKey;

    /// True when candidates are plaintext integers rather than ciphertexts.
    fn is_plaintext_oracle(&self) -> bool {
        false
    }

    fn query_count(&self) -> u64;

    /// One-off warm-up run by the caller before an attack starts.
    fn calibrate(&mut self) -> Result<(), OracleError> {
        Ok(())
    }
}

impl<O: Oracle + ?Sized> Oracle for &mut O {
    fn check_pkcs_conformity(&mut self, candidate: &[u8]) -> Result<bool, OracleError> {
        (**self).check_pkcs_conformity(candidate)
    }

    fn block_size(&self) -> usize {
        (**self).block_size()
    }

    fn public_key(&self) -> &dyn RsaKey {
        (**self).public_key()
    }

    fn is_plaintext_oracle(&self) -> bool {
        (**self).is_plaintext_oracle()
    }

    fn query_count(&self) -> u64 {
        (**self).query_count()
    }

    fn calibrate(&mut self) -> Result<(), OracleError> {
        (**self).calibrate()
    }
}

fn check_width(expected: usize, candidate: &[u8]) -> Result<(), OracleError> {
    if candidate.len() != expected {
        return Err(OracleError::BlockSize {
            expected,
            actual: candidate.len(),
        });
    }
    Ok(())
}

/// Oracle backed by the private key: decrypts each candidate and applies
/// a PKCS#1 conformity predicate to the result.
pub struct DecryptionOracle {
    key: Box<dyn RsaPrivateKey>,
    public_key: RsaPublicKey,
    check: Pkcs1Check,
    queries: u64,
}

impl DecryptionOracle {
    pub fn new<K: RsaPrivateKey + 'static>(key: K, check: Pkcs1Check) -> Self {
        let public_key = RsaPublicKey::from_key(&key);
        Self {
            key: Box::new(key),
            public_key,
            check,
            queries: 0,
        }
    }

    /// Oracle around a fresh key of `bit_size` bits.
    pub fn generate(bit_size: u64, pub_exp: &BigUint, check: Pkcs1Check) -> anyhow::Result<Self> {
        let (_, priv_key) = gen_rsa(bit_size, pub_exp)?;
        Ok(Self::new(priv_key, check))
    }

    /// PKCS#1 v1.5 pads and encrypts `data` under the oracle's public key.
    pub fn encrypt(&self, data: &[u8]) -> anyhow::Result<Vec<u8>> {
        let k = self.public_key.size_bytes();
        let padded = Pkcs1Encryption::new(k).pad(data)?;
        let ciphertext = rsa_public_raw(&self.public_key, &BigUint::from_bytes_be(&padded));
        Ok(to_block(&ciphertext, k)?)
    }

    pub fn check(&self) -> Pkcs1Check {
        self.check
    }
}

impl Oracle for DecryptionOracle {
    fn check_pkcs_conformity(&mut self, candidate: &[u8]) -> Result<bool, OracleError> {
        check_width(self.block_size(), candidate)?;
        self.queries += 1;
        let ciphertext = BigUint::from_bytes_be(candidate);
        let plaintext = rsa_private_raw(self.key.as_ref(), &ciphertext);
        let block = to_block(&plaintext, self.block_size()).context("decryption overflowed the block")?;
        Ok(self.check.is_conforming(&block))
    }

    fn block_size(&self) -> usize {
        self.public_key.size_bytes()
    }

    fn public_key(&self) -> &dyn RsaKey {
        &self.public_key
    }

    fn query_count(&self) -> u64 {
        self.queries
    }
}

/// Oracle that sees plaintext integers directly. No RSA operation takes
/// place, which makes it the cheap stand-in for exercising the search.
pub struct PlaintextOracle {
    public_key: RsaPublicKey,
    check: Pkcs1Check,
    queries: u64,
}

impl PlaintextOracle {
    pub fn new(public_key: RsaPublicKey, check: Pkcs1Check) -> Self {
        Self {
            public_key,
            check,
            queries: 0,
        }
    }
}

impl Oracle for PlaintextOracle {
    fn check_pkcs_conformity(&mut self, candidate: &[u8]) -> Result<bool, OracleError> {
        check_width(self.block_size(), candidate)?;
        self.queries += 1;
        Ok(self.check.is_conforming(candidate))
    }

    fn block_size(&self) -> usize {
        self.public_key.size_bytes()
    }

    fn public_key(&self) -> &dyn RsaKey {
        &self.public_key
    }

    fn is_plaintext_oracle(&self) -> bool {
        true
    }

    fn query_count(&self) -> u64 {
        self.queries
    }
}
