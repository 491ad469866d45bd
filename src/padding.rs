use anyhow::{bail, ensure, Result};
use rand::Rng;
use rand_core::OsRng;

/// Bytes taken by `00 02`, the minimum eight padding bytes and the `00` separator.
pub const PKCS1_OVERHEAD: usize = 11;
const MIN_PADDING: usize = 8;

/// PKCS#1 v1.5 encryption padding (block type 2) for a modulus of `em_len` bytes.
pub struct Pkcs1Encryption {
    em_len: usize,
}

impl Pkcs1Encryption {
    pub fn new(em_len: usize) -> Self {
        Self { em_len }
    }

    pub fn from_bits(bit_length: u64) -> Self {
        Self::new(((bit_length + 7) / 8) as usize)
    }

    pub fn pad(&self, data: &[u8]) -> Result<Vec<u8>> {
        let t_len = data.len();
        ensure!(
            self.em_len >= PKCS1_OVERHEAD && self.em_len - PKCS1_OVERHEAD >= t_len,
            "intended encoded message length too short. em_len = {}, t_len = {}",
            self.em_len,
            t_len
        );

        let pad_len = self.em_len - t_len - 3;
        let mut result = Vec::with_capacity(self.em_len);
        result.push(0x00);
        result.push(0x02);
        result.extend((0..pad_len).map(|_| OsRng.gen_range(1..=255u8)));
        result.push(0x00);
        result.extend_from_slice(data);
        Ok(result)
    }

    /// Accepts the full block or one whose leading zero byte was dropped.
    pub fn unpad(&self, data: &[u8]) -> Result<Vec<u8>> {
        let block = if data.len() == self.em_len {
            data.to_owned()
        } else if data.len() + 1 == self.em_len {
            let mut block = vec![0u8];
            block.extend_from_slice(data);
            block
        } else {
            bail!("Invalid input length");
        };

        ensure!(block.len() >= PKCS1_OVERHEAD, "Block too short for PKCS#1 padding");
        ensure!(block[0] == 0, "Invalid first byte");
        ensure!(block[1] == 2, "Invalid second byte");
        match separator_index(&block) {
            Some(idx) => Ok(block[idx + 1..].to_owned()),
            None => bail!("No separator after padding"),
        }
    }
}

// Index of the `00` ending the padding string, if the padding is long enough.
fn separator_index(block: &[u8]) -> Option<usize> {
    let idx = block.iter().skip(2).position(|b| *b == 0)? + 2;
    if idx < 2 + MIN_PADDING {
        None
    } else {
        Some(idx)
    }
}

/// How much of the PKCS#1 v1.5 layout an oracle verifies before reporting
/// a candidate as conforming. Every level is a consistent predicate, which
/// is all the attack needs; stricter levels only make conforming answers
/// rarer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Pkcs1Check {
    /// `00 02` prefix only.
    LeadingBytes,
    /// Prefix plus eight non-zero padding bytes.
    NonZeroPadding,
    /// Prefix, padding and a `00` separator somewhere after it.
    Separator,
    /// As `Separator`, and the payload is exactly this many bytes long.
    PayloadLength(usize),
}

impl Pkcs1Check {
    pub fn is_conforming(&self, block: &[u8]) -> bool {
        if block.len() < 2 || block[0] != 0x00 || block[1] != 0x02 {
            return false;
        }
        match self {
            Pkcs1Check::LeadingBytes => true,
            Pkcs1Check::NonZeroPadding => {
                block.len() >= 2 + MIN_PADDING && block[2..2 + MIN_PADDING].iter().all(|b| *b != 0)
            }
            Pkcs1Check::Separator => separator_index(block).is_some(),
            Pkcs1Check::PayloadLength(len) => match separator_index(block) {
                Some(idx) => block.len() - idx - 1 == *len,
                None => false,
            },
        }
    }
}

impl Default for Pkcs1Check {
    fn default() -> Self {
        Pkcs1Check::Separator
    }
}
