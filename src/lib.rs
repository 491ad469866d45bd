//! Bleichenbacher's adaptive chosen-ciphertext attack on RSA PKCS#1 v1.5
//! encryption, driven by any padding oracle.

pub mod attack;
pub mod bounds;
pub mod error;
pub mod interval;
pub mod math;
pub mod message;
pub mod oracles;
pub mod padding;
pub mod rsa;

pub use attack::{AttackConfig, Bleichenbacher, Phase, Progress, RoundOutcome, SearchStrategy, Solution};
pub use error::{AttackError, Budget, OracleError, Result};
pub use interval::{Interval, IntervalSet};
pub use oracles::{DecryptionOracle, Oracle, PlaintextOracle};
pub use padding::Pkcs1Check;

/// Recovers the payload of a PKCS#1 v1.5 `ciphertext` with nothing but a
/// padding oracle for the target key.
pub fn decrypt_with_pkcs1_oracle<O: Oracle>(
    ciphertext: &[u8],
    oracle: O,
    config: AttackConfig,
) -> anyhow::Result<Vec<u8>> {
    let solution = Bleichenbacher::new(ciphertext, oracle, config)?.run()?;
    solution.payload()
}
