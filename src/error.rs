use std::fmt;

/// Failure of an oracle to produce a conformity verdict.
#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    #[error("candidate is {actual} bytes, oracle expects {expected}")]
    BlockSize { expected: usize, actual: usize },
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Which caller-imposed limit ended an attack.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Budget {
    Queries(u64),
    Rounds(u64),
}

impl fmt::Display for Budget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Budget::Queries(limit) => write!(f, "query budget of {}", limit),
            Budget::Rounds(limit) => write!(f, "round budget of {}", limit),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AttackError {
    #[error("oracle query failed: {0}")]
    Oracle(#[from] OracleError),
    /// The attack reached a state that honest oracle answers cannot produce.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),
    #[error("malformed input: {0}")]
    MalformedInput(String),
    #[error("attack abandoned in round {round} after {queries} queries: {limit} exhausted")]
    Abandoned { round: u64, queries: u64, limit: Budget },
}

pub type Result<T> = std::result::Result<T, AttackError>;
