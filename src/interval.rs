use std::fmt;

use num_bigint::BigUint;
use num_traits::One;

/// Inclusive range `[lower, upper]` of candidate plaintext values.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Interval {
    lower: BigUint,
    upper: BigUint,
}

impl Interval {
    /// `None` when the range would be empty.
    pub fn new(lower: BigUint, upper: BigUint) -> Option<Self> {
        if lower > upper {
            None
        } else {
            Some(Self { lower, upper })
        }
    }

    pub fn lower(&self) -> &BigUint {
        &self.lower
    }

    pub fn upper(&self) -> &BigUint {
        &self.upper
    }

    /// Number of integers in the range.
    pub fn width(&self) -> BigUint {
        &self.upper - &self.lower + BigUint::one()
    }

    pub fn contains(&self, value: &BigUint) -> bool {
        &self.lower <= value && value <= &self.upper
    }

    // Overlapping or directly adjacent.
    fn touches(&self, other: &Interval) -> bool {
        self.lower <= &other.upper + BigUint::one() && other.lower <= &self.upper + BigUint::one()
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:x}, {:x}]", self.lower, self.upper)
    }
}

/// Disjoint intervals ordered by lower bound.
///
/// Inserting keeps the set normalized: a new interval absorbs every
/// interval it overlaps or touches, so no two members ever share or
/// border a value.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IntervalSet {
    intervals: Vec<Interval>,
}

impl IntervalSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn singleton(interval: Interval) -> Self {
        Self {
            intervals: vec![interval],
        }
    }

    pub fn insert(&mut self, interval: Interval) {
        let mut merged = interval;
        let mut kept = Vec::with_capacity(self.intervals.len() + 1);
        for existing in self.intervals.drain(..) {
            if existing.touches(&merged) {
                merged = Interval {
                    lower: existing.lower.min(merged.lower),
                    upper: existing.upper.max(merged.upper),
                };
            } else {
                kept.push(existing);
            }
        }
        let idx = kept
            .iter()
            .position(|i| i.lower > merged.lower)
            .unwrap_or_else(|| kept.len());
        kept.insert(idx, merged);
        self.intervals = kept;
    }

    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    pub fn is_singleton(&self) -> bool {
        self.intervals.len() == 1
    }

    /// Exactly one interval left and it holds a single value.
    pub fn is_width_one(&self) -> bool {
        self.is_singleton() && self.intervals[0].lower == self.intervals[0].upper
    }

    pub fn iter(&self) -> impl Iterator<Item = &Interval> {
        self.intervals.iter()
    }

    pub fn first(&self) -> Option<&Interval> {
        self.intervals.first()
    }

    pub fn contains(&self, value: &BigUint) -> bool {
        self.intervals.iter().any(|i| i.contains(value))
    }

    /// Smallest interval enclosing every member.
    pub fn hull(&self) -> Option<Interval> {
        let first = self.intervals.first()?;
        let last = self.intervals.last()?;
        Some(Interval {
            lower: first.lower.clone(),
            upper: last.upper.clone(),
        })
    }

    pub fn total_width(&self) -> BigUint {
        self.intervals.iter().map(Interval::width).sum()
    }
}

impl Extend<Interval> for IntervalSet {
    fn extend<T: IntoIterator<Item = Interval>>(&mut self, iter: T) {
        for interval in iter {
            self.insert(interval);
        }
    }
}

impl std::iter::FromIterator<Interval> for IntervalSet {
    fn from_iter<T: IntoIterator<Item = Interval>>(iter: T) -> Self {
        let mut set = IntervalSet::new();
        set.extend(iter);
        set
    }
}
