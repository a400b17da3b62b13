//! Session id sources

use std::ops::RangeInclusive;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Supplies session ids for rotations that do not pin one
pub trait SessionIdSource: Send + Sync {
    fn next_id(&mut self, range: &RangeInclusive<u64>) -> u64;
}

/// Uniformly random ids within the configured range
pub struct RandomSessionIds {
    rng: StdRng,
}

impl RandomSessionIds {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Default for RandomSessionIds {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionIdSource for RandomSessionIds {
    fn next_id(&mut self, range: &RangeInclusive<u64>) -> u64 {
        if range.is_empty() {
            return *range.start();
        }
        self.rng.gen_range(range.clone())
    }
}

/// Deterministic ids counting up from the start of the range, wrapping
/// around at its end
#[derive(Debug, Default)]
pub struct SequentialSessionIds {
    next: u64,
}

impl SequentialSessionIds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starting_at(offset: u64) -> Self {
        Self { next: offset }
    }
}

impl SessionIdSource for SequentialSessionIds {
    fn next_id(&mut self, range: &RangeInclusive<u64>) -> u64 {
        let offset = self.next;
        self.next = self.next.wrapping_add(1);

        let span = range
            .end()
            .checked_sub(*range.start())
            .and_then(|width| width.checked_add(1));

        match span {
            Some(span) => range.start() + offset % span,
            None => range.start().wrapping_add(offset),
        }
    }
}
