//! Seeded randomness for the simulated collaborators around a session.
//!
//! The session core itself draws nothing at random. The runner and the
//! determinism tests feed it deliveries, penalties and loading delays from
//! an RngBank, one independent stream per RngStream, so a run replays
//! exactly from its seed.

use rand::{Rng, RngCore, SeedableRng};
use rand_pcg::Pcg64Mcg;

pub struct StreamRng(Pcg64Mcg);

impl StreamRng {
    pub fn next_u64(&mut self) -> u64 {
        self.0.next_u64()
    }

    /// Uniform in `lo..=hi`; `lo` when the range is empty.
    pub fn range_i64(&mut self, lo: i64, hi: i64) -> i64 {
        if hi <= lo {
            return lo;
        }
        self.0.gen_range(lo..=hi)
    }

    pub fn chance(&mut self, p: f64) -> bool {
        self.0.gen_bool(p.clamp(0.0, 1.0))
    }
}

pub struct RngBank {
    seed: u64,
}

impl RngBank {
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    pub fn stream(&self, stream: RngStream) -> StreamRng {
        StreamRng(Pcg64Mcg::seed_from_u64(self.seed.wrapping_add(stream as u64)))
    }
}

/// Discriminants seed the streams; existing values must stay put.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RngStream {
    Deliveries = 0,
    Penalties  = 1,
    Network    = 2,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_stream() {
        let mut a = RngBank::new(12345).stream(RngStream::Deliveries);
        let mut b = RngBank::new(12345).stream(RngStream::Deliveries);
        for _ in 0..32 {
            assert_eq!(a.next_u64(), b.next_u64());
        }
    }

    #[test]
    fn streams_are_independent() {
        let bank = RngBank::new(12345);
        let mut deliveries = bank.stream(RngStream::Deliveries);
        let mut network = bank.stream(RngStream::Network);
        let same = (0..16).all(|_| deliveries.next_u64() == network.next_u64());
        assert!(!same, "distinct slots must not share a sequence");
    }

    #[test]
    fn range_is_inclusive() {
        let mut rng = RngBank::new(7).stream(RngStream::Penalties);
        for _ in 0..200 {
            let v = rng.range_i64(10, 12);
            assert!((10..=12).contains(&v));
        }
        assert_eq!(rng.range_i64(5, 5), 5);
        assert_eq!(rng.range_i64(9, 3), 9);
    }

    #[test]
    fn chance_edges() {
        let mut rng = RngBank::new(7).stream(RngStream::Network);
        assert!((0..50).all(|_| !rng.chance(0.0)));
        assert!((0..50).all(|_| rng.chance(1.0)));
    }
}
