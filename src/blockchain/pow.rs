use log::debug;
use rand::rngs::ThreadRng;
use rand::{Rng, RngCore};

use std::time::{Duration, Instant};

use super::block::Block;

/// Hardest difficulty a ledger accepts.
///
/// A block's timestamp is fixed for the whole search, so the nonce alone has
/// to produce the hash. 2^64 nonces leave about 65536 expected solutions at
/// 12 leading zero hex digits.
pub const MAX_DIFFICULTY: u32 = 12;

/// Supplies candidate nonces to the proof-of-work search
pub trait NonceSource {
    fn next_nonce(&mut self) -> u64;
}

/// Draws nonces uniformly from the whole `u64` range
#[derive(Debug, Clone)]
pub struct UniformNonces<R = ThreadRng> {
    rng: R,
}

impl UniformNonces<ThreadRng> {
    pub fn new() -> Self {
        UniformNonces {
            rng: rand::thread_rng(),
        }
    }
}

impl Default for UniformNonces<ThreadRng> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: RngCore> UniformNonces<R> {
    /// Draws from a caller-supplied generator, e.g. a seeded `StdRng`
    pub fn with_rng(rng: R) -> Self {
        UniformNonces { rng }
    }
}

impl<R: RngCore> NonceSource for UniformNonces<R> {
    fn next_nonce(&mut self) -> u64 {
        self.rng.gen::<u64>()
    }
}

/// Yields `start, start + 1, ...`
#[derive(Debug, Clone, Default)]
pub struct SequentialNonces {
    next: u64,
}

impl SequentialNonces {
    pub fn starting_at(start: u64) -> Self {
        SequentialNonces { next: start }
    }
}

impl NonceSource for SequentialNonces {
    fn next_nonce(&mut self) -> u64 {
        let nonce = self.next;
        self.next = self.next.wrapping_add(1);
        nonce
    }
}

/// Outcome of a completed search
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MiningReport {
    /// Nonces drawn after the assembled block was rejected
    pub attempts: u64,
    pub elapsed: Duration,
}

/// Brute-force proof-of-work at a fixed difficulty.
///
/// The assembled block (nonce 0) is checked first; while its hash lacks
/// `difficulty` leading zero hex digits a new nonce is drawn and the hash
/// recomputed. There is no attempt bound: on average 16^difficulty draws
/// are needed.
#[derive(Debug, Clone, Copy)]
pub struct ProofOfWork {
    difficulty: u32,
}

impl ProofOfWork {
    pub fn new(difficulty: u32) -> Self {
        ProofOfWork { difficulty }
    }

    /// Searches until `block` carries an acceptable hash and stamps its mining time
    pub fn mine(&self, block: &mut Block, nonces: &mut dyn NonceSource) -> MiningReport {
        let start = Instant::now();
        let mut attempts = 0u64;

        while !block.meets_difficulty(self.difficulty) {
            block.set_nonce(nonces.next_nonce());
            attempts += 1;
        }

        let elapsed = start.elapsed();
        block.mining_time = elapsed;
        debug!(
            "Found nonce {} for block {} after {} attempts",
            block.nonce, block.index, attempts
        );

        MiningReport { attempts, elapsed }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::amount::Amount;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn candidate() -> Block {
        Block::new(1, Vec::new(), "prev".to_string(), Amount::ZERO)
    }

    #[test]
    fn test_zero_difficulty_accepts_immediately() {
        let mut block = candidate();
        let original = block.hash.clone();

        let report = ProofOfWork::new(0).mine(&mut block, &mut SequentialNonces::default());

        assert_eq!(report.attempts, 0);
        assert_eq!(block.nonce, 0);
        assert_eq!(block.hash, original);
    }

    #[test]
    fn test_sequential_search_finds_valid_hash() {
        let mut block = candidate();
        let pow = ProofOfWork::new(2);

        pow.mine(&mut block, &mut SequentialNonces::starting_at(1));

        assert!(block.hash.starts_with("00"));
        assert_eq!(block.hash, block.calculate_hash());
    }

    #[test]
    fn test_sequential_search_is_reproducible() {
        let mut a = candidate();
        let mut b = a.clone();
        let pow = ProofOfWork::new(1);

        let first = pow.mine(&mut a, &mut SequentialNonces::starting_at(1));
        let second = pow.mine(&mut b, &mut SequentialNonces::starting_at(1));

        assert_eq!(a.nonce, b.nonce);
        assert_eq!(a.hash, b.hash);
        assert_eq!(first.attempts, second.attempts);
    }

    #[test]
    fn test_seeded_uniform_nonces_are_repeatable() {
        let mut first = UniformNonces::with_rng(StdRng::seed_from_u64(7));
        let mut second = UniformNonces::with_rng(StdRng::seed_from_u64(7));

        let drawn: Vec<u64> = (0..16).map(|_| first.next_nonce()).collect();
        let again: Vec<u64> = (0..16).map(|_| second.next_nonce()).collect();
        assert_eq!(drawn, again);
    }

    #[test]
    fn test_uniform_nonces_cover_full_range() {
        let mut nonces = UniformNonces::with_rng(StdRng::seed_from_u64(11));

        // Draws confined to 0..=1e9 would all miss this bound
        let above_billion = (0..64)
            .map(|_| nonces.next_nonce())
            .filter(|nonce| *nonce > 1_000_000_000)
            .count();
        assert!(above_billion > 0);
    }

    #[test]
    fn test_random_search_meets_difficulty() {
        let mut block = candidate();
        ProofOfWork::new(1).mine(&mut block, &mut UniformNonces::new());

        assert!(block.meets_difficulty(1));
    }
}
