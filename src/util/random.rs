use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::ops::Range;


/// Injectable source of randomness: production code draws from the thread-local RNG, while
///  tests inject a seeded instance to make e.g. the choice among several repair candidates
///  deterministic.
pub trait Random: Send {
    fn gen_usize_range(&mut self, range: Range<usize>) -> usize;
}

pub struct ThreadRngRandom;
impl Random for ThreadRngRandom {
    fn gen_usize_range(&mut self, range: Range<usize>) -> usize {
        rand::thread_rng().gen_range(range)
    }
}

pub struct SeededRandom {
    rng: StdRng,
}
impl SeededRandom {
    pub fn new(seed: u64) -> SeededRandom {
        SeededRandom {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}
impl Random for SeededRandom {
    fn gen_usize_range(&mut self, range: Range<usize>) -> usize {
        self.rng.gen_range(range)
    }
}
