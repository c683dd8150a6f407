//! Deterministic, serializable random number generator.
//!
//! Both engines thread all randomness through this wrapper so that a fixed
//! seed reproduces identical runs, and so that a deserialized engine resumes
//! the exact random sequence it was saved with.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;

/// A seeded pseudo-random number generator.
///
/// Uses ChaCha20 for deterministic, platform-independent output. The stream
/// position is serialized alongside the seed, so a deserialized generator
/// resumes the exact sequence it was saved at.
///
/// # Example
///
/// ```rust
/// use veles::utils::Random;
///
/// let mut rng = Random::new(42);
/// let n = rng.get_uint32();
/// let f = rng.get_real64();
/// let idx = rng.get_uint32_range(0, 100);
/// ```
#[derive(Debug, Clone)]
pub struct Random {
    rng: ChaCha20Rng,
    seed: u64,
    /// Number of random values generated.
    steps: u64,
}

// Serialized as (seed, steps, word position); the RNG is re-seeded and
// fast-forwarded to the saved stream position on deserialization.
#[cfg(feature = "serde")]
mod serde_impl {
    use super::*;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize, Deserialize)]
    struct RandomState {
        seed: u64,
        steps: u64,
        word_pos: u128,
    }

    impl Serialize for Random {
        fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            RandomState {
                seed: self.seed,
                steps: self.steps,
                word_pos: self.rng.get_word_pos(),
            }
            .serialize(serializer)
        }
    }

    impl<'de> Deserialize<'de> for Random {
        fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
        where
            D: Deserializer<'de>,
        {
            let state = RandomState::deserialize(deserializer)?;
            let mut rng = ChaCha20Rng::seed_from_u64(state.seed);
            rng.set_word_pos(state.word_pos);
            Ok(Random {
                rng,
                seed: state.seed,
                steps: state.steps,
            })
        }
    }
}

impl Random {
    /// Creates a new random number generator with the given seed.
    ///
    /// A negative seed draws a seed from system randomness.
    #[must_use]
    pub fn new(seed: i64) -> Self {
        let actual_seed = if seed < 0 {
            rand::thread_rng().gen()
        } else {
            seed as u64
        };

        Self {
            rng: ChaCha20Rng::seed_from_u64(actual_seed),
            seed: actual_seed,
            steps: 0,
        }
    }

    /// Returns the seed used for this generator.
    #[must_use]
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Returns the number of random values generated.
    #[must_use]
    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Generates a random u32.
    pub fn get_uint32(&mut self) -> u32 {
        self.steps += 1;
        self.rng.gen()
    }

    /// Generates a random u32 in the range `[min, max)`.
    ///
    /// # Panics
    ///
    /// Panics if `min >= max`.
    pub fn get_uint32_range(&mut self, min: u32, max: u32) -> u32 {
        self.steps += 1;
        self.rng.gen_range(min..max)
    }

    /// Generates a random usize in `[0, n)`. Returns 0 for `n == 0`.
    pub fn get_usize(&mut self, n: usize) -> usize {
        if n == 0 {
            return 0;
        }
        self.steps += 1;
        self.rng.gen_range(0..n)
    }

    /// Generates a random f32 in `[0, 1)`.
    pub fn get_real32(&mut self) -> f32 {
        self.steps += 1;
        self.rng.gen()
    }

    /// Generates a random f64 in `[0, 1)`.
    pub fn get_real64(&mut self) -> f64 {
        self.steps += 1;
        self.rng.gen()
    }

    /// Shuffles a slice in place (Fisher-Yates).
    pub fn shuffle<T>(&mut self, slice: &mut [T]) {
        for i in (1..slice.len()).rev() {
            self.steps += 1;
            let j = self.rng.gen_range(0..=i);
            slice.swap(i, j);
        }
    }

    /// Draws `k` items from `items` without replacement.
    ///
    /// Returns all items (shuffled) if `k >= items.len()`.
    pub fn sample<T>(&mut self, mut items: Vec<T>, k: usize) -> Vec<T> {
        self.shuffle(&mut items);
        items.truncate(k);
        items
    }

    /// Draws `k` distinct indices from `[0, n)`.
    pub fn sample_indices(&mut self, n: usize, k: usize) -> Vec<usize> {
        self.sample((0..n).collect(), k)
    }
}
