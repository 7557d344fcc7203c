//! Outcome source: a counting ChaCha stream, optionally derived from a user seed.
use hmac::{Hmac, Mac};
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use sha2::Sha256;

use crate::wheel::Outcome;

/// Counting wrapper around the wheel RNG stream.
#[derive(Debug, Clone)]
pub struct WheelRng {
    rng: ChaCha20Rng,
    draws: u64,
}

impl WheelRng {
    /// Stream seeded from a raw 64-bit value.
    #[must_use]
    pub fn from_seed(seed: u64) -> Self {
        Self {
            rng: ChaCha20Rng::seed_from_u64(seed),
            draws: 0,
        }
    }

    /// Stream for one session, derived from a user-visible seed.
    #[must_use]
    pub fn for_session(user_seed: u64, session_id: u64) -> Self {
        let tag = format!("session-{session_id}");
        Self::from_seed(derive_stream_seed(user_seed, tag.as_bytes()))
    }

    /// Non-reproducible stream seeded from the thread RNG.
    #[must_use]
    pub fn from_entropy() -> Self {
        Self::from_seed(rand::random())
    }

    /// Spin the wheel once.
    pub fn spin(&mut self) -> Outcome {
        Outcome::draw(self)
    }

    /// Number of draw calls performed against this stream.
    #[must_use]
    pub const fn draws(&self) -> u64 {
        self.draws
    }
}

impl rand::RngCore for WheelRng {
    fn next_u32(&mut self) -> u32 {
        self.draws = self.draws.saturating_add(1);
        self.rng.next_u32()
    }

    fn next_u64(&mut self) -> u64 {
        self.draws = self.draws.saturating_add(1);
        self.rng.next_u64()
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        self.draws = self.draws.saturating_add(1);
        self.rng.fill_bytes(dest);
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        self.draws = self.draws.saturating_add(1);
        self.rng.try_fill_bytes(dest)
    }
}

fn derive_stream_seed(user_seed: u64, domain_tag: &[u8]) -> u64 {
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(&user_seed.to_le_bytes()) else {
        return user_seed;
    };
    mac.update(domain_tag);
    let digest = mac.finalize().into_bytes();
    let mut seed_bytes = [0u8; 8];
    seed_bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(seed_bytes)
}
