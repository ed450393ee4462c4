//! Randomness helpers.
//!
//! Everything is generic over [`rand::TryRngCore`] so callers can run on
//! `OsRng` (fallible, propagates entropy failures) or on any infallible
//! seeded generator in tests. `rand::RngCore` types satisfy the bound
//! through the blanket impl.

use rand::TryRngCore;

/// Fills `buf` with random bytes. Never returns partially-filled data: on
/// error the buffer contents are unspecified and must be discarded.
#[inline]
pub fn rand_bytes<R: TryRngCore>(rng: &mut R, buf: &mut [u8]) -> Result<(), R::Error> {
  rng.try_fill_bytes(buf)
}

/// Draws one uniform bit.
#[inline]
pub fn rand_bit<R: TryRngCore>(rng: &mut R) -> Result<bool, R::Error> {
  Ok(rng.try_next_u32()? & 1 == 1)
}

/// Fills `coins` with uniform 32-bit draws.
#[inline]
pub fn rand_coins<R: TryRngCore>(rng: &mut R, coins: &mut [u32]) -> Result<(), R::Error> {
  for coin in coins.iter_mut() {
    *coin = rng.try_next_u32()?;
  }
  Ok(())
}
