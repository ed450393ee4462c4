//! ORShuffle: oblivious uniform random permutation.
//!
//! Marks exactly half of the array uniformly at random, obliviously compacts
//! the marked half to the front, then recurses on both halves. Access
//! pattern depends only on the length; the coin values steer only the
//! `marked`/`prefix` arrays, never data-dependent addressing.

use distsort_primitives::rng::{rand_bit, rand_coins, rand_bytes};
use distsort_primitives::traits::{Cmov, CswapIndex};
use distsort_threading::Pool;
use rand::rngs::OsRng;
use rand::TryRngCore;
use tracing::debug;

use crate::compaction::compact;
use crate::elem::Elem;
use crate::error::{Error, FirstError, Result};
use crate::RawParts;

/// Random draws requested per marking batch.
pub const MARK_COINS: usize = 2048;

/// Marks exactly `marked.len() / 2` cells uniformly at random (selection
/// sampling: each cell is marked with probability `still_needed / remaining`)
/// and maintains `prefix` as the running mark count.
fn mark_half<R>(rng: &mut R, marked: &mut [bool], prefix: &mut [usize]) -> Result<()>
where
  R: TryRngCore,
  R::Error: std::fmt::Display,
{
  let length = marked.len();
  let num_to_mark = length / 2;
  let mut total_left = length as u64;
  let mut marked_so_far = 0usize;
  let mut coins = [0u32; MARK_COINS];

  let mut base = 0;
  while base < length {
    let batch = (length - base).min(MARK_COINS);
    rand_coins(rng, &mut coins[..batch]).map_err(|e| Error::Rng(e.to_string()))?;

    for (i, &coin) in coins[..batch].iter().enumerate() {
      let needed = (num_to_mark - marked_so_far) as u64;
      let cur_marked = (coin as u64 * total_left) >> 32 < needed;
      marked_so_far += cur_marked as usize;
      marked[base + i] = cur_marked;
      prefix[base + i] = marked_so_far;
      total_left -= 1;
    }
    base += batch;
  }

  debug_assert_eq!(marked_so_far, num_to_mark);
  Ok(())
}

/// Permutes `arr` uniformly at random using only oblivious operations.
/// `marked` and `prefix` are caller-provided scratch of the same length.
///
/// # Requires
/// * `arr.len()` is a power of two (or < 2).
///
/// # Oblivious
/// * Memory access pattern depends only on `arr.len()`.
pub fn shuffle<T, R>(
  arr: &mut [T],
  marked: &mut [bool],
  prefix: &mut [usize],
  rng: &mut R,
) -> Result<()>
where
  T: Cmov + Copy,
  R: TryRngCore,
  R::Error: std::fmt::Display,
{
  let length = arr.len();
  debug_assert_eq!(marked.len(), length);
  debug_assert_eq!(prefix.len(), length);
  debug_assert!(length < 2 || length.is_power_of_two());

  if length < 2 {
    return Ok(());
  }
  if length == 2 {
    let bit = rand_bit(rng).map_err(|e| Error::Rng(e.to_string()))?;
    arr.cswap(0, 1, bit);
    return Ok(());
  }

  mark_half(rng, marked, prefix)?;
  compact(arr, marked, prefix, 0);

  let half = length / 2;
  let (arr_l, arr_r) = arr.split_at_mut(half);
  let (marked_l, marked_r) = marked.split_at_mut(half);
  let (prefix_l, prefix_r) = prefix.split_at_mut(half);
  shuffle(arr_l, marked_l, prefix_l, rng)?;
  shuffle(arr_r, marked_r, prefix_r, rng)
}

/// Fills every element's ORP ID with fresh random bytes, one shard per pool
/// thread. The IDs make the `(key, orp_id)` order total (up to negligible
/// collision probability), so the later non-oblivious phases never have to
/// break key ties by position.
pub(crate) fn assign_orp_ids(pool: &Pool, arr: &mut [Elem]) -> Result<()> {
  let shards = pool.num_threads().max(1);
  let length = arr.len();
  let parts = RawParts::new(arr);
  let errors = FirstError::new();

  pool.run_iter(shards, |shard| {
    let start = shard * length / shards;
    let end = (shard + 1) * length / shards;
    // SAFETY: shard ranges are disjoint and the caller's borrow outlives
    // run_iter.
    let slice = unsafe { parts.slice_mut(start..end) };
    let mut rng = OsRng;
    for elem in slice {
      let mut bytes = [0u8; 8];
      if let Err(e) = rand_bytes(&mut rng, &mut bytes) {
        errors.record(Error::Rng(e.to_string()));
        return;
      }
      elem.orp_id = u64::from_ne_bytes(bytes);
    }
  });

  match errors.take() {
    Some(error) => Err(error),
    None => {
      debug!(length, shards, "orp ids assigned");
      Ok(())
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use rand_chacha::ChaCha12Rng;
  use rand::SeedableRng;

  fn run_shuffle(arr: &mut [u64], rng: &mut ChaCha12Rng) {
    let mut marked = vec![false; arr.len()];
    let mut prefix = vec![0usize; arr.len()];
    shuffle(arr, &mut marked, &mut prefix, rng).unwrap();
  }

  #[test]
  fn test_mark_half_is_exact() {
    let mut rng = ChaCha12Rng::seed_from_u64(11);
    for &n in &[4usize, 8, 64, 1024, 4096] {
      let mut marked = vec![false; n];
      let mut prefix = vec![0usize; n];
      mark_half(&mut rng, &mut marked, &mut prefix).unwrap();

      assert_eq!(marked.iter().filter(|&&m| m).count(), n / 2);
      let mut sum = 0;
      for i in 0..n {
        sum += marked[i] as usize;
        assert_eq!(prefix[i], sum);
      }
    }
  }

  #[test]
  fn test_shuffle_preserves_multiset() {
    let mut rng = ChaCha12Rng::seed_from_u64(22);
    for &n in &[1usize, 2, 4, 16, 256] {
      let mut arr: Vec<u64> = (0..n as u64).collect();
      run_shuffle(&mut arr, &mut rng);
      let mut sorted = arr.clone();
      sorted.sort_unstable();
      assert_eq!(sorted, (0..n as u64).collect::<Vec<_>>());
    }
  }

  #[test]
  fn test_shuffle_moves_something() {
    let mut rng = ChaCha12Rng::seed_from_u64(33);
    let mut arr: Vec<u64> = (0..256).collect();
    run_shuffle(&mut arr, &mut rng);
    assert_ne!(arr, (0..256).collect::<Vec<_>>());
  }

  /// Position histogram over many shuffles of a small array: every value
  /// should land in every slot roughly uniformly.
  #[test]
  fn test_shuffle_position_uniformity() {
    const N: usize = 8;
    const RUNS: usize = 4000;
    let mut rng = ChaCha12Rng::seed_from_u64(44);
    let mut histogram = [[0u32; N]; N];

    for _ in 0..RUNS {
      let mut arr: Vec<u64> = (0..N as u64).collect();
      run_shuffle(&mut arr, &mut rng);
      for (pos, &val) in arr.iter().enumerate() {
        histogram[val as usize][pos] += 1;
      }
    }

    // Expected RUNS / N = 500 per cell, sigma ~ 21; +-130 is beyond six
    // sigma and still catches gross bias.
    for row in &histogram {
      for &count in row {
        assert!((370..=630).contains(&count), "biased cell: {count}");
      }
    }
  }

  #[test]
  fn test_assign_orp_ids_distinct() {
    let pool = Pool::new(3);
    let mut arr = vec![Elem::with_key(0); 512];
    assign_orp_ids(&pool, &mut arr).unwrap();

    let mut ids: Vec<u64> = arr.iter().map(|e| e.orp_id).collect();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 512);
  }
}
