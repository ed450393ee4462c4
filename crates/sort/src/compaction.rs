//! Oblivious cyclic compaction.
//!
//! Given a marked power-of-two array, moves the marked elements into a
//! contiguous cyclic block while touching memory in an order that depends
//! only on the array length. The recursion compacts each half into its own
//! cyclic block, then a single masked-swap sweep rotates the two blocks
//! together.

use assume::assume;
use distsort_primitives::traits::{cswap, Cmov, CswapIndex};

/// Permutes `arr` in place so that the marked elements occupy a contiguous
/// cyclic block starting at `offset % arr.len()`, with their relative order
/// preserved; unmarked elements fill the complement.
///
/// `prefix[i]` must hold a running count of marks through index `i`. The
/// running sum may start mid-stream (the recursion hands down windows of one
/// global scan), which is why the left-half mark count below corrects by the
/// first cell.
///
/// # Requires
/// * `arr.len()` is a power of two (or < 2).
/// * `marked.len() == prefix.len() == arr.len()`.
///
/// # Oblivious
/// * Memory access pattern depends only on `arr.len()`.
pub fn compact<T>(arr: &mut [T], marked: &[bool], prefix: &[usize], offset: usize)
where
  T: Cmov + Copy,
{
  let length = arr.len();
  debug_assert_eq!(marked.len(), length);
  debug_assert_eq!(prefix.len(), length);
  debug_assert!(length < 2 || length.is_power_of_two());

  if length < 2 {
    return;
  }
  if length == 2 {
    let cond = (!marked[0] & marked[1]) != ((offset & 1) == 1);
    arr.cswap(0, 1, cond);
    return;
  }

  let half = length / 2;
  let left_marked = prefix[half - 1] - prefix[0] + marked[0] as usize;

  {
    let (left, right) = arr.split_at_mut(half);
    compact(left, &marked[..half], &prefix[..half], offset % half);
    compact(right, &marked[half..], &prefix[half..], (offset + left_marked) % half);
  }

  swap_local_range(arr, offset, left_marked);
}

/// Merge step: the left half holds `left_marked` marks in a cyclic block at
/// `offset % half`, the right half holds the rest at
/// `(offset + left_marked) % half`; one conditional-swap sweep per column
/// rotates them into a single block at `offset % arr.len()`.
fn swap_local_range<T>(arr: &mut [T], offset: usize, left_marked: usize)
where
  T: Cmov + Copy,
{
  let half = arr.len() / 2;
  let s = (offset % half + left_marked >= half) != (offset >= half);
  let pivot = (offset + left_marked) % half;

  let (left, right) = arr.split_at_mut(half);
  for i in 0..half {
    assume!(unsafe: i < left.len());
    assume!(unsafe: i < right.len());
    let cond = s != (i >= pivot);
    cswap(&mut left[i], &mut right[i], cond);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use rand::rngs::StdRng;
  use rand::{Rng, SeedableRng};

  fn prefix_of(marked: &[bool]) -> Vec<usize> {
    let mut sum = 0;
    marked
      .iter()
      .map(|&m| {
        sum += m as usize;
        sum
      })
      .collect()
  }

  /// Checks the compaction invariant: marked values form a cyclic block at `offset`,
  /// in their original relative order; unmarked values fill the complement.
  fn check_cyclic_block(input: &[u64], output: &[u64], marked: &[bool], offset: usize) {
    let n = input.len();
    let marked_vals: Vec<u64> =
      input.iter().zip(marked).filter(|(_, &m)| m).map(|(&v, _)| v).collect();
    let k = marked_vals.len();

    for (j, &val) in marked_vals.iter().enumerate() {
      assert_eq!(output[(offset + j) % n], val, "marked block broken at slot {j}");
    }

    let mut unmarked_expect: Vec<u64> =
      input.iter().zip(marked).filter(|(_, &m)| !m).map(|(&v, _)| v).collect();
    let mut unmarked_got: Vec<u64> = (k..n).map(|j| output[(offset + j) % n]).collect();
    unmarked_expect.sort_unstable();
    unmarked_got.sort_unstable();
    assert_eq!(unmarked_got, unmarked_expect);
  }

  #[test]
  fn test_length_two_offset_rotates() {
    // marked=[1,0] with offset 1: the marked cell must end up at index 1.
    let mut arr = [10u64, 20];
    let marked = [true, false];
    compact(&mut arr, &marked, &prefix_of(&marked), 1);
    assert_eq!(arr, [20, 10]);
  }

  #[test]
  fn test_marked_move_to_front_in_order() {
    let mut arr = [0u64, 1, 2, 3];
    let marked = [true, false, true, false];
    compact(&mut arr, &marked, &prefix_of(&marked), 0);
    assert_eq!(&arr[..2], &[0, 2]);
    let mut tail = arr[2..].to_vec();
    tail.sort_unstable();
    assert_eq!(tail, vec![1, 3]);
  }

  #[test]
  fn test_degenerate_lengths() {
    let mut arr: [u64; 0] = [];
    compact(&mut arr, &[], &[], 3);

    let mut arr = [42u64];
    compact(&mut arr, &[true], &[1], 5);
    assert_eq!(arr, [42]);
  }

  #[test]
  fn test_all_or_none_marked() {
    for mark in [false, true] {
      let mut arr: Vec<u64> = (0..8).collect();
      let marked = vec![mark; 8];
      compact(&mut arr, &marked, &prefix_of(&marked), 3);
      let input: Vec<u64> = (0..8).collect();
      check_cyclic_block(&input, &arr, &marked, 3);
    }
  }

  #[test]
  fn test_random_marks_and_offsets() {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    for &n in &[2usize, 4, 8, 16, 32, 64, 128] {
      for _ in 0..20 {
        let input: Vec<u64> = (0..n as u64).collect();
        let marked: Vec<bool> = (0..n).map(|_| rng.random()).collect();
        let offset = rng.random_range(0..2 * n);
        let mut arr = input.clone();
        compact(&mut arr, &marked, &prefix_of(&marked), offset);
        check_cyclic_block(&input, &arr, &marked, offset);
      }
    }
  }

  #[test]
  fn test_mid_stream_prefix_window() {
    // The prefix array may be a window of a longer running sum; only
    // differences matter.
    let input: Vec<u64> = (0..8).collect();
    let marked = [false, true, true, false, true, false, false, true];
    let base = 17;
    let prefix: Vec<usize> = prefix_of(&marked).iter().map(|p| p + base).collect();
    let mut arr = input.clone();
    compact(&mut arr, &marked, &prefix, 5);
    check_cyclic_block(&input, &arr, &marked, 5);
  }
}
