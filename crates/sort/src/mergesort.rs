//! Parallel external merge sort of the received partition.
//!
//! First pass sorts `MERGE_BUF_SIZE`-element chunks in place; each merge
//! pass then `MERGE_BUF_SIZE`-way-merges consecutive runs into the opposite
//! buffer, squaring the run length until a single run covers the array.
//! Everything here is non-oblivious: the array was shuffled before any
//! key-dependent branching, so the access pattern carries no information
//! beyond what the sorted output reveals.

use assume::assume;
use distsort_threading::Pool;
use tracing::debug;

use crate::elem::Elem;
use crate::RawParts;

/// Chunk size of the first pass and fan-in of every merge pass.
pub const MERGE_BUF_SIZE: usize = 1024;

const fn ceil_div(a: usize, b: usize) -> usize {
  (a + b - 1) / b
}

/// Sorts `arr[..length]` by `(key, orp_id)`, leaving the result in
/// `out[..length]`. `arr` and `out` are used as ping-pong buffers; both are
/// clobbered.
pub(crate) fn mergesort(pool: &Pool, arr: &mut [Elem], out: &mut [Elem], length: usize) {
  debug_assert!(arr.len() >= length && out.len() >= length);

  // First pass: independent chunk sorts, one chunk per iteration.
  let parts = RawParts::new(arr);
  pool.run_iter(ceil_div(length, MERGE_BUF_SIZE), |chunk_idx| {
    let start = chunk_idx * MERGE_BUF_SIZE;
    let end = (start + MERGE_BUF_SIZE).min(length);
    // SAFETY: chunks are disjoint and the borrow outlives run_iter.
    let chunk = unsafe { parts.slice_mut(start..end) };
    chunk.sort_unstable();
  });

  // Merge passes: runs of run_length, MERGE_BUF_SIZE of them per group.
  let mut input = RawParts::new(arr);
  let mut output = RawParts::new(out);
  let mut live_in_out = false;
  let mut run_length = MERGE_BUF_SIZE;
  while run_length < length {
    pool.run_iter(ceil_div(length, run_length * MERGE_BUF_SIZE), |group_idx| {
      merge_group(input, output, length, run_length, group_idx);
    });

    std::mem::swap(&mut input, &mut output);
    live_in_out = !live_in_out;
    run_length = run_length.saturating_mul(MERGE_BUF_SIZE);
  }

  // If the ping-pong parity left the live data in `arr`, move it across.
  if !live_in_out {
    out[..length].copy_from_slice(&arr[..length]);
  }
  debug!(length, "local merge sort complete");
}

/// Merges up to `MERGE_BUF_SIZE` consecutive runs of `run_length` elements
/// starting at `group_idx * run_length * MERGE_BUF_SIZE` into one run in the
/// output buffer. Exhausted runs and the end of the array act as sentinels.
fn merge_group(
  input: RawParts<Elem>,
  output: RawParts<Elem>,
  length: usize,
  run_length: usize,
  group_idx: usize,
) {
  let run_start = group_idx * run_length * MERGE_BUF_SIZE;
  let num_runs = ceil_div(length - run_start, run_length).min(MERGE_BUF_SIZE);
  let group_len = (run_length * MERGE_BUF_SIZE).min(length - run_start);

  // SAFETY: groups read and write disjoint [run_start, run_start+group_len)
  // windows; the caller holds both buffers alive across the pass.
  let input = unsafe { input.slice(run_start..run_start + group_len) };
  let output = unsafe { output.slice_mut(run_start..run_start + group_len) };

  let mut merge_indices = vec![0usize; num_runs];

  // TODO: replace the linear scan with a loser tree if wide fan-ins show up
  // in profiles.
  for slot in output.iter_mut() {
    let mut lowest: Option<(usize, usize)> = None;
    for (j, &consumed) in merge_indices.iter().enumerate() {
      let idx = j * run_length + consumed;
      if consumed >= run_length || idx >= group_len {
        continue;
      }
      assume!(unsafe: idx < input.len());
      if lowest.is_none_or(|(_, best)| input[idx] < input[best]) {
        lowest = Some((j, idx));
      }
    }
    // Every output slot has a source while any run is unexhausted, and the
    // group sizes match exactly.
    let (j, idx) = lowest.expect("merge ran out of input");
    *slot = input[idx];
    merge_indices[j] += 1;
  }
}
