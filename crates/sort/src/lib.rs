//! Distributed partially-oblivious shuffle sort.
//!
//! Each rank obliviously permutes its local array (ORShuffle), tags every
//! element with a random ORP ID, and only then runs the non-oblivious
//! distributed phase: quickselect picks `N - 1` global splitters, the sample
//! partition routes elements to the rank owning their splitter interval, and
//! a local external merge sort finishes the job. Because the data was
//! uniformly permuted first, the post-shuffle access patterns reveal nothing
//! about the input keys beyond what the sorted output itself reveals.

pub mod compaction;
pub mod elem;
pub mod error;
pub mod mergesort;
pub mod partition;
pub mod quickselect;
pub mod shuffle;

use std::ops::Range;

use distsort_threading::Pool;
use distsort_transport::{Tag, Transport};
use rand::TryRngCore;
use tracing::{debug, info};

pub use elem::{Elem, Splitter, PAYLOAD_LEN};
pub use error::{Error, Result};

/// Tag reserved for quickselect control messages.
pub const QUICKSELECT_TAG: Tag = 0x5153;
/// Tag reserved for sample-partition element chunks.
pub const SAMPLE_PARTITION_TAG: Tag = 0x5350;

/// Raw view of a caller-owned slice, for handing disjoint windows to
/// iteration kernels. Soundness contract: kernels touch pairwise-disjoint
/// ranges, and the owning borrow outlives the pool wait.
#[derive(Clone, Copy)]
pub(crate) struct RawParts<T> {
  ptr: *mut T,
  len: usize,
}

unsafe impl<T: Send> Send for RawParts<T> {}
unsafe impl<T: Send> Sync for RawParts<T> {}

impl<T> RawParts<T> {
  pub(crate) fn new(slice: &mut [T]) -> Self {
    Self { ptr: slice.as_mut_ptr(), len: slice.len() }
  }

  /// # Safety
  /// `range` must be in bounds, disjoint from every other window handed out
  /// for concurrent mutation, and the source borrow must still be live.
  pub(crate) unsafe fn slice_mut<'a>(&self, range: Range<usize>) -> &'a mut [T] {
    debug_assert!(range.start <= range.end && range.end <= self.len);
    unsafe { std::slice::from_raw_parts_mut(self.ptr.add(range.start), range.end - range.start) }
  }

  /// # Safety
  /// `range` must be in bounds, no concurrent kernel may mutate it, and the
  /// source borrow must still be live.
  pub(crate) unsafe fn slice<'a>(&self, range: Range<usize>) -> &'a [T] {
    debug_assert!(range.start <= range.end && range.end <= self.len);
    unsafe { std::slice::from_raw_parts(self.ptr.add(range.start), range.end - range.start) }
  }
}

/// Per-job context: the rank's transport endpoint and its worker pool.
/// Rank, world size and thread count all come from these two, so nothing
/// about a job lives in process globals.
pub struct SortJob<'a, C: Transport> {
  transport: &'a C,
  pool: &'a Pool,
}

impl<'a, C: Transport> SortJob<'a, C> {
  /// Binds a job to a transport endpoint and a worker pool.
  pub fn new(transport: &'a C, pool: &'a Pool) -> Self {
    Self { transport, pool }
  }

  /// This rank's slice of an evenly divided `total_length`.
  pub fn local_range(&self, total_length: usize) -> Range<usize> {
    let rank = self.transport.rank();
    let size = self.transport.size();
    (total_length * rank / size)..(total_length * (rank + 1) / size)
  }

  /// Shuffles and sorts the distributed dataset. On return, this rank's
  /// portion of the globally sorted order sits in `arr[..local_length]`.
  ///
  /// `arr` is the local backing buffer; its first `local_length` cells hold
  /// this rank's input and the rest is scratch for the partition exchange
  /// and the merge ping-pong.
  ///
  /// # Requires
  /// * `total_length`, the rank count and the derived `local_length` are
  ///   powers of two.
  /// * `arr.len() >= max(local_length * 2, 512) * 2`.
  ///
  /// # Errors
  /// Any RNG, transport or protocol failure aborts the job; the buffer
  /// contents are then undefined and must be discarded.
  pub fn shuffle_sort<R>(&self, arr: &mut [Elem], total_length: usize, rng: &mut R) -> Result<()>
  where
    R: TryRngCore,
    R::Error: std::fmt::Display,
  {
    let rank = self.transport.rank();
    let size = self.transport.size();
    let local = self.local_range(total_length);
    let local_length = local.len();

    assert!(size.is_power_of_two(), "rank count must be a power of two");
    assert!(local_length.is_power_of_two(), "local length must be a power of two");
    let scratch_base = distsort_primitives::utils::max(local_length * 2, 512);
    assert!(
      arr.len() >= scratch_base * 2,
      "backing buffer must hold max(local_length * 2, 512) * 2 elements"
    );

    // Oblivious phase: uniform permutation, then random tiebreak IDs.
    {
      let mut marked = vec![false; local_length];
      let mut prefix = vec![0usize; local_length];
      shuffle::shuffle(&mut arr[..local_length], &mut marked, &mut prefix, rng)?;
    }
    shuffle::assign_orp_ids(self.pool, &mut arr[..local_length])?;
    debug!(rank, local_length, "shuffle phase complete");

    // Non-oblivious phase: splitter selection, partition exchange, local
    // merge sort back into the front of the buffer.
    let dst_length = local_length;
    let (front, back) = arr.split_at_mut(scratch_base);

    let num_targets = size - 1;
    let targets: Vec<u64> =
      (1..size).map(|k| (total_length * k / size) as u64).collect();
    let mut samples = vec![Splitter::default(); num_targets];
    let mut sample_idxs = vec![0usize; num_targets];
    quickselect::distributed_quickselect(
      self.transport,
      &mut front[..local_length],
      &targets,
      &mut samples,
      &mut sample_idxs,
    )?;

    partition::sample_partition(
      self.transport,
      &front[..local_length],
      &mut back[..dst_length],
      &sample_idxs,
      dst_length,
    )?;

    mergesort::mergesort(self.pool, &mut back[..dst_length], &mut front[..dst_length], dst_length);

    info!(rank, size, total_length, "shuffle sort complete");
    Ok(())
  }
}
