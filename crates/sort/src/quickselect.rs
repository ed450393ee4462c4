//! Distributed quickselect over the authenticated channel.
//!
//! Selects the requested global order statistics of the union of all ranks'
//! active slices. Each recursion level elects the lowest non-empty rank as
//! master, partitions every rank's slice around the master's head element,
//! accumulates the pivot's global rank at the master, and recurses on both
//! sides with the matching target subsets. All ranks walk the recursion tree
//! in lockstep; the target list is global, so the branching agrees
//! everywhere.

use std::cmp::Ordering;

use bytemuck::{Pod, Zeroable};
use distsort_transport::{Tag, Transport};
use tracing::debug;

use crate::elem::{Elem, Splitter};
use crate::error::{Error, Result};
use crate::QUICKSELECT_TAG;

/// Sends one fixed-size Pod value.
pub(crate) fn send_value<T, C>(chan: &C, value: &T, dst: usize, tag: Tag) -> Result<()>
where
  T: Pod,
  C: Transport,
{
  chan.send(bytemuck::bytes_of(value), dst, tag)?;
  Ok(())
}

/// Receives one fixed-size Pod value; a size mismatch is a protocol error.
pub(crate) fn recv_value<T, C>(chan: &C, src: usize, tag: Tag) -> Result<T>
where
  T: Pod + Zeroable,
  C: Transport,
{
  let mut value = T::zeroed();
  let status = chan.recv(bytemuck::bytes_of_mut(&mut value), Some(src), Some(tag))?;
  if status.count != std::mem::size_of::<T>() {
    return Err(Error::Protocol(format!(
      "expected {} byte message from {src}, got {}",
      std::mem::size_of::<T>(),
      status.count
    )));
  }
  Ok(value)
}

/// Finds the elements at the global ranks `targets` (sorted, strictly
/// increasing) across all ranks' `arr` slices. For each target `k`,
/// `samples[k]` receives the splitter pair and `sample_idxs[k]` the local
/// index at which it cuts this rank's array.
pub(crate) fn distributed_quickselect<C: Transport>(
  chan: &C,
  arr: &mut [Elem],
  targets: &[u64],
  samples: &mut [Splitter],
  sample_idxs: &mut [usize],
) -> Result<()> {
  debug_assert!(targets.windows(2).all(|w| w[0] < w[1]));
  debug_assert_eq!(targets.len(), samples.len());
  debug_assert_eq!(targets.len(), sample_idxs.len());

  let right = arr.len();
  quickselect_helper(chan, arr, targets, samples, sample_idxs, 0, right)?;
  debug!(rank = chan.rank(), targets = targets.len(), "quickselect complete");
  Ok(())
}

fn quickselect_helper<C: Transport>(
  chan: &C,
  arr: &mut [Elem],
  targets: &[u64],
  samples: &mut [Splitter],
  sample_idxs: &mut [usize],
  left: usize,
  right: usize,
) -> Result<()> {
  if targets.is_empty() {
    return Ok(());
  }
  let world_rank = chan.rank();
  let world_size = chan.size();

  // Master election: lowest rank whose active slice is non-empty.
  let ready = left < right;
  for peer in 0..world_size {
    if peer != world_rank {
      send_value(chan, &(ready as u8), peer, QUICKSELECT_TAG)?;
    }
  }
  let mut master_rank = None;
  for peer in 0..world_size {
    let peer_ready = if peer == world_rank {
      ready
    } else {
      recv_value::<u8, _>(chan, peer, QUICKSELECT_TAG)? != 0
    };
    if peer_ready && master_rank.is_none() {
      master_rank = Some(peer);
    }
  }
  let master_rank = master_rank.ok_or(Error::AllRanksEmpty)?;
  let is_master = world_rank == master_rank;

  // The master's head element is the pivot; post-shuffle it is a uniform
  // draw from the active slice.
  let pivot = if is_master {
    let pivot = Splitter::from(&arr[left]);
    for peer in 0..world_size {
      if peer != world_rank {
        send_value(chan, &pivot, peer, QUICKSELECT_TAG)?;
      }
    }
    pivot
  } else {
    recv_value::<Splitter, _>(chan, master_rank, QUICKSELECT_TAG)?
  };

  // Two-pointer partition of the active slice, skipping the pivot slot on
  // the master.
  let mut partition_left = left + is_master as usize;
  let mut partition_right = right;
  let mut scanning_left = true;
  while partition_left < partition_right {
    if scanning_left {
      if arr[partition_left].cmp_splitter(&pivot) == Ordering::Greater {
        scanning_left = false;
      } else {
        partition_left += 1;
      }
    } else if arr[partition_right - 1].cmp_splitter(&pivot) == Ordering::Less {
      arr.swap(partition_right - 1, partition_left);
      scanning_left = true;
      partition_left += 1;
      partition_right -= 1;
    } else {
      partition_right -= 1;
    }
  }

  // Re-center the pivot so it sits exactly at its local boundary.
  if is_master {
    arr.swap(partition_right - 1, left);
    partition_right -= 1;
  }

  // The pivot's global order statistic is the sum of every rank's boundary.
  let cur_pivot = if is_master {
    let mut cur = partition_right as u64;
    for peer in 0..world_size {
      if peer != world_rank {
        cur += recv_value::<u64, _>(chan, peer, QUICKSELECT_TAG)?;
      }
    }
    for peer in 0..world_size {
      if peer != world_rank {
        send_value(chan, &cur, peer, QUICKSELECT_TAG)?;
      }
    }
    cur
  } else {
    send_value(chan, &(partition_right as u64), master_rank, QUICKSELECT_TAG)?;
    recv_value::<u64, _>(chan, master_rank, QUICKSELECT_TAG)?
  };

  // Match the pivot rank against the target list.
  let geq_idx = targets.partition_point(|&t| t < cur_pivot);
  let found = geq_idx < targets.len() && targets[geq_idx] == cur_pivot;
  if found {
    samples[geq_idx] = pivot;
    sample_idxs[geq_idx] = partition_right;
  }
  let gt_idx = geq_idx + found as usize;

  // Strictly smaller targets on the left side of the pivot.
  quickselect_helper(
    chan,
    arr,
    &targets[..geq_idx],
    &mut samples[..geq_idx],
    &mut sample_idxs[..geq_idx],
    left,
    partition_right,
  )?;
  // Strictly larger targets on the right side.
  quickselect_helper(
    chan,
    arr,
    &targets[gt_idx..],
    &mut samples[gt_idx..],
    &mut sample_idxs[gt_idx..],
    partition_left,
    right,
  )
}

#[cfg(test)]
mod tests {
  use super::*;
  use distsort_transport::local_cluster;
  use rand::rngs::StdRng;
  use rand::seq::SliceRandom;
  use rand::SeedableRng;
  use std::thread;

  fn elems(keys: &[u64]) -> Vec<Elem> {
    keys.iter().map(|&k| Elem { key: k, orp_id: k, ..Elem::zeroed() }).collect()
  }

  #[test]
  fn test_single_rank_equally_spaced_targets() {
    let cluster = local_cluster(1);
    let mut rng = StdRng::seed_from_u64(5);
    let mut keys: Vec<u64> = (0..16).collect();
    keys.shuffle(&mut rng);
    let mut arr = elems(&keys);

    let targets = [4u64, 8, 12];
    let mut samples = [Splitter::default(); 3];
    let mut sample_idxs = [0usize; 3];
    distributed_quickselect(&cluster[0], &mut arr, &targets, &mut samples, &mut sample_idxs)
      .unwrap();

    assert_eq!(samples.map(|s| s.key), [4, 8, 12]);
    assert_eq!(sample_idxs, [4, 8, 12]);
    // The boundaries really partition the local array.
    for (k, &idx) in sample_idxs.iter().enumerate() {
      assert!(arr[..idx].iter().all(|e| e.cmp_splitter(&samples[k]) == Ordering::Less));
      assert!(arr[idx..].iter().all(|e| e.cmp_splitter(&samples[k]) != Ordering::Less));
    }
  }

  #[test]
  fn test_two_ranks_median() {
    let mut cluster = local_cluster(2);
    let t1 = cluster.pop().unwrap();
    let t0 = cluster.pop().unwrap();
    let mut rng = StdRng::seed_from_u64(6);

    // Rank 0 holds the evens, rank 1 the odds, both shuffled.
    let mut evens: Vec<u64> = (0..16).map(|i| 2 * i).collect();
    let mut odds: Vec<u64> = (0..16).map(|i| 2 * i + 1).collect();
    evens.shuffle(&mut rng);
    odds.shuffle(&mut rng);

    let run = |chan, keys: Vec<u64>| {
      move || {
        let mut arr = elems(&keys);
        let targets = [16u64];
        let mut samples = [Splitter::default(); 1];
        let mut sample_idxs = [0usize; 1];
        distributed_quickselect(&chan, &mut arr, &targets, &mut samples, &mut sample_idxs)
          .unwrap();
        (samples[0], sample_idxs[0])
      }
    };

    let ((s0, idx0), (s1, idx1)) = thread::scope(|scope| {
      let h0 = scope.spawn(run(t0, evens));
      let h1 = scope.spawn(run(t1, odds));
      (h0.join().unwrap(), h1.join().unwrap())
    });

    // The element of {0..32} with 16 keys below it is key 16; both ranks
    // agree on the splitter.
    assert_eq!(s0, s1);
    assert_eq!(s0.key, 16);
    // Each rank holds 8 keys below the splitter.
    assert_eq!((idx0, idx1), (8, 8));
  }

  #[test]
  fn test_empty_targets_is_a_no_op() {
    let cluster = local_cluster(1);
    let mut arr = elems(&[3, 1, 2]);
    distributed_quickselect(&cluster[0], &mut arr, &[], &mut [], &mut []).unwrap();
  }
}
