//! Sample partition: routes every element to the rank owning its splitter
//! interval.
//!
//! The local array is already partitioned by the quickselect boundaries, so
//! rank `r` streams slice `p` to peer `p` in `SAMPLE_PARTITION_BUF`-element
//! chunks while a single rolling wildcard receive appends whatever arrives
//! to the output buffer. The `waitany` loop keeps at most one chunk per peer
//! in flight in each direction, which bounds staging memory and provides
//! backpressure.

use distsort_transport::{Completion, RequestSlot, Transport};
use tracing::debug;

use crate::elem::Elem;
use crate::error::{Error, Result};
use crate::SAMPLE_PARTITION_TAG;

/// Elements per in-flight chunk, per peer and direction.
pub const SAMPLE_PARTITION_BUF: usize = 512;

const ELEM_BYTES: usize = std::mem::size_of::<Elem>();

/// Exchanges partitions. `arr` is this rank's partitioned source slice,
/// `sample_idxs` the `world_size - 1` quickselect cut points, and
/// `out[..local_dst_length]` receives this rank's bucket from every peer.
pub(crate) fn sample_partition<C: Transport>(
  chan: &C,
  arr: &[Elem],
  out: &mut [Elem],
  sample_idxs: &[usize],
  local_dst_length: usize,
) -> Result<()> {
  let world_rank = chan.rank();
  let world_size = chan.size();
  let local_length = arr.len();
  debug_assert_eq!(sample_idxs.len(), world_size - 1);

  if world_size == 1 {
    out[..local_length].copy_from_slice(arr);
    return Ok(());
  }

  // Bucket p is arr[scan[p]..ends[p]); scan advances as chunks are handed
  // to the transport.
  let mut ends = vec![0usize; world_size];
  ends[..world_size - 1].copy_from_slice(sample_idxs);
  ends[world_size - 1] = local_length;
  let mut scan = vec![0usize; world_size];
  scan[1..].copy_from_slice(sample_idxs);

  // Own bucket goes straight to the output.
  let mut num_received = ends[world_rank] - scan[world_rank];
  out[..num_received].copy_from_slice(&arr[scan[world_rank]..ends[world_rank]]);
  scan[world_rank] = ends[world_rank];

  // Slot p carries the send to peer p; slot world_rank is the receive.
  let mut requests: Vec<C::Request> = Vec::with_capacity(world_size);
  let mut active = 0usize;
  for peer in 0..world_size {
    if peer == world_rank {
      let to_recv = (local_dst_length - num_received).min(SAMPLE_PARTITION_BUF);
      if to_recv > 0 {
        requests.push(chan.irecv(to_recv * ELEM_BYTES, None, Some(SAMPLE_PARTITION_TAG))?);
        active += 1;
      } else {
        requests.push(C::Request::null());
      }
    } else if scan[peer] < ends[peer] {
      let to_send = (ends[peer] - scan[peer]).min(SAMPLE_PARTITION_BUF);
      let chunk = &arr[scan[peer]..scan[peer] + to_send];
      requests.push(chan.isend(bytemuck::cast_slice(chunk), peer, SAMPLE_PARTITION_TAG)?);
      scan[peer] += to_send;
      active += 1;
    } else {
      requests.push(C::Request::null());
    }
  }

  while active > 0 {
    let (index, completion) = chan.waitany(&mut requests)?;
    let keep = if index == world_rank {
      let Completion::Recv { data, status } = completion else {
        return Err(Error::Protocol("send completion on the receive slot".into()));
      };
      if status.count % ELEM_BYTES != 0 {
        return Err(Error::Protocol(format!(
          "partition chunk of {} bytes is not element-aligned",
          status.count
        )));
      }
      let count = status.count / ELEM_BYTES;
      let dst = &mut out[num_received..num_received + count];
      bytemuck::cast_slice_mut::<Elem, u8>(dst).copy_from_slice(&data);
      num_received += count;

      let to_recv = (local_dst_length - num_received).min(SAMPLE_PARTITION_BUF);
      if to_recv > 0 {
        requests[index] = chan.irecv(to_recv * ELEM_BYTES, None, Some(SAMPLE_PARTITION_TAG))?;
        true
      } else {
        false
      }
    } else if scan[index] < ends[index] {
      let to_send = (ends[index] - scan[index]).min(SAMPLE_PARTITION_BUF);
      let chunk = &arr[scan[index]..scan[index] + to_send];
      requests[index] = chan.isend(bytemuck::cast_slice(chunk), index, SAMPLE_PARTITION_TAG)?;
      scan[index] += to_send;
      true
    } else {
      false
    };

    if !keep {
      active -= 1;
    }
  }

  assert_eq!(num_received, local_dst_length, "partition under-delivered");
  debug!(rank = world_rank, received = num_received, "sample partition complete");
  Ok(())
}
