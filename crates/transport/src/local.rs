//! In-process transport mesh.
//!
//! Every rank owns one unbounded inbox; sends enqueue directly into the
//! destination inbox, which preserves per-`(sender, receiver, tag)` order.
//! Wildcard matching needs lookahead, so messages pulled off the inbox that
//! do not match the current selector are parked in a pending queue and
//! re-offered first on later receives.

use std::collections::VecDeque;
use std::sync::Mutex;

use kanal::{unbounded, Receiver, Sender};
use tracing::debug;

use crate::{Completion, Rank, RequestSlot, Status, Tag, Transport, TransportError};

struct Message {
  src: Rank,
  tag: Tag,
  payload: Vec<u8>,
}

impl Message {
  fn matches(&self, src: Option<Rank>, tag: Option<Tag>) -> bool {
    src.is_none_or(|s| s == self.src) && tag.is_none_or(|t| t == self.tag)
  }
}

/// In-flight operation handle for [`LocalTransport`].
#[derive(Debug, Clone, Copy)]
pub enum LocalRequest {
  /// Empty slot.
  Null,
  /// A send already delivered to the peer inbox, not yet reported.
  Send {
    /// Destination rank.
    dst: Rank,
    /// Tag it was sent with.
    tag: Tag,
    /// Payload size in bytes.
    len: usize,
  },
  /// A posted receive waiting for a matching message.
  Recv {
    /// Source selector (`None` = any).
    src: Option<Rank>,
    /// Tag selector (`None` = any).
    tag: Option<Tag>,
    /// Maximum acceptable payload size.
    capacity: usize,
  },
}

impl RequestSlot for LocalRequest {
  fn null() -> Self {
    LocalRequest::Null
  }

  fn is_null(&self) -> bool {
    matches!(self, LocalRequest::Null)
  }
}

/// One rank's endpoint of an in-process cluster.
pub struct LocalTransport {
  rank: Rank,
  peers: Vec<Sender<Message>>,
  inbox: Receiver<Message>,
  pending: Mutex<VecDeque<Message>>,
}

/// Builds `n` fully-connected endpoints. Endpoint `i` is rank `i`; each may
/// be moved to its own thread.
pub fn local_cluster(n: usize) -> Vec<LocalTransport> {
  assert!(n > 0);
  let (senders, receivers): (Vec<_>, Vec<_>) = (0..n).map(|_| unbounded::<Message>()).unzip();
  receivers
    .into_iter()
    .enumerate()
    .map(|(rank, inbox)| LocalTransport {
      rank,
      peers: senders.clone(),
      inbox,
      pending: Mutex::new(VecDeque::new()),
    })
    .collect()
}

impl LocalTransport {
  fn deliver(&self, payload: Vec<u8>, dst: Rank, tag: Tag) -> Result<(), TransportError> {
    let sender = self.peers.get(dst).ok_or(TransportError::InvalidRank(dst))?;
    sender
      .send(Message { src: self.rank, tag, payload })
      .map_err(|_| TransportError::ChannelClosed)
  }

  /// Removes and returns the earliest-arrived message matching the selector,
  /// blocking until one shows up.
  fn take_matching(&self, src: Option<Rank>, tag: Option<Tag>) -> Result<Message, TransportError> {
    {
      let mut pending = self.pending.lock().unwrap();
      if let Some(pos) = pending.iter().position(|m| m.matches(src, tag)) {
        return Ok(pending.remove(pos).unwrap());
      }
    }
    loop {
      let msg = self.inbox.recv().map_err(|_| TransportError::ChannelClosed)?;
      if msg.matches(src, tag) {
        return Ok(msg);
      }
      self.pending.lock().unwrap().push_back(msg);
    }
  }
}

impl Transport for LocalTransport {
  type Request = LocalRequest;

  fn rank(&self) -> Rank {
    self.rank
  }

  fn size(&self) -> usize {
    self.peers.len()
  }

  fn send(&self, buf: &[u8], dst: Rank, tag: Tag) -> Result<(), TransportError> {
    self.deliver(buf.to_vec(), dst, tag)
  }

  fn recv(
    &self,
    buf: &mut [u8],
    src: Option<Rank>,
    tag: Option<Tag>,
  ) -> Result<Status, TransportError> {
    let msg = self.take_matching(src, tag)?;
    if msg.payload.len() > buf.len() {
      return Err(TransportError::Truncated { got: msg.payload.len(), capacity: buf.len() });
    }
    buf[..msg.payload.len()].copy_from_slice(&msg.payload);
    Ok(Status { source: msg.src, tag: msg.tag, count: msg.payload.len() })
  }

  fn isend(&self, buf: &[u8], dst: Rank, tag: Tag) -> Result<Self::Request, TransportError> {
    // The inbox is unbounded, so the staged copy is handed over eagerly; the
    // request still reports completion through waitany exactly once.
    self.deliver(buf.to_vec(), dst, tag)?;
    Ok(LocalRequest::Send { dst, tag, len: buf.len() })
  }

  fn irecv(
    &self,
    capacity: usize,
    src: Option<Rank>,
    tag: Option<Tag>,
  ) -> Result<Self::Request, TransportError> {
    if let Some(peer) = src {
      if peer >= self.peers.len() {
        return Err(TransportError::InvalidRank(peer));
      }
    }
    Ok(LocalRequest::Recv { src, tag, capacity })
  }

  fn waitany(&self, reqs: &mut [Self::Request]) -> Result<(usize, Completion), TransportError> {
    // Finished sends are reported first, one per call.
    for (index, slot) in reqs.iter_mut().enumerate() {
      if let LocalRequest::Send { dst, tag, len } = *slot {
        *slot = LocalRequest::Null;
        debug!(rank = self.rank, dst, tag, len, "send complete");
        return Ok((index, Completion::Send { status: Status { source: dst, tag, count: len } }));
      }
    }

    if reqs.iter().all(|r| r.is_null()) {
      return Err(TransportError::NoActiveRequests);
    }

    loop {
      {
        let mut pending = self.pending.lock().unwrap();
        // Offer parked messages in arrival order to the posted receives.
        for pos in 0..pending.len() {
          for (index, slot) in reqs.iter_mut().enumerate() {
            let LocalRequest::Recv { src, tag, capacity } = *slot else { continue };
            if !pending[pos].matches(src, tag) {
              continue;
            }
            if pending[pos].payload.len() > capacity {
              return Err(TransportError::Truncated {
                got: pending[pos].payload.len(),
                capacity,
              });
            }
            let msg = pending.remove(pos).unwrap();
            *slot = LocalRequest::Null;
            let status = Status { source: msg.src, tag: msg.tag, count: msg.payload.len() };
            debug!(rank = self.rank, src = status.source, tag = status.tag, count = status.count, "recv complete");
            return Ok((index, Completion::Recv { data: msg.payload, status }));
          }
        }
      }
      let msg = self.inbox.recv().map_err(|_| TransportError::ChannelClosed)?;
      self.pending.lock().unwrap().push_back(msg);
    }
  }
}
