//! Transport facade for rank-to-rank messaging.
//!
//! A thin contract over whatever carries bytes between ranks: tagged blocking
//! and non-blocking sends/recvs plus a wait-any over pending requests.
//! Messages of matching `(peer, tag)` are delivered in send order. The
//! facade owns heap staging for every in-flight asynchronous operation, so
//! callers never lend buffers across a wait.

pub mod local;

use thiserror::Error;

pub use local::{local_cluster, LocalRequest, LocalTransport};

/// Index of a cooperating process, in `[0, size)`.
pub type Rank = usize;

/// 16-bit message tag. Distinct protocol phases own distinct tags.
pub type Tag = u16;

/// Delivery report for a completed receive (or, degenerately, a send).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status {
  /// Peer the message came from (for sends: the destination).
  pub source: Rank,
  /// Tag the message was sent with.
  pub tag: Tag,
  /// Bytes actually transferred; may be less than the receive capacity.
  pub count: usize,
}

/// Errors surfaced by transport operations.
#[derive(Debug, Error)]
pub enum TransportError {
  /// Destination rank outside `[0, size)`.
  #[error("rank {0} out of range")]
  InvalidRank(Rank),
  /// The channel to a peer is gone; the job cannot continue.
  #[error("peer channel closed")]
  ChannelClosed,
  /// An incoming message does not fit the posted receive buffer.
  #[error("message of {got} bytes exceeds receive capacity {capacity}")]
  Truncated {
    /// Size of the incoming message.
    got: usize,
    /// Capacity of the posted receive.
    capacity: usize,
  },
  /// `waitany` was called while every request slot was null.
  #[error("waitany called with no active requests")]
  NoActiveRequests,
}

/// Outcome of [`Transport::waitany`] for the completed request.
#[derive(Debug)]
pub enum Completion {
  /// A send finished; its staging buffer has been released.
  Send {
    /// Report with `source` set to the destination rank.
    status: Status,
  },
  /// A receive finished; `data` is the staged message payload.
  Recv {
    /// The received bytes, length `status.count`.
    data: Vec<u8>,
    /// Delivery report.
    status: Status,
  },
}

/// A request slot: null (empty), or an in-flight send/recv.
pub trait RequestSlot: Sized {
  /// The empty slot value.
  fn null() -> Self;
  /// Whether this slot holds no in-flight operation.
  fn is_null(&self) -> bool;
}

/// Point-to-point transport between `size()` ranks.
///
/// Wildcards: `None` for the source or tag selector matches any peer or any
/// tag. Completed requests are consumed: the slot is reset to null and must
/// be re-posted by the caller if more transfers are wanted.
pub trait Transport: Send + Sync {
  /// Handle for an in-flight non-blocking operation.
  type Request: RequestSlot;

  /// This process's rank.
  fn rank(&self) -> Rank;
  /// Number of cooperating ranks.
  fn size(&self) -> usize;

  /// Blocking tagged send of `buf` to `dst`.
  fn send(&self, buf: &[u8], dst: Rank, tag: Tag) -> Result<(), TransportError>;

  /// Blocking tagged receive into `buf`. Returns the delivery report;
  /// `status.count <= buf.len()`.
  fn recv(
    &self,
    buf: &mut [u8],
    src: Option<Rank>,
    tag: Option<Tag>,
  ) -> Result<Status, TransportError>;

  /// Non-blocking send; the payload is staged internally.
  fn isend(&self, buf: &[u8], dst: Rank, tag: Tag) -> Result<Self::Request, TransportError>;

  /// Non-blocking receive of up to `capacity` bytes.
  fn irecv(
    &self,
    capacity: usize,
    src: Option<Rank>,
    tag: Option<Tag>,
  ) -> Result<Self::Request, TransportError>;

  /// Blocks until exactly one active request in `reqs` completes, consumes
  /// it (resetting the slot to null) and returns its index and outcome. The
  /// remaining requests stay pending.
  fn waitany(&self, reqs: &mut [Self::Request]) -> Result<(usize, Completion), TransportError>;
}
