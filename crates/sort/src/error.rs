//! Error taxonomy for the sort pipeline.

use std::sync::Mutex;

use distsort_transport::TransportError;
use thiserror::Error;

/// Failures surfaced by the sort pipeline. Array contents are undefined once
/// any of these is returned; the caller must discard the buffer.
#[derive(Debug, Error)]
pub enum Error {
  /// The entropy source failed.
  #[error("random generator failure: {0}")]
  Rng(String),
  /// A peer send/recv/wait returned non-OK.
  #[error(transparent)]
  Transport(#[from] TransportError),
  /// Every rank reported an empty active slice during pivot selection.
  #[error("all ranks reported an empty slice")]
  AllRanksEmpty,
  /// A peer sent a message that does not fit the protocol step.
  #[error("protocol violation: {0}")]
  Protocol(String),
}

/// Pipeline result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// First-error-wins slot shared with iteration kernels. Later errors are
/// dropped; remaining iterations keep running (each writes independent
/// cells, so there is nothing to cancel).
pub(crate) struct FirstError {
  slot: Mutex<Option<Error>>,
}

impl FirstError {
  pub(crate) fn new() -> Self {
    Self { slot: Mutex::new(None) }
  }

  pub(crate) fn record(&self, error: Error) {
    let mut slot = self.slot.lock().unwrap();
    if slot.is_none() {
      *slot = Some(error);
    }
  }

  pub(crate) fn take(&self) -> Option<Error> {
    self.slot.lock().unwrap().take()
  }
}
