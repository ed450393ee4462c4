//! The sorted record type and its `(key, orp_id)` comparators.

use std::cmp::Ordering;

use bytemuck::{Pod, Zeroable};
use distsort_primitives::impl_cmov_for_pod;
use distsort_primitives::traits::Cmov;

/// Opaque payload bytes carried alongside each key.
pub const PAYLOAD_LEN: usize = 48;

/// A fixed-size, byte-blittable record. Ordering is the lexicographic
/// `(key, orp_id)` pair; the payload never participates in comparisons.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct Elem {
  /// Sort key.
  pub key: u64,
  /// Random tiebreak, assigned after the oblivious shuffle.
  pub orp_id: u64,
  /// Application payload, carried verbatim.
  pub payload: [u8; PAYLOAD_LEN],
}

impl_cmov_for_pod!(Elem);

impl Default for Elem {
  fn default() -> Self {
    Self::zeroed()
  }
}

impl Elem {
  /// A record with the given key, zero ORP ID and zero payload.
  pub fn with_key(key: u64) -> Self {
    Elem { key, ..Self::zeroed() }
  }

  /// `(key, orp_id)` comparison with both legs always evaluated, so the
  /// memory trace does not reveal whether two keys were equal.
  fn cmp_ct(&self, other_key: u64, other_orp_id: u64) -> Ordering {
    let key = (self.key > other_key) as i8 - (self.key < other_key) as i8;
    let orp = (self.orp_id > other_orp_id) as i8 - (self.orp_id < other_orp_id) as i8;

    let mut res = key;
    res.cmov(&orp, key == 0);

    res.cmp(&0)
  }

  /// Compares this record against a selected splitter.
  pub fn cmp_splitter(&self, splitter: &Splitter) -> Ordering {
    self.cmp_ct(splitter.key, splitter.orp_id)
  }
}

impl PartialOrd for Elem {
  #[allow(clippy::non_canonical_partial_ord_impl)]
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
    Some(self.cmp_ct(other.key, other.orp_id))
  }
}

impl Ord for Elem {
  fn cmp(&self, other: &Self) -> Ordering {
    self.cmp_ct(other.key, other.orp_id)
  }
}

/// A `(key, orp_id)` pair bounding a partition, exchanged between ranks
/// during pivot selection.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct Splitter {
  /// Key of the selected order statistic.
  pub key: u64,
  /// Its ORP ID.
  pub orp_id: u64,
}

impl From<&Elem> for Splitter {
  fn from(elem: &Elem) -> Self {
    Splitter { key: elem.key, orp_id: elem.orp_id }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn elem(key: u64, orp_id: u64) -> Elem {
    Elem { key, orp_id, ..Elem::zeroed() }
  }

  #[test]
  fn test_key_dominates() {
    assert_eq!(elem(1, 9).cmp(&elem(2, 0)), Ordering::Less);
    assert_eq!(elem(2, 0).cmp(&elem(1, 9)), Ordering::Greater);
  }

  #[test]
  fn test_orp_breaks_ties() {
    assert_eq!(elem(5, 1).cmp(&elem(5, 2)), Ordering::Less);
    assert_eq!(elem(5, 2).cmp(&elem(5, 1)), Ordering::Greater);
    assert_eq!(elem(5, 3).cmp(&elem(5, 3)), Ordering::Equal);
  }

  #[test]
  fn test_payload_is_ignored() {
    let mut a = elem(7, 7);
    let b = elem(7, 7);
    a.payload[0] = 0xff;
    assert_eq!(a.cmp(&b), Ordering::Equal);
  }

  #[test]
  fn test_splitter_comparison_matches_elem_order() {
    let a = elem(4, 10);
    let s = Splitter::from(&elem(4, 11));
    assert_eq!(a.cmp_splitter(&s), Ordering::Less);
    let s = Splitter::from(&a);
    assert_eq!(a.cmp_splitter(&s), Ordering::Equal);
  }

  #[test]
  fn test_elem_is_blittable() {
    assert_eq!(std::mem::size_of::<Elem>(), 16 + PAYLOAD_LEN);
    let e = elem(0x0102030405060708, 1);
    let bytes = bytemuck::bytes_of(&e);
    let back: &Elem = bytemuck::from_bytes(bytes);
    assert_eq!(*back, e);
  }
}
