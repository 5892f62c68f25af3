//! keel-join — reconciliation primitives.
//!
//! Every sync loop in Keel reduces to the same question: given an
//! "observed" collection and a "desired" one, which elements correspond,
//! which must be created, and which must be deleted. This crate answers it
//! once, generically.
//!
//! # Primitives
//!
//! - [`join`] — scored matching for records without a natural equality key.
//!   Greedy: the globally cheapest eligible pair is committed first.
//! - [`hash_join`] — equality-key matching in linear time. Used by the
//!   replicator with an identity-stripped projection of each record as key.
//!
//! Both functions consume their inputs and hand every element back, either
//! inside a [`Pair`] or in one of the leftover vectors.

pub mod hash;
pub mod scored;

pub use hash::{hash_join, hash_join_by_value};
pub use scored::join;

/// A matched left/right element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pair<L, R> {
    pub left: L,
    pub right: R,
}

/// Outcome of a join: matched pairs plus unmatched elements from each side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinResult<L, R> {
    pub pairs: Vec<Pair<L, R>>,
    /// Left elements with no partner, in input order.
    pub left: Vec<L>,
    /// Right elements with no partner, in input order.
    pub right: Vec<R>,
}

impl<L, R> JoinResult<L, R> {
    /// Whether both sides matched completely.
    pub fn is_exact(&self) -> bool {
        self.left.is_empty() && self.right.is_empty()
    }
}

/// Split `items` into the elements at `taken` positions (in `order`) and
/// the rest (in input order).
pub(crate) fn partition_taken<T>(items: Vec<T>, order: &[usize]) -> (Vec<T>, Vec<T>) {
    let mut slots: Vec<Option<T>> = items.into_iter().map(Some).collect();
    let taken = order
        .iter()
        .filter_map(|&idx| slots[idx].take())
        .collect();
    let rest = slots.into_iter().flatten().collect();
    (taken, rest)
}
