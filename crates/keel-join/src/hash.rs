//! Equality-key matching.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;

use crate::{JoinResult, Pair, partition_taken};

/// Match elements whose keys are equal, in linear time.
///
/// Each side is bucketed by its key. Within a bucket, elements pair up
/// positionally (first with first); surplus elements in a bucket become
/// leftovers. Pairs follow left input order and leftovers keep their
/// input order.
///
/// Keys must be hashable. A key type without `Hash + Eq` is rejected when
/// the caller compiles:
///
/// ```compile_fail
/// use keel_join::hash_join;
///
/// let res = hash_join(vec![1.0f64], vec![1.0f64], |l| *l, |r| *r);
/// ```
///
/// ```
/// use keel_join::hash_join;
///
/// let res = hash_join(vec![10, 11, 12], vec![13, 11, 2], |l| *l, |r| *r);
/// assert_eq!(res.pairs.len(), 1);
/// assert_eq!(res.left, vec![10, 12]);
/// assert_eq!(res.right, vec![13, 2]);
/// ```
pub fn hash_join<L, R, K, FL, FR>(
    left: Vec<L>,
    right: Vec<R>,
    left_key: FL,
    right_key: FR,
) -> JoinResult<L, R>
where
    K: Hash + Eq,
    FL: Fn(&L) -> K,
    FR: Fn(&R) -> K,
{
    let mut buckets: HashMap<K, VecDeque<usize>> = HashMap::with_capacity(right.len());
    for (ri, r) in right.iter().enumerate() {
        buckets.entry(right_key(r)).or_default().push_back(ri);
    }

    let mut left_order = Vec::new();
    let mut right_order = Vec::new();
    for (li, l) in left.iter().enumerate() {
        if let Some(ri) = buckets.get_mut(&left_key(l)).and_then(VecDeque::pop_front) {
            left_order.push(li);
            right_order.push(ri);
        }
    }

    let (matched_left, rest_left) = partition_taken(left, &left_order);
    let (matched_right, rest_right) = partition_taken(right, &right_order);
    let pairs = matched_left
        .into_iter()
        .zip(matched_right)
        .map(|(left, right)| Pair { left, right })
        .collect();

    JoinResult {
        pairs,
        left: rest_left,
        right: rest_right,
    }
}

/// [`hash_join`] with each element acting as its own key.
pub fn hash_join_by_value<T>(left: Vec<T>, right: Vec<T>) -> JoinResult<T, T>
where
    T: Hash + Eq + Clone,
{
    hash_join(left, right, T::clone, T::clone)
}
