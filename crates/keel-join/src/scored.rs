//! Scored greedy matching.

use crate::{JoinResult, Pair, partition_taken};

/// Match `left` against `right` using `score`.
///
/// A pair is eligible when `score(l, r) >= 0`; lower is better and `0` is
/// a perfect match. The cheapest eligible pair among still-unmatched
/// elements is committed, repeatedly, until none remain. Equal scores are
/// broken by left input position, then right input position, so the
/// result depends only on the inputs and never on hashing order.
///
/// Pairs come back in the order they were committed.
///
/// ```
/// use keel_join::join;
///
/// let res = join(vec![10i64, 11, 12], vec![13i64, 1, 2], |l, r| l - r);
/// let pairs: Vec<_> = res.pairs.iter().map(|p| (p.left, p.right)).collect();
/// assert_eq!(pairs, vec![(10, 2), (11, 1)]);
/// assert_eq!(res.left, vec![12]);
/// assert_eq!(res.right, vec![13]);
/// ```
pub fn join<L, R, F>(left: Vec<L>, right: Vec<R>, score: F) -> JoinResult<L, R>
where
    F: Fn(&L, &R) -> i64,
{
    let mut candidates: Vec<(i64, usize, usize)> = Vec::new();
    for (li, l) in left.iter().enumerate() {
        for (ri, r) in right.iter().enumerate() {
            let s = score(l, r);
            if s >= 0 {
                candidates.push((s, li, ri));
            }
        }
    }
    // Scores never change, so walking the sorted list and skipping used
    // elements is the same as re-picking the global minimum each round.
    candidates.sort_unstable();

    let mut left_used = vec![false; left.len()];
    let mut right_used = vec![false; right.len()];
    let mut left_order = Vec::new();
    let mut right_order = Vec::new();
    for (_, li, ri) in candidates {
        if left_used[li] || right_used[ri] {
            continue;
        }
        left_used[li] = true;
        right_used[ri] = true;
        left_order.push(li);
        right_order.push(ri);
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
