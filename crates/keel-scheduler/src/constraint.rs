//! Placement constraint evaluation.

use std::collections::HashSet;

use keel_state::{Container, Minion, Placement};
use tracing::warn;

/// Whether `container` may run on `machine` alongside `peers`.
///
/// Rules with an `other_label` are co-location rules. Exclusive ones are
/// symmetric: the container may not carry the target label while a peer
/// carries the other label, nor the reverse. Inclusive co-location cannot
/// be decided from one machine's contents and is treated as satisfied.
///
/// Rules restricting machine attributes (`provider`, `region`, `size`,
/// `floating_ip`) apply to containers carrying the target label and are
/// violated when `exclusive` equals "the attribute matches".
///
/// `peers` may include `container` itself; it is skipped by id.
pub fn valid_placement(
    constraints: &[Placement],
    machine: &Minion,
    peers: &[&Container],
    container: &Container,
) -> bool {
    let own: HashSet<&str> = container.labels.iter().map(String::as_str).collect();
    let mut peer_labels: Option<HashSet<&str>> = None;

    for rule in constraints {
        if !rule.other_label.is_empty() {
            let peer_labels =
                peer_labels.get_or_insert_with(|| collect_peer_labels(peers, container));
            if !valid_exclusion(rule, &own, peer_labels) {
                return false;
            }
        }

        if !own.contains(rule.target_label.as_str()) {
            continue;
        }

        let attributes = [
            (&rule.provider, &machine.provider),
            (&rule.region, &machine.region),
            (&rule.size, &machine.size),
            (&rule.floating_ip, &machine.floating_ip),
        ];
        for (wanted, actual) in attributes {
            if !wanted.is_empty() && rule.exclusive == (wanted == actual) {
                return false;
            }
        }
    }

    true
}

fn collect_peer_labels<'a>(peers: &[&'a Container], container: &Container) -> HashSet<&'a str> {
    peers
        .iter()
        .filter(|peer| peer.id != container.id)
        .flat_map(|peer| peer.labels.iter().map(String::as_str))
        .collect()
}

fn valid_exclusion(rule: &Placement, own: &HashSet<&str>, peers: &HashSet<&str>) -> bool {
    if !rule.exclusive {
        warn!(
            target_label = %rule.target_label,
            other_label = %rule.other_label,
            "inclusive label placement constraints are not supported"
        );
        return true;
    }

    let target = rule.target_label.as_str();
    let other = rule.other_label.as_str();
    let forward = own.contains(target) && peers.contains(other);
    let backward = own.contains(other) && peers.contains(target);
    !forward && !backward
}
