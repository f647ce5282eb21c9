use std::collections::HashMap;

use super::*;
use crate::BalancerError;
use crate::Error;

fn balancer(weights: &[(&str, i64)]) -> WeightedRoundRobin {
    WeightedRoundRobin::with_nodes(weights.iter().map(|(e, w)| (e.to_string(), *w))).unwrap()
}

fn pick_sequence(
    lb: &WeightedRoundRobin,
    n: usize,
) -> Vec<String> {
    (0..n).map(|_| lb.select().unwrap().endpoint).collect()
}

#[test]
fn select_on_empty_balancer_should_fail() {
    let lb = WeightedRoundRobin::new();

    let err = lb.select().unwrap_err();
    assert!(matches!(err, Error::Balancer(BalancerError::EmptyNodeSet)));
    assert!(lb.is_empty());
}

#[test]
fn add_node_should_reject_non_positive_weight() {
    let lb = WeightedRoundRobin::new();

    assert!(lb.add_node("a".into(), 0).is_err());
    assert!(lb.add_node("a".into(), -3).is_err());
    assert_eq!(lb.len(), 0);
}

#[test]
fn select_should_produce_smooth_sequence() {
    let lb = balancer(&[("a", 5), ("b", 1), ("c", 1)]);

    assert_eq!(pick_sequence(&lb, 7), vec!["a", "a", "b", "a", "c", "a", "a"]);
}

#[test]
fn select_should_break_ties_by_insertion_order() {
    let lb = balancer(&[("a", 1), ("b", 1), ("c", 1)]);

    assert_eq!(pick_sequence(&lb, 6), vec!["a", "b", "c", "a", "b", "c"]);
}

#[test]
fn selection_counts_should_converge_to_weight_share() {
    let lb = balancer(&[("a", 4), ("b", 2), ("c", 1)]);

    let mut counts: HashMap<String, usize> = HashMap::new();
    for endpoint in pick_sequence(&lb, 700) {
        *counts.entry(endpoint).or_default() += 1;
    }

    // 700 is a whole number of 7-selection cycles, so the split is exact
    assert_eq!(counts["a"], 400);
    assert_eq!(counts["b"], 200);
    assert_eq!(counts["c"], 100);
}

#[test]
fn node_should_not_repeat_when_higher_alternative_exists() {
    let lb = balancer(&[("a", 2), ("b", 2), ("c", 1)]);

    let seq = pick_sequence(&lb, 50);
    for pair in seq.windows(2) {
        // with weights this balanced no node has enough share to run twice
        assert_ne!(pair[0], pair[1], "sequence: {seq:?}");
    }
}

#[test]
fn failure_acknowledgement_should_floor_at_one() {
    let lb = balancer(&[("a", 3), ("b", 1)]);
    let a = Node {
        endpoint: "a".into(),
        weight: 3,
    };

    for _ in 0..10 {
        lb.acknowledge(&a, false);
    }

    assert_eq!(lb.effective_weight("a"), Some(1));
}

#[test]
fn effective_weight_should_heal_within_weight_minus_effective_selections() {
    let lb = balancer(&[("a", 5), ("b", 5)]);
    let a = Node {
        endpoint: "a".into(),
        weight: 5,
    };

    lb.acknowledge(&a, false);
    lb.acknowledge(&a, false);
    assert_eq!(lb.effective_weight("a"), Some(3));

    lb.select().unwrap();
    assert_eq!(lb.effective_weight("a"), Some(4));
    lb.select().unwrap();
    assert_eq!(lb.effective_weight("a"), Some(5));

    // never exceeds the configured weight
    lb.select().unwrap();
    assert_eq!(lb.effective_weight("a"), Some(5));
}

#[test]
fn degraded_node_should_lose_share() {
    let lb = balancer(&[("a", 10), ("b", 10)]);
    let a = Node {
        endpoint: "a".into(),
        weight: 10,
    };
    for _ in 0..9 {
        lb.acknowledge(&a, false);
    }

    // a starts at effective weight 1 and heals during the first round
    let first_round = pick_sequence(&lb, 4);
    assert_eq!(first_round.iter().filter(|e| *e == "b").count(), 3);
}

#[test]
fn success_acknowledgement_should_leave_healing_to_select() {
    let lb = balancer(&[("a", 3)]);
    let a = Node {
        endpoint: "a".into(),
        weight: 3,
    };

    lb.acknowledge(&a, true);
    assert_eq!(lb.effective_weight("a"), Some(3));

    lb.acknowledge(&a, false);
    lb.acknowledge(&a, false);
    assert_eq!(lb.effective_weight("a"), Some(1));

    // select then success: one step per request, not two
    lb.select().unwrap();
    lb.acknowledge(&a, true);
    assert_eq!(lb.effective_weight("a"), Some(2));
}

#[test]
fn acknowledging_unknown_node_should_be_ignored() {
    let lb = balancer(&[("a", 1)]);

    lb.acknowledge(
        &Node {
            endpoint: "zzz".into(),
            weight: 1,
        },
        false,
    );

    assert_eq!(lb.effective_weight("a"), Some(1));
    assert_eq!(lb.nodes().len(), 1);
}
