// Property-based tests for lowering invariants.
//
// Three categories:
// 1. Dependency sort: random DAGs sort into edge-respecting permutations;
//    rings are reported as cycles
// 2. Rate guards: execution counts track the rate ratio, and the rendered
//    guard carries the counter start and step the simulation uses
// 3. Pipeline: generated single-domain chains compile, verify, and are
//    deterministic
//
// Uses proptest with explicit configuration to prevent CI flakiness.

use dlc::emitter::CppEmitter;
use dlc::error::LowerError;
use dlc::graph::{Element, ElementGraph, ElementId, InstanceKind};
use dlc::pass::StageCert;
use dlc::pipeline::{compile, CompileOptions};
use dlc::id::BoundaryId;
use dlc::rate::{GuardKind, RateBoundary, RateGuard};
use dlc::tree::{Program, ValueType};
use proptest::prelude::*;

// ── Generators ──────────────────────────────────────────────────────────────

/// Node count plus forward edges (i < j) and a shuffled listing order.
fn arb_dag() -> impl Strategy<Value = (usize, Vec<(usize, usize)>, Vec<usize>)> {
    (2usize..12).prop_flat_map(|n| {
        let edges = prop::collection::vec((0..n, 0..n), 0..(n * 2)).prop_map(|pairs| {
            pairs
                .into_iter()
                .filter(|(a, b)| a != b)
                .map(|(a, b)| (a.min(b), a.max(b)))
                .collect::<Vec<_>>()
        });
        let order = Just((0..n).collect::<Vec<_>>()).prop_shuffle();
        (Just(n), edges, order)
    })
}

fn build_graph(n: usize, edges: &[(usize, usize)]) -> (ElementGraph, Vec<ElementId>) {
    let mut g = ElementGraph::new();
    let ids: Vec<ElementId> = (0..n)
        .map(|i| {
            g.add(Element::instance(
                format!("e{}", i),
                InstanceKind::Scalar { ty: ValueType::Real },
                0,
            ))
        })
        .collect();
    for &(a, b) in edges {
        g.add_dependent(ids[a], ids[b]);
    }
    (g, ids)
}

/// Chain of 2..8 Audio signals, each with an optional explicit rate.
fn arb_chain() -> impl Strategy<Value = String> {
    let rate = prop_oneof![
        Just(None),
        Just(Some(100)),
        Just(Some(22050)),
        Just(Some(44100)),
        Just(Some(88200)),
    ];
    prop::collection::vec(rate, 2..8).prop_map(|rates| {
        let blocks: Vec<String> = rates
            .iter()
            .enumerate()
            .map(|(i, r)| {
                let rate = r.map(|r| format!(r#", "rate": {}"#, r)).unwrap_or_default();
                format!(
                    r#"{{"block": {{"name": "S{}", "type": "signal", "domain": "Audio", "default": 0.0{}}}}}"#,
                    i, rate
                )
            })
            .collect();
        let members: Vec<String> = (0..rates.len())
            .map(|i| format!(r#"{{"name": {{"name": "S{}"}}}}"#, i))
            .collect();
        format!(
            r#"{{"platform": {{"domain": "Audio", "rate": 44100}}, "nodes": [{}, {{"stream": {{"members": [{}]}}}}]}}"#,
            blocks.join(", "),
            members.join(", ")
        )
    })
}

/// Counter start, step amounts and rendered text of a guard, read back from
/// the emitted C++.
fn rendered_arithmetic(guard: RateGuard) -> (f64, Vec<f64>, String) {
    let boundary = RateBoundary {
        id: BoundaryId(0),
        guard,
        domain: None,
        owner: 0,
        body: String::new(),
    };
    let counter = boundary.counter();
    let (_, init) = boundary.counter_code(&CppEmitter);
    let start = init
        .strip_prefix(&format!("{} = ", counter))
        .and_then(|rest| rest.strip_suffix(";\n"))
        .and_then(|lit| lit.trim_end_matches('f').parse::<f64>().ok())
        .expect("counter initialization");
    let text = guard.render(&counter, "tick();\n", &CppEmitter);
    let step_prefix = format!("{} += ", counter);
    let steps = text
        .lines()
        .filter_map(|l| l.trim().strip_prefix(step_prefix.as_str()))
        .filter_map(|rest| rest.trim_end_matches(';').trim_end_matches('f').parse::<f64>().ok())
        .collect();
    (start, steps, text)
}

// ── 1. Dependency sort ──────────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 200,
        max_shrink_iters: 200,
        .. ProptestConfig::default()
    })]

    #[test]
    fn sort_is_an_edge_respecting_permutation((n, edges, order) in arb_dag()) {
        let (g, ids) = build_graph(n, &edges);
        let listed: Vec<ElementId> = order.iter().map(|&i| ids[i]).collect();
        let sorted = g.sort(&listed).expect("acyclic graph must sort");

        let mut seen = sorted.clone();
        seen.sort();
        let mut expected = ids.clone();
        expected.sort();
        prop_assert_eq!(seen, expected);

        prop_assert!(g.respects_order(&sorted));
        for &(a, b) in &edges {
            let pa = sorted.iter().position(|&x| x == ids[a]).unwrap();
            let pb = sorted.iter().position(|&x| x == ids[b]).unwrap();
            prop_assert!(pa < pb, "edge e{} -> e{} violated", a, b);
        }
    }

    #[test]
    fn rings_are_reported_as_cycles(n in 2usize..10) {
        let edges: Vec<(usize, usize)> = (0..n).map(|i| (i, (i + 1) % n)).collect();
        let mut g = ElementGraph::new();
        let ids: Vec<ElementId> = (0..n)
            .map(|i| g.add(Element::instance(format!("e{}", i), InstanceKind::Scalar { ty: ValueType::Real }, 0)))
            .collect();
        for &(a, b) in &edges {
            g.add_dependent(ids[a], ids[b]);
        }
        match g.sort(&ids) {
            Err(LowerError::CyclicDependency { cycle }) => prop_assert!(cycle.len() >= 2),
            other => prop_assert!(false, "expected a cycle, got {:?}", other),
        }
    }
}

// ── 2. Rate guards ──────────────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 200,
        max_shrink_iters: 100,
        .. ProptestConfig::default()
    })]

    #[test]
    fn downsample_fires_in_proportion(rate in 1u32..1000, extra in 1u32..48000, n in 1usize..500) {
        let parent = f64::from(rate + extra);
        let guard = RateGuard::new(f64::from(rate), parent).unwrap();
        prop_assert_eq!(guard.kind(), GuardKind::Downsample);
        let runs = guard.simulate(n);
        prop_assert!(runs.iter().all(|&r| r <= 1));
        let total: u32 = runs.iter().sum();
        let expected = n as f64 * f64::from(rate) / parent;
        prop_assert!((f64::from(total) - expected).abs() <= 1.0 + 1e-6,
            "total {} vs expected {}", total, expected);
    }

    #[test]
    fn upsample_runs_in_proportion(parent in 1u32..1000, factor in 2u32..16, extra in 0u32..1000, n in 1usize..200) {
        let rate = f64::from(parent * factor + extra);
        let guard = RateGuard::new(rate, f64::from(parent)).unwrap();
        prop_assert_eq!(guard.kind(), GuardKind::Upsample);
        let total: u32 = guard.simulate(n).iter().sum();
        let expected = n as f64 * rate / f64::from(parent);
        prop_assert!((f64::from(total) - expected).abs() <= 1.0 + 1e-6,
            "total {} vs expected {}", total, expected);
    }

    #[test]
    fn rendered_guard_matches_simulated_arithmetic(rate in 1u32..100_000, parent in 1u32..100_000) {
        prop_assume!(rate != parent);
        let guard = RateGuard::new(f64::from(rate), f64::from(parent)).unwrap();
        let (start, steps, text) = rendered_arithmetic(guard);
        prop_assert_eq!(start, guard.initial_counter());
        prop_assert_eq!(steps.len(), 2, "two counter updates expected in:\n{}", text);
        prop_assert!(steps.contains(&-1.0));
        let step = steps.iter().copied().find(|&s| s != -1.0).unwrap_or(-1.0);
        prop_assert!((step - guard.increment()).abs() < 1e-10,
            "rendered step {} vs simulated {}", step, guard.increment());
        match guard.kind() {
            GuardKind::Downsample => {
                prop_assert!(text.contains(">= 1.0)) {\n"), "{}", text);
                // The step follows the conditional body.
                let expected_tail = format!("+= {:.10};", guard.increment());
                prop_assert!(text.trim_end().ends_with(&expected_tail));
            }
            GuardKind::Upsample => {
                prop_assert!(text.contains("< 1.0)) {\n"), "{}", text);
                prop_assert!(text.trim_end().ends_with("+= -1.0;"));
            }
        }
    }
}

// ── 3. Pipeline ─────────────────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 50,
        max_shrink_iters: 100,
        .. ProptestConfig::default()
    })]

    #[test]
    fn generated_chains_verify_and_are_deterministic(tree in arb_chain()) {
        let program = Program::from_json(&tree).unwrap();
        let first = compile(&program, &CppEmitter, &CompileOptions::default())
            .unwrap_or_else(|e| panic!("compile failed: {}\ntree: {}", e, tree));
        let second = compile(&program, &CppEmitter, &CompileOptions::default()).unwrap();
        prop_assert!(first.cert.unwrap().all_pass());
        prop_assert_eq!(first.rendered, second.rendered);
    }
}
