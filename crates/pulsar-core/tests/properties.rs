//! Property-based tests for pulsar-core buffer, label and graph primitives.

use proptest::prelude::*;
use pulsar_core::nodes::{Gain, SineSource, Sink};
use pulsar_core::{
    BufferType, EventSequence, Graph, GraphError, LabelSet, NodeId, SequenceWriter, compile,
    samples_from_bytes,
};

fn bytes_of(samples: &[f32]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_ne_bytes()).collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Mixing into silence yields the source unchanged.
    #[test]
    fn mix_into_silence_is_identity(
        input in prop::collection::vec(-1.0f32..=1.0f32, 64),
    ) {
        let ty = BufferType::FloatArray(64);
        let mut dst = vec![0u8; ty.size()];
        ty.mix(&mut dst, &bytes_of(&input)).unwrap();
        prop_assert_eq!(samples_from_bytes(&dst), input);
    }

    /// Mix order does not matter beyond float rounding.
    #[test]
    fn mix_is_commutative(
        a in prop::collection::vec(-1.0f32..=1.0f32, 32),
        b in prop::collection::vec(-1.0f32..=1.0f32, 32),
    ) {
        let ty = BufferType::FloatArray(32);
        let mut ab = bytes_of(&a);
        ty.mix(&mut ab, &bytes_of(&b)).unwrap();
        let mut ba = bytes_of(&b);
        ty.mix(&mut ba, &bytes_of(&a)).unwrap();
        for (x, y) in samples_from_bytes(&ab).iter().zip(samples_from_bytes(&ba).iter()) {
            prop_assert!((x - y).abs() < 1e-6);
        }
    }

    /// Grouping of mixes does not matter beyond float rounding.
    #[test]
    fn mix_is_associative(
        a in prop::collection::vec(-1.0f32..=1.0f32, 32),
        b in prop::collection::vec(-1.0f32..=1.0f32, 32),
        c in prop::collection::vec(-1.0f32..=1.0f32, 32),
    ) {
        let ty = BufferType::FloatArray(32);
        let mut left = bytes_of(&a);
        ty.mix(&mut left, &bytes_of(&b)).unwrap();
        ty.mix(&mut left, &bytes_of(&c)).unwrap();

        let mut bc = bytes_of(&b);
        ty.mix(&mut bc, &bytes_of(&c)).unwrap();
        let mut right = bytes_of(&a);
        ty.mix(&mut right, &bc).unwrap();

        for (x, y) in samples_from_bytes(&left).iter().zip(samples_from_bytes(&right).iter()) {
            prop_assert!((x - y).abs() <= 1e-6 * (1.0 + x.abs()), "{} vs {}", x, y);
        }
    }

    /// A label set always matches any subset of itself.
    #[test]
    fn labels_match_their_subsets(
        pairs in prop::collection::btree_map("[a-z]{1,6}", "[a-z0-9]{0,6}", 0..8),
        keep in prop::collection::vec(any::<bool>(), 8),
    ) {
        let full = pairs
            .iter()
            .fold(LabelSet::new(), |set, (k, v)| set.with(k.as_str(), v.as_str()));
        let subset = pairs
            .iter()
            .zip(keep.iter())
            .filter(|(_, k)| **k)
            .fold(LabelSet::new(), |set, ((k, v), _)| set.with(k.as_str(), v.as_str()));
        prop_assert!(full.matches(&subset));
        prop_assert!(full.matches(&LabelSet::new()));
    }

    /// Every event that fits is read back in write order.
    #[test]
    fn event_sequence_preserves_order(
        events in prop::collection::vec(
            (0i64..4096, prop::collection::vec(any::<u8>(), 0..24)),
            0..32,
        ),
    ) {
        let mut buf = vec![0u8; 2048];
        let mut writer = SequenceWriter::new(&mut buf);
        let written: Vec<_> = events
            .iter()
            .filter(|(frame, data)| writer.push(*frame, data))
            .cloned()
            .collect();
        let dropped = writer.dropped();
        prop_assert_eq!(written.len() + dropped, events.len());

        let seq = EventSequence::parse(&buf).unwrap();
        let read: Vec<_> = seq.iter().map(|e| (e.frame, e.data.to_vec())).collect();
        prop_assert_eq!(read, written);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// A chain of any length compiles, and closing it into a loop is rejected.
    #[test]
    fn chains_compile_and_loops_are_rejected(len in 1usize..12) {
        let mut graph = Graph::new();
        graph.add_node(Box::new(SineSource::new("src", 110.0))).unwrap();
        let mut prev = NodeId::new("src");
        for i in 0..len {
            let name = format!("g{i}");
            graph.add_node(Box::new(Gain::new(name.as_str(), 0.5))).unwrap();
            let id = NodeId::new(&name);
            graph.connect(&prev, "out", &id, "in").unwrap();
            prev = id;
        }
        graph.add_node(Box::new(Sink::mono("sink"))).unwrap();
        graph.connect(&prev, "out", &NodeId::new("sink"), "mono").unwrap();

        let spec = compile(&graph, 64).unwrap();
        prop_assert!(!spec.opcodes().is_empty());

        if len >= 2 {
            let err = graph
                .connect(&prev, "out", &NodeId::new("g0"), "in")
                .unwrap_err();
            prop_assert!(matches!(err, GraphError::CycleDetected));
        }
    }
}
