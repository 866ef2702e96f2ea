//! IVF recall against the exact-search oracle.

use crate::common::{clustered_unit_vectors, random_unit_vectors};
use clipdex::vector::{InternalId, IvfIndex};
use std::collections::HashSet;

const DIMENSION: usize = 64;
const K: usize = 10;

fn build_index() -> (IvfIndex, Vec<Vec<f32>>) {
    let data = clustered_unit_vectors(2_000, DIMENSION, 20, 41);
    let mut index = IvfIndex::bootstrap(&data[..500], 16, 7).unwrap();
    for (i, vector) in data.iter().enumerate() {
        index.append(vector, InternalId::new(i as u64)).unwrap();
    }
    let queries = clustered_unit_vectors(50, DIMENSION, 20, 42);
    (index, queries)
}

fn recall(index: &IvfIndex, queries: &[Vec<f32>], nprobe: usize) -> f64 {
    let mut found = 0usize;
    for query in queries {
        let truth: HashSet<_> = index
            .exact_search(query, K)
            .unwrap()
            .into_iter()
            .map(|n| n.id)
            .collect();
        found += index
            .search(query, K, nprobe)
            .unwrap()
            .into_iter()
            .filter(|n| truth.contains(&n.id))
            .count();
    }
    found as f64 / (queries.len() * K) as f64
}

#[test]
fn test_recall_is_monotonic_in_nprobe() {
    let (index, queries) = build_index();
    let mut previous = 0.0;
    for nprobe in [1, 2, 3, 4, 8, 16] {
        let r = recall(&index, &queries, nprobe);
        assert!(
            r + 1e-9 >= previous,
            "recall dropped from {previous} to {r} at nprobe={nprobe}"
        );
        previous = r;
    }
    // Probing every list is exact
    assert!((previous - 1.0).abs() < 1e-9);
}

#[test]
fn test_serialized_index_answers_identically() {
    let (index, queries) = build_index();
    let restored = IvfIndex::from_bytes(&index.to_bytes()).unwrap();
    assert_eq!(restored, index);
    for query in queries.iter().chain(random_unit_vectors(5, DIMENSION, 9).iter()) {
        assert_eq!(
            restored.search(query, K, 3).unwrap(),
            index.search(query, K, 3).unwrap()
        );
    }
}
