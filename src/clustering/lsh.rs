//! Approximate clustering via MinHash signatures and LSH banding
//!
//! Each token sequence is sketched into a fixed-size MinHash signature.
//! Signatures are cut into bands and indexed; sequences sharing any band
//! are near-duplicate candidates and get unioned in a disjoint-set
//! structure. Linear in the number of sequences times the signature
//! size; trades exactness for speed on large inputs.

use std::collections::HashMap;

pub const DEFAULT_NUM_PERMUTATIONS: usize = 128;

/// Disjoint-set structure with path compression.
pub struct UnionFind {
    parents: Vec<usize>,
}

impl UnionFind {
    pub fn new(size: usize) -> Self {
        Self {
            parents: (0..size).collect(),
        }
    }

    /// Representative of the set containing `i`, flattening the walked
    /// path on the way.
    pub fn find_representative(&mut self, i: usize) -> usize {
        let mut root = i;
        while self.parents[root] != root {
            root = self.parents[root];
        }
        let mut current = i;
        while self.parents[current] != root {
            let next = self.parents[current];
            self.parents[current] = root;
            current = next;
        }
        root
    }

    pub fn union(&mut self, i: usize, j: usize) {
        let i_root = self.find_representative(i);
        let j_root = self.find_representative(j);
        self.parents[i_root] = j_root;
    }
}

// FNV-1a over the token bytes, mixed with a per-permutation seed.
fn hash_token(token: &str, seed: u64) -> u64 {
    let mut hash = 0xcbf2_9ce4_8422_2325u64 ^ seed;
    for byte in token.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

// splitmix64, turns a permutation index into an independent seed.
fn permutation_seed(index: u64) -> u64 {
    let mut z = index.wrapping_add(0x9e37_79b9_7f4a_7c15);
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

/// Fixed-size MinHash signature of a token sequence.
pub fn minhash_signature(tokens: &[String], num_perm: usize) -> Vec<u64> {
    let mut signature = vec![u64::MAX; num_perm];
    for token in tokens {
        for (i, slot) in signature.iter_mut().enumerate() {
            let hashed = hash_token(token, permutation_seed(i as u64));
            if hashed < *slot {
                *slot = hashed;
            }
        }
    }
    signature
}

/// Estimated Jaccard similarity of two signatures: the fraction of
/// matching slots.
pub fn estimate_similarity(a: &[u64], b: &[u64]) -> f64 {
    if a.is_empty() {
        return 0.0;
    }
    let matching = a.iter().zip(b).filter(|(x, y)| x == y).count();
    matching as f64 / a.len() as f64
}

/// Pick the band/row split that minimizes the combined false-positive /
/// false-negative probability mass around the threshold.
fn optimal_band_split(threshold: f64, num_perm: usize) -> (usize, usize) {
    const INTEGRATION_STEPS: usize = 100;
    let integrate = |f: &dyn Fn(f64) -> f64, from: f64, to: f64| -> f64 {
        let step = (to - from) / INTEGRATION_STEPS as f64;
        (0..INTEGRATION_STEPS)
            .map(|i| f(from + (i as f64 + 0.5) * step) * step)
            .sum()
    };

    let mut best = (1, num_perm);
    let mut min_error = f64::MAX;
    for bands in 1..=num_perm {
        let max_rows = num_perm / bands;
        for rows in 1..=max_rows {
            let collision = |s: f64| 1.0 - (1.0 - s.powi(rows as i32)).powi(bands as i32);
            let false_positives = integrate(&collision, 0.0, threshold);
            let false_negatives = integrate(&|s| 1.0 - collision(s), threshold, 1.0);
            let error = false_positives + false_negatives;
            if error < min_error {
                min_error = error;
                best = (bands, rows);
            }
        }
    }
    best
}

/// Similarity-threshold index over MinHash signatures.
pub struct LshIndex {
    bands: usize,
    rows: usize,
    buckets: HashMap<(usize, u64), Vec<usize>>,
}

impl LshIndex {
    pub fn new(threshold: f64, num_perm: usize) -> Self {
        let (bands, rows) = optimal_band_split(threshold, num_perm);
        Self {
            bands,
            rows,
            buckets: HashMap::new(),
        }
    }

    fn band_key(&self, signature: &[u64], band: usize) -> (usize, u64) {
        let slice = &signature[band * self.rows..(band + 1) * self.rows];
        let mut combined = 0xcbf2_9ce4_8422_2325u64;
        for value in slice {
            combined ^= *value;
            combined = combined.wrapping_mul(0x0000_0100_0000_01b3);
        }
        (band, combined)
    }

    pub fn insert(&mut self, index: usize, signature: &[u64]) {
        for band in 0..self.bands {
            let key = self.band_key(signature, band);
            self.buckets.entry(key).or_default().push(index);
        }
    }

    /// Indices sharing at least one band with the signature.
    pub fn query(&self, signature: &[u64]) -> Vec<usize> {
        let mut candidates = vec![];
        for band in 0..self.bands {
            if let Some(bucket) = self.buckets.get(&self.band_key(signature, band)) {
                candidates.extend_from_slice(bucket);
            }
        }
        candidates.sort_unstable();
        candidates.dedup();
        candidates
    }
}

/// Connected components over the LSH candidate graph.
pub struct LshConnectedComponents {
    threshold: f64,
    num_perm: usize,
}

impl LshConnectedComponents {
    pub fn new(threshold: f64, num_perm: usize) -> Self {
        Self {
            threshold,
            num_perm,
        }
    }

    /// Component labels for each sequence, dense integers in first-seen
    /// (input) order.
    pub fn labels(&self, sequences: &[Vec<String>]) -> Vec<i32> {
        if sequences.is_empty() {
            return vec![];
        }
        let signatures: Vec<Vec<u64>> = sequences
            .iter()
            .map(|seq| minhash_signature(seq, self.num_perm))
            .collect();

        let mut index = LshIndex::new(self.threshold, self.num_perm);
        for (i, signature) in signatures.iter().enumerate() {
            index.insert(i, signature);
        }

        let mut union_find = UnionFind::new(sequences.len());
        for (i, signature) in signatures.iter().enumerate() {
            for candidate in index.query(signature) {
                if candidate != i {
                    union_find.union(i, candidate);
                }
            }
        }

        let mut components: HashMap<usize, i32> = HashMap::new();
        let mut labels = Vec::with_capacity(sequences.len());
        let mut next_label = 0;
        for i in 0..sequences.len() {
            let root = union_find.find_representative(i);
            let label = *components.entry(root).or_insert_with(|| {
                let assigned = next_label;
                next_label += 1;
                assigned
            });
            labels.push(label);
        }
        labels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seq(tokens: &[&str]) -> Vec<String> {
        tokens.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn union_find_components() {
        let mut uf = UnionFind::new(5);
        uf.union(0, 1);
        uf.union(3, 4);
        uf.union(1, 3);
        assert_eq!(uf.find_representative(0), uf.find_representative(4));
        assert_ne!(uf.find_representative(0), uf.find_representative(2));
    }

    #[test]
    fn identical_sequences_have_identical_signatures() {
        let a = minhash_signature(&seq(&["wget", "chmod", "./x"]), 64);
        let b = minhash_signature(&seq(&["wget", "chmod", "./x"]), 64);
        assert_eq!(a, b);
        assert_eq!(estimate_similarity(&a, &b), 1.0);
    }

    #[test]
    fn signature_estimates_track_jaccard() {
        // 7 of 8 shared tokens: estimate should land well above 0.5
        let a = minhash_signature(
            &seq(&["a", "b", "c", "d", "e", "f", "g", "h"]),
            DEFAULT_NUM_PERMUTATIONS,
        );
        let b = minhash_signature(
            &seq(&["a", "b", "c", "d", "e", "f", "g", "x"]),
            DEFAULT_NUM_PERMUTATIONS,
        );
        assert!(estimate_similarity(&a, &b) > 0.5);

        let disjoint = minhash_signature(&seq(&["p", "q"]), DEFAULT_NUM_PERMUTATIONS);
        assert!(estimate_similarity(&a, &disjoint) < 0.2);
    }

    #[test]
    fn components_group_identical_and_separate_disjoint() {
        let engine = LshConnectedComponents::new(0.55, DEFAULT_NUM_PERMUTATIONS);
        let labels = engine.labels(&[
            seq(&["wget", "http://a/x", "chmod", "+x", "x"]),
            seq(&["uname", "-a"]),
            seq(&["wget", "http://a/x", "chmod", "+x", "x"]),
        ]);
        assert_eq!(labels[0], labels[2]);
        assert_ne!(labels[0], labels[1]);
        // labels are dense and first-seen ordered
        assert_eq!(labels[0], 0);
        assert_eq!(labels[1], 1);
    }

    #[test]
    fn labels_are_deterministic() {
        let input = vec![seq(&["a", "b", "c"]), seq(&["x", "y"]), seq(&["a", "b", "d"])];
        let engine = LshConnectedComponents::new(0.55, DEFAULT_NUM_PERMUTATIONS);
        assert_eq!(engine.labels(&input), engine.labels(&input));
    }

    #[test]
    fn band_split_covers_all_permutations_at_most() {
        let (bands, rows) = optimal_band_split(0.55, 128);
        assert!(bands * rows <= 128);
        assert!(bands >= 1 && rows >= 1);
    }
}
