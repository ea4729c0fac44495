//! Exact pairwise clustering over token sets
//!
//! Builds the full symmetric Jaccard similarity matrix, converts it to a
//! distance matrix, and runs a density clustering with a neighbor
//! distance threshold and a minimum cluster size of one, so isolated
//! sequences end up as singleton clusters rather than noise. Quadratic
//! in the number of sequences; meant for moderate inputs.

use std::collections::HashSet;

/// Jaccard similarity of two token sets: |intersection| / |union|.
/// Two empty sets compare as 0 by convention.
pub fn jaccard_similarity(a: &HashSet<&str>, b: &HashSet<&str>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count() as f64;
    let union = a.union(b).count() as f64;
    intersection / union
}

/// Full symmetric similarity matrix. The diagonal is fixed at 1.
pub fn similarity_matrix(sequences: &[Vec<String>]) -> Vec<Vec<f64>> {
    let token_sets: Vec<HashSet<&str>> = sequences
        .iter()
        .map(|seq| seq.iter().map(String::as_str).collect())
        .collect();
    let n = token_sets.len();
    let mut matrix = vec![vec![0.0; n]; n];
    for i in 0..n {
        matrix[i][i] = 1.0;
        for j in (i + 1)..n {
            let similarity = jaccard_similarity(&token_sets[i], &token_sets[j]);
            matrix[i][j] = similarity;
            matrix[j][i] = similarity;
        }
    }
    matrix
}

pub struct ExactClustering {
    /// Maximum distance (1 - similarity) for two sequences to count as
    /// neighbors.
    eps: f64,
    /// Minimum number of neighbors (including the point itself) for a
    /// core point.
    min_cluster_size: usize,
}

impl ExactClustering {
    pub fn new(eps: f64) -> Self {
        Self {
            eps,
            min_cluster_size: 1,
        }
    }

    /// Density clustering over the precomputed distance matrix.
    ///
    /// With a minimum cluster size of 1 every point is a core point and
    /// no sequence stays unassigned. Deterministic for a fixed input
    /// order and threshold: labels are dense integers in first-seen
    /// (input) order.
    pub fn labels(&self, sequences: &[Vec<String>]) -> Vec<i32> {
        let n = sequences.len();
        if n == 0 {
            return vec![];
        }
        let similarities = similarity_matrix(sequences);

        let neighbors: Vec<Vec<usize>> = (0..n)
            .map(|i| {
                (0..n)
                    .filter(|&j| 1.0 - similarities[i][j] <= self.eps)
                    .collect()
            })
            .collect();

        let mut labels = vec![-1i32; n];
        let mut next_label = 0;
        for start in 0..n {
            if labels[start] != -1 || neighbors[start].len() < self.min_cluster_size {
                continue;
            }
            // expand the density-reachable set from this core point
            labels[start] = next_label;
            let mut queue = vec![start];
            while let Some(point) = queue.pop() {
                if neighbors[point].len() < self.min_cluster_size {
                    continue;
                }
                for &neighbor in &neighbors[point] {
                    if labels[neighbor] == -1 {
                        labels[neighbor] = next_label;
                        queue.push(neighbor);
                    }
                }
            }
            next_label += 1;
        }
        labels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set<'a>(tokens: &[&'a str]) -> HashSet<&'a str> {
        tokens.iter().copied().collect()
    }

    fn seq(tokens: &[&str]) -> Vec<String> {
        tokens.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn similarity_is_bounded_and_symmetric() {
        let pairs = [
            (set(&["a", "b", "c"]), set(&["b", "c", "d"])),
            (set(&["a"]), set(&["a"])),
            (set(&["a"]), set(&["b"])),
            (set(&[]), set(&["b"])),
        ];
        for (a, b) in &pairs {
            let forward = jaccard_similarity(a, b);
            let backward = jaccard_similarity(b, a);
            assert!((0.0..=1.0).contains(&forward));
            assert_eq!(forward, backward);
        }
    }

    #[test]
    fn similarity_is_one_iff_sets_are_equal() {
        assert_eq!(jaccard_similarity(&set(&["a", "b"]), &set(&["b", "a"])), 1.0);
        assert!(jaccard_similarity(&set(&["a", "b"]), &set(&["a", "b", "c"])) < 1.0);
    }

    #[test]
    fn similarity_of_disjoint_or_both_empty_is_zero() {
        assert_eq!(jaccard_similarity(&set(&["a"]), &set(&["b"])), 0.0);
        assert_eq!(jaccard_similarity(&set(&[]), &set(&[])), 0.0);
    }

    #[test]
    fn partial_overlap() {
        // {a,b,c} vs {b,c,d}: 2 shared of 4 total
        assert_eq!(
            jaccard_similarity(&set(&["a", "b", "c"]), &set(&["b", "c", "d"])),
            0.5
        );
    }

    #[test]
    fn matrix_diagonal_is_one_even_for_empty_sequences() {
        let matrix = similarity_matrix(&[seq(&[]), seq(&["a"])]);
        assert_eq!(matrix[0][0], 1.0);
        assert_eq!(matrix[1][1], 1.0);
        assert_eq!(matrix[0][1], 0.0);
    }

    #[test]
    fn isolated_sequences_become_singletons() {
        let labels = ExactClustering::new(0.45).labels(&[
            seq(&["wget", "http://a/x"]),
            seq(&["uname", "-a"]),
        ]);
        assert_eq!(labels, vec![0, 1]);
    }

    #[test]
    fn near_duplicates_share_a_cluster() {
        let labels = ExactClustering::new(0.45).labels(&[
            seq(&["wget", "http://a/x", "chmod", "+x", "x", "./x"]),
            seq(&["wget", "http://a/y", "chmod", "+x", "x", "./x"]),
            seq(&["uname", "-a"]),
        ]);
        assert_eq!(labels[0], labels[1]);
        assert_ne!(labels[0], labels[2]);
    }

    #[test]
    fn deterministic_for_fixed_input_order() {
        let input = vec![
            seq(&["a", "b"]),
            seq(&["c", "d"]),
            seq(&["a", "b", "c"]),
        ];
        let first = ExactClustering::new(0.6).labels(&input);
        let second = ExactClustering::new(0.6).labels(&input);
        assert_eq!(first, second);
    }
}
