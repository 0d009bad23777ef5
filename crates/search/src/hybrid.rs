//! Hybrid fusion of text, graph-context, and similarity search branches
//! (spec §4.10 "Hybrid search").

use rustc_hash::FxHashMap;

use tgdb_core::{Node, TgdbResult, TgdbError, LimitRule};

/// How branch scores are combined into one ranking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FusionMode {
    /// Sum of branch scores scaled by their weight, no normalization.
    Linear,
    /// Reciprocal Rank Fusion: each branch contributes `1 / (rank + 1)`.
    Rank,
    /// Each branch's scores are normalized to `[0, 1]` by its own max
    /// before weighting.
    Weighted,
}

/// Weights for the three hybrid branches. Must sum to `1.0 ± 0.01`.
#[derive(Debug, Clone, Copy)]
pub struct BranchWeights {
    /// Weight for the full-text search branch.
    pub text: f64,
    /// Weight for the graph-context (hierarchy/reference) branch.
    pub graph: f64,
    /// Weight for the similarity branch.
    pub similarity: f64,
}

impl Default for BranchWeights {
    fn default() -> Self {
        BranchWeights { text: 0.5, graph: 0.3, similarity: 0.2 }
    }
}

impl BranchWeights {
    fn validate(&self) -> TgdbResult<()> {
        let sum = self.text + self.graph + self.similarity;
        if (sum - 1.0).abs() > 0.01 {
            return Err(TgdbError::validation(
                "branch_weights",
                LimitRule::IdPattern,
                Some(format!("branch weights must sum to 1.0 +/- 0.01, got {sum}")),
            ));
        }
        Ok(())
    }
}

/// One branch's scored candidates, in descending-score order.
pub type BranchRanking = Vec<(Node, f64)>;

/// A fused hybrid search result.
#[derive(Debug, Clone)]
pub struct FusedHit {
    /// The candidate node.
    pub node: Node,
    /// The fused score under the chosen [`FusionMode`].
    pub score: f64,
}

/// Fuse three branch rankings into one ordered result set (spec §4.10).
///
/// Branches need not agree on their candidate sets; a node scored by
/// only one branch is still included, with the missing branches
/// contributing zero.
pub fn fuse(
    text: &BranchRanking,
    graph: &BranchRanking,
    similarity: &BranchRanking,
    weights: BranchWeights,
    mode: FusionMode,
    max_results: usize,
) -> TgdbResult<Vec<FusedHit>> {
    weights.validate()?;

    let mut nodes: FxHashMap<String, Node> = FxHashMap::default();
    let mut scores: FxHashMap<String, f64> = FxHashMap::default();

    let mut apply = |branch: &BranchRanking, weight: f64| {
        let max = branch.iter().map(|(_, s)| *s).fold(0.0_f64, f64::max);
        for (rank, (node, raw)) in branch.iter().enumerate() {
            let contribution = match mode {
                FusionMode::Linear => *raw * weight,
                FusionMode::Rank => (1.0 / (rank as f64 + 1.0)) * weight,
                FusionMode::Weighted => {
                    if max > 0.0 {
                        (*raw / max) * weight
                    } else {
                        0.0
                    }
                }
            };
            *scores.entry(node.id.clone()).or_insert(0.0) += contribution;
            nodes.entry(node.id.clone()).or_insert_with(|| node.clone());
        }
    };

    apply(text, weights.text);
    apply(graph, weights.graph);
    apply(similarity, weights.similarity);

    let mut hits: Vec<FusedHit> = scores
        .into_iter()
        .map(|(id, score)| FusedHit { node: nodes.remove(&id).expect("node present for scored id"), score })
        .collect();
    hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    hits.truncate(max_results);
    Ok(hits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tgdb_core::{NodeType, Value};

    fn node(id: &str) -> Node {
        Node {
            id: id.to_string(),
            name: id.to_string(),
            content: String::new(),
            doc_type: None,
            owner_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            node_type: NodeType::Node,
            is_system_node: false,
            fields: Value::Object(Default::default()),
            metadata: Value::Object(Default::default()),
        }
    }

    #[test]
    fn rejects_weights_not_summing_to_one() {
        let weights = BranchWeights { text: 0.5, graph: 0.5, similarity: 0.5 };
        let result = fuse(&vec![], &vec![], &vec![], weights, FusionMode::Linear, 10);
        assert!(result.is_err());
    }

    #[test]
    fn linear_fusion_sums_weighted_scores() {
        let text = vec![(node("a"), 1.0)];
        let graph = vec![(node("a"), 1.0)];
        let hits = fuse(&text, &graph, &vec![], BranchWeights::default(), FusionMode::Linear, 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert!((hits[0].score - 0.8).abs() < 1e-9);
    }

    #[test]
    fn rank_fusion_favors_top_ranked_across_branches() {
        let text = vec![(node("a"), 10.0), (node("b"), 1.0)];
        let graph = vec![(node("b"), 10.0), (node("a"), 1.0)];
        let hits = fuse(&text, &graph, &vec![], BranchWeights::default(), FusionMode::Rank, 10).unwrap();
        assert_eq!(hits[0].node.id, "a");
    }

    #[test]
    fn union_of_branches_includes_single_branch_hits() {
        let text = vec![(node("a"), 1.0)];
        let similarity = vec![(node("z"), 1.0)];
        let hits = fuse(&text, &vec![], &similarity, BranchWeights::default(), FusionMode::Weighted, 10).unwrap();
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn max_results_truncates_output() {
        let text = vec![(node("a"), 1.0), (node("b"), 0.9), (node("c"), 0.8)];
        let hits = fuse(&text, &vec![], &vec![], BranchWeights::default(), FusionMode::Linear, 2).unwrap();
        assert_eq!(hits.len(), 2);
    }
}
