//! Emoji co-occurrence graph construction and sentiment aggregates.
//!
//! Building is a pure scan over an extracted corpus: the same corpus always
//! produces the same graph, and graphs built over corpus slices merge by
//! addition, so batched accumulation stays possible.

use crate::controls::PipelineControls;
use crate::extractor::Review;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

/// Positive/negative label derived from the rating threshold alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SentimentBucket {
    /// Rating at or above the configured threshold.
    Positive,
    /// Rating below the threshold.
    Negative,
}

/// Per-emoji counters accumulated across the corpus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeStats {
    /// Emoji cluster this node represents.
    pub emoji: String,
    /// Number of reviews containing the emoji at least once.
    pub review_frequency: u64,
    /// Total occurrences, duplicates within one review included.
    pub occurrences: u64,
    /// Reviews in the positive bucket containing the emoji.
    pub positive_reviews: u64,
    /// Reviews in the negative bucket containing the emoji.
    pub negative_reviews: u64,
}

impl NodeStats {
    fn new(emoji: &str) -> Self {
        Self {
            emoji: emoji.to_string(),
            review_frequency: 0,
            occurrences: 0,
            positive_reviews: 0,
            negative_reviews: 0,
        }
    }

    /// Review count inside one sentiment bucket.
    pub fn bucket_count(&self, bucket: SentimentBucket) -> u64 {
        match bucket {
            SentimentBucket::Positive => self.positive_reviews,
            SentimentBucket::Negative => self.negative_reviews,
        }
    }
}

/// Weighted undirected graph over emoji, nodes kept in first-seen order.
///
/// Edge weights are keyed by `(lower, higher)` node index, so symmetry and
/// the no-self-loop invariant hold by construction and iteration order is
/// deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoOccurrenceGraph {
    nodes: Vec<NodeStats>,
    index: HashMap<String, usize>,
    edges: BTreeMap<(usize, usize), u64>,
}

impl CoOccurrenceGraph {
    /// Nodes in first-seen corpus order.
    pub fn nodes(&self) -> &[NodeStats] {
        &self.nodes
    }

    /// Edges as `(emoji_a, emoji_b, weight)` in deterministic order.
    pub fn edges(&self) -> impl Iterator<Item = (&str, &str, u64)> {
        self.edges.iter().map(|(&(a, b), &weight)| {
            (
                self.nodes[a].emoji.as_str(),
                self.nodes[b].emoji.as_str(),
                weight,
            )
        })
    }

    /// Number of distinct emoji seen.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of co-occurring pairs.
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Symmetric edge weight lookup; zero for unknown pairs and self-pairs.
    pub fn weight(&self, a: &str, b: &str) -> u64 {
        let (Some(&ia), Some(&ib)) = (self.index.get(a), self.index.get(b)) else {
            return 0;
        };
        if ia == ib {
            return 0;
        }
        let key = (ia.min(ib), ia.max(ib));
        self.edges.get(&key).copied().unwrap_or(0)
    }

    /// Top-K emoji within one sentiment bucket, ranked by bucket review
    /// count descending with first-seen order as the stable tie-break.
    /// Emoji absent from the bucket are not ranked.
    pub fn top_k(&self, bucket: SentimentBucket, k: usize) -> Vec<(&str, u64)> {
        let mut ranked: Vec<(usize, u64)> = self
            .nodes
            .iter()
            .enumerate()
            .map(|(idx, node)| (idx, node.bucket_count(bucket)))
            .filter(|&(_, count)| count > 0)
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        ranked
            .into_iter()
            .take(k)
            .map(|(idx, count)| (self.nodes[idx].emoji.as_str(), count))
            .collect()
    }

    /// Adds another graph's counts into this one. Node identity reconciles
    /// by cluster string; the receiver's first-seen order wins, new emoji
    /// append after it.
    pub fn merge(&mut self, other: &CoOccurrenceGraph) {
        for node in &other.nodes {
            let idx = self.node_index(&node.emoji);
            let mine = &mut self.nodes[idx];
            mine.review_frequency += node.review_frequency;
            mine.occurrences += node.occurrences;
            mine.positive_reviews += node.positive_reviews;
            mine.negative_reviews += node.negative_reviews;
        }
        for (&(a, b), &weight) in &other.edges {
            let ia = self.node_index(&other.nodes[a].emoji);
            let ib = self.node_index(&other.nodes[b].emoji);
            let key = (ia.min(ib), ia.max(ib));
            *self.edges.entry(key).or_insert(0) += weight;
        }
    }

    fn node_index(&mut self, emoji: &str) -> usize {
        if let Some(&idx) = self.index.get(emoji) {
            return idx;
        }
        let idx = self.nodes.len();
        self.nodes.push(NodeStats::new(emoji));
        self.index.insert(emoji.to_string(), idx);
        idx
    }
}

/// Pure builder from an extracted corpus to the co-occurrence graph.
#[derive(Debug, Clone, Copy)]
pub struct GraphBuilder {
    rating_threshold: u8,
}

impl GraphBuilder {
    /// Builds a graph builder bound to the configured sentiment threshold.
    pub fn new(controls: &PipelineControls) -> Self {
        Self {
            rating_threshold: controls.rating_threshold(),
        }
    }

    /// Buckets one review by its rating.
    pub fn bucket(&self, review: &Review) -> SentimentBucket {
        if review.rating >= self.rating_threshold {
            SentimentBucket::Positive
        } else {
            SentimentBucket::Negative
        }
    }

    /// Scans the corpus once, producing nodes, clique edge weights, and the
    /// sentiment aggregates. Rebuilding over the same corpus yields an
    /// identical graph.
    pub fn build(&self, corpus: &[Review]) -> CoOccurrenceGraph {
        let mut graph = CoOccurrenceGraph::default();

        for review in corpus {
            // Distinct set per review, first-seen order kept within it.
            let mut distinct: Vec<usize> = Vec::new();
            for cluster in &review.emoji {
                let idx = graph.node_index(cluster);
                graph.nodes[idx].occurrences += 1;
                if !distinct.contains(&idx) {
                    distinct.push(idx);
                }
            }

            let positive = review.rating >= self.rating_threshold;
            for &idx in &distinct {
                let node = &mut graph.nodes[idx];
                node.review_frequency += 1;
                if positive {
                    node.positive_reviews += 1;
                } else {
                    node.negative_reviews += 1;
                }
            }

            // Clique contribution: every unordered pair within the review.
            for (pos, &a) in distinct.iter().enumerate() {
                for &b in &distinct[pos + 1..] {
                    let key = (a.min(b), a.max(b));
                    *graph.edges.entry(key).or_insert(0) += 1;
                }
            }
        }

        graph
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use url::Url;

    fn review(rating: u8, emoji: &[&str]) -> Review {
        Review {
            product_id: "aloe-cream".to_string(),
            product_name: "Aloe Cream".to_string(),
            category: "Уход".to_string(),
            subcategory: None,
            rating,
            raw_text: emoji.concat(),
            emoji: emoji.iter().map(|e| e.to_string()).collect(),
            source_url: Url::parse("https://hollyshop.ru/catalog/basecare/aloe-cream/reviews/")
                .unwrap(),
        }
    }

    fn builder() -> GraphBuilder {
        GraphBuilder::new(&PipelineControls::default())
    }

    #[test]
    fn duplicate_emoji_counts_once_per_review_for_cooccurrence() {
        let corpus = vec![review(5, &["😍", "😍", "🔥"])];
        let graph = builder().build(&corpus);

        assert_eq!(graph.node_count(), 2);
        assert_eq!(graph.weight("😍", "🔥"), 1);
        let heart_eyes = &graph.nodes()[0];
        assert_eq!(heart_eyes.emoji, "😍");
        assert_eq!(heart_eyes.occurrences, 2);
        assert_eq!(heart_eyes.review_frequency, 1);
        assert_eq!(heart_eyes.positive_reviews, 1);
        assert_eq!(heart_eyes.negative_reviews, 0);
    }

    #[test]
    fn weight_is_symmetric_and_self_loops_never_exist() {
        let corpus = vec![
            review(5, &["😍", "🔥", "💧"]),
            review(2, &["🔥", "😍"]),
            review(4, &["😍", "😍"]),
        ];
        let graph = builder().build(&corpus);

        assert_eq!(graph.weight("😍", "🔥"), graph.weight("🔥", "😍"));
        assert_eq!(graph.weight("😍", "🔥"), 2);
        assert_eq!(graph.weight("😍", "😍"), 0);
        for (a, b, weight) in graph.edges() {
            assert_ne!(a, b);
            assert!(weight > 0);
        }
    }

    #[test]
    fn sparse_reviews_contribute_no_edges() {
        let corpus = vec![review(5, &[]), review(3, &["🔥"]), review(1, &["💧", "💧"])];
        let graph = builder().build(&corpus);

        assert_eq!(graph.edge_count(), 0);
        assert_eq!(graph.node_count(), 2);
        assert_eq!(graph.nodes()[0].review_frequency, 1);
    }

    #[test]
    fn rebuild_is_idempotent() {
        let corpus = vec![
            review(5, &["😍", "🔥"]),
            review(1, &["💧"]),
            review(4, &["🔥", "💧", "😍"]),
        ];
        let first = builder().build(&corpus);
        let second = builder().build(&corpus);
        assert_eq!(first, second);
    }

    #[test]
    fn sentiment_buckets_follow_the_threshold() {
        let corpus = vec![
            review(4, &["🔥"]),
            review(5, &["🔥"]),
            review(3, &["🔥"]),
        ];
        let graph = builder().build(&corpus);

        let node = &graph.nodes()[0];
        assert_eq!(node.positive_reviews, 2);
        assert_eq!(node.negative_reviews, 1);
    }

    #[test]
    fn top_k_ties_break_by_first_seen_order() {
        // 💧 and 🔥 both appear in two positive reviews; 💧 was seen first.
        let corpus = vec![
            review(5, &["💧"]),
            review(5, &["🔥", "💧"]),
            review(4, &["🔥", "😍"]),
            review(2, &["😡"]),
        ];
        let graph = builder().build(&corpus);

        let top = graph.top_k(SentimentBucket::Positive, 2);
        assert_eq!(top, vec![("💧", 2), ("🔥", 2)]);

        let negative = graph.top_k(SentimentBucket::Negative, 5);
        assert_eq!(negative, vec![("😡", 1)]);
    }

    #[test]
    fn merged_partial_graphs_equal_the_whole_build() {
        let corpus = vec![
            review(5, &["😍", "🔥"]),
            review(2, &["🔥", "💧"]),
            review(4, &["💧", "😍", "🔥"]),
            review(1, &["😡"]),
        ];
        let whole = builder().build(&corpus);

        let mut merged = builder().build(&corpus[..2]);
        merged.merge(&builder().build(&corpus[2..]));

        assert_eq!(merged, whole);
    }
}
