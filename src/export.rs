//! JSON table export for downstream tabulation and plotting.

use crate::extractor::Review;
use crate::graph::{CoOccurrenceGraph, SentimentBucket};
use crate::taxonomy::EmojiEntry;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use url::Url;

/// Review table row.
#[derive(Debug, Serialize)]
pub struct ReviewRow<'a> {
    /// Catalog slug of the product.
    pub product_id: &'a str,
    /// Product display name.
    pub product_name: &'a str,
    /// Site category.
    pub category: &'a str,
    /// Site subcategory, when present.
    pub subcategory: Option<&'a str>,
    /// Star rating.
    pub rating: u8,
    /// Ordered emoji clusters, duplicates preserved.
    pub emoji_list: &'a [String],
    /// Review body.
    pub raw_text: &'a str,
}

/// Co-occurrence edge table row.
#[derive(Debug, Serialize)]
pub struct EdgeRow<'a> {
    /// First emoji of the unordered pair.
    pub emoji_a: &'a str,
    /// Second emoji of the unordered pair.
    pub emoji_b: &'a str,
    /// Number of reviews containing both.
    pub weight: u64,
}

/// Top-K ranking table row.
#[derive(Debug, Serialize)]
pub struct TopEmojiRow<'a> {
    /// 1-based rank within the bucket.
    pub rank: usize,
    /// Ranked emoji.
    pub emoji: &'a str,
    /// Review count within the bucket.
    pub count: u64,
    /// Bucket the ranking belongs to.
    pub sentiment_bucket: SentimentBucket,
}

/// Writes the pipeline's output tables as pretty JSON files.
pub struct Exporter {
    output_dir: PathBuf,
}

impl Exporter {
    /// Builds an exporter rooted at the output directory.
    pub fn new(output_dir: &Path) -> Self {
        Self {
            output_dir: output_dir.to_path_buf(),
        }
    }

    /// Persists the discovered review-page links.
    pub fn write_links(&self, links: &[Url]) -> io::Result<()> {
        self.write_json("review_links.json", &links)
    }

    /// Persists the review table.
    pub fn write_reviews(&self, corpus: &[Review]) -> io::Result<()> {
        let rows: Vec<ReviewRow<'_>> = corpus
            .iter()
            .map(|review| ReviewRow {
                product_id: &review.product_id,
                product_name: &review.product_name,
                category: &review.category,
                subcategory: review.subcategory.as_deref(),
                rating: review.rating,
                emoji_list: &review.emoji,
                raw_text: &review.raw_text,
            })
            .collect();
        self.write_json("reviews.json", &rows)
    }

    /// Persists the emoji classification table.
    pub fn write_emoji_categories(
        &self,
        mapping: &BTreeMap<String, EmojiEntry>,
    ) -> io::Result<()> {
        let rows: Vec<&EmojiEntry> = mapping.values().collect();
        self.write_json("emoji_categories.json", &rows)
    }

    /// Persists the co-occurrence edge table.
    pub fn write_edges(&self, graph: &CoOccurrenceGraph) -> io::Result<()> {
        let rows: Vec<EdgeRow<'_>> = graph
            .edges()
            .map(|(emoji_a, emoji_b, weight)| EdgeRow {
                emoji_a,
                emoji_b,
                weight,
            })
            .collect();
        self.write_json("cooccurrence_edges.json", &rows)
    }

    /// Persists the per-bucket top-K rankings as one table.
    pub fn write_top_emoji(&self, graph: &CoOccurrenceGraph, k: usize) -> io::Result<()> {
        let mut rows: Vec<TopEmojiRow<'_>> = Vec::new();
        for bucket in [SentimentBucket::Positive, SentimentBucket::Negative] {
            for (rank0, (emoji, count)) in graph.top_k(bucket, k).into_iter().enumerate() {
                rows.push(TopEmojiRow {
                    rank: rank0 + 1,
                    emoji,
                    count,
                    sentiment_bucket: bucket,
                });
            }
        }
        self.write_json("top_emoji.json", &rows)
    }

    fn write_json<T: Serialize>(&self, name: &str, value: &T) -> io::Result<()> {
        fs::create_dir_all(&self.output_dir)?;
        let rendered = serde_json::to_string_pretty(value)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        fs::write(self.output_dir.join(name), rendered)
    }
}
