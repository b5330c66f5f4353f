//! Emoji taxonomy loading and categorization.
//!
//! The reference taxonomy and the manual override list share one JSON shape:
//! an object keyed by exact emoji cluster, each value carrying `category`
//! and `subcategory` strings. Both are loaded once at startup and passed
//! around read-only.

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt;
use std::fs;
use std::path::Path;

/// Category assigned to emoji the taxonomy does not know.
pub const UNCLASSIFIED: &str = "Unclassified";

/// Where an emoji's classification came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationSource {
    /// Exact match in the external taxonomy.
    Matched,
    /// Entry from the curated correction list.
    Override,
    /// No entry anywhere; assigned the `Unclassified` pair.
    Unclassified,
}

/// One distinct emoji with its resolved classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmojiEntry {
    /// Codepoint-cluster string, possibly multi-codepoint.
    pub emoji: String,
    /// Resolved category.
    pub category: String,
    /// Resolved subcategory.
    pub subcategory: String,
    /// Provenance of the classification.
    pub source: ClassificationSource,
}

/// Errors surfaced while loading a taxonomy file.
#[derive(Debug, Clone)]
pub enum TaxonomyLoadError {
    /// The file could not be read or is not a JSON object at the top level.
    Unreadable {
        /// Offending path.
        path: String,
        /// Underlying failure.
        detail: String,
    },
    /// A single entry had the wrong shape; skipped, never fatal.
    MalformedEntry {
        /// Emoji key of the bad entry.
        key: String,
        /// What was wrong with it.
        detail: &'static str,
    },
}

impl fmt::Display for TaxonomyLoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unreadable { path, detail } => {
                write!(f, "taxonomy file {path} unreadable: {detail}")
            }
            Self::MalformedEntry { key, detail } => {
                write!(f, "taxonomy entry `{key}` skipped: {detail}")
            }
        }
    }
}

impl Error for TaxonomyLoadError {}

/// Read-only mapping from emoji cluster to (category, subcategory).
#[derive(Debug, Clone, Default)]
pub struct Taxonomy {
    entries: BTreeMap<String, (String, String)>,
    skipped: Vec<TaxonomyLoadError>,
}

impl Taxonomy {
    /// Loads a taxonomy file, skipping malformed entries with a warning.
    pub fn load(path: &Path) -> Result<Self, TaxonomyLoadError> {
        let unreadable = |detail: String| TaxonomyLoadError::Unreadable {
            path: path.display().to_string(),
            detail,
        };

        let raw = fs::read_to_string(path).map_err(|err| unreadable(err.to_string()))?;
        let value: Value =
            serde_json::from_str(&raw).map_err(|err| unreadable(err.to_string()))?;
        let object = value
            .as_object()
            .ok_or_else(|| unreadable("top-level value is not an object".to_string()))?;

        let mut taxonomy = Self::default();
        for (key, entry) in object {
            match parse_entry(key, entry) {
                Ok(pair) => {
                    taxonomy.entries.insert(key.clone(), pair);
                }
                Err(err) => {
                    eprintln!("warning: {err}");
                    taxonomy.skipped.push(err);
                }
            }
        }
        Ok(taxonomy)
    }

    /// Builds a taxonomy directly from pairs; used by tests and overrides.
    pub fn from_pairs<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (String, String, String)>,
    {
        let mut taxonomy = Self::default();
        for (emoji, category, subcategory) in pairs {
            taxonomy.entries.insert(emoji, (category, subcategory));
        }
        taxonomy
    }

    /// Exact-cluster lookup.
    pub fn get(&self, emoji: &str) -> Option<&(String, String)> {
        self.entries.get(emoji)
    }

    /// Number of usable entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no entries loaded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries skipped during load.
    pub fn skipped(&self) -> &[TaxonomyLoadError] {
        &self.skipped
    }
}

fn parse_entry(key: &str, entry: &Value) -> Result<(String, String), TaxonomyLoadError> {
    let malformed = |detail: &'static str| TaxonomyLoadError::MalformedEntry {
        key: key.to_string(),
        detail,
    };

    if key.is_empty() {
        return Err(malformed("empty emoji key"));
    }
    let object = entry.as_object().ok_or(malformed("value is not an object"))?;
    let category = object
        .get("category")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or(malformed("missing `category` string"))?;
    let subcategory = object
        .get("subcategory")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or(malformed("missing `subcategory` string"))?;

    Ok((category.to_string(), subcategory.to_string()))
}

/// Resolves every distinct emoji in a corpus against overrides, then the
/// external taxonomy, then the `Unclassified` fallback.
#[derive(Debug, Clone, Default)]
pub struct EmojiCategorizer {
    taxonomy: Taxonomy,
    overrides: Taxonomy,
}

impl EmojiCategorizer {
    /// Builds a categorizer over a loaded taxonomy and override list.
    pub fn new(taxonomy: Taxonomy, overrides: Taxonomy) -> Self {
        Self {
            taxonomy,
            overrides,
        }
    }

    /// Classifies one emoji cluster. Overrides win over the taxonomy; an
    /// unknown cluster falls back to `Unclassified` rather than failing, so
    /// a taxonomy lagging behind emoji usage never stops the run.
    pub fn classify(&self, emoji: &str) -> EmojiEntry {
        if let Some((category, subcategory)) = self.overrides.get(emoji) {
            return EmojiEntry {
                emoji: emoji.to_string(),
                category: category.clone(),
                subcategory: subcategory.clone(),
                source: ClassificationSource::Override,
            };
        }
        if let Some((category, subcategory)) = self.taxonomy.get(emoji) {
            return EmojiEntry {
                emoji: emoji.to_string(),
                category: category.clone(),
                subcategory: subcategory.clone(),
                source: ClassificationSource::Matched,
            };
        }
        EmojiEntry {
            emoji: emoji.to_string(),
            category: UNCLASSIFIED.to_string(),
            subcategory: UNCLASSIFIED.to_string(),
            source: ClassificationSource::Unclassified,
        }
    }

    /// Produces a mapping total over the input set: every distinct emoji
    /// ends with exactly one entry.
    pub fn categorize<'a, I>(&self, emoji: I) -> BTreeMap<String, EmojiEntry>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut mapping = BTreeMap::new();
        for cluster in emoji {
            mapping
                .entry(cluster.to_string())
                .or_insert_with(|| self.classify(cluster));
        }
        mapping
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    fn write_json(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(content.as_bytes()).expect("write json");
        file
    }

    fn sample_categorizer() -> EmojiCategorizer {
        let taxonomy = Taxonomy::from_pairs([
            (
                "😍".to_string(),
                "Smileys & Emotion".to_string(),
                "face-affection".to_string(),
            ),
            (
                "💀".to_string(),
                "People & Body".to_string(),
                "body-parts".to_string(),
            ),
        ]);
        // 💀 is near-universally used as "dying of laughter" in reviews.
        let overrides = Taxonomy::from_pairs([(
            "💀".to_string(),
            "Smileys & Emotion".to_string(),
            "face-laughing".to_string(),
        )]);
        EmojiCategorizer::new(taxonomy, overrides)
    }

    #[test]
    fn exact_match_adopts_taxonomy_pair() {
        let entry = sample_categorizer().classify("😍");
        assert_eq!(entry.category, "Smileys & Emotion");
        assert_eq!(entry.subcategory, "face-affection");
        assert_eq!(entry.source, ClassificationSource::Matched);
    }

    #[test]
    fn override_wins_over_taxonomy() {
        let entry = sample_categorizer().classify("💀");
        assert_eq!(entry.subcategory, "face-laughing");
        assert_eq!(entry.source, ClassificationSource::Override);
    }

    #[test]
    fn unknown_emoji_falls_back_to_unclassified() {
        let entry = sample_categorizer().classify("🪷");
        assert_eq!(entry.category, UNCLASSIFIED);
        assert_eq!(entry.subcategory, UNCLASSIFIED);
        assert_eq!(entry.source, ClassificationSource::Unclassified);
    }

    #[test]
    fn mapping_is_total_and_deduplicated() {
        let mapping = sample_categorizer().categorize(["😍", "😍", "🪷"]);
        assert_eq!(mapping.len(), 2);
        assert!(mapping.contains_key("😍"));
        assert!(mapping.contains_key("🪷"));
    }

    #[test]
    fn malformed_entries_are_skipped_not_fatal() {
        let file = write_json(
            r#"{
                "😍": {"category": "Smileys & Emotion", "subcategory": "face-affection"},
                "🔥": {"category": "Travel & Places"},
                "💧": "blue drop"
            }"#,
        );
        let taxonomy = Taxonomy::load(file.path()).expect("load succeeds");
        assert_eq!(taxonomy.len(), 1);
        assert_eq!(taxonomy.skipped().len(), 2);
        assert!(taxonomy.get("😍").is_some());
    }

    #[test]
    fn unreadable_file_is_fatal() {
        let err = Taxonomy::load(Path::new("/nonexistent/taxonomy.json"))
            .expect_err("missing file fails");
        assert!(matches!(err, TaxonomyLoadError::Unreadable { .. }));
    }

    #[test]
    fn non_object_top_level_is_fatal() {
        let file = write_json("[1, 2, 3]");
        let err = Taxonomy::load(file.path()).expect_err("array fails");
        assert!(matches!(err, TaxonomyLoadError::Unreadable { .. }));
    }
}
