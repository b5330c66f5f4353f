//! Pipeline throttle and aggregation controls shared across stages.

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// Tunable knobs that bound fetch behavior and aggregation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PipelineControls {
    politeness_delay: Duration,
    request_timeout: Duration,
    retry_limit: u32,
    backoff_base: Duration,
    rating_min: u8,
    rating_max: u8,
    rating_threshold: u8,
    top_k: usize,
    max_listing_pages: usize,
}

impl PipelineControls {
    /// Constructs a new set of pipeline controls.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        politeness_delay: Duration,
        request_timeout: Duration,
        retry_limit: u32,
        backoff_base: Duration,
        rating_min: u8,
        rating_max: u8,
        rating_threshold: u8,
        top_k: usize,
        max_listing_pages: usize,
    ) -> Self {
        Self {
            politeness_delay,
            request_timeout,
            retry_limit,
            backoff_base,
            rating_min,
            rating_max,
            rating_threshold,
            top_k,
            max_listing_pages,
        }
    }

    /// Minimum time between consecutive requests.
    pub fn politeness_delay(&self) -> Duration {
        self.politeness_delay
    }

    /// Per-request timeout handed to the HTTP client.
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Maximum retries for a transient fetch failure.
    pub fn retry_limit(&self) -> u32 {
        self.retry_limit
    }

    /// Base delay for the exponential backoff schedule.
    pub fn backoff_base(&self) -> Duration {
        self.backoff_base
    }

    /// Lowest rating the site considers valid.
    pub fn rating_min(&self) -> u8 {
        self.rating_min
    }

    /// Highest rating the site considers valid.
    pub fn rating_max(&self) -> u8 {
        self.rating_max
    }

    /// Ratings at or above this value bucket as positive sentiment.
    pub fn rating_threshold(&self) -> u8 {
        self.rating_threshold
    }

    /// Result list size for the per-bucket emoji rankings.
    pub fn top_k(&self) -> usize {
        self.top_k
    }

    /// Runaway guard on the listing pagination loop. The loop normally stops
    /// when a page yields zero new review links.
    pub fn max_listing_pages(&self) -> usize {
        self.max_listing_pages
    }

    /// Determines whether a parsed rating falls inside the valid bound.
    pub fn is_rating_valid(&self, rating: u8) -> bool {
        rating >= self.rating_min && rating <= self.rating_max
    }
}

impl Default for PipelineControls {
    fn default() -> Self {
        Self {
            politeness_delay: Duration::from_millis(1000),
            request_timeout: Duration::from_secs(10),
            retry_limit: 3,
            backoff_base: Duration::from_millis(500),
            rating_min: 1,
            rating_max: 5,
            rating_threshold: 4,
            top_k: 10,
            max_listing_pages: 500,
        }
    }
}

/// Command-line interface for the review pipeline binary.
#[derive(Parser, Debug, Clone)]
#[command(name = "emojigraph", about = "Review crawl and emoji co-occurrence pipeline")]
pub struct Cli {
    /// Paginated listing URL; the page index is appended to this pattern
    #[arg(
        long,
        env = "EMOJIGRAPH_LISTING_URL",
        default_value = "https://hollyshop.ru/catalog/basecare/?PAGEN_1="
    )]
    pub listing_url: String,

    /// Milliseconds to wait between consecutive requests
    #[arg(long, env = "EMOJIGRAPH_POLITENESS_MS", default_value_t = 1000)]
    pub politeness_ms: u64,

    /// Per-request timeout in seconds
    #[arg(long, env = "EMOJIGRAPH_TIMEOUT_SECS", default_value_t = 10)]
    pub timeout_secs: u64,

    /// Maximum retries on a transient fetch failure
    #[arg(long, env = "EMOJIGRAPH_RETRY_LIMIT", default_value_t = 3)]
    pub retry_limit: u32,

    /// Base backoff delay in milliseconds, doubled per retry
    #[arg(long, env = "EMOJIGRAPH_BACKOFF_MS", default_value_t = 500)]
    pub backoff_ms: u64,

    /// Lowest valid rating on the site
    #[arg(long, env = "EMOJIGRAPH_RATING_MIN", default_value_t = 1)]
    pub rating_min: u8,

    /// Highest valid rating on the site
    #[arg(long, env = "EMOJIGRAPH_RATING_MAX", default_value_t = 5)]
    pub rating_max: u8,

    /// Ratings at or above this value count as positive sentiment
    #[arg(long, env = "EMOJIGRAPH_RATING_THRESHOLD", default_value_t = 4)]
    pub rating_threshold: u8,

    /// Number of emoji reported per sentiment bucket
    #[arg(long, env = "EMOJIGRAPH_TOP_K", default_value_t = 10)]
    pub top_k: usize,

    /// Upper bound on listing pages visited before giving up
    #[arg(long, env = "EMOJIGRAPH_MAX_LISTING_PAGES", default_value_t = 500)]
    pub max_listing_pages: usize,

    /// Path to the emoji taxonomy JSON file
    #[arg(long, env = "EMOJIGRAPH_TAXONOMY", default_value = "data/emoji_taxonomy.json")]
    pub taxonomy_path: PathBuf,

    /// Optional path to the manual override JSON file
    #[arg(long, env = "EMOJIGRAPH_OVERRIDES")]
    pub overrides_path: Option<PathBuf>,

    /// Directory receiving the exported tables
    #[arg(long, env = "EMOJIGRAPH_OUTPUT_DIR", default_value = "data")]
    pub output_dir: PathBuf,
}

impl Cli {
    /// Converts the parsed CLI into `PipelineControls`.
    pub fn build_controls(&self) -> PipelineControls {
        PipelineControls::new(
            Duration::from_millis(self.politeness_ms),
            Duration::from_secs(self.timeout_secs),
            self.retry_limit,
            Duration::from_millis(self.backoff_ms),
            self.rating_min,
            self.rating_max,
            self.rating_threshold,
            self.top_k,
            self.max_listing_pages,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rating_bound_is_inclusive() {
        let controls = PipelineControls::default();
        assert!(controls.is_rating_valid(1));
        assert!(controls.is_rating_valid(5));
        assert!(!controls.is_rating_valid(0));
        assert!(!controls.is_rating_valid(6));
    }

    #[test]
    fn cli_defaults_build_default_controls() {
        let cli = Cli::parse_from(["emojigraph"]);
        assert_eq!(cli.build_controls(), PipelineControls::default());
    }
}
