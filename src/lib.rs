#![warn(missing_docs)]
//! Core library entry points for the emojigraph review pipeline.

pub mod controls;
pub mod emoji;
pub mod export;
pub mod extractor;
pub mod fetcher;
pub mod graph;
pub mod html;
pub mod runtime;
pub mod taxonomy;

pub use controls::{Cli, PipelineControls};
pub use emoji::scan_clusters;
pub use extractor::{ExtractError, PageReviews, RecordExtractor, Review};
pub use fetcher::{FetchError, Page, PageFetcher};
pub use graph::{CoOccurrenceGraph, GraphBuilder, SentimentBucket};
pub use runtime::{run, RunSummary};
pub use taxonomy::{ClassificationSource, EmojiCategorizer, EmojiEntry, Taxonomy};

#[cfg(feature = "debug_logs")]
#[macro_export]
// This allows use of the `eprintln!` macro via `debug_log!` macro.
macro_rules! debug_log {
        ($($arg:tt)*) => {
            eprintln!($($arg)*);
        };
    }
#[cfg(not(feature = "debug_logs"))]
#[macro_export]
// This effectively disables the `eprintln!` macro, effectively removing it from the code during
// compilation.
macro_rules! debug_log {
    ($($arg:tt)*) => {};
}
