//! Application runner coordinating the fetch → extract → classify →
//! aggregate pipeline.

use crate::controls::{Cli, PipelineControls};
use crate::debug_log;
use crate::export::Exporter;
use crate::extractor::{ExtractError, RecordExtractor, Review};
use crate::fetcher::PageFetcher;
use crate::graph::GraphBuilder;
use crate::html::collect_review_links;
use crate::taxonomy::{ClassificationSource, EmojiCategorizer, EmojiEntry, Taxonomy};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::runtime::Builder;
use url::Url;

type DynError = Box<dyn std::error::Error + Send + Sync>;

/// Entry point used by the binary: builds the async runtime and drives one
/// full pipeline run.
pub fn run(cli: Cli) -> Result<(), DynError> {
    let rt = Builder::new_current_thread().enable_all().build()?;
    rt.block_on(run_pipeline(cli))
}

async fn run_pipeline(cli: Cli) -> Result<(), DynError> {
    let start = Instant::now();
    let controls = cli.build_controls();
    let summary = RunSummary::default();

    // An unreadable taxonomy is fatal; entries skipped inside a readable
    // file are not.
    let taxonomy = Taxonomy::load(&cli.taxonomy_path)?;
    summary.record_taxonomy_skipped(taxonomy.skipped().len());
    let overrides = match &cli.overrides_path {
        Some(path) => Taxonomy::load(path)?,
        None => Taxonomy::default(),
    };
    let categorizer = EmojiCategorizer::new(taxonomy, overrides);

    let fetcher = PageFetcher::new(&controls)?;
    let links = discover_review_links(&fetcher, &cli.listing_url, &controls, &summary).await?;
    println!("discovered {} review pages", links.len());

    let extractor = RecordExtractor::new(&controls);
    let corpus = fetch_and_extract(&fetcher, &extractor, &links, &summary).await;

    let mapping = categorize_corpus(&categorizer, &corpus, &summary);
    let graph = GraphBuilder::new(&controls).build(&corpus);

    let exporter = Exporter::new(&cli.output_dir);
    exporter.write_links(&links)?;
    exporter.write_reviews(&corpus)?;
    exporter.write_emoji_categories(&mapping)?;
    exporter.write_edges(&graph)?;
    exporter.write_top_emoji(&graph, controls.top_k())?;

    summary.report(start.elapsed());
    Ok(())
}

/// Walks the paginated listing, collecting review-page links until a page
/// yields zero new ones. The first listing page failing after all retries is
/// fatal; a later failure ends discovery with what was already found.
async fn discover_review_links(
    fetcher: &PageFetcher,
    listing_pattern: &str,
    controls: &PipelineControls,
    summary: &RunSummary,
) -> Result<Vec<Url>, DynError> {
    let mut seen: HashSet<Url> = HashSet::new();
    let mut links: Vec<Url> = Vec::new();

    for page_index in 1..=controls.max_listing_pages() {
        let url = Url::parse(&format!("{listing_pattern}{page_index}"))?;
        let page = match fetcher.fetch(&url).await {
            Ok(page) => {
                summary.record_page_fetched();
                page
            }
            Err(err) if page_index == 1 => {
                // No listing at all means no meaningful output.
                return Err(err.into());
            }
            Err(err) => {
                eprintln!("listing page {page_index} failed, stopping discovery: {err}");
                summary.record_page_failed();
                break;
            }
        };

        let mut added = 0usize;
        match collect_review_links(&page.body, &url) {
            Ok(found) => {
                for link in found {
                    if seen.insert(link.clone()) {
                        links.push(link);
                        added += 1;
                    }
                }
            }
            Err(err) => {
                eprintln!("listing page {page_index} unparseable, stopping discovery: {err}");
                summary.record_page_failed();
                break;
            }
        }

        debug_log!("listing page {page_index}: {added} new links");
        if added == 0 {
            break;
        }
    }

    Ok(links)
}

async fn fetch_and_extract(
    fetcher: &PageFetcher,
    extractor: &RecordExtractor,
    links: &[Url],
    summary: &RunSummary,
) -> Vec<Review> {
    let mut corpus = Vec::new();
    for link in links {
        let page = match fetcher.fetch(link).await {
            Ok(page) => {
                summary.record_page_fetched();
                page
            }
            Err(err) => {
                eprintln!("skipping {link}: {err}");
                summary.record_page_failed();
                continue;
            }
        };

        match extractor.extract(&page) {
            Ok(outcome) => {
                summary.record_reviews_extracted(outcome.reviews.len());
                for dropped in &outcome.dropped {
                    eprintln!("dropped review: {dropped}");
                    summary.record_review_dropped(dropped);
                }
                corpus.extend(outcome.reviews);
            }
            Err(err) => {
                eprintln!("skipping {link}: {err}");
                summary.record_page_malformed();
            }
        }
    }
    corpus
}

fn categorize_corpus(
    categorizer: &EmojiCategorizer,
    corpus: &[Review],
    summary: &RunSummary,
) -> BTreeMap<String, EmojiEntry> {
    let distinct = corpus
        .iter()
        .flat_map(|review| review.emoji.iter().map(String::as_str));
    let mapping = categorizer.categorize(distinct);

    let unclassified = mapping
        .values()
        .filter(|entry| entry.source == ClassificationSource::Unclassified)
        .count();
    summary.record_emoji_counts(mapping.len(), unclassified);
    mapping
}

/// End-of-run counters, printed as the user-visible summary.
#[derive(Default)]
pub struct RunSummary {
    pages_fetched: AtomicUsize,
    pages_failed: AtomicUsize,
    pages_malformed: AtomicUsize,
    reviews_extracted: AtomicUsize,
    dropped_malformed_rating: AtomicUsize,
    dropped_malformed_structure: AtomicUsize,
    distinct_emoji: AtomicUsize,
    unclassified_emoji: AtomicUsize,
    taxonomy_entries_skipped: AtomicUsize,
}

impl RunSummary {
    /// Counts a successful page fetch (listing or review page).
    pub fn record_page_fetched(&self) {
        self.pages_fetched.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts a fetch that exhausted its retries or was not found.
    pub fn record_page_failed(&self) {
        self.pages_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts a fetched page whose structure was unusable.
    pub fn record_page_malformed(&self) {
        self.pages_malformed.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts reviews successfully extracted from one page.
    pub fn record_reviews_extracted(&self, count: usize) {
        self.reviews_extracted.fetch_add(count, Ordering::Relaxed);
    }

    /// Counts one dropped review under its reason.
    pub fn record_review_dropped(&self, err: &ExtractError) {
        match err {
            ExtractError::MalformedRating { .. } => {
                self.dropped_malformed_rating.fetch_add(1, Ordering::Relaxed);
            }
            ExtractError::MalformedStructure { .. } => {
                self.dropped_malformed_structure
                    .fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Records the sizes of the final classification mapping. These are
    /// set-size gauges over the whole corpus, not accumulating counts.
    pub fn record_emoji_counts(&self, distinct: usize, unclassified: usize) {
        self.distinct_emoji.store(distinct, Ordering::Relaxed);
        self.unclassified_emoji.store(unclassified, Ordering::Relaxed);
    }

    /// Records taxonomy entries skipped during load.
    pub fn record_taxonomy_skipped(&self, count: usize) {
        self.taxonomy_entries_skipped
            .fetch_add(count, Ordering::Relaxed);
    }

    /// Successful fetches so far.
    pub fn pages_fetched(&self) -> usize {
        self.pages_fetched.load(Ordering::Relaxed)
    }

    /// Failed fetches so far.
    pub fn pages_failed(&self) -> usize {
        self.pages_failed.load(Ordering::Relaxed)
    }

    /// Extracted review count so far.
    pub fn reviews_extracted(&self) -> usize {
        self.reviews_extracted.load(Ordering::Relaxed)
    }

    /// Prints the run summary block.
    pub fn report(&self, elapsed: Duration) {
        println!("--- run summary ({:.2}s) ---", elapsed.as_secs_f32());
        println!("pages fetched: {}", self.pages_fetched());
        println!("pages failed: {}", self.pages_failed());
        println!(
            "pages malformed: {}",
            self.pages_malformed.load(Ordering::Relaxed)
        );
        println!("reviews extracted: {}", self.reviews_extracted());
        println!(
            "reviews dropped (malformed rating): {}",
            self.dropped_malformed_rating.load(Ordering::Relaxed)
        );
        println!(
            "reviews dropped (malformed structure): {}",
            self.dropped_malformed_structure.load(Ordering::Relaxed)
        );
        println!(
            "distinct emoji: {}",
            self.distinct_emoji.load(Ordering::Relaxed)
        );
        println!(
            "emoji left unclassified: {}",
            self.unclassified_emoji.load(Ordering::Relaxed)
        );
        println!(
            "taxonomy entries skipped: {}",
            self.taxonomy_entries_skipped.load(Ordering::Relaxed)
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    fn quick_controls(retry_limit: u32) -> PipelineControls {
        PipelineControls::new(
            Duration::from_millis(1),
            Duration::from_secs(5),
            retry_limit,
            Duration::from_millis(1),
            1,
            5,
            4,
            10,
            500,
        )
    }

    fn listing_cards(slugs: &[&str]) -> String {
        slugs
            .iter()
            .map(|slug| {
                format!(
                    r#"<div class="catalog__list-item">
                         <a href="/catalog/basecare/{slug}/">{slug}</a>
                         <div class="tag-rating">4.5</div>
                       </div>"#
                )
            })
            .collect()
    }

    fn http_response(status: &str, body: &str) -> String {
        format!(
            "HTTP/1.1 {status}\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
            body.len()
        )
    }

    async fn read_request(stream: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let read = stream.read(&mut chunk).await.unwrap_or(0);
            if read == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..read]);
            if buf.windows(4).any(|window| window == b"\r\n\r\n") {
                break;
            }
        }
        String::from_utf8_lossy(&buf).into_owned()
    }

    /// Serves listing pages keyed by their `PAGEN_1` index, counting hits.
    async fn serve_listing<F>(listener: TcpListener, hits: Arc<AtomicUsize>, respond: F)
    where
        F: Fn(usize) -> String,
    {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            hits.fetch_add(1, Ordering::SeqCst);
            let request = read_request(&mut stream).await;
            let page = request
                .split("PAGEN_1=")
                .nth(1)
                .and_then(|rest| rest.split(|c: char| !c.is_ascii_digit()).next())
                .and_then(|digits| digits.parse().ok())
                .unwrap_or(1);
            let _ = stream.write_all(respond(page).as_bytes()).await;
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn discovery_stops_once_a_listing_page_adds_nothing_new() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let hits = Arc::new(AtomicUsize::new(0));

        // Every page repeats the same two cards, so page 2 adds nothing.
        tokio::spawn(serve_listing(listener, Arc::clone(&hits), |_page| {
            http_response("200 OK", &listing_cards(&["aloe-cream", "berry-mask"]))
        }));

        let controls = quick_controls(0);
        let fetcher = PageFetcher::new(&controls).expect("client builds");
        let summary = RunSummary::default();
        let pattern = format!("http://{addr}/catalog/basecare/?PAGEN_1=");

        let links = discover_review_links(&fetcher, &pattern, &controls, &summary)
            .await
            .expect("discovery");

        assert_eq!(links.len(), 2);
        assert!(links[0].path().ends_with("/aloe-cream/reviews/"));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(summary.pages_fetched(), 2);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn listing_failure_past_the_first_page_keeps_earlier_links() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let hits = Arc::new(AtomicUsize::new(0));

        tokio::spawn(serve_listing(listener, Arc::clone(&hits), |page| {
            if page == 1 {
                http_response("200 OK", &listing_cards(&["aloe-cream", "berry-mask"]))
            } else {
                http_response("500 Internal Server Error", "")
            }
        }));

        let controls = quick_controls(2);
        let fetcher = PageFetcher::new(&controls).expect("client builds");
        let summary = RunSummary::default();
        let pattern = format!("http://{addr}/catalog/basecare/?PAGEN_1=");

        let links = discover_review_links(&fetcher, &pattern, &controls, &summary)
            .await
            .expect("discovery survives a later page failing");

        assert_eq!(links.len(), 2);
        assert_eq!(summary.pages_fetched(), 1);
        assert_eq!(summary.pages_failed(), 1);
        // Page 1 once, then page 2 once per exhausted attempt.
        assert_eq!(hits.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn dropped_reviews_count_under_their_reason() {
        let summary = RunSummary::default();
        summary.record_review_dropped(&ExtractError::MalformedRating {
            url: "https://hollyshop.ru/x/reviews/".to_string(),
            stars: Some(9),
        });
        summary.record_review_dropped(&ExtractError::MalformedStructure {
            url: "https://hollyshop.ru/x/reviews/".to_string(),
            missing: "rating-stars",
        });
        summary.record_review_dropped(&ExtractError::MalformedRating {
            url: "https://hollyshop.ru/y/reviews/".to_string(),
            stars: None,
        });

        assert_eq!(
            summary.dropped_malformed_rating.load(Ordering::Relaxed),
            2
        );
        assert_eq!(
            summary.dropped_malformed_structure.load(Ordering::Relaxed),
            1
        );
    }
}
