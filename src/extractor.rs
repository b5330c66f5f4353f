//! Structured review extraction from product review pages.

use crate::controls::PipelineControls;
use crate::debug_log;
use crate::emoji::scan_clusters;
use crate::fetcher::Page;
use scraper::{ElementRef, Html, Selector};
use serde::Serialize;
use std::error::Error;
use std::fmt;
use url::Url;

/// One customer review, immutable after extraction.
#[derive(Debug, Clone, Serialize)]
pub struct Review {
    /// Catalog slug of the product, taken from the review page URL.
    pub product_id: String,
    /// Product display name.
    pub product_name: String,
    /// Site category label.
    pub category: String,
    /// Secondary site label when the card shows one.
    pub subcategory: Option<String>,
    /// Star rating, validated against the configured bounds.
    pub rating: u8,
    /// Review body with whitespace collapsed.
    pub raw_text: String,
    /// Emoji clusters in order of appearance, duplicates preserved.
    pub emoji: Vec<String>,
    /// Review page the record came from.
    pub source_url: Url,
}

/// Errors attached to a page or a single review within it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractError {
    /// The rating was missing, non-numeric, or out of the valid bound.
    MalformedRating {
        /// Review page URL.
        url: String,
        /// Star count found on the page, when one was countable.
        stars: Option<usize>,
    },
    /// A required structural anchor was absent.
    MalformedStructure {
        /// Review page URL.
        url: String,
        /// Which anchor was missing.
        missing: &'static str,
    },
}

impl ExtractError {
    /// Short label used in the run summary's drop counts.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::MalformedRating { .. } => "malformed_rating",
            Self::MalformedStructure { .. } => "malformed_structure",
        }
    }
}

impl fmt::Display for ExtractError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedRating {
                url,
                stars: Some(stars),
            } => {
                write!(f, "{url}: rating of {stars} stars is outside the valid bound")
            }
            Self::MalformedRating { url, stars: None } => {
                write!(f, "{url}: review rating missing or unreadable")
            }
            Self::MalformedStructure { url, missing } => {
                write!(f, "{url}: expected markup region `{missing}` not found")
            }
        }
    }
}

impl Error for ExtractError {}

/// Reviews pulled from one page plus the per-review drops.
#[derive(Debug, Default)]
pub struct PageReviews {
    /// Successfully extracted reviews, page order preserved.
    pub reviews: Vec<Review>,
    /// Reviews dropped from this page, with the reason for each.
    pub dropped: Vec<ExtractError>,
}

/// Parses review pages into typed records using structural anchors.
#[derive(Clone)]
pub struct RecordExtractor {
    selectors: ReviewSelectors,
    rating_min: u8,
    rating_max: u8,
}

impl RecordExtractor {
    /// Builds an extractor bound to the configured rating range.
    pub fn new(controls: &PipelineControls) -> Self {
        Self {
            selectors: ReviewSelectors::new(),
            rating_min: controls.rating_min(),
            rating_max: controls.rating_max(),
        }
    }

    /// Extracts every review on the page.
    ///
    /// A page missing its product card is malformed as a whole; a bad rating
    /// drops only that review and is reported in [`PageReviews::dropped`].
    pub fn extract(&self, page: &Page) -> Result<PageReviews, ExtractError> {
        let body = page.body_text();
        let document = Html::parse_document(&body);

        let product_name = document
            .select(&self.selectors.product_name)
            .next()
            .map(|el| element_text(&el))
            .filter(|name| !name.is_empty())
            .ok_or(ExtractError::MalformedStructure {
                url: page.url.to_string(),
                missing: "reviews-page__product-card-name",
            })?;

        let (category, subcategory) = document
            .select(&self.selectors.product_category)
            .next()
            .map(|el| split_category(&element_text(&el)))
            .unwrap_or_else(|| (String::new(), None));

        let product_id = product_slug(&page.url);

        let mut out = PageReviews::default();
        for item in document.select(&self.selectors.review_item) {
            match self.parse_review_item(&item, page) {
                Ok(mut review) => {
                    review.product_id = product_id.clone();
                    review.product_name = product_name.clone();
                    review.category = category.clone();
                    review.subcategory = subcategory.clone();
                    out.reviews.push(review);
                }
                Err(err) => {
                    debug_log!("dropping review: {err}");
                    out.dropped.push(err);
                }
            }
        }

        Ok(out)
    }

    fn parse_review_item(
        &self,
        item: &ElementRef<'_>,
        page: &Page,
    ) -> Result<Review, ExtractError> {
        let raw_text = item
            .select(&self.selectors.review_body)
            .next()
            .map(|el| element_text(&el))
            .ok_or(ExtractError::MalformedStructure {
                url: page.url.to_string(),
                missing: "reviews__list-item-body-content",
            })?;

        let rating = self.parse_rating(item, page)?;
        let emoji = scan_clusters(&raw_text);

        Ok(Review {
            product_id: String::new(),
            product_name: String::new(),
            category: String::new(),
            subcategory: None,
            rating,
            raw_text,
            emoji,
            source_url: page.url.clone(),
        })
    }

    // The site renders a rating as one span per filled star.
    fn parse_rating(&self, item: &ElementRef<'_>, page: &Page) -> Result<u8, ExtractError> {
        let stars_el = item.select(&self.selectors.rating_stars).next().ok_or(
            ExtractError::MalformedRating {
                url: page.url.to_string(),
                stars: None,
            },
        )?;
        // Only direct children are stars; nested spans are hint text.
        let stars = stars_el
            .children()
            .filter_map(ElementRef::wrap)
            .filter(|child| child.value().name() == "span")
            .count();

        let rating = u8::try_from(stars).unwrap_or(u8::MAX);
        if rating < self.rating_min || rating > self.rating_max {
            return Err(ExtractError::MalformedRating {
                url: page.url.to_string(),
                stars: Some(stars),
            });
        }
        Ok(rating)
    }
}

impl Default for RecordExtractor {
    fn default() -> Self {
        Self::new(&PipelineControls::default())
    }
}

#[derive(Clone)]
struct ReviewSelectors {
    product_name: Selector,
    product_category: Selector,
    review_item: Selector,
    review_body: Selector,
    rating_stars: Selector,
}

impl ReviewSelectors {
    fn new() -> Self {
        Self {
            product_name: Selector::parse("div.reviews-page__product-card-name")
                .expect("product name selector"),
            product_category: Selector::parse("div.reviews-page__product-card-category")
                .expect("product category selector"),
            review_item: Selector::parse("div.reviews__list-item").expect("review item selector"),
            review_body: Selector::parse("div.reviews__list-item-body-content")
                .expect("review body selector"),
            rating_stars: Selector::parse("div.rating-stars").expect("rating stars selector"),
        }
    }
}

/// Last meaningful path segment of the review page URL, skipping the
/// trailing `reviews/` component.
fn product_slug(url: &Url) -> String {
    url.path_segments()
        .into_iter()
        .flatten()
        .filter(|segment| !segment.is_empty() && *segment != "reviews")
        .last()
        .unwrap_or_default()
        .to_string()
}

fn split_category(label: &str) -> (String, Option<String>) {
    match label.split_once('/') {
        Some((category, subcategory)) => (
            category.trim().to_string(),
            Some(subcategory.trim().to_string()).filter(|s| !s.is_empty()),
        ),
        None => (label.trim().to_string(), None),
    }
}

fn element_text(element: &ElementRef<'_>) -> String {
    let mut raw = String::new();
    for piece in element.text() {
        raw.push_str(piece);
    }
    collapse_whitespace(&raw)
}

fn collapse_whitespace(input: &str) -> String {
    let mut buf = String::with_capacity(input.len());
    let mut last_space = false;
    for ch in input.chars() {
        if ch.is_whitespace() {
            if !last_space && !buf.is_empty() {
                buf.push(' ');
            }
            last_space = true;
        } else {
            buf.push(ch);
            last_space = false;
        }
    }
    buf.trim().to_string()
}
