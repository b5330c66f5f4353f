//! Listing-page link harvesting built on `lol_html`.

use lol_html::{element, HtmlRewriter, OutputSink, Settings};
use std::error::Error;
use std::fmt;
use std::sync::{Arc, Mutex};
use url::Url;

/// Collects review-page links from a catalog listing page.
///
/// A product card (`div.catalog__list-item`) yields a link only when it also
/// carries a `div.tag-rating` marker, i.e. the product actually has reviews.
/// The first `href` inside the card is resolved against `base` and redirected
/// to the card's `reviews/` sub-page.
pub fn collect_review_links(body: &[u8], base: &Url) -> Result<Vec<Url>, LinkHarvestError> {
    let cards: Arc<Mutex<Vec<CardState>>> = Arc::new(Mutex::new(Vec::new()));

    let card_open = {
        let cards = Arc::clone(&cards);
        element!("div.catalog__list-item", move |_el| {
            let mut entries = cards
                .lock()
                .unwrap_or_else(|_| panic!("card collector mutex poisoned"));
            entries.push(CardState::default());
            Ok(())
        })
    };

    let rating_marker = {
        let cards = Arc::clone(&cards);
        element!("div.catalog__list-item div.tag-rating", move |_el| {
            let mut entries = cards
                .lock()
                .unwrap_or_else(|_| panic!("card collector mutex poisoned"));
            if let Some(card) = entries.last_mut() {
                card.rated = true;
            }
            Ok(())
        })
    };

    let card_link = {
        let cards = Arc::clone(&cards);
        element!("div.catalog__list-item a[href]", move |el| {
            let mut entries = cards
                .lock()
                .unwrap_or_else(|_| panic!("card collector mutex poisoned"));
            if let Some(card) = entries.last_mut() {
                if card.href.is_none() {
                    card.href = el.get_attribute("href");
                }
            }
            Ok(())
        })
    };

    let mut rewriter = HtmlRewriter::new(
        Settings {
            element_content_handlers: vec![card_open, rating_marker, card_link],
            ..Settings::default()
        },
        NoopSink,
    );

    rewriter.write(body).map_err(LinkHarvestError::Rewrite)?;
    rewriter.end().map_err(LinkHarvestError::Rewrite)?;

    let cards = Arc::try_unwrap(cards)
        .map_err(|_| LinkHarvestError::CollectorInUse)?
        .into_inner()
        .map_err(|_| LinkHarvestError::CollectorPoisoned)?;

    Ok(cards
        .into_iter()
        .filter(|card| card.rated)
        .filter_map(|card| card.href)
        .filter_map(|href| review_url(base, &href))
        .collect())
}

/// Resolves a card `href` against the listing base and appends the reviews
/// sub-page, rejecting links that leave the listing's host.
fn review_url(base: &Url, href: &str) -> Option<Url> {
    let mut product = base.join(href).ok()?;
    if product.host_str() != base.host_str() {
        return None;
    }
    if !product.path().ends_with('/') {
        let path = format!("{}/", product.path());
        product.set_path(&path);
    }
    product.join("reviews/").ok()
}

#[derive(Default)]
struct CardState {
    rated: bool,
    href: Option<String>,
}

/// Errors surfaced while harvesting links.
#[derive(Debug)]
pub enum LinkHarvestError {
    /// The HTML rewriter encountered malformed markup.
    Rewrite(lol_html::errors::RewritingError),
    /// Internal buffer still had outstanding references.
    CollectorInUse,
    /// Collector mutex was poisoned while draining results.
    CollectorPoisoned,
}

impl fmt::Display for LinkHarvestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rewrite(err) => write!(f, "html rewrite error: {err}"),
            Self::CollectorInUse => write!(f, "link collector still in use"),
            Self::CollectorPoisoned => write!(f, "link collector mutex poisoned"),
        }
    }
}

impl Error for LinkHarvestError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Rewrite(err) => Some(err),
            Self::CollectorInUse | Self::CollectorPoisoned => None,
        }
    }
}

struct NoopSink;

impl OutputSink for NoopSink {
    fn handle_chunk(&mut self, _chunk: &[u8]) {}
}
