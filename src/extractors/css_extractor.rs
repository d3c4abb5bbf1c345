//! CSS selector-based lookups
//!
//! Uses the scraper crate to select elements by CSS selectors.

use scraper::{Html, Selector};

/// Parse a CSS selector, keeping the parser's message on failure.
pub fn parse_selector(selector_str: &str) -> Result<Selector, String> {
    Selector::parse(selector_str).map_err(|e| e.to_string())
}

/// Trimmed text of the first matching element that has any.
///
/// A blank first match (an `h1` wrapping only a logo) does not hide a later
/// one that carries the text.
pub fn first_text(document: &Html, selector: &Selector) -> Option<String> {
    document.select(selector).find_map(|el| {
        let text = el.text().collect::<String>();
        let text = text.trim();
        (!text.is_empty()).then(|| text.to_string())
    })
}

/// Attribute of the first matching element that carries it.
///
/// `<meta property="og:image">` tags are sometimes duplicated with an empty
/// first copy, so elements without the attribute are skipped.
pub fn first_attr(document: &Html, selector: &Selector, attr_name: &str) -> Option<String> {
    document
        .select(selector)
        .find_map(|el| el.value().attr(attr_name).map(String::from))
}
