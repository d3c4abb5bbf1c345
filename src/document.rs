//! Document accessor over already-fetched HTML
//!
//! `scraper::Html` is `!Send`, so it cannot live across the engine's await
//! points. The standard JSON-LD blocks are parsed once when the document is
//! built; CSS lookups re-parse the markup, which costs one parse per selector
//! attempt. A static page has nothing to wait for, so the timeout is not used.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use scraper::Html;
use serde_json::Value;
use url::Url;

use crate::accessor::{DocumentAccessor, Lookup};
use crate::error::{AccessError, FetchError};
use crate::extractors::{extract_jsonld_objects, first_attr, first_text, lookup_path, parse_selector, value_to_text};
use crate::resolver::page_url;
use crate::selector::{ExtractMode, JSON_LD_SCRIPTS};

type TypedObjects = HashMap<String, Vec<Value>>;

#[derive(Debug, Clone)]
pub struct StaticDocument {
    url: Url,
    html: String,
    /// Typed objects from `script[type="application/ld+json"]`
    jsonld: TypedObjects,
}

impl StaticDocument {
    pub fn new(url: Url, html: impl Into<String>) -> Self {
        let html = html.into();
        let jsonld = match parse_selector(JSON_LD_SCRIPTS) {
            Ok(scripts) => extract_jsonld_objects(&Html::parse_document(&html), &scripts),
            Err(_) => TypedObjects::new(),
        };
        Self { url, html, jsonld }
    }

    /// Like [`new`](Self::new) but from a URL string.
    ///
    /// # Errors
    ///
    /// [`FetchError::InvalidUrl`] if `url` is neither absolute nor a
    /// scheme-less host and path.
    pub fn from_parts(url: &str, html: impl Into<String>) -> Result<Self, FetchError> {
        let url = page_url(url).map_err(|e| FetchError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self::new(url, html))
    }

    pub fn html(&self) -> &str {
        &self.html
    }

    fn lookup(&self, pattern: &str, mode: &ExtractMode) -> Result<Lookup, AccessError> {
        let selector = parse_selector(pattern).map_err(|reason| AccessError::Malformed {
            pattern: pattern.to_string(),
            reason,
        })?;

        let value = match mode {
            ExtractMode::StructuredData { path } if pattern == JSON_LD_SCRIPTS => {
                lookup_path(&self.jsonld, path).and_then(value_to_text)
            }
            ExtractMode::StructuredData { path } => {
                let objects = extract_jsonld_objects(&Html::parse_document(&self.html), &selector);
                lookup_path(&objects, path).and_then(value_to_text)
            }
            ExtractMode::Text => first_text(&Html::parse_document(&self.html), &selector),
            ExtractMode::Attribute { name } => first_attr(&Html::parse_document(&self.html), &selector, name),
        };

        Ok(value.map_or(Lookup::Absent, Lookup::Found))
    }
}

#[async_trait]
impl DocumentAccessor for StaticDocument {
    async fn await_element(
        &self,
        pattern: &str,
        mode: &ExtractMode,
        _timeout: Duration,
    ) -> Result<Lookup, AccessError> {
        self.lookup(pattern, mode)
    }

    fn current_url(&self) -> &Url {
        &self.url
    }
}
