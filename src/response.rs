//! Flat JSON payloads for callers that expect the legacy response keys

use serde::Serialize;

use crate::engine::Extraction;
use crate::error::ExtractionError;

/// Placeholder written for every field the run could not populate.
pub const NOT_FOUND: &str = "Not found";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProductResponse {
    pub product_name: String,
    pub product_price: String,
    /// Canonical URL when the page declared one, else the requested URL.
    pub product_url: String,
    pub product_image_url: String,
    pub product_description: String,
}

impl From<&Extraction> for ProductResponse {
    fn from(extraction: &Extraction) -> Self {
        let record = &extraction.record;
        let or_missing = |value: Option<&str>| value.unwrap_or(NOT_FOUND).to_string();

        Self {
            product_name: or_missing(record.name()),
            product_price: or_missing(record.price().map(|p| p.formatted.as_str())),
            product_url: record
                .canonical_url()
                .map_or_else(|| extraction.url.clone(), |u| u.to_string()),
            product_image_url: or_missing(record.image_url().map(|u| u.as_str())),
            product_description: or_missing(record.description()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureResponse {
    pub error: String,
    pub strategies_tried: Vec<String>,
    pub timed_out: bool,
}

impl From<&ExtractionError> for FailureResponse {
    fn from(err: &ExtractionError) -> Self {
        Self {
            error: err.to_string(),
            strategies_tried: err.strategies_tried(),
            timed_out: err.timed_out(),
        }
    }
}
