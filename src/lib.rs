//! Product Scout: multi-strategy product extraction for e-commerce pages
//!
//! Pulls name, price, image, description and canonical URL out of a product
//! page by running an ordered chain of strategies:
//! - retailer-specific CSS selectors (Lowe's, Home Depot, Amazon, Walmart)
//! - schema.org JSON-LD and microdata
//! - OpenGraph / Twitter card meta tags
//! - an optional LLM guess for whatever is still missing
//!
//! Strategies are data ([`strategy::StrategyRegistry`]); pages are reached
//! through the [`accessor::DocumentAccessor`] trait so any fetcher or headless
//! browser can drive the engine.

pub mod accessor;
pub mod config;
pub mod document;
pub mod engine;
pub mod error;
pub mod extractors;
pub mod fetch;
pub mod guess;
pub mod record;
pub mod resolver;
pub mod response;
pub mod selector;
pub mod strategy;

pub use accessor::{DocumentAccessor, DocumentSource, Lookup};
pub use config::{EngineConfig, FailurePolicy};
pub use document::StaticDocument;
pub use engine::{Extraction, Extractor, OutcomeStatus, StrategyOutcome};
pub use error::ExtractionError;
pub use fetch::HttpSource;
pub use record::{Field, Money, ProductRecord};
pub use resolver::SiteIdentifier;
pub use response::{FailureResponse, ProductResponse};
pub use strategy::{Strategy, StrategyRegistry};
