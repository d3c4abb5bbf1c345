//! HTML extraction modules
//!
//! Each module provides lookups for a specific data format over an already
//! parsed document.

mod css_extractor;
mod jsonld_extractor;

pub use css_extractor::*;
pub use jsonld_extractor::*;
